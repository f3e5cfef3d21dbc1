//! Names of the standard pipeline handlers.

pub const PERFORMATIVE_HANDLER: &str = "amqp";
pub const SASL_HANDLER: &str = "sasl";
pub const FRAME_LOGGING_HANDLER: &str = "frame-logger";
pub const FRAME_PARSING_HANDLER: &str = "frame-parser";
pub const FRAME_WRITING_HANDLER: &str = "frame-writer";
