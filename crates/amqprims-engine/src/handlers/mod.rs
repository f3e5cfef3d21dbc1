//! Standard pipeline handlers, listed from the application end to the wire.

pub mod logging;
pub mod parsing;
pub mod performative;
pub mod sasl;
pub mod writing;

pub use logging::FrameLoggingHandler;
pub use parsing::FrameParsingHandler;
pub use performative::PerformativeHandler;
pub use sasl::{
    SaslClientListener, SaslContext, SaslDecision, SaslHandler, SaslRole, SaslServerListener,
    SaslState,
};
pub use writing::FrameWritingHandler;
