//! Ready-made engines with the standard pipeline installed.

use crate::config::EngineConfiguration;
use crate::constants::{
    FRAME_LOGGING_HANDLER, FRAME_PARSING_HANDLER, FRAME_WRITING_HANDLER, PERFORMATIVE_HANDLER,
    SASL_HANDLER,
};
use crate::engine::Engine;
use crate::error::Result;
use crate::handlers::{
    FrameLoggingHandler, FrameParsingHandler, FrameWritingHandler, PerformativeHandler,
    SaslClientListener, SaslHandler, SaslServerListener,
};

/// An engine speaking plain AMQP, without SASL.
pub fn create_engine(config: EngineConfiguration) -> Result<Engine> {
    build(config, None)
}

/// An engine that authenticates to the peer before opening the connection.
pub fn create_sasl_client_engine(
    config: EngineConfiguration,
    listener: impl SaslClientListener + 'static,
) -> Result<Engine> {
    build(config, Some(SaslHandler::client(listener)))
}

/// An engine that requires the peer to authenticate first.
pub fn create_sasl_server_engine(
    config: EngineConfiguration,
    listener: impl SaslServerListener + 'static,
) -> Result<Engine> {
    build(config, Some(SaslHandler::server(listener)))
}

fn build(config: EngineConfiguration, sasl: Option<SaslHandler>) -> Result<Engine> {
    config.validate()?;
    let mut engine = Engine::with_configuration(config);
    let pipeline = engine.pipeline_mut();
    pipeline.add_last(PERFORMATIVE_HANDLER, Box::new(PerformativeHandler::new()))?;
    if let Some(sasl) = sasl {
        pipeline.add_last(SASL_HANDLER, Box::new(sasl))?;
    }
    pipeline
        .add_last(FRAME_LOGGING_HANDLER, Box::new(FrameLoggingHandler::new()))?
        .add_last(FRAME_PARSING_HANDLER, Box::new(FrameParsingHandler::new()))?
        .add_last(FRAME_WRITING_HANDLER, Box::new(FrameWritingHandler::new()))?;
    Ok(engine)
}
