use amqprims_codec::{conditions, SaslPerformative};
use amqprims_frame::{ProtocolFrame, ProtocolHeader};

use crate::error::EngineError;
use crate::pipeline::{EngineHandler, EngineHandlerContext};

/// Application end of the pipeline: hands headers and frames to the
/// connection state machine.
///
/// Replies produced by the state machine are queued on the engine and enter
/// the pipeline from this end once the current event has been handled.
#[derive(Debug, Default)]
pub struct PerformativeHandler;

impl PerformativeHandler {
    pub fn new() -> Self {
        Self
    }
}

impl EngineHandler for PerformativeHandler {
    fn handle_read_header(&mut self, ctx: &mut EngineHandlerContext<'_>, header: ProtocolHeader) {
        if let Err(err) = ctx.engine_mut().on_header(header) {
            ctx.fail(err);
        }
    }

    fn handle_read_sasl(&mut self, ctx: &mut EngineHandlerContext<'_>, body: SaslPerformative) {
        ctx.fail(EngineError::protocol(
            conditions::NOT_ALLOWED,
            format!("{body} received by an engine without SASL"),
        ));
    }

    fn handle_read_frame(&mut self, ctx: &mut EngineHandlerContext<'_>, frame: ProtocolFrame) {
        if let Err(err) = ctx.engine_mut().on_frame(frame) {
            ctx.fail(err);
        }
    }
}
