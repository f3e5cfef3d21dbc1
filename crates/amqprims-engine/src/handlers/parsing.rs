use amqprims_codec::SaslPerformative;
use amqprims_frame::{FrameConfig, FrameParser, IncomingFrame};
use bytes::{Bytes, BytesMut};

use crate::pipeline::{EngineHandler, EngineHandlerContext, ReadEvent, WriteEvent};

/// Turns inbound bytes into headers and frames.
///
/// Bytes that do not yet form a complete unit are buffered until the next
/// read. A parse failure fails the engine.
#[derive(Debug, Default)]
pub struct FrameParsingHandler {
    parser: FrameParser,
    buffer: BytesMut,
}

impl FrameParsingHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes received but not yet decoded.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

impl EngineHandler for FrameParsingHandler {
    fn engine_starting(&mut self, ctx: &mut EngineHandlerContext<'_>) {
        self.parser = FrameParser::new(FrameConfig {
            max_frame_size: ctx.engine().configuration().max_frame_size,
        });
    }

    fn handle_read_bytes(&mut self, ctx: &mut EngineHandlerContext<'_>, bytes: Bytes) {
        if self.buffer.is_empty() {
            self.buffer = BytesMut::from(&bytes[..]);
        } else {
            self.buffer.extend_from_slice(&bytes);
        }
        loop {
            match self.parser.decode(&mut self.buffer) {
                Ok(Some(IncomingFrame::Header(header))) => ctx.fire_read(ReadEvent::Header(header)),
                Ok(Some(IncomingFrame::Sasl(frame))) => ctx.fire_read(ReadEvent::Sasl(frame.body)),
                Ok(Some(IncomingFrame::Amqp(frame))) => ctx.fire_read(ReadEvent::Frame(frame)),
                Ok(None) => break,
                Err(err) => {
                    self.buffer.clear();
                    ctx.fail(err.into());
                    break;
                }
            }
        }
    }

    fn handle_write_sasl(&mut self, ctx: &mut EngineHandlerContext<'_>, body: SaslPerformative) {
        // the peer restarts with a protocol header once it has our outcome
        if matches!(body, SaslPerformative::Outcome(_)) {
            self.parser.expect_header();
        }
        ctx.fire_write(WriteEvent::Sasl(body));
    }
}
