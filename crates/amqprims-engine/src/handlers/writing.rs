use amqprims_codec::SaslPerformative;
use amqprims_frame::{FrameHandle, FrameWriter, ProtocolHeader};
use bytes::BytesMut;

use crate::pipeline::{EngineHandler, EngineHandlerContext, WriteEvent};

/// Serializes outbound headers and frames to bytes.
///
/// Pooled frames are written against the peer's max-frame-size and released
/// afterwards. A frame whose payload-too-large handler lets the payload be
/// split is written repeatedly until its payload is gone.
#[derive(Debug, Default)]
pub struct FrameWritingHandler {
    writer: FrameWriter,
}

impl FrameWritingHandler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl EngineHandler for FrameWritingHandler {
    fn handle_write_header(&mut self, ctx: &mut EngineHandlerContext<'_>, header: ProtocolHeader) {
        let mut buf = BytesMut::with_capacity(8);
        self.writer.write_header(&header, &mut buf);
        ctx.fire_write(WriteEvent::Bytes(buf.freeze()));
    }

    fn handle_write_sasl(&mut self, ctx: &mut EngineHandlerContext<'_>, body: SaslPerformative) {
        let mut buf = BytesMut::new();
        match self.writer.write_sasl(&body, &mut buf) {
            Ok(()) => ctx.fire_write(WriteEvent::Bytes(buf.freeze())),
            Err(err) => ctx.fail(err.into()),
        }
    }

    fn handle_write_frame(&mut self, ctx: &mut EngineHandlerContext<'_>, handle: FrameHandle) {
        self.writer
            .set_max_frame_size(ctx.engine().remote_max_frame_size());
        let mut buf = BytesMut::new();
        let result = loop {
            let frame = ctx.engine_mut().pool_mut().get_mut(&handle);
            if let Err(err) = self.writer.write_frame(frame, &mut buf) {
                break Err(err);
            }
            if !frame.has_payload() {
                break Ok(());
            }
        };
        ctx.engine_mut().pool_mut().release(handle);
        match result {
            Ok(()) => ctx.fire_write(WriteEvent::Bytes(buf.freeze())),
            Err(err) => ctx.fail(err.into()),
        }
    }

    fn handle_write_heartbeat(&mut self, ctx: &mut EngineHandlerContext<'_>) {
        let mut buf = BytesMut::with_capacity(8);
        self.writer.write_heartbeat(&mut buf);
        ctx.fire_write(WriteEvent::Bytes(buf.freeze()));
    }
}
