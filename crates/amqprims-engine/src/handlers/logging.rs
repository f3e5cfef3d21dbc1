use amqprims_codec::SaslPerformative;
use amqprims_frame::{FrameHandle, ProtocolFrame, ProtocolHeader};
use tracing::trace;

use crate::pipeline::{EngineHandler, EngineHandlerContext, ReadEvent, WriteEvent};

/// Payload bytes shown in a frame trace.
const PAYLOAD_PREVIEW: usize = 64;

/// Traces every header and frame crossing the pipeline.
#[derive(Debug, Default)]
pub struct FrameLoggingHandler;

impl FrameLoggingHandler {
    pub fn new() -> Self {
        Self
    }
}

fn preview(payload: Option<&[u8]>) -> String {
    match payload {
        Some(bytes) if bytes.len() > PAYLOAD_PREVIEW => {
            format!("{}..", hex::encode(&bytes[..PAYLOAD_PREVIEW]))
        }
        Some(bytes) => hex::encode(bytes),
        None => String::new(),
    }
}

impl EngineHandler for FrameLoggingHandler {
    fn handle_read_header(&mut self, ctx: &mut EngineHandlerContext<'_>, header: ProtocolHeader) {
        trace!(%header, "<- header");
        ctx.fire_read(ReadEvent::Header(header));
    }

    fn handle_read_sasl(&mut self, ctx: &mut EngineHandlerContext<'_>, body: SaslPerformative) {
        trace!(%body, "<- sasl");
        ctx.fire_read(ReadEvent::Sasl(body));
    }

    fn handle_read_frame(&mut self, ctx: &mut EngineHandlerContext<'_>, frame: ProtocolFrame) {
        match &frame.body {
            Some(body) => trace!(
                channel = frame.channel,
                %body,
                payload = %preview(frame.payload.as_deref()),
                "<- frame"
            ),
            None => trace!("<- heartbeat"),
        }
        ctx.fire_read(ReadEvent::Frame(frame));
    }

    fn handle_write_header(&mut self, ctx: &mut EngineHandlerContext<'_>, header: ProtocolHeader) {
        trace!(%header, "-> header");
        ctx.fire_write(WriteEvent::Header(header));
    }

    fn handle_write_sasl(&mut self, ctx: &mut EngineHandlerContext<'_>, body: SaslPerformative) {
        trace!(%body, "-> sasl");
        ctx.fire_write(WriteEvent::Sasl(body));
    }

    fn handle_write_frame(&mut self, ctx: &mut EngineHandlerContext<'_>, handle: FrameHandle) {
        let frame = ctx.engine().pool().get(&handle);
        if let Some(body) = frame.body() {
            trace!(
                channel = frame.channel().unwrap_or_default(),
                %body,
                payload = %preview(frame.payload().map(|p| &p[..])),
                "-> frame"
            );
        }
        ctx.fire_write(WriteEvent::Frame(handle));
    }

    fn handle_write_heartbeat(&mut self, ctx: &mut EngineHandlerContext<'_>) {
        trace!("-> heartbeat");
        ctx.fire_write(WriteEvent::Heartbeat);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preview_truncates() {
        let bytes = vec![0xab; 100];
        let text = preview(Some(&bytes[..]));
        assert_eq!(text.len(), PAYLOAD_PREVIEW * 2 + 2);
        assert!(text.ends_with(".."));
        assert_eq!(preview(Some(&[1u8, 2][..])), "0102");
        assert_eq!(preview(None), "");
    }
}
