use amqprims_codec::{Performative, SaslPerformative};
use bytes::Bytes;

use crate::header::ProtocolHeader;

/// Fixed frame header: size (4) + doff (1) + type (1) + channel (2).
pub const FRAME_HEADER_SIZE: usize = 8;

/// Data offset of frames without an extended header, in 4-byte words.
pub const DEFAULT_DOFF: u8 = 2;

pub const AMQP_FRAME_TYPE: u8 = 0;
pub const SASL_FRAME_TYPE: u8 = 1;

/// Smallest max-frame-size a peer may advertise.
pub const MIN_MAX_FRAME_SIZE: u32 = 512;

/// Default max-frame-size used before one is configured.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 65_536;

/// A decoded AMQP frame: one performative plus optional payload.
///
/// A frame with no body is a heartbeat.
#[derive(Debug, Clone, PartialEq)]
pub struct ProtocolFrame {
    pub channel: u16,
    pub body: Option<Performative>,
    pub payload: Option<Bytes>,
}

impl ProtocolFrame {
    pub fn new(channel: u16, body: Performative, payload: Option<Bytes>) -> Self {
        Self {
            channel,
            body: Some(body),
            payload,
        }
    }

    pub fn heartbeat() -> Self {
        Self {
            channel: 0,
            body: None,
            payload: None,
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.body.is_none()
    }
}

/// A decoded SASL frame.
#[derive(Debug, Clone, PartialEq)]
pub struct SaslFrame {
    pub body: SaslPerformative,
}

/// Everything the parser can produce.
#[derive(Debug, Clone, PartialEq)]
pub enum IncomingFrame {
    Header(ProtocolHeader),
    Sasl(SaslFrame),
    Amqp(ProtocolFrame),
}

impl IncomingFrame {
    pub fn kind(&self) -> &'static str {
        match self {
            IncomingFrame::Header(_) => "header",
            IncomingFrame::Sasl(_) => "sasl",
            IncomingFrame::Amqp(frame) if frame.is_heartbeat() => "heartbeat",
            IncomingFrame::Amqp(_) => "amqp",
        }
    }
}
