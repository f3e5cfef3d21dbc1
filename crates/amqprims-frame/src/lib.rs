//! AMQP 1.0 framing.
//!
//! Every connection starts with an 8-byte protocol header, then carries
//! frames of the form:
//! - A 4-byte big-endian total size
//! - A 1-byte data offset (in 4-byte words) and a 1-byte frame type
//! - A 2-byte channel, the performative, and an optional payload
//!
//! Parsing is resumable across partial reads and writing enforces the
//! peer's max-frame-size. Outgoing frames live in a reusable pool.

pub mod error;
pub mod frame;
pub mod header;
pub mod parser;
pub mod pool;
pub mod writer;

#[cfg(feature = "async")]
pub mod codec;

pub use error::{FrameError, Result};
pub use frame::{
    IncomingFrame, ProtocolFrame, SaslFrame, AMQP_FRAME_TYPE, DEFAULT_MAX_FRAME_SIZE,
    FRAME_HEADER_SIZE, MIN_MAX_FRAME_SIZE, SASL_FRAME_TYPE,
};
pub use header::ProtocolHeader;
pub use parser::{FrameConfig, FrameParser};
pub use pool::{FrameHandle, FramePool, OutgoingFrame, PayloadTooLargeHandler};
pub use writer::FrameWriter;

#[cfg(feature = "async")]
pub use codec::{AmqpCodec, OutgoingItem};
