use amqprims_codec::CodecError;

/// Errors that can occur during frame parsing and writing.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The frame body could not be decoded.
    #[error("frame body decode failed: {0}")]
    Codec(#[from] CodecError),

    /// The protocol header is not an AMQP header.
    #[error("invalid protocol header {0:02x?}")]
    InvalidHeader([u8; 8]),

    /// The declared frame size exceeds the negotiated maximum.
    #[error("frame too large ({size} bytes, max {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// The data offset is below the minimum or beyond the frame end.
    #[error("invalid data offset {doff} for frame of {size} bytes")]
    InvalidDataOffset { doff: u8, size: usize },

    /// The frame type byte is neither AMQP nor SASL.
    #[error("unknown frame type {0}")]
    UnknownFrameType(u8),

    /// The frame is structurally invalid.
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// A payload does not fit the frame size limit and no handler accepted a split.
    #[error(
        "Cannot transmit performative {performative} with payload larger than max frame size limit ({size} bytes, max {max})"
    )]
    PayloadTooLarge {
        performative: &'static str,
        size: usize,
        max: usize,
    },

    /// An I/O error surfaced through the stream codec.
    #[error("frame I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FrameError>;
