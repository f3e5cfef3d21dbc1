/// Errors that can occur while encoding or decoding AMQP types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodecError {
    /// The buffer ended before the value was complete.
    #[error("truncated input (needed {needed} bytes, {remaining} remaining)")]
    Truncated { needed: usize, remaining: usize },

    /// The constructor byte is not a known AMQP encoding code.
    #[error("unknown encoding code 0x{0:02x}")]
    UnknownEncoding(u8),

    /// The constructor byte is valid but not acceptable at this position.
    #[error("expected {expected} but found encoding code 0x{found:02x}")]
    UnexpectedEncoding { expected: &'static str, found: u8 },

    /// A composite type carried more list entries than its schema defines.
    #[error("too many entries in {type_name} encoding (max {max})")]
    TooManyFields { type_name: &'static str, max: usize },

    /// A described type carried an unexpected descriptor.
    #[error("unexpected descriptor {found} (expected {expected})")]
    UnexpectedDescriptor { expected: &'static str, found: String },

    /// A string or symbol was not valid UTF-8 / ASCII.
    #[error("invalid UTF-8 in string value")]
    InvalidUtf8,

    /// A char value was not a Unicode scalar value.
    #[error("invalid char code point 0x{0:08x}")]
    InvalidChar(u32),

    /// Described or compound values were nested past the decoder's limit.
    #[error("values nested deeper than {max} levels")]
    NestingTooDeep { max: usize },

    /// A value was structurally valid but semantically out of range.
    #[error("invalid value: {0}")]
    InvalidValue(String),
}

pub type Result<T> = std::result::Result<T, CodecError>;
