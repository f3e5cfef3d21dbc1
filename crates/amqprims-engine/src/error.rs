use amqprims_codec::ErrorCondition;

/// Errors that can occur in engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The call is not valid in the current engine or endpoint state.
    #[error("illegal state: {0}")]
    State(String),

    /// The engine was shut down.
    #[error("engine is shut down")]
    Closed,

    /// The engine failed earlier and accepts no further input or output.
    #[error("engine is not writable: {0}")]
    NotWritable(String),

    /// Frame-level error.
    #[error("frame error: {0}")]
    Frame(#[from] amqprims_frame::FrameError),

    /// The peer violated the protocol.
    #[error("protocol violation ({condition}): {description}")]
    Protocol {
        condition: String,
        description: String,
    },

    /// Nothing was received within the local idle timeout.
    #[error("idle timeout of {0} ms expired")]
    IdleTimeout(u32),

    /// SASL negotiation failed.
    #[error("sasl failed: {0}")]
    Sasl(String),

    /// Configuration could not be parsed.
    #[error("configuration error: {0}")]
    Config(#[from] serde_json::Error),

    /// No session is mapped to the local channel.
    #[error("no session on channel {0}")]
    UnknownSession(u16),

    /// The link handle does not name a live link.
    #[error("no link with handle {handle} on channel {channel}")]
    UnknownLink { channel: u16, handle: u32 },

    /// The delivery was settled, aborted or never existed.
    #[error("unknown delivery")]
    UnknownDelivery,
}

impl EngineError {
    pub(crate) fn state(message: impl Into<String>) -> Self {
        EngineError::State(message.into())
    }

    pub(crate) fn protocol(condition: &str, description: impl Into<String>) -> Self {
        EngineError::Protocol {
            condition: condition.to_string(),
            description: description.into(),
        }
    }

    /// Error condition to report to the peer for this failure, if any.
    pub fn condition(&self) -> Option<ErrorCondition> {
        use amqprims_codec::conditions;
        match self {
            EngineError::Protocol {
                condition,
                description,
            } => Some(ErrorCondition::new(
                condition.as_str(),
                Some(description.clone()),
            )),
            EngineError::Frame(err) => Some(ErrorCondition::new(
                conditions::FRAMING_ERROR,
                Some(err.to_string()),
            )),
            EngineError::IdleTimeout(_) => Some(ErrorCondition::new(
                conditions::RESOURCE_LIMIT_EXCEEDED,
                Some("local idle timeout expired".to_string()),
            )),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
