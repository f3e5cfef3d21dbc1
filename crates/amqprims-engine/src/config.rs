use amqprims_frame::{DEFAULT_MAX_FRAME_SIZE, MIN_MAX_FRAME_SIZE};
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Default per-session window, in transfer frames.
pub const DEFAULT_SESSION_WINDOW: u32 = 2048;

/// Engine settings. Applied when the engine starts and when the connection
/// and its sessions are opened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfiguration {
    /// Container id sent in Open.
    pub container_id: String,
    /// Hostname sent in Open and SASL init.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Largest frame accepted from the peer. Never below 512.
    pub max_frame_size: u32,
    /// Highest channel number this side will use.
    pub channel_max: u16,
    /// Local idle timeout in milliseconds; 0 disables it.
    pub idle_timeout_ms: u32,
    /// Highest link handle advertised in Begin.
    pub handle_max: u32,
    /// Incoming window advertised by new sessions.
    pub session_incoming_window: u32,
    /// Outgoing window advertised by new sessions.
    pub session_outgoing_window: u32,
    /// First transfer id used by new sessions.
    pub initial_outgoing_id: u32,
    /// Pre-allocated outgoing frame slots.
    pub frame_pool_capacity: usize,
    pub offered_capabilities: Vec<String>,
    pub desired_capabilities: Vec<String>,
}

impl Default for EngineConfiguration {
    fn default() -> Self {
        Self {
            container_id: String::new(),
            hostname: None,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            channel_max: u16::MAX,
            idle_timeout_ms: 0,
            handle_max: u32::MAX,
            session_incoming_window: DEFAULT_SESSION_WINDOW,
            session_outgoing_window: DEFAULT_SESSION_WINDOW,
            initial_outgoing_id: 0,
            frame_pool_capacity: amqprims_frame::pool::DEFAULT_POOL_CAPACITY,
            offered_capabilities: Vec::new(),
            desired_capabilities: Vec::new(),
        }
    }
}

impl EngineConfiguration {
    /// Parse a configuration from JSON; absent keys keep their defaults.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_frame_size < MIN_MAX_FRAME_SIZE {
            return Err(EngineError::state(format!(
                "max_frame_size {} is below the minimum of {MIN_MAX_FRAME_SIZE}",
                self.max_frame_size
            )));
        }
        if self.session_incoming_window == 0 {
            return Err(EngineError::state("session_incoming_window must be positive"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfiguration::default();
        assert_eq!(config.max_frame_size, 65_536);
        assert_eq!(config.channel_max, u16::MAX);
        assert_eq!(config.idle_timeout_ms, 0);
        assert_eq!(config.session_incoming_window, DEFAULT_SESSION_WINDOW);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_json_partial() {
        let config =
            EngineConfiguration::from_json(r#"{"container_id":"broker","idle_timeout_ms":30000}"#)
                .unwrap();
        assert_eq!(config.container_id, "broker");
        assert_eq!(config.idle_timeout_ms, 30_000);
        assert_eq!(config.max_frame_size, 65_536);
    }

    #[test]
    fn test_small_frame_size_rejected() {
        let err = EngineConfiguration::from_json(r#"{"max_frame_size":256}"#).unwrap_err();
        assert!(matches!(err, EngineError::State(_)));
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = EngineConfiguration {
            container_id: "c".into(),
            hostname: Some("localhost".into()),
            offered_capabilities: vec!["ANONYMOUS-RELAY".into()],
            ..EngineConfiguration::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert_eq!(EngineConfiguration::from_json(&json).unwrap(), config);
    }
}
