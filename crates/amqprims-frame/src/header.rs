use std::fmt;

use crate::error::{FrameError, Result};

/// Size of a protocol header on the wire.
pub const HEADER_SIZE: usize = 8;

const PROTOCOL_NAME: &[u8; 4] = b"AMQP";

/// Protocol id of the plain AMQP header.
pub const AMQP_PROTOCOL_ID: u8 = 0;
/// Protocol id of the SASL security layer header.
pub const SASL_PROTOCOL_ID: u8 = 3;

/// The 8-byte protocol header exchanged before any frame.
///
/// ```text
/// ┌──────────┬─────────────┬───────┬───────┬──────────┐
/// │ "AMQP"   │ protocol id │ major │ minor │ revision │
/// │ (4B)     │ (1B)        │ (1B)  │ (1B)  │ (1B)     │
/// └──────────┴─────────────┴───────┴───────┴──────────┘
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolHeader([u8; HEADER_SIZE]);

impl ProtocolHeader {
    /// `AMQP\x00\x01\x00\x00`
    pub const AMQP: ProtocolHeader = ProtocolHeader(*b"AMQP\x00\x01\x00\x00");
    /// `AMQP\x03\x01\x00\x00`
    pub const SASL: ProtocolHeader = ProtocolHeader(*b"AMQP\x03\x01\x00\x00");

    /// Parse a header. Any `AMQP`-prefixed header is accepted here; whether
    /// the id and version are acceptable is up to the caller.
    pub fn from_bytes(bytes: [u8; HEADER_SIZE]) -> Result<Self> {
        if &bytes[..4] != PROTOCOL_NAME {
            return Err(FrameError::InvalidHeader(bytes));
        }
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; HEADER_SIZE] {
        &self.0
    }

    pub fn protocol_id(&self) -> u8 {
        self.0[4]
    }

    pub fn major(&self) -> u8 {
        self.0[5]
    }

    pub fn minor(&self) -> u8 {
        self.0[6]
    }

    pub fn revision(&self) -> u8 {
        self.0[7]
    }

    pub fn is_sasl(&self) -> bool {
        self.protocol_id() == SASL_PROTOCOL_ID
    }

    /// True for AMQP 1.0.0 with protocol id 0 or 3.
    pub fn is_supported(&self) -> bool {
        *self == Self::AMQP || *self == Self::SASL
    }
}

impl fmt::Debug for ProtocolHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ProtocolHeader(AMQP id={} {}.{}.{})",
            self.protocol_id(),
            self.major(),
            self.minor(),
            self.revision()
        )
    }
}

impl fmt::Display for ProtocolHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = if self.is_sasl() { "SASL" } else { "AMQP" };
        write!(
            f,
            "{kind} {}.{}.{}",
            self.major(),
            self.minor(),
            self.revision()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_headers() {
        assert!(!ProtocolHeader::AMQP.is_sasl());
        assert!(ProtocolHeader::SASL.is_sasl());
        assert_eq!(ProtocolHeader::AMQP.as_bytes(), b"AMQP\x00\x01\x00\x00");
        assert_eq!(ProtocolHeader::SASL.to_string(), "SASL 1.0.0");
    }

    #[test]
    fn test_parse_rejects_foreign_protocol() {
        let result = ProtocolHeader::from_bytes(*b"HTTP/1.1");
        assert!(matches!(result, Err(FrameError::InvalidHeader(_))));
    }

    #[test]
    fn test_unsupported_version_parses_but_is_flagged() {
        let header = ProtocolHeader::from_bytes(*b"AMQP\x00\x00\x09\x01").unwrap();
        assert!(!header.is_supported());
        assert_eq!(header.minor(), 9);
    }
}
