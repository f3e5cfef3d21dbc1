//! SASL negotiation performatives.

use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::decoder::{self, read_descriptor};
use crate::described::{descriptor_code, required, too_many_fields, DescribedType, FieldWriter};
use crate::error::{CodecError, Result};
use crate::value::Symbol;

/// Outcome code of a SASL exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SaslCode {
    #[default]
    Ok,
    Auth,
    Sys,
    SysPerm,
    SysTemp,
}

impl SaslCode {
    pub fn to_wire(self) -> u8 {
        match self {
            SaslCode::Ok => 0,
            SaslCode::Auth => 1,
            SaslCode::Sys => 2,
            SaslCode::SysPerm => 3,
            SaslCode::SysTemp => 4,
        }
    }

    pub fn from_wire(value: u8) -> Result<Self> {
        match value {
            0 => Ok(SaslCode::Ok),
            1 => Ok(SaslCode::Auth),
            2 => Ok(SaslCode::Sys),
            3 => Ok(SaslCode::SysPerm),
            4 => Ok(SaslCode::SysTemp),
            other => Err(CodecError::InvalidValue(format!("sasl code {other}"))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SaslMechanisms {
    pub mechanisms: Vec<Symbol>,
}

impl DescribedType for SaslMechanisms {
    const DESCRIPTOR_CODE: u64 = 0x40;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:sasl-mechanisms:list";
    const NAME: &'static str = "SaslMechanisms";
    const FIELD_COUNT: usize = 1;
    const REQUIRED_FIELDS: usize = 1;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.symbols(Some(self.mechanisms.as_slice()));
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => {
                self.mechanisms =
                    required(decoder::read_symbols(buf)?, Self::NAME, "sasl-server-mechanisms")?
            }
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SaslInit {
    pub mechanism: Symbol,
    pub initial_response: Option<Bytes>,
    pub hostname: Option<String>,
}

impl DescribedType for SaslInit {
    const DESCRIPTOR_CODE: u64 = 0x41;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:sasl-init:list";
    const NAME: &'static str = "SaslInit";
    const FIELD_COUNT: usize = 3;
    const REQUIRED_FIELDS: usize = 1;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.symbol(&self.mechanism);
        fields.opt_binary(self.initial_response.as_deref());
        fields.opt_string(self.hostname.as_deref());
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => self.mechanism = required(decoder::read_symbol(buf)?, Self::NAME, "mechanism")?,
            1 => self.initial_response = decoder::read_binary(buf)?,
            2 => self.hostname = decoder::read_string(buf)?,
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SaslChallenge {
    pub challenge: Bytes,
}

impl DescribedType for SaslChallenge {
    const DESCRIPTOR_CODE: u64 = 0x42;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:sasl-challenge:list";
    const NAME: &'static str = "SaslChallenge";
    const FIELD_COUNT: usize = 1;
    const REQUIRED_FIELDS: usize = 1;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.binary(&self.challenge);
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => self.challenge = required(decoder::read_binary(buf)?, Self::NAME, "challenge")?,
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SaslResponse {
    pub response: Bytes,
}

impl DescribedType for SaslResponse {
    const DESCRIPTOR_CODE: u64 = 0x43;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:sasl-response:list";
    const NAME: &'static str = "SaslResponse";
    const FIELD_COUNT: usize = 1;
    const REQUIRED_FIELDS: usize = 1;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.binary(&self.response);
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => self.response = required(decoder::read_binary(buf)?, Self::NAME, "response")?,
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SaslOutcome {
    pub code: SaslCode,
    pub additional_data: Option<Bytes>,
}

impl DescribedType for SaslOutcome {
    const DESCRIPTOR_CODE: u64 = 0x44;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:sasl-outcome:list";
    const NAME: &'static str = "SaslOutcome";
    const FIELD_COUNT: usize = 2;
    const REQUIRED_FIELDS: usize = 1;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.ubyte(self.code.to_wire());
        fields.opt_binary(self.additional_data.as_deref());
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => {
                self.code =
                    SaslCode::from_wire(required(decoder::read_ubyte(buf)?, Self::NAME, "code")?)?
            }
            1 => self.additional_data = decoder::read_binary(buf)?,
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

/// Any SASL performative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaslPerformative {
    Mechanisms(SaslMechanisms),
    Init(SaslInit),
    Challenge(SaslChallenge),
    Response(SaslResponse),
    Outcome(SaslOutcome),
}

const SASL_PERFORMATIVES: &[(u64, &str)] = &[
    (SaslMechanisms::DESCRIPTOR_CODE, SaslMechanisms::DESCRIPTOR_SYMBOL),
    (SaslInit::DESCRIPTOR_CODE, SaslInit::DESCRIPTOR_SYMBOL),
    (SaslChallenge::DESCRIPTOR_CODE, SaslChallenge::DESCRIPTOR_SYMBOL),
    (SaslResponse::DESCRIPTOR_CODE, SaslResponse::DESCRIPTOR_SYMBOL),
    (SaslOutcome::DESCRIPTOR_CODE, SaslOutcome::DESCRIPTOR_SYMBOL),
];

impl SaslPerformative {
    pub fn name(&self) -> &'static str {
        match self {
            SaslPerformative::Mechanisms(_) => SaslMechanisms::NAME,
            SaslPerformative::Init(_) => SaslInit::NAME,
            SaslPerformative::Challenge(_) => SaslChallenge::NAME,
            SaslPerformative::Response(_) => SaslResponse::NAME,
            SaslPerformative::Outcome(_) => SaslOutcome::NAME,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            SaslPerformative::Mechanisms(v) => v.encode(dst),
            SaslPerformative::Init(v) => v.encode(dst),
            SaslPerformative::Challenge(v) => v.encode(dst),
            SaslPerformative::Response(v) => v.encode(dst),
            SaslPerformative::Outcome(v) => v.encode(dst),
        }
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let descriptor = read_descriptor(buf)?;
        let performative = match descriptor_code(&descriptor, SASL_PERFORMATIVES) {
            Some(SaslMechanisms::DESCRIPTOR_CODE) => {
                SaslPerformative::Mechanisms(SaslMechanisms::decode_list(buf)?)
            }
            Some(SaslInit::DESCRIPTOR_CODE) => SaslPerformative::Init(SaslInit::decode_list(buf)?),
            Some(SaslChallenge::DESCRIPTOR_CODE) => {
                SaslPerformative::Challenge(SaslChallenge::decode_list(buf)?)
            }
            Some(SaslResponse::DESCRIPTOR_CODE) => {
                SaslPerformative::Response(SaslResponse::decode_list(buf)?)
            }
            Some(SaslOutcome::DESCRIPTOR_CODE) => {
                SaslPerformative::Outcome(SaslOutcome::decode_list(buf)?)
            }
            _ => {
                return Err(CodecError::UnexpectedDescriptor {
                    expected: "sasl performative",
                    found: descriptor.to_string(),
                })
            }
        };
        Ok(performative)
    }
}

impl fmt::Display for SaslPerformative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(performative: SaslPerformative) {
        let mut buf = BytesMut::new();
        performative.encode(&mut buf);
        assert_eq!(SaslPerformative::decode(&mut buf.freeze()).unwrap(), performative);
    }

    #[test]
    fn test_sasl_performatives_roundtrip() {
        roundtrip(SaslPerformative::Mechanisms(SaslMechanisms {
            mechanisms: vec!["PLAIN".into(), "ANONYMOUS".into()],
        }));
        roundtrip(SaslPerformative::Init(SaslInit {
            mechanism: "PLAIN".into(),
            initial_response: Some(Bytes::from_static(b"\0user\0pass")),
            hostname: Some("localhost".into()),
        }));
        roundtrip(SaslPerformative::Challenge(SaslChallenge {
            challenge: Bytes::from_static(b"nonce"),
        }));
        roundtrip(SaslPerformative::Response(SaslResponse {
            response: Bytes::new(),
        }));
        roundtrip(SaslPerformative::Outcome(SaslOutcome {
            code: SaslCode::Auth,
            additional_data: None,
        }));
    }

    #[test]
    fn test_invalid_outcome_code() {
        assert!(SaslCode::from_wire(9).is_err());
        assert_eq!(SaslCode::from_wire(0).unwrap(), SaslCode::Ok);
    }
}
