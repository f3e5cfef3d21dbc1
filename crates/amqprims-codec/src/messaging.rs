//! Messaging-layer types: delivery states, terminus types and message sections.

use bytes::{Bytes, BytesMut};

use crate::decoder::{self, read_descriptor};
use crate::described::{
    check_descriptor, descriptor_code, required, too_many_fields, DescribedType, FieldWriter,
};
use crate::encoder;
use crate::error::{CodecError, Result};
use crate::transport::ErrorCondition;
use crate::value::{Descriptor, Fields, Map, Symbol, Timestamp, Value};

/// The received delivery state: how much of a partial delivery has arrived.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Received {
    pub section_number: u32,
    pub section_offset: u64,
}

impl DescribedType for Received {
    const DESCRIPTOR_CODE: u64 = 0x23;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:received:list";
    const NAME: &'static str = "Received";
    const FIELD_COUNT: usize = 2;
    const REQUIRED_FIELDS: usize = 2;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.uint(self.section_number);
        fields.ulong(self.section_offset);
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => {
                self.section_number =
                    required(decoder::read_uint(buf)?, Self::NAME, "section-number")?
            }
            1 => {
                self.section_offset =
                    required(decoder::read_ulong(buf)?, Self::NAME, "section-offset")?
            }
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Accepted;

impl DescribedType for Accepted {
    const DESCRIPTOR_CODE: u64 = 0x24;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:accepted:list";
    const NAME: &'static str = "Accepted";
    const FIELD_COUNT: usize = 0;

    fn write_fields(&self, _fields: &mut FieldWriter) {}

    fn read_field(&mut self, _index: usize, _buf: &mut Bytes) -> Result<()> {
        Err(too_many_fields::<Self>())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Rejected {
    pub error: Option<ErrorCondition>,
}

impl DescribedType for Rejected {
    const DESCRIPTOR_CODE: u64 = 0x25;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:rejected:list";
    const NAME: &'static str = "Rejected";
    const FIELD_COUNT: usize = 1;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.opt_described(self.error.as_ref());
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => self.error = read_optional_described(buf)?,
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Released;

impl DescribedType for Released {
    const DESCRIPTOR_CODE: u64 = 0x26;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:released:list";
    const NAME: &'static str = "Released";
    const FIELD_COUNT: usize = 0;

    fn write_fields(&self, _fields: &mut FieldWriter) {}

    fn read_field(&mut self, _index: usize, _buf: &mut Bytes) -> Result<()> {
        Err(too_many_fields::<Self>())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Modified {
    pub delivery_failed: bool,
    pub undeliverable_here: bool,
    pub message_annotations: Option<Fields>,
}

impl DescribedType for Modified {
    const DESCRIPTOR_CODE: u64 = 0x27;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:modified:list";
    const NAME: &'static str = "Modified";
    const FIELD_COUNT: usize = 3;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.flag(self.delivery_failed);
        fields.flag(self.undeliverable_here);
        fields.opt_fields(self.message_annotations.as_ref());
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => self.delivery_failed = decoder::read_bool(buf)?.unwrap_or(false),
            1 => self.undeliverable_here = decoder::read_bool(buf)?.unwrap_or(false),
            2 => self.message_annotations = decoder::read_fields(buf)?,
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

/// Delivery state carried by Transfer and Disposition.
#[derive(Debug, Clone, PartialEq)]
pub enum DeliveryState {
    Received(Received),
    Accepted,
    Rejected(Rejected),
    Released,
    Modified(Modified),
}

const DELIVERY_STATES: &[(u64, &str)] = &[
    (Received::DESCRIPTOR_CODE, Received::DESCRIPTOR_SYMBOL),
    (Accepted::DESCRIPTOR_CODE, Accepted::DESCRIPTOR_SYMBOL),
    (Rejected::DESCRIPTOR_CODE, Rejected::DESCRIPTOR_SYMBOL),
    (Released::DESCRIPTOR_CODE, Released::DESCRIPTOR_SYMBOL),
    (Modified::DESCRIPTOR_CODE, Modified::DESCRIPTOR_SYMBOL),
];

impl DeliveryState {
    pub fn rejected(error: Option<ErrorCondition>) -> Self {
        DeliveryState::Rejected(Rejected { error })
    }

    /// Whether this is a terminal outcome rather than the non-terminal `Received`.
    pub fn is_outcome(&self) -> bool {
        !matches!(self, DeliveryState::Received(_))
    }

    pub fn name(&self) -> &'static str {
        match self {
            DeliveryState::Received(_) => Received::NAME,
            DeliveryState::Accepted => Accepted::NAME,
            DeliveryState::Rejected(_) => Rejected::NAME,
            DeliveryState::Released => Released::NAME,
            DeliveryState::Modified(_) => Modified::NAME,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            DeliveryState::Received(v) => v.encode(dst),
            DeliveryState::Accepted => Accepted.encode(dst),
            DeliveryState::Rejected(v) => v.encode(dst),
            DeliveryState::Released => Released.encode(dst),
            DeliveryState::Modified(v) => v.encode(dst),
        }
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let descriptor = read_descriptor(buf)?;
        Self::decode_described(&descriptor, buf)
    }

    fn decode_described(descriptor: &Descriptor, buf: &mut Bytes) -> Result<Self> {
        let state = match descriptor_code(descriptor, DELIVERY_STATES) {
            Some(Received::DESCRIPTOR_CODE) => DeliveryState::Received(Received::decode_list(buf)?),
            Some(Accepted::DESCRIPTOR_CODE) => {
                Accepted::decode_list(buf)?;
                DeliveryState::Accepted
            }
            Some(Rejected::DESCRIPTOR_CODE) => DeliveryState::Rejected(Rejected::decode_list(buf)?),
            Some(Released::DESCRIPTOR_CODE) => {
                Released::decode_list(buf)?;
                DeliveryState::Released
            }
            Some(Modified::DESCRIPTOR_CODE) => DeliveryState::Modified(Modified::decode_list(buf)?),
            _ => {
                return Err(CodecError::UnexpectedDescriptor {
                    expected: "delivery-state",
                    found: descriptor.to_string(),
                })
            }
        };
        Ok(state)
    }

    /// Read an optional delivery-state field.
    pub fn read_optional(buf: &mut Bytes) -> Result<Option<Self>> {
        if decoder::take_null(buf)? {
            return Ok(None);
        }
        Self::decode(buf).map(Some)
    }
}

/// Read an optional composite field of type `T`.
pub(crate) fn read_optional_described<T: DescribedType>(buf: &mut Bytes) -> Result<Option<T>> {
    if decoder::take_null(buf)? {
        return Ok(None);
    }
    let descriptor = read_descriptor(buf)?;
    check_descriptor::<T>(&descriptor)?;
    T::decode_list(buf).map(Some)
}

/// Terminus durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TerminusDurability {
    #[default]
    None,
    Configuration,
    UnsettledState,
}

impl TerminusDurability {
    fn from_wire(value: u32) -> Result<Self> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Configuration),
            2 => Ok(Self::UnsettledState),
            other => Err(CodecError::InvalidValue(format!(
                "terminus durability {other}"
            ))),
        }
    }

    fn to_wire(self) -> u32 {
        match self {
            Self::None => 0,
            Self::Configuration => 1,
            Self::UnsettledState => 2,
        }
    }
}

/// Source terminus of a link.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Source {
    pub address: Option<String>,
    pub durable: TerminusDurability,
    pub expiry_policy: Option<Symbol>,
    pub timeout: u32,
    pub dynamic: bool,
    pub dynamic_node_properties: Option<Fields>,
    pub distribution_mode: Option<Symbol>,
    pub filter: Option<Fields>,
    pub default_outcome: Option<DeliveryState>,
    pub outcomes: Option<Vec<Symbol>>,
    pub capabilities: Option<Vec<Symbol>>,
}

impl Source {
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }
}

impl DescribedType for Source {
    const DESCRIPTOR_CODE: u64 = 0x28;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:source:list";
    const NAME: &'static str = "Source";
    const FIELD_COUNT: usize = 11;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.opt_string(self.address.as_deref());
        if self.durable == TerminusDurability::None {
            fields.null();
        } else {
            fields.uint(self.durable.to_wire());
        }
        fields.opt_symbol(self.expiry_policy.as_ref());
        fields.opt_uint((self.timeout != 0).then_some(self.timeout));
        fields.flag(self.dynamic);
        fields.opt_fields(self.dynamic_node_properties.as_ref());
        fields.opt_symbol(self.distribution_mode.as_ref());
        fields.opt_fields(self.filter.as_ref());
        fields.optional(self.default_outcome.as_ref(), DeliveryState::encode);
        fields.symbols(self.outcomes.as_deref());
        fields.symbols(self.capabilities.as_deref());
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => self.address = decoder::read_string(buf)?,
            1 => {
                self.durable = TerminusDurability::from_wire(decoder::read_uint(buf)?.unwrap_or(0))?
            }
            2 => self.expiry_policy = decoder::read_symbol(buf)?,
            3 => self.timeout = decoder::read_uint(buf)?.unwrap_or(0),
            4 => self.dynamic = decoder::read_bool(buf)?.unwrap_or(false),
            5 => self.dynamic_node_properties = decoder::read_fields(buf)?,
            6 => self.distribution_mode = decoder::read_symbol(buf)?,
            7 => self.filter = decoder::read_fields(buf)?,
            8 => self.default_outcome = DeliveryState::read_optional(buf)?,
            9 => self.outcomes = decoder::read_symbols(buf)?,
            10 => self.capabilities = decoder::read_symbols(buf)?,
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

/// Target terminus of a link.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Target {
    pub address: Option<String>,
    pub durable: TerminusDurability,
    pub expiry_policy: Option<Symbol>,
    pub timeout: u32,
    pub dynamic: bool,
    pub dynamic_node_properties: Option<Fields>,
    pub capabilities: Option<Vec<Symbol>>,
}

impl Target {
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Self::default()
        }
    }
}

impl DescribedType for Target {
    const DESCRIPTOR_CODE: u64 = 0x29;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:target:list";
    const NAME: &'static str = "Target";
    const FIELD_COUNT: usize = 7;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.opt_string(self.address.as_deref());
        if self.durable == TerminusDurability::None {
            fields.null();
        } else {
            fields.uint(self.durable.to_wire());
        }
        fields.opt_symbol(self.expiry_policy.as_ref());
        fields.opt_uint((self.timeout != 0).then_some(self.timeout));
        fields.flag(self.dynamic);
        fields.opt_fields(self.dynamic_node_properties.as_ref());
        fields.symbols(self.capabilities.as_deref());
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => self.address = decoder::read_string(buf)?,
            1 => {
                self.durable = TerminusDurability::from_wire(decoder::read_uint(buf)?.unwrap_or(0))?
            }
            2 => self.expiry_policy = decoder::read_symbol(buf)?,
            3 => self.timeout = decoder::read_uint(buf)?.unwrap_or(0),
            4 => self.dynamic = decoder::read_bool(buf)?.unwrap_or(false),
            5 => self.dynamic_node_properties = decoder::read_fields(buf)?,
            6 => self.capabilities = decoder::read_symbols(buf)?,
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

/// The header message section.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Header {
    pub durable: bool,
    pub priority: Option<u8>,
    pub ttl: Option<u32>,
    pub first_acquirer: bool,
    pub delivery_count: u32,
}

impl DescribedType for Header {
    const DESCRIPTOR_CODE: u64 = 0x70;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:header:list";
    const NAME: &'static str = "Header";
    const FIELD_COUNT: usize = 5;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.flag(self.durable);
        fields.opt_ubyte(self.priority);
        fields.opt_uint(self.ttl);
        fields.flag(self.first_acquirer);
        fields.opt_uint((self.delivery_count != 0).then_some(self.delivery_count));
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => self.durable = decoder::read_bool(buf)?.unwrap_or(false),
            1 => self.priority = decoder::read_ubyte(buf)?,
            2 => self.ttl = decoder::read_uint(buf)?,
            3 => self.first_acquirer = decoder::read_bool(buf)?.unwrap_or(false),
            4 => self.delivery_count = decoder::read_uint(buf)?.unwrap_or(0),
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

/// The properties message section.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Properties {
    pub message_id: Option<Value>,
    pub user_id: Option<Bytes>,
    pub to: Option<String>,
    pub subject: Option<String>,
    pub reply_to: Option<String>,
    pub correlation_id: Option<Value>,
    pub content_type: Option<Symbol>,
    pub content_encoding: Option<Symbol>,
    pub absolute_expiry_time: Option<Timestamp>,
    pub creation_time: Option<Timestamp>,
    pub group_id: Option<String>,
    pub group_sequence: Option<u32>,
    pub reply_to_group_id: Option<String>,
}

impl DescribedType for Properties {
    const DESCRIPTOR_CODE: u64 = 0x73;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:properties:list";
    const NAME: &'static str = "Properties";
    const FIELD_COUNT: usize = 13;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.opt_value(self.message_id.as_ref());
        fields.opt_binary(self.user_id.as_deref());
        fields.opt_string(self.to.as_deref());
        fields.opt_string(self.subject.as_deref());
        fields.opt_string(self.reply_to.as_deref());
        fields.opt_value(self.correlation_id.as_ref());
        fields.opt_symbol(self.content_type.as_ref());
        fields.opt_symbol(self.content_encoding.as_ref());
        fields.opt_timestamp(self.absolute_expiry_time);
        fields.opt_timestamp(self.creation_time);
        fields.opt_string(self.group_id.as_deref());
        fields.opt_uint(self.group_sequence);
        fields.opt_string(self.reply_to_group_id.as_deref());
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => self.message_id = decoder::read_optional_value(buf)?,
            1 => self.user_id = decoder::read_binary(buf)?,
            2 => self.to = decoder::read_string(buf)?,
            3 => self.subject = decoder::read_string(buf)?,
            4 => self.reply_to = decoder::read_string(buf)?,
            5 => self.correlation_id = decoder::read_optional_value(buf)?,
            6 => self.content_type = decoder::read_symbol(buf)?,
            7 => self.content_encoding = decoder::read_symbol(buf)?,
            8 => self.absolute_expiry_time = decoder::read_timestamp(buf)?,
            9 => self.creation_time = decoder::read_timestamp(buf)?,
            10 => self.group_id = decoder::read_string(buf)?,
            11 => self.group_sequence = decoder::read_uint(buf)?,
            12 => self.reply_to_group_id = decoder::read_string(buf)?,
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

const DELIVERY_ANNOTATIONS: u64 = 0x71;
const MESSAGE_ANNOTATIONS: u64 = 0x72;
const APPLICATION_PROPERTIES: u64 = 0x74;
const DATA: u64 = 0x75;
const AMQP_SEQUENCE: u64 = 0x76;
const AMQP_VALUE: u64 = 0x77;
const FOOTER: u64 = 0x78;

const SECTIONS: &[(u64, &str)] = &[
    (Header::DESCRIPTOR_CODE, Header::DESCRIPTOR_SYMBOL),
    (DELIVERY_ANNOTATIONS, "amqp:delivery-annotations:map"),
    (MESSAGE_ANNOTATIONS, "amqp:message-annotations:map"),
    (Properties::DESCRIPTOR_CODE, Properties::DESCRIPTOR_SYMBOL),
    (APPLICATION_PROPERTIES, "amqp:application-properties:map"),
    (DATA, "amqp:data:binary"),
    (AMQP_SEQUENCE, "amqp:amqp-sequence:list"),
    (AMQP_VALUE, "amqp:value:*"),
    (FOOTER, "amqp:footer:map"),
];

/// One section of a bare or annotated message.
#[derive(Debug, Clone, PartialEq)]
pub enum Section {
    Header(Header),
    DeliveryAnnotations(Map),
    MessageAnnotations(Map),
    Properties(Properties),
    ApplicationProperties(Vec<(String, Value)>),
    Data(Bytes),
    AmqpSequence(Vec<Value>),
    AmqpValue(Value),
    Footer(Map),
}

impl Section {
    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Section::Header(header) => header.encode(dst),
            Section::Properties(properties) => properties.encode(dst),
            Section::DeliveryAnnotations(map) => described_map(DELIVERY_ANNOTATIONS, map, dst),
            Section::MessageAnnotations(map) => described_map(MESSAGE_ANNOTATIONS, map, dst),
            Section::Footer(map) => described_map(FOOTER, map, dst),
            Section::ApplicationProperties(entries) => {
                encoder::write_descriptor(&Descriptor::Code(APPLICATION_PROPERTIES), dst);
                let mut body = BytesMut::new();
                for (key, value) in entries {
                    encoder::write_string(key, &mut body);
                    encoder::encode_value(value, &mut body);
                }
                encoder::write_map_raw(entries.len() * 2, &body, dst);
            }
            Section::Data(bytes) => {
                encoder::write_descriptor(&Descriptor::Code(DATA), dst);
                encoder::write_binary(bytes, dst);
            }
            Section::AmqpSequence(values) => {
                encoder::write_descriptor(&Descriptor::Code(AMQP_SEQUENCE), dst);
                encoder::write_list(values, dst);
            }
            Section::AmqpValue(value) => {
                encoder::write_descriptor(&Descriptor::Code(AMQP_VALUE), dst);
                encoder::encode_value(value, dst);
            }
        }
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let descriptor = read_descriptor(buf)?;
        let section = match descriptor_code(&descriptor, SECTIONS) {
            Some(Header::DESCRIPTOR_CODE) => Section::Header(Header::decode_list(buf)?),
            Some(Properties::DESCRIPTOR_CODE) => Section::Properties(Properties::decode_list(buf)?),
            Some(DELIVERY_ANNOTATIONS) => Section::DeliveryAnnotations(required_map(buf)?),
            Some(MESSAGE_ANNOTATIONS) => Section::MessageAnnotations(required_map(buf)?),
            Some(FOOTER) => Section::Footer(required_map(buf)?),
            Some(APPLICATION_PROPERTIES) => {
                let mut entries = Vec::new();
                for (key, value) in required_map(buf)? {
                    match key {
                        Value::String(key) => entries.push((key, value)),
                        other => {
                            return Err(CodecError::InvalidValue(format!(
                                "application property key {other:?}"
                            )))
                        }
                    }
                }
                Section::ApplicationProperties(entries)
            }
            Some(DATA) => Section::Data(required(decoder::read_binary(buf)?, "Data", "value")?),
            Some(AMQP_SEQUENCE) => match decoder::decode_value(buf)? {
                Value::List(values) => Section::AmqpSequence(values),
                other => {
                    return Err(CodecError::InvalidValue(format!(
                        "amqp-sequence body {other:?}"
                    )))
                }
            },
            Some(AMQP_VALUE) => Section::AmqpValue(decoder::decode_value(buf)?),
            _ => {
                return Err(CodecError::UnexpectedDescriptor {
                    expected: "message section",
                    found: descriptor.to_string(),
                })
            }
        };
        Ok(section)
    }
}

fn described_map(code: u64, map: &Map, dst: &mut BytesMut) {
    encoder::write_descriptor(&Descriptor::Code(code), dst);
    encoder::write_map(map, dst);
}

fn required_map(buf: &mut Bytes) -> Result<Map> {
    Ok(decoder::read_map(buf)?.unwrap_or_default())
}

/// Encode a message as a sequence of sections.
pub fn encode_sections(sections: &[Section], dst: &mut BytesMut) {
    for section in sections {
        section.encode(dst);
    }
}

/// Decode every section in `buf`.
pub fn decode_sections(mut buf: Bytes) -> Result<Vec<Section>> {
    let mut sections = Vec::new();
    while !buf.is_empty() {
        sections.push(Section::decode(&mut buf)?);
    }
    Ok(sections)
}
