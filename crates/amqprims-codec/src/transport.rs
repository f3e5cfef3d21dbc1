//! Transport performatives and the types they carry.

use std::fmt;

use bytes::{Bytes, BytesMut};

use crate::decoder::{self, read_descriptor};
use crate::described::{descriptor_code, required, too_many_fields, DescribedType, FieldWriter};
use crate::error::{CodecError, Result};
use crate::messaging::{read_optional_described, DeliveryState, Source, Target};
use crate::value::{Fields, Map, Symbol};

/// Standard error condition symbols.
pub mod conditions {
    pub const INTERNAL_ERROR: &str = "amqp:internal-error";
    pub const NOT_FOUND: &str = "amqp:not-found";
    pub const UNAUTHORIZED_ACCESS: &str = "amqp:unauthorized-access";
    pub const DECODE_ERROR: &str = "amqp:decode-error";
    pub const RESOURCE_LIMIT_EXCEEDED: &str = "amqp:resource-limit-exceeded";
    pub const NOT_ALLOWED: &str = "amqp:not-allowed";
    pub const INVALID_FIELD: &str = "amqp:invalid-field";
    pub const NOT_IMPLEMENTED: &str = "amqp:not-implemented";
    pub const RESOURCE_LOCKED: &str = "amqp:resource-locked";
    pub const PRECONDITION_FAILED: &str = "amqp:precondition-failed";
    pub const RESOURCE_DELETED: &str = "amqp:resource-deleted";
    pub const ILLEGAL_STATE: &str = "amqp:illegal-state";
    pub const FRAME_SIZE_TOO_SMALL: &str = "amqp:frame-size-too-small";

    pub const CONNECTION_FORCED: &str = "amqp:connection:forced";
    pub const FRAMING_ERROR: &str = "amqp:connection:framing-error";
    pub const CONNECTION_REDIRECT: &str = "amqp:connection:redirect";

    pub const WINDOW_VIOLATION: &str = "amqp:session:window-violation";
    pub const ERRANT_LINK: &str = "amqp:session:errant-link";
    pub const HANDLE_IN_USE: &str = "amqp:session:handle-in-use";
    pub const UNATTACHED_HANDLE: &str = "amqp:session:unattached-handle";

    pub const DETACH_FORCED: &str = "amqp:link:detach-forced";
    pub const TRANSFER_LIMIT_EXCEEDED: &str = "amqp:link:transfer-limit-exceeded";
    pub const MESSAGE_SIZE_EXCEEDED: &str = "amqp:link:message-size-exceeded";
    pub const LINK_REDIRECT: &str = "amqp:link:redirect";
    pub const STOLEN: &str = "amqp:link:stolen";
}

/// Error information carried by Close, End, Detach and Rejected.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ErrorCondition {
    pub condition: Symbol,
    pub description: Option<String>,
    pub info: Option<Fields>,
}

impl ErrorCondition {
    pub fn new(condition: impl Into<Symbol>, description: Option<String>) -> Self {
        Self {
            condition: condition.into(),
            description,
            info: None,
        }
    }
}

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.description {
            Some(description) => write!(f, "{}: {description}", self.condition),
            None => write!(f, "{}", self.condition),
        }
    }
}

impl DescribedType for ErrorCondition {
    const DESCRIPTOR_CODE: u64 = 0x1d;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:error:list";
    const NAME: &'static str = "Error";
    const FIELD_COUNT: usize = 3;
    const REQUIRED_FIELDS: usize = 1;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.symbol(&self.condition);
        fields.opt_string(self.description.as_deref());
        fields.opt_fields(self.info.as_ref());
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => self.condition = required(decoder::read_symbol(buf)?, Self::NAME, "condition")?,
            1 => self.description = decoder::read_string(buf)?,
            2 => self.info = decoder::read_fields(buf)?,
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

/// Link endpoint role. Encoded as a boolean: false = sender, true = receiver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Role {
    #[default]
    Sender,
    Receiver,
}

impl Role {
    pub fn as_bool(self) -> bool {
        matches!(self, Role::Receiver)
    }

    pub fn from_bool(value: bool) -> Self {
        if value {
            Role::Receiver
        } else {
            Role::Sender
        }
    }

    pub fn opposite(self) -> Self {
        match self {
            Role::Sender => Role::Receiver,
            Role::Receiver => Role::Sender,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SenderSettleMode {
    Unsettled,
    Settled,
    #[default]
    Mixed,
}

impl SenderSettleMode {
    pub fn to_wire(self) -> u8 {
        match self {
            SenderSettleMode::Unsettled => 0,
            SenderSettleMode::Settled => 1,
            SenderSettleMode::Mixed => 2,
        }
    }

    pub fn from_wire(value: u8) -> Result<Self> {
        match value {
            0 => Ok(SenderSettleMode::Unsettled),
            1 => Ok(SenderSettleMode::Settled),
            2 => Ok(SenderSettleMode::Mixed),
            other => Err(CodecError::InvalidValue(format!("sender settle mode {other}"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReceiverSettleMode {
    #[default]
    First,
    Second,
}

impl ReceiverSettleMode {
    pub fn to_wire(self) -> u8 {
        match self {
            ReceiverSettleMode::First => 0,
            ReceiverSettleMode::Second => 1,
        }
    }

    pub fn from_wire(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ReceiverSettleMode::First),
            1 => Ok(ReceiverSettleMode::Second),
            other => Err(CodecError::InvalidValue(format!(
                "receiver settle mode {other}"
            ))),
        }
    }
}

fn read_error(buf: &mut Bytes) -> Result<Option<ErrorCondition>> {
    read_optional_described(buf)
}

/// Connection open. Optional fields keep their presence so that a decoded
/// frame re-encodes identically.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Open {
    pub container_id: String,
    pub hostname: Option<String>,
    pub max_frame_size: Option<u32>,
    pub channel_max: Option<u16>,
    pub idle_timeout: Option<u32>,
    pub outgoing_locales: Option<Vec<Symbol>>,
    pub incoming_locales: Option<Vec<Symbol>>,
    pub offered_capabilities: Option<Vec<Symbol>>,
    pub desired_capabilities: Option<Vec<Symbol>>,
    pub properties: Option<Fields>,
}

impl Open {
    pub fn max_frame_size(&self) -> u32 {
        self.max_frame_size.unwrap_or(u32::MAX)
    }

    pub fn channel_max(&self) -> u16 {
        self.channel_max.unwrap_or(u16::MAX)
    }

    pub fn idle_timeout(&self) -> u32 {
        self.idle_timeout.unwrap_or(0)
    }
}

impl DescribedType for Open {
    const DESCRIPTOR_CODE: u64 = 0x10;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:open:list";
    const NAME: &'static str = "Open";
    const FIELD_COUNT: usize = 10;
    const REQUIRED_FIELDS: usize = 1;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.string(&self.container_id);
        fields.opt_string(self.hostname.as_deref());
        fields.opt_uint(self.max_frame_size);
        fields.opt_ushort(self.channel_max);
        fields.opt_uint(self.idle_timeout);
        fields.symbols(self.outgoing_locales.as_deref());
        fields.symbols(self.incoming_locales.as_deref());
        fields.symbols(self.offered_capabilities.as_deref());
        fields.symbols(self.desired_capabilities.as_deref());
        fields.opt_fields(self.properties.as_ref());
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => {
                self.container_id = required(decoder::read_string(buf)?, Self::NAME, "container-id")?
            }
            1 => self.hostname = decoder::read_string(buf)?,
            2 => self.max_frame_size = decoder::read_uint(buf)?,
            3 => self.channel_max = decoder::read_ushort(buf)?,
            4 => self.idle_timeout = decoder::read_uint(buf)?,
            5 => self.outgoing_locales = decoder::read_symbols(buf)?,
            6 => self.incoming_locales = decoder::read_symbols(buf)?,
            7 => self.offered_capabilities = decoder::read_symbols(buf)?,
            8 => self.desired_capabilities = decoder::read_symbols(buf)?,
            9 => self.properties = decoder::read_fields(buf)?,
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

/// Session begin.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Begin {
    pub remote_channel: Option<u16>,
    pub next_outgoing_id: u32,
    pub incoming_window: u32,
    pub outgoing_window: u32,
    pub handle_max: Option<u32>,
    pub offered_capabilities: Option<Vec<Symbol>>,
    pub desired_capabilities: Option<Vec<Symbol>>,
    pub properties: Option<Fields>,
}

impl Begin {
    pub fn handle_max(&self) -> u32 {
        self.handle_max.unwrap_or(u32::MAX)
    }
}

impl DescribedType for Begin {
    const DESCRIPTOR_CODE: u64 = 0x11;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:begin:list";
    const NAME: &'static str = "Begin";
    const FIELD_COUNT: usize = 8;
    const REQUIRED_FIELDS: usize = 4;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.opt_ushort(self.remote_channel);
        fields.uint(self.next_outgoing_id);
        fields.uint(self.incoming_window);
        fields.uint(self.outgoing_window);
        fields.opt_uint(self.handle_max);
        fields.symbols(self.offered_capabilities.as_deref());
        fields.symbols(self.desired_capabilities.as_deref());
        fields.opt_fields(self.properties.as_ref());
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => self.remote_channel = decoder::read_ushort(buf)?,
            1 => {
                self.next_outgoing_id =
                    required(decoder::read_uint(buf)?, Self::NAME, "next-outgoing-id")?
            }
            2 => {
                self.incoming_window =
                    required(decoder::read_uint(buf)?, Self::NAME, "incoming-window")?
            }
            3 => {
                self.outgoing_window =
                    required(decoder::read_uint(buf)?, Self::NAME, "outgoing-window")?
            }
            4 => self.handle_max = decoder::read_uint(buf)?,
            5 => self.offered_capabilities = decoder::read_symbols(buf)?,
            6 => self.desired_capabilities = decoder::read_symbols(buf)?,
            7 => self.properties = decoder::read_fields(buf)?,
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

/// Link attach.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Attach {
    pub name: String,
    pub handle: u32,
    pub role: Role,
    pub snd_settle_mode: Option<SenderSettleMode>,
    pub rcv_settle_mode: Option<ReceiverSettleMode>,
    pub source: Option<Source>,
    pub target: Option<Target>,
    pub unsettled: Option<Map>,
    pub incomplete_unsettled: bool,
    pub initial_delivery_count: Option<u32>,
    pub max_message_size: Option<u64>,
    pub offered_capabilities: Option<Vec<Symbol>>,
    pub desired_capabilities: Option<Vec<Symbol>>,
    pub properties: Option<Fields>,
}

impl DescribedType for Attach {
    const DESCRIPTOR_CODE: u64 = 0x12;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:attach:list";
    const NAME: &'static str = "Attach";
    const FIELD_COUNT: usize = 14;
    const REQUIRED_FIELDS: usize = 3;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.string(&self.name);
        fields.uint(self.handle);
        fields.bool(self.role.as_bool());
        fields.opt_ubyte(self.snd_settle_mode.map(SenderSettleMode::to_wire));
        fields.opt_ubyte(self.rcv_settle_mode.map(ReceiverSettleMode::to_wire));
        fields.opt_described(self.source.as_ref());
        fields.opt_described(self.target.as_ref());
        fields.optional(self.unsettled.as_ref(), |map, dst| crate::encoder::write_map(map, dst));
        fields.flag(self.incomplete_unsettled);
        fields.opt_uint(self.initial_delivery_count);
        fields.optional(self.max_message_size, crate::encoder::write_ulong);
        fields.symbols(self.offered_capabilities.as_deref());
        fields.symbols(self.desired_capabilities.as_deref());
        fields.opt_fields(self.properties.as_ref());
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => self.name = required(decoder::read_string(buf)?, Self::NAME, "name")?,
            1 => self.handle = required(decoder::read_uint(buf)?, Self::NAME, "handle")?,
            2 => self.role = Role::from_bool(required(decoder::read_bool(buf)?, Self::NAME, "role")?),
            3 => {
                self.snd_settle_mode = decoder::read_ubyte(buf)?
                    .map(SenderSettleMode::from_wire)
                    .transpose()?
            }
            4 => {
                self.rcv_settle_mode = decoder::read_ubyte(buf)?
                    .map(ReceiverSettleMode::from_wire)
                    .transpose()?
            }
            5 => self.source = read_optional_described(buf)?,
            6 => self.target = read_optional_described(buf)?,
            7 => self.unsettled = decoder::read_map(buf)?,
            8 => self.incomplete_unsettled = decoder::read_bool(buf)?.unwrap_or(false),
            9 => self.initial_delivery_count = decoder::read_uint(buf)?,
            10 => self.max_message_size = decoder::read_ulong(buf)?,
            11 => self.offered_capabilities = decoder::read_symbols(buf)?,
            12 => self.desired_capabilities = decoder::read_symbols(buf)?,
            13 => self.properties = decoder::read_fields(buf)?,
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

/// Session and link flow state.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Flow {
    pub next_incoming_id: Option<u32>,
    pub incoming_window: u32,
    pub next_outgoing_id: u32,
    pub outgoing_window: u32,
    pub handle: Option<u32>,
    pub delivery_count: Option<u32>,
    pub link_credit: Option<u32>,
    pub available: Option<u32>,
    pub drain: bool,
    pub echo: bool,
    pub properties: Option<Fields>,
}

impl DescribedType for Flow {
    const DESCRIPTOR_CODE: u64 = 0x13;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:flow:list";
    const NAME: &'static str = "Flow";
    const FIELD_COUNT: usize = 11;
    const REQUIRED_FIELDS: usize = 4;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.opt_uint(self.next_incoming_id);
        fields.uint(self.incoming_window);
        fields.uint(self.next_outgoing_id);
        fields.uint(self.outgoing_window);
        fields.opt_uint(self.handle);
        fields.opt_uint(self.delivery_count);
        fields.opt_uint(self.link_credit);
        fields.opt_uint(self.available);
        fields.flag(self.drain);
        fields.flag(self.echo);
        fields.opt_fields(self.properties.as_ref());
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => self.next_incoming_id = decoder::read_uint(buf)?,
            1 => {
                self.incoming_window =
                    required(decoder::read_uint(buf)?, Self::NAME, "incoming-window")?
            }
            2 => {
                self.next_outgoing_id =
                    required(decoder::read_uint(buf)?, Self::NAME, "next-outgoing-id")?
            }
            3 => {
                self.outgoing_window =
                    required(decoder::read_uint(buf)?, Self::NAME, "outgoing-window")?
            }
            4 => self.handle = decoder::read_uint(buf)?,
            5 => self.delivery_count = decoder::read_uint(buf)?,
            6 => self.link_credit = decoder::read_uint(buf)?,
            7 => self.available = decoder::read_uint(buf)?,
            8 => self.drain = decoder::read_bool(buf)?.unwrap_or(false),
            9 => self.echo = decoder::read_bool(buf)?.unwrap_or(false),
            10 => self.properties = decoder::read_fields(buf)?,
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

/// Message transfer. The payload travels after the performative in the frame body.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Transfer {
    pub handle: u32,
    pub delivery_id: Option<u32>,
    pub delivery_tag: Option<Bytes>,
    pub message_format: Option<u32>,
    pub settled: Option<bool>,
    pub more: bool,
    pub rcv_settle_mode: Option<ReceiverSettleMode>,
    pub state: Option<DeliveryState>,
    pub resume: bool,
    pub aborted: bool,
    pub batchable: bool,
}

impl DescribedType for Transfer {
    const DESCRIPTOR_CODE: u64 = 0x14;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:transfer:list";
    const NAME: &'static str = "Transfer";
    const FIELD_COUNT: usize = 11;
    const REQUIRED_FIELDS: usize = 1;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.uint(self.handle);
        fields.opt_uint(self.delivery_id);
        fields.opt_binary(self.delivery_tag.as_deref());
        fields.opt_uint(self.message_format);
        fields.opt_bool(self.settled);
        fields.flag(self.more);
        fields.opt_ubyte(self.rcv_settle_mode.map(ReceiverSettleMode::to_wire));
        fields.optional(self.state.as_ref(), DeliveryState::encode);
        fields.flag(self.resume);
        fields.flag(self.aborted);
        fields.flag(self.batchable);
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => self.handle = required(decoder::read_uint(buf)?, Self::NAME, "handle")?,
            1 => self.delivery_id = decoder::read_uint(buf)?,
            2 => self.delivery_tag = decoder::read_binary(buf)?,
            3 => self.message_format = decoder::read_uint(buf)?,
            4 => self.settled = decoder::read_bool(buf)?,
            5 => self.more = decoder::read_bool(buf)?.unwrap_or(false),
            6 => {
                self.rcv_settle_mode = decoder::read_ubyte(buf)?
                    .map(ReceiverSettleMode::from_wire)
                    .transpose()?
            }
            7 => self.state = DeliveryState::read_optional(buf)?,
            8 => self.resume = decoder::read_bool(buf)?.unwrap_or(false),
            9 => self.aborted = decoder::read_bool(buf)?.unwrap_or(false),
            10 => self.batchable = decoder::read_bool(buf)?.unwrap_or(false),
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

/// Settlement and state update for a range of deliveries.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Disposition {
    pub role: Role,
    pub first: u32,
    pub last: Option<u32>,
    pub settled: bool,
    pub state: Option<DeliveryState>,
    pub batchable: bool,
}

impl Disposition {
    /// Whether `delivery_id` falls in `first..=last`.
    pub fn covers(&self, delivery_id: u32) -> bool {
        let last = self.last.unwrap_or(self.first);
        delivery_id.wrapping_sub(self.first) <= last.wrapping_sub(self.first)
    }
}

impl DescribedType for Disposition {
    const DESCRIPTOR_CODE: u64 = 0x15;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:disposition:list";
    const NAME: &'static str = "Disposition";
    const FIELD_COUNT: usize = 6;
    const REQUIRED_FIELDS: usize = 2;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.bool(self.role.as_bool());
        fields.uint(self.first);
        fields.opt_uint(self.last);
        fields.flag(self.settled);
        fields.optional(self.state.as_ref(), DeliveryState::encode);
        fields.flag(self.batchable);
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => self.role = Role::from_bool(required(decoder::read_bool(buf)?, Self::NAME, "role")?),
            1 => self.first = required(decoder::read_uint(buf)?, Self::NAME, "first")?,
            2 => self.last = decoder::read_uint(buf)?,
            3 => self.settled = decoder::read_bool(buf)?.unwrap_or(false),
            4 => self.state = DeliveryState::read_optional(buf)?,
            5 => self.batchable = decoder::read_bool(buf)?.unwrap_or(false),
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

/// Link detach.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Detach {
    pub handle: u32,
    pub closed: bool,
    pub error: Option<ErrorCondition>,
}

impl DescribedType for Detach {
    const DESCRIPTOR_CODE: u64 = 0x16;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:detach:list";
    const NAME: &'static str = "Detach";
    const FIELD_COUNT: usize = 3;
    const REQUIRED_FIELDS: usize = 1;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.uint(self.handle);
        fields.flag(self.closed);
        fields.opt_described(self.error.as_ref());
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => self.handle = required(decoder::read_uint(buf)?, Self::NAME, "handle")?,
            1 => self.closed = decoder::read_bool(buf)?.unwrap_or(false),
            2 => self.error = read_error(buf)?,
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

/// Session end.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct End {
    pub error: Option<ErrorCondition>,
}

impl DescribedType for End {
    const DESCRIPTOR_CODE: u64 = 0x17;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:end:list";
    const NAME: &'static str = "End";
    const FIELD_COUNT: usize = 1;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.opt_described(self.error.as_ref());
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => self.error = read_error(buf)?,
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

/// Connection close.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Close {
    pub error: Option<ErrorCondition>,
}

impl DescribedType for Close {
    const DESCRIPTOR_CODE: u64 = 0x18;
    const DESCRIPTOR_SYMBOL: &'static str = "amqp:close:list";
    const NAME: &'static str = "Close";
    const FIELD_COUNT: usize = 1;

    fn write_fields(&self, fields: &mut FieldWriter) {
        fields.opt_described(self.error.as_ref());
    }

    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()> {
        match index {
            0 => self.error = read_error(buf)?,
            _ => return Err(too_many_fields::<Self>()),
        }
        Ok(())
    }
}

/// Any AMQP transport performative.
#[derive(Debug, Clone, PartialEq)]
pub enum Performative {
    Open(Open),
    Begin(Begin),
    Attach(Attach),
    Flow(Flow),
    Transfer(Transfer),
    Disposition(Disposition),
    Detach(Detach),
    End(End),
    Close(Close),
}

const PERFORMATIVES: &[(u64, &str)] = &[
    (Open::DESCRIPTOR_CODE, Open::DESCRIPTOR_SYMBOL),
    (Begin::DESCRIPTOR_CODE, Begin::DESCRIPTOR_SYMBOL),
    (Attach::DESCRIPTOR_CODE, Attach::DESCRIPTOR_SYMBOL),
    (Flow::DESCRIPTOR_CODE, Flow::DESCRIPTOR_SYMBOL),
    (Transfer::DESCRIPTOR_CODE, Transfer::DESCRIPTOR_SYMBOL),
    (Disposition::DESCRIPTOR_CODE, Disposition::DESCRIPTOR_SYMBOL),
    (Detach::DESCRIPTOR_CODE, Detach::DESCRIPTOR_SYMBOL),
    (End::DESCRIPTOR_CODE, End::DESCRIPTOR_SYMBOL),
    (Close::DESCRIPTOR_CODE, Close::DESCRIPTOR_SYMBOL),
];

impl Performative {
    pub fn name(&self) -> &'static str {
        match self {
            Performative::Open(_) => Open::NAME,
            Performative::Begin(_) => Begin::NAME,
            Performative::Attach(_) => Attach::NAME,
            Performative::Flow(_) => Flow::NAME,
            Performative::Transfer(_) => Transfer::NAME,
            Performative::Disposition(_) => Disposition::NAME,
            Performative::Detach(_) => Detach::NAME,
            Performative::End(_) => End::NAME,
            Performative::Close(_) => Close::NAME,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {
            Performative::Open(v) => v.encode(dst),
            Performative::Begin(v) => v.encode(dst),
            Performative::Attach(v) => v.encode(dst),
            Performative::Flow(v) => v.encode(dst),
            Performative::Transfer(v) => v.encode(dst),
            Performative::Disposition(v) => v.encode(dst),
            Performative::Detach(v) => v.encode(dst),
            Performative::End(v) => v.encode(dst),
            Performative::Close(v) => v.encode(dst),
        }
    }

    pub fn decode(buf: &mut Bytes) -> Result<Self> {
        let descriptor = read_descriptor(buf)?;
        let performative = match descriptor_code(&descriptor, PERFORMATIVES) {
            Some(Open::DESCRIPTOR_CODE) => Performative::Open(Open::decode_list(buf)?),
            Some(Begin::DESCRIPTOR_CODE) => Performative::Begin(Begin::decode_list(buf)?),
            Some(Attach::DESCRIPTOR_CODE) => Performative::Attach(Attach::decode_list(buf)?),
            Some(Flow::DESCRIPTOR_CODE) => Performative::Flow(Flow::decode_list(buf)?),
            Some(Transfer::DESCRIPTOR_CODE) => Performative::Transfer(Transfer::decode_list(buf)?),
            Some(Disposition::DESCRIPTOR_CODE) => {
                Performative::Disposition(Disposition::decode_list(buf)?)
            }
            Some(Detach::DESCRIPTOR_CODE) => Performative::Detach(Detach::decode_list(buf)?),
            Some(End::DESCRIPTOR_CODE) => Performative::End(End::decode_list(buf)?),
            Some(Close::DESCRIPTOR_CODE) => Performative::Close(Close::decode_list(buf)?),
            _ => {
                return Err(CodecError::UnexpectedDescriptor {
                    expected: "performative",
                    found: descriptor.to_string(),
                })
            }
        };
        Ok(performative)
    }
}

impl fmt::Display for Performative {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

macro_rules! performative_from {
    ($($variant:ident),* $(,)?) => {
        $(
            impl From<$variant> for Performative {
                fn from(value: $variant) -> Self {
                    Performative::$variant(value)
                }
            }
        )*
    };
}

performative_from!(Open, Begin, Attach, Flow, Transfer, Disposition, Detach, End, Close);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoder;
    use crate::value::{Descriptor, Value};

    fn roundtrip(performative: Performative) {
        let mut buf = BytesMut::new();
        performative.encode(&mut buf);
        let mut bytes = buf.freeze();
        let mut skipped = bytes.clone();
        assert_eq!(Performative::decode(&mut bytes).unwrap(), performative);
        assert!(bytes.is_empty());
        decoder::skip_value(&mut skipped).unwrap();
        assert!(skipped.is_empty());
    }

    #[test]
    fn test_open_roundtrip_preserves_capability_presence() {
        let open = Open {
            container_id: "test".into(),
            max_frame_size: Some(1),
            idle_timeout: Some(0),
            offered_capabilities: Some(vec!["Cap-1".into(), "Cap-2".into()]),
            desired_capabilities: Some(vec!["Cap-3".into(), "Cap-4".into()]),
            ..Open::default()
        };
        roundtrip(open.clone().into());

        let empty = Open {
            offered_capabilities: Some(vec![]),
            desired_capabilities: None,
            ..open
        };
        let mut buf = BytesMut::new();
        empty.encode(&mut buf);
        let decoded = Open::decode(&mut buf.freeze()).unwrap();
        assert_eq!(decoded.offered_capabilities, Some(vec![]));
        assert_eq!(decoded.desired_capabilities, None);
    }

    #[test]
    fn test_open_defaults() {
        let open = Open {
            container_id: "c".into(),
            ..Open::default()
        };
        assert_eq!(open.max_frame_size(), u32::MAX);
        assert_eq!(open.channel_max(), u16::MAX);
        assert_eq!(open.idle_timeout(), 0);
    }

    #[test]
    fn test_all_performatives_roundtrip() {
        roundtrip(
            Begin {
                remote_channel: Some(3),
                next_outgoing_id: 7,
                incoming_window: 100,
                outgoing_window: 50,
                handle_max: Some(10),
                ..Begin::default()
            }
            .into(),
        );
        roundtrip(
            Attach {
                name: "link".into(),
                handle: 1,
                role: Role::Receiver,
                snd_settle_mode: Some(SenderSettleMode::Settled),
                source: Some(Source::with_address("src")),
                target: Some(Target::default()),
                initial_delivery_count: Some(0),
                max_message_size: Some(1 << 40),
                ..Attach::default()
            }
            .into(),
        );
        roundtrip(
            Flow {
                next_incoming_id: Some(1),
                incoming_window: 10,
                next_outgoing_id: 2,
                outgoing_window: 20,
                handle: Some(0),
                delivery_count: Some(5),
                link_credit: Some(100),
                drain: true,
                ..Flow::default()
            }
            .into(),
        );
        roundtrip(
            Transfer {
                handle: 0,
                delivery_id: Some(u32::MAX),
                delivery_tag: Some(Bytes::from_static(b"tag")),
                message_format: Some(0),
                settled: Some(false),
                more: true,
                state: Some(DeliveryState::Accepted),
                ..Transfer::default()
            }
            .into(),
        );
        roundtrip(
            Disposition {
                role: Role::Receiver,
                first: 4,
                last: Some(9),
                settled: true,
                state: Some(DeliveryState::Released),
                ..Disposition::default()
            }
            .into(),
        );
        roundtrip(
            Detach {
                handle: 2,
                closed: true,
                error: Some(ErrorCondition::new(conditions::DETACH_FORCED, None)),
            }
            .into(),
        );
        roundtrip(End::default().into());
        roundtrip(
            Close {
                error: Some(ErrorCondition::new(
                    conditions::RESOURCE_LIMIT_EXCEEDED,
                    Some("idle".into()),
                )),
            }
            .into(),
        );
    }

    #[test]
    fn test_open_with_extra_field_rejected() {
        let mut values = vec![Value::from("c")];
        values.extend(std::iter::repeat(Value::Null).take(10));
        let mut buf = BytesMut::new();
        encoder::write_descriptor(&Descriptor::Code(Open::DESCRIPTOR_CODE), &mut buf);
        encoder::write_list(&values, &mut buf);
        assert_eq!(
            Performative::decode(&mut buf.freeze()),
            Err(CodecError::TooManyFields {
                type_name: "Open",
                max: 10
            })
        );
    }

    #[test]
    fn test_begin_missing_window_rejected() {
        let mut buf = BytesMut::new();
        encoder::write_descriptor(&Descriptor::Code(Begin::DESCRIPTOR_CODE), &mut buf);
        encoder::write_list(&[Value::Null, Value::Uint(0), Value::Null, Value::Uint(1)], &mut buf);
        assert!(matches!(
            Performative::decode(&mut buf.freeze()),
            Err(CodecError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_symbolic_performative_descriptor() {
        let mut buf = BytesMut::new();
        encoder::write_descriptor(&Descriptor::Symbol("amqp:end:list".into()), &mut buf);
        encoder::write_list(&[], &mut buf);
        assert_eq!(
            Performative::decode(&mut buf.freeze()).unwrap(),
            Performative::End(End::default())
        );
    }

    #[test]
    fn test_disposition_range() {
        let single = Disposition {
            first: 5,
            ..Disposition::default()
        };
        assert!(single.covers(5));
        assert!(!single.covers(6));

        let wrapping = Disposition {
            first: u32::MAX,
            last: Some(1),
            ..Disposition::default()
        };
        assert!(wrapping.covers(0));
        assert!(wrapping.covers(1));
        assert!(!wrapping.covers(2));
    }

    #[test]
    fn test_unknown_performative_rejected() {
        let mut buf = BytesMut::new();
        encoder::write_descriptor(&Descriptor::Code(0x19), &mut buf);
        encoder::write_list(&[], &mut buf);
        assert!(matches!(
            Performative::decode(&mut buf.freeze()),
            Err(CodecError::UnexpectedDescriptor { .. })
        ));
    }
}
