//! AMQP 1.0 type system encoding.
//!
//! Values are encoded as a constructor byte followed by a body. Composite
//! types (performatives, delivery states, terminus types, message sections)
//! are described types: a descriptor followed by a list of positional fields.
//!
//! Everything here is independent of protocol state.

pub mod codes;
pub mod decoder;
pub mod described;
pub mod encoder;
pub mod error;
pub mod messaging;
pub mod sasl;
pub mod transport;
pub mod value;

pub use decoder::{decode_value, skip_value};
pub use described::{DescribedType, FieldWriter};
pub use encoder::encode_value;
pub use error::{CodecError, Result};
pub use messaging::{
    decode_sections, encode_sections, Accepted, DeliveryState, Header, Modified, Properties,
    Received, Rejected, Released, Section, Source, Target, TerminusDurability,
};
pub use sasl::{
    SaslChallenge, SaslCode, SaslInit, SaslMechanisms, SaslOutcome, SaslPerformative,
    SaslResponse,
};
pub use transport::{
    conditions, Attach, Begin, Close, Detach, Disposition, End, ErrorCondition, Flow, Open,
    Performative, ReceiverSettleMode, Role, SenderSettleMode, Transfer,
};
pub use value::{Array, Descriptor, Fields, Map, Symbol, Timestamp, Uuid, Value};
