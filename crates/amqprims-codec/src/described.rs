//! Composite (described) types: a descriptor followed by a list of positional fields.

use bytes::{Buf, Bytes, BytesMut};

use crate::decoder::{read_descriptor, read_list};
use crate::encoder;
use crate::error::{CodecError, Result};
use crate::value::{Descriptor, Fields, Symbol, Timestamp, Value};

/// A composite type with a fixed positional field schema.
///
/// Implementors provide the field writer and a per-index field reader; the
/// list framing, descriptor check and field-count bound are shared.
pub trait DescribedType: Sized + Default {
    const DESCRIPTOR_CODE: u64;
    const DESCRIPTOR_SYMBOL: &'static str;
    const NAME: &'static str;
    /// Number of fields defined by the schema.
    const FIELD_COUNT: usize;
    /// Number of leading fields that must be present on the wire.
    const REQUIRED_FIELDS: usize = 0;

    /// Write every field in order; trailing nulls are trimmed by the writer.
    fn write_fields(&self, fields: &mut FieldWriter);

    /// Decode field `index` from `buf`.
    fn read_field(&mut self, index: usize, buf: &mut Bytes) -> Result<()>;

    fn descriptor() -> Descriptor {
        Descriptor::Code(Self::DESCRIPTOR_CODE)
    }

    /// Encode with the described-type preamble.
    fn encode(&self, dst: &mut BytesMut) {
        let mut fields = FieldWriter::new();
        self.write_fields(&mut fields);
        fields.finish(Self::DESCRIPTOR_CODE, dst);
    }

    /// Decode including the described-type preamble.
    fn decode(buf: &mut Bytes) -> Result<Self> {
        let descriptor = read_descriptor(buf)?;
        check_descriptor::<Self>(&descriptor)?;
        Self::decode_list(buf)
    }

    /// Decode the field list that follows an already-consumed descriptor.
    fn decode_list(buf: &mut Bytes) -> Result<Self> {
        let (header, mut body) = read_list(buf)?;
        if header.count > Self::FIELD_COUNT {
            return Err(CodecError::TooManyFields {
                type_name: Self::NAME,
                max: Self::FIELD_COUNT,
            });
        }
        if header.count < Self::REQUIRED_FIELDS {
            return Err(CodecError::InvalidValue(format!(
                "{} requires {} fields, got {}",
                Self::NAME,
                Self::REQUIRED_FIELDS,
                header.count
            )));
        }
        let mut value = Self::default();
        for index in 0..header.count {
            value.read_field(index, &mut body)?;
        }
        if body.has_remaining() {
            return Err(CodecError::InvalidValue(format!(
                "{} list has {} bytes past its last field",
                Self::NAME,
                body.remaining()
            )));
        }
        Ok(value)
    }
}

/// Fail unless `descriptor` names `T`.
pub fn check_descriptor<T: DescribedType>(descriptor: &Descriptor) -> Result<()> {
    if descriptor.matches(T::DESCRIPTOR_CODE, T::DESCRIPTOR_SYMBOL) {
        Ok(())
    } else {
        Err(CodecError::UnexpectedDescriptor {
            expected: T::DESCRIPTOR_SYMBOL,
            found: descriptor.to_string(),
        })
    }
}

/// Numeric code for a decoded descriptor, resolving symbolic descriptors
/// through `lookup`.
pub fn descriptor_code(descriptor: &Descriptor, lookup: &[(u64, &str)]) -> Option<u64> {
    match descriptor {
        Descriptor::Code(code) => Some(*code),
        Descriptor::Symbol(symbol) => lookup
            .iter()
            .find(|(_, name)| *name == symbol.as_str())
            .map(|(code, _)| *code),
    }
}

/// Fail a required field that decoded as null.
pub fn required<T>(value: Option<T>, type_name: &'static str, field: &str) -> Result<T> {
    value.ok_or_else(|| CodecError::InvalidValue(format!("{type_name}.{field} is mandatory")))
}

/// The default branch of a `read_field` match.
pub fn too_many_fields<T: DescribedType>() -> CodecError {
    CodecError::TooManyFields {
        type_name: T::NAME,
        max: T::FIELD_COUNT,
    }
}

/// Accumulates the positional fields of a composite type.
///
/// Nulls are deferred so that trailing absent fields are dropped from the
/// encoded list.
#[derive(Debug, Default)]
pub struct FieldWriter {
    body: BytesMut,
    count: usize,
    pending_nulls: usize,
}

impl FieldWriter {
    pub fn new() -> Self {
        Self::default()
    }

    fn flush_nulls(&mut self) {
        for _ in 0..self.pending_nulls {
            encoder::write_null(&mut self.body);
        }
        self.count += self.pending_nulls;
        self.pending_nulls = 0;
    }

    /// Write a present field using `write`.
    pub fn field(&mut self, write: impl FnOnce(&mut BytesMut)) {
        self.flush_nulls();
        write(&mut self.body);
        self.count += 1;
    }

    /// Write an optional field, `null` when absent.
    pub fn optional<T>(&mut self, value: Option<T>, write: impl FnOnce(T, &mut BytesMut)) {
        match value {
            Some(value) => self.field(|dst| write(value, dst)),
            None => self.null(),
        }
    }

    pub fn null(&mut self) {
        self.pending_nulls += 1;
    }

    pub fn uint(&mut self, value: u32) {
        self.field(|dst| encoder::write_uint(value, dst));
    }

    pub fn opt_uint(&mut self, value: Option<u32>) {
        self.optional(value, encoder::write_uint);
    }

    pub fn ulong(&mut self, value: u64) {
        self.field(|dst| encoder::write_ulong(value, dst));
    }

    pub fn opt_ushort(&mut self, value: Option<u16>) {
        self.optional(value, encoder::write_ushort);
    }

    pub fn ubyte(&mut self, value: u8) {
        self.field(|dst| encoder::write_ubyte(value, dst));
    }

    pub fn opt_ubyte(&mut self, value: Option<u8>) {
        self.optional(value, encoder::write_ubyte);
    }

    pub fn bool(&mut self, value: bool) {
        self.field(|dst| encoder::write_bool(value, dst));
    }

    pub fn opt_bool(&mut self, value: Option<bool>) {
        self.optional(value, encoder::write_bool);
    }

    /// A boolean whose default is false: written as null when false.
    pub fn flag(&mut self, value: bool) {
        if value {
            self.bool(true);
        } else {
            self.null();
        }
    }

    pub fn string(&mut self, value: &str) {
        self.field(|dst| encoder::write_string(value, dst));
    }

    pub fn opt_string(&mut self, value: Option<&str>) {
        self.optional(value, encoder::write_string);
    }

    pub fn symbol(&mut self, value: &Symbol) {
        self.field(|dst| encoder::write_symbol(value, dst));
    }

    pub fn opt_symbol(&mut self, value: Option<&Symbol>) {
        self.optional(value, encoder::write_symbol);
    }

    /// A `multiple="true"` symbol field, always encoded as an array when present.
    pub fn symbols(&mut self, value: Option<&[Symbol]>) {
        self.optional(value, encoder::write_symbol_array);
    }

    pub fn binary(&mut self, value: &[u8]) {
        self.field(|dst| encoder::write_binary(value, dst));
    }

    pub fn opt_binary(&mut self, value: Option<&[u8]>) {
        self.optional(value, encoder::write_binary);
    }

    pub fn opt_timestamp(&mut self, value: Option<Timestamp>) {
        self.optional(value, encoder::write_timestamp);
    }

    pub fn opt_fields(&mut self, value: Option<&Fields>) {
        self.optional(value, |fields, dst| encoder::write_fields(fields, dst));
    }

    pub fn opt_value(&mut self, value: Option<&Value>) {
        self.optional(value, encoder::encode_value);
    }

    pub fn described<T: DescribedType>(&mut self, value: &T) {
        self.field(|dst| value.encode(dst));
    }

    pub fn opt_described<T: DescribedType>(&mut self, value: Option<&T>) {
        self.optional(value, |v, dst| v.encode(dst));
    }

    /// Emit the descriptor and the list container.
    pub fn finish(self, descriptor_code: u64, dst: &mut BytesMut) {
        encoder::write_descriptor(&Descriptor::Code(descriptor_code), dst);
        encoder::write_list_raw(self.count, &self.body, dst);
    }
}
