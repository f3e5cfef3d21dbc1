//! Decoding of AMQP values from a byte buffer.
//!
//! Readers consume from a `Bytes` cursor. Typed readers map the AMQP `null`
//! encoding to `None` so optional composite fields decode naturally.

use bytes::{Buf, Bytes};

use crate::codes;
use crate::encoder;
use crate::error::{CodecError, Result};
use crate::value::{Array, Descriptor, Fields, Map, Symbol, Timestamp, Uuid, Value};

fn ensure(buf: &Bytes, needed: usize) -> Result<()> {
    if buf.remaining() < needed {
        return Err(CodecError::Truncated {
            needed,
            remaining: buf.remaining(),
        });
    }
    Ok(())
}

fn take_u8(buf: &mut Bytes) -> Result<u8> {
    ensure(buf, 1)?;
    Ok(buf.get_u8())
}

fn take_u32(buf: &mut Bytes) -> Result<u32> {
    ensure(buf, 4)?;
    Ok(buf.get_u32())
}

fn take_bytes(buf: &mut Bytes, len: usize) -> Result<Bytes> {
    ensure(buf, len)?;
    Ok(buf.split_to(len))
}

fn take_array<const N: usize>(buf: &mut Bytes) -> Result<[u8; N]> {
    ensure(buf, N)?;
    let mut out = [0u8; N];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

/// Deepest nesting of described and compound values the decoder accepts.
pub const MAX_NESTING_DEPTH: usize = 32;

fn descend(depth: usize) -> Result<usize> {
    if depth >= MAX_NESTING_DEPTH {
        return Err(CodecError::NestingTooDeep {
            max: MAX_NESTING_DEPTH,
        });
    }
    Ok(depth + 1)
}

/// Size and element count of a list, map or array container.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerHeader {
    /// Bytes following the size field (count field included).
    pub size: usize,
    /// Number of elements (for maps: keys plus values).
    pub count: usize,
}

/// Read a constructor byte without consuming it.
pub fn peek_code(buf: &Bytes) -> Result<u8> {
    ensure(buf, 1)?;
    Ok(buf[0])
}

/// Read the size/count header of a compound value whose constructor has been read.
pub fn read_container_header(code: u8, buf: &mut Bytes) -> Result<ContainerHeader> {
    let header = match code {
        codes::LIST0 => ContainerHeader { size: 0, count: 0 },
        codes::LIST8 | codes::MAP8 | codes::ARRAY8 => {
            let size = take_u8(buf)? as usize;
            ensure(buf, size)?;
            if size < 1 {
                return Err(CodecError::InvalidValue(format!(
                    "{} size {size} too small for count",
                    codes::code_name(code)
                )));
            }
            let count = take_u8(buf)? as usize;
            ContainerHeader { size, count }
        }
        codes::LIST32 | codes::MAP32 | codes::ARRAY32 => {
            let size = take_u32(buf)? as usize;
            ensure(buf, size)?;
            if size < 4 {
                return Err(CodecError::InvalidValue(format!(
                    "{} size {size} too small for count",
                    codes::code_name(code)
                )));
            }
            let count = take_u32(buf)? as usize;
            ContainerHeader { size, count }
        }
        other => {
            return Err(CodecError::UnexpectedEncoding {
                expected: "compound",
                found: other,
            })
        }
    };
    Ok(header)
}

/// Split off the element bytes of a container whose header has just been read.
fn container_body(code: u8, header: &ContainerHeader, buf: &mut Bytes) -> Result<Bytes> {
    let count_width = match code {
        codes::LIST0 => 0,
        codes::LIST8 | codes::MAP8 | codes::ARRAY8 => 1,
        _ => 4,
    };
    take_bytes(buf, header.size.saturating_sub(count_width))
}

/// Fail if a container's elements did not fill its declared size.
fn finish_container(code: u8, body: &Bytes) -> Result<()> {
    if body.has_remaining() {
        return Err(CodecError::InvalidValue(format!(
            "{} has {} bytes past its last element",
            codes::code_name(code),
            body.remaining()
        )));
    }
    Ok(())
}

/// Read the list header of a composite body (constructor included).
pub fn read_list_header(buf: &mut Bytes) -> Result<ContainerHeader> {
    Ok(read_list(buf)?.0)
}

/// Read a list header and split off exactly the bytes it declares.
pub fn read_list(buf: &mut Bytes) -> Result<(ContainerHeader, Bytes)> {
    let code = take_u8(buf)?;
    match code {
        codes::LIST0 | codes::LIST8 | codes::LIST32 => {
            let header = read_container_header(code, buf)?;
            let body = container_body(code, &header, buf)?;
            Ok((header, body))
        }
        other => Err(CodecError::UnexpectedEncoding {
            expected: "list",
            found: other,
        }),
    }
}

/// Read a described-type descriptor after its indicator byte.
pub fn read_descriptor(buf: &mut Bytes) -> Result<Descriptor> {
    let indicator = take_u8(buf)?;
    if indicator != codes::DESCRIBED_TYPE_INDICATOR {
        return Err(CodecError::UnexpectedEncoding {
            expected: "described type",
            found: indicator,
        });
    }
    read_descriptor_body(buf)
}

/// A descriptor is a single ulong or symbol; nothing else may appear here.
fn read_descriptor_body(buf: &mut Bytes) -> Result<Descriptor> {
    let code = take_u8(buf)?;
    let descriptor = match code {
        codes::ULONG0 => Descriptor::Code(0),
        codes::SMALLULONG => Descriptor::Code(take_u8(buf)? as u64),
        codes::ULONG => {
            ensure(buf, 8)?;
            Descriptor::Code(buf.get_u64())
        }
        codes::SYM8 | codes::SYM32 => Descriptor::Symbol(Symbol::new(utf8(read_sized(code, buf)?)?)),
        other => {
            return Err(CodecError::UnexpectedEncoding {
                expected: "descriptor",
                found: other,
            })
        }
    };
    Ok(descriptor)
}

/// Decode the next value, whatever its type.
pub fn decode_value(buf: &mut Bytes) -> Result<Value> {
    decode_nested(buf, 0)
}

fn decode_nested(buf: &mut Bytes, depth: usize) -> Result<Value> {
    let depth = descend(depth)?;
    let code = take_u8(buf)?;
    if code == codes::DESCRIBED_TYPE_INDICATOR {
        let descriptor = read_descriptor_body(buf)?;
        let inner = decode_nested(buf, depth)?;
        return Ok(Value::Described(Box::new(descriptor), Box::new(inner)));
    }
    decode_body_at(code, buf, depth)
}

/// Decode a value body for an already-consumed constructor.
pub fn decode_body(code: u8, buf: &mut Bytes) -> Result<Value> {
    decode_body_at(code, buf, 0)
}

fn decode_body_at(code: u8, buf: &mut Bytes, depth: usize) -> Result<Value> {
    let value = match code {
        codes::NULL => Value::Null,
        codes::BOOLEAN_TRUE => Value::Boolean(true),
        codes::BOOLEAN_FALSE => Value::Boolean(false),
        codes::BOOLEAN => match take_u8(buf)? {
            0 => Value::Boolean(false),
            1 => Value::Boolean(true),
            other => {
                return Err(CodecError::InvalidValue(format!(
                    "boolean byte 0x{other:02x}"
                )))
            }
        },
        codes::UBYTE => Value::Ubyte(take_u8(buf)?),
        codes::USHORT => {
            ensure(buf, 2)?;
            Value::Ushort(buf.get_u16())
        }
        codes::UINT0 => Value::Uint(0),
        codes::SMALLUINT => Value::Uint(take_u8(buf)? as u32),
        codes::UINT => Value::Uint(take_u32(buf)?),
        codes::ULONG0 => Value::Ulong(0),
        codes::SMALLULONG => Value::Ulong(take_u8(buf)? as u64),
        codes::ULONG => {
            ensure(buf, 8)?;
            Value::Ulong(buf.get_u64())
        }
        codes::BYTE => Value::Byte(take_u8(buf)? as i8),
        codes::SHORT => {
            ensure(buf, 2)?;
            Value::Short(buf.get_i16())
        }
        codes::SMALLINT => Value::Int(take_u8(buf)? as i8 as i32),
        codes::INT => {
            ensure(buf, 4)?;
            Value::Int(buf.get_i32())
        }
        codes::SMALLLONG => Value::Long(take_u8(buf)? as i8 as i64),
        codes::LONG => {
            ensure(buf, 8)?;
            Value::Long(buf.get_i64())
        }
        codes::FLOAT => {
            ensure(buf, 4)?;
            Value::Float(buf.get_f32())
        }
        codes::DOUBLE => {
            ensure(buf, 8)?;
            Value::Double(buf.get_f64())
        }
        codes::DECIMAL32 => Value::Decimal32(take_array(buf)?),
        codes::DECIMAL64 => Value::Decimal64(take_array(buf)?),
        codes::DECIMAL128 => Value::Decimal128(take_array(buf)?),
        codes::CHAR => {
            let raw = take_u32(buf)?;
            Value::Char(char::from_u32(raw).ok_or(CodecError::InvalidChar(raw))?)
        }
        codes::TIMESTAMP => {
            ensure(buf, 8)?;
            Value::Timestamp(Timestamp(buf.get_i64()))
        }
        codes::UUID => Value::Uuid(Uuid(take_array(buf)?)),
        codes::VBIN8 | codes::VBIN32 => Value::Binary(read_sized(code, buf)?),
        codes::STR8 | codes::STR32 => Value::String(utf8(read_sized(code, buf)?)?),
        codes::SYM8 | codes::SYM32 => Value::Symbol(Symbol::new(utf8(read_sized(code, buf)?)?)),
        codes::LIST0 | codes::LIST8 | codes::LIST32 => {
            let header = read_container_header(code, buf)?;
            let mut body = container_body(code, &header, buf)?;
            let mut values = Vec::with_capacity(header.count.min(1024));
            for _ in 0..header.count {
                values.push(decode_nested(&mut body, depth)?);
            }
            finish_container(code, &body)?;
            Value::List(values)
        }
        codes::MAP8 | codes::MAP32 => {
            let header = read_container_header(code, buf)?;
            if header.count % 2 != 0 {
                return Err(CodecError::InvalidValue(format!(
                    "map with odd element count {}",
                    header.count
                )));
            }
            let mut body = container_body(code, &header, buf)?;
            let mut entries = Vec::with_capacity((header.count / 2).min(1024));
            for _ in 0..header.count / 2 {
                let key = decode_nested(&mut body, depth)?;
                let value = decode_nested(&mut body, depth)?;
                entries.push((key, value));
            }
            finish_container(code, &body)?;
            Value::Map(entries)
        }
        codes::ARRAY8 | codes::ARRAY32 => Value::Array(read_array_body(code, buf, depth)?),
        other => return Err(CodecError::UnknownEncoding(other)),
    };
    Ok(value)
}

fn read_sized(code: u8, buf: &mut Bytes) -> Result<Bytes> {
    let len = if codes::is_narrow_variable(code) {
        take_u8(buf)? as usize
    } else {
        take_u32(buf)? as usize
    };
    take_bytes(buf, len)
}

fn utf8(bytes: Bytes) -> Result<String> {
    String::from_utf8(bytes.to_vec()).map_err(|_| CodecError::InvalidUtf8)
}

/// Elements are read under the declared element code and kept under its wide form.
///
/// The element count may not exceed the declared size, which also bounds
/// arrays of zero-width elements such as `null` or `uint0`.
fn read_array_body(code: u8, buf: &mut Bytes, depth: usize) -> Result<Array> {
    let depth = descend(depth)?;
    let header = read_container_header(code, buf)?;
    if header.count > header.size {
        return Err(CodecError::InvalidValue(format!(
            "{} declares {} elements in {} bytes",
            codes::code_name(code),
            header.count,
            header.size
        )));
    }
    let mut body = container_body(code, &header, buf)?;
    let mut element_code = take_u8(&mut body)?;
    let mut descriptor = None;
    if element_code == codes::DESCRIBED_TYPE_INDICATOR {
        descriptor = Some(read_descriptor_body(&mut body)?);
        element_code = take_u8(&mut body)?;
    }
    let mut elements = Vec::with_capacity(header.count.min(1024));
    for _ in 0..header.count {
        elements.push(decode_body_at(element_code, &mut body, depth)?);
    }
    finish_container(code, &body)?;
    Ok(Array::from_parts(codes::wide_form(element_code), descriptor, elements))
}

/// Advance past the next value without materializing it.
pub fn skip_value(buf: &mut Bytes) -> Result<()> {
    let mut depth = 0;
    loop {
        let code = take_u8(buf)?;
        if code != codes::DESCRIBED_TYPE_INDICATOR {
            return skip_body(code, buf);
        }
        depth = descend(depth)?;
        read_descriptor_body(buf)?;
    }
}

fn skip_body(code: u8, buf: &mut Bytes) -> Result<()> {
    if let Some(width) = codes::fixed_width(code) {
        ensure(buf, width)?;
        buf.advance(width);
        return Ok(());
    }
    let len = match code {
        codes::VBIN8 | codes::STR8 | codes::SYM8 | codes::LIST8 | codes::MAP8 | codes::ARRAY8 => {
            take_u8(buf)? as usize
        }
        codes::VBIN32
        | codes::STR32
        | codes::SYM32
        | codes::LIST32
        | codes::MAP32
        | codes::ARRAY32 => take_u32(buf)? as usize,
        other => return Err(CodecError::UnknownEncoding(other)),
    };
    ensure(buf, len)?;
    buf.advance(len);
    Ok(())
}

// ----- typed readers used by composite types -----

fn unexpected<T>(expected: &'static str, found: &Value) -> Result<T> {
    let mut scratch = bytes::BytesMut::new();
    encoder::encode_value(found, &mut scratch);
    Err(CodecError::UnexpectedEncoding {
        expected,
        found: scratch.first().copied().unwrap_or(codes::NULL),
    })
}

pub fn read_bool(buf: &mut Bytes) -> Result<Option<bool>> {
    match decode_value(buf)? {
        Value::Null => Ok(None),
        Value::Boolean(v) => Ok(Some(v)),
        other => unexpected("boolean", &other),
    }
}

pub fn read_ubyte(buf: &mut Bytes) -> Result<Option<u8>> {
    match decode_value(buf)? {
        Value::Null => Ok(None),
        Value::Ubyte(v) => Ok(Some(v)),
        other => unexpected("ubyte", &other),
    }
}

pub fn read_ushort(buf: &mut Bytes) -> Result<Option<u16>> {
    match decode_value(buf)? {
        Value::Null => Ok(None),
        Value::Ushort(v) => Ok(Some(v)),
        other => unexpected("ushort", &other),
    }
}

pub fn read_uint(buf: &mut Bytes) -> Result<Option<u32>> {
    match decode_value(buf)? {
        Value::Null => Ok(None),
        Value::Uint(v) => Ok(Some(v)),
        other => unexpected("uint", &other),
    }
}

pub fn read_ulong(buf: &mut Bytes) -> Result<Option<u64>> {
    match decode_value(buf)? {
        Value::Null => Ok(None),
        Value::Ulong(v) => Ok(Some(v)),
        other => unexpected("ulong", &other),
    }
}

pub fn read_timestamp(buf: &mut Bytes) -> Result<Option<Timestamp>> {
    match decode_value(buf)? {
        Value::Null => Ok(None),
        Value::Timestamp(v) => Ok(Some(v)),
        other => unexpected("timestamp", &other),
    }
}

pub fn read_string(buf: &mut Bytes) -> Result<Option<String>> {
    match decode_value(buf)? {
        Value::Null => Ok(None),
        Value::String(v) => Ok(Some(v)),
        other => unexpected("string", &other),
    }
}

pub fn read_symbol(buf: &mut Bytes) -> Result<Option<Symbol>> {
    match decode_value(buf)? {
        Value::Null => Ok(None),
        Value::Symbol(v) => Ok(Some(v)),
        other => unexpected("symbol", &other),
    }
}

pub fn read_binary(buf: &mut Bytes) -> Result<Option<Bytes>> {
    match decode_value(buf)? {
        Value::Null => Ok(None),
        Value::Binary(v) => Ok(Some(v)),
        other => unexpected("binary", &other),
    }
}

/// Read a `multiple="true"` symbol field: null, one symbol, or a symbol array.
///
/// An empty array decodes to `Some(vec![])`, distinct from an absent field.
pub fn read_symbols(buf: &mut Bytes) -> Result<Option<Vec<Symbol>>> {
    match decode_value(buf)? {
        Value::Null => Ok(None),
        Value::Symbol(v) => Ok(Some(vec![v])),
        Value::Array(array) => {
            let mut symbols = Vec::with_capacity(array.len());
            for element in array.into_elements() {
                match element {
                    Value::Symbol(symbol) => symbols.push(symbol),
                    other => return unexpected("symbol array", &other),
                }
            }
            Ok(Some(symbols))
        }
        other => unexpected("symbol array", &other),
    }
}

pub fn read_map(buf: &mut Bytes) -> Result<Option<Map>> {
    match decode_value(buf)? {
        Value::Null => Ok(None),
        Value::Map(v) => Ok(Some(v)),
        other => unexpected("map", &other),
    }
}

/// Read a symbol-keyed map.
pub fn read_fields(buf: &mut Bytes) -> Result<Option<Fields>> {
    let Some(entries) = read_map(buf)? else {
        return Ok(None);
    };
    let mut fields = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        match key {
            Value::Symbol(symbol) => fields.push((symbol, value)),
            other => return unexpected("symbol key", &other),
        }
    }
    Ok(Some(fields))
}

/// Read any value, mapping `null` to `None`.
pub fn read_optional_value(buf: &mut Bytes) -> Result<Option<Value>> {
    match decode_value(buf)? {
        Value::Null => Ok(None),
        other => Ok(Some(other)),
    }
}

/// True (and consumed) if the next value is `null`.
pub fn take_null(buf: &mut Bytes) -> Result<bool> {
    if peek_code(buf)? == codes::NULL {
        buf.advance(1);
        return Ok(true);
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use bytes::BytesMut;

    use super::*;
    use crate::encoder::encode_value;

    fn roundtrip(value: Value) {
        let mut buf = BytesMut::new();
        encode_value(&value, &mut buf);
        let encoded_len = buf.len();

        let mut bytes = buf.freeze();
        let mut skip = bytes.clone();
        assert_eq!(decode_value(&mut bytes).unwrap(), value);
        assert!(bytes.is_empty());

        skip_value(&mut skip).unwrap();
        assert!(skip.is_empty(), "skip left bytes for {encoded_len}-byte value");
    }

    #[test]
    fn test_primitive_roundtrips() {
        roundtrip(Value::Null);
        roundtrip(Value::Boolean(true));
        roundtrip(Value::Boolean(false));
        roundtrip(Value::Ubyte(200));
        roundtrip(Value::Ushort(65535));
        roundtrip(Value::Uint(u32::MAX));
        roundtrip(Value::Ulong(u64::MAX));
        roundtrip(Value::Byte(-5));
        roundtrip(Value::Short(-300));
        roundtrip(Value::Int(-2));
        roundtrip(Value::Int(i32::MIN));
        roundtrip(Value::Long(-129));
        roundtrip(Value::Float(1.5));
        roundtrip(Value::Double(-2.25));
        roundtrip(Value::Decimal64([1, 2, 3, 4, 5, 6, 7, 8]));
        roundtrip(Value::Char('\u{10FFFF}'));
        roundtrip(Value::Timestamp(Timestamp(1_700_000_000_000)));
        roundtrip(Value::Uuid(Uuid([7; 16])));
        roundtrip(Value::Binary(Bytes::from_static(b"\x00\x01\x02")));
        roundtrip(Value::from("hello"));
        roundtrip(Value::Symbol(Symbol::from("amqp:accepted:list")));
    }

    #[test]
    fn test_compound_roundtrips() {
        roundtrip(Value::List(vec![]));
        roundtrip(Value::List(vec![Value::Uint(1), Value::from("two"), Value::Null]));
        roundtrip(Value::Map(vec![(Value::from("k"), Value::Long(9))]));
        roundtrip(Value::Array(
            Array::new(vec![Value::Int(1), Value::Int(-1), Value::Int(1 << 20)]).unwrap(),
        ));
        roundtrip(Value::Array(Array::new(vec![Value::Boolean(true), Value::Boolean(false)]).unwrap()));
        roundtrip(Value::Described(
            Box::new(Descriptor::Code(0x77)),
            Box::new(Value::from("body")),
        ));
    }

    #[test]
    fn test_array_of_lists_uses_wide_element_form() {
        let array = Array::new(vec![
            Value::List(vec![Value::Uint(1)]),
            Value::List(vec![]),
        ])
        .unwrap();
        roundtrip(Value::Array(array));
    }

    #[test]
    fn test_large_list_uses_list32() {
        let values: Vec<Value> = (0..300).map(Value::Uint).collect();
        let mut buf = BytesMut::new();
        encode_value(&Value::List(values.clone()), &mut buf);
        assert_eq!(buf[0], codes::LIST32);
        roundtrip(Value::List(values));
    }

    #[test]
    fn test_unknown_code_rejected() {
        let mut bytes = Bytes::from_static(&[0x01]);
        assert!(matches!(
            decode_value(&mut bytes),
            Err(CodecError::UnknownEncoding(0x01))
        ));
    }

    #[test]
    fn test_truncated_input_rejected() {
        let mut bytes = Bytes::from_static(&[codes::UINT, 0, 0]);
        assert!(matches!(
            decode_value(&mut bytes),
            Err(CodecError::Truncated { needed: 4, .. })
        ));

        let mut bytes = Bytes::from_static(&[codes::STR8, 5, b'a']);
        assert!(matches!(
            decode_value(&mut bytes),
            Err(CodecError::Truncated { .. })
        ));
    }

    #[test]
    fn test_invalid_char_rejected() {
        let mut bytes = Bytes::from_static(&[codes::CHAR, 0x00, 0x00, 0xD8, 0x00]);
        assert!(matches!(
            decode_value(&mut bytes),
            Err(CodecError::InvalidChar(0xD800))
        ));
    }

    #[test]
    fn test_read_symbols_distinguishes_empty_and_absent() {
        let mut buf = BytesMut::new();
        crate::encoder::write_symbol_array(&[], &mut buf);
        crate::encoder::write_null(&mut buf);
        crate::encoder::write_symbol(&Symbol::from("single"), &mut buf);
        let mut bytes = buf.freeze();

        assert_eq!(read_symbols(&mut bytes).unwrap(), Some(vec![]));
        assert_eq!(read_symbols(&mut bytes).unwrap(), None);
        assert_eq!(
            read_symbols(&mut bytes).unwrap(),
            Some(vec![Symbol::from("single")])
        );
    }

    #[test]
    fn test_typed_reader_rejects_wrong_type() {
        let mut buf = BytesMut::new();
        crate::encoder::write_string("nope", &mut buf);
        let mut bytes = buf.freeze();
        assert!(matches!(
            read_uint(&mut bytes),
            Err(CodecError::UnexpectedEncoding { expected: "uint", .. })
        ));
    }

    #[test]
    fn test_list_header_rejects_non_list() {
        let mut bytes = Bytes::from_static(&[codes::MAP8, 1, 0]);
        assert!(matches!(
            read_list_header(&mut bytes),
            Err(CodecError::UnexpectedEncoding { expected: "list", .. })
        ));
    }

    fn nested_lists(levels: usize) -> Value {
        (1..levels).fold(Value::List(vec![]), |inner, _| Value::List(vec![inner]))
    }

    #[test]
    fn test_described_chain_depth_limited() {
        let mut raw = Vec::new();
        for _ in 0..MAX_NESTING_DEPTH + 8 {
            raw.extend_from_slice(&[codes::DESCRIBED_TYPE_INDICATOR, codes::SMALLULONG, 1]);
        }
        raw.push(codes::NULL);
        let bytes = Bytes::from(raw);

        let too_deep = Err(CodecError::NestingTooDeep {
            max: MAX_NESTING_DEPTH,
        });
        assert_eq!(decode_value(&mut bytes.clone()), too_deep);
        assert_eq!(skip_value(&mut bytes.clone()), too_deep.map(|_: Value| ()));
    }

    #[test]
    fn test_descriptor_must_be_ulong_or_symbol() {
        let mut raw = vec![codes::DESCRIBED_TYPE_INDICATOR; 65_000];
        raw.push(codes::NULL);
        let bytes = Bytes::from(raw);
        let expected = CodecError::UnexpectedEncoding {
            expected: "descriptor",
            found: codes::DESCRIBED_TYPE_INDICATOR,
        };
        assert_eq!(decode_value(&mut bytes.clone()), Err(expected.clone()));
        assert_eq!(skip_value(&mut bytes.clone()), Err(expected));

        let mut bytes = Bytes::from_static(&[
            codes::DESCRIBED_TYPE_INDICATOR,
            codes::STR8,
            1,
            b'x',
            codes::NULL,
        ]);
        assert!(matches!(
            decode_value(&mut bytes),
            Err(CodecError::UnexpectedEncoding {
                expected: "descriptor",
                found: codes::STR8
            })
        ));
    }

    #[test]
    fn test_list_nesting_depth_limited() {
        roundtrip(nested_lists(MAX_NESTING_DEPTH));

        let mut buf = BytesMut::new();
        encode_value(&nested_lists(MAX_NESTING_DEPTH + 1), &mut buf);
        assert_eq!(
            decode_value(&mut buf.freeze()),
            Err(CodecError::NestingTooDeep {
                max: MAX_NESTING_DEPTH
            })
        );
    }

    #[test]
    fn test_array_count_bounded_by_size() {
        // twenty million nulls claimed in a five byte body
        let mut bytes = Bytes::from_static(&[
            codes::ARRAY32, 0, 0, 0, 5, 0x01, 0x31, 0x2d, 0x00, codes::NULL,
        ]);
        assert!(matches!(
            decode_value(&mut bytes),
            Err(CodecError::InvalidValue(_))
        ));

        let mut bytes = Bytes::from_static(&[codes::ARRAY8, 2, 200, codes::UINT0]);
        assert!(matches!(
            decode_value(&mut bytes),
            Err(CodecError::InvalidValue(_))
        ));

        let mut bytes = Bytes::from_static(&[codes::ARRAY8, 3, 2, codes::NULL, 0xff]);
        assert!(matches!(
            decode_value(&mut bytes),
            Err(CodecError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_compact_array_elements_reencode() {
        let mut wire = Bytes::from_static(&[codes::ARRAY8, 4, 2, codes::SMALLUINT, 1, 2]);
        let decoded = decode_value(&mut wire).unwrap();
        assert!(wire.is_empty());
        let Value::Array(array) = &decoded else {
            panic!("expected an array, got {decoded:?}");
        };
        assert_eq!(array.element_code(), codes::UINT);
        assert_eq!(array.elements(), &[Value::Uint(1), Value::Uint(2)]);

        let mut buf = BytesMut::new();
        encode_value(&decoded, &mut buf);
        assert_eq!(decode_value(&mut buf.freeze()).unwrap(), decoded);

        let mut wire = Bytes::from_static(&[codes::ARRAY8, 4, 3, codes::BOOLEAN_TRUE, 0x40, 0x40]);
        assert!(decode_value(&mut wire).is_err());

        let mut wire = Bytes::from_static(&[codes::ARRAY8, 2, 2, codes::BOOLEAN_TRUE]);
        let decoded = decode_value(&mut wire).unwrap();
        let mut buf = BytesMut::new();
        encode_value(&decoded, &mut buf);
        let reread = decode_value(&mut buf.freeze()).unwrap();
        assert_eq!(reread, decoded);
        let Value::Array(array) = reread else {
            panic!("expected an array");
        };
        assert_eq!(array.elements(), &[Value::Boolean(true), Value::Boolean(true)]);
    }

    #[test]
    fn test_container_elements_bounded_by_size() {
        let mut bytes = Bytes::from_static(&[codes::LIST8, 2, 2, codes::SMALLUINT, 1, codes::SMALLUINT, 2]);
        assert!(matches!(
            decode_value(&mut bytes),
            Err(CodecError::Truncated { .. })
        ));

        let mut bytes = Bytes::from_static(&[codes::LIST8, 3, 1, codes::NULL, codes::NULL]);
        assert!(matches!(
            decode_value(&mut bytes),
            Err(CodecError::InvalidValue(_))
        ));

        let mut bytes = Bytes::from_static(&[codes::MAP8, 4, 2, codes::NULL, codes::NULL, codes::NULL]);
        assert!(matches!(
            decode_value(&mut bytes),
            Err(CodecError::InvalidValue(_))
        ));
    }
}
