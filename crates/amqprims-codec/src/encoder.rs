//! Encoding of AMQP values into a byte buffer.
//!
//! Every writer emits a constructor byte followed by the value body. Integer
//! writers pick the most compact encoding available for the value.

use bytes::{BufMut, BytesMut};

use crate::codes;
use crate::value::{Array, Descriptor, Symbol, Timestamp, Uuid, Value};

pub fn write_null(dst: &mut BytesMut) {
    dst.put_u8(codes::NULL);
}

pub fn write_bool(value: bool, dst: &mut BytesMut) {
    dst.put_u8(if value {
        codes::BOOLEAN_TRUE
    } else {
        codes::BOOLEAN_FALSE
    });
}

pub fn write_ubyte(value: u8, dst: &mut BytesMut) {
    dst.put_u8(codes::UBYTE);
    dst.put_u8(value);
}

pub fn write_ushort(value: u16, dst: &mut BytesMut) {
    dst.put_u8(codes::USHORT);
    dst.put_u16(value);
}

pub fn write_uint(value: u32, dst: &mut BytesMut) {
    match value {
        0 => dst.put_u8(codes::UINT0),
        1..=255 => {
            dst.put_u8(codes::SMALLUINT);
            dst.put_u8(value as u8);
        }
        _ => {
            dst.put_u8(codes::UINT);
            dst.put_u32(value);
        }
    }
}

pub fn write_ulong(value: u64, dst: &mut BytesMut) {
    match value {
        0 => dst.put_u8(codes::ULONG0),
        1..=255 => {
            dst.put_u8(codes::SMALLULONG);
            dst.put_u8(value as u8);
        }
        _ => {
            dst.put_u8(codes::ULONG);
            dst.put_u64(value);
        }
    }
}

pub fn write_byte(value: i8, dst: &mut BytesMut) {
    dst.put_u8(codes::BYTE);
    dst.put_i8(value);
}

pub fn write_short(value: i16, dst: &mut BytesMut) {
    dst.put_u8(codes::SHORT);
    dst.put_i16(value);
}

pub fn write_int(value: i32, dst: &mut BytesMut) {
    if let Ok(small) = i8::try_from(value) {
        dst.put_u8(codes::SMALLINT);
        dst.put_i8(small);
    } else {
        dst.put_u8(codes::INT);
        dst.put_i32(value);
    }
}

pub fn write_long(value: i64, dst: &mut BytesMut) {
    if let Ok(small) = i8::try_from(value) {
        dst.put_u8(codes::SMALLLONG);
        dst.put_i8(small);
    } else {
        dst.put_u8(codes::LONG);
        dst.put_i64(value);
    }
}

pub fn write_float(value: f32, dst: &mut BytesMut) {
    dst.put_u8(codes::FLOAT);
    dst.put_f32(value);
}

pub fn write_double(value: f64, dst: &mut BytesMut) {
    dst.put_u8(codes::DOUBLE);
    dst.put_f64(value);
}

/// Chars travel as a single 4-byte UTF-32 code unit.
pub fn write_char(value: char, dst: &mut BytesMut) {
    dst.put_u8(codes::CHAR);
    dst.put_u32(value as u32);
}

pub fn write_timestamp(value: Timestamp, dst: &mut BytesMut) {
    dst.put_u8(codes::TIMESTAMP);
    dst.put_i64(value.0);
}

pub fn write_uuid(value: &Uuid, dst: &mut BytesMut) {
    dst.put_u8(codes::UUID);
    dst.put_slice(&value.0);
}

pub fn write_binary(value: &[u8], dst: &mut BytesMut) {
    write_variable(codes::VBIN8, codes::VBIN32, value, dst);
}

pub fn write_string(value: &str, dst: &mut BytesMut) {
    write_variable(codes::STR8, codes::STR32, value.as_bytes(), dst);
}

pub fn write_symbol(value: &Symbol, dst: &mut BytesMut) {
    write_variable(codes::SYM8, codes::SYM32, value.as_str().as_bytes(), dst);
}

fn write_variable(narrow: u8, wide: u8, bytes: &[u8], dst: &mut BytesMut) {
    if bytes.len() <= u8::MAX as usize {
        dst.put_u8(narrow);
        dst.put_u8(bytes.len() as u8);
    } else {
        dst.put_u8(wide);
        dst.put_u32(bytes.len() as u32);
    }
    dst.put_slice(bytes);
}

/// Write the described-type preamble: indicator byte plus descriptor.
pub fn write_descriptor(descriptor: &Descriptor, dst: &mut BytesMut) {
    dst.put_u8(codes::DESCRIBED_TYPE_INDICATOR);
    match descriptor {
        Descriptor::Code(code) => write_ulong(*code, dst),
        Descriptor::Symbol(symbol) => write_symbol(symbol, dst),
    }
}

/// Write a list container around `count` already-encoded elements.
pub fn write_list_raw(count: usize, body: &[u8], dst: &mut BytesMut) {
    if count == 0 {
        dst.put_u8(codes::LIST0);
    } else {
        write_compound(codes::LIST8, codes::LIST32, count, body, dst);
    }
}

/// Write a map container around `count` already-encoded keys and values.
pub fn write_map_raw(count: usize, body: &[u8], dst: &mut BytesMut) {
    write_compound(codes::MAP8, codes::MAP32, count, body, dst);
}

fn write_compound(narrow: u8, wide: u8, count: usize, body: &[u8], dst: &mut BytesMut) {
    // size covers the count field and the body
    if body.len() + 1 <= u8::MAX as usize && count <= u8::MAX as usize {
        dst.put_u8(narrow);
        dst.put_u8((body.len() + 1) as u8);
        dst.put_u8(count as u8);
    } else {
        dst.put_u8(wide);
        dst.put_u32((body.len() + 4) as u32);
        dst.put_u32(count as u32);
    }
    dst.put_slice(body);
}

pub fn write_list(values: &[Value], dst: &mut BytesMut) {
    let mut body = BytesMut::new();
    for value in values {
        encode_value(value, &mut body);
    }
    write_list_raw(values.len(), &body, dst);
}

pub fn write_map(entries: &[(Value, Value)], dst: &mut BytesMut) {
    let mut body = BytesMut::new();
    for (key, value) in entries {
        encode_value(key, &mut body);
        encode_value(value, &mut body);
    }
    write_map_raw(entries.len() * 2, &body, dst);
}

/// Write a symbol-keyed map.
pub fn write_fields(entries: &[(Symbol, Value)], dst: &mut BytesMut) {
    let mut body = BytesMut::new();
    for (key, value) in entries {
        write_symbol(key, &mut body);
        encode_value(value, &mut body);
    }
    write_map_raw(entries.len() * 2, &body, dst);
}

pub fn write_symbol_array(symbols: &[Symbol], dst: &mut BytesMut) {
    write_array(&Array::of_symbols(symbols), dst);
}

/// Write an array: one shared constructor then each element body back to back.
pub fn write_array(array: &Array, dst: &mut BytesMut) {
    let mut body = BytesMut::new();
    if let Some(descriptor) = array.descriptor() {
        write_descriptor(descriptor, &mut body);
    }
    body.put_u8(array.element_code());
    for element in array.elements() {
        write_element_body(array.element_code(), element, &mut body);
    }

    let count = array.len();
    if body.len() + 1 <= u8::MAX as usize && count <= u8::MAX as usize {
        dst.put_u8(codes::ARRAY8);
        dst.put_u8((body.len() + 1) as u8);
        dst.put_u8(count as u8);
    } else {
        dst.put_u8(codes::ARRAY32);
        dst.put_u32((body.len() + 4) as u32);
        dst.put_u32(count as u32);
    }
    dst.put_slice(&body);
}

/// Write an element body (no constructor) using the array's shared code.
fn write_element_body(code: u8, value: &Value, dst: &mut BytesMut) {
    let mut scratch = BytesMut::new();
    match value {
        Value::Null => {}
        Value::Boolean(v) => dst.put_u8(u8::from(*v)),
        Value::Ubyte(v) => dst.put_u8(*v),
        Value::Ushort(v) => dst.put_u16(*v),
        Value::Uint(v) => dst.put_u32(*v),
        Value::Ulong(v) => dst.put_u64(*v),
        Value::Byte(v) => dst.put_i8(*v),
        Value::Short(v) => dst.put_i16(*v),
        Value::Int(v) => dst.put_i32(*v),
        Value::Long(v) => dst.put_i64(*v),
        Value::Float(v) => dst.put_f32(*v),
        Value::Double(v) => dst.put_f64(*v),
        Value::Decimal32(v) => dst.put_slice(v),
        Value::Decimal64(v) => dst.put_slice(v),
        Value::Decimal128(v) => dst.put_slice(v),
        Value::Char(v) => dst.put_u32(*v as u32),
        Value::Timestamp(v) => dst.put_i64(v.0),
        Value::Uuid(v) => dst.put_slice(&v.0),
        Value::Binary(v) => put_sized(code, v, dst),
        Value::String(v) => put_sized(code, v.as_bytes(), dst),
        Value::Symbol(v) => put_sized(code, v.as_str().as_bytes(), dst),
        Value::List(values) => {
            write_list(values, &mut scratch);
            strip_to_wide_body(&scratch, codes::LIST32, dst);
        }
        Value::Map(entries) => {
            write_map(entries, &mut scratch);
            strip_to_wide_body(&scratch, codes::MAP32, dst);
        }
        Value::Array(inner) => {
            write_array(inner, &mut scratch);
            strip_to_wide_body(&scratch, codes::ARRAY32, dst);
        }
        Value::Described(_, inner) => write_element_body(code, inner, dst),
    }
}

fn put_sized(code: u8, bytes: &[u8], dst: &mut BytesMut) {
    if codes::is_narrow_variable(code) {
        dst.put_u8(bytes.len() as u8);
    } else {
        dst.put_u32(bytes.len() as u32);
    }
    dst.put_slice(bytes);
}

/// Re-emit a compound encoding in its 32-bit form without the constructor.
fn strip_to_wide_body(encoded: &[u8], wide: u8, dst: &mut BytesMut) {
    match encoded.first().copied() {
        Some(codes::LIST0) => {
            dst.put_u32(4);
            dst.put_u32(0);
        }
        Some(code) if code == wide => dst.put_slice(&encoded[1..]),
        Some(_) if encoded.len() >= 3 => {
            let count = encoded[2] as u32;
            let body = &encoded[3..];
            dst.put_u32(body.len() as u32 + 4);
            dst.put_u32(count);
            dst.put_slice(body);
        }
        _ => {}
    }
}

/// Encode any value with its constructor.
pub fn encode_value(value: &Value, dst: &mut BytesMut) {
    match value {
        Value::Null => write_null(dst),
        Value::Boolean(v) => write_bool(*v, dst),
        Value::Ubyte(v) => write_ubyte(*v, dst),
        Value::Ushort(v) => write_ushort(*v, dst),
        Value::Uint(v) => write_uint(*v, dst),
        Value::Ulong(v) => write_ulong(*v, dst),
        Value::Byte(v) => write_byte(*v, dst),
        Value::Short(v) => write_short(*v, dst),
        Value::Int(v) => write_int(*v, dst),
        Value::Long(v) => write_long(*v, dst),
        Value::Float(v) => write_float(*v, dst),
        Value::Double(v) => write_double(*v, dst),
        Value::Decimal32(v) => {
            dst.put_u8(codes::DECIMAL32);
            dst.put_slice(v);
        }
        Value::Decimal64(v) => {
            dst.put_u8(codes::DECIMAL64);
            dst.put_slice(v);
        }
        Value::Decimal128(v) => {
            dst.put_u8(codes::DECIMAL128);
            dst.put_slice(v);
        }
        Value::Char(v) => write_char(*v, dst),
        Value::Timestamp(v) => write_timestamp(*v, dst),
        Value::Uuid(v) => write_uuid(v, dst),
        Value::Binary(v) => write_binary(v, dst),
        Value::String(v) => write_string(v, dst),
        Value::Symbol(v) => write_symbol(v, dst),
        Value::List(values) => write_list(values, dst),
        Value::Map(entries) => write_map(entries, dst),
        Value::Array(array) => write_array(array, dst),
        Value::Described(descriptor, inner) => {
            write_descriptor(descriptor, dst);
            encode_value(inner, dst);
        }
    }
}
