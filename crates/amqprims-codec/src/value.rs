//! The AMQP type system as Rust values.

use std::fmt;

use bytes::Bytes;

use crate::codes;
use crate::error::{CodecError, Result};

/// Ordered map with arbitrary keys (`map` in the AMQP type system).
pub type Map = Vec<(Value, Value)>;

/// Symbol-keyed map used for properties and node properties.
pub type Fields = Vec<(Symbol, Value)>;

/// An AMQP symbol: a constrained ASCII string used for identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Symbol(String);

impl Symbol {
    /// Create a new symbol.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The symbol text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Length of the symbol in bytes.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether the symbol is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for Symbol {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Symbol {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A 128-bit UUID in network byte order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Uuid(pub [u8; 16]);

/// Milliseconds since the Unix epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Timestamp(pub i64);

/// Descriptor of a described type: numeric code or symbolic name.
#[derive(Debug, Clone, PartialEq)]
pub enum Descriptor {
    Code(u64),
    Symbol(Symbol),
}

impl Descriptor {
    /// True when this descriptor names the given code or symbol.
    pub fn matches(&self, code: u64, symbol: &str) -> bool {
        match self {
            Descriptor::Code(value) => *value == code,
            Descriptor::Symbol(value) => value.as_str() == symbol,
        }
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Descriptor::Code(code) => write!(f, "0x{code:016x}"),
            Descriptor::Symbol(symbol) => write!(f, "{symbol}"),
        }
    }
}

/// A homogeneous AMQP array: every element shares one constructor.
#[derive(Debug, Clone, PartialEq)]
pub struct Array {
    element_code: u8,
    descriptor: Option<Descriptor>,
    elements: Vec<Value>,
}

impl Array {
    /// Build an array from primitive elements, inferring the shared constructor.
    ///
    /// An empty element list produces an untyped (null-constructor) array.
    pub fn new(elements: Vec<Value>) -> Result<Self> {
        let element_code = match elements.first() {
            Some(first) => array_code_for(first, &elements)?,
            None => codes::NULL,
        };
        for element in &elements {
            if array_code_for(element, &elements)? != element_code {
                return Err(CodecError::InvalidValue(
                    "array elements must share one type".to_string(),
                ));
            }
        }
        Ok(Self {
            element_code,
            descriptor: None,
            elements,
        })
    }

    /// Build an array of symbols; an empty list still carries the symbol constructor.
    pub fn of_symbols(symbols: &[Symbol]) -> Self {
        let wide = symbols.iter().any(|s| s.len() > u8::MAX as usize);
        Self {
            element_code: if wide { codes::SYM32 } else { codes::SYM8 },
            descriptor: None,
            elements: symbols.iter().cloned().map(Value::Symbol).collect(),
        }
    }

    /// Build an array of described elements sharing one descriptor.
    pub fn described(descriptor: Descriptor, elements: Vec<Value>) -> Result<Self> {
        let mut array = Self::new(elements)?;
        array.descriptor = Some(descriptor);
        Ok(array)
    }

    pub(crate) fn from_parts(
        element_code: u8,
        descriptor: Option<Descriptor>,
        elements: Vec<Value>,
    ) -> Self {
        Self {
            element_code,
            descriptor,
            elements,
        }
    }

    /// Encoding code shared by every element.
    pub fn element_code(&self) -> u8 {
        self.element_code
    }

    /// Descriptor shared by every element, for arrays of described types.
    pub fn descriptor(&self) -> Option<&Descriptor> {
        self.descriptor.as_ref()
    }

    /// The array elements.
    pub fn elements(&self) -> &[Value] {
        &self.elements
    }

    /// Consume the array returning its elements.
    pub fn into_elements(self) -> Vec<Value> {
        self.elements
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}

/// Pick the single constructor used for every element of an array.
///
/// Fixed-width types use their full-width code; variable-width types use the
/// 32-bit form when any element of the array needs it.
fn array_code_for(value: &Value, all: &[Value]) -> Result<u8> {
    let needs_wide = |limit: usize| all.iter().any(|v| v.variable_len() > limit);
    let code = match value {
        Value::Null => codes::NULL,
        Value::Boolean(_) => codes::BOOLEAN,
        Value::Ubyte(_) => codes::UBYTE,
        Value::Ushort(_) => codes::USHORT,
        Value::Uint(_) => codes::UINT,
        Value::Ulong(_) => codes::ULONG,
        Value::Byte(_) => codes::BYTE,
        Value::Short(_) => codes::SHORT,
        Value::Int(_) => codes::INT,
        Value::Long(_) => codes::LONG,
        Value::Float(_) => codes::FLOAT,
        Value::Double(_) => codes::DOUBLE,
        Value::Decimal32(_) => codes::DECIMAL32,
        Value::Decimal64(_) => codes::DECIMAL64,
        Value::Decimal128(_) => codes::DECIMAL128,
        Value::Char(_) => codes::CHAR,
        Value::Timestamp(_) => codes::TIMESTAMP,
        Value::Uuid(_) => codes::UUID,
        Value::Binary(_) if needs_wide(u8::MAX as usize) => codes::VBIN32,
        Value::Binary(_) => codes::VBIN8,
        Value::String(_) if needs_wide(u8::MAX as usize) => codes::STR32,
        Value::String(_) => codes::STR8,
        Value::Symbol(_) if needs_wide(u8::MAX as usize) => codes::SYM32,
        Value::Symbol(_) => codes::SYM8,
        Value::List(_) => codes::LIST32,
        Value::Map(_) => codes::MAP32,
        Value::Array(_) => codes::ARRAY32,
        Value::Described(..) => {
            return Err(CodecError::InvalidValue(
                "use Array::described for described elements".to_string(),
            ))
        }
    };
    Ok(code)
}

/// Any value expressible in the AMQP type system.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Boolean(bool),
    Ubyte(u8),
    Ushort(u16),
    Uint(u32),
    Ulong(u64),
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Decimal32([u8; 4]),
    Decimal64([u8; 8]),
    Decimal128([u8; 16]),
    Char(char),
    Timestamp(Timestamp),
    Uuid(Uuid),
    Binary(Bytes),
    String(String),
    Symbol(Symbol),
    List(Vec<Value>),
    Map(Map),
    Array(Array),
    Described(Box<Descriptor>, Box<Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Byte length of variable-width payloads (binary, string, symbol).
    fn variable_len(&self) -> usize {
        match self {
            Value::Binary(b) => b.len(),
            Value::String(s) => s.len(),
            Value::Symbol(s) => s.len(),
            _ => 0,
        }
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::String(value.to_string())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::String(value)
    }
}

impl From<Symbol> for Value {
    fn from(value: Symbol) -> Self {
        Value::Symbol(value)
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Boolean(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Uint(value)
    }
}

impl From<u64> for Value {
    fn from(value: u64) -> Self {
        Value::Ulong(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value)
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Long(value)
    }
}

impl From<Bytes> for Value {
    fn from(value: Bytes) -> Self {
        Value::Binary(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_array_infers_narrow_symbol_code() {
        let array = Array::new(vec![Value::Symbol("a".into()), Value::Symbol("b".into())]).unwrap();
        assert_eq!(array.element_code(), codes::SYM8);
        assert_eq!(array.len(), 2);
    }

    #[test]
    fn test_array_widens_when_any_element_is_long() {
        let long = "x".repeat(300);
        let array = Array::new(vec![Value::from("a"), Value::from(long)]).unwrap();
        assert_eq!(array.element_code(), codes::STR32);
    }

    #[test]
    fn test_array_rejects_mixed_types() {
        let result = Array::new(vec![Value::Uint(1), Value::from("a")]);
        assert!(matches!(result, Err(CodecError::InvalidValue(_))));
    }

    #[test]
    fn test_empty_symbol_array_keeps_constructor() {
        let array = Array::of_symbols(&[]);
        assert!(array.is_empty());
        assert_eq!(array.element_code(), codes::SYM8);
    }

    #[test]
    fn test_descriptor_matching() {
        assert!(Descriptor::Code(0x10).matches(0x10, "amqp:open:list"));
        assert!(Descriptor::Symbol("amqp:open:list".into()).matches(0x10, "amqp:open:list"));
        assert!(!Descriptor::Code(0x11).matches(0x10, "amqp:open:list"));
    }
}
