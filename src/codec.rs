//! Conversion between register bytes and typed values.
//!
//! Registers are big-endian.
//! Logical 8 and 16 bit values always occupy one full 2-byte register.

use std::{fmt::Display, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Bit-level access inside register words.
pub mod bits;

/// The type of a device value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    /// A boolean, stored as 0 or 1.
    Bool,
    /// Signed 8 bit.
    Int8,
    /// Unsigned 8 bit.
    Uint8,
    /// Signed 16 bit.
    Int16,
    /// Unsigned 16 bit.
    Uint16,
    /// Signed 32 bit.
    Int32,
    /// Unsigned 32 bit.
    Uint32,
    /// Signed 64 bit.
    Int64,
    /// Unsigned 64 bit.
    Uint64,
    /// IEEE-754 single precision.
    Float32,
    /// IEEE-754 double precision.
    Float64,
    /// Text. Has no register representation.
    String,
}

impl ValueType {
    fn name(&self) -> &'static str {
        match self {
            ValueType::Bool => "bool",
            ValueType::Int8 => "int8",
            ValueType::Uint8 => "uint8",
            ValueType::Int16 => "int16",
            ValueType::Uint16 => "uint16",
            ValueType::Int32 => "int32",
            ValueType::Uint32 => "uint32",
            ValueType::Int64 => "int64",
            ValueType::Uint64 => "uint64",
            ValueType::Float32 => "float32",
            ValueType::Float64 => "float64",
            ValueType::String => "string",
        }
    }
}

impl Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ValueType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "bool" => Self::Bool,
            "int8" => Self::Int8,
            "uint8" => Self::Uint8,
            "int16" => Self::Int16,
            "uint16" => Self::Uint16,
            "int32" => Self::Int32,
            "uint32" => Self::Uint32,
            "int64" => Self::Int64,
            "uint64" => Self::Uint64,
            "float32" => Self::Float32,
            "float64" => Self::Float64,
            "string" => Self::String,
            other => return Err(Error::UnsupportedType(other.into())),
        })
    }
}

/// A typed device value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    /// A boolean.
    Bool(bool),
    /// Signed 8 bit.
    I8(i8),
    /// Unsigned 8 bit.
    U8(u8),
    /// Signed 16 bit.
    I16(i16),
    /// Unsigned 16 bit.
    U16(u16),
    /// Signed 32 bit.
    I32(i32),
    /// Unsigned 32 bit.
    U32(u32),
    /// Signed 64 bit.
    I64(i64),
    /// Unsigned 64 bit.
    U64(u64),
    /// Single precision float.
    F32(f32),
    /// Double precision float.
    F64(f64),
    /// Text, only usable as input when it holds a number.
    Text(String),
}

/// Intermediate form for coercing between value types.
#[derive(Debug, Clone, Copy)]
enum Number {
    Integer(i128),
    Float(f64),
}

impl Number {
    fn of(value: &Value) -> Result<Self, Error> {
        Ok(match value {
            Value::Bool(b) => Number::Integer(i128::from(*b)),
            Value::I8(v) => Number::Integer(i128::from(*v)),
            Value::U8(v) => Number::Integer(i128::from(*v)),
            Value::I16(v) => Number::Integer(i128::from(*v)),
            Value::U16(v) => Number::Integer(i128::from(*v)),
            Value::I32(v) => Number::Integer(i128::from(*v)),
            Value::U32(v) => Number::Integer(i128::from(*v)),
            Value::I64(v) => Number::Integer(i128::from(*v)),
            Value::U64(v) => Number::Integer(i128::from(*v)),
            Value::F32(v) => Number::Float(f64::from(*v)),
            Value::F64(v) => Number::Float(*v),
            Value::Text(text) => {
                let text = text.trim();

                if let Ok(integer) = text.parse::<i128>() {
                    Number::Integer(integer)
                } else if let Ok(float) = text.parse::<f64>() {
                    Number::Float(float)
                } else {
                    match text {
                        "true" => Number::Integer(1),
                        "false" => Number::Integer(0),
                        _ => return Err(Error::NotNumeric(text.into())),
                    }
                }
            }
        })
    }

    fn as_bool(self) -> bool {
        match self {
            Number::Integer(i) => i != 0,
            Number::Float(f) => f != 0.0,
        }
    }

    fn as_f64(self) -> f64 {
        match self {
            Number::Integer(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

/// Integers saturate into the target range, floats truncate toward zero and saturate.
macro_rules! saturate {
    ($number:expr, $target:ty) => {
        match $number {
            Number::Integer(i) => i.clamp(<$target>::MIN as i128, <$target>::MAX as i128) as $target,
            Number::Float(f) => f as $target,
        }
    };
}

/// How many bytes a value of this type occupies on the wire.
pub fn width_of(value_type: ValueType) -> Result<usize, Error> {
    match value_type {
        ValueType::Bool
        | ValueType::Int8
        | ValueType::Uint8
        | ValueType::Int16
        | ValueType::Uint16 => Ok(2),
        ValueType::Int32 | ValueType::Uint32 | ValueType::Float32 => Ok(4),
        ValueType::Int64 | ValueType::Uint64 | ValueType::Float64 => Ok(8),
        ValueType::String => Err(Error::UnsupportedType(value_type.to_string())),
    }
}

/// Registers needed to hold `bits` bits.
pub fn registers_for_bits(bits: usize) -> usize {
    (bits + 15) / 16
}

/// Bytes needed to hold `bits` bits.
pub fn bytes_for_bits(bits: usize) -> usize {
    (bits + 7) / 8
}

/// Interpret big-endian register bytes as a value.
/// Only the first [`width_of`] bytes are looked at.
pub fn decode(bytes: &[u8], value_type: ValueType) -> Result<Value, Error> {
    let width = width_of(value_type)?;

    let bytes = bytes.get(..width).ok_or_else(|| {
        Error::InvalidParameters(format!(
            "{value_type} needs {width} bytes, got {}",
            bytes.len()
        ))
    })?;

    let mut buffer = [0u8; 8];
    buffer[8 - width..].copy_from_slice(bytes);
    let raw = u64::from_be_bytes(buffer);

    Ok(match value_type {
        ValueType::Bool => Value::Bool(raw != 0),
        ValueType::Int8 => Value::I8(raw as u8 as i8),
        ValueType::Uint8 => Value::U8(raw as u8),
        ValueType::Int16 => Value::I16(raw as u16 as i16),
        ValueType::Uint16 => Value::U16(raw as u16),
        ValueType::Int32 => Value::I32(raw as u32 as i32),
        ValueType::Uint32 => Value::U32(raw as u32),
        ValueType::Int64 => Value::I64(raw as i64),
        ValueType::Uint64 => Value::U64(raw),
        ValueType::Float32 => Value::F32(f32::from_bits(raw as u32)),
        ValueType::Float64 => Value::F64(f64::from_bits(raw)),
        ValueType::String => return Err(Error::UnsupportedType(value_type.to_string())),
    })
}

/// Coerce a value to the given type and write it as big-endian register bytes.
pub fn encode(value: &Value, value_type: ValueType) -> Result<Vec<u8>, Error> {
    let width = width_of(value_type)?;
    let number = Number::of(value)?;

    let raw: u64 = match value_type {
        ValueType::Bool => u64::from(number.as_bool()),
        // Sign extended into the register.
        ValueType::Int8 => u64::from(i16::from(saturate!(number, i8)) as u16),
        ValueType::Uint8 => u64::from(saturate!(number, u8)),
        ValueType::Int16 => u64::from(saturate!(number, i16) as u16),
        ValueType::Uint16 => u64::from(saturate!(number, u16)),
        ValueType::Int32 => u64::from(saturate!(number, i32) as u32),
        ValueType::Uint32 => u64::from(saturate!(number, u32)),
        ValueType::Int64 => saturate!(number, i64) as u64,
        ValueType::Uint64 => saturate!(number, u64),
        ValueType::Float32 => u64::from((number.as_f64() as f32).to_bits()),
        ValueType::Float64 => number.as_f64().to_bits(),
        ValueType::String => return Err(Error::UnsupportedType(value_type.to_string())),
    };

    Ok(raw.to_be_bytes()[8 - width..].to_vec())
}

/// Permute bytes according to a letter order such as `"CDAB"`.
///
/// Letter `A` names position 0, `B` position 1 and so on up to `H`.
/// Byte `i` of the input is moved to the position named by letter `i` of the order.
/// `"ABCD"` is the identity, `"CDAB"` swaps the two words of a 32 bit value.
pub fn reorder(bytes: &[u8], order: &str) -> Result<Vec<u8>, Error> {
    if order.len() != bytes.len() {
        return Err(Error::InvalidByteOrder(format!(
            "order `{order}` has {} letters for {} bytes",
            order.len(),
            bytes.len()
        )));
    }

    let mut result = vec![0u8; bytes.len()];
    let mut seen = vec![false; bytes.len()];

    for (byte, letter) in bytes.iter().zip(order.chars()) {
        let position = match letter {
            'A'..='H' => letter as usize - 'A' as usize,
            _ => {
                return Err(Error::InvalidByteOrder(format!(
                    "`{letter}` in `{order}` is not one of A to H"
                )))
            }
        };

        match seen.get_mut(position) {
            Some(slot) if !*slot => *slot = true,
            Some(_) => {
                return Err(Error::InvalidByteOrder(format!(
                    "`{letter}` appears twice in `{order}`"
                )))
            }
            None => {
                return Err(Error::InvalidByteOrder(format!(
                    "`{letter}` in `{order}` is outside {} bytes",
                    bytes.len()
                )))
            }
        }

        result[position] = *byte;
    }

    Ok(result)
}
