//! Primitive leaf fields (§4.3).

use crate::column::{ColumnElement, ColumnType};
use crate::error::{FieldError, Result};
use crate::value::Value;

/// The fundamental scalar kinds. Each is trivially constructible,
/// trivially destructible, and maps 1:1 onto one packed column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrimitiveKind {
    Bool,
    Char,
    Byte,
    Int8,
    UInt8,
    Int16,
    UInt16,
    Int32,
    UInt32,
    Int64,
    UInt64,
    Float32,
    Float64,
    Index32,
    Index64,
}

impl PrimitiveKind {
    pub fn from_type_name(name: &str) -> Option<Self> {
        use PrimitiveKind::*;
        Some(match name {
            "bool" => Bool,
            "char" => Char,
            "byte" => Byte,
            "int8" => Int8,
            "uint8" => UInt8,
            "int16" => Int16,
            "uint16" => UInt16,
            "int32" => Int32,
            "uint32" => UInt32,
            "int64" => Int64,
            "uint64" => UInt64,
            "float32" => Float32,
            "float64" => Float64,
            "index32" => Index32,
            "index64" => Index64,
            _ => return None,
        })
    }

    pub fn canonical_name(self) -> &'static str {
        use PrimitiveKind::*;
        match self {
            Bool => "bool",
            Char => "char",
            Byte => "byte",
            Int8 => "int8",
            UInt8 => "uint8",
            Int16 => "int16",
            UInt16 => "uint16",
            Int32 => "int32",
            UInt32 => "uint32",
            Int64 => "int64",
            UInt64 => "uint64",
            Float32 => "float32",
            Float64 => "float64",
            Index32 => "index32",
            Index64 => "index64",
        }
    }

    /// The most compact split-encoded representation, when one exists,
    /// else the plain type.
    fn split_type(self) -> ColumnType {
        use ColumnType::*;
        use PrimitiveKind::*;
        match self {
            Bool => Bit,
            Char | Byte | Int8 => Int8,
            UInt8 => UInt8,
            Int16 => SplitInt16,
            UInt16 => SplitUInt16,
            Int32 => SplitInt32,
            UInt32 => SplitUInt32,
            Int64 => SplitInt64,
            UInt64 => SplitUInt64,
            Float32 => SplitReal32,
            Float64 => SplitReal64,
            Index32 => SplitIndex32,
            Index64 => SplitIndex64,
        }
    }

    fn plain_type(self) -> ColumnType {
        use ColumnType::*;
        use PrimitiveKind::*;
        match self {
            Bool => Bit,
            Char | Byte | Int8 => Int8,
            UInt8 => UInt8,
            Int16 => Int16,
            UInt16 => UInt16,
            Int32 => Int32,
            UInt32 => UInt32,
            Int64 => Int64,
            UInt64 => UInt64,
            Float32 => Real32,
            Float64 => Real64,
            Index32 => Index32,
            Index64 => Index64,
        }
    }

    /// The representation chosen for a fresh sink connection (§4.1,
    /// connect-to-sink step 2).
    pub fn column_type(self, use_split_encoding: bool) -> ColumnType {
        if use_split_encoding {
            self.split_type()
        } else {
            self.plain_type()
        }
    }

    pub fn default_value(self) -> Value {
        use PrimitiveKind::*;
        match self {
            Bool => Value::Bool(false),
            Char | Byte | Int8 => Value::Int8(0),
            UInt8 => Value::UInt8(0),
            Int16 => Value::Int16(0),
            UInt16 => Value::UInt16(0),
            Int32 => Value::Int32(0),
            UInt32 => Value::UInt32(0),
            Int64 => Value::Int64(0),
            UInt64 => Value::UInt64(0),
            Float32 => Value::Float32(0.0),
            Float64 => Value::Float64(0.0),
            Index32 => Value::Index32(0),
            Index64 => Value::Index64(0),
        }
    }

    pub fn value_size(self) -> usize {
        use PrimitiveKind::*;
        match self {
            Bool | Char | Byte | Int8 | UInt8 => 1,
            Int16 | UInt16 => 2,
            Int32 | UInt32 | Float32 | Index32 => 4,
            Int64 | UInt64 | Float64 | Index64 => 8,
        }
    }

    pub fn alignment(self) -> usize {
        self.value_size()
    }

    /// Converts `value` into this kind's packed column element (§4.1,
    /// "Append"). A value of the wrong shape is an invalid-argument error
    /// (§7, "incompatible cast"), not a panic — the same convention every
    /// other field kind follows for a caller-supplied value mismatch.
    pub fn to_element(self, value: &Value, field_name: &str) -> Result<ColumnElement> {
        Ok(match (self, value) {
            (PrimitiveKind::Bool, Value::Bool(v)) => ColumnElement::Bit(*v),
            (PrimitiveKind::Char, Value::Int8(v))
            | (PrimitiveKind::Byte, Value::Int8(v))
            | (PrimitiveKind::Int8, Value::Int8(v)) => ColumnElement::Int8(*v),
            (PrimitiveKind::UInt8, Value::UInt8(v)) => ColumnElement::UInt8(*v),
            (PrimitiveKind::Int16, Value::Int16(v)) => ColumnElement::Int16(*v),
            (PrimitiveKind::UInt16, Value::UInt16(v)) => ColumnElement::UInt16(*v),
            (PrimitiveKind::Int32, Value::Int32(v)) => ColumnElement::Int32(*v),
            (PrimitiveKind::UInt32, Value::UInt32(v)) => ColumnElement::UInt32(*v),
            (PrimitiveKind::Int64, Value::Int64(v)) => ColumnElement::Int64(*v),
            (PrimitiveKind::UInt64, Value::UInt64(v)) => ColumnElement::UInt64(*v),
            (PrimitiveKind::Float32, Value::Float32(v)) => ColumnElement::Real32(*v),
            (PrimitiveKind::Float64, Value::Float64(v)) => ColumnElement::Real64(*v),
            (PrimitiveKind::Index32, Value::Index32(v)) => ColumnElement::Index32(*v),
            (PrimitiveKind::Index64, Value::Index64(v)) => ColumnElement::Index64(*v),
            _ => return Err(FieldError::invalid_argument(field_name, format!("value does not match primitive kind {self:?}"))),
        })
    }

    /// The inverse of [`PrimitiveKind::to_element`] (§4.1, "Read").
    pub fn from_element(self, element: ColumnElement, field_name: &str) -> Result<Value> {
        Ok(match (self, element) {
            (PrimitiveKind::Bool, ColumnElement::Bit(v)) => Value::Bool(v),
            (PrimitiveKind::Char | PrimitiveKind::Byte | PrimitiveKind::Int8, ColumnElement::Int8(v)) => Value::Int8(v),
            (PrimitiveKind::UInt8, ColumnElement::UInt8(v)) => Value::UInt8(v),
            (PrimitiveKind::Int16, ColumnElement::Int16(v)) => Value::Int16(v),
            (PrimitiveKind::UInt16, ColumnElement::UInt16(v)) => Value::UInt16(v),
            (PrimitiveKind::Int32, ColumnElement::Int32(v)) => Value::Int32(v),
            (PrimitiveKind::UInt32, ColumnElement::UInt32(v)) => Value::UInt32(v),
            (PrimitiveKind::Int64, ColumnElement::Int64(v)) => Value::Int64(v),
            (PrimitiveKind::UInt64, ColumnElement::UInt64(v)) => Value::UInt64(v),
            (PrimitiveKind::Float32, ColumnElement::Real32(v)) => Value::Float32(v),
            (PrimitiveKind::Float64, ColumnElement::Real64(v)) => Value::Float64(v),
            (PrimitiveKind::Index32, ColumnElement::Index32(v)) => Value::Index32(v),
            (PrimitiveKind::Index64, ColumnElement::Index64(v)) => Value::Index64(v),
            _ => return Err(FieldError::invalid_argument(field_name, format!("element does not match primitive kind {self:?}"))),
        })
    }
}
