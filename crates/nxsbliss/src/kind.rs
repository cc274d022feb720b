//! Value-kind tags and their storage mapping.

use std::fmt;
use std::str::FromStr;

use crate::error::Error;
use crate::store::{ElementType, Layout};
use crate::value::{Scalar, Value};

/// Closed set of semantic value kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float32,
    Float64,
    Bool,
    Text,
}

impl From<ElementType> for ValueKind {
    fn from(element: ElementType) -> Self {
        match element {
            ElementType::Int8 => ValueKind::Int8,
            ElementType::Int16 => ValueKind::Int16,
            ElementType::Int32 => ValueKind::Int32,
            ElementType::Int64 => ValueKind::Int64,
            ElementType::UInt8 => ValueKind::UInt8,
            ElementType::UInt16 => ValueKind::UInt16,
            ElementType::UInt32 => ValueKind::UInt32,
            ElementType::UInt64 => ValueKind::UInt64,
            ElementType::Float32 => ValueKind::Float32,
            ElementType::Float64 => ValueKind::Float64,
            ElementType::Bool => ValueKind::Bool,
            ElementType::Text => ValueKind::Text,
        }
    }
}

impl ValueKind {
    pub fn element_type(self) -> ElementType {
        match self {
            ValueKind::Int8 => ElementType::Int8,
            ValueKind::Int16 => ElementType::Int16,
            ValueKind::Int32 => ElementType::Int32,
            ValueKind::Int64 => ElementType::Int64,
            ValueKind::UInt8 => ElementType::UInt8,
            ValueKind::UInt16 => ElementType::UInt16,
            ValueKind::UInt32 => ElementType::UInt32,
            ValueKind::UInt64 => ElementType::UInt64,
            ValueKind::Float32 => ElementType::Float32,
            ValueKind::Float64 => ElementType::Float64,
            ValueKind::Bool => ElementType::Bool,
            ValueKind::Text => ElementType::Text,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Int8 => "int8",
            ValueKind::Int16 => "int16",
            ValueKind::Int32 => "int32",
            ValueKind::Int64 => "int64",
            ValueKind::UInt8 => "uint8",
            ValueKind::UInt16 => "uint16",
            ValueKind::UInt32 => "uint32",
            ValueKind::UInt64 => "uint64",
            ValueKind::Float32 => "float32",
            ValueKind::Float64 => "float64",
            ValueKind::Bool => "bool",
            ValueKind::Text => "string",
        }
    }

    /// Kind implied by the first element of `value`.
    pub fn infer(value: &Value) -> ValueKind {
        match value.first() {
            Some(Scalar::Bool(_)) => ValueKind::Bool,
            Some(Scalar::Int(_)) => ValueKind::Int64,
            Some(Scalar::UInt(_)) => ValueKind::UInt64,
            Some(Scalar::Text(_)) => ValueKind::Text,
            Some(Scalar::Float(_)) | None => ValueKind::Float64,
        }
    }

    /// Layout for a field of this kind holding samples of `sample` shape.
    pub fn default_layout(self, sample: &[usize]) -> Layout {
        match self {
            ValueKind::Text if sample.is_empty() => Layout::scalar(),
            _ => Layout::extensible(sample),
        }
    }

    /// Layout for a field first written from a snapshot `value`.
    pub fn snapshot_layout(self, value: &Value) -> Layout {
        match (self, value) {
            (ValueKind::Text, Value::Scalar(_)) => Layout::scalar(),
            _ => Layout::extensible_from(value.shape()),
        }
    }
}

impl FromStr for ValueKind {
    type Err = Error;

    fn from_str(tag: &str) -> Result<Self, Self::Err> {
        let kind = match tag {
            "int" | "long" | "int64" | "uint" | "NX_INT" | "NX_INT64" | "NX_POSINT" => {
                ValueKind::Int64
            }
            "int8" | "NX_INT8" => ValueKind::Int8,
            "int16" | "NX_INT16" => ValueKind::Int16,
            "int32" | "NX_INT32" => ValueKind::Int32,
            "uint8" | "NX_UINT8" => ValueKind::UInt8,
            "uint16" | "NX_UINT16" => ValueKind::UInt16,
            "uint32" | "NX_UINT32" => ValueKind::UInt32,
            "uint64" | "NX_UINT" | "NX_UINT64" => ValueKind::UInt64,
            "float" | "float32" | "NX_FLOAT32" => ValueKind::Float32,
            "float64" | "double" | "NX_FLOAT" | "NX_FLOAT64" | "NX_NUMBER" => ValueKind::Float64,
            "bool" | "NX_BOOLEAN" => ValueKind::Bool,
            "str" | "unicode" | "string" | "NX_CHAR" => ValueKind::Text,
            other => return Err(Error::UnknownKind(other.to_string())),
        };
        Ok(kind)
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
