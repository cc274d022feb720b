//! Element types to HDF5 datatypes, and scalars to little-endian bytes.
//! Text is stored as variable-length strings, resolved by the file store.

use byteorder::{ByteOrder, LittleEndian};
use nxsbliss_format::{Dataspace, Datatype};

use crate::value::Scalar;

use super::ElementType;

pub(crate) fn datatype(element: ElementType) -> Datatype {
    match element {
        ElementType::Int8 => Datatype::Integer { size: 1, signed: true },
        ElementType::Int16 => Datatype::Integer { size: 2, signed: true },
        ElementType::Int32 => Datatype::Integer { size: 4, signed: true },
        ElementType::Int64 => Datatype::Integer { size: 8, signed: true },
        ElementType::UInt8 => Datatype::Integer { size: 1, signed: false },
        ElementType::UInt16 => Datatype::Integer { size: 2, signed: false },
        ElementType::UInt32 => Datatype::Integer { size: 4, signed: false },
        ElementType::UInt64 => Datatype::Integer { size: 8, signed: false },
        ElementType::Float32 => Datatype::Float { size: 4 },
        ElementType::Float64 => Datatype::Float { size: 8 },
        ElementType::Bool => Datatype::Boolean,
        ElementType::Text => Datatype::VarString,
    }
}

/// Element type of a datatype read back from a file.
pub(crate) fn element_type(datatype: &Datatype) -> ElementType {
    match *datatype {
        Datatype::Integer { size: 1, signed: true } => ElementType::Int8,
        Datatype::Integer { size: 2, signed: true } => ElementType::Int16,
        Datatype::Integer { size: 4, signed: true } => ElementType::Int32,
        Datatype::Integer { signed: true, .. } => ElementType::Int64,
        Datatype::Integer { size: 1, .. } => ElementType::UInt8,
        Datatype::Integer { size: 2, .. } => ElementType::UInt16,
        Datatype::Integer { size: 4, .. } => ElementType::UInt32,
        Datatype::Integer { .. } => ElementType::UInt64,
        Datatype::Float { size: 4 } => ElementType::Float32,
        Datatype::Float { .. } => ElementType::Float64,
        Datatype::Boolean => ElementType::Bool,
        Datatype::VarString => ElementType::Text,
    }
}

pub(crate) fn dims(shape: &[usize]) -> Vec<u64> {
    shape.iter().map(|&d| d as u64).collect()
}

pub(crate) fn shape(dims: &[u64]) -> Vec<usize> {
    dims.iter().map(|&d| d as usize).collect()
}

pub(crate) fn dataspace(shape: &[usize]) -> Dataspace {
    Dataspace::of(&dims(shape))
}

/// Little-endian bytes of already coerced scalars. Text is not handled
/// here.
pub(crate) fn encode(element: ElementType, data: &[Scalar]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(data.len() * datatype(element).element_size());
    for s in data {
        let int = s.as_i64().unwrap_or_default();
        let uint = s.as_u64().unwrap_or_default();
        match element {
            ElementType::Int8 => raw.extend_from_slice(&(int as i8).to_le_bytes()),
            ElementType::Int16 => raw.extend_from_slice(&(int as i16).to_le_bytes()),
            ElementType::Int32 => raw.extend_from_slice(&(int as i32).to_le_bytes()),
            ElementType::Int64 => raw.extend_from_slice(&int.to_le_bytes()),
            ElementType::UInt8 => raw.push(uint as u8),
            ElementType::UInt16 => raw.extend_from_slice(&(uint as u16).to_le_bytes()),
            ElementType::UInt32 => raw.extend_from_slice(&(uint as u32).to_le_bytes()),
            ElementType::UInt64 => raw.extend_from_slice(&uint.to_le_bytes()),
            ElementType::Float32 => {
                let f = s.as_f64().unwrap_or_default() as f32;
                raw.extend_from_slice(&f.to_le_bytes());
            }
            ElementType::Float64 => {
                raw.extend_from_slice(&s.as_f64().unwrap_or_default().to_le_bytes())
            }
            ElementType::Bool => raw.push(u8::from(s.as_bool().unwrap_or(false))),
            ElementType::Text => {}
        }
    }
    raw
}

/// Scalars from little-endian bytes. Text is not handled here.
pub(crate) fn decode(element: ElementType, raw: &[u8]) -> Vec<Scalar> {
    let size = datatype(element).element_size();
    raw.chunks_exact(size)
        .map(|b| match element {
            ElementType::Int8 => Scalar::Int(i64::from(b[0] as i8)),
            ElementType::Int16 => Scalar::Int(i64::from(LittleEndian::read_i16(b))),
            ElementType::Int32 => Scalar::Int(i64::from(LittleEndian::read_i32(b))),
            ElementType::Int64 => Scalar::Int(LittleEndian::read_i64(b)),
            ElementType::UInt8 => Scalar::UInt(u64::from(b[0])),
            ElementType::UInt16 => Scalar::UInt(u64::from(LittleEndian::read_u16(b))),
            ElementType::UInt32 => Scalar::UInt(u64::from(LittleEndian::read_u32(b))),
            ElementType::UInt64 => Scalar::UInt(LittleEndian::read_u64(b)),
            ElementType::Float32 => Scalar::Float(f64::from(LittleEndian::read_f32(b))),
            ElementType::Float64 => Scalar::Float(LittleEndian::read_f64(b)),
            ElementType::Bool => Scalar::Bool(b[0] != 0),
            ElementType::Text => Scalar::Text(String::new()),
        })
        .collect()
}
