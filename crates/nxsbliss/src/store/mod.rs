//! Storage capability the writer drives.
//!
//! The [`Store`] trait is the seam between the NeXus logic and the file
//! backend. Nodes are addressed by [`NodeId`] handles; a missing child or
//! attribute is reported as [`StoreError::NotFound`], which callers use as
//! the trigger for lazy creation.

mod codec;
mod file;
mod journal;
mod mem;

pub use file::H5FileStore;
pub use journal::{Journal, Op};
pub use mem::MemStore;

use nxsbliss_format::{FormatError, H5Attribute, MAX_MESSAGE_SIZE};

use crate::value::{Scalar, Value};

/// Opaque handle to a group or field inside a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    Group,
    Field,
}

/// Storage primitive of a field or attribute element.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementType {
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

impl ElementType {
    /// Value a freshly extended element holds.
    pub fn zero(self) -> Scalar {
        match self {
            ElementType::Int8 | ElementType::Int16 | ElementType::Int32 | ElementType::Int64 => {
                Scalar::Int(0)
            }
            ElementType::UInt8 | ElementType::UInt16 | ElementType::UInt32 | ElementType::UInt64 => {
                Scalar::UInt(0)
            }
            ElementType::Float32 | ElementType::Float64 => Scalar::Float(0.0),
            ElementType::Bool => Scalar::Bool(false),
            ElementType::Text => Scalar::Text(String::new()),
        }
    }

    fn int_range(self) -> Option<(i128, i128)> {
        let bits = match self {
            ElementType::Int8 | ElementType::UInt8 => 8,
            ElementType::Int16 | ElementType::UInt16 => 16,
            ElementType::Int32 | ElementType::UInt32 => 32,
            ElementType::Int64 | ElementType::UInt64 => 64,
            _ => return None,
        };
        let signed = matches!(
            self,
            ElementType::Int8 | ElementType::Int16 | ElementType::Int32 | ElementType::Int64
        );
        Some(if signed {
            (-(1i128 << (bits - 1)), (1i128 << (bits - 1)) - 1)
        } else {
            (0, (1i128 << bits) - 1)
        })
    }

    /// Convert `s` to this element type, or `None` if it does not fit.
    pub fn coerce(self, s: &Scalar) -> Option<Scalar> {
        if let Some((lo, hi)) = self.int_range() {
            let v: i128 = match s {
                Scalar::Int(v) => i128::from(*v),
                Scalar::UInt(v) => i128::from(*v),
                Scalar::Bool(b) => i128::from(*b),
                Scalar::Float(f) if f.fract() == 0.0 => *f as i128,
                _ => return None,
            };
            if v < lo || v > hi {
                return None;
            }
            return Some(if lo < 0 {
                Scalar::Int(v as i64)
            } else {
                Scalar::UInt(v as u64)
            });
        }
        match self {
            ElementType::Float32 => s.as_f64().map(|f| Scalar::Float(f as f32 as f64)),
            ElementType::Float64 => s.as_f64().map(Scalar::Float),
            ElementType::Bool => s.as_bool().map(Scalar::Bool),
            ElementType::Text => Some(match s {
                Scalar::Text(t) => Scalar::Text(t.clone()),
                other => Scalar::Text(other.to_string()),
            }),
            _ => None,
        }
    }
}

const CHUNK_ELEMENTS: usize = 8192;
const MAX_CHUNK_ROWS: usize = 1024;

/// Shape and chunking of a new field. A chunked field is extensible along
/// dimension 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub shape: Vec<usize>,
    pub chunk: Option<Vec<usize>>,
}

impl Layout {
    pub fn scalar() -> Self {
        Self {
            shape: Vec::new(),
            chunk: None,
        }
    }

    pub fn fixed(shape: &[usize]) -> Self {
        Self {
            shape: shape.to_vec(),
            chunk: None,
        }
    }

    /// Empty along dimension 0. Chunks hold whole samples, about 8192
    /// elements' worth and at most 1024 of them.
    pub fn extensible(sample: &[usize]) -> Self {
        let mut shape = vec![0];
        shape.extend_from_slice(sample);
        let sample: Vec<usize> = sample.iter().map(|&d| d.max(1)).collect();
        let per_sample: usize = sample.iter().product();
        let mut chunk = vec![(CHUNK_ELEMENTS / per_sample).clamp(1, MAX_CHUNK_ROWS)];
        chunk.extend(sample);
        Self {
            shape,
            chunk: Some(chunk),
        }
    }

    /// Starts at `shape` (a scalar becomes `[1]`), chunked by its own shape.
    pub fn extensible_from(shape: &[usize]) -> Self {
        let shape = if shape.is_empty() {
            vec![1]
        } else {
            shape.to_vec()
        };
        let chunk = shape.iter().map(|&d| d.max(1)).collect();
        Self {
            shape,
            chunk: Some(chunk),
        }
    }

    pub fn is_extensible(&self) -> bool {
        self.chunk.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub element: ElementType,
    pub shape: Vec<usize>,
    pub chunk: Option<Vec<usize>>,
}

impl FieldInfo {
    /// Current length along dimension 0 (1 for scalars).
    pub fn rows(&self) -> usize {
        self.shape.first().copied().unwrap_or(1)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttrInfo {
    pub element: ElementType,
    pub shape: Vec<usize>,
}

/// Errors reported by a [`Store`].
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{name} not found in {owner}")]
    NotFound { owner: String, name: String },

    #[error("{owner} already has a member named {name}")]
    AlreadyExists { owner: String, name: String },

    #[error("{0} is not a group")]
    NotAGroup(String),

    #[error("{0} is not a field")]
    NotAField(String),

    #[error("{path} is not extensible")]
    NotExtensible { path: String },

    #[error("shape mismatch for {path}: stored {stored:?}, got {got:?}")]
    ShapeMismatch {
        path: String,
        stored: Vec<usize>,
        got: Vec<usize>,
    },

    #[error("cannot store {value} as {element:?} in {path}")]
    TypeMismatch {
        path: String,
        element: ElementType,
        value: String,
    },

    #[error("stale node handle {0:?}")]
    InvalidHandle(NodeId),

    #[error("read of {path}@{name} failed")]
    ReadFailed { path: String, name: String },

    #[error("attribute {path}@{name} needs {size} bytes, over the header message limit")]
    AttributeTooLarge {
        path: String,
        name: String,
        size: usize,
    },

    #[error("HDF5 file error: {0}")]
    Format(#[from] FormatError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Group/field/attribute operations on one open file session.
pub trait Store {
    fn root(&self) -> NodeId;

    /// Slash-separated path of `node`, for messages and journals.
    fn node_path(&self, node: NodeId) -> StoreResult<String>;

    fn node_kind(&self, node: NodeId) -> StoreResult<NodeKind>;

    /// Child named `name`, or [`StoreError::NotFound`].
    fn child(&self, parent: NodeId, name: &str) -> StoreResult<NodeId>;

    fn create_group(&mut self, parent: NodeId, name: &str) -> StoreResult<NodeId>;

    fn create_field(
        &mut self,
        parent: NodeId,
        name: &str,
        element: ElementType,
        layout: &Layout,
    ) -> StoreResult<NodeId>;

    fn field_info(&self, field: NodeId) -> StoreResult<FieldInfo>;

    /// Resize dimension 0 to `rows`; new rows hold the element zero.
    fn extend(&mut self, field: NodeId, rows: usize) -> StoreResult<()>;

    /// Replace the whole content of `field`.
    fn write_field(&mut self, field: NodeId, value: &Value) -> StoreResult<()>;

    /// Write `block` into rows `offset..offset + block.rows()`.
    fn write_rows(&mut self, field: NodeId, offset: usize, block: &Value) -> StoreResult<()>;

    fn read_field(&self, field: NodeId) -> StoreResult<Value>;

    /// Attribute metadata, or [`StoreError::NotFound`].
    fn attr_info(&self, holder: NodeId, name: &str) -> StoreResult<AttrInfo>;

    fn create_attr(
        &mut self,
        holder: NodeId,
        name: &str,
        element: ElementType,
        shape: &[usize],
    ) -> StoreResult<()>;

    fn delete_attr(&mut self, holder: NodeId, name: &str) -> StoreResult<()>;

    fn read_attr(&self, holder: NodeId, name: &str) -> StoreResult<Value>;

    fn write_attr(&mut self, holder: NodeId, name: &str, value: &Value) -> StoreResult<()>;

    /// Persist pending changes.
    fn flush(&mut self) -> StoreResult<()>;
}

/// Refuse an attribute whose header message could not be stored.
pub(crate) fn check_attr_size(
    path: &str,
    name: &str,
    element: ElementType,
    shape: &[usize],
) -> StoreResult<()> {
    let datatype = codec::datatype(element);
    let space = codec::dataspace(shape);
    let size = H5Attribute::message_size(name, &datatype, &space);
    if size > MAX_MESSAGE_SIZE {
        return Err(StoreError::AttributeTooLarge {
            path: path.to_string(),
            name: name.to_string(),
            size,
        });
    }
    Ok(())
}

/// A stored element list as a [`Value`] of `shape`.
pub(crate) fn to_value(shape: &[usize], data: &[Scalar]) -> Value {
    if shape.is_empty() {
        let first = data.first().cloned().unwrap_or(Scalar::Int(0));
        Value::Scalar(first)
    } else {
        Value::Array {
            shape: shape.to_vec(),
            data: data.to_vec(),
        }
    }
}

/// Coerce every element of `value` to `element`.
pub(crate) fn coerce_all(path: &str, element: ElementType, value: &Value) -> StoreResult<Vec<Scalar>> {
    value
        .scalars()
        .iter()
        .map(|s| {
            element.coerce(s).ok_or_else(|| StoreError::TypeMismatch {
                path: path.to_string(),
                element,
                value: s.to_string(),
            })
        })
        .collect()
}

/// Scalars and `[1]`-shaped values are interchangeable.
pub(crate) fn same_extent(a: &[usize], b: &[usize]) -> bool {
    let norm = |s: &[usize]| -> Vec<usize> {
        if s.is_empty() {
            vec![1]
        } else {
            s.to_vec()
        }
    };
    norm(a) == norm(b)
}
