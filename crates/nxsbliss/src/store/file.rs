//! [`Store`] backed by an HDF5 file on disk.
//!
//! Every change goes to the file as it is made: data rows land in their
//! chunks immediately and object headers are rewritten on flush. Nothing
//! beyond the object tree is kept in memory, so a scan of any length can
//! be written and a closed file can be reopened and continued.

use std::fs::File;
use std::path::{Path, PathBuf};

use nxsbliss_format::{DatasetSpec, DatasetView, FormatError, H5Attribute, H5File, ROOT};
use tracing::debug;

use crate::value::{Scalar, Value};

use super::{
    check_attr_size, codec, coerce_all, same_extent, to_value, AttrInfo, ElementType, FieldInfo,
    Layout, NodeId, NodeKind, Store, StoreError, StoreResult,
};

#[derive(Debug)]
pub struct H5FileStore {
    file: H5File<File>,
    path: PathBuf,
}

fn linked(e: FormatError) -> StoreError {
    match e {
        FormatError::DuplicateLink { group, name } => StoreError::AlreadyExists { owner: group, name },
        other => other.into(),
    }
}

impl H5FileStore {
    /// Create or truncate the file at `path`.
    pub fn create(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let file = H5File::create(&path)?;
        debug!(path = %path.display(), "created HDF5 file");
        Ok(Self { file, path })
    }

    /// Reopen a file written by this crate to add to it.
    pub fn open(path: impl Into<PathBuf>) -> StoreResult<Self> {
        let path = path.into();
        let file = H5File::open(&path)?;
        debug!(path = %path.display(), "reopened HDF5 file");
        Ok(Self { file, path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn obj_path(&self, node: NodeId) -> StoreResult<String> {
        self.file
            .path(node.0)
            .map(str::to_string)
            .map_err(|_| StoreError::InvalidHandle(node))
    }

    fn group(&self, node: NodeId) -> StoreResult<String> {
        let path = self.obj_path(node)?;
        if self.file.is_group(node.0)? {
            Ok(path)
        } else {
            Err(StoreError::NotAGroup(path))
        }
    }

    fn view(&self, node: NodeId) -> StoreResult<(String, DatasetView)> {
        let path = self.obj_path(node)?;
        if self.file.is_group(node.0)? {
            return Err(StoreError::NotAField(path));
        }
        let view = self.file.dataset(node.0)?;
        Ok((path, view))
    }

    fn stored(&self, holder: NodeId, name: &str) -> StoreResult<(String, &H5Attribute)> {
        let path = self.obj_path(holder)?;
        match self.file.attribute(holder.0, name)? {
            Some(attr) => Ok((path, attr)),
            None => Err(StoreError::NotFound {
                owner: path,
                name: format!("@{name}"),
            }),
        }
    }

    /// Coerce `value` and encode it; text goes to the global heap.
    fn encode(&mut self, path: &str, element: ElementType, value: &Value) -> StoreResult<Vec<u8>> {
        let data = coerce_all(path, element, value)?;
        if element != ElementType::Text {
            return Ok(codec::encode(element, &data));
        }
        let strings: Vec<&str> = data.iter().map(|s| s.as_text().unwrap_or_default()).collect();
        Ok(self.file.put_strings(&strings)?)
    }

    fn decode(&self, element: ElementType, raw: &[u8]) -> StoreResult<Vec<Scalar>> {
        if element != ElementType::Text {
            return Ok(codec::decode(element, raw));
        }
        let strings = self.file.get_strings(raw)?;
        Ok(strings.into_iter().map(Scalar::Text).collect())
    }
}

impl Store for H5FileStore {
    fn root(&self) -> NodeId {
        NodeId(ROOT)
    }

    fn node_path(&self, node: NodeId) -> StoreResult<String> {
        self.obj_path(node)
    }

    fn node_kind(&self, node: NodeId) -> StoreResult<NodeKind> {
        self.obj_path(node)?;
        Ok(if self.file.is_group(node.0)? {
            NodeKind::Group
        } else {
            NodeKind::Field
        })
    }

    fn child(&self, parent: NodeId, name: &str) -> StoreResult<NodeId> {
        let owner = self.group(parent)?;
        match self.file.child(parent.0, name)? {
            Some(id) => Ok(NodeId(id)),
            None => Err(StoreError::NotFound {
                owner,
                name: name.to_string(),
            }),
        }
    }

    fn create_group(&mut self, parent: NodeId, name: &str) -> StoreResult<NodeId> {
        self.group(parent)?;
        let id = self.file.create_group(parent.0, name).map_err(linked)?;
        Ok(NodeId(id))
    }

    fn create_field(
        &mut self,
        parent: NodeId,
        name: &str,
        element: ElementType,
        layout: &Layout,
    ) -> StoreResult<NodeId> {
        self.group(parent)?;
        let spec = DatasetSpec {
            datatype: codec::datatype(element),
            dims: codec::dims(&layout.shape),
            chunk: layout.chunk.as_deref().map(codec::dims),
        };
        let id = self.file.create_dataset(parent.0, name, spec).map_err(linked)?;
        Ok(NodeId(id))
    }

    fn field_info(&self, field: NodeId) -> StoreResult<FieldInfo> {
        let (_, view) = self.view(field)?;
        Ok(FieldInfo {
            element: codec::element_type(&view.datatype),
            shape: codec::shape(&view.dims),
            chunk: view.chunk.as_deref().map(codec::shape),
        })
    }

    fn extend(&mut self, field: NodeId, rows: usize) -> StoreResult<()> {
        let (path, view) = self.view(field)?;
        if view.chunk.is_none() || view.dims.is_empty() {
            return Err(StoreError::NotExtensible { path });
        }
        self.file.resize(field.0, rows as u64)?;
        Ok(())
    }

    fn write_field(&mut self, field: NodeId, value: &Value) -> StoreResult<()> {
        let (path, view) = self.view(field)?;
        let shape = codec::shape(&view.dims);
        if !same_extent(&shape, value.shape()) {
            return Err(StoreError::ShapeMismatch {
                path,
                stored: shape,
                got: value.shape().to_vec(),
            });
        }
        let raw = self.encode(&path, codec::element_type(&view.datatype), value)?;
        self.file.write(field.0, &raw)?;
        Ok(())
    }

    fn write_rows(&mut self, field: NodeId, offset: usize, block: &Value) -> StoreResult<()> {
        let (path, view) = self.view(field)?;
        let shape = codec::shape(&view.dims);
        let (rows, sample): (usize, &[usize]) = match block.shape().split_first() {
            Some((n, rest)) => (*n, rest),
            None => (1, &[]),
        };
        let fits = shape.len() == sample.len() + 1
            && shape[1..] == *sample
            && offset + rows <= shape[0];
        if !fits {
            let mut got = vec![offset + rows];
            got.extend_from_slice(sample);
            return Err(StoreError::ShapeMismatch {
                path,
                stored: shape,
                got,
            });
        }
        let raw = self.encode(&path, codec::element_type(&view.datatype), block)?;
        self.file.write_rows(field.0, offset as u64, &raw)?;
        Ok(())
    }

    fn read_field(&self, field: NodeId) -> StoreResult<Value> {
        let (_, view) = self.view(field)?;
        let raw = self.file.read(field.0)?;
        let data = self.decode(codec::element_type(&view.datatype), &raw)?;
        Ok(to_value(&codec::shape(&view.dims), &data))
    }

    fn attr_info(&self, holder: NodeId, name: &str) -> StoreResult<AttrInfo> {
        let (_, attr) = self.stored(holder, name)?;
        Ok(AttrInfo {
            element: codec::element_type(&attr.datatype),
            shape: codec::shape(attr.space.dims()),
        })
    }

    fn create_attr(
        &mut self,
        holder: NodeId,
        name: &str,
        element: ElementType,
        shape: &[usize],
    ) -> StoreResult<()> {
        let path = self.obj_path(holder)?;
        if self.file.attribute(holder.0, name)?.is_some() {
            return Err(StoreError::AlreadyExists {
                owner: path,
                name: format!("@{name}"),
            });
        }
        check_attr_size(&path, name, element, shape)?;
        let attr = H5Attribute::zeroed(name, codec::datatype(element), codec::dataspace(shape));
        self.file.set_attribute(holder.0, attr)?;
        Ok(())
    }

    fn delete_attr(&mut self, holder: NodeId, name: &str) -> StoreResult<()> {
        let path = self.obj_path(holder)?;
        if self.file.remove_attribute(holder.0, name)? {
            Ok(())
        } else {
            Err(StoreError::NotFound {
                owner: path,
                name: format!("@{name}"),
            })
        }
    }

    fn read_attr(&self, holder: NodeId, name: &str) -> StoreResult<Value> {
        let (_, attr) = self.stored(holder, name)?;
        let data = self.decode(codec::element_type(&attr.datatype), &attr.raw)?;
        Ok(to_value(&codec::shape(attr.space.dims()), &data))
    }

    fn write_attr(&mut self, holder: NodeId, name: &str, value: &Value) -> StoreResult<()> {
        let (path, attr) = self.stored(holder, name)?;
        let (datatype, space) = (attr.datatype.clone(), attr.space.clone());
        let shape = codec::shape(space.dims());
        if !same_extent(&shape, value.shape()) {
            return Err(StoreError::ShapeMismatch {
                path: format!("{path}@{name}"),
                stored: shape,
                got: value.shape().to_vec(),
            });
        }
        let raw = self.encode(&path, codec::element_type(&datatype), value)?;
        self.file.set_attribute(
            holder.0,
            H5Attribute {
                name: name.to_string(),
                datatype,
                space,
                raw,
            },
        )?;
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<()> {
        self.file.flush()?;
        debug!(path = %self.path.display(), "flushed HDF5 file");
        Ok(())
    }
}
