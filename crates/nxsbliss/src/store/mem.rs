use crate::value::{Scalar, Value};

use super::{
    check_attr_size, coerce_all, same_extent, to_value, AttrInfo, ElementType, FieldInfo, Layout,
    NodeId, NodeKind, Store, StoreError, StoreResult,
};

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Attr {
    pub name: String,
    pub element: ElementType,
    pub shape: Vec<usize>,
    pub data: Vec<Scalar>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FieldData {
    pub element: ElementType,
    pub shape: Vec<usize>,
    pub chunk: Option<Vec<usize>>,
    pub data: Vec<Scalar>,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Body {
    Group { children: Vec<(String, NodeId)> },
    Field(FieldData),
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Node {
    pub path: String,
    pub attrs: Vec<Attr>,
    pub body: Body,
}

/// In-memory node arena; the reference [`Store`] implementation.
#[derive(Debug, Clone, PartialEq)]
pub struct MemStore {
    nodes: Vec<Node>,
}

impl Default for MemStore {
    fn default() -> Self {
        Self {
            nodes: vec![Node {
                path: "/".to_string(),
                attrs: Vec::new(),
                body: Body::Group {
                    children: Vec::new(),
                },
            }],
        }
    }
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nodes, root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    pub(crate) fn node(&self, id: NodeId) -> StoreResult<&Node> {
        self.nodes.get(id.0).ok_or(StoreError::InvalidHandle(id))
    }

    /// Members of group `id`, in creation order.
    pub(crate) fn children(&self, id: NodeId) -> StoreResult<&[(String, NodeId)]> {
        let node = self.node(id)?;
        match &node.body {
            Body::Group { children } => Ok(children),
            Body::Field(_) => Err(StoreError::NotAGroup(node.path.clone())),
        }
    }

    /// Attribute names of `id`, in creation order.
    pub(crate) fn attr_names(&self, id: NodeId) -> StoreResult<Vec<&str>> {
        Ok(self.node(id)?.attrs.iter().map(|a| a.name.as_str()).collect())
    }

    fn node_mut(&mut self, id: NodeId) -> StoreResult<&mut Node> {
        self.nodes.get_mut(id.0).ok_or(StoreError::InvalidHandle(id))
    }

    fn field_mut(&mut self, id: NodeId) -> StoreResult<(&str, &mut FieldData)> {
        let node = self.node_mut(id)?;
        match &mut node.body {
            Body::Field(field) => Ok((node.path.as_str(), field)),
            Body::Group { .. } => Err(StoreError::NotAField(node.path.clone())),
        }
    }

    fn field(&self, id: NodeId) -> StoreResult<(&str, &FieldData)> {
        let node = self.node(id)?;
        match &node.body {
            Body::Field(field) => Ok((node.path.as_str(), field)),
            Body::Group { .. } => Err(StoreError::NotAField(node.path.clone())),
        }
    }

    fn attr(&self, holder: NodeId, name: &str) -> StoreResult<&Attr> {
        let node = self.node(holder)?;
        node.attrs
            .iter()
            .find(|a| a.name == name)
            .ok_or_else(|| StoreError::NotFound {
                owner: node.path.clone(),
                name: format!("@{name}"),
            })
    }

    fn add_child(&mut self, parent: NodeId, name: &str, body: Body) -> StoreResult<NodeId> {
        let id = NodeId(self.nodes.len());
        let parent_node = self.node_mut(parent)?;
        let path = if parent_node.path == "/" {
            format!("/{name}")
        } else {
            format!("{}/{name}", parent_node.path)
        };
        match &mut parent_node.body {
            Body::Group { children } => {
                if children.iter().any(|(n, _)| n == name) {
                    return Err(StoreError::AlreadyExists {
                        owner: parent_node.path.clone(),
                        name: name.to_string(),
                    });
                }
                children.push((name.to_string(), id));
            }
            Body::Field(_) => return Err(StoreError::NotAGroup(parent_node.path.clone())),
        }
        self.nodes.push(Node {
            path,
            attrs: Vec::new(),
            body,
        });
        Ok(id)
    }
}

impl Store for MemStore {
    fn root(&self) -> NodeId {
        NodeId(0)
    }

    fn node_path(&self, node: NodeId) -> StoreResult<String> {
        Ok(self.node(node)?.path.clone())
    }

    fn node_kind(&self, node: NodeId) -> StoreResult<NodeKind> {
        Ok(match self.node(node)?.body {
            Body::Group { .. } => NodeKind::Group,
            Body::Field(_) => NodeKind::Field,
        })
    }

    fn child(&self, parent: NodeId, name: &str) -> StoreResult<NodeId> {
        let node = self.node(parent)?;
        match &node.body {
            Body::Group { children } => children
                .iter()
                .find(|(n, _)| n == name)
                .map(|(_, id)| *id)
                .ok_or_else(|| StoreError::NotFound {
                    owner: node.path.clone(),
                    name: name.to_string(),
                }),
            Body::Field(_) => Err(StoreError::NotAGroup(node.path.clone())),
        }
    }

    fn create_group(&mut self, parent: NodeId, name: &str) -> StoreResult<NodeId> {
        self.add_child(
            parent,
            name,
            Body::Group {
                children: Vec::new(),
            },
        )
    }

    fn create_field(
        &mut self,
        parent: NodeId,
        name: &str,
        element: ElementType,
        layout: &Layout,
    ) -> StoreResult<NodeId> {
        let count: usize = layout.shape.iter().product();
        self.add_child(
            parent,
            name,
            Body::Field(FieldData {
                element,
                shape: layout.shape.clone(),
                chunk: layout.chunk.clone(),
                data: vec![element.zero(); count],
            }),
        )
    }

    fn field_info(&self, field: NodeId) -> StoreResult<FieldInfo> {
        let (_, f) = self.field(field)?;
        Ok(FieldInfo {
            element: f.element,
            shape: f.shape.clone(),
            chunk: f.chunk.clone(),
        })
    }

    fn extend(&mut self, field: NodeId, rows: usize) -> StoreResult<()> {
        let (path, f) = self.field_mut(field)?;
        if f.chunk.is_none() || f.shape.is_empty() {
            return Err(StoreError::NotExtensible {
                path: path.to_string(),
            });
        }
        f.shape[0] = rows;
        let stride: usize = f.shape[1..].iter().product();
        f.data.resize(rows * stride, f.element.zero());
        Ok(())
    }

    fn write_field(&mut self, field: NodeId, value: &Value) -> StoreResult<()> {
        let (path, f) = self.field_mut(field)?;
        if !same_extent(&f.shape, value.shape()) {
            return Err(StoreError::ShapeMismatch {
                path: path.to_string(),
                stored: f.shape.clone(),
                got: value.shape().to_vec(),
            });
        }
        f.data = coerce_all(path, f.element, value)?;
        Ok(())
    }

    fn write_rows(&mut self, field: NodeId, offset: usize, block: &Value) -> StoreResult<()> {
        let (path, f) = self.field_mut(field)?;
        let (rows, sample): (usize, &[usize]) = match block.shape().split_first() {
            Some((n, rest)) => (*n, rest),
            None => (1, &[]),
        };
        let fits = f.shape.len() == sample.len() + 1
            && f.shape[1..] == *sample
            && offset + rows <= f.shape[0];
        if !fits {
            let mut got = vec![offset + rows];
            got.extend_from_slice(sample);
            return Err(StoreError::ShapeMismatch {
                path: path.to_string(),
                stored: f.shape.clone(),
                got,
            });
        }
        let stride: usize = sample.iter().product();
        let data = coerce_all(path, f.element, block)?;
        f.data[offset * stride..(offset + rows) * stride].clone_from_slice(&data);
        Ok(())
    }

    fn read_field(&self, field: NodeId) -> StoreResult<Value> {
        let (_, f) = self.field(field)?;
        Ok(to_value(&f.shape, &f.data))
    }

    fn attr_info(&self, holder: NodeId, name: &str) -> StoreResult<AttrInfo> {
        let attr = self.attr(holder, name)?;
        Ok(AttrInfo {
            element: attr.element,
            shape: attr.shape.clone(),
        })
    }

    fn create_attr(
        &mut self,
        holder: NodeId,
        name: &str,
        element: ElementType,
        shape: &[usize],
    ) -> StoreResult<()> {
        let node = self.node_mut(holder)?;
        check_attr_size(&node.path, name, element, shape)?;
        if node.attrs.iter().any(|a| a.name == name) {
            return Err(StoreError::AlreadyExists {
                owner: node.path.clone(),
                name: format!("@{name}"),
            });
        }
        node.attrs.push(Attr {
            name: name.to_string(),
            element,
            shape: shape.to_vec(),
            data: vec![element.zero(); shape.iter().product()],
        });
        Ok(())
    }

    fn delete_attr(&mut self, holder: NodeId, name: &str) -> StoreResult<()> {
        let node = self.node_mut(holder)?;
        let before = node.attrs.len();
        node.attrs.retain(|a| a.name != name);
        if node.attrs.len() == before {
            return Err(StoreError::NotFound {
                owner: node.path.clone(),
                name: format!("@{name}"),
            });
        }
        Ok(())
    }

    fn read_attr(&self, holder: NodeId, name: &str) -> StoreResult<Value> {
        let attr = self.attr(holder, name)?;
        Ok(to_value(&attr.shape, &attr.data))
    }

    fn write_attr(&mut self, holder: NodeId, name: &str, value: &Value) -> StoreResult<()> {
        let node = self.node_mut(holder)?;
        let path = node.path.clone();
        let attr = node
            .attrs
            .iter_mut()
            .find(|a| a.name == name)
            .ok_or_else(|| StoreError::NotFound {
                owner: path.clone(),
                name: format!("@{name}"),
            })?;
        if !same_extent(&attr.shape, value.shape()) {
            return Err(StoreError::ShapeMismatch {
                path: format!("{path}@{name}"),
                stored: attr.shape.clone(),
                got: value.shape().to_vec(),
            });
        }
        attr.data = coerce_all(&path, attr.element, value)?;
        Ok(())
    }

    fn flush(&mut self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rows(v: serde_json::Value) -> Value {
        Value::from_json(&v).unwrap()
    }

    #[test]
    fn children_are_found_by_name() {
        let mut s = MemStore::new();
        let root = s.root();
        let entry = s.create_group(root, "entry").unwrap();
        assert_eq!(s.child(root, "entry").unwrap(), entry);
        assert_eq!(s.node_path(entry).unwrap(), "/entry");
        assert!(s.child(root, "missing").unwrap_err().is_not_found());
        assert!(matches!(
            s.create_group(root, "entry"),
            Err(StoreError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn extend_then_write_rows() {
        let mut s = MemStore::new();
        let root = s.root();
        let f = s
            .create_field(root, "x", ElementType::Int32, &Layout::extensible(&[2]))
            .unwrap();
        s.extend(f, 2).unwrap();
        s.write_rows(f, 0, &rows(json!([[1, 2], [3, 4]]))).unwrap();
        s.extend(f, 3).unwrap();
        s.write_rows(f, 2, &rows(json!([[5, 6]]))).unwrap();
        assert_eq!(s.read_field(f).unwrap(), rows(json!([[1, 2], [3, 4], [5, 6]])));
    }

    #[test]
    fn rows_past_the_end_are_rejected() {
        let mut s = MemStore::new();
        let root = s.root();
        let f = s
            .create_field(root, "x", ElementType::Float64, &Layout::extensible(&[]))
            .unwrap();
        s.extend(f, 1).unwrap();
        let err = s.write_rows(f, 1, &rows(json!([1.0]))).unwrap_err();
        assert!(matches!(err, StoreError::ShapeMismatch { .. }));
    }

    #[test]
    fn fixed_field_is_not_extensible() {
        let mut s = MemStore::new();
        let root = s.root();
        let f = s
            .create_field(root, "t", ElementType::Text, &Layout::scalar())
            .unwrap();
        assert!(matches!(s.extend(f, 2), Err(StoreError::NotExtensible { .. })));
        s.write_field(f, &Value::from("hello")).unwrap();
        assert_eq!(s.read_field(f).unwrap(), Value::from("hello"));
    }

    #[test]
    fn attribute_lifecycle() {
        let mut s = MemStore::new();
        let root = s.root();
        assert!(s.attr_info(root, "title").unwrap_err().is_not_found());
        s.create_attr(root, "title", ElementType::Text, &[]).unwrap();
        s.write_attr(root, "title", &Value::from("scan")).unwrap();
        assert_eq!(s.read_attr(root, "title").unwrap(), Value::from("scan"));
        assert!(matches!(
            s.write_attr(root, "title", &rows(json!(["a", "b"]))),
            Err(StoreError::ShapeMismatch { .. })
        ));
        s.delete_attr(root, "title").unwrap();
        assert!(s.read_attr(root, "title").is_err());
    }

    #[test]
    fn oversized_attribute_leaves_holder_usable() {
        let mut s = MemStore::new();
        let root = s.root();
        let err = s
            .create_attr(root, "big", ElementType::Float64, &[10_000])
            .unwrap_err();
        assert!(matches!(err, StoreError::AttributeTooLarge { .. }));
        assert!(s.attr_info(root, "big").unwrap_err().is_not_found());
        s.create_attr(root, "small", ElementType::Int64, &[]).unwrap();
    }

    #[test]
    fn type_mismatch_is_reported() {
        let mut s = MemStore::new();
        let root = s.root();
        s.create_attr(root, "n", ElementType::Int64, &[]).unwrap();
        let err = s.write_attr(root, "n", &Value::from("seven")).unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
    }
}
