use std::collections::HashSet;

use crate::value::Value;

use super::{
    AttrInfo, ElementType, FieldInfo, Layout, NodeId, NodeKind, Store, StoreError, StoreResult,
};

/// A physical store operation, as recorded by [`Journal`].
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    CreateGroup { path: String },
    CreateField { path: String, element: ElementType, shape: Vec<usize> },
    Extend { path: String, rows: usize },
    WriteField { path: String },
    WriteRows { path: String, offset: usize, rows: usize },
    CreateAttr { path: String, name: String, shape: Vec<usize> },
    DeleteAttr { path: String, name: String },
    WriteAttr { path: String, name: String, value: String },
    Flush,
}

/// Wraps a store and records every mutating call that succeeded.
///
/// Attribute reads can be made to fail on demand to exercise recovery
/// paths.
#[derive(Debug)]
pub struct Journal<S> {
    inner: S,
    ops: Vec<Op>,
    failing_reads: HashSet<String>,
}

impl<S: Store> Journal<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            ops: Vec::new(),
            failing_reads: HashSet::new(),
        }
    }

    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    pub fn clear(&mut self) {
        self.ops.clear();
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }

    /// Make every `read_attr` of attributes called `name` fail.
    pub fn fail_attr_reads(&mut self, name: &str) {
        self.failing_reads.insert(name.to_string());
    }

    /// Count of recorded operations matching `pred`.
    pub fn count(&self, pred: impl Fn(&Op) -> bool) -> usize {
        self.ops.iter().filter(|op| pred(op)).count()
    }

    fn record<T>(&mut self, result: StoreResult<T>, op: impl FnOnce() -> Op) -> StoreResult<T> {
        if result.is_ok() {
            self.ops.push(op());
        }
        result
    }

    fn path(&self, node: NodeId) -> String {
        self.inner
            .node_path(node)
            .unwrap_or_else(|_| format!("{node:?}"))
    }
}

impl<S: Store> Store for Journal<S> {
    fn root(&self) -> NodeId {
        self.inner.root()
    }

    fn node_path(&self, node: NodeId) -> StoreResult<String> {
        self.inner.node_path(node)
    }

    fn node_kind(&self, node: NodeId) -> StoreResult<NodeKind> {
        self.inner.node_kind(node)
    }

    fn child(&self, parent: NodeId, name: &str) -> StoreResult<NodeId> {
        self.inner.child(parent, name)
    }

    fn create_group(&mut self, parent: NodeId, name: &str) -> StoreResult<NodeId> {
        let result = self.inner.create_group(parent, name);
        let path = result.as_ref().map(|id| self.path(*id)).unwrap_or_default();
        self.record(result, || Op::CreateGroup { path })
    }

    fn create_field(
        &mut self,
        parent: NodeId,
        name: &str,
        element: ElementType,
        layout: &Layout,
    ) -> StoreResult<NodeId> {
        let result = self.inner.create_field(parent, name, element, layout);
        let path = result.as_ref().map(|id| self.path(*id)).unwrap_or_default();
        self.record(result, || Op::CreateField {
            path,
            element,
            shape: layout.shape.clone(),
        })
    }

    fn field_info(&self, field: NodeId) -> StoreResult<FieldInfo> {
        self.inner.field_info(field)
    }

    fn extend(&mut self, field: NodeId, rows: usize) -> StoreResult<()> {
        let result = self.inner.extend(field, rows);
        let path = self.path(field);
        self.record(result, || Op::Extend { path, rows })
    }

    fn write_field(&mut self, field: NodeId, value: &Value) -> StoreResult<()> {
        let result = self.inner.write_field(field, value);
        let path = self.path(field);
        self.record(result, || Op::WriteField { path })
    }

    fn write_rows(&mut self, field: NodeId, offset: usize, block: &Value) -> StoreResult<()> {
        let result = self.inner.write_rows(field, offset, block);
        let path = self.path(field);
        let rows = block.rows();
        self.record(result, || Op::WriteRows { path, offset, rows })
    }

    fn read_field(&self, field: NodeId) -> StoreResult<Value> {
        self.inner.read_field(field)
    }

    fn attr_info(&self, holder: NodeId, name: &str) -> StoreResult<AttrInfo> {
        self.inner.attr_info(holder, name)
    }

    fn create_attr(
        &mut self,
        holder: NodeId,
        name: &str,
        element: ElementType,
        shape: &[usize],
    ) -> StoreResult<()> {
        let result = self.inner.create_attr(holder, name, element, shape);
        let path = self.path(holder);
        self.record(result, || Op::CreateAttr {
            path,
            name: name.to_string(),
            shape: shape.to_vec(),
        })
    }

    fn delete_attr(&mut self, holder: NodeId, name: &str) -> StoreResult<()> {
        let result = self.inner.delete_attr(holder, name);
        let path = self.path(holder);
        self.record(result, || Op::DeleteAttr {
            path,
            name: name.to_string(),
        })
    }

    fn read_attr(&self, holder: NodeId, name: &str) -> StoreResult<Value> {
        if self.failing_reads.contains(name) {
            return Err(StoreError::ReadFailed {
                path: self.path(holder),
                name: name.to_string(),
            });
        }
        self.inner.read_attr(holder, name)
    }

    fn write_attr(&mut self, holder: NodeId, name: &str, value: &Value) -> StoreResult<()> {
        let result = self.inner.write_attr(holder, name, value);
        let path = self.path(holder);
        self.record(result, || Op::WriteAttr {
            path,
            name: name.to_string(),
            value: value.to_string(),
        })
    }

    fn flush(&mut self) -> StoreResult<()> {
        let result = self.inner.flush();
        self.record(result, || Op::Flush)
    }
}
