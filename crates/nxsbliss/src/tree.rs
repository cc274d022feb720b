//! Lazy creation of groups and fields along a [`NodePath`].

use tracing::debug;

use crate::error::{Error, Result};
use crate::kind::ValueKind;
use crate::path::{NodePath, Segment};
use crate::store::{ElementType, Layout, NodeId, NodeKind, Store, StoreError};
use crate::value::Value;

/// Attribute holding a group's NeXus class.
pub const NX_CLASS: &str = "NX_class";

/// A located or freshly created field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldHandle {
    pub node: NodeId,
    pub created: bool,
}

/// Node at `segments`, or `None` if any step is missing.
pub fn lookup<S: Store + ?Sized>(store: &S, segments: &[Segment]) -> Result<Option<NodeId>> {
    let mut node = store.root();
    for seg in segments {
        match store.child(node, &seg.name) {
            Ok(child) => node = child,
            Err(e) if e.is_not_found() => return Ok(None),
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(node))
}

/// Walk `segments` from the root, creating missing groups. A created group
/// gets its class tag; existing groups are left untouched.
pub fn ensure_groups<S: Store + ?Sized>(store: &mut S, segments: &[Segment]) -> Result<NodeId> {
    let mut node = store.root();
    for seg in segments {
        node = match store.child(node, &seg.name) {
            Ok(child) => child,
            Err(e) if e.is_not_found() => create_group(store, node, seg)?,
            Err(e) => return Err(e.into()),
        };
    }
    Ok(node)
}

pub(crate) fn create_group<S: Store + ?Sized>(
    store: &mut S,
    parent: NodeId,
    seg: &Segment,
) -> Result<NodeId> {
    let id = store.create_group(parent, &seg.name)?;
    if let Some(class) = &seg.class {
        write_text_attr(store, id, NX_CLASS, class)?;
    }
    debug!(name = %seg.name, class = ?seg.class, "created group");
    Ok(id)
}

pub(crate) fn write_text_attr<S: Store + ?Sized>(
    store: &mut S,
    holder: NodeId,
    name: &str,
    text: &str,
) -> Result<()> {
    store.create_attr(holder, name, ElementType::Text, &[])?;
    store.write_attr(holder, name, &Value::from(text))?;
    Ok(())
}

/// Locate the field at `path`, creating it and its parent groups if needed.
///
/// A new field uses `layout` when given, otherwise the kind's default
/// layout for `initial` (or an empty extensible one). `initial` is written
/// only when the field is created.
pub fn build_field<S: Store + ?Sized>(
    store: &mut S,
    path: &NodePath,
    kind: ValueKind,
    initial: Option<&Value>,
    layout: Option<Layout>,
) -> Result<FieldHandle> {
    let leaf = path.leaf().ok_or_else(|| Error::MalformedPath {
        path: path.to_string(),
        reason: "no field name",
    })?;
    let parent = ensure_groups(store, path.parents())?;

    match store.child(parent, &leaf.name) {
        Ok(node) => {
            if store.node_kind(node)? != NodeKind::Field {
                return Err(StoreError::NotAField(store.node_path(node)?).into());
            }
            return Ok(FieldHandle {
                node,
                created: false,
            });
        }
        Err(e) if e.is_not_found() => {}
        Err(e) => return Err(e.into()),
    }

    let layout = layout.unwrap_or_else(|| match initial {
        Some(value) => kind.snapshot_layout(value),
        None => kind.default_layout(&[]),
    });
    let node = store.create_field(parent, &leaf.name, kind.element_type(), &layout)?;
    if let Some(value) = initial {
        store.write_field(node, value)?;
    }
    debug!(path = %path, kind = %kind, shape = ?layout.shape, "created field");
    Ok(FieldHandle {
        node,
        created: true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Journal, MemStore, Op};

    #[test]
    fn path_creation_is_idempotent() {
        let mut store = Journal::new(MemStore::new());
        let path = NodePath::parse("/scan1:NXentry/instrument:NXinstrument/x").unwrap();

        let first = build_field(&mut store, &path, ValueKind::Float64, Some(&Value::from(1.5)), None)
            .unwrap();
        let second = build_field(&mut store, &path, ValueKind::Float64, Some(&Value::from(2.5)), None)
            .unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.node, second.node);

        assert_eq!(store.count(|op| matches!(op, Op::CreateGroup { .. })), 2);
        assert_eq!(store.count(|op| matches!(op, Op::CreateField { .. })), 1);
        assert_eq!(
            store.count(|op| matches!(op, Op::WriteAttr { name, .. } if name == NX_CLASS)),
            2
        );
        // second call did not write
        assert_eq!(store.count(|op| matches!(op, Op::WriteField { .. })), 1);
    }

    #[test]
    fn class_tag_is_not_rewritten() {
        let mut store = MemStore::new();
        let a = NodePath::parse("/entry:NXentry/x").unwrap();
        let b = NodePath::parse("/entry:NXsubentry/y").unwrap();
        build_field(&mut store, &a, ValueKind::Int64, None, None).unwrap();
        build_field(&mut store, &b, ValueKind::Int64, None, None).unwrap();
        let entry = lookup(&store, &a.segments[..1]).unwrap().unwrap();
        assert_eq!(store.read_attr(entry, NX_CLASS).unwrap(), Value::from("NXentry"));
    }

    #[test]
    fn untagged_groups_have_no_class() {
        let mut store = MemStore::new();
        let p = NodePath::parse("/entry/data/x").unwrap();
        build_field(&mut store, &p, ValueKind::Int32, None, None).unwrap();
        let data = lookup(&store, p.parents()).unwrap().unwrap();
        assert!(store.attr_info(data, NX_CLASS).unwrap_err().is_not_found());
    }

    #[test]
    fn default_layout_without_initial_value() {
        let mut store = MemStore::new();
        let p = NodePath::parse("/e:NXentry/counts").unwrap();
        let h = build_field(&mut store, &p, ValueKind::UInt32, None, None).unwrap();
        let info = store.field_info(h.node).unwrap();
        assert_eq!(info.shape, vec![0]);
        assert_eq!(info.chunk, Some(vec![1024]));
    }

    #[test]
    fn group_in_the_way_of_a_field() {
        let mut store = MemStore::new();
        ensure_groups(&mut store, &NodePath::parse("/e/x").unwrap().segments).unwrap();
        let err = build_field(
            &mut store,
            &NodePath::parse("/e/x").unwrap(),
            ValueKind::Int64,
            None,
            None,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::NotAField(_))));
    }

    #[test]
    fn lookup_missing_is_none() {
        let store = MemStore::new();
        let p = NodePath::parse("/nothing/here").unwrap();
        assert_eq!(lookup(&store, &p.segments).unwrap(), None);
    }
}
