//! Scan metadata written before and after streaming.

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde_json::Value as Json;
use tracing::{debug, warn};

use crate::attrs::{self, MergeOutcome};
use crate::error::{Error, Result};
use crate::kind::ValueKind;
use crate::path::{NodePath, Target};
use crate::store::{NodeId, Store};
use crate::tree;
use crate::value::Value;

/// Snapshot group holding the embedded NeXus schema document.
pub const SCHEMA_GROUP: &str = "nxsdatawriter_xmlsettings";

/// Item keys that never become auxiliary attributes.
pub const RESERVED_KEYS: &[&str] = &[
    "name",
    "label",
    "kind",
    "value",
    "path",
    "shape",
    "stream",
    "dtype",
    "nexus_path",
];

/// Item key to attribute name renames.
pub const ATTRIBUTE_NAMES: &[(&str, &str)] = &[
    ("nexus_type", "type"),
    ("unit", "units"),
    ("depends_on", "depends_on"),
    ("trans_type", "transformation_type"),
    ("trans_vector", "vector"),
    ("trans_offset", "offset"),
    ("source", "nexdatas_source"),
    ("strategy", "nexdatas_strategy"),
];

pub fn attribute_name(key: &str) -> &str {
    ATTRIBUTE_NAMES
        .iter()
        .find(|(k, _)| *k == key)
        .map_or(key, |(_, v)| v)
}

/// When an item is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Strategy {
    Pre,
    Post,
}

impl Strategy {
    /// `INIT`/`PRE` and unknown or missing tags map to [`Strategy::Pre`];
    /// `FINAL`/`POST` to [`Strategy::Post`].
    pub fn from_tag(tag: Option<&str>) -> Strategy {
        match tag.map(str::to_ascii_uppercase).as_deref() {
            Some("FINAL" | "POST") => Strategy::Post,
            _ => Strategy::Pre,
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Strategy::Pre => "PRE",
            Strategy::Post => "POST",
        })
    }
}

/// One piece of scan metadata aimed at a location in the file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SnapshotItem {
    #[serde(default, alias = "nexus_path")]
    pub path: Option<String>,
    #[serde(default)]
    pub value: Option<Json>,
    #[serde(default, alias = "dtype")]
    pub kind: Option<String>,
    #[serde(default)]
    pub strategy: Option<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Json>,
}

impl SnapshotItem {
    pub fn strategy(&self) -> Strategy {
        Strategy::from_tag(self.strategy.as_deref())
    }

    /// Auxiliary attributes as (attribute name, value) pairs.
    pub fn auxiliary(&self) -> impl Iterator<Item = (&str, Json)> + '_ {
        let strategy = self
            .strategy
            .as_ref()
            .map(|s| (attribute_name("strategy"), Json::String(s.clone())));
        self.extra
            .iter()
            .filter(|(k, _)| !RESERVED_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (attribute_name(k), v.clone()))
            .chain(strategy)
    }
}

/// Snapshot items grouped the way the scan publishes them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub groups: Vec<(String, Vec<SnapshotItem>)>,
}

impl Snapshot {
    /// Parse `{group: [item, ...] | item}`.
    pub fn from_json(json: &Json) -> Result<Snapshot> {
        let map = match json {
            Json::Object(map) => map,
            Json::Null => return Ok(Snapshot::default()),
            other => {
                return Err(Error::Value(format!(
                    "snapshot must be an object, got {other}"
                )))
            }
        };
        let mut groups = Vec::with_capacity(map.len());
        for (name, items) in map {
            let items = match items {
                Json::Array(list) => list
                    .iter()
                    .map(|i| SnapshotItem::deserialize(i))
                    .collect::<std::result::Result<Vec<_>, _>>()?,
                single => vec![SnapshotItem::deserialize(single)?],
            };
            groups.push((name.clone(), items));
        }
        Ok(Snapshot { groups })
    }

    /// Embedded schema document, if any.
    pub fn schema(&self) -> Option<&str> {
        self.groups
            .iter()
            .find(|(name, _)| name == SCHEMA_GROUP)
            .and_then(|(_, items)| items.first())
            .and_then(|item| item.value.as_ref())
            .and_then(Json::as_str)
    }
}

/// A failure recorded instead of aborting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Group, channel or phase the failure belongs to.
    pub scope: String,
    /// Path or name of the object being written.
    pub target: String,
    pub message: String,
}

/// Outcome of one snapshot phase.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseReport {
    pub phase: Strategy,
    pub fields: usize,
    pub attributes: usize,
    pub unchanged: usize,
    pub skipped: usize,
    pub failures: Vec<Failure>,
}

impl PhaseReport {
    pub fn new(phase: Strategy) -> Self {
        Self {
            phase,
            fields: 0,
            attributes: 0,
            unchanged: 0,
            skipped: 0,
            failures: Vec::new(),
        }
    }

    fn count(&mut self, outcome: MergeOutcome) {
        if outcome.wrote() {
            self.attributes += 1;
        } else {
            self.unchanged += 1;
        }
    }

    fn fail(&mut self, scope: &str, target: &str, error: &Error) {
        warn!(phase = %self.phase, scope, target, error = %error, "snapshot write failed");
        self.failures.push(Failure {
            scope: scope.to_string(),
            target: target.to_string(),
            message: error.to_string(),
        });
    }
}

/// Write every item of `snapshot` whose strategy is `phase`.
///
/// A failing primary value aborts the rest of its group; other groups and
/// auxiliary attributes carry on.
pub fn write_snapshot<S: Store + ?Sized>(
    store: &mut S,
    snapshot: &Snapshot,
    phase: Strategy,
) -> PhaseReport {
    let mut report = PhaseReport::new(phase);
    for (group, items) in &snapshot.groups {
        for item in items.iter().filter(|i| i.strategy() == phase) {
            if let Err(e) = write_item(store, item, group, &mut report) {
                let target = item.path.as_deref().unwrap_or("?");
                report.fail(group, target, &e);
                break;
            }
        }
    }
    debug!(
        phase = %phase,
        fields = report.fields,
        attributes = report.attributes,
        failures = report.failures.len(),
        "snapshot phase done"
    );
    report
}

fn write_item<S: Store + ?Sized>(
    store: &mut S,
    item: &SnapshotItem,
    group: &str,
    report: &mut PhaseReport,
) -> Result<()> {
    let (Some(path), Some(json)) = (item.path.as_deref(), item.value.as_ref()) else {
        report.skipped += 1;
        return Ok(());
    };
    if json.is_null() {
        report.skipped += 1;
        return Ok(());
    }

    let value = Value::from_json(json)?;
    let kind = match item.kind.as_deref() {
        Some(tag) => tag.parse::<ValueKind>()?,
        None => ValueKind::infer(&value),
    };
    let node_path = NodePath::parse(path)?;

    match node_path.target() {
        Target::Field => {
            let field = write_field(store, &node_path, kind, &value)?;
            report.fields += 1;
            for (name, aux) in item.auxiliary() {
                if aux.is_null() {
                    continue;
                }
                let result = Value::from_json(&aux).and_then(|v| {
                    attrs::merge(store, field, name, ValueKind::infer(&v), &v)
                });
                match result {
                    Ok(outcome) => report.count(outcome),
                    Err(e) => report.fail(group, &format!("{path}@{name}"), &e),
                }
            }
        }
        Target::FieldAttribute | Target::GroupAttribute => {
            let holder = attribute_holder(store, &node_path)?;
            let name = node_path.attribute.as_deref().unwrap_or_default();
            report.count(attrs::merge(store, holder, name, kind, &value)?);
        }
    }
    Ok(())
}

fn write_field<S: Store + ?Sized>(
    store: &mut S,
    path: &NodePath,
    kind: ValueKind,
    value: &Value,
) -> Result<NodeId> {
    let handle = tree::build_field(store, path, kind, Some(value), None)?;
    if !handle.created {
        let info = store.field_info(handle.node)?;
        if info.chunk.is_some() && info.shape.first() == Some(&0) {
            store.extend(handle.node, 1)?;
        }
        store.write_field(handle.node, value)?;
    }
    Ok(handle.node)
}

/// Node carrying an attribute path's attribute. A field attribute falls
/// back to the group of the same name; a missing holder is created as a
/// group.
fn attribute_holder<S: Store + ?Sized>(store: &mut S, path: &NodePath) -> Result<NodeId> {
    if path.target() == Target::FieldAttribute {
        if let Some(node) = tree::lookup(store, &path.segments)? {
            return Ok(node);
        }
    }
    tree::ensure_groups(store, &path.segments)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Journal, MemStore, NodeKind, Op};
    use serde_json::json;

    fn snapshot(json: Json) -> Snapshot {
        Snapshot::from_json(&json).unwrap()
    }

    #[test]
    fn strategy_tags() {
        assert_eq!(Strategy::from_tag(Some("INIT")), Strategy::Pre);
        assert_eq!(Strategy::from_tag(Some("final")), Strategy::Post);
        assert_eq!(Strategy::from_tag(Some("POST")), Strategy::Post);
        assert_eq!(Strategy::from_tag(Some("STEP")), Strategy::Pre);
        assert_eq!(Strategy::from_tag(None), Strategy::Pre);
    }

    #[test]
    fn item_aliases_and_extras() {
        let item: SnapshotItem = serde_json::from_value(json!({
            "nexus_path": "/e:NXentry/x",
            "dtype": "float64",
            "value": 1.5,
            "unit": "mm",
            "name": "x",
            "strategy": "FINAL",
        }))
        .unwrap();
        assert_eq!(item.path.as_deref(), Some("/e:NXentry/x"));
        assert_eq!(item.kind.as_deref(), Some("float64"));
        assert_eq!(item.strategy(), Strategy::Post);
        let aux: Vec<(&str, Json)> = item.auxiliary().collect();
        assert_eq!(
            aux,
            vec![("units", json!("mm")), ("nexdatas_strategy", json!("FINAL"))]
        );
    }

    #[test]
    fn schema_is_first_item_value() {
        let s = snapshot(json!({
            SCHEMA_GROUP: [{"value": "<definition/>"}, {"value": "<other/>"}],
        }));
        assert_eq!(s.schema(), Some("<definition/>"));
        assert_eq!(snapshot(json!({})).schema(), None);
    }

    #[test]
    fn fields_and_auxiliary_attributes() {
        let mut store = MemStore::new();
        let s = snapshot(json!({
            "motors": [
                {"nexus_path": "/scan:NXentry/sample:NXsample/x", "dtype": "float64",
                 "value": 2.5, "unit": "mm", "trans_type": "translation"},
            ]
        }));
        let report = write_snapshot(&mut store, &s, Strategy::Pre);
        assert_eq!(report.fields, 1);
        assert_eq!(report.attributes, 2);
        assert!(report.failures.is_empty());

        let path = NodePath::parse("/scan/sample/x").unwrap();
        let x = tree::lookup(&store, &path.segments).unwrap().unwrap();
        assert_eq!(store.read_field(x).unwrap().reduce(), Value::from(2.5));
        assert_eq!(store.read_attr(x, "units").unwrap(), Value::from("mm"));
        assert_eq!(
            store.read_attr(x, "transformation_type").unwrap(),
            Value::from("translation")
        );
    }

    #[test]
    fn strategy_partitions_items() {
        let s = snapshot(json!({
            "g": [
                {"path": "/e:NXentry/start", "value": "t0", "kind": "string", "strategy": "INIT"},
                {"path": "/e:NXentry/end", "value": "t1", "kind": "string", "strategy": "FINAL"},
            ]
        }));
        let mut store = MemStore::new();
        let pre = write_snapshot(&mut store, &s, Strategy::Pre);
        assert_eq!(pre.fields, 1);
        let e = NodePath::parse("/e").unwrap();
        let entry = tree::lookup(&store, &e.segments).unwrap().unwrap();
        assert!(store.child(entry, "end").is_err());
        let post = write_snapshot(&mut store, &s, Strategy::Post);
        assert_eq!(post.fields, 1);
        assert!(store.child(entry, "end").is_ok());
    }

    #[test]
    fn unknown_kind_aborts_only_its_group() {
        let s = snapshot(json!({
            "a": [
                {"path": "/e/a1", "value": 1, "kind": "int64"},
                {"path": "/e/a2", "value": 2, "kind": "complex"},
                {"path": "/e/a3", "value": 3, "kind": "int64"},
            ],
            "b": [
                {"path": "/e/b1", "value": 4, "kind": "int64"},
            ]
        }));
        let mut store = MemStore::new();
        let report = write_snapshot(&mut store, &s, Strategy::Pre);
        assert_eq!(report.fields, 2);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].scope, "a");
        let e = tree::lookup(&store, &NodePath::parse("/e").unwrap().segments)
            .unwrap()
            .unwrap();
        assert!(store.child(e, "a1").is_ok());
        assert!(store.child(e, "a3").is_err());
        assert!(store.child(e, "b1").is_ok());
    }

    #[test]
    fn attribute_targets() {
        let s = snapshot(json!({
            "g": [
                {"path": "/e:NXentry/x", "value": [1.0, 2.0], "kind": "float64"},
                {"path": "/e:NXentry/x@units", "value": "mm"},
                {"path": "/e:NXentry@default", "value": "data"},
                {"path": "/e:NXentry/data@signal", "value": "x"},
            ]
        }));
        let mut store = MemStore::new();
        let report = write_snapshot(&mut store, &s, Strategy::Pre);
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        let e = tree::lookup(&store, &NodePath::parse("/e").unwrap().segments)
            .unwrap()
            .unwrap();
        let x = store.child(e, "x").unwrap();
        assert_eq!(store.read_attr(x, "units").unwrap(), Value::from("mm"));
        assert_eq!(store.read_attr(e, "default").unwrap(), Value::from("data"));
        let data = store.child(e, "data").unwrap();
        assert_eq!(store.node_kind(data).unwrap(), NodeKind::Group);
        assert_eq!(store.read_attr(data, "signal").unwrap(), Value::from("x"));
    }

    #[test]
    fn empty_existing_field_is_extended_before_write() {
        let mut store = Journal::new(MemStore::new());
        let path = NodePath::parse("/e/x").unwrap();
        tree::build_field(&mut store, &path, ValueKind::Float64, None, None).unwrap();
        store.clear();
        let s = snapshot(json!({"g": {"path": "/e/x", "value": 4.0, "kind": "float64"}}));
        let report = write_snapshot(&mut store, &s, Strategy::Pre);
        assert!(report.failures.is_empty(), "{:?}", report.failures);
        assert_eq!(
            store.ops()[0],
            Op::Extend {
                path: "/e/x".into(),
                rows: 1
            }
        );
        assert!(matches!(store.ops()[1], Op::WriteField { .. }));
    }

    #[test]
    fn items_without_path_or_value_are_skipped() {
        let s = snapshot(json!({"g": [{"value": 1}, {"path": "/e/x"}, {"path": "/e/y", "value": null}]}));
        let mut store = MemStore::new();
        let report = write_snapshot(&mut store, &s, Strategy::Pre);
        assert_eq!(report.skipped, 3);
        assert_eq!(store.len(), 1);
    }
}
