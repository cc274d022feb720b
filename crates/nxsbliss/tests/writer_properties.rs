use std::time::Duration;

use nxsbliss::scan::{MemoryScan, ScanEvent, ScanInfo};
use nxsbliss::store::Op;
use nxsbliss::tree::{lookup, NX_CLASS};
use nxsbliss::{
    write_snapshot, Journal, MemStore, NodePath, Scalar, ScanWriter, Snapshot, Store, Strategy,
    Value, WriterConfig,
};
use serde_json::json;

fn config() -> WriterConfig {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    WriterConfig::default()
        .with_min_tick_interval(Duration::ZERO)
        .with_default_nexus_path("/scan{serialno}:NXentry/measurement:NXcollection")
}

fn info(snapshot: serde_json::Value) -> ScanInfo {
    ScanInfo {
        filename: "/tmp/unused.nxs".into(),
        number: 1,
        snapshot,
        ..ScanInfo::default()
    }
}

fn snapshot(json: serde_json::Value) -> Snapshot {
    Snapshot::from_json(&json).unwrap()
}

/// `n` points of 2x2 samples numbered from `start`.
fn block(n: usize, start: i64) -> Value {
    let data = (0..(n * 4) as i64).map(|i| Scalar::Int(start + i)).collect();
    Value::array(vec![n, 2, 2], data).unwrap()
}

fn block_event(label: &str, value: Value) -> ScanEvent {
    ScanEvent::Block {
        label: label.to_string(),
        block: value,
    }
}

fn node(store: &MemStore, path: &str) -> nxsbliss::NodeId {
    lookup(store, &NodePath::parse(path).unwrap().segments)
        .unwrap()
        .unwrap_or_else(|| panic!("{path} missing"))
}

#[test]
fn path_creation_is_idempotent() {
    let snap = snapshot(json!({
        "positioners": [
            {"path": "/s:NXentry/instrument:NXinstrument/positioners:NXcollection/x", "value": 1.0},
        ]
    }));
    let mut store = Journal::new(MemStore::new());
    write_snapshot(&mut store, &snap, Strategy::Pre);
    write_snapshot(&mut store, &snap, Strategy::Pre);

    assert_eq!(store.count(|op| matches!(op, Op::CreateGroup { .. })), 3);
    assert_eq!(store.count(|op| matches!(op, Op::CreateField { .. })), 1);
    assert_eq!(
        store.count(|op| matches!(op, Op::WriteAttr { name, .. } if name == NX_CLASS)),
        3
    );
}

#[test]
fn attribute_write_suppression() {
    let units = |u: &str| {
        snapshot(json!({
            "g": [{"path": "/s:NXentry/sample:NXsample@units", "value": u}]
        }))
    };
    let mut store = Journal::new(MemStore::new());
    let writes = |s: &Journal<MemStore>| {
        s.count(|op| matches!(op, Op::WriteAttr { name, .. } if name == "units"))
    };

    write_snapshot(&mut store, &units("mm"), Strategy::Pre);
    write_snapshot(&mut store, &units("mm"), Strategy::Pre);
    assert_eq!(writes(&store), 1);

    write_snapshot(&mut store, &units("um"), Strategy::Pre);
    assert_eq!(writes(&store), 2);
}

#[test]
fn shape_change_recreates_attribute() {
    let vector = |v: serde_json::Value| {
        snapshot(json!({
            "g": [{"path": "/s:NXentry/t:NXtransformations@vector", "value": v}]
        }))
    };
    let mut store = Journal::new(MemStore::new());
    write_snapshot(&mut store, &vector(json!([1, 2, 3])), Strategy::Pre);
    store.clear();
    let report = write_snapshot(&mut store, &vector(json!([1, 2, 3, 4, 5])), Strategy::Pre);
    assert!(report.failures.is_empty());

    let attr_ops: Vec<&Op> = store
        .ops()
        .iter()
        .filter(|op| {
            matches!(op, Op::DeleteAttr { name, .. } | Op::CreateAttr { name, .. } | Op::WriteAttr { name, .. } if name == "vector")
        })
        .collect();
    assert!(matches!(attr_ops[0], Op::DeleteAttr { .. }));
    assert!(matches!(attr_ops[1], Op::CreateAttr { shape, .. } if shape == &vec![5]));
    assert!(matches!(attr_ops[2], Op::WriteAttr { .. }));
    assert_eq!(attr_ops.len(), 3);
}

#[test]
fn incremental_extension_in_arrival_order() {
    let mut scan = MemoryScan::scripted(
        info(json!({})),
        [
            block_event("image", block(5, 0)),
            block_event("image", block(7, 20)),
            block_event("image", block(2, 48)),
        ],
    )
    .with_stream("image", "int32", &[2, 2]);

    let mut store = Journal::new(MemStore::new());
    let cfg = config();
    let report = ScanWriter::new(&mut store, &cfg, true).run(&mut scan).unwrap();
    assert_eq!(report.channels.rows("image"), Some(14));

    let appends: Vec<(usize, usize)> = store
        .ops()
        .iter()
        .filter_map(|op| match op {
            Op::WriteRows { offset, rows, .. } => Some((*offset, *rows)),
            _ => None,
        })
        .collect();
    assert_eq!(appends, [(0, 5), (5, 7), (12, 2)]);

    let extends: Vec<usize> = store
        .ops()
        .iter()
        .filter_map(|op| match op {
            Op::Extend { rows, .. } => Some(*rows),
            _ => None,
        })
        .collect();
    assert_eq!(extends, [5, 12, 14]);

    let field = node(store.inner(), "/scan1/measurement/image");
    let stored = store.read_field(field).unwrap();
    assert_eq!(stored.shape(), &[14, 2, 2]);
    let expected: Vec<Scalar> = (0..56).map(Scalar::Int).collect();
    assert_eq!(stored.scalars(), expected.as_slice());
}

#[test]
fn end_of_stream_is_per_channel() {
    let scalar = |v: f64| Value::from(v);
    let mut scan = MemoryScan::scripted(
        info(json!({})),
        [
            block_event("a", scalar(1.0)),
            block_event("b", scalar(10.0)),
            ScanEvent::End { label: "a".into() },
            block_event("b", scalar(11.0)),
            // late data after the end marker is never read
            block_event("a", scalar(2.0)),
            block_event("b", scalar(12.0)),
            ScanEvent::End { label: "b".into() },
        ],
    )
    .with_stream("a", "float64", &[])
    .with_stream("b", "float64", &[]);

    let mut store = MemStore::new();
    let cfg = config();
    let report = ScanWriter::new(&mut store, &cfg, true).run(&mut scan).unwrap();
    assert_eq!(report.channels.rows("a"), Some(1));
    assert_eq!(report.channels.rows("b"), Some(3));
    assert!(report.channels.channels.iter().all(|c| c.ended));
    assert_eq!(
        store.read_field(node(&store, "/scan1/measurement/b")).unwrap(),
        Value::from_json(&json!([10.0, 11.0, 12.0])).unwrap()
    );
}

fn partition_run(pre_tag: &str, post_tag: &str) -> Vec<Op> {
    let snap = json!({
        "meta": [
            {"path": "/scan1:NXentry/start", "value": "t0", "strategy": pre_tag},
            {"path": "/scan1:NXentry/end", "value": "t1", "strategy": post_tag},
        ]
    });
    let mut scan = MemoryScan::scripted(info(snap), [block_event("c", Value::from(1i64))])
        .with_stream("c", "int64", &[]);
    let mut store = Journal::new(MemStore::new());
    let cfg = config();
    ScanWriter::new(&mut store, &cfg, true).run(&mut scan).unwrap();
    store.ops().to_vec()
}

fn position(ops: &[Op], pred: impl Fn(&Op) -> bool) -> usize {
    ops.iter().position(pred).expect("operation not recorded")
}

#[test]
fn strategy_partitions_writes_around_streaming() {
    let created = |name: &'static str| {
        move |op: &Op| matches!(op, Op::CreateField { path, .. } if path.ends_with(name))
    };
    let streamed = |op: &Op| matches!(op, Op::WriteRows { .. });

    let ops = partition_run("INIT", "FINAL");
    assert!(position(&ops, created("/start")) < position(&ops, streamed));
    assert!(position(&ops, created("/end")) > position(&ops, streamed));

    let swapped = partition_run("FINAL", "INIT");
    assert!(position(&swapped, created("/start")) > position(&swapped, streamed));
    assert!(position(&swapped, created("/end")) < position(&swapped, streamed));
}

#[test]
fn unmapped_kind_aborts_only_its_group() {
    let snap = snapshot(json!({
        "broken": [
            {"path": "/s:NXentry/a", "value": 1, "kind": "complex128"},
            {"path": "/s:NXentry/b", "value": 2},
        ],
        "fine": [
            {"path": "/s:NXentry/c", "value": 3},
        ]
    }));
    let mut store = MemStore::new();
    let report = write_snapshot(&mut store, &snap, Strategy::Pre);

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].scope, "broken");
    let entry = NodePath::parse("/s").unwrap();
    let entry = lookup(&store, &entry.segments).unwrap().unwrap();
    assert!(store.child(entry, "a").unwrap_err().is_not_found());
    assert!(store.child(entry, "b").unwrap_err().is_not_found());
    assert!(store.child(entry, "c").is_ok());
}

#[test]
fn seeded_fields_receive_snapshot_values() {
    let definition = r#"<definition>
        <group type="NXentry" name="scan1">
          <field name="title" type="NX_CHAR"/>
          <field name="count_time" type="NX_FLOAT64" units="s"/>
        </group>
      </definition>"#;
    let snap = json!({
        "nxsdatawriter_xmlsettings": [{"value": definition}],
        "scan": [
            {"path": "/scan1:NXentry/title", "value": "ascan x 0 1 10 0.1"},
            {"path": "/scan1:NXentry/count_time", "value": 0.1, "strategy": "POST"},
        ]
    });
    let mut scan = MemoryScan::scripted(info(snap), []);
    let mut store = MemStore::new();
    let cfg = config();
    let report = ScanWriter::new(&mut store, &cfg, true).run(&mut scan).unwrap();
    assert_eq!(report.failure_count(), 0);

    assert_eq!(
        store.read_field(node(&store, "/scan1/title")).unwrap(),
        Value::from("ascan x 0 1 10 0.1")
    );
    let count_time = node(&store, "/scan1/count_time");
    assert_eq!(store.read_field(count_time).unwrap().reduce(), Value::from(0.1));
    assert_eq!(store.read_attr(count_time, "units").unwrap(), Value::from("s"));
}
