use std::fs;
use std::time::{Duration, Instant};

use nxsbliss::scan::{MemoryDataStore, MemoryScan, ScanEvent, ScanInfo};
use nxsbliss::service::{STATUS_RUNNING, STATUS_STOPPED};
use nxsbliss::{
    H5FileStore, ScanOutcome, ScanWriter, StopToken, Store, Value, WriterConfig, WriterService,
};
use serde_json::json;

const HDF5_SIGNATURE: &[u8] = b"\x89HDF\r\n\x1a\n";

fn config() -> WriterConfig {
    WriterConfig::default()
        .with_next_scan_timeout(Duration::from_millis(20))
        .with_min_tick_interval(Duration::ZERO)
}

fn scan(filename: &str, number: u64) -> MemoryScan {
    let info = ScanInfo {
        filename: filename.to_string(),
        session: "demo".to_string(),
        number,
        snapshot: json!({
            "meta": [{"path": format!("/scan{number}:NXentry/title"), "value": "loopscan"}]
        }),
        ..ScanInfo::default()
    };
    MemoryScan::scripted(
        info,
        [
            ScanEvent::Block {
                label: "timer".into(),
                block: Value::from_json(&json!([0.0, 0.1, 0.2])).unwrap(),
            },
            ScanEvent::End {
                label: "timer".into(),
            },
        ],
    )
    .with_stream("timer", "float64", &[])
}

#[test]
fn scan_is_persisted_as_hdf5() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("out/scan.nxs");
    let data = MemoryDataStore::new();
    data.publish(scan(path.to_str().unwrap(), 1));

    let mut svc = WriterService::new(data, config());
    let outcome = svc.poll_once().unwrap().unwrap();
    let report = match outcome {
        ScanOutcome::Written(report) => report,
        other => panic!("unexpected outcome {other:?}"),
    };
    assert_eq!(report.channels.rows("timer"), Some(3));
    assert_eq!(report.failure_count(), 0);

    let bytes = fs::read(&path).unwrap();
    assert_eq!(&bytes[..8], HDF5_SIGNATURE);
    assert!(svc.written(&path));
    let file = H5FileStore::open(&path).unwrap();
    let entry = file.child(file.root(), "scan1").unwrap();
    assert_eq!(file.read_field(file.child(entry, "title").unwrap()).unwrap(), Value::from("loopscan"));
}

#[test]
fn second_scan_appends_to_the_same_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("shared.h5");
    let data = MemoryDataStore::new();
    data.publish(scan(path.to_str().unwrap(), 1));
    data.publish(scan(path.to_str().unwrap(), 2));

    let mut svc = WriterService::new(data, config());
    svc.poll_once().unwrap();
    let first = fs::read(&path).unwrap();
    svc.poll_once().unwrap();
    let second = fs::read(&path).unwrap();
    assert!(second.len() > first.len());

    let file = H5FileStore::open(&path).unwrap();
    assert!(file.child(file.root(), "scan1").is_ok());
    assert!(file.child(file.root(), "scan2").is_ok());
}

#[test]
fn flushes_while_streaming() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("live.nxs");
    let mut file = H5FileStore::create(&path).unwrap();
    let cfg = config().with_flush_interval(Duration::ZERO);
    let report = ScanWriter::new(&mut file, &cfg, true)
        .run(&mut scan(path.to_str().unwrap(), 7))
        .unwrap();
    assert!(report.flushes > 1);
    assert!(path.exists());
}

#[test]
fn run_returns_after_stop() {
    let data = MemoryDataStore::new();
    let dir = tempfile::tempdir().unwrap();
    data.publish(scan(dir.path().join("a.nxs").to_str().unwrap(), 1));

    let stop = StopToken::new();
    let mut svc = WriterService::new(data.clone(), config());
    let stopper = {
        let stop = stop.clone();
        std::thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            while data.pending() > 0 && Instant::now() < deadline {
                std::thread::sleep(Duration::from_millis(5));
            }
            stop.stop();
        })
    };
    let outcomes = svc.run(&stop);
    stopper.join().unwrap();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0], ScanOutcome::Written(_)));
}

#[test]
fn spawned_service_writes_published_scans() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bg.nxs");
    let data = MemoryDataStore::new();
    let handle = WriterService::new(data.clone(), config()).spawn();
    assert_eq!(handle.status(), STATUS_RUNNING);

    data.publish(scan(path.to_str().unwrap(), 1));
    let deadline = Instant::now() + Duration::from_secs(5);
    while !path.exists() && Instant::now() < deadline {
        std::thread::sleep(Duration::from_millis(5));
    }
    assert!(path.exists());

    assert_eq!(handle.join(), 1);
    assert_eq!(STATUS_STOPPED, "NXSWriter is STOPPED");
}
