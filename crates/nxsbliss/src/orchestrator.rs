//! Writing one scan end to end.

use std::fmt;
use std::thread;
use std::time::Instant;

use tracing::{debug, info, warn};

use crate::channel::{ChannelDescriptor, ChannelReport, ChannelWriter, Tick};
use crate::config::WriterConfig;
use crate::error::{Error, Result};
use crate::scan::{ScanHandle, ScanState, UpdateMode};
use crate::schema::{self, SeedReport};
use crate::snapshot::{write_snapshot, Failure, PhaseReport, Snapshot, Strategy};
use crate::store::Store;

/// Progress of a [`ScanWriter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    WaitPrepared,
    StructureSeeded,
    PreSnapshotDone,
    Streaming,
    PostSnapshotDone,
    Closed,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::WaitPrepared => "wait-prepared",
            Stage::StructureSeeded => "structure-seeded",
            Stage::PreSnapshotDone => "pre-snapshot-done",
            Stage::Streaming => "streaming",
            Stage::PostSnapshotDone => "post-snapshot-done",
            Stage::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// Everything that happened while writing one scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub scan: u64,
    pub stage: Stage,
    /// Present when the schema was instantiated.
    pub seeded: Option<SeedReport>,
    pub pre: PhaseReport,
    pub post: PhaseReport,
    pub channels: ChannelReport,
    pub flushes: usize,
    /// Failures outside the snapshot and channel writers.
    pub failures: Vec<Failure>,
}

impl ScanReport {
    fn new(scan: u64) -> Self {
        Self {
            scan,
            stage: Stage::WaitPrepared,
            seeded: None,
            pre: PhaseReport::new(Strategy::Pre),
            post: PhaseReport::new(Strategy::Post),
            channels: ChannelReport::default(),
            flushes: 0,
            failures: Vec::new(),
        }
    }

    /// Total recorded failures across all phases.
    pub fn failure_count(&self) -> usize {
        self.failures.len()
            + self.pre.failures.len()
            + self.post.failures.len()
            + self.channels.failures.len()
    }

    fn fail(&mut self, scope: &str, target: &str, error: &Error) {
        warn!(scan = self.scan, scope, target, error = %error, "scan step failed");
        self.failures.push(Failure {
            scope: scope.to_string(),
            target: target.to_string(),
            message: error.to_string(),
        });
    }
}

/// Drives one scan through its lifecycle into `store`.
///
/// The writer is consumed by [`run`](Self::run); a closed scan cannot be
/// written again through it.
pub struct ScanWriter<'a, S: Store + ?Sized> {
    store: &'a mut S,
    config: &'a WriterConfig,
    fresh: bool,
}

impl<'a, S: Store + ?Sized> ScanWriter<'a, S> {
    /// `fresh` marks a newly created file, the only kind that gets the
    /// embedded schema.
    pub fn new(store: &'a mut S, config: &'a WriterConfig, fresh: bool) -> Self {
        Self {
            store,
            config,
            fresh,
        }
    }

    /// Follow `scan` until it is closed. The store is flushed even when the
    /// scan aborts.
    pub fn run<H: ScanHandle + ?Sized>(mut self, scan: &mut H) -> Result<ScanReport> {
        let mut report = ScanReport::new(scan.info().number);
        info!(scan = report.scan, file = %scan.info().filename, "scan started");

        let outcome = self.drive(scan, &mut report);
        let flushed = self.store.flush();
        if let Err(e) = outcome {
            warn!(scan = report.scan, stage = %report.stage, error = %e, "scan aborted");
            return Err(e);
        }
        flushed?;
        report.flushes += 1;
        report.stage = Stage::Closed;
        info!(
            scan = report.scan,
            failures = report.failure_count(),
            ticks = report.channels.ticks,
            "scan finished"
        );
        Ok(report)
    }

    fn drive<H: ScanHandle + ?Sized>(&mut self, scan: &mut H, report: &mut ScanReport) -> Result<()> {
        wait_for(scan, ScanState::Prepared)?;

        let snapshot = match Snapshot::from_json(&scan.info().snapshot) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                report.fail("snapshot", "scan info", &e);
                Snapshot::default()
            }
        };

        if self.fresh {
            if let Some(xml) = snapshot.schema() {
                match schema::seed(&mut *self.store, xml) {
                    Ok(seeded) => report.seeded = Some(seeded),
                    Err(e) => report.fail("schema", "definition", &e),
                }
            }
        }
        report.stage = Stage::StructureSeeded;

        report.pre = write_snapshot(&mut *self.store, &snapshot, Strategy::Pre);
        report.stage = Stage::PreSnapshotDone;

        let info = scan.info();
        let descriptors =
            ChannelDescriptor::derive(&scan.streams(), &info.channels, &self.config.channel_root(info));
        let mut channels = ChannelWriter::new(self.config.min_tick_interval);
        channels.prepare(&mut *self.store, descriptors, &*scan);
        report.stage = Stage::Streaming;

        let mut last_flush = Instant::now();
        while scan.state() < ScanState::Stopped {
            scan.update(UpdateMode::NonBlocking)?;
            if let Tick::Throttled(remaining) = channels.tick(&mut *self.store) {
                thread::sleep(remaining);
            }
            if last_flush.elapsed() >= self.config.flush_interval {
                match self.store.flush() {
                    Ok(()) => report.flushes += 1,
                    Err(e) => report.fail("flush", "file", &e.into()),
                }
                last_flush = Instant::now();
            }
        }
        channels.drain(&mut *self.store);
        report.channels = channels.report();

        wait_for(scan, ScanState::Closed)?;
        report.post = write_snapshot(&mut *self.store, &snapshot, Strategy::Post);
        report.stage = Stage::PostSnapshotDone;
        debug!(scan = report.scan, "post snapshot written");
        Ok(())
    }
}

fn wait_for<H: ScanHandle + ?Sized>(scan: &mut H, state: ScanState) -> Result<()> {
    while scan.state() < state {
        scan.update(UpdateMode::Blocking)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path::NodePath;
    use crate::scan::{MemoryScan, ScanEvent, ScanInfo};
    use crate::store::MemStore;
    use crate::tree::lookup;
    use crate::value::Value;
    use serde_json::json;
    use std::time::Duration;

    fn config() -> WriterConfig {
        WriterConfig::default()
            .with_min_tick_interval(Duration::ZERO)
            .with_default_nexus_path("/scan{serialno}:NXentry/data:NXdata")
    }

    fn info(snapshot: serde_json::Value) -> ScanInfo {
        ScanInfo {
            filename: "/tmp/x.nxs".into(),
            number: 3,
            snapshot,
            ..ScanInfo::default()
        }
    }

    #[test]
    fn full_lifecycle() {
        let snapshot = json!({
            "nxsdatawriter_xmlsettings": [{"value":
                "<definition><group type=\"NXentry\" name=\"scan3\"><field name=\"title\" type=\"NX_CHAR\">t</field></group></definition>"}],
            "motors": [
                {"path": "/scan3:NXentry/instrument:NXinstrument/motor", "value": 1.5, "strategy": "INIT"},
                {"path": "/scan3:NXentry/end_time", "value": "late", "strategy": "FINAL"},
            ],
        });
        let mut scan = MemoryScan::scripted(
            info(snapshot),
            [
                ScanEvent::Block {
                    label: "diode".into(),
                    block: Value::from_json(&json!([1.0, 2.0])).unwrap(),
                },
                ScanEvent::End {
                    label: "diode".into(),
                },
            ],
        )
        .with_stream("diode", "float64", &[]);

        let mut store = MemStore::new();
        let cfg = config();
        let report = ScanWriter::new(&mut store, &cfg, true).run(&mut scan).unwrap();

        assert_eq!(report.stage, Stage::Closed);
        assert_eq!(report.seeded.map(|s| s.fields), Some(1));
        assert_eq!(report.pre.fields, 1);
        assert_eq!(report.post.fields, 1);
        assert_eq!(report.channels.rows("diode"), Some(2));
        assert_eq!(report.failure_count(), 0);

        let title = lookup(&store, &NodePath::parse("/scan3/title").unwrap().segments)
            .unwrap()
            .unwrap();
        assert_eq!(store.read_field(title).unwrap(), Value::from("t"));
        assert!(lookup(&store, &NodePath::parse("/scan3/data/diode").unwrap().segments)
            .unwrap()
            .is_some());
    }

    #[test]
    fn reopened_file_is_not_seeded() {
        let snapshot = json!({
            "nxsdatawriter_xmlsettings": {"value": "<definition><group type=\"NXentry\" name=\"s\"/></definition>"},
        });
        let mut scan = MemoryScan::scripted(info(snapshot), []);
        let mut store = MemStore::new();
        let cfg = config();
        let report = ScanWriter::new(&mut store, &cfg, false).run(&mut scan).unwrap();
        assert_eq!(report.seeded, None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn broken_schema_is_recorded() {
        let snapshot = json!({"nxsdatawriter_xmlsettings": [{"value": "<definition><group>"}]});
        let mut scan = MemoryScan::scripted(info(snapshot), []);
        let mut store = MemStore::new();
        let cfg = config();
        let report = ScanWriter::new(&mut store, &cfg, true).run(&mut scan).unwrap();
        assert_eq!(report.seeded, None);
        assert_eq!(report.failures.len(), 1);
        assert_eq!(report.failures[0].scope, "schema");
    }

    #[test]
    fn stalled_scan_aborts() {
        let mut scan = MemoryScan::new(info(json!({})))
            .then_state(ScanState::Prepared)
            .then_state(ScanState::Streaming);
        let mut store = MemStore::new();
        let cfg = config();
        let err = ScanWriter::new(&mut store, &cfg, true).run(&mut scan).unwrap_err();
        assert!(matches!(err, Error::ScanStalled(3)));
    }
}
