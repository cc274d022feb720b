//! The long-running writer: discovers scans and writes each to its file.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info, warn};

use crate::config::WriterConfig;
use crate::error::{Error, Result};
use crate::orchestrator::{ScanReport, ScanWriter};
use crate::scan::{DataStore, ScanHandle};
use crate::store::H5FileStore;

pub const STATUS_RUNNING: &str = "NXSWriter is RUNNING";
pub const STATUS_STOPPED: &str = "NXSWriter is STOPPED";

/// Cooperative cancellation, checked between discovery waits.
#[derive(Debug, Clone, Default)]
pub struct StopToken(Arc<AtomicBool>);

impl StopToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What became of one discovered scan.
#[derive(Debug)]
pub enum ScanOutcome {
    Written(ScanReport),
    Skipped { scan: u64, reason: String },
    Failed { scan: u64, error: Error },
}

/// Sequential scan writer over a [`DataStore`].
///
/// Files written by this service are remembered by path, so a later scan
/// targeting the same file reopens and continues it instead of being
/// refused. Nothing of a scan is kept once its file is closed.
pub struct WriterService<D: DataStore> {
    store: D,
    config: WriterConfig,
    written: HashSet<PathBuf>,
    last_timestamp: Option<u64>,
}

impl<D: DataStore> WriterService<D> {
    pub fn new(store: D, config: WriterConfig) -> Self {
        Self {
            store,
            config,
            written: HashSet::new(),
            last_timestamp: None,
        }
    }

    pub fn config(&self) -> &WriterConfig {
        &self.config
    }

    /// True if this service wrote the file at `path`.
    pub fn written(&self, path: &Path) -> bool {
        self.written.contains(path)
    }

    /// Discover and write scans until `stop` is set; returns the outcomes.
    pub fn run(&mut self, stop: &StopToken) -> Vec<ScanOutcome> {
        info!(url = %self.config.redis_url, session = %self.config.session, "writer started");
        let mut outcomes = Vec::new();
        while !stop.is_stopped() {
            match self.poll_once() {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(e) => error!(error = %e, "scan discovery failed"),
            }
        }
        info!(scans = outcomes.len(), "writer stopped");
        outcomes
    }

    /// One discovery wait; `None` when it timed out.
    pub fn poll_once(&mut self) -> Result<Option<ScanOutcome>> {
        let Some((timestamp, key)) = self
            .store
            .next_scan(self.last_timestamp, self.config.next_scan_timeout)?
        else {
            debug!("no new scan");
            return Ok(None);
        };
        self.last_timestamp = Some(timestamp);
        let mut scan = self.store.load_scan(&key)?;
        Ok(Some(self.handle_scan(&mut scan)))
    }

    /// Write `scan` unless filtered out; failures are logged and returned.
    pub fn handle_scan(&mut self, scan: &mut D::Scan) -> ScanOutcome {
        let number = scan.info().number;
        if !self.config.accepts_session(&scan.info().session) {
            let reason = format!("session {:?} not selected", scan.info().session);
            debug!(scan = number, %reason, "scan skipped");
            return ScanOutcome::Skipped { scan: number, reason };
        }
        let path = PathBuf::from(&scan.info().filename);
        if !self.config.accepts(&path) {
            let reason = format!("unsupported file suffix: {}", path.display());
            warn!(scan = number, %reason, "scan skipped");
            return ScanOutcome::Skipped { scan: number, reason };
        }
        match self.write_scan(path, scan) {
            Ok(report) => ScanOutcome::Written(report),
            Err(error) => {
                error!(scan = number, error = %error, "scan failed");
                ScanOutcome::Failed { scan: number, error }
            }
        }
    }

    fn write_scan(&mut self, path: PathBuf, scan: &mut D::Scan) -> Result<ScanReport> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let ours = self.written.contains(&path);
        let (mut file, fresh) = if ours && path.exists() {
            (H5FileStore::open(&path)?, false)
        } else if path.exists() {
            return Err(Error::ExistingFile(path));
        } else {
            (H5FileStore::create(&path)?, true)
        };
        self.written.insert(path.clone());
        info!(scan = scan.info().number, file = %path.display(), fresh, "writing scan");
        ScanWriter::new(&mut file, &self.config, fresh).run(scan)
    }
}

impl<D> WriterService<D>
where
    D: DataStore + Send + 'static,
{
    /// Run on a background thread.
    pub fn spawn(mut self) -> ServiceHandle {
        let stop = StopToken::new();
        let token = stop.clone();
        let thread = thread::spawn(move || self.run(&token).len());
        ServiceHandle {
            stop,
            thread: Some(thread),
        }
    }
}

/// Control side of a spawned [`WriterService`].
pub struct ServiceHandle {
    stop: StopToken,
    thread: Option<JoinHandle<usize>>,
}

impl ServiceHandle {
    /// Ask the service to stop after the current discovery wait.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn status(&self) -> &'static str {
        match &self.thread {
            Some(t) if !t.is_finished() => STATUS_RUNNING,
            _ => STATUS_STOPPED,
        }
    }

    /// Stop and wait; returns how many scans were handled.
    pub fn join(mut self) -> usize {
        self.stop();
        match self.thread.take().map(JoinHandle::join) {
            Some(Ok(scans)) => scans,
            Some(Err(_)) => {
                error!("writer thread panicked");
                0
            }
            None => 0,
        }
    }
}

impl Drop for ServiceHandle {
    fn drop(&mut self) {
        self.stop.stop();
    }
}
