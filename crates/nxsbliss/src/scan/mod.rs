//! The scan-stream collaborator: scan discovery, lifecycle and live cursors.
//!
//! Implementations wrap whatever publishes scans (a Redis-backed data
//! store in production). [`memory`] provides an in-process one.

pub mod memory;

pub use memory::{MemoryDataStore, MemoryScan, ScanEvent};

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::error::Result;
use crate::value::Value;

/// Externally driven scan lifecycle; only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ScanState {
    Unstarted,
    Prepared,
    Streaming,
    Stopped,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// Wait for the next state change.
    Blocking,
    /// Pick up whatever is pending and return.
    NonBlocking,
}

/// Per-channel overrides published in the scan info.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelInfo {
    #[serde(default, alias = "nexus_path")]
    pub path: Option<String>,
    #[serde(default, alias = "dtype")]
    pub kind: Option<String>,
    #[serde(default)]
    pub shape: Option<Vec<usize>>,
    #[serde(default)]
    pub skip: bool,
}

/// Scan metadata as published at scan start.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScanInfo {
    pub filename: String,
    pub session: String,
    #[serde(alias = "scan_nb")]
    pub number: u64,
    pub serialno: Option<u64>,
    pub entryname: Option<String>,
    pub snapshot: Json,
    #[serde(alias = "datadesc")]
    pub channels: BTreeMap<String, ChannelInfo>,
}

impl ScanInfo {
    pub fn from_json(json: &Json) -> Result<ScanInfo> {
        Ok(ScanInfo::deserialize(json)?)
    }

    /// Serial number, falling back to the scan number.
    pub fn serialno(&self) -> u64 {
        self.serialno.unwrap_or(self.number)
    }

    pub fn entryname(&self) -> String {
        self.entryname
            .clone()
            .unwrap_or_else(|| format!("scan{}", self.serialno()))
    }
}

/// A stream exposed by a scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamInfo {
    pub label: String,
    pub kind: String,
    /// Shape of one sample.
    pub shape: Vec<usize>,
}

/// Result of one cursor read.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamRead {
    /// Contiguous points, dimension 0 indexing the point.
    Block(Value),
    /// Nothing new yet.
    Empty,
    /// The stream is finished.
    EndOfStream,
}

/// Live read position in one stream.
pub trait StreamCursor: Send {
    fn read(&mut self) -> Result<StreamRead>;
}

/// One scan as seen by the writer.
pub trait ScanHandle {
    fn info(&self) -> &ScanInfo;

    fn state(&self) -> ScanState;

    /// Refresh `state()` from the publisher.
    fn update(&mut self, mode: UpdateMode) -> Result<()>;

    fn streams(&self) -> Vec<StreamInfo>;

    /// Cursor positioned at the start of stream `label`.
    fn cursor(&self, label: &str) -> Option<Box<dyn StreamCursor>>;
}

/// Publishes scans in order.
pub trait DataStore {
    type Scan: ScanHandle;

    /// Next scan published after `since`, waiting up to `timeout`;
    /// `None` when nothing arrived in time.
    fn next_scan(&mut self, since: Option<u64>, timeout: Duration)
        -> Result<Option<(u64, String)>>;

    fn load_scan(&mut self, key: &str) -> Result<Self::Scan>;
}
