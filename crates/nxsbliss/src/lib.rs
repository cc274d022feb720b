//! Incremental NeXus/HDF5 writer for live scan streams.
//!
//! A [`WriterService`] discovers scans from a [`DataStore`](scan::DataStore)
//! and hands each one to a [`ScanWriter`], which
//!
//! 1. seeds the file from the scan's embedded NeXus definition,
//! 2. writes the pre-scan metadata snapshot,
//! 3. appends channel data block by block while the scan runs,
//! 4. writes the post-scan snapshot and closes the file.
//!
//! Files are written incrementally through [`H5FileStore`]: rows go to disk
//! as they arrive and each flush only rewrites changed metadata. A
//! [`MemStore`] with the same [`Store`] interface backs tests and staging.
//!
//! ```no_run
//! use nxsbliss::scan::MemoryDataStore;
//! use nxsbliss::{WriterConfig, WriterService};
//!
//! let scans = MemoryDataStore::new();
//! let handle = WriterService::new(scans, WriterConfig::default()).spawn();
//! println!("{}", handle.status());
//! handle.join();
//! ```

pub mod attrs;
pub mod channel;
pub mod config;
pub mod error;
pub mod kind;
pub mod orchestrator;
pub mod path;
pub mod scan;
pub mod schema;
pub mod service;
pub mod snapshot;
pub mod store;
pub mod tree;
pub mod value;

pub use channel::{ChannelDescriptor, ChannelReport, ChannelWriter, Tick};
pub use config::WriterConfig;
pub use error::{Error, Result};
pub use kind::ValueKind;
pub use orchestrator::{ScanReport, ScanWriter, Stage};
pub use path::{NodePath, Segment, Target};
pub use service::{ScanOutcome, ServiceHandle, StopToken, WriterService};
pub use snapshot::{write_snapshot, PhaseReport, Snapshot, SnapshotItem, Strategy};
pub use store::{H5FileStore, Journal, MemStore, NodeId, Store, StoreError};
pub use value::{Scalar, Value};
