use std::path::PathBuf;

use crate::store::StoreError;

/// Errors raised while turning scan metadata and streams into a file.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed path {path:?}: {reason}")]
    MalformedPath { path: String, reason: &'static str },

    #[error("unknown value kind {0:?}")]
    UnknownKind(String),

    #[error("invalid value: {0}")]
    Value(String),

    #[error("schema error: {0}")]
    Schema(String),

    #[error("stream error on channel {label}: {reason}")]
    Stream { label: String, reason: String },

    #[error("scan {0} has no more state updates")]
    ScanStalled(u64),

    #[error("scan not found: {0}")]
    ScanNotFound(String),

    #[error("refusing to overwrite existing file {}", .0.display())]
    ExistingFile(PathBuf),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("XML error: {0}")]
    Xml(#[from] quick_xml::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// True for a missing node or attribute in the store.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Store(StoreError::NotFound { .. }))
    }
}
