//! Error types for HDF5 file writing.

use core::fmt;
use std::io;

/// Errors that can occur while writing or reopening an HDF5 file.
#[derive(Debug)]
pub enum FormatError {
    /// A header message does not fit the 16-bit message size field.
    MessageTooLarge {
        /// Name of the object owning the message.
        object: String,
        /// Encoded message size in bytes.
        size: usize,
    },
    /// Raw data length disagrees with datatype size times element count.
    DataSizeMismatch {
        /// Name of the dataset or attribute.
        object: String,
        /// Number of bytes implied by shape and datatype.
        expected: usize,
        /// Number of bytes supplied.
        actual: usize,
    },
    /// Chunk dimensions must be `[rows, ..sample]` for the dataspace.
    ChunkShape {
        /// Dataset path.
        object: String,
        /// Current dimensions.
        dims: Vec<u64>,
        /// Requested chunk dimensions.
        chunk: Vec<u64>,
    },
    /// Rows outside the current extent, or a resize of fixed storage.
    OutOfRange {
        /// Dataset path.
        object: String,
        /// Last row touched, exclusive.
        end: u64,
        /// Current extent along dimension 0.
        extent: u64,
    },
    /// The dataset needs more chunks than the extensible array holds.
    TooManyChunks {
        /// Number of chunks requested.
        chunks: u64,
        /// Maximum supported.
        limit: u64,
    },
    /// A link name is already taken in the group.
    DuplicateLink {
        /// Group path.
        group: String,
        /// Link name.
        name: String,
    },
    /// Object handle does not exist or has the wrong kind.
    InvalidObject(String),
    /// Bad signature, version or checksum while reading a file back.
    Corrupt {
        /// Structure being read, e.g. `"superblock"`.
        what: &'static str,
        /// File address of the structure.
        addr: u64,
    },
    /// A valid HDF5 feature this writer cannot continue.
    Unsupported(String),
    /// Underlying file I/O failed.
    Io(io::Error),
}

impl fmt::Display for FormatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatError::MessageTooLarge { object, size } => {
                write!(f, "header message of {object} too large: {size} bytes")
            }
            FormatError::DataSizeMismatch {
                object,
                expected,
                actual,
            } => write!(
                f,
                "raw data size mismatch for {object}: expected {expected} bytes, got {actual}"
            ),
            FormatError::ChunkShape { object, dims, chunk } => write!(
                f,
                "chunk {chunk:?} of {object} does not span dimensions {dims:?} past the first"
            ),
            FormatError::OutOfRange { object, end, extent } => {
                write!(f, "row {end} of {object} is outside its extent of {extent}")
            }
            FormatError::TooManyChunks { chunks, limit } => {
                write!(f, "{chunks} chunks exceed the extensible array limit of {limit}")
            }
            FormatError::DuplicateLink { group, name } => {
                write!(f, "{group} already links {name}")
            }
            FormatError::InvalidObject(what) => write!(f, "invalid object: {what}"),
            FormatError::Corrupt { what, addr } => {
                write!(f, "corrupt {what} at address {addr:#x}")
            }
            FormatError::Unsupported(what) => write!(f, "unsupported HDF5 feature: {what}"),
            FormatError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for FormatError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FormatError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FormatError {
    fn from(e: io::Error) -> Self {
        FormatError::Io(e)
    }
}
