//! Pure-Rust writer for the subset of HDF5 that NeXus scan files need.
//!
//! Files are written incrementally through [`H5File`]: superblock v3,
//! version 2 object headers with compact links and attributes, contiguous
//! storage, chunked storage indexed by an extensible array, and
//! variable-length strings in the global heap. Files written this way can
//! be reopened and continued.

pub mod checksum;
pub mod earray;
pub mod error;
pub mod file;
pub mod heap;
pub mod io;
pub mod message;
pub mod object_header;

pub use error::FormatError;
pub use file::{DatasetSpec, DatasetView, H5File, ObjectId, ROOT};
pub use io::RandomAccess;
pub use message::{Dataspace, Datatype, H5Attribute, MAX_MESSAGE_SIZE, UNDEF_ADDR, UNLIMITED};
