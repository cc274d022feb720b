//! Incremental HDF5 file writer.
//!
//! Raw data goes to the file as soon as it is written: contiguous storage
//! is allocated when a dataset is created and chunks when their first row
//! arrives. Object headers, chunk indexes and the global heap are written
//! on [`H5File::flush`]. A header is rewritten in place while it fits its
//! allocation and moved to the end of the file otherwise, which dirties
//! the parent group's link. The superblock is written last.

use std::collections::{HashSet, VecDeque};
use std::fs::File;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};

use crate::checksum::lookup3;
use crate::earray::ChunkIndex;
use crate::error::FormatError;
use crate::heap::GlobalHeap;
use crate::io::{read_vec, Eof, RandomAccess};
use crate::message::{
    self, put_u32, put_u64, Dataspace, Datatype, H5Attribute, Layout, MessageType,
    MAX_MESSAGE_SIZE, UNDEF_ADDR, UNLIMITED,
};
use crate::object_header::{self, ObjectHeaderWriter};

/// HDF5 file signature.
pub const SIGNATURE: [u8; 8] = [0x89, b'H', b'D', b'F', b'\r', b'\n', 0x1a, b'\n'];

/// Size of the version 3 superblock with 8-byte offsets and lengths.
pub const SUPERBLOCK_SIZE: u64 = 48;

/// Handle to a group or dataset of an open file.
pub type ObjectId = usize;

/// The root group.
pub const ROOT: ObjectId = 0;

/// Shape and storage of a new dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetSpec {
    pub datatype: Datatype,
    pub dims: Vec<u64>,
    /// Chunk shape `[rows, ..dims[1..]]`; makes dimension 0 unlimited.
    pub chunk: Option<Vec<u64>>,
}

impl DatasetSpec {
    /// Fixed-size dataset stored contiguously; empty `dims` is a scalar.
    pub fn contiguous(datatype: Datatype, dims: &[u64]) -> Self {
        Self {
            datatype,
            dims: dims.to_vec(),
            chunk: None,
        }
    }

    /// Dataset extensible along dimension 0, `rows` per chunk.
    pub fn extensible(datatype: Datatype, dims: &[u64], rows: u64) -> Self {
        let mut chunk = vec![rows.max(1)];
        chunk.extend(dims.iter().skip(1).map(|&d| d.max(1)));
        Self {
            datatype,
            dims: dims.to_vec(),
            chunk: Some(chunk),
        }
    }
}

/// Current description of a dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetView {
    pub datatype: Datatype,
    pub dims: Vec<u64>,
    pub chunk: Option<Vec<u64>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Extent {
    addr: u64,
    len: u64,
}

#[derive(Debug)]
enum Storage {
    Contiguous { addr: u64, size: u64 },
    Chunked { chunk: Vec<u64>, index: ChunkIndex },
}

#[derive(Debug)]
struct DatasetState {
    datatype: Datatype,
    dims: Vec<u64>,
    storage: Storage,
}

impl DatasetState {
    fn row_bytes(&self) -> u64 {
        self.dims.iter().skip(1).product::<u64>() * self.datatype.element_size() as u64
    }

    fn total_bytes(&self) -> u64 {
        self.dims.iter().product::<u64>() * self.datatype.element_size() as u64
    }

    fn space(&self) -> Dataspace {
        match &self.storage {
            Storage::Contiguous { .. } => Dataspace::of(&self.dims),
            Storage::Chunked { .. } => {
                let mut max_dims = self.dims.clone();
                max_dims[0] = UNLIMITED;
                Dataspace::Simple {
                    dims: self.dims.clone(),
                    max_dims: Some(max_dims),
                }
            }
        }
    }

    fn layout(&self) -> Layout {
        match &self.storage {
            Storage::Contiguous { addr, size } => Layout::Contiguous {
                addr: *addr,
                size: *size,
            },
            Storage::Chunked { chunk, index } => Layout::Chunked {
                chunk: chunk.clone(),
                index: index.addr().unwrap_or(UNDEF_ADDR),
            },
        }
    }
}

#[derive(Debug)]
enum Body {
    Group { links: Vec<(String, ObjectId)> },
    Dataset(DatasetState),
}

#[derive(Debug)]
struct Object {
    path: String,
    parent: Option<ObjectId>,
    header: Option<Extent>,
    dirty: bool,
    attrs: Vec<H5Attribute>,
    body: Body,
}

fn join(parent: &str, name: &str) -> String {
    if parent == "/" {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

fn check_chunk(object: &str, dims: &[u64], chunk: &[u64]) -> Result<(), FormatError> {
    let fits = !dims.is_empty()
        && chunk.len() == dims.len()
        && chunk[0] >= 1
        && dims[1..].iter().zip(&chunk[1..]).all(|(&d, &c)| c == d.max(1));
    if fits {
        Ok(())
    } else {
        Err(FormatError::ChunkShape {
            object: object.to_string(),
            dims: dims.to_vec(),
            chunk: chunk.to_vec(),
        })
    }
}

fn superblock(eof: u64, root: u64) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SUPERBLOCK_SIZE as usize);
    buf.extend_from_slice(&SIGNATURE);
    buf.extend_from_slice(&[3, 8, 8, 0]);
    put_u64(&mut buf, 0);
    put_u64(&mut buf, UNDEF_ADDR);
    put_u64(&mut buf, eof);
    put_u64(&mut buf, root);
    let sum = lookup3(&buf);
    put_u32(&mut buf, sum);
    buf
}

/// Header allocation with room to grow.
fn header_allocation(needed: u64) -> u64 {
    (needed + (needed / 2).max(64) + 7) & !7
}

/// An HDF5 file open for incremental writing.
#[derive(Debug)]
pub struct H5File<F: RandomAccess> {
    io: F,
    eof: Eof,
    objects: Vec<Object>,
    heap: GlobalHeap,
}

impl H5File<File> {
    /// Create or truncate the file at `path`.
    pub fn create(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(path)?;
        Self::new(file)
    }

    /// Reopen a file written by this crate to continue writing it.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, FormatError> {
        let file = File::options().read(true).write(true).open(path)?;
        Self::load(file)
    }
}

impl<F: RandomAccess> H5File<F> {
    /// Start an empty file on `io`; the superblock and root group are
    /// written immediately.
    pub fn new(io: F) -> Result<Self, FormatError> {
        let mut file = Self {
            io,
            eof: Eof(SUPERBLOCK_SIZE),
            objects: vec![Object {
                path: "/".to_string(),
                parent: None,
                header: None,
                dirty: true,
                attrs: Vec::new(),
                body: Body::Group { links: Vec::new() },
            }],
            heap: GlobalHeap::new(),
        };
        file.flush()?;
        Ok(file)
    }

    /// Read the object tree of an existing file.
    pub fn load(io: F) -> Result<Self, FormatError> {
        let sb = read_vec(&io, 0, SUPERBLOCK_SIZE as usize)?;
        let corrupt = FormatError::Corrupt {
            what: "superblock",
            addr: 0,
        };
        if sb[..8] != SIGNATURE {
            return Err(corrupt);
        }
        if sb[8] != 3 || sb[9] != 8 || sb[10] != 8 {
            return Err(FormatError::Unsupported(format!(
                "superblock version {} with {}-byte offsets",
                sb[8], sb[9]
            )));
        }
        if lookup3(&sb[..44]) != LittleEndian::read_u32(&sb[44..]) {
            return Err(corrupt);
        }
        let eof = LittleEndian::read_u64(&sb[28..]).max(io.len()?);
        let root = LittleEndian::read_u64(&sb[36..]);

        let mut objects: Vec<Object> = Vec::new();
        let mut seen = HashSet::new();
        let mut pending = VecDeque::from([(root, "/".to_string(), None)]);
        while let Some((addr, path, parent)) = pending.pop_front() {
            if !seen.insert(addr) {
                return Err(FormatError::Unsupported(format!(
                    "{path} links an object already in the tree"
                )));
            }
            let (mut object, links) = load_object(&io, addr, path, parent)?;
            let id = objects.len();
            if let Body::Group { links: ids } = &mut object.body {
                for (name, child) in links {
                    ids.push((name.clone(), id + 1 + pending.len()));
                    pending.push_back((child, join(&object.path, &name), Some(id)));
                }
            }
            objects.push(object);
        }

        Ok(Self {
            io,
            eof: Eof(eof),
            objects,
            heap: GlobalHeap::new(),
        })
    }

    pub fn into_inner(self) -> F {
        self.io
    }

    pub fn get_ref(&self) -> &F {
        &self.io
    }

    fn object(&self, id: ObjectId) -> Result<&Object, FormatError> {
        self.objects
            .get(id)
            .ok_or_else(|| FormatError::InvalidObject(format!("no object #{id}")))
    }

    fn object_mut(&mut self, id: ObjectId) -> Result<&mut Object, FormatError> {
        self.objects
            .get_mut(id)
            .ok_or_else(|| FormatError::InvalidObject(format!("no object #{id}")))
    }

    fn state(&self, id: ObjectId) -> Result<(&str, &DatasetState), FormatError> {
        let obj = self.object(id)?;
        match &obj.body {
            Body::Dataset(ds) => Ok((&obj.path, ds)),
            Body::Group { .. } => Err(FormatError::InvalidObject(format!("{} is a group", obj.path))),
        }
    }

    /// Slash-separated path of `id`.
    pub fn path(&self, id: ObjectId) -> Result<&str, FormatError> {
        Ok(&self.object(id)?.path)
    }

    pub fn is_group(&self, id: ObjectId) -> Result<bool, FormatError> {
        Ok(matches!(self.object(id)?.body, Body::Group { .. }))
    }

    /// Child of group `parent` linked as `name`.
    pub fn child(&self, parent: ObjectId, name: &str) -> Result<Option<ObjectId>, FormatError> {
        let obj = self.object(parent)?;
        match &obj.body {
            Body::Group { links } => Ok(links.iter().find(|(n, _)| n == name).map(|(_, id)| *id)),
            Body::Dataset(_) => Err(FormatError::InvalidObject(format!("{} is not a group", obj.path))),
        }
    }

    /// Names and handles of the members of group `id`, in link order.
    pub fn members(&self, id: ObjectId) -> Result<&[(String, ObjectId)], FormatError> {
        let obj = self.object(id)?;
        match &obj.body {
            Body::Group { links } => Ok(links),
            Body::Dataset(_) => Err(FormatError::InvalidObject(format!("{} is not a group", obj.path))),
        }
    }

    fn link(&mut self, parent: ObjectId, name: &str, body: Body) -> Result<ObjectId, FormatError> {
        let id = self.objects.len();
        let obj = self.object_mut(parent)?;
        let path = join(&obj.path, name);
        match &mut obj.body {
            Body::Group { links } => {
                if links.iter().any(|(n, _)| n == name) {
                    return Err(FormatError::DuplicateLink {
                        group: obj.path.clone(),
                        name: name.to_string(),
                    });
                }
                links.push((name.to_string(), id));
            }
            Body::Dataset(_) => {
                return Err(FormatError::InvalidObject(format!("{} is not a group", obj.path)));
            }
        }
        obj.dirty = true;
        self.objects.push(Object {
            path,
            parent: Some(parent),
            header: None,
            dirty: true,
            attrs: Vec::new(),
            body,
        });
        Ok(id)
    }

    pub fn create_group(&mut self, parent: ObjectId, name: &str) -> Result<ObjectId, FormatError> {
        self.link(parent, name, Body::Group { links: Vec::new() })
    }

    /// Create a dataset; contiguous storage is allocated and zeroed now.
    pub fn create_dataset(
        &mut self,
        parent: ObjectId,
        name: &str,
        spec: DatasetSpec,
    ) -> Result<ObjectId, FormatError> {
        let DatasetSpec {
            datatype,
            dims,
            chunk,
        } = spec;
        let storage = match chunk {
            Some(chunk) => {
                let path = join(self.path(parent)?, name);
                check_chunk(&path, &dims, &chunk)?;
                Storage::Chunked {
                    chunk,
                    index: ChunkIndex::new(),
                }
            }
            None => Storage::Contiguous {
                addr: UNDEF_ADDR,
                size: dims.iter().product::<u64>() * datatype.element_size() as u64,
            },
        };
        let id = self.link(
            parent,
            name,
            Body::Dataset(DatasetState {
                datatype,
                dims,
                storage,
            }),
        )?;
        self.allocate_contiguous(id)?;
        Ok(id)
    }

    fn allocate_contiguous(&mut self, id: ObjectId) -> Result<u64, FormatError> {
        let obj = &mut self.objects[id];
        let Body::Dataset(DatasetState {
            storage: Storage::Contiguous { addr, size },
            ..
        }) = &mut obj.body
        else {
            return Ok(UNDEF_ADDR);
        };
        if *addr == UNDEF_ADDR && *size > 0 {
            *addr = self.eof.alloc(*size);
            self.io.write_at(*addr, &vec![0u8; *size as usize])?;
            obj.dirty = true;
        }
        Ok(*addr)
    }

    pub fn dataset(&self, id: ObjectId) -> Result<DatasetView, FormatError> {
        let (_, ds) = self.state(id)?;
        Ok(DatasetView {
            datatype: ds.datatype.clone(),
            dims: ds.dims.clone(),
            chunk: match &ds.storage {
                Storage::Chunked { chunk, .. } => Some(chunk.clone()),
                Storage::Contiguous { .. } => None,
            },
        })
    }

    /// Set the extent of an extensible dataset along dimension 0. Rows
    /// past a shrink read back as zero if the dataset grows again.
    pub fn resize(&mut self, id: ObjectId, rows: u64) -> Result<(), FormatError> {
        let obj = self
            .objects
            .get_mut(id)
            .ok_or_else(|| FormatError::InvalidObject(format!("no object #{id}")))?;
        let Body::Dataset(ds) = &mut obj.body else {
            return Err(FormatError::InvalidObject(format!("{} is a group", obj.path)));
        };
        let row_bytes = ds.row_bytes();
        let extent = ds.dims.first().copied().unwrap_or(1);
        match &mut ds.storage {
            Storage::Contiguous { .. } if rows == extent => return Ok(()),
            Storage::Contiguous { .. } => {
                return Err(FormatError::OutOfRange {
                    object: obj.path.clone(),
                    end: rows,
                    extent,
                });
            }
            Storage::Chunked { chunk, index } => {
                let k = chunk[0];
                if rows < extent {
                    if rows % k != 0 {
                        if let Some(addr) = index.get(rows / k) {
                            let tail = (k - rows % k) * row_bytes;
                            self.io
                                .write_at(addr + (rows % k) * row_bytes, &vec![0u8; tail as usize])?;
                        }
                    }
                    for c in rows.div_ceil(k)..index.len() {
                        if index.get(c).is_some() {
                            index.set(c, UNDEF_ADDR)?;
                        }
                    }
                }
            }
        }
        ds.dims[0] = rows;
        obj.dirty = true;
        Ok(())
    }

    /// Write whole rows starting at row `offset`; `raw` holds a multiple
    /// of the row size.
    pub fn write_rows(&mut self, id: ObjectId, offset: u64, raw: &[u8]) -> Result<(), FormatError> {
        let (path, ds) = self.state(id)?;
        if ds.dims.is_empty() {
            return Err(FormatError::InvalidObject(format!("{path} is scalar")));
        }
        let row_bytes = ds.row_bytes();
        if row_bytes == 0 {
            return Ok(());
        }
        if raw.len() as u64 % row_bytes != 0 {
            return Err(FormatError::DataSizeMismatch {
                object: path.to_string(),
                expected: (raw.len() as u64).next_multiple_of(row_bytes) as usize,
                actual: raw.len(),
            });
        }
        let end = offset + raw.len() as u64 / row_bytes;
        if end > ds.dims[0] {
            return Err(FormatError::OutOfRange {
                object: path.to_string(),
                end,
                extent: ds.dims[0],
            });
        }

        if matches!(ds.storage, Storage::Contiguous { .. }) {
            let addr = self.allocate_contiguous(id)?;
            self.io.write_at(addr + offset * row_bytes, raw)?;
            return Ok(());
        }
        let Body::Dataset(DatasetState {
            storage: Storage::Chunked { chunk, index },
            ..
        }) = &mut self.objects[id].body
        else {
            return Ok(());
        };
        let k = chunk[0];
        let chunk_bytes = k * row_bytes;
        let mut row = offset;
        while row < end {
            let (c, within) = (row / k, row % k);
            let n = (k - within).min(end - row);
            let start = ((row - offset) * row_bytes) as usize;
            let span = &raw[start..start + (n * row_bytes) as usize];
            let addr = match index.get(c) {
                Some(addr) => addr,
                None => {
                    let addr = self.eof.alloc(chunk_bytes);
                    if n < k {
                        self.io.write_at(addr, &vec![0u8; chunk_bytes as usize])?;
                    }
                    index.set(c, addr)?;
                    addr
                }
            };
            self.io.write_at(addr + within * row_bytes, span)?;
            row += n;
        }
        Ok(())
    }

    /// Replace the whole content of a dataset.
    pub fn write(&mut self, id: ObjectId, raw: &[u8]) -> Result<(), FormatError> {
        let (path, ds) = self.state(id)?;
        let expected = ds.total_bytes() as usize;
        if raw.len() != expected {
            return Err(FormatError::DataSizeMismatch {
                object: path.to_string(),
                expected,
                actual: raw.len(),
            });
        }
        if matches!(ds.storage, Storage::Chunked { .. }) {
            return self.write_rows(id, 0, raw);
        }
        if expected > 0 {
            let addr = self.allocate_contiguous(id)?;
            self.io.write_at(addr, raw)?;
        }
        Ok(())
    }

    /// Whole content of a dataset; unwritten chunks read as zero.
    pub fn read(&self, id: ObjectId) -> Result<Vec<u8>, FormatError> {
        let (_, ds) = self.state(id)?;
        let mut out = vec![0u8; ds.total_bytes() as usize];
        match &ds.storage {
            Storage::Contiguous { addr, .. } => {
                if *addr != UNDEF_ADDR && !out.is_empty() {
                    self.io.read_at(*addr, &mut out)?;
                }
            }
            Storage::Chunked { chunk, index } => {
                let (k, rows, row_bytes) = (chunk[0], ds.dims[0], ds.row_bytes());
                if row_bytes == 0 {
                    return Ok(out);
                }
                for c in 0..rows.div_ceil(k) {
                    if let Some(addr) = index.get(c) {
                        let first = c * k;
                        let n = k.min(rows - first);
                        let start = (first * row_bytes) as usize;
                        let end = start + (n * row_bytes) as usize;
                        self.io.read_at(addr, &mut out[start..end])?;
                    }
                }
            }
        }
        Ok(out)
    }

    pub fn attributes(&self, id: ObjectId) -> Result<&[H5Attribute], FormatError> {
        Ok(&self.object(id)?.attrs)
    }

    pub fn attribute(&self, id: ObjectId, name: &str) -> Result<Option<&H5Attribute>, FormatError> {
        Ok(self.object(id)?.attrs.iter().find(|a| a.name == name))
    }

    /// Add or replace an attribute. Attributes are stored in the object
    /// header, so one whose message exceeds 64 KiB is refused.
    pub fn set_attribute(&mut self, id: ObjectId, attr: H5Attribute) -> Result<(), FormatError> {
        let obj = self.object_mut(id)?;
        let expected = attr.space.num_elements() as usize * attr.datatype.element_size();
        if attr.raw.len() != expected {
            return Err(FormatError::DataSizeMismatch {
                object: format!("{}@{}", obj.path, attr.name),
                expected,
                actual: attr.raw.len(),
            });
        }
        let size = H5Attribute::message_size(&attr.name, &attr.datatype, &attr.space);
        if size > MAX_MESSAGE_SIZE {
            return Err(FormatError::MessageTooLarge {
                object: format!("{}@{}", obj.path, attr.name),
                size,
            });
        }
        match obj.attrs.iter_mut().find(|a| a.name == attr.name) {
            Some(slot) => *slot = attr,
            None => obj.attrs.push(attr),
        }
        obj.dirty = true;
        Ok(())
    }

    /// Remove an attribute; false if there was none.
    pub fn remove_attribute(&mut self, id: ObjectId, name: &str) -> Result<bool, FormatError> {
        let obj = self.object_mut(id)?;
        let before = obj.attrs.len();
        obj.attrs.retain(|a| a.name != name);
        let removed = obj.attrs.len() != before;
        obj.dirty |= removed;
        Ok(removed)
    }

    /// Store strings in the global heap; returns their packed elements
    /// for a [`Datatype::VarString`] dataset or attribute.
    pub fn put_strings(&mut self, strings: &[&str]) -> Result<Vec<u8>, FormatError> {
        self.heap.put(&mut self.io, &mut self.eof, strings)
    }

    /// Resolve packed variable-length string elements.
    pub fn get_strings(&self, raw: &[u8]) -> Result<Vec<String>, FormatError> {
        self.heap.get(&self.io, raw)
    }

    fn header_messages(&self, id: ObjectId) -> Result<ObjectHeaderWriter, FormatError> {
        let obj = &self.objects[id];
        let mut w = ObjectHeaderWriter::new();
        match &obj.body {
            Body::Group { links } => {
                w.push(MessageType::LinkInfo, message::link_info());
                w.push(MessageType::GroupInfo, message::group_info());
                for (name, child) in links {
                    let addr = self.objects[*child]
                        .header
                        .map(|e| e.addr)
                        .ok_or_else(|| FormatError::InvalidObject(format!("{name} has no header")))?;
                    w.push(MessageType::Link, message::hard_link(name, addr));
                }
            }
            Body::Dataset(ds) => {
                w.push_constant(MessageType::Datatype, ds.datatype.encode());
                w.push(MessageType::Dataspace, ds.space().encode());
                w.push_constant(MessageType::FillValue, message::fill_value());
                w.push(
                    MessageType::DataLayout,
                    ds.layout().encode(ds.datatype.element_size()),
                );
            }
        }
        for attr in &obj.attrs {
            w.push(MessageType::Attribute, attr.encode());
        }
        Ok(w)
    }

    fn write_header(&mut self, id: ObjectId) -> Result<(), FormatError> {
        let w = self.header_messages(id)?;
        let needed = w.encoded_len() as u64;
        let (extent, moved) = match self.objects[id].header {
            Some(extent) if needed <= extent.len => (extent, false),
            _ => {
                let len = header_allocation(needed);
                let addr = self.eof.alloc(len);
                (Extent { addr, len }, true)
            }
        };
        let obj = &mut self.objects[id];
        let bytes = w.finish_padded(&obj.path, extent.len as usize)?;
        self.io.write_at(extent.addr, &bytes)?;
        obj.header = Some(extent);
        obj.dirty = false;
        if let (true, Some(parent)) = (moved, obj.parent) {
            self.objects[parent].dirty = true;
        }
        Ok(())
    }

    /// Write pending metadata and the superblock, then sync.
    pub fn flush(&mut self) -> Result<(), FormatError> {
        self.heap.flush(&mut self.io)?;
        for obj in &mut self.objects {
            if let Body::Dataset(DatasetState {
                storage: Storage::Chunked { index, .. },
                ..
            }) = &mut obj.body
            {
                if index.flush(&mut self.io, &mut self.eof)? {
                    obj.dirty = true;
                }
            }
        }
        // Children before parents, so links see final header addresses.
        for id in (0..self.objects.len()).rev() {
            if self.objects[id].dirty {
                self.write_header(id)?;
            }
        }
        let root = self.objects[ROOT]
            .header
            .map_or(UNDEF_ADDR, |extent| extent.addr);
        self.io.write_at(0, &superblock(self.eof.0, root))?;
        self.io.sync()?;
        Ok(())
    }
}

fn load_object<F: RandomAccess>(
    io: &F,
    addr: u64,
    path: String,
    parent: Option<ObjectId>,
) -> Result<(Object, Vec<(String, u64)>), FormatError> {
    let avail = io.len()?.saturating_sub(addr).min(64) as usize;
    let len = object_header::header_len(&read_vec(io, addr, avail)?, addr)?;
    let header = read_vec(io, addr, len)?;

    let (mut datatype, mut space, mut layout) = (None, None, None);
    let (mut links, mut attrs, mut group) = (Vec::new(), Vec::new(), false);
    for (code, body) in object_header::parse(&header, addr)? {
        match MessageType::from_code(code) {
            Some(MessageType::LinkInfo) => {
                group = true;
                if !message::link_info_is_compact(&body)? {
                    return Err(FormatError::Unsupported(format!("dense link storage in {path}")));
                }
            }
            Some(MessageType::GroupInfo) => group = true,
            Some(MessageType::Link) => links.push(message::decode_link(&body)?),
            Some(MessageType::Datatype) => datatype = Some(Datatype::decode(&body)?),
            Some(MessageType::Dataspace) => space = Some(Dataspace::decode(&body)?),
            Some(MessageType::DataLayout) => layout = Some(Layout::decode(&body)?),
            Some(MessageType::Attribute) => attrs.push(H5Attribute::decode(&body)?),
            Some(MessageType::AttributeInfo) if message::attribute_info_is_dense(&body)? => {
                return Err(FormatError::Unsupported(format!("dense attribute storage in {path}")));
            }
            Some(MessageType::SymbolTable) => {
                return Err(FormatError::Unsupported(format!("symbol table group {path}")));
            }
            _ => {}
        }
    }

    let body = match (datatype, space, layout) {
        (Some(datatype), Some(space), Some(layout)) => {
            let dims = space.dims().to_vec();
            let storage = match layout {
                Layout::Contiguous { addr, size } => Storage::Contiguous { addr, size },
                Layout::Chunked { chunk, index } => {
                    let unlimited = matches!(
                        &space,
                        Dataspace::Simple { max_dims: Some(m), .. } if m.first() == Some(&UNLIMITED)
                    );
                    if !unlimited {
                        return Err(FormatError::Unsupported(format!(
                            "{path} is chunked without an unlimited first dimension"
                        )));
                    }
                    check_chunk(&path, &dims, &chunk)?;
                    let index = if index == UNDEF_ADDR {
                        ChunkIndex::new()
                    } else {
                        ChunkIndex::load(io, index)?
                    };
                    Storage::Chunked { chunk, index }
                }
            };
            Body::Dataset(DatasetState {
                datatype,
                dims,
                storage,
            })
        }
        (None, None, None) if group || !links.is_empty() => Body::Group { links: Vec::new() },
        _ => {
            return Err(FormatError::Unsupported(format!(
                "{path} is neither a group nor a dataset"
            )));
        }
    };

    let object = Object {
        path,
        parent,
        header: Some(Extent {
            addr,
            len: len as u64,
        }),
        dirty: false,
        attrs,
        body,
    };
    Ok((object, links))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int32() -> Datatype {
        Datatype::Integer { size: 4, signed: true }
    }

    fn bytes(values: &[i32]) -> Vec<u8> {
        values.iter().flat_map(|v| v.to_le_bytes()).collect()
    }

    #[test]
    fn new_file_is_superblock_plus_root() {
        let file = H5File::new(Vec::new()).unwrap();
        let image = file.into_inner();
        assert_eq!(&image[..8], &SIGNATURE);
        assert_eq!(&image[48..52], b"OHDR");
        let eof = LittleEndian::read_u64(&image[28..]);
        assert_eq!(eof, image.len() as u64);
        assert_eq!(LittleEndian::read_u64(&image[36..]), 48);
        assert_eq!(&image[44..48], &lookup3(&image[..44]).to_le_bytes());
    }

    #[test]
    fn chunk_must_span_trailing_dimensions() {
        let mut file = H5File::new(Vec::new()).unwrap();
        let spec = DatasetSpec {
            datatype: int32(),
            dims: vec![0, 4],
            chunk: Some(vec![1, 2]),
        };
        assert!(matches!(
            file.create_dataset(ROOT, "x", spec),
            Err(FormatError::ChunkShape { .. })
        ));
        let scalar = DatasetSpec {
            datatype: int32(),
            dims: vec![],
            chunk: Some(vec![]),
        };
        assert!(file.create_dataset(ROOT, "s", scalar).is_err());
    }

    #[test]
    fn rows_land_in_their_chunks() {
        let mut file = H5File::new(Vec::new()).unwrap();
        let id = file
            .create_dataset(ROOT, "x", DatasetSpec::extensible(int32(), &[0, 2], 4))
            .unwrap();
        file.resize(id, 5).unwrap();
        file.write_rows(id, 3, &bytes(&[7, 8, 9, 10])).unwrap();
        assert_eq!(file.read(id).unwrap(), bytes(&[0, 0, 0, 0, 0, 0, 7, 8, 9, 10]));
        assert!(matches!(
            file.write_rows(id, 5, &bytes(&[1, 2])),
            Err(FormatError::OutOfRange { end: 6, extent: 5, .. })
        ));
        assert!(matches!(
            file.write_rows(id, 0, &bytes(&[1])),
            Err(FormatError::DataSizeMismatch { .. })
        ));
    }

    #[test]
    fn shrink_zeroes_the_partial_chunk() {
        let mut file = H5File::new(Vec::new()).unwrap();
        let id = file
            .create_dataset(ROOT, "x", DatasetSpec::extensible(int32(), &[0], 4))
            .unwrap();
        file.resize(id, 6).unwrap();
        file.write_rows(id, 0, &bytes(&[1, 2, 3, 4, 5, 6])).unwrap();
        file.resize(id, 2).unwrap();
        file.resize(id, 6).unwrap();
        assert_eq!(file.read(id).unwrap(), bytes(&[1, 2, 0, 0, 0, 0]));
    }

    #[test]
    fn contiguous_cannot_resize() {
        let mut file = H5File::new(Vec::new()).unwrap();
        let id = file
            .create_dataset(ROOT, "x", DatasetSpec::contiguous(int32(), &[3]))
            .unwrap();
        file.resize(id, 3).unwrap();
        assert!(matches!(file.resize(id, 4), Err(FormatError::OutOfRange { .. })));
        file.write(id, &bytes(&[4, 5, 6])).unwrap();
        assert_eq!(file.read(id).unwrap(), bytes(&[4, 5, 6]));
    }

    #[test]
    fn header_grows_in_place_then_moves() {
        let mut file = H5File::new(Vec::new()).unwrap();
        let g = file.create_group(ROOT, "entry").unwrap();
        file.flush().unwrap();
        let first = file.objects[g].header.unwrap();

        let small = H5Attribute::zeroed("n", int32(), Dataspace::Scalar);
        file.set_attribute(g, small).unwrap();
        file.flush().unwrap();
        assert_eq!(file.objects[g].header.unwrap(), first);

        let big = H5Attribute::zeroed("big", int32(), Dataspace::fixed(&[200]));
        file.set_attribute(g, big).unwrap();
        file.flush().unwrap();
        let moved = file.objects[g].header.unwrap();
        assert_ne!(moved.addr, first.addr);

        let back = H5File::load(file.into_inner()).unwrap();
        let g = back.child(ROOT, "entry").unwrap().unwrap();
        assert_eq!(back.attributes(g).unwrap().len(), 2);
    }

    #[test]
    fn attribute_over_header_message_limit() {
        let mut file = H5File::new(Vec::new()).unwrap();
        let attr = H5Attribute::zeroed("huge", Datatype::Float { size: 8 }, Dataspace::fixed(&[9000]));
        assert!(matches!(
            file.set_attribute(ROOT, attr),
            Err(FormatError::MessageTooLarge { .. })
        ));
        assert!(file.attributes(ROOT).unwrap().is_empty());
        file.flush().unwrap();
    }

    #[test]
    fn duplicate_link() {
        let mut file = H5File::new(Vec::new()).unwrap();
        file.create_group(ROOT, "a").unwrap();
        assert!(matches!(
            file.create_group(ROOT, "a"),
            Err(FormatError::DuplicateLink { .. })
        ));
    }
}
