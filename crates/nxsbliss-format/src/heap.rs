//! Global heap collections (`GCOL`) backing variable-length strings.
//!
//! Strings are appended to the current collection, which is rewritten in
//! place on flush. A full collection is left as is and a new one started.

use byteorder::{ByteOrder, LittleEndian};

use crate::error::FormatError;
use crate::io::{read_vec, Eof, RandomAccess};
use crate::message::{put_u16, put_u32, put_u64, UNDEF_ADDR, VL_ELEMENT_SIZE};

/// Smallest collection the HDF5 library accepts.
pub const MIN_COLLECTION_SIZE: u64 = 4096;

const HEADER_SIZE: u64 = 4 + 1 + 3 + 8;
const OBJECT_HEADER_SIZE: u64 = 2 + 2 + 4 + 8;

fn pad8(n: u64) -> u64 {
    (n + 7) & !7
}

#[derive(Debug, Clone)]
struct Collection {
    addr: u64,
    size: u64,
    objects: Vec<(u16, Vec<u8>)>,
    used: u64,
}

impl Collection {
    fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.size as usize);
        buf.extend_from_slice(b"GCOL");
        buf.extend_from_slice(&[1, 0, 0, 0]);
        put_u64(&mut buf, self.size);
        for (index, data) in &self.objects {
            put_u16(&mut buf, *index);
            put_u16(&mut buf, 0);
            put_u32(&mut buf, 0);
            put_u64(&mut buf, data.len() as u64);
            buf.extend_from_slice(data);
            buf.resize(pad8(buf.len() as u64) as usize, 0);
        }
        let free = self.size - self.used;
        if free >= OBJECT_HEADER_SIZE {
            put_u16(&mut buf, 0);
            put_u16(&mut buf, 0);
            put_u32(&mut buf, 0);
            put_u64(&mut buf, free);
        }
        buf.resize(self.size as usize, 0);
        buf
    }

    fn fits(&self, len: u64) -> bool {
        self.objects.len() < u16::MAX as usize
            && self.used + OBJECT_HEADER_SIZE + pad8(len) <= self.size
    }
}

/// Parse the objects of the collection at `addr`.
pub fn read_collection<F: RandomAccess + ?Sized>(io: &F, addr: u64) -> Result<Vec<(u16, Vec<u8>)>, FormatError> {
    let corrupt = FormatError::Corrupt {
        what: "global heap collection",
        addr,
    };
    let head = read_vec(io, addr, HEADER_SIZE as usize)?;
    if &head[..4] != b"GCOL" || head[4] != 1 {
        return Err(corrupt);
    }
    let size = LittleEndian::read_u64(&head[8..]);
    if size < HEADER_SIZE {
        return Err(corrupt);
    }
    let buf = read_vec(io, addr, size as usize)?;

    let mut objects = Vec::new();
    let mut pos = HEADER_SIZE as usize;
    while pos + OBJECT_HEADER_SIZE as usize <= buf.len() {
        let index = LittleEndian::read_u16(&buf[pos..]);
        if index == 0 {
            break;
        }
        let len = LittleEndian::read_u64(&buf[pos + 8..]) as usize;
        pos += OBJECT_HEADER_SIZE as usize;
        let data = buf.get(pos..pos + len).ok_or(FormatError::Corrupt {
            what: "global heap object",
            addr: addr + pos as u64,
        })?;
        objects.push((index, data.to_vec()));
        pos += pad8(len as u64) as usize;
    }
    Ok(objects)
}

/// Writer side of the global heap.
#[derive(Debug, Clone, Default)]
pub struct GlobalHeap {
    current: Option<Collection>,
    dirty: bool,
}

impl GlobalHeap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Store `strings` and return their packed variable-length elements.
    /// Empty strings take no heap space.
    pub fn put<F: RandomAccess + ?Sized>(
        &mut self,
        io: &mut F,
        eof: &mut Eof,
        strings: &[&str],
    ) -> Result<Vec<u8>, FormatError> {
        let mut raw = Vec::with_capacity(strings.len() * VL_ELEMENT_SIZE);
        for s in strings {
            if s.is_empty() {
                put_u32(&mut raw, 0);
                put_u64(&mut raw, UNDEF_ADDR);
                put_u32(&mut raw, 0);
                continue;
            }
            let len = s.len() as u64;
            if !self.current.as_ref().is_some_and(|c| c.fits(len)) {
                self.flush(io)?;
                self.current = None;
            }
            let c = self.current.get_or_insert_with(|| {
                let size = (HEADER_SIZE + OBJECT_HEADER_SIZE + pad8(len)).max(MIN_COLLECTION_SIZE);
                Collection {
                    addr: eof.alloc(size),
                    size,
                    objects: Vec::new(),
                    used: HEADER_SIZE,
                }
            });
            let index = c.objects.len() as u16 + 1;
            c.objects.push((index, s.as_bytes().to_vec()));
            c.used += OBJECT_HEADER_SIZE + pad8(len);
            self.dirty = true;

            put_u32(&mut raw, len as u32);
            put_u64(&mut raw, c.addr);
            put_u32(&mut raw, index as u32);
        }
        Ok(raw)
    }

    /// Resolve packed variable-length elements back into strings.
    pub fn get<F: RandomAccess + ?Sized>(&self, io: &F, raw: &[u8]) -> Result<Vec<String>, FormatError> {
        let mut out = Vec::with_capacity(raw.len() / VL_ELEMENT_SIZE);
        let mut loaded: Option<(u64, Vec<(u16, Vec<u8>)>)> = None;
        for element in raw.chunks_exact(VL_ELEMENT_SIZE) {
            let len = LittleEndian::read_u32(element) as usize;
            let addr = LittleEndian::read_u64(&element[4..]);
            let index = LittleEndian::read_u32(&element[12..]) as u16;
            if len == 0 {
                out.push(String::new());
                continue;
            }
            let objects: &[(u16, Vec<u8>)] = match &self.current {
                Some(c) if c.addr == addr => &c.objects,
                _ => {
                    if loaded.as_ref().map_or(true, |(at, _)| *at != addr) {
                        loaded = Some((addr, read_collection(io, addr)?));
                    }
                    loaded.as_ref().map_or(&[][..], |(_, objects)| objects.as_slice())
                }
            };
            let data = objects
                .iter()
                .find(|(i, _)| *i == index)
                .map(|(_, d)| d)
                .ok_or(FormatError::Corrupt {
                    what: "global heap object",
                    addr,
                })?;
            let data = &data[..len.min(data.len())];
            out.push(String::from_utf8_lossy(data).into_owned());
        }
        Ok(out)
    }

    /// Write the current collection if it changed.
    pub fn flush<F: RandomAccess + ?Sized>(&mut self, io: &mut F) -> Result<(), FormatError> {
        if let (true, Some(c)) = (self.dirty, &self.current) {
            io.write_at(c.addr, &c.encode())?;
        }
        self.dirty = false;
        Ok(())
    }
}
