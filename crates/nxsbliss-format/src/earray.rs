//! Extensible array chunk index (`EAHD`/`EAIB`/`EASB`/`EADB`).
//!
//! Chunk addresses are laid out the way the HDF5 library grows the array:
//! the first few live in the index block, the next ones in data blocks
//! referenced directly from the index block, and the rest in data blocks
//! reached through super blocks. Blocks are allocated as the array grows
//! and only blocks touched since the last flush are rewritten.

use std::collections::BTreeSet;

use byteorder::{ByteOrder, LittleEndian};

use crate::checksum::lookup3;
use crate::error::FormatError;
use crate::io::{read_vec, Eof, RandomAccess};
use crate::message::earray_params::*;
use crate::message::{put_u32, put_u64, UNDEF_ADDR};

const ADDR_SIZE: u64 = 8;
const BLOCK_OFFSET_SIZE: usize = (MAX_NELMTS_BITS as usize).div_ceil(8);
const PREFIX_SIZE: u64 = 4 + 1 + 1 + ADDR_SIZE;
pub(crate) const HEADER_SIZE: u64 = 4 + 1 + 1 + 1 + 5 + 6 * 8 + ADDR_SIZE + 4;
const INLINE: u64 = IDX_BLK_ELMTS as u64;

#[derive(Debug, Clone, Copy)]
struct SuperBlock {
    data_blocks: u64,
    block_elements: u64,
    first_element: u64,
    /// Ordinal of this super block's first data block across the array.
    first_block: usize,
}

impl SuperBlock {
    fn elements(&self) -> u64 {
        self.data_blocks * self.block_elements
    }
}

fn super_blocks() -> Vec<SuperBlock> {
    let count = 1 + MAX_NELMTS_BITS as u32 - DATA_BLK_MIN_ELMTS.trailing_zeros();
    let (mut first_element, mut first_block) = (0, 0);
    (0..count)
        .map(|s| {
            let sb = SuperBlock {
                data_blocks: 1 << (s / 2),
                block_elements: (DATA_BLK_MIN_ELMTS as u64) << s.div_ceil(2),
                first_element,
                first_block,
            };
            first_element += sb.elements();
            first_block += sb.data_blocks as usize;
            sb
        })
        .collect()
}

/// Super blocks whose data block addresses live in the index block.
fn index_block_super_blocks() -> usize {
    2 * SUP_BLK_MIN_DATA_PTRS.trailing_zeros() as usize
}

/// Largest number of chunks the index can address.
pub fn capacity() -> u64 {
    1 << MAX_NELMTS_BITS
}

fn data_block_size(elements: u64) -> u64 {
    PREFIX_SIZE + BLOCK_OFFSET_SIZE as u64 + elements * ADDR_SIZE + 4
}

fn super_block_size(data_blocks: u64) -> u64 {
    PREFIX_SIZE + BLOCK_OFFSET_SIZE as u64 + data_blocks * ADDR_SIZE + 4
}

fn prefix(buf: &mut Vec<u8>, signature: &[u8; 4], header_addr: u64) {
    buf.extend_from_slice(signature);
    buf.push(0);
    buf.push(0);
    put_u64(buf, header_addr);
}

fn seal(mut buf: Vec<u8>) -> Vec<u8> {
    let sum = lookup3(&buf);
    put_u32(&mut buf, sum);
    buf
}

fn block_offset(buf: &mut Vec<u8>, offset: u64) {
    buf.extend_from_slice(&offset.to_le_bytes()[..BLOCK_OFFSET_SIZE]);
}

/// Read a checksummed block and return the bytes after its prefix.
fn read_block<F: RandomAccess + ?Sized>(
    io: &F,
    addr: u64,
    size: u64,
    signature: &[u8; 4],
    what: &'static str,
) -> Result<Vec<u8>, FormatError> {
    let buf = read_vec(io, addr, size as usize)?;
    let (body, sum) = buf.split_at(buf.len() - 4);
    if &body[..4] != signature || lookup3(body) != LittleEndian::read_u32(sum) {
        return Err(FormatError::Corrupt { what, addr });
    }
    Ok(body[PREFIX_SIZE as usize..].to_vec())
}

/// Chunk address index of one dataset, kept in memory and written back
/// incrementally.
#[derive(Debug, Clone)]
pub struct ChunkIndex {
    /// Chunk addresses in linear chunk order; [`UNDEF_ADDR`] when unset.
    chunks: Vec<u64>,
    /// Header address; the index block follows it directly.
    addr: Option<u64>,
    sblocks: Vec<SuperBlock>,
    /// Data block addresses by ordinal.
    dblock_addrs: Vec<u64>,
    /// Super block addresses; unused for the ones listed in the index block.
    sblock_addrs: Vec<u64>,
    dirty_dblocks: BTreeSet<usize>,
    dirty_sblocks: BTreeSet<usize>,
    dirty: bool,
    stats: Stats,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Stats {
    n_sblocks: u64,
    sblock_bytes: u64,
    n_dblocks: u64,
    dblock_bytes: u64,
    realized: u64,
}

impl Default for ChunkIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkIndex {
    pub fn new() -> Self {
        let sblocks = super_blocks();
        let sblock_count = sblocks.len();
        Self {
            chunks: Vec::new(),
            addr: None,
            sblocks,
            dblock_addrs: Vec::new(),
            sblock_addrs: vec![UNDEF_ADDR; sblock_count],
            dirty_dblocks: BTreeSet::new(),
            dirty_sblocks: BTreeSet::new(),
            dirty: false,
            stats: Stats {
                realized: INLINE,
                ..Stats::default()
            },
        }
    }

    /// Header address, once the index has been written.
    pub fn addr(&self) -> Option<u64> {
        self.addr
    }

    /// Address of chunk `index`, if allocated.
    pub fn get(&self, index: u64) -> Option<u64> {
        self.chunks
            .get(index as usize)
            .copied()
            .filter(|&a| a != UNDEF_ADDR)
    }

    /// Highest chunk index ever set, plus one.
    pub fn len(&self) -> u64 {
        self.chunks.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    fn locate(&self, spilled: u64) -> (usize, usize) {
        let s = self
            .sblocks
            .iter()
            .rposition(|sb| sb.first_element <= spilled)
            .unwrap_or(0);
        let sb = &self.sblocks[s];
        (s, sb.first_block + ((spilled - sb.first_element) / sb.block_elements) as usize)
    }

    /// Record the address of chunk `index`; [`UNDEF_ADDR`] unsets it.
    pub fn set(&mut self, index: u64, addr: u64) -> Result<(), FormatError> {
        if index >= capacity() {
            return Err(FormatError::TooManyChunks {
                chunks: index + 1,
                limit: capacity(),
            });
        }
        let i = index as usize;
        if i >= self.chunks.len() {
            if addr == UNDEF_ADDR {
                return Ok(());
            }
            self.chunks.resize(i + 1, UNDEF_ADDR);
        }
        self.chunks[i] = addr;
        self.dirty = true;
        if index >= INLINE {
            let (s, d) = self.locate(index - INLINE);
            if d >= self.dblock_addrs.len() {
                self.dblock_addrs.resize(d + 1, UNDEF_ADDR);
            }
            self.dirty_dblocks.insert(d);
            if s >= index_block_super_blocks() {
                self.dirty_sblocks.insert(s);
            }
        }
        Ok(())
    }

    fn super_block_of(&self, d: usize) -> usize {
        self.sblocks
            .iter()
            .rposition(|sb| sb.first_block <= d)
            .unwrap_or(0)
    }

    fn encode_data_block(&self, header: u64, d: usize) -> Vec<u8> {
        let sb = self.sblocks[self.super_block_of(d)];
        let first = sb.first_element + (d - sb.first_block) as u64 * sb.block_elements;
        let mut buf = Vec::with_capacity(data_block_size(sb.block_elements) as usize);
        prefix(&mut buf, b"EADB", header);
        block_offset(&mut buf, first);
        for k in 0..sb.block_elements {
            let slot = self
                .chunks
                .get((INLINE + first + k) as usize)
                .copied()
                .unwrap_or(UNDEF_ADDR);
            put_u64(&mut buf, slot);
        }
        seal(buf)
    }

    fn encode_super_block(&self, header: u64, s: usize) -> Vec<u8> {
        let sb = self.sblocks[s];
        let mut buf = Vec::with_capacity(super_block_size(sb.data_blocks) as usize);
        prefix(&mut buf, b"EASB", header);
        block_offset(&mut buf, sb.first_element);
        for j in 0..sb.data_blocks as usize {
            put_u64(&mut buf, self.dblock_addr(sb.first_block + j));
        }
        seal(buf)
    }

    fn dblock_addr(&self, d: usize) -> u64 {
        self.dblock_addrs.get(d).copied().unwrap_or(UNDEF_ADDR)
    }

    fn index_block_size(&self) -> u64 {
        let direct = index_block_super_blocks();
        let direct_blocks: u64 = self.sblocks[..direct].iter().map(|sb| sb.data_blocks).sum();
        let sblock_ptrs = (self.sblocks.len() - direct) as u64;
        PREFIX_SIZE + (INLINE + direct_blocks + sblock_ptrs) * ADDR_SIZE + 4
    }

    fn encode_index_block(&self, header: u64) -> Vec<u8> {
        let direct = index_block_super_blocks();
        let mut buf = Vec::with_capacity(self.index_block_size() as usize);
        prefix(&mut buf, b"EAIB", header);
        for k in 0..INLINE as usize {
            put_u64(&mut buf, self.chunks.get(k).copied().unwrap_or(UNDEF_ADDR));
        }
        let direct_blocks = self.sblocks[direct].first_block;
        for d in 0..direct_blocks {
            put_u64(&mut buf, self.dblock_addr(d));
        }
        for s in direct..self.sblocks.len() {
            put_u64(&mut buf, self.sblock_addrs[s]);
        }
        seal(buf)
    }

    fn encode_header(&self, header: u64) -> Vec<u8> {
        let mut buf = Vec::with_capacity(HEADER_SIZE as usize);
        buf.extend_from_slice(b"EAHD");
        buf.extend_from_slice(&[0, 0, ADDR_SIZE as u8]);
        buf.extend_from_slice(&ALL);
        let s = self.stats;
        for stat in [
            s.n_sblocks,
            s.sblock_bytes,
            s.n_dblocks,
            s.dblock_bytes,
            self.len(),
            s.realized,
        ] {
            put_u64(&mut buf, stat);
        }
        put_u64(&mut buf, header + HEADER_SIZE);
        seal(buf)
    }

    /// Allocate new blocks past `eof` and write every changed block.
    /// Returns true when the header was placed for the first time.
    pub fn flush<F: RandomAccess + ?Sized>(&mut self, io: &mut F, eof: &mut Eof) -> Result<bool, FormatError> {
        if !self.dirty {
            return Ok(false);
        }
        let placed = self.addr.is_none();
        let header = match self.addr {
            Some(addr) => addr,
            None => {
                let addr = eof.alloc(HEADER_SIZE + self.index_block_size());
                self.addr = Some(addr);
                addr
            }
        };

        let direct = index_block_super_blocks();
        for &d in &self.dirty_dblocks {
            if self.dblock_addrs[d] != UNDEF_ADDR {
                continue;
            }
            let s = self.super_block_of(d);
            let sb = self.sblocks[s];
            if s >= direct && self.sblock_addrs[s] == UNDEF_ADDR {
                let size = super_block_size(sb.data_blocks);
                self.sblock_addrs[s] = eof.alloc(size);
                self.stats.n_sblocks += 1;
                self.stats.sblock_bytes += size;
            }
            let size = data_block_size(sb.block_elements);
            self.dblock_addrs[d] = eof.alloc(size);
            self.stats.n_dblocks += 1;
            self.stats.dblock_bytes += size;
            self.stats.realized += sb.block_elements;
        }

        for &d in &self.dirty_dblocks {
            io.write_at(self.dblock_addrs[d], &self.encode_data_block(header, d))?;
        }
        for &s in &self.dirty_sblocks {
            io.write_at(self.sblock_addrs[s], &self.encode_super_block(header, s))?;
        }
        io.write_at(header + HEADER_SIZE, &self.encode_index_block(header))?;
        io.write_at(header, &self.encode_header(header))?;

        self.dirty_dblocks.clear();
        self.dirty_sblocks.clear();
        self.dirty = false;
        Ok(placed)
    }

    /// Read the index whose header is at `addr`.
    pub fn load<F: RandomAccess + ?Sized>(io: &F, addr: u64) -> Result<Self, FormatError> {
        let mut index = Self::new();
        let raw = read_vec(io, addr, HEADER_SIZE as usize)?;
        let (body, sum) = raw.split_at(raw.len() - 4);
        if &body[..4] != b"EAHD" || lookup3(body) != LittleEndian::read_u32(sum) {
            return Err(FormatError::Corrupt {
                what: "extensible array header",
                addr,
            });
        }
        if raw[6] != ADDR_SIZE as u8 || raw[7..12] != ALL {
            return Err(FormatError::Unsupported("extensible array parameters".into()));
        }
        let field = |k: usize| LittleEndian::read_u64(&raw[12 + 8 * k..]);
        index.stats = Stats {
            n_sblocks: field(0),
            sblock_bytes: field(1),
            n_dblocks: field(2),
            dblock_bytes: field(3),
            realized: field(5),
        };
        let len = field(4);
        let iblock = field(6);
        if iblock != addr + HEADER_SIZE {
            return Err(FormatError::Unsupported("detached extensible array index block".into()));
        }
        index.chunks = vec![UNDEF_ADDR; len as usize];
        index.addr = Some(addr);

        let body = read_block(io, iblock, index.index_block_size(), b"EAIB", "extensible array index block")?;
        let mut pos = 0;
        let mut next = || {
            let v = LittleEndian::read_u64(&body[pos..]);
            pos += 8;
            v
        };
        for k in 0..INLINE as usize {
            let v = next();
            if let Some(slot) = index.chunks.get_mut(k) {
                *slot = v;
            }
        }
        let direct = index_block_super_blocks();
        let direct_blocks = index.sblocks[direct].first_block;
        let mut dblocks: Vec<u64> = (0..direct_blocks).map(|_| next()).collect();
        for s in direct..index.sblocks.len() {
            index.sblock_addrs[s] = next();
        }

        for s in direct..index.sblocks.len() {
            let sb = index.sblocks[s];
            let sblock = index.sblock_addrs[s];
            if sblock == UNDEF_ADDR {
                continue;
            }
            let body = read_block(
                io,
                sblock,
                super_block_size(sb.data_blocks),
                b"EASB",
                "extensible array super block",
            )?;
            dblocks.resize(sb.first_block, UNDEF_ADDR);
            for j in 0..sb.data_blocks as usize {
                dblocks.push(LittleEndian::read_u64(&body[BLOCK_OFFSET_SIZE + 8 * j..]));
            }
        }
        while dblocks.last() == Some(&UNDEF_ADDR) {
            dblocks.pop();
        }

        for (d, &dblock) in dblocks.iter().enumerate() {
            if dblock == UNDEF_ADDR {
                continue;
            }
            let sb = index.sblocks[index.super_block_of(d)];
            let first = INLINE + sb.first_element + (d - sb.first_block) as u64 * sb.block_elements;
            let body = read_block(
                io,
                dblock,
                data_block_size(sb.block_elements),
                b"EADB",
                "extensible array data block",
            )?;
            for k in 0..sb.block_elements as usize {
                if let Some(slot) = index.chunks.get_mut(first as usize + k) {
                    *slot = LittleEndian::read_u64(&body[BLOCK_OFFSET_SIZE + 8 * k..]);
                }
            }
        }
        index.dblock_addrs = dblocks;
        Ok(index)
    }
}
