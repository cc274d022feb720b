//! Positioned reads and writes on the backing file.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::FormatError;

/// Storage addressed by absolute byte offset.
pub trait RandomAccess {
    /// Fill `buf` from `offset`; fails if the range runs past the end.
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()>;

    /// Write `data` at `offset`, growing the storage as needed.
    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()>;

    /// Current size in bytes.
    fn len(&self) -> io::Result<u64>;

    /// Push written bytes to durable storage.
    fn sync(&mut self) -> io::Result<()>;
}

impl RandomAccess for File {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let mut file = self;
        file.seek(SeekFrom::Start(offset))?;
        file.read_exact(buf)
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        self.seek(SeekFrom::Start(offset))?;
        self.write_all(data)
    }

    fn len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn sync(&mut self) -> io::Result<()> {
        self.flush()?;
        self.sync_data()
    }
}

impl RandomAccess for Vec<u8> {
    fn read_at(&self, offset: u64, buf: &mut [u8]) -> io::Result<()> {
        let start = offset as usize;
        let src = start
            .checked_add(buf.len())
            .and_then(|end| self.get(start..end))
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "read past end of image"))?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &[u8]) -> io::Result<()> {
        let start = offset as usize;
        let end = start + data.len();
        if self.len() < end {
            self.resize(end, 0);
        }
        self[start..end].copy_from_slice(data);
        Ok(())
    }

    fn len(&self) -> io::Result<u64> {
        Ok(Vec::len(self) as u64)
    }

    fn sync(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Read `len` bytes at `offset` into a new buffer.
pub fn read_vec<F: RandomAccess + ?Sized>(io: &F, offset: u64, len: usize) -> Result<Vec<u8>, FormatError> {
    let mut buf = vec![0u8; len];
    io.read_at(offset, &mut buf)?;
    Ok(buf)
}

/// Append-only address allocator over the end of the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eof(pub u64);

impl Eof {
    /// Reserve `size` bytes, returning their address.
    pub fn alloc(&mut self, size: u64) -> u64 {
        let addr = self.0;
        self.0 += size;
        addr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_grows_on_write() {
        let mut image = Vec::new();
        image.write_at(4, &[1, 2]).unwrap();
        assert_eq!(image, vec![0, 0, 0, 0, 1, 2]);
        let mut buf = [0u8; 2];
        image.read_at(4, &mut buf).unwrap();
        assert_eq!(buf, [1, 2]);
        assert!(image.read_at(5, &mut buf).is_err());
    }

    #[test]
    fn file_positioned_io() {
        let mut file = tempfile::tempfile().unwrap();
        file.write_at(8, b"GCOL").unwrap();
        assert_eq!(RandomAccess::len(&file).unwrap(), 12);
        assert_eq!(read_vec(&file, 8, 4).unwrap(), b"GCOL");
        file.sync().unwrap();
    }

    #[test]
    fn allocator_hands_out_consecutive_ranges() {
        let mut eof = Eof(48);
        assert_eq!(eof.alloc(16), 48);
        assert_eq!(eof.alloc(8), 64);
        assert_eq!(eof.0, 72);
    }
}
