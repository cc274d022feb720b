//! Object header message bodies: encoders for what the writer emits and
//! decoders for reading its own files back.

use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};

use crate::error::FormatError;

/// Undefined address (all bits set).
pub const UNDEF_ADDR: u64 = u64::MAX;

/// Unlimited maximum dimension size.
pub const UNLIMITED: u64 = u64::MAX;

/// Largest body a header message can carry (16-bit size field).
pub const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

/// Bytes per variable-length element: sequence length, heap collection
/// address and object index.
pub const VL_ELEMENT_SIZE: usize = 4 + 8 + 4;

/// Header message type codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    Nil = 0x00,
    Dataspace = 0x01,
    LinkInfo = 0x02,
    Datatype = 0x03,
    FillValue = 0x05,
    Link = 0x06,
    DataLayout = 0x08,
    GroupInfo = 0x0A,
    Attribute = 0x0C,
    Continuation = 0x10,
    SymbolTable = 0x11,
    AttributeInfo = 0x15,
}

impl MessageType {
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0x00 => MessageType::Nil,
            0x01 => MessageType::Dataspace,
            0x02 => MessageType::LinkInfo,
            0x03 => MessageType::Datatype,
            0x05 => MessageType::FillValue,
            0x06 => MessageType::Link,
            0x08 => MessageType::DataLayout,
            0x0A => MessageType::GroupInfo,
            0x0C => MessageType::Attribute,
            0x10 => MessageType::Continuation,
            0x11 => MessageType::SymbolTable,
            0x15 => MessageType::AttributeInfo,
            _ => return None,
        })
    }
}

/// Little-endian reader over a message body.
pub(crate) struct Bytes<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> Bytes<'a> {
    pub(crate) fn new(buf: &'a [u8], what: &'static str) -> Self {
        Self { buf, pos: 0, what }
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn take(&mut self, n: usize) -> Result<&'a [u8], FormatError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.buf.len())
            .ok_or(FormatError::Corrupt {
                what: self.what,
                addr: self.pos as u64,
            })?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, FormatError> {
        Ok(LittleEndian::read_u16(self.take(2)?))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, FormatError> {
        Ok(LittleEndian::read_u32(self.take(4)?))
    }

    pub(crate) fn u64(&mut self) -> Result<u64, FormatError> {
        Ok(LittleEndian::read_u64(self.take(8)?))
    }

    /// Unsigned integer stored in `width` bytes.
    pub(crate) fn uint(&mut self, width: usize) -> Result<u64, FormatError> {
        Ok(LittleEndian::read_uint(self.take(width)?, width))
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let out = &self.buf[self.pos..];
        self.pos = self.buf.len();
        out
    }
}

/// Element datatype of a dataset or attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Datatype {
    /// Little-endian two's complement or unsigned integer.
    Integer { size: u8, signed: bool },
    /// Little-endian IEEE 754 float (4 or 8 bytes).
    Float { size: u8 },
    /// h5py-style boolean: enum `FALSE=0, TRUE=1` over int8.
    Boolean,
    /// Variable-length UTF-8 string kept in the global heap.
    VarString,
}

impl Datatype {
    /// Size of one element in bytes.
    pub fn element_size(&self) -> usize {
        match self {
            Datatype::Integer { size, .. } | Datatype::Float { size } => *size as usize,
            Datatype::Boolean => 1,
            Datatype::VarString => VL_ELEMENT_SIZE,
        }
    }

    /// Encode as a datatype message body.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(24);
        match self {
            Datatype::Integer { size, signed } => {
                let flags = if *signed { 0x08 } else { 0x00 };
                type_header(&mut buf, 0, 1, [flags, 0, 0], *size as u32);
                put_u16(&mut buf, 0);
                put_u16(&mut buf, *size as u16 * 8);
            }
            Datatype::Float { size } => {
                let bits = *size as u16 * 8;
                let (exp_loc, exp_size, mant_size, bias) = if *size == 4 {
                    (23u8, 8u8, 23u8, 127u32)
                } else {
                    (52, 11, 52, 1023)
                };
                // Implied leading mantissa bit, sign in the top bit.
                type_header(&mut buf, 1, 1, [0x20, (bits - 1) as u8, 0], *size as u32);
                put_u16(&mut buf, 0);
                put_u16(&mut buf, bits);
                buf.extend_from_slice(&[exp_loc, exp_size, 0, mant_size]);
                put_u32(&mut buf, bias);
            }
            Datatype::Boolean => {
                type_header(&mut buf, 8, 3, [2, 0, 0], 1);
                buf.extend_from_slice(&Datatype::Integer { size: 1, signed: true }.encode());
                buf.extend_from_slice(b"FALSE\0TRUE\0");
                buf.extend_from_slice(&[0, 1]);
            }
            Datatype::VarString => {
                // String sequence, null-terminate padding, UTF-8, over uint8.
                type_header(&mut buf, 9, 1, [0x01, 0x01, 0], VL_ELEMENT_SIZE as u32);
                buf.extend_from_slice(&Datatype::Integer { size: 1, signed: false }.encode());
            }
        }
        buf
    }

    /// Decode a datatype message body written by [`Datatype::encode`].
    pub fn decode(body: &[u8]) -> Result<Datatype, FormatError> {
        let mut r = Bytes::new(body, "datatype message");
        let class = r.u8()? & 0x0F;
        let flags = r.u8()?;
        r.take(2)?;
        let size = r.u32()?;
        match class {
            0 | 1 if flags & 0x01 != 0 => Err(FormatError::Unsupported("big-endian datatype".into())),
            0 if matches!(size, 1 | 2 | 4 | 8) => Ok(Datatype::Integer {
                size: size as u8,
                signed: flags & 0x08 != 0,
            }),
            1 if matches!(size, 4 | 8) => Ok(Datatype::Float { size: size as u8 }),
            8 => match Datatype::decode(r.rest())? {
                Datatype::Integer { size: 1, .. } => Ok(Datatype::Boolean),
                other => Err(FormatError::Unsupported(format!("enumeration over {other:?}"))),
            },
            9 if flags & 0x0F == 1 => Ok(Datatype::VarString),
            9 => Err(FormatError::Unsupported("variable-length sequence".into())),
            other => Err(FormatError::Unsupported(format!(
                "datatype class {other} of size {size}"
            ))),
        }
    }
}

fn type_header(buf: &mut Vec<u8>, class: u8, version: u8, flags: [u8; 3], size: u32) {
    buf.push((class & 0x0F) | (version << 4));
    buf.extend_from_slice(&flags);
    put_u32(buf, size);
}

/// Shape of a dataset or attribute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dataspace {
    /// Single element, rank 0.
    Scalar,
    /// N-dimensional array; `max_dims` entries may be [`UNLIMITED`].
    Simple {
        dims: Vec<u64>,
        max_dims: Option<Vec<u64>>,
    },
}

impl Dataspace {
    /// Simple dataspace with fixed extent.
    pub fn fixed(dims: &[u64]) -> Self {
        Dataspace::Simple {
            dims: dims.to_vec(),
            max_dims: None,
        }
    }

    /// Scalar for empty `dims`, fixed extent otherwise.
    pub fn of(dims: &[u64]) -> Self {
        if dims.is_empty() {
            Dataspace::Scalar
        } else {
            Dataspace::fixed(dims)
        }
    }

    /// Current dimensions (empty for scalars).
    pub fn dims(&self) -> &[u64] {
        match self {
            Dataspace::Scalar => &[],
            Dataspace::Simple { dims, .. } => dims,
        }
    }

    /// Number of elements.
    pub fn num_elements(&self) -> u64 {
        self.dims().iter().product()
    }

    /// Encode as a version 2 dataspace message body.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + 16 * self.dims().len());
        match self {
            Dataspace::Scalar => buf.extend_from_slice(&[2, 0, 0, 0]),
            Dataspace::Simple { dims, max_dims } => {
                buf.push(2);
                buf.push(dims.len() as u8);
                buf.push(u8::from(max_dims.is_some()));
                buf.push(1);
                for &d in dims {
                    put_u64(&mut buf, d);
                }
                for &m in max_dims.iter().flatten() {
                    put_u64(&mut buf, m);
                }
            }
        }
        buf
    }

    /// Decode a version 2 dataspace message body.
    pub fn decode(body: &[u8]) -> Result<Dataspace, FormatError> {
        let mut r = Bytes::new(body, "dataspace message");
        let version = r.u8()?;
        if version != 2 {
            return Err(FormatError::Unsupported(format!("dataspace version {version}")));
        }
        let rank = r.u8()? as usize;
        let flags = r.u8()?;
        match r.u8()? {
            0 => Ok(Dataspace::Scalar),
            1 => {
                let dims = (0..rank).map(|_| r.u64()).collect::<Result<Vec<_>, _>>()?;
                let max_dims = if flags & 0x01 != 0 {
                    Some((0..rank).map(|_| r.u64()).collect::<Result<Vec<_>, _>>()?)
                } else {
                    None
                };
                Ok(Dataspace::Simple { dims, max_dims })
            }
            _ => Err(FormatError::Unsupported("null dataspace".into())),
        }
    }
}

/// An attribute attached to a group or dataset.
#[derive(Debug, Clone, PartialEq)]
pub struct H5Attribute {
    pub name: String,
    pub datatype: Datatype,
    pub space: Dataspace,
    /// Little-endian element bytes in row-major order.
    pub raw: Vec<u8>,
}

impl H5Attribute {
    /// Attribute holding zeroed elements.
    pub fn zeroed(name: &str, datatype: Datatype, space: Dataspace) -> Self {
        let len = space.num_elements() as usize * datatype.element_size();
        Self {
            name: name.to_string(),
            datatype,
            space,
            raw: vec![0; len],
        }
    }

    /// Encoded attribute message size for an attribute of this shape.
    pub fn message_size(name: &str, datatype: &Datatype, space: &Dataspace) -> usize {
        let raw = space.num_elements() as usize * datatype.element_size();
        9 + name.len() + 1 + datatype.encode().len() + space.encode().len() + raw
    }

    /// Encode as a version 3 attribute message body.
    pub fn encode(&self) -> Vec<u8> {
        let dt = self.datatype.encode();
        let ds = self.space.encode();
        let name_len = self.name.len() + 1;

        let mut buf = Vec::with_capacity(9 + name_len + dt.len() + ds.len() + self.raw.len());
        buf.push(3);
        buf.push(0);
        put_u16(&mut buf, name_len as u16);
        put_u16(&mut buf, dt.len() as u16);
        put_u16(&mut buf, ds.len() as u16);
        buf.push(u8::from(!self.name.is_ascii()));
        buf.extend_from_slice(self.name.as_bytes());
        buf.push(0);
        buf.extend_from_slice(&dt);
        buf.extend_from_slice(&ds);
        buf.extend_from_slice(&self.raw);
        buf
    }

    /// Decode a version 3 attribute message body.
    pub fn decode(body: &[u8]) -> Result<H5Attribute, FormatError> {
        let mut r = Bytes::new(body, "attribute message");
        let version = r.u8()?;
        if version != 3 {
            return Err(FormatError::Unsupported(format!("attribute version {version}")));
        }
        r.u8()?;
        let name_len = r.u16()? as usize;
        let dt_len = r.u16()? as usize;
        let ds_len = r.u16()? as usize;
        r.u8()?;
        let name = r.take(name_len)?;
        let name = name.strip_suffix(&[0]).unwrap_or(name);
        let name = String::from_utf8(name.to_vec())
            .map_err(|_| FormatError::Unsupported("non UTF-8 attribute name".into()))?;
        let datatype = Datatype::decode(r.take(dt_len)?)?;
        let space = Dataspace::decode(r.take(ds_len)?)?;
        let len = space.num_elements() as usize * datatype.element_size();
        let raw = r.take(len)?.to_vec();
        Ok(H5Attribute {
            name,
            datatype,
            space,
            raw,
        })
    }
}

/// Fill value message: version 3, late allocation, fill written only if set.
pub fn fill_value() -> Vec<u8> {
    vec![3, 0x0a]
}

/// Link info message for a group with compact link storage.
pub fn link_info() -> Vec<u8> {
    let mut buf = vec![0, 0];
    put_u64(&mut buf, UNDEF_ADDR);
    put_u64(&mut buf, UNDEF_ADDR);
    buf
}

/// True when a link info message describes compact link storage.
pub fn link_info_is_compact(body: &[u8]) -> Result<bool, FormatError> {
    let mut r = Bytes::new(body, "link info message");
    r.u8()?;
    if r.u8()? & 0x01 != 0 {
        r.u64()?;
    }
    Ok(r.u64()? == UNDEF_ADDR)
}

/// True when an attribute info message points at dense attribute storage.
pub fn attribute_info_is_dense(body: &[u8]) -> Result<bool, FormatError> {
    let mut r = Bytes::new(body, "attribute info message");
    r.u8()?;
    if r.u8()? & 0x01 != 0 {
        r.u16()?;
    }
    Ok(r.u64()? != UNDEF_ADDR)
}

/// Group info message with default phase-change values.
pub fn group_info() -> Vec<u8> {
    vec![0, 0]
}

/// Hard link message pointing `name` at the object header at `addr`.
pub fn hard_link(name: &str, addr: u64) -> Vec<u8> {
    let name = name.as_bytes();
    let (width_bits, width) = match name.len() {
        0..=0xFF => (0u8, 1usize),
        0x100..=0xFFFF => (1, 2),
        _ => (2, 4),
    };
    let utf8 = !name.is_ascii();
    let mut flags = width_bits;
    if utf8 {
        flags |= 0x10;
    }

    let mut buf = Vec::with_capacity(3 + width + name.len() + 8);
    buf.push(1);
    buf.push(flags);
    if utf8 {
        buf.push(1);
    }
    match width {
        1 => buf.push(name.len() as u8),
        2 => put_u16(&mut buf, name.len() as u16),
        _ => put_u32(&mut buf, name.len() as u32),
    }
    buf.extend_from_slice(name);
    put_u64(&mut buf, addr);
    buf
}

/// Decode a link message into its name and hard link target.
pub fn decode_link(body: &[u8]) -> Result<(String, u64), FormatError> {
    let mut r = Bytes::new(body, "link message");
    r.u8()?;
    let flags = r.u8()?;
    if flags & 0x08 != 0 && r.u8()? != 0 {
        return Err(FormatError::Unsupported("soft or external link".into()));
    }
    if flags & 0x04 != 0 {
        r.u64()?;
    }
    if flags & 0x10 != 0 {
        r.u8()?;
    }
    let len = r.uint(1 << (flags & 0x03))? as usize;
    let name = String::from_utf8(r.take(len)?.to_vec())
        .map_err(|_| FormatError::Unsupported("non UTF-8 link name".into()))?;
    Ok((name, r.u64()?))
}

/// Extensible array creation parameters. Data blocks are never paged:
/// the page size equals the whole index range.
pub mod earray_params {
    pub const MAX_NELMTS_BITS: u8 = 32;
    pub const IDX_BLK_ELMTS: u8 = 4;
    pub const SUP_BLK_MIN_DATA_PTRS: u8 = 4;
    pub const DATA_BLK_MIN_ELMTS: u8 = 16;
    pub const MAX_DBLK_PAGE_NELMTS_BITS: u8 = MAX_NELMTS_BITS;

    pub(crate) const ALL: [u8; 5] = [
        MAX_NELMTS_BITS,
        IDX_BLK_ELMTS,
        SUP_BLK_MIN_DATA_PTRS,
        DATA_BLK_MIN_ELMTS,
        MAX_DBLK_PAGE_NELMTS_BITS,
    ];
}

/// Storage description carried by a data layout message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Layout {
    Contiguous { addr: u64, size: u64 },
    /// Chunked, indexed by an extensible array whose header is at `index`.
    Chunked { chunk: Vec<u64>, index: u64 },
}

impl Layout {
    /// Encode as a version 4 layout message body.
    pub fn encode(&self, element_size: usize) -> Vec<u8> {
        match self {
            Layout::Contiguous { addr, size } => {
                let mut buf = vec![4, 1];
                put_u64(&mut buf, *addr);
                put_u64(&mut buf, *size);
                buf
            }
            Layout::Chunked { chunk, index } => earray_layout(chunk, element_size, *index),
        }
    }

    /// Decode a version 4 layout message body.
    pub fn decode(body: &[u8]) -> Result<Layout, FormatError> {
        let mut r = Bytes::new(body, "layout message");
        let version = r.u8()?;
        if version != 4 {
            return Err(FormatError::Unsupported(format!("layout version {version}")));
        }
        match r.u8()? {
            1 => Ok(Layout::Contiguous {
                addr: r.u64()?,
                size: r.u64()?,
            }),
            2 => {
                r.u8()?;
                let ndims = r.u8()? as usize;
                let width = r.u8()? as usize;
                let mut dims = (0..ndims).map(|_| r.uint(width)).collect::<Result<Vec<_>, _>>()?;
                dims.pop();
                match r.u8()? {
                    4 if r.take(5)? == earray_params::ALL => Ok(Layout::Chunked {
                        chunk: dims,
                        index: r.u64()?,
                    }),
                    4 => Err(FormatError::Unsupported("extensible array parameters".into())),
                    other => Err(FormatError::Unsupported(format!("chunk index type {other}"))),
                }
            }
            other => Err(FormatError::Unsupported(format!("layout class {other}"))),
        }
    }
}

/// Version 4 chunked layout indexed by an extensible array at `index_addr`.
pub fn earray_layout(chunk_dims: &[u64], element_size: usize, index_addr: u64) -> Vec<u8> {
    let largest = chunk_dims
        .iter()
        .copied()
        .chain(std::iter::once(element_size as u64))
        .max()
        .unwrap_or(1);
    let width: u8 = match largest {
        0..=0xFF => 1,
        0x100..=0xFFFF => 2,
        _ => 4,
    };

    let mut buf = vec![4, 2, 0, chunk_dims.len() as u8 + 1, width];
    for dim in chunk_dims.iter().copied().chain(std::iter::once(element_size as u64)) {
        match width {
            1 => buf.push(dim as u8),
            2 => put_u16(&mut buf, dim as u16),
            _ => put_u32(&mut buf, dim as u32),
        }
    }
    buf.push(4);
    buf.extend_from_slice(&earray_params::ALL);
    put_u64(&mut buf, index_addr);
    buf
}

pub(crate) fn put_u16(buf: &mut Vec<u8>, v: u16) {
    let _ = buf.write_u16::<LittleEndian>(v);
}

pub(crate) fn put_u32(buf: &mut Vec<u8>, v: u32) {
    let _ = buf.write_u32::<LittleEndian>(v);
}

pub(crate) fn put_u64(buf: &mut Vec<u8>, v: u64) {
    let _ = buf.write_u64::<LittleEndian>(v);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_type_layout() {
        let enc = Datatype::Integer { size: 4, signed: true }.encode();
        assert_eq!(enc.len(), 12);
        assert_eq!(enc[0], 0x10);
        assert_eq!(enc[1], 0x08);
        assert_eq!(&enc[4..8], &4u32.to_le_bytes());
        assert_eq!(&enc[10..12], &32u16.to_le_bytes());
    }

    #[test]
    fn float_sign_location_tracks_width() {
        assert_eq!(Datatype::Float { size: 4 }.encode()[2], 31);
        assert_eq!(Datatype::Float { size: 8 }.encode()[2], 63);
        assert_eq!(Datatype::Float { size: 8 }.encode().len(), 20);
    }

    #[test]
    fn boolean_is_enum_over_int8() {
        let enc = Datatype::Boolean.encode();
        assert_eq!(enc[0], 0x38);
        assert_eq!(enc[1], 2);
        assert!(enc.windows(5).any(|w| w == b"FALSE"));
        assert_eq!(&enc[enc.len() - 2..], &[0, 1]);
    }

    #[test]
    fn variable_length_string_over_uint8() {
        let enc = Datatype::VarString.encode();
        assert_eq!(&enc[..4], &[0x19, 0x01, 0x01, 0]);
        assert_eq!(&enc[4..8], &16u32.to_le_bytes());
        assert_eq!(enc[8], 0x10);
        assert_eq!(enc[9], 0x00);
        assert_eq!(Datatype::VarString.element_size(), 16);
    }

    #[test]
    fn datatypes_decode_back() {
        for dt in [
            Datatype::Integer { size: 2, signed: false },
            Datatype::Integer { size: 8, signed: true },
            Datatype::Float { size: 4 },
            Datatype::Boolean,
            Datatype::VarString,
        ] {
            assert_eq!(Datatype::decode(&dt.encode()).unwrap(), dt);
        }
        let mut big_endian = Datatype::Float { size: 8 }.encode();
        big_endian[1] |= 0x01;
        assert!(matches!(
            Datatype::decode(&big_endian),
            Err(FormatError::Unsupported(_))
        ));
    }

    #[test]
    fn dataspace_with_unlimited_max() {
        let ds = Dataspace::Simple {
            dims: vec![0, 2],
            max_dims: Some(vec![UNLIMITED, 2]),
        };
        let enc = ds.encode();
        assert_eq!(&enc[..4], &[2, 2, 1, 1]);
        assert_eq!(enc.len(), 4 + 4 * 8);
        assert_eq!(&enc[20..28], &u64::MAX.to_le_bytes());
        assert_eq!(Dataspace::decode(&enc).unwrap(), ds);
    }

    #[test]
    fn scalar_dataspace() {
        assert_eq!(Dataspace::Scalar.encode(), vec![2, 0, 0, 0]);
        assert_eq!(Dataspace::Scalar.num_elements(), 1);
        assert_eq!(Dataspace::of(&[]), Dataspace::Scalar);
    }

    #[test]
    fn short_link_name() {
        let enc = hard_link("entry", 0x30);
        assert_eq!(&enc[..3], &[1, 0, 5]);
        assert_eq!(&enc[3..8], b"entry");
        assert_eq!(&enc[8..], &0x30u64.to_le_bytes());
        assert_eq!(decode_link(&enc).unwrap(), ("entry".to_string(), 0x30));
        assert_eq!(decode_link(&hard_link("é", 9)).unwrap().0, "é");
    }

    #[test]
    fn attribute_message_size_matches_encoding() {
        let attr = H5Attribute::zeroed("units", Datatype::VarString, Dataspace::fixed(&[3]));
        assert_eq!(attr.raw.len(), 48);
        let size = H5Attribute::message_size("units", &attr.datatype, &attr.space);
        assert_eq!(attr.encode().len(), size);
        assert_eq!(H5Attribute::decode(&attr.encode()).unwrap(), attr);
    }

    #[test]
    fn earray_layout_encodes_element_size_last() {
        let enc = earray_layout(&[1, 2, 2], 8, 0x1000);
        assert_eq!(&enc[..5], &[4, 2, 0, 4, 1]);
        assert_eq!(&enc[5..9], &[1, 2, 2, 8]);
        assert_eq!(enc[9], 4);
        assert_eq!(&enc[10..15], &[32, 4, 4, 16, 32]);
        assert_eq!(&enc[15..], &0x1000u64.to_le_bytes());
        assert_eq!(
            Layout::decode(&enc).unwrap(),
            Layout::Chunked {
                chunk: vec![1, 2, 2],
                index: 0x1000
            }
        );
    }

    #[test]
    fn contiguous_layout_round_trip() {
        let layout = Layout::Contiguous { addr: 96, size: 16 };
        let enc = layout.encode(16);
        assert_eq!(&enc[..2], &[4, 1]);
        assert_eq!(Layout::decode(&enc).unwrap(), layout);
    }
}
