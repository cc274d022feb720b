//! Version 2 object headers.
//!
//! Headers are written with a 4-byte chunk size field so that a header can
//! grow inside its allocation without changing its prefix. Unused space at
//! the end of an allocation is filled with NIL messages.

use byteorder::{ByteOrder, LittleEndian};

use crate::checksum::lookup3;
use crate::error::FormatError;
use crate::message::{put_u16, put_u32, Bytes, MessageType, MAX_MESSAGE_SIZE};

/// Signature, version, flags and the 4-byte chunk size.
pub const PREFIX_SIZE: usize = 4 + 1 + 1 + 4;

/// Bytes before the first message and after the last.
pub const OVERHEAD: usize = PREFIX_SIZE + 4;

const MESSAGE_PREFIX: usize = 4;

/// Collects header messages and serializes them as one `OHDR` chunk.
#[derive(Debug, Default)]
pub struct ObjectHeaderWriter {
    messages: Vec<(MessageType, Vec<u8>, u8)>,
}

impl ObjectHeaderWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a message with no message flags.
    pub fn push(&mut self, msg_type: MessageType, body: Vec<u8>) {
        self.messages.push((msg_type, body, 0));
    }

    /// Append a message flagged constant (datatypes, fill values).
    pub fn push_constant(&mut self, msg_type: MessageType, body: Vec<u8>) {
        self.messages.push((msg_type, body, 0x01));
    }

    fn payload(&self) -> usize {
        self.messages
            .iter()
            .map(|(_, body, _)| MESSAGE_PREFIX + body.len())
            .sum()
    }

    /// Size of the header without padding.
    pub fn encoded_len(&self) -> usize {
        OVERHEAD + self.payload()
    }

    /// Serialize the header with no padding; `owner` names the object in
    /// error messages.
    pub fn finish(&self, owner: &str) -> Result<Vec<u8>, FormatError> {
        self.finish_padded(owner, self.encoded_len())
    }

    /// Serialize the header to exactly `size` bytes.
    pub fn finish_padded(&self, owner: &str, size: usize) -> Result<Vec<u8>, FormatError> {
        if let Some((_, body, _)) = self.messages.iter().find(|(_, b, _)| b.len() > MAX_MESSAGE_SIZE) {
            return Err(FormatError::MessageTooLarge {
                object: owner.to_string(),
                size: body.len(),
            });
        }
        let needed = self.encoded_len();
        if size < needed {
            return Err(FormatError::MessageTooLarge {
                object: owner.to_string(),
                size: needed,
            });
        }

        let chunk = size - OVERHEAD;
        let mut buf = Vec::with_capacity(size);
        buf.extend_from_slice(b"OHDR");
        buf.push(2);
        buf.push(0x02);
        put_u32(&mut buf, chunk as u32);
        for (msg_type, body, msg_flags) in &self.messages {
            buf.push(*msg_type as u8);
            put_u16(&mut buf, body.len() as u16);
            buf.push(*msg_flags);
            buf.extend_from_slice(body);
        }

        // A remainder shorter than a message prefix stays as a zeroed gap.
        let mut gap = size - needed;
        while gap >= MESSAGE_PREFIX {
            let body = (gap - MESSAGE_PREFIX).min(MAX_MESSAGE_SIZE);
            buf.push(MessageType::Nil as u8);
            put_u16(&mut buf, body as u16);
            buf.push(0);
            buf.resize(buf.len() + body, 0);
            gap -= MESSAGE_PREFIX + body;
        }
        buf.resize(size - 4, 0);

        let sum = lookup3(&buf);
        put_u32(&mut buf, sum);
        Ok(buf)
    }
}

/// Total size of the header whose first bytes are `prefix`, read from
/// file address `addr`. `prefix` must hold at least 32 bytes or the whole
/// header.
pub fn header_len(prefix: &[u8], addr: u64) -> Result<usize, FormatError> {
    let corrupt = FormatError::Corrupt {
        what: "object header",
        addr,
    };
    if prefix.len() < 6 || &prefix[..4] != b"OHDR" || prefix[4] != 2 {
        return Err(corrupt);
    }
    let flags = prefix[5];
    let mut pos = 6;
    if flags & 0x20 != 0 {
        pos += 16;
    }
    if flags & 0x10 != 0 {
        pos += 4;
    }
    let width = 1usize << (flags & 0x03);
    if prefix.len() < pos + width {
        return Err(corrupt);
    }
    let chunk = LittleEndian::read_uint(&prefix[pos..pos + width], width) as usize;
    Ok(pos + width + chunk + 4)
}

/// Parse a complete header into `(type, body)` pairs, skipping NIL messages.
pub fn parse(header: &[u8], addr: u64) -> Result<Vec<(u8, Vec<u8>)>, FormatError> {
    let corrupt = FormatError::Corrupt {
        what: "object header",
        addr,
    };
    let total = header_len(header, addr)?;
    if header.len() < total {
        return Err(corrupt);
    }
    let (body, sum) = header[..total].split_at(total - 4);
    if lookup3(body) != LittleEndian::read_u32(sum) {
        return Err(corrupt);
    }

    let flags = body[5];
    let start = 6
        + if flags & 0x20 != 0 { 16 } else { 0 }
        + if flags & 0x10 != 0 { 4 } else { 0 }
        + (1usize << (flags & 0x03));
    let prefix = MESSAGE_PREFIX + if flags & 0x04 != 0 { 2 } else { 0 };

    let mut r = Bytes::new(&body[start..], "object header");
    let mut out = Vec::new();
    while r.remaining() >= prefix {
        let msg_type = r.u8()?;
        let size = r.u16()? as usize;
        let msg_flags = r.u8()?;
        if flags & 0x04 != 0 {
            r.u16()?;
        }
        let data = r.take(size)?;
        if msg_flags & 0x02 != 0 {
            return Err(FormatError::Unsupported("shared header message".into()));
        }
        match msg_type {
            t if t == MessageType::Nil as u8 => {}
            t if t == MessageType::Continuation as u8 => {
                return Err(FormatError::Unsupported("object header continuation".into()));
            }
            _ => out.push((msg_type, data.to_vec())),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_header() {
        let bytes = ObjectHeaderWriter::new().finish("root").unwrap();
        assert_eq!(&bytes[..4], b"OHDR");
        assert_eq!(bytes[4], 2);
        assert_eq!(bytes[5], 0x02);
        assert_eq!(&bytes[6..10], &0u32.to_le_bytes());
        assert_eq!(bytes.len(), OVERHEAD);
    }

    #[test]
    fn checksum_covers_messages() {
        let mut w = ObjectHeaderWriter::new();
        w.push(MessageType::GroupInfo, vec![0, 0]);
        let bytes = w.finish("g").unwrap();
        let body = &bytes[..bytes.len() - 4];
        assert_eq!(&bytes[bytes.len() - 4..], &lookup3(body).to_le_bytes());
        assert_eq!(bytes[PREFIX_SIZE], MessageType::GroupInfo as u8);
        assert_eq!(w.encoded_len(), bytes.len());
    }

    #[test]
    fn padding_is_nil_messages() {
        let mut w = ObjectHeaderWriter::new();
        w.push(MessageType::GroupInfo, vec![0, 0]);
        let bytes = w.finish_padded("g", 120).unwrap();
        assert_eq!(bytes.len(), 120);
        assert_eq!(header_len(&bytes, 0).unwrap(), 120);
        assert_eq!(bytes[PREFIX_SIZE + 6], MessageType::Nil as u8);
        let msgs = parse(&bytes, 0).unwrap();
        assert_eq!(msgs, vec![(MessageType::GroupInfo as u8, vec![0, 0])]);
    }

    #[test]
    fn small_remainder_is_left_as_gap() {
        let mut w = ObjectHeaderWriter::new();
        w.push(MessageType::GroupInfo, vec![0, 0]);
        let size = w.encoded_len() + 3;
        let bytes = w.finish_padded("g", size).unwrap();
        assert_eq!(parse(&bytes, 0).unwrap().len(), 1);
    }

    #[test]
    fn allocation_too_small() {
        let mut w = ObjectHeaderWriter::new();
        w.push(MessageType::Attribute, vec![0xAB; 400]);
        assert!(w.finish_padded("d", 100).is_err());
    }

    #[test]
    fn oversized_message_is_rejected() {
        let mut w = ObjectHeaderWriter::new();
        w.push(MessageType::Attribute, vec![0; 70_000]);
        assert!(matches!(
            w.finish("big"),
            Err(FormatError::MessageTooLarge { size: 70_000, .. })
        ));
    }

    #[test]
    fn flipped_byte_fails_checksum() {
        let mut w = ObjectHeaderWriter::new();
        w.push(MessageType::GroupInfo, vec![0, 0]);
        let mut bytes = w.finish("g").unwrap();
        bytes[PREFIX_SIZE + 4] ^= 0xFF;
        assert!(matches!(parse(&bytes, 64), Err(FormatError::Corrupt { addr: 64, .. })));
    }
}
