//! SSH wire-format primitives (RFC 4251 Section 5).
//!
//! Bounds-checked reading and writing of the primitive types that SSH
//! messages are built from: `byte`, `boolean`, `uint32`, `string` and
//! `name-list`. Every read validates against the remaining buffer; a
//! declared length that runs past the end of the message is a protocol
//! error, never a panic.
//!
//! # Example
//!
//! ```rust
//! use skiff_proto::ssh::wire::{PacketReader, PacketWriter};
//!
//! let mut w = PacketWriter::new();
//! w.put_byte(98);
//! w.put_u32(7);
//! w.put_string(b"exit-status");
//! let bytes = w.into_bytes();
//!
//! let mut r = PacketReader::new(&bytes);
//! assert_eq!(r.read_byte().unwrap(), 98);
//! assert_eq!(r.read_u32().unwrap(), 7);
//! assert_eq!(r.read_string().unwrap(), b"exit-status");
//! ```

use bytes::{BufMut, BytesMut};
use skiff_platform::{SkiffError, SkiffResult};

/// Incremental reader over a single message payload.
#[derive(Debug)]
pub struct PacketReader<'a> {
    buf: &'a [u8],
}

impl<'a> PacketReader<'a> {
    /// Creates a reader over a message payload.
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    /// Reads a single `byte`.
    pub fn read_byte(&mut self) -> SkiffResult<u8> {
        Ok(self.consume(1)?[0])
    }

    /// Reads a `boolean` (any non-zero byte is true, RFC 4251).
    pub fn read_boolean(&mut self) -> SkiffResult<bool> {
        Ok(self.read_byte()? != 0)
    }

    /// Reads a big-endian `uint32`.
    pub fn read_u32(&mut self) -> SkiffResult<u32> {
        let bytes = self.consume(4)?;
        Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    /// Reads a length-prefixed `string` as raw bytes.
    pub fn read_string(&mut self) -> SkiffResult<&'a [u8]> {
        let len = self.read_u32()? as usize;
        self.consume(len)
    }

    /// Reads a `string` and decodes it as UTF-8, replacing invalid
    /// sequences with U+FFFD.
    ///
    /// Peer-supplied text (DISCONNECT and DEBUG descriptions) must never
    /// abort parsing on bad encoding; further sanitisation happens at the
    /// point of use.
    pub fn read_string_lossy(&mut self) -> SkiffResult<String> {
        Ok(String::from_utf8_lossy(self.read_string()?).into_owned())
    }

    /// Reads a `name-list`: a `string` of comma-separated ASCII names.
    pub fn read_name_list(&mut self) -> SkiffResult<Vec<String>> {
        let raw = self.read_string()?;
        if !raw.is_ascii() {
            return Err(SkiffError::Protocol(
                "name-list is not valid ASCII".to_string(),
            ));
        }
        let text = std::str::from_utf8(raw)
            .map_err(|_| SkiffError::Protocol("name-list is not valid ASCII".to_string()))?;
        if text.is_empty() {
            return Ok(Vec::new());
        }
        Ok(text.split(',').map(String::from).collect())
    }

    /// Returns the number of unread bytes.
    pub fn remaining(&self) -> usize {
        self.buf.len()
    }

    fn consume(&mut self, len: usize) -> SkiffResult<&'a [u8]> {
        if self.buf.len() < len {
            return Err(SkiffError::Protocol(format!(
                "Message truncated: needed {} more bytes, {} available",
                len,
                self.buf.len()
            )));
        }
        let (consumed, rest) = self.buf.split_at(len);
        self.buf = rest;
        Ok(consumed)
    }
}

/// Builder for a single message payload.
#[derive(Debug, Default)]
pub struct PacketWriter {
    buf: BytesMut,
}

impl PacketWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self {
            buf: BytesMut::new(),
        }
    }

    /// Appends a single `byte`.
    pub fn put_byte(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    /// Appends a `boolean`.
    pub fn put_boolean(&mut self, value: bool) {
        self.buf.put_u8(u8::from(value));
    }

    /// Appends a big-endian `uint32`.
    pub fn put_u32(&mut self, value: u32) {
        self.buf.put_u32(value);
    }

    /// Appends a length-prefixed `string`.
    pub fn put_string(&mut self, value: &[u8]) {
        self.buf.put_u32(value.len() as u32);
        self.buf.put_slice(value);
    }

    /// Appends a `name-list` as a comma-joined `string`.
    pub fn put_name_list(&mut self, names: &[String]) {
        self.put_string(names.join(",").as_bytes());
    }

    /// Finishes the message and returns the bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf.to_vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_primitive_round_trip() {
        let mut w = PacketWriter::new();
        w.put_byte(20);
        w.put_boolean(true);
        w.put_u32(0xDEAD_BEEF);
        w.put_string(b"ssh-userauth");
        let bytes = w.into_bytes();

        let mut r = PacketReader::new(&bytes);
        assert_eq!(r.read_byte().unwrap(), 20);
        assert!(r.read_boolean().unwrap());
        assert_eq!(r.read_u32().unwrap(), 0xDEAD_BEEF);
        assert_eq!(r.read_string().unwrap(), b"ssh-userauth");
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_name_list_round_trip() {
        let names = vec![
            "curve25519-sha256".to_string(),
            "diffie-hellman-group14-sha256".to_string(),
        ];
        let mut w = PacketWriter::new();
        w.put_name_list(&names);
        let bytes = w.into_bytes();

        let mut r = PacketReader::new(&bytes);
        assert_eq!(r.read_name_list().unwrap(), names);
    }

    #[test]
    fn test_empty_name_list() {
        let mut w = PacketWriter::new();
        w.put_name_list(&[]);
        let bytes = w.into_bytes();

        let mut r = PacketReader::new(&bytes);
        assert!(r.read_name_list().unwrap().is_empty());
    }

    #[test]
    fn test_string_length_past_end_is_error() {
        // Declares a 100-byte string but supplies 2 bytes.
        let bytes = [0, 0, 0, 100, 0xAA, 0xBB];
        let mut r = PacketReader::new(&bytes);
        let result = r.read_string();
        assert!(matches!(result, Err(SkiffError::Protocol(_))));
    }

    #[test]
    fn test_read_past_end_is_error() {
        let mut r = PacketReader::new(&[1, 2]);
        assert!(r.read_u32().is_err());
    }

    #[test]
    fn test_lossy_string_replaces_bad_utf8() {
        let mut w = PacketWriter::new();
        w.put_string(&[0x67, 0x6F, 0xFF, 0x6F]);
        let bytes = w.into_bytes();

        let mut r = PacketReader::new(&bytes);
        let text = r.read_string_lossy().unwrap();
        assert!(text.contains('\u{FFFD}'));
        assert!(text.starts_with("go"));
    }
}
