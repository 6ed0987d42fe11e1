//! SSH binary packet protocol (RFC 4253 Section 6).
//!
//! # Packet Format
//!
//! ```text
//! uint32    packet_length
//! byte      padding_length
//! byte[n1]  payload (n1 = packet_length - padding_length - 1)
//! byte[n2]  random padding (n2 = padding_length)
//! byte[m]   mac (MAC = Message Authentication Code)
//! ```
//!
//! The codec is split into two independent halves. [`CodecSend`] owns the
//! write side of the connection, [`CodecRecv`] the read side; each carries
//! its own cipher, MAC, compressor and 32-bit sequence number. The halves
//! never share state, so the receive task and senders can run concurrently
//! without touching each other.
//!
//! Sequence numbers increment by one per packet, wrap modulo 2^32, and are
//! an input to every MAC. They are reset only at the instant new keys take
//! effect when strict key exchange was negotiated (the Terrapin
//! countermeasure, `kex-strict-*-v00@openssh.com`).
//!
//! # Constraints
//!
//! - `packet_length` does not cover the MAC or the length field itself
//! - `padding_length` is at least 4 bytes
//! - The encrypted portion is a multiple of the cipher block size
//!   (8 bytes minimum)
//! - Maximum total packet size: 35000 bytes (security limit per RFC 4253)
//!
//! # Security
//!
//! - **Size validation**: rejects packets > 35000 bytes before allocating
//! - **MAC verification**: constant-time comparison, checked before the
//!   payload is interpreted
//! - **Random padding**: cryptographically secure RNG

use bytes::{BufMut, BytesMut};
use rand::RngCore;
use skiff_platform::{SkiffError, SkiffResult};
use subtle::ConstantTimeEq;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::ssh::crypto::{BlockCipher, Compressor, PacketMac};

/// Maximum total packet size in bytes (RFC 4253 Section 6.1).
pub const MAX_PACKET_SIZE: usize = 35000;

/// Size of the reusable receive buffer: maximum packet size plus margin.
pub const RECEIVE_BUFFER_SIZE: usize = 35004;

/// Minimum padding length in bytes (RFC 4253 Section 6).
pub const MIN_PADDING_LEN: usize = 4;

/// Minimum block alignment when no cipher is installed.
const PLAIN_BLOCK_SIZE: usize = 8;

async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> SkiffResult<()>
where
    R: AsyncRead + Unpin,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(SkiffError::Truncated),
        Err(e) => Err(SkiffError::Io(e)),
    }
}

fn validate_packet_length(packet_length: usize) -> SkiffResult<()> {
    if packet_length < 1 + MIN_PADDING_LEN {
        return Err(SkiffError::Protocol(format!(
            "Illegal packet size: {} bytes",
            packet_length
        )));
    }
    if 4 + packet_length > MAX_PACKET_SIZE {
        return Err(SkiffError::Protocol(format!(
            "Packet too large: {} bytes (maximum {})",
            packet_length, MAX_PACKET_SIZE
        )));
    }
    Ok(())
}

/// The sending half of the packet codec.
///
/// Owns the write side of the connection. All framing, compression,
/// encryption and MAC computation for outgoing packets happens here;
/// callers serialise access through the transport's send coordination.
pub struct CodecSend<W> {
    writer: W,
    cipher: Option<Box<dyn BlockCipher>>,
    mac: Option<Box<dyn PacketMac>>,
    compressor: Option<Box<dyn Compressor>>,
    compression_started: bool,
    seq: u32,
}

impl<W> CodecSend<W>
where
    W: AsyncWrite + Unpin,
{
    /// Creates a plaintext sending half around a write stream.
    pub fn new(writer: W) -> Self {
        Self {
            writer,
            cipher: None,
            mac: None,
            compressor: None,
            compression_started: false,
            seq: 0,
        }
    }

    /// Writes one SSH binary packet containing `payload`.
    ///
    /// Applies the installed compressor, computes the MAC over
    /// `seq || plaintext_packet`, encrypts, writes, and increments the send
    /// sequence number. Any error leaves the stream unusable; the caller is
    /// expected to tear the connection down.
    pub async fn send_packet(&mut self, payload: &[u8]) -> SkiffResult<()> {
        let compressed: Vec<u8>;
        let payload: &[u8] = match self.compressor.as_mut() {
            Some(comp) if self.compression_started || !comp.delayed() => {
                compressed = comp.compress(payload)?;
                &compressed
            }
            _ => payload,
        };

        let block_size = self
            .cipher
            .as_ref()
            .map(|c| c.block_size().max(PLAIN_BLOCK_SIZE))
            .unwrap_or(PLAIN_BLOCK_SIZE);

        let mut padding_len = block_size - ((5 + payload.len()) % block_size);
        if padding_len < MIN_PADDING_LEN {
            padding_len += block_size;
        }

        let packet_length = 1 + payload.len() + padding_len;
        if 4 + packet_length > MAX_PACKET_SIZE {
            return Err(SkiffError::Protocol(format!(
                "Cannot send packet: {} bytes after framing (maximum {})",
                4 + packet_length,
                MAX_PACKET_SIZE
            )));
        }

        let mac_len = self.mac.as_ref().map(|m| m.output_size()).unwrap_or(0);
        let mut buf = BytesMut::with_capacity(4 + packet_length + mac_len);
        buf.put_u32(packet_length as u32);
        buf.put_u8(padding_len as u8);
        buf.put_slice(payload);

        let mut padding = vec![0u8; padding_len];
        rand::thread_rng().fill_bytes(&mut padding);
        buf.put_slice(&padding);

        let tag = match self.mac.as_mut() {
            Some(mac) => {
                let mut tag = vec![0u8; mac.output_size()];
                mac.compute(self.seq, &buf, &mut tag);
                Some(tag)
            }
            None => None,
        };

        if let Some(cipher) = self.cipher.as_mut() {
            cipher.transform(&mut buf)?;
        }

        self.writer.write_all(&buf).await?;
        if let Some(tag) = tag {
            self.writer.write_all(&tag).await?;
        }
        self.writer.flush().await?;

        self.seq = self.seq.wrapping_add(1);
        Ok(())
    }

    /// Installs a new cipher and MAC, effective from the next packet.
    pub fn set_cipher(
        &mut self,
        cipher: Box<dyn BlockCipher>,
        mac: Option<Box<dyn PacketMac>>,
    ) {
        self.cipher = Some(cipher);
        self.mac = mac;
    }

    /// Installs a new compressor, effective from the next packet unless it
    /// is a delayed compressor.
    pub fn set_compressor(&mut self, compressor: Box<dyn Compressor>) {
        self.compressor = Some(compressor);
    }

    /// Activates delayed compression (after user authentication).
    pub fn start_compression(&mut self) {
        self.compression_started = true;
    }

    /// Resets the send sequence number to zero.
    ///
    /// Permitted only immediately after installing new keys when strict
    /// key exchange was negotiated.
    pub fn reset_sequence_number(&mut self) {
        self.seq = 0;
    }

    /// Returns the current send sequence number.
    pub fn sequence_number(&self) -> u32 {
        self.seq
    }

    /// Upper bound on the bytes framing adds to a payload.
    ///
    /// Used by the channel layer to size flow-control windows.
    pub fn overhead_estimate(&self) -> usize {
        let block_size = self
            .cipher
            .as_ref()
            .map(|c| c.block_size().max(PLAIN_BLOCK_SIZE))
            .unwrap_or(PLAIN_BLOCK_SIZE);
        let mac_len = self.mac.as_ref().map(|m| m.output_size()).unwrap_or(0);
        let comp_margin = match self.compressor.as_ref() {
            Some(comp) if self.compression_started || !comp.delayed() => comp.buffer_margin(),
            _ => 0,
        };
        5 + 4 + (block_size - 1) + mac_len + comp_margin
    }

    /// Shuts the write side of the stream down.
    pub async fn shutdown(&mut self) -> std::io::Result<()> {
        self.writer.shutdown().await
    }
}

/// The receiving half of the packet codec.
///
/// Owned by the receive loop; one packet is read, decrypted, verified and
/// decompressed per call.
pub struct CodecRecv<R> {
    reader: R,
    cipher: Option<Box<dyn BlockCipher>>,
    mac: Option<Box<dyn PacketMac>>,
    compressor: Option<Box<dyn Compressor>>,
    compression_started: bool,
    seq: u32,
    scratch: Vec<u8>,
}

impl<R> CodecRecv<R>
where
    R: AsyncRead + Unpin,
{
    /// Creates a plaintext receiving half around a read stream.
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            cipher: None,
            mac: None,
            compressor: None,
            compression_started: false,
            seq: 0,
            scratch: Vec::new(),
        }
    }

    /// Reads one complete packet, verifies and decodes it, and copies the
    /// plaintext payload into `buf`.
    ///
    /// Returns the payload length. Blocks until a full packet is available.
    ///
    /// # Errors
    ///
    /// - [`SkiffError::Truncated`] if the stream ends mid-packet
    /// - [`SkiffError::MacMismatch`] if the authentication tag is wrong
    /// - [`SkiffError::Protocol`] on malformed length or padding
    pub async fn receive_packet(&mut self, buf: &mut [u8]) -> SkiffResult<usize> {
        let packet_length;

        if let Some(cipher) = self.cipher.as_mut() {
            // The length field is encrypted too: read and decrypt the first
            // block before the total size is known.
            let block_size = cipher.block_size().max(PLAIN_BLOCK_SIZE);
            self.scratch.resize(block_size, 0);
            read_full(&mut self.reader, &mut self.scratch[..]).await?;
            cipher.transform(&mut self.scratch[..])?;

            packet_length = u32::from_be_bytes([
                self.scratch[0],
                self.scratch[1],
                self.scratch[2],
                self.scratch[3],
            ]) as usize;
            validate_packet_length(packet_length)?;

            let total = 4 + packet_length;
            if total % block_size != 0 {
                return Err(SkiffError::Protocol(format!(
                    "Packet size {} is not a multiple of the cipher block size {}",
                    total, block_size
                )));
            }

            self.scratch.resize(total, 0);
            read_full(&mut self.reader, &mut self.scratch[block_size..]).await?;
            cipher.transform(&mut self.scratch[block_size..])?;
        } else {
            let mut length_bytes = [0u8; 4];
            read_full(&mut self.reader, &mut length_bytes).await?;
            packet_length = u32::from_be_bytes(length_bytes) as usize;
            validate_packet_length(packet_length)?;

            self.scratch.resize(4 + packet_length, 0);
            self.scratch[..4].copy_from_slice(&length_bytes);
            read_full(&mut self.reader, &mut self.scratch[4..]).await?;
        }

        if let Some(mac) = self.mac.as_mut() {
            let mut received = vec![0u8; mac.output_size()];
            read_full(&mut self.reader, &mut received).await?;

            let mut expected = vec![0u8; mac.output_size()];
            mac.compute(self.seq, &self.scratch, &mut expected);
            if expected.ct_eq(&received).unwrap_u8() == 0 {
                return Err(SkiffError::MacMismatch);
            }
        }

        let padding_len = self.scratch[4] as usize;
        if padding_len < MIN_PADDING_LEN {
            return Err(SkiffError::Protocol(format!(
                "Padding too short: {} bytes (minimum {})",
                padding_len, MIN_PADDING_LEN
            )));
        }
        if 1 + padding_len > packet_length {
            return Err(SkiffError::Protocol(format!(
                "Padding length {} exceeds packet length {}",
                padding_len, packet_length
            )));
        }

        let payload_len = packet_length - 1 - padding_len;
        let payload = &self.scratch[5..5 + payload_len];

        let expanded: Vec<u8>;
        let plaintext: &[u8] = match self.compressor.as_mut() {
            Some(comp) if self.compression_started || !comp.delayed() => {
                expanded = comp.decompress(payload)?;
                &expanded
            }
            _ => payload,
        };

        if plaintext.len() > buf.len() {
            return Err(SkiffError::Protocol(format!(
                "Receive buffer too small: {} bytes for a {}-byte payload",
                buf.len(),
                plaintext.len()
            )));
        }
        buf[..plaintext.len()].copy_from_slice(plaintext);

        self.seq = self.seq.wrapping_add(1);
        Ok(plaintext.len())
    }

    /// Installs a new cipher and MAC, effective from the next packet.
    pub fn set_cipher(
        &mut self,
        cipher: Box<dyn BlockCipher>,
        mac: Option<Box<dyn PacketMac>>,
    ) {
        self.cipher = Some(cipher);
        self.mac = mac;
    }

    /// Installs a new compressor, effective from the next packet unless it
    /// is a delayed compressor.
    pub fn set_compressor(&mut self, compressor: Box<dyn Compressor>) {
        self.compressor = Some(compressor);
    }

    /// Activates delayed compression (after user authentication).
    pub fn start_compression(&mut self) {
        self.compression_started = true;
    }

    /// Resets the receive sequence number to zero.
    ///
    /// Permitted only immediately after installing new keys when strict
    /// key exchange was negotiated.
    pub fn reset_sequence_number(&mut self) {
        self.seq = 0;
    }

    /// Returns the current receive sequence number.
    pub fn sequence_number(&self) -> u32 {
        self.seq
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::crypto::{Aes128Ctr, HmacSha256};
    use std::io::Cursor;

    async fn frame(payload: &[u8]) -> Vec<u8> {
        let mut wire = Vec::new();
        let mut tx = CodecSend::new(&mut wire);
        tx.send_packet(payload).await.unwrap();
        wire
    }

    #[tokio::test]
    async fn test_plaintext_round_trip() {
        let wire = frame(b"hello transport").await;
        assert_eq!(wire.len() % 8, 0);

        let mut rx = CodecRecv::new(Cursor::new(wire));
        let mut buf = [0u8; RECEIVE_BUFFER_SIZE];
        let n = rx.receive_packet(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello transport");
    }

    #[tokio::test]
    async fn test_sequence_numbers_increment() {
        let mut wire = Vec::new();
        let mut tx = CodecSend::new(&mut wire);
        assert_eq!(tx.sequence_number(), 0);
        tx.send_packet(b"one").await.unwrap();
        tx.send_packet(b"two").await.unwrap();
        tx.send_packet(b"three").await.unwrap();
        assert_eq!(tx.sequence_number(), 3);

        let mut rx = CodecRecv::new(Cursor::new(wire));
        let mut buf = [0u8; 256];
        for _ in 0..3 {
            rx.receive_packet(&mut buf).await.unwrap();
        }
        assert_eq!(rx.sequence_number(), 3);

        rx.reset_sequence_number();
        assert_eq!(rx.sequence_number(), 0);
    }

    #[tokio::test]
    async fn test_mac_round_trip_and_mismatch() {
        let key = b"0123456789abcdef0123456789abcdef";

        let mut wire = Vec::new();
        {
            let mut tx = CodecSend::new(&mut wire);
            tx.set_cipher(
                Box::new(Aes128Ctr::new(&[0x01; 16], &[0x02; 16])),
                Some(Box::new(HmacSha256::new(key))),
            );
            tx.send_packet(b"authenticated payload").await.unwrap();
        }

        // Intact wire verifies and decodes.
        let mut rx = CodecRecv::new(Cursor::new(wire.clone()));
        rx.set_cipher(
            Box::new(Aes128Ctr::new(&[0x01; 16], &[0x02; 16])),
            Some(Box::new(HmacSha256::new(key))),
        );
        let mut buf = [0u8; 256];
        let n = rx.receive_packet(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"authenticated payload");

        // Flipping one ciphertext bit must be caught by the MAC.
        let mut corrupted = wire;
        corrupted[6] ^= 0x01;
        let mut rx = CodecRecv::new(Cursor::new(corrupted));
        rx.set_cipher(
            Box::new(Aes128Ctr::new(&[0x01; 16], &[0x02; 16])),
            Some(Box::new(HmacSha256::new(key))),
        );
        let result = rx.receive_packet(&mut buf).await;
        assert!(matches!(result, Err(SkiffError::MacMismatch)));
    }

    #[tokio::test]
    async fn test_encrypted_packets_align_to_cipher_block() {
        let mut wire = Vec::new();
        {
            let mut tx = CodecSend::new(&mut wire);
            tx.set_cipher(Box::new(Aes128Ctr::new(&[0x05; 16], &[0x06; 16])), None);
            tx.send_packet(b"x").await.unwrap();
        }
        assert_eq!(wire.len() % 16, 0);
    }

    #[tokio::test]
    async fn test_truncated_stream() {
        let wire = frame(b"about to be cut off").await;
        let mut rx = CodecRecv::new(Cursor::new(wire[..wire.len() - 3].to_vec()));
        let mut buf = [0u8; 256];
        let result = rx.receive_packet(&mut buf).await;
        assert!(matches!(result, Err(SkiffError::Truncated)));
    }

    #[tokio::test]
    async fn test_oversize_length_rejected() {
        // Declared length far beyond the 35000-byte limit.
        let wire = vec![0xFF, 0xFF, 0xFF, 0xFF];
        let mut rx = CodecRecv::new(Cursor::new(wire));
        let mut buf = [0u8; 256];
        let result = rx.receive_packet(&mut buf).await;
        assert!(matches!(result, Err(SkiffError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_undersize_padding_rejected() {
        // packet_length = 8, padding_length = 2 (< 4).
        let mut wire = vec![0, 0, 0, 8, 2];
        wire.extend_from_slice(&[0xAA; 7]);
        let mut rx = CodecRecv::new(Cursor::new(wire));
        let mut buf = [0u8; 256];
        let result = rx.receive_packet(&mut buf).await;
        assert!(matches!(result, Err(SkiffError::Protocol(_))));
    }

    #[tokio::test]
    async fn test_payload_too_large_to_send() {
        let mut wire = Vec::new();
        let mut tx = CodecSend::new(&mut wire);
        let oversized = vec![0u8; MAX_PACKET_SIZE + 1];
        let result = tx.send_packet(&oversized).await;
        assert!(matches!(result, Err(SkiffError::Protocol(_))));
    }

    struct MarkerCompressor {
        delayed: bool,
    }

    impl Compressor for MarkerCompressor {
        fn delayed(&self) -> bool {
            self.delayed
        }

        fn buffer_margin(&self) -> usize {
            1
        }

        fn compress(&mut self, data: &[u8]) -> SkiffResult<Vec<u8>> {
            let mut out = Vec::with_capacity(data.len() + 1);
            out.push(0xC0);
            out.extend_from_slice(data);
            Ok(out)
        }

        fn decompress(&mut self, data: &[u8]) -> SkiffResult<Vec<u8>> {
            match data.split_first() {
                Some((0xC0, rest)) => Ok(rest.to_vec()),
                _ => Err(SkiffError::Protocol("Missing compression marker".into())),
            }
        }
    }

    #[tokio::test]
    async fn test_immediate_compressor_applies_at_once() {
        let mut wire = Vec::new();
        {
            let mut tx = CodecSend::new(&mut wire);
            tx.set_compressor(Box::new(MarkerCompressor { delayed: false }));
            tx.send_packet(b"squeeze me").await.unwrap();
        }

        let mut rx = CodecRecv::new(Cursor::new(wire));
        rx.set_compressor(Box::new(MarkerCompressor { delayed: false }));
        let mut buf = [0u8; 256];
        let n = rx.receive_packet(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"squeeze me");
    }

    #[tokio::test]
    async fn test_delayed_compressor_waits_for_start() {
        // Before start_compression a delayed compressor must be inert.
        let mut wire = Vec::new();
        {
            let mut tx = CodecSend::new(&mut wire);
            tx.set_compressor(Box::new(MarkerCompressor { delayed: true }));
            tx.send_packet(b"pre-auth").await.unwrap();
        }
        let mut rx = CodecRecv::new(Cursor::new(wire));
        rx.set_compressor(Box::new(MarkerCompressor { delayed: true }));
        let mut buf = [0u8; 256];
        let n = rx.receive_packet(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"pre-auth");

        // After start_compression it must engage on both halves.
        let mut wire = Vec::new();
        {
            let mut tx = CodecSend::new(&mut wire);
            tx.set_compressor(Box::new(MarkerCompressor { delayed: true }));
            tx.start_compression();
            tx.send_packet(b"post-auth").await.unwrap();
        }
        let mut rx = CodecRecv::new(Cursor::new(wire));
        rx.set_compressor(Box::new(MarkerCompressor { delayed: true }));
        rx.start_compression();
        let n = rx.receive_packet(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"post-auth");
    }

    #[tokio::test]
    async fn test_overhead_estimate_grows_with_mac() {
        let mut wire = Vec::new();
        let mut tx = CodecSend::new(&mut wire);
        let plain = tx.overhead_estimate();
        assert_eq!(plain, 5 + 4 + 7);

        tx.set_cipher(
            Box::new(Aes128Ctr::new(&[0u8; 16], &[0u8; 16])),
            Some(Box::new(HmacSha256::new(b"key"))),
        );
        assert_eq!(tx.overhead_estimate(), 5 + 4 + 15 + 32);
    }

    #[tokio::test]
    async fn test_receive_buffer_too_small() {
        let wire = frame(b"a payload that needs room").await;
        let mut rx = CodecRecv::new(Cursor::new(wire));
        let mut buf = [0u8; 4];
        let result = rx.receive_packet(&mut buf).await;
        assert!(matches!(result, Err(SkiffError::Protocol(_))));
    }
}
