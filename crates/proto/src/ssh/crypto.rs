//! SSH cryptographic building blocks.
//!
//! This module defines the trait seams the packet codec encrypts, authenticates
//! and compresses through, the [`CryptoWishList`] algorithm preference lists,
//! and built-in implementations for the most commonly negotiated non-AEAD
//! suite:
//!
//! - AES-128-CTR, AES-256-CTR (stream ciphers)
//! - HMAC-SHA2-256, HMAC-SHA2-512
//!
//! Additional ciphers, MACs and compressors plug in through the same traits;
//! the key-exchange engine decides which concrete instances to install and
//! when.
//!
//! # Security
//!
//! - MAC verification in the codec uses constant-time comparison
//! - Key copies held by the built-in MACs are zeroized on drop
//!
//! # Example
//!
//! ```rust
//! use skiff_proto::ssh::crypto::{BlockCipher, Aes128Ctr};
//!
//! let key = [0x11u8; 16];
//! let iv = [0x22u8; 16];
//! let mut cipher = Aes128Ctr::new(&key, &iv);
//! assert_eq!(cipher.block_size(), 16);
//! ```

use aes::{Aes128, Aes256};
use cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac as HmacTrait};
use sha2::{Sha256, Sha512};
use skiff_platform::{SkiffError, SkiffResult};
use zeroize::Zeroize;

type Aes128CtrInner = ctr::Ctr128BE<Aes128>;
type Aes256CtrInner = ctr::Ctr128BE<Aes256>;

/// A block or stream cipher operating on whole packets.
///
/// The codec guarantees that the buffer handed to [`transform`] is a
/// multiple of [`block_size`] bytes; the cipher transforms it in place.
/// One instance serves exactly one direction of one connection and carries
/// its own keystream/chaining state across calls.
///
/// [`transform`]: BlockCipher::transform
/// [`block_size`]: BlockCipher::block_size
pub trait BlockCipher: Send {
    /// Cipher block size in bytes; packet framing aligns to it.
    fn block_size(&self) -> usize;

    /// Encrypts or decrypts `data` in place, advancing internal state.
    fn transform(&mut self, data: &mut [u8]) -> SkiffResult<()>;
}

/// A message authentication code keyed for one direction of one connection.
pub trait PacketMac: Send {
    /// Size of the authentication tag in bytes.
    fn output_size(&self) -> usize;

    /// Computes the tag over `seq_number || plaintext_packet` into `out`.
    ///
    /// `out` has exactly [`output_size`] bytes.
    ///
    /// [`output_size`]: PacketMac::output_size
    fn compute(&mut self, seq_number: u32, packet: &[u8], out: &mut [u8]);
}

/// A payload compressor for one direction of one connection.
pub trait Compressor: Send {
    /// Whether activation is deferred until after user authentication
    /// (`zlib@openssh.com` semantics).
    fn delayed(&self) -> bool;

    /// Worst-case number of bytes compression may add to a payload.
    fn buffer_margin(&self) -> usize;

    /// Compresses one payload.
    fn compress(&mut self, data: &[u8]) -> SkiffResult<Vec<u8>>;

    /// Decompresses one payload.
    fn decompress(&mut self, data: &[u8]) -> SkiffResult<Vec<u8>>;
}

/// AES-128 in counter mode (`aes128-ctr`, RFC 4344).
pub struct Aes128Ctr {
    inner: Aes128CtrInner,
}

impl Aes128Ctr {
    /// Creates the cipher from the negotiated key and initial counter block.
    pub fn new(key: &[u8; 16], iv: &[u8; 16]) -> Self {
        Self {
            inner: Aes128CtrInner::new(key.into(), iv.into()),
        }
    }
}

impl BlockCipher for Aes128Ctr {
    fn block_size(&self) -> usize {
        16
    }

    fn transform(&mut self, data: &mut [u8]) -> SkiffResult<()> {
        self.inner.apply_keystream(data);
        Ok(())
    }
}

/// AES-256 in counter mode (`aes256-ctr`, RFC 4344).
pub struct Aes256Ctr {
    inner: Aes256CtrInner,
}

impl Aes256Ctr {
    /// Creates the cipher from the negotiated key and initial counter block.
    pub fn new(key: &[u8; 32], iv: &[u8; 16]) -> Self {
        Self {
            inner: Aes256CtrInner::new(key.into(), iv.into()),
        }
    }
}

impl BlockCipher for Aes256Ctr {
    fn block_size(&self) -> usize {
        16
    }

    fn transform(&mut self, data: &mut [u8]) -> SkiffResult<()> {
        self.inner.apply_keystream(data);
        Ok(())
    }
}

/// HMAC-SHA2-256 (`hmac-sha2-256`, RFC 6668).
pub struct HmacSha256 {
    key: Vec<u8>,
}

impl HmacSha256 {
    /// Creates the MAC from the negotiated integrity key.
    pub fn new(key: &[u8]) -> Self {
        Self { key: key.to_vec() }
    }
}

impl PacketMac for HmacSha256 {
    fn output_size(&self) -> usize {
        32
    }

    fn compute(&mut self, seq_number: u32, packet: &[u8], out: &mut [u8]) {
        // new_from_slice accepts any key length for HMAC.
        let mut mac = <Hmac<Sha256>>::new_from_slice(&self.key).expect("HMAC accepts any key");
        mac.update(&seq_number.to_be_bytes());
        mac.update(packet);
        out.copy_from_slice(&mac.finalize().into_bytes());
    }
}

impl Drop for HmacSha256 {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// HMAC-SHA2-512 (`hmac-sha2-512`, RFC 6668).
pub struct HmacSha512 {
    key: Vec<u8>,
}

impl HmacSha512 {
    /// Creates the MAC from the negotiated integrity key.
    pub fn new(key: &[u8]) -> Self {
        Self { key: key.to_vec() }
    }
}

impl PacketMac for HmacSha512 {
    fn output_size(&self) -> usize {
        64
    }

    fn compute(&mut self, seq_number: u32, packet: &[u8], out: &mut [u8]) {
        let mut mac = <Hmac<Sha512>>::new_from_slice(&self.key).expect("HMAC accepts any key");
        mac.update(&seq_number.to_be_bytes());
        mac.update(packet);
        out.copy_from_slice(&mac.finalize().into_bytes());
    }
}

impl Drop for HmacSha512 {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Algorithm preference lists offered during key exchange.
///
/// Each list is ordered most-preferred first; the key-exchange engine
/// turns these into the KEXINIT name-lists and negotiates against the
/// server's lists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CryptoWishList {
    /// Key exchange algorithms.
    pub kex_algorithms: Vec<String>,
    /// Server host key algorithms.
    pub server_host_key_algorithms: Vec<String>,
    /// Encryption algorithms, client to server.
    pub ciphers_client_to_server: Vec<String>,
    /// Encryption algorithms, server to client.
    pub ciphers_server_to_client: Vec<String>,
    /// MAC algorithms, client to server.
    pub macs_client_to_server: Vec<String>,
    /// MAC algorithms, server to client.
    pub macs_server_to_client: Vec<String>,
    /// Compression algorithms, client to server.
    pub compression_client_to_server: Vec<String>,
    /// Compression algorithms, server to client.
    pub compression_server_to_client: Vec<String>,
}

impl Default for CryptoWishList {
    fn default() -> Self {
        let kex = vec![
            "curve25519-sha256".to_string(),
            "curve25519-sha256@libssh.org".to_string(),
            "diffie-hellman-group-exchange-sha256".to_string(),
            "diffie-hellman-group14-sha256".to_string(),
        ];
        let hostkeys = vec![
            "ssh-ed25519".to_string(),
            "rsa-sha2-512".to_string(),
            "rsa-sha2-256".to_string(),
        ];
        let ciphers = vec!["aes128-ctr".to_string(), "aes256-ctr".to_string()];
        let macs = vec!["hmac-sha2-256".to_string(), "hmac-sha2-512".to_string()];
        let compression = vec!["none".to_string(), "zlib@openssh.com".to_string()];

        Self {
            kex_algorithms: kex,
            server_host_key_algorithms: hostkeys,
            ciphers_client_to_server: ciphers.clone(),
            ciphers_server_to_client: ciphers,
            macs_client_to_server: macs.clone(),
            macs_server_to_client: macs,
            compression_client_to_server: compression.clone(),
            compression_server_to_client: compression,
        }
    }
}

impl CryptoWishList {
    /// Validates that no preference list is empty.
    pub fn validate(&self) -> SkiffResult<()> {
        let lists: [(&str, &[String]); 8] = [
            ("kex", &self.kex_algorithms),
            ("server host key", &self.server_host_key_algorithms),
            ("cipher c2s", &self.ciphers_client_to_server),
            ("cipher s2c", &self.ciphers_server_to_client),
            ("mac c2s", &self.macs_client_to_server),
            ("mac s2c", &self.macs_server_to_client),
            ("compression c2s", &self.compression_client_to_server),
            ("compression s2c", &self.compression_server_to_client),
        ];
        for (name, list) in lists {
            if list.is_empty() {
                return Err(SkiffError::Config(format!(
                    "Empty {} algorithm list",
                    name
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aes_ctr_round_trip() {
        let key = [0x42u8; 16];
        let iv = [0x24u8; 16];
        let mut enc = Aes128Ctr::new(&key, &iv);
        let mut dec = Aes128Ctr::new(&key, &iv);

        let plaintext = [0u8; 32];
        let mut data = plaintext;
        enc.transform(&mut data).unwrap();
        assert_ne!(data, plaintext);

        dec.transform(&mut data).unwrap();
        assert_eq!(data, plaintext);
    }

    #[test]
    fn test_aes_ctr_keystream_advances() {
        let key = [0x42u8; 32];
        let iv = [0x24u8; 16];
        let mut cipher = Aes256Ctr::new(&key, &iv);

        let mut first = [0u8; 16];
        let mut second = [0u8; 16];
        cipher.transform(&mut first).unwrap();
        cipher.transform(&mut second).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_hmac_sha256_depends_on_sequence_number() {
        let mut mac = HmacSha256::new(b"integrity key");
        let packet = b"\x00\x00\x00\x0c\x0a hello you!";

        let mut tag0 = [0u8; 32];
        let mut tag1 = [0u8; 32];
        mac.compute(0, packet, &mut tag0);
        mac.compute(1, packet, &mut tag1);

        assert_ne!(tag0, tag1);

        // Same inputs reproduce the same tag.
        let mut tag0_again = [0u8; 32];
        mac.compute(0, packet, &mut tag0_again);
        assert_eq!(tag0, tag0_again);
    }

    #[test]
    fn test_hmac_output_sizes() {
        assert_eq!(HmacSha256::new(b"k").output_size(), 32);
        assert_eq!(HmacSha512::new(b"k").output_size(), 64);
    }

    #[test]
    fn test_wishlist_default_is_valid() {
        let wishlist = CryptoWishList::default();
        assert!(wishlist.validate().is_ok());
        assert!(wishlist
            .kex_algorithms
            .contains(&"curve25519-sha256".to_string()));
        assert!(wishlist
            .ciphers_client_to_server
            .contains(&"aes128-ctr".to_string()));
    }

    #[test]
    fn test_wishlist_rejects_empty_list() {
        let mut wishlist = CryptoWishList::default();
        wishlist.macs_server_to_client.clear();
        assert!(matches!(
            wishlist.validate(),
            Err(SkiffError::Config(_))
        ));
    }
}
