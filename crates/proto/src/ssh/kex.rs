//! SSH key exchange interface (RFC 4253 Section 7).
//!
//! The transport does not perform key exchange itself; it drives a
//! [`KexEngine`] and gives it a privileged send path. The division of
//! labour:
//!
//! - The **transport** forwards every inbound KEX packet
//!   (`SSH_MSG_KEXINIT`, `SSH_MSG_NEWKEYS`, types 30..=49) to the engine,
//!   parks application senders while an exchange is running, and installs
//!   the cipher/MAC/compression contexts the engine produces.
//! - The **engine** owns algorithm negotiation, the exchange-hash
//!   computation, host-key verification and key derivation. It emits its
//!   own packets through the transport's KEX-privileged send path and
//!   reports completion so parked senders resume.
//!
//! # Strict key exchange
//!
//! If both KEXINITs carried the strict-kex tokens
//! ([`STRICT_KEX_CLIENT`]/[`STRICT_KEX_SERVER`]), packet sequence numbers
//! are reset to zero when new keys take effect and any non-KEX packet
//! before the first exchange completes is fatal. This is the countermeasure
//! against prefix-truncation attacks on the unencrypted start of the
//! stream.

use async_trait::async_trait;
use skiff_platform::{SkiffError, SkiffResult};

use crate::ssh::crypto::CryptoWishList;

/// Strict key exchange token a client advertises in its KEXINIT.
pub const STRICT_KEX_CLIENT: &str = "kex-strict-c-v00@openssh.com";

/// Strict key exchange token a server advertises in its KEXINIT.
pub const STRICT_KEX_SERVER: &str = "kex-strict-s-v00@openssh.com";

/// Group-size preferences for `diffie-hellman-group-exchange-*`
/// (RFC 4419).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DhGexParameters {
    /// Minimal acceptable group size in bits.
    pub min_group_size: u32,
    /// Preferred group size in bits.
    pub preferred_group_size: u32,
    /// Maximal acceptable group size in bits.
    pub max_group_size: u32,
}

impl DhGexParameters {
    /// Creates validated group-size preferences.
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::Config`] unless
    /// `min <= preferred <= max` and all sizes are within 1024..=8192.
    pub fn new(min: u32, preferred: u32, max: u32) -> SkiffResult<Self> {
        if !(min <= preferred && preferred <= max) {
            return Err(SkiffError::Config(format!(
                "Group sizes must be ordered: min {} <= preferred {} <= max {}",
                min, preferred, max
            )));
        }
        if min < 1024 || max > 8192 {
            return Err(SkiffError::Config(format!(
                "Group sizes must lie within 1024..=8192, got {}..={}",
                min, max
            )));
        }
        Ok(Self {
            min_group_size: min,
            preferred_group_size: preferred,
            max_group_size: max,
        })
    }
}

impl Default for DhGexParameters {
    fn default() -> Self {
        Self {
            min_group_size: 2048,
            preferred_group_size: 3072,
            max_group_size: 8192,
        }
    }
}

/// The outcome of one completed key exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Negotiated key exchange algorithm.
    pub kex_algorithm: String,
    /// Negotiated server host key algorithm.
    pub server_host_key_algorithm: String,
    /// The server's host key, encoded as it appeared on the wire.
    pub server_host_key: Vec<u8>,
    /// Negotiated cipher, client to server.
    pub cipher_client_to_server: String,
    /// Negotiated cipher, server to client.
    pub cipher_server_to_client: String,
    /// Negotiated MAC, client to server (empty for AEAD ciphers).
    pub mac_client_to_server: String,
    /// Negotiated MAC, server to client (empty for AEAD ciphers).
    pub mac_server_to_client: String,
    /// Negotiated compression, client to server.
    pub compression_client_to_server: String,
    /// Negotiated compression, server to client.
    pub compression_server_to_client: String,
    /// How many key exchanges have completed on this connection,
    /// including the one this describes.
    pub key_exchange_count: u32,
}

/// The key exchange engine driven by the transport.
///
/// One engine instance serves one connection for its whole life, covering
/// the initial exchange and every rekey. Implementations receive a
/// [`KexTransport`](crate::ssh::transport::KexTransport) handle at
/// construction and use it to emit packets and install derived keys; they
/// must call its `kex_finished` exactly once per completed exchange.
#[async_trait]
pub trait KexEngine: Send + Sync {
    /// Starts the initial key exchange or a rekey.
    ///
    /// Called by the transport during initialization and again for every
    /// forced rekey. A call while an exchange is already running is a
    /// no-op.
    async fn initiate(
        &self,
        wishlist: CryptoWishList,
        dhgex: DhGexParameters,
    ) -> SkiffResult<()>;

    /// Feeds one inbound KEX packet to the engine.
    ///
    /// The transport forwards every packet of type `SSH_MSG_KEXINIT`,
    /// `SSH_MSG_NEWKEYS` or 30..=49. `None` means the transport is closing:
    /// the engine must release anyone blocked in
    /// [`connection_info`](KexEngine::connection_info).
    async fn handle_message(&self, payload: Option<&[u8]>) -> SkiffResult<()>;

    /// Whether both sides advertised strict key exchange in their KEXINIT.
    ///
    /// Only meaningful once the first KEXINIT pair has been exchanged;
    /// before that it must return `false`.
    fn is_strict_kex(&self) -> bool;

    /// The exchange hash of the first key exchange.
    ///
    /// Stable for the life of the connection; the authentication layer
    /// signs over it. `None` until the first exchange completes.
    fn session_id(&self) -> Option<Vec<u8>>;

    /// Waits until the `kex_number`-th key exchange (1-indexed) has
    /// completed and returns its outcome.
    async fn connection_info(&self, kex_number: u32) -> SkiffResult<ConnectionInfo>;
}

/// Host key acceptance policy, supplied by the application.
///
/// The engine calls this once per key exchange, before trusting the
/// server's host key.
#[async_trait]
pub trait ServerHostKeyVerifier: Send + Sync {
    /// Returns whether the presented host key is acceptable for this
    /// server.
    async fn verify(
        &self,
        hostname: &str,
        port: u16,
        algorithm: &str,
        server_host_key: &[u8],
    ) -> SkiffResult<bool>;
}
