//! SSH (Secure Shell) transport layer implementation.
//!
//! This module implements the client side of the SSH transport layer
//! protocol (RFC 4253): the subsystem that owns one TCP connection and
//! delivers version exchange, binary packet framing, key exchange
//! sequencing, rekeying, strict-kex enforcement (the Terrapin
//! countermeasure, `kex-strict-*-v00@openssh.com`), ordered message
//! dispatch and orderly disconnect.
//!
//! # Architecture
//!
//! The transport sits between a socket and the higher protocol layers:
//!
//! 1. **Version exchange** ([`version`]) - identification strings, kept
//!    verbatim as key-exchange hash inputs
//! 2. **Packet codec** ([`codec`]) - framing, encryption, MAC,
//!    compression, sequence numbers (RFC 4253 Section 6)
//! 3. **Receive loop** - classifies inbound packets and routes them to
//!    the engine, the transport itself, or a handler
//! 4. **Routing** ([`router`]) - handler registrations keyed by inclusive
//!    message-type ranges
//! 5. **Manager** ([`transport`]) - lifecycle, send coordination, the
//!    asynchronous reply queue, close-once semantics
//!
//! Key exchange itself is a collaborator behind the [`kex::KexEngine`]
//! trait; ciphers, MACs and compressors plug in through the seams in
//! [`crypto`]. Authentication and channels are built on top of the
//! handler registry and are not part of this module.
//!
//! # Security Considerations
//!
//! - **Input validation**: packet parsing enforces the 35000-byte limit
//!   and validates every declared length before allocating
//! - **Strict key exchange**: sequence numbers reset at key changes and
//!   pre-kex traffic is fatal when both sides advertise strict kex
//! - **Sanitised peer text**: DISCONNECT/DEBUG strings are truncated and
//!   restricted to printable ASCII before they reach logs or errors
//! - **No unsafe code**
//!
//! # References
//!
//! - [RFC 4251](https://datatracker.ietf.org/doc/html/rfc4251) - SSH Protocol Architecture
//! - [RFC 4253](https://datatracker.ietf.org/doc/html/rfc4253) - SSH Transport Layer Protocol
//! - [RFC 4344](https://datatracker.ietf.org/doc/html/rfc4344) - SSH Transport Layer Encryption Modes
//! - [RFC 8308](https://datatracker.ietf.org/doc/html/rfc8308) - Extension Negotiation

pub mod codec;
pub mod crypto;
pub(crate) mod dispatcher;
pub mod ext_info;
pub mod kex;
pub mod message;
pub mod router;
pub mod transport;
pub mod version;
pub mod wire;

// Re-export main types
pub use codec::{CodecRecv, CodecSend, MAX_PACKET_SIZE, RECEIVE_BUFFER_SIZE};
pub use crypto::{
    Aes128Ctr, Aes256Ctr, BlockCipher, Compressor, CryptoWishList, HmacSha256, HmacSha512,
    PacketMac,
};
pub use ext_info::ExtensionInfo;
pub use kex::{
    ConnectionInfo, DhGexParameters, KexEngine, ServerHostKeyVerifier, STRICT_KEX_CLIENT,
    STRICT_KEX_SERVER,
};
pub use message::{is_kex_message, MessageType, SSH_DISCONNECT_BY_APPLICATION};
pub use router::{ConnectionMonitor, MessageHandler, MessageRouter};
pub use transport::{IpVersion, KexTransport, ProxyData, Transport, TransportConfig};
pub use version::{default_client_id, Hello};
