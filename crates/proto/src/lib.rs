//! Protocol implementations for the Skiff SSH stack.
//!
//! This crate provides the client-side SSH-2 transport layer:
//!
//! - **SSH transport** (RFC 4253) - version exchange, binary packet
//!   protocol, key exchange sequencing, rekeying, strict-kex enforcement,
//!   message dispatch and orderly disconnect
//!
//! Higher layers (authentication, channels) and the key-exchange engine
//! itself plug in through the trait seams in [`ssh`].
//!
//! # Example
//!
//! ```rust
//! use skiff_proto::ssh::wire::{PacketReader, PacketWriter};
//!
//! // Build and re-read an SSH message body
//! let mut w = PacketWriter::new();
//! w.put_byte(80);
//! w.put_string(b"keepalive@openssh.com");
//! let bytes = w.into_bytes();
//!
//! let mut r = PacketReader::new(&bytes);
//! assert_eq!(r.read_byte().unwrap(), 80);
//! assert_eq!(r.read_string().unwrap(), b"keepalive@openssh.com");
//! ```
//!
//! # Security
//!
//! - Cryptographic operations use vetted RustCrypto libraries
//! - MAC comparison is constant-time
//! - Key copies are zeroized on drop
//! - Peer-controlled text is sanitised before reaching logs or errors
//!
//! # References
//!
//! - [RFC 4251](https://datatracker.ietf.org/doc/html/rfc4251) - SSH Protocol Architecture
//! - [RFC 4253](https://datatracker.ietf.org/doc/html/rfc4253) - SSH Transport Layer Protocol
//! - [RFC 8308](https://datatracker.ietf.org/doc/html/rfc8308) - Extension Negotiation

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![forbid(unsafe_code)]

pub mod ssh;
