//! SSH extension negotiation (RFC 8308).
//!
//! After key exchange the server may send `SSH_MSG_EXT_INFO` listing the
//! extensions it supports (`server-sig-algs`, `no-flow-control`, ...). The
//! message may be sent more than once; each one replaces the previous set
//! wholesale, and the transport keeps only the most recent.
//!
//! # Example
//!
//! ```rust
//! use skiff_proto::ssh::ext_info::ExtensionInfo;
//!
//! let info = ExtensionInfo::none_seen();
//! assert!(info.is_empty());
//! assert_eq!(info.get("server-sig-algs"), None);
//! ```

use std::collections::HashMap;

use skiff_platform::{SkiffError, SkiffResult};

use crate::ssh::message::MessageType;
use crate::ssh::wire::PacketReader;

/// The extension set most recently announced by the server.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ExtensionInfo {
    extensions: HashMap<String, Vec<u8>>,
}

impl ExtensionInfo {
    /// The state before any `SSH_MSG_EXT_INFO` has arrived.
    pub fn none_seen() -> Self {
        Self::default()
    }

    /// Parses an `SSH_MSG_EXT_INFO` payload.
    ///
    /// # Format (RFC 8308 Section 2.3)
    ///
    /// ```text
    /// byte     SSH_MSG_EXT_INFO (7)
    /// uint32   nr-extensions
    /// repeat:  string extension-name
    ///          string extension-value
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`SkiffError::Protocol`] on a wrong message type, a
    /// non-UTF-8 extension name, or a count that runs past the payload.
    pub fn from_payload(payload: &[u8]) -> SkiffResult<Self> {
        let mut reader = PacketReader::new(payload);

        let msg_type = reader.read_byte()?;
        if msg_type != MessageType::ExtInfo as u8 {
            return Err(SkiffError::Protocol(format!(
                "Expected SSH_MSG_EXT_INFO, got message type {}",
                msg_type
            )));
        }

        let count = reader.read_u32()? as usize;
        let mut extensions = HashMap::with_capacity(count.min(32));
        for _ in 0..count {
            let name = reader.read_string()?;
            let name = std::str::from_utf8(name)
                .map_err(|_| {
                    SkiffError::Protocol("Extension name is not valid UTF-8".to_string())
                })?
                .to_string();
            let value = reader.read_string()?.to_vec();
            extensions.insert(name, value);
        }

        Ok(Self { extensions })
    }

    /// Returns the raw value of an extension, if announced.
    pub fn get(&self, name: &str) -> Option<&[u8]> {
        self.extensions.get(name).map(Vec::as_slice)
    }

    /// Returns whether no extensions are known.
    pub fn is_empty(&self) -> bool {
        self.extensions.is_empty()
    }

    /// Returns the number of announced extensions.
    pub fn len(&self) -> usize {
        self.extensions.len()
    }
}
