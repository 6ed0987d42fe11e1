//! SSH protocol message types (RFC 4253).
//!
//! This module defines the transport-layer message types and their numeric
//! identifiers as specified in RFC 4253 Section 12 and RFC 8308.
//!
//! # Message Categories
//!
//! - **Transport layer generic** (1-19): disconnect, ignore, debug, ext-info
//! - **Algorithm negotiation** (20-29): key exchange initialization
//! - **Key exchange method** (30-49): method-specific messages
//! - **User authentication** (50-79): owned by the auth layer; the transport
//!   only watches for `UserauthSuccess` to activate delayed compression
//!
//! # Example
//!
//! ```rust
//! use skiff_proto::ssh::message::MessageType;
//!
//! let msg_type = MessageType::KexInit;
//! assert_eq!(msg_type as u8, 20);
//! ```

/// Lowest message number reserved for key-exchange-method-specific messages.
pub const KEX_SPECIFIC_LOW: u8 = 30;

/// Highest message number reserved for key-exchange-method-specific messages.
pub const KEX_SPECIFIC_HIGH: u8 = 49;

/// Disconnect reason code sent on an application-initiated close
/// (RFC 4253 Section 11.1).
pub const SSH_DISCONNECT_BY_APPLICATION: u32 = 11;

/// Disconnect reason code for protocol errors (RFC 4253 Section 11.1).
pub const SSH_DISCONNECT_PROTOCOL_ERROR: u32 = 2;

/// SSH message types the transport layer routes on.
///
/// Each message type has a unique numeric identifier used in the binary
/// protocol. Types not listed here are forwarded to registered handlers
/// by numeric value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Disconnect message - terminates the connection.
    Disconnect = 1,
    /// Ignore message - can be used for padding or keep-alive.
    Ignore = 2,
    /// Unimplemented message - response to unknown message type.
    Unimplemented = 3,
    /// Debug message - debugging information.
    Debug = 4,
    /// Service request - request a service (e.g., "ssh-userauth").
    ServiceRequest = 5,
    /// Service accept - service request accepted.
    ServiceAccept = 6,
    /// Extension info (RFC 8308) - server-supported extensions.
    ExtInfo = 7,
    /// Key exchange init - algorithm negotiation.
    KexInit = 20,
    /// New keys - signals transition to new keys.
    NewKeys = 21,
    /// User authentication success - triggers delayed compression.
    UserauthSuccess = 52,
}

impl MessageType {
    /// Converts a byte to a message type.
    ///
    /// # Example
    ///
    /// ```rust
    /// use skiff_proto::ssh::message::MessageType;
    ///
    /// assert_eq!(MessageType::from_u8(20), Some(MessageType::KexInit));
    /// assert_eq!(MessageType::from_u8(255), None);
    /// ```
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(MessageType::Disconnect),
            2 => Some(MessageType::Ignore),
            3 => Some(MessageType::Unimplemented),
            4 => Some(MessageType::Debug),
            5 => Some(MessageType::ServiceRequest),
            6 => Some(MessageType::ServiceAccept),
            7 => Some(MessageType::ExtInfo),
            20 => Some(MessageType::KexInit),
            21 => Some(MessageType::NewKeys),
            52 => Some(MessageType::UserauthSuccess),
            _ => None,
        }
    }
}

/// Returns whether a message type belongs to the key-exchange set.
///
/// The set consists of `SSH_MSG_KEXINIT`, `SSH_MSG_NEWKEYS` and the
/// method-specific range 30..=49. These packets bypass the handler
/// registry and go straight to the key-exchange engine, and they are the
/// only packets permitted before the first key exchange finishes when
/// strict key exchange is in effect.
///
/// # Example
///
/// ```rust
/// use skiff_proto::ssh::message::is_kex_message;
///
/// assert!(is_kex_message(20));
/// assert!(is_kex_message(30));
/// assert!(is_kex_message(49));
/// assert!(!is_kex_message(2));
/// assert!(!is_kex_message(50));
/// ```
pub fn is_kex_message(msg_type: u8) -> bool {
    msg_type == MessageType::KexInit as u8
        || msg_type == MessageType::NewKeys as u8
        || (KEX_SPECIFIC_LOW..=KEX_SPECIFIC_HIGH).contains(&msg_type)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_values() {
        assert_eq!(MessageType::Disconnect as u8, 1);
        assert_eq!(MessageType::ExtInfo as u8, 7);
        assert_eq!(MessageType::KexInit as u8, 20);
        assert_eq!(MessageType::NewKeys as u8, 21);
        assert_eq!(MessageType::UserauthSuccess as u8, 52);
    }

    #[test]
    fn test_from_u8_round_trip() {
        for byte in [1u8, 2, 3, 4, 5, 6, 7, 20, 21, 52] {
            let t = MessageType::from_u8(byte).unwrap();
            assert_eq!(t as u8, byte);
        }
        assert_eq!(MessageType::from_u8(0), None);
        assert_eq!(MessageType::from_u8(90), None);
    }

    #[test]
    fn test_kex_message_boundaries() {
        assert!(is_kex_message(20));
        assert!(is_kex_message(21));
        assert!(!is_kex_message(29));
        assert!(is_kex_message(30));
        assert!(is_kex_message(49));
        assert!(!is_kex_message(50));
        assert!(!is_kex_message(52));
    }
}
