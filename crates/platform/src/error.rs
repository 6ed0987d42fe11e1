//! Error types for Skiff

use std::fmt;

/// Unified error type for all Skiff operations
#[derive(Debug)]
pub enum SkiffError {
    /// I/O error
    Io(std::io::Error),

    /// Configuration error
    Config(String),

    /// Protocol error (malformed packet, framing violation, bad field)
    Protocol(String),

    /// Packet MAC verification failed
    MacMismatch,

    /// Connection ended in the middle of a packet
    Truncated,

    /// Connection ended before an identification string was received
    NoBanner,

    /// Peer identified itself with a protocol version we do not speak
    UnsupportedVersion(String),

    /// Remote side sent SSH_MSG_DISCONNECT
    PeerDisconnect {
        /// Disconnect reason code (RFC 4253 Section 11.1)
        code: u32,
        /// Sanitised human-readable description
        reason: String,
    },

    /// Remote side sent SSH_MSG_UNIMPLEMENTED
    PeerUnimplemented,

    /// No registered handler covers this message type
    UnexpectedMessage(u8),

    /// Non-KEX packet received before the first key exchange finished
    /// while strict key exchange was negotiated
    StrictKexViolation,

    /// A message send was attempted from the receive task
    SendFromDispatcher,

    /// Operation attempted on a closed connection, with the close cause
    /// if one was recorded
    Closed(Option<Box<SkiffError>>),

    /// The peer is forcing replies faster than it consumes them
    PeerFlooding,

    /// Local application-initiated shutdown; the string becomes the
    /// DISCONNECT description on a polite close
    Shutdown(String),
}

impl fmt::Display for SkiffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkiffError::Io(e) => write!(f, "IO error: {}", e),
            SkiffError::Config(msg) => write!(f, "Configuration error: {}", msg),
            SkiffError::Protocol(msg) => write!(f, "Protocol error: {}", msg),
            SkiffError::MacMismatch => write!(f, "Packet MAC verification failed"),
            SkiffError::Truncated => {
                write!(f, "Connection closed in the middle of a packet")
            }
            SkiffError::NoBanner => write!(
                f,
                "Connection closed before an identification string was received"
            ),
            SkiffError::UnsupportedVersion(line) => write!(
                f,
                "Unsupported remote protocol version: '{}' (expected '2.0' or '1.99')",
                line
            ),
            SkiffError::PeerDisconnect { code, reason } => write!(
                f,
                "Peer sent DISCONNECT message (reason code {}): {}",
                code, reason
            ),
            SkiffError::PeerUnimplemented => {
                write!(f, "Peer sent an UNIMPLEMENTED message")
            }
            SkiffError::UnexpectedMessage(t) => {
                write!(f, "Unexpected SSH message (type {})", t)
            }
            SkiffError::StrictKexViolation => write!(
                f,
                "Unexpected packet received while strict key exchange was in effect"
            ),
            SkiffError::SendFromDispatcher => {
                write!(f, "Messages may not be sent from the receive task")
            }
            SkiffError::Closed(Some(cause)) => {
                write!(f, "This connection is closed: {}", cause)
            }
            SkiffError::Closed(None) => write!(f, "This connection is closed"),
            SkiffError::PeerFlooding => {
                write!(f, "The peer is not consuming our asynchronous replies")
            }
            SkiffError::Shutdown(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for SkiffError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SkiffError::Io(e) => Some(e),
            SkiffError::Closed(Some(cause)) => Some(cause.as_ref()),
            _ => None,
        }
    }
}

impl From<std::io::Error> for SkiffError {
    fn from(err: std::io::Error) -> Self {
        SkiffError::Io(err)
    }
}

// A close cause is recorded once and then handed out to every blocked
// sender, every connection monitor and every later caller asking why the
// connection died. `io::Error` is not `Clone`, so the copy rebuilds it
// from kind and message.
impl Clone for SkiffError {
    fn clone(&self) -> Self {
        match self {
            SkiffError::Io(e) => {
                SkiffError::Io(std::io::Error::new(e.kind(), e.to_string()))
            }
            SkiffError::Config(msg) => SkiffError::Config(msg.clone()),
            SkiffError::Protocol(msg) => SkiffError::Protocol(msg.clone()),
            SkiffError::MacMismatch => SkiffError::MacMismatch,
            SkiffError::Truncated => SkiffError::Truncated,
            SkiffError::NoBanner => SkiffError::NoBanner,
            SkiffError::UnsupportedVersion(line) => {
                SkiffError::UnsupportedVersion(line.clone())
            }
            SkiffError::PeerDisconnect { code, reason } => SkiffError::PeerDisconnect {
                code: *code,
                reason: reason.clone(),
            },
            SkiffError::PeerUnimplemented => SkiffError::PeerUnimplemented,
            SkiffError::UnexpectedMessage(t) => SkiffError::UnexpectedMessage(*t),
            SkiffError::StrictKexViolation => SkiffError::StrictKexViolation,
            SkiffError::SendFromDispatcher => SkiffError::SendFromDispatcher,
            SkiffError::Closed(cause) => SkiffError::Closed(cause.clone()),
            SkiffError::PeerFlooding => SkiffError::PeerFlooding,
            SkiffError::Shutdown(msg) => SkiffError::Shutdown(msg.clone()),
        }
    }
}

/// Result type for Skiff operations
pub type SkiffResult<T> = Result<T, SkiffError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = SkiffError::Config("Invalid configuration".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration error: Invalid configuration"
        );

        let err = SkiffError::PeerDisconnect {
            code: 11,
            reason: "bye".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Peer sent DISCONNECT message (reason code 11): bye"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let skiff_err: SkiffError = io_err.into();
        assert!(matches!(skiff_err, SkiffError::Io(_)));
    }

    #[test]
    fn test_clone_preserves_io_kind() {
        let err = SkiffError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "connect timed out",
        ));
        let copy = err.clone();
        match copy {
            SkiffError::Io(e) => {
                assert_eq!(e.kind(), std::io::ErrorKind::TimedOut);
                assert!(e.to_string().contains("connect timed out"));
            }
            other => panic!("Expected Io, got {:?}", other),
        }
    }

    #[test]
    fn test_closed_with_cause_source_chain() {
        use std::error::Error;

        let cause = SkiffError::MacMismatch;
        let err = SkiffError::Closed(Some(Box::new(cause)));

        assert!(err.to_string().contains("MAC verification failed"));
        assert!(err.source().is_some());
    }

    #[test]
    fn test_result_type() {
        fn example() -> SkiffResult<i32> {
            Ok(42)
        }

        assert_eq!(example().unwrap(), 42);
    }
}
