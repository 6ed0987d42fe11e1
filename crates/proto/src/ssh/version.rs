//! SSH protocol version exchange (RFC 4253 Section 4.2).
//!
//! The SSH protocol begins with a version exchange where both client and
//! server send an identification string:
//!
//! ```text
//! SSH-protoversion-softwareversion SP comments CR LF
//! ```
//!
//! The server may precede its identification string with arbitrary lines of
//! text (a login notice, for example); those are skipped. Both identification
//! strings are kept verbatim, without line terminators, because they are
//! mandatory inputs to the key-exchange hash and must match bit-exactly when
//! referenced later.
//!
//! # Security
//!
//! - Maximum identification-string length: 255 characters (RFC 4253)
//! - Maximum pre-banner line length and line count are capped (DoS prevention)
//! - Only protocol versions "2.0" and "1.99" are accepted
//! - No null bytes allowed in the identification string
//!
//! The exchange reads the server line one byte at a time: anything after the
//! terminating LF already belongs to the binary packet protocol and must not
//! be consumed here.

use skiff_platform::{SkiffError, SkiffResult};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum length of an SSH identification string (RFC 4253 Section 4.2).
pub const MAX_BANNER_LENGTH: usize = 255;

/// Maximum length of a pre-banner text line the server may send.
const MAX_PREAMBLE_LINE_LENGTH: usize = 1024;

/// Maximum number of pre-banner lines before we give up on the peer.
const MAX_PREAMBLE_LINES: usize = 64;

/// Returns the default client identification string for this build.
///
/// # Example
///
/// ```rust
/// use skiff_proto::ssh::version::default_client_id;
///
/// assert!(default_client_id().starts_with("SSH-2.0-Skiff_"));
/// ```
pub fn default_client_id() -> String {
    format!("SSH-2.0-Skiff_{}", env!("CARGO_PKG_VERSION"))
}

/// The identification strings exchanged at connection start.
///
/// Both strings are verbatim, without the CR LF terminators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Hello {
    client_id: String,
    server_id: String,
}

impl Hello {
    /// Returns our identification string as sent on the wire.
    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Returns the server's identification string as received on the wire.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }
}

/// Performs the version exchange on a fresh connection.
///
/// Writes `client_id` followed by CR LF, then reads lines from the peer
/// until one begins with `SSH-`. Accepts only protocol versions `2.0` and
/// `1.99`.
///
/// # Errors
///
/// - [`SkiffError::NoBanner`] if the connection ends before an
///   identification string arrives
/// - [`SkiffError::UnsupportedVersion`] if the peer speaks a protocol
///   version other than 2.0 or 1.99
/// - [`SkiffError::Protocol`] if the identification string is malformed
///   or the peer floods us with preamble text
pub async fn exchange<S>(stream: &mut S, client_id: &str) -> SkiffResult<Hello>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    validate_banner(client_id)?;

    stream
        .write_all(format!("{}\r\n", client_id).as_bytes())
        .await?;
    stream.flush().await?;

    for _ in 0..MAX_PREAMBLE_LINES {
        let line = read_line(stream).await?;
        if !line.starts_with("SSH-") {
            continue;
        }

        validate_banner(&line)?;
        if !line.starts_with("SSH-2.0-") && !line.starts_with("SSH-1.99-") {
            return Err(SkiffError::UnsupportedVersion(line));
        }

        return Ok(Hello {
            client_id: client_id.to_string(),
            server_id: line,
        });
    }

    Err(SkiffError::Protocol(format!(
        "No identification string within the first {} lines",
        MAX_PREAMBLE_LINES
    )))
}

fn validate_banner(line: &str) -> SkiffResult<()> {
    if line.len() > MAX_BANNER_LENGTH {
        return Err(SkiffError::Protocol(format!(
            "Identification string too long: {} bytes (max {})",
            line.len(),
            MAX_BANNER_LENGTH
        )));
    }
    if line.contains('\0') {
        return Err(SkiffError::Protocol(
            "Identification string contains null byte".to_string(),
        ));
    }
    if !line.starts_with("SSH-") {
        return Err(SkiffError::Protocol(format!(
            "Identification string must start with 'SSH-', got '{}'",
            line
        )));
    }
    Ok(())
}

// One byte at a time so nothing past the LF is consumed.
async fn read_line<S>(stream: &mut S) -> SkiffResult<String>
where
    S: AsyncRead + Unpin,
{
    let mut line = Vec::with_capacity(64);
    let mut byte = [0u8; 1];

    loop {
        match stream.read_exact(&mut byte).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(SkiffError::NoBanner);
            }
            Err(e) => return Err(SkiffError::Io(e)),
        }

        if byte[0] == b'\n' {
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            return Ok(String::from_utf8_lossy(&line).into_owned());
        }

        if line.len() >= MAX_PREAMBLE_LINE_LENGTH {
            return Err(SkiffError::Protocol(format!(
                "Line longer than {} bytes during version exchange",
                MAX_PREAMBLE_LINE_LENGTH
            )));
        }
        line.push(byte[0]);
    }
}
