//! The receive loop.
//!
//! One task per connection reads packets off the codec's receive half and
//! classifies each by its leading type byte:
//!
//! | Type | Action |
//! |---|---|
//! | `SSH_MSG_DISCONNECT` | fatal, with sanitised reason text |
//! | KEX set (20, 21, 30..=49) | forwarded to the key-exchange engine |
//! | `SSH_MSG_IGNORE` | dropped |
//! | `SSH_MSG_DEBUG` | logged (sanitised), dropped |
//! | `SSH_MSG_UNIMPLEMENTED` | fatal |
//! | `SSH_MSG_EXT_INFO` | replaces the stored extension set, dropped |
//! | `SSH_MSG_USERAUTH_SUCCESS` | activates delayed compression, then routed |
//! | anything else | routed to the registered handler |
//!
//! When strict key exchange was negotiated, any packet outside the KEX set
//! before the first exchange completes is fatal - including IGNORE and
//! DEBUG, matching OpenSSH.
//!
//! Any error terminates the loop, drives a hard close, hands the
//! key-exchange engine its terminal `None` (releasing its waiters) and
//! delivers the goodbye to every registered handler.
//!
//! Peer-controlled text (DISCONNECT and DEBUG descriptions) is never
//! passed through raw: descriptions are capped at 255 characters and
//! anything outside printable ASCII becomes U+FFFD, so a hostile server
//! cannot abuse the terminal of whoever reads our logs.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use skiff_platform::{SkiffError, SkiffResult};
use tracing::debug;

use crate::ssh::codec::RECEIVE_BUFFER_SIZE;
use crate::ssh::ext_info::ExtensionInfo;
use crate::ssh::message::{is_kex_message, MessageType};
use crate::ssh::transport::TransportInner;
use crate::ssh::wire::PacketReader;

/// Longest reason text we keep from a peer DISCONNECT.
const MAX_REASON_LENGTH: usize = 255;

pub(crate) async fn run(inner: Arc<TransportInner>) {
    debug!("Receive task started");

    let result = receive_loop(&inner).await;
    if let Err(e) = result {
        debug!("Receive task: error in receive loop: {}", e);
        inner.close_with(Some(e), false).await;
    }

    debug!("Receive task: back from receive loop");

    // Time for everyone to say goodbye.
    if let Some(kex) = inner.kex_engine() {
        let _ = kex.handle_message(None).await;
    }
    inner.router.terminate().await;
}

async fn receive_loop(inner: &Arc<TransportInner>) -> SkiffResult<()> {
    let mut buf = vec![0u8; RECEIVE_BUFFER_SIZE];

    loop {
        let len = {
            let mut rx = inner.recv_half.lock().await;
            tokio::select! {
                r = rx.receive_packet(&mut buf) => r?,
                _ = inner.wait_closed() => return Ok(()),
            }
        };

        if len == 0 {
            return Err(SkiffError::Protocol("Empty packet payload".to_string()));
        }
        let msg = &buf[..len];
        let msg_type = msg[0];

        if msg_type == MessageType::Disconnect as u8 {
            return Err(parse_disconnect(msg));
        }

        if is_kex_message(msg_type) {
            let kex = inner.kex_engine().ok_or_else(|| {
                SkiffError::Protocol("No key exchange engine installed".to_string())
            })?;
            kex.handle_message(Some(msg)).await?;
            continue;
        }

        // From here on the packet is ordinary traffic, which is forbidden
        // before the first key exchange completes when strict kex is on.
        if !inner.first_kex_finished.load(Ordering::SeqCst) && inner.is_strict_kex() {
            return Err(SkiffError::StrictKexViolation);
        }

        match MessageType::from_u8(msg_type) {
            Some(MessageType::Ignore) => continue,
            Some(MessageType::Debug) => {
                log_debug_message(msg)?;
                continue;
            }
            Some(MessageType::Unimplemented) => {
                return Err(SkiffError::PeerUnimplemented);
            }
            Some(MessageType::ExtInfo) => {
                // The server may resend this; the newest set wins.
                inner.set_extension_info(ExtensionInfo::from_payload(msg)?);
                continue;
            }
            Some(MessageType::UserauthSuccess) => {
                inner.start_compression().await;
                // Still the auth layer's message: fall through to routing.
            }
            _ => {}
        }

        inner.router.dispatch(msg_type, msg).await?;
    }
}

fn parse_disconnect(payload: &[u8]) -> SkiffError {
    let mut r = PacketReader::new(payload);
    let parsed = (|| -> SkiffResult<(u32, String)> {
        r.read_byte()?;
        let code = r.read_u32()?;
        let reason = r.read_string_lossy()?;
        Ok((code, reason))
    })();

    match parsed {
        Ok((code, reason)) => SkiffError::PeerDisconnect {
            code,
            reason: sanitize_peer_text(&reason, true),
        },
        Err(e) => e,
    }
}

fn log_debug_message(payload: &[u8]) -> SkiffResult<()> {
    let mut r = PacketReader::new(payload);
    r.read_byte()?;
    r.read_boolean()?;
    let text = r.read_string_lossy()?;
    debug!(
        "DEBUG message from remote: '{}'",
        sanitize_peer_text(&text, false)
    );
    Ok(())
}

/// Restricts peer-controlled text to printable US-ASCII, replacing
/// everything else with U+FFFD. With `truncate`, text beyond 255
/// characters is cut there and the last three kept characters become
/// `...`.
fn sanitize_peer_text(text: &str, truncate: bool) -> String {
    let mut chars: Vec<char> = text.chars().collect();

    if truncate && chars.len() > MAX_REASON_LENGTH {
        chars.truncate(MAX_REASON_LENGTH);
        for c in &mut chars[MAX_REASON_LENGTH - 3..] {
            *c = '.';
        }
    }

    chars
        .into_iter()
        .map(|c| if (' '..='~').contains(&c) { c } else { '\u{FFFD}' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ssh::wire::PacketWriter;

    fn disconnect_packet(code: u32, reason: &[u8]) -> Vec<u8> {
        let mut w = PacketWriter::new();
        w.put_byte(MessageType::Disconnect as u8);
        w.put_u32(code);
        w.put_string(reason);
        w.put_string(b"");
        w.into_bytes()
    }

    #[test]
    fn test_sanitize_replaces_control_characters() {
        assert_eq!(sanitize_peer_text("go away\x01now", false), "go away\u{FFFD}now");
        assert_eq!(sanitize_peer_text("tab\there", false), "tab\u{FFFD}here");
        assert_eq!(sanitize_peer_text("plain text.", false), "plain text.");
    }

    #[test]
    fn test_sanitize_replaces_non_ascii() {
        assert_eq!(sanitize_peer_text("héllo", false), "h\u{FFFD}llo");
    }

    #[test]
    fn test_sanitize_truncates_abnormal_reason() {
        let long = "A".repeat(400);
        let out = sanitize_peer_text(&long, true);
        assert_eq!(out.chars().count(), 255);
        assert!(out.ends_with("..."));
        assert!(out.starts_with("AAA"));
    }

    #[test]
    fn test_sanitize_keeps_exactly_255() {
        let exact = "B".repeat(255);
        assert_eq!(sanitize_peer_text(&exact, true), exact);
    }

    #[test]
    fn test_sanitize_no_truncation_for_debug() {
        let long = "C".repeat(400);
        assert_eq!(sanitize_peer_text(&long, false).chars().count(), 400);
    }

    #[test]
    fn test_parse_disconnect_extracts_code_and_reason() {
        let packet = disconnect_packet(2, b"go away\x01now");
        match parse_disconnect(&packet) {
            SkiffError::PeerDisconnect { code, reason } => {
                assert_eq!(code, 2);
                assert_eq!(reason, "go away\u{FFFD}now");
            }
            other => panic!("Expected PeerDisconnect, got {:?}", other),
        }
    }

    #[test]
    fn test_parse_disconnect_malformed_is_protocol_error() {
        // Type byte and a two-byte stump where the reason code should be.
        let packet = vec![MessageType::Disconnect as u8, 0, 0];
        assert!(matches!(
            parse_disconnect(&packet),
            SkiffError::Protocol(_)
        ));
    }

    #[test]
    fn test_log_debug_message_rejects_malformed() {
        let packet = vec![MessageType::Debug as u8, 1];
        assert!(log_debug_message(&packet).is_err());

        let mut w = PacketWriter::new();
        w.put_byte(MessageType::Debug as u8);
        w.put_boolean(false);
        w.put_string(b"all good");
        w.put_string(b"");
        assert!(log_debug_message(&w.into_bytes()).is_ok());
    }
}
