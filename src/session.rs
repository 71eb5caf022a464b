//! Session identity and transfer lifecycle primitives.
//!
//! A session is one end-to-end transfer attempt between two peers. Its id is
//! a deterministic function of the file name, so a sender that restarts can
//! find its previously stored chunk set for "the same file" by name alone.

use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

use crate::error::{BeamError, Result};

/// Default payload bytes per chunk (one QR frame's worth).
pub const DEFAULT_CHUNK_SIZE: u32 = 64;

/// Default session id length.
pub const DEFAULT_SESSION_ID_LEN: usize = 5;

const SESSION_ALPHABET: &[u8; 36] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Derive a fixed-length session id from a file name.
///
/// A 32-bit multiplicative hash rendered over `A-Z0-9`, right-padded with
/// `A`. Deterministic by design; collision resistance beyond 32 bits is not
/// a goal.
pub fn derive_session_id(file_name: &str, length: usize) -> String {
    let mut hash: u32 = 0;
    for byte in file_name.bytes() {
        hash = hash.wrapping_mul(31).wrapping_add(u32::from(byte));
    }

    let mut id = String::with_capacity(length);
    let mut rest = hash;
    while rest > 0 && id.len() < length {
        id.push(SESSION_ALPHABET[(rest % 36) as usize] as char);
        rest /= 36;
    }
    while id.len() < length {
        id.push('A');
    }
    id
}

/// Random initial sequence number in `[0, 1000)`, so re-runs of the same
/// session id do not replay each other's frames.
pub fn initial_seq() -> u32 {
    rand::thread_rng().gen_range(0..1000)
}

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Engine lifecycle. `Done`, `Error` and `Cancelled` are sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferState {
    Idle,
    Handshake,
    Transfer,
    Done,
    Error,
    Cancelled,
}

impl TransferState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Cancelled)
    }
}

/// Metadata of the file being conveyed, as carried in HELLO.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileMeta {
    pub name: String,
    pub size: u64,
    pub mime_type: String,
}

/// Live identity state for one transfer attempt: the session id, the local
/// outbound sequence counter, and the highest peer sequence observed.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    local_seq: u32,
    remote_seq_seen: Option<u32>,
    pub started_at_ms: u64,
}

impl Session {
    pub fn new(id: String) -> Self {
        Self {
            id,
            local_seq: initial_seq(),
            remote_seq_seen: None,
            started_at_ms: now_ms(),
        }
    }

    /// Sequence number for the next outbound message.
    pub fn next_seq(&mut self) -> u32 {
        let seq = self.local_seq;
        self.local_seq = self.local_seq.wrapping_add(1);
        seq
    }

    /// True when `seq` is a camera re-decode of a frame already handled.
    /// A still frame decodes with the same sequence every time, and the peer
    /// only ever advances, so anything at or below the high-water mark is a
    /// duplicate.
    pub fn is_duplicate(&mut self, seq: u32) -> bool {
        match self.remote_seq_seen {
            Some(seen) if seq <= seen => true,
            _ => {
                self.remote_seq_seen = Some(seq);
                false
            }
        }
    }

    /// Reject frames addressed to a different session.
    pub fn check_id(&self, session_id: &str) -> Result<()> {
        if session_id == self.id {
            Ok(())
        } else {
            Err(BeamError::protocol_in(
                self.id.clone(),
                format!("session id mismatch: expected {}, got {}", self.id, session_id),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_is_deterministic() {
        let a = derive_session_id("report.pdf", 5);
        let b = derive_session_id("report.pdf", 5);
        assert_eq!(a, b);
    }

    #[test]
    fn session_id_has_exact_length_and_alphabet() {
        for name in ["", "a", "test.txt", "Ünïcode Nàme.bin", "x".repeat(300).as_str()] {
            for len in [1, 5, 12] {
                let id = derive_session_id(name, len);
                assert_eq!(id.len(), len, "name {name:?} len {len}");
                assert!(id
                    .bytes()
                    .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit()));
            }
        }
    }

    #[test]
    fn empty_name_pads_with_a() {
        assert_eq!(derive_session_id("", 5), "AAAAA");
    }

    #[test]
    fn different_names_usually_differ() {
        let a = derive_session_id("a.txt", 5);
        let b = derive_session_id("b.txt", 5);
        assert_ne!(a, b);
    }

    #[test]
    fn initial_seq_is_in_range() {
        for _ in 0..200 {
            assert!(initial_seq() < 1000);
        }
    }

    #[test]
    fn duplicate_detection_tracks_high_water_mark() {
        let mut session = Session::new("AB12C".into());
        assert!(!session.is_duplicate(10));
        assert!(session.is_duplicate(10), "same frame re-decoded");
        assert!(session.is_duplicate(9), "out-of-order duplicate");
        assert!(!session.is_duplicate(11));
    }

    #[test]
    fn mismatched_session_is_rejected() {
        let mut session = Session::new("AB12C".into());
        assert!(session.check_id("AB12C").is_ok());
        let err = session.check_id("ZZZZZ").unwrap_err();
        assert_eq!(err.code(), "PROTOCOL_ERROR");
        assert_eq!(err.session_id(), Some("AB12C"));
        let _ = session.next_seq();
    }
}
