//! Transfer telemetry emitted to the embedding UI.

use crate::session::{now_ms, FileMeta};

/// Point-in-time view of a running transfer. Emitted on every chunk and
/// persisted per role by the [`crate::store::SessionStore`].
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub session_id: String,
    pub file_name: String,
    pub file_size: u64,
    /// Index of the chunk handled most recently.
    pub current_chunk: u32,
    pub total_chunks: u32,
    pub percent_complete: f64,
    /// Bytes per second, measured over the whole transfer so far.
    pub transfer_speed_bps: f64,
    pub eta_ms: u64,
    pub updated_at_ms: u64,
    pub started_at_ms: u64,
    pub bytes_transferred: u64,
}

/// Accumulates per-chunk deltas and renders snapshots.
#[derive(Debug)]
pub(crate) struct ProgressTracker {
    session_id: String,
    file_name: String,
    file_size: u64,
    total_chunks: u32,
    started_at_ms: u64,
    current_chunk: u32,
    chunks_done: u32,
    bytes_transferred: u64,
}

impl ProgressTracker {
    pub fn new(session_id: &str, meta: &FileMeta, total_chunks: u32) -> Self {
        Self {
            session_id: session_id.to_string(),
            file_name: meta.name.clone(),
            file_size: meta.size,
            total_chunks,
            started_at_ms: now_ms(),
            current_chunk: 0,
            chunks_done: 0,
            bytes_transferred: 0,
        }
    }

    /// Seed the tracker with progress carried over from a resumed session.
    pub fn resume_from(&mut self, current_chunk: u32, bytes_transferred: u64) {
        self.current_chunk = current_chunk;
        self.bytes_transferred = bytes_transferred;
    }

    pub fn record_chunk(&mut self, index: u32, payload_len: usize) {
        self.current_chunk = index;
        self.chunks_done = self.chunks_done.saturating_add(1);
        self.bytes_transferred = self.bytes_transferred.saturating_add(payload_len as u64);
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        let now = now_ms();
        let elapsed_ms = now.saturating_sub(self.started_at_ms).max(1);
        let speed = self.bytes_transferred as f64 * 1000.0 / elapsed_ms as f64;

        let percent = if self.total_chunks == 0 {
            100.0
        } else {
            f64::from(self.chunks_done) * 100.0 / f64::from(self.total_chunks)
        };

        let remaining = self.file_size.saturating_sub(self.bytes_transferred);
        let eta_ms = if speed > 0.0 {
            (remaining as f64 * 1000.0 / speed) as u64
        } else {
            0
        };

        ProgressSnapshot {
            session_id: self.session_id.clone(),
            file_name: self.file_name.clone(),
            file_size: self.file_size,
            current_chunk: self.current_chunk,
            total_chunks: self.total_chunks,
            percent_complete: percent,
            transfer_speed_bps: speed,
            eta_ms,
            updated_at_ms: now,
            started_at_ms: self.started_at_ms,
            bytes_transferred: self.bytes_transferred,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> FileMeta {
        FileMeta {
            name: "clip.bin".into(),
            size: 100,
            mime_type: "application/octet-stream".into(),
        }
    }

    #[test]
    fn fresh_tracker_reports_zero() {
        let tracker = ProgressTracker::new("AB12C", &meta(), 10);
        let snap = tracker.snapshot();
        assert_eq!(snap.bytes_transferred, 0);
        assert_eq!(snap.percent_complete, 0.0);
        assert_eq!(snap.current_chunk, 0);
        assert_eq!(snap.total_chunks, 10);
        assert_eq!(snap.eta_ms, 0, "no speed yet, no estimate");
    }

    #[test]
    fn chunks_move_the_needle() {
        let mut tracker = ProgressTracker::new("AB12C", &meta(), 10);
        tracker.record_chunk(0, 10);
        tracker.record_chunk(1, 10);
        let snap = tracker.snapshot();
        assert_eq!(snap.bytes_transferred, 20);
        assert_eq!(snap.current_chunk, 1);
        assert!((snap.percent_complete - 20.0).abs() < f64::EPSILON);
        assert!(snap.transfer_speed_bps > 0.0);
    }

    #[test]
    fn empty_file_is_complete_from_the_start() {
        let empty = FileMeta {
            name: "empty.txt".into(),
            size: 0,
            mime_type: "text/plain".into(),
        };
        let tracker = ProgressTracker::new("AB12C", &empty, 0);
        assert_eq!(tracker.snapshot().percent_complete, 100.0);
    }

    #[test]
    fn resume_seeds_the_counters() {
        let mut tracker = ProgressTracker::new("AB12C", &meta(), 10);
        tracker.resume_from(4, 50);
        let snap = tracker.snapshot();
        assert_eq!(snap.current_chunk, 4);
        assert_eq!(snap.bytes_transferred, 50);
    }
}
