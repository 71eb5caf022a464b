//! In-process visual bus for tests and loopback transfers.
//!
//! Models the physics of the screen/camera channel: a write is observed by
//! every *other* endpoint attached at that moment, and a frame shown before
//! a peer's camera attaches is never seen. Nothing is addressed — the
//! medium is broadcast, which is exactly what makes same-role collisions
//! observable.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use crate::error::{BeamError, Result};

use super::{FrameReader, FrameWriter};

/// Shared broadcast medium. Clone it freely; endpoints attach on demand.
#[derive(Clone, Default)]
pub struct VisualBus {
    inner: Arc<Mutex<BusInner>>,
}

#[derive(Default)]
struct BusInner {
    next_id: u64,
    peers: Vec<(u64, mpsc::UnboundedSender<String>)>,
}

impl VisualBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach one peer. Frames written before this call are not replayed.
    pub fn endpoint(&self) -> (BusWriter, BusReader) {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let id = inner.next_id;
        inner.next_id += 1;
        inner.peers.push((id, tx));
        (
            BusWriter {
                id,
                inner: Arc::clone(&self.inner),
            },
            BusReader { rx },
        )
    }
}

pub struct BusWriter {
    id: u64,
    inner: Arc<Mutex<BusInner>>,
}

impl FrameWriter for BusWriter {
    async fn write(&mut self, frame: &str) -> Result<()> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| BeamError::ConnectionLost("visual bus poisoned".into()))?;
        inner.peers.retain(|(_, tx)| !tx.is_closed());
        for (peer_id, tx) in &inner.peers {
            if *peer_id != self.id {
                let _ = tx.send(frame.to_string());
            }
        }
        Ok(())
    }
}

pub struct BusReader {
    rx: mpsc::UnboundedReceiver<String>,
}

impl BusReader {
    /// Non-blocking read; `None` when no frame is queued right now. Handy
    /// for taps that audit bus traffic after the fact.
    pub fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

impl FrameReader for BusReader {
    async fn recv(&mut self) -> Result<Option<String>> {
        Ok(self.rx.recv().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn frames_reach_every_other_endpoint() {
        let bus = VisualBus::new();
        let (mut w_a, mut r_a) = bus.endpoint();
        let (_w_b, mut r_b) = bus.endpoint();
        let (_w_c, mut r_c) = bus.endpoint();

        w_a.write("frame-1").await.unwrap();

        assert_eq!(r_b.recv().await.unwrap().as_deref(), Some("frame-1"));
        assert_eq!(r_c.recv().await.unwrap().as_deref(), Some("frame-1"));
        // the writer does not hear itself
        assert!(r_a.rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn late_endpoints_miss_earlier_frames() {
        let bus = VisualBus::new();
        let (mut w, _r) = bus.endpoint();
        w.write("before-attach").await.unwrap();

        let (_w2, mut r2) = bus.endpoint();
        w.write("after-attach").await.unwrap();
        assert_eq!(r2.recv().await.unwrap().as_deref(), Some("after-attach"));
    }

    #[tokio::test]
    async fn dropped_reader_ends_delivery() {
        let bus = VisualBus::new();
        let (mut w, _r) = bus.endpoint();
        let (_w2, r2) = bus.endpoint();
        drop(r2);
        // write after the peer is gone must not error
        w.write("shout into the void").await.unwrap();
    }
}
