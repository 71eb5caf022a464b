//! Transport seam: the engines' only window on the outside world.
//!
//! A real deployment renders frames as QR codes and decodes them from a
//! camera feed; the engines never see any of that. They speak opaque
//! printable-ASCII strings through this pair of traits. The in-process
//! [`loopback::VisualBus`] implements the same contract for tests.

pub mod loopback;

use crate::error::Result;

pub use loopback::{BusReader, BusWriter, VisualBus};

/// Outbound half: `write` replaces the frame currently shown to the peer.
#[allow(async_fn_in_trait)]
pub trait FrameWriter: Send {
    async fn write(&mut self, frame: &str) -> Result<()>;
}

/// Inbound half: yields one decoded frame per call. The same payload may be
/// delivered repeatedly when the camera re-decodes a still frame; engines
/// deduplicate by sequence number. `Ok(None)` means the reader stopped
/// permanently; an error maps to `ConnectionLost`/`Timeout`.
#[allow(async_fn_in_trait)]
pub trait FrameReader: Send {
    async fn recv(&mut self) -> Result<Option<String>>;
}
