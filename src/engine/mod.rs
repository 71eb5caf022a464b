//! Peer engines: the sender and receiver state machines.
//!
//! Each engine owns one side of a transfer for its whole lifetime. It is
//! driven by exactly two async sources — its entry point and the frames its
//! reader yields — and processes one inbound frame to completion before the
//! next, so state transitions never interleave. Typed events stream out on
//! an unbounded channel the caller is free to drop.

pub mod progress;
pub mod receiver;
pub mod sender;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::error::Result;
use crate::protocol::codec;
use crate::protocol::message::Message;
use crate::session::FileMeta;
use crate::transport::FrameWriter;

pub use progress::ProgressSnapshot;
pub use receiver::Receiver;
pub use sender::{Sender, SenderConfig, SourceFile};

/// Events pushed to the embedding UI. Sends are best-effort: a dropped
/// receiver never stalls the protocol.
#[derive(Debug, Clone)]
pub enum TransferEvent {
    /// Both peers agreed on a session; file metadata is settled.
    Handshake { session_id: String, file: FileMeta },
    /// One chunk moved.
    Chunk {
        session_id: String,
        index: u32,
        total: u32,
    },
    Progress(ProgressSnapshot),
    Done { session_id: String },
    Error { message: String },
}

pub type EventSender = mpsc::UnboundedSender<TransferEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<TransferEvent>;

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Cancels a running engine. Cloneable; `cancel` is synchronous and
/// idempotent, and calling it after the engine finished is a no-op.
#[derive(Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

pub(crate) fn cancel_pair() -> (CancelHandle, watch::Receiver<bool>) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, rx)
}

/// Resolves once the handle fires. Parks forever if every handle was dropped
/// without cancelling, so a `select!` arm built on this never spins.
pub(crate) async fn cancelled(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Encode and display one message.
pub(crate) async fn write_frame<W: FrameWriter>(writer: &mut W, msg: &Message) -> Result<()> {
    let frame = codec::encode(msg)?;
    writer.write(&frame).await
}
