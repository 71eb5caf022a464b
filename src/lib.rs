//! Beam: file transfer over a visual channel.
//!
//! One screen renders frames as QR codes; the other device's camera decodes
//! them. The only channel is that lossy, one-direction-at-a-time visual
//! link, so the transfer is receiver-driven: the receiver pulls each chunk
//! by index and the sender answers, one frame per screen update.
//!
//! ```text
//! +--------+   HELLO/DATA    +----------+
//! | Sender | --------------> | Receiver |
//! | engine | <-------------- |  engine  |
//! +--------+   ACK/PULL      +----------+
//!      |                          |
//!  ChunkStore               chunk table
//!  (resume)                 (assembly)
//! ```
//!
//! The engines speak opaque printable frames through the [`transport`]
//! traits; QR rendering and camera capture live outside this crate.

pub mod chunker;
pub mod engine;
pub mod error;
pub mod protocol;
pub mod session;
pub mod store;
pub mod transport;

pub use chunker::ReceivedFile;
pub use engine::{
    event_channel, CancelHandle, EventReceiver, EventSender, ProgressSnapshot, Receiver, Sender,
    SenderConfig, SourceFile, TransferEvent,
};
pub use error::{BeamError, Result};
pub use protocol::{Message, Party, PROTOCOL_VERSION};
pub use session::{
    derive_session_id, FileMeta, TransferState, DEFAULT_CHUNK_SIZE, DEFAULT_SESSION_ID_LEN,
};
pub use store::{
    ChunkStore, EvictionPolicy, FsChunkStore, FsSessionStore, MemoryChunkStore,
    MemorySessionStore, SessionStore, StoreStats, StoredChunks,
};
pub use transport::{FrameReader, FrameWriter, VisualBus};
