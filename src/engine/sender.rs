//! Sender engine: offers a file and answers the receiver's pulls.
//!
//! The sender never transmits unsolicited data. After the handshake it sits
//! in TRANSFER answering one PULL with one DATA; the receiver's cursor does
//! all the driving. Sequence numbers exist only to let either side discard
//! camera re-decodes of a frame it already handled.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::chunker;
use crate::error::{BeamError, Result};
use crate::protocol::message::{ErrorKind, Message, Party, NO_MORE_CHUNKS, PROTOCOL_VERSION};
use crate::session::{
    derive_session_id, FileMeta, Session, TransferState, DEFAULT_CHUNK_SIZE,
    DEFAULT_SESSION_ID_LEN,
};
use crate::store::{ChunkStore, SessionStore, StoredChunks};
use crate::transport::{FrameReader, FrameWriter};

use super::progress::ProgressTracker;
use super::{cancel_pair, cancelled, write_frame, CancelHandle, EventSender, TransferEvent};

#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Payload bytes per chunk (one QR frame's worth).
    pub chunk_size: u32,
    pub session_id_len: usize,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            session_id_len: DEFAULT_SESSION_ID_LEN,
        }
    }
}

/// File handed to [`Sender::send`] by the embedding UI.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// Everything one transfer attempt needs once the file is settled.
struct SendContext {
    session: Session,
    meta: FileMeta,
    chunks: Vec<Bytes>,
    total_chunks: u32,
    chunk_size: u32,
    tracker: ProgressTracker,
}

pub struct Sender {
    config: SenderConfig,
    chunk_store: Arc<dyn ChunkStore>,
    session_store: Arc<dyn SessionStore>,
    events: EventSender,
    cancel: watch::Receiver<bool>,
    state: TransferState,
}

impl Sender {
    pub fn new(
        config: SenderConfig,
        chunk_store: Arc<dyn ChunkStore>,
        session_store: Arc<dyn SessionStore>,
        events: EventSender,
    ) -> (Self, CancelHandle) {
        let (handle, cancel) = cancel_pair();
        (
            Self {
                config,
                chunk_store,
                session_store,
                events,
                cancel,
                state: TransferState::Idle,
            },
            handle,
        )
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Offer `file` and drive the transfer to completion.
    pub async fn send<W, R>(mut self, file: SourceFile, writer: &mut W, reader: &mut R) -> Result<()>
    where
        W: FrameWriter,
        R: FrameReader,
    {
        if self.config.chunk_size == 0 {
            return Err(BeamError::protocol("chunk size must be at least 1"));
        }

        let session_id = derive_session_id(&file.name, self.config.session_id_len);
        let chunks = chunker::chunk(&file.data, self.config.chunk_size as usize);
        let meta = FileMeta {
            name: file.name,
            size: file.data.len() as u64,
            mime_type: file.mime_type,
        };

        // durable copy for resume; losing it only costs resumability
        let entry = StoredChunks {
            file_name: meta.name.clone(),
            file_size: meta.size,
            mime_type: meta.mime_type.clone(),
            total_chunks: chunks.len() as u32,
            chunk_size: self.config.chunk_size,
            chunks: chunks.clone(),
            created_at_ms: 0,
            last_accessed_at_ms: 0,
        };
        if let Err(err) = self.chunk_store.store(entry) {
            warn!(%err, file_name = %meta.name, "failed to persist chunks; transfer will not be resumable");
        }

        let chunk_size = self.config.chunk_size;
        let mut ctx = SendContext {
            tracker: ProgressTracker::new(&session_id, &meta, chunks.len() as u32),
            session: Session::new(session_id),
            total_chunks: chunks.len() as u32,
            chunk_size,
            meta,
            chunks,
        };

        self.begin(&mut ctx, writer).await?;
        self.drive(&mut ctx, writer, reader).await
    }

    /// Offer a previously stored chunk set again. Validates the stored data
    /// before any wire activity; a corrupt entry means the session expired.
    pub async fn send_resumable<W, R>(
        mut self,
        stored: StoredChunks,
        writer: &mut W,
        reader: &mut R,
    ) -> Result<()>
    where
        W: FrameWriter,
        R: FrameReader,
    {
        if !chunker::validate_stored(&stored.chunks, stored.file_size, stored.chunk_size) {
            return Err(BeamError::SessionExpired(format!(
                "stored chunks for {} failed integrity validation",
                stored.file_name
            )));
        }

        let session_id = derive_session_id(&stored.file_name, self.config.session_id_len);
        let meta = FileMeta {
            name: stored.file_name,
            size: stored.file_size,
            mime_type: stored.mime_type,
        };

        let mut tracker = ProgressTracker::new(&session_id, &meta, stored.chunks.len() as u32);
        // pick the cursor up where the last attempt left off, when the saved
        // snapshot is for this same session
        if let Ok(Some(last)) = self.session_store.get_last(Party::Sender) {
            if last.session_id == session_id {
                tracker.resume_from(last.current_chunk, last.bytes_transferred);
            }
        }

        let mut ctx = SendContext {
            session: Session::new(session_id),
            total_chunks: stored.chunks.len() as u32,
            chunk_size: stored.chunk_size,
            chunks: stored.chunks,
            meta,
            tracker,
        };

        self.begin(&mut ctx, writer).await?;
        self.drive(&mut ctx, writer, reader).await
    }

    /// Shared entry: record the zero-progress snapshot and announce the file.
    async fn begin<W: FrameWriter>(&mut self, ctx: &mut SendContext, writer: &mut W) -> Result<()> {
        self.save_progress(ctx);

        let hello = Message::Hello {
            session_id: ctx.session.id.clone(),
            seq: ctx.session.next_seq(),
            party: Party::Sender,
            proto_version: PROTOCOL_VERSION,
            file_name: ctx.meta.name.clone(),
            file_size: ctx.meta.size,
            mime_type: ctx.meta.mime_type.clone(),
            total_chunks: ctx.total_chunks,
            chunk_size: ctx.chunk_size,
        };
        write_frame(writer, &hello).await?;
        self.state = TransferState::Handshake;
        debug!(session_id = %ctx.session.id, total_chunks = ctx.total_chunks, "sender handshake started");
        Ok(())
    }

    async fn drive<W, R>(&mut self, ctx: &mut SendContext, writer: &mut W, reader: &mut R) -> Result<()>
    where
        W: FrameWriter,
        R: FrameReader,
    {
        loop {
            let frame = tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => {
                    self.state = TransferState::Cancelled;
                    debug!(session_id = %ctx.session.id, "sender cancelled");
                    return Err(BeamError::Cancelled);
                }
                frame = reader.recv() => frame,
            };

            let frame = match frame {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    return Err(self.fail(BeamError::ConnectionLost("reader stopped".into())))
                }
                Err(err) => return Err(self.fail(err)),
            };

            if let Err(err) = self.handle_frame(ctx, writer, &frame).await {
                return Err(self.fail(err));
            }
            if self.state == TransferState::Done {
                return Ok(());
            }
        }
    }

    async fn handle_frame<W: FrameWriter>(
        &mut self,
        ctx: &mut SendContext,
        writer: &mut W,
        frame: &str,
    ) -> Result<()> {
        match crate::protocol::codec::decode(frame)? {
            Message::Hello { party, .. } => self.on_hello(ctx, writer, party).await,
            Message::Ack { session_id, seq } => self.on_ack(ctx, writer, &session_id, seq).await,
            Message::Pull {
                session_id,
                seq,
                chunk_index,
            } => self.on_pull(ctx, writer, &session_id, seq, chunk_index).await,
            Message::Error { error_type } => match error_type {
                ErrorKind::InvalidParty => Err(BeamError::invalid_party_in(
                    ctx.session.id.clone(),
                    "peer reported an invalid party on the channel",
                )),
            },
            Message::Data { .. } => Err(BeamError::protocol_in(
                ctx.session.id.clone(),
                "unexpected DATA frame at sender",
            )),
        }
    }

    /// A HELLO reaching a sender means another peer is announcing itself.
    async fn on_hello<W: FrameWriter>(
        &mut self,
        ctx: &mut SendContext,
        writer: &mut W,
        party: Party,
    ) -> Result<()> {
        if party == Party::Receiver && self.state == TransferState::Handshake {
            if let Err(err) = write_frame(
                writer,
                &Message::Error {
                    error_type: ErrorKind::InvalidParty,
                },
            )
            .await
            {
                warn!(%err, "failed to signal INVALID_PARTY to peer");
            }
            return Err(BeamError::invalid_party_in(
                ctx.session.id.clone(),
                "receiver announced itself during handshake",
            ));
        }
        Err(BeamError::protocol_in(
            ctx.session.id.clone(),
            format!("unexpected HELLO from {}", party.as_str()),
        ))
    }

    async fn on_ack<W: FrameWriter>(
        &mut self,
        ctx: &mut SendContext,
        writer: &mut W,
        session_id: &str,
        seq: u32,
    ) -> Result<()> {
        ctx.session.check_id(session_id)?;
        if ctx.session.is_duplicate(seq) {
            return Ok(());
        }
        if self.state != TransferState::Handshake {
            return Err(BeamError::protocol_in(
                ctx.session.id.clone(),
                "unexpected ACK outside handshake",
            ));
        }

        self.state = TransferState::Transfer;
        let ack = Message::Ack {
            session_id: ctx.session.id.clone(),
            seq: ctx.session.next_seq(),
        };
        write_frame(writer, &ack).await?;

        self.emit(TransferEvent::Handshake {
            session_id: ctx.session.id.clone(),
            file: ctx.meta.clone(),
        });
        debug!(session_id = %ctx.session.id, "sender entered transfer");

        if ctx.total_chunks == 0 {
            self.finish(ctx);
        }
        Ok(())
    }

    async fn on_pull<W: FrameWriter>(
        &mut self,
        ctx: &mut SendContext,
        writer: &mut W,
        session_id: &str,
        seq: u32,
        chunk_index: i32,
    ) -> Result<()> {
        ctx.session.check_id(session_id)?;
        if ctx.session.is_duplicate(seq) {
            return Ok(());
        }
        if self.state != TransferState::Transfer {
            return Err(BeamError::protocol_in(
                ctx.session.id.clone(),
                "unexpected PULL outside transfer",
            ));
        }

        let in_range = chunk_index >= 0 && (chunk_index as u32) < ctx.total_chunks;
        let (next, payload) = if in_range {
            let index = chunk_index as u32;
            let next = if index + 1 == ctx.total_chunks {
                NO_MORE_CHUNKS
            } else {
                (index + 1) as i32
            };
            (next, ctx.chunks[index as usize].clone())
        } else {
            // out-of-range pull: answer with a stop frame
            (NO_MORE_CHUNKS, Bytes::new())
        };

        let data = Message::Data {
            session_id: ctx.session.id.clone(),
            seq: ctx.session.next_seq(),
            chunk_index,
            next_chunk_index: next,
            payload: payload.clone(),
        };
        write_frame(writer, &data).await?;

        if in_range {
            let index = chunk_index as u32;
            ctx.tracker.record_chunk(index, payload.len());
            self.emit(TransferEvent::Chunk {
                session_id: ctx.session.id.clone(),
                index,
                total: ctx.total_chunks,
            });
            self.emit(TransferEvent::Progress(ctx.tracker.snapshot()));
            self.save_progress(ctx);
        }

        if next == NO_MORE_CHUNKS {
            self.finish(ctx);
        }
        Ok(())
    }

    /// Everything is delivered: drop the durable copy and resolve.
    fn finish(&mut self, ctx: &SendContext) {
        if let Err(err) = self.chunk_store.delete(&ctx.meta.name) {
            warn!(%err, file_name = %ctx.meta.name, "failed to drop stored chunks after completion");
        }
        self.emit(TransferEvent::Done {
            session_id: ctx.session.id.clone(),
        });
        self.state = TransferState::Done;
        debug!(session_id = %ctx.session.id, "sender done");
    }

    fn save_progress(&self, ctx: &SendContext) {
        if let Err(err) = self
            .session_store
            .save(Party::Sender, &ctx.tracker.snapshot())
        {
            warn!(%err, "failed to save progress snapshot");
        }
    }

    fn fail(&mut self, err: BeamError) -> BeamError {
        self.state = TransferState::Error;
        self.emit(TransferEvent::Error {
            message: err.to_string(),
        });
        err
    }

    fn emit(&self, event: TransferEvent) {
        let _ = self.events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::event_channel;
    use crate::protocol::codec;
    use crate::store::{MemoryChunkStore, MemorySessionStore};
    use crate::transport::{BusReader, BusWriter, FrameReader, FrameWriter, VisualBus};
    use tokio::task::JoinHandle;

    async fn read_msg(reader: &mut BusReader) -> Message {
        let frame = reader.recv().await.unwrap().unwrap();
        codec::decode(&frame).unwrap()
    }

    async fn write_msg(writer: &mut BusWriter, msg: &Message) {
        super::write_frame(writer, msg).await.unwrap();
    }

    /// Peer endpoint plus a running sender offering `data` in 1-byte chunks.
    fn sender_under_test(data: &'static [u8]) -> (BusWriter, BusReader, JoinHandle<Result<()>>) {
        let bus = VisualBus::new();
        let (peer_writer, peer_reader) = bus.endpoint();
        let task = tokio::spawn(async move {
            let (events, _event_rx) = event_channel();
            let (sender, _cancel) = Sender::new(
                SenderConfig {
                    chunk_size: 1,
                    ..Default::default()
                },
                Arc::new(MemoryChunkStore::new()),
                Arc::new(MemorySessionStore::new()),
                events,
            );
            let (mut writer, mut reader) = bus.endpoint();
            sender
                .send(
                    SourceFile {
                        name: "unit.bin".into(),
                        mime_type: "application/octet-stream".into(),
                        data: Bytes::from_static(data),
                    },
                    &mut writer,
                    &mut reader,
                )
                .await
        });
        (peer_writer, peer_reader, task)
    }

    #[tokio::test]
    async fn answers_pulls_and_ignores_redecoded_frames() {
        let (mut writer, mut reader, task) = sender_under_test(b"ab");

        let Message::Hello { session_id, .. } = read_msg(&mut reader).await else {
            panic!("expected HELLO first");
        };

        let ack = Message::Ack {
            session_id: session_id.clone(),
            seq: 500,
        };
        write_msg(&mut writer, &ack).await;
        assert!(matches!(read_msg(&mut reader).await, Message::Ack { .. }));

        // the ACK frame is still on screen; a re-decode must change nothing
        write_msg(&mut writer, &ack).await;

        let pull = Message::Pull {
            session_id: session_id.clone(),
            seq: 501,
            chunk_index: 0,
        };
        write_msg(&mut writer, &pull).await;
        match read_msg(&mut reader).await {
            Message::Data {
                chunk_index,
                next_chunk_index,
                payload,
                ..
            } => {
                assert_eq!(chunk_index, 0);
                assert_eq!(next_chunk_index, 1);
                assert_eq!(payload, Bytes::from_static(b"a"));
            }
            other => panic!("expected DATA, got {other:?}"),
        }

        // same still frame decoded again: no second DATA may appear
        write_msg(&mut writer, &pull).await;
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        assert!(reader.try_recv().is_none());

        write_msg(
            &mut writer,
            &Message::Pull {
                session_id,
                seq: 502,
                chunk_index: 1,
            },
        )
        .await;
        match read_msg(&mut reader).await {
            Message::Data {
                next_chunk_index, ..
            } => assert_eq!(next_chunk_index, NO_MORE_CHUNKS),
            other => panic!("expected final DATA, got {other:?}"),
        }

        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn out_of_range_pull_answers_a_stop_frame() {
        let (mut writer, mut reader, task) = sender_under_test(b"ab");

        let Message::Hello { session_id, .. } = read_msg(&mut reader).await else {
            panic!("expected HELLO first");
        };
        write_msg(
            &mut writer,
            &Message::Ack {
                session_id: session_id.clone(),
                seq: 10,
            },
        )
        .await;
        assert!(matches!(read_msg(&mut reader).await, Message::Ack { .. }));

        write_msg(
            &mut writer,
            &Message::Pull {
                session_id,
                seq: 11,
                chunk_index: 99,
            },
        )
        .await;
        match read_msg(&mut reader).await {
            Message::Data {
                chunk_index,
                next_chunk_index,
                payload,
                ..
            } => {
                assert_eq!(chunk_index, 99);
                assert_eq!(next_chunk_index, NO_MORE_CHUNKS);
                assert!(payload.is_empty());
            }
            other => panic!("expected stop frame, got {other:?}"),
        }
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn receiver_announce_mid_handshake_is_a_collision() {
        let (mut writer, mut reader, task) = sender_under_test(b"ab");
        assert!(matches!(read_msg(&mut reader).await, Message::Hello { .. }));

        write_msg(
            &mut writer,
            &Message::Hello {
                session_id: String::new(),
                seq: 0,
                party: Party::Receiver,
                proto_version: PROTOCOL_VERSION,
                file_name: String::new(),
                file_size: 0,
                mime_type: String::new(),
                total_chunks: 0,
                chunk_size: 0,
            },
        )
        .await;

        assert!(matches!(
            read_msg(&mut reader).await,
            Message::Error {
                error_type: ErrorKind::InvalidParty
            }
        ));
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, BeamError::InvalidParty { .. }), "{err}");
    }

    #[tokio::test]
    async fn mismatched_session_id_is_fatal() {
        let (mut writer, mut reader, task) = sender_under_test(b"ab");
        assert!(matches!(read_msg(&mut reader).await, Message::Hello { .. }));

        write_msg(
            &mut writer,
            &Message::Ack {
                session_id: "WRONG".into(),
                seq: 1,
            },
        )
        .await;
        let err = task.await.unwrap().unwrap_err();
        assert!(matches!(err, BeamError::Protocol { .. }), "{err}");
    }
}
