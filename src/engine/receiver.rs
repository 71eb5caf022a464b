//! Receiver engine: detects a sender, pulls chunks in order, assembles the
//! file.
//!
//! On entry the receiver announces itself with a bare HELLO so that a second
//! receiver on the same channel is detectable — the medium is broadcast, and
//! two cameras pulling from one screen would otherwise silently mirror each
//! other. A lone receiver's announce plays to an empty room and is lost,
//! which is fine.

use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::chunker::{self, ReceivedFile};
use crate::error::{BeamError, Result};
use crate::protocol::message::{ErrorKind, Message, Party, NO_MORE_CHUNKS, PROTOCOL_VERSION};
use crate::session::{FileMeta, Session, TransferState};
use crate::store::SessionStore;
use crate::transport::{FrameReader, FrameWriter};

use super::progress::ProgressTracker;
use super::{cancel_pair, cancelled, write_frame, CancelHandle, EventSender, TransferEvent};

/// File metadata captured from the sender's HELLO.
struct Offer {
    meta: FileMeta,
    total_chunks: u32,
    chunk_size: u32,
    tracker: ProgressTracker,
}

pub struct Receiver {
    session_store: Arc<dyn SessionStore>,
    events: EventSender,
    cancel: watch::Receiver<bool>,
    state: TransferState,
    session: Session,
    offer: Option<Offer>,
    chunk_table: BTreeMap<u32, Bytes>,
    cursor: u32,
    finished: Option<ReceivedFile>,
}

impl Receiver {
    pub fn new(session_store: Arc<dyn SessionStore>, events: EventSender) -> (Self, CancelHandle) {
        let (handle, cancel) = cancel_pair();
        (
            Self {
                session_store,
                events,
                cancel,
                state: TransferState::Idle,
                // the session id is learned from the sender's HELLO
                session: Session::new(String::new()),
                offer: None,
                chunk_table: BTreeMap::new(),
                cursor: 0,
                finished: None,
            },
            handle,
        )
    }

    pub fn state(&self) -> TransferState {
        self.state
    }

    /// Listen for a sender and drive the transfer to completion.
    pub async fn receive<W, R>(mut self, writer: &mut W, reader: &mut R) -> Result<ReceivedFile>
    where
        W: FrameWriter,
        R: FrameReader,
    {
        self.state = TransferState::Handshake;

        // presence announce; see module docs
        let announce = Message::Hello {
            session_id: String::new(),
            seq: self.session.next_seq(),
            party: Party::Receiver,
            proto_version: PROTOCOL_VERSION,
            file_name: String::new(),
            file_size: 0,
            mime_type: String::new(),
            total_chunks: 0,
            chunk_size: 0,
        };
        write_frame(writer, &announce).await?;
        debug!("receiver listening");

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancelled(&mut self.cancel) => {
                    self.state = TransferState::Cancelled;
                    debug!("receiver cancelled");
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

            if let Err(err) = self.handle_frame(writer, &frame).await {
                return Err(self.fail(err));
            }
            if let Some(file) = self.finished.take() {
                return Ok(file);
            }
        }
    }

    async fn handle_frame<W: FrameWriter>(&mut self, writer: &mut W, frame: &str) -> Result<()> {
        match crate::protocol::codec::decode(frame)? {
            Message::Hello {
                session_id,
                seq,
                party,
                proto_version,
                file_name,
                file_size,
                mime_type,
                total_chunks,
                chunk_size,
            } => {
                let meta = FileMeta {
                    name: file_name,
                    size: file_size,
                    mime_type,
                };
                self.on_hello(
                    writer,
                    session_id,
                    seq,
                    party,
                    proto_version,
                    meta,
                    total_chunks,
                    chunk_size,
                )
                .await
            }
            Message::Ack { session_id, seq } => self.on_ack(writer, &session_id, seq).await,
            Message::Data {
                session_id,
                seq,
                chunk_index,
                next_chunk_index,
                payload,
            } => {
                self.on_data(writer, &session_id, seq, chunk_index, next_chunk_index, payload)
                    .await
            }
            Message::Error { error_type } => match error_type {
                ErrorKind::InvalidParty => Err(BeamError::invalid_party_in(
                    self.session.id.clone(),
                    "peer reported an invalid party on the channel",
                )),
            },
            Message::Pull { .. } => Err(BeamError::protocol_in(
                self.session.id.clone(),
                "unexpected PULL frame at receiver",
            )),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn on_hello<W: FrameWriter>(
        &mut self,
        writer: &mut W,
        session_id: String,
        seq: u32,
        party: Party,
        proto_version: u8,
        meta: FileMeta,
        total_chunks: u32,
        chunk_size: u32,
    ) -> Result<()> {
        if party == Party::Receiver {
            // collision: a second receiver is on the channel
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
            return Err(BeamError::invalid_party(
                "another receiver announced itself on the channel",
            ));
        }

        if self.state != TransferState::Handshake {
            return Err(BeamError::protocol_in(
                self.session.id.clone(),
                "unexpected HELLO outside handshake",
            ));
        }
        if proto_version != PROTOCOL_VERSION {
            return Err(BeamError::protocol(format!(
                "unsupported protocol version {proto_version}"
            )));
        }

        let captured = if self.offer.is_none() {
            self.session.id = session_id;
            let _ = self.session.is_duplicate(seq);
            self.offer = Some(Offer {
                tracker: ProgressTracker::new(&self.session.id, &meta, total_chunks),
                meta: meta.clone(),
                total_chunks,
                chunk_size,
            });
            Some(meta)
        } else {
            // the sender's HELLO stays on its screen; re-decodes land here
            self.session.check_id(&session_id)?;
            if self.session.is_duplicate(seq) {
                return Ok(());
            }
            None
        };

        let ack = Message::Ack {
            session_id: self.session.id.clone(),
            seq: self.session.next_seq(),
        };
        write_frame(writer, &ack).await?;

        if let Some(file) = captured {
            self.emit(TransferEvent::Handshake {
                session_id: self.session.id.clone(),
                file,
            });
        }
        debug!(session_id = %self.session.id, "receiver acknowledged sender");
        Ok(())
    }

    async fn on_ack<W: FrameWriter>(
        &mut self,
        writer: &mut W,
        session_id: &str,
        seq: u32,
    ) -> Result<()> {
        self.session.check_id(session_id)?;
        if self.session.is_duplicate(seq) {
            return Ok(());
        }
        let total_chunks = match &self.offer {
            Some(offer) => offer.total_chunks,
            None => {
                return Err(BeamError::protocol_in(
                    self.session.id.clone(),
                    "ACK before any sender HELLO",
                ))
            }
        };
        if self.state != TransferState::Handshake {
            return Err(BeamError::protocol_in(
                self.session.id.clone(),
                "unexpected ACK outside handshake",
            ));
        }

        self.state = TransferState::Transfer;
        debug!(session_id = %self.session.id, "receiver entered transfer");

        if total_chunks == 0 {
            return self.complete();
        }

        self.cursor = 0;
        let pull = Message::Pull {
            session_id: self.session.id.clone(),
            seq: self.session.next_seq(),
            chunk_index: self.cursor as i32,
        };
        write_frame(writer, &pull).await
    }

    async fn on_data<W: FrameWriter>(
        &mut self,
        writer: &mut W,
        session_id: &str,
        seq: u32,
        chunk_index: i32,
        next_chunk_index: i32,
        payload: Bytes,
    ) -> Result<()> {
        self.session.check_id(session_id)?;
        if self.session.is_duplicate(seq) {
            return Ok(());
        }
        if self.state != TransferState::Transfer {
            return Err(BeamError::protocol_in(
                self.session.id.clone(),
                "unexpected DATA outside transfer",
            ));
        }
        let (total_chunks, chunk_size) = match &self.offer {
            Some(offer) => (offer.total_chunks, offer.chunk_size),
            None => {
                return Err(BeamError::protocol_in(
                    self.session.id.clone(),
                    "DATA before any sender HELLO",
                ))
            }
        };

        if chunk_index < 0 || chunk_index as u32 >= total_chunks {
            return Err(BeamError::invalid_chunk_in(
                self.session.id.clone(),
                format!("chunk index {chunk_index} outside 0..{total_chunks}"),
            ));
        }
        if payload.is_empty() {
            return Err(BeamError::invalid_chunk_in(
                self.session.id.clone(),
                format!("empty payload for chunk {chunk_index}"),
            ));
        }
        if payload.len() as u64 > u64::from(chunk_size) {
            return Err(BeamError::invalid_chunk_in(
                self.session.id.clone(),
                format!(
                    "payload of {} bytes exceeds chunk size {chunk_size}",
                    payload.len()
                ),
            ));
        }

        let index = chunk_index as u32;
        let payload_len = payload.len();
        let fresh = self.chunk_table.insert(index, payload).is_none();
        if fresh {
            if let Some(offer) = self.offer.as_mut() {
                offer.tracker.record_chunk(index, payload_len);
            }
            let snapshot = self.offer.as_ref().map(|offer| offer.tracker.snapshot());
            self.emit(TransferEvent::Chunk {
                session_id: self.session.id.clone(),
                index,
                total: total_chunks,
            });
            if let Some(snapshot) = snapshot {
                self.emit(TransferEvent::Progress(snapshot.clone()));
                if let Err(err) = self.session_store.save(Party::Receiver, &snapshot) {
                    warn!(%err, "failed to save progress snapshot");
                }
            }
        }

        if next_chunk_index == NO_MORE_CHUNKS {
            return self.complete();
        }

        self.cursor = next_chunk_index as u32;
        let pull = Message::Pull {
            session_id: self.session.id.clone(),
            seq: self.session.next_seq(),
            chunk_index: self.cursor as i32,
        };
        write_frame(writer, &pull).await
    }

    /// Verify the chunk table is dense, assemble, and check the size claim.
    fn complete(&mut self) -> Result<()> {
        let Some(offer) = &self.offer else {
            return Err(BeamError::protocol_in(
                self.session.id.clone(),
                "completion before any sender HELLO",
            ));
        };

        for index in 0..offer.total_chunks {
            if !self.chunk_table.contains_key(&index) {
                return Err(BeamError::invalid_chunk_in(
                    self.session.id.clone(),
                    format!("chunk {index} missing at completion"),
                ));
            }
        }

        let chunks: Vec<Bytes> = self.chunk_table.values().cloned().collect();
        let file = chunker::assemble(&chunks, &offer.meta.name, &offer.meta.mime_type);
        if file.data.len() as u64 != offer.meta.size {
            return Err(BeamError::invalid_chunk_in(
                self.session.id.clone(),
                format!(
                    "assembled {} bytes but sender claimed {}",
                    file.data.len(),
                    offer.meta.size
                ),
            ));
        }

        self.emit(TransferEvent::Done {
            session_id: self.session.id.clone(),
        });
        self.state = TransferState::Done;
        self.finished = Some(file);
        debug!(session_id = %self.session.id, "receiver done");
        Ok(())
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
