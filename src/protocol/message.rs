//! Wire message schema for the visual channel.
//!
//! On the wire every message is a MessagePack positional array whose first
//! element is the numeric tag; the tag fixes the arity exactly.

use bytes::Bytes;

/// Protocol version carried in HELLO. Version 0 is the only supported value.
pub const PROTOCOL_VERSION: u8 = 0;

/// Sentinel in `next_chunk_index` meaning "no more chunks".
pub const NO_MORE_CHUNKS: i32 = -1;

/// Message type discriminator (first element of the wire tuple).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageTag {
    Hello = 0,
    Ack = 1,
    Pull = 2,
    Data = 3,
    Error = 4,
}

impl MessageTag {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Hello),
            1 => Some(Self::Ack),
            2 => Some(Self::Pull),
            3 => Some(Self::Data),
            4 => Some(Self::Error),
            _ => None,
        }
    }

    /// Exact tuple arity for this tag, counting the tag itself.
    pub fn arity(self) -> u32 {
        match self {
            Self::Hello => 10,
            Self::Ack => 3,
            Self::Pull => 4,
            Self::Data => 6,
            Self::Error => 2,
        }
    }
}

/// Role a peer plays in a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Party {
    Sender = 0,
    Receiver = 1,
}

impl Party {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Sender),
            1 => Some(Self::Receiver),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Sender => "sender",
            Self::Receiver => "receiver",
        }
    }
}

/// Error discriminator carried by the ERROR message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorKind {
    InvalidParty = 0,
}

impl ErrorKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::InvalidParty),
            _ => None,
        }
    }
}

/// One frame's worth of protocol, before encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// Announces a peer and, for senders, the file on offer.
    Hello {
        session_id: String,
        seq: u32,
        party: Party,
        proto_version: u8,
        file_name: String,
        file_size: u64,
        mime_type: String,
        total_chunks: u32,
        chunk_size: u32,
    },
    /// Handshake acknowledgement, both directions.
    Ack { session_id: String, seq: u32 },
    /// Receiver asks for one chunk by index.
    Pull {
        session_id: String,
        seq: u32,
        chunk_index: i32,
    },
    /// Sender answers a pull. `next_chunk_index` is the index the receiver
    /// should ask for next, or [`NO_MORE_CHUNKS`].
    Data {
        session_id: String,
        seq: u32,
        chunk_index: i32,
        next_chunk_index: i32,
        payload: Bytes,
    },
    /// Fatal condition signalled to the peer.
    Error { error_type: ErrorKind },
}

impl Message {
    pub fn tag(&self) -> MessageTag {
        match self {
            Self::Hello { .. } => MessageTag::Hello,
            Self::Ack { .. } => MessageTag::Ack,
            Self::Pull { .. } => MessageTag::Pull,
            Self::Data { .. } => MessageTag::Data,
            Self::Error { .. } => MessageTag::Error,
        }
    }

    /// Session the message is addressed to; ERROR frames carry none.
    pub fn session_id(&self) -> Option<&str> {
        match self {
            Self::Hello { session_id, .. }
            | Self::Ack { session_id, .. }
            | Self::Pull { session_id, .. }
            | Self::Data { session_id, .. } => Some(session_id),
            Self::Error { .. } => None,
        }
    }

    pub fn seq(&self) -> Option<u32> {
        match self {
            Self::Hello { seq, .. }
            | Self::Ack { seq, .. }
            | Self::Pull { seq, .. }
            | Self::Data { seq, .. } => Some(*seq),
            Self::Error { .. } => None,
        }
    }
}
