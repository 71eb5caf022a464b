//! Frame codec: MessagePack positional tuples in a base64 envelope.
//!
//! The inner encoding is compact binary so a frame fits a low QR version;
//! the outer base64 (standard alphabet, padded) keeps the transport a
//! printable-ASCII string. Both sides must agree on the tuple layout in
//! [`super::message`].

use std::io::{Cursor, Read};

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;

use crate::error::{BeamError, Result};

use super::message::{ErrorKind, Message, MessageTag, Party};

/// Encode a message into one printable frame.
pub fn encode(msg: &Message) -> Result<String> {
    let mut buf = Vec::with_capacity(64);
    write_array_len(&mut buf, msg.tag().arity())?;
    write_u8(&mut buf, msg.tag() as u8)?;

    match msg {
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
            write_str(&mut buf, session_id)?;
            write_u32(&mut buf, *seq)?;
            write_u8(&mut buf, *party as u8)?;
            write_u8(&mut buf, *proto_version)?;
            write_str(&mut buf, file_name)?;
            write_u64(&mut buf, *file_size)?;
            write_str(&mut buf, mime_type)?;
            write_u32(&mut buf, *total_chunks)?;
            write_u32(&mut buf, *chunk_size)?;
        }
        Message::Ack { session_id, seq } => {
            write_str(&mut buf, session_id)?;
            write_u32(&mut buf, *seq)?;
        }
        Message::Pull {
            session_id,
            seq,
            chunk_index,
        } => {
            write_str(&mut buf, session_id)?;
            write_u32(&mut buf, *seq)?;
            write_i32(&mut buf, *chunk_index)?;
        }
        Message::Data {
            session_id,
            seq,
            chunk_index,
            next_chunk_index,
            payload,
        } => {
            write_str(&mut buf, session_id)?;
            write_u32(&mut buf, *seq)?;
            write_i32(&mut buf, *chunk_index)?;
            write_i32(&mut buf, *next_chunk_index)?;
            write_bin(&mut buf, payload)?;
        }
        Message::Error { error_type } => {
            write_u8(&mut buf, *error_type as u8)?;
        }
    }

    Ok(STANDARD.encode(&buf))
}

/// Decode one frame back into a message.
pub fn decode(frame: &str) -> Result<Message> {
    let bytes = STANDARD
        .decode(frame)
        .map_err(|e| BeamError::protocol(format!("invalid base64 frame: {e}")))?;
    let mut rd = Cursor::new(bytes.as_slice());

    let arity = read_array_len(&mut rd)?;
    if arity == 0 {
        return Err(BeamError::protocol("empty tuple"));
    }
    let tag_raw = read_u8(&mut rd)?;
    let tag = MessageTag::from_u8(tag_raw)
        .ok_or_else(|| BeamError::protocol(format!("unknown message tag {tag_raw}")))?;
    if arity != tag.arity() {
        return Err(BeamError::protocol(format!(
            "arity mismatch for tag {tag_raw}: expected {}, got {arity}",
            tag.arity()
        )));
    }

    let msg = match tag {
        MessageTag::Hello => {
            let session_id = read_string(&mut rd)?;
            let seq = read_u32(&mut rd)?;
            let party_raw = read_u8(&mut rd)?;
            let party = Party::from_u8(party_raw)
                .ok_or_else(|| BeamError::protocol(format!("invalid party {party_raw}")))?;
            let proto_version = read_u8(&mut rd)?;
            let file_name = read_string(&mut rd)?;
            let file_size = read_u64(&mut rd)?;
            let mime_type = read_string(&mut rd)?;
            let total_chunks = read_u32(&mut rd)?;
            let chunk_size = read_u32(&mut rd)?;
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
            }
        }
        MessageTag::Ack => Message::Ack {
            session_id: read_string(&mut rd)?,
            seq: read_u32(&mut rd)?,
        },
        MessageTag::Pull => Message::Pull {
            session_id: read_string(&mut rd)?,
            seq: read_u32(&mut rd)?,
            chunk_index: read_i32(&mut rd)?,
        },
        MessageTag::Data => Message::Data {
            session_id: read_string(&mut rd)?,
            seq: read_u32(&mut rd)?,
            chunk_index: read_i32(&mut rd)?,
            next_chunk_index: read_i32(&mut rd)?,
            payload: read_bytes(&mut rd)?,
        },
        MessageTag::Error => {
            let kind_raw = read_u8(&mut rd)?;
            let error_type = ErrorKind::from_u8(kind_raw)
                .ok_or_else(|| BeamError::protocol(format!("unknown error type {kind_raw}")))?;
            Message::Error { error_type }
        }
    };

    if rd.position() != bytes.len() as u64 {
        return Err(BeamError::protocol("trailing bytes after tuple"));
    }
    Ok(msg)
}

// MessagePack primitives, shared with the fs-backed stores. All failures
// collapse into a Protocol error; the stores remap to Storage.

fn bad_frame<E: std::fmt::Display>(err: E) -> BeamError {
    BeamError::protocol(format!("binary decode failed: {err}"))
}

fn bad_write<E: std::fmt::Display>(err: E) -> BeamError {
    BeamError::protocol(format!("binary encode failed: {err}"))
}

pub(crate) fn write_array_len(buf: &mut Vec<u8>, len: u32) -> Result<()> {
    rmp::encode::write_array_len(buf, len).map_err(bad_write)?;
    Ok(())
}

pub(crate) fn write_u8(buf: &mut Vec<u8>, value: u8) -> Result<()> {
    rmp::encode::write_uint(buf, u64::from(value)).map_err(bad_write)?;
    Ok(())
}

pub(crate) fn write_u32(buf: &mut Vec<u8>, value: u32) -> Result<()> {
    rmp::encode::write_uint(buf, u64::from(value)).map_err(bad_write)?;
    Ok(())
}

pub(crate) fn write_u64(buf: &mut Vec<u8>, value: u64) -> Result<()> {
    rmp::encode::write_uint(buf, value).map_err(bad_write)?;
    Ok(())
}

pub(crate) fn write_i32(buf: &mut Vec<u8>, value: i32) -> Result<()> {
    rmp::encode::write_sint(buf, i64::from(value)).map_err(bad_write)?;
    Ok(())
}

pub(crate) fn write_f64(buf: &mut Vec<u8>, value: f64) -> Result<()> {
    rmp::encode::write_f64(buf, value).map_err(bad_write)?;
    Ok(())
}

pub(crate) fn write_str(buf: &mut Vec<u8>, value: &str) -> Result<()> {
    rmp::encode::write_str(buf, value).map_err(bad_write)?;
    Ok(())
}

pub(crate) fn write_bin(buf: &mut Vec<u8>, value: &[u8]) -> Result<()> {
    rmp::encode::write_bin(buf, value).map_err(bad_write)?;
    Ok(())
}

pub(crate) fn read_array_len(rd: &mut Cursor<&[u8]>) -> Result<u32> {
    rmp::decode::read_array_len(rd).map_err(bad_frame)
}

pub(crate) fn read_u8(rd: &mut Cursor<&[u8]>) -> Result<u8> {
    rmp::decode::read_int(rd).map_err(bad_frame)
}

pub(crate) fn read_u32(rd: &mut Cursor<&[u8]>) -> Result<u32> {
    rmp::decode::read_int(rd).map_err(bad_frame)
}

pub(crate) fn read_u64(rd: &mut Cursor<&[u8]>) -> Result<u64> {
    rmp::decode::read_int(rd).map_err(bad_frame)
}

pub(crate) fn read_i32(rd: &mut Cursor<&[u8]>) -> Result<i32> {
    rmp::decode::read_int(rd).map_err(bad_frame)
}

pub(crate) fn read_f64(rd: &mut Cursor<&[u8]>) -> Result<f64> {
    rmp::decode::read_f64(rd).map_err(bad_frame)
}

pub(crate) fn read_string(rd: &mut Cursor<&[u8]>) -> Result<String> {
    let len = rmp::decode::read_str_len(rd).map_err(bad_frame)? as usize;
    let mut raw = vec![0u8; len];
    rd.read_exact(&mut raw).map_err(bad_frame)?;
    String::from_utf8(raw).map_err(|e| BeamError::protocol(format!("invalid utf-8: {e}")))
}

pub(crate) fn read_bytes(rd: &mut Cursor<&[u8]>) -> Result<Bytes> {
    let len = rmp::decode::read_bin_len(rd).map_err(bad_frame)? as usize;
    let mut raw = vec![0u8; len];
    rd.read_exact(&mut raw).map_err(bad_frame)?;
    Ok(Bytes::from(raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::message::PROTOCOL_VERSION;

    fn sample_messages() -> Vec<Message> {
        vec![
            Message::Hello {
                session_id: "AB12C".into(),
                seq: 421,
                party: Party::Sender,
                proto_version: PROTOCOL_VERSION,
                file_name: "notes.txt".into(),
                file_size: 52,
                mime_type: "text/plain".into(),
                total_chunks: 6,
                chunk_size: 10,
            },
            Message::Hello {
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
            Message::Ack {
                session_id: "AB12C".into(),
                seq: 999,
            },
            Message::Pull {
                session_id: "AB12C".into(),
                seq: 1000,
                chunk_index: 0,
            },
            Message::Data {
                session_id: "AB12C".into(),
                seq: 422,
                chunk_index: 5,
                next_chunk_index: -1,
                payload: Bytes::from_static(&[0, 1, 2, 255, 254, 128, 127]),
            },
            Message::Error {
                error_type: ErrorKind::InvalidParty,
            },
        ]
    }

    #[test]
    fn every_tag_roundtrips() {
        for msg in sample_messages() {
            let frame = encode(&msg).unwrap();
            assert!(frame.is_ascii(), "frame must be printable ascii");
            let back = decode(&frame).unwrap();
            assert_eq!(back, msg);
        }
    }

    #[test]
    fn large_values_roundtrip() {
        let msg = Message::Hello {
            session_id: "ZZZZZ".into(),
            seq: u32::MAX,
            party: Party::Sender,
            proto_version: PROTOCOL_VERSION,
            file_name: "big.bin".into(),
            file_size: u64::MAX,
            mime_type: "application/octet-stream".into(),
            total_chunks: u32::MAX,
            chunk_size: u32::MAX,
        };
        assert_eq!(decode(&encode(&msg).unwrap()).unwrap(), msg);
    }

    #[test]
    fn rejects_bad_base64() {
        assert!(decode("not *** base64 !!!").is_err());
    }

    #[test]
    fn rejects_non_tuple_payload() {
        let frame = STANDARD.encode([0xC0]); // msgpack nil
        assert!(decode(&frame).is_err());
    }

    #[test]
    fn rejects_empty_tuple() {
        let mut buf = Vec::new();
        write_array_len(&mut buf, 0).unwrap();
        assert!(decode(&STANDARD.encode(&buf)).is_err());
    }

    #[test]
    fn rejects_unknown_tag() {
        let mut buf = Vec::new();
        write_array_len(&mut buf, 2).unwrap();
        write_u8(&mut buf, 9).unwrap();
        write_u8(&mut buf, 0).unwrap();
        assert!(decode(&STANDARD.encode(&buf)).is_err());
    }

    #[test]
    fn rejects_wrong_arity_for_every_tag() {
        for tag in [
            MessageTag::Hello,
            MessageTag::Ack,
            MessageTag::Pull,
            MessageTag::Data,
            MessageTag::Error,
        ] {
            // one element short: tag plus (arity - 2) filler ints
            let mut buf = Vec::new();
            write_array_len(&mut buf, tag.arity() - 1).unwrap();
            write_u8(&mut buf, tag as u8).unwrap();
            for _ in 0..tag.arity().saturating_sub(2) {
                write_u8(&mut buf, 0).unwrap();
            }
            let err = decode(&STANDARD.encode(&buf)).unwrap_err();
            assert_eq!(err.code(), "PROTOCOL_ERROR", "tag {:?}", tag);
        }
    }

    #[test]
    fn rejects_trailing_bytes() {
        let frame = encode(&Message::Ack {
            session_id: "AB12C".into(),
            seq: 1,
        })
        .unwrap();
        let mut bytes = STANDARD.decode(frame).unwrap();
        bytes.push(0x00);
        assert!(decode(&STANDARD.encode(&bytes)).is_err());
    }

    #[test]
    fn rejects_invalid_party_value() {
        let mut buf = Vec::new();
        write_array_len(&mut buf, MessageTag::Hello.arity()).unwrap();
        write_u8(&mut buf, MessageTag::Hello as u8).unwrap();
        write_str(&mut buf, "AB12C").unwrap();
        write_u32(&mut buf, 1).unwrap();
        write_u8(&mut buf, 7).unwrap(); // no such party
        write_u8(&mut buf, PROTOCOL_VERSION).unwrap();
        write_str(&mut buf, "f").unwrap();
        write_u64(&mut buf, 0).unwrap();
        write_str(&mut buf, "m").unwrap();
        write_u32(&mut buf, 0).unwrap();
        write_u32(&mut buf, 0).unwrap();
        assert!(decode(&STANDARD.encode(&buf)).is_err());
    }

    #[test]
    fn empty_payload_data_roundtrips() {
        let msg = Message::Data {
            session_id: "AB12C".into(),
            seq: 3,
            chunk_index: 99,
            next_chunk_index: -1,
            payload: Bytes::new(),
        };
        assert_eq!(decode(&encode(&msg).unwrap()).unwrap(), msg);
    }
}
