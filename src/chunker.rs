//! Splitting a payload into transfer chunks and putting it back together.

use bytes::{Bytes, BytesMut};

/// Assembled output of a completed transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub name: String,
    pub mime_type: String,
    pub data: Bytes,
}

/// Slice `blob` into consecutive non-overlapping pieces of exactly `size`
/// bytes; the last piece may be shorter. An empty blob yields no chunks.
///
/// Slices are zero-copy views into the input.
pub fn chunk(blob: &Bytes, size: usize) -> Vec<Bytes> {
    debug_assert!(size >= 1, "chunk size must be at least 1");
    if blob.is_empty() || size == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::with_capacity(blob.len().div_ceil(size));
    let mut offset = 0;
    while offset < blob.len() {
        let end = (offset + size).min(blob.len());
        chunks.push(blob.slice(offset..end));
        offset = end;
    }
    chunks
}

/// Concatenate `chunks` in order and attach metadata. Size validation
/// against the peer's claim is the receiver engine's job, not ours.
pub fn assemble(chunks: &[Bytes], name: &str, mime_type: &str) -> ReceivedFile {
    let total: usize = chunks.iter().map(Bytes::len).sum();
    let mut data = BytesMut::with_capacity(total);
    for chunk in chunks {
        data.extend_from_slice(chunk);
    }
    ReceivedFile {
        name: name.to_string(),
        mime_type: mime_type.to_string(),
        data: data.freeze(),
    }
}

/// Integrity rule for a stored chunk set: every non-last chunk is exactly
/// `chunk_size` bytes, the last is non-empty and no larger, and the total
/// payload is within one `chunk_size` of the declared `file_size`.
pub fn validate_stored(chunks: &[Bytes], file_size: u64, chunk_size: u32) -> bool {
    if chunk_size == 0 {
        return false;
    }
    let size = chunk_size as usize;

    let total: u64 = chunks.iter().map(|c| c.len() as u64).sum();
    if file_size.abs_diff(total) >= u64::from(chunk_size) {
        return false;
    }

    for (index, chunk) in chunks.iter().enumerate() {
        let last = index + 1 == chunks.len();
        if last {
            if chunk.is_empty() || chunk.len() > size {
                return false;
            }
        } else if chunk.len() != size {
            return false;
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunking_roundtrips() {
        for (len, size) in [(0usize, 10usize), (1, 10), (10, 10), (11, 10), (250, 10), (52, 64)] {
            let blob = Bytes::from((0..len).map(|i| (i % 251) as u8).collect::<Vec<_>>());
            let chunks = chunk(&blob, size);

            assert_eq!(chunks.len(), len.div_ceil(size), "len {len} size {size}");
            for piece in chunks.iter().take(chunks.len().saturating_sub(1)) {
                assert_eq!(piece.len(), size);
            }
            if let Some(last) = chunks.last() {
                assert!(!last.is_empty() && last.len() <= size);
            }

            let rebuilt = assemble(&chunks, "blob.bin", "application/octet-stream");
            assert_eq!(rebuilt.data, blob);
        }
    }

    #[test]
    fn empty_blob_yields_zero_chunks() {
        assert!(chunk(&Bytes::new(), 10).is_empty());
    }

    #[test]
    fn short_file_yields_one_short_chunk() {
        let chunks = chunk(&Bytes::from_static(b"hey"), 10);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0], Bytes::from_static(b"hey"));
    }

    #[test]
    fn assemble_attaches_metadata() {
        let file = assemble(&[Bytes::from_static(b"ab")], "a.txt", "text/plain");
        assert_eq!(file.name, "a.txt");
        assert_eq!(file.mime_type, "text/plain");
    }

    #[test]
    fn integrity_accepts_well_formed_sets() {
        let blob = Bytes::from(vec![7u8; 25]);
        assert!(validate_stored(&chunk(&blob, 10), 25, 10));
        assert!(validate_stored(&[], 0, 10), "empty file, zero chunks");
        assert!(validate_stored(&chunk(&Bytes::from(vec![1u8; 10]), 10), 10, 10));
    }

    #[test]
    fn integrity_rejects_malformed_sets() {
        // short chunk in the middle
        let bad = vec![
            Bytes::from(vec![0u8; 10]),
            Bytes::from(vec![0u8; 4]),
            Bytes::from(vec![0u8; 10]),
        ];
        assert!(!validate_stored(&bad, 24, 10));

        // total drifts a full chunk away from the claimed size
        let drifted = vec![Bytes::from(vec![0u8; 10])];
        assert!(!validate_stored(&drifted, 25, 10));

        // empty trailing chunk
        let empty_tail = vec![Bytes::from(vec![0u8; 10]), Bytes::new()];
        assert!(!validate_stored(&empty_tail, 10, 10));

        assert!(!validate_stored(&[], 0, 0), "zero chunk size");
    }
}
