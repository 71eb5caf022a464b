//! Durable sender-side chunk persistence for resumable transfers.
//!
//! Maps a file name to its chunked payload so a sender can offer the same
//! file again after a restart without re-reading it. Entries are evicted by
//! age and by count; by default the store keeps at most one pending file.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::error::Result;
use crate::protocol::codec;
use crate::session::now_ms;

/// Default maximum idle age before an entry is evicted: 7 days.
pub const DEFAULT_MAX_AGE_MS: u64 = 7 * 24 * 60 * 60 * 1000;

/// Default maximum number of pending entries.
pub const DEFAULT_MAX_ENTRIES: usize = 1;

/// One stored chunk set, keyed by file name.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredChunks {
    pub file_name: String,
    pub file_size: u64,
    pub mime_type: String,
    pub total_chunks: u32,
    pub chunk_size: u32,
    pub chunks: Vec<Bytes>,
    pub created_at_ms: u64,
    pub last_accessed_at_ms: u64,
}

impl StoredChunks {
    pub fn total_bytes(&self) -> u64 {
        self.chunks.iter().map(|c| c.len() as u64).sum()
    }
}

/// Age- and count-based eviction. `None` disables the respective pass.
#[derive(Debug, Clone)]
pub struct EvictionPolicy {
    pub max_age_ms: Option<u64>,
    pub max_entries: Option<usize>,
}

impl Default for EvictionPolicy {
    fn default() -> Self {
        Self {
            max_age_ms: Some(DEFAULT_MAX_AGE_MS),
            max_entries: Some(DEFAULT_MAX_ENTRIES),
        }
    }
}

/// Aggregate view of the store contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub count: usize,
    pub total_bytes: u64,
    pub oldest_created_at_ms: Option<u64>,
    pub newest_created_at_ms: Option<u64>,
}

/// Persistent chunk storage. Every operation is individually atomic with
/// respect to concurrent callers; no operation returns partial data.
pub trait ChunkStore: Send + Sync {
    /// Overwrite any existing entry for the same file name. Both timestamps
    /// are set to now; eviction runs first so the store never exceeds its
    /// entry budget after the write.
    fn store(&self, entry: StoredChunks) -> Result<()>;

    /// Read an entry and refresh its `last_accessed_at`.
    fn get(&self, file_name: &str) -> Result<Option<StoredChunks>>;

    /// Remove an entry. Succeeds even when absent.
    fn delete(&self, file_name: &str) -> Result<()>;

    /// Enumerate stored file names.
    fn list(&self) -> Result<Vec<String>>;

    fn stats(&self) -> Result<StoreStats>;

    /// Apply `policy`: drop entries idle longer than `max_age_ms`, then drop
    /// oldest-accessed entries until at most `max_entries` remain. Returns
    /// how many entries were removed.
    fn evict(&self, policy: &EvictionPolicy) -> Result<usize>;

    /// True iff the backing store can currently be opened.
    fn available(&self) -> bool;
}

/// Pick which entries `policy` condemns, given `(name, last_accessed)` pairs
/// and the current time. Shared by both backends so they evict identically.
fn condemned(entries: &[(String, u64)], policy: &EvictionPolicy, now: u64, reserve: usize) -> Vec<String> {
    let mut doomed = Vec::new();
    let mut survivors: Vec<(String, u64)> = Vec::new();

    for (name, accessed) in entries {
        let expired = policy
            .max_age_ms
            .is_some_and(|max_age| *accessed < now.saturating_sub(max_age));
        if expired {
            doomed.push(name.clone());
        } else {
            survivors.push((name.clone(), *accessed));
        }
    }

    if let Some(max_entries) = policy.max_entries {
        let budget = max_entries.saturating_sub(reserve);
        if survivors.len() > budget {
            survivors.sort_by_key(|(_, accessed)| *accessed);
            let excess = survivors.len() - budget;
            doomed.extend(survivors.drain(..excess).map(|(name, _)| name));
        }
    }

    doomed
}

// =============================================================================
// Filesystem backend
// =============================================================================

/// One file per entry under a base directory. Writes go to a temp file and
/// are renamed into place, so readers never observe a torn entry.
pub struct FsChunkStore {
    dir: PathBuf,
    policy: EvictionPolicy,
    // serializes multi-file passes (evict, stats) against writers in-process
    lock: Mutex<()>,
}

const ENTRY_EXT: &str = "chunks";

impl FsChunkStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        Self::with_policy(dir, EvictionPolicy::default())
    }

    pub fn with_policy(dir: impl Into<PathBuf>, policy: EvictionPolicy) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            policy,
            lock: Mutex::new(()),
        })
    }

    fn entry_path(&self, file_name: &str) -> PathBuf {
        // hashed key keeps arbitrary file names out of the filesystem
        use std::collections::hash_map::DefaultHasher;
        use std::hash::{Hash, Hasher};

        let mut hasher = DefaultHasher::new();
        file_name.hash(&mut hasher);
        self.dir.join(format!("{:016x}.{ENTRY_EXT}", hasher.finish()))
    }

    fn write_entry(&self, entry: &StoredChunks) -> Result<()> {
        let path = self.entry_path(&entry.file_name);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, encode_entry(entry)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn read_entry(path: &Path) -> Result<StoredChunks> {
        let raw = fs::read(path)?;
        decode_entry(&raw)
    }

    /// Load every readable entry. Corrupt entries are logged and skipped,
    /// never surfaced.
    fn scan(&self) -> Result<Vec<(StoredChunks, PathBuf)>> {
        let mut entries = Vec::new();
        for dirent in fs::read_dir(&self.dir)? {
            let path = dirent?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(ENTRY_EXT) {
                continue;
            }
            match Self::read_entry(&path) {
                Ok(entry) => entries.push((entry, path)),
                Err(err) => warn!(path = %path.display(), %err, "skipping unreadable chunk entry"),
            }
        }
        Ok(entries)
    }

    fn evict_locked(&self, policy: &EvictionPolicy, reserve_for: Option<&str>) -> Result<usize> {
        let entries = self.scan()?;
        let now = now_ms();
        let keyed: Vec<(String, u64)> = entries
            .iter()
            .filter(|(e, _)| Some(e.file_name.as_str()) != reserve_for)
            .map(|(e, _)| (e.file_name.clone(), e.last_accessed_at_ms))
            .collect();
        let reserve = usize::from(reserve_for.is_some());
        let doomed = condemned(&keyed, policy, now, reserve);

        for name in &doomed {
            let path = self.entry_path(name);
            if let Err(err) = fs::remove_file(&path) {
                if err.kind() != io::ErrorKind::NotFound {
                    return Err(err.into());
                }
            }
            debug!(file_name = %name, "evicted stored chunks");
        }
        Ok(doomed.len())
    }
}

impl ChunkStore for FsChunkStore {
    fn store(&self, mut entry: StoredChunks) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        // make room for the incoming entry before writing it
        self.evict_locked(&self.policy, Some(entry.file_name.as_str()))?;
        let now = now_ms();
        entry.created_at_ms = now;
        entry.last_accessed_at_ms = now;
        self.write_entry(&entry)
    }

    fn get(&self, file_name: &str) -> Result<Option<StoredChunks>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let path = self.entry_path(file_name);
        if !path.exists() {
            return Ok(None);
        }
        let mut entry = Self::read_entry(&path)?;
        entry.last_accessed_at_ms = now_ms();
        self.write_entry(&entry)?;
        Ok(Some(entry))
    }

    fn delete(&self, file_name: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        match fs::remove_file(self.entry_path(file_name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    fn list(&self) -> Result<Vec<String>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        Ok(self
            .scan()?
            .into_iter()
            .map(|(entry, _)| entry.file_name)
            .collect())
    }

    fn stats(&self) -> Result<StoreStats> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let entries = self.scan()?;
        Ok(StoreStats {
            count: entries.len(),
            total_bytes: entries.iter().map(|(e, _)| e.total_bytes()).sum(),
            oldest_created_at_ms: entries.iter().map(|(e, _)| e.created_at_ms).min(),
            newest_created_at_ms: entries.iter().map(|(e, _)| e.created_at_ms).max(),
        })
    }

    fn evict(&self, policy: &EvictionPolicy) -> Result<usize> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        self.evict_locked(policy, None)
    }

    fn available(&self) -> bool {
        fs::create_dir_all(&self.dir).is_ok()
    }
}

// Entry records reuse the codec's MessagePack primitives: one positional
// array of the metadata fields followed by a nested array of chunk blobs.

fn encode_entry(entry: &StoredChunks) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(64 + entry.total_bytes() as usize);
    codec::write_array_len(&mut buf, 8)?;
    codec::write_str(&mut buf, &entry.file_name)?;
    codec::write_u64(&mut buf, entry.file_size)?;
    codec::write_str(&mut buf, &entry.mime_type)?;
    codec::write_u32(&mut buf, entry.total_chunks)?;
    codec::write_u32(&mut buf, entry.chunk_size)?;
    codec::write_u64(&mut buf, entry.created_at_ms)?;
    codec::write_u64(&mut buf, entry.last_accessed_at_ms)?;
    codec::write_array_len(&mut buf, entry.chunks.len() as u32)?;
    for chunk in &entry.chunks {
        codec::write_bin(&mut buf, chunk)?;
    }
    Ok(buf)
}

fn decode_entry(raw: &[u8]) -> Result<StoredChunks> {
    let corrupt = |_| io::Error::new(io::ErrorKind::InvalidData, "corrupt chunk store entry");

    let mut rd = Cursor::new(raw);
    let arity = codec::read_array_len(&mut rd).map_err(corrupt)?;
    if arity != 8 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "corrupt chunk store entry").into());
    }
    let file_name = codec::read_string(&mut rd).map_err(corrupt)?;
    let file_size = codec::read_u64(&mut rd).map_err(corrupt)?;
    let mime_type = codec::read_string(&mut rd).map_err(corrupt)?;
    let total_chunks = codec::read_u32(&mut rd).map_err(corrupt)?;
    let chunk_size = codec::read_u32(&mut rd).map_err(corrupt)?;
    let created_at_ms = codec::read_u64(&mut rd).map_err(corrupt)?;
    let last_accessed_at_ms = codec::read_u64(&mut rd).map_err(corrupt)?;
    let count = codec::read_array_len(&mut rd).map_err(corrupt)? as usize;
    let mut chunks = Vec::with_capacity(count);
    for _ in 0..count {
        chunks.push(codec::read_bytes(&mut rd).map_err(corrupt)?);
    }

    Ok(StoredChunks {
        file_name,
        file_size,
        mime_type,
        total_chunks,
        chunk_size,
        chunks,
        created_at_ms,
        last_accessed_at_ms,
    })
}

// =============================================================================
// In-memory backend
// =============================================================================

/// Map-backed store for tests and loopback transfers.
#[derive(Default)]
pub struct MemoryChunkStore {
    entries: Mutex<HashMap<String, StoredChunks>>,
    policy: EvictionPolicy,
}

impl MemoryChunkStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: EvictionPolicy) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            policy,
        }
    }
}

impl ChunkStore for MemoryChunkStore {
    fn store(&self, mut entry: StoredChunks) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let keyed: Vec<(String, u64)> = entries
            .values()
            .filter(|e| e.file_name != entry.file_name)
            .map(|e| (e.file_name.clone(), e.last_accessed_at_ms))
            .collect();
        for name in condemned(&keyed, &self.policy, now_ms(), 1) {
            entries.remove(&name);
        }
        let now = now_ms();
        entry.created_at_ms = now;
        entry.last_accessed_at_ms = now;
        entries.insert(entry.file_name.clone(), entry);
        Ok(())
    }

    fn get(&self, file_name: &str) -> Result<Option<StoredChunks>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get_mut(file_name).map(|entry| {
            entry.last_accessed_at_ms = now_ms();
            entry.clone()
        }))
    }

    fn delete(&self, file_name: &str) -> Result<()> {
        self.entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(file_name);
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect())
    }

    fn stats(&self) -> Result<StoreStats> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(StoreStats {
            count: entries.len(),
            total_bytes: entries.values().map(StoredChunks::total_bytes).sum(),
            oldest_created_at_ms: entries.values().map(|e| e.created_at_ms).min(),
            newest_created_at_ms: entries.values().map(|e| e.created_at_ms).max(),
        })
    }

    fn evict(&self, policy: &EvictionPolicy) -> Result<usize> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        let keyed: Vec<(String, u64)> = entries
            .values()
            .map(|e| (e.file_name.clone(), e.last_accessed_at_ms))
            .collect();
        let doomed = condemned(&keyed, policy, now_ms(), 0);
        for name in &doomed {
            entries.remove(name);
        }
        Ok(doomed.len())
    }

    fn available(&self) -> bool {
        true
    }
}
