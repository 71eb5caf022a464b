//! Per-role progress persistence for user-visible resume.
//!
//! A thin last-write-wins cache: one snapshot per role, no coupling between
//! roles. Not used for chunk payloads (see [`super::chunk_store`]).

use std::collections::HashMap;
use std::fs;
use std::io::{self, Cursor};
use std::path::PathBuf;
use std::sync::Mutex;

use crate::engine::progress::ProgressSnapshot;
use crate::error::Result;
use crate::protocol::codec;
use crate::protocol::message::Party;

pub trait SessionStore: Send + Sync {
    /// Last-write-wins per role.
    fn save(&self, role: Party, snapshot: &ProgressSnapshot) -> Result<()>;

    fn get_last(&self, role: Party) -> Result<Option<ProgressSnapshot>>;

    /// Clear one role, or both when `role` is `None`.
    fn clear(&self, role: Option<Party>) -> Result<()>;
}

// =============================================================================
// Filesystem backend
// =============================================================================

/// One file per role under a base directory, written atomically.
pub struct FsSessionStore {
    dir: PathBuf,
}

impl FsSessionStore {
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, role: Party) -> PathBuf {
        self.dir.join(format!("{}.last", role.as_str()))
    }
}

impl SessionStore for FsSessionStore {
    fn save(&self, role: Party, snapshot: &ProgressSnapshot) -> Result<()> {
        let path = self.path_for(role);
        let tmp = path.with_extension("tmp");
        fs::write(&tmp, encode_snapshot(snapshot)?)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn get_last(&self, role: Party) -> Result<Option<ProgressSnapshot>> {
        let path = self.path_for(role);
        if !path.exists() {
            return Ok(None);
        }
        let raw = fs::read(&path)?;
        Ok(Some(decode_snapshot(&raw)?))
    }

    fn clear(&self, role: Option<Party>) -> Result<()> {
        let roles = match role {
            Some(role) => vec![role],
            None => vec![Party::Sender, Party::Receiver],
        };
        for role in roles {
            match fs::remove_file(self.path_for(role)) {
                Ok(()) => {}
                Err(err) if err.kind() == io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }
}

fn encode_snapshot(snapshot: &ProgressSnapshot) -> Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(128);
    codec::write_array_len(&mut buf, 11)?;
    codec::write_str(&mut buf, &snapshot.session_id)?;
    codec::write_str(&mut buf, &snapshot.file_name)?;
    codec::write_u64(&mut buf, snapshot.file_size)?;
    codec::write_u32(&mut buf, snapshot.current_chunk)?;
    codec::write_u32(&mut buf, snapshot.total_chunks)?;
    codec::write_f64(&mut buf, snapshot.percent_complete)?;
    codec::write_f64(&mut buf, snapshot.transfer_speed_bps)?;
    codec::write_u64(&mut buf, snapshot.eta_ms)?;
    codec::write_u64(&mut buf, snapshot.updated_at_ms)?;
    codec::write_u64(&mut buf, snapshot.started_at_ms)?;
    codec::write_u64(&mut buf, snapshot.bytes_transferred)?;
    Ok(buf)
}

fn decode_snapshot(raw: &[u8]) -> Result<ProgressSnapshot> {
    let corrupt = |_| io::Error::new(io::ErrorKind::InvalidData, "corrupt session snapshot");

    let mut rd = Cursor::new(raw);
    let arity = codec::read_array_len(&mut rd).map_err(corrupt)?;
    if arity != 11 {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "corrupt session snapshot").into());
    }
    Ok(ProgressSnapshot {
        session_id: codec::read_string(&mut rd).map_err(corrupt)?,
        file_name: codec::read_string(&mut rd).map_err(corrupt)?,
        file_size: codec::read_u64(&mut rd).map_err(corrupt)?,
        current_chunk: codec::read_u32(&mut rd).map_err(corrupt)?,
        total_chunks: codec::read_u32(&mut rd).map_err(corrupt)?,
        percent_complete: codec::read_f64(&mut rd).map_err(corrupt)?,
        transfer_speed_bps: codec::read_f64(&mut rd).map_err(corrupt)?,
        eta_ms: codec::read_u64(&mut rd).map_err(corrupt)?,
        updated_at_ms: codec::read_u64(&mut rd).map_err(corrupt)?,
        started_at_ms: codec::read_u64(&mut rd).map_err(corrupt)?,
        bytes_transferred: codec::read_u64(&mut rd).map_err(corrupt)?,
    })
}

// =============================================================================
// In-memory backend
// =============================================================================

#[derive(Default)]
pub struct MemorySessionStore {
    snapshots: Mutex<HashMap<Party, ProgressSnapshot>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn save(&self, role: Party, snapshot: &ProgressSnapshot) -> Result<()> {
        self.snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(role, snapshot.clone());
        Ok(())
    }

    fn get_last(&self, role: Party) -> Result<Option<ProgressSnapshot>> {
        Ok(self
            .snapshots
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&role)
            .cloned())
    }

    fn clear(&self, role: Option<Party>) -> Result<()> {
        let mut snapshots = self.snapshots.lock().unwrap_or_else(|e| e.into_inner());
        match role {
            Some(role) => {
                snapshots.remove(&role);
            }
            None => snapshots.clear(),
        }
        Ok(())
    }
}
