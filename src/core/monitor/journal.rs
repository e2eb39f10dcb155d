// src/core/monitor/journal.rs

//! Binary journal persistence: one file per monitor, under its data
//! directory, recording each server's last-known status and whether it was
//! the master. A SHA-1 digest of the encoded payload is stored alongside so
//! a tick that changed nothing can skip the rewrite entirely.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bincode::{Decode, Encode};
use sha1::{Digest, Sha1};

use crate::core::errors::ProxyError;

use super::status::StatusBits;

#[derive(Debug, Clone, Encode, Decode)]
pub struct JournalServerEntry {
    pub name: String,
    pub address: String,
    pub status_bits: u32,
    pub is_master: bool,
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct JournalPayload {
    pub written_at_unix: u64,
    pub servers: Vec<JournalServerEntry>,
}

/// The on-disk journal: payload plus a digest guarding against writing an
/// unchanged snapshot.
#[derive(Debug, Clone, Encode, Decode)]
struct JournalFile {
    digest: [u8; 20],
    payload: JournalPayload,
}

fn digest_of(payload: &JournalPayload) -> Result<[u8; 20], ProxyError> {
    let encoded = bincode::encode_to_vec(payload, bincode::config::standard())
        .map_err(|e| ProxyError::Journal(e.to_string()))?;
    let mut hasher = Sha1::new();
    hasher.update(&encoded);
    Ok(hasher.finalize().into())
}

pub struct Journal {
    path: PathBuf,
    last_digest: Option<[u8; 20]>,
}

impl Journal {
    pub fn new(data_dir: impl AsRef<Path>, monitor_name: &str) -> Self {
        Self {
            path: data_dir.as_ref().join(format!("{monitor_name}.journal")),
            last_digest: None,
        }
    }

    /// Writes `payload` if its digest differs from the last write this
    /// process has made (or recorded via `load`). Returns whether a write
    /// actually happened.
    pub fn store(&mut self, servers: Vec<JournalServerEntry>) -> Result<bool, ProxyError> {
        let payload = JournalPayload {
            written_at_unix: now_unix(),
            servers,
        };
        let digest = digest_of(&payload)?;

        if self.last_digest == Some(digest) {
            return Ok(false);
        }

        let file = JournalFile { digest, payload };
        let encoded = bincode::encode_to_vec(&file, bincode::config::standard())
            .map_err(|e| ProxyError::Journal(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, encoded)?;
        self.last_digest = Some(digest);
        Ok(true)
    }

    /// Loads the journal if it exists and is no older than `max_age`.
    /// Returns `None` on a missing file, a stale file, or a digest mismatch
    /// (corrupt write) — all treated as "nothing to restore from".
    pub fn load(&mut self, max_age: Duration) -> Option<JournalPayload> {
        let bytes = std::fs::read(&self.path).ok()?;
        let (file, _): (JournalFile, usize) =
            bincode::decode_from_slice(&bytes, bincode::config::standard()).ok()?;

        let expected = digest_of(&file.payload).ok()?;
        if expected != file.digest {
            return None;
        }

        let age = now_unix().saturating_sub(file.payload.written_at_unix);
        if age > max_age.as_secs() {
            return None;
        }

        self.last_digest = Some(file.digest);
        Some(file.payload)
    }
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

pub fn status_from_bits(bits: u32) -> StatusBits {
    StatusBits::from_bits_truncate(bits)
}
