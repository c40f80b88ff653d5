// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable storage for the credential pair: load/save/clear a JSON record
//! kept under a fixed key.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::Mutex;

use crate::pair::CredentialPair;

/// Fixed identifier of the persisted record. Sibling contexts watch this key.
pub const STORAGE_KEY: &str = "auth.tokens.v1";

/// Durable cell holding at most one credential pair.
pub trait PersistentStorage: Send + Sync {
    fn load(&self) -> anyhow::Result<Option<CredentialPair>>;
    fn save(&self, pair: &CredentialPair) -> anyhow::Result<()>;
    fn clear(&self) -> anyhow::Result<()>;

    /// Filesystem location to watch for changes by other contexts, if any.
    fn watch_path(&self) -> Option<&Path> {
        None
    }
}

/// JSON file storage at `<dir>/auth.tokens.v1.json`.
pub struct FileStorage {
    path: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self { path: dir.as_ref().join(format!("{STORAGE_KEY}.json")) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistentStorage for FileStorage {
    fn load(&self) -> anyhow::Result<Option<CredentialPair>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        if contents.trim().is_empty() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_str(&contents)?))
    }

    /// Write atomically (tmp + rename). The temp name is unique per process
    /// and call so concurrent writers never share a partial file.
    fn save(&self, pair: &CredentialPair) -> anyhow::Result<()> {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(pair)?;
        let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp_name = format!(
            "{}.{}.{}.tmp",
            self.path.file_name().unwrap_or_default().to_string_lossy(),
            std::process::id(),
            seq,
        );
        let tmp_path = self.path.with_file_name(tmp_name);
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn watch_path(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Process-local storage, for tests and ephemeral sessions.
#[derive(Default)]
pub struct MemoryStorage {
    record: Mutex<Option<String>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overwrite the raw record, bypassing serialization.
    pub fn put_raw(&self, raw: impl Into<String>) {
        *self.record.lock() = Some(raw.into());
    }
}

impl PersistentStorage for MemoryStorage {
    fn load(&self) -> anyhow::Result<Option<CredentialPair>> {
        match self.record.lock().as_deref() {
            Some(raw) => Ok(Some(serde_json::from_str(raw)?)),
            None => Ok(None),
        }
    }

    fn save(&self, pair: &CredentialPair) -> anyhow::Result<()> {
        *self.record.lock() = Some(serde_json::to_string(pair)?);
        Ok(())
    }

    fn clear(&self) -> anyhow::Result<()> {
        *self.record.lock() = None;
        Ok(())
    }
}

#[cfg(test)]
#[path = "storage_tests.rs"]
mod tests;
