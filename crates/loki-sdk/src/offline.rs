// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Durable spillover for envelopes that could not be delivered.
//!
//! The buffer is a single key holding a JSON array of the most recent
//! [`MAX_OFFLINE_RECORDS`] envelopes. Every persist overwrites it with the
//! current queue, or removes it when the queue is empty; a restore reads it
//! once and deletes it. Storage failures are logged and swallowed.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::constants::MAX_OFFLINE_RECORDS;
use crate::envelope::Envelope;
use crate::error::SdkError;

/// String key/value storage that outlives the process.
pub trait PersistentStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, SdkError>;
    fn set(&self, key: &str, value: &str) -> Result<(), SdkError>;
    fn remove(&self, key: &str) -> Result<(), SdkError>;
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, SdkError> {
        self.entries
            .lock()
            .map_err(|_| SdkError::Storage("memory store lock poisoned".to_string()))
    }
}

impl PersistentStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, SdkError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SdkError> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SdkError> {
        self.entries()?.remove(key);
        Ok(())
    }
}

/// One file per key inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Opens (or creates) the directory backing the store.
    pub fn open(dir: impl AsRef<Path>) -> Result<Self, SdkError> {
        fs::create_dir_all(dir.as_ref())?;
        Ok(FileStore {
            dir: dir.as_ref().to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

impl PersistentStore for FileStore {
    fn get(&self, key: &str) -> Result<Option<String>, SdkError> {
        match fs::read_to_string(self.path_for(key)) {
            Ok(contents) => Ok(Some(contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), SdkError> {
        let path = self.path_for(key);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, value)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), SdkError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[derive(Clone)]
pub struct OfflineBuffer {
    store: Arc<dyn PersistentStore>,
    key: String,
}

impl std::fmt::Debug for OfflineBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineBuffer").field("key", &self.key).finish()
    }
}

impl OfflineBuffer {
    pub fn new(store: Arc<dyn PersistentStore>, key: &str) -> Self {
        OfflineBuffer {
            store,
            key: key.to_string(),
        }
    }

    /// Overwrites the stored buffer with the tail of `records`. Nothing to
    /// keep clears it.
    pub fn persist<'a>(&self, records: impl IntoIterator<Item = &'a Envelope>) {
        let records: Vec<&Envelope> = records.into_iter().collect();
        if records.is_empty() {
            match self.store.remove(&self.key) {
                Ok(()) => debug!("LOKI | Cleared offline buffer"),
                Err(e) => warn!("LOKI | Failed to clear offline buffer: {e}"),
            }
            return;
        }
        let skip = records.len().saturating_sub(MAX_OFFLINE_RECORDS);
        let kept = &records[skip..];

        let result = serde_json::to_string(kept)
            .map_err(SdkError::from)
            .and_then(|raw| self.store.set(&self.key, &raw));
        match result {
            Ok(()) => debug!("LOKI | Persisted {} records offline", kept.len()),
            Err(e) => warn!("LOKI | Failed to persist offline buffer: {e}"),
        }
    }

    /// Reads the stored buffer and deletes it. Corrupt data is discarded.
    pub fn restore(&self) -> Vec<Envelope> {
        let raw = match self.store.get(&self.key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(e) => {
                warn!("LOKI | Failed to read offline buffer: {e}");
                return Vec::new();
            }
        };

        if let Err(e) = self.store.remove(&self.key) {
            warn!("LOKI | Failed to clear offline buffer: {e}");
        }

        match serde_json::from_str::<Vec<Envelope>>(&raw) {
            Ok(records) => {
                debug!("LOKI | Restored {} offline records", records.len());
                records
            }
            Err(e) => {
                warn!("LOKI | Discarding corrupt offline buffer: {e}");
                Vec::new()
            }
        }
    }
}
