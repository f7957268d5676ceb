/*!
In-memory blob storage.

Useful for tests and for staging objects without touching the filesystem.
Several [`MemoryStorage`] handles can share one [`MemoryStore`]; writes
become visible to other handles when the writing handle is closed.
*/

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{already_open, not_open, OpenMode, ReadCursor, Storage, StorageHandle};
use crate::{PersistError, Result};

/// Shared map of named blobs
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    blobs: Arc<Mutex<HashMap<String, Vec<u8>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn blobs(&self) -> MutexGuard<'_, HashMap<String, Vec<u8>>> {
        // A panic while holding the lock cannot leave a blob half-inserted.
        self.blobs.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.blobs().contains_key(key)
    }

    /// Copy of the committed bytes under `key`
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs().get(key).cloned()
    }

    pub fn insert<K: Into<String>>(&self, key: K, data: Vec<u8>) {
        self.blobs().insert(key.into(), data);
    }

    pub fn remove(&self, key: &str) -> Option<Vec<u8>> {
        self.blobs().remove(key)
    }

    pub fn len(&self) -> usize {
        self.blobs().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs().is_empty()
    }

    /// Open a storage handle for one named blob in this store
    pub fn storage<K: Into<String>>(&self, key: K) -> MemoryStorage {
        MemoryStorage::new(self.clone(), key)
    }
}

#[derive(Debug)]
enum MemoryState {
    Closed,
    Reading(Cursor<Vec<u8>>),
    Writing { mode: OpenMode, buffer: Vec<u8> },
}

/// Storage for a single named blob inside a [`MemoryStore`]
#[derive(Debug)]
pub struct MemoryStorage {
    store: MemoryStore,
    key: String,
    location: String,
    state: MemoryState,
    cursor: ReadCursor,
}

impl MemoryStorage {
    pub fn new<K: Into<String>>(store: MemoryStore, key: K) -> Self {
        let key = key.into();
        Self {
            location: format!("mem://{key}"),
            store,
            key,
            state: MemoryState::Closed,
            cursor: ReadCursor::default(),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Storage for MemoryStorage {
    fn location(&self) -> &str {
        &self.location
    }

    fn exists(&self) -> bool {
        self.store.contains(&self.key)
    }

    fn open(&mut self, mode: OpenMode) -> Result<()> {
        if let Some(current) = self.mode() {
            return Err(already_open(&self.location, current));
        }
        self.state = match mode {
            OpenMode::Read => {
                let data = self.store.get(&self.key).ok_or_else(|| {
                    PersistError::not_found(format!("Nothing persisted at {}", self.location))
                })?;
                MemoryState::Reading(Cursor::new(data))
            }
            OpenMode::Update if !self.exists() => {
                return Err(PersistError::not_found(format!(
                    "Cannot update {}: nothing was written there",
                    self.location
                )));
            }
            OpenMode::Write | OpenMode::Update => MemoryState::Writing {
                mode,
                buffer: Vec::new(),
            },
        };
        self.cursor = ReadCursor::default();
        Ok(())
    }

    fn mode(&self) -> Option<OpenMode> {
        match self.state {
            MemoryState::Closed => None,
            MemoryState::Reading(_) => Some(OpenMode::Read),
            MemoryState::Writing { mode, .. } => Some(mode),
        }
    }

    fn handle(&mut self) -> Result<StorageHandle<'_>> {
        match &mut self.state {
            MemoryState::Closed => Err(not_open(&self.location)),
            MemoryState::Reading(reader) => Ok(StorageHandle::Reader(reader)),
            MemoryState::Writing { buffer, .. } => Ok(StorageHandle::Writer(buffer)),
        }
    }

    fn cursor(&mut self) -> &mut ReadCursor {
        &mut self.cursor
    }

    fn close(&mut self) -> Result<()> {
        if let MemoryState::Writing { buffer, .. } =
            std::mem::replace(&mut self.state, MemoryState::Closed)
        {
            self.store.insert(self.key.clone(), buffer);
        }
        Ok(())
    }

    fn abort(&mut self) {
        self.state = MemoryState::Closed;
    }
}
