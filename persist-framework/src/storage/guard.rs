/*!
Scope-bound storage sessions.
*/

use tracing::{debug, warn};
use uuid::Uuid;

use super::{OpenMode, Storage};
use crate::Result;

/// Keeps a storage open for the lifetime of the guard
///
/// The storage is opened when the guard is created and released on every
/// exit path of the sequence. Only [`close`](Self::close) commits: a guard
/// that is dropped, or consumed with [`abort`](Self::abort), discards what
/// was written since it opened and leaves the prior contents in place.
pub struct StorageGuard<'a> {
    storage: &'a mut dyn Storage,
    session: Uuid,
    mode: OpenMode,
    open: bool,
}

impl<'a> StorageGuard<'a> {
    /// Open `storage` in `mode`
    pub fn open(storage: &'a mut dyn Storage, mode: OpenMode) -> Result<Self> {
        storage.open(mode)?;
        let session = Uuid::new_v4();
        debug!(%session, location = storage.location(), %mode, "Storage session opened");
        Ok(Self {
            storage,
            session,
            mode,
            open: true,
        })
    }

    pub fn storage(&mut self) -> &mut (dyn Storage + 'a) {
        &mut *self.storage
    }

    /// Identifier attached to this session's log events
    pub fn session(&self) -> Uuid {
        self.session
    }

    pub fn mode(&self) -> OpenMode {
        self.mode
    }

    /// Close the storage and report any failure
    pub fn close(mut self) -> Result<()> {
        self.open = false;
        let result = self.storage.close();
        debug!(
            session = %self.session,
            location = self.storage.location(),
            ok = result.is_ok(),
            "Storage session closed"
        );
        result
    }

    /// Release the storage without committing
    pub fn abort(mut self) {
        self.discard();
    }

    fn discard(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;
        self.storage.abort();
        if self.mode != OpenMode::Read {
            warn!(
                session = %self.session,
                location = self.storage.location(),
                mode = %self.mode,
                "Storage session discarded without commit"
            );
        }
    }
}

impl Drop for StorageGuard<'_> {
    fn drop(&mut self) {
        self.discard();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{MemoryStore, StorageHandle};
    use std::io::Write;

    #[test]
    fn test_dropped_guard_releases_without_commit() {
        let store = MemoryStore::new();
        store.insert("scoped", b"committed".to_vec());
        let mut storage = store.storage("scoped");
        {
            let mut guard = StorageGuard::open(&mut storage, OpenMode::Write).unwrap();
            assert_eq!(guard.storage().mode(), Some(OpenMode::Write));
            match guard.storage().handle().unwrap() {
                StorageHandle::Writer(w) => w.write_all(b"half").unwrap(),
                other => panic!("unexpected handle {}", other.kind()),
            }
        }
        assert_eq!(storage.mode(), None);
        assert_eq!(store.get("scoped"), Some(b"committed".to_vec()));
    }

    #[test]
    fn test_explicit_abort() {
        let store = MemoryStore::new();
        let mut storage = store.storage("aborted");
        let guard = StorageGuard::open(&mut storage, OpenMode::Write).unwrap();
        guard.abort();
        assert_eq!(storage.mode(), None);
        assert!(!store.contains("aborted"));
    }

    #[test]
    fn test_explicit_close() {
        let store = MemoryStore::new();
        let mut storage = store.storage("explicit");
        let guard = StorageGuard::open(&mut storage, OpenMode::Write).unwrap();
        assert_eq!(guard.mode(), OpenMode::Write);
        guard.close().unwrap();
        assert_eq!(storage.mode(), None);
        assert!(store.contains("explicit"));
    }

    #[test]
    fn test_failed_open_leaves_storage_closed() {
        let store = MemoryStore::new();
        let mut storage = store.storage("missing");
        assert!(StorageGuard::open(&mut storage, OpenMode::Read).is_err());
        assert_eq!(storage.mode(), None);
    }
}
