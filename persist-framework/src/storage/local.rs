/*!
Local filesystem storage.
*/

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::debug;

use super::{already_open, not_open, OpenMode, ReadCursor, Storage, StorageHandle};
use crate::{PersistError, Result};

#[derive(Debug)]
enum FileState {
    Closed,
    Reading(BufReader<File>),
    Writing {
        mode: OpenMode,
        writer: BufWriter<NamedTempFile>,
    },
}

/// Storage backed by one file on the local filesystem
///
/// Writes and updates go to a temporary file next to the target, which is
/// renamed over the target when the storage is closed. Readers never observe
/// a partially written file. Missing parent directories are created on open.
///
/// # Example
/// ```rust
/// use persist_framework::storage::{LocalFileStorage, OpenMode, Storage};
///
/// let dir = tempfile::TempDir::new()?;
/// let mut storage = LocalFileStorage::with_base_dir(dir.path(), "visits/903334.psb");
/// storage.open(OpenMode::Write)?;
/// storage.close()?;
/// assert!(storage.exists());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
#[derive(Debug)]
pub struct LocalFileStorage {
    path: PathBuf,
    location: String,
    state: FileState,
    cursor: ReadCursor,
}

impl LocalFileStorage {
    /// Create a storage for the file at `path`, used as-is
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref().to_path_buf();
        Self {
            location: format!("file://{}", path.display()),
            path,
            state: FileState::Closed,
            cursor: ReadCursor::default(),
        }
    }

    /// Create a storage for `relative` resolved against `base_dir`
    pub fn with_base_dir<B: AsRef<Path>, P: AsRef<Path>>(base_dir: B, relative: P) -> Self {
        Self::new(base_dir.as_ref().join(relative))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Directory the file lives in, creating it if necessary
    fn ensure_parent_dir(&self) -> Result<PathBuf> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !parent.exists() {
            fs::create_dir_all(&parent).map_err(|e| {
                PersistError::storage(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
        Ok(parent)
    }

    fn open_writer(&self) -> Result<BufWriter<NamedTempFile>> {
        let parent = self.ensure_parent_dir()?;
        let temp = NamedTempFile::new_in(&parent).map_err(|e| {
            PersistError::storage(format!(
                "Failed to create temporary file in {}: {}",
                parent.display(),
                e
            ))
        })?;
        Ok(BufWriter::new(temp))
    }

    fn commit(&self, writer: BufWriter<NamedTempFile>) -> Result<()> {
        let temp = writer.into_inner().map_err(|e| {
            PersistError::storage(format!(
                "Failed to flush {}: {}",
                self.path.display(),
                e.error()
            ))
        })?;
        temp.as_file().sync_all().map_err(|e| {
            PersistError::storage(format!("Failed to sync {}: {}", self.path.display(), e))
        })?;
        temp.persist(&self.path).map_err(|e| {
            PersistError::storage(format!(
                "Failed to move temporary file onto {}: {}",
                self.path.display(),
                e.error
            ))
        })?;
        Ok(())
    }
}

impl Storage for LocalFileStorage {
    fn location(&self) -> &str {
        &self.location
    }

    fn exists(&self) -> bool {
        self.path.is_file()
    }

    fn open(&mut self, mode: OpenMode) -> Result<()> {
        if let Some(current) = self.mode() {
            return Err(already_open(&self.location, current));
        }
        self.state = match mode {
            OpenMode::Read => {
                let file = File::open(&self.path).map_err(|e| match e.kind() {
                    std::io::ErrorKind::NotFound => PersistError::not_found(format!(
                        "Nothing persisted at {}",
                        self.path.display()
                    )),
                    _ => PersistError::storage(format!(
                        "Failed to open {}: {}",
                        self.path.display(),
                        e
                    )),
                })?;
                FileState::Reading(BufReader::new(file))
            }
            OpenMode::Update if !self.exists() => {
                return Err(PersistError::not_found(format!(
                    "Cannot update {}: nothing was written there",
                    self.path.display()
                )));
            }
            OpenMode::Write | OpenMode::Update => FileState::Writing {
                mode,
                writer: self.open_writer()?,
            },
        };
        self.cursor = ReadCursor::default();
        debug!(path = %self.path.display(), mode = %mode, "Opened local file storage");
        Ok(())
    }

    fn mode(&self) -> Option<OpenMode> {
        match self.state {
            FileState::Closed => None,
            FileState::Reading(_) => Some(OpenMode::Read),
            FileState::Writing { mode, .. } => Some(mode),
        }
    }

    fn handle(&mut self) -> Result<StorageHandle<'_>> {
        match &mut self.state {
            FileState::Closed => Err(not_open(&self.location)),
            FileState::Reading(reader) => Ok(StorageHandle::Reader(reader)),
            FileState::Writing { writer, .. } => Ok(StorageHandle::Writer(writer)),
        }
    }

    fn cursor(&mut self) -> &mut ReadCursor {
        &mut self.cursor
    }

    fn close(&mut self) -> Result<()> {
        match std::mem::replace(&mut self.state, FileState::Closed) {
            FileState::Writing { mut writer, .. } => {
                writer.flush().map_err(|e| {
                    PersistError::storage(format!("Failed to flush {}: {}", self.path.display(), e))
                })?;
                self.commit(writer)
            }
            FileState::Reading(_) | FileState::Closed => Ok(()),
        }
    }

    fn abort(&mut self) {
        if let FileState::Writing { writer, .. } =
            std::mem::replace(&mut self.state, FileState::Closed)
        {
            // Dropping the temporary file deletes it.
            drop(writer);
            debug!(path = %self.path.display(), "Discarded uncommitted local file write");
        }
    }
}
