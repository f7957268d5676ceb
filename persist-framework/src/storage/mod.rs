/*!
Storage abstraction for formatter I/O.

A [`Storage`] is an opaque destination/source: a blob in memory, a file, a
set of database tables. Formatters only use its narrow surface (open, get a
handle, close) and never inspect the concrete backend; the one thing they
match on is the *kind* of handle the backend hands out:

- [`StorageHandle::Reader`] / [`StorageHandle::Writer`] for byte streams
- [`StorageHandle::Table`] for row-oriented backends

Each storage also carries the [`ReadCursor`] of the read sequence currently
running against it, reset on every `open`.
*/

pub mod guard;
#[cfg(feature = "local")]
pub mod local;
pub mod memory;
pub mod table;

use std::fmt;
use std::io::{BufRead, Write};

use crate::{PersistError, Result};

pub use guard::StorageGuard;
#[cfg(feature = "local")]
pub use local::LocalFileStorage;
pub use memory::{MemoryStorage, MemoryStore};
pub use table::{Cell, MemoryDatabase, Row, TableHandle, TableStorage};

/// How a storage is opened for one read/write/update sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Read previously persisted objects
    Read,
    /// Replace the location with a new sequence of objects
    Write,
    /// Overwrite an existing location; opening fails if nothing was written
    Update,
}

impl fmt::Display for OpenMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OpenMode::Read => write!(f, "read"),
            OpenMode::Write => write!(f, "write"),
            OpenMode::Update => write!(f, "update"),
        }
    }
}

/// Borrowed access to an open storage
pub enum StorageHandle<'a> {
    Reader(&'a mut dyn BufRead),
    Writer(&'a mut dyn Write),
    Table(&'a mut dyn TableHandle),
}

impl StorageHandle<'_> {
    pub fn kind(&self) -> &'static str {
        match self {
            StorageHandle::Reader(_) => "reader",
            StorageHandle::Writer(_) => "writer",
            StorageHandle::Table(_) => "table",
        }
    }
}

/// Position of a read sequence
///
/// ```text
/// Init ──first=true──▶ Reading ──last object──▶ Exhausted
/// ```
///
/// Misuse is reported before any I/O happens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReadCursor {
    #[default]
    Init,
    Reading,
    Exhausted,
}

impl ReadCursor {
    /// Validate a read call against the current position
    ///
    /// # Errors
    /// * `PersistError::Logic` - After exhaustion, when the first call does not
    ///   pass `first = true`, or when `first = true` is passed mid-sequence
    pub fn begin(&self, first: bool) -> Result<()> {
        match (self, first) {
            (ReadCursor::Exhausted, _) => Err(PersistError::logic(
                "read() called after the sequence reported done",
            )),
            (ReadCursor::Init, false) => Err(PersistError::logic(
                "the first read() of a sequence must pass first = true",
            )),
            (ReadCursor::Reading, true) => Err(PersistError::logic(
                "read sequence already started; reopen the storage to restart it",
            )),
            (ReadCursor::Init, true) | (ReadCursor::Reading, false) => Ok(()),
        }
    }

    /// Record the outcome of a successful read
    pub fn advance(&mut self, done: bool) {
        *self = if done {
            ReadCursor::Exhausted
        } else {
            ReadCursor::Reading
        };
    }

    pub fn is_exhausted(&self) -> bool {
        *self == ReadCursor::Exhausted
    }
}

/// Opaque persistence destination/source
pub trait Storage: Send {
    /// Human-readable location, used in logs and error messages
    fn location(&self) -> &str;

    /// Whether something has been persisted at this location
    fn exists(&self) -> bool;

    /// Open for one sequence of calls
    ///
    /// # Errors
    /// * `PersistError::Logic` - If the storage is already open
    /// * `PersistError::NotFound` - Reading or updating a location with nothing persisted
    /// * `PersistError::Storage` - On I/O failure
    fn open(&mut self, mode: OpenMode) -> Result<()>;

    /// Mode of the current sequence, `None` while closed
    fn mode(&self) -> Option<OpenMode>;

    /// Borrow the handle matching the current mode
    ///
    /// # Errors
    /// * `PersistError::Logic` - If the storage is not open
    fn handle(&mut self) -> Result<StorageHandle<'_>>;

    /// Read cursor of the current sequence
    fn cursor(&mut self) -> &mut ReadCursor;

    /// Commit what was written since `open` and release the underlying
    /// resources; closing twice is a no-op
    fn close(&mut self) -> Result<()>;

    /// Release the underlying resources, discarding anything written since
    /// `open`; the previously committed contents stay as they were
    fn abort(&mut self);
}

pub(crate) fn not_open(location: &str) -> PersistError {
    PersistError::logic(format!("Storage {location} is not open"))
}

pub(crate) fn already_open(location: &str, mode: OpenMode) -> PersistError {
    PersistError::logic(format!("Storage {location} is already open for {mode}"))
}
