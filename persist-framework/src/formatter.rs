/*!
The formatter contract.

A formatter implements read/write/update for exactly one persistable type
and is bound to one policy at construction. Formatters are immutable after
construction, which lets the persistence layer cache and share them.

Call protocol every variant honors:

- `write` is called with `iter` in `0..len`; `iter == 0` starts a sequence.
- `read` is called with `first = true` once, then `first = false` until a call
  returns `done == true`. Calling again after that is a logic error.
- `update` overwrites what an earlier `write` left at the location.
*/

use std::fmt::Debug;
use std::sync::Arc;

use crate::persistable::Persistable;
use crate::policy::PolicyPtr;
use crate::property_set::PropertySet;
use crate::storage::{OpenMode, Storage};
use crate::{PersistError, Result};

/// Result of one `read` call
#[derive(Debug)]
pub struct ReadOutcome {
    /// Newly manufactured object, owned by the caller
    pub object: Box<dyn Persistable>,
    /// True when no further objects remain in the sequence
    pub done: bool,
}

/// Strategy persisting one persistable type
pub trait Formatter: Debug + Send + Sync {
    /// Type tag of the persistable this formatter handles
    fn type_tag(&self) -> &'static str;

    /// Serialize `persistable` as item `iter` of a `len`-item sequence
    ///
    /// # Errors
    /// * `PersistError::TypeMismatch` - If the object is not of this formatter's type
    /// * `PersistError::Logic` - If `iter >= len` or the storage is not open for writing
    /// * `PersistError::Storage` - On I/O failure
    fn write(
        &self,
        persistable: &dyn Persistable,
        storage: &mut dyn Storage,
        additional: &PropertySet,
        iter: usize,
        len: usize,
    ) -> Result<()>;

    /// Manufacture the next object of a read sequence
    ///
    /// # Errors
    /// * `PersistError::NotFound` - If nothing is stored at the location
    /// * `PersistError::Format` - On malformed stored data
    /// * `PersistError::Logic` - On out-of-protocol calls; no I/O is performed
    fn read(
        &self,
        storage: &mut dyn Storage,
        additional: &PropertySet,
        first: bool,
    ) -> Result<ReadOutcome>;

    /// Overwrite a previously written representation
    ///
    /// # Errors
    /// * `PersistError::NotFound` - If nothing was written before
    /// * Otherwise the same errors as [`write`](Self::write)
    fn update(
        &self,
        persistable: &dyn Persistable,
        storage: &mut dyn Storage,
        additional: &PropertySet,
    ) -> Result<()>;
}

/// Shared formatter instance
pub type FormatterPtr = Arc<dyn Formatter>;

/// Builds a formatter bound to a policy
pub type FormatterFactory = fn(PolicyPtr) -> Result<FormatterPtr>;

/// Check that `iter` addresses an item of a `len`-item sequence
pub fn check_batch_position(iter: usize, len: usize) -> Result<()> {
    if iter >= len {
        return Err(PersistError::logic(format!(
            "Batch position {iter} is outside a sequence of {len} objects"
        )));
    }
    Ok(())
}

/// Check that `storage` is open in the mode `operation` needs
pub fn require_mode(storage: &dyn Storage, expected: OpenMode, operation: &str) -> Result<()> {
    match storage.mode() {
        Some(mode) if mode == expected => Ok(()),
        Some(mode) => Err(PersistError::logic(format!(
            "{operation}() needs {} opened for {expected}, but it is open for {mode}",
            storage.location()
        ))),
        None => Err(PersistError::logic(format!(
            "{operation}() needs {} opened for {expected}, but it is closed",
            storage.location()
        ))),
    }
}

/// Validate a read call before any I/O
pub fn begin_read(storage: &mut dyn Storage, first: bool) -> Result<()> {
    // Cursor misuse is reported even if the storage was closed in between.
    storage.cursor().begin(first)?;
    require_mode(storage, OpenMode::Read, "read")
}
