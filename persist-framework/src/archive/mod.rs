/*!
Archive adapter: the bridge between type-erased serialization engines and
strongly-typed per-type save/load logic.

An archive ([`SaveArchive`] / [`LoadArchive`]) only understands primitives.
A concrete type describes its fields in terms of those primitives by
implementing [`Archivable`]. [`ArchiveEntry::of`] turns that generic code
into a pair of plain function pointers keyed by type tag, so an engine that
only holds a `&dyn Persistable` can still run the right typed routine:

```text
&dyn Persistable ──type_tag()──▶ ArchiveEntry { save, load } ──▶ T::save / T::load
```

Every entry writes the type tag and class version ahead of the fields and
checks both when loading.
*/

pub mod binary;
pub mod text;

use crate::persistable::{expect_type, Persistable, TypeTagged};
use crate::registry::FormatterRegistry;
use crate::{PersistError, Result};

pub use binary::{BinaryLoadArchive, BinarySaveArchive};
pub use text::{TextLoadArchive, TextSaveArchive};

/// Sink side of a type-erased serialization engine
pub trait SaveArchive {
    fn save_u64(&mut self, value: u64) -> Result<()>;
    fn save_i64(&mut self, value: i64) -> Result<()>;
    fn save_f64(&mut self, value: f64) -> Result<()>;
    fn save_bool(&mut self, value: bool) -> Result<()>;
    fn save_str(&mut self, value: &str) -> Result<()>;
}

/// Source side of a type-erased serialization engine
///
/// Loads fail with `PersistError::Format` when the next primitive is missing
/// or of a different kind than requested.
pub trait LoadArchive {
    fn load_u64(&mut self) -> Result<u64>;
    fn load_i64(&mut self) -> Result<i64>;
    fn load_f64(&mut self) -> Result<f64>;
    fn load_bool(&mut self) -> Result<bool>;
    fn load_string(&mut self) -> Result<String>;

    /// Whether every primitive has been consumed
    fn is_exhausted(&self) -> bool;
}

/// Field-level serialization for one concrete persistable type
pub trait Archivable: Persistable + TypeTagged + Sized {
    /// Class version written ahead of the fields
    const VERSION: u32;

    fn save(&self, archive: &mut dyn SaveArchive) -> Result<()>;

    /// Rebuild an object written with class version `version`
    fn load(archive: &mut dyn LoadArchive, version: u32) -> Result<Self>;
}

pub type SaveFn = fn(&dyn Persistable, &mut dyn SaveArchive) -> Result<()>;
pub type LoadFn = fn(&mut dyn LoadArchive) -> Result<Box<dyn Persistable>>;

/// Dispatch table row: the typed save/load pair for one type tag
#[derive(Clone, Copy)]
pub struct ArchiveEntry {
    type_tag: &'static str,
    version: u32,
    save: SaveFn,
    load: LoadFn,
}

impl ArchiveEntry {
    /// Monomorphize the save/load routines of `T`
    pub fn of<T: Archivable>() -> Self {
        Self {
            type_tag: T::TYPE_TAG,
            version: T::VERSION,
            save: save_typed::<T>,
            load: load_typed::<T>,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Serialize a type-erased object
    ///
    /// # Errors
    /// * `PersistError::TypeMismatch` - If the object is not of this entry's type
    pub fn save(&self, persistable: &dyn Persistable, archive: &mut dyn SaveArchive) -> Result<()> {
        (self.save)(persistable, archive)
    }

    /// Manufacture a new object from the archive
    pub fn load(&self, archive: &mut dyn LoadArchive) -> Result<Box<dyn Persistable>> {
        (self.load)(archive)
    }
}

impl std::fmt::Debug for ArchiveEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveEntry")
            .field("type_tag", &self.type_tag)
            .field("version", &self.version)
            .finish()
    }
}

fn save_typed<T: Archivable>(
    persistable: &dyn Persistable,
    archive: &mut dyn SaveArchive,
) -> Result<()> {
    let typed = expect_type::<T>(persistable)?;
    archive.save_str(T::TYPE_TAG)?;
    archive.save_u64(u64::from(T::VERSION))?;
    typed.save(archive)
}

fn load_typed<T: Archivable>(archive: &mut dyn LoadArchive) -> Result<Box<dyn Persistable>> {
    let tag = archive.load_string()?;
    if tag != T::TYPE_TAG {
        return Err(PersistError::type_mismatch(T::TYPE_TAG, tag));
    }
    let version = archive.load_u64()?;
    if version > u64::from(T::VERSION) {
        return Err(PersistError::format(format!(
            "{} class version {version} is newer than supported version {}",
            T::TYPE_TAG,
            T::VERSION
        )));
    }
    // version <= T::VERSION, so it fits in a u32
    let object = T::load(archive, version as u32)?;
    Ok(Box::new(object))
}

/// Serialize an object known only by its base reference, dispatching on its tag
pub fn delegate_save(
    registry: &FormatterRegistry,
    persistable: &dyn Persistable,
    archive: &mut dyn SaveArchive,
) -> Result<()> {
    registry
        .archive_entry(persistable.type_tag())?
        .save(persistable, archive)
}

/// Deserialize an object of the registered type `type_tag`
pub fn delegate_load(
    registry: &FormatterRegistry,
    type_tag: &str,
    archive: &mut dyn LoadArchive,
) -> Result<Box<dyn Persistable>> {
    registry.archive_entry(type_tag)?.load(archive)
}
