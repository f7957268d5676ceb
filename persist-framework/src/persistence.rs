/*!
High-level persistence entry point.

[`Persistence`] pairs a registry with a policy and drives the formatter
protocol on the caller's behalf: it picks the formatter for an object's type
tag, opens the storage for the right mode, walks the `iter`/`len` and
`first`/`done` sequences, and closes the storage on every exit path.

Formatters are built lazily and cached per `(type tag, sub-policy)`. The
policy handed to a type's formatter is the `Formatter.<type tag>` subtree of
the persistence policy:

```json
{
  "Formatter": {
    "PropertySet": { "format": "binary", "compression": { "enabled": true } }
  }
}
```
*/

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::formatter::FormatterPtr;
use crate::persistable::{Persistable, TypeTagged};
use crate::policy::{Policy, PolicyPtr};
use crate::property_set::PropertySet;
use crate::registry::FormatterRegistry;
use crate::storage::{OpenMode, Storage, StorageGuard};
use crate::{PersistError, Result};

#[cfg(feature = "metrics")]
use crate::observability::OperationTimer;

/// Policy subtree holding per-type formatter policies
pub const FORMATTER_POLICY_KEY: &str = "Formatter";

type CacheKey = (&'static str, String);

/// Persists and retrieves objects through registered formatters
///
/// # Example
/// ```rust
/// use persist_framework::{MemoryStore, Persistence, Policy, PropertySet};
///
/// let policy = Policy::builder()
///     .set("Formatter.PropertySet.format", "text")
///     .build();
/// let persistence = Persistence::new(policy)?;
///
/// let store = MemoryStore::new();
/// let visit = PropertySet::new().with("visitId", 903334).with("filter", "r");
/// persistence.persist(&visit, &mut store.storage("visit"), &PropertySet::new())?;
///
/// let restored: Box<PropertySet> =
///     persistence.retrieve_as(&mut store.storage("visit"), &PropertySet::new())?;
/// assert_eq!(*restored, visit);
/// # Ok::<(), persist_framework::PersistError>(())
/// ```
#[derive(Debug)]
pub struct Persistence<'r> {
    registry: &'r FormatterRegistry,
    policy: PolicyPtr,
    formatters: Mutex<HashMap<CacheKey, FormatterPtr>>,
}

impl Persistence<'static> {
    /// Create a persistence layer over the global registry
    ///
    /// # Errors
    /// * `PersistError::Configuration` - If the global registry cannot be initialized
    pub fn new(policy: Policy) -> Result<Self> {
        Ok(Self::with_registry(FormatterRegistry::global()?, policy))
    }
}

impl<'r> Persistence<'r> {
    /// Create a persistence layer over an explicit registry
    pub fn with_registry(registry: &'r FormatterRegistry, policy: Policy) -> Self {
        Self {
            registry,
            policy: PolicyPtr::new(policy),
            formatters: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &'r FormatterRegistry {
        self.registry
    }

    pub fn policy(&self) -> &PolicyPtr {
        &self.policy
    }

    fn cache(&self) -> MutexGuard<'_, HashMap<CacheKey, FormatterPtr>> {
        self.formatters.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of formatters built so far
    pub fn cached_formatters(&self) -> usize {
        self.cache().len()
    }

    /// Formatter for `type_tag`, bound to its `Formatter.<type_tag>` sub-policy
    ///
    /// # Errors
    /// * `PersistError::Configuration` - If the tag is unregistered or its policy is invalid
    pub fn formatter_for(&self, type_tag: &str) -> Result<FormatterPtr> {
        let registration = self.registry.lookup(type_tag)?;
        let sub_policy = self
            .policy
            .sub_policy(&format!("{FORMATTER_POLICY_KEY}.{type_tag}"))?;
        let key = (registration.type_tag(), sub_policy.fingerprint());

        let mut cache = self.cache();
        if let Some(formatter) = cache.get(&key) {
            debug!(type_tag, "Formatter cache hit");
            return Ok(formatter.clone());
        }

        let formatter = registration.create(sub_policy)?;
        debug!(type_tag, cached = cache.len() + 1, "Formatter created");
        cache.insert(key, formatter.clone());
        Ok(formatter)
    }

    /// Write one object to `storage`
    pub fn persist(
        &self,
        persistable: &dyn Persistable,
        storage: &mut dyn Storage,
        additional: &PropertySet,
    ) -> Result<()> {
        self.persist_batch(&[persistable], storage, additional)
    }

    /// Write a sequence of same-typed objects to `storage` in order
    ///
    /// An empty batch is a no-op and leaves the storage untouched. Batches
    /// are not atomic: when an object fails, the ones written before it are
    /// committed. A failure on the first object leaves the storage as it was.
    ///
    /// # Errors
    /// * `PersistError::TypeMismatch` - If the objects do not share one type tag
    /// * Any error of the formatter's `write`
    pub fn persist_batch(
        &self,
        objects: &[&dyn Persistable],
        storage: &mut dyn Storage,
        additional: &PropertySet,
    ) -> Result<()> {
        let Some(head) = objects.first() else {
            return Ok(());
        };
        let type_tag = head.type_tag();
        if let Some(other) = objects.iter().find(|o| o.type_tag() != type_tag) {
            return Err(PersistError::type_mismatch(type_tag, other.type_tag()));
        }

        instrumented("persist", type_tag, |_| objects.len(), || {
            let formatter = self.formatter_for(type_tag)?;
            let mut guard = StorageGuard::open(storage, OpenMode::Write)?;
            for (iter, object) in objects.iter().enumerate() {
                if let Err(err) =
                    formatter.write(*object, guard.storage(), additional, iter, objects.len())
                {
                    if iter > 0 {
                        if let Err(close_err) = guard.close() {
                            warn!(
                                written = iter,
                                error = %close_err,
                                "Failed to commit partial batch"
                            );
                        }
                    }
                    return Err(err);
                }
            }
            guard.close()
        })
    }

    /// Write the same object to every storage in `storages`
    pub fn persist_all(
        &self,
        persistable: &dyn Persistable,
        storages: &mut [&mut dyn Storage],
        additional: &PropertySet,
    ) -> Result<()> {
        for storage in storages.iter_mut() {
            self.persist(persistable, &mut **storage, additional)?;
        }
        Ok(())
    }

    /// Read the first object stored at `storage`
    ///
    /// # Errors
    /// * `PersistError::NotFound` - If nothing was persisted there
    /// * `PersistError::Format` - On malformed stored data
    pub fn retrieve(
        &self,
        type_tag: &str,
        storage: &mut dyn Storage,
        additional: &PropertySet,
    ) -> Result<Box<dyn Persistable>> {
        instrumented("retrieve", type_tag, |_| 1, || {
            let formatter = self.formatter_for(type_tag)?;
            let mut guard = StorageGuard::open(storage, OpenMode::Read)?;
            let outcome = formatter.read(guard.storage(), additional, true)?;
            guard.close()?;
            Ok(outcome.object)
        })
    }

    /// Read every object of the sequence stored at `storage`, in write order
    pub fn retrieve_all(
        &self,
        type_tag: &str,
        storage: &mut dyn Storage,
        additional: &PropertySet,
    ) -> Result<Vec<Box<dyn Persistable>>> {
        instrumented("retrieve", type_tag, Vec::len, || {
            let formatter = self.formatter_for(type_tag)?;
            let mut guard = StorageGuard::open(storage, OpenMode::Read)?;
            let mut objects = Vec::new();
            let mut first = true;
            loop {
                let outcome = formatter.read(guard.storage(), additional, first)?;
                first = false;
                objects.push(outcome.object);
                if outcome.done {
                    break;
                }
            }
            guard.close()?;
            Ok(objects)
        })
    }

    /// Typed form of [`retrieve`](Self::retrieve)
    ///
    /// # Errors
    /// * `PersistError::TypeMismatch` - If the stored object is not a `T`
    pub fn retrieve_as<T: Persistable + TypeTagged>(
        &self,
        storage: &mut dyn Storage,
        additional: &PropertySet,
    ) -> Result<Box<T>> {
        self.retrieve(T::TYPE_TAG, storage, additional)?.downcast::<T>()
    }

    /// Overwrite what was previously persisted at `storage`
    ///
    /// A failed update leaves the previous contents in place.
    ///
    /// # Errors
    /// * `PersistError::NotFound` - If nothing was persisted there
    pub fn update(
        &self,
        persistable: &dyn Persistable,
        storage: &mut dyn Storage,
        additional: &PropertySet,
    ) -> Result<()> {
        let type_tag = persistable.type_tag();
        instrumented("update", type_tag, |_| 1, || {
            let formatter = self.formatter_for(type_tag)?;
            let mut guard = StorageGuard::open(storage, OpenMode::Update)?;
            formatter.update(persistable, guard.storage(), additional)?;
            guard.close()
        })
    }
}

/// Run one facade operation, logging failures and recording metrics
fn instrumented<T>(
    operation: &'static str,
    type_tag: &str,
    objects: impl FnOnce(&T) -> usize,
    run: impl FnOnce() -> Result<T>,
) -> Result<T> {
    #[cfg(feature = "metrics")]
    let timer = OperationTimer::start(operation, type_tag);

    let result = run();

    #[cfg(feature = "metrics")]
    timer.finish(&result, result.as_ref().map_or(0, objects));
    #[cfg(not(feature = "metrics"))]
    let _ = objects;

    if let Err(err) = &result {
        debug!(operation, type_tag, error = %err, kind = err.kind(), "Persistence operation failed");
    }
    result
}
