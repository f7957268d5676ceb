/*!
Type-tag to formatter dispatch.

The registry maps every persistable type tag to a [`FormatterRegistration`]:
the factory that builds the type's formatter from a policy, and the archive
entry that saves/loads the type through a type-erased archive.

A registry is assembled once (builtins plus any caller registrations),
then frozen either by handing it out by reference or by installing it as the
process-wide registry. Lookups on a frozen registry are lock-free.
*/

use once_cell::sync::OnceCell;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::archive::{Archivable, ArchiveEntry};
use crate::formatter::{FormatterFactory, FormatterPtr};
use crate::policy::Policy;
use crate::startup;
use crate::{PersistError, Result};

static GLOBAL_REGISTRY: OnceCell<FormatterRegistry> = OnceCell::new();

/// Everything the framework knows about one persistable type
#[derive(Clone, Copy)]
pub struct FormatterRegistration {
    type_tag: &'static str,
    factory: FormatterFactory,
    archive: ArchiveEntry,
}

impl FormatterRegistration {
    /// Describe type `T`, whose formatters are built by `factory`
    pub fn new<T: Archivable>(factory: FormatterFactory) -> Self {
        Self {
            type_tag: T::TYPE_TAG,
            factory,
            archive: ArchiveEntry::of::<T>(),
        }
    }

    pub fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    /// Build a formatter bound to `policy`
    ///
    /// # Errors
    /// * `PersistError::Configuration` - If the policy is unusable for this type
    pub fn create(&self, policy: Policy) -> Result<FormatterPtr> {
        (self.factory)(Arc::new(policy))
    }

    pub fn archive(&self) -> &ArchiveEntry {
        &self.archive
    }
}

impl std::fmt::Debug for FormatterRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FormatterRegistration")
            .field("type_tag", &self.type_tag)
            .field("archive", &self.archive)
            .finish()
    }
}

/// Dispatch table from type tag to registration
#[derive(Debug, Default)]
pub struct FormatterRegistry {
    entries: HashMap<&'static str, FormatterRegistration>,
}

impl FormatterRegistry {
    /// Create a registry with nothing registered
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry pre-populated with the bundled formatters
    pub fn with_builtins() -> Result<Self> {
        let mut registry = Self::new();
        startup::register_builtins(&mut registry)?;
        Ok(registry)
    }

    /// Add a registration
    ///
    /// # Errors
    /// * `PersistError::Configuration` - If the type tag is already registered
    pub fn register(&mut self, registration: FormatterRegistration) -> Result<()> {
        let tag = registration.type_tag();
        if self.entries.contains_key(tag) {
            return Err(PersistError::configuration(format!(
                "A formatter for type '{tag}' is already registered"
            )));
        }
        self.entries.insert(tag, registration);
        debug!(type_tag = tag, "Registered formatter");
        Ok(())
    }

    /// Find the registration for `type_tag`
    ///
    /// # Errors
    /// * `PersistError::Configuration` - If nothing is registered under the tag
    pub fn lookup(&self, type_tag: &str) -> Result<&FormatterRegistration> {
        self.entries.get(type_tag).ok_or_else(|| {
            PersistError::configuration(format!("No formatter registered for type '{type_tag}'"))
        })
    }

    /// Build the formatter for `type_tag` bound to `policy`
    pub fn create(&self, type_tag: &str, policy: Policy) -> Result<FormatterPtr> {
        self.lookup(type_tag)?.create(policy)
    }

    pub fn archive_entry(&self, type_tag: &str) -> Result<&ArchiveEntry> {
        self.lookup(type_tag).map(FormatterRegistration::archive)
    }

    pub fn contains(&self, type_tag: &str) -> bool {
        self.entries.contains_key(type_tag)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Registered type tags in sorted order
    pub fn type_tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<&'static str> = self.entries.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Freeze this registry as the process-wide registry
    ///
    /// Must happen before the first call to [`global`](Self::global);
    /// registrations cannot be added afterwards.
    ///
    /// # Errors
    /// * `PersistError::Configuration` - If a global registry is already in place
    pub fn install(self) -> Result<&'static FormatterRegistry> {
        let count = self.len();
        GLOBAL_REGISTRY.set(self).map_err(|_| {
            PersistError::configuration("The global formatter registry is already initialized")
        })?;
        info!(formatters = count, "Installed global formatter registry");
        Self::global()
    }

    /// The process-wide registry, initialized with the builtins on first use
    pub fn global() -> Result<&'static FormatterRegistry> {
        GLOBAL_REGISTRY.get_or_try_init(FormatterRegistry::with_builtins)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{LoadArchive, SaveArchive};
    use crate::formatter::{Formatter, ReadOutcome};
    use crate::persistable::{Persistable, TypeTagged};
    use crate::policy::PolicyPtr;
    use crate::property_set::PropertySet;
    use crate::storage::Storage;
    use rayon::prelude::*;
    use std::any::Any;

    #[derive(Debug, Default)]
    struct Exposure;

    impl TypeTagged for Exposure {
        const TYPE_TAG: &'static str = "Exposure";
    }

    impl Persistable for Exposure {
        fn type_tag(&self) -> &'static str {
            Self::TYPE_TAG
        }
        fn as_any(&self) -> &dyn Any {
            self
        }
        fn into_any(self: Box<Self>) -> Box<dyn Any> {
            self
        }
    }

    impl Archivable for Exposure {
        const VERSION: u32 = 1;
        fn save(&self, _archive: &mut dyn SaveArchive) -> Result<()> {
            Ok(())
        }
        fn load(_archive: &mut dyn LoadArchive, _version: u32) -> Result<Self> {
            Ok(Exposure)
        }
    }

    #[derive(Debug)]
    struct NullFormatter;

    impl Formatter for NullFormatter {
        fn type_tag(&self) -> &'static str {
            Exposure::TYPE_TAG
        }
        fn write(
            &self,
            _persistable: &dyn Persistable,
            _storage: &mut dyn Storage,
            _additional: &PropertySet,
            _iter: usize,
            _len: usize,
        ) -> Result<()> {
            Ok(())
        }
        fn read(
            &self,
            _storage: &mut dyn Storage,
            _additional: &PropertySet,
            _first: bool,
        ) -> Result<ReadOutcome> {
            Ok(ReadOutcome {
                object: Box::new(Exposure),
                done: true,
            })
        }
        fn update(
            &self,
            _persistable: &dyn Persistable,
            _storage: &mut dyn Storage,
            _additional: &PropertySet,
        ) -> Result<()> {
            Ok(())
        }
    }

    fn null_factory(_policy: PolicyPtr) -> Result<FormatterPtr> {
        Ok(Arc::new(NullFormatter))
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = FormatterRegistry::new();
        assert!(registry.is_empty());
        registry
            .register(FormatterRegistration::new::<Exposure>(null_factory))
            .unwrap();

        let registration = registry.lookup("Exposure").unwrap();
        assert_eq!(registration.type_tag(), "Exposure");
        assert_eq!(registration.archive().version(), 1);

        let formatter = registry.create("Exposure", Policy::empty()).unwrap();
        assert_eq!(formatter.type_tag(), "Exposure");
    }

    #[test]
    fn test_duplicate_registration_is_rejected() {
        let mut registry = FormatterRegistry::new();
        registry
            .register(FormatterRegistration::new::<Exposure>(null_factory))
            .unwrap();
        let result = registry.register(FormatterRegistration::new::<Exposure>(null_factory));
        assert!(matches!(result, Err(PersistError::Configuration(_))));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_unregistered_tag() {
        let registry = FormatterRegistry::new();
        assert!(matches!(
            registry.lookup("Nope"),
            Err(PersistError::Configuration(_))
        ));
        assert!(matches!(
            registry.archive_entry("Nope"),
            Err(PersistError::Configuration(_))
        ));
    }

    #[test]
    fn test_builtins_include_property_set() {
        let registry = FormatterRegistry::with_builtins().unwrap();
        assert!(registry.contains(PropertySet::TYPE_TAG));
        assert_eq!(registry.type_tags(), vec!["PropertySet"]);
    }

    #[test]
    fn test_accept_formatter_dispatches_on_dynamic_type() {
        let registry = FormatterRegistry::with_builtins().unwrap();
        let object: Box<dyn Persistable> = Box::new(PropertySet::new());
        let registration = object.accept_formatter(&registry).unwrap();
        assert_eq!(registration.type_tag(), "PropertySet");

        let unknown: Box<dyn Persistable> = Box::new(Exposure);
        assert!(matches!(
            unknown.accept_formatter(&registry),
            Err(PersistError::Configuration(_))
        ));
    }

    #[test]
    fn test_global_registry_is_shared_and_frozen() {
        let first = FormatterRegistry::global().unwrap();
        let second = FormatterRegistry::global().unwrap();
        assert!(std::ptr::eq(first, second));
        assert!(first.contains("PropertySet"));

        let late = FormatterRegistry::new().install();
        assert!(matches!(late, Err(PersistError::Configuration(_))));
    }

    #[test]
    fn test_concurrent_lookups() {
        let registry = FormatterRegistry::with_builtins().unwrap();
        let found: Vec<bool> = (0..64)
            .into_par_iter()
            .map(|_| registry.lookup("PropertySet").is_ok())
            .collect();
        assert!(found.into_iter().all(|ok| ok));
    }
}
