/*!
# Persist Framework

Pluggable, formatter-based object persistence.

Domain objects ([`Persistable`]) are written to and read from opaque
destinations ([`Storage`]) by interchangeable strategy objects
([`Formatter`]). Which formatter handles an object is decided at runtime by
its type tag through the [`FormatterRegistry`]; how it serializes is decided
by a hierarchical [`Policy`].

- Formatter registry keyed by type tag, frozen after startup
- Text, binary (optionally gzip-compressed) and table sub-formats
- Archive adapter bridging type-erased archives to typed save/load code
- Memory, local file and in-memory table storages
- Structured logging via `tracing`, Prometheus metrics behind the `metrics` feature

## Architecture

```text
Persistence ──formatter_for(tag)──▶ FormatterRegistry ──factory(policy)──▶ Formatter
     │                                                                       │
     └──StorageGuard::open(mode)──▶ Storage ◀──write / read / update─────────┘
```

## Usage

```rust
use persist_framework::{MemoryStore, Persistence, Policy, PropertySet};

let policy = Policy::from_json_str(
    r#"{"Formatter": {"PropertySet": {"format": "binary"}}}"#,
)?;
let persistence = Persistence::new(policy)?;

let store = MemoryStore::new();
let visits = [
    PropertySet::new().with("visitId", 1),
    PropertySet::new().with("visitId", 2),
];
persistence.persist_batch(
    &[&visits[0], &visits[1]],
    &mut store.storage("visits"),
    &PropertySet::new(),
)?;

let restored = persistence.retrieve_all(
    "PropertySet",
    &mut store.storage("visits"),
    &PropertySet::new(),
)?;
assert_eq!(restored.len(), 2);
# Ok::<(), persist_framework::PersistError>(())
```
*/

pub mod archive;
pub mod compression;
pub mod error;
pub mod formatter;
pub mod formatters;
pub mod observability;
pub mod persistable;
pub mod persistence;
pub mod policy;
pub mod property_set;
pub mod registry;
pub mod startup;
pub mod storage;


pub use archive::{Archivable, ArchiveEntry, LoadArchive, SaveArchive};
pub use error::{PersistError, Result};
pub use formatter::{Formatter, FormatterFactory, FormatterPtr, ReadOutcome};
pub use formatters::{PropertySetFormatter, SubFormat};
pub use persistable::{Persistable, TypeTagged};
pub use persistence::Persistence;
pub use policy::{Policy, PolicyBuilder, PolicyPtr};
pub use property_set::{PropertySet, PropertyValue};
pub use registry::{FormatterRegistration, FormatterRegistry};
#[cfg(feature = "local")]
pub use storage::LocalFileStorage;
pub use storage::{
    MemoryDatabase, MemoryStorage, MemoryStore, OpenMode, Storage, StorageGuard, TableStorage,
};
