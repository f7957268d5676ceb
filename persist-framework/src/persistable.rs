/*!
The persistable capability carried by domain objects.

A persistable knows nothing about how it is stored; it only exposes a stable
type tag that the registry and the archive adapter dispatch on, and enough
`Any` plumbing to recover the concrete type once dispatch has happened.
*/

use std::any::Any;
use std::fmt::Debug;

use crate::registry::{FormatterRegistration, FormatterRegistry};
use crate::{PersistError, Result};

/// Static type tag for a concrete persistable type
pub trait TypeTagged {
    /// Discriminator under which the type's formatter is registered
    const TYPE_TAG: &'static str;
}

/// Domain object that can be handed to the persistence layer
pub trait Persistable: Any + Debug + Send + Sync + 'static {
    /// Runtime type discriminator, equal to `TypeTagged::TYPE_TAG` for the concrete type
    fn type_tag(&self) -> &'static str;

    fn as_any(&self) -> &dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any>;

    /// Rust type name of the concrete object, used in diagnostics
    fn type_name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Find the registry entry responsible for this object's type
    ///
    /// # Errors
    /// * `PersistError::Configuration` - If the type tag was never registered
    fn accept_formatter<'r>(
        &self,
        registry: &'r FormatterRegistry,
    ) -> Result<&'r FormatterRegistration> {
        registry.lookup(self.type_tag())
    }
}

impl dyn Persistable {
    /// Whether the concrete type behind this reference is `T`
    pub fn is<T: Persistable>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Persistable>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Recover ownership of the concrete object
    ///
    /// # Errors
    /// * `PersistError::TypeMismatch` - If the object is not a `T`
    pub fn downcast<T: Persistable + TypeTagged>(self: Box<Self>) -> Result<Box<T>> {
        let (tag, name) = (self.type_tag(), self.type_name());
        self.into_any()
            .downcast::<T>()
            .map_err(|_| mismatch::<T>(tag, name))
    }
}

/// Borrow `persistable` as a `T`, failing with a type mismatch otherwise
pub fn expect_type<T: Persistable + TypeTagged>(persistable: &dyn Persistable) -> Result<&T> {
    persistable
        .as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| mismatch::<T>(persistable.type_tag(), persistable.type_name()))
}

/// Mismatch between `T` and the object, naming Rust types when the tags agree
fn mismatch<T: TypeTagged>(actual_tag: &str, actual_type: &str) -> PersistError {
    if actual_tag == T::TYPE_TAG {
        PersistError::type_mismatch(
            format!("{} ({})", T::TYPE_TAG, std::any::type_name::<T>()),
            format!("{actual_tag} ({actual_type})"),
        )
    } else {
        PersistError::type_mismatch(T::TYPE_TAG, actual_tag)
    }
}
