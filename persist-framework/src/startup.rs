/*!
Formatters bundled with the framework.
*/

use crate::formatters::PropertySetFormatter;
use crate::registry::{FormatterRegistration, FormatterRegistry};
use crate::Result;

/// Registrations for every bundled formatter
pub fn builtin_registrations() -> Vec<FormatterRegistration> {
    vec![PropertySetFormatter::registration()]
}

/// Add the bundled formatters to `registry`
///
/// # Errors
/// * `PersistError::Configuration` - If one of the bundled types is already registered
pub fn register_builtins(registry: &mut FormatterRegistry) -> Result<()> {
    for registration in builtin_registrations() {
        registry.register(registration)?;
    }
    Ok(())
}
