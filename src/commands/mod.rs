// commands/mod.rs - Built-in Module Registry
// Declares every built-in module and assembles the registry main.rs
// validates at startup. Modules are only ever looked up by id in this
// registry; nothing is loaded from user-supplied names.

pub mod alert;          // Alerts Manager: watchlist, mass-join and new-account alerts
pub mod base;           // Always-active base commands (help, enable, set prefix, ...)
pub mod feed;           // Feed Roles Manager: opt-in announcement roles
pub mod filter;         // Filter Manager: phrase blacklist with delete-on-match

use crate::module::{ModuleRegistry, RegistryError};

/// Registry of every module this bot ships with
pub fn builtin_registry() -> Result<ModuleRegistry, RegistryError> {
    let mut registry = ModuleRegistry::new(base::module())?;
    registry.register(alert::module())?;
    registry.register(filter::module())?;
    registry.register(feed::module())?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registry_is_valid() {
        let registry = builtin_registry().unwrap();
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["alert", "base", "feed", "filter"]);
        assert_eq!(registry.base_id(), "base");
    }
}
