// table.rs - Per-guild command table
// Flat map from hyphen-joined command paths to entries, plus a count of how
// many keys sit beneath every path prefix. The resolver walks the prefix index
// so that `base-set-prefix` is reachable even when `base-set` is not a key.

use std::collections::HashMap;
use std::fmt;

use crate::module::{CommandFn, CommandSpec};
use crate::permissions::PermissionSet;

#[derive(Clone)]
pub struct CommandEntry {
    /// Module whose contribution created this entry
    pub module_id: String,
    pub name: &'static str,
    pub description: &'static str,
    pub permissions: PermissionSet,
    pub run: CommandFn,
}

impl CommandEntry {
    pub fn from_spec(owner: &'static str, spec: &CommandSpec) -> Self {
        Self {
            module_id: owner.to_string(),
            name: spec.name,
            description: spec.description,
            permissions: spec.permissions.clone(),
            run: spec.run,
        }
    }
}

impl fmt::Debug for CommandEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandEntry")
            .field("module_id", &self.module_id)
            .field("name", &self.name)
            .field("permissions", &self.permissions)
            .finish()
    }
}

/// Every prefix of `key` ending on a `-` boundary, and the key itself
fn path_prefixes(key: &str) -> impl Iterator<Item = &str> {
    key.match_indices('-')
        .map(move |(idx, _)| &key[..idx])
        .chain(std::iter::once(key))
}

#[derive(Debug, Default)]
pub struct CommandTable {
    entries: HashMap<String, CommandEntry>,
    prefixes: HashMap<String, usize>,
}

impl CommandTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `entry` at `key`; a later registration overwrites an earlier one
    pub fn insert(&mut self, key: impl Into<String>, entry: CommandEntry) -> Option<CommandEntry> {
        let key = key.into();
        let replaced = self.entries.insert(key.clone(), entry);
        if replaced.is_none() {
            for prefix in path_prefixes(&key) {
                *self.prefixes.entry(prefix.to_string()).or_insert(0) += 1;
            }
        }
        replaced
    }

    /// Removes `key` only while `module_id` still owns it
    pub fn remove_owned(&mut self, key: &str, module_id: &str) -> Option<CommandEntry> {
        match self.entries.get(key) {
            Some(entry) if entry.module_id == module_id => {}
            _ => return None,
        }
        let removed = self.entries.remove(key)?;
        for prefix in path_prefixes(key) {
            if let Some(count) = self.prefixes.get_mut(prefix) {
                *count -= 1;
                if *count == 0 {
                    self.prefixes.remove(prefix);
                }
            }
        }
        Some(removed)
    }

    pub fn get(&self, key: &str) -> Option<&CommandEntry> {
        self.entries.get(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// True when some key equals `path` or continues it with `-`
    pub fn is_path(&self, path: &str) -> bool {
        self.prefixes.contains_key(path)
    }

    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn keys_owned_by(&self, module_id: &str) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, entry)| entry.module_id == module_id)
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::noop_command;

    fn entry(owner: &'static str, name: &'static str) -> CommandEntry {
        CommandEntry::from_spec(owner, &CommandSpec::new(name, "", noop_command))
    }

    #[test]
    fn test_prefix_index_covers_intermediate_paths() {
        let mut table = CommandTable::new();
        table.insert("base-set-prefix", entry("base", "prefix"));

        assert!(table.is_path("base"));
        assert!(table.is_path("base-set"));
        assert!(table.is_path("base-set-prefix"));
        assert!(!table.is_path("base-se"));
        assert!(!table.contains("base-set"));
    }

    #[test]
    fn test_remove_owned_leaves_other_owners_alone() {
        let mut table = CommandTable::new();
        table.insert("set", entry("base", "set"));
        table.insert("set-alert", entry("alert", "alert"));

        assert!(table.remove_owned("set", "alert").is_none());
        assert!(table.remove_owned("set-alert", "alert").is_some());
        assert_eq!(table.keys(), vec!["set"]);
        assert!(!table.is_path("set-alert"));
        assert!(table.is_path("set"));
    }

    #[test]
    fn test_overwrite_does_not_double_count_prefixes() {
        let mut table = CommandTable::new();
        table.insert("feed-sub", entry("feed", "sub"));
        let replaced = table.insert("feed-sub", entry("other", "sub"));
        assert_eq!(replaced.map(|e| e.module_id), Some("feed".to_string()));

        assert!(table.remove_owned("feed-sub", "other").is_some());
        assert!(!table.is_path("feed"));
        assert!(table.is_empty());
    }

    #[test]
    fn test_keys_owned_by_is_sorted() {
        let mut table = CommandTable::new();
        table.insert("filter-show", entry("filter", "show"));
        table.insert("filter-add", entry("filter", "add"));
        table.insert("help", entry("base", "help"));
        assert_eq!(table.keys_owned_by("filter"), vec!["filter-add", "filter-show"]);
        assert_eq!(table.len(), 3);
    }
}
