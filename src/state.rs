// state.rs - Per-guild durable state
// Every guild owns one JSON document. Documents are fanned out over a two-level
// directory tree derived from a digest of the guild id so that no directory
// ever holds more than 256 entries at either level:
//
//   <root>/<hex[0..2]>/<hex[2..4]>/<hex>.json
//
// Loading never fails: a missing or unreadable document yields a fresh default.

use log::{debug, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use serenity::model::id::GuildId;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::error::StateError;

/// Free-form key/value settings owned by one module
pub type Bag = Map<String, Value>;

/// The persisted document for one guild
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantState {
    /// Falls back to the process-wide default prefix when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prefix: Option<String>,
    /// Enable order is preserved; never contains the base module
    #[serde(default)]
    pub enabled_modules: Vec<String>,
    #[serde(default)]
    pub modules: BTreeMap<String, Bag>,
    /// Unknown top-level properties survive a load/save cycle
    #[serde(flatten)]
    pub extra: Bag,
}

impl TenantState {
    pub fn prefix_or<'a>(&'a self, default: &'a str) -> &'a str {
        self.prefix.as_deref().unwrap_or(default)
    }

    pub fn is_enabled(&self, module_id: &str) -> bool {
        self.enabled_modules.iter().any(|m| m == module_id)
    }

    /// Appends `module_id` unless already present
    pub fn push_enabled(&mut self, module_id: &str) -> bool {
        if self.is_enabled(module_id) {
            return false;
        }
        self.enabled_modules.push(module_id.to_string());
        true
    }

    pub fn remove_enabled(&mut self, module_id: &str) -> bool {
        let before = self.enabled_modules.len();
        self.enabled_modules.retain(|m| m != module_id);
        before != self.enabled_modules.len()
    }

    /// Drops duplicates and the always-on module from `enabledModules`
    pub fn normalize(&mut self, base_module: &str) -> bool {
        let before = self.enabled_modules.clone();
        let mut seen = Vec::with_capacity(before.len());
        for module in &before {
            if module != base_module && !seen.contains(module) {
                seen.push(module.clone());
            }
        }
        self.enabled_modules = seen;
        before != self.enabled_modules
    }

    /// Sets a top-level property if absent; true when the document changed
    pub fn seed_property(&mut self, key: &str, default: Value) -> bool {
        if self.extra.contains_key(key) {
            return false;
        }
        self.extra.insert(key.to_string(), default);
        true
    }

    /// Sets a module property if absent, creating the module bag as needed
    pub fn seed_module_property(&mut self, module_id: &str, key: &str, default: Value) -> bool {
        let bag = self.modules.entry(module_id.to_string()).or_default();
        if bag.contains_key(key) {
            return false;
        }
        bag.insert(key.to_string(), default);
        true
    }

    pub fn has_module_property(&self, module_id: &str, key: &str) -> bool {
        self.modules
            .get(module_id)
            .map_or(false, |bag| bag.contains_key(key))
    }

    pub fn module_bag(&self, module_id: &str) -> Option<&Bag> {
        self.modules.get(module_id)
    }
}

/// Hex digest used for shard directories and file names
pub fn tenant_digest(guild_id: GuildId) -> String {
    format!("{:x}", Sha256::digest(guild_id.0.to_string().as_bytes()))
}

/// Filesystem-backed store for tenant documents
#[derive(Debug)]
pub struct StateStore {
    root: PathBuf,
    writes: AtomicU64,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            writes: AtomicU64::new(0),
        }
    }

    /// Number of documents written since the store was created
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    pub fn path_for(&self, guild_id: GuildId) -> PathBuf {
        let digest = tenant_digest(guild_id);
        self.root
            .join(&digest[0..2])
            .join(&digest[2..4])
            .join(format!("{}.json", digest))
    }

    /// Reads the guild's document, substituting defaults on any failure
    pub async fn load(&self, guild_id: GuildId) -> TenantState {
        let path = self.path_for(guild_id);
        match tokio::fs::read(&path).await {
            Ok(bytes) => match serde_json::from_slice::<TenantState>(&bytes) {
                Ok(state) => state,
                Err(e) => {
                    warn!("⚠️ Unreadable state for guild {} at {}: {}", guild_id, path.display(), e);
                    TenantState::default()
                }
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("📂 No stored state for guild {}, starting fresh", guild_id);
                TenantState::default()
            }
            Err(e) => {
                warn!("⚠️ Failed to read state for guild {}: {}", guild_id, e);
                TenantState::default()
            }
        }
    }

    /// Writes the full document, creating shard directories as needed
    pub async fn save(&self, guild_id: GuildId, state: &TenantState) -> Result<(), StateError> {
        let path = self.path_for(guild_id);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let json = serde_json::to_string_pretty(state)?;

        // Write beside the target and rename so readers never see a torn file
        let temp_path = path.with_extension("json.tmp");
        tokio::fs::write(&temp_path, json).await?;
        tokio::fs::rename(&temp_path, &path).await?;

        self.writes.fetch_add(1, Ordering::Relaxed);
        debug!("💾 Saved state for guild {} to {}", guild_id, path.display());
        Ok(())
    }
}

/// The single in-process copy of one guild's document
///
/// Mutations are staged on a copy, persisted, and only then swapped in, so a
/// failed write never leaves memory ahead of disk.
#[derive(Debug)]
pub struct GuildState {
    guild_id: GuildId,
    store: Arc<StateStore>,
    doc: TenantState,
}

impl GuildState {
    pub async fn load(store: Arc<StateStore>, guild_id: GuildId) -> Self {
        let doc = store.load(guild_id).await;
        Self {
            guild_id,
            store,
            doc,
        }
    }

    pub fn doc(&self) -> &TenantState {
        &self.doc
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    /// Persists `staged` and adopts it as the live document on success
    pub async fn commit(&mut self, staged: TenantState) -> Result<(), StateError> {
        self.store.save(self.guild_id, &staged).await?;
        self.doc = staged;
        Ok(())
    }

    /// Idempotent upsert of a top-level property; writes only on change
    pub async fn ensure_property(&mut self, key: &str, default: Value) -> Result<bool, StateError> {
        if self.doc.extra.contains_key(key) {
            return Ok(false);
        }
        let mut staged = self.doc.clone();
        staged.seed_property(key, default);
        self.commit(staged).await?;
        Ok(true)
    }

    /// Idempotent upsert of a module property; writes only on change
    pub async fn ensure_module_property(
        &mut self,
        module_id: &str,
        key: &str,
        default: Value,
    ) -> Result<bool, StateError> {
        if self.doc.has_module_property(module_id, key) {
            return Ok(false);
        }
        let mut staged = self.doc.clone();
        staged.seed_module_property(module_id, key, default);
        self.commit(staged).await?;
        Ok(true)
    }

    pub async fn set_prefix(&mut self, prefix: &str) -> Result<(), StateError> {
        let mut staged = self.doc.clone();
        staged.prefix = Some(prefix.to_string());
        self.commit(staged).await
    }

    /// Decodes a module's bag into its typed settings
    pub fn module_settings<T: DeserializeOwned>(&self, module_id: &str) -> Result<T, StateError> {
        let bag = self.doc.module_bag(module_id).cloned().unwrap_or_default();
        Ok(serde_json::from_value(Value::Object(bag))?)
    }

    /// Replaces a module's bag with `settings` and persists the document
    pub async fn save_module_settings<T: Serialize>(
        &mut self,
        module_id: &str,
        settings: &T,
    ) -> Result<(), StateError> {
        let bag = match serde_json::to_value(settings)? {
            Value::Object(map) => map,
            _ => {
                return Err(StateError::Json(<serde_json::Error as serde::ser::Error>::custom(
                    "module settings must serialize to an object",
                )))
            }
        };
        let mut staged = self.doc.clone();
        staged.modules.insert(module_id.to_string(), bag);
        self.commit(staged).await
    }
}
