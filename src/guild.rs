// guild.rs - One guild's live session
// Owns the guild's document, command table, listener registry and per-guild
// scratch data (burst counters and the like). Module enable/disable stage every
// document change on a copy and persist it in one write before the in-memory
// table and listeners are touched, so a failed write leaves nothing half-applied.

use log::{debug, info, warn};
use serenity::model::id::GuildId;
use serenity::prelude::TypeMap;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::DispatchConfig;
use crate::error::{CommandError, CommandResult};
use crate::events::{GuildEvent, IncomingMessage};
use crate::gateway::{Gateway, GuildSnapshot, Reply};
use crate::listeners::ListenerRegistry;
use crate::module::{CommandContext, ModuleDescriptor, ModuleRegistry};
use crate::resolver;
use crate::state::{GuildState, StateStore, TenantState};
use crate::table::CommandTable;

/// Seeds a module's bag and declared defaults; true when `doc` changed
fn seed_defaults(doc: &mut TenantState, descriptor: &ModuleDescriptor) -> bool {
    let mut changed = !doc.modules.contains_key(descriptor.id);
    doc.modules.entry(descriptor.id.to_string()).or_default();
    for (key, value) in &descriptor.state_defaults {
        changed |= doc.seed_module_property(descriptor.id, key, value.clone());
    }
    changed
}

pub struct GuildSession {
    guild_id: GuildId,
    state: GuildState,
    commands: CommandTable,
    listeners: ListenerRegistry,
    /// Per-guild runtime data for module hooks; never persisted
    pub scratch: TypeMap,
    active: BTreeMap<String, Arc<ModuleDescriptor>>,
    registry: Arc<ModuleRegistry>,
    gateway: Arc<dyn Gateway>,
    config: Arc<DispatchConfig>,
}

impl GuildSession {
    /// Loads the guild's document and re-activates its enabled modules
    pub async fn new(
        guild_id: GuildId,
        store: Arc<StateStore>,
        registry: Arc<ModuleRegistry>,
        gateway: Arc<dyn Gateway>,
        config: Arc<DispatchConfig>,
    ) -> Self {
        let mut state = GuildState::load(store, guild_id).await;

        let mut staged = state.doc().clone();
        if staged.normalize(registry.base_id()) {
            if let Err(e) = state.commit(staged).await {
                warn!("⚠️ Failed to save normalized state for guild {}: {}", guild_id, e);
            }
        }

        let mut session = Self {
            guild_id,
            state,
            commands: CommandTable::new(),
            listeners: ListenerRegistry::new(),
            scratch: TypeMap::new(),
            active: BTreeMap::new(),
            registry,
            gateway,
            config,
        };

        let base = session.registry.base();
        session.apply(&base);

        let enabled = session.state.doc().enabled_modules.clone();
        for module_id in enabled {
            if let Err(e) = session.activate(&module_id).await {
                warn!("⚠️ Skipping module {} in guild {}: {}", module_id, guild_id, e);
            }
        }

        debug!(
            "🏠 Session ready for guild {} ({} commands, {} listeners)",
            guild_id,
            session.commands.len(),
            session.listeners.len()
        );
        session
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn prefix(&self) -> String {
        self.state.doc().prefix_or(&self.config.default_prefix).to_string()
    }

    pub fn state(&self) -> &GuildState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut GuildState {
        &mut self.state
    }

    pub fn commands(&self) -> &CommandTable {
        &self.commands
    }

    pub fn listeners(&self) -> &ListenerRegistry {
        &self.listeners
    }

    pub fn gateway(&self) -> Arc<dyn Gateway> {
        self.gateway.clone()
    }

    pub fn registry(&self) -> &Arc<ModuleRegistry> {
        &self.registry
    }

    pub fn snapshot(&self) -> GuildSnapshot {
        self.gateway.snapshot(self.guild_id)
    }

    pub fn is_active(&self, module_id: &str) -> bool {
        self.active.contains_key(module_id)
    }

    pub fn active_modules(&self) -> Vec<&str> {
        self.active.keys().map(String::as_str).collect()
    }

    pub async fn enable_module(&mut self, module_id: &str) -> CommandResult<()> {
        let module_id = module_id.to_lowercase();
        if module_id == self.registry.base_id() || self.is_active(&module_id) {
            return Err(CommandError::AlreadyEnabled(module_id));
        }
        let descriptor = self
            .registry
            .get(&module_id)
            .ok_or_else(|| CommandError::ModuleNotFound(module_id.clone()))?;

        let missing = descriptor
            .bot_permissions
            .missing_from(&self.snapshot().bot_permissions);
        if !missing.is_empty() {
            return Err(CommandError::InsufficientPermissions(missing));
        }

        let mut staged = self.state.doc().clone();
        seed_defaults(&mut staged, &descriptor);
        staged.push_enabled(&module_id);
        self.state.commit(staged).await?;

        self.apply(&descriptor);
        info!("🧩 Enabled module {} in guild {}", module_id, self.guild_id);
        Ok(())
    }

    pub async fn disable_module(&mut self, module_id: &str) -> CommandResult<()> {
        let module_id = module_id.to_lowercase();
        if module_id == self.registry.base_id() {
            return Err(CommandError::BaseModule);
        }
        if !self.is_active(&module_id) && !self.state.doc().is_enabled(&module_id) {
            return Err(match self.registry.get(&module_id) {
                Some(_) => CommandError::NotEnabled(module_id),
                None => CommandError::ModuleNotFound(module_id),
            });
        }

        let mut staged = self.state.doc().clone();
        staged.remove_enabled(&module_id);
        self.state.commit(staged).await?;

        if let Some(descriptor) = self.active.get(&module_id).cloned() {
            self.retract(&descriptor);
        }
        info!("🧩 Disabled module {} in guild {}", module_id, self.guild_id);
        Ok(())
    }

    /// Re-registers an active module's commands and listeners
    pub async fn reload_module(&mut self, module_id: &str) -> CommandResult<()> {
        let module_id = module_id.to_lowercase();
        let descriptor = match self.active.get(&module_id) {
            Some(descriptor) => descriptor.clone(),
            None if self.registry.get(&module_id).is_none() => {
                return Err(CommandError::ModuleNotFound(module_id))
            }
            None => return Err(CommandError::NotEnabled(module_id)),
        };

        let mut staged = self.state.doc().clone();
        if descriptor.id != self.registry.base_id() && seed_defaults(&mut staged, &descriptor) {
            self.state.commit(staged).await?;
        }

        self.retract(&descriptor);
        self.apply(&descriptor);
        info!("🔄 Reloaded module {} in guild {}", module_id, self.guild_id);
        Ok(())
    }

    /// Brings a module from the stored enabled list back online
    async fn activate(&mut self, module_id: &str) -> CommandResult<()> {
        let descriptor = self
            .registry
            .get(module_id)
            .ok_or_else(|| CommandError::ModuleNotFound(module_id.to_string()))?;

        let missing = descriptor
            .bot_permissions
            .missing_from(&self.snapshot().bot_permissions);
        if !missing.is_empty() {
            return Err(CommandError::InsufficientPermissions(missing));
        }

        let mut staged = self.state.doc().clone();
        if seed_defaults(&mut staged, &descriptor) {
            self.state.commit(staged).await?;
        }
        self.apply(&descriptor);
        Ok(())
    }

    fn apply(&mut self, descriptor: &Arc<ModuleDescriptor>) {
        let contribution = descriptor.contribution();
        for (key, entry) in contribution.commands {
            if let Some(replaced) = self.commands.insert(key.clone(), entry) {
                if replaced.module_id != descriptor.id {
                    warn!(
                        "⚠️ Module {} replaced {} from module {} in guild {}",
                        descriptor.id, key, replaced.module_id, self.guild_id
                    );
                }
            }
        }
        let (summary_key, summary) = contribution.summary;
        if !self.commands.contains(&summary_key) {
            self.commands.insert(summary_key, summary);
        }
        for (kind, handler) in contribution.listeners {
            self.listeners.register(kind, descriptor.id, handler);
        }
        self.active.insert(descriptor.id.to_string(), descriptor.clone());
    }

    fn retract(&mut self, descriptor: &Arc<ModuleDescriptor>) {
        let contribution = descriptor.contribution();
        for key in contribution.keys() {
            self.commands.remove_owned(key, descriptor.id);
        }
        self.listeners.remove_module(descriptor.id);
        self.active.remove(descriptor.id);
    }

    /// Fans the event out to listeners, then dispatches chat commands
    pub async fn handle_event(&mut self, event: &GuildEvent) {
        self.emit(event).await;
        if let GuildEvent::MessageCreate(message) = event {
            self.on_message(message).await;
        }
    }

    /// Runs every listener for the event; one failing listener does not stop the rest
    pub async fn emit(&mut self, event: &GuildEvent) {
        for listener in self.listeners.listeners_for(event.kind()) {
            if let Err(e) = (listener.handler)(self, event).await {
                warn!(
                    "⚠️ {} listener of module {} failed in guild {}: {}",
                    event.kind(),
                    listener.module_id,
                    self.guild_id,
                    e
                );
            }
        }
    }

    async fn on_message(&mut self, message: &IncomingMessage) {
        if message.author_is_bot {
            return;
        }
        let prefix = self.prefix();
        let body = match message.content.strip_prefix(prefix.as_str()) {
            Some(body) if !body.trim().is_empty() => body,
            _ => return,
        };

        let reply = match self.dispatch(message, body).await {
            Ok(text) if text.is_empty() => return,
            Ok(text) => Reply::success(text),
            Err(e) if e.is_silent() => {
                debug!("🤫 Dropped '{}' from {}: {}", message.content, message.author_name, e);
                return;
            }
            Err(e) => {
                warn!("❌ Command '{}' failed in guild {}: {}", message.content, self.guild_id, e);
                Reply::failure(e.to_string())
            }
        };

        if let Err(e) = self.gateway.send_message(message.channel_id, reply).await {
            warn!("⚠️ Failed to send reply in guild {}: {}", self.guild_id, e);
        }
    }

    /// Resolves `body` (input minus prefix), checks permissions and runs the command
    pub async fn dispatch(&mut self, message: &IncomingMessage, body: &str) -> CommandResult<String> {
        let resolution = resolver::resolve(
            &self.commands,
            body,
            message.author_id,
            self.config.developer_id,
        )?;
        if !resolution.overridden {
            resolver::check_permissions(
                &resolution.entry,
                &message.member_permissions,
                message.author_id,
                &self.config,
            )?;
        }

        info!(
            "⚡ {} ran {} in guild {}",
            message.author_name, resolution.key, self.guild_id
        );
        let run = resolution.entry.run;
        let ctx = CommandContext {
            message,
            args: resolution.args,
            module_id: resolution.entry.module_id,
            session: self,
        };
        run(ctx).await
    }
}
