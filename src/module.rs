// module.rs - Module descriptors and the static module registry
// A module bundles a command tree, base modifiers (subcommands grafted onto
// another module's command), event hooks and default settings. Descriptors
// are built in code and registered once at startup; nothing is loaded by name
// from user input.

use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

use crate::error::CommandResult;
use crate::events::{EventKind, GuildEvent, IncomingMessage};
use crate::guild::GuildSession;
use crate::permissions::{Permission, PermissionSet};
use crate::table::CommandEntry;

/// Everything a command body gets to work with
pub struct CommandContext<'a> {
    pub message: &'a IncomingMessage,
    /// Unconsumed tokens in their original case
    pub args: Vec<String>,
    /// Module that registered the resolved entry
    pub module_id: String,
    pub session: &'a mut GuildSession,
}

pub type CommandFn = for<'a> fn(CommandContext<'a>) -> BoxFuture<'a, CommandResult<String>>;

pub type EventFn = for<'a> fn(&'a mut GuildSession, &'a GuildEvent) -> BoxFuture<'a, CommandResult<()>>;

#[derive(Clone)]
pub struct CommandSpec {
    pub name: &'static str,
    pub description: &'static str,
    pub permissions: PermissionSet,
    /// Also exposed at the top level under its bare name
    pub hoisted: bool,
    pub run: CommandFn,
    pub subcommands: Vec<CommandSpec>,
}

impl CommandSpec {
    pub fn new(name: &'static str, description: &'static str, run: CommandFn) -> Self {
        Self {
            name,
            description,
            permissions: PermissionSet::new(),
            hoisted: false,
            run,
            subcommands: Vec::new(),
        }
    }

    pub fn permissions(mut self, permissions: &[Permission]) -> Self {
        self.permissions = PermissionSet::from(permissions);
        self
    }

    pub fn hoisted(mut self) -> Self {
        self.hoisted = true;
        self
    }

    pub fn subcommand(mut self, subcommand: CommandSpec) -> Self {
        self.subcommands.push(subcommand);
        self
    }
}

impl fmt::Debug for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandSpec")
            .field("name", &self.name)
            .field("permissions", &self.permissions)
            .field("hoisted", &self.hoisted)
            .field("subcommands", &self.subcommands)
            .finish()
    }
}

pub struct ModuleDescriptor {
    pub id: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub bot_permissions: PermissionSet,
    pub commands: Vec<CommandSpec>,
    /// (target base command, command grafted beneath it)
    pub base_modifiers: Vec<(&'static str, CommandSpec)>,
    pub event_hooks: Vec<(EventKind, EventFn)>,
    pub state_defaults: Vec<(&'static str, Value)>,
}

impl fmt::Debug for ModuleDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleDescriptor")
            .field("id", &self.id)
            .field("commands", &self.commands)
            .field("base_modifiers", &self.base_modifiers)
            .field("event_hooks", &self.event_hooks.iter().map(|(k, _)| *k).collect::<Vec<_>>())
            .finish()
    }
}

/// Table entries and listeners a module adds while it is active
pub struct Contribution {
    pub commands: Vec<(String, CommandEntry)>,
    /// Synthesized `<id>` entry, only applied when that key is free
    pub summary: (String, CommandEntry),
    pub listeners: Vec<(EventKind, EventFn)>,
}

impl Contribution {
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.commands
            .iter()
            .map(|(key, _)| key.as_str())
            .chain(std::iter::once(self.summary.0.as_str()))
    }
}

impl ModuleDescriptor {
    /// Flattens the command tree into path-keyed table entries
    pub fn contribution(&self) -> Contribution {
        let mut commands = Vec::new();
        for spec in &self.commands {
            collect_paths(self.id, &[self.id], spec, &mut commands);
        }
        for (target, spec) in &self.base_modifiers {
            collect_paths(self.id, &[*target], spec, &mut commands);
        }

        let summary = CommandEntry {
            module_id: self.id.to_string(),
            name: self.id,
            description: self.description,
            permissions: PermissionSet::new(),
            run: module_summary,
        };

        Contribution {
            commands,
            summary: (self.id.to_string(), summary),
            listeners: self.event_hooks.clone(),
        }
    }

    pub fn command_names(&self) -> Vec<&'static str> {
        self.commands.iter().map(|c| c.name).collect()
    }

    /// Finds a top-level command of this module by name
    pub fn find_command(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.iter().find(|c| c.name == name)
    }
}

fn collect_paths(
    owner: &'static str,
    ancestors: &[&str],
    spec: &CommandSpec,
    out: &mut Vec<(String, CommandEntry)>,
) {
    let mut path: Vec<&str> = ancestors.to_vec();
    path.push(spec.name);
    let key = path.join("-");
    if !out.iter().any(|(existing, _)| existing == &key) {
        out.push((key, CommandEntry::from_spec(owner, spec)));
    }

    for sub in &spec.subcommands {
        collect_paths(owner, &path, sub, out);
    }

    if spec.hoisted && !ancestors.is_empty() {
        collect_paths(owner, &[], spec, out);
    }
}

/// Text summary of a module, shared by `help` and the synthesized `<id>` command
pub fn describe_module(descriptor: &ModuleDescriptor, loaded: bool) -> String {
    let commands = descriptor.command_names();
    format!(
        "**{} Module** (ID: {})\n{}\n**Commands:** {}\n**Required Bot Permissions:** {}\n**Currently Loaded:** {}",
        descriptor.display_name,
        descriptor.id,
        descriptor.description,
        if commands.is_empty() { "None".to_string() } else { commands.join(", ") },
        descriptor.bot_permissions,
        loaded
    )
}

fn module_summary(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let loaded = ctx.session.is_active(&ctx.module_id);
        Ok(match ctx.session.registry().get(&ctx.module_id) {
            Some(descriptor) => describe_module(&descriptor, loaded),
            None => format!("**{}** module", ctx.module_id),
        })
    })
}

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Module id '{0}' is registered twice")]
    Duplicate(String),

    #[error("Invalid module id '{0}': use lowercase letters and digits only")]
    InvalidId(String),

    #[error("Invalid command name '{name}' in module '{module}'")]
    InvalidCommandName { module: String, name: String },
}

fn valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
}

fn validate_tree(module: &str, spec: &CommandSpec) -> Result<(), RegistryError> {
    if !valid_name(spec.name) {
        return Err(RegistryError::InvalidCommandName {
            module: module.to_string(),
            name: spec.name.to_string(),
        });
    }
    spec.subcommands
        .iter()
        .try_for_each(|sub| validate_tree(module, sub))
}

/// Id → descriptor mapping, validated as modules are registered
pub struct ModuleRegistry {
    base: Arc<ModuleDescriptor>,
    modules: BTreeMap<&'static str, Arc<ModuleDescriptor>>,
}

impl ModuleRegistry {
    /// Creates a registry around the always-active base module
    pub fn new(base: ModuleDescriptor) -> Result<Self, RegistryError> {
        let mut modules = BTreeMap::new();
        let base = Self::validated(base, &modules)?;
        modules.insert(base.id, base.clone());
        Ok(Self { base, modules })
    }

    pub fn register(&mut self, descriptor: ModuleDescriptor) -> Result<(), RegistryError> {
        let descriptor = Self::validated(descriptor, &self.modules)?;
        self.modules.insert(descriptor.id, descriptor);
        Ok(())
    }

    fn validated(
        descriptor: ModuleDescriptor,
        existing: &BTreeMap<&'static str, Arc<ModuleDescriptor>>,
    ) -> Result<Arc<ModuleDescriptor>, RegistryError> {
        if !valid_name(descriptor.id) {
            return Err(RegistryError::InvalidId(descriptor.id.to_string()));
        }
        if existing.contains_key(descriptor.id) {
            return Err(RegistryError::Duplicate(descriptor.id.to_string()));
        }
        for spec in &descriptor.commands {
            validate_tree(descriptor.id, spec)?;
        }
        for (target, spec) in &descriptor.base_modifiers {
            if !valid_name(target) {
                return Err(RegistryError::InvalidCommandName {
                    module: descriptor.id.to_string(),
                    name: target.to_string(),
                });
            }
            validate_tree(descriptor.id, spec)?;
        }
        Ok(Arc::new(descriptor))
    }

    pub fn get(&self, id: &str) -> Option<Arc<ModuleDescriptor>> {
        self.modules.get(id).cloned()
    }

    pub fn base_id(&self) -> &'static str {
        self.base.id
    }

    pub fn base(&self) -> Arc<ModuleDescriptor> {
        self.base.clone()
    }

    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.modules.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }
}
