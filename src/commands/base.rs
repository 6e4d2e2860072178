// base.rs - Base Module
// The always-active module: help, ping, module enable/disable, cache clearing
// and guild settings. Every command here is hoisted, so `help` works as well
// as `base help`.
//
// Used by: commands/mod.rs (registered first, as the registry's base module)

// ============================================================================
// IMPORTS
// ============================================================================

use chrono::Utc;
use futures_util::future::BoxFuture;

use crate::error::{CommandError, CommandResult};
use crate::gateway::{Embed, Reply, INFO_COLOUR};
use crate::module::{CommandContext, CommandSpec, ModuleDescriptor};
use crate::permissions::{Permission, PermissionSet};
use crate::table::CommandEntry;

pub const MODULE_ID: &str = "base";

// ============================================================================
// MODULE DESCRIPTOR
// ============================================================================

pub fn module() -> ModuleDescriptor {
    ModuleDescriptor {
        id: MODULE_ID,
        display_name: "Base Commands",
        description: "Base commands for the bot",
        bot_permissions: PermissionSet::new(),
        commands: vec![
            CommandSpec::new("help", "Displays help for a module or command", help).hoisted(),
            CommandSpec::new("ping", "Pings the bot", ping).hoisted(),
            CommandSpec::new("enable", "Enables a module", enable)
                .permissions(&[Permission::ManageGuild])
                .hoisted(),
            CommandSpec::new("disable", "Disables a module", disable)
                .permissions(&[Permission::ManageGuild])
                .hoisted(),
            CommandSpec::new("clear", "Reloads an enabled module's commands and hooks", clear)
                .permissions(&[Permission::Developer])
                .hoisted(),
            CommandSpec::new("set", "Modifies internal settings", set)
                .permissions(&[Permission::ManageGuild])
                .hoisted()
                .subcommand(
                    CommandSpec::new("prefix", "Sets the guild's prefix", set_prefix)
                        .permissions(&[Permission::ManageGuild])
                        .hoisted(),
                ),
        ],
        base_modifiers: Vec::new(),
        event_hooks: Vec::new(),
        state_defaults: Vec::new(),
    }
}

// ============================================================================
// HELP
// ============================================================================

fn module_embed(descriptor: &ModuleDescriptor, loaded: bool) -> Embed {
    let commands = descriptor.command_names();
    Embed::new(descriptor.description)
        .title(format!("{} Module", descriptor.display_name))
        .colour(INFO_COLOUR)
        .field(
            "Commands",
            if commands.is_empty() { "None".to_string() } else { commands.join(", ") },
            true,
        )
        .field("Required Bot Permissions", descriptor.bot_permissions.to_string(), true)
        .field("Currently Loaded", loaded.to_string(), true)
}

fn command_embed(
    name: &str,
    description: &str,
    permissions: &PermissionSet,
    owner: Option<&ModuleDescriptor>,
    loaded: bool,
) -> Embed {
    let module = match owner {
        Some(descriptor) => format!("{} (ID: {})", descriptor.display_name, descriptor.id),
        None => "Base Commands (base)".to_string(),
    };
    Embed::new(description)
        .title(format!("{} Command", name))
        .colour(INFO_COLOUR)
        .field("Module", module, true)
        .field("Permissions Required", permissions.to_string(), true)
        .field("Currently Enabled", loaded.to_string(), true)
}

fn entry_embed(ctx: &CommandContext<'_>, entry: &CommandEntry) -> Embed {
    let owner = ctx.session.registry().get(&entry.module_id);
    command_embed(entry.name, entry.description, &entry.permissions, owner.as_deref(), true)
}

fn help(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let args: Vec<String> = ctx.args.iter().map(|a| a.to_lowercase()).collect();
        let embed = match args.as_slice() {
            [] => {
                let registry = ctx.session.registry().clone();
                let lines: Vec<String> = registry
                    .ids()
                    .filter_map(|id| registry.get(id))
                    .map(|descriptor| {
                        let state = if ctx.session.is_active(descriptor.id) { "enabled" } else { "disabled" };
                        format!("`{}` {} ({})", descriptor.id, descriptor.display_name, state)
                    })
                    .collect();
                Embed::new(lines.join("\n"))
                    .title("Modules")
                    .colour(INFO_COLOUR)
                    .footer(format!("{}help [module] [command]", ctx.session.prefix()))
            }
            [name] => {
                let hoisted = ctx
                    .session
                    .commands()
                    .get(name)
                    .filter(|entry| entry.module_id == MODULE_ID)
                    .cloned();
                match hoisted {
                    Some(entry) => entry_embed(&ctx, &entry),
                    None => {
                        let descriptor = ctx
                            .session
                            .registry()
                            .get(name)
                            .ok_or_else(|| CommandError::validation(format!("Module {} doesn't exist", name)))?;
                        module_embed(&descriptor, ctx.session.is_active(name))
                    }
                }
            }
            [module, command] => {
                let key = format!("{}-{}", module, command);
                match ctx.session.commands().get(&key).cloned() {
                    Some(entry) => entry_embed(&ctx, &entry),
                    None => {
                        let descriptor = ctx
                            .session
                            .registry()
                            .get(module)
                            .ok_or_else(|| CommandError::validation(format!("Can't find module {}", module)))?;
                        let spec = descriptor.find_command(command).ok_or_else(|| {
                            CommandError::validation(format!(
                                "Command {} doesn't exist in module {}",
                                command, module
                            ))
                        })?;
                        command_embed(spec.name, spec.description, &spec.permissions, Some(descriptor.as_ref()), false)
                    }
                }
            }
            _ => {
                return Err(CommandError::validation(
                    "Improper arguments, do `help [module] [command]` or `help [module]`",
                ))
            }
        };

        ctx.session
            .gateway()
            .send_message(ctx.message.channel_id, Reply::embed(embed))
            .await?;
        Ok(String::new())
    })
}

// ============================================================================
// PING
// ============================================================================

fn ping(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let latency = (Utc::now() - ctx.message.timestamp).num_milliseconds().max(0);
        Ok(format!("Pong! (Latency: {}ms)", latency))
    })
}

// ============================================================================
// MODULE LIFECYCLE
// ============================================================================

fn module_arg(ctx: &CommandContext<'_>) -> CommandResult<String> {
    ctx.args
        .first()
        .map(|a| a.to_lowercase())
        .ok_or_else(|| CommandError::validation("Please specify a module."))
}

fn enable(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let module_id = module_arg(&ctx)?;
        ctx.session.enable_module(&module_id).await?;
        Ok(format!("Successfully enabled the {} module", module_id))
    })
}

fn disable(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let module_id = module_arg(&ctx)?;
        ctx.session.disable_module(&module_id).await?;
        Ok(format!("Successfully disabled the {} module", module_id))
    })
}

fn clear(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let module_id = module_arg(&ctx)?;
        if ctx.session.registry().get(&module_id).is_none() {
            return Err(CommandError::ModuleNotFound(module_id));
        }
        if ctx.session.is_active(&module_id) {
            ctx.session.reload_module(&module_id).await?;
        }
        Ok(format!("Cleared cache for {}.", module_id))
    })
}

// ============================================================================
// SETTINGS
// ============================================================================

fn set(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        match ctx.args.first() {
            Some(setting) if ctx.args.len() >= 2 => Err(CommandError::validation(format!(
                "Unknown setting **{}**",
                setting
            ))),
            _ => Err(CommandError::validation("Improper arguments, do `set [setting] [value]`")),
        }
    })
}

fn set_prefix(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let prefix = match ctx.args.as_slice() {
            [prefix] => prefix.clone(),
            _ => {
                return Err(CommandError::validation(
                    "Invalid prefix, make sure you don't have extra spaces!",
                ))
            }
        };
        ctx.session.state_mut().set_prefix(&prefix).await?;
        Ok(format!("Set prefix to **{}**!", prefix))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{message_from, run, session_for, FakeGateway, DEV, MEMBER};
    use crate::events::GuildEvent;

    #[tokio::test]
    async fn test_base_commands_are_hoisted() {
        let dir = tempfile::tempdir().unwrap();
        let session = session_for(&dir, FakeGateway::new()).await;
        for key in ["help", "ping", "enable", "disable", "clear", "set", "set-prefix", "prefix", "base-set-prefix"] {
            assert!(session.commands().contains(key), "missing {}", key);
        }
    }

    #[tokio::test]
    async fn test_set_prefix_persists_and_switches_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FakeGateway::new();
        let mut session = session_for(&dir, gateway.clone()).await;

        let replies = run(&mut session, &gateway, "!set prefix ?").await;
        assert_eq!(replies[0].embed.as_ref().unwrap().description, "Set prefix to **?**!");
        assert_eq!(session.prefix(), "?");

        assert!(run(&mut session, &gateway, "!ping").await.is_empty());
        let replies = run(&mut session, &gateway, "?ping").await;
        assert!(replies[0].embed.as_ref().unwrap().description.starts_with("Pong!"));

        let reloaded = session_for(&dir, gateway.clone()).await;
        assert_eq!(reloaded.prefix(), "?");
    }

    #[tokio::test]
    async fn test_bare_prefix_command_sets_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FakeGateway::new();
        let mut session = session_for(&dir, gateway.clone()).await;

        let replies = run(&mut session, &gateway, "!prefix $").await;
        assert_eq!(replies[0].embed.as_ref().unwrap().description, "Set prefix to **$**!");
        assert_eq!(session.prefix(), "$");
        assert_eq!(session.commands().get("prefix").map(|e| e.module_id.as_str()), Some(MODULE_ID));
    }

    #[tokio::test]
    async fn test_set_without_setting_reports_usage() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FakeGateway::new();
        let mut session = session_for(&dir, gateway.clone()).await;

        let replies = run(&mut session, &gateway, "!set").await;
        assert_eq!(
            replies[0].embed.as_ref().unwrap().description,
            "Improper arguments, do `set [setting] [value]`"
        );
        let replies = run(&mut session, &gateway, "!set colour blue").await;
        assert_eq!(replies[0].embed.as_ref().unwrap().description, "Unknown setting **colour**");
    }

    #[tokio::test]
    async fn test_enable_and_disable_through_chat() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FakeGateway::new();
        let mut session = session_for(&dir, gateway.clone()).await;

        let replies = run(&mut session, &gateway, "!enable FILTER").await;
        assert_eq!(
            replies[0].embed.as_ref().unwrap().description,
            "Successfully enabled the filter module"
        );
        assert!(session.commands().contains("filter-add"));

        let replies = run(&mut session, &gateway, "!disable base").await;
        assert_eq!(
            replies[0].embed.as_ref().unwrap().description,
            "Can't disable the base module, otherwise you can't re-enable it!"
        );

        run(&mut session, &gateway, "!disable filter").await;
        assert!(!session.commands().contains("filter-add"));
    }

    #[tokio::test]
    async fn test_clear_is_developer_only() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FakeGateway::new();
        let mut session = session_for(&dir, gateway.clone()).await;
        session.enable_module("feed").await.unwrap();

        assert!(run(&mut session, &gateway, "!clear feed").await.is_empty());

        gateway.clear();
        session
            .handle_event(&GuildEvent::MessageCreate(message_from(DEV, "!clear feed")))
            .await;
        let sent = gateway.sent();
        assert_eq!(sent[0].embed.as_ref().unwrap().description, "Cleared cache for feed.");
        assert!(session.commands().contains("feed-sub"));
        assert_eq!(session.listeners().len(), 0);
    }

    #[tokio::test]
    async fn test_override_lets_developer_skip_permission_checks() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FakeGateway::new();
        let mut session = session_for(&dir, gateway.clone()).await;

        let mut msg = message_from(DEV, "!o clear base");
        msg.member_permissions = PermissionSet::new();
        session.handle_event(&GuildEvent::MessageCreate(msg)).await;
        assert_eq!(gateway.sent().len(), 1);

        gateway.clear();
        let mut msg = message_from(MEMBER, "!override clear base");
        msg.member_permissions = PermissionSet::new();
        session.handle_event(&GuildEvent::MessageCreate(msg)).await;
        assert!(gateway.sent().is_empty());
    }

    #[tokio::test]
    async fn test_help_renders_module_and_command_embeds() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FakeGateway::new();
        let mut session = session_for(&dir, gateway.clone()).await;

        let replies = run(&mut session, &gateway, "!help filter").await;
        let embed = replies[0].embed.clone().unwrap();
        assert_eq!(embed.title.as_deref(), Some("Filter Manager Module"));
        assert_eq!(embed.colour, INFO_COLOUR);
        assert_eq!(embed.fields[2].value, "false");

        let replies = run(&mut session, &gateway, "!help filter add").await;
        let embed = replies[0].embed.clone().unwrap();
        assert_eq!(embed.title.as_deref(), Some("add Command"));
        assert_eq!(embed.fields[0].value, "Filter Manager (ID: filter)");
        assert_eq!(embed.fields[2].value, "false");

        let replies = run(&mut session, &gateway, "!help ping").await;
        let embed = replies[0].embed.clone().unwrap();
        assert_eq!(embed.title.as_deref(), Some("ping Command"));

        let replies = run(&mut session, &gateway, "!help").await;
        let embed = replies[0].embed.clone().unwrap();
        assert!(embed.description.contains("`alert` Alerts Manager (disabled)"));
        assert!(embed.description.contains("`base` Base Commands (enabled)"));

        let replies = run(&mut session, &gateway, "!help nothing").await;
        assert_eq!(replies[0].embed.as_ref().unwrap().description, "Module nothing doesn't exist");
    }
}
