// feed.rs - Feed Roles Manager Module
// Opt-in announcement roles. Each feed maps a lowercase name to a role and an
// announcement channel; members subscribe themselves, moderators publish to
// the feed by briefly making the role mentionable.

// ============================================================================
// IMPORTS
// ============================================================================

use futures_util::future::BoxFuture;
use log::warn;
use serde::{Deserialize, Serialize};
use serde_json::json;
use serenity::model::id::{ChannelId, RoleId};
use std::collections::BTreeMap;

use crate::error::{CommandError, CommandResult};
use crate::gateway::{Embed, Reply, INFO_COLOUR};
use crate::module::{CommandContext, CommandSpec, ModuleDescriptor};
use crate::permissions::{Permission, PermissionSet};
use crate::state::Bag;

pub const MODULE_ID: &str = "feed";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FeedSettings {
    /// feed name → role id
    #[serde(default)]
    role_name_map: BTreeMap<String, String>,
    /// feed name → announcement channel id
    #[serde(default)]
    role_channel_map: BTreeMap<String, String>,
    #[serde(flatten)]
    extra: Bag,
}

impl FeedSettings {
    fn role(&self, feed: &str) -> Option<RoleId> {
        self.role_name_map.get(feed)?.parse().ok().map(RoleId)
    }

    fn channel(&self, feed: &str) -> Option<ChannelId> {
        self.role_channel_map.get(feed)?.parse().ok().map(ChannelId)
    }

    fn forget(&mut self, feed: &str) {
        self.role_name_map.remove(feed);
        self.role_channel_map.remove(feed);
    }
}

pub fn module() -> ModuleDescriptor {
    let manage_guild = [Permission::ManageGuild];
    ModuleDescriptor {
        id: MODULE_ID,
        display_name: "Feed Roles Manager",
        description: "Manages the creation of assignable roles used for announcements that aren't relevant for the entire server.",
        bot_permissions: PermissionSet::from(&[Permission::ManageRoles][..]),
        commands: vec![
            CommandSpec::new("create", "Creates a new feed role", create).permissions(&manage_guild),
            CommandSpec::new("remove", "Removes a feed without deleting the role", remove)
                .permissions(&manage_guild),
            CommandSpec::new("delete", "Deletes a feed role", delete).permissions(&manage_guild),
            CommandSpec::new("list", "Lists all current feed roles", list).permissions(&manage_guild),
            CommandSpec::new("publish", "Publishes an announcement to the feed", publish)
                .permissions(&[Permission::ManageMessages]),
            CommandSpec::new("move", "Moves a feed's announcement channel to the current channel", move_feed)
                .permissions(&manage_guild),
            CommandSpec::new("sub", "Subscribes to a feed", sub),
            CommandSpec::new("unsub", "Unsubscribes from a feed", unsub),
        ],
        base_modifiers: Vec::new(),
        event_hooks: Vec::new(),
        state_defaults: vec![("roleNameMap", json!({})), ("roleChannelMap", json!({}))],
    }
}

fn feed_arg(ctx: &CommandContext<'_>) -> CommandResult<String> {
    ctx.args
        .first()
        .map(|a| a.to_lowercase())
        .ok_or_else(|| CommandError::validation("Please specify a feed!"))
}

fn settings(ctx: &CommandContext<'_>) -> CommandResult<FeedSettings> {
    Ok(ctx.session.state().module_settings(MODULE_ID)?)
}

// ============================================================================
// FEED MANAGEMENT
// ============================================================================

fn create(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let role_name = ctx
            .args
            .first()
            .cloned()
            .ok_or_else(|| CommandError::validation("Please provide a name for the feed."))?;

        let snapshot = ctx.session.snapshot();
        if let Some((id, existing)) = snapshot
            .roles
            .iter()
            .find(|(_, name)| name.eq_ignore_ascii_case(&role_name))
        {
            return Err(CommandError::validation(format!(
                "Role name {} is too similar to existing role {} ({})",
                role_name, existing, id
            )));
        }

        let mut settings = settings(&ctx)?;
        let role_id = ctx
            .session
            .gateway()
            .create_role(ctx.session.guild_id(), &role_name)
            .await?;

        let feed = role_name.to_lowercase();
        settings.role_name_map.insert(feed.clone(), role_id.0.to_string());
        settings
            .role_channel_map
            .insert(feed, ctx.message.channel_id.0.to_string());
        ctx.session
            .state_mut()
            .save_module_settings(MODULE_ID, &settings)
            .await?;
        Ok(format!(
            "Created new feed role **{}**, you may edit the new role freely.",
            role_name
        ))
    })
}

fn remove(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let feed = feed_arg(&ctx)?;
        let mut settings = settings(&ctx)?;
        if !settings.role_name_map.contains_key(&feed) {
            return Err(CommandError::validation("Feed not found"));
        }
        settings.forget(&feed);
        ctx.session
            .state_mut()
            .save_module_settings(MODULE_ID, &settings)
            .await?;
        Ok(format!("Removed feed **{}**.", feed))
    })
}

fn delete(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let feed = feed_arg(&ctx)?;
        let mut settings = settings(&ctx)?;
        if !settings.role_name_map.contains_key(&feed) {
            return Err(CommandError::validation("Role not found"));
        }

        if let Some(role_id) = settings.role(&feed).filter(|id| ctx.session.snapshot().has_role(*id)) {
            let guild_id = ctx.session.guild_id();
            if let Err(e) = ctx.session.gateway().delete_role(guild_id, role_id).await {
                warn!("⚠️ Failed to delete feed role {} in guild {}: {}", role_id, guild_id, e);
                return Err(CommandError::validation(
                    "Unable to delete feed role, I might be missing permissions, or it may be listed above my role in the role list.",
                ));
            }
        }

        settings.forget(&feed);
        ctx.session
            .state_mut()
            .save_module_settings(MODULE_ID, &settings)
            .await?;
        Ok(format!("Deleted feed role **{}**.", feed))
    })
}

fn list(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let settings = settings(&ctx)?;
        let snapshot = ctx.session.snapshot();

        let mut lines = Vec::new();
        for feed in settings.role_name_map.keys() {
            let role = settings
                .role(feed)
                .and_then(|id| snapshot.roles.get(&id).map(|name| format!("{} (ID: {})", name, id)))
                .unwrap_or_else(|| "No role assigned".to_string());
            let channel = settings
                .channel(feed)
                .and_then(|id| snapshot.channel_name(id).map(|name| format!("{} (ID: {})", name, id)))
                .unwrap_or_else(|| "No channel set".to_string());
            lines.push(format!("__**{}**__", feed));
            lines.push(format!("Role: {}", role));
            lines.push(format!("    Channel: {}", channel));
        }

        let description = if lines.is_empty() { "None".to_string() } else { lines.join("\n") };
        let embed = Embed::new(description).title("Feed Roles").colour(INFO_COLOUR);
        ctx.session
            .gateway()
            .send_message(ctx.message.channel_id, Reply::embed(embed))
            .await?;
        Ok(String::new())
    })
}

fn publish(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        if ctx.args.len() < 2 {
            return Err(CommandError::validation(
                "Not enough information, please provide a feed name and a message to send.",
            ));
        }
        let feed = ctx.args[0].to_lowercase();
        let announcement = ctx.args[1..].join(" ");
        let settings = settings(&ctx)?;
        let snapshot = ctx.session.snapshot();

        let role_id = settings.role(&feed).filter(|id| snapshot.has_role(*id)).ok_or_else(|| {
            CommandError::validation(
                "Role assigned to that feed can't be found, it was probably deleted. Please delete the feed and recreate it.",
            )
        })?;
        let channel_id = settings.channel(&feed).filter(|id| snapshot.has_channel(*id)).ok_or_else(|| {
            CommandError::validation(
                "Channel assigned to that feed can't be found, it was probably deleted. Please delete the feed and recreate it.",
            )
        })?;

        let gateway = ctx.session.gateway();
        let guild_id = ctx.session.guild_id();
        gateway.set_role_mentionable(guild_id, role_id, true).await?;
        let sent = gateway
            .send_message(channel_id, Reply::text(format!("<@&{}>: {}", role_id, announcement)))
            .await;
        gateway.set_role_mentionable(guild_id, role_id, false).await?;
        sent?;
        Ok("Sent message to feed channel successfully.".to_string())
    })
}

fn move_feed(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let feed = feed_arg(&ctx)?;
        let mut settings = settings(&ctx)?;
        if !settings.role_channel_map.contains_key(&feed) {
            return Err(CommandError::validation(
                "Feed role doesn't appear to exist, try creating it.",
            ));
        }
        settings
            .role_channel_map
            .insert(feed, ctx.message.channel_id.0.to_string());
        ctx.session
            .state_mut()
            .save_module_settings(MODULE_ID, &settings)
            .await?;
        Ok("Set feed announcement channel to this channel.".to_string())
    })
}

// ============================================================================
// SUBSCRIPTIONS
// ============================================================================

fn sub(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let feed = feed_arg(&ctx)?;
        let settings = settings(&ctx)?;
        let role_id = settings
            .role(&feed)
            .ok_or_else(|| CommandError::validation("Feed doesn't exist!"))?;
        if !ctx.session.snapshot().has_role(role_id) {
            return Err(CommandError::validation(
                "Feed is not configured properly, the assigned role doesn't exist.",
            ));
        }
        ctx.session
            .gateway()
            .add_member_role(ctx.session.guild_id(), ctx.message.author_id, role_id)
            .await?;
        Ok("Successfully assigned feed role, you can remove it with `unsub`.".to_string())
    })
}

fn unsub(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let feed = feed_arg(&ctx)?;
        let settings = settings(&ctx)?;
        let role_id = settings
            .role(&feed)
            .ok_or_else(|| CommandError::validation("Feed doesn't exist!"))?;
        if !ctx.message.member_roles.contains(&role_id) {
            return Err(CommandError::validation("You aren't subscribed to that feed!"));
        }
        ctx.session
            .gateway()
            .remove_member_role(ctx.session.guild_id(), ctx.message.author_id, role_id)
            .await?;
        Ok("Successfully removed feed role.".to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::GuildEvent;
    use crate::testing::{message, run, session_for, Call, FakeGateway, CHANNEL, MEMBER};

    fn description(replies: &[Reply]) -> String {
        replies[0].embed.as_ref().map(|e| e.description.clone()).unwrap_or_default()
    }

    #[tokio::test]
    async fn test_create_then_subscribe() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FakeGateway::new();
        let mut session = session_for(&dir, gateway.clone()).await;
        session.enable_module("feed").await.unwrap();

        let replies = run(&mut session, &gateway, "!feed create Updates").await;
        assert_eq!(
            description(&replies),
            "Created new feed role **Updates**, you may edit the new role freely."
        );
        let role_id = match gateway.calls().into_iter().find_map(|c| match c {
            Call::CreateRole(name) => Some(name),
            _ => None,
        }) {
            Some(name) => {
                assert_eq!(name, "Updates");
                let settings: FeedSettings = session.state().module_settings(MODULE_ID).unwrap();
                settings.role("updates").unwrap()
            }
            None => panic!("role was not created"),
        };

        let replies = run(&mut session, &gateway, "!feed create updates").await;
        assert!(description(&replies).starts_with("Role name updates is too similar"));

        run(&mut session, &gateway, "!feed sub UPDATES").await;
        assert!(gateway.calls().contains(&Call::AddRole(MEMBER, role_id)));
    }

    #[tokio::test]
    async fn test_publish_toggles_mentionable_around_announcement() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FakeGateway::new();
        let mut session = session_for(&dir, gateway.clone()).await;
        session.enable_module("feed").await.unwrap();
        run(&mut session, &gateway, "!feed create news").await;
        let settings: FeedSettings = session.state().module_settings(MODULE_ID).unwrap();
        let role_id = settings.role("news").unwrap();

        gateway.clear();
        session
            .handle_event(&GuildEvent::MessageCreate(message("!feed publish news Server restart at 5")))
            .await;
        let calls = gateway.calls();
        assert_eq!(calls[0], Call::Mentionable(role_id, true));
        assert_eq!(
            calls[1],
            Call::Send(CHANNEL, Reply::text(format!("<@&{}>: Server restart at 5", role_id)))
        );
        assert_eq!(calls[2], Call::Mentionable(role_id, false));
    }

    #[tokio::test]
    async fn test_unsub_requires_subscription_and_delete_drops_role() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FakeGateway::new();
        let mut session = session_for(&dir, gateway.clone()).await;
        session.enable_module("feed").await.unwrap();
        run(&mut session, &gateway, "!feed create news").await;
        let settings: FeedSettings = session.state().module_settings(MODULE_ID).unwrap();
        let role_id = settings.role("news").unwrap();

        let replies = run(&mut session, &gateway, "!feed unsub news").await;
        assert_eq!(description(&replies), "You aren't subscribed to that feed!");

        gateway.clear();
        let mut msg = message("!feed unsub news");
        msg.member_roles = vec![role_id];
        session.handle_event(&GuildEvent::MessageCreate(msg)).await;
        assert_eq!(gateway.calls()[0], Call::RemoveRole(MEMBER, role_id));

        let replies = run(&mut session, &gateway, "!feed delete news").await;
        assert_eq!(description(&replies), "Deleted feed role **news**.");
        assert!(gateway.calls().contains(&Call::DeleteRole(role_id)));

        let replies = run(&mut session, &gateway, "!feed list").await;
        assert_eq!(replies[0].embed.as_ref().unwrap().description, "None");
    }
}
