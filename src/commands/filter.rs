// filter.rs - Filter Manager Module
// Keeps a phrase blacklist, globally and per channel, and deletes any message
// containing a listed phrase. Members who can manage messages are exempt.
//
// Commands: filter add|remove|show [<#channel>...] <phrase>

// ============================================================================
// IMPORTS
// ============================================================================

use futures_util::future::BoxFuture;
use log::{debug, warn};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::json;
use serenity::model::id::ChannelId;
use std::collections::BTreeMap;

use crate::error::{CommandError, CommandResult};
use crate::events::{EventKind, GuildEvent};
use crate::gateway::Reply;
use crate::guild::GuildSession;
use crate::module::{CommandContext, CommandSpec, EventFn, ModuleDescriptor};
use crate::permissions::{Permission, PermissionSet};
use crate::state::Bag;

pub const MODULE_ID: &str = "filter";
const GLOBAL: &str = "global";
const LOG_EXCERPT_CHARS: usize = 1000;

static CHANNEL_MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^<#(\d{16,20})>$").expect("channel mention pattern is valid"));

// ============================================================================
// SETTINGS
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilterSettings {
    /// "global" or a channel id → phrases
    #[serde(default)]
    blacklist: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    log_channel: String,
    #[serde(flatten)]
    extra: Bag,
}

impl FilterSettings {
    /// First blacklisted phrase found in `content`, global list first
    fn find_phrase(&self, channel_id: ChannelId, content: &str) -> Option<&str> {
        let content = content.to_lowercase();
        let channel_key = channel_id.0.to_string();
        let found = [GLOBAL, channel_key.as_str()]
            .into_iter()
            .filter_map(|key| self.blacklist.get(key))
            .flatten()
            .find(|phrase| !phrase.is_empty() && content.contains(&phrase.to_lowercase()))
            .map(String::as_str);
        found
    }
}

pub fn module() -> ModuleDescriptor {
    let manage_channels = [Permission::ManageChannels];
    ModuleDescriptor {
        id: MODULE_ID,
        display_name: "Filter Manager",
        description: "Manages the filter system",
        bot_permissions: PermissionSet::from(&[Permission::ManageMessages][..]),
        commands: vec![
            CommandSpec::new("add", "Adds the phrase to the filter", add).permissions(&manage_channels),
            CommandSpec::new("remove", "Removes the phrase from the filter", remove)
                .permissions(&manage_channels),
            CommandSpec::new("show", "Shows the words on the blacklist", show).permissions(&manage_channels),
        ],
        base_modifiers: Vec::new(),
        event_hooks: vec![(EventKind::MessageCreate, on_message as EventFn)],
        state_defaults: vec![
            ("blacklist", json!({ "global": [] })),
            ("logChannel", json!("")),
            ("filterActions", json!({ "blacklist": "delete" })),
        ],
    }
}

/// Splits leading `<#channel>` mentions off the arguments
fn split_channels(args: &[String]) -> (Vec<String>, String) {
    let mut channels = Vec::new();
    let mut rest = args;
    while let Some((first, tail)) = rest.split_first() {
        match CHANNEL_MENTION.captures(first) {
            Some(caps) => {
                channels.push(caps[1].to_string());
                rest = tail;
            }
            None => break,
        }
    }
    (channels, rest.join(" "))
}

fn plural(n: usize) -> &'static str {
    if n > 1 {
        "s"
    } else {
        ""
    }
}

fn contains_phrase(list: &[String], phrase: &str) -> Option<usize> {
    let phrase = phrase.to_lowercase();
    list.iter().position(|p| p.to_lowercase() == phrase)
}

// ============================================================================
// COMMANDS
// ============================================================================

fn add(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let (channels, phrase) = split_channels(&ctx.args);
        if phrase.is_empty() {
            return Err(CommandError::validation("Please provide a phrase to filter."));
        }
        let mut settings: FilterSettings = ctx.session.state().module_settings(MODULE_ID)?;

        let reply = if channels.is_empty() {
            let global = settings.blacklist.entry(GLOBAL.to_string()).or_default();
            if contains_phrase(global, &phrase).is_some() {
                return Err(CommandError::validation(format!("Phrase **{}** already on blacklist", phrase)));
            }
            global.push(phrase.clone());
            format!("Phrase **{}** added to global filter", phrase)
        } else {
            let (mut added, mut existing) = (0, 0);
            for channel in &channels {
                let list = settings.blacklist.entry(channel.clone()).or_default();
                if contains_phrase(list, &phrase).is_some() {
                    existing += 1;
                } else {
                    list.push(phrase.clone());
                    added += 1;
                }
            }
            if added == 0 {
                return Err(CommandError::validation(format!(
                    "You provided {} channel{} that **{}** is already on.",
                    existing,
                    plural(existing),
                    phrase
                )));
            }
            let mut reply = format!(
                "Phrase **{}** added to {} channel filter{}.",
                phrase,
                added,
                plural(added)
            );
            if existing > 0 {
                reply.push_str(&format!(
                    " You provided {} channel{} that it is already on.",
                    existing,
                    plural(existing)
                ));
            }
            reply
        };

        ctx.session
            .state_mut()
            .save_module_settings(MODULE_ID, &settings)
            .await?;
        Ok(reply)
    })
}

fn remove(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let (channels, phrase) = split_channels(&ctx.args);
        let mut settings: FilterSettings = ctx.session.state().module_settings(MODULE_ID)?;

        let reply = if channels.is_empty() {
            let global = settings.blacklist.entry(GLOBAL.to_string()).or_default();
            let index = contains_phrase(global, &phrase).ok_or_else(|| {
                CommandError::validation(format!("Phrase **{}** not on the global filter", phrase))
            })?;
            global.remove(index);
            format!("Phrase **{}** removed from filter", phrase)
        } else {
            let mut removed = 0;
            for channel in &channels {
                if let Some(list) = settings.blacklist.get_mut(channel) {
                    if let Some(index) = contains_phrase(list, &phrase) {
                        list.remove(index);
                        removed += 1;
                    }
                }
            }
            if removed == 0 {
                return Err(CommandError::validation(format!(
                    "Phrase **{}** not on any provided filter",
                    phrase
                )));
            }
            format!("Phrase **{}** removed from {} filter{}", phrase, removed, plural(removed))
        };

        ctx.session
            .state_mut()
            .save_module_settings(MODULE_ID, &settings)
            .await?;
        Ok(reply)
    })
}

fn numbered(lines: &mut Vec<String>, phrases: &[String]) {
    lines.extend(phrases.iter().enumerate().map(|(i, p)| format!("[{}] {}", i + 1, p)));
}

fn show(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let settings: FilterSettings = ctx.session.state().module_settings(MODULE_ID)?;
        let snapshot = ctx.session.snapshot();

        let mut lines = vec!["**Global Blacklist**".to_string()];
        match settings.blacklist.get(GLOBAL) {
            Some(global) if !global.is_empty() => numbered(&mut lines, global),
            _ => lines.push("*Nothing*".to_string()),
        }
        for (channel, phrases) in &settings.blacklist {
            if channel == GLOBAL || phrases.is_empty() {
                continue;
            }
            let name = channel
                .parse::<u64>()
                .ok()
                .and_then(|id| snapshot.channel_name(ChannelId(id)))
                .unwrap_or(channel.as_str());
            lines.push(format!("**{}**", name));
            numbered(&mut lines, phrases);
        }
        Ok(lines.join("\n"))
    })
}

// ============================================================================
// EVENT HOOKS
// ============================================================================

fn on_message<'a>(session: &'a mut GuildSession, event: &'a GuildEvent) -> BoxFuture<'a, CommandResult<()>> {
    Box::pin(async move {
        let message = match event {
            GuildEvent::MessageCreate(message) => message,
            _ => return Ok(()),
        };
        if message.author_is_bot || message.member_permissions.contains(Permission::ManageMessages) {
            return Ok(());
        }

        let settings: FilterSettings = session.state().module_settings(MODULE_ID)?;
        let phrase = match settings.find_phrase(message.channel_id, &message.content) {
            Some(phrase) => phrase.to_string(),
            None => return Ok(()),
        };

        debug!("🔨 Filter hit '{}' on message {} in guild {}", phrase, message.id, message.guild_id);
        let gateway = session.gateway();
        if let Err(e) = gateway.delete_message(message.channel_id, message.id).await {
            warn!("⚠️ Failed to delete filtered message {}: {}", message.id, e);
        }

        let log_channel = match settings.log_channel.parse::<u64>() {
            Ok(id) if session.snapshot().has_channel(ChannelId(id)) => ChannelId(id),
            _ => return Ok(()),
        };
        let excerpt: String = message.content.chars().take(LOG_EXCERPT_CHARS).collect();
        let ellipsis = if message.content.chars().count() > LOG_EXCERPT_CHARS { "..." } else { "" };
        let log = format!(
            ":hammer: <@{}> triggered filter on message **{}**\n**Phrase:** {}\n**Content:**\n{}{}",
            message.author_id, message.id, phrase, excerpt, ellipsis
        );
        gateway.send_message(log_channel, Reply::text(log)).await?;
        Ok(())
    })
}
