// alert.rs - Alerts Manager Module
// Raises moderator alerts in a configured channel:
//   watchlist  - a message contains a watched term
//   massjoin   - members are joining faster than usual
//   newaccount - a joining account is less than a week old
//
// Message alerts get 🗑 / ✅ reactions; a moderator reacting resolves the alert
// (deleting or ignoring the offending message) and the alert embed is edited
// to show the action taken. Join-burst counters live in the guild session's
// scratch map, so guilds never share them.

// ============================================================================
// IMPORTS
// ============================================================================

use chrono::{DateTime, Duration, Utc};
use futures_util::future::BoxFuture;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;
use serenity::model::id::{ChannelId, MessageId};
use serenity::prelude::TypeMapKey;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;
use std::str::FromStr;

use crate::error::{CommandError, CommandResult};
use crate::events::{DeletedMessage, EventKind, GuildEvent, IncomingMessage, MemberJoined, ReactionAdded};
use crate::gateway::{Embed, Reply};
use crate::guild::GuildSession;
use crate::module::{CommandContext, CommandSpec, EventFn, ModuleDescriptor};
use crate::permissions::{Permission, PermissionSet};
use crate::state::Bag;

pub const MODULE_ID: &str = "alert";

const REACTION_DELETE: &str = "🗑";
const REACTION_CLEAR: &str = "✅";

const COLOUR_INFO: u32 = 0x6666ff;
const COLOUR_RESOLVED: u32 = 0x00ff00;
const COLOUR_DELETE: u32 = 0xff0000;
const COLOUR_ALERT: u32 = 0xffff00;

const MEMBER_WINDOW_WIDTH: usize = 20;
const CRITICAL_MEMBER_DELAY_MS: f64 = 45_000.0;
const MEMBER_ALERT_COOLDOWN_MINUTES: i64 = 60;
const NEW_ACCOUNT_DAYS: i64 = 7;
const MEDIAN_CAP: f64 = 1.5;

const JUMP_LINK_BASE: &str = "https://discordapp.com/channels";

// ============================================================================
// ALERT KINDS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AlertKind {
    Watchlist,
    MassJoin,
    NewAccount,
}

/// Which event an alert kind is evaluated on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Trigger {
    Message,
    Member,
}

impl AlertKind {
    fn name(&self) -> &'static str {
        match self {
            AlertKind::Watchlist => "watchlist",
            AlertKind::MassJoin => "massjoin",
            AlertKind::NewAccount => "newaccount",
        }
    }

    fn trigger(&self) -> Trigger {
        match self {
            AlertKind::Watchlist => Trigger::Message,
            AlertKind::MassJoin | AlertKind::NewAccount => Trigger::Member,
        }
    }
}

impl fmt::Display for AlertKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for AlertKind {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "watchlist" => Ok(AlertKind::Watchlist),
            "massjoin" => Ok(AlertKind::MassJoin),
            "newaccount" => Ok(AlertKind::NewAccount),
            other => Err(CommandError::validation(format!("Alert **{}** not found.", other))),
        }
    }
}

// ============================================================================
// SETTINGS
// ============================================================================

/// An alert awaiting a moderator decision, keyed by the alert message id
#[derive(Debug, Clone, Serialize, Deserialize)]
struct AlertRecord {
    /// Channel of the offending message
    channel: String,
    /// Offending message id
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    embed: Option<Embed>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AlertSettings {
    #[serde(default)]
    enabled_alerts: Vec<String>,
    #[serde(default)]
    alert_channel: String,
    #[serde(default)]
    watchlist: Vec<String>,
    #[serde(default)]
    unresolved_alerts: BTreeMap<String, AlertRecord>,
    /// offending message id → alert message id
    #[serde(default)]
    message_alert_map: BTreeMap<String, String>,
    #[serde(flatten)]
    extra: Bag,
}

impl AlertSettings {
    fn alert_channel(&self) -> Option<ChannelId> {
        self.alert_channel.parse().ok().map(ChannelId)
    }

    fn enabled(&self, trigger: Trigger) -> Vec<AlertKind> {
        self.enabled_alerts
            .iter()
            .filter_map(|name| name.parse::<AlertKind>().ok())
            .filter(|kind| kind.trigger() == trigger)
            .collect()
    }

    fn watched_term(&self, content: &str) -> Option<&str> {
        let content = content.to_lowercase();
        self.watchlist
            .iter()
            .find(|term| !term.is_empty() && content.contains(term.as_str()))
            .map(String::as_str)
    }

    /// Drops an alert and its reverse mapping; returns the record if it existed
    fn clear(&mut self, alert_id: &str) -> Option<AlertRecord> {
        let record = self.unresolved_alerts.remove(alert_id)?;
        self.message_alert_map.remove(&record.id);
        Some(record)
    }
}

fn load_settings(session: &GuildSession) -> CommandResult<AlertSettings> {
    Ok(session.state().module_settings(MODULE_ID)?)
}

async fn save_settings(session: &mut GuildSession, settings: &AlertSettings) -> CommandResult<()> {
    session
        .state_mut()
        .save_module_settings(MODULE_ID, settings)
        .await?;
    Ok(())
}

// ============================================================================
// JOIN BURST TRACKING
// ============================================================================

/// Recent join delays for one guild
#[derive(Debug, Default)]
pub struct JoinTracker {
    delays_ms: VecDeque<f64>,
    last_join: Option<DateTime<Utc>>,
    last_alert: Option<DateTime<Utc>>,
}

pub struct JoinTrackerKey;

impl TypeMapKey for JoinTrackerKey {
    type Value = JoinTracker;
}

impl JoinTracker {
    /// Records a join; returns the mean join delay when a mass-join alert is due
    pub fn record(&mut self, at: DateTime<Utc>) -> Option<f64> {
        if let Some(last) = self.last_join {
            self.delays_ms
                .push_back((at - last).num_milliseconds().max(0) as f64);
            if self.delays_ms.len() > MEMBER_WINDOW_WIDTH {
                self.delays_ms.pop_front();
            }
        }
        self.last_join = Some(at);

        if self.delays_ms.len() < MEMBER_WINDOW_WIDTH / 2 {
            return None;
        }
        let sample: Vec<f64> = self.delays_ms.iter().copied().collect();
        let mean_delay = capped_mean(&sample, MEDIAN_CAP);
        if mean_delay >= CRITICAL_MEMBER_DELAY_MS {
            return None;
        }
        if let Some(last_alert) = self.last_alert {
            if at - last_alert <= Duration::minutes(MEMBER_ALERT_COOLDOWN_MINUTES) {
                return None;
            }
        }
        self.last_alert = Some(at);
        Some(mean_delay)
    }
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let len = sorted.len();
    if len == 0 {
        0.0
    } else if len % 2 == 1 {
        sorted[len / 2]
    } else {
        (sorted[len / 2 - 1] + sorted[len / 2]) / 2.0
    }
}

/// Mean after capping every value at `multiplier` times the median
fn capped_mean(values: &[f64], multiplier: f64) -> f64 {
    let cap = median(values) * multiplier;
    let capped: Vec<f64> = values.iter().map(|v| v.min(cap)).collect();
    mean(&capped)
}

/// Rough human wording for a duration, e.g. "3 days"
fn humanize(duration: Duration) -> String {
    let secs = duration.num_seconds().max(0);
    let rounded = |unit: i64| ((secs as f64) / (unit as f64)).round() as i64;
    match secs {
        s if s < 45 => "a few seconds".to_string(),
        s if s < 90 => "a minute".to_string(),
        s if s < 45 * 60 => format!("{} minutes", rounded(60)),
        s if s < 90 * 60 => "an hour".to_string(),
        s if s < 22 * 3600 => format!("{} hours", rounded(3600)),
        s if s < 36 * 3600 => "a day".to_string(),
        _ => format!("{} days", rounded(86400)),
    }
}

// ============================================================================
// MODULE DESCRIPTOR
// ============================================================================

pub fn module() -> ModuleDescriptor {
    let manage_guild = [Permission::ManageGuild];
    let manage_messages = [Permission::ManageMessages];
    ModuleDescriptor {
        id: MODULE_ID,
        display_name: "Alerts Manager",
        description: "Manages configurable alerts and dispatches them to the specified channel",
        bot_permissions: PermissionSet::from(&manage_messages[..]),
        commands: vec![
            CommandSpec::new("watch", "Watches for a term or phrase.", watch).permissions(&manage_guild),
            CommandSpec::new("unwatch", "Removes a term from the watchlist.", unwatch).permissions(&manage_guild),
            CommandSpec::new("enable", "Enables an alert for the server.", enable_alert)
                .permissions(&manage_guild),
            CommandSpec::new("disable", "Disables an alert for the server.", disable_alert)
                .permissions(&manage_guild),
            CommandSpec::new("watchlist", "Lists every word currently on the watchlist", watchlist)
                .permissions(&manage_messages),
            CommandSpec::new("count", "Posts how many unresolved alerts there are", count)
                .permissions(&manage_messages),
            CommandSpec::new("list", "Lists current unresolved alerts", list).permissions(&manage_messages),
        ],
        base_modifiers: vec![(
            "set",
            CommandSpec::new("alert", "Sets the current channel as the alerts channel", set_alert_channel)
                .permissions(&manage_guild),
        )],
        event_hooks: vec![
            (EventKind::MessageCreate, on_message as EventFn),
            (EventKind::ReactionAdd, on_reaction as EventFn),
            (EventKind::MessageDelete, on_message_delete as EventFn),
            (EventKind::MemberAdd, on_member_add as EventFn),
        ],
        state_defaults: vec![
            ("enabledAlerts", json!(["watchlist"])),
            ("alertChannel", json!("")),
            ("watchlist", json!([])),
            ("unresolvedAlerts", json!({})),
            ("messageAlertMap", json!({})),
        ],
    }
}

// ============================================================================
// COMMANDS
// ============================================================================

fn set_alert_channel(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let mut settings = load_settings(ctx.session)?;
        settings.alert_channel = ctx.message.channel_id.0.to_string();
        save_settings(ctx.session, &settings).await?;
        Ok("Set the current channel as the alerts channel.".to_string())
    })
}

fn term_arg(ctx: &CommandContext<'_>) -> CommandResult<String> {
    let term = ctx.args.join(" ").to_lowercase();
    if term.is_empty() {
        return Err(CommandError::validation("Please provide a term or phrase."));
    }
    Ok(term)
}

fn watch(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let term = term_arg(&ctx)?;
        let mut settings = load_settings(ctx.session)?;
        if settings.watchlist.contains(&term) {
            return Err(CommandError::validation(format!("{} is already on the watchlist.", term)));
        }
        settings.watchlist.push(term.clone());
        save_settings(ctx.session, &settings).await?;
        Ok(format!("Added {} to the watchlist.", term))
    })
}

fn unwatch(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let term = term_arg(&ctx)?;
        let mut settings = load_settings(ctx.session)?;
        match settings.watchlist.iter().position(|t| *t == term) {
            Some(index) => {
                settings.watchlist.remove(index);
                save_settings(ctx.session, &settings).await?;
                Ok(format!("Removed {} from the watchlist.", term))
            }
            None => Ok(format!("Couldn't find {} in the watchlist.", term)),
        }
    })
}

fn kind_arg(ctx: &CommandContext<'_>) -> CommandResult<AlertKind> {
    ctx.args
        .first()
        .ok_or_else(|| CommandError::validation("Please specify an alert."))?
        .parse()
}

fn enable_alert(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let kind = kind_arg(&ctx)?;
        let mut settings = load_settings(ctx.session)?;
        if settings.enabled_alerts.iter().any(|a| a == kind.name()) {
            return Err(CommandError::validation("Alert is already enabled!"));
        }
        settings.enabled_alerts.push(kind.name().to_string());
        save_settings(ctx.session, &settings).await?;
        Ok(format!("Successfully enabled **{}** alert!", kind))
    })
}

fn disable_alert(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let kind = kind_arg(&ctx)?;
        let mut settings = load_settings(ctx.session)?;
        let before = settings.enabled_alerts.len();
        settings.enabled_alerts.retain(|a| a != kind.name());
        if settings.enabled_alerts.len() == before {
            return Err(CommandError::validation("Alert is already disabled!"));
        }
        save_settings(ctx.session, &settings).await?;
        Ok(format!("Successfully disabled **{}** alert!", kind))
    })
}

fn watchlist(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let settings = load_settings(ctx.session)?;
        let body = if settings.watchlist.is_empty() {
            "*Nothing*".to_string()
        } else {
            settings.watchlist.join("\n")
        };
        Ok(format!("**Current Watchlist**\n{}", body))
    })
}

fn count(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let settings = load_settings(ctx.session)?;
        Ok(format!(
            "There are currently **{}** unresolved alerts.",
            settings.unresolved_alerts.len()
        ))
    })
}

fn list(ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move {
        let settings = load_settings(ctx.session)?;
        let mut alert_ids: Vec<u64> = settings
            .unresolved_alerts
            .keys()
            .filter_map(|id| id.parse().ok())
            .collect();
        if alert_ids.is_empty() {
            return Ok("*No alerts currently*".to_string());
        }
        // Snowflakes grow over time, so ascending ids list the oldest first
        alert_ids.sort_unstable();

        let limit = ctx
            .args
            .first()
            .and_then(|a| a.parse::<f64>().ok())
            .filter(|n| *n >= 1.0)
            .map_or(alert_ids.len(), |n| n.floor() as usize);
        let links: Vec<String> = alert_ids
            .iter()
            .take(limit)
            .map(|id| {
                format!(
                    "Link: <{}/{}/{}/{}>",
                    JUMP_LINK_BASE,
                    ctx.session.guild_id(),
                    settings.alert_channel,
                    id
                )
            })
            .collect();
        Ok(format!("**Unresolved Alerts** (oldest listed first)\n{}", links.join("\n")))
    })
}

// ============================================================================
// MESSAGE ALERTS
// ============================================================================

fn message_alert_embed(session: &GuildSession, message: &IncomingMessage, triggered: &[AlertKind], terms: &[String]) -> Embed {
    let plural = triggered.len() > 1;
    let label = if plural { "Alerts" } else { "Alert" };
    let channel_name = session
        .snapshot()
        .channel_name(message.channel_id)
        .map(str::to_string)
        .unwrap_or_else(|| message.channel_id.to_string());
    let jump_link = format!(
        "{}/{}/{}/{}",
        JUMP_LINK_BASE, message.guild_id, message.channel_id, message.id
    );
    let names: Vec<&str> = triggered.iter().map(AlertKind::name).collect();

    let mut embed = Embed::new(format!("**Text:** {}", message.content))
        .title(format!("{} Triggered", label))
        .colour(COLOUR_ALERT)
        .field("Channel", channel_name, true)
        .field("Jump Link", jump_link, false)
        .field("Author", format!("{} (ID: {})", message.author_name, message.author_id), true)
        .field(format!("Triggered {}", label), names.join(", "), true)
        .footer(format!("Timestamp: {}", message.timestamp.to_rfc2822()));
    if !terms.is_empty() {
        embed = embed.field("Blocked Terms Found", terms.join(", "), true);
    }
    embed
}

fn on_message<'a>(session: &'a mut GuildSession, event: &'a GuildEvent) -> BoxFuture<'a, CommandResult<()>> {
    Box::pin(async move {
        let message = match event {
            GuildEvent::MessageCreate(message) => message,
            _ => return Ok(()),
        };
        if message.author_is_bot || message.member_permissions.contains(Permission::ManageMessages) {
            return Ok(());
        }

        let mut settings = load_settings(session)?;
        let alert_channel = match settings.alert_channel() {
            Some(channel) if session.snapshot().has_channel(channel) => channel,
            _ => return Ok(()),
        };

        let mut triggered = Vec::new();
        let mut terms = Vec::new();
        for kind in settings.enabled(Trigger::Message) {
            if kind == AlertKind::Watchlist {
                if let Some(term) = settings.watched_term(&message.content) {
                    triggered.push(kind);
                    terms.push(term.to_string());
                }
            }
        }
        if triggered.is_empty() {
            return Ok(());
        }

        let embed = message_alert_embed(session, message, &triggered, &terms);
        let gateway = session.gateway();
        let alert_id = gateway
            .send_message(alert_channel, Reply::embed(embed.clone()))
            .await?;
        debug!("🚨 Raised alert {} for message {} in guild {}", alert_id, message.id, message.guild_id);

        settings.unresolved_alerts.insert(
            alert_id.0.to_string(),
            AlertRecord {
                channel: message.channel_id.0.to_string(),
                id: message.id.0.to_string(),
                embed: Some(embed),
            },
        );
        settings
            .message_alert_map
            .insert(message.id.0.to_string(), alert_id.0.to_string());
        save_settings(session, &settings).await?;

        for emoji in [REACTION_DELETE, REACTION_CLEAR] {
            if let Err(e) = gateway.add_reaction(alert_channel, alert_id, emoji).await {
                warn!("⚠️ Failed to react {} on alert {}: {}", emoji, alert_id, e);
            }
        }
        Ok(())
    })
}

/// Marks an alert embed resolved and edits it in place
async fn resolve_alert(
    session: &GuildSession,
    alert_channel: ChannelId,
    alert_id: MessageId,
    record: &AlertRecord,
    deleted: bool,
) -> CommandResult<()> {
    let mut embed = match record.embed.clone() {
        Some(embed) => embed,
        None => return Ok(()),
    };
    let (action, colour) = if deleted {
        ("Message was deleted", COLOUR_DELETE)
    } else {
        ("Message was ignored", COLOUR_RESOLVED)
    };
    embed.title = embed.title.map(|t| t.replace("Triggered", "Resolved"));
    embed = embed.colour(colour).field("Action Taken", action, true);
    session
        .gateway()
        .edit_message(alert_channel, alert_id, Reply::embed(embed))
        .await?;
    Ok(())
}

fn normalize_emoji(emoji: &str) -> &str {
    emoji.trim_end_matches('\u{fe0f}')
}

fn on_reaction<'a>(session: &'a mut GuildSession, event: &'a GuildEvent) -> BoxFuture<'a, CommandResult<()>> {
    Box::pin(async move {
        let reaction: &ReactionAdded = match event {
            GuildEvent::ReactionAdd(reaction) => reaction,
            _ => return Ok(()),
        };
        let emoji = normalize_emoji(&reaction.emoji);
        let deleted = if emoji == normalize_emoji(REACTION_DELETE) {
            true
        } else if emoji == normalize_emoji(REACTION_CLEAR) {
            false
        } else {
            return Ok(());
        };
        if reaction.user_id == session.snapshot().bot_user_id
            || !reaction.member_permissions.contains(Permission::ManageMessages)
        {
            return Ok(());
        }

        let mut settings = load_settings(session)?;
        let alert_key = reaction.message_id.0.to_string();
        let record = match settings.clear(&alert_key) {
            Some(record) => record,
            None => return Ok(()),
        };
        save_settings(session, &settings).await?;

        if deleted {
            if let (Ok(channel), Ok(id)) = (record.channel.parse::<u64>(), record.id.parse::<u64>()) {
                // The message may already be gone; nothing to do then
                if let Err(e) = session
                    .gateway()
                    .delete_message(ChannelId(channel), MessageId(id))
                    .await
                {
                    debug!("🗑️ Could not delete alerted message {}: {}", id, e);
                }
            }
        }
        resolve_alert(session, reaction.channel_id, reaction.message_id, &record, deleted).await
    })
}

fn on_message_delete<'a>(session: &'a mut GuildSession, event: &'a GuildEvent) -> BoxFuture<'a, CommandResult<()>> {
    Box::pin(async move {
        let deleted: &DeletedMessage = match event {
            GuildEvent::MessageDelete(deleted) => deleted,
            _ => return Ok(()),
        };
        let mut settings = load_settings(session)?;
        let alert_key = match settings.message_alert_map.get(&deleted.id.0.to_string()) {
            Some(alert_id) => alert_id.clone(),
            None => return Ok(()),
        };
        debug!(
            "🗑️ Alerted message {} was deleted from channel {} in guild {}",
            deleted.id, deleted.channel_id, deleted.guild_id
        );
        let (alert_channel, alert_id) = match (settings.alert_channel(), alert_key.parse::<u64>()) {
            (Some(channel), Ok(id)) => (channel, MessageId(id)),
            _ => return Ok(()),
        };
        let record = match settings.clear(&alert_key) {
            Some(record) => record,
            None => return Ok(()),
        };
        save_settings(session, &settings).await?;
        resolve_alert(session, alert_channel, alert_id, &record, true).await
    })
}

// ============================================================================
// MEMBER ALERTS
// ============================================================================

fn on_member_add<'a>(session: &'a mut GuildSession, event: &'a GuildEvent) -> BoxFuture<'a, CommandResult<()>> {
    Box::pin(async move {
        let member: &MemberJoined = match event {
            GuildEvent::MemberAdd(member) => member,
            _ => return Ok(()),
        };
        let settings = load_settings(session)?;
        let alert_channel = match settings.alert_channel() {
            Some(channel) if session.snapshot().has_channel(channel) => channel,
            _ => return Ok(()),
        };
        let gateway = session.gateway();

        let mut triggered = Vec::new();
        let mut details = Vec::new();
        for kind in settings.enabled(Trigger::Member) {
            match kind {
                AlertKind::MassJoin => {
                    let due = session
                        .scratch
                        .entry::<JoinTrackerKey>()
                        .or_insert_with(JoinTracker::default)
                        .record(member.joined_at);
                    if let Some(mean_delay) = due {
                        let embed = Embed::new(format!(
                            "Average of most recent {} delays is {}ms per join",
                            MEMBER_WINDOW_WIDTH,
                            mean_delay.floor() as i64
                        ))
                        .title("Mass Join Alert")
                        .colour(COLOUR_INFO);
                        gateway.send_message(alert_channel, Reply::embed(embed)).await?;
                    }
                }
                AlertKind::NewAccount => {
                    let age = member.joined_at - member.account_created;
                    if age < Duration::days(NEW_ACCOUNT_DAYS) {
                        triggered.push(kind);
                        details.push(format!("{}: Account is {} old", kind, humanize(age)));
                    }
                }
                AlertKind::Watchlist => {}
            }
        }
        if triggered.is_empty() {
            return Ok(());
        }

        let mut description = format!("**User**: {} (ID: {})", member.user_name, member.user_id);
        if !details.is_empty() {
            description.push_str(&format!("\n**Alert Details**:\n{}", details.join("\n")));
        }
        let names: Vec<&str> = triggered.iter().map(AlertKind::name).collect();
        let embed = Embed::new(description)
            .title("Member Alert")
            .colour(COLOUR_INFO)
            .field(
                format!("Triggered Alert{}", if triggered.len() > 1 { "s" } else { "" }),
                names.join(", "),
                true,
            );
        gateway.send_message(alert_channel, Reply::embed(embed)).await?;
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{message, message_from, run, session_for, Call, FakeGateway, ALERT_CHANNEL, BOT, CHANNEL, GUILD, MEMBER};
    use serenity::model::id::UserId;

    async fn alert_session(gateway: &std::sync::Arc<FakeGateway>, dir: &tempfile::TempDir) -> GuildSession {
        let mut session = session_for(dir, gateway.clone()).await;
        session.enable_module(MODULE_ID).await.unwrap();
        let mut set = message("!set alert");
        set.channel_id = ALERT_CHANNEL;
        session.handle_event(&GuildEvent::MessageCreate(set)).await;
        session
    }

    fn offending(id: u64, content: &str) -> IncomingMessage {
        let mut msg = message_from(UserId(900), content);
        msg.id = MessageId(id);
        msg.member_permissions = PermissionSet::new();
        msg
    }

    fn reaction(alert_id: MessageId, emoji: &str, user_id: UserId) -> GuildEvent {
        GuildEvent::ReactionAdd(ReactionAdded {
            message_id: alert_id,
            guild_id: GUILD,
            channel_id: ALERT_CHANNEL,
            user_id,
            member_permissions: PermissionSet::all_guild(),
            emoji: emoji.to_string(),
        })
    }

    fn raised_alert(gateway: &FakeGateway) -> Embed {
        gateway
            .calls()
            .into_iter()
            .find_map(|call| match call {
                Call::Send(channel, reply) if channel == ALERT_CHANNEL => reply.embed,
                _ => None,
            })
            .expect("an alert was sent")
    }

    fn alert_id_for(session: &GuildSession, message_id: u64) -> MessageId {
        let settings = load_settings(session).unwrap();
        MessageId(settings.message_alert_map[&message_id.to_string()].parse().unwrap())
    }

    #[test]
    fn test_capped_mean_limits_outliers() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[1.0, 2.0, 3.0, 100.0]), 2.5);
        assert_eq!(capped_mean(&[1.0, 2.0, 3.0, 100.0], 1.5), (1.0 + 2.0 + 3.0 + 3.75) / 4.0);
    }

    #[test]
    fn test_join_tracker_needs_samples_and_respects_cooldown() {
        let start = Utc::now();
        let mut tracker = JoinTracker::default();
        for i in 0..10 {
            assert_eq!(tracker.record(start + Duration::seconds(i)), None);
        }
        assert_eq!(tracker.record(start + Duration::seconds(10)), Some(1000.0));
        assert_eq!(tracker.record(start + Duration::seconds(11)), None);
        assert!(tracker.record(start + Duration::minutes(61) + Duration::seconds(12)).is_some());
    }

    #[test]
    fn test_slow_joins_never_alert() {
        let start = Utc::now();
        let mut tracker = JoinTracker::default();
        for i in 0..30 {
            assert_eq!(tracker.record(start + Duration::minutes(i)), None);
        }
    }

    #[test]
    fn test_humanize_durations() {
        assert_eq!(humanize(Duration::seconds(10)), "a few seconds");
        assert_eq!(humanize(Duration::minutes(5)), "5 minutes");
        assert_eq!(humanize(Duration::hours(3)), "3 hours");
        assert_eq!(humanize(Duration::hours(30)), "a day");
        assert_eq!(humanize(Duration::days(3)), "3 days");
    }

    #[tokio::test]
    async fn test_set_alert_is_grafted_onto_base_set() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FakeGateway::new();
        let session = alert_session(&gateway, &dir).await;
        assert_eq!(session.commands().get("set-alert").map(|e| e.module_id.as_str()), Some("alert"));
        let settings = load_settings(&session).unwrap();
        assert_eq!(settings.alert_channel, ALERT_CHANNEL.0.to_string());
    }

    #[tokio::test]
    async fn test_watchlist_hit_raises_alert_and_clear_reaction_resolves_it() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FakeGateway::new();
        let mut session = alert_session(&gateway, &dir).await;
        run(&mut session, &gateway, "!alert watch Free Nitro").await;

        gateway.clear();
        session
            .handle_event(&GuildEvent::MessageCreate(offending(1001, "get FREE NITRO here")))
            .await;
        let embed = raised_alert(&gateway);
        assert_eq!(embed.title.as_deref(), Some("Alert Triggered"));
        assert_eq!(embed.colour, COLOUR_ALERT);
        assert!(embed.fields.iter().any(|f| f.name == "Blocked Terms Found" && f.value == "free nitro"));

        let alert_id = alert_id_for(&session, 1001);
        let calls = gateway.calls();
        assert!(calls.contains(&Call::React(ALERT_CHANNEL, alert_id, REACTION_DELETE.to_string())));
        assert!(calls.contains(&Call::React(ALERT_CHANNEL, alert_id, REACTION_CLEAR.to_string())));

        let replies = run(&mut session, &gateway, "!alert count").await;
        assert_eq!(
            replies[0].embed.as_ref().unwrap().description,
            "There are currently **1** unresolved alerts."
        );

        gateway.clear();
        session.handle_event(&reaction(alert_id, "✅", BOT)).await;
        assert!(gateway.calls().is_empty());

        session.handle_event(&reaction(alert_id, "✅\u{fe0f}", MEMBER)).await;
        match &gateway.calls()[0] {
            Call::Edit(channel, id, reply) => {
                assert_eq!((*channel, *id), (ALERT_CHANNEL, alert_id));
                let embed = reply.embed.as_ref().unwrap();
                assert_eq!(embed.title.as_deref(), Some("Alert Resolved"));
                assert_eq!(embed.colour, COLOUR_RESOLVED);
                assert_eq!(embed.fields.last().unwrap().value, "Message was ignored");
            }
            other => panic!("unexpected call {:?}", other),
        }
        assert!(load_settings(&session).unwrap().unresolved_alerts.is_empty());
    }

    #[tokio::test]
    async fn test_delete_reaction_removes_offending_message() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FakeGateway::new();
        let mut session = alert_session(&gateway, &dir).await;
        run(&mut session, &gateway, "!alert watch scam").await;
        session
            .handle_event(&GuildEvent::MessageCreate(offending(1002, "a scam")))
            .await;
        let alert_id = alert_id_for(&session, 1002);

        gateway.clear();
        session.handle_event(&reaction(alert_id, "🗑", MEMBER)).await;
        let calls = gateway.calls();
        assert_eq!(calls[0], Call::Delete(CHANNEL, MessageId(1002)));
        assert!(matches!(&calls[1], Call::Edit(_, id, reply)
            if *id == alert_id && reply.embed.as_ref().map(|e| e.colour) == Some(COLOUR_DELETE)));
        assert!(load_settings(&session).unwrap().message_alert_map.is_empty());
    }

    #[tokio::test]
    async fn test_deleting_offending_message_resolves_alert() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FakeGateway::new();
        let mut session = alert_session(&gateway, &dir).await;
        run(&mut session, &gateway, "!alert watch scam").await;
        session
            .handle_event(&GuildEvent::MessageCreate(offending(1003, "scam")))
            .await;
        let alert_id = alert_id_for(&session, 1003);

        let replies = run(&mut session, &gateway, "!alert list").await;
        assert!(replies[0]
            .embed
            .as_ref()
            .unwrap()
            .description
            .ends_with(&format!("/{}/{}/{}>", GUILD, ALERT_CHANNEL, alert_id)));

        gateway.clear();
        session
            .handle_event(&GuildEvent::MessageDelete(DeletedMessage {
                id: MessageId(1003),
                guild_id: GUILD,
                channel_id: CHANNEL,
            }))
            .await;
        assert!(matches!(&gateway.calls()[0], Call::Edit(channel, id, _)
            if *channel == ALERT_CHANNEL && *id == alert_id));
        assert_eq!(load_settings(&session).unwrap().unresolved_alerts.len(), 0);
    }

    #[tokio::test]
    async fn test_new_account_member_alert() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FakeGateway::new();
        let mut session = alert_session(&gateway, &dir).await;
        let replies = run(&mut session, &gateway, "!alert enable newaccount").await;
        assert_eq!(
            replies[0].embed.as_ref().unwrap().description,
            "Successfully enabled **newaccount** alert!"
        );
        let replies = run(&mut session, &gateway, "!alert enable bogus").await;
        assert_eq!(replies[0].embed.as_ref().unwrap().description, "Alert **bogus** not found.");

        gateway.clear();
        let now = Utc::now();
        session
            .handle_event(&GuildEvent::MemberAdd(MemberJoined {
                guild_id: GUILD,
                user_id: UserId(901),
                user_name: "fresh".to_string(),
                account_created: now - Duration::days(2),
                joined_at: now,
            }))
            .await;
        let embed = raised_alert(&gateway);
        assert_eq!(embed.title.as_deref(), Some("Member Alert"));
        assert!(embed.description.contains("newaccount: Account is 2 days old"));
    }

    #[tokio::test]
    async fn test_mass_join_counters_are_per_guild_session() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = FakeGateway::new();
        let mut session = alert_session(&gateway, &dir).await;
        run(&mut session, &gateway, "!alert enable massjoin").await;

        gateway.clear();
        let start = Utc::now();
        for i in 0..11 {
            session
                .handle_event(&GuildEvent::MemberAdd(MemberJoined {
                    guild_id: GUILD,
                    user_id: UserId(2000 + i),
                    user_name: format!("joiner{}", i),
                    account_created: start - Duration::days(365),
                    joined_at: start + Duration::seconds(i as i64),
                }))
                .await;
        }
        let embed = raised_alert(&gateway);
        assert_eq!(embed.title.as_deref(), Some("Mass Join Alert"));
        assert_eq!(gateway.sent().len(), 1);

        let other_dir = tempfile::tempdir().unwrap();
        let other = alert_session(&gateway, &other_dir).await;
        assert!(other.scratch.get::<JoinTrackerKey>().is_none());
    }
}
