// events.rs - Inbound gateway events
// The gateway adapter converts raw Discord events into these denormalized
// payloads so the engine can make authorization decisions without extra calls.

use chrono::{DateTime, Utc};
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId, UserId};
use std::fmt;

use crate::permissions::PermissionSet;

/// Event names listeners can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventKind {
    MessageCreate,
    MessageDelete,
    ReactionAdd,
    MemberAdd,
}

impl EventKind {
    pub fn name(&self) -> &'static str {
        match self {
            EventKind::MessageCreate => "messageCreate",
            EventKind::MessageDelete => "messageDelete",
            EventKind::ReactionAdd => "messageReactionAdd",
            EventKind::MemberAdd => "guildMemberAdd",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone)]
pub struct IncomingMessage {
    pub id: MessageId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub author_id: UserId,
    pub author_name: String,
    pub author_is_bot: bool,
    /// Effective guild permissions of the author; empty for webhooks
    pub member_permissions: PermissionSet,
    pub member_roles: Vec<RoleId>,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DeletedMessage {
    pub id: MessageId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
}

#[derive(Debug, Clone)]
pub struct ReactionAdded {
    pub message_id: MessageId,
    pub guild_id: GuildId,
    pub channel_id: ChannelId,
    pub user_id: UserId,
    pub member_permissions: PermissionSet,
    /// Unicode emoji or custom emoji name
    pub emoji: String,
}

#[derive(Debug, Clone)]
pub struct MemberJoined {
    pub guild_id: GuildId,
    pub user_id: UserId,
    pub user_name: String,
    pub account_created: DateTime<Utc>,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub enum GuildEvent {
    MessageCreate(IncomingMessage),
    MessageDelete(DeletedMessage),
    ReactionAdd(ReactionAdded),
    MemberAdd(MemberJoined),
}

impl GuildEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            GuildEvent::MessageCreate(_) => EventKind::MessageCreate,
            GuildEvent::MessageDelete(_) => EventKind::MessageDelete,
            GuildEvent::ReactionAdd(_) => EventKind::ReactionAdd,
            GuildEvent::MemberAdd(_) => EventKind::MemberAdd,
        }
    }

    pub fn guild_id(&self) -> GuildId {
        match self {
            GuildEvent::MessageCreate(m) => m.guild_id,
            GuildEvent::MessageDelete(m) => m.guild_id,
            GuildEvent::ReactionAdd(r) => r.guild_id,
            GuildEvent::MemberAdd(m) => m.guild_id,
        }
    }
}
