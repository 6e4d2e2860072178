// gateway.rs - Outbound side of the chat gateway
// Command handlers and module hooks talk to Discord only through this trait;
// the engine itself never needs more than the returned ids.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId, UserId};
use std::collections::HashMap;

use crate::error::GatewayError;
use crate::permissions::PermissionSet;

pub const SUCCESS_COLOUR: u32 = 0x00ff00;
pub const FAILURE_COLOUR: u32 = 0xff0000;
pub const INFO_COLOUR: u32 = 0xaaaaff;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbedField {
    pub name: String,
    pub value: String,
    pub inline: bool,
}

/// Renderer-agnostic embed description
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Embed {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub colour: u32,
    #[serde(default)]
    pub fields: Vec<EmbedField>,
    #[serde(default)]
    pub footer: Option<String>,
}

impl Embed {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            ..Self::default()
        }
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn colour(mut self, colour: u32) -> Self {
        self.colour = colour;
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: impl Into<String>, inline: bool) -> Self {
        self.fields.push(EmbedField {
            name: name.into(),
            value: value.into(),
            inline,
        });
        self
    }

    pub fn footer(mut self, text: impl Into<String>) -> Self {
        self.footer = Some(text.into());
        self
    }
}

/// A message to send or an edit to apply
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    pub content: Option<String>,
    pub embed: Option<Embed>,
}

impl Reply {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            embed: None,
        }
    }

    pub fn embed(embed: Embed) -> Self {
        Self {
            content: None,
            embed: Some(embed),
        }
    }

    pub fn success(description: impl Into<String>) -> Self {
        Self::embed(Embed::new(description).colour(SUCCESS_COLOUR))
    }

    pub fn failure(description: impl Into<String>) -> Self {
        Self::embed(Embed::new(description).colour(FAILURE_COLOUR))
    }
}

/// Cached view of a guild as seen by the bot
#[derive(Debug, Clone)]
pub struct GuildSnapshot {
    pub bot_user_id: UserId,
    pub bot_permissions: PermissionSet,
    pub channels: HashMap<ChannelId, String>,
    pub roles: HashMap<RoleId, String>,
}

impl GuildSnapshot {
    pub fn empty(bot_user_id: UserId) -> Self {
        Self {
            bot_user_id,
            bot_permissions: PermissionSet::new(),
            channels: HashMap::new(),
            roles: HashMap::new(),
        }
    }

    pub fn channel_name(&self, channel_id: ChannelId) -> Option<&str> {
        self.channels.get(&channel_id).map(String::as_str)
    }

    pub fn has_channel(&self, channel_id: ChannelId) -> bool {
        self.channels.contains_key(&channel_id)
    }

    pub fn has_role(&self, role_id: RoleId) -> bool {
        self.roles.contains_key(&role_id)
    }
}

#[async_trait]
pub trait Gateway: Send + Sync {
    /// Current cached state of the guild; never performs network I/O
    fn snapshot(&self, guild_id: GuildId) -> GuildSnapshot;

    async fn send_message(&self, channel_id: ChannelId, reply: Reply) -> Result<MessageId, GatewayError>;

    async fn edit_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        reply: Reply,
    ) -> Result<(), GatewayError>;

    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId) -> Result<(), GatewayError>;

    async fn add_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<(), GatewayError>;

    async fn create_role(&self, guild_id: GuildId, name: &str) -> Result<RoleId, GatewayError>;

    async fn delete_role(&self, guild_id: GuildId, role_id: RoleId) -> Result<(), GatewayError>;

    async fn set_role_mentionable(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
        mentionable: bool,
    ) -> Result<(), GatewayError>;

    async fn add_member_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> Result<(), GatewayError>;

    async fn remove_member_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), GatewayError>;
}
