// discord.rs - Serenity adapter
// DiscordGateway implements the outbound Gateway trait on top of serenity's
// Http and Cache. Handler receives serenity events, flattens them into
// GuildEvents (resolving member permissions from the cache) and passes them
// to the Bot stored in the client's TypeMap.

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use log::{debug, info, warn};
use serenity::builder::CreateEmbed;
use serenity::cache::Cache;
use serenity::client::{Context, EventHandler};
use serenity::http::Http;
use serenity::model::channel::{Channel, Message, Reaction, ReactionType};
use serenity::model::gateway::Ready;
use serenity::model::guild::{Guild, Member};
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId, UserId};
use serenity::model::permissions::Permissions;
use serenity::model::Timestamp;
use serenity::prelude::TypeMapKey;
use std::sync::Arc;

use crate::bot::Bot;
use crate::error::GatewayError;
use crate::events::{DeletedMessage, GuildEvent, IncomingMessage, MemberJoined, ReactionAdded};
use crate::gateway::{Embed, Gateway, GuildSnapshot, Reply};
use crate::permissions::PermissionSet;

// ============================================================================
// OUTBOUND
// ============================================================================

fn gateway_error(e: serenity::Error) -> GatewayError {
    GatewayError(e.to_string())
}

fn create_embed(embed: &Embed) -> CreateEmbed {
    let mut builder = CreateEmbed::default();
    builder.description(&embed.description).colour(embed.colour);
    if let Some(title) = &embed.title {
        builder.title(title);
    }
    for field in &embed.fields {
        builder.field(&field.name, &field.value, field.inline);
    }
    if let Some(footer) = &embed.footer {
        builder.footer(|f| f.text(footer));
    }
    builder
}

pub struct DiscordGateway {
    http: Arc<Http>,
    cache: Arc<Cache>,
}

impl DiscordGateway {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>) -> Self {
        Self { http, cache }
    }
}

#[async_trait]
impl Gateway for DiscordGateway {
    fn snapshot(&self, guild_id: GuildId) -> GuildSnapshot {
        let bot_user_id = self.cache.current_user_id();
        let guild = match self.cache.guild(guild_id) {
            Some(guild) => guild,
            None => return GuildSnapshot::empty(bot_user_id),
        };

        let bot_roles = guild
            .members
            .get(&bot_user_id)
            .map(|member| member.roles.clone())
            .unwrap_or_default();
        let mut snapshot = GuildSnapshot::empty(bot_user_id);
        snapshot.bot_permissions = permissions_for(&guild, bot_user_id, &bot_roles).into();
        snapshot.channels = guild
            .channels
            .iter()
            .filter_map(|(id, channel)| match channel {
                Channel::Guild(channel) => Some((*id, channel.name.clone())),
                _ => None,
            })
            .collect();
        snapshot.roles = guild
            .roles
            .iter()
            .map(|(id, role)| (*id, role.name.clone()))
            .collect();
        snapshot
    }

    async fn send_message(&self, channel_id: ChannelId, reply: Reply) -> Result<MessageId, GatewayError> {
        let message = channel_id
            .send_message(&self.http, |m| {
                if let Some(content) = &reply.content {
                    m.content(content);
                }
                if let Some(embed) = &reply.embed {
                    m.set_embed(create_embed(embed));
                }
                m
            })
            .await
            .map_err(gateway_error)?;
        Ok(message.id)
    }

    async fn edit_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        reply: Reply,
    ) -> Result<(), GatewayError> {
        channel_id
            .edit_message(&self.http, message_id, |m| {
                if let Some(content) = &reply.content {
                    m.content(content);
                }
                if let Some(embed) = &reply.embed {
                    m.set_embed(create_embed(embed));
                }
                m
            })
            .await
            .map_err(gateway_error)?;
        Ok(())
    }

    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId) -> Result<(), GatewayError> {
        channel_id
            .delete_message(&self.http, message_id)
            .await
            .map_err(gateway_error)
    }

    async fn add_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<(), GatewayError> {
        channel_id
            .create_reaction(&self.http, message_id, ReactionType::Unicode(emoji.to_string()))
            .await
            .map_err(gateway_error)
    }

    async fn create_role(&self, guild_id: GuildId, name: &str) -> Result<RoleId, GatewayError> {
        let role = guild_id
            .create_role(&self.http, |r| r.name(name).permissions(Permissions::empty()))
            .await
            .map_err(gateway_error)?;
        Ok(role.id)
    }

    async fn delete_role(&self, guild_id: GuildId, role_id: RoleId) -> Result<(), GatewayError> {
        guild_id
            .delete_role(&self.http, role_id)
            .await
            .map_err(gateway_error)
    }

    async fn set_role_mentionable(
        &self,
        guild_id: GuildId,
        role_id: RoleId,
        mentionable: bool,
    ) -> Result<(), GatewayError> {
        guild_id
            .edit_role(&self.http, role_id, |r| r.mentionable(mentionable))
            .await
            .map_err(gateway_error)?;
        Ok(())
    }

    async fn add_member_role(&self, guild_id: GuildId, user_id: UserId, role_id: RoleId) -> Result<(), GatewayError> {
        self.http
            .add_member_role(guild_id.0, user_id.0, role_id.0, None)
            .await
            .map_err(gateway_error)
    }

    async fn remove_member_role(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), GatewayError> {
        self.http
            .remove_member_role(guild_id.0, user_id.0, role_id.0, None)
            .await
            .map_err(gateway_error)
    }
}

// ============================================================================
// INBOUND CONVERSION
// ============================================================================

/// Guild-level permissions from the @everyone role plus the member's roles
fn permissions_for(guild: &Guild, user_id: UserId, roles: &[RoleId]) -> Permissions {
    if guild.owner_id == user_id {
        return Permissions::all();
    }
    let everyone = RoleId(guild.id.0);
    let perms = std::iter::once(&everyone)
        .chain(roles.iter())
        .filter_map(|id| guild.roles.get(id))
        .fold(Permissions::empty(), |acc, role| acc | role.permissions);
    if perms.contains(Permissions::ADMINISTRATOR) {
        Permissions::all()
    } else {
        perms
    }
}

fn to_utc(timestamp: Timestamp) -> DateTime<Utc> {
    Utc.timestamp_opt(timestamp.unix_timestamp(), 0)
        .single()
        .unwrap_or_else(Utc::now)
}

fn member_roles(cache: &Cache, guild_id: GuildId, user_id: UserId) -> Vec<RoleId> {
    cache
        .member(guild_id, user_id)
        .map(|member| member.roles)
        .unwrap_or_default()
}

fn member_permissions(cache: &Cache, guild_id: GuildId, user_id: UserId, roles: &[RoleId]) -> PermissionSet {
    cache
        .guild(guild_id)
        .map(|guild| permissions_for(&guild, user_id, roles).into())
        .unwrap_or_default()
}

pub fn incoming_message(cache: &Cache, msg: &Message) -> Option<GuildEvent> {
    let guild_id = msg.guild_id?;
    let member_roles = match &msg.member {
        Some(member) => member.roles.clone(),
        None => member_roles(cache, guild_id, msg.author.id),
    };
    // Webhook posts have no member and hold no permissions
    let member_permissions = if msg.webhook_id.is_some() {
        PermissionSet::new()
    } else {
        member_permissions(cache, guild_id, msg.author.id, &member_roles)
    };
    Some(GuildEvent::MessageCreate(IncomingMessage {
        id: msg.id,
        guild_id,
        channel_id: msg.channel_id,
        author_id: msg.author.id,
        author_name: msg.author.name.clone(),
        author_is_bot: msg.author.bot,
        member_permissions,
        member_roles,
        content: msg.content.clone(),
        timestamp: to_utc(msg.timestamp),
    }))
}

pub fn reaction_added(cache: &Cache, reaction: &Reaction) -> Option<GuildEvent> {
    let guild_id = reaction.guild_id?;
    let user_id = reaction.user_id?;
    let roles = match &reaction.member {
        Some(member) => member.roles.clone(),
        None => member_roles(cache, guild_id, user_id),
    };
    let emoji = match &reaction.emoji {
        ReactionType::Unicode(emoji) => emoji.clone(),
        ReactionType::Custom { name, .. } => name.clone().unwrap_or_default(),
        _ => return None,
    };
    Some(GuildEvent::ReactionAdd(ReactionAdded {
        message_id: reaction.message_id,
        guild_id,
        channel_id: reaction.channel_id,
        user_id,
        member_permissions: member_permissions(cache, guild_id, user_id, &roles),
        emoji,
    }))
}

pub fn member_joined(member: &Member) -> GuildEvent {
    GuildEvent::MemberAdd(MemberJoined {
        guild_id: member.guild_id,
        user_id: member.user.id,
        user_name: member.user.name.clone(),
        account_created: to_utc(member.user.id.created_at()),
        joined_at: member.joined_at.map(to_utc).unwrap_or_else(Utc::now),
    })
}

// ============================================================================
// EVENT HANDLER
// ============================================================================

pub struct BotKey;

impl TypeMapKey for BotKey {
    type Value = Arc<Bot>;
}

pub struct Handler;

impl Handler {
    async fn deliver(ctx: &Context, event: Option<GuildEvent>) {
        let event = match event {
            Some(event) => event,
            None => return,
        };
        let bot = ctx.data.read().await.get::<BotKey>().cloned();
        match bot {
            Some(bot) => bot.handle(event).await,
            None => warn!("⚠️ Dropping {} event received before startup finished", event.kind()),
        }
    }
}

#[async_trait]
impl EventHandler for Handler {
    async fn ready(&self, _: Context, ready: Ready) {
        info!("✅ Connected to {} guilds", ready.guilds.len());
        println!("✅ Bot connected as {}!", ready.user.name);
    }

    async fn message(&self, ctx: Context, msg: Message) {
        let event = incoming_message(&ctx.cache, &msg);
        if event.is_none() {
            debug!("💬 Ignoring direct message from {}", msg.author.name);
        }
        Self::deliver(&ctx, event).await;
    }

    async fn reaction_add(&self, ctx: Context, reaction: Reaction) {
        let event = reaction_added(&ctx.cache, &reaction);
        Self::deliver(&ctx, event).await;
    }

    async fn message_delete(
        &self,
        ctx: Context,
        channel_id: ChannelId,
        deleted_message_id: MessageId,
        guild_id: Option<GuildId>,
    ) {
        let event = guild_id.map(|guild_id| {
            GuildEvent::MessageDelete(DeletedMessage {
                id: deleted_message_id,
                guild_id,
                channel_id,
            })
        });
        Self::deliver(&ctx, event).await;
    }

    async fn guild_member_addition(&self, ctx: Context, new_member: Member) {
        Self::deliver(&ctx, Some(member_joined(&new_member))).await;
    }
}
