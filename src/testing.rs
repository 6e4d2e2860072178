// testing.rs - Shared fixtures for unit tests
// FakeGateway records every outbound call and hands out sequential ids so
// tests can assert on what a command or hook sent without a Discord connection.

use async_trait::async_trait;
use chrono::Utc;
use futures_util::future::BoxFuture;
use serenity::model::id::{ChannelId, GuildId, MessageId, RoleId, UserId};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use crate::commands::builtin_registry;
use crate::config::{DispatchConfig, DEFAULT_DEVELOPER_ID};
use crate::error::{CommandResult, GatewayError};
use crate::events::{GuildEvent, IncomingMessage};
use crate::gateway::{Gateway, GuildSnapshot, Reply};
use crate::guild::GuildSession;
use crate::module::{CommandContext, ModuleDescriptor, ModuleRegistry};
use crate::permissions::PermissionSet;
use crate::state::StateStore;

pub const GUILD: GuildId = GuildId(500);
pub const CHANNEL: ChannelId = ChannelId(600);
pub const ALERT_CHANNEL: ChannelId = ChannelId(601);
pub const BOT: UserId = UserId(1);
pub const DEV: UserId = UserId(DEFAULT_DEVELOPER_ID);
pub const MEMBER: UserId = UserId(700);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Send(ChannelId, Reply),
    Edit(ChannelId, MessageId, Reply),
    Delete(ChannelId, MessageId),
    React(ChannelId, MessageId, String),
    CreateRole(String),
    DeleteRole(RoleId),
    Mentionable(RoleId, bool),
    AddRole(UserId, RoleId),
    RemoveRole(UserId, RoleId),
}

pub struct FakeGateway {
    snapshot: Mutex<GuildSnapshot>,
    calls: Mutex<Vec<Call>>,
    next_id: AtomicU64,
}

impl FakeGateway {
    /// Bot holding every guild permission, with `#general` and `#alerts`
    pub fn new() -> Arc<Self> {
        Self::with_permissions(PermissionSet::all_guild())
    }

    pub fn with_permissions(permissions: PermissionSet) -> Arc<Self> {
        let mut snapshot = GuildSnapshot::empty(BOT);
        snapshot.bot_permissions = permissions;
        snapshot.channels.insert(CHANNEL, "general".to_string());
        snapshot.channels.insert(ALERT_CHANNEL, "alerts".to_string());
        Arc::new(Self {
            snapshot: Mutex::new(snapshot),
            calls: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(9000),
        })
    }

    pub fn add_role(&self, role_id: RoleId, name: &str) {
        self.snapshot.lock().unwrap().roles.insert(role_id, name.to_string());
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn sent(&self) -> Vec<Reply> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Send(_, reply) => Some(reply),
                _ => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap().clear();
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn allocate(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }
}

#[async_trait]
impl Gateway for FakeGateway {
    fn snapshot(&self, _guild_id: GuildId) -> GuildSnapshot {
        self.snapshot.lock().unwrap().clone()
    }

    async fn send_message(&self, channel_id: ChannelId, reply: Reply) -> Result<MessageId, GatewayError> {
        self.record(Call::Send(channel_id, reply));
        Ok(MessageId(self.allocate()))
    }

    async fn edit_message(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        reply: Reply,
    ) -> Result<(), GatewayError> {
        self.record(Call::Edit(channel_id, message_id, reply));
        Ok(())
    }

    async fn delete_message(&self, channel_id: ChannelId, message_id: MessageId) -> Result<(), GatewayError> {
        self.record(Call::Delete(channel_id, message_id));
        Ok(())
    }

    async fn add_reaction(
        &self,
        channel_id: ChannelId,
        message_id: MessageId,
        emoji: &str,
    ) -> Result<(), GatewayError> {
        self.record(Call::React(channel_id, message_id, emoji.to_string()));
        Ok(())
    }

    async fn create_role(&self, _guild_id: GuildId, name: &str) -> Result<RoleId, GatewayError> {
        self.record(Call::CreateRole(name.to_string()));
        let role_id = RoleId(self.allocate());
        self.add_role(role_id, name);
        Ok(role_id)
    }

    async fn delete_role(&self, _guild_id: GuildId, role_id: RoleId) -> Result<(), GatewayError> {
        self.record(Call::DeleteRole(role_id));
        self.snapshot.lock().unwrap().roles.remove(&role_id);
        Ok(())
    }

    async fn set_role_mentionable(
        &self,
        _guild_id: GuildId,
        role_id: RoleId,
        mentionable: bool,
    ) -> Result<(), GatewayError> {
        self.record(Call::Mentionable(role_id, mentionable));
        Ok(())
    }

    async fn add_member_role(&self, _guild_id: GuildId, user_id: UserId, role_id: RoleId) -> Result<(), GatewayError> {
        self.record(Call::AddRole(user_id, role_id));
        Ok(())
    }

    async fn remove_member_role(
        &self,
        _guild_id: GuildId,
        user_id: UserId,
        role_id: RoleId,
    ) -> Result<(), GatewayError> {
        self.record(Call::RemoveRole(user_id, role_id));
        Ok(())
    }
}

pub fn noop_command(_ctx: CommandContext<'_>) -> BoxFuture<'_, CommandResult<String>> {
    Box::pin(async move { Ok(String::new()) })
}

pub fn noop_listener<'a>(_: &'a mut GuildSession, _: &'a GuildEvent) -> BoxFuture<'a, CommandResult<()>> {
    Box::pin(async move { Ok(()) })
}

/// A module with no commands, hooks or defaults
pub fn test_module(id: &'static str) -> ModuleDescriptor {
    ModuleDescriptor {
        id,
        display_name: "Test",
        description: "Test module",
        bot_permissions: PermissionSet::new(),
        commands: Vec::new(),
        base_modifiers: Vec::new(),
        event_hooks: Vec::new(),
        state_defaults: Vec::new(),
    }
}

/// A chat message in `#general` from a member holding every guild permission
pub fn message_from(author_id: UserId, content: &str) -> IncomingMessage {
    IncomingMessage {
        id: MessageId(800),
        guild_id: GUILD,
        channel_id: CHANNEL,
        author_id,
        author_name: "tester".to_string(),
        author_is_bot: false,
        member_permissions: PermissionSet::all_guild(),
        member_roles: Vec::new(),
        content: content.to_string(),
        timestamp: Utc::now(),
    }
}

pub fn message(content: &str) -> IncomingMessage {
    message_from(MEMBER, content)
}

pub async fn session_with_registry(
    dir: &TempDir,
    gateway: Arc<FakeGateway>,
    registry: ModuleRegistry,
) -> GuildSession {
    GuildSession::new(
        GUILD,
        Arc::new(StateStore::new(dir.path())),
        Arc::new(registry),
        gateway,
        Arc::new(DispatchConfig::default()),
    )
    .await
}

/// Session over the built-in modules
pub async fn session_for(dir: &TempDir, gateway: Arc<FakeGateway>) -> GuildSession {
    let registry = builtin_registry().expect("built-in modules are valid");
    session_with_registry(dir, gateway, registry).await
}

/// Runs `content` through the full message path and returns the replies it produced
pub async fn run(session: &mut GuildSession, gateway: &FakeGateway, content: &str) -> Vec<Reply> {
    gateway.clear();
    session
        .handle_event(&GuildEvent::MessageCreate(message(content)))
        .await;
    gateway.sent()
}
