// bot.rs - Multi-guild engine
// Keeps one GuildSession per guild, created the first time the guild
// produces an event. Each session sits behind its own lock, so events for
// one guild are handled one at a time while other guilds proceed in parallel.
// A guild's session is built outside the map lock, so loading one guild's
// document from disk never holds up events for the others.

use log::info;
use serenity::model::id::GuildId;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};

use crate::config::DispatchConfig;
use crate::events::GuildEvent;
use crate::gateway::Gateway;
use crate::guild::GuildSession;
use crate::module::ModuleRegistry;
use crate::state::StateStore;

pub struct Bot {
    config: Arc<DispatchConfig>,
    registry: Arc<ModuleRegistry>,
    store: Arc<StateStore>,
    gateway: Arc<dyn Gateway>,
    sessions: Mutex<HashMap<GuildId, Arc<SessionSlot>>>,
}

/// Filled once with the guild's session; concurrent first events wait on the same slot
type SessionSlot = OnceCell<Arc<Mutex<GuildSession>>>;

impl Bot {
    pub fn new(
        config: Arc<DispatchConfig>,
        registry: Arc<ModuleRegistry>,
        store: Arc<StateStore>,
        gateway: Arc<dyn Gateway>,
    ) -> Self {
        Self {
            config,
            registry,
            store,
            gateway,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// The guild's session, loading it from disk on first use
    pub async fn session(&self, guild_id: GuildId) -> Arc<Mutex<GuildSession>> {
        let slot = self
            .sessions
            .lock()
            .await
            .entry(guild_id)
            .or_default()
            .clone();

        slot.get_or_init(|| async move {
            let session = GuildSession::new(
                guild_id,
                self.store.clone(),
                self.registry.clone(),
                self.gateway.clone(),
                self.config.clone(),
            )
            .await;
            info!(
                "📂 Opened session for guild {} (modules: {})",
                guild_id,
                session.active_modules().join(", ")
            );
            Arc::new(Mutex::new(session))
        })
        .await
        .clone()
    }

    /// Routes an event to its guild's session
    pub async fn handle(&self, event: GuildEvent) {
        let session = self.session(event.guild_id()).await;
        let mut session = session.lock().await;
        session.handle_event(&event).await;
    }

    pub async fn session_count(&self) -> usize {
        self.sessions
            .lock()
            .await
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::builtin_registry;
    use crate::testing::{message, FakeGateway, GUILD};

    fn bot_in(dir: &tempfile::TempDir) -> (Bot, Arc<FakeGateway>) {
        let gateway = FakeGateway::new();
        let bot = Bot::new(
            Arc::new(DispatchConfig::default()),
            Arc::new(builtin_registry().unwrap()),
            Arc::new(StateStore::new(dir.path())),
            gateway.clone(),
        );
        (bot, gateway)
    }

    #[tokio::test]
    async fn test_sessions_are_created_once_per_guild() {
        let dir = tempfile::tempdir().unwrap();
        let (bot, _gateway) = bot_in(&dir);
        let first = bot.session(GUILD).await;
        let again = bot.session(GUILD).await;
        assert!(Arc::ptr_eq(&first, &again));
        bot.session(GuildId(501)).await;
        assert_eq!(bot.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_concurrent_first_events_share_one_session() {
        let dir = tempfile::tempdir().unwrap();
        let (bot, _gateway) = bot_in(&dir);
        let (a, b, other) = tokio::join!(
            bot.session(GUILD),
            bot.session(GUILD),
            bot.session(GuildId(501))
        );
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &other));
        assert_eq!(bot.session_count().await, 2);
    }

    #[tokio::test]
    async fn test_busy_guild_does_not_block_new_guilds() {
        let dir = tempfile::tempdir().unwrap();
        let (bot, gateway) = bot_in(&dir);
        let busy = bot.session(GUILD).await;
        let _held = busy.lock().await;

        let mut other = message("!ping");
        other.guild_id = GuildId(501);
        tokio::time::timeout(std::time::Duration::from_secs(5), bot.handle(GuildEvent::MessageCreate(other)))
            .await
            .expect("event for another guild was blocked");
        assert_eq!(gateway.sent().len(), 1);
    }

    #[tokio::test]
    async fn test_guild_settings_do_not_leak_between_guilds() {
        let dir = tempfile::tempdir().unwrap();
        let (bot, gateway) = bot_in(&dir);
        bot.handle(GuildEvent::MessageCreate(message("!set prefix ?"))).await;
        assert_eq!(gateway.sent().len(), 1);

        let mut other = message("?ping");
        other.guild_id = GuildId(501);
        gateway.clear();
        bot.handle(GuildEvent::MessageCreate(other)).await;
        assert!(gateway.sent().is_empty());

        assert_eq!(bot.session(GUILD).await.lock().await.prefix(), "?");
        assert_eq!(bot.session(GuildId(501)).await.lock().await.prefix(), "!");
    }

    #[tokio::test]
    async fn test_events_reach_the_guild_session() {
        let dir = tempfile::tempdir().unwrap();
        let (bot, gateway) = bot_in(&dir);
        bot.handle(GuildEvent::MessageCreate(message("!enable filter"))).await;
        assert_eq!(
            gateway.sent()[0].embed.as_ref().unwrap().description,
            "Successfully enabled the filter module"
        );
        assert!(bot.session(GUILD).await.lock().await.is_active("filter"));
    }
}
