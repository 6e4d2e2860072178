// main.rs - Guild Modules Bot entry point
// Loads botconfig.txt, validates the built-in module registry, connects to
// Discord and runs a small stdin console alongside the client until `quit`
// or Ctrl+C.

mod bot;
mod commands;
mod config;
mod discord;
mod error;
mod events;
mod gateway;
mod guild;
mod listeners;
mod module;
mod permissions;
mod resolver;
mod state;
mod table;

#[cfg(test)]
mod testing;

use serenity::client::Client;
use serenity::prelude::GatewayIntents;
use std::sync::Arc;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;

use crate::bot::Bot;
use crate::commands::builtin_registry;
use crate::config::BotConfig;
use crate::discord::{BotKey, DiscordGateway, Handler};
use crate::state::StateStore;

/// Operator console on stdin; sends on `shutdown_tx` when asked to quit
async fn handle_command_line(shutdown_tx: mpsc::Sender<String>, bot: Arc<Bot>) {
    use tokio::io::AsyncWriteExt;
    use tokio::time::{sleep, Duration};

    println!("📝 Command line interface active. Type 'help' for available commands.");

    // Let the connection messages print before the first prompt
    sleep(Duration::from_millis(1500)).await;

    let stdin = io::stdin();
    let mut reader = BufReader::new(stdin).lines();
    let mut stdout = io::stdout();

    if stdout.write_all(b"\n> ").await.is_err() || stdout.flush().await.is_err() {
        eprintln!("❌ Failed to write initial prompt");
        return;
    }

    loop {
        match reader.next_line().await {
            Ok(Some(line)) => {
                let command = line.trim().to_lowercase();

                match command.as_str() {
                    "quit" | "q" | "exit" => {
                        println!("⏹️  Shutting down bot...");
                        if shutdown_tx.send("quit".to_string()).await.is_err() {
                            eprintln!("❌ Failed to send shutdown signal");
                        }
                        break;
                    }
                    "help" | "h" => {
                        println!("🤖 Available commands:");
                        println!("  quit, q, exit  - Stop the bot gracefully");
                        println!("  help, h        - Show this help message");
                        println!("  status         - Show bot status");
                        println!("  modules        - List built-in modules");
                    }
                    "status" => {
                        println!("🤖 Bot Status: Running");
                        println!("🏠 Active guild sessions: {}", bot.session_count().await);
                    }
                    "modules" => {
                        let ids: Vec<&str> = bot.registry().ids().collect();
                        println!("🧩 Modules: {}", ids.join(", "));
                    }
                    "" => {}
                    _ => {
                        println!("❓ Unknown command: '{}'. Type 'help' for available commands.", command);
                    }
                }

                if !matches!(command.as_str(), "quit" | "q" | "exit")
                    && (stdout.write_all(b"> ").await.is_err() || stdout.flush().await.is_err())
                {
                    eprintln!("❌ Failed to write prompt");
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                eprintln!("❌ Error reading command line: {}", e);
                break;
            }
        }
    }
}

#[tokio::main]
async fn main() {
    // Initialize logger - must be done before any logging calls
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_secs()
        .init();

    let config = match BotConfig::load() {
        Ok(config) => config,
        Err(error) => {
            log::error!("❌ Failed to load configuration: {}", error);
            eprintln!("❌ Failed to load configuration: {}", error);
            eprintln!("Create a botconfig.txt file in the project root with: DISCORD_TOKEN=your_token_here");
            return;
        }
    };

    // Every module id, command tree and modifier target is checked here, not at enable time
    let registry = match builtin_registry() {
        Ok(registry) => registry,
        Err(error) => {
            log::error!("❌ Invalid module registry: {}", error);
            eprintln!("❌ Invalid module registry: {}", error);
            return;
        }
    };
    println!(
        "🧩 Loaded {} modules: {}",
        registry.len(),
        registry.ids().collect::<Vec<_>>().join(", ")
    );
    println!("🤖 Starting bot with default prefix: '{}'", config.dispatch.default_prefix);
    println!("💾 Guild state directory: {}", config.data_dir.display());

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::GUILD_MESSAGE_REACTIONS;

    let mut client = match Client::builder(&config.token, intents)
        .event_handler(Handler)
        .await
    {
        Ok(client) => client,
        Err(e) => {
            log::error!("❌ Error creating Discord client: {:?}", e);
            eprintln!("❌ Error creating Discord client: {:?}", e);
            eprintln!("Check your token in botconfig.txt file");
            return;
        }
    };

    let gateway = Arc::new(DiscordGateway::new(
        client.cache_and_http.http.clone(),
        client.cache_and_http.cache.clone(),
    ));
    let bot = Arc::new(Bot::new(
        Arc::new(config.dispatch),
        Arc::new(registry),
        Arc::new(StateStore::new(config.data_dir)),
        gateway,
    ));
    {
        let mut data = client.data.write().await;
        data.insert::<BotKey>(bot.clone());
    }

    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<String>(1);
    let cmd_task = tokio::spawn(handle_command_line(shutdown_tx, bot.clone()));

    println!("🚀 Bot is running...");
    println!("💡 Use 'quit' command to stop gracefully, or press Ctrl+C");
    tokio::select! {
        _ = signal::ctrl_c() => {
            println!("\n⏹️ Stopping bot gracefully...");
        }
        shutdown_signal = shutdown_rx.recv() => {
            if let Some(signal) = shutdown_signal {
                println!("📡 Received '{}' command, stopping bot gracefully...", signal);
            }
        }
        result = client.start() => {
            if let Err(why) = result {
                log::error!("❌ Client error: {:?}", why);
                eprintln!("❌ Client error: {:?}", why);
            }
        }
    }

    cmd_task.abort();
    client.shard_manager.lock().await.shutdown_all().await;

    println!("✅ Bot stopped");
}
