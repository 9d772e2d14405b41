//! Ruckus Discord bot entry point.
//!
//! Rule-based moderation with oracle confirmation, background purges and
//! conflict episode summaries.

use std::sync::Arc;
use std::time::Duration;

use serenity::model::application::Interaction;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::prelude::*;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use ruckus::analyzer::GeminiOracle;
use ruckus::capabilities::{HistoryCapability, JudgmentOracle, MessagingCapability};
use ruckus::commands::ModCommandHandler;
use ruckus::config::RuckusConfig;
use ruckus::database::Database;
use ruckus::discord::{chat_message_from, DiscordClient};
use ruckus::error::{RuckusError, Result};
use ruckus::health::{spawn_health_server, HealthState};
use ruckus::pipeline::ModerationPipeline;

/// Main event handler for the bot.
struct RuckusHandler {
    pipeline: Arc<ModerationPipeline>,
    discord: Arc<DiscordClient>,
    db: Arc<Database>,
    commands: ModCommandHandler,
}

#[serenity::async_trait]
impl EventHandler for RuckusHandler {
    async fn message(&self, _ctx: Context, msg: Message) {
        // Ignore bot messages
        if msg.author.bot {
            return;
        }

        if let Some(guild_id) = msg.guild_id {
            self.discord.register_channel(msg.channel_id, guild_id);
        }

        let message = chat_message_from(&msg);

        if let Err(e) = self.db.record_message(&message).await {
            tracing::warn!(error = %e, message_id = message.id, "Failed to store message");
        }
        if let Some(author) = &message.author {
            if let Err(e) = self
                .db
                .upsert_profile(message.chat_id, author.id, &msg.author.name)
                .await
            {
                tracing::warn!(error = %e, user_id = author.id, "Failed to update profile");
            }
        }

        self.pipeline.process_message(message).await;
    }

    async fn interaction_create(&self, ctx: Context, interaction: Interaction) {
        if let Interaction::Command(command) = interaction {
            if let Err(e) = self.commands.handle_command(&ctx, &command).await {
                tracing::error!(error = %e, "Failed to handle slash command");
            }
        }
    }

    async fn ready(&self, ctx: Context, ready: Ready) {
        tracing::info!(
            user = %ready.user.name,
            guilds = ready.guilds.len(),
            rules = self.pipeline.rule_count(),
            "Ruckus bot connected"
        );

        let commands = ModCommandHandler::register_commands();
        if let Err(e) = serenity::all::Command::set_global_commands(&ctx.http, commands).await {
            tracing::error!(error = %e, "Failed to register slash commands");
        } else {
            tracing::info!("Slash commands registered");
        }
    }
}

/// Hourly removal of stored messages past the retention window.
fn spawn_history_pruning(db: Arc<Database>, retention: Duration) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        loop {
            interval.tick().await;
            let Ok(retention) = chrono::Duration::from_std(retention) else {
                tracing::warn!("History retention out of range, pruning disabled");
                return;
            };
            match db.prune_older_than(chrono::Utc::now() - retention).await {
                Ok(count) => {
                    if count > 0 {
                        tracing::info!(count = count, "Pruned old messages");
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to prune message history");
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    // RUST_LOG overrides the default `info` level, e.g. RUST_LOG=ruckus=debug
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    tracing::info!("Ruckus bot starting...");

    let config = RuckusConfig::from_env()?;
    tracing::info!(
        rules = config.moderation.rules.len(),
        batch_size = config.moderation.batch_size,
        conflict_enabled = config.conflict.enabled,
        "Configuration loaded"
    );

    let db = Arc::new(Database::new(&config.database_path).await?);
    tracing::info!(path = %config.database_path, "Database initialized");

    let oracle: Arc<dyn JudgmentOracle> = Arc::new(GeminiOracle::with_rate_limit(
        config.gemini_api_key.clone(),
        config.gemini_rpm,
    )?);
    tracing::info!(rpm = config.gemini_rpm, "Gemini oracle initialized");

    let http = Arc::new(serenity::http::Http::new(&config.discord_token));
    let discord = Arc::new(DiscordClient::new(http));
    let messaging: Arc<dyn MessagingCapability> = discord.clone();
    let history: Arc<dyn HistoryCapability> = db.clone();

    let pipeline = Arc::new(ModerationPipeline::new(
        config.moderation.clone(),
        config.conflict.clone(),
        oracle,
        messaging,
        history,
    ));
    tracing::info!("Moderation pipeline initialized");

    spawn_health_server(
        config.health_port,
        HealthState {
            db: db.clone(),
            pipeline: pipeline.clone(),
        },
    );
    spawn_history_pruning(db.clone(), config.history_retention);

    let handler = RuckusHandler {
        pipeline: pipeline.clone(),
        discord,
        commands: ModCommandHandler::new(db.clone(), pipeline.clone()),
        db,
    };

    let intents = GatewayIntents::GUILD_MESSAGES | GatewayIntents::MESSAGE_CONTENT;
    let mut client = Client::builder(&config.discord_token, intents)
        .event_handler(handler)
        .await
        .map_err(|e| RuckusError::DiscordApi(Box::new(e)))?;

    let shard_manager = client.shard_manager.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        tracing::info!("Shutdown requested");
        pipeline.shutdown().await;
        shard_manager.shutdown_all().await;
    });

    tracing::info!("Starting Discord client...");

    client
        .start()
        .await
        .map_err(|e| RuckusError::DiscordApi(Box::new(e)))?;

    tracing::info!("Ruckus bot stopped");
    Ok(())
}
