//! Operator slash commands.
//!
//! `/ruckus alias`, `/ruckus summary`, `/ruckus stoppurge` and `/ruckus stats`
//! act on the channel the command is used in. Only administrators may run them.

use std::sync::Arc;

use serenity::all::{
    CommandInteraction, CommandOptionType, Context, CreateCommand, CreateCommandOption,
    CreateInteractionResponse, CreateInteractionResponseMessage, Permissions, ResolvedOption,
    ResolvedValue,
};

use crate::conflict::ConflictPhase;
use crate::database::Database;
use crate::error::{ErrorContext, RuckusError, Result};
use crate::models::{ChatId, UserId};
use crate::pipeline::ModerationPipeline;

/// A parsed operator command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModCommand {
    /// Set a member's alias, or clear it when `alias` is `None`.
    Alias {
        user_id: UserId,
        alias: Option<String>,
    },
    /// Summarize the open argument without waiting for it to calm down.
    Summary,
    StopPurge {
        user_id: UserId,
    },
    Stats,
}

impl ModCommand {
    /// Build a command from a subcommand name and its options.
    ///
    /// Returns `None` for unknown subcommands or a missing required user.
    pub fn parse(subcommand: &str, user: Option<UserId>, text: Option<&str>) -> Option<Self> {
        match subcommand {
            "alias" => Some(Self::Alias {
                user_id: user?,
                alias: text
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string),
            }),
            "summary" => Some(Self::Summary),
            "stoppurge" => Some(Self::StopPurge { user_id: user? }),
            "stats" => Some(Self::Stats),
            _ => None,
        }
    }
}

/// Slash command handler.
pub struct ModCommandHandler {
    db: Arc<Database>,
    pipeline: Arc<ModerationPipeline>,
}

impl ModCommandHandler {
    pub fn new(db: Arc<Database>, pipeline: Arc<ModerationPipeline>) -> Self {
        Self { db, pipeline }
    }

    /// Commands to register with Discord.
    pub fn register_commands() -> Vec<CreateCommand> {
        let user_option = |description: &str| {
            CreateCommandOption::new(CommandOptionType::User, "user", description).required(true)
        };

        vec![CreateCommand::new("ruckus")
            .description("Ruckus moderation commands")
            .default_member_permissions(Permissions::ADMINISTRATOR)
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "alias",
                    "Set or clear the name a member is shown as to the oracle",
                )
                .add_sub_option(user_option("Member to rename"))
                .add_sub_option(
                    CreateCommandOption::new(
                        CommandOptionType::String,
                        "name",
                        "New alias; leave empty to clear",
                    )
                    .required(false),
                ),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "summary",
                "Summarize the current argument now",
            ))
            .add_option(
                CreateCommandOption::new(
                    CommandOptionType::SubCommand,
                    "stoppurge",
                    "Stop deleting a member's messages",
                )
                .add_sub_option(user_option("Member being purged")),
            )
            .add_option(CreateCommandOption::new(
                CommandOptionType::SubCommand,
                "stats",
                "Show moderation state for this channel",
            ))]
    }

    /// Handle an incoming slash command interaction.
    pub async fn handle_command(&self, ctx: &Context, command: &CommandInteraction) -> Result<()> {
        if !is_operator(command.member.as_ref().and_then(|m| m.permissions)) {
            return self
                .respond(ctx, command, "You don't have permission to use this command.")
                .await;
        }

        let chat_id = command.channel_id.get() as ChatId;
        let Some(parsed) = parse_interaction(&command.data.options()) else {
            return self.respond(ctx, command, "Unknown command.").await;
        };

        tracing::info!(
            chat_id = chat_id,
            operator = command.user.id.get(),
            command = ?parsed,
            "Operator command"
        );

        let reply = match self.execute(chat_id, parsed).await {
            Ok(reply) => reply,
            Err(e) => {
                let log_ctx = ErrorContext::new("operator_command").with_chat_id(chat_id);
                e.log_with_context(&log_ctx);
                e.user_message().to_string()
            }
        };
        self.respond(ctx, command, &reply).await
    }

    /// Run a command against one chat and return the reply text.
    pub async fn execute(&self, chat_id: ChatId, command: ModCommand) -> Result<String> {
        match command {
            ModCommand::Alias { user_id, alias } => {
                let updated = self.db.set_alias(chat_id, user_id, alias.as_deref()).await?;
                if !updated {
                    return Ok(format!("<@{}> has not written here yet.", user_id));
                }
                self.pipeline.forget_aliases(chat_id).await;
                Ok(match alias {
                    Some(alias) => format!("<@{}> is now shown as {}.", user_id, alias),
                    None => format!("Alias of <@{}> cleared.", user_id),
                })
            }
            ModCommand::Summary => Ok(if self.pipeline.analyze_conflict(chat_id).await {
                "Summarizing the current argument.".to_string()
            } else {
                "No argument in progress.".to_string()
            }),
            ModCommand::StopPurge { user_id } => {
                Ok(if self.pipeline.stop_purge(chat_id, user_id).await {
                    format!("Stopped removing messages of <@{}>.", user_id)
                } else {
                    format!("No purge running for <@{}>.", user_id)
                })
            }
            ModCommand::Stats => {
                let stored = self.db.message_count(chat_id).await?;
                let active = match self.pipeline.is_active(chat_id).await {
                    Some(true) => "active",
                    Some(false) => "inactive (missing admin rights)",
                    None => "not checked yet",
                };
                let conflict = match self.pipeline.conflict_phase(chat_id).await {
                    Some(ConflictPhase::Detected) => "argument in progress",
                    Some(ConflictPhase::Analyzing) => "summarizing",
                    _ => "calm",
                };
                Ok(format!(
                    "**Ruckus**\n\
                     • Moderation: {}\n\
                     • Rules: {}\n\
                     • Stored messages: {}\n\
                     • Waiting for evaluation: {}\n\
                     • Conflict: {}\n\
                     • Running purges: {}",
                    active,
                    self.pipeline.rule_count(),
                    stored,
                    self.pipeline.buffered(chat_id).await,
                    conflict,
                    self.pipeline.active_purges().await,
                ))
            }
        }
    }

    async fn respond(&self, ctx: &Context, command: &CommandInteraction, content: &str) -> Result<()> {
        let response = CreateInteractionResponse::Message(
            CreateInteractionResponseMessage::new()
                .content(content)
                .ephemeral(true),
        );

        match command.create_response(&ctx.http, response).await {
            Ok(()) => Ok(()),
            // Another instance may have answered first
            Err(e) if e.to_string().contains("already been acknowledged") => Ok(()),
            Err(e) => Err(RuckusError::DiscordApi(Box::new(e))),
        }
    }
}

/// Whether the invoking member may run operator commands.
pub fn is_operator(permissions: Option<Permissions>) -> bool {
    permissions.is_some_and(|p| p.administrator())
}

fn parse_interaction(options: &[ResolvedOption<'_>]) -> Option<ModCommand> {
    let first = options.first()?;
    let ResolvedValue::SubCommand(sub_options) = &first.value else {
        return None;
    };

    let mut user = None;
    let mut text = None;
    for option in sub_options {
        match &option.value {
            ResolvedValue::User(u, _) => user = Some(u.id.get() as UserId),
            ResolvedValue::String(s) => text = Some(*s),
            _ => {}
        }
    }
    ModCommand::parse(first.name, user, text)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use serenity::all::Permissions;

    use crate::commands::{is_operator, ModCommand, ModCommandHandler};
    use crate::config::{ConflictConfig, ModerationConfig};
    use crate::database::Database;
    use crate::models::ChatMessage;
    use crate::pipeline::ModerationPipeline;
    use crate::testutil::{FakeHistory, FakeMessaging, FakeOracle};

    async fn handler(messaging: Arc<FakeMessaging>) -> (ModCommandHandler, Arc<Database>, Arc<ModerationPipeline>) {
        let db = Arc::new(Database::in_memory().await.expect("db"));
        let conflict = ConflictConfig {
            keywords: vec!["you are wrong".to_string()],
            ..ConflictConfig::default()
        };
        let pipeline = Arc::new(ModerationPipeline::new(
            ModerationConfig::default(),
            conflict,
            Arc::new(FakeOracle::answering("They argued about tabs.")),
            messaging,
            Arc::new(FakeHistory::new()),
        ));
        (ModCommandHandler::new(db.clone(), pipeline.clone()), db, pipeline)
    }

    #[test]
    fn register_commands_creates_commands() {
        assert_eq!(ModCommandHandler::register_commands().len(), 1);
    }

    #[test]
    fn parse_known_subcommands() {
        assert_eq!(
            ModCommand::parse("alias", Some(7), Some("  Bob ")),
            Some(ModCommand::Alias {
                user_id: 7,
                alias: Some("Bob".to_string())
            })
        );
        assert_eq!(
            ModCommand::parse("alias", Some(7), Some("   ")),
            Some(ModCommand::Alias {
                user_id: 7,
                alias: None
            })
        );
        assert_eq!(ModCommand::parse("summary", None, None), Some(ModCommand::Summary));
        assert_eq!(
            ModCommand::parse("stoppurge", Some(9), None),
            Some(ModCommand::StopPurge { user_id: 9 })
        );
        assert_eq!(ModCommand::parse("stats", None, None), Some(ModCommand::Stats));
    }

    #[test]
    fn parse_rejects_unknown_or_incomplete() {
        assert_eq!(ModCommand::parse("alias", None, Some("Bob")), None);
        assert_eq!(ModCommand::parse("stoppurge", None, None), None);
        assert_eq!(ModCommand::parse("ban", Some(7), None), None);
    }

    #[test]
    fn only_administrators_are_operators() {
        assert!(is_operator(Some(Permissions::ADMINISTRATOR)));
        assert!(!is_operator(Some(Permissions::MANAGE_MESSAGES)));
        assert!(!is_operator(None));
    }

    #[tokio::test]
    async fn alias_needs_a_profile() {
        let (handler, db, _) = handler(Arc::new(FakeMessaging::new())).await;

        let reply = handler
            .execute(1, ModCommand::parse("alias", Some(7), Some("Bob")).expect("command"))
            .await
            .expect("execute");
        assert!(reply.contains("has not written here yet"));

        db.upsert_profile(1, 7, "bob_the_builder").await.expect("profile");
        let reply = handler
            .execute(1, ModCommand::parse("alias", Some(7), Some("Bob")).expect("command"))
            .await
            .expect("execute");
        assert!(reply.contains("now shown as Bob"));
        assert_eq!(db.get_profiles(1).await.expect("profiles")[0].display(), "Bob");

        handler
            .execute(1, ModCommand::parse("alias", Some(7), None).expect("command"))
            .await
            .expect("execute");
        assert_eq!(db.get_profiles(1).await.expect("profiles")[0].display(), "bob_the_builder");
    }

    #[tokio::test]
    async fn summary_closes_open_argument() {
        let messaging = Arc::new(FakeMessaging::new());
        let (handler, _, pipeline) = handler(messaging.clone()).await;

        let reply = handler.execute(1, ModCommand::Summary).await.expect("execute");
        assert_eq!(reply, "No argument in progress.");

        pipeline
            .process_message(ChatMessage::text(1, 1, 7, "mallory", "you are wrong", Utc::now()))
            .await;
        pipeline.wait_idle().await;

        let reply = handler.execute(1, ModCommand::Summary).await.expect("execute");
        assert_eq!(reply, "Summarizing the current argument.");
        pipeline.wait_idle().await;

        assert!(messaging
            .chat_messages()
            .contains(&"They argued about tabs.".to_string()));
    }

    #[tokio::test]
    async fn stop_purge_without_purge() {
        let (handler, _, _) = handler(Arc::new(FakeMessaging::new())).await;
        let reply = handler
            .execute(1, ModCommand::StopPurge { user_id: 7 })
            .await
            .expect("execute");
        assert_eq!(reply, "No purge running for <@7>.");
    }

    #[tokio::test]
    async fn stats_reports_stored_messages() {
        let (handler, db, pipeline) = handler(Arc::new(FakeMessaging::new())).await;
        db.record_message(&ChatMessage::text(1, 1, 7, "mallory", "hello", Utc::now()))
            .await
            .expect("record");
        pipeline
            .ingest(ChatMessage::text(1, 1, 7, "mallory", "hello", Utc::now()))
            .await;

        let reply = handler.execute(1, ModCommand::Stats).await.expect("execute");
        assert!(reply.contains("Moderation: active"));
        assert!(reply.contains("Stored messages: 1"));
        assert!(reply.contains("Waiting for evaluation: 1"));
        assert!(reply.contains("Conflict: calm"));
    }
}
