//! Discord adapter for the messaging capability.
//!
//! A chat is a Discord channel. Member actions need the guild, which is learned
//! from inbound messages and otherwise fetched from the channel.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serenity::http::Http;
use serenity::model::channel::{Channel, Message};
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use serenity::model::Permissions;
use serenity::model::Timestamp;

use crate::capabilities::MessagingCapability;
use crate::error::{RuckusError, Result};
use crate::models::{Author, ChatId, ChatMessage};

/// Longest communication timeout Discord accepts.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(28 * 24 * 3600);

/// Bans shorter than this are issued as kicks.
pub const KICK_THRESHOLD: Duration = Duration::from_secs(5 * 60);

const AUDIT_REASON: &str = "Moderation rule violation";

/// How a ban request is carried out on Discord.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BanPlan {
    Kick,
    Permanent,
    /// Ban now and lift it after the duration.
    Temporary(Duration),
}

impl BanPlan {
    pub fn for_expiry(now: DateTime<Utc>, until: Option<DateTime<Utc>>) -> Self {
        match until {
            None => BanPlan::Permanent,
            Some(until) => {
                let remaining = (until - now).to_std().unwrap_or_default();
                if remaining <= KICK_THRESHOLD {
                    BanPlan::Kick
                } else {
                    BanPlan::Temporary(remaining)
                }
            }
        }
    }
}

/// Discord client for moderation actions.
pub struct DiscordClient {
    http: Arc<Http>,
    guilds: DashMap<ChatId, GuildId>,
}

impl DiscordClient {
    /// Create a new DiscordClient.
    pub fn new(http: Arc<Http>) -> Self {
        Self {
            http,
            guilds: DashMap::new(),
        }
    }

    /// Remember which guild a channel belongs to.
    pub fn register_channel(&self, channel_id: ChannelId, guild_id: GuildId) {
        self.guilds.insert(channel_id.get() as ChatId, guild_id);
    }

    async fn guild_for(&self, chat_id: ChatId) -> Result<GuildId> {
        if let Some(guild) = self.guilds.get(&chat_id) {
            return Ok(*guild);
        }

        let channel = self
            .http
            .get_channel(channel_id(chat_id)?)
            .await
            .map_err(classify)?;
        match channel {
            Channel::Guild(channel) => {
                self.guilds.insert(chat_id, channel.guild_id);
                Ok(channel.guild_id)
            }
            _ => Err(RuckusError::Platform(format!(
                "channel {} is not part of a guild",
                chat_id
            ))),
        }
    }

    fn schedule_unban(&self, guild_id: GuildId, user_id: UserId, after: Duration) {
        let http = Arc::clone(&self.http);
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            match http.remove_ban(guild_id, user_id, Some("Ban expired")).await {
                Ok(()) => tracing::info!(guild_id = %guild_id, user_id = %user_id, "Ban lifted"),
                Err(e) => {
                    tracing::warn!(guild_id = %guild_id, user_id = %user_id, error = %e, "Failed to lift ban")
                }
            }
        });
    }
}

#[async_trait]
impl MessagingCapability for DiscordClient {
    async fn restrict(
        &self,
        chat_id: ChatId,
        user_id: i64,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let guild_id = self.guild_for(chat_id).await?;
        let user = user_id_of(user_id)?;
        let until = timeout_until(Utc::now(), until);

        let timestamp = Timestamp::from_unix_timestamp(until.timestamp())
            .map_err(|e| RuckusError::InternalState(format!("Invalid timestamp: {}", e)))?;

        let edit_member = serenity::builder::EditMember::new()
            .disable_communication_until(timestamp.to_string())
            .audit_log_reason(AUDIT_REASON);

        self.http
            .edit_member(guild_id, user, &edit_member, Some(AUDIT_REASON))
            .await
            .map_err(classify)?;

        tracing::info!(
            guild_id = %guild_id,
            user_id = user_id,
            until = %until,
            "User timed out"
        );
        Ok(())
    }

    async fn ban(
        &self,
        chat_id: ChatId,
        user_id: i64,
        until: Option<DateTime<Utc>>,
        revoke_history: bool,
    ) -> Result<()> {
        let guild_id = self.guild_for(chat_id).await?;
        let user = user_id_of(user_id)?;

        match BanPlan::for_expiry(Utc::now(), until) {
            BanPlan::Kick => {
                self.http
                    .kick_member(guild_id, user, Some(AUDIT_REASON))
                    .await
                    .map_err(classify)?;
                tracing::info!(guild_id = %guild_id, user_id = user_id, "User kicked");
            }
            plan => {
                let delete_days = if revoke_history { 1 } else { 0 };
                self.http
                    .ban_user(guild_id, user, delete_days, Some(AUDIT_REASON))
                    .await
                    .map_err(classify)?;
                if let BanPlan::Temporary(after) = plan {
                    self.schedule_unban(guild_id, user, after);
                }
                tracing::info!(guild_id = %guild_id, user_id = user_id, plan = ?plan, "User banned");
            }
        }
        Ok(())
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: i64) -> Result<()> {
        let message = u64::try_from(message_id)
            .ok()
            .filter(|id| *id != 0)
            .map(MessageId::new)
            .ok_or_else(|| RuckusError::NotFound(format!("message {}", message_id)))?;

        self.http
            .delete_message(channel_id(chat_id)?, message, Some(AUDIT_REASON))
            .await
            .map_err(classify)
    }

    async fn send_chat_message(&self, chat_id: ChatId, text: &str) -> Result<()> {
        let content = serde_json::json!({ "content": text });
        self.http
            .send_message(channel_id(chat_id)?, vec![], &content)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn send_direct_message(&self, user_id: i64, text: &str) -> Result<()> {
        let user = user_id_of(user_id)?;
        let channel = self
            .http
            .create_private_channel(&serde_json::json!({ "recipient_id": user.get().to_string() }))
            .await
            .map_err(classify)?;

        let content = serde_json::json!({ "content": text });
        self.http
            .send_message(channel.id, vec![], &content)
            .await
            .map_err(classify)?;
        Ok(())
    }

    async fn can_moderate(&self, chat_id: ChatId) -> Result<bool> {
        let guild_id = match self.guild_for(chat_id).await {
            Ok(guild) => guild,
            // Direct messages and group chats cannot be moderated.
            Err(RuckusError::Platform(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let me = self.http.get_current_user().await.map_err(classify)?;
        let member = self.http.get_member(guild_id, me.id).await.map_err(classify)?;
        let roles = self.http.get_guild_roles(guild_id).await.map_err(classify)?;

        // The @everyone role shares the guild's id.
        let everyone = guild_id.get();
        let granted = roles
            .iter()
            .filter(|role| role.id.get() == everyone || member.roles.contains(&role.id))
            .fold(Permissions::empty(), |acc, role| acc | role.permissions);

        Ok(can_moderate_with(granted))
    }
}

/// Whether a permission set covers every action the bot performs.
pub fn can_moderate_with(permissions: Permissions) -> bool {
    permissions.administrator()
        || (permissions.moderate_members()
            && permissions.ban_members()
            && permissions.kick_members()
            && permissions.manage_messages())
}

/// Communication timeout end, capped at Discord's maximum.
pub fn timeout_until(now: DateTime<Utc>, until: Option<DateTime<Utc>>) -> DateTime<Utc> {
    let cap = chrono::Duration::from_std(MAX_TIMEOUT)
        .map(|d| now + d)
        .unwrap_or(now);
    match until {
        Some(until) if until < cap => until,
        _ => cap,
    }
}

/// Convert an inbound Discord message.
pub fn chat_message_from(message: &Message) -> ChatMessage {
    let timestamp = DateTime::from_timestamp(message.timestamp.unix_timestamp(), 0)
        .unwrap_or_else(Utc::now);

    ChatMessage {
        id: message.id.get() as i64,
        chat_id: message.channel_id.get() as ChatId,
        author: Some(Author {
            id: message.author.id.get() as i64,
            display_name: message.author.display_name().to_string(),
        }),
        text: message.content.clone(),
        caption: String::new(),
        timestamp,
        reply_to: message
            .message_reference
            .as_ref()
            .and_then(|r| r.message_id)
            .map(|id| id.get() as i64),
        mentions: message.mentions.iter().map(|u| u.id.get() as i64).collect(),
    }
}

fn channel_id(chat_id: ChatId) -> Result<ChannelId> {
    u64::try_from(chat_id)
        .ok()
        .filter(|id| *id != 0)
        .map(ChannelId::new)
        .ok_or_else(|| RuckusError::NotFound(format!("channel {}", chat_id)))
}

fn user_id_of(user_id: i64) -> Result<UserId> {
    u64::try_from(user_id)
        .ok()
        .filter(|id| *id != 0)
        .map(UserId::new)
        .ok_or_else(|| RuckusError::NotFound(format!("user {}", user_id)))
}

/// Map a serenity error to a typed error by HTTP status.
fn classify(err: serenity::Error) -> RuckusError {
    let status = match &err {
        serenity::Error::Http(http_err) => http_err.status_code().map(|s| s.as_u16()),
        _ => None,
    };

    match status {
        Some(404) => RuckusError::NotFound(err.to_string()),
        Some(403) => RuckusError::Forbidden(err.to_string()),
        Some(429) => RuckusError::RateLimited {
            retry_after_ms: 1000,
        },
        Some(_) => RuckusError::Platform(err.to_string()),
        None => RuckusError::DiscordApi(Box::new(err)),
    }
}
