//! Narrow capabilities the moderation core consumes.
//!
//! Each trait is implemented by a thin adapter: [`crate::analyzer::GeminiOracle`],
//! [`crate::discord::DiscordClient`] and [`crate::database::Database`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::models::{ChatId, ChatMessage, MessageId, Profile, UserId};

/// Produces a free-text verdict for an instruction over a text context.
///
/// Stateless: no conversation memory is assumed between calls.
#[async_trait]
pub trait JudgmentOracle: Send + Sync {
    async fn ask(&self, instruction: &str, context: &str) -> Result<String>;
}

/// Platform actions against chats and members.
#[async_trait]
pub trait MessagingCapability: Send + Sync {
    /// Remove all send permissions until `until` (`None` = permanently).
    async fn restrict(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        until: Option<DateTime<Utc>>,
    ) -> Result<()>;

    /// Ban until `until` (`None` = permanently).
    async fn ban(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        until: Option<DateTime<Utc>>,
        revoke_history: bool,
    ) -> Result<()>;

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()>;

    async fn send_chat_message(&self, chat_id: ChatId, text: &str) -> Result<()>;

    async fn send_direct_message(&self, user_id: UserId, text: &str) -> Result<()>;

    /// Whether the bot holds the admin rights moderation needs in this chat.
    async fn can_moderate(&self, chat_id: ChatId) -> Result<bool>;
}

/// Read access to stored chat history.
#[async_trait]
pub trait HistoryCapability: Send + Sync {
    /// Messages by `user_id` in `chat_id` newer than `since`, oldest first.
    async fn messages_since(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>>;

    async fn all_profiles(&self, chat_id: ChatId) -> Result<Vec<Profile>>;
}
