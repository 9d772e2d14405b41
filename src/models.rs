//! Core data models for Ruckus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Conversation identifier (a Discord channel in the bundled adapter).
pub type ChatId = i64;
/// Member identifier.
pub type UserId = i64;
/// Message identifier, unique within its chat.
pub type MessageId = i64;

/// The member who sent a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: UserId,
    /// Platform-provided display name, used when no profile alias exists.
    pub display_name: String,
}

/// An inbound chat message as seen by the moderation core.
///
/// Messages are read-only inputs; the core only derives formatted strings from them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub author: Option<Author>,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub caption: String,
    pub timestamp: DateTime<Utc>,
    /// Message this one replies to, if any.
    #[serde(default)]
    pub reply_to: Option<MessageId>,
    /// Members mentioned in the message.
    #[serde(default)]
    pub mentions: Vec<UserId>,
}

impl ChatMessage {
    /// Create a plain text message.
    ///
    /// ```
    /// use chrono::Utc;
    /// use ruckus::models::ChatMessage;
    ///
    /// let msg = ChatMessage::text(1, -100, 7, "alice", "hello", Utc::now());
    /// assert_eq!(msg.body(), "hello");
    /// assert_eq!(msg.author_id(), Some(7));
    /// ```
    pub fn text(
        id: MessageId,
        chat_id: ChatId,
        author_id: UserId,
        display_name: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            chat_id,
            author: Some(Author {
                id: author_id,
                display_name: display_name.into(),
            }),
            text: text.into(),
            caption: String::new(),
            timestamp,
            reply_to: None,
            mentions: Vec::new(),
        }
    }

    /// Mark this message as a reply.
    pub fn replying_to(mut self, message_id: MessageId) -> Self {
        self.reply_to = Some(message_id);
        self
    }

    /// Add mentioned members.
    pub fn mentioning(mut self, users: impl IntoIterator<Item = UserId>) -> Self {
        self.mentions.extend(users);
        self
    }

    /// Text of the message, falling back to the media caption.
    pub fn body(&self) -> &str {
        if self.text.is_empty() {
            &self.caption
        } else {
            &self.text
        }
    }

    pub fn author_id(&self) -> Option<UserId> {
        self.author.as_ref().map(|a| a.id)
    }

    pub fn display_name(&self) -> &str {
        self.author
            .as_ref()
            .map(|a| a.display_name.as_str())
            .unwrap_or("unknown")
    }
}

/// Stored member profile used to resolve display aliases.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub user_id: UserId,
    pub username: String,
    /// Alias assigned by chat administrators.
    pub alias: Option<String>,
}

impl Profile {
    /// Alias if set, otherwise the username.
    pub fn display(&self) -> &str {
        match &self.alias {
            Some(alias) if !alias.trim().is_empty() => alias,
            _ => &self.username,
        }
    }
}
