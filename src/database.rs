//! SQLite database for message history and member profiles.
//!
//! Backs the history capability: purges read a member's recent messages from
//! here and the rule engine reads profile aliases.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::Row;

use crate::capabilities::HistoryCapability;
use crate::error::{RuckusError, Result};
use crate::models::{Author, ChatId, ChatMessage, Profile, UserId};

/// Database connection pool wrapper.
#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open (or create) the database file and apply the schema.
    pub async fn new(path: &str) -> Result<Self> {
        if let Some(parent) = Path::new(path).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    RuckusError::Database(format!("Failed to create database directory: {}", e))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect(options, 5).await
    }

    /// Private in-memory database. A single connection keeps every query on
    /// the same memory instance.
    pub async fn in_memory() -> Result<Self> {
        Self::connect(SqliteConnectOptions::new().in_memory(true), 1).await
    }

    async fn connect(options: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .map_err(|e| RuckusError::Database(format!("Failed to connect to database: {}", e)))?;

        let db = Self { pool };
        db.initialize_schema().await?;
        Ok(db)
    }

    /// Initialize database schema.
    async fn initialize_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(|e| RuckusError::Database(format!("Failed to initialize schema: {}", e)))?;

        Ok(())
    }

    /// Check if the database is healthy.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RuckusError::Database(format!("Health check failed: {}", e)))?;

        Ok(())
    }

    // ========== Messages ==========

    /// Store an inbound message. Re-recording the same id overwrites it.
    pub async fn record_message(&self, message: &ChatMessage) -> Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO messages
             (chat_id, message_id, user_id, display_name, text, caption, reply_to, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(message.chat_id)
        .bind(message.id)
        .bind(message.author_id())
        .bind(message.display_name())
        .bind(&message.text)
        .bind(&message.caption)
        .bind(message.reply_to)
        .bind(message.timestamp.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| RuckusError::Database(format!("Failed to record message: {}", e)))?;

        Ok(())
    }

    /// A member's messages in a chat newer than `since`, oldest first.
    pub async fn get_messages_since(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        let rows = sqlx::query(
            "SELECT chat_id, message_id, user_id, display_name, text, caption, reply_to, created_at
             FROM messages
             WHERE chat_id = ? AND user_id = ? AND created_at > ?
             ORDER BY created_at ASC, message_id ASC
             LIMIT ?",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(since.timestamp_millis())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RuckusError::Database(format!("Failed to get messages: {}", e)))?;

        rows.iter().map(message_from_row).collect()
    }

    /// Number of stored messages for a chat.
    pub async fn message_count(&self, chat_id: ChatId) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM messages WHERE chat_id = ?")
            .bind(chat_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RuckusError::Database(format!("Failed to count messages: {}", e)))?;

        Ok(row.get("count"))
    }

    /// Delete messages older than `cutoff`. Returns the number removed.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM messages WHERE created_at < ?")
            .bind(cutoff.timestamp_millis())
            .execute(&self.pool)
            .await
            .map_err(|e| RuckusError::Database(format!("Failed to prune messages: {}", e)))?;

        Ok(result.rows_affected())
    }

    // ========== Profiles ==========

    /// Create or refresh a member's profile. An existing alias is kept.
    pub async fn upsert_profile(&self, chat_id: ChatId, user_id: UserId, username: &str) -> Result<()> {
        sqlx::query(
            "INSERT INTO profiles (chat_id, user_id, username, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(chat_id, user_id) DO UPDATE SET
                username = excluded.username,
                updated_at = excluded.updated_at",
        )
        .bind(chat_id)
        .bind(user_id)
        .bind(username)
        .bind(Utc::now().timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| RuckusError::Database(format!("Failed to upsert profile: {}", e)))?;

        Ok(())
    }

    /// Set or clear a member's alias. Returns false if no profile exists.
    pub async fn set_alias(&self, chat_id: ChatId, user_id: UserId, alias: Option<&str>) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE profiles SET alias = ?, updated_at = ? WHERE chat_id = ? AND user_id = ?",
        )
        .bind(alias)
        .bind(Utc::now().timestamp_millis())
        .bind(chat_id)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| RuckusError::Database(format!("Failed to set alias: {}", e)))?;

        Ok(result.rows_affected() > 0)
    }

    /// All profiles known for a chat.
    pub async fn get_profiles(&self, chat_id: ChatId) -> Result<Vec<Profile>> {
        let rows = sqlx::query(
            "SELECT user_id, username, alias FROM profiles WHERE chat_id = ? ORDER BY user_id",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| RuckusError::Database(format!("Failed to get profiles: {}", e)))?;

        Ok(rows
            .iter()
            .map(|row| Profile {
                user_id: row.get("user_id"),
                username: row.get("username"),
                alias: row.get("alias"),
            })
            .collect())
    }
}

fn message_from_row(row: &SqliteRow) -> Result<ChatMessage> {
    let millis: i64 = row.get("created_at");
    let timestamp = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| RuckusError::Database(format!("Invalid created_at: {}", millis)))?;

    let author = row.get::<Option<i64>, _>("user_id").map(|id| Author {
        id,
        display_name: row.get("display_name"),
    });

    Ok(ChatMessage {
        id: row.get("message_id"),
        chat_id: row.get("chat_id"),
        author,
        text: row.get("text"),
        caption: row.get("caption"),
        timestamp,
        reply_to: row.get("reply_to"),
        mentions: Vec::new(),
    })
}

#[async_trait]
impl HistoryCapability for Database {
    async fn messages_since(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        self.get_messages_since(chat_id, user_id, since, limit)
            .await
            .map_err(|e| RuckusError::History(e.to_string()))
    }

    async fn all_profiles(&self, chat_id: ChatId) -> Result<Vec<Profile>> {
        self.get_profiles(chat_id)
            .await
            .map_err(|e| RuckusError::History(e.to_string()))
    }
}

const SCHEMA: &str = r#"
-- Inbound message history
CREATE TABLE IF NOT EXISTS messages (
    chat_id INTEGER NOT NULL,
    message_id INTEGER NOT NULL,
    user_id INTEGER,
    display_name TEXT NOT NULL DEFAULT '',
    text TEXT NOT NULL DEFAULT '',
    caption TEXT NOT NULL DEFAULT '',
    reply_to INTEGER,
    created_at INTEGER NOT NULL,
    PRIMARY KEY (chat_id, message_id)
);

-- Member profiles and admin-assigned aliases
CREATE TABLE IF NOT EXISTS profiles (
    chat_id INTEGER NOT NULL,
    user_id INTEGER NOT NULL,
    username TEXT NOT NULL,
    alias TEXT,
    updated_at INTEGER NOT NULL,
    PRIMARY KEY (chat_id, user_id)
);

-- Indexes
CREATE INDEX IF NOT EXISTS idx_messages_chat_user_time ON messages(chat_id, user_id, created_at);
CREATE INDEX IF NOT EXISTS idx_messages_created ON messages(created_at);
"#;

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use crate::capabilities::HistoryCapability;
    use crate::database::Database;
    use crate::models::ChatMessage;

    #[tokio::test]
    async fn create_in_memory_database() {
        let db = Database::in_memory().await.expect("should create db");
        db.health_check().await.expect("health check should pass");
    }

    #[tokio::test]
    async fn schema_is_idempotent() {
        let db = Database::in_memory().await.expect("should create db");

        // Initialize schema again (should not fail)
        db.initialize_schema().await.expect("should be idempotent");
        db.health_check().await.expect("health check should pass");
    }

    #[tokio::test]
    async fn messages_since_filters_by_user_and_time() {
        let db = Database::in_memory().await.expect("should create db");
        let now = Utc::now();

        let old = ChatMessage::text(1, 10, 7, "alice", "old", now - Duration::hours(30));
        let recent = ChatMessage::text(2, 10, 7, "alice", "recent", now - Duration::hours(1));
        let other_user = ChatMessage::text(3, 10, 8, "bob", "bob's", now);
        let other_chat = ChatMessage::text(4, 11, 7, "alice", "elsewhere", now);
        for m in [&old, &recent, &other_user, &other_chat] {
            db.record_message(m).await.expect("should record");
        }

        let found = db
            .messages_since(10, 7, now - Duration::hours(24), 100)
            .await
            .expect("should query");

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, 2);
        assert_eq!(found[0].body(), "recent");
        assert_eq!(found[0].author_id(), Some(7));
    }

    #[tokio::test]
    async fn messages_since_respects_limit_oldest_first() {
        let db = Database::in_memory().await.expect("should create db");
        let now = Utc::now();
        for i in 0..5 {
            let m = ChatMessage::text(i, 10, 7, "alice", "x", now - Duration::minutes(10 - i));
            db.record_message(&m).await.expect("should record");
        }

        let found = db
            .messages_since(10, 7, now - Duration::hours(1), 3)
            .await
            .expect("should query");
        let ids: Vec<_> = found.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn reply_and_caption_round_trip() {
        let db = Database::in_memory().await.expect("should create db");
        let mut m = ChatMessage::text(5, 10, 7, "alice", "", Utc::now()).replying_to(4);
        m.caption = "photo".to_string();
        db.record_message(&m).await.expect("should record");

        let found = db
            .messages_since(10, 7, Utc::now() - Duration::hours(1), 10)
            .await
            .expect("should query");
        assert_eq!(found[0].reply_to, Some(4));
        assert_eq!(found[0].body(), "photo");
    }

    #[tokio::test]
    async fn prune_removes_old_messages() {
        let db = Database::in_memory().await.expect("should create db");
        let now = Utc::now();
        db.record_message(&ChatMessage::text(1, 10, 7, "a", "old", now - Duration::days(10)))
            .await
            .expect("should record");
        db.record_message(&ChatMessage::text(2, 10, 7, "a", "new", now))
            .await
            .expect("should record");

        let removed = db
            .prune_older_than(now - Duration::days(7))
            .await
            .expect("should prune");
        assert_eq!(removed, 1);
        assert_eq!(db.message_count(10).await.expect("count"), 1);
    }

    #[tokio::test]
    async fn upsert_profile_keeps_alias() {
        let db = Database::in_memory().await.expect("should create db");
        db.upsert_profile(10, 7, "alice_1").await.expect("upsert");
        assert!(db.set_alias(10, 7, Some("Alice")).await.expect("alias"));
        db.upsert_profile(10, 7, "alice_2").await.expect("upsert");

        let profiles = db.all_profiles(10).await.expect("profiles");
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].username, "alice_2");
        assert_eq!(profiles[0].display(), "Alice");
    }

    #[tokio::test]
    async fn set_alias_without_profile() {
        let db = Database::in_memory().await.expect("should create db");
        assert!(!db.set_alias(10, 7, Some("Ghost")).await.expect("alias"));
        assert!(db.all_profiles(10).await.expect("profiles").is_empty());
    }
}
