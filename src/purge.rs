//! Background purges of a member's recent messages.
//!
//! At most one purge runs per (chat, user). Starting another cancels the first.
//! A purge checks its cancellation token before every deletion and removes its
//! own registry entry when it ends, whichever way it ends.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::capabilities::{HistoryCapability, MessagingCapability};
use crate::error::{RuckusError, Result};
use crate::models::{ChatId, UserId};
use crate::state::StateStore;

/// Upper bound on messages fetched for one purge.
pub const PURGE_FETCH_LIMIT: usize = 1000;

/// A registered purge job.
#[derive(Debug, Clone)]
pub struct PurgeTask {
    pub id: Uuid,
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub lookback: Duration,
    /// Rule that ordered the purge, for logging.
    pub rule_name: String,
    pub token: CancellationToken,
    pub started_at: DateTime<Utc>,
}

impl PurgeTask {
    pub fn new(chat_id: ChatId, user_id: UserId, lookback: Duration, rule_name: &str) -> Self {
        Self {
            id: Uuid::new_v4(),
            chat_id,
            user_id,
            lookback,
            rule_name: rule_name.to_string(),
            token: CancellationToken::new(),
            started_at: Utc::now(),
        }
    }
}

/// Live purges keyed by chat, then user.
#[derive(Debug, Default)]
pub struct PurgeRegistry {
    chats: HashMap<ChatId, HashMap<UserId, PurgeTask>>,
}

impl PurgeRegistry {
    /// Register a task, cancelling and returning any task it replaces.
    pub fn register(&mut self, task: PurgeTask) -> Option<PurgeTask> {
        let previous = self
            .chats
            .entry(task.chat_id)
            .or_default()
            .insert(task.user_id, task);
        if let Some(old) = &previous {
            old.token.cancel();
        }
        previous
    }

    /// Remove the entry for (chat, user) only if it still belongs to task `id`.
    pub fn deregister(&mut self, chat_id: ChatId, user_id: UserId, id: Uuid) -> bool {
        let Some(users) = self.chats.get_mut(&chat_id) else {
            return false;
        };
        let owned = users.get(&user_id).is_some_and(|task| task.id == id);
        if owned {
            users.remove(&user_id);
        }
        if users.is_empty() {
            self.chats.remove(&chat_id);
        }
        owned
    }

    /// Cancel and remove the purge for (chat, user). Returns whether one existed.
    pub fn stop(&mut self, chat_id: ChatId, user_id: UserId) -> bool {
        let Some(users) = self.chats.get_mut(&chat_id) else {
            return false;
        };
        let removed = users.remove(&user_id);
        if users.is_empty() {
            self.chats.remove(&chat_id);
        }
        match removed {
            Some(task) => {
                task.token.cancel();
                true
            }
            None => false,
        }
    }

    /// Cancel and remove every purge. Returns how many were stopped.
    pub fn stop_all(&mut self) -> usize {
        let mut stopped = 0;
        for (_, users) in self.chats.drain() {
            for (_, task) in users {
                task.token.cancel();
                stopped += 1;
            }
        }
        stopped
    }

    pub fn is_active(&self, chat_id: ChatId, user_id: UserId) -> bool {
        self.chats
            .get(&chat_id)
            .is_some_and(|users| users.contains_key(&user_id))
    }

    /// Number of live purges.
    pub fn count(&self) -> usize {
        self.chats.values().map(HashMap::len).sum()
    }

    /// Number of chats with at least one live purge.
    pub fn chat_count(&self) -> usize {
        self.chats.len()
    }
}

/// Starts, tracks and cancels purge jobs.
#[derive(Clone)]
pub struct PurgeManager {
    store: Arc<StateStore>,
    history: Arc<dyn HistoryCapability>,
    messaging: Arc<dyn MessagingCapability>,
    delete_delay: Duration,
    tasks: TaskTracker,
}

impl PurgeManager {
    pub fn new(
        store: Arc<StateStore>,
        history: Arc<dyn HistoryCapability>,
        messaging: Arc<dyn MessagingCapability>,
        delete_delay: Duration,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            store,
            history,
            messaging,
            delete_delay,
            tasks,
        }
    }

    /// Schedule deletion of the user's messages from the last `lookback`.
    ///
    /// Returns once the job is registered; deletion happens in the background.
    pub async fn start(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        lookback: Duration,
        rule_name: &str,
    ) -> Result<()> {
        if lookback.is_zero() {
            return Err(RuckusError::PurgeUnavailable(
                "purge lookback is not configured".to_string(),
            ));
        }
        let window = chrono::Duration::from_std(lookback)
            .map_err(|_| RuckusError::PurgeUnavailable("purge lookback out of range".to_string()))?;

        let task = PurgeTask::new(chat_id, user_id, lookback, rule_name);
        let since = task.started_at - window;
        let id = task.id;
        let token = task.token.clone();

        let replaced = self.store.with_purges(|registry| registry.register(task)).await;
        if let Some(old) = replaced {
            info!(
                chat_id = chat_id,
                user_id = user_id,
                previous_rule = %old.rule_name,
                "Cancelled running purge in favour of a new one"
            );
        }

        info!(
            chat_id = chat_id,
            user_id = user_id,
            rule = %rule_name,
            lookback_secs = lookback.as_secs(),
            "Purge started"
        );

        let manager = self.clone();
        self.tasks.spawn(async move {
            let deleted = manager.delete_since(chat_id, user_id, since, &token).await;
            let removed = manager
                .store
                .with_purges(|registry| registry.deregister(chat_id, user_id, id))
                .await;
            info!(
                chat_id = chat_id,
                user_id = user_id,
                deleted = deleted,
                cancelled = token.is_cancelled(),
                deregistered = removed,
                "Purge finished"
            );
        });

        Ok(())
    }

    async fn delete_since(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        since: DateTime<Utc>,
        token: &CancellationToken,
    ) -> usize {
        let messages = match self
            .history
            .messages_since(chat_id, user_id, since, PURGE_FETCH_LIMIT)
            .await
        {
            Ok(messages) => messages,
            Err(e) => {
                warn!(chat_id = chat_id, user_id = user_id, error = %e, "History query failed, purge aborted");
                return 0;
            }
        };

        let mut deleted = 0;
        for (i, message) in messages.iter().enumerate() {
            if token.is_cancelled() {
                break;
            }

            match self.messaging.delete_message(chat_id, message.id).await {
                Ok(()) => deleted += 1,
                Err(e) if e.is_not_found() => {
                    debug!(chat_id = chat_id, message_id = message.id, "Message already gone");
                }
                Err(e) => {
                    warn!(chat_id = chat_id, message_id = message.id, error = %e, "Failed to delete message");
                }
            }

            if i + 1 < messages.len() && !self.delete_delay.is_zero() {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(self.delete_delay) => {}
                }
            }
        }
        deleted
    }

    /// Cancel the purge for (chat, user). Returns whether one was running.
    pub async fn stop(&self, chat_id: ChatId, user_id: UserId) -> bool {
        self.store
            .with_purges(|registry| registry.stop(chat_id, user_id))
            .await
    }

    /// Cancel every running purge.
    pub async fn stop_all(&self) -> usize {
        self.store.with_purges(PurgeRegistry::stop_all).await
    }

    pub async fn is_active(&self, chat_id: ChatId, user_id: UserId) -> bool {
        self.store
            .with_purges(|registry| registry.is_active(chat_id, user_id))
            .await
    }

    pub async fn active_count(&self) -> usize {
        self.store.with_purges(|registry| registry.count()).await
    }
}
