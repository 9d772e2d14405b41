//! Moderation pipeline orchestration.
//!
//! Composes the batcher, RulesEngine, ConflictDetector and PurgeManager into a
//! single entry point for inbound messages. All background work is spawned on
//! one TaskTracker so it can be awaited or shut down together.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::capabilities::{HistoryCapability, JudgmentOracle, MessagingCapability};
use crate::config::{ConflictConfig, ModerationConfig};
use crate::conflict::{ConflictDetector, ConflictPhase};
use crate::engine::RulesEngine;
use crate::models::{ChatId, ChatMessage, UserId};
use crate::punishment::PunishmentExecutor;
use crate::purge::PurgeManager;
use crate::state::StateStore;

/// The moderation pipeline orchestrator.
pub struct ModerationPipeline {
    /// Per-chat batching, conflict and purge state.
    store: Arc<StateStore>,
    /// Platform actions, also used for the admin-rights check.
    messaging: Arc<dyn MessagingCapability>,
    /// Rule evaluation for released batches.
    engine: RulesEngine,
    /// Conflict episode tracking.
    detector: ConflictDetector,
    /// Running purges.
    purges: PurgeManager,
    /// Age after which a negative admin check is repeated.
    activity_recheck: Duration,
    /// Every task the pipeline spawns.
    tasks: TaskTracker,
}

impl ModerationPipeline {
    /// Create a new pipeline with all components.
    pub fn new(
        moderation: ModerationConfig,
        conflict: ConflictConfig,
        oracle: Arc<dyn JudgmentOracle>,
        messaging: Arc<dyn MessagingCapability>,
        history: Arc<dyn HistoryCapability>,
    ) -> Self {
        let store = Arc::new(StateStore::new(moderation.batch_size));
        let activity_recheck = moderation.activity_recheck;
        let tasks = TaskTracker::new();

        let purges = PurgeManager::new(
            Arc::clone(&store),
            Arc::clone(&history),
            Arc::clone(&messaging),
            moderation.purge_delete_delay,
            tasks.clone(),
        );
        let executor = PunishmentExecutor::new(
            Arc::clone(&messaging),
            purges.clone(),
            moderation.durations,
            moderation.notify_enabled,
        );
        let engine = RulesEngine::new(
            moderation.rules,
            Arc::clone(&oracle),
            history,
            executor,
            moderation.affirmative_marker,
        );
        let detector = ConflictDetector::new(
            Arc::clone(&store),
            oracle,
            Arc::clone(&messaging),
            conflict,
            tasks.clone(),
        );

        Self {
            store,
            messaging,
            engine,
            detector,
            purges,
            activity_recheck,
            tasks,
        }
    }

    /// Process an incoming message through conflict tracking and rule batching.
    ///
    /// Returns as soon as state is updated; evaluation and notices run in the
    /// background.
    pub async fn process_message(&self, message: ChatMessage) {
        self.detector.observe(&message).await;
        self.ingest(message).await;
    }

    /// Add a message to its chat's batch. Returns whether a batch was released.
    pub async fn ingest(&self, message: ChatMessage) -> bool {
        let chat_id = message.chat_id;

        let recheck = self.activity_recheck;
        let known = self
            .store
            .with_chat(chat_id, |state| state.moderation.activity(recheck))
            .await;
        let active = match known {
            Some(active) => active,
            None => self.refresh_activity(chat_id).await,
        };
        if !active {
            return false;
        }

        let released = self
            .store
            .with_chat(chat_id, |state| state.moderation.buffer.push(message))
            .await;

        let Some(batch) = released else {
            return false;
        };

        debug!(chat_id = chat_id, size = batch.len(), "Batch released");
        let engine = self.engine.clone();
        self.tasks.spawn(async move {
            engine.evaluate_batch(chat_id, batch).await;
        });
        true
    }

    /// Re-run the admin-rights check for a chat and record the result.
    ///
    /// A failed check is not recorded, so the next message retries it. A
    /// negative answer is trusted for `activity_recheck`.
    pub async fn refresh_activity(&self, chat_id: ChatId) -> bool {
        match self.messaging.can_moderate(chat_id).await {
            Ok(active) => {
                self.store
                    .with_chat(chat_id, |state| state.moderation.record_activity(active))
                    .await;
                info!(chat_id = chat_id, active = active, "Moderation activity checked");
                active
            }
            Err(e) => {
                warn!(chat_id = chat_id, error = %e, "Admin rights check failed");
                false
            }
        }
    }

    /// Cancel the purge running for a member. Returns whether one was running.
    pub async fn stop_purge(&self, chat_id: ChatId, user_id: UserId) -> bool {
        let stopped = self.purges.stop(chat_id, user_id).await;
        if stopped {
            info!(chat_id = chat_id, user_id = user_id, "Purge stopped");
        }
        stopped
    }

    /// Start summarizing a chat's open conflict episode now.
    pub async fn analyze_conflict(&self, chat_id: ChatId) -> bool {
        self.detector.analyze(chat_id).await
    }

    /// Make the next batch in the chat reload member aliases.
    pub async fn forget_aliases(&self, chat_id: ChatId) {
        self.engine.forget_aliases(chat_id).await;
    }

    pub async fn conflict_phase(&self, chat_id: ChatId) -> Option<ConflictPhase> {
        self.detector.phase(chat_id).await
    }

    pub async fn is_active(&self, chat_id: ChatId) -> Option<bool> {
        self.store
            .read_chat(chat_id, |state| state.moderation.is_active)
            .await
            .flatten()
    }

    /// Messages waiting in a chat's batch.
    pub async fn buffered(&self, chat_id: ChatId) -> usize {
        self.store
            .read_chat(chat_id, |state| state.moderation.buffer.len())
            .await
            .unwrap_or(0)
    }

    pub async fn is_purging(&self, chat_id: ChatId, user_id: UserId) -> bool {
        self.purges.is_active(chat_id, user_id).await
    }

    pub async fn active_purges(&self) -> usize {
        self.purges.active_count().await
    }

    pub async fn tracked_chats(&self) -> usize {
        self.store.chat_count().await
    }

    pub fn rule_count(&self) -> usize {
        self.engine.rule_count()
    }

    /// Number of background tasks still running.
    pub fn pending_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Wait until every background task has finished.
    ///
    /// Tasks spawned while waiting are waited for too.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Cancel all purges and wait for in-flight work.
    pub async fn shutdown(&self) {
        let stopped = self.purges.stop_all().await;
        info!(
            stopped_purges = stopped,
            pending_tasks = self.tasks.len(),
            "Shutting down moderation pipeline"
        );
        self.tasks.close();
        self.tasks.wait().await;
    }
}
