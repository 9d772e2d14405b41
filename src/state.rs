//! Per-chat mutable state behind a single lock.
//!
//! Batching, conflict tracking and the purge registry all share one mutex. Every
//! access goes through a synchronous closure, so no `.await` can run while the
//! lock is held and the map itself is never handed out.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::buffer::BatchBuffer;
use crate::conflict::ConflictState;
use crate::models::ChatId;
use crate::purge::PurgeRegistry;

/// Rule-pipeline state of one chat.
#[derive(Debug, Clone)]
pub struct ChatModerationState {
    /// Whether the bot can moderate here. `None` until the admin check has run.
    pub is_active: Option<bool>,
    /// When `is_active` was last recorded.
    pub checked_at: Option<Instant>,
    pub buffer: BatchBuffer,
}

impl ChatModerationState {
    /// The cached admin-check result, or `None` when the check must run again.
    ///
    /// A negative result lapses after `recheck`, so rights granted later are
    /// picked up without a restart.
    pub fn activity(&self, recheck: Duration) -> Option<bool> {
        match (self.is_active, self.checked_at) {
            (Some(false), Some(at)) if at.elapsed() >= recheck => None,
            (known, _) => known,
        }
    }

    pub fn record_activity(&mut self, active: bool) {
        self.is_active = Some(active);
        self.checked_at = Some(Instant::now());
    }
}

/// Everything tracked for one chat.
#[derive(Debug, Clone)]
pub struct ChatState {
    pub moderation: ChatModerationState,
    pub conflict: ConflictState,
}

impl ChatState {
    fn new(batch_size: usize) -> Self {
        Self {
            moderation: ChatModerationState {
                is_active: None,
                checked_at: None,
                buffer: BatchBuffer::new(batch_size),
            },
            conflict: ConflictState::default(),
        }
    }
}

struct Inner {
    chats: HashMap<ChatId, ChatState>,
    purges: PurgeRegistry,
}

/// Owner of all per-chat state.
pub struct StateStore {
    inner: Mutex<Inner>,
    batch_size: usize,
}

impl StateStore {
    pub fn new(batch_size: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                chats: HashMap::new(),
                purges: PurgeRegistry::default(),
            }),
            batch_size,
        }
    }

    /// Run `f` on the chat's record, creating it on first activity.
    pub async fn with_chat<R>(&self, chat_id: ChatId, f: impl FnOnce(&mut ChatState) -> R) -> R {
        let mut inner = self.inner.lock().await;
        let batch_size = self.batch_size;
        let state = inner
            .chats
            .entry(chat_id)
            .or_insert_with(|| ChatState::new(batch_size));
        f(state)
    }

    /// Run `f` on the chat's record if it exists.
    pub async fn read_chat<R>(&self, chat_id: ChatId, f: impl FnOnce(&ChatState) -> R) -> Option<R> {
        let inner = self.inner.lock().await;
        inner.chats.get(&chat_id).map(f)
    }

    /// Run `f` on the chat's record if it exists, without creating it.
    pub async fn update_existing<R>(
        &self,
        chat_id: ChatId,
        f: impl FnOnce(&mut ChatState) -> R,
    ) -> Option<R> {
        let mut inner = self.inner.lock().await;
        inner.chats.get_mut(&chat_id).map(f)
    }

    /// Run `f` on the purge registry.
    pub async fn with_purges<R>(&self, f: impl FnOnce(&mut PurgeRegistry) -> R) -> R {
        let mut inner = self.inner.lock().await;
        f(&mut inner.purges)
    }

    /// Number of chats with a state record.
    pub async fn chat_count(&self) -> usize {
        self.inner.lock().await.chats.len()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::conflict::ConflictPhase;
    use crate::state::StateStore;

    #[tokio::test]
    async fn chat_created_on_first_access() {
        let store = StateStore::new(3);
        assert_eq!(store.chat_count().await, 0);
        assert!(store.read_chat(1, |_| ()).await.is_none());

        let batch_size = store.with_chat(1, |s| s.moderation.buffer.batch_size()).await;
        assert_eq!(batch_size, 3);
        assert_eq!(store.chat_count().await, 1);
    }

    #[tokio::test]
    async fn new_chat_starts_inactive_unknown_and_calm() {
        let store = StateStore::new(3);
        let (active, phase) = store
            .with_chat(9, |s| (s.moderation.is_active, s.conflict.phase))
            .await;
        assert_eq!(active, None);
        assert_eq!(phase, ConflictPhase::None);
    }

    #[tokio::test]
    async fn update_existing_does_not_create() {
        let store = StateStore::new(3);
        assert!(store.update_existing(5, |_| ()).await.is_none());
        assert_eq!(store.chat_count().await, 0);
    }

    #[tokio::test]
    async fn negative_activity_lapses_after_recheck() {
        let store = StateStore::new(3);
        let hour = Duration::from_secs(3600);

        store.with_chat(1, |s| s.moderation.record_activity(false)).await;
        assert_eq!(store.read_chat(1, |s| s.moderation.activity(hour)).await, Some(Some(false)));
        assert_eq!(store.read_chat(1, |s| s.moderation.activity(Duration::ZERO)).await, Some(None));

        store.with_chat(1, |s| s.moderation.record_activity(true)).await;
        assert_eq!(
            store.read_chat(1, |s| s.moderation.activity(Duration::ZERO)).await,
            Some(Some(true))
        );
    }

    #[tokio::test]
    async fn chats_are_independent() {
        let store = StateStore::new(10);
        store.with_chat(1, |s| s.moderation.is_active = Some(true)).await;
        store.with_chat(2, |s| s.moderation.is_active = Some(false)).await;

        assert_eq!(store.read_chat(1, |s| s.moderation.is_active).await, Some(Some(true)));
        assert_eq!(store.read_chat(2, |s| s.moderation.is_active).await, Some(Some(false)));
    }
}
