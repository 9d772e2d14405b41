//! Shared test doubles for the capability traits.
//!
//! Each fake records every call so tests can assert on exactly what the core did.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::capabilities::{HistoryCapability, JudgmentOracle, MessagingCapability};
use crate::error::{RuckusError, Result};
use crate::models::{ChatId, ChatMessage, MessageId, Profile, UserId};

/// Oracle returning a canned verdict.
pub struct FakeOracle {
    verdict: Option<String>,
    calls: Mutex<Vec<(String, String)>>,
}

impl FakeOracle {
    pub fn answering(verdict: &str) -> Self {
        Self {
            verdict: Some(verdict.to_string()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            verdict: None,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl JudgmentOracle for FakeOracle {
    async fn ask(&self, instruction: &str, context: &str) -> Result<String> {
        self.calls
            .lock()
            .unwrap()
            .push((instruction.to_string(), context.to_string()));
        self.verdict
            .clone()
            .ok_or_else(|| RuckusError::Oracle("fake oracle failure".to_string()))
    }
}

/// A platform call made through [`FakeMessaging`].
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Restrict {
        chat_id: ChatId,
        user_id: UserId,
        until: Option<DateTime<Utc>>,
    },
    Ban {
        chat_id: ChatId,
        user_id: UserId,
        until: Option<DateTime<Utc>>,
        revoke_history: bool,
    },
    Delete {
        chat_id: ChatId,
        message_id: MessageId,
    },
    ChatMessage {
        chat_id: ChatId,
        text: String,
    },
    DirectMessage {
        user_id: UserId,
        text: String,
    },
}

/// Messaging capability that records actions.
pub struct FakeMessaging {
    actions: Mutex<Vec<Action>>,
    fail_punishments: bool,
    admin: AtomicBool,
    missing_messages: HashSet<MessageId>,
}

impl FakeMessaging {
    pub fn new() -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
            fail_punishments: false,
            admin: AtomicBool::new(true),
            missing_messages: HashSet::new(),
        }
    }

    /// Restrict and ban calls fail with `Forbidden`.
    pub fn failing_punishments(mut self) -> Self {
        self.fail_punishments = true;
        self
    }

    pub fn without_admin(self) -> Self {
        self.set_admin(false);
        self
    }

    /// Grant or revoke admin rights in every chat.
    pub fn set_admin(&self, admin: bool) {
        self.admin.store(admin, Ordering::SeqCst);
    }

    /// Deleting these ids fails with `NotFound`.
    pub fn with_missing_messages(mut self, ids: impl IntoIterator<Item = MessageId>) -> Self {
        self.missing_messages.extend(ids);
        self
    }

    pub fn actions(&self) -> Vec<Action> {
        self.actions.lock().unwrap().clone()
    }

    pub fn restricts(&self) -> usize {
        self.count(|a| matches!(a, Action::Restrict { .. }))
    }

    pub fn bans(&self) -> usize {
        self.count(|a| matches!(a, Action::Ban { .. }))
    }

    pub fn deletes(&self) -> Vec<MessageId> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::Delete { message_id, .. } => Some(message_id),
                _ => None,
            })
            .collect()
    }

    pub fn chat_messages(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::ChatMessage { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn direct_messages(&self) -> Vec<String> {
        self.actions()
            .into_iter()
            .filter_map(|a| match a {
                Action::DirectMessage { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn count(&self, pred: impl Fn(&Action) -> bool) -> usize {
        self.actions.lock().unwrap().iter().filter(|a| pred(a)).count()
    }

    fn record(&self, action: Action) {
        self.actions.lock().unwrap().push(action);
    }
}

#[async_trait]
impl MessagingCapability for FakeMessaging {
    async fn restrict(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        until: Option<DateTime<Utc>>,
    ) -> Result<()> {
        if self.fail_punishments {
            return Err(RuckusError::Forbidden("restrict".to_string()));
        }
        self.record(Action::Restrict {
            chat_id,
            user_id,
            until,
        });
        Ok(())
    }

    async fn ban(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        until: Option<DateTime<Utc>>,
        revoke_history: bool,
    ) -> Result<()> {
        if self.fail_punishments {
            return Err(RuckusError::Forbidden("ban".to_string()));
        }
        self.record(Action::Ban {
            chat_id,
            user_id,
            until,
            revoke_history,
        });
        Ok(())
    }

    async fn delete_message(&self, chat_id: ChatId, message_id: MessageId) -> Result<()> {
        if self.missing_messages.contains(&message_id) {
            return Err(RuckusError::NotFound(format!("message {}", message_id)));
        }
        self.record(Action::Delete {
            chat_id,
            message_id,
        });
        Ok(())
    }

    async fn send_chat_message(&self, chat_id: ChatId, text: &str) -> Result<()> {
        self.record(Action::ChatMessage {
            chat_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn send_direct_message(&self, user_id: UserId, text: &str) -> Result<()> {
        self.record(Action::DirectMessage {
            user_id,
            text: text.to_string(),
        });
        Ok(())
    }

    async fn can_moderate(&self, _chat_id: ChatId) -> Result<bool> {
        Ok(self.admin.load(Ordering::SeqCst))
    }
}

/// In-memory history.
pub struct FakeHistory {
    messages: Vec<ChatMessage>,
    profiles: Vec<Profile>,
    fail: bool,
}

impl FakeHistory {
    pub fn new() -> Self {
        Self {
            messages: Vec::new(),
            profiles: Vec::new(),
            fail: false,
        }
    }

    pub fn with_messages(mut self, messages: Vec<ChatMessage>) -> Self {
        self.messages = messages;
        self
    }

    pub fn with_profiles(mut self, profiles: Vec<Profile>) -> Self {
        self.profiles = profiles;
        self
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }
}

#[async_trait]
impl HistoryCapability for FakeHistory {
    async fn messages_since(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>> {
        if self.fail {
            return Err(RuckusError::History("fake history failure".to_string()));
        }
        let mut found: Vec<ChatMessage> = self
            .messages
            .iter()
            .filter(|m| m.chat_id == chat_id && m.author_id() == Some(user_id) && m.timestamp > since)
            .cloned()
            .collect();
        found.sort_by_key(|m| (m.timestamp, m.id));
        found.truncate(limit);
        Ok(found)
    }

    async fn all_profiles(&self, _chat_id: ChatId) -> Result<Vec<Profile>> {
        if self.fail {
            return Err(RuckusError::History("fake history failure".to_string()));
        }
        Ok(self.profiles.clone())
    }
}
