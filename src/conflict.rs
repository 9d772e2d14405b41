//! Conflict episode tracking.
//!
//! Each chat runs a small state machine: a triggering message (reply, mention or
//! keyword) opens an episode, later messages are collected into a log, and once
//! the chat has been quiet for the configured timeout the log is summarized by the
//! judgment oracle and the chat returns to calm.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use crate::capabilities::{JudgmentOracle, MessagingCapability};
use crate::config::ConflictConfig;
use crate::models::{ChatId, ChatMessage};
use crate::state::StateStore;

/// Lifecycle phase of a chat's conflict episode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConflictPhase {
    /// No episode in progress.
    #[default]
    None,
    /// Episode open, messages are being collected.
    Detected,
    /// Log handed to the analyzer; new messages are ignored.
    Analyzing,
}

impl ConflictPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictPhase::None => "none",
            ConflictPhase::Detected => "detected",
            ConflictPhase::Analyzing => "analyzing",
        }
    }
}

/// What the detector must do after a transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictEffect {
    Nothing,
    /// An episode just started; warn the chat once.
    Warn,
    /// Sample the oracle on the episode so far. The verdict is only logged.
    Confirm { transcript: String },
    /// The episode went quiet. The chat is already `Analyzing` and this is
    /// the log taken from it.
    Analyze { log: Vec<String> },
}

/// Conflict state of one chat.
///
/// The log is non-empty exactly while the phase is [`ConflictPhase::Detected`].
#[derive(Debug, Clone, Default)]
pub struct ConflictState {
    pub phase: ConflictPhase,
    pub started_at: Option<DateTime<Utc>>,
    pub last_trigger: Option<DateTime<Utc>>,
    pub log: Vec<String>,
    /// Triggers seen since the episode opened, not counting the opening one.
    pub confirmations: u32,
}

impl ConflictState {
    /// Feed one formatted message into the state machine.
    pub fn advance(
        &mut self,
        line: String,
        is_trigger: bool,
        at: DateTime<Utc>,
        config: &ConflictConfig,
    ) -> ConflictEffect {
        match (self.phase, is_trigger) {
            (ConflictPhase::None, false) => ConflictEffect::Nothing,
            (ConflictPhase::None, true) => {
                self.phase = ConflictPhase::Detected;
                self.started_at = Some(at);
                self.last_trigger = Some(at);
                self.log = vec![line];
                self.confirmations = 0;
                ConflictEffect::Warn
            }
            (ConflictPhase::Detected, true) => {
                self.log.push(line);
                self.last_trigger = Some(at);
                self.confirmations += 1;
                if self.confirmations % config.confirm_every.max(1) == 0 {
                    ConflictEffect::Confirm {
                        transcript: self.log.join("\n"),
                    }
                } else {
                    ConflictEffect::Nothing
                }
            }
            (ConflictPhase::Detected, false) => {
                let last = self.last_trigger.or(self.started_at).unwrap_or(at);
                // Out-of-order timestamps count as no time elapsed.
                let elapsed = (at - last).to_std().unwrap_or_default();
                if elapsed > config.timeout {
                    self.phase = ConflictPhase::Analyzing;
                    ConflictEffect::Analyze {
                        log: std::mem::take(&mut self.log),
                    }
                } else {
                    self.log.push(line);
                    ConflictEffect::Nothing
                }
            }
            (ConflictPhase::Analyzing, _) => ConflictEffect::Nothing,
        }
    }

    /// Move to `Analyzing` and hand out the log, if an episode is ready for it.
    pub fn begin_analysis(&mut self) -> Option<Vec<String>> {
        if self.phase != ConflictPhase::Detected || self.log.is_empty() {
            return None;
        }
        self.phase = ConflictPhase::Analyzing;
        Some(std::mem::take(&mut self.log))
    }

    /// Return to calm after an analysis. No-op unless still `Analyzing`.
    pub fn finish_analysis(&mut self) -> bool {
        if self.phase != ConflictPhase::Analyzing {
            return false;
        }
        self.reset();
        true
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Whether a message escalates a conflict: a reply, a mention of someone else,
/// or a keyword anywhere in the text.
pub fn is_trigger(message: &ChatMessage, keywords: &[String]) -> bool {
    if message.reply_to.is_some() {
        return true;
    }

    let author_id = message.author_id();
    if message.mentions.iter().any(|id| Some(*id) != author_id) {
        return true;
    }

    let body = message.body();
    if body.is_empty() || keywords.is_empty() {
        return false;
    }
    let lowered = body.to_lowercase();
    keywords
        .iter()
        .filter(|k| !k.is_empty())
        .any(|k| lowered.contains(&k.to_lowercase()))
}

/// Log line for one message: `[HH:MM:SS] name: text`.
pub fn format_line(message: &ChatMessage) -> String {
    let body = message.body();
    format!(
        "[{}] {}: {}",
        message.timestamp.format("%H:%M:%S"),
        message.display_name(),
        if body.is_empty() { "[media]" } else { body }
    )
}

/// Drives conflict state for every chat and runs its side effects in the background.
#[derive(Clone)]
pub struct ConflictDetector {
    store: Arc<StateStore>,
    oracle: Arc<dyn JudgmentOracle>,
    messaging: Arc<dyn MessagingCapability>,
    config: Arc<ConflictConfig>,
    tasks: TaskTracker,
}

impl ConflictDetector {
    pub fn new(
        store: Arc<StateStore>,
        oracle: Arc<dyn JudgmentOracle>,
        messaging: Arc<dyn MessagingCapability>,
        config: ConflictConfig,
        tasks: TaskTracker,
    ) -> Self {
        Self {
            store,
            oracle,
            messaging,
            config: Arc::new(config),
            tasks,
        }
    }

    /// Classify a message and advance its chat's episode.
    ///
    /// Returns the effect that was scheduled. Side effects run on tracked tasks,
    /// so this never waits on the oracle or the platform.
    pub async fn observe(&self, message: &ChatMessage) -> ConflictEffect {
        if !self.config.enabled || message.author.is_none() {
            return ConflictEffect::Nothing;
        }

        let chat_id = message.chat_id;
        let trigger = is_trigger(message, &self.config.keywords);
        let line = format_line(message);
        let config = &self.config;

        let (effect, phase) = self
            .store
            .with_chat(chat_id, |state| {
                let effect = state.conflict.advance(line, trigger, message.timestamp, config);
                (effect, state.conflict.phase)
            })
            .await;

        if effect != ConflictEffect::Nothing {
            debug!(
                chat_id = chat_id,
                phase = phase.as_str(),
                effect = ?effect,
                "Conflict state advanced"
            );
        }

        match &effect {
            ConflictEffect::Nothing => {}
            ConflictEffect::Warn => {
                info!(chat_id = chat_id, "Conflict episode started");
                let messaging = Arc::clone(&self.messaging);
                let text = self.config.warning_text.clone();
                self.tasks.spawn(async move {
                    if let Err(e) = messaging.send_chat_message(chat_id, &text).await {
                        warn!(chat_id = chat_id, error = %e, "Failed to send conflict warning");
                    }
                });
            }
            ConflictEffect::Confirm { transcript } => {
                let oracle = Arc::clone(&self.oracle);
                let instruction = self.config.confirm_instruction.clone();
                let transcript = transcript.clone();
                self.tasks.spawn(async move {
                    match oracle.ask(&instruction, &transcript).await {
                        Ok(verdict) => {
                            info!(chat_id = chat_id, verdict = %verdict.trim(), "Conflict confirmation")
                        }
                        Err(e) => warn!(chat_id = chat_id, error = %e, "Conflict confirmation failed"),
                    }
                });
            }
            ConflictEffect::Analyze { log } => {
                let detector = self.clone();
                let log = log.clone();
                self.tasks.spawn(async move {
                    detector.summarize(chat_id, log).await;
                });
            }
        }

        effect
    }

    /// Close the chat's open episode now and summarize it, without waiting
    /// for the quiet period.
    ///
    /// Only runs when the chat is `Detected`, so an episode is never summarized
    /// twice. The summary is produced in the background; returns whether one
    /// was started.
    pub async fn analyze(&self, chat_id: ChatId) -> bool {
        let taken = self
            .store
            .update_existing(chat_id, |state| state.conflict.begin_analysis())
            .await;

        let log = match taken {
            None => {
                warn!(chat_id = chat_id, "No chat state for conflict analysis");
                return false;
            }
            Some(None) => {
                debug!(chat_id = chat_id, "Conflict analysis not needed");
                return false;
            }
            Some(Some(log)) => log,
        };

        let detector = self.clone();
        self.tasks.spawn(async move {
            detector.summarize(chat_id, log).await;
        });
        true
    }

    /// Ask the oracle for a summary of `log`, post it, and return the chat to calm.
    async fn summarize(&self, chat_id: ChatId, log: Vec<String>) {
        info!(chat_id = chat_id, lines = log.len(), "Analyzing conflict episode");
        let transcript = log.join("\n");

        let text = match self.oracle.ask(&self.config.summary_instruction, &transcript).await {
            Ok(summary) if !summary.trim().is_empty() => summary,
            Ok(_) => {
                warn!(chat_id = chat_id, "Oracle returned an empty conflict summary");
                self.config.failure_notice.clone()
            }
            Err(e) => {
                warn!(chat_id = chat_id, error = %e, "Conflict summary failed");
                self.config.failure_notice.clone()
            }
        };

        if let Err(e) = self.messaging.send_chat_message(chat_id, &text).await {
            warn!(chat_id = chat_id, error = %e, "Failed to post conflict summary");
        }

        let reset = self
            .store
            .update_existing(chat_id, |state| state.conflict.finish_analysis())
            .await;
        if reset != Some(true) {
            debug!(chat_id = chat_id, "Conflict state changed during analysis");
        }
    }

    /// Current phase for a chat, if it has state.
    pub async fn phase(&self, chat_id: ChatId) -> Option<ConflictPhase> {
        self.store.read_chat(chat_id, |s| s.conflict.phase).await
    }
}


#[cfg(test)]
mod property_tests {
    use std::time::Duration;

    use chrono::{TimeZone, Utc};
    use proptest::prelude::*;

    use crate::config::ConflictConfig;
    use crate::conflict::{ConflictEffect, ConflictPhase, ConflictState};

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// The log is empty exactly when no episode is open, and at most one warning
        /// is emitted per episode, for any sequence of triggers and gaps.
        #[test]
        fn prop_log_empty_iff_calm(steps in prop::collection::vec((any::<bool>(), 0i64..400), 1..60)) {
            let config = ConflictConfig {
                timeout: Duration::from_secs(300),
                confirm_every: 3,
                ..ConflictConfig::default()
            };
            let mut state = ConflictState::default();
            let mut now = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
            let mut warnings_this_episode = 0;

            for (i, (trigger, gap)) in steps.into_iter().enumerate() {
                now += chrono::Duration::seconds(gap);
                let effect = state.advance(format!("line {}", i), trigger, now, &config);

                match effect {
                    ConflictEffect::Warn => warnings_this_episode += 1,
                    ConflictEffect::Analyze { log } => {
                        prop_assert!(!log.is_empty());
                        prop_assert_eq!(state.phase, ConflictPhase::Analyzing);
                        prop_assert!(state.finish_analysis());
                        warnings_this_episode = 0;
                    }
                    _ => {}
                }

                prop_assert!(warnings_this_episode <= 1);
                prop_assert_eq!(state.log.is_empty(), state.phase != ConflictPhase::Detected);
            }
        }
    }
}
