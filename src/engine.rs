//! Rule evaluation for released batches.
//!
//! Each message is checked against the rules in declared order. The first rule
//! that matches decides the message: it is confirmed by the judgment oracle when
//! the rule carries an instruction, then handed to the punishment executor.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;
use tracing::{debug, info, warn};

use crate::capabilities::{HistoryCapability, JudgmentOracle};
use crate::error::ErrorContext;
use crate::filter::first_match;
use crate::models::{ChatId, ChatMessage, UserId};
use crate::punishment::PunishmentExecutor;
use crate::rules::Rule;

/// How long a chat's alias map is reused before profiles are fetched again.
const ALIAS_TTL: Duration = Duration::from_secs(300);

type AliasMap = Arc<HashMap<UserId, String>>;

/// Counts from one batch evaluation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Messages with an author and a body.
    pub evaluated: usize,
    /// Messages that matched a rule.
    pub matched: usize,
    /// Messages whose punishment was applied.
    pub punished: usize,
}

/// Evaluates batches against the configured rules.
#[derive(Clone)]
pub struct RulesEngine {
    rules: Arc<Vec<Rule>>,
    oracle: Arc<dyn JudgmentOracle>,
    history: Arc<dyn HistoryCapability>,
    executor: PunishmentExecutor,
    affirmative_marker: String,
    aliases: Cache<ChatId, AliasMap>,
}

impl RulesEngine {
    pub fn new(
        rules: Vec<Rule>,
        oracle: Arc<dyn JudgmentOracle>,
        history: Arc<dyn HistoryCapability>,
        executor: PunishmentExecutor,
        affirmative_marker: impl Into<String>,
    ) -> Self {
        Self {
            rules: Arc::new(rules),
            oracle,
            history,
            executor,
            affirmative_marker: affirmative_marker.into(),
            aliases: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(ALIAS_TTL)
                .build(),
        }
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    /// Evaluate one released batch in arrival order.
    ///
    /// Failures are contained per message: an oracle error or a failed
    /// punishment never stops the rest of the batch.
    pub async fn evaluate_batch(&self, chat_id: ChatId, messages: Vec<ChatMessage>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        if self.rules.is_empty() || messages.is_empty() {
            return outcome;
        }

        let aliases = self.aliases_for(chat_id).await;
        let transcript = build_transcript(&messages, &aliases);

        for message in &messages {
            let Some(author_id) = message.author_id() else {
                continue;
            };
            if message.body().is_empty() {
                continue;
            }
            outcome.evaluated += 1;

            let Some(rule) = first_match(message, &self.rules, chat_id) else {
                continue;
            };
            outcome.matched += 1;

            debug!(
                chat_id = chat_id,
                user_id = author_id,
                message_id = message.id,
                rule = %rule.name,
                "Rule matched"
            );

            if !self.confirm(chat_id, rule, &transcript).await {
                continue;
            }

            let display_name = aliases
                .get(&author_id)
                .map(String::as_str)
                .unwrap_or_else(|| message.display_name());

            match self
                .executor
                .apply(chat_id, author_id, display_name, rule, message)
                .await
            {
                Ok(()) => outcome.punished += 1,
                Err(e) => {
                    let ctx = ErrorContext::new("apply_punishment")
                        .with_chat_id(chat_id)
                        .with_user_id(author_id);
                    e.log_with_context(&ctx);
                }
            }
        }

        info!(
            chat_id = chat_id,
            batch = messages.len(),
            evaluated = outcome.evaluated,
            matched = outcome.matched,
            punished = outcome.punished,
            "Batch evaluated"
        );

        outcome
    }

    /// Whether a matched rule is authorized to punish.
    async fn confirm(&self, chat_id: ChatId, rule: &Rule, transcript: &str) -> bool {
        if !rule.needs_judgment() {
            return true;
        }

        match self.oracle.ask(&rule.judgment, transcript).await {
            Ok(verdict) => {
                let positive = is_affirmative(&verdict, &self.affirmative_marker);
                info!(
                    chat_id = chat_id,
                    rule = %rule.name,
                    positive = positive,
                    "Oracle verdict"
                );
                positive
            }
            Err(e) => {
                warn!(chat_id = chat_id, rule = %rule.name, error = %e, "Oracle call failed, skipping punishment");
                false
            }
        }
    }

    /// Drop the cached aliases of a chat so the next batch reads fresh profiles.
    pub async fn forget_aliases(&self, chat_id: ChatId) {
        self.aliases.invalidate(&chat_id).await;
    }

    /// Author id to display alias, from stored profiles.
    async fn aliases_for(&self, chat_id: ChatId) -> AliasMap {
        let history = Arc::clone(&self.history);
        let fetched = self
            .aliases
            .try_get_with(chat_id, async move {
                let profiles = history.all_profiles(chat_id).await?;
                let map: HashMap<UserId, String> = profiles
                    .iter()
                    .map(|p| (p.user_id, p.display().to_string()))
                    .collect();
                Ok::<_, crate::error::RuckusError>(Arc::new(map))
            })
            .await;

        match fetched {
            Ok(map) => map,
            Err(e) => {
                warn!(chat_id = chat_id, error = %e, "Profile lookup failed, using display names");
                Arc::new(HashMap::new())
            }
        }
    }
}

/// Whether the oracle's verdict starts with the affirmative marker,
/// ignoring surrounding whitespace and case.
///
/// ```
/// use ruckus::engine::is_affirmative;
///
/// assert!(is_affirmative("  положительно, это спам", "ПОЛОЖИТЕЛЬНО"));
/// assert!(!is_affirmative("ОТРИЦАТЕЛЬНО", "ПОЛОЖИТЕЛЬНО"));
/// ```
pub fn is_affirmative(verdict: &str, marker: &str) -> bool {
    let marker = marker.trim().to_lowercase();
    !marker.is_empty() && verdict.trim().to_lowercase().starts_with(&marker)
}

/// One line per message: `alias [HH:MM:SS]: text`.
pub fn build_transcript(messages: &[ChatMessage], aliases: &HashMap<UserId, String>) -> String {
    messages
        .iter()
        .filter(|m| !m.body().is_empty())
        .map(|m| {
            let name = m
                .author_id()
                .and_then(|id| aliases.get(&id))
                .map(String::as_str)
                .unwrap_or_else(|| m.display_name());
            format!("{} [{}]: {}", name, m.timestamp.format("%H:%M:%S"), m.body())
        })
        .collect::<Vec<_>>()
        .join("\n")
}
