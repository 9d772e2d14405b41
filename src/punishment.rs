//! Punishment execution.
//!
//! Turns a rule's punishment kind into platform calls and sends the
//! notices the rule asks for.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::capabilities::MessagingCapability;
use crate::config::PunishmentDurations;
use crate::error::{RuckusError, Result};
use crate::models::{ChatId, ChatMessage, UserId};
use crate::purge::PurgeManager;
use crate::rules::{PunishmentKind, Rule};

/// A kick is a ban that expires almost immediately.
pub const KICK_BAN_DURATION: Duration = Duration::from_secs(60);

/// Applies punishments through the messaging capability.
#[derive(Clone)]
pub struct PunishmentExecutor {
    messaging: Arc<dyn MessagingCapability>,
    purges: PurgeManager,
    durations: PunishmentDurations,
    notify_enabled: bool,
}

impl PunishmentExecutor {
    pub fn new(
        messaging: Arc<dyn MessagingCapability>,
        purges: PurgeManager,
        durations: PunishmentDurations,
        notify_enabled: bool,
    ) -> Self {
        Self {
            messaging,
            purges,
            durations,
            notify_enabled,
        }
    }

    /// Punish `user_id` in `chat_id` for breaking `rule` with `trigger`.
    ///
    /// A failed platform call posts a failure notice to the chat and returns the
    /// error; no success notice follows. A purge succeeds once it is scheduled.
    pub async fn apply(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        display_name: &str,
        rule: &Rule,
        trigger: &ChatMessage,
    ) -> Result<()> {
        let now = Utc::now();
        let kind = rule.punishment;
        let until = match kind {
            PunishmentKind::Mute => expiry(now, self.durations.mute),
            PunishmentKind::Ban => expiry(now, self.durations.ban),
            PunishmentKind::Kick => expiry(now, KICK_BAN_DURATION),
            PunishmentKind::None | PunishmentKind::Purge => None,
        };

        let outcome = match kind {
            PunishmentKind::None => Ok(()),
            PunishmentKind::Mute => self.messaging.restrict(chat_id, user_id, until).await,
            PunishmentKind::Kick | PunishmentKind::Ban => {
                self.messaging.ban(chat_id, user_id, until, false).await
            }
            PunishmentKind::Purge => {
                self.purges
                    .start(chat_id, user_id, self.durations.purge_lookback, &rule.name)
                    .await
            }
        };

        let content_hash = hash_content(trigger.body());

        match outcome {
            Ok(()) => {}
            Err(RuckusError::AlreadyHandled(reason)) => {
                debug!(
                    chat_id = chat_id,
                    user_id = user_id,
                    rule = %rule.name,
                    reason = %reason,
                    "Punishment already in effect"
                );
                return Ok(());
            }
            Err(e) => {
                warn!(
                    chat_id = chat_id,
                    user_id = user_id,
                    rule = %rule.name,
                    punishment = kind.as_str(),
                    content_hash = %content_hash,
                    error = %e,
                    "Punishment failed"
                );
                let notice = format!(
                    "Could not apply {} to {} for rule \"{}\": {}",
                    kind.as_str(),
                    display_name,
                    rule.name,
                    e.user_message()
                );
                self.notify_chat(chat_id, &notice).await;
                return Err(e);
            }
        }

        info!(
            chat_id = chat_id,
            user_id = user_id,
            rule = %rule.name,
            punishment = kind.as_str(),
            until = ?until,
            content_hash = %content_hash,
            "Punishment applied"
        );

        if !self.notify_enabled {
            return Ok(());
        }

        if rule.notify_chat {
            let notice = chat_notice(display_name, rule, until);
            self.notify_chat(chat_id, &notice).await;
        }

        if rule.notify_user && kind != PunishmentKind::Purge {
            let notice = direct_notice(rule, until);
            if let Err(e) = self.messaging.send_direct_message(user_id, &notice).await {
                debug!(user_id = user_id, error = %e, "Could not send direct notice");
            }
        }

        Ok(())
    }

    async fn notify_chat(&self, chat_id: ChatId, text: &str) {
        if let Err(e) = self.messaging.send_chat_message(chat_id, text).await {
            warn!(chat_id = chat_id, error = %e, "Failed to send chat notice");
        }
    }
}

/// Expiry for a time-boxed punishment. Zero means permanent.
pub fn expiry(now: DateTime<Utc>, duration: Duration) -> Option<DateTime<Utc>> {
    if duration.is_zero() {
        return None;
    }
    chrono::Duration::from_std(duration).ok().map(|d| now + d)
}

/// Hash content using SHA-256 (first 16 hex chars).
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    let result = hasher.finalize();
    hex::encode(&result[..8])
}

fn until_suffix(until: Option<DateTime<Utc>>) -> String {
    until
        .map(|t| format!(" until {}", t.format("%Y-%m-%d %H:%M UTC")))
        .unwrap_or_default()
}

fn note_suffix(rule: &Rule) -> String {
    if rule.note.trim().is_empty() {
        String::new()
    } else {
        format!("\n{}", rule.note.trim())
    }
}

fn chat_notice(display_name: &str, rule: &Rule, until: Option<DateTime<Utc>>) -> String {
    let until = match rule.punishment {
        PunishmentKind::Mute | PunishmentKind::Ban => until_suffix(until),
        _ => String::new(),
    };
    format!(
        "{} {}{} for breaking rule \"{}\".{}",
        display_name,
        rule.punishment.describe(),
        until,
        rule.name,
        note_suffix(rule)
    )
}

fn direct_notice(rule: &Rule, until: Option<DateTime<Utc>>) -> String {
    let action = match rule.punishment {
        PunishmentKind::None => "Your message was flagged".to_string(),
        PunishmentKind::Mute => format!("You were muted{}", until_suffix(until)),
        PunishmentKind::Kick => "You were removed from the chat".to_string(),
        PunishmentKind::Ban => format!("You were banned{}", until_suffix(until)),
        PunishmentKind::Purge => "Your recent messages were removed".to_string(),
    };
    format!("{} for breaking rule \"{}\".{}", action, rule.name, note_suffix(rule))
}
