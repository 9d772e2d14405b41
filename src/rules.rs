//! Moderation rules.
//!
//! Rules are loaded once at startup from a JSON file and never change afterwards.
//! Declared order is evaluation order.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{RuckusError, Result};
use crate::models::ChatId;

/// Keyword that makes a rule match any message.
pub const MATCH_ANYTHING: &str = "*";

/// Chat or user scope of a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "RawScope", into = "RawScope")]
pub enum Scope {
    /// Applies everywhere / to everyone.
    #[default]
    Any,
    /// Applies to one id.
    Id(i64),
    /// Unparseable id from configuration. Never matches.
    Invalid,
}

impl Scope {
    pub fn admits(&self, id: i64) -> bool {
        match self {
            Scope::Any => true,
            Scope::Id(expected) => *expected == id,
            Scope::Invalid => false,
        }
    }
}

/// Scope as written in the rules file: a number or a string.
#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawScope {
    Id(i64),
    Text(String),
}

impl From<RawScope> for Scope {
    fn from(raw: RawScope) -> Self {
        match raw {
            RawScope::Id(id) => Scope::Id(id),
            RawScope::Text(text) => {
                let text = text.trim();
                if text.is_empty() || text == "*" || text.eq_ignore_ascii_case("all") {
                    Scope::Any
                } else {
                    text.parse().map(Scope::Id).unwrap_or(Scope::Invalid)
                }
            }
        }
    }
}

impl From<Scope> for RawScope {
    fn from(scope: Scope) -> Self {
        match scope {
            Scope::Any => RawScope::Text("*".to_string()),
            Scope::Id(id) => RawScope::Id(id),
            Scope::Invalid => RawScope::Text("invalid".to_string()),
        }
    }
}

/// Keyword predicate of a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub enum KeywordSet {
    Anything,
    /// Lower-cased whole-word keywords or phrases.
    Words(Vec<String>),
}

impl From<Vec<String>> for KeywordSet {
    fn from(words: Vec<String>) -> Self {
        if words.len() == 1 && words[0].trim() == MATCH_ANYTHING {
            return KeywordSet::Anything;
        }
        KeywordSet::Words(
            words
                .into_iter()
                .map(|w| w.trim().to_lowercase())
                .filter(|w| !w.is_empty())
                .collect(),
        )
    }
}

impl From<KeywordSet> for Vec<String> {
    fn from(set: KeywordSet) -> Self {
        match set {
            KeywordSet::Anything => vec![MATCH_ANYTHING.to_string()],
            KeywordSet::Words(words) => words,
        }
    }
}

/// What happens to a member whose message triggered a rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PunishmentKind {
    /// Only announce the violation.
    #[default]
    None,
    Mute,
    Kick,
    Ban,
    /// Delete the member's recent messages.
    Purge,
}

impl PunishmentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Mute => "mute",
            Self::Kick => "kick",
            Self::Ban => "ban",
            Self::Purge => "purge",
        }
    }

    /// Past-tense phrase for notices, e.g. "was muted".
    pub fn describe(&self) -> &'static str {
        match self {
            Self::None => "was flagged",
            Self::Mute => "was muted",
            Self::Kick => "was kicked",
            Self::Ban => "was banned",
            Self::Purge => "had their recent messages removed",
        }
    }
}

/// A single moderation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default)]
    pub chat: Scope,
    #[serde(default)]
    pub user: Scope,
    pub keywords: KeywordSet,
    /// Instruction for the judgment oracle. Empty means punish on every match.
    #[serde(default)]
    pub judgment: String,
    #[serde(default)]
    pub punishment: PunishmentKind,
    #[serde(default)]
    pub notify_chat: bool,
    #[serde(default)]
    pub notify_user: bool,
    #[serde(default)]
    pub note: String,
}

impl Rule {
    /// Rule matching the given keywords everywhere with no confirmation.
    pub fn keyword(name: impl Into<String>, keywords: &[&str], punishment: PunishmentKind) -> Self {
        Self {
            name: name.into(),
            chat: Scope::Any,
            user: Scope::Any,
            keywords: KeywordSet::from(keywords.iter().map(|k| k.to_string()).collect::<Vec<_>>()),
            judgment: String::new(),
            punishment,
            notify_chat: false,
            notify_user: false,
            note: String::new(),
        }
    }

    pub fn with_judgment(mut self, judgment: impl Into<String>) -> Self {
        self.judgment = judgment.into();
        self
    }

    pub fn with_notifications(mut self, chat: bool, user: bool) -> Self {
        self.notify_chat = chat;
        self.notify_user = user;
        self
    }

    pub fn in_chat(mut self, chat_id: ChatId) -> Self {
        self.chat = Scope::Id(chat_id);
        self
    }

    pub fn needs_judgment(&self) -> bool {
        !self.judgment.trim().is_empty()
    }
}

/// Parse a JSON array of rules.
pub fn parse_rules(json: &str) -> Result<Vec<Rule>> {
    serde_json::from_str(json)
        .map_err(|e| RuckusError::Config(format!("Failed to parse rules: {}", e)))
}

/// Load rules from a JSON file.
pub fn load_rules_from_file(path: impl AsRef<Path>) -> Result<Vec<Rule>> {
    let content = fs::read_to_string(path.as_ref())
        .map_err(|e| RuckusError::Config(format!("Failed to read rules file: {}", e)))?;
    let rules = parse_rules(&content)?;

    for rule in &rules {
        if rule.chat == Scope::Invalid || rule.user == Scope::Invalid {
            tracing::warn!(rule = %rule.name, "Rule has an invalid scope and will never match");
        }
    }

    Ok(rules)
}


#[cfg(test)]
mod property_tests {
    use proptest::prelude::*;

    use crate::rules::Scope;

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// A scope parsed from any integer admits exactly that id.
        #[test]
        fn prop_id_scope_admits_only_itself(id in any::<i64>(), other in any::<i64>()) {
            let scope: Scope = serde_json::from_str(&id.to_string()).expect("number scope");
            prop_assert!(scope.admits(id));
            prop_assert_eq!(scope.admits(other), other == id);
        }

        /// Non-numeric words never produce a matching scope.
        #[test]
        fn prop_word_scope_is_invalid(word in "[a-z]{3,12}".prop_filter("not all", |w| w != "all")) {
            let scope: Scope = serde_json::from_str(&format!("\"{}\"", word)).expect("string scope");
            prop_assert_eq!(scope, Scope::Invalid);
        }
    }
}
