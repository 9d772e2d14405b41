//! Configuration loading from environment.
//!
//! Reads secrets and tuning knobs from environment variables and the rule list
//! from a JSON file.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::buffer::DEFAULT_BATCH_SIZE;
use crate::error::{RuckusError, Result};
use crate::rules::{load_rules_from_file, Rule};

/// Affirmative verdict marker the oracle is instructed to answer with.
pub const DEFAULT_AFFIRMATIVE_MARKER: &str = "ПОЛОЖИТЕЛЬНО";

/// Main configuration for the bot process.
#[derive(Debug, Clone)]
pub struct RuckusConfig {
    /// Discord bot token.
    pub discord_token: String,
    /// Gemini API key.
    pub gemini_api_key: String,
    /// Gemini requests allowed per minute.
    pub gemini_rpm: u32,
    pub database_path: String,
    pub health_port: u16,
    /// Stored messages older than this are pruned.
    pub history_retention: Duration,
    pub moderation: ModerationConfig,
    pub conflict: ConflictConfig,
}

/// Settings consumed by the rule pipeline.
#[derive(Debug, Clone)]
pub struct ModerationConfig {
    /// Messages per chat released together for rule evaluation.
    pub batch_size: usize,
    pub rules: Vec<Rule>,
    /// Verdict prefix counted as confirmation (case-insensitive).
    pub affirmative_marker: String,
    pub durations: PunishmentDurations,
    /// Pause between deletions while purging.
    pub purge_delete_delay: Duration,
    /// Global switch for violation notices.
    pub notify_enabled: bool,
    /// How long a chat without admin rights is ignored before checking again.
    pub activity_recheck: Duration,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            rules: Vec::new(),
            affirmative_marker: DEFAULT_AFFIRMATIVE_MARKER.to_string(),
            durations: PunishmentDurations::default(),
            purge_delete_delay: Duration::from_millis(350),
            notify_enabled: true,
            activity_recheck: Duration::from_secs(600),
        }
    }
}

/// Punishment lengths. A zero duration means permanent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PunishmentDurations {
    pub mute: Duration,
    pub ban: Duration,
    /// How far back a purge deletes.
    pub purge_lookback: Duration,
}

impl Default for PunishmentDurations {
    fn default() -> Self {
        Self {
            mute: Duration::from_secs(3600),
            ban: Duration::ZERO,
            purge_lookback: Duration::from_secs(24 * 3600),
        }
    }
}

/// Settings for conflict episode tracking.
#[derive(Debug, Clone)]
pub struct ConflictConfig {
    pub enabled: bool,
    /// Lower-cased substrings that mark a message as a trigger.
    pub keywords: Vec<String>,
    /// Quiet period after the last trigger before the episode is summarized.
    pub timeout: Duration,
    /// Every Nth trigger within an episode asks the oracle for confirmation.
    pub confirm_every: u32,
    pub warning_text: String,
    pub confirm_instruction: String,
    pub summary_instruction: String,
    /// Posted when the summary cannot be produced.
    pub failure_notice: String,
}

impl Default for ConflictConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            keywords: Vec::new(),
            timeout: Duration::from_secs(300),
            confirm_every: 5,
            warning_text: "Heads up: this conversation is heating up. Please keep it civil."
                .to_string(),
            confirm_instruction: "Decide whether the following chat excerpt is an argument \
                between members. Answer with one word."
                .to_string(),
            summary_instruction: "Summarize the argument below: who argued, about what, and \
                how it ended. Be neutral and brief."
                .to_string(),
            failure_notice: "Could not summarize the recent argument.".to_string(),
        }
    }
}

impl RuckusConfig {
    /// Load configuration from environment variables.
    ///
    /// Required environment variables:
    /// - `DISCORD_TOKEN`: Discord bot token
    /// - `GEMINI_API_KEY`: Gemini API key
    ///
    /// Optional environment variables:
    /// - `RULES_PATH`: Path to the JSON rules file (default: no rules)
    /// - `MOD_BATCH_SIZE`: Messages per evaluation batch (default: 10)
    /// - `MUTE_DURATION_SECS`, `BAN_DURATION_SECS`, `PURGE_LOOKBACK_SECS`
    /// - `PURGE_DELETE_DELAY_MS`: Delay between purge deletions (default: 350)
    /// - `ACTIVITY_RECHECK_SECS`: Admin-rights recheck for ignored chats (default: 600)
    /// - `CONFLICT_KEYWORDS`: Comma-separated trigger keywords
    /// - `CONFLICT_TIMEOUT_SECS`, `CONFLICT_CONFIRM_EVERY`
    pub fn from_env() -> Result<Self> {
        let discord_token = env::var("DISCORD_TOKEN")
            .map_err(|_| RuckusError::Config("DISCORD_TOKEN not set".to_string()))?;

        let gemini_api_key = env::var("GEMINI_API_KEY")
            .map_err(|_| RuckusError::Config("GEMINI_API_KEY not set".to_string()))?;

        let rules = match env::var("RULES_PATH") {
            Ok(path) => load_rules_from_file(&path)?,
            Err(_) => {
                tracing::warn!("RULES_PATH not set, running without moderation rules");
                Vec::new()
            }
        };

        let moderation_defaults = ModerationConfig::default();
        let duration_defaults = PunishmentDurations::default();
        let moderation = ModerationConfig {
            batch_size: parse_var("MOD_BATCH_SIZE", DEFAULT_BATCH_SIZE).max(1),
            rules,
            affirmative_marker: env::var("AFFIRMATIVE_MARKER")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .unwrap_or(moderation_defaults.affirmative_marker),
            durations: PunishmentDurations {
                mute: secs_var("MUTE_DURATION_SECS", duration_defaults.mute),
                ban: secs_var("BAN_DURATION_SECS", duration_defaults.ban),
                purge_lookback: secs_var("PURGE_LOOKBACK_SECS", duration_defaults.purge_lookback),
            },
            purge_delete_delay: Duration::from_millis(parse_var(
                "PURGE_DELETE_DELAY_MS",
                moderation_defaults.purge_delete_delay.as_millis() as u64,
            )),
            notify_enabled: parse_var("NOTIFY_ENABLED", true),
            activity_recheck: secs_var(
                "ACTIVITY_RECHECK_SECS",
                moderation_defaults.activity_recheck,
            ),
        };

        let conflict_defaults = ConflictConfig::default();
        let conflict = ConflictConfig {
            enabled: parse_var("CONFLICT_ENABLED", true),
            keywords: parse_keyword_list("CONFLICT_KEYWORDS"),
            timeout: secs_var("CONFLICT_TIMEOUT_SECS", conflict_defaults.timeout),
            confirm_every: parse_var("CONFLICT_CONFIRM_EVERY", conflict_defaults.confirm_every)
                .max(1),
            confirm_instruction: env::var("CONFLICT_CONFIRM_PROMPT")
                .unwrap_or(conflict_defaults.confirm_instruction),
            summary_instruction: env::var("CONFLICT_SUMMARY_PROMPT")
                .unwrap_or(conflict_defaults.summary_instruction),
            ..conflict_defaults
        };

        Ok(Self {
            discord_token,
            gemini_api_key,
            gemini_rpm: parse_var("GEMINI_RPM", 60),
            database_path: env::var("DATABASE_PATH").unwrap_or_else(|_| "ruckus.db".to_string()),
            health_port: parse_var("HEALTH_PORT", 8080),
            history_retention: Duration::from_secs(
                parse_var::<u64>("HISTORY_RETENTION_DAYS", 7) * 24 * 3600,
            ),
            moderation,
            conflict,
        })
    }
}

/// Parse an environment variable, falling back to `default` when unset or invalid.
fn parse_var<T: FromStr>(var_name: &str, default: T) -> T {
    env::var(var_name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

fn secs_var(var_name: &str, default: Duration) -> Duration {
    Duration::from_secs(parse_var(var_name, default.as_secs()))
}

/// Parse a comma-separated, lower-cased keyword list from an environment variable.
fn parse_keyword_list(var_name: &str) -> Vec<String> {
    env::var(var_name)
        .ok()
        .map(|s| {
            s.split(',')
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::time::Duration;

    use crate::config::{parse_keyword_list, parse_var, secs_var, ConflictConfig, ModerationConfig};

    #[test]
    fn moderation_defaults() {
        let config = ModerationConfig::default();
        assert_eq!(config.batch_size, 10);
        assert_eq!(config.affirmative_marker, "ПОЛОЖИТЕЛЬНО");
        assert!(config.durations.ban.is_zero());
        assert!(config.notify_enabled);
        assert_eq!(config.activity_recheck, Duration::from_secs(600));
    }

    #[test]
    fn conflict_defaults() {
        let config = ConflictConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(300));
        assert_eq!(config.confirm_every, 5);
        assert!(config.keywords.is_empty());
    }

    #[test]
    fn parse_keyword_list_empty() {
        let var_name = "TEST_KEYWORDS_EMPTY_31337";
        env::remove_var(var_name);
        assert!(parse_keyword_list(var_name).is_empty());
    }

    #[test]
    fn parse_keyword_list_lowercases_and_trims() {
        let var_name = "TEST_KEYWORDS_MULTI_31337";
        env::set_var(var_name, " Idiot, SHUT UP ,, liar");
        let result = parse_keyword_list(var_name);
        assert_eq!(result, vec!["idiot", "shut up", "liar"]);
        env::remove_var(var_name);
    }

    #[test]
    fn parse_var_falls_back_on_garbage() {
        let var_name = "TEST_PARSE_VAR_GARBAGE_31337";
        env::set_var(var_name, "ten");
        assert_eq!(parse_var::<usize>(var_name, 10), 10);
        env::set_var(var_name, " 25 ");
        assert_eq!(parse_var::<usize>(var_name, 10), 25);
        env::remove_var(var_name);
    }

    #[test]
    fn secs_var_reads_seconds() {
        let var_name = "TEST_SECS_VAR_31337";
        env::set_var(var_name, "90");
        assert_eq!(secs_var(var_name, Duration::ZERO), Duration::from_secs(90));
        env::remove_var(var_name);
    }
}

#[cfg(test)]
mod property_tests {
    use proptest::prelude::*;

    fn arb_keyword() -> impl Strategy<Value = String> {
        "[a-z]{3,20}".prop_map(|s| s)
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        /// Keyword lists survive the comma-separated environment format.
        #[test]
        fn prop_keyword_list_parsing(keywords in prop::collection::vec(arb_keyword(), 1..10)) {
            use std::env;

            let var_name = format!("TEST_PROP_KEYWORDS_{}", rand::random::<u32>());
            env::set_var(&var_name, keywords.join(","));

            let parsed = super::parse_keyword_list(&var_name);

            env::remove_var(&var_name);

            prop_assert_eq!(keywords, parsed);
        }
    }
}
