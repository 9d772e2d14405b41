//! Error types for Ruckus.
//!
//! All errors are explicitly typed using thiserror. Adapters classify platform
//! failures into typed variants so the core never inspects error text.

use thiserror::Error;

/// Central error type for all Ruckus operations.
#[derive(Debug, Error)]
pub enum RuckusError {
    /// The judgment oracle failed or returned an unusable response.
    #[error("Oracle error: {0}")]
    Oracle(String),

    /// Discord API error from serenity.
    #[error("Discord API error: {0}")]
    DiscordApi(#[from] Box<serenity::Error>),

    /// A platform action failed for a reason without a more specific class.
    #[error("Platform error: {0}")]
    Platform(String),

    /// The target of a platform action no longer exists.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The bot lacks the rights for a platform action.
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The platform reports the action was already applied.
    #[error("Already handled: {0}")]
    AlreadyHandled(String),

    /// Rate limited by an external API.
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited {
        /// Milliseconds to wait before retry.
        retry_after_ms: u64,
    },

    /// Message history could not be queried.
    #[error("History error: {0}")]
    History(String),

    /// Database error.
    #[error("Database error: {0}")]
    Database(String),

    /// Configuration error (missing env vars, invalid values).
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal state error (missing chat state, invalid state transitions).
    #[error("Internal state error: {0}")]
    InternalState(String),

    /// A purge could not be scheduled.
    #[error("Purge unavailable: {0}")]
    PurgeUnavailable(String),

    /// HTTP request error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// How loudly an error is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    /// Our own storage or state is broken.
    Critical,
    /// A dependency failed; the action was skipped.
    External,
    /// Back off and let the caller decide.
    Throttled,
    /// Nothing left to do, e.g. the message was already gone.
    Benign,
}

macro_rules! log_at {
    ($level:ident, $err:expr, $ctx:expr, $msg:literal) => {
        tracing::$level!(
            error = %$err,
            request_id = %$ctx.request_id,
            chat_id = ?$ctx.chat_id,
            user_id = ?$ctx.user_id,
            operation = %$ctx.operation,
            $msg
        )
    };
}

impl RuckusError {
    pub fn severity(&self) -> Severity {
        match self {
            Self::Database(_) | Self::InternalState(_) | Self::Config(_) => Severity::Critical,
            Self::RateLimited { .. } => Severity::Throttled,
            Self::NotFound(_) | Self::AlreadyHandled(_) => Severity::Benign,
            Self::Oracle(_)
            | Self::DiscordApi(_)
            | Self::Platform(_)
            | Self::Forbidden(_)
            | Self::History(_)
            | Self::PurgeUnavailable(_)
            | Self::Http(_)
            | Self::Json(_) => Severity::External,
        }
    }

    /// Emit one tracing event for this error, levelled by [`Severity`].
    pub fn log_with_context(&self, context: &ErrorContext) {
        match self.severity() {
            Severity::Critical => log_at!(error, self, context, "Critical error occurred"),
            Severity::External => log_at!(warn, self, context, "Action failed"),
            Severity::Throttled => log_at!(warn, self, context, "Rate limited"),
            Severity::Benign => log_at!(debug, self, context, "Platform action had nothing to do"),
        }
    }

    /// True when the target of the action is already gone.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Get user-friendly error message (hides internal details).
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Oracle(_) => "AI service temporarily unavailable",
            Self::DiscordApi(_) | Self::Platform(_) => "Chat service temporarily unavailable",
            Self::NotFound(_) => "The target no longer exists",
            Self::Forbidden(_) => "The bot lacks the rights to do this",
            Self::AlreadyHandled(_) => "Already done",
            Self::RateLimited { .. } => "Too many requests, please try again later",
            Self::History(_) | Self::Database(_) => "Message history temporarily unavailable",
            Self::Config(_) => "Service configuration error",
            Self::InternalState(_) => "Internal service error",
            Self::PurgeUnavailable(_) => "Message purge is not available",
            Self::Http(_) => "Network error, please try again",
            Self::Json(_) => "Data format error",
        }
    }
}

/// Where an error happened, attached to its log line.
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// Correlates the lines logged for one failing operation.
    pub request_id: String,
    pub chat_id: Option<i64>,
    pub user_id: Option<i64>,
    pub operation: String,
}

impl ErrorContext {
    pub fn new(operation: impl Into<String>) -> Self {
        Self {
            request_id: uuid::Uuid::new_v4().to_string(),
            chat_id: None,
            user_id: None,
            operation: operation.into(),
        }
    }

    pub fn with_chat_id(mut self, chat_id: i64) -> Self {
        self.chat_id = Some(chat_id);
        self
    }

    pub fn with_user_id(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }
}

/// Result type alias for Ruckus operations.
pub type Result<T> = std::result::Result<T, RuckusError>;
