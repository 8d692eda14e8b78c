//! Error types for Sched Assist.

use std::time::Duration;

/// Top-level error type for the assistant.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    #[error("Classifier error: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("Calendar error: {0}")]
    Calendar(#[from] CalendarError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Scheduling error: {0}")]
    Schedule(#[from] ScheduleError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Unknown timezone: {0}")]
    UnknownTimezone(String),
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Constraint violation: {0}")]
    Constraint(String),

    #[error("Migration failed: {0}")]
    Migration(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

/// Inbound message boundary errors.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Unknown sender")]
    UnknownSender,
}

/// Text-classification collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum ClassifierError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} timed out after {timeout:?}")]
    Timeout { provider: String, timeout: Duration },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClassifierError {
    /// Whether a second attempt could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::RequestFailed { .. } | Self::Timeout { .. })
    }
}

/// Calendar collaborator errors.
#[derive(Debug, thiserror::Error)]
pub enum CalendarError {
    #[error("Calendar request failed for user {user_id}: {reason}")]
    RequestFailed { user_id: String, reason: String },

    #[error("Calendar credentials missing for user {user_id}")]
    MissingCredentials { user_id: String },

    #[error("Event rejected by calendar: {reason}")]
    EventRejected { reason: String },
}

/// Event parsing errors. Always surfaced to the user as a gentle
/// rephrase request, never as a silent guess.
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("No clock time found in \"{text}\"")]
    NoTimeSignal { text: String },

    #[error("Could not resolve \"{phrase}\" to a concrete time")]
    UnresolvableTime { phrase: String },

    #[error("Empty input")]
    EmptyInput,
}

/// Buffer scheduling errors.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    #[error("Candidate overlaps existing events: {0}")]
    ConflictUnresolvable(String),

    #[error("Invalid candidate: {0}")]
    InvalidCandidate(String),
}

/// Result type alias for the assistant.
pub type Result<T> = std::result::Result<T, Error>;
