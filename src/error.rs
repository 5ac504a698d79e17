//! Error types for automove.

use std::time::Duration;

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Verification error: {0}")]
    Verification(#[from] VerificationError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Pending configuration error: {0}")]
    Pending(#[from] PendingError),

    #[error("Migration error: {0}")]
    Migration(#[from] MigrationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors returned by the messaging platform client.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("HTTP request to {method} failed: {reason}")]
    Http { method: String, reason: String },

    #[error("{method} returned error: {code}")]
    Api { method: String, code: String },

    #[error("Cannot decode {method} response: {reason}")]
    Decode { method: String, reason: String },

    #[error("No {token} token configured")]
    MissingToken { token: &'static str },
}

impl PlatformError {
    /// The platform's error code, when the API answered with `ok: false`.
    pub fn api_code(&self) -> Option<&str> {
        match self {
            Self::Api { code, .. } => Some(code),
            _ => None,
        }
    }
}

/// Inbound request signature failures. Such requests are rejected unprocessed.
#[derive(Debug, thiserror::Error)]
pub enum VerificationError {
    #[error("Missing header {0}")]
    MissingHeader(&'static str),

    #[error("Malformed request timestamp: {0}")]
    InvalidTimestamp(String),

    #[error("Request timestamp is stale by {age:?}")]
    Stale { age: Duration },

    #[error("Signature mismatch")]
    SignatureMismatch,
}

/// A rule addition rejected because it collides with an existing rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RuleConflictError {
    #[error("You can not create an automove from <#{channel}> to itself.")]
    SelfLoop { channel: String },

    #[error("You already have an automove to <#{to}> on :{trigger}:.")]
    Duplicate { to: String, trigger: String },
}

/// Settings store errors.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error(transparent)]
    Conflict(#[from] RuleConflictError),

    #[error("No automove from <#{from}> to <#{to}> found")]
    NotFound { from: String, to: String },

    #[error("Seems that you can not change this setting")]
    Forbidden,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Rendezvous failures for the configuration dialog.
#[derive(Debug, thiserror::Error)]
pub enum PendingError {
    #[error("A configuration is already waiting on message {0}")]
    AlreadyRegistered(String),

    #[error("No reaction arrived on message {prompt} within {timeout:?}")]
    TimedOut { prompt: String, timeout: Duration },

    #[error("Pending configuration for message {0} was dropped")]
    Abandoned(String),
}

/// Failures while moving a thread. Only `Delete` can occur after the
/// destination has been fully populated.
#[derive(Debug, thiserror::Error)]
pub enum MigrationError {
    #[error("Cannot retrieve thread {ts}: {source}")]
    ThreadFetch { ts: String, source: PlatformError },

    #[error("Cannot post message {ts}: {source}")]
    Post { ts: String, source: PlatformError },

    #[error("Cannot transfer file {name} ({size} bytes): {source}")]
    FileTransfer {
        name: String,
        size: u64,
        source: PlatformError,
    },

    #[error("Uploaded files did not show up in thread {thread_ts} after {attempts} attempts")]
    PollingTimeout { thread_ts: String, attempts: u32 },

    #[error("Cannot delete message {ts} ({deleted} of {total} deleted): {source}")]
    Delete {
        ts: String,
        deleted: usize,
        total: usize,
        source: PlatformError,
    },
}

/// Author lookup failure. Never fatal: the message is rendered anonymously.
#[derive(Debug, thiserror::Error)]
#[error("Cannot resolve user {user_id}: {source}")]
pub struct UserResolutionError {
    pub user_id: String,
    pub source: PlatformError,
}

/// Result type alias for the service.
pub type Result<T> = std::result::Result<T, Error>;
