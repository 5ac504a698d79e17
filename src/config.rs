//! Configuration types.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Default Web API base URL.
pub const DEFAULT_API_URL: &str = "https://slack.com/api/";

/// Service configuration, built from environment variables.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// Shared secret used to verify inbound request signatures.
    pub signing_secret: SecretString,
    pub client_id: String,
    pub client_secret: SecretString,
    pub app_id: String,
    /// Tokens from the environment. Persisted tokens are used when unset.
    pub bot_token: Option<SecretString>,
    pub user_token: Option<SecretString>,
    pub api_url: String,
    pub listen_port: u16,
    /// Externally reachable base URL, used for the OAuth redirect.
    pub public_url: String,
    pub settings_path: PathBuf,
    pub log_dir: Option<PathBuf>,
    pub votes: VoteConfig,
    pub migration: MigrationConfig,
    /// Upper bound on how long a configuration prompt waits for its reaction.
    pub prompt_timeout: Duration,
}

/// Voting knobs.
#[derive(Debug, Clone)]
pub struct VoteConfig {
    /// Qualifying votes needed to fire. Zero or less fires on the first one.
    pub necessary_votes: i64,
    /// User ids allowed to vote. `*` allows everyone, empty allows nobody.
    pub permitted_users: Vec<String>,
}

/// Thread migration knobs.
#[derive(Debug, Clone)]
pub struct MigrationConfig {
    /// Keep source messages after a successful move.
    pub retain_source: bool,
    pub page_size: u32,
    pub upload_poll_attempts: u32,
    pub upload_poll_delay: Duration,
}

impl Default for VoteConfig {
    fn default() -> Self {
        Self {
            necessary_votes: 0,
            permitted_users: vec!["*".to_string()],
        }
    }
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            retain_source: false,
            page_size: 30,
            upload_poll_attempts: 40,
            upload_poll_delay: Duration::from_millis(250),
        }
    }
}

impl AppConfig {
    /// Build config from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let signing_secret = std::env::var("SLACK_SIGN_SECRET")
            .map_err(|_| ConfigError::MissingEnvVar("SLACK_SIGN_SECRET".into()))?;

        let listen_port: u16 = parse_env("LISTEN_PORT")?.unwrap_or(8080);
        let public_url = std::env::var("AUTOMOVE_PUBLIC_URL")
            .unwrap_or_else(|_| format!("http://localhost:{listen_port}"));

        let permitted_users: Vec<String> = std::env::var("AUTOMOVE_PERMITTED_USERS")
            .unwrap_or_else(|_| "*".to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let defaults = MigrationConfig::default();
        let migration = MigrationConfig {
            retain_source: parse_env("AUTOMOVE_NO_REMOVE")?.unwrap_or(defaults.retain_source),
            page_size: parse_env("AUTOMOVE_THREAD_PAGE_SIZE")?.unwrap_or(defaults.page_size),
            upload_poll_attempts: parse_env("AUTOMOVE_UPLOAD_POLL_ATTEMPTS")?
                .unwrap_or(defaults.upload_poll_attempts),
            upload_poll_delay: parse_env("AUTOMOVE_UPLOAD_POLL_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.upload_poll_delay),
        };

        Ok(Self {
            signing_secret: SecretString::from(signing_secret),
            client_id: std::env::var("SLACK_CLIENT_ID").unwrap_or_default(),
            client_secret: SecretString::from(
                std::env::var("SLACK_CLIENT_SECRET").unwrap_or_default(),
            ),
            app_id: std::env::var("SLACK_APP_ID").unwrap_or_default(),
            bot_token: secret_env("SLACK_BOT_TOKEN"),
            user_token: secret_env("SLACK_USER_TOKEN"),
            api_url: std::env::var("SLACK_API_URL").unwrap_or_else(|_| DEFAULT_API_URL.to_string()),
            listen_port,
            public_url: public_url.trim_end_matches('/').to_string(),
            settings_path: std::env::var("AUTOMOVE_SETTINGS_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("settings.json")),
            log_dir: std::env::var("AUTOMOVE_LOG_DIR").ok().map(PathBuf::from),
            votes: VoteConfig {
                necessary_votes: parse_env("AUTOMOVE_NECESSARY_VOTES")?.unwrap_or(0),
                permitted_users,
            },
            migration,
            prompt_timeout: Duration::from_secs(
                parse_env("AUTOMOVE_PROMPT_TIMEOUT_SECS")?.unwrap_or(300),
            ),
        })
    }
}

/// Non-empty env var as a secret.
fn secret_env(key: &str) -> Option<SecretString> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(SecretString::from)
}

/// Parse an optional env var. Present but unparsable values are an error.
fn parse_env<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            raw.trim()
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::InvalidValue {
                    key: key.to_string(),
                    message: e.to_string(),
                })
        }
        _ => Ok(None),
    }
}
