use std::sync::Arc;

use anyhow::Context;
use secrecy::SecretString;
use tracing_appender::non_blocking::WorkerGuard;

use automove::config::AppConfig;
use automove::server::{AppState, build_router};
use automove::slack::{SlackClient, SlackTokens};
use automove::store::{JsonSettingsStore, SettingsStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  export SLACK_SIGN_SECRET=...");
        std::process::exit(1);
    });

    let _log_guard = init_tracing(&config).context("Failed to set up logging")?;

    eprintln!("Automove v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Events:   http://0.0.0.0:{}/", config.listen_port);
    eprintln!("   Install:  {}/setup", config.public_url);
    eprintln!("   Settings: {}", config.settings_path.display());
    eprintln!(
        "   Votes:    {} needed, allowed: {}",
        config.votes.necessary_votes.max(1),
        if config.votes.permitted_users.iter().any(|u| u == "*") {
            "everyone".to_string()
        } else {
            config.votes.permitted_users.join(", ")
        }
    );

    serve(config).await.context("Automove server failed")
}

/// Log to stderr, or to a daily-rolling file when a log directory is set.
fn init_tracing(config: &AppConfig) -> std::io::Result<Option<WorkerGuard>> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let file_appender = tracing_appender::rolling::daily(dir, "automove.log");
            let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_target(false)
                .init();
            Ok(Some(guard))
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(false)
                .init();
            Ok(None)
        }
    }
}

async fn serve(config: AppConfig) -> automove::Result<()> {
    // ── Settings ────────────────────────────────────────────────────────
    let store = Arc::new(JsonSettingsStore::open(&config.settings_path).await?);
    let saved = store.credentials().await?;

    // Environment tokens win over installed ones.
    let tokens = SlackTokens {
        bot: config
            .bot_token
            .clone()
            .or_else(|| saved.bot_token.map(SecretString::from)),
        user: config
            .user_token
            .clone()
            .or_else(|| saved.user_token.map(SecretString::from)),
    };
    if tokens.bot.is_none() {
        tracing::warn!("No bot token yet, install the app via /setup");
    }

    // ── Platform client ─────────────────────────────────────────────────
    let client = Arc::new(SlackClient::new(
        &config.api_url,
        &config.client_id,
        config.client_secret.clone(),
        tokens,
    ));

    // ── HTTP ────────────────────────────────────────────────────────────
    let app = build_router(AppState::new(&config, client, store));
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.listen_port)).await?;
    tracing::info!(port = config.listen_port, "Automove server started");
    axum::serve(listener, app).await?;
    Ok(())
}
