//! HTTP surface: event callbacks, slash commands, OAuth install and health.

mod commands;
mod oauth;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, warn};

use crate::automove::{
    EventRouter, MigrationEngine, PendingConfigurationRegistry, ReactionVoteCoordinator,
    ThreadMigrator, VotePolicy,
};
use crate::config::AppConfig;
use crate::slack::client::PlatformClient;
use crate::slack::signature::SignatureVerifier;
use crate::slack::types::Callback;
use crate::store::SettingsStore;

/// OAuth app settings used by the install flow.
#[derive(Debug, Clone)]
pub struct OAuthSettings {
    pub client_id: String,
    pub redirect_uri: String,
}

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub client: Arc<dyn PlatformClient>,
    pub store: Arc<dyn SettingsStore>,
    pub pending: Arc<PendingConfigurationRegistry>,
    pub events: Arc<EventRouter>,
    pub verifier: SignatureVerifier,
    pub oauth: OAuthSettings,
    /// How long a configuration prompt waits for its reaction.
    pub prompt_timeout: Duration,
}

impl AppState {
    /// Wire the automove core around a platform client and settings store.
    pub fn new(
        config: &AppConfig,
        client: Arc<dyn PlatformClient>,
        store: Arc<dyn SettingsStore>,
    ) -> Self {
        let migrator: Arc<dyn MigrationEngine> = Arc::new(ThreadMigrator::new(
            Arc::clone(&client),
            config.migration.clone(),
        ));
        let votes = Arc::new(ReactionVoteCoordinator::new(
            Arc::clone(&client),
            migrator,
            VotePolicy::from(&config.votes),
        ));
        let pending = PendingConfigurationRegistry::new();
        let events = Arc::new(EventRouter::new(
            Arc::clone(&store),
            Arc::clone(&pending),
            votes,
        ));

        Self {
            client,
            store,
            pending,
            events,
            verifier: SignatureVerifier::new(config.signing_secret.clone()),
            oauth: OAuthSettings {
                client_id: config.client_id.clone(),
                redirect_uri: format!("{}/oAuth", config.public_url),
            },
            prompt_timeout: config.prompt_timeout,
        }
    }

    /// Check the request signature, answering 403 when it does not hold.
    fn verify(&self, headers: &HeaderMap, body: &[u8]) -> Result<(), Response> {
        self.verifier.verify_headers(headers, body).map_err(|e| {
            warn!(error = %e, "Rejecting unverified request");
            (StatusCode::FORBIDDEN, "403! Forbidden").into_response()
        })
    }
}

/// Build the Axum router.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(event_callback))
        .route("/automove", post(commands::automove))
        .route("/noautomove", post(commands::noautomove))
        .route("/showautomoves", post(commands::showautomoves))
        .route("/setup", get(oauth::setup))
        .route("/oAuth", get(oauth::callback))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "automove"
    }))
}

// ── Event callbacks ─────────────────────────────────────────────────────

async fn event_callback(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Err(rejection) = state.verify(&headers, &body) {
        return rejection;
    }

    let callback: Callback = match serde_json::from_slice(&body) {
        Ok(callback) => callback,
        Err(e) => {
            warn!(error = %e, "Undecodable callback");
            return StatusCode::OK.into_response();
        }
    };

    match callback {
        Callback::UrlVerification { challenge } => {
            Json(serde_json::json!({ "challenge": challenge })).into_response()
        }
        Callback::EventCallback { event_id, event } => {
            match state.events.route(event).await {
                Ok(routed) => debug!(event_id = %event_id, ?routed, "Event routed"),
                Err(e) => error!(event_id = %event_id, error = %e, "Event routing failed"),
            }
            StatusCode::OK.into_response()
        }
        Callback::Other => StatusCode::OK.into_response(),
    }
}
