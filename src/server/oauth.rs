//! OAuth install: `/setup` redirect and the `/oAuth` code exchange.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Redirect, Response},
};
use serde::Deserialize;
use tracing::{error, info, warn};

use super::AppState;
use crate::store::StoredCredentials;

const AUTHORIZE_URL: &str = "https://slack.com/oauth/v2/authorize";
const BOT_SCOPES: &str =
    "groups:history,users:read,commands,channels:read,channels:history,chat:write,reactions:write";
const USER_SCOPES: &str = "users:read,channels:read,channels:history,chat:write,reactions:write";

/// Authorize URL the install flow sends users to.
pub(super) fn authorize_url(client_id: &str, redirect_uri: &str) -> String {
    let query = serde_urlencoded::to_string([
        ("scope", BOT_SCOPES),
        ("user_scope", USER_SCOPES),
        ("client_id", client_id),
        ("redirect_uri", redirect_uri),
    ])
    .unwrap_or_default();
    format!("{AUTHORIZE_URL}?{query}")
}

pub(super) async fn setup(State(state): State<AppState>) -> Redirect {
    Redirect::to(&authorize_url(
        &state.oauth.client_id,
        &state.oauth.redirect_uri,
    ))
}

#[derive(Debug, Deserialize)]
pub(super) struct OAuthQuery {
    #[serde(default)]
    code: Option<String>,
}

pub(super) async fn callback(
    State(state): State<AppState>,
    Query(query): Query<OAuthQuery>,
) -> Response {
    let Some(code) = query.code.filter(|c| !c.is_empty()) else {
        return (StatusCode::BAD_REQUEST, "Missing code").into_response();
    };

    let tokens = match state.client.exchange_oauth_code(&code).await {
        Ok(tokens) => tokens,
        Err(e) => {
            warn!(error = %e, "OAuth code exchange failed");
            return format!("Installation failed: {e}").into_response();
        }
    };

    let credentials = StoredCredentials {
        team_id: tokens.team_id.clone(),
        bot_token: tokens.bot_token.clone(),
        user_token: tokens.user_token.clone(),
    };
    if let Err(e) = state.store.save_credentials(credentials).await {
        error!(error = %e, "Cannot persist installed tokens");
        return format!("Installation failed: {e}").into_response();
    }
    state.client.install_tokens(&tokens);

    info!(
        team = %tokens.team_id,
        bot = tokens.bot_token.is_some(),
        user = tokens.user_token.is_some(),
        "Automove installed"
    );
    "Automove installed".into_response()
}
