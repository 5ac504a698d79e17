//! Slash commands: `/automove`, `/noautomove`, `/showautomoves`.

use std::sync::LazyLock;

use axum::{
    Json,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use regex::Regex;
use tracing::{debug, error, info, warn};

use super::AppState;
use crate::automove::{AutomoveRule, PendingReaction, PendingSlot, Privilege, RuleOwner};
use crate::slack::client::OutgoingMessage;
use crate::slack::types::SlashCommand;

const PROMPT: &str = "Please, set automove trigger with reaction to this message";
const CONFIRMED: &str = "Got it!";
const EXPIRED: &str = "No reaction received, automove setup expired";
const AUTOMOVE_USAGE: &str = "Usage: from #ch1 to #ch2 or just to #ch2";
const NOAUTOMOVE_USAGE: &str = "Usage: to #ch2";

/// `#C123`, `#name`, or the escaped `<#C123|name>` form (which contains `#C123`).
static CHANNEL_REF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#([A-Za-z0-9_\-]{1,80})").unwrap());

/// Channel references in order of appearance, at most `limit`.
fn channel_refs(text: &str, limit: usize) -> Vec<String> {
    CHANNEL_REF
        .captures_iter(text)
        .take(limit)
        .map(|c| c[1].to_string())
        .collect()
}

/// `(from, to)` from `#src #dst` or `#dst` (source is the invoking channel).
fn route_pair(cmd: &SlashCommand) -> Option<(String, String)> {
    let mut refs = channel_refs(&cmd.text, 2).into_iter();
    match (refs.next(), refs.next()) {
        (Some(from), Some(to)) => Some((from, to)),
        (Some(to), None) => Some((cmd.channel_id.clone(), to)),
        _ => None,
    }
}

/// Immediate reply shown only to the invoking user.
fn reply(text: &str) -> Response {
    Json(serde_json::json!({ "text": text })).into_response()
}

fn parse(state: &AppState, headers: &HeaderMap, body: &[u8]) -> Result<SlashCommand, Response> {
    state.verify(headers, body)?;
    serde_urlencoded::from_bytes(body).map_err(|e| {
        warn!(error = %e, "Undecodable slash command");
        StatusCode::BAD_REQUEST.into_response()
    })
}

/// The requester as a rule owner. Lookup failures fall back to member privilege.
async fn requester(state: &AppState, cmd: &SlashCommand) -> RuleOwner {
    let privilege = match state.client.fetch_user(&cmd.user_id).await {
        Ok(user) => Privilege::of(&user),
        Err(e) => {
            warn!(user = %cmd.user_id, error = %e, "Cannot resolve requester privilege");
            Privilege::Member
        }
    };
    RuleOwner {
        id: cmd.user_id.clone(),
        team_id: cmd.team_id.clone(),
        privilege,
    }
}

async fn ephemeral(state: &AppState, cmd: &SlashCommand, text: &str) {
    if let Err(e) = state
        .client
        .post_ephemeral(&cmd.channel_id, &cmd.user_id, text)
        .await
    {
        error!(channel = %cmd.channel_id, user = %cmd.user_id, error = %e, "Cannot post ephemeral reply");
    }
}

// ── /automove ───────────────────────────────────────────────────────────

pub(super) async fn automove(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let cmd = match parse(&state, &headers, &body) {
        Ok(cmd) => cmd,
        Err(rejection) => return rejection,
    };
    let Some((from, to)) = route_pair(&cmd) else {
        return reply(AUTOMOVE_USAGE);
    };

    let prompt = match state
        .client
        .post_message(&OutgoingMessage::text(&cmd.channel_id, PROMPT))
        .await
    {
        Ok(ts) => ts,
        Err(e) => {
            error!(channel = %cmd.channel_id, error = %e, "Cannot post configuration prompt");
            return reply(&format!("Cannot start automove setup: {e}"));
        }
    };
    let slot = match state.pending.register(&prompt) {
        Ok(slot) => slot,
        Err(e) => {
            error!(error = %e, "Cannot wait for trigger reaction");
            return reply(&e.to_string());
        }
    };

    info!(from = %from, to = %to, user = %cmd.user_id, prompt = %prompt, "Waiting for trigger reaction");
    tokio::spawn(complete_setup(state, cmd, from, to, slot));
    StatusCode::OK.into_response()
}

/// Wait for the prompt's reaction and store the rule it names.
async fn complete_setup(
    state: AppState,
    cmd: SlashCommand,
    from: String,
    to: String,
    slot: PendingSlot,
) {
    let prompt = slot.prompt().to_string();
    catch_early_reaction(&state, &cmd.channel_id, &prompt).await;
    let picked = match slot.wait(state.prompt_timeout).await {
        Ok(picked) => picked,
        Err(e) => {
            warn!(prompt = %prompt, error = %e, "Automove setup abandoned");
            if let Err(e) = state
                .client
                .update_message(&cmd.channel_id, &prompt, EXPIRED)
                .await
            {
                error!(prompt = %prompt, error = %e, "Cannot update expired prompt");
            }
            return;
        }
    };

    let owner = requester(&state, &cmd).await;
    let rule = AutomoveRule::new(picked.reaction, from, to, owner);
    let description = rule.describe();
    match state.store.add_rule(rule).await {
        Ok(()) => {
            info!(rule = %description, "Automove configured");
            if let Err(e) = state
                .client
                .update_message(&cmd.channel_id, &prompt, CONFIRMED)
                .await
            {
                error!(prompt = %prompt, error = %e, "Cannot confirm automove");
            }
        }
        Err(e) => {
            warn!(rule = %description, error = %e, "Automove rejected");
            ephemeral(&state, &cmd, &e.to_string()).await;
        }
    }
}

/// Resolve the slot from a reaction that landed before it was registered.
async fn catch_early_reaction(state: &AppState, channel: &str, prompt: &str) {
    let message = match state.client.fetch_message(channel, prompt).await {
        Ok(message) => message,
        Err(e) => {
            debug!(prompt = %prompt, error = %e, "Cannot re-read configuration prompt");
            return;
        }
    };
    let Some(early) = message.reactions.first() else {
        return;
    };
    let picked = PendingReaction {
        channel: channel.to_string(),
        reaction: early.name.clone(),
        user: early.users.first().cloned().unwrap_or_default(),
    };
    if state.pending.resolve(prompt, picked) {
        info!(
            prompt = %prompt,
            reaction = %early.name,
            "Trigger reaction arrived before registration"
        );
    }
}

// ── /noautomove ─────────────────────────────────────────────────────────

pub(super) async fn noautomove(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let cmd = match parse(&state, &headers, &body) {
        Ok(cmd) => cmd,
        Err(rejection) => return rejection,
    };
    let Some((from, to)) = route_pair(&cmd) else {
        return reply(NOAUTOMOVE_USAGE);
    };

    let owner = requester(&state, &cmd).await;
    let text = match state.store.remove_rules(&from, &to, &owner).await {
        Ok(_) => format!("Deleted automove:\nFrom <#{from}> to <#{to}>"),
        Err(e) => {
            warn!(from = %from, to = %to, user = %cmd.user_id, error = %e, "Automove removal refused");
            e.to_string()
        }
    };
    ephemeral(&state, &cmd, &text).await;
    StatusCode::OK.into_response()
}

// ── /showautomoves ──────────────────────────────────────────────────────

pub(super) async fn showautomoves(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let cmd = match parse(&state, &headers, &body) {
        Ok(cmd) => cmd,
        Err(rejection) => return rejection,
    };
    let filter = channel_refs(&cmd.text, 1).pop();

    let text = match state.store.rules().await {
        Ok(rules) => {
            let lines: Vec<String> = rules
                .iter()
                .filter(|r| {
                    filter
                        .as_deref()
                        .is_none_or(|c| r.from == c || r.to == c)
                })
                .map(AutomoveRule::describe)
                .collect();
            if lines.is_empty() {
                "No automoves found".to_string()
            } else {
                format!("Automoves:\n{}", lines.join("\n"))
            }
        }
        Err(e) => {
            error!(error = %e, "Cannot load automoves");
            e.to_string()
        }
    };
    ephemeral(&state, &cmd, &text).await;
    StatusCode::OK.into_response()
}
