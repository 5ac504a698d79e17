//! Web API client: reqwest implementation of [`PlatformClient`].

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use futures::TryStreamExt;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use super::client::{
    OAuthTokens, OutgoingMessage, PlatformClient, RepliesPage, UploadTarget, UploadedFile,
};
use super::types::{Message, User, ts_key};
use crate::error::PlatformError;

/// Which credential a call is made with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Credential {
    Bot,
    /// User token, falling back to the bot token when none is installed.
    User,
    None,
}

/// API tokens, swappable at runtime after an OAuth install.
#[derive(Debug, Default)]
pub struct SlackTokens {
    pub bot: Option<SecretString>,
    pub user: Option<SecretString>,
}

/// Slack Web API client.
pub struct SlackClient {
    base_url: String,
    client_id: String,
    client_secret: SecretString,
    tokens: RwLock<SlackTokens>,
    client: reqwest::Client,
}

impl SlackClient {
    pub fn new(
        base_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: SecretString,
        tokens: SlackTokens,
    ) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self {
            base_url,
            client_id: client_id.into(),
            client_secret,
            tokens: RwLock::new(tokens),
            client: reqwest::Client::new(),
        }
    }

    fn api_url(&self, method: &str) -> String {
        format!("{}{method}", self.base_url)
    }

    /// Replace installed tokens. `None` keeps the current value.
    pub fn update_tokens(&self, bot: Option<SecretString>, user: Option<SecretString>) {
        let mut tokens = self.tokens.write().unwrap_or_else(PoisonError::into_inner);
        if bot.is_some() {
            tokens.bot = bot;
        }
        if user.is_some() {
            tokens.user = user;
        }
    }

    fn bearer(&self, credential: Credential) -> Result<Option<String>, PlatformError> {
        let tokens = self.tokens.read().unwrap_or_else(PoisonError::into_inner);
        let token = match credential {
            Credential::None => return Ok(None),
            Credential::Bot => tokens.bot.as_ref(),
            Credential::User => tokens.user.as_ref().or(tokens.bot.as_ref()),
        };
        token
            .map(|t| Some(format!("Bearer {}", t.expose_secret())))
            .ok_or(PlatformError::MissingToken {
                token: match credential {
                    Credential::User => "user",
                    _ => "bot",
                },
            })
    }

    fn authorize(
        &self,
        request: reqwest::RequestBuilder,
        credential: Credential,
    ) -> Result<reqwest::RequestBuilder, PlatformError> {
        Ok(match self.bearer(credential)? {
            Some(header) => request.header(reqwest::header::AUTHORIZATION, header),
            None => request,
        })
    }

    async fn get<T: DeserializeOwned>(
        &self,
        method: &str,
        query: &[(&str, String)],
        credential: Credential,
    ) -> Result<T, PlatformError> {
        let request = self.authorize(self.client.get(self.api_url(method)).query(query), credential)?;
        self.send(method, request).await
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        method: &str,
        body: &serde_json::Value,
        credential: Credential,
    ) -> Result<T, PlatformError> {
        let request = self.authorize(self.client.post(self.api_url(method)).json(body), credential)?;
        self.send(method, request).await
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        method: &str,
        form: &[(&str, &str)],
        credential: Credential,
    ) -> Result<T, PlatformError> {
        let request = self.authorize(self.client.post(self.api_url(method)).form(form), credential)?;
        self.send(method, request).await
    }

    /// Send a request and unwrap the `{ok, error, ...}` envelope.
    async fn send<T: DeserializeOwned>(
        &self,
        method: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<T, PlatformError> {
        let resp = request.send().await.map_err(|e| PlatformError::Http {
            method: method.to_string(),
            reason: e.to_string(),
        })?;

        let status = resp.status();
        let body: serde_json::Value = resp.json().await.map_err(|e| PlatformError::Decode {
            method: method.to_string(),
            reason: format!("HTTP {status}: {e}"),
        })?;

        if !body.get("ok").and_then(serde_json::Value::as_bool).unwrap_or(false) {
            let code = body
                .get("error")
                .and_then(serde_json::Value::as_str)
                .unwrap_or("unknown_error");
            return Err(PlatformError::Api {
                method: method.to_string(),
                code: code.to_string(),
            });
        }

        serde_json::from_value(body).map_err(|e| PlatformError::Decode {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }
}

// ── Response shapes ─────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TsResponse {
    ts: String,
}

#[derive(Deserialize)]
struct Empty {}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    messages: Vec<Message>,
    #[serde(default)]
    response_metadata: Option<ResponseMetadata>,
}

#[derive(Deserialize)]
struct ResponseMetadata {
    #[serde(default)]
    next_cursor: String,
}

#[derive(Deserialize)]
struct UserResponse {
    user: User,
}

#[derive(Deserialize)]
struct UploadUrlResponse {
    upload_url: String,
    file_id: String,
}

#[derive(Deserialize)]
struct OAuthResponse {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    bot_user_id: String,
    #[serde(default)]
    team: Option<OAuthTeam>,
    #[serde(default)]
    authed_user: Option<OAuthUser>,
}

#[derive(Deserialize)]
struct OAuthTeam {
    id: String,
}

#[derive(Deserialize)]
struct OAuthUser {
    id: String,
    #[serde(default)]
    access_token: Option<String>,
}

/// JSON body for `chat.postMessage` / `chat.postEphemeral`.
fn message_body(message: &OutgoingMessage) -> Result<serde_json::Value, PlatformError> {
    let encode = |e: serde_json::Error| PlatformError::Decode {
        method: "chat.postMessage".into(),
        reason: e.to_string(),
    };

    let mut body = json!({
        "channel": message.channel,
        "text": message.text,
    });
    if let Some(thread_ts) = &message.thread_ts {
        body["thread_ts"] = json!(thread_ts);
    }
    if !message.blocks.is_empty() {
        body["blocks"] = serde_json::to_value(&message.blocks).map_err(encode)?;
    }
    if !message.attachments.is_empty() {
        body["attachments"] = serde_json::to_value(&message.attachments).map_err(encode)?;
    }
    if let Some(username) = &message.username {
        body["username"] = json!(username);
    }
    if let Some(icon_url) = &message.icon_url {
        body["icon_url"] = json!(icon_url);
    }
    Ok(body)
}

/// `conversations.history` answers with the newest message at or before
/// `latest`, which is a different message when `ts` is a reply or gone.
fn exact_message(messages: Vec<Message>, ts: &str) -> Result<Message, PlatformError> {
    messages
        .into_iter()
        .find(|m| m.ts == ts)
        .ok_or_else(|| PlatformError::Api {
            method: "conversations.history".into(),
            code: "message_not_found".into(),
        })
}

/// The thread parent is always returned; skip it and anything not newer than `after`.
fn first_reply_after(messages: Vec<Message>, thread_ts: &str, after: &str) -> Option<Message> {
    messages
        .into_iter()
        .filter(|m| m.ts != thread_ts && ts_key(&m.ts) > ts_key(after))
        .min_by_key(|m| ts_key(&m.ts))
}

// ── PlatformClient ──────────────────────────────────────────────────────

#[async_trait]
impl PlatformClient for SlackClient {
    async fn post_message(&self, message: &OutgoingMessage) -> Result<String, PlatformError> {
        let body = message_body(message)?;
        let resp: TsResponse = self
            .post_json("chat.postMessage", &body, Credential::Bot)
            .await?;
        tracing::debug!(channel = %message.channel, ts = %resp.ts, "Message posted");
        Ok(resp.ts)
    }

    async fn post_ephemeral(
        &self,
        channel: &str,
        user: &str,
        text: &str,
    ) -> Result<(), PlatformError> {
        let body = json!({ "channel": channel, "user": user, "text": text });
        let _: Empty = self
            .post_json("chat.postEphemeral", &body, Credential::Bot)
            .await?;
        Ok(())
    }

    async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
    ) -> Result<(), PlatformError> {
        let body = json!({ "channel": channel, "ts": ts, "text": text });
        let _: Empty = self.post_json("chat.update", &body, Credential::Bot).await?;
        Ok(())
    }

    async fn delete_message(&self, channel: &str, ts: &str) -> Result<(), PlatformError> {
        let body = json!({ "channel": channel, "ts": ts, "as_user": true });
        let _: Empty = self.post_json("chat.delete", &body, Credential::User).await?;
        Ok(())
    }

    async fn fetch_replies(
        &self,
        channel: &str,
        ts: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<RepliesPage, PlatformError> {
        let mut query = vec![
            ("channel", channel.to_string()),
            ("ts", ts.to_string()),
            ("limit", limit.to_string()),
        ];
        if let Some(cursor) = cursor {
            query.push(("cursor", cursor.to_string()));
        }
        let resp: MessagesResponse = self
            .get("conversations.replies", &query, Credential::Bot)
            .await?;
        let next_cursor = resp
            .response_metadata
            .map(|m| m.next_cursor)
            .filter(|c| !c.is_empty());
        Ok(RepliesPage {
            messages: resp.messages,
            next_cursor,
        })
    }

    async fn fetch_user(&self, user_id: &str) -> Result<User, PlatformError> {
        let resp: UserResponse = self
            .get("users.info", &[("user", user_id.to_string())], Credential::Bot)
            .await?;
        Ok(resp.user)
    }

    async fn fetch_message(&self, channel: &str, ts: &str) -> Result<Message, PlatformError> {
        let query = [
            ("channel", channel.to_string()),
            ("latest", ts.to_string()),
            ("limit", "1".to_string()),
            ("inclusive", "true".to_string()),
        ];
        let resp: MessagesResponse = self
            .get("conversations.history", &query, Credential::Bot)
            .await?;
        exact_message(resp.messages, ts)
    }

    async fn reply_after(
        &self,
        channel: &str,
        thread_ts: &str,
        after: &str,
    ) -> Result<Option<Message>, PlatformError> {
        let query = [
            ("channel", channel.to_string()),
            ("ts", thread_ts.to_string()),
            ("oldest", after.to_string()),
            ("inclusive", "false".to_string()),
            ("limit", "1".to_string()),
        ];
        let resp: MessagesResponse = self
            .get("conversations.replies", &query, Credential::Bot)
            .await?;
        Ok(first_reply_after(resp.messages, thread_ts, after))
    }

    async fn upload_target(
        &self,
        filename: &str,
        size: u64,
    ) -> Result<UploadTarget, PlatformError> {
        let query = [
            ("filename", filename.to_string()),
            ("length", size.to_string()),
        ];
        let resp: UploadUrlResponse = self
            .get("files.getUploadURLExternal", &query, Credential::Bot)
            .await?;
        Ok(UploadTarget {
            upload_url: resp.upload_url,
            file_id: resp.file_id,
        })
    }

    async fn transfer_file(
        &self,
        source_url: &str,
        target_url: &str,
        mimetype: &str,
    ) -> Result<(), PlatformError> {
        let http_err = |stage: &str, e: reqwest::Error| PlatformError::Http {
            method: stage.to_string(),
            reason: e.to_string(),
        };

        let download = self
            .authorize(self.client.get(source_url), Credential::User)?
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| http_err("file download", e))?;

        let body = reqwest::Body::wrap_stream(download.bytes_stream().map_err(std::io::Error::other));
        let mut upload = self.client.post(target_url).body(body);
        if !mimetype.is_empty() {
            upload = upload.header(reqwest::header::CONTENT_TYPE, mimetype);
        }
        upload
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| http_err("file upload", e))?;
        Ok(())
    }

    async fn complete_upload(
        &self,
        channel: &str,
        thread_ts: &str,
        comment: &str,
        files: &[UploadedFile],
    ) -> Result<(), PlatformError> {
        let files: Vec<_> = files
            .iter()
            .map(|f| json!({ "id": f.id, "title": f.title }))
            .collect();
        let body = json!({
            "files": files,
            "channel_id": channel,
            "thread_ts": thread_ts,
            "initial_comment": comment,
        });
        let _: Empty = self
            .post_json("files.completeUploadExternal", &body, Credential::Bot)
            .await?;
        Ok(())
    }

    async fn exchange_oauth_code(&self, code: &str) -> Result<OAuthTokens, PlatformError> {
        let form = [
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.expose_secret()),
        ];
        let resp: OAuthResponse = self
            .post_form("oauth.v2.access", &form, Credential::None)
            .await?;
        let (user_id, user_token) = resp
            .authed_user
            .map(|u| (u.id, u.access_token))
            .unwrap_or_default();
        Ok(OAuthTokens {
            team_id: resp.team.map(|t| t.id).unwrap_or_default(),
            bot_user_id: resp.bot_user_id,
            bot_token: resp.access_token.filter(|t| !t.is_empty()),
            user_id,
            user_token: user_token.filter(|t| !t.is_empty()),
        })
    }

    fn install_tokens(&self, tokens: &OAuthTokens) {
        self.update_tokens(
            tokens.bot_token.clone().map(SecretString::from),
            tokens.user_token.clone().map(SecretString::from),
        );
    }
}
