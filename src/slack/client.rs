//! The platform boundary: every network operation automove performs.

use async_trait::async_trait;

use super::types::{Attachment, Block, Message, User};
use crate::error::PlatformError;

/// A message to post.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OutgoingMessage {
    pub channel: String,
    /// Reply into this thread when set.
    pub thread_ts: Option<String>,
    /// Fallback / notification text.
    pub text: String,
    pub blocks: Vec<Block>,
    /// Rich attachments re-posted verbatim.
    pub attachments: Vec<Attachment>,
    /// Display-name override (impersonates the original author).
    pub username: Option<String>,
    pub icon_url: Option<String>,
}

impl OutgoingMessage {
    pub fn text(channel: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            channel: channel.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    /// Nothing the platform would accept.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty() && self.blocks.is_empty() && self.attachments.is_empty()
    }
}

/// One page of `conversations.replies`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RepliesPage {
    /// Always starts with the thread root.
    pub messages: Vec<Message>,
    /// Empty or absent on the last page.
    pub next_cursor: Option<String>,
}

/// Pre-signed upload target issued by `files.getUploadURLExternal`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTarget {
    pub upload_url: String,
    pub file_id: String,
}

/// A file uploaded to a target, ready to be finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    pub id: String,
    pub title: String,
}

/// Tokens issued by an OAuth code exchange.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OAuthTokens {
    pub team_id: String,
    pub bot_user_id: String,
    pub bot_token: Option<String>,
    pub user_id: String,
    pub user_token: Option<String>,
}

/// Messaging platform operations consumed by the core.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    /// Post a message, returning its ts.
    async fn post_message(&self, message: &OutgoingMessage) -> Result<String, PlatformError>;

    /// Post a message visible only to `user`.
    async fn post_ephemeral(
        &self,
        channel: &str,
        user: &str,
        text: &str,
    ) -> Result<(), PlatformError>;

    async fn update_message(&self, channel: &str, ts: &str, text: &str)
    -> Result<(), PlatformError>;

    /// Delete a message with privileged (user) credentials.
    async fn delete_message(&self, channel: &str, ts: &str) -> Result<(), PlatformError>;

    /// Fetch one page of a thread.
    async fn fetch_replies(
        &self,
        channel: &str,
        ts: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<RepliesPage, PlatformError>;

    async fn fetch_user(&self, user_id: &str) -> Result<User, PlatformError>;

    /// Fetch the message at exactly `ts` in a channel's history.
    async fn fetch_message(&self, channel: &str, ts: &str) -> Result<Message, PlatformError>;

    /// The oldest reply in `thread_ts` newer than `after`, in a single call.
    async fn reply_after(
        &self,
        channel: &str,
        thread_ts: &str,
        after: &str,
    ) -> Result<Option<Message>, PlatformError>;

    async fn upload_target(&self, filename: &str, size: u64)
    -> Result<UploadTarget, PlatformError>;

    /// Stream a file from its private URL into an upload target.
    async fn transfer_file(
        &self,
        source_url: &str,
        target_url: &str,
        mimetype: &str,
    ) -> Result<(), PlatformError>;

    /// Share uploaded files into a thread with a comment.
    async fn complete_upload(
        &self,
        channel: &str,
        thread_ts: &str,
        comment: &str,
        files: &[UploadedFile],
    ) -> Result<(), PlatformError>;

    async fn exchange_oauth_code(&self, code: &str) -> Result<OAuthTokens, PlatformError>;

    /// Start using freshly issued tokens. Clients without token state ignore this.
    fn install_tokens(&self, _tokens: &OAuthTokens) {}
}
