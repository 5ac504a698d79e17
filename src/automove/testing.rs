//! In-memory `PlatformClient` for unit tests.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;

use crate::error::PlatformError;
use crate::slack::client::{
    OAuthTokens, OutgoingMessage, PlatformClient, RepliesPage, UploadTarget, UploadedFile,
};
use crate::slack::types::{File, Message, Reaction, User, ts_key};

/// Channel contents plus a record of every call.
#[derive(Default)]
pub struct FakeState {
    pub channels: HashMap<String, Vec<Message>>,
    pub users: HashMap<String, User>,
    pub posted: Vec<OutgoingMessage>,
    pub ephemeral: Vec<(String, String, String)>,
    pub updated: Vec<(String, String, String)>,
    pub deleted: Vec<(String, String)>,
    pub transfers: Vec<(String, String)>,
    pub completed: Vec<(String, String, String, Vec<UploadedFile>)>,
    pub replies_calls: usize,
    pub history_calls: usize,
    /// Posting fails once this many messages have been posted.
    pub fail_post_after: Option<usize>,
    pub fail_transfer: bool,
    /// Deleting one of these ts fails with `cant_delete_message`.
    pub fail_delete: HashSet<String>,
    /// Replies fetches before a finalized upload shows up. `None` never shows.
    pub upload_delay: Option<usize>,
    /// Reactions every posted message already carries when read back.
    pub reactions_on_post: Vec<Reaction>,
    hidden: Vec<(String, Message, usize)>,
    next_ts: u64,
    next_file: u64,
}

#[derive(Default)]
pub struct FakeSlack {
    pub state: Mutex<FakeState>,
}

fn api(method: &str, code: &str) -> PlatformError {
    PlatformError::Api {
        method: method.to_string(),
        code: code.to_string(),
    }
}

impl FakeSlack {
    pub fn new() -> Self {
        let fake = Self::default();
        fake.with(|s| s.upload_delay = Some(0));
        fake
    }

    pub fn with<R>(&self, f: impl FnOnce(&mut FakeState) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    /// Seed a message into a channel.
    pub fn seed(&self, channel: &str, message: Message) {
        self.with(|s| s.channels.entry(channel.to_string()).or_default().push(message));
    }

    pub fn add_user(&self, id: &str, real_name: &str) {
        self.with(|s| {
            s.users.insert(
                id.to_string(),
                User {
                    id: id.to_string(),
                    real_name: real_name.to_string(),
                    ..Default::default()
                },
            )
        });
    }

    pub fn messages(&self, channel: &str) -> Vec<Message> {
        self.with(|s| s.channels.get(channel).cloned().unwrap_or_default())
    }
}

pub fn text_message(ts: &str, thread_ts: Option<&str>, user: &str, text: &str) -> Message {
    Message {
        ts: ts.to_string(),
        thread_ts: thread_ts.map(str::to_string),
        user: user.to_string(),
        text: text.to_string(),
        ..Default::default()
    }
}

pub fn file(name: &str) -> File {
    File {
        id: format!("F-{name}"),
        name: name.to_string(),
        title: name.to_string(),
        mimetype: "text/plain".to_string(),
        url_private: format!("https://files.test/{name}"),
        size: 42,
    }
}

pub fn reaction(name: &str, users: &[&str]) -> Reaction {
    Reaction {
        name: name.to_string(),
        users: users.iter().map(|u| u.to_string()).collect(),
        count: users.len() as u32,
    }
}

impl FakeState {
    fn issue_ts(&mut self) -> String {
        self.next_ts += 1;
        format!("900.{:06}", self.next_ts)
    }

    fn reveal_uploads(&mut self) {
        let mut still_hidden = Vec::new();
        for (channel, message, remaining) in std::mem::take(&mut self.hidden) {
            if remaining == 0 {
                self.channels.entry(channel).or_default().push(message);
            } else {
                still_hidden.push((channel, message, remaining - 1));
            }
        }
        self.hidden = still_hidden;
    }
}

#[async_trait]
impl PlatformClient for FakeSlack {
    async fn post_message(&self, message: &OutgoingMessage) -> Result<String, PlatformError> {
        self.with(|s| {
            if s.fail_post_after.is_some_and(|limit| s.posted.len() >= limit) {
                return Err(api("chat.postMessage", "rate_limited"));
            }
            let ts = s.issue_ts();
            s.posted.push(message.clone());
            s.channels
                .entry(message.channel.clone())
                .or_default()
                .push(Message {
                    ts: ts.clone(),
                    thread_ts: message.thread_ts.clone(),
                    text: message.text.clone(),
                    reactions: s.reactions_on_post.clone(),
                    ..Default::default()
                });
            Ok(ts)
        })
    }

    async fn post_ephemeral(
        &self,
        channel: &str,
        user: &str,
        text: &str,
    ) -> Result<(), PlatformError> {
        self.with(|s| {
            s.ephemeral
                .push((channel.to_string(), user.to_string(), text.to_string()))
        });
        Ok(())
    }

    async fn update_message(
        &self,
        channel: &str,
        ts: &str,
        text: &str,
    ) -> Result<(), PlatformError> {
        self.with(|s| {
            s.updated
                .push((channel.to_string(), ts.to_string(), text.to_string()))
        });
        Ok(())
    }

    async fn delete_message(&self, channel: &str, ts: &str) -> Result<(), PlatformError> {
        self.with(|s| {
            if s.fail_delete.contains(ts) {
                return Err(api("chat.delete", "cant_delete_message"));
            }
            let messages = s.channels.entry(channel.to_string()).or_default();
            let before = messages.len();
            messages.retain(|m| m.ts != ts);
            if messages.len() == before {
                return Err(api("chat.delete", "message_not_found"));
            }
            s.deleted.push((channel.to_string(), ts.to_string()));
            Ok(())
        })
    }

    async fn fetch_replies(
        &self,
        channel: &str,
        ts: &str,
        cursor: Option<&str>,
        limit: u32,
    ) -> Result<RepliesPage, PlatformError> {
        self.with(|s| {
            s.replies_calls += 1;
            s.reveal_uploads();
            let messages = s.channels.get(channel).cloned().unwrap_or_default();
            let Some(root) = messages.iter().find(|m| m.ts == ts).cloned() else {
                return Err(api("conversations.replies", "thread_not_found"));
            };
            if root.is_reply_elsewhere() {
                return Ok(RepliesPage {
                    messages: vec![root],
                    next_cursor: None,
                });
            }

            let mut replies: Vec<Message> = messages
                .into_iter()
                .filter(|m| m.ts != ts && m.thread_ts.as_deref() == Some(ts))
                .collect();
            replies.sort_by_key(|m| ts_key(&m.ts));

            let offset: usize = cursor.and_then(|c| c.parse().ok()).unwrap_or(0);
            let end = (offset + limit as usize).min(replies.len());
            let mut page = vec![root];
            page.extend_from_slice(&replies[offset.min(end)..end]);
            Ok(RepliesPage {
                messages: page,
                next_cursor: (end < replies.len()).then(|| end.to_string()),
            })
        })
    }

    async fn fetch_user(&self, user_id: &str) -> Result<User, PlatformError> {
        self.with(|s| {
            s.users
                .get(user_id)
                .cloned()
                .ok_or_else(|| api("users.info", "user_not_found"))
        })
    }

    async fn fetch_message(&self, channel: &str, ts: &str) -> Result<Message, PlatformError> {
        self.with(|s| {
            s.history_calls += 1;
            s.channels
                .get(channel)
                .and_then(|msgs| msgs.iter().find(|m| m.ts == ts))
                .cloned()
                .ok_or_else(|| api("conversations.history", "message_not_found"))
        })
    }

    async fn reply_after(
        &self,
        channel: &str,
        thread_ts: &str,
        after: &str,
    ) -> Result<Option<Message>, PlatformError> {
        self.with(|s| {
            s.replies_calls += 1;
            s.reveal_uploads();
            let messages = s.channels.get(channel).cloned().unwrap_or_default();
            if !messages.iter().any(|m| m.ts == thread_ts) {
                return Err(api("conversations.replies", "thread_not_found"));
            }
            Ok(messages
                .into_iter()
                .filter(|m| {
                    m.ts != thread_ts
                        && m.thread_ts.as_deref() == Some(thread_ts)
                        && ts_key(&m.ts) > ts_key(after)
                })
                .min_by_key(|m| ts_key(&m.ts)))
        })
    }

    async fn upload_target(
        &self,
        _filename: &str,
        _size: u64,
    ) -> Result<UploadTarget, PlatformError> {
        self.with(|s| {
            s.next_file += 1;
            Ok(UploadTarget {
                upload_url: format!("https://upload.test/{}", s.next_file),
                file_id: format!("FU{}", s.next_file),
            })
        })
    }

    async fn transfer_file(
        &self,
        source_url: &str,
        target_url: &str,
        _mimetype: &str,
    ) -> Result<(), PlatformError> {
        self.with(|s| {
            if s.fail_transfer {
                return Err(PlatformError::Http {
                    method: "file upload".to_string(),
                    reason: "connection reset".to_string(),
                });
            }
            s.transfers
                .push((source_url.to_string(), target_url.to_string()));
            Ok(())
        })
    }

    async fn complete_upload(
        &self,
        channel: &str,
        thread_ts: &str,
        comment: &str,
        files: &[UploadedFile],
    ) -> Result<(), PlatformError> {
        self.with(|s| {
            let ts = s.issue_ts();
            let message = Message {
                ts,
                thread_ts: Some(thread_ts.to_string()),
                text: comment.to_string(),
                files: files
                    .iter()
                    .map(|f| File {
                        id: f.id.clone(),
                        title: f.title.clone(),
                        ..Default::default()
                    })
                    .collect(),
                ..Default::default()
            };
            s.completed.push((
                channel.to_string(),
                thread_ts.to_string(),
                comment.to_string(),
                files.to_vec(),
            ));
            if let Some(delay) = s.upload_delay {
                s.hidden.push((channel.to_string(), message, delay));
            }
            Ok(())
        })
    }

    async fn exchange_oauth_code(&self, code: &str) -> Result<OAuthTokens, PlatformError> {
        if code == "bad" {
            return Err(api("oauth.v2.access", "invalid_code"));
        }
        Ok(OAuthTokens {
            team_id: "T1".to_string(),
            bot_token: Some(format!("xoxb-{code}")),
            user_token: Some(format!("xoxp-{code}")),
            ..Default::default()
        })
    }
}
