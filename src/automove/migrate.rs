//! Thread migration: reproduce a thread in the destination channel and
//! retire the source copy.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{Instrument, debug, info, info_span, warn};
use uuid::Uuid;

use super::render::{AuthorCache, render};
use super::rule::AutomoveRule;
use crate::config::MigrationConfig;
use crate::error::{MigrationError, PlatformError};
use crate::slack::client::{PlatformClient, UploadedFile};
use crate::slack::types::{File, Message, ts_key};

/// Comment attached when finalizing a batch of transferred files.
pub const FILE_COMMENT: &str = "Attached files:";

/// How a migration ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationOutcome {
    /// The thread was reproduced in the destination.
    Moved,
    /// The message is a reply inside another thread; nothing was done.
    NotARoot,
    /// An earlier run already moved the thread; only leftover deletions ran.
    Resumed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    pub id: Uuid,
    pub outcome: MigrationOutcome,
    pub source_root: String,
    pub destination_root: Option<String>,
    pub posted: usize,
    pub files: usize,
    pub deleted: usize,
}

impl MigrationReport {
    fn new(id: Uuid, outcome: MigrationOutcome, source_root: &str) -> Self {
        Self {
            id,
            outcome,
            source_root: source_root.to_string(),
            destination_root: None,
            posted: 0,
            files: 0,
            deleted: 0,
        }
    }
}

/// Executes a fired rule.
#[async_trait]
pub trait MigrationEngine: Send + Sync {
    async fn migrate(
        &self,
        rule: &AutomoveRule,
        root: &str,
    ) -> Result<MigrationReport, MigrationError>;
}

/// Moves threads through a [`PlatformClient`].
///
/// Not transactional: a failure while posting leaves the destination
/// partially populated, but the source is only deleted after every post
/// succeeded. Source messages left behind by a failed deletion are
/// remembered per (channel, root) so the next run for that root only
/// finishes the deletions.
pub struct ThreadMigrator {
    client: Arc<dyn PlatformClient>,
    config: MigrationConfig,
    ledger: Mutex<HashMap<(String, String), Vec<String>>>,
}

impl ThreadMigrator {
    pub fn new(client: Arc<dyn PlatformClient>, config: MigrationConfig) -> Self {
        Self {
            client,
            config,
            ledger: Mutex::new(HashMap::new()),
        }
    }

    async fn run(
        &self,
        id: Uuid,
        rule: &AutomoveRule,
        root: &str,
    ) -> Result<MigrationReport, MigrationError> {
        let leftover = self
            .ledger
            .lock()
            .await
            .remove(&(rule.from.clone(), root.to_string()));
        if let Some(leftover) = leftover {
            info!(remaining = leftover.len(), "Thread already moved, finishing deletions");
            let mut report = MigrationReport::new(id, MigrationOutcome::Resumed, root);
            report.deleted = self.retire(&rule.from, root, leftover).await?;
            return Ok(report);
        }

        let thread = self
            .fetch_thread(&rule.from, root)
            .await
            .map_err(|source| MigrationError::ThreadFetch {
                ts: root.to_string(),
                source,
            })?;
        if thread[0].is_reply_elsewhere() {
            info!("Message is a reply in another thread, not moving");
            return Ok(MigrationReport::new(id, MigrationOutcome::NotARoot, root));
        }
        info!(messages = thread.len(), "Moving thread");

        let mut report = MigrationReport::new(id, MigrationOutcome::Moved, root);
        let mut authors = AuthorCache::default();

        for message in &thread {
            let author = authors.resolve(self.client.as_ref(), &message.user).await;
            let Some(mut rendered) = render(message, author.as_ref(), &rule.to) else {
                debug!(ts = %message.ts, "Nothing to move for message");
                continue;
            };
            rendered.message.thread_ts = report.destination_root.clone();

            let uploaded = self.transfer_files(&rendered.files).await?;

            let posted_ts = self
                .client
                .post_message(&rendered.message)
                .await
                .map_err(|source| MigrationError::Post {
                    ts: message.ts.clone(),
                    source,
                })?;
            let thread_ts = report
                .destination_root
                .get_or_insert_with(|| posted_ts.clone())
                .clone();
            report.posted += 1;
            debug!(source_ts = %message.ts, ts = %posted_ts, "Message posted");

            if !uploaded.is_empty() {
                self.client
                    .complete_upload(&rule.to, &thread_ts, FILE_COMMENT, &uploaded)
                    .await
                    .map_err(|source| batch_error(&rendered.files, source))?;
                self.await_visible(&rule.to, &thread_ts, &posted_ts).await?;
                report.files += uploaded.len();
            }
        }

        if self.config.retain_source {
            info!("Keeping source messages");
        } else {
            // Newest first; the root goes last.
            let doomed: Vec<String> = thread.iter().rev().map(|m| m.ts.clone()).collect();
            report.deleted = self.retire(&rule.from, root, doomed).await?;
        }
        Ok(report)
    }

    /// Fetch a whole thread: root first, then replies in chronological order.
    async fn fetch_thread(&self, channel: &str, root: &str) -> Result<Vec<Message>, PlatformError> {
        let mut head: Option<Message> = None;
        let mut replies: BTreeMap<(u64, u64), Message> = BTreeMap::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .client
                .fetch_replies(channel, root, cursor.as_deref(), self.config.page_size)
                .await?;
            for message in page.messages {
                if message.ts == root {
                    head.get_or_insert(message);
                } else {
                    replies.insert(ts_key(&message.ts), message);
                }
            }
            match page.next_cursor.filter(|c| !c.is_empty()) {
                Some(next) if cursor.as_deref() != Some(next.as_str()) => cursor = Some(next),
                _ => break,
            }
        }

        let head = head.ok_or_else(|| PlatformError::Decode {
            method: "conversations.replies".to_string(),
            reason: format!("thread {root} has no root message"),
        })?;
        let mut thread = Vec::with_capacity(replies.len() + 1);
        thread.push(head);
        thread.extend(replies.into_values());
        Ok(thread)
    }

    async fn transfer_files(&self, files: &[File]) -> Result<Vec<UploadedFile>, MigrationError> {
        let mut uploaded = Vec::with_capacity(files.len());
        for file in files {
            let transfer_error = |source: PlatformError| MigrationError::FileTransfer {
                name: file.name.clone(),
                size: file.size,
                source,
            };
            let target = self
                .client
                .upload_target(&file.name, file.size)
                .await
                .map_err(transfer_error)?;
            self.client
                .transfer_file(&file.url_private, &target.upload_url, &file.mimetype)
                .await
                .map_err(transfer_error)?;
            uploaded.push(UploadedFile {
                id: target.file_id,
                title: if file.title.is_empty() {
                    file.name.clone()
                } else {
                    file.title.clone()
                },
            });
            debug!(name = %file.name, size = file.size, "File transferred");
        }
        Ok(uploaded)
    }

    /// Poll `thread_ts` until it holds a message newer than `after`.
    async fn await_visible(
        &self,
        channel: &str,
        thread_ts: &str,
        after: &str,
    ) -> Result<(), MigrationError> {
        let attempts = self.config.upload_poll_attempts;
        for attempt in 1..=attempts {
            let newer = self
                .client
                .reply_after(channel, thread_ts, after)
                .await
                .map_err(|source| MigrationError::ThreadFetch {
                    ts: thread_ts.to_string(),
                    source,
                })?;
            if let Some(reply) = newer {
                debug!(attempt, ts = %reply.ts, "Uploaded files are visible");
                return Ok(());
            }
            if attempt < attempts {
                tokio::time::sleep(self.config.upload_poll_delay).await;
            }
        }
        Err(MigrationError::PollingTimeout {
            thread_ts: thread_ts.to_string(),
            attempts,
        })
    }

    /// Delete `pending` in order. Stops at the first failure and records the
    /// rest in the ledger.
    async fn retire(
        &self,
        channel: &str,
        root: &str,
        pending: Vec<String>,
    ) -> Result<usize, MigrationError> {
        let total = pending.len();
        for (deleted, ts) in pending.iter().enumerate() {
            match self.client.delete_message(channel, ts).await {
                Ok(()) => {}
                Err(e) if e.api_code() == Some("message_not_found") => {
                    debug!(ts = %ts, "Source message already gone");
                }
                Err(source) => {
                    warn!(ts = %ts, deleted, total, "Deletion interrupted");
                    self.ledger.lock().await.insert(
                        (channel.to_string(), root.to_string()),
                        pending[deleted..].to_vec(),
                    );
                    return Err(MigrationError::Delete {
                        ts: ts.clone(),
                        deleted,
                        total,
                        source,
                    });
                }
            }
        }
        Ok(total)
    }
}

fn batch_error(files: &[File], source: PlatformError) -> MigrationError {
    MigrationError::FileTransfer {
        name: files
            .iter()
            .map(|f| f.name.as_str())
            .collect::<Vec<_>>()
            .join(", "),
        size: files.iter().map(|f| f.size).sum(),
        source,
    }
}

#[async_trait]
impl MigrationEngine for ThreadMigrator {
    async fn migrate(
        &self,
        rule: &AutomoveRule,
        root: &str,
    ) -> Result<MigrationReport, MigrationError> {
        let id = Uuid::new_v4();
        let span = info_span!(
            "migration",
            id = %id,
            root = %root,
            from = %rule.from,
            to = %rule.to
        );
        self.run(id, rule, root).instrument(span).await
    }
}
