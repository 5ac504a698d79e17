//! Rendering of source messages into destination posts.

use std::collections::HashMap;

use tracing::warn;

use crate::error::UserResolutionError;
use crate::slack::client::{OutgoingMessage, PlatformClient};
use crate::slack::types::{Block, Element, File, Message, User};

/// Caption date format, e.g. `Monday, January 2, 2006 at 15:04`.
const CAPTION_FORMAT: &str = "%A, %B %-d, %Y at %H:%M";

/// The platform caps context blocks at ten elements.
const MAX_CONTEXT_ELEMENTS: usize = 10;

/// A source message ready to be posted, plus the files to carry over.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedMessage {
    pub message: OutgoingMessage,
    pub files: Vec<File>,
}

/// Per-migration author cache. Lookups that fail are remembered as anonymous.
#[derive(Default)]
pub struct AuthorCache {
    users: HashMap<String, Option<User>>,
}

impl AuthorCache {
    pub async fn resolve(&mut self, client: &dyn PlatformClient, user_id: &str) -> Option<User> {
        if user_id.is_empty() {
            return None;
        }
        if let Some(cached) = self.users.get(user_id) {
            return cached.clone();
        }
        let user = match client.fetch_user(user_id).await {
            Ok(user) => Some(user),
            Err(source) => {
                let err = UserResolutionError {
                    user_id: user_id.to_string(),
                    source,
                };
                warn!(error = %err, "Rendering message anonymously");
                None
            }
        };
        self.users.insert(user_id.to_string(), user.clone());
        user
    }
}

/// Render `message` for `channel`. Returns `None` when there is nothing to post.
pub fn render(message: &Message, author: Option<&User>, channel: &str) -> Option<RenderedMessage> {
    let mut out = OutgoingMessage {
        channel: channel.to_string(),
        ..Default::default()
    };

    match author.filter(|u| !u.real_name.is_empty()) {
        Some(user) => {
            out.username = Some(user.real_name.clone());
            out.icon_url = Some(user.profile.image_72.clone()).filter(|url| !url.is_empty());
        }
        None => out.blocks.push(Block::context(vec![Element::markdown(format!(
            "Posted by <@{}>",
            message.user
        ))])),
    }

    let caption = format!("on {}", posted_on(message));

    if !message.text.is_empty() {
        out.blocks.push(Block::section(message.text.clone()));
        out.text = format!("{}\n{caption}", quote(&message.text));
    }

    let mut files = message.files.clone();
    for attachment in &message.attachments {
        files.extend(attachment.files.iter().cloned());
    }

    if !message.text.is_empty() || !files.is_empty() {
        let heading = match files.len() {
            0 => "",
            1 => "Uploaded file\n",
            _ => "Uploaded files\n",
        };
        out.blocks
            .push(Block::context(vec![Element::plain(format!("{heading}{caption}"))]));
    }

    if message
        .attachments
        .iter()
        .any(|a| !a.message_blocks.is_empty())
    {
        out.attachments = message.attachments.clone();
    }

    let reactions: Vec<Element> = message
        .reactions
        .iter()
        .map(|r| Element::markdown(format!(":{}:  **{}**", r.name, r.count)))
        .collect();
    for chunk in reactions.chunks(MAX_CONTEXT_ELEMENTS) {
        out.blocks.push(Block::context(chunk.to_vec()));
    }

    let has_content = !message.text.is_empty()
        || !files.is_empty()
        || !out.attachments.is_empty()
        || !message.reactions.is_empty();
    has_content.then_some(RenderedMessage { message: out, files })
}

/// Block-quote every line of `text`.
fn quote(text: &str) -> String {
    format!(">{}", text.replace('\n', "\n>"))
}

fn posted_on(message: &Message) -> String {
    message
        .posted_at()
        .map(|at| at.format(CAPTION_FORMAT).to_string())
        .unwrap_or_else(|| "an unknown date".to_string())
}
