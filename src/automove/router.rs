//! Event router: pending configurations first, then rule matching.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use super::pending::{PendingConfigurationRegistry, PendingReaction};
use super::votes::ReactionVoteCoordinator;
use crate::error::SettingsError;
use crate::slack::types::{Event, ReactionEvent};
use crate::store::SettingsStore;

/// What an event led to.
#[derive(Debug)]
pub enum Routed {
    /// The reaction completed a pending configuration dialog.
    Configured,
    /// Votes were recorded for this many rules; fired rules started migrations.
    Voted {
        rules: usize,
        migrations: Vec<JoinHandle<()>>,
    },
    /// Votes were withdrawn for this many rules.
    Unvoted { rules: usize },
    Ignored,
}

pub struct EventRouter {
    store: Arc<dyn SettingsStore>,
    pending: Arc<PendingConfigurationRegistry>,
    votes: Arc<ReactionVoteCoordinator>,
}

impl EventRouter {
    pub fn new(
        store: Arc<dyn SettingsStore>,
        pending: Arc<PendingConfigurationRegistry>,
        votes: Arc<ReactionVoteCoordinator>,
    ) -> Self {
        Self {
            store,
            pending,
            votes,
        }
    }

    pub async fn route(&self, event: Event) -> Result<Routed, SettingsError> {
        match event {
            Event::ReactionAdded(reaction) => self.reaction_added(reaction).await,
            Event::ReactionRemoved(reaction) => self.reaction_removed(reaction).await,
            Event::Other => Ok(Routed::Ignored),
        }
    }

    async fn reaction_added(&self, ev: ReactionEvent) -> Result<Routed, SettingsError> {
        debug!(
            reaction = %ev.reaction,
            channel = %ev.item.channel,
            ts = %ev.item.ts,
            user = %ev.user,
            "Reaction added"
        );
        let offered = PendingReaction {
            channel: ev.item.channel.clone(),
            reaction: ev.reaction.clone(),
            user: ev.user.clone(),
        };
        if self.pending.resolve(&ev.item.ts, offered) {
            return Ok(Routed::Configured);
        }

        if !self.votes.policy().is_authorized(&ev.user) {
            return Ok(Routed::Ignored);
        }

        let mut rules = 0;
        let mut migrations = Vec::new();
        for rule in self.store.rules().await? {
            if !rule.matches(&ev.reaction, &ev.item.channel) {
                continue;
            }
            rules += 1;
            if let Some(handle) = self.votes.vote(&rule, &ev.item.ts, &ev.user).await {
                migrations.push(handle);
            }
        }

        Ok(if rules == 0 {
            Routed::Ignored
        } else {
            Routed::Voted { rules, migrations }
        })
    }

    async fn reaction_removed(&self, ev: ReactionEvent) -> Result<Routed, SettingsError> {
        debug!(
            reaction = %ev.reaction,
            ts = %ev.item.ts,
            user = %ev.user,
            "Reaction removed"
        );
        if !self.votes.policy().is_authorized(&ev.user) {
            return Ok(Routed::Ignored);
        }

        let rules = self
            .store
            .rules()
            .await?
            .iter()
            .filter(|rule| rule.matches(&ev.reaction, &ev.item.channel))
            .count();
        if rules == 0 {
            return Ok(Routed::Ignored);
        }
        self.votes.record_unvote(&ev.item.ts, &ev.user).await;
        Ok(Routed::Unvoted { rules })
    }
}
