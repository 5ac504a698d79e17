//! Reaction vote coordinator: per-root tallies and the exactly-once fire
//! decision.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::migrate::MigrationEngine;
use super::rule::AutomoveRule;
use crate::config::VoteConfig;
use crate::slack::client::PlatformClient;

/// Who may vote and how many votes fire a rule.
#[derive(Debug, Clone)]
pub struct VotePolicy {
    threshold: i64,
    permitted: Vec<String>,
}

impl VotePolicy {
    pub fn new(threshold: i64, permitted: Vec<String>) -> Self {
        Self {
            threshold,
            permitted,
        }
    }

    /// Votes needed to fire. Zero or less fires on the first qualifying vote.
    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    pub fn is_authorized(&self, user: &str) -> bool {
        self.permitted.iter().any(|p| p == "*" || p == user)
    }
}

impl From<&VoteConfig> for VotePolicy {
    fn from(config: &VoteConfig) -> Self {
        Self::new(config.necessary_votes, config.permitted_users.clone())
    }
}

/// Open tallies and remembered fired roots are each capped at this many;
/// the least recently touched go first.
const DEFAULT_CAPACITY: usize = 4096;

struct Tally {
    /// Distinct voters in the current cycle.
    voters: HashSet<String>,
    touched: u64,
}

#[derive(Default)]
struct Ballots {
    tallies: HashMap<String, Tally>,
    /// Roots that fired, oldest first.
    fired: VecDeque<String>,
    /// (source channel, root) pairs with a migration still running.
    in_flight: HashSet<(String, String)>,
    clock: u64,
}

impl Ballots {
    fn count(&self, root: &str) -> usize {
        self.tallies.get(root).map_or(0, |t| t.voters.len())
    }

    fn has_fired(&self, root: &str) -> bool {
        self.fired.iter().any(|r| r == root)
    }

    /// The voter set for `root`, created (and the stalest evicted) on demand.
    fn voters_mut(&mut self, root: &str, capacity: usize) -> &mut HashSet<String> {
        self.clock += 1;
        if !self.tallies.contains_key(root) && self.tallies.len() >= capacity {
            let stalest = self
                .tallies
                .iter()
                .min_by_key(|(_, t)| t.touched)
                .map(|(r, _)| r.clone());
            if let Some(stalest) = stalest {
                debug!(root = %stalest, "Dropping idle tally");
                self.tallies.remove(&stalest);
            }
        }
        let tally = self.tallies.entry(root.to_string()).or_insert_with(|| Tally {
            voters: HashSet::new(),
            touched: 0,
        });
        tally.touched = self.clock;
        &mut tally.voters
    }

    /// Clear the tally when it reached `threshold`. Returns the vote count
    /// that fired.
    fn take_if_reached(&mut self, root: &str, threshold: i64, capacity: usize) -> Option<usize> {
        let votes = self.count(root);
        if (votes as i64) < threshold {
            return None;
        }
        self.tallies.remove(root);
        if !self.has_fired(root) {
            if self.fired.len() >= capacity {
                self.fired.pop_front();
            }
            self.fired.push_back(root.to_string());
        }
        Some(votes)
    }
}

/// Counts reactions per thread root and hands fired rules to the migration
/// engine.
pub struct ReactionVoteCoordinator {
    client: Arc<dyn PlatformClient>,
    engine: Arc<dyn MigrationEngine>,
    policy: VotePolicy,
    capacity: usize,
    ballots: Arc<Mutex<Ballots>>,
}

impl ReactionVoteCoordinator {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        engine: Arc<dyn MigrationEngine>,
        policy: VotePolicy,
    ) -> Self {
        Self {
            client,
            engine,
            policy,
            capacity: DEFAULT_CAPACITY,
            ballots: Arc::new(Mutex::new(Ballots::default())),
        }
    }

    pub fn policy(&self) -> &VotePolicy {
        &self.policy
    }

    /// Current vote count for `root`. Absent tallies read as zero.
    pub async fn tally(&self, root: &str) -> usize {
        self.ballots.lock().await.count(root)
    }

    /// Whether a migration of `root` out of `from` is still running.
    pub async fn is_in_flight(&self, from: &str, root: &str) -> bool {
        self.ballots
            .lock()
            .await
            .in_flight
            .contains(&(from.to_string(), root.to_string()))
    }

    /// Count `user`'s vote for `root`, returning the new tally.
    ///
    /// When more than one vote is needed, the first vote of a cycle on a
    /// root that never fired back-fills authorized users already holding
    /// the trigger reaction.
    pub async fn record_vote(&self, rule: &AutomoveRule, root: &str, user: &str) -> usize {
        if !self.policy.is_authorized(user) {
            debug!(root, user, "Ignoring vote from unauthorized user");
            return self.tally(root).await;
        }

        let needs_reconcile = self.policy.threshold > 1 && {
            let ballots = self.ballots.lock().await;
            ballots.count(root) == 0 && !ballots.has_fired(root)
        };
        let backfill = if needs_reconcile {
            self.reconcile(rule, root, user).await
        } else {
            Vec::new()
        };

        let mut ballots = self.ballots.lock().await;
        let stale = ballots.has_fired(root);
        let voters = ballots.voters_mut(root, self.capacity);
        if !stale {
            voters.extend(backfill);
        }
        voters.insert(user.to_string());
        let votes = voters.len();
        info!(root, user, votes, "Vote recorded");
        votes
    }

    /// Withdraw `user`'s vote. Unknown roots or voters are a no-op.
    pub async fn record_unvote(&self, root: &str, user: &str) -> usize {
        let mut ballots = self.ballots.lock().await;
        let Some(tally) = ballots.tallies.get_mut(root) else {
            return 0;
        };
        tally.voters.remove(user);
        let votes = tally.voters.len();
        if votes == 0 {
            ballots.tallies.remove(root);
        }
        info!(root, user, votes, "Vote withdrawn");
        votes
    }

    /// Atomically check `tally(root) >= threshold` and clear the tally when
    /// it holds. Returns whether the rule fires.
    pub async fn try_fire(&self, root: &str, threshold: i64) -> bool {
        let mut ballots = self.ballots.lock().await;
        match ballots.take_if_reached(root, threshold, self.capacity) {
            Some(votes) => {
                info!(root, votes, threshold, "Vote threshold reached");
                true
            }
            None => false,
        }
    }

    /// Record a vote and, if the rule fires, start the migration.
    ///
    /// While a migration of the same root is running, votes are counted but
    /// cannot fire it again.
    pub async fn vote(
        &self,
        rule: &AutomoveRule,
        root: &str,
        user: &str,
    ) -> Option<JoinHandle<()>> {
        if !self.policy.is_authorized(user) {
            return None;
        }
        let votes = self.record_vote(rule, root, user).await;

        let key = (rule.from.clone(), root.to_string());
        let mut ballots = self.ballots.lock().await;
        if ballots.in_flight.contains(&key) {
            info!(root, from = %rule.from, votes, "Migration already running, not firing again");
            return None;
        }
        let threshold = self.policy.threshold;
        let Some(fired) = ballots.take_if_reached(root, threshold, self.capacity) else {
            debug!(root, votes, threshold, "Waiting for more votes");
            return None;
        };
        ballots.in_flight.insert(key);
        drop(ballots);

        info!(root, votes = fired, threshold, "Vote threshold reached");
        Some(self.dispatch(rule.clone(), root.to_string()))
    }

    /// Run the migration on its own task, log its outcome, then release the
    /// root's in-flight mark.
    fn dispatch(&self, rule: AutomoveRule, root: String) -> JoinHandle<()> {
        let engine = Arc::clone(&self.engine);
        let ballots = Arc::clone(&self.ballots);
        tokio::spawn(async move {
            match engine.migrate(&rule, &root).await {
                Ok(report) => info!(
                    root = %root,
                    id = %report.id,
                    outcome = ?report.outcome,
                    destination = ?report.destination_root,
                    posted = report.posted,
                    files = report.files,
                    deleted = report.deleted,
                    "Migration finished"
                ),
                Err(e) => error!(
                    root = %root,
                    from = %rule.from,
                    to = %rule.to,
                    error = %e,
                    "Migration failed"
                ),
            }
            ballots.lock().await.in_flight.remove(&(rule.from, root));
        })
    }

    /// Authorized users other than `user` already reacting with the trigger.
    async fn reconcile(&self, rule: &AutomoveRule, root: &str, user: &str) -> Vec<String> {
        let message = match self.client.fetch_message(&rule.from, root).await {
            Ok(message) => message,
            Err(e) => {
                warn!(root, error = %e, "Cannot review existing reactions");
                return Vec::new();
            }
        };
        let voters: Vec<String> = message
            .reactions
            .iter()
            .filter(|r| r.name == rule.trigger)
            .flat_map(|r| r.users.iter())
            .filter(|u| u.as_str() != user && self.policy.is_authorized(u))
            .cloned()
            .collect();
        if !voters.is_empty() {
            debug!(root, backfilled = voters.len(), "Counted earlier reactions");
        }
        voters
    }
}
