//! Automove core: rules, voting, the configuration rendezvous, thread
//! migration and event routing.

pub mod migrate;
pub mod pending;
pub mod render;
pub mod router;
pub mod rule;
pub mod votes;

#[cfg(test)]
pub(crate) mod testing;

pub use migrate::{MigrationEngine, MigrationOutcome, MigrationReport, ThreadMigrator};
pub use pending::{PendingConfigurationRegistry, PendingReaction, PendingSlot};
pub use router::{EventRouter, Routed};
pub use rule::{AutomoveRule, Privilege, RuleOwner};
pub use votes::{ReactionVoteCoordinator, VotePolicy};
