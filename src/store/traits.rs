//! `SettingsStore` trait: rules and credentials persistence.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::automove::rule::{AutomoveRule, RuleOwner};
use crate::error::{RuleConflictError, SettingsError};

/// Tokens persisted after an OAuth install.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredCredentials {
    #[serde(default)]
    pub team_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bot_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_token: Option<String>,
}

/// Backend-agnostic settings store.
#[async_trait]
pub trait SettingsStore: Send + Sync {
    /// All configured rules.
    async fn rules(&self) -> Result<Vec<AutomoveRule>, SettingsError>;

    /// Add a rule. Conflicting rules are rejected and the store is unchanged.
    async fn add_rule(&self, rule: AutomoveRule) -> Result<(), SettingsError>;

    /// Remove every rule from `from` to `to` on behalf of `requester`.
    /// Returns the removed rules.
    async fn remove_rules(
        &self,
        from: &str,
        to: &str,
        requester: &RuleOwner,
    ) -> Result<Vec<AutomoveRule>, SettingsError>;

    async fn credentials(&self) -> Result<StoredCredentials, SettingsError>;

    /// Merge freshly issued tokens into the stored credentials.
    async fn save_credentials(&self, credentials: StoredCredentials) -> Result<(), SettingsError>;
}

/// Reject `candidate` if it loops onto its own source, or if its source
/// already has a rule on the same trigger or to the same destination.
pub fn check_conflict(
    existing: &[AutomoveRule],
    candidate: &AutomoveRule,
) -> Result<(), RuleConflictError> {
    if candidate.from == candidate.to {
        return Err(RuleConflictError::SelfLoop {
            channel: candidate.from.clone(),
        });
    }
    match existing.iter().find(|r| {
        r.from == candidate.from && (r.to == candidate.to || r.trigger == candidate.trigger)
    }) {
        Some(clash) => Err(RuleConflictError::Duplicate {
            to: clash.to.clone(),
            trigger: clash.trigger.clone(),
        }),
        None => Ok(()),
    }
}

/// Rules to drop for a removal request, or why the request fails.
pub fn select_removal(
    existing: &[AutomoveRule],
    from: &str,
    to: &str,
    requester: &RuleOwner,
) -> Result<Vec<usize>, SettingsError> {
    let matching: Vec<usize> = existing
        .iter()
        .enumerate()
        .filter(|(_, r)| r.from == from && r.to == to)
        .map(|(i, _)| i)
        .collect();

    if matching.is_empty() {
        return Err(SettingsError::NotFound {
            from: from.to_string(),
            to: to.to_string(),
        });
    }
    if matching
        .iter()
        .any(|&i| !existing[i].owner.can_be_overridden_by(requester))
    {
        return Err(SettingsError::Forbidden);
    }
    Ok(matching)
}
