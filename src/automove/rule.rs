//! Automove rules and rule ownership.

use serde::{Deserialize, Serialize};

use crate::slack::types::User;

/// Workspace privilege level. Ordering is meaningful: `Member < Admin < Owner`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    #[default]
    Member,
    Admin,
    Owner,
}

impl Privilege {
    pub fn of(user: &User) -> Self {
        if user.is_owner {
            Self::Owner
        } else if user.is_admin {
            Self::Admin
        } else {
            Self::Member
        }
    }
}

/// Who created a rule.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleOwner {
    pub id: String,
    #[serde(default)]
    pub team_id: String,
    #[serde(default)]
    pub privilege: Privilege,
}

impl RuleOwner {
    /// Whether `requester` may remove a rule created by this owner.
    pub fn can_be_overridden_by(&self, requester: &RuleOwner) -> bool {
        requester.id == self.id || requester.privilege >= self.privilege
    }
}

/// Move threads from `from` to `to` when reacted to with `:trigger:`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutomoveRule {
    pub trigger: String,
    #[serde(rename = "from_channel")]
    pub from: String,
    #[serde(rename = "to_channel")]
    pub to: String,
    #[serde(default)]
    pub owner: RuleOwner,
}

impl AutomoveRule {
    pub fn new(
        trigger: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
        owner: RuleOwner,
    ) -> Self {
        Self {
            trigger: trigger.into(),
            from: from.into(),
            to: to.into(),
            owner,
        }
    }

    /// Whether a reaction with `reaction` on a message in `channel` triggers this rule.
    pub fn matches(&self, reaction: &str, channel: &str) -> bool {
        self.trigger == reaction && self.from == channel
    }

    /// One-line listing used by the show command.
    pub fn describe(&self) -> String {
        format!("from <#{}> to <#{}> on :{}:", self.from, self.to, self.trigger)
    }
}
