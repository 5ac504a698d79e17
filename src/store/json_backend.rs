//! JSON file backend: `SettingsStore` persisted to a single settings file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::automove::rule::{AutomoveRule, RuleOwner};
use crate::error::SettingsError;
use crate::store::traits::{SettingsStore, StoredCredentials, check_conflict, select_removal};

/// On-disk layout of the settings file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct SettingsFile {
    #[serde(default)]
    automoves: Vec<AutomoveRule>,
    #[serde(default)]
    credentials: StoredCredentials,
}

/// Settings kept in memory and written through to a JSON file.
///
/// Every mutation is computed on a copy, persisted, and only then swapped in,
/// so a failed write leaves both the file and the in-memory state unchanged.
pub struct JsonSettingsStore {
    path: PathBuf,
    state: RwLock<SettingsFile>,
}

impl JsonSettingsStore {
    /// Open the settings file, starting empty if it does not exist yet.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, SettingsError> {
        let path = path.into();
        let state = match tokio::fs::read(&path).await {
            Ok(raw) => serde_json::from_slice(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!(path = %path.display(), "No settings file yet, starting empty");
                SettingsFile::default()
            }
            Err(e) => return Err(e.into()),
        };
        info!(
            path = %path.display(),
            rules = state.automoves.len(),
            "Settings loaded"
        );
        Ok(Self {
            path,
            state: RwLock::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, state: &SettingsFile) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        let raw = serde_json::to_vec_pretty(state)?;
        let tmp = self.path.with_extension("json.tmp");
        tokio::fs::write(&tmp, raw).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        debug!(path = %self.path.display(), "Settings saved");
        Ok(())
    }
}

#[async_trait]
impl SettingsStore for JsonSettingsStore {
    async fn rules(&self) -> Result<Vec<AutomoveRule>, SettingsError> {
        Ok(self.state.read().await.automoves.clone())
    }

    async fn add_rule(&self, rule: AutomoveRule) -> Result<(), SettingsError> {
        let mut state = self.state.write().await;
        check_conflict(&state.automoves, &rule)?;

        let mut next = state.clone();
        info!(rule = %rule.describe(), owner = %rule.owner.id, "Adding automove");
        next.automoves.push(rule);
        self.persist(&next).await?;
        *state = next;
        Ok(())
    }

    async fn remove_rules(
        &self,
        from: &str,
        to: &str,
        requester: &RuleOwner,
    ) -> Result<Vec<AutomoveRule>, SettingsError> {
        let mut state = self.state.write().await;
        let doomed = select_removal(&state.automoves, from, to, requester)?;

        let mut next = state.clone();
        let mut removed = Vec::with_capacity(doomed.len());
        for i in doomed.into_iter().rev() {
            removed.push(next.automoves.remove(i));
        }
        removed.reverse();
        self.persist(&next).await?;
        *state = next;
        info!(from, to, requester = %requester.id, count = removed.len(), "Removed automoves");
        Ok(removed)
    }

    async fn credentials(&self) -> Result<StoredCredentials, SettingsError> {
        Ok(self.state.read().await.credentials.clone())
    }

    async fn save_credentials(&self, credentials: StoredCredentials) -> Result<(), SettingsError> {
        let mut state = self.state.write().await;
        let mut next = state.clone();
        if !credentials.team_id.is_empty() {
            next.credentials.team_id = credentials.team_id;
        }
        if credentials.bot_token.is_some() {
            next.credentials.bot_token = credentials.bot_token;
        }
        if credentials.user_token.is_some() {
            next.credentials.user_token = credentials.user_token;
        }
        self.persist(&next).await?;
        *state = next;
        info!("Credentials saved");
        Ok(())
    }
}
