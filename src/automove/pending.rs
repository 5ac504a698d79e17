//! Pending configuration rendezvous.
//!
//! A configuration command posts a prompt and registers a slot keyed by the
//! prompt's ts. The next reaction on that prompt resolves the slot and is
//! consumed there instead of being matched against rules.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use crate::error::PendingError;

/// The reaction that completes a configuration dialog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingReaction {
    pub channel: String,
    pub reaction: String,
    pub user: String,
}

struct Waiter {
    generation: u64,
    tx: oneshot::Sender<PendingReaction>,
}

#[derive(Default)]
struct Slots {
    waiters: HashMap<String, Waiter>,
    next_generation: u64,
}

/// Single-slot rendezvous per prompt message.
#[derive(Default)]
pub struct PendingConfigurationRegistry {
    slots: Mutex<Slots>,
}

impl PendingConfigurationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Open a slot for `prompt`. Fails if one is already waiting there.
    pub fn register(self: &Arc<Self>, prompt: &str) -> Result<PendingSlot, PendingError> {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots.waiters.contains_key(prompt) {
            return Err(PendingError::AlreadyRegistered(prompt.to_string()));
        }

        let (tx, rx) = oneshot::channel();
        let generation = slots.next_generation;
        slots.next_generation += 1;
        slots
            .waiters
            .insert(prompt.to_string(), Waiter { generation, tx });
        debug!(prompt, "Pending configuration registered");

        Ok(PendingSlot {
            prompt: prompt.to_string(),
            generation,
            rx: Some(rx),
            registry: Arc::clone(self),
        })
    }

    /// Deliver `value` to the slot waiting on `prompt`.
    ///
    /// Returns `false` when nothing is waiting, so the event can fall
    /// through to rule matching.
    pub fn resolve(&self, prompt: &str, value: PendingReaction) -> bool {
        let waiter = {
            let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
            slots.waiters.remove(prompt)
        };
        let Some(waiter) = waiter else {
            return false;
        };

        let reaction = value.reaction.clone();
        match waiter.tx.send(value) {
            Ok(()) => {
                info!(prompt, reaction = %reaction, "Pending configuration resolved");
                true
            }
            Err(_) => {
                warn!(prompt, "Pending configuration was abandoned before resolution");
                false
            }
        }
    }

    /// Number of slots currently waiting.
    pub fn len(&self) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .waiters
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn release(&self, prompt: &str, generation: u64) {
        let mut slots = self.slots.lock().unwrap_or_else(PoisonError::into_inner);
        if slots
            .waiters
            .get(prompt)
            .is_some_and(|w| w.generation == generation)
        {
            slots.waiters.remove(prompt);
            debug!(prompt, "Pending configuration released");
        }
    }
}

/// A registered slot. Dropping it releases the registration.
pub struct PendingSlot {
    prompt: String,
    generation: u64,
    rx: Option<oneshot::Receiver<PendingReaction>>,
    registry: Arc<PendingConfigurationRegistry>,
}

impl PendingSlot {
    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    /// Wait at most `timeout` for the completing reaction.
    pub async fn wait(mut self, timeout: Duration) -> Result<PendingReaction, PendingError> {
        let Some(rx) = self.rx.take() else {
            return Err(PendingError::Abandoned(self.prompt.clone()));
        };
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(_)) => Err(PendingError::Abandoned(self.prompt.clone())),
            Err(_) => Err(PendingError::TimedOut {
                prompt: self.prompt.clone(),
                timeout,
            }),
        }
    }
}

impl Drop for PendingSlot {
    fn drop(&mut self) {
        self.registry.release(&self.prompt, self.generation);
    }
}
