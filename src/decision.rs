//! Pick-up / ignore handling for geofence ENTER triggers.
//!
//! Per drop id: `Triggered -> Collecting | Ignoring -> Resolved`. Whatever
//! happens while persisting the decision, the geofence is retracted and the
//! prompt dismissed afterwards so the user is never re-prompted forever.

use async_trait::async_trait;
use chrono::Utc;
use futures::FutureExt;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::drops::RepositoryError;
use crate::error::TransportError;
use crate::geofence::{GeofenceRegistry, GeofenceTrigger};
use crate::inventory::{DynInventoryStore, InventoryEntry, InventoryStatus, RecordOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionState {
    Triggered,
    Collecting,
    Ignoring,
    Resolved,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    PickUp,
    Ignore,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionOutcome {
    Recorded(InventoryStatus),
    /// A decision for this drop already exists or is in flight
    AlreadyResolved,
}

#[derive(Debug, Error)]
pub enum DecisionError {
    #[error("Failed to persist decision: {0}")]
    Persist(#[from] RepositoryError),

    #[error("Persisting decision timed out after {0:?}")]
    Timeout(Duration),

    #[error("Persisting decision panicked")]
    Panicked,
}

/// Where actionable prompts are shown to the user.
#[async_trait]
pub trait PromptSurface: Send + Sync {
    async fn show(&self, trigger: &GeofenceTrigger) -> Result<(), TransportError>;

    async fn dismiss(&self, drop_id: &str);
}

struct Shared {
    inventory: DynInventoryStore,
    registry: Arc<GeofenceRegistry>,
    prompts: Arc<dyn PromptSurface>,
    states: Mutex<HashMap<String, DecisionState>>,
    persist_timeout: Duration,
}

/// Cheap to clone; clones share the per-drop state.
#[derive(Clone)]
pub struct DropDecisionProtocol {
    shared: Arc<Shared>,
}

impl DropDecisionProtocol {
    pub fn new(
        inventory: DynInventoryStore,
        registry: Arc<GeofenceRegistry>,
        prompts: Arc<dyn PromptSurface>,
        persist_timeout: Duration,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                inventory,
                registry,
                prompts,
                states: Mutex::new(HashMap::new()),
                persist_timeout,
            }),
        }
    }

    pub async fn state(&self, drop_id: &str) -> Option<DecisionState> {
        self.shared.states.lock().await.get(drop_id).copied()
    }

    /// Transport-level ENTER: resolve ids through the registry, then prompt.
    pub async fn on_enter_ids(&self, triggering_ids: &[String]) -> Vec<String> {
        let triggers = self.shared.registry.on_enter(triggering_ids).await;
        self.on_enter(triggers).await
    }

    /// Surface a prompt for every trigger not already handled. Returns the
    /// ids that were prompted.
    pub async fn on_enter(&self, triggers: Vec<GeofenceTrigger>) -> Vec<String> {
        let shared = &self.shared;
        let mut prompted = Vec::new();

        for trigger in triggers {
            let id = trigger.drop_id.clone();

            if self.state(&id).await.is_some() {
                tracing::debug!("Drop {} already triggered or resolved, skipping", id);
                continue;
            }

            match shared.inventory.is_resolved(&id).await {
                Ok(true) => {
                    tracing::debug!("Drop {} already in inventory, skipping", id);
                    shared
                        .states
                        .lock()
                        .await
                        .insert(id.clone(), DecisionState::Resolved);
                    continue;
                }
                Ok(false) => {}
                Err(e) => {
                    // Prompt anyway: a duplicate decision is absorbed by the inventory
                    tracing::warn!("Inventory check failed for {}: {}", id, e);
                }
            }

            {
                let mut states = shared.states.lock().await;
                if states.contains_key(&id) {
                    continue;
                }
                states.insert(id.clone(), DecisionState::Triggered);
            }

            if let Err(e) = shared.prompts.show(&trigger).await {
                tracing::warn!("Failed to show prompt for {}: {}", id, e);
            }
            prompted.push(id);
        }

        prompted
    }

    /// Apply the user's choice for a prompt.
    ///
    /// The trigger carries the snapshot, so a pick-up never refetches the
    /// drop. Persisting and finalizing run on their own task: finalization
    /// runs exactly once per accepted decision, whether persisting succeeds,
    /// fails, times out or panics, and also when the caller stops waiting.
    pub async fn decide(
        &self,
        trigger: &GeofenceTrigger,
        decision: Decision,
    ) -> Result<DecisionOutcome, DecisionError> {
        let id = trigger.drop_id.clone();

        {
            let mut states = self.shared.states.lock().await;
            match states.get(&id) {
                Some(DecisionState::Collecting)
                | Some(DecisionState::Ignoring)
                | Some(DecisionState::Resolved) => {
                    tracing::debug!("Decision for {} already taken", id);
                    return Ok(DecisionOutcome::AlreadyResolved);
                }
                Some(DecisionState::Triggered) | None => {}
            }
            let next = match decision {
                Decision::PickUp => DecisionState::Collecting,
                Decision::Ignore => DecisionState::Ignoring,
            };
            states.insert(id.clone(), next);
        }

        let entry = match decision {
            Decision::PickUp => InventoryEntry::collected(trigger.snapshot.clone(), Utc::now()),
            Decision::Ignore => InventoryEntry::ignored(id.as_str(), Utc::now()),
        };

        let shared = self.shared.clone();
        let task = tokio::spawn(async move {
            let result = shared.persist(&entry).await;
            shared.finalize(&entry.drop_id).await;
            result
        });

        let result = match task.await {
            Ok(result) => result,
            Err(e) => {
                tracing::error!("Decision task for {} failed: {}", id, e);
                Err(DecisionError::Panicked)
            }
        };

        match &result {
            Ok(DecisionOutcome::Recorded(status)) => {
                tracing::info!("Drop {} resolved as {}", id, status.as_str())
            }
            Ok(DecisionOutcome::AlreadyResolved) => {
                tracing::info!("Drop {} was already in inventory", id)
            }
            Err(e) => tracing::error!("Decision for {} not persisted: {}", id, e),
        }

        result
    }
}

impl Shared {
    async fn persist(&self, entry: &InventoryEntry) -> Result<DecisionOutcome, DecisionError> {
        let record = AssertUnwindSafe(self.inventory.record(entry)).catch_unwind();

        match tokio::time::timeout(self.persist_timeout, record).await {
            Err(_) => Err(DecisionError::Timeout(self.persist_timeout)),
            Ok(Err(_panic)) => Err(DecisionError::Panicked),
            Ok(Ok(Err(e))) => Err(DecisionError::Persist(e)),
            Ok(Ok(Ok(RecordOutcome::Recorded))) => Ok(DecisionOutcome::Recorded(entry.status)),
            Ok(Ok(Ok(RecordOutcome::AlreadyResolved))) => Ok(DecisionOutcome::AlreadyResolved),
        }
    }

    async fn finalize(&self, drop_id: &str) {
        if let Err(e) = self.registry.remove(drop_id).await {
            // A dangling region is harmless: a later trigger hits the inventory
            tracing::warn!("Failed to retract geofence {}: {}", drop_id, e);
        }
        self.prompts.dismiss(drop_id).await;
        self.states
            .lock()
            .await
            .insert(drop_id.to_string(), DecisionState::Resolved);
    }
}
