//! Moderation reconciliation.
//!
//! A safety verdict (computed when an upload finalizes) and the drop record
//! that references the uploaded media are written by independent events with
//! no ordering guarantee. Whichever arrives second completes the merge:
//! verdicts with no matching drop are parked in a durable queue keyed by
//! [`canonical_path_key`], and every drop write drains that queue.

mod path_key;
pub mod repository;
mod verdict;

use serde::{Deserialize, Serialize};

use crate::drops::{DropRecord, RepositoryError};

pub use self::path_key::canonical_path_key;
pub use self::repository::{
    DrainOutcome, DynModerationStore, FinalizeOutcome, ModerationStore, SqliteModerationStore,
};
pub use self::verdict::{Likelihood, ModerationVerdict};

/// Upload-completed notification from object storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageFinalizeEvent {
    pub object_path: String,
    #[serde(default)]
    pub content_type: Option<String>,
    #[serde(default)]
    pub bucket: Option<String>,
}

impl StorageFinalizeEvent {
    /// Only images under the watched prefix are classified.
    pub fn is_moderatable(&self, path_prefix: &str) -> bool {
        self.object_path.starts_with(path_prefix)
            && self
                .content_type
                .as_deref()
                .map(|ct| ct.starts_with("image/"))
                .unwrap_or(false)
    }
}

pub struct ModerationReconciler {
    store: DynModerationStore,
    path_prefix: String,
}

impl ModerationReconciler {
    pub fn new(store: DynModerationStore, path_prefix: impl Into<String>) -> Self {
        Self {
            store,
            path_prefix: path_prefix.into(),
        }
    }

    /// Storage-finalize trigger. `verdict` is `None` when classification
    /// produced nothing, which parks the "no verdict" sentinel.
    ///
    /// Returns `None` when the event is outside the watched prefix or not an image.
    pub async fn on_storage_finalized(
        &self,
        event: &StorageFinalizeEvent,
        verdict: Option<&ModerationVerdict>,
    ) -> Result<Option<FinalizeOutcome>, RepositoryError> {
        if !event.is_moderatable(&self.path_prefix) {
            tracing::debug!(
                "Ignoring finalize for {} ({:?})",
                event.object_path,
                event.content_type
            );
            return Ok(None);
        }

        self.on_content_finalized(&event.object_path, verdict)
            .await
            .map(Some)
    }

    pub async fn on_content_finalized(
        &self,
        path: &str,
        verdict: Option<&ModerationVerdict>,
    ) -> Result<FinalizeOutcome, RepositoryError> {
        let key = canonical_path_key(path);
        let outcome = self.store.finalize(path, &key, verdict).await?;

        match &outcome {
            FinalizeOutcome::Merged(n) => {
                tracing::info!("Merged verdict for {} into {} drop(s)", path, n)
            }
            FinalizeOutcome::Queued => {
                tracing::info!("No drop references {} yet, queued as {}", path, key)
            }
            FinalizeOutcome::Skipped => {
                tracing::info!("No verdict for {}, nothing to merge", path)
            }
        }

        Ok(outcome)
    }

    /// Drop-write trigger. Cheap no-op for drops without media.
    pub async fn on_drop_written(
        &self,
        drop: &DropRecord,
    ) -> Result<DrainOutcome, RepositoryError> {
        let Some(path) = drop.media_storage_path.as_deref() else {
            return Ok(DrainOutcome::NoEntry);
        };

        let key = canonical_path_key(path);
        let outcome = self.store.drain_into(&drop.id, &key).await?;

        match outcome {
            DrainOutcome::Merged => {
                tracing::info!("Applied queued verdict to drop {}", drop.id)
            }
            DrainOutcome::Sentinel => {
                tracing::info!("Cleared empty verdict entry for drop {}", drop.id)
            }
            DrainOutcome::StaleDrop => {
                tracing::debug!("Drop {} vanished before its verdict merged", drop.id)
            }
            DrainOutcome::NoEntry => {}
        }

        Ok(outcome)
    }
}
