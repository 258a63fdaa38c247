use axum::extract::State;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::drops::DropWrite;
use crate::error::AppResult;
use crate::moderation::{DrainOutcome, FinalizeOutcome, ModerationVerdict, StorageFinalizeEvent};
use crate::notify::FanoutOutcome;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/events/storage-finalized", post(storage_finalized))
        .route("/events/drop-written", post(drop_written))
}

// --- Payloads ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageFinalizedPayload {
    #[serde(flatten)]
    pub event: StorageFinalizeEvent,
    /// Classifier output; absent when classification produced nothing
    #[serde(default)]
    pub verdict: Option<ModerationVerdict>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct FinalizeResponse {
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub merged_drops: Option<usize>,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct DropWrittenResponse {
    pub moderation: Option<&'static str>,
    pub notified: bool,
}

// --- Handlers ---

async fn storage_finalized(
    State(state): State<AppState>,
    Json(payload): Json<StorageFinalizedPayload>,
) -> AppResult<Json<FinalizeResponse>> {
    let outcome = state
        .reconciler
        .on_storage_finalized(&payload.event, payload.verdict.as_ref())
        .await?;

    let response = match outcome {
        None => FinalizeResponse {
            outcome: "ignored",
            merged_drops: None,
        },
        Some(FinalizeOutcome::Merged(n)) => FinalizeResponse {
            outcome: "merged",
            merged_drops: Some(n),
        },
        Some(FinalizeOutcome::Queued) => FinalizeResponse {
            outcome: "queued",
            merged_drops: None,
        },
        Some(FinalizeOutcome::Skipped) => FinalizeResponse {
            outcome: "skipped",
            merged_drops: None,
        },
    };

    Ok(Json(response))
}

/// Delivery point for drop writes made outside this server.
async fn drop_written(
    State(state): State<AppState>,
    Json(write): Json<DropWrite>,
) -> AppResult<Json<DropWrittenResponse>> {
    let report = state.handle_drop_write(&write).await;

    let moderation = report.moderation.map(|outcome| match outcome {
        DrainOutcome::NoEntry => "noEntry",
        DrainOutcome::Sentinel => "sentinel",
        DrainOutcome::Merged => "merged",
        DrainOutcome::StaleDrop => "staleDrop",
    });

    Ok(Json(DropWrittenResponse {
        moderation,
        notified: matches!(report.fanout, Some(FanoutOutcome::Sent(_))),
    }))
}
