use axum::extract::{Path, State};
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;

use crate::drops::{normalize_group_code, DropRecord};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/drops", post(put_drop))
        .route("/drops/{id}/collect", post(collect))
        .route("/drops/{id}/like", post(like))
}

// --- Forms ---

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CollectForm {
    pub user_id: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LikeForm {
    pub user_id: String,
    pub liked: bool,
}

// --- Handlers ---

async fn put_drop(
    State(state): State<AppState>,
    Json(submitted): Json<DropRecord>,
) -> AppResult<Json<DropRecord>> {
    // Verdicts, collectors and likes are only ever written by the server
    let mut drop = submitted.as_submitted();
    if drop.id.trim().is_empty() {
        drop.id = uuid::Uuid::now_v7().to_string();
    }
    if !(-90.0..=90.0).contains(&drop.lat) || !(-180.0..=180.0).contains(&drop.lng) {
        return Err(AppError::BadRequest("Coordinates out of range".into()));
    }
    drop.group_code = drop.group_code.as_deref().and_then(normalize_group_code);

    let write = state.drops.put(&drop).await?;
    let stored = write.after.clone().ok_or(AppError::NotFound)?;
    state.dispatch_drop_write(write);

    Ok(Json(stored))
}

async fn collect(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(form): Json<CollectForm>,
) -> AppResult<Json<DropRecord>> {
    let write = state
        .drops
        .mark_collected(&id, &form.user_id)
        .await?
        .ok_or(AppError::NotFound)?;
    let stored = write.after.clone().ok_or(AppError::NotFound)?;
    state.dispatch_drop_write(write);

    Ok(Json(stored))
}

async fn like(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(form): Json<LikeForm>,
) -> AppResult<Json<DropRecord>> {
    let write = state
        .drops
        .set_liked(&id, &form.user_id, form.liked)
        .await?
        .ok_or(AppError::NotFound)?;
    let stored = write.after.clone().ok_or(AppError::NotFound)?;

    if write.before != write.after {
        state.dispatch_drop_write(write);
    }

    Ok(Json(stored))
}
