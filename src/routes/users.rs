use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/{id}/tokens", post(register_token))
        .route("/usernames/claim", post(claim_username))
}

#[derive(Deserialize)]
pub struct TokenForm {
    pub token: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimForm {
    pub user_id: String,
    pub username: String,
    #[serde(default)]
    pub allow_transfer_from: Option<String>,
}

#[derive(Serialize, Debug)]
pub struct ClaimResponse {
    pub username: String,
}

/// Store or refresh a push delivery token for a user.
async fn register_token(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(form): Json<TokenForm>,
) -> AppResult<StatusCode> {
    let token = form.token.trim();
    if token.is_empty() {
        return Err(AppError::BadRequest("Token is required".into()));
    }

    state.tokens.register(&user_id, token).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn claim_username(
    State(state): State<AppState>,
    Json(form): Json<ClaimForm>,
) -> AppResult<Json<ClaimResponse>> {
    let username = state
        .usernames
        .claim(
            &form.user_id,
            &form.username,
            form.allow_transfer_from.as_deref(),
        )
        .await?;

    Ok(Json(ClaimResponse { username }))
}
