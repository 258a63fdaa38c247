pub mod drops;
pub mod events;
pub mod users;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;

/// All HTTP routes, without state or middleware.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .merge(events::router())
        .merge(drops::router())
        .merge(users::router())
}

async fn health() -> &'static str {
    "ok"
}
