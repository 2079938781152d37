pub mod activity;
pub mod auth;
pub mod copy;
pub mod markets;
pub mod trading;

use crate::AppState;
use axum::routing::get;
use axum::{Json, Router};

/// Create the `/v1` API router the thin client layer calls.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/v1/auth", auth::router())
        .nest("/v1/markets", markets::router())
        .nest("/v1/trade", trading::router())
        .nest("/v1/copy", copy::router())
        .merge(activity::router())
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}
