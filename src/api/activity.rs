//! Activity API
//!
//! Endpoints:
//! - GET /v1/signals - Recent structured trade signals
//! - GET /v1/gossip - Recent anonymized platform chatter

use axum::{extract::Query, extract::State, routing::get, Json, Router};
use serde::Deserialize;

use crate::types::{GossipItem, TradeSignal};
use crate::AppState;

/// Create activity router (mounted at the API root).
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/v1/signals", get(signals))
        .route("/v1/gossip", get(gossip))
}

#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    pub limit: Option<usize>,
}

/// GET /v1/signals
async fn signals(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Json<Vec<TradeSignal>> {
    Json(state.activity.signals(query.limit.unwrap_or(50).min(200)))
}

/// GET /v1/gossip
async fn gossip(
    State(state): State<AppState>,
    Query(query): Query<FeedQuery>,
) -> Json<Vec<GossipItem>> {
    Json(state.activity.gossip(query.limit.unwrap_or(50).min(200)))
}
