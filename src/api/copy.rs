//! Copy-Trading API
//!
//! Endpoints:
//! - POST /v1/copy/follow - Follow a leader with an allocation
//! - POST /v1/copy/unfollow - Unfollow and close open mirrors
//! - GET  /v1/copy/following - Leaders the caller follows
//! - GET  /v1/copy/leaderboard - Top leaders by realized P&L
//! - GET  /v1/copy/followers - The caller's active followers

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::api::auth::Authenticated;
use crate::error::error_response;
use crate::services::CopyError;
use crate::types::{CopySubscription, FollowerEntry, LeaderboardEntry, UnfollowReport};
use crate::AppState;

/// Create copy-trading router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/follow", post(follow))
        .route("/unfollow", post(unfollow))
        .route("/following", get(following))
        .route("/leaderboard", get(leaderboard))
        .route("/followers", get(followers))
}

impl IntoResponse for CopyError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            CopyError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "unknown_leader"),
            CopyError::SubscriptionNotFound(_) => (StatusCode::NOT_FOUND, "not_following"),
            CopyError::SelfFollow => (StatusCode::BAD_REQUEST, "self_follow"),
            CopyError::InvalidAllocation => (StatusCode::BAD_REQUEST, "invalid_allocation"),
            CopyError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
        };
        error_response(status, code, &self.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct FollowRequest {
    pub leader_agent_id: String,
    pub allocation_usdc: f64,
    pub max_position_size: Option<f64>,
    pub stop_loss_pct: Option<f64>,
}

/// POST /v1/copy/follow
async fn follow(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(request): Json<FollowRequest>,
) -> Result<Json<CopySubscription>, CopyError> {
    let sub = state.copy.follow(
        &auth.account.id,
        &request.leader_agent_id,
        request.allocation_usdc,
        request.max_position_size,
        request.stop_loss_pct,
    )?;
    Ok(Json(sub))
}

#[derive(Debug, Deserialize)]
pub struct UnfollowRequest {
    pub leader_agent_id: String,
}

/// POST /v1/copy/unfollow
async fn unfollow(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(request): Json<UnfollowRequest>,
) -> Result<Json<UnfollowReport>, CopyError> {
    let report = state
        .copy
        .unfollow(&auth.account.id, &request.leader_agent_id)?;
    Ok(Json(report))
}

/// GET /v1/copy/following
async fn following(
    State(state): State<AppState>,
    auth: Authenticated,
) -> Json<Vec<CopySubscription>> {
    Json(state.copy.following(&auth.account.id))
}

/// GET /v1/copy/leaderboard
async fn leaderboard(State(state): State<AppState>) -> Json<Vec<LeaderboardEntry>> {
    Json(state.copy.leaderboard(20))
}

/// GET /v1/copy/followers
async fn followers(
    State(state): State<AppState>,
    auth: Authenticated,
) -> Json<Vec<FollowerEntry>> {
    Json(state.copy.followers(&auth.account.id))
}
