//! Trading API
//!
//! Endpoints:
//! - POST /v1/trade/open - Open a leveraged position
//! - POST /v1/trade/close - Close a position at market
//! - POST /v1/trade/stop-loss - Attach/overwrite a stop-loss
//! - POST /v1/trade/take-profit - Attach/overwrite a take-profit
//! - GET  /v1/trade/positions - Open (or all) positions
//! - GET  /v1/trade/orders - Orders with optional status filter
//! - GET  /v1/trade/history - Fill history

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};

use crate::api::auth::Authenticated;
use crate::error::error_response;
use crate::services::LedgerError;
use crate::types::{Fill, Order, OrderStatus, Position, PositionSide};
use crate::AppState;

/// Create trading router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/open", post(open_position))
        .route("/close", post(close_position))
        .route("/stop-loss", post(set_stop_loss))
        .route("/take-profit", post(set_take_profit))
        .route("/positions", get(list_positions))
        .route("/orders", get(list_orders))
        .route("/history", get(trade_history))
}

impl IntoResponse for LedgerError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            LedgerError::UnknownMarket(_) => (StatusCode::NOT_FOUND, "unknown_market"),
            LedgerError::InvalidLeverage { .. } => (StatusCode::BAD_REQUEST, "invalid_leverage"),
            LedgerError::InsufficientMargin { .. } => {
                (StatusCode::BAD_REQUEST, "insufficient_margin")
            }
            LedgerError::PositionNotOpen(_) => (StatusCode::CONFLICT, "position_not_open"),
            LedgerError::InvalidTriggerPrice(_) => {
                (StatusCode::BAD_REQUEST, "invalid_trigger_price")
            }
            LedgerError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "account_not_found"),
            LedgerError::NoPriceData(_) => (StatusCode::SERVICE_UNAVAILABLE, "no_price_data"),
            LedgerError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
        };
        error_response(status, code, &self.to_string())
    }
}

// =============================================================================
// Requests / Responses
// =============================================================================

#[derive(Debug, Deserialize)]
pub struct OpenRequest {
    pub coin: String,
    pub side: String,
    pub size_usd: f64,
    #[serde(default = "default_leverage")]
    pub leverage: f64,
}

fn default_leverage() -> f64 {
    5.0
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenResponse {
    pub position: Position,
    pub fee: f64,
}

#[derive(Debug, Deserialize)]
pub struct CloseRequest {
    pub position_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CloseResponse {
    pub position: Position,
    pub exit_price: f64,
    pub pnl: f64,
    pub fee: f64,
}

#[derive(Debug, Deserialize)]
pub struct StopLossRequest {
    pub position_id: String,
    pub stop_price: f64,
}

#[derive(Debug, Deserialize)]
pub struct TakeProfitRequest {
    pub position_id: String,
    pub take_profit_price: f64,
}

#[derive(Debug, Deserialize)]
pub struct PositionsQuery {
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct OrdersQuery {
    pub status: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    pub limit: Option<usize>,
}

// =============================================================================
// Handlers
// =============================================================================

/// POST /v1/trade/open
async fn open_position(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(request): Json<OpenRequest>,
) -> Result<Json<OpenResponse>, Response> {
    let side = PositionSide::parse(&request.side).ok_or_else(|| {
        error_response(
            StatusCode::BAD_REQUEST,
            "invalid_side",
            "side must be 'long' or 'short'",
        )
    })?;
    if request.size_usd <= 0.0 {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "invalid_size",
            "size_usd must be positive",
        ));
    }

    let (position, event) = state
        .ledger
        .open(
            &auth.account.id,
            &request.coin,
            side,
            request.size_usd,
            request.leverage,
        )
        .map_err(IntoResponse::into_response)?;

    state.activity.record_open(&position, &event);
    state.copy.on_leader_open(&position, &event);

    Ok(Json(OpenResponse {
        fee: event.fill.fee,
        position,
    }))
}

/// POST /v1/trade/close
async fn close_position(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(request): Json<CloseRequest>,
) -> Result<Json<CloseResponse>, Response> {
    // Positions are owned exclusively by their account.
    match state.ledger.position(&request.position_id) {
        Some(position) if position.account_id == auth.account.id => {}
        _ => {
            return Err(error_response(
                StatusCode::NOT_FOUND,
                "position_not_found",
                &format!("no position {} on this account", request.position_id),
            ))
        }
    }

    let (position, event) = state
        .ledger
        .close(&request.position_id)
        .map_err(IntoResponse::into_response)?;

    state.activity.record_close(&position, &event);
    state.copy.on_leader_close(&position);

    Ok(Json(CloseResponse {
        exit_price: event.fill.price,
        pnl: event.fill.realized_pnl.unwrap_or(0.0),
        fee: event.fill.fee,
        position,
    }))
}

/// POST /v1/trade/stop-loss
async fn set_stop_loss(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(request): Json<StopLossRequest>,
) -> Result<Json<Position>, Response> {
    require_ownership(&state, &auth, &request.position_id)?;
    let position = state
        .ledger
        .attach_stop(&request.position_id, request.stop_price)
        .map_err(IntoResponse::into_response)?;
    Ok(Json(position))
}

/// POST /v1/trade/take-profit
async fn set_take_profit(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(request): Json<TakeProfitRequest>,
) -> Result<Json<Position>, Response> {
    require_ownership(&state, &auth, &request.position_id)?;
    let position = state
        .ledger
        .attach_take_profit(&request.position_id, request.take_profit_price)
        .map_err(IntoResponse::into_response)?;
    Ok(Json(position))
}

/// GET /v1/trade/positions
async fn list_positions(
    State(state): State<AppState>,
    auth: Authenticated,
    Query(query): Query<PositionsQuery>,
) -> Json<Vec<Position>> {
    let include_terminal = query.status.as_deref() == Some("all");
    Json(state.ledger.positions(&auth.account.id, include_terminal))
}

/// GET /v1/trade/orders
async fn list_orders(
    State(state): State<AppState>,
    auth: Authenticated,
    Query(query): Query<OrdersQuery>,
) -> Result<Json<Vec<Order>>, Response> {
    let status = match query.status.as_deref() {
        None | Some("all") => None,
        Some("pending") => Some(OrderStatus::Pending),
        Some("filled") => Some(OrderStatus::Filled),
        Some("cancelled") => Some(OrderStatus::Cancelled),
        Some(other) => {
            return Err(error_response(
                StatusCode::BAD_REQUEST,
                "invalid_status",
                &format!("unknown order status: {}", other),
            ))
        }
    };
    let limit = query.limit.unwrap_or(50).min(200);
    Ok(Json(state.ledger.orders(&auth.account.id, status, limit)))
}

/// GET /v1/trade/history
async fn trade_history(
    State(state): State<AppState>,
    auth: Authenticated,
    Query(query): Query<HistoryQuery>,
) -> Json<Vec<Fill>> {
    let limit = query.limit.unwrap_or(50).min(200);
    Json(state.ledger.history(&auth.account.id, limit))
}

fn require_ownership(
    state: &AppState,
    auth: &Authenticated,
    position_id: &str,
) -> Result<(), Response> {
    match state.ledger.position(position_id) {
        Some(position) if position.account_id == auth.account.id => Ok(()),
        _ => Err(error_response(
            StatusCode::NOT_FOUND,
            "position_not_found",
            &format!("no position {} on this account", position_id),
        )),
    }
}
