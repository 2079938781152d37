//! Markets API
//!
//! Endpoints:
//! - GET /v1/markets - All listed markets
//! - GET /v1/markets/rwa - Non-crypto markets
//! - GET /v1/markets/:category - Markets filtered by category
//! - GET /v1/markets/:coin/price - Current price for a market

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Response,
    routing::get,
    Json, Router,
};
use serde::Serialize;

use crate::error::error_response;
use crate::types::{Market, MarketCategory};
use crate::AppState;

/// Create markets router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_all))
        .route("/rwa", get(list_rwa))
        .route("/:ticker", get(list_category))
        .route("/:ticker/price", get(market_price))
}

/// GET /v1/markets
async fn list_all() -> Json<Vec<Market>> {
    Json(Market::all())
}

/// GET /v1/markets/rwa
async fn list_rwa() -> Json<Vec<Market>> {
    Json(Market::real_world_assets())
}

/// GET /v1/markets/:category
async fn list_category(Path(category): Path<String>) -> Result<Json<Vec<Market>>, Response> {
    let category = MarketCategory::parse(&category).ok_or_else(|| {
        error_response(
            StatusCode::NOT_FOUND,
            "unknown_category",
            &format!("unknown market category: {}", category),
        )
    })?;
    Ok(Json(Market::in_category(category)))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MarketPrice {
    pub ticker: String,
    pub price: f64,
    pub timestamp: i64,
}

/// GET /v1/markets/:coin/price
async fn market_price(
    State(state): State<AppState>,
    Path(coin): Path<String>,
) -> Result<Json<MarketPrice>, Response> {
    let market = Market::find(&coin).ok_or_else(|| {
        error_response(
            StatusCode::NOT_FOUND,
            "unknown_market",
            &format!("unknown market: {}", coin),
        )
    })?;

    let (price, timestamp) = state
        .feed
        .board()
        .price_with_timestamp(&market.ticker)
        .ok_or_else(|| {
            error_response(
                StatusCode::SERVICE_UNAVAILABLE,
                "no_price_data",
                &format!("no price data available for {}", market.ticker),
            )
        })?;

    Ok(Json(MarketPrice {
        ticker: market.ticker,
        price,
        timestamp,
    }))
}
