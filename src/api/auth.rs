//! Auth & Account API
//!
//! Endpoints:
//! - POST /v1/auth/register - Create an account, returns the API key once
//! - GET  /v1/auth/account - Account summary for the caller
//! - GET  /v1/auth/referral-stats - Referral earnings summary
//! - POST /v1/auth/referral-withdraw - Withdraw accumulated commission
//!
//! Mutating operations are scoped to the caller's account, resolved from
//! the bearer API key by the [`Authenticated`] extractor. The engine trusts
//! the resolved account id and performs no further authentication.

use axum::{
    extract::{FromRequestParts, State},
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::error::error_response;
use crate::services::{AccountError, ReferralError, Registration};
use crate::types::{Account, AccountInfo, ReferralStats, Withdrawal};
use crate::AppState;

/// Create auth router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/register", post(register))
        .route("/account", get(account))
        .route("/referral-stats", get(referral_stats))
        .route("/referral-withdraw", post(referral_withdraw))
}

/// Authenticated caller, resolved from `Authorization: Bearer <api key>`.
pub struct Authenticated {
    pub account: Account,
}

#[axum::async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header_value = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                error_response(
                    StatusCode::UNAUTHORIZED,
                    "unauthorized",
                    "missing Authorization header",
                )
            })?;

        let api_key = header_value.strip_prefix("Bearer ").ok_or_else(|| {
            error_response(
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                "expected bearer token",
            )
        })?;

        let account = state.accounts.authenticate(api_key).ok_or_else(|| {
            error_response(StatusCode::UNAUTHORIZED, "unauthorized", "invalid API key")
        })?;

        Ok(Authenticated { account })
    }
}

impl IntoResponse for AccountError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            AccountError::NotFound(_) => (StatusCode::NOT_FOUND, "account_not_found"),
            AccountError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
        };
        error_response(status, code, &self.to_string())
    }
}

impl IntoResponse for ReferralError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ReferralError::BelowMinimumWithdrawal { .. } => {
                (StatusCode::BAD_REQUEST, "below_minimum_withdrawal")
            }
            ReferralError::InsufficientBalance { .. } => {
                (StatusCode::BAD_REQUEST, "insufficient_balance")
            }
            ReferralError::AccountNotFound(_) => (StatusCode::NOT_FOUND, "account_not_found"),
            ReferralError::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "database_error"),
        };
        error_response(status, code, &self.to_string())
    }
}

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub referral_code: Option<String>,
}

/// POST /v1/auth/register
async fn register(
    State(state): State<AppState>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<Registration>, AccountError> {
    let registration = state.accounts.register(request.referral_code.as_deref())?;
    Ok(Json(registration))
}

/// GET /v1/auth/account
async fn account(
    State(state): State<AppState>,
    auth: Authenticated,
) -> Result<Json<AccountInfo>, AccountError> {
    let info = state.accounts.info(&auth.account.id)?;
    Ok(Json(info))
}

/// GET /v1/auth/referral-stats
async fn referral_stats(
    State(state): State<AppState>,
    auth: Authenticated,
) -> Json<ReferralStats> {
    Json(state.referrals.stats(&auth.account))
}

#[derive(Debug, Deserialize)]
pub struct WithdrawRequest {
    pub address: String,
    pub amount: Option<f64>,
}

/// POST /v1/auth/referral-withdraw
async fn referral_withdraw(
    State(state): State<AppState>,
    auth: Authenticated,
    Json(request): Json<WithdrawRequest>,
) -> Result<Json<Withdrawal>, ReferralError> {
    let withdrawal =
        state
            .referrals
            .withdraw(&auth.account.id, request.amount, &request.address)?;
    Ok(Json(withdrawal))
}
