//! Copy-Trading Types
//!
//! Subscriptions are a directed edge table keyed by (follower, leader);
//! leaders never hold references to their mirrors.

use serde::{Deserialize, Serialize};

/// A follower's subscription to a leader's trades.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CopySubscription {
    /// Follower account.
    pub follower_id: String,
    /// Leader account, referenced by id only.
    pub leader_id: String,
    /// Capital allocated to mirroring this leader, in USD.
    pub allocation_usd: f64,
    /// Optional cap on any single mirrored position's notional.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_position_size: Option<f64>,
    /// Optional stop-loss percentage attached to every mirror.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss_pct: Option<f64>,
    /// Inactive subscriptions stop mirroring but keep their history.
    pub active: bool,
    /// When the subscription was created (ms).
    pub created_at: i64,
    /// When the subscription was last updated (ms).
    pub updated_at: i64,
}

/// Outcome of mirroring one leader fill into one follower.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "outcome")]
pub enum MirrorOutcome {
    /// Mirror position opened or closed.
    Mirrored { position_id: String, size_usd: f64 },
    /// Mirror skipped; informational, not a failure.
    Skipped { reason: String },
    /// The follower-side command failed.
    Failed { error: String },
}

/// Per-position result of closing mirrors on unfollow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MirrorCloseResult {
    pub position_id: String,
    pub closed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Result of an unfollow: the subscription is deactivated and every open
/// mirror gets an individual close attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnfollowReport {
    pub leader_id: String,
    pub deactivated: bool,
    pub closes: Vec<MirrorCloseResult>,
}

/// Leaderboard row for copy trading.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    pub leader_id: String,
    /// Anonymized display alias.
    pub alias: String,
    pub realized_pnl: f64,
    pub cumulative_volume: f64,
    pub followers: u32,
}

/// One of the caller's followers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FollowerEntry {
    /// Anonymized display alias of the follower.
    pub alias: String,
    pub allocation_usd: f64,
    /// Following since (ms).
    pub since: i64,
}
