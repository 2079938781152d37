//! Activity Feed Types
//!
//! Trade signals and the gossip feed surfaced to agents. Both are derived
//! from engine events and kept transient.

use serde::{Deserialize, Serialize};

use crate::types::PositionSide;

/// What kind of engine event a signal reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalKind {
    PositionOpened,
    PositionClosed,
    StopTriggered,
    TakeProfitTriggered,
    Liquidated,
}

impl std::fmt::Display for SignalKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SignalKind::PositionOpened => write!(f, "position_opened"),
            SignalKind::PositionClosed => write!(f, "position_closed"),
            SignalKind::StopTriggered => write!(f, "stop_triggered"),
            SignalKind::TakeProfitTriggered => write!(f, "take_profit_triggered"),
            SignalKind::Liquidated => write!(f, "liquidated"),
        }
    }
}

/// A recent notable engine event on a market.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeSignal {
    pub ticker: String,
    pub side: PositionSide,
    pub kind: SignalKind,
    pub notional: f64,
    pub price: f64,
    pub timestamp: i64,
}

/// One line of platform gossip: anonymized, human-readable activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GossipItem {
    pub message: String,
    pub timestamp: i64,
}
