//! Trading Types
//!
//! Positions, orders, and fills for the position ledger.

use serde::{Deserialize, Serialize};

use crate::types::short_id;

// =============================================================================
// Enums
// =============================================================================

/// Position direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionSide {
    Long,
    Short,
}

impl PositionSide {
    /// +1 for long, -1 for short. Used in P&L math.
    pub fn sign(&self) -> f64 {
        match self {
            PositionSide::Long => 1.0,
            PositionSide::Short => -1.0,
        }
    }

    pub fn parse(s: &str) -> Option<PositionSide> {
        match s {
            "long" => Some(PositionSide::Long),
            "short" => Some(PositionSide::Short),
            _ => None,
        }
    }
}

impl std::fmt::Display for PositionSide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionSide::Long => write!(f, "long"),
            PositionSide::Short => write!(f, "short"),
        }
    }
}

/// Position lifecycle. A position leaves `Open` exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionStatus {
    Open,
    Closed,
    Liquidated,
}

impl std::fmt::Display for PositionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PositionStatus::Open => write!(f, "open"),
            PositionStatus::Closed => write!(f, "closed"),
            PositionStatus::Liquidated => write!(f, "liquidated"),
        }
    }
}

/// Why a position reached its terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// Closed on user command.
    UserClose,
    /// Stop-loss trigger fired.
    StopLoss,
    /// Take-profit trigger fired.
    TakeProfit,
    /// Forced close by the liquidation check.
    Liquidated,
    /// Mirror closed because the leader's position closed.
    CopyClose,
}

impl CloseReason {
    pub fn parse(s: &str) -> Option<CloseReason> {
        match s {
            "user_close" => Some(CloseReason::UserClose),
            "stop_loss" => Some(CloseReason::StopLoss),
            "take_profit" => Some(CloseReason::TakeProfit),
            "liquidated" => Some(CloseReason::Liquidated),
            "copy_close" => Some(CloseReason::CopyClose),
            _ => None,
        }
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::UserClose => write!(f, "user_close"),
            CloseReason::StopLoss => write!(f, "stop_loss"),
            CloseReason::TakeProfit => write!(f, "take_profit"),
            CloseReason::Liquidated => write!(f, "liquidated"),
            CloseReason::CopyClose => write!(f, "copy_close"),
        }
    }
}

/// Order kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderKind {
    /// Execute immediately at the current price.
    Market,
    /// Close the linked position when price crosses the stop.
    StopLoss,
    /// Close the linked position when price reaches the target.
    TakeProfit,
}

impl std::fmt::Display for OrderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderKind::Market => write!(f, "market"),
            OrderKind::StopLoss => write!(f, "stop_loss"),
            OrderKind::TakeProfit => write!(f, "take_profit"),
        }
    }
}

/// Order status. Terminal states are set exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Filled,
    Cancelled,
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatus::Pending => write!(f, "pending"),
            OrderStatus::Filled => write!(f, "filled"),
            OrderStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Whether a fill opened or closed exposure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FillAction {
    Open,
    Close,
}

impl std::fmt::Display for FillAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FillAction::Open => write!(f, "open"),
            FillAction::Close => write!(f, "close"),
        }
    }
}

// =============================================================================
// Position
// =============================================================================

/// A leveraged position.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Position {
    /// Unique position ID (e.g., "pos_1a2b3c4d5e6f").
    pub id: String,
    /// Owning account.
    pub account_id: String,
    /// Market ticker.
    pub ticker: String,
    /// Long or short.
    pub side: PositionSide,
    /// Notional exposure in USD.
    pub size_usd: f64,
    /// Leverage applied.
    pub leverage: f64,
    /// Entry price.
    pub entry_price: f64,
    /// Collateral reserved: size_usd / leverage.
    pub margin: f64,
    /// Price at which the position is force-closed.
    pub liquidation_price: f64,
    /// Lifecycle status.
    pub status: PositionStatus,
    /// Stop-loss trigger price, if set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<f64>,
    /// Take-profit trigger price, if set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub take_profit_price: Option<f64>,
    /// Leader account this position mirrors, if it is a mirror.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leader_id: Option<String>,
    /// Leader position this position mirrors, if it is a mirror.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_position_id: Option<String>,
    /// When the position was opened (ms).
    pub opened_at: i64,
    /// When the position reached a terminal state (ms).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<i64>,
    /// Why the position reached its terminal state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<CloseReason>,
    /// Price at close.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_price: Option<f64>,
    /// P&L realized at close.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<f64>,
}

impl Position {
    /// Create a new open position. Margin and liquidation price are derived
    /// here; `maintenance_margin_ratio` comes from engine configuration.
    pub fn open(
        account_id: String,
        ticker: String,
        side: PositionSide,
        size_usd: f64,
        leverage: f64,
        entry_price: f64,
        maintenance_margin_ratio: f64,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        let margin = size_usd / leverage;
        let liquidation_price =
            Self::liquidation_price_for(side, entry_price, leverage, maintenance_margin_ratio);

        Self {
            id: short_id("pos"),
            account_id,
            ticker,
            side,
            size_usd,
            leverage,
            entry_price,
            margin,
            liquidation_price,
            status: PositionStatus::Open,
            stop_price: None,
            take_profit_price: None,
            leader_id: None,
            source_position_id: None,
            opened_at: now,
            closed_at: None,
            close_reason: None,
            exit_price: None,
            realized_pnl: None,
        }
    }

    /// Liquidation price: losses at this price consume the reserved margin
    /// down to the maintenance requirement. Long liquidates below entry,
    /// short above.
    pub fn liquidation_price_for(
        side: PositionSide,
        entry_price: f64,
        leverage: f64,
        maintenance_margin_ratio: f64,
    ) -> f64 {
        let initial_margin = 1.0 / leverage;
        match side {
            PositionSide::Long => entry_price * (1.0 - initial_margin + maintenance_margin_ratio),
            PositionSide::Short => entry_price * (1.0 + initial_margin - maintenance_margin_ratio),
        }
    }

    pub fn is_open(&self) -> bool {
        self.status == PositionStatus::Open
    }

    /// P&L at the given price: (exit - entry) / entry * size, signed by side.
    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) / self.entry_price * self.size_usd * self.side.sign()
    }

    /// Whether the liquidation price is crossed at the given price.
    pub fn should_liquidate(&self, price: f64) -> bool {
        match self.side {
            PositionSide::Long => price <= self.liquidation_price,
            PositionSide::Short => price >= self.liquidation_price,
        }
    }

    /// Whether the stop-loss is crossed at the given price.
    pub fn should_stop(&self, price: f64) -> bool {
        match (self.stop_price, self.side) {
            (Some(stop), PositionSide::Long) => price <= stop,
            (Some(stop), PositionSide::Short) => price >= stop,
            (None, _) => false,
        }
    }

    /// Whether the take-profit is crossed at the given price.
    pub fn should_take_profit(&self, price: f64) -> bool {
        match (self.take_profit_price, self.side) {
            (Some(tp), PositionSide::Long) => price >= tp,
            (Some(tp), PositionSide::Short) => price <= tp,
            (None, _) => false,
        }
    }

    /// Validate a stop price sits on the losing side of entry.
    pub fn valid_stop(&self, price: f64) -> bool {
        match self.side {
            PositionSide::Long => price < self.entry_price,
            PositionSide::Short => price > self.entry_price,
        }
    }

    /// Validate a take-profit price sits on the winning side of entry.
    pub fn valid_take_profit(&self, price: f64) -> bool {
        match self.side {
            PositionSide::Long => price > self.entry_price,
            PositionSide::Short => price < self.entry_price,
        }
    }

    pub fn is_mirror(&self) -> bool {
        self.source_position_id.is_some()
    }
}

// =============================================================================
// Order
// =============================================================================

/// A trading order. Market orders fill immediately; stop-loss and
/// take-profit orders stay pending until their trigger fires or they are
/// cancelled (replaced).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    /// Unique order ID (e.g., "ord_1a2b3c4d5e6f").
    pub id: String,
    /// Owning account.
    pub account_id: String,
    /// Linked position, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position_id: Option<String>,
    /// Market ticker.
    pub ticker: String,
    /// Position direction this order acts on.
    pub side: PositionSide,
    /// Order kind.
    pub kind: OrderKind,
    /// Order status.
    pub status: OrderStatus,
    /// Requested trigger price (stop/take-profit orders).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_price: Option<f64>,
    /// Notional size in USD.
    pub size_usd: f64,
    /// Price at which the order filled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fill_price: Option<f64>,
    /// Fee charged on fill.
    pub fee: f64,
    /// When the order was created (ms).
    pub created_at: i64,
    /// When the order was last updated (ms).
    pub updated_at: i64,
}

impl Order {
    /// Create a market order.
    pub fn market(
        account_id: String,
        ticker: String,
        side: PositionSide,
        size_usd: f64,
    ) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: short_id("ord"),
            account_id,
            position_id: None,
            ticker,
            side,
            kind: OrderKind::Market,
            status: OrderStatus::Pending,
            requested_price: None,
            size_usd,
            fill_price: None,
            fee: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Create a pending trigger order attached to a position.
    pub fn trigger(position: &Position, kind: OrderKind, trigger_price: f64) -> Self {
        let now = chrono::Utc::now().timestamp_millis();
        Self {
            id: short_id("ord"),
            account_id: position.account_id.clone(),
            position_id: Some(position.id.clone()),
            ticker: position.ticker.clone(),
            side: position.side,
            kind,
            status: OrderStatus::Pending,
            requested_price: Some(trigger_price),
            size_usd: position.size_usd,
            fill_price: None,
            fee: 0.0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Cancellation is only valid while pending.
    pub fn can_cancel(&self) -> bool {
        self.status == OrderStatus::Pending
    }
}

// =============================================================================
// Fill
// =============================================================================

/// A single execution. Fills are what the copy-mirror and fee ledgers
/// consume, and the rows behind trade history.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Fill {
    /// Unique fill ID (e.g., "fill_1a2b3c4d5e6f").
    pub id: String,
    /// Order that produced this fill. Liquidations fill without an order.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    /// Position affected.
    pub position_id: String,
    /// Owning account.
    pub account_id: String,
    /// Market ticker.
    pub ticker: String,
    /// Position direction.
    pub side: PositionSide,
    /// Open or close.
    pub action: FillAction,
    /// Notional executed.
    pub notional: f64,
    /// Execution price.
    pub price: f64,
    /// Total fee charged.
    pub fee: f64,
    /// Platform markup component of the fee.
    pub markup_fee: f64,
    /// Realized P&L, for closes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub realized_pnl: Option<f64>,
    /// Close reason, for closes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub close_reason: Option<CloseReason>,
    /// When the fill happened (ms).
    pub created_at: i64,
}

/// A fill plus the owning account's equity captured before the fill's fee
/// was applied. Mirror scaling reads the equity snapshot.
#[derive(Debug, Clone)]
pub struct FillEvent {
    pub fill: Fill,
    pub account_equity: f64,
    /// Leverage of the position at fill time.
    pub leverage: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_position() -> Position {
        Position::open(
            "acct_test".to_string(),
            "BTC".to_string(),
            PositionSide::Long,
            1000.0,
            5.0,
            100.0,
            0.005,
        )
    }

    #[test]
    fn test_margin_is_notional_over_leverage() {
        let p = long_position();
        assert_eq!(p.margin, 200.0);
    }

    #[test]
    fn test_liquidation_price_below_entry_for_long() {
        let p = long_position();
        // 100 * (1 - 0.2 + 0.005) = 80.5
        assert!((p.liquidation_price - 80.5).abs() < 1e-9);
        assert!(p.liquidation_price < p.entry_price);
    }

    #[test]
    fn test_liquidation_price_above_entry_for_short() {
        let liq = Position::liquidation_price_for(PositionSide::Short, 100.0, 5.0, 0.005);
        assert!((liq - 119.5).abs() < 1e-9);
        assert!(liq > 100.0);
    }

    #[test]
    fn test_pnl_sign() {
        let p = long_position();
        assert!((p.pnl_at(110.0) - 100.0).abs() < 1e-9);
        assert!((p.pnl_at(90.0) + 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_trigger_predicates() {
        let mut p = long_position();
        p.stop_price = Some(90.0);
        p.take_profit_price = Some(120.0);

        assert!(p.should_stop(89.0));
        assert!(!p.should_stop(91.0));
        assert!(p.should_take_profit(120.0));
        assert!(!p.should_take_profit(119.0));
    }

    #[test]
    fn test_trigger_price_validation() {
        let p = long_position();
        assert!(p.valid_stop(95.0));
        assert!(!p.valid_stop(105.0));
        assert!(p.valid_take_profit(105.0));
        assert!(!p.valid_take_profit(95.0));
    }
}
