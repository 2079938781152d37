//! Core type definitions for the trading engine.

pub mod account;
pub mod activity;
pub mod copy;
pub mod market;
pub mod price;
pub mod referral;
pub mod trading;

pub use account::{Account, AccountInfo, FeeTier};
pub use activity::{GossipItem, SignalKind, TradeSignal};
pub use copy::{
    CopySubscription, FollowerEntry, LeaderboardEntry, MirrorCloseResult, MirrorOutcome,
    UnfollowReport,
};
pub use market::{Market, MarketCategory};
pub use price::PriceTick;
pub use referral::{ReferralEntry, ReferralStats, Withdrawal, COMMISSION_RATE};
pub use trading::{
    CloseReason, Fill, FillAction, FillEvent, Order, OrderKind, OrderStatus, Position,
    PositionSide, PositionStatus,
};

/// Generate a prefixed short ID, e.g. `pos_1a2b3c4d5e6f`.
pub fn short_id(prefix: &str) -> String {
    let uuid = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", prefix, &uuid[..12])
}
