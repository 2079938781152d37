//! Account Types
//!
//! Trading accounts, fee tiers, and the account summary returned by the
//! account-info operation. The engine receives account ids as opaque
//! identifiers resolved from bearer credentials upstream; API keys are
//! stored hashed and never leave the register response.

use serde::{Deserialize, Serialize};

/// Fee tier, derived from cumulative traded volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeTier {
    Free,
    Pro,
    Whale,
}

impl FeeTier {
    /// Volume thresholds: pro at $100k cumulative, whale at $1M.
    pub fn for_volume(cumulative_volume: f64) -> FeeTier {
        if cumulative_volume >= 1_000_000.0 {
            FeeTier::Whale
        } else if cumulative_volume >= 100_000.0 {
            FeeTier::Pro
        } else {
            FeeTier::Free
        }
    }

    /// Venue base fee in basis points of notional.
    pub fn base_fee_bps(&self) -> f64 {
        match self {
            FeeTier::Free => 4.5,
            FeeTier::Pro => 4.0,
            FeeTier::Whale => 3.0,
        }
    }

    /// Platform markup in basis points, zero at the whale tier.
    pub fn markup_bps(&self) -> f64 {
        match self {
            FeeTier::Free => 5.0,
            FeeTier::Pro => 2.0,
            FeeTier::Whale => 0.0,
        }
    }

    /// Per-account leverage ceiling for this tier. The effective cap on any
    /// open is the lower of this and the market cap.
    pub fn max_leverage(&self) -> f64 {
        match self {
            FeeTier::Free => 10.0,
            FeeTier::Pro => 20.0,
            FeeTier::Whale => 50.0,
        }
    }
}

impl std::fmt::Display for FeeTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FeeTier::Free => write!(f, "free"),
            FeeTier::Pro => write!(f, "pro"),
            FeeTier::Whale => write!(f, "whale"),
        }
    }
}

/// A trading account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// Unique account ID (e.g., "acct_1a2b3c4d5e6f").
    pub id: String,
    /// SHA-256 of the API key, hex encoded. Never serialized to clients.
    #[serde(skip_serializing)]
    pub api_key_hash: String,
    /// Free collateral (USDC) not reserved against positions.
    pub balance: f64,
    /// Margin currently reserved across open positions.
    pub margin_reserved: f64,
    /// Lifetime traded notional volume.
    pub cumulative_volume: f64,
    /// Lifetime fees paid.
    pub cumulative_fees: f64,
    /// Realized P&L from closed positions.
    pub realized_pnl: f64,
    /// This account's shareable referral code (e.g., "ref_a1b2c3d4").
    pub referral_code: String,
    /// Account that referred this one, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub referrer_id: Option<String>,
    /// When the account was created (ms).
    pub created_at: i64,
}

impl Account {
    /// Account equity: free collateral plus reserved margin. Unrealized P&L
    /// is settled into the balance on close, not marked here.
    pub fn equity(&self) -> f64 {
        self.balance + self.margin_reserved
    }

    /// Current fee tier from cumulative volume.
    pub fn tier(&self) -> FeeTier {
        FeeTier::for_volume(self.cumulative_volume)
    }
}

/// Account summary for the account-info operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountInfo {
    pub account_id: String,
    pub tier: FeeTier,
    pub balance: f64,
    pub equity: f64,
    pub margin_reserved: f64,
    /// Tier leverage ceiling (markets may cap lower).
    pub max_leverage: f64,
    pub cumulative_volume: f64,
    pub cumulative_fees: f64,
    pub realized_pnl: f64,
    pub referral_code: String,
}

impl AccountInfo {
    pub fn from_account(account: &Account) -> Self {
        let tier = account.tier();
        Self {
            account_id: account.id.clone(),
            tier,
            balance: account.balance,
            equity: account.equity(),
            margin_reserved: account.margin_reserved,
            max_leverage: tier.max_leverage(),
            cumulative_volume: account.cumulative_volume,
            cumulative_fees: account.cumulative_fees,
            realized_pnl: account.realized_pnl,
            referral_code: account.referral_code.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_thresholds() {
        assert_eq!(FeeTier::for_volume(0.0), FeeTier::Free);
        assert_eq!(FeeTier::for_volume(99_999.0), FeeTier::Free);
        assert_eq!(FeeTier::for_volume(100_000.0), FeeTier::Pro);
        assert_eq!(FeeTier::for_volume(1_000_000.0), FeeTier::Whale);
    }

    #[test]
    fn test_whale_markup_is_zero() {
        assert_eq!(FeeTier::Whale.markup_bps(), 0.0);
        assert!(FeeTier::Free.markup_bps() > 0.0);
    }
}
