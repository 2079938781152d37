//! Referral Ledger Types
//!
//! Commission entries are append-only rows; balances are reductions over
//! unwithdrawn entries, never a running counter.

use serde::{Deserialize, Serialize};

/// Commission share of the fee markup paid to referrers.
pub const COMMISSION_RATE: f64 = 0.20;

/// An immutable commission entry posted on a referred account's fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralEntry {
    /// Unique entry ID (e.g., "refent_1a2b3c4d5e6f").
    pub id: String,
    /// Account earning the commission.
    pub referrer_id: String,
    /// Account whose fill generated the markup.
    pub referred_id: String,
    /// Fill the markup came from.
    pub fill_id: String,
    /// Markup amount on that fill.
    pub markup_amount: f64,
    /// Commission: 20% of the markup.
    pub commission: f64,
    /// When the entry was posted (ms).
    pub created_at: i64,
    /// Withdrawal that consumed this entry, once spent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub withdrawal_id: Option<String>,
}

/// Referral summary for an account.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralStats {
    pub referral_code: String,
    /// Number of accounts registered with this code.
    pub referred_accounts: u32,
    pub lifetime_commission: f64,
    pub unwithdrawn_commission: f64,
    pub withdrawn_commission: f64,
}

/// A completed commission withdrawal.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Withdrawal {
    /// Unique withdrawal ID (e.g., "wd_1a2b3c4d5e6f").
    pub id: String,
    pub referrer_id: String,
    /// Amount paid out: the sum of the entries consumed.
    pub amount: f64,
    /// Payout destination address. Settlement happens off-engine.
    pub address: String,
    /// Number of ledger entries consumed.
    pub entries: u32,
    /// When the withdrawal was recorded (ms).
    pub created_at: i64,
}
