//! Fee & Referral Ledger
//!
//! Fees are `base(tier) + markup(tier)` basis points of fill notional,
//! resolved once per fill from the enumerated tier schedule. Referrers earn
//! a 20% commission on the markup component, posted as immutable ledger
//! rows; commission balances are always a reduction over unwithdrawn rows.

use crate::services::SqliteStore;
use crate::types::{
    short_id, Account, Fill, ReferralEntry, ReferralStats, Withdrawal, COMMISSION_RATE,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Referral ledger errors.
#[derive(Debug, Error)]
pub enum ReferralError {
    #[error("Withdrawal below minimum: {requested:.2} < {minimum:.2}")]
    BelowMinimumWithdrawal { requested: f64, minimum: f64 },

    #[error("Insufficient balance: requested {requested:.2}, available {available:.2}")]
    InsufficientBalance { requested: f64, available: f64 },

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for ReferralError {
    fn from(e: rusqlite::Error) -> Self {
        ReferralError::Database(e.to_string())
    }
}

/// Fee for one fill, split into venue base and platform markup.
#[derive(Debug, Clone, Copy)]
pub struct FeeBreakdown {
    pub total: f64,
    pub base: f64,
    pub markup: f64,
}

/// Resolve the fee for a fill of `notional` at the account's current tier.
pub fn fee_for(account: &Account, notional: f64) -> FeeBreakdown {
    let tier = account.tier();
    let base = notional * tier.base_fee_bps() / 10_000.0;
    let markup = notional * tier.markup_bps() / 10_000.0;
    FeeBreakdown {
        total: base + markup,
        base,
        markup,
    }
}

/// Build the commission entry for a fill, if the fee payer has a referrer
/// and the fill carried any markup. Inserted atomically with the fill by
/// the store.
pub fn commission_entry(account: &Account, fill: &Fill) -> Option<ReferralEntry> {
    let referrer_id = account.referrer_id.as_ref()?;
    if fill.markup_fee <= 0.0 {
        return None;
    }
    Some(ReferralEntry {
        id: short_id("refent"),
        referrer_id: referrer_id.clone(),
        referred_id: account.id.clone(),
        fill_id: fill.id.clone(),
        markup_amount: fill.markup_fee,
        commission: fill.markup_fee * COMMISSION_RATE,
        created_at: fill.created_at,
        withdrawal_id: None,
    })
}

/// Referral ledger over the SQLite store.
pub struct ReferralLedger {
    store: Arc<SqliteStore>,
    min_withdrawal: f64,
}

impl ReferralLedger {
    pub fn new(store: Arc<SqliteStore>, min_withdrawal: f64) -> Self {
        Self {
            store,
            min_withdrawal,
        }
    }

    /// Referral summary for an account.
    pub fn stats(&self, account: &Account) -> ReferralStats {
        let (lifetime, unwithdrawn, withdrawn) = self.store.referral_totals(&account.id);
        ReferralStats {
            referral_code: account.referral_code.clone(),
            referred_accounts: self.store.count_referred(&account.id),
            lifetime_commission: lifetime,
            unwithdrawn_commission: unwithdrawn,
            withdrawn_commission: withdrawn,
        }
    }

    /// Withdraw accumulated commission to `address`.
    ///
    /// Without an amount the full unwithdrawn balance is swept. With an
    /// amount, whole entries are consumed oldest-first up to the largest
    /// prefix sum that fits; the paid amount is reported on the withdrawal.
    /// Entries are stamped exactly once; losing a race against a concurrent
    /// withdrawal re-reads the ledger and retries.
    pub fn withdraw(
        &self,
        referrer_id: &str,
        amount: Option<f64>,
        address: &str,
    ) -> Result<Withdrawal, ReferralError> {
        // Bounded retries: each round re-reads unspent entries, so a lost
        // race converges to InsufficientBalance once entries run out.
        for _ in 0..3 {
            let entries = self.store.unwithdrawn_entries(referrer_id);
            let available: f64 = entries.iter().map(|e| e.commission).sum();
            let requested = amount.unwrap_or(available);

            if requested < self.min_withdrawal {
                return Err(ReferralError::BelowMinimumWithdrawal {
                    requested,
                    minimum: self.min_withdrawal,
                });
            }
            if requested > available {
                return Err(ReferralError::InsufficientBalance {
                    requested,
                    available,
                });
            }

            let mut covered = Vec::new();
            let mut total = 0.0;
            for entry in &entries {
                if total + entry.commission > requested + 1e-9 {
                    break;
                }
                total += entry.commission;
                covered.push(entry.id.clone());
            }

            if total < self.min_withdrawal {
                return Err(ReferralError::BelowMinimumWithdrawal {
                    requested: total,
                    minimum: self.min_withdrawal,
                });
            }

            let withdrawal = Withdrawal {
                id: short_id("wd"),
                referrer_id: referrer_id.to_string(),
                amount: total,
                address: address.to_string(),
                entries: covered.len() as u32,
                created_at: chrono::Utc::now().timestamp_millis(),
            };

            if self.store.apply_withdrawal(&withdrawal, &covered)? {
                info!(
                    "Referral withdrawal {} for {}: {:.2} over {} entries",
                    withdrawal.id, referrer_id, withdrawal.amount, withdrawal.entries
                );
                return Ok(withdrawal);
            }

            warn!(
                "Referral withdrawal contention for {}, retrying",
                referrer_id
            );
        }

        Err(ReferralError::Database(
            "withdrawal contention, retries exhausted".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::FeeTier;

    fn account_with_tier(volume: f64, referrer: Option<&str>) -> Account {
        Account {
            id: "acct_fee".to_string(),
            api_key_hash: "h".to_string(),
            balance: 10_000.0,
            margin_reserved: 0.0,
            cumulative_volume: volume,
            cumulative_fees: 0.0,
            realized_pnl: 0.0,
            referral_code: "ref_fee".to_string(),
            referrer_id: referrer.map(String::from),
            created_at: 0,
        }
    }

    #[test]
    fn test_fee_breakdown_free_tier() {
        let account = account_with_tier(0.0, None);
        assert_eq!(account.tier(), FeeTier::Free);

        let fee = fee_for(&account, 10_000.0);
        // 4.5 bps base + 5.0 bps markup on $10k
        assert!((fee.base - 4.5).abs() < 1e-9);
        assert!((fee.markup - 5.0).abs() < 1e-9);
        assert!((fee.total - 9.5).abs() < 1e-9);
    }

    #[test]
    fn test_whale_tier_pays_no_markup() {
        let account = account_with_tier(2_000_000.0, None);
        let fee = fee_for(&account, 10_000.0);
        assert_eq!(fee.markup, 0.0);
        assert!(fee.base > 0.0);
    }

    #[test]
    fn test_commission_is_twenty_percent_of_markup() {
        let account = account_with_tier(0.0, Some("acct_referrer"));
        let fill = Fill {
            id: "fill_1".to_string(),
            order_id: None,
            position_id: "pos_1".to_string(),
            account_id: account.id.clone(),
            ticker: "BTC".to_string(),
            side: crate::types::PositionSide::Long,
            action: crate::types::FillAction::Open,
            notional: 10_000.0,
            price: 100.0,
            fee: 9.5,
            markup_fee: 5.0,
            realized_pnl: None,
            close_reason: None,
            created_at: 0,
        };

        let entry = commission_entry(&account, &fill).unwrap();
        assert_eq!(entry.referrer_id, "acct_referrer");
        assert!((entry.commission - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_no_commission_without_referrer() {
        let account = account_with_tier(0.0, None);
        let fill = Fill {
            id: "fill_1".to_string(),
            order_id: None,
            position_id: "pos_1".to_string(),
            account_id: account.id.clone(),
            ticker: "BTC".to_string(),
            side: crate::types::PositionSide::Long,
            action: crate::types::FillAction::Open,
            notional: 10_000.0,
            price: 100.0,
            fee: 9.5,
            markup_fee: 5.0,
            realized_pnl: None,
            close_reason: None,
            created_at: 0,
        };
        assert!(commission_entry(&account, &fill).is_none());
    }
}
