//! Account Service
//!
//! Registration, API-key resolution, and account summaries. The engine
//! trusts the account id resolved from a bearer key; there is no further
//! authentication below this layer.
//!
//! API keys are returned exactly once at registration and stored as
//! SHA-256 hashes.

use crate::services::SqliteStore;
use crate::types::{short_id, Account, AccountInfo};
use dashmap::DashMap;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Account service errors.
#[derive(Debug, Error)]
pub enum AccountError {
    #[error("Account not found: {0}")]
    NotFound(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for AccountError {
    fn from(e: rusqlite::Error) -> Self {
        AccountError::Database(e.to_string())
    }
}

/// Result of a successful registration. The API key appears here and
/// nowhere else.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub account_id: String,
    pub api_key: String,
    pub referral_code: String,
    pub starting_balance: f64,
}

/// Account registry over the SQLite store.
pub struct AccountService {
    store: Arc<SqliteStore>,
    starting_balance: f64,
    /// API-key-hash -> account id. The mapping is immutable, so caching it
    /// is safe even while balances move underneath.
    key_cache: DashMap<String, String>,
}

impl AccountService {
    pub fn new(store: Arc<SqliteStore>, starting_balance: f64) -> Self {
        Self {
            store,
            starting_balance,
            key_cache: DashMap::new(),
        }
    }

    /// Create a new account credited with the paper starting balance.
    /// An unknown referral code is ignored rather than rejected.
    pub fn register(&self, referral_code: Option<&str>) -> Result<Registration, AccountError> {
        let api_key = generate_api_key();
        let api_key_hash = hash_key(&api_key);

        let referrer_id = referral_code.and_then(|code| {
            let referrer = self.store.get_account_by_referral_code(code);
            if referrer.is_none() {
                warn!("Unknown referral code at registration: {}", code);
            }
            referrer.map(|a| a.id)
        });

        let account = Account {
            id: short_id("acct"),
            api_key_hash,
            balance: self.starting_balance,
            margin_reserved: 0.0,
            cumulative_volume: 0.0,
            cumulative_fees: 0.0,
            realized_pnl: 0.0,
            referral_code: format!("ref_{}", random_hex(8)),
            referrer_id,
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        self.store.create_account(&account)?;
        info!(
            "Registered account {} (referrer: {:?})",
            account.id, account.referrer_id
        );

        Ok(Registration {
            account_id: account.id,
            api_key,
            referral_code: account.referral_code,
            starting_balance: self.starting_balance,
        })
    }

    /// Resolve a bearer API key to its account.
    pub fn authenticate(&self, api_key: &str) -> Option<Account> {
        let hash = hash_key(api_key);

        if let Some(account_id) = self.key_cache.get(&hash) {
            return self.store.get_account(&account_id);
        }

        let account = self.store.get_account_by_key_hash(&hash)?;
        self.key_cache.insert(hash, account.id.clone());
        Some(account)
    }

    /// Load an account by id.
    pub fn get(&self, account_id: &str) -> Result<Account, AccountError> {
        self.store
            .get_account(account_id)
            .ok_or_else(|| AccountError::NotFound(account_id.to_string()))
    }

    /// Account summary for the account-info operation.
    pub fn info(&self, account_id: &str) -> Result<AccountInfo, AccountError> {
        let account = self.get(account_id)?;
        Ok(AccountInfo::from_account(&account))
    }
}

/// Generate a bearer API key, e.g. "pfk_9f2c...".
fn generate_api_key() -> String {
    format!("pfk_{}", random_hex(32))
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

fn hash_key(api_key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(api_key.as_bytes());
    hex::encode(hasher.finalize())
}

/// Deterministic anonymized display alias for an account, used by the
/// leaderboard, follower listings, and gossip.
pub fn alias_for(account_id: &str) -> String {
    const ADJECTIVES: &[&str] = &[
        "swift", "quiet", "feral", "golden", "midnight", "electric", "crimson", "lucky",
        "stubborn", "patient", "reckless", "sly",
    ];
    const ANIMALS: &[&str] = &[
        "flea", "mantis", "heron", "badger", "viper", "lynx", "otter", "raven", "gecko",
        "wolf", "moth", "orca",
    ];

    let mut hasher = Sha256::new();
    hasher.update(account_id.as_bytes());
    let digest = hasher.finalize();

    let adjective = ADJECTIVES[digest[0] as usize % ADJECTIVES.len()];
    let animal = ANIMALS[digest[1] as usize % ANIMALS.len()];
    let number = u16::from(digest[2]) % 100;
    format!("{}-{}-{:02}", adjective, animal, number)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setup() -> AccountService {
        let store = Arc::new(SqliteStore::new_in_memory().unwrap());
        AccountService::new(store, 10_000.0)
    }

    #[test]
    fn test_register_and_authenticate() {
        let service = setup();
        let registration = service.register(None).unwrap();

        assert!(registration.api_key.starts_with("pfk_"));
        assert!(registration.referral_code.starts_with("ref_"));

        let account = service.authenticate(&registration.api_key).unwrap();
        assert_eq!(account.id, registration.account_id);
        assert_eq!(account.balance, 10_000.0);

        assert!(service.authenticate("pfk_bogus").is_none());
    }

    #[test]
    fn test_referral_linking() {
        let service = setup();
        let referrer = service.register(None).unwrap();
        let referred = service
            .register(Some(&referrer.referral_code))
            .unwrap();

        let account = service.get(&referred.account_id).unwrap();
        assert_eq!(account.referrer_id, Some(referrer.account_id));
    }

    #[test]
    fn test_unknown_referral_code_ignored() {
        let service = setup();
        let registration = service.register(Some("ref_doesnotexist")).unwrap();
        let account = service.get(&registration.account_id).unwrap();
        assert!(account.referrer_id.is_none());
    }

    #[test]
    fn test_alias_is_deterministic() {
        assert_eq!(alias_for("acct_abc"), alias_for("acct_abc"));
        assert_ne!(alias_for("acct_abc"), alias_for("acct_def"));
    }
}
