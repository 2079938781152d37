//! Purple Flea trading engine: leveraged perp positions, price-triggered
//! closes, copy trading, and referral commissions.

pub mod api;
pub mod config;
pub mod error;
pub mod services;
pub mod types;

use std::sync::Arc;

use config::Config;
use services::{
    AccountService, ActivityFeed, CopyMirror, PositionLedger, PriceFeed, ReferralLedger,
    SqliteStore, TriggerEngine,
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub accounts: Arc<AccountService>,
    pub ledger: Arc<PositionLedger>,
    pub copy: Arc<CopyMirror>,
    pub referrals: Arc<ReferralLedger>,
    pub activity: Arc<ActivityFeed>,
    pub feed: Arc<PriceFeed>,
}

/// Wire the engine: store, services, feed, and trigger engine. The trigger
/// engine is attached to the feed as its tick consumer.
pub fn build_state(config: Config) -> anyhow::Result<(AppState, Arc<TriggerEngine>)> {
    let store = match &config.database_path {
        Some(path) => Arc::new(SqliteStore::new(path)?),
        None => Arc::new(SqliteStore::new_in_memory()?),
    };

    let feed = PriceFeed::new(config.feed.queue_capacity);
    let accounts = Arc::new(AccountService::new(store.clone(), config.starting_balance));
    let ledger = Arc::new(PositionLedger::new(
        store.clone(),
        feed.board(),
        config.maintenance_margin_ratio,
    ));
    let copy = CopyMirror::new(store.clone(), ledger.clone(), config.min_mirror_notional);
    let referrals = Arc::new(ReferralLedger::new(store, config.min_withdrawal));
    let activity = ActivityFeed::new();

    let triggers = TriggerEngine::new(ledger.clone(), copy.clone(), activity.clone());
    feed.attach_consumer(triggers.clone());

    let state = AppState {
        config: Arc::new(config),
        accounts,
        ledger,
        copy,
        referrals,
        activity,
        feed,
    };

    Ok((state, triggers))
}
