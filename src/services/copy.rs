//! Copy-Mirror Engine
//!
//! Mirrors a leader's fills into follower accounts. Subscriptions are a
//! directed (follower, leader) edge table looked up by leader id on fill
//! events; mirrored positions carry forward references to their leader and
//! source position, never the other way around.
//!
//! Mirror fills do not fan out again: there are no mirror-of-mirror
//! cascades, which also breaks follow cycles.

use crate::services::accounts::alias_for;
use crate::services::ledger::{MirrorOpen, PositionLedger};
use crate::services::SqliteStore;
use crate::types::{
    CloseReason, CopySubscription, FillEvent, FollowerEntry, LeaderboardEntry, MirrorCloseResult,
    MirrorOutcome, Position, UnfollowReport,
};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

/// Copy engine errors.
#[derive(Debug, Error)]
pub enum CopyError {
    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Not following: {0}")]
    SubscriptionNotFound(String),

    #[error("Cannot follow yourself")]
    SelfFollow,

    #[error("Allocation must be positive")]
    InvalidAllocation,

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for CopyError {
    fn from(e: rusqlite::Error) -> Self {
        CopyError::Database(e.to_string())
    }
}

pub struct CopyMirror {
    store: Arc<SqliteStore>,
    ledger: Arc<PositionLedger>,
    /// Mirrors scaled below this notional are skipped, not opened.
    min_mirror_notional: f64,
}

impl CopyMirror {
    pub fn new(
        store: Arc<SqliteStore>,
        ledger: Arc<PositionLedger>,
        min_mirror_notional: f64,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            ledger,
            min_mirror_notional,
        })
    }

    // ==========================================================================
    // Subscriptions
    // ==========================================================================

    /// Follow a leader. Re-following updates the existing edge; reactivating
    /// an inactive edge restarts its activation time, so fills from before
    /// the reactivation are not mirrored.
    pub fn follow(
        &self,
        follower_id: &str,
        leader_id: &str,
        allocation_usd: f64,
        max_position_size: Option<f64>,
        stop_loss_pct: Option<f64>,
    ) -> Result<CopySubscription, CopyError> {
        if follower_id == leader_id {
            return Err(CopyError::SelfFollow);
        }
        if allocation_usd <= 0.0 {
            return Err(CopyError::InvalidAllocation);
        }
        if self.store.get_account(leader_id).is_none() {
            return Err(CopyError::AccountNotFound(leader_id.to_string()));
        }

        let now = chrono::Utc::now().timestamp_millis();
        let created_at = match self.store.get_subscription(follower_id, leader_id) {
            Some(existing) if existing.active => existing.created_at,
            _ => now,
        };

        let sub = CopySubscription {
            follower_id: follower_id.to_string(),
            leader_id: leader_id.to_string(),
            allocation_usd,
            max_position_size,
            stop_loss_pct,
            active: true,
            created_at,
            updated_at: now,
        };
        self.store.upsert_subscription(&sub)?;

        info!(
            "{} now follows {} with {:.2} USD allocated",
            follower_id, leader_id, allocation_usd
        );
        Ok(sub)
    }

    /// Stop following a leader: deactivate the edge and close every open
    /// mirror of that leader. Closes are best-effort — one failure does not
    /// stop the rest, and each failure is reported individually.
    pub fn unfollow(&self, follower_id: &str, leader_id: &str) -> Result<UnfollowReport, CopyError> {
        if self.store.get_subscription(follower_id, leader_id).is_none() {
            return Err(CopyError::SubscriptionNotFound(leader_id.to_string()));
        }

        let deactivated = self.store.deactivate_subscription(follower_id, leader_id)?;

        let mut closes = Vec::new();
        for mirror in self.store.open_mirrors(follower_id, leader_id) {
            match self
                .ledger
                .close_with(&mirror.id, None, CloseReason::CopyClose)
            {
                Ok(_) => closes.push(MirrorCloseResult {
                    position_id: mirror.id,
                    closed: true,
                    error: None,
                }),
                Err(e) => {
                    warn!("Unfollow close failed for {}: {}", mirror.id, e);
                    closes.push(MirrorCloseResult {
                        position_id: mirror.id,
                        closed: false,
                        error: Some(e.to_string()),
                    });
                }
            }
        }

        info!(
            "{} unfollowed {} ({} mirror closes, {} failures)",
            follower_id,
            leader_id,
            closes.len(),
            closes.iter().filter(|c| !c.closed).count()
        );

        Ok(UnfollowReport {
            leader_id: leader_id.to_string(),
            deactivated,
            closes,
        })
    }

    /// All subscriptions held by a follower.
    pub fn following(&self, follower_id: &str) -> Vec<CopySubscription> {
        self.store.subscriptions_for_follower(follower_id)
    }

    /// Active followers of a leader.
    pub fn followers(&self, leader_id: &str) -> Vec<FollowerEntry> {
        self.store
            .active_subscriptions_for_leader(leader_id)
            .into_iter()
            .map(|sub| FollowerEntry {
                alias: alias_for(&sub.follower_id),
                allocation_usd: sub.allocation_usd,
                since: sub.created_at,
            })
            .collect()
    }

    /// Top leaders by realized P&L.
    pub fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        self.store
            .top_leaders(limit)
            .into_iter()
            .map(|(account, followers)| LeaderboardEntry {
                leader_id: account.id.clone(),
                alias: alias_for(&account.id),
                realized_pnl: account.realized_pnl,
                cumulative_volume: account.cumulative_volume,
                followers,
            })
            .collect()
    }

    // ==========================================================================
    // Fill fan-out
    // ==========================================================================

    /// Mirror a leader's open into every active subscription. Subscriptions
    /// activated strictly after the fill's timestamp are skipped (snapshot
    /// at fill time). Returns the per-follower outcomes.
    pub fn on_leader_open(
        &self,
        leader_position: &Position,
        event: &FillEvent,
    ) -> Vec<(String, MirrorOutcome)> {
        if leader_position.is_mirror() {
            return Vec::new();
        }

        let leader_id = &leader_position.account_id;
        let leader_equity = event.account_equity;
        if leader_equity <= 0.0 {
            warn!("Leader {} has non-positive equity, skipping mirrors", leader_id);
            return Vec::new();
        }

        let mut outcomes = Vec::new();
        for sub in self.store.active_subscriptions_for_leader(leader_id) {
            if sub.created_at > event.fill.created_at {
                // Subscribed after this fill; nothing to mirror.
                continue;
            }

            let outcome = self.mirror_one(&sub, leader_position, event, leader_equity);
            outcomes.push((sub.follower_id.clone(), outcome));
        }
        outcomes
    }

    fn mirror_one(
        &self,
        sub: &CopySubscription,
        leader_position: &Position,
        event: &FillEvent,
        leader_equity: f64,
    ) -> MirrorOutcome {
        let mut size = sub.allocation_usd * (event.fill.notional / leader_equity);
        if let Some(cap) = sub.max_position_size {
            size = size.min(cap);
        }

        if size < self.min_mirror_notional {
            info!(
                "Mirror skipped for {} following {}: {:.2} below minimum {:.2}",
                sub.follower_id, sub.leader_id, size, self.min_mirror_notional
            );
            return MirrorOutcome::Skipped {
                reason: format!(
                    "scaled size {:.2} below minimum tradable notional {:.2}",
                    size, self.min_mirror_notional
                ),
            };
        }

        let open = MirrorOpen {
            follower_id: sub.follower_id.clone(),
            leader_id: sub.leader_id.clone(),
            source_position_id: leader_position.id.clone(),
            ticker: leader_position.ticker.clone(),
            side: leader_position.side,
            size_usd: size,
            leverage: event.leverage,
            stop_loss_pct: sub.stop_loss_pct,
        };

        match self.ledger.open_mirror(open) {
            Ok((position, _event)) => {
                info!(
                    "Mirrored {} into {} as {} ({:.2} USD)",
                    leader_position.id, sub.follower_id, position.id, size
                );
                MirrorOutcome::Mirrored {
                    position_id: position.id,
                    size_usd: size,
                }
            }
            Err(e) => {
                warn!(
                    "Mirror open failed for {} following {}: {}",
                    sub.follower_id, sub.leader_id, e
                );
                MirrorOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Close every open mirror of a leader position that just went
    /// terminal. Best-effort: failures are logged per mirror.
    pub fn on_leader_close(&self, leader_position: &Position) {
        if leader_position.is_mirror() {
            return;
        }

        for mirror in self.store.mirrors_of(&leader_position.id) {
            match self
                .ledger
                .close_with(&mirror.id, None, CloseReason::CopyClose)
            {
                Ok((closed, _)) => {
                    info!("Closed mirror {} of {}", closed.id, leader_position.id)
                }
                Err(e) => warn!(
                    "Mirror close failed for {} (source {}): {}",
                    mirror.id, leader_position.id, e
                ),
            }
        }
    }
}
