//! Trigger Engine
//!
//! Consumes price ticks and evaluates liquidation, stop-loss, and
//! take-profit conditions for every open position on the tick's market.
//! Ticks for one market arrive serially from the feed worker, so evaluation
//! per market is single-writer. Stale ticks (older than the last processed
//! timestamp for the market) are dropped; duplicates no-op against already
//! terminal positions.
//!
//! Precedence per tick: liquidation, then stop-loss, then take-profit.
//! At most one close command is issued per position per tick, and closes
//! execute at the tick's reported price.

use crate::services::copy::CopyMirror;
use crate::services::feed::TickConsumer;
use crate::services::activity::ActivityFeed;
use crate::services::ledger::{LedgerError, PositionLedger};
use crate::types::{CloseReason, Position, PriceTick};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

pub struct TriggerEngine {
    ledger: Arc<PositionLedger>,
    copy: Arc<CopyMirror>,
    activity: Arc<ActivityFeed>,
    /// Last processed tick timestamp per market.
    last_tick: DashMap<String, i64>,
}

impl TriggerEngine {
    pub fn new(
        ledger: Arc<PositionLedger>,
        copy: Arc<CopyMirror>,
        activity: Arc<ActivityFeed>,
    ) -> Arc<Self> {
        Arc::new(Self {
            ledger,
            copy,
            activity,
            last_tick: DashMap::new(),
        })
    }

    /// Evaluate one tick against every open position on its market.
    pub fn process_tick(&self, tick: &PriceTick) {
        if let Some(last) = self.last_tick.get(&tick.ticker) {
            if tick.timestamp < *last {
                debug!(
                    "Dropped stale tick for {} ({} < {})",
                    tick.ticker, tick.timestamp, *last
                );
                return;
            }
        }
        self.last_tick.insert(tick.ticker.clone(), tick.timestamp);

        for position in self.ledger.open_positions_for_market(&tick.ticker) {
            // Liquidation takes precedence over user-set triggers, and
            // stop beats take-profit when one jump crosses both.
            if position.should_liquidate(tick.price) {
                self.force_liquidate(&position, tick.price);
            } else if position.should_stop(tick.price) {
                self.close_triggered(&position, tick.price, CloseReason::StopLoss);
            } else if position.should_take_profit(tick.price) {
                self.close_triggered(&position, tick.price, CloseReason::TakeProfit);
            }
        }
    }

    fn close_triggered(&self, position: &Position, price: f64, reason: CloseReason) {
        match self.ledger.close_with(&position.id, Some(price), reason) {
            Ok((closed, event)) => {
                info!(
                    "Trigger {} closed {} at {} (P&L {:.2})",
                    reason,
                    closed.id,
                    price,
                    event.fill.realized_pnl.unwrap_or(0.0)
                );
                self.activity.record_close(&closed, &event);
                self.copy.on_leader_close(&closed);
            }
            // Lost the race against a concurrent close; the position is
            // already terminal.
            Err(LedgerError::PositionNotOpen(_)) => {}
            Err(e) => warn!("Trigger close failed for {}: {}", position.id, e),
        }
    }

    /// Liquidation is a one-shot forced terminal transition. A write
    /// conflict is retried until the close lands or the position is
    /// observed terminal; an unliquidated position is risk exposure.
    fn force_liquidate(&self, position: &Position, price: f64) {
        loop {
            match self
                .ledger
                .close_with(&position.id, Some(price), CloseReason::Liquidated)
            {
                Ok((closed, event)) => {
                    warn!(
                        "Liquidated {} at {} (loss {:.2})",
                        closed.id,
                        price,
                        event.fill.realized_pnl.unwrap_or(0.0)
                    );
                    self.activity.record_close(&closed, &event);
                    self.copy.on_leader_close(&closed);
                    return;
                }
                Err(LedgerError::PositionNotOpen(_)) => return,
                Err(e) => {
                    error!(
                        "Liquidation of {} failed, retrying: {}",
                        position.id, e
                    );
                    std::thread::sleep(Duration::from_millis(10));
                }
            }
        }
    }
}

impl TickConsumer for TriggerEngine {
    fn on_tick(&self, tick: &PriceTick) {
        self.process_tick(tick);
    }
}
