//! Position Ledger
//!
//! Authoritative store of positions, orders, and fills per account.
//! Account mutation is serialized by a per-account lock (single writer per
//! account id); cross-account opens (mirrors) take both locks in ascending
//! account-id order. Terminal transitions additionally ride the store's
//! conditional UPDATE, so a user close racing a trigger close has exactly
//! one winner and the loser observes `PositionNotOpen`.

use crate::services::fees::{commission_entry, fee_for};
use crate::services::feed::PriceBoard;
use crate::services::SqliteStore;
use crate::types::{
    CloseReason, Fill, FillAction, FillEvent, Market, Order, OrderKind, OrderStatus, Position,
    PositionSide, PositionStatus, short_id,
};
use dashmap::DashMap;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::{debug, info};

/// Ledger errors. All are local typed outcomes; nothing is thrown.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Unknown market: {0}")]
    UnknownMarket(String),

    #[error("Invalid leverage: {requested}x exceeds maximum {max}x")]
    InvalidLeverage { requested: f64, max: f64 },

    #[error("Insufficient margin: need {needed:.2}, have {available:.2}")]
    InsufficientMargin { needed: f64, available: f64 },

    #[error("Position not open: {0}")]
    PositionNotOpen(String),

    #[error("Invalid trigger price: {0}")]
    InvalidTriggerPrice(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("No price data available for {0}")]
    NoPriceData(String),

    #[error("Database error: {0}")]
    Database(String),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(e: rusqlite::Error) -> Self {
        LedgerError::Database(e.to_string())
    }
}

/// Parameters for a mirror open issued by the copy engine.
pub struct MirrorOpen {
    pub follower_id: String,
    pub leader_id: String,
    pub source_position_id: String,
    pub ticker: String,
    pub side: PositionSide,
    pub size_usd: f64,
    /// Leader's leverage; clamped to the follower's effective cap.
    pub leverage: f64,
    /// Stop attached immediately after open, from the subscription.
    pub stop_loss_pct: Option<f64>,
}

/// The position ledger.
pub struct PositionLedger {
    store: Arc<SqliteStore>,
    board: Arc<PriceBoard>,
    maintenance_margin_ratio: f64,
    /// Per-account writer locks.
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl PositionLedger {
    pub fn new(
        store: Arc<SqliteStore>,
        board: Arc<PriceBoard>,
        maintenance_margin_ratio: f64,
    ) -> Self {
        Self {
            store,
            board,
            maintenance_margin_ratio,
            locks: DashMap::new(),
        }
    }

    fn lock_handle(&self, account_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(account_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    // ==========================================================================
    // Open
    // ==========================================================================

    /// Open a leveraged position at the current market price. Margin and
    /// fee are debited atomically; the debit is visible to the next open on
    /// the same account because the account lock spans the whole move.
    pub fn open(
        &self,
        account_id: &str,
        ticker: &str,
        side: PositionSide,
        size_usd: f64,
        leverage: f64,
    ) -> Result<(Position, FillEvent), LedgerError> {
        let market = Market::find(ticker)
            .ok_or_else(|| LedgerError::UnknownMarket(ticker.to_string()))?;

        let lock = self.lock_handle(account_id);
        let _guard = lock.lock().unwrap();

        let account = self
            .store
            .get_account(account_id)
            .ok_or_else(|| LedgerError::AccountNotFound(account_id.to_string()))?;

        let max_leverage = market.max_leverage.min(account.tier().max_leverage());
        if leverage < 1.0 || leverage > max_leverage {
            return Err(LedgerError::InvalidLeverage {
                requested: leverage,
                max: max_leverage,
            });
        }

        let entry_price = self
            .board
            .price(&market.ticker)
            .ok_or_else(|| LedgerError::NoPriceData(market.ticker.clone()))?;

        self.do_open(
            account,
            market.ticker,
            side,
            size_usd,
            leverage,
            entry_price,
            None,
        )
    }

    /// Open a mirror for the copy engine. Leverage is clamped to the
    /// follower's effective cap rather than failing, and both account locks
    /// are taken in ascending id order.
    pub fn open_mirror(&self, params: MirrorOpen) -> Result<(Position, FillEvent), LedgerError> {
        let market = Market::find(&params.ticker)
            .ok_or_else(|| LedgerError::UnknownMarket(params.ticker.clone()))?;

        let (first, second) = if params.leader_id < params.follower_id {
            (&params.leader_id, &params.follower_id)
        } else {
            (&params.follower_id, &params.leader_id)
        };
        let first_lock = self.lock_handle(first);
        let second_lock = self.lock_handle(second);
        let _g1 = first_lock.lock().unwrap();
        let _g2 = if first != second {
            Some(second_lock.lock().unwrap())
        } else {
            None
        };

        let follower = self
            .store
            .get_account(&params.follower_id)
            .ok_or_else(|| LedgerError::AccountNotFound(params.follower_id.clone()))?;

        let cap = market.max_leverage.min(follower.tier().max_leverage());
        let leverage = params.leverage.clamp(1.0, cap);

        let entry_price = self
            .board
            .price(&market.ticker)
            .ok_or_else(|| LedgerError::NoPriceData(market.ticker.clone()))?;

        let (mut position, event) = self.do_open(
            follower,
            market.ticker,
            params.side,
            params.size_usd,
            leverage,
            entry_price,
            Some((params.leader_id.clone(), params.source_position_id.clone())),
        )?;

        // Subscription-level stop, relative to the mirror's entry.
        if let Some(pct) = params.stop_loss_pct {
            let stop = match params.side {
                PositionSide::Long => entry_price * (1.0 - pct / 100.0),
                PositionSide::Short => entry_price * (1.0 + pct / 100.0),
            };
            let order = Order::trigger(&position, OrderKind::StopLoss, stop);
            self.store.create_order(&order)?;
            self.store
                .update_triggers(&position.id, Some(stop), position.take_profit_price)?;
            position.stop_price = Some(stop);
        }

        Ok((position, event))
    }

    /// Shared open path. The caller holds the account lock and has resolved
    /// the entry price and leverage.
    #[allow(clippy::too_many_arguments)]
    fn do_open(
        &self,
        account: crate::types::Account,
        ticker: String,
        side: PositionSide,
        size_usd: f64,
        leverage: f64,
        entry_price: f64,
        mirror: Option<(String, String)>,
    ) -> Result<(Position, FillEvent), LedgerError> {
        let equity_before = account.equity();
        let fee = fee_for(&account, size_usd);
        let margin = size_usd / leverage;
        let needed = margin + fee.total;

        if needed > account.balance {
            return Err(LedgerError::InsufficientMargin {
                needed,
                available: account.balance,
            });
        }

        let mut position = Position::open(
            account.id.clone(),
            ticker.clone(),
            side,
            size_usd,
            leverage,
            entry_price,
            self.maintenance_margin_ratio,
        );
        if let Some((leader_id, source_position_id)) = mirror {
            position.leader_id = Some(leader_id);
            position.source_position_id = Some(source_position_id);
        }

        let mut order = Order::market(account.id.clone(), ticker.clone(), side, size_usd);
        order.position_id = Some(position.id.clone());
        order.status = OrderStatus::Filled;
        order.fill_price = Some(entry_price);
        order.fee = fee.total;

        let fill = Fill {
            id: short_id("fill"),
            order_id: Some(order.id.clone()),
            position_id: position.id.clone(),
            account_id: account.id.clone(),
            ticker,
            side,
            action: FillAction::Open,
            notional: size_usd,
            price: entry_price,
            fee: fee.total,
            markup_fee: fee.markup,
            realized_pnl: None,
            close_reason: None,
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        let referral = commission_entry(&account, &fill);
        self.store
            .settle_open(&position, &order, &fill, referral.as_ref())?;

        info!(
            "Opened {} {} {} {:.2} USD at {} ({}x, margin {:.2})",
            position.id, position.side, position.ticker, size_usd, entry_price, leverage, margin
        );

        Ok((
            position,
            FillEvent {
                fill,
                account_equity: equity_before,
                leverage,
            },
        ))
    }

    // ==========================================================================
    // Close
    // ==========================================================================

    /// Close a position on user command at the current market price.
    pub fn close(&self, position_id: &str) -> Result<(Position, FillEvent), LedgerError> {
        self.close_with(position_id, None, CloseReason::UserClose)
    }

    /// Close a position with an explicit reason, optionally at an explicit
    /// price (trigger closes execute at the tick's reported price).
    ///
    /// Exactly one close wins per position; losers get `PositionNotOpen`.
    pub fn close_with(
        &self,
        position_id: &str,
        price_override: Option<f64>,
        reason: CloseReason,
    ) -> Result<(Position, FillEvent), LedgerError> {
        let position = self
            .store
            .get_position(position_id)
            .ok_or_else(|| LedgerError::PositionNotOpen(position_id.to_string()))?;
        if !position.is_open() {
            return Err(LedgerError::PositionNotOpen(position_id.to_string()));
        }

        let lock = self.lock_handle(&position.account_id);
        let _guard = lock.lock().unwrap();

        let account = self
            .store
            .get_account(&position.account_id)
            .ok_or_else(|| LedgerError::AccountNotFound(position.account_id.clone()))?;

        let exit_price = match price_override {
            Some(price) => price,
            None => self
                .board
                .price(&position.ticker)
                .ok_or_else(|| LedgerError::NoPriceData(position.ticker.clone()))?,
        };

        let pnl = position.pnl_at(exit_price);
        let fee = fee_for(&account, position.size_usd);
        let equity_before = account.equity();

        // User and copy closes record a fresh market order; trigger closes
        // fill the pending trigger order; liquidations fill without one.
        let (close_order, filled_trigger) = match reason {
            CloseReason::UserClose | CloseReason::CopyClose => {
                let mut order = Order::market(
                    position.account_id.clone(),
                    position.ticker.clone(),
                    position.side,
                    position.size_usd,
                );
                order.position_id = Some(position.id.clone());
                order.status = OrderStatus::Filled;
                order.fill_price = Some(exit_price);
                order.fee = fee.total;
                (Some(order), None)
            }
            CloseReason::StopLoss => (
                None,
                self.store
                    .pending_trigger(&position.id, OrderKind::StopLoss)
                    .map(|o| o.id),
            ),
            CloseReason::TakeProfit => (
                None,
                self.store
                    .pending_trigger(&position.id, OrderKind::TakeProfit)
                    .map(|o| o.id),
            ),
            CloseReason::Liquidated => (None, None),
        };

        let status = if reason == CloseReason::Liquidated {
            PositionStatus::Liquidated
        } else {
            PositionStatus::Closed
        };

        let fill = Fill {
            id: short_id("fill"),
            order_id: close_order
                .as_ref()
                .map(|o| o.id.clone())
                .or_else(|| filled_trigger.clone()),
            position_id: position.id.clone(),
            account_id: position.account_id.clone(),
            ticker: position.ticker.clone(),
            side: position.side,
            action: FillAction::Close,
            notional: position.size_usd,
            price: exit_price,
            fee: fee.total,
            markup_fee: fee.markup,
            realized_pnl: Some(pnl),
            close_reason: Some(reason),
            created_at: chrono::Utc::now().timestamp_millis(),
        };

        let referral = commission_entry(&account, &fill);
        let won = self.store.settle_close(
            &position,
            status,
            reason,
            exit_price,
            pnl,
            close_order.as_ref(),
            filled_trigger.as_deref(),
            &fill,
            referral.as_ref(),
        )?;

        if !won {
            debug!("Close lost race for {}", position.id);
            return Err(LedgerError::PositionNotOpen(position.id.clone()));
        }

        info!(
            "Closed {} ({}) at {} with P&L {:.2}",
            position.id, reason, exit_price, pnl
        );

        let mut closed = position.clone();
        closed.status = status;
        closed.closed_at = Some(fill.created_at);
        closed.close_reason = Some(reason);
        closed.exit_price = Some(exit_price);
        closed.realized_pnl = Some(pnl);

        Ok((
            closed,
            FillEvent {
                fill,
                account_equity: equity_before,
                leverage: position.leverage,
            },
        ))
    }

    // ==========================================================================
    // Triggers
    // ==========================================================================

    /// Attach (or overwrite) a stop-loss on an open position.
    pub fn attach_stop(&self, position_id: &str, price: f64) -> Result<Position, LedgerError> {
        self.attach_trigger(position_id, OrderKind::StopLoss, price)
    }

    /// Attach (or overwrite) a take-profit on an open position.
    pub fn attach_take_profit(
        &self,
        position_id: &str,
        price: f64,
    ) -> Result<Position, LedgerError> {
        self.attach_trigger(position_id, OrderKind::TakeProfit, price)
    }

    fn attach_trigger(
        &self,
        position_id: &str,
        kind: OrderKind,
        price: f64,
    ) -> Result<Position, LedgerError> {
        if price <= 0.0 {
            return Err(LedgerError::InvalidTriggerPrice(
                "trigger price must be positive".to_string(),
            ));
        }

        let position = self
            .store
            .get_position(position_id)
            .ok_or_else(|| LedgerError::PositionNotOpen(position_id.to_string()))?;

        let lock = self.lock_handle(&position.account_id);
        let _guard = lock.lock().unwrap();

        // Re-read under the lock: a racing attach may have moved the other
        // trigger since the first load.
        let mut position = self
            .store
            .get_position(position_id)
            .ok_or_else(|| LedgerError::PositionNotOpen(position_id.to_string()))?;
        if !position.is_open() {
            return Err(LedgerError::PositionNotOpen(position_id.to_string()));
        }

        let valid = match kind {
            OrderKind::StopLoss => position.valid_stop(price),
            OrderKind::TakeProfit => position.valid_take_profit(price),
            OrderKind::Market => false,
        };
        if !valid {
            return Err(LedgerError::InvalidTriggerPrice(format!(
                "{} at {} is on the wrong side of entry {} for a {} position",
                kind, price, position.entry_price, position.side
            )));
        }

        // Overwrite: cancel any previous pending trigger of this kind.
        self.store.cancel_pending_trigger(position_id, kind)?;
        let order = Order::trigger(&position, kind, price);
        self.store.create_order(&order)?;

        let (stop, take_profit) = match kind {
            OrderKind::StopLoss => (Some(price), position.take_profit_price),
            OrderKind::TakeProfit => (position.stop_price, Some(price)),
            OrderKind::Market => unreachable!(),
        };

        if !self.store.update_triggers(position_id, stop, take_profit)? {
            // The position went terminal while we were attaching; sweep the
            // order we just created.
            self.store.cancel_pending_trigger(position_id, kind)?;
            return Err(LedgerError::PositionNotOpen(position_id.to_string()));
        }

        position.stop_price = stop;
        position.take_profit_price = take_profit;

        debug!("Attached {} at {} to {}", kind, price, position_id);
        Ok(position)
    }

    // ==========================================================================
    // Queries
    // ==========================================================================

    pub fn position(&self, position_id: &str) -> Option<Position> {
        self.store.get_position(position_id)
    }

    /// Open positions, or open plus recent terminal ones.
    pub fn positions(&self, account_id: &str, include_terminal: bool) -> Vec<Position> {
        if include_terminal {
            self.store.all_positions(account_id, 50)
        } else {
            self.store.open_positions(account_id)
        }
    }

    pub fn open_positions_for_market(&self, ticker: &str) -> Vec<Position> {
        self.store.open_positions_for_market(ticker)
    }

    pub fn orders(
        &self,
        account_id: &str,
        status: Option<OrderStatus>,
        limit: usize,
    ) -> Vec<Order> {
        self.store.get_orders(account_id, status, limit)
    }

    pub fn history(&self, account_id: &str, limit: usize) -> Vec<Fill> {
        self.store.get_fills(account_id, limit)
    }
}
