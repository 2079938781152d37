//! Activity Feed
//!
//! Transient ring buffers behind the signals and gossip operations. Both
//! are derived from engine events: signals are structured recent activity
//! per market, gossip is the same activity as anonymized one-liners.

use crate::services::accounts::alias_for;
use crate::types::{
    CloseReason, FillEvent, GossipItem, Position, SignalKind, TradeSignal,
};
use std::collections::VecDeque;
use std::sync::Mutex;

const FEED_CAPACITY: usize = 256;

pub struct ActivityFeed {
    signals: Mutex<VecDeque<TradeSignal>>,
    gossip: Mutex<VecDeque<GossipItem>>,
}

impl ActivityFeed {
    pub fn new() -> std::sync::Arc<Self> {
        std::sync::Arc::new(Self {
            signals: Mutex::new(VecDeque::with_capacity(FEED_CAPACITY)),
            gossip: Mutex::new(VecDeque::with_capacity(FEED_CAPACITY)),
        })
    }

    pub fn record_open(&self, position: &Position, event: &FillEvent) {
        self.push_signal(TradeSignal {
            ticker: position.ticker.clone(),
            side: position.side,
            kind: SignalKind::PositionOpened,
            notional: position.size_usd,
            price: event.fill.price,
            timestamp: event.fill.created_at,
        });
        self.push_gossip(
            format!(
                "{} opened a {:.0}x {} on {} (${:.0})",
                alias_for(&position.account_id),
                position.leverage,
                position.side,
                position.ticker,
                position.size_usd
            ),
            event.fill.created_at,
        );
    }

    pub fn record_close(&self, position: &Position, event: &FillEvent) {
        let reason = position.close_reason.unwrap_or(CloseReason::UserClose);
        let kind = match reason {
            CloseReason::StopLoss => SignalKind::StopTriggered,
            CloseReason::TakeProfit => SignalKind::TakeProfitTriggered,
            CloseReason::Liquidated => SignalKind::Liquidated,
            CloseReason::UserClose | CloseReason::CopyClose => SignalKind::PositionClosed,
        };
        self.push_signal(TradeSignal {
            ticker: position.ticker.clone(),
            side: position.side,
            kind,
            notional: position.size_usd,
            price: event.fill.price,
            timestamp: event.fill.created_at,
        });

        let alias = alias_for(&position.account_id);
        let pnl = event.fill.realized_pnl.unwrap_or(0.0);
        let message = match reason {
            CloseReason::Liquidated => format!(
                "{} got liquidated on {} (-${:.2})",
                alias,
                position.ticker,
                pnl.abs()
            ),
            CloseReason::TakeProfit => format!(
                "{} took profit on {} (+${:.2})",
                alias, position.ticker, pnl
            ),
            CloseReason::StopLoss => format!(
                "{} stopped out of {} (${:.2})",
                alias, position.ticker, pnl
            ),
            CloseReason::UserClose | CloseReason::CopyClose => format!(
                "{} closed {} {} (${:+.2})",
                alias, position.side, position.ticker, pnl
            ),
        };
        self.push_gossip(message, event.fill.created_at);
    }

    /// Recent signals, newest first.
    pub fn signals(&self, limit: usize) -> Vec<TradeSignal> {
        let signals = self.signals.lock().unwrap();
        signals.iter().rev().take(limit).cloned().collect()
    }

    /// Recent gossip, newest first.
    pub fn gossip(&self, limit: usize) -> Vec<GossipItem> {
        let gossip = self.gossip.lock().unwrap();
        gossip.iter().rev().take(limit).cloned().collect()
    }

    fn push_signal(&self, signal: TradeSignal) {
        let mut signals = self.signals.lock().unwrap();
        if signals.len() >= FEED_CAPACITY {
            signals.pop_front();
        }
        signals.push_back(signal);
    }

    fn push_gossip(&self, message: String, timestamp: i64) {
        let mut gossip = self.gossip.lock().unwrap();
        if gossip.len() >= FEED_CAPACITY {
            gossip.pop_front();
        }
        gossip.push_back(GossipItem { message, timestamp });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Fill, FillAction, PositionSide};

    fn sample_event(position: &Position) -> FillEvent {
        FillEvent {
            fill: Fill {
                id: "fill_a".to_string(),
                order_id: None,
                position_id: position.id.clone(),
                account_id: position.account_id.clone(),
                ticker: position.ticker.clone(),
                side: position.side,
                action: FillAction::Open,
                notional: position.size_usd,
                price: position.entry_price,
                fee: 0.0,
                markup_fee: 0.0,
                realized_pnl: None,
                close_reason: None,
                created_at: 42,
            },
            account_equity: 10_000.0,
            leverage: position.leverage,
        }
    }

    #[test]
    fn test_signals_newest_first_and_capped() {
        let feed = ActivityFeed::new();
        let position = Position::open(
            "acct_a".to_string(),
            "BTC".to_string(),
            PositionSide::Long,
            1000.0,
            5.0,
            100.0,
            0.005,
        );
        let event = sample_event(&position);

        for _ in 0..(FEED_CAPACITY + 10) {
            feed.record_open(&position, &event);
        }

        let signals = feed.signals(10);
        assert_eq!(signals.len(), 10);
        assert_eq!(signals[0].kind, SignalKind::PositionOpened);

        let all = feed.signals(usize::MAX);
        assert_eq!(all.len(), FEED_CAPACITY);
    }

    #[test]
    fn test_gossip_message_shape() {
        let feed = ActivityFeed::new();
        let position = Position::open(
            "acct_a".to_string(),
            "BTC".to_string(),
            PositionSide::Long,
            1000.0,
            5.0,
            100.0,
            0.005,
        );
        feed.record_open(&position, &sample_event(&position));

        let gossip = feed.gossip(1);
        assert_eq!(gossip.len(), 1);
        assert!(gossip[0].message.contains("BTC"));
        assert!(gossip[0].message.contains("long"));
    }
}
