//! Integration tests for the trigger engine: stop/take-profit firing,
//! liquidation precedence, stale-tick handling, and mirror propagation on
//! trigger closes.

use purpleflea::config::Config;
use purpleflea::services::TriggerEngine;
use purpleflea::types::{CloseReason, PositionSide, PositionStatus, PriceTick};
use purpleflea::AppState;
use std::sync::Arc;

fn engine() -> (AppState, Arc<TriggerEngine>) {
    purpleflea::build_state(Config::default()).unwrap()
}

fn account(state: &AppState) -> String {
    state.accounts.register(None).unwrap().account_id
}

/// Mimic the feed: refresh the board, then dispatch the tick.
fn tick(state: &AppState, triggers: &TriggerEngine, ticker: &str, price: f64, ts: i64) {
    state.feed.board().update(ticker, price, ts);
    triggers.process_tick(&PriceTick::new(ticker, price, ts));
}

#[test]
fn test_stop_loss_fires_below_stop_only() {
    let (state, triggers) = engine();
    let acct = account(&state);
    state.feed.board().update("BTC", 100.0, 1);

    let (position, _) = state
        .ledger
        .open(&acct, "BTC", PositionSide::Long, 1000.0, 5.0)
        .unwrap();
    state.ledger.attach_stop(&position.id, 90.0).unwrap();

    // 91 is above the stop: nothing happens.
    tick(&state, &triggers, "BTC", 91.0, 2);
    assert!(state.ledger.position(&position.id).unwrap().is_open());

    // 89 crosses it: closed with reason stop_loss at the tick's price.
    tick(&state, &triggers, "BTC", 89.0, 3);
    let closed = state.ledger.position(&position.id).unwrap();
    assert_eq!(closed.status, PositionStatus::Closed);
    assert_eq!(closed.close_reason, Some(CloseReason::StopLoss));
    assert_eq!(closed.exit_price, Some(89.0));
}

#[test]
fn test_take_profit_fires_for_long() {
    let (state, triggers) = engine();
    let acct = account(&state);
    state.feed.board().update("BTC", 100.0, 1);

    let (position, _) = state
        .ledger
        .open(&acct, "BTC", PositionSide::Long, 1000.0, 5.0)
        .unwrap();
    state.ledger.attach_take_profit(&position.id, 110.0).unwrap();

    tick(&state, &triggers, "BTC", 109.0, 2);
    assert!(state.ledger.position(&position.id).unwrap().is_open());

    tick(&state, &triggers, "BTC", 111.0, 3);
    let closed = state.ledger.position(&position.id).unwrap();
    assert_eq!(closed.close_reason, Some(CloseReason::TakeProfit));
    assert!((closed.realized_pnl.unwrap() - 110.0).abs() < 1e-9);
}

#[test]
fn test_short_triggers_are_mirrored() {
    let (state, triggers) = engine();
    let acct = account(&state);
    state.feed.board().update("ETH", 100.0, 1);

    let (position, _) = state
        .ledger
        .open(&acct, "ETH", PositionSide::Short, 1000.0, 5.0)
        .unwrap();
    // Short: stop above entry, take-profit below.
    state.ledger.attach_stop(&position.id, 110.0).unwrap();
    state.ledger.attach_take_profit(&position.id, 90.0).unwrap();

    tick(&state, &triggers, "ETH", 105.0, 2);
    assert!(state.ledger.position(&position.id).unwrap().is_open());

    tick(&state, &triggers, "ETH", 111.0, 3);
    let closed = state.ledger.position(&position.id).unwrap();
    assert_eq!(closed.close_reason, Some(CloseReason::StopLoss));
}

#[test]
fn test_liquidation_takes_precedence_over_stop() {
    let (state, triggers) = engine();
    let acct = account(&state);
    state.feed.board().update("BTC", 100.0, 1);

    // Entry 100 at 10x: liquidation at 90.5. Stop 95, take-profit 110.
    let (position, _) = state
        .ledger
        .open(&acct, "BTC", PositionSide::Long, 1000.0, 10.0)
        .unwrap();
    state.ledger.attach_stop(&position.id, 95.0).unwrap();
    state.ledger.attach_take_profit(&position.id, 110.0).unwrap();

    // A gap straight through stop AND liquidation closes once: liquidated.
    tick(&state, &triggers, "BTC", 85.0, 2);

    let closed = state.ledger.position(&position.id).unwrap();
    assert_eq!(closed.status, PositionStatus::Liquidated);
    assert_eq!(closed.close_reason, Some(CloseReason::Liquidated));

    // Exactly one close fill exists for the position.
    let closes: Vec<_> = state
        .ledger
        .history(&acct, 50)
        .into_iter()
        .filter(|f| {
            f.position_id == position.id
                && f.action == purpleflea::types::FillAction::Close
        })
        .collect();
    assert_eq!(closes.len(), 1);
    assert_eq!(closes[0].close_reason, Some(CloseReason::Liquidated));
}

#[test]
fn test_take_profit_does_not_preempt_stop() {
    let (state, triggers) = engine();
    let acct = account(&state);
    state.feed.board().update("ETH", 100.0, 1);

    // Short with both triggers set: an upward gap to 120 crosses the stop,
    // and the pending take-profit at a better price cannot prevent the
    // risk-reducing close.
    let (position, _) = state
        .ledger
        .open(&acct, "ETH", PositionSide::Short, 1000.0, 2.0)
        .unwrap();
    state.ledger.attach_stop(&position.id, 103.0).unwrap();
    state.ledger.attach_take_profit(&position.id, 97.0).unwrap();

    tick(&state, &triggers, "ETH", 120.0, 2);
    let closed = state.ledger.position(&position.id).unwrap();
    assert_eq!(closed.close_reason, Some(CloseReason::StopLoss));

    // The take-profit order was cancelled with the close, not filled.
    let cancelled: Vec<_> = state
        .ledger
        .orders(&acct, Some(purpleflea::types::OrderStatus::Cancelled), 50)
        .into_iter()
        .filter(|o| o.kind == purpleflea::types::OrderKind::TakeProfit)
        .collect();
    assert_eq!(cancelled.len(), 1);
}

#[test]
fn test_stale_ticks_are_dropped() {
    let (state, triggers) = engine();
    let acct = account(&state);
    state.feed.board().update("BTC", 100.0, 10);

    let (position, _) = state
        .ledger
        .open(&acct, "BTC", PositionSide::Long, 1000.0, 5.0)
        .unwrap();
    state.ledger.attach_stop(&position.id, 90.0).unwrap();

    // Advance the market to t=20 at a safe price.
    tick(&state, &triggers, "BTC", 99.0, 20);

    // A crossing tick from the past must be dropped.
    triggers.process_tick(&PriceTick::new("BTC", 80.0, 15));
    assert!(state.ledger.position(&position.id).unwrap().is_open());

    // The same price with a fresh timestamp fires.
    tick(&state, &triggers, "BTC", 80.0, 25);
    assert!(!state.ledger.position(&position.id).unwrap().is_open());
}

#[test]
fn test_duplicate_tick_is_idempotent() {
    let (state, triggers) = engine();
    let acct = account(&state);
    state.feed.board().update("BTC", 100.0, 1);

    let (position, _) = state
        .ledger
        .open(&acct, "BTC", PositionSide::Long, 1000.0, 5.0)
        .unwrap();
    state.ledger.attach_stop(&position.id, 90.0).unwrap();

    tick(&state, &triggers, "BTC", 89.0, 2);
    // Redelivery of the same tick re-evaluates a terminal position: no-op.
    tick(&state, &triggers, "BTC", 89.0, 2);

    let closes: Vec<_> = state
        .ledger
        .history(&acct, 50)
        .into_iter()
        .filter(|f| f.action == purpleflea::types::FillAction::Close)
        .collect();
    assert_eq!(closes.len(), 1);
}

#[test]
fn test_trigger_close_propagates_to_mirrors() {
    let (state, triggers) = engine();
    let leader = account(&state);
    let follower = account(&state);
    state.feed.board().update("BTC", 100.0, 1);

    state
        .copy
        .follow(&follower, &leader, 1000.0, None, None)
        .unwrap();

    let (position, event) = state
        .ledger
        .open(&leader, "BTC", PositionSide::Long, 1000.0, 5.0)
        .unwrap();
    let outcomes = state.copy.on_leader_open(&position, &event);
    assert_eq!(outcomes.len(), 1);

    state.ledger.attach_stop(&position.id, 90.0).unwrap();
    tick(&state, &triggers, "BTC", 89.0, 2);

    // Leader stopped out; the mirror closed with it.
    let mirrors = state.ledger.positions(&follower, true);
    assert_eq!(mirrors.len(), 1);
    assert_eq!(mirrors[0].status, PositionStatus::Closed);
    assert_eq!(mirrors[0].close_reason, Some(CloseReason::CopyClose));
}

#[test]
fn test_leader_liquidation_sweeps_mirrors() {
    let (state, triggers) = engine();
    let leader = account(&state);
    let follower = account(&state);
    state.feed.board().update("BTC", 100.0, 1);

    state
        .copy
        .follow(&follower, &leader, 10_000.0, None, None)
        .unwrap();

    let (position, event) = state
        .ledger
        .open(&leader, "BTC", PositionSide::Long, 1000.0, 10.0)
        .unwrap();
    state.copy.on_leader_open(&position, &event);

    tick(&state, &triggers, "BTC", 85.0, 2);

    let leader_position = state.ledger.position(&position.id).unwrap();
    assert_eq!(leader_position.status, PositionStatus::Liquidated);

    // The mirror went terminal on the same tick (its own liquidation check
    // or the copy-close cascade, whichever ran first) and closed once.
    let mirror = state
        .ledger
        .positions(&follower, true)
        .into_iter()
        .next()
        .unwrap();
    assert_ne!(mirror.status, PositionStatus::Open);

    let mirror_closes: Vec<_> = state
        .ledger
        .history(&follower, 50)
        .into_iter()
        .filter(|f| {
            f.position_id == mirror.id
                && f.action == purpleflea::types::FillAction::Close
        })
        .collect();
    assert_eq!(mirror_closes.len(), 1);
}
