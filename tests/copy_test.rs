//! Integration tests for the copy-mirror engine: proportional scaling,
//! clamping, skips, leverage caps, subscription snapshots, and unfollow.

use purpleflea::config::Config;
use purpleflea::types::{MirrorOutcome, PositionSide, PositionStatus};
use purpleflea::AppState;

fn engine() -> AppState {
    let (state, _triggers) = purpleflea::build_state(Config::default()).unwrap();
    state
}

fn account(state: &AppState) -> String {
    state.accounts.register(None).unwrap().account_id
}

fn set_price(state: &AppState, ticker: &str, price: f64) {
    let now = chrono::Utc::now().timestamp_millis();
    state.feed.board().update(ticker, price, now);
}

/// Leader opens and the fill fans out, as the trade path does.
fn leader_open(
    state: &AppState,
    leader: &str,
    ticker: &str,
    side: PositionSide,
    size: f64,
    leverage: f64,
) -> (purpleflea::types::Position, Vec<(String, MirrorOutcome)>) {
    let (position, event) = state
        .ledger
        .open(leader, ticker, side, size, leverage)
        .unwrap();
    let outcomes = state.copy.on_leader_open(&position, &event);
    (position, outcomes)
}

// =============================================================================
// Scaling
// =============================================================================

#[test]
fn test_mirror_scales_by_allocation_over_leader_equity() {
    let state = engine();
    let leader = account(&state);
    let follower = account(&state);
    set_price(&state, "BTC", 100.0);

    // Leader equity 10,000; fill 1,000; allocation 500 -> mirror 50.
    state
        .copy
        .follow(&follower, &leader, 500.0, None, None)
        .unwrap();

    let (_, outcomes) = leader_open(&state, &leader, "BTC", PositionSide::Long, 1000.0, 5.0);
    assert_eq!(outcomes.len(), 1);
    match &outcomes[0].1 {
        MirrorOutcome::Mirrored { size_usd, .. } => assert!((size_usd - 50.0).abs() < 1e-9),
        other => panic!("expected mirror, got {:?}", other),
    }

    let mirrors = state.ledger.positions(&follower, false);
    assert_eq!(mirrors.len(), 1);
    assert!((mirrors[0].size_usd - 50.0).abs() < 1e-9);
    assert_eq!(mirrors[0].side, PositionSide::Long);
    assert_eq!(mirrors[0].leader_id.as_deref(), Some(leader.as_str()));
}

#[test]
fn test_mirror_clamps_to_max_position_size() {
    let state = engine();
    let leader = account(&state);
    let follower = account(&state);
    set_price(&state, "BTC", 100.0);

    state
        .copy
        .follow(&follower, &leader, 500.0, Some(20.0), None)
        .unwrap();

    let (_, outcomes) = leader_open(&state, &leader, "BTC", PositionSide::Long, 1000.0, 5.0);
    match &outcomes[0].1 {
        MirrorOutcome::Mirrored { size_usd, .. } => assert!((size_usd - 20.0).abs() < 1e-9),
        other => panic!("expected clamped mirror, got {:?}", other),
    }
}

#[test]
fn test_mirror_below_minimum_is_skipped_not_failed() {
    let state = engine();
    let leader = account(&state);
    let follower = account(&state);
    set_price(&state, "BTC", 100.0);

    // Scaled size 500 * (100 / 10000) = 5, under the $10 minimum.
    state
        .copy
        .follow(&follower, &leader, 500.0, None, None)
        .unwrap();

    let (_, outcomes) = leader_open(&state, &leader, "BTC", PositionSide::Long, 100.0, 5.0);
    assert!(matches!(outcomes[0].1, MirrorOutcome::Skipped { .. }));
    assert!(state.ledger.positions(&follower, false).is_empty());
}

#[test]
fn test_mirror_leverage_clamped_to_follower_cap() {
    let state = engine();
    let leader = account(&state);
    let follower = account(&state);
    set_price(&state, "BTC", 100.0);

    // Push the leader to pro tier (>= $100k cumulative volume) so it can
    // run 15x; the free-tier follower caps at 10x and clamps, not fails.
    let (warmup, _) = state
        .ledger
        .open(&leader, "BTC", PositionSide::Long, 50_000.0, 10.0)
        .unwrap();
    state.ledger.close(&warmup.id).unwrap();
    assert_eq!(
        state.accounts.get(&leader).unwrap().tier(),
        purpleflea::types::FeeTier::Pro
    );

    state
        .copy
        .follow(&follower, &leader, 5_000.0, None, None)
        .unwrap();

    let (_, outcomes) = leader_open(&state, &leader, "BTC", PositionSide::Long, 1000.0, 15.0);
    assert!(matches!(outcomes[0].1, MirrorOutcome::Mirrored { .. }));

    let mirror = &state.ledger.positions(&follower, false)[0];
    assert_eq!(mirror.leverage, 10.0);
}

#[test]
fn test_subscription_stop_loss_pct_attaches_stop() {
    let state = engine();
    let leader = account(&state);
    let follower = account(&state);
    set_price(&state, "BTC", 100.0);

    state
        .copy
        .follow(&follower, &leader, 5_000.0, None, Some(5.0))
        .unwrap();

    leader_open(&state, &leader, "BTC", PositionSide::Long, 1000.0, 5.0);

    let mirror = &state.ledger.positions(&follower, false)[0];
    // Stop at entry * (1 - 5/100) = 95.
    assert!((mirror.stop_price.unwrap() - 95.0).abs() < 1e-9);
}

#[test]
fn test_short_mirror_stop_sits_above_entry() {
    let state = engine();
    let leader = account(&state);
    let follower = account(&state);
    set_price(&state, "ETH", 100.0);

    state
        .copy
        .follow(&follower, &leader, 5_000.0, None, Some(4.0))
        .unwrap();

    leader_open(&state, &leader, "ETH", PositionSide::Short, 1000.0, 5.0);

    let mirror = &state.ledger.positions(&follower, false)[0];
    assert_eq!(mirror.side, PositionSide::Short);
    assert!((mirror.stop_price.unwrap() - 104.0).abs() < 1e-9);
}

// =============================================================================
// Subscription lifecycle
// =============================================================================

#[test]
fn test_follow_rejects_self_and_unknown_leader() {
    let state = engine();
    let acct = account(&state);

    assert!(state.copy.follow(&acct, &acct, 100.0, None, None).is_err());
    assert!(state
        .copy
        .follow(&acct, "acct_ghost", 100.0, None, None)
        .is_err());
}

#[test]
fn test_refollow_updates_instead_of_duplicating() {
    let state = engine();
    let leader = account(&state);
    let follower = account(&state);

    state
        .copy
        .follow(&follower, &leader, 500.0, None, None)
        .unwrap();
    state
        .copy
        .follow(&follower, &leader, 750.0, Some(100.0), None)
        .unwrap();

    let following = state.copy.following(&follower);
    assert_eq!(following.len(), 1);
    assert_eq!(following[0].allocation_usd, 750.0);
    assert_eq!(following[0].max_position_size, Some(100.0));
}

#[test]
fn test_subscription_after_fill_does_not_mirror_it() {
    let state = engine();
    let leader = account(&state);
    let follower = account(&state);
    set_price(&state, "BTC", 100.0);

    let (position, event) = state
        .ledger
        .open(&leader, "BTC", PositionSide::Long, 1000.0, 5.0)
        .unwrap();

    // Subscription activates strictly after the fill's timestamp.
    std::thread::sleep(std::time::Duration::from_millis(5));
    state
        .copy
        .follow(&follower, &leader, 500.0, None, None)
        .unwrap();

    let outcomes = state.copy.on_leader_open(&position, &event);
    assert!(outcomes.is_empty());
    assert!(state.ledger.positions(&follower, false).is_empty());
}

#[test]
fn test_leader_close_closes_mirrors() {
    let state = engine();
    let leader = account(&state);
    let follower = account(&state);
    set_price(&state, "BTC", 100.0);

    state
        .copy
        .follow(&follower, &leader, 5_000.0, None, None)
        .unwrap();
    let (position, _) = leader_open(&state, &leader, "BTC", PositionSide::Long, 1000.0, 5.0);

    set_price(&state, "BTC", 105.0);
    let (closed, _) = state.ledger.close(&position.id).unwrap();
    state.copy.on_leader_close(&closed);

    let mirror = &state.ledger.positions(&follower, true)[0];
    assert_eq!(mirror.status, PositionStatus::Closed);
    assert_eq!(
        mirror.close_reason,
        Some(purpleflea::types::CloseReason::CopyClose)
    );
}

// =============================================================================
// Unfollow
// =============================================================================

#[test]
fn test_unfollow_closes_every_mirror() {
    let state = engine();
    let leader = account(&state);
    let follower = account(&state);
    set_price(&state, "BTC", 100.0);
    set_price(&state, "ETH", 50.0);
    set_price(&state, "SOL", 20.0);

    state
        .copy
        .follow(&follower, &leader, 5_000.0, None, None)
        .unwrap();

    leader_open(&state, &leader, "BTC", PositionSide::Long, 1000.0, 5.0);
    leader_open(&state, &leader, "ETH", PositionSide::Short, 800.0, 4.0);
    leader_open(&state, &leader, "SOL", PositionSide::Long, 600.0, 3.0);
    assert_eq!(state.ledger.positions(&follower, false).len(), 3);

    let report = state.copy.unfollow(&follower, &leader).unwrap();
    assert!(report.deactivated);
    assert_eq!(report.closes.len(), 3);
    assert!(report.closes.iter().all(|c| c.closed));

    assert!(state.ledger.positions(&follower, false).is_empty());
    let following = state.copy.following(&follower);
    assert!(!following[0].active);
}

#[test]
fn test_unfollow_failure_is_isolated_and_reported() {
    let state = engine();
    let leader = account(&state);
    let follower = account(&state);
    set_price(&state, "BTC", 100.0);
    set_price(&state, "ETH", 50.0);
    set_price(&state, "SOL", 20.0);

    state
        .copy
        .follow(&follower, &leader, 5_000.0, None, None)
        .unwrap();

    leader_open(&state, &leader, "BTC", PositionSide::Long, 1000.0, 5.0);
    leader_open(&state, &leader, "ETH", PositionSide::Short, 800.0, 4.0);
    leader_open(&state, &leader, "SOL", PositionSide::Long, 600.0, 3.0);

    // Losing ETH price data makes that one close fail; the others still
    // complete and the failure is reported on its own row.
    state.feed.board().remove("ETH");

    let report = state.copy.unfollow(&follower, &leader).unwrap();
    assert_eq!(report.closes.len(), 3);

    let failures: Vec<_> = report.closes.iter().filter(|c| !c.closed).collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].error.is_some());

    let still_open = state.ledger.positions(&follower, false);
    assert_eq!(still_open.len(), 1);
    assert_eq!(still_open[0].ticker, "ETH");
}

#[test]
fn test_no_mirror_of_mirror_cascades() {
    let state = engine();
    let leader = account(&state);
    let middle = account(&state);
    let tail = account(&state);
    set_price(&state, "BTC", 100.0);

    // tail follows middle, middle follows leader.
    state
        .copy
        .follow(&middle, &leader, 5_000.0, None, None)
        .unwrap();
    state
        .copy
        .follow(&tail, &middle, 5_000.0, None, None)
        .unwrap();

    let (position, event) = state
        .ledger
        .open(&leader, "BTC", PositionSide::Long, 1000.0, 5.0)
        .unwrap();
    let outcomes = state.copy.on_leader_open(&position, &event);
    assert_eq!(outcomes.len(), 1);

    // Middle got a mirror; the mirror's own fill must not fan out to tail.
    let middle_mirror = &state.ledger.positions(&middle, false)[0];
    assert!(middle_mirror.is_mirror());
    assert!(state.ledger.positions(&tail, false).is_empty());
}

// =============================================================================
// Listings
// =============================================================================

#[test]
fn test_leaderboard_and_followers() {
    let state = engine();
    let leader = account(&state);
    let follower = account(&state);
    set_price(&state, "BTC", 100.0);

    state
        .copy
        .follow(&follower, &leader, 500.0, None, None)
        .unwrap();

    // Give the leader some realized profit.
    let (position, _) = leader_open(&state, &leader, "BTC", PositionSide::Long, 1000.0, 5.0);
    set_price(&state, "BTC", 110.0);
    state.ledger.close(&position.id).unwrap();

    let leaderboard = state.copy.leaderboard(10);
    assert!(!leaderboard.is_empty());
    let row = leaderboard
        .iter()
        .find(|e| e.leader_id == leader)
        .expect("leader on board");
    assert!(row.realized_pnl > 0.0);
    assert_eq!(row.followers, 1);
    assert!(!row.alias.is_empty());

    let followers = state.copy.followers(&leader);
    assert_eq!(followers.len(), 1);
    assert_eq!(followers[0].allocation_usd, 500.0);
}
