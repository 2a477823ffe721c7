/// End-to-end strategy sessions against the simulated feed and paper
/// backend.
///
/// Verifies that:
/// 1. A persistent crossable spread is traded and unwound cleanly at stop
/// 2. Stale market data never produces a trade, however wide the spread
/// 3. A venue outage enters recovery and trading resumes once it is back
/// 4. A rejected leg is unwound and reconciled without residual exposure
/// 5. An outage that never clears exhausts recovery and ends the session
/// 6. A forced rebalance at zero deviation places no order
use delta_arb::config::StrategyConfig;
use delta_arb::strategy::controller::{StrategyController, StrategyHandle};
use delta_arb::strategy::delta_tracker::DeltaTracker;
use delta_arb::strategy::execution::{ExecutionBackend, ExecutionCoordinator, UnwindPolicy};
use delta_arb::strategy::paper_backend::{PaperBackend, SimFeed};
use delta_arb::strategy::types::{now_ms, Fill, OrderSide, SessionReport, StrategyState};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;

const SYMBOL: &str = "BTCUSDT";

fn test_config() -> StrategyConfig {
    let mut cfg = StrategyConfig::default_paper();
    cfg.monitor_interval_ms = 10;
    cfg.leg_fill_timeout_ms = 60;
    cfg.single_leg_timeout_ms = 200;
    cfg.order_poll_interval_ms = 2;
    cfg.init_timeout_secs = 2;
    cfg.hedge_timeout_secs = 2;
    cfg.max_recovery_attempts = 6;
    cfg.recovery_base_delay_ms = 20;
    cfg.recovery_max_delay_ms = 100;
    cfg
}

/// Quiet books: no crossable spread anywhere.
fn seed_flat_books(feed: &SimFeed) {
    feed.set_book("alpha", SYMBOL, 100.0, 100.05, 5.0);
    feed.set_book("beta", SYMBOL, 100.0, 100.05, 5.0);
    feed.set_book("hedge", SYMBOL, 100.0, 100.05, 10.0);
}

/// Beta runs ~0.95% rich against alpha, comfortably above the 0.5% entry
/// threshold.
fn open_spread(feed: &SimFeed) {
    feed.set_book("beta", SYMBOL, 101.0, 101.05, 5.0);
}

fn launch(
    cfg: StrategyConfig,
) -> (
    Arc<SimFeed>,
    Arc<PaperBackend>,
    StrategyHandle,
    JoinHandle<SessionReport>,
) {
    let feed = Arc::new(SimFeed::new());
    seed_flat_books(&feed);
    let backend = Arc::new(PaperBackend::new(Arc::clone(&feed)));
    let backend_dyn: Arc<dyn ExecutionBackend> = backend.clone();
    let feed_dyn: Arc<dyn delta_arb::strategy::market_data::MarketDataFeed> = feed.clone();
    let (controller, handle) = StrategyController::new(cfg, feed_dyn, backend_dyn);
    let task = tokio::spawn(controller.run());
    (feed, backend, handle, task)
}

async fn wait_for_state(handle: &StrategyHandle, state: StrategyState, budget: Duration) {
    let deadline = tokio::time::Instant::now() + budget;
    loop {
        if handle.status().state == state {
            return;
        }
        assert!(
            tokio::time::Instant::now() < deadline,
            "never reached {:?}, stuck in {:?}",
            state,
            handle.status().state
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

async fn stop_and_report(handle: &StrategyHandle, task: JoinHandle<SessionReport>) -> SessionReport {
    handle.request_shutdown();
    timeout(Duration::from_secs(5), task)
        .await
        .expect("controller did not stop")
        .expect("controller task panicked")
}

#[tokio::test]
async fn persistent_spread_is_traded_and_session_ends_flat() {
    let (feed, _backend, handle, task) = launch(test_config());
    wait_for_state(&handle, StrategyState::MonitoringSpreads, Duration::from_secs(2)).await;

    open_spread(&feed);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let report = stop_and_report(&handle, task).await;
    assert!(
        report.stats.trades_executed >= 1,
        "expected at least one trade, report: {:?}",
        report.stats
    );
    assert_eq!(report.cause, "external stop request");
    assert!(report.final_net_delta.abs() < 1e-6);
    for position in &report.final_positions {
        assert!(position.is_flat(), "residual position on {}", position.venue);
    }
}

#[tokio::test]
async fn spread_below_threshold_is_never_traded() {
    let (feed, _backend, handle, task) = launch(test_config());
    wait_for_state(&handle, StrategyState::MonitoringSpreads, Duration::from_secs(2)).await;

    // ~0.3% crossable spread against the 0.5% entry threshold.
    feed.set_book("beta", SYMBOL, 100.35, 100.40, 5.0);
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(handle.status().state, StrategyState::MonitoringSpreads);
    let report = stop_and_report(&handle, task).await;
    assert_eq!(report.stats.trades_executed, 0);
    assert!(report.final_net_delta.abs() < 1e-6);
}

#[tokio::test]
async fn stale_quotes_block_trading_despite_wide_spread() {
    let (feed, _backend, handle, task) = launch(test_config());
    wait_for_state(&handle, StrategyState::MonitoringSpreads, Duration::from_secs(2)).await;

    // A huge spread, but beta's book is 10s old.
    feed.set_book_at("beta", SYMBOL, 103.0, 103.05, 5.0, now_ms() - 10_000, true);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let report = stop_and_report(&handle, task).await;
    assert_eq!(report.stats.trades_executed, 0);
    assert!(report.final_net_delta.abs() < 1e-6);
}

#[tokio::test]
async fn venue_outage_recovers_and_trading_resumes() {
    let (feed, _backend, handle, task) = launch(test_config());
    wait_for_state(&handle, StrategyState::MonitoringSpreads, Duration::from_secs(2)).await;

    feed.set_venue_down("beta", true);
    wait_for_state(&handle, StrategyState::ErrorRecovery, Duration::from_secs(2)).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    feed.set_venue_down("beta", false);
    seed_flat_books(&feed);
    wait_for_state(&handle, StrategyState::MonitoringSpreads, Duration::from_secs(3)).await;

    // Back in business: the spread opens and trades flow again.
    open_spread(&feed);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let report = stop_and_report(&handle, task).await;
    assert_eq!(report.stats.recovery_episodes, 1);
    assert!(report.stats.trades_executed >= 1);
    assert!(!report.attempt_history.is_empty());
    assert!(report.final_net_delta.abs() < 1e-6);
}

#[tokio::test]
async fn rejected_leg_is_unwound_and_reconciled() {
    let (feed, backend, handle, task) = launch(test_config());
    wait_for_state(&handle, StrategyState::MonitoringSpreads, Duration::from_secs(2)).await;

    backend.set_rejecting("beta", true);
    open_spread(&feed);
    wait_for_state(&handle, StrategyState::ErrorRecovery, Duration::from_secs(2)).await;

    // Close the spread so trading does not immediately re-fault after
    // reconciliation.
    seed_flat_books(&feed);
    wait_for_state(&handle, StrategyState::MonitoringSpreads, Duration::from_secs(3)).await;

    let report = stop_and_report(&handle, task).await;
    assert!(report.stats.unwinds >= 1);
    assert!(report.stats.recovery_episodes >= 1);
    assert_eq!(report.stats.trades_executed, 0);
    assert!(report.final_net_delta.abs() < 1e-6);
    for position in &report.final_positions {
        assert!(position.is_flat(), "residual position on {}", position.venue);
    }
}

#[tokio::test]
async fn unending_outage_exhausts_recovery_and_reports() {
    let mut cfg = test_config();
    cfg.max_recovery_attempts = 2;
    cfg.recovery_base_delay_ms = 10;
    cfg.recovery_max_delay_ms = 30;
    let (feed, _backend, handle, task) = launch(cfg);
    wait_for_state(&handle, StrategyState::MonitoringSpreads, Duration::from_secs(2)).await;

    feed.set_venue_down("beta", true);
    let report = timeout(Duration::from_secs(5), task)
        .await
        .expect("controller did not exhaust recovery")
        .expect("controller task panicked");

    assert!(
        report.cause.contains("unrecoverable"),
        "cause was: {}",
        report.cause
    );
    assert!(report.attempt_history.len() >= 2);
    // Shutdown still flattened the hedge; only the feed was down.
    assert!(report.final_net_delta.abs() < 1e-6);
}

#[tokio::test]
async fn forced_rebalance_at_zero_deviation_places_nothing() {
    let (_feed, _backend, handle, task) = launch(test_config());
    wait_for_state(&handle, StrategyState::MonitoringSpreads, Duration::from_secs(2)).await;

    handle.request_rebalance();
    tokio::time::sleep(Duration::from_millis(100)).await;
    wait_for_state(&handle, StrategyState::MonitoringSpreads, Duration::from_secs(2)).await;

    let report = stop_and_report(&handle, task).await;
    // The pass ran but, at zero deviation, placed no corrective order.
    assert_eq!(report.stats.rebalances, 0);
    assert!(report.final_net_delta.abs() < 1e-6);
}

#[tokio::test]
async fn drifted_delta_is_corrected_by_one_hedge_order() {
    // Component-level: a 6% drift against a 5% threshold produces exactly
    // the corrective order, and executing it restores neutrality.
    let feed = Arc::new(SimFeed::new());
    seed_flat_books(&feed);
    let backend = Arc::new(PaperBackend::new(Arc::clone(&feed)));
    let backend_dyn: Arc<dyn ExecutionBackend> = backend.clone();
    let coord = ExecutionCoordinator::new(
        backend_dyn,
        Duration::from_millis(60),
        Duration::from_millis(200),
        Duration::from_millis(2),
        UnwindPolicy::CancelFirst,
    );
    let mut tracker = DeltaTracker::new(SYMBOL, "hedge", 1.0, 5.0, Duration::from_secs(300));

    tracker.apply_fill(&Fill {
        order_id: "drift".to_string(),
        venue: "alpha".to_string(),
        symbol: SYMBOL.to_string(),
        side: OrderSide::Buy,
        quantity: 0.06,
        price: 100.05,
        timestamp_ms: now_ms(),
    });
    let state = tracker.state();
    assert!(state.deviation_pct > 5.9 && state.deviation_pct < 6.1);
    assert!(tracker.needs_rebalance(&state));

    let order = tracker.rebalance_order(&state).expect("drift needs an order");
    assert_eq!(order.venue, "hedge");
    assert_eq!(order.side, OrderSide::Sell);
    assert!((order.quantity - 0.06).abs() < 1e-9);

    let fill = coord.execute_single(order).await.unwrap();
    let after = tracker.apply_fill(&fill);
    assert!(after.net_delta.abs() < 1e-9);
    assert!(tracker.rebalance_order(&after).is_none());
}
