#[cfg(test)]
mod property_tests {
    use crate::strategy::delta_tracker::DeltaTracker;
    use crate::strategy::market_data::MarketSnapshot;
    use crate::strategy::recovery::RecoveryManager;
    use crate::strategy::spread_monitor::{observe_pair, SpreadMonitor};
    use crate::strategy::types::*;
    use proptest::prelude::*;
    use std::time::Duration;

    const NOW: u64 = 1_000_000;

    fn snapshot(bid: f64, ask: f64, ts: u64) -> MarketSnapshot {
        MarketSnapshot {
            bid,
            ask,
            bid_qty: 5.0,
            ask_qty: 5.0,
            timestamp_ms: ts,
            is_live: true,
        }
    }

    fn fill(venue: &str, side: OrderSide, quantity: f64, price: f64) -> Fill {
        Fill {
            order_id: "test".to_string(),
            venue: venue.to_string(),
            symbol: "BTCUSDT".to_string(),
            side,
            quantity,
            price,
            timestamp_ms: NOW,
        }
    }

    fn tracker() -> DeltaTracker {
        DeltaTracker::new("BTCUSDT", "hedge", 1.0, 5.0, Duration::from_secs(300))
    }

    // Property 1: Backoff never decreases with the attempt number and never
    // exceeds the cap.
    proptest! {
        #[test]
        fn prop_backoff_monotonic_and_capped(
            base_ms in 1u64..2_000,
            max_ms in 1u64..30_000,
            attempts in 1u32..50
        ) {
            let manager = RecoveryManager::new(
                Duration::from_millis(base_ms),
                Duration::from_millis(max_ms),
                5,
            );
            let mut previous = Duration::ZERO;
            for attempt in 1..=attempts {
                let wait = manager.backoff_wait(attempt);
                prop_assert!(wait >= previous);
                prop_assert!(wait <= Duration::from_millis(max_ms));
                previous = wait;
            }
        }
    }

    // Property 2: Whatever the fill history, applying the corrective order
    // restores net delta to zero, and at zero delta no order is produced.
    proptest! {
        #[test]
        fn prop_rebalance_restores_neutrality(
            legs in prop::collection::vec(
                (prop::bool::ANY, 0.01f64..2.0, 100.0f64..1000.0, 0usize..3),
                0..20
            )
        ) {
            let venues = ["alpha", "beta", "hedge"];
            let mut tracker = tracker();
            for (is_buy, qty, price, venue_idx) in legs {
                let side = if is_buy { OrderSide::Buy } else { OrderSide::Sell };
                tracker.apply_fill(&fill(venues[venue_idx], side, qty, price));
            }

            let state = tracker.state();
            match tracker.rebalance_order(&state) {
                None => prop_assert!(state.net_delta.abs() < QTY_EPSILON),
                Some(order) => {
                    prop_assert_eq!(order.venue.as_str(), "hedge");
                    prop_assert!((order.quantity - state.net_delta.abs()).abs() < 1e-6);
                    let after = tracker.apply_fill(&fill(
                        &order.venue,
                        order.side,
                        order.quantity,
                        500.0,
                    ));
                    prop_assert!(after.net_delta.abs() < 1e-6);
                    // A second pass places nothing.
                    prop_assert!(tracker.rebalance_order(&after).is_none());
                }
            }
        }
    }

    // Property 3: Percentile rank stays in [0, 100] and stability in [0, 1]
    // for any price history.
    proptest! {
        #[test]
        fn prop_monitor_metrics_bounded(
            books in prop::collection::vec(
                (100.0f64..200.0, 0.01f64..1.0, 100.0f64..200.0, 0.01f64..1.0),
                0..50
            ),
            probe in 0.0f64..5.0
        ) {
            let mut monitor = SpreadMonitor::new(30, 2_000);
            for (bid_a, edge_a, bid_b, edge_b) in books {
                let a = snapshot(bid_a, bid_a + edge_a, NOW);
                let b = snapshot(bid_b, bid_b + edge_b, NOW);
                monitor.observe(&a, &b, NOW);
            }
            let pct = monitor.current_percentile(probe);
            prop_assert!((0.0..=100.0).contains(&pct));
            let stability = monitor.stability();
            prop_assert!((0.0..=1.0).contains(&stability));
            prop_assert!(monitor.len() <= 30);
        }
    }

    // Property 4: A snapshot older than the freshness bound never produces
    // an observation, whatever the prices.
    proptest! {
        #[test]
        fn prop_stale_data_never_observed(
            bid_a in 100.0f64..200.0,
            bid_b in 100.0f64..200.0,
            age in 2_001u64..100_000
        ) {
            let a = snapshot(bid_a, bid_a + 0.1, NOW - age);
            let b = snapshot(bid_b, bid_b + 0.1, NOW);
            prop_assert!(observe_pair(&a, &b, NOW, 2_000).is_none());
            prop_assert!(observe_pair(&b, &a, NOW, 2_000).is_none());
        }
    }

    // Property 5: Opening and fully closing a position realizes exactly the
    // price difference on the traded quantity.
    proptest! {
        #[test]
        fn prop_round_trip_pnl(
            qty in 0.01f64..5.0,
            entry in 100.0f64..1000.0,
            exit in 100.0f64..1000.0,
            long in prop::bool::ANY
        ) {
            let (open, close) = if long {
                (OrderSide::Buy, OrderSide::Sell)
            } else {
                (OrderSide::Sell, OrderSide::Buy)
            };
            let mut position = Position::new("alpha", "BTCUSDT");
            let opened = position.apply(open, qty, entry, NOW);
            prop_assert_eq!(opened, 0.0);
            let realized = position.apply(close, qty, exit, NOW + 1);

            let expected = if long { (exit - entry) * qty } else { (entry - exit) * qty };
            prop_assert!((realized - expected).abs() < 1e-6);
            prop_assert!(position.is_flat());
        }
    }

    // Property 6: The stop signal reaches Shutdown from every state, and
    // ErrorRecovery resumes only into MonitoringSpreads.
    #[test]
    fn transition_table_shutdown_and_recovery_exits() {
        use StrategyState::*;
        let all = [
            Initializing,
            EstablishingDeltaNeutral,
            DeltaNeutralActive,
            MonitoringSpreads,
            PreparingArbitrage,
            ExecutingArbitrage,
            RebalancingDelta,
            ErrorRecovery,
            Shutdown,
        ];
        for state in all {
            assert!(state.can_transition(Shutdown), "{:?} must reach Shutdown", state);
        }
        for target in all {
            let allowed = ErrorRecovery.can_transition(target);
            assert_eq!(
                allowed,
                matches!(target, MonitoringSpreads | Shutdown),
                "ErrorRecovery -> {:?}",
                target
            );
        }
        // Execution is only reachable through validation.
        for state in all {
            let allowed = state.can_transition(ExecutingArbitrage);
            assert_eq!(allowed, state == PreparingArbitrage, "{:?} -> ExecutingArbitrage", state);
        }
    }
}
