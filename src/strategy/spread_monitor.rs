use crate::strategy::market_data::MarketSnapshot;
use crate::strategy::types::{SpreadDirection, SpreadObservation};
use std::collections::VecDeque;

/// Number of recent observations used for the stability estimate.
const STABILITY_WINDOW: usize = 20;

/// Spread standard deviation (in percentage points) at which stability
/// reaches zero. A quarter point of sigma on a sub-percent spread signal is
/// pure noise.
const STABILITY_SCALE: f64 = 0.25;

/// Derive a crossable-spread observation from two venue snapshots, or `None`
/// when either snapshot is stale, dead, or carries invalid prices.
///
/// The entry direction uses ask-vs-bid: we buy at the cheaper venue's ask
/// and sell at the richer venue's bid, so the spread reflects what is
/// actually crossable, not a mid-price fiction.
pub fn observe_pair(
    a: &MarketSnapshot,
    b: &MarketSnapshot,
    now_ms: u64,
    freshness_bound_ms: u64,
) -> Option<SpreadObservation> {
    if !a.is_fresh(now_ms, freshness_bound_ms) || !b.is_fresh(now_ms, freshness_bound_ms) {
        return None;
    }
    if !a.has_valid_prices() || !b.has_valid_prices() {
        return None;
    }

    // Pick the direction with the wider crossable edge.
    let edge_ab = b.bid - a.ask; // buy A, sell B
    let edge_ba = a.bid - b.ask; // buy B, sell A
    let direction = if edge_ab >= edge_ba {
        SpreadDirection::BuyASellB
    } else {
        SpreadDirection::BuyBSellA
    };

    let (venue_a_price, venue_b_price, liquidity_a, liquidity_b) = match direction {
        SpreadDirection::BuyASellB => (a.ask, b.bid, a.ask_qty, b.bid_qty),
        SpreadDirection::BuyBSellA => (a.bid, b.ask, a.bid_qty, b.ask_qty),
    };

    let buy = match direction {
        SpreadDirection::BuyASellB => a.ask,
        SpreadDirection::BuyBSellA => b.ask,
    };
    let sell = match direction {
        SpreadDirection::BuyASellB => b.bid,
        SpreadDirection::BuyBSellA => a.bid,
    };
    let spread_pct = (sell - buy) / buy.min(sell) * 100.0;

    Some(SpreadObservation {
        timestamp_ms: now_ms,
        venue_a_price,
        venue_b_price,
        spread_pct,
        liquidity_a,
        liquidity_b,
        direction,
    })
}

/// Rolling spread history for one venue pair. Pure function of its inputs
/// plus buffer state; the bounded buffer is its only side effect.
pub struct SpreadMonitor {
    window: VecDeque<SpreadObservation>,
    capacity: usize,
    freshness_bound_ms: u64,
}

impl SpreadMonitor {
    pub fn new(capacity: usize, freshness_bound_ms: u64) -> Self {
        Self {
            window: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
            freshness_bound_ms,
        }
    }

    /// Derive an observation from the two snapshots and append it to the
    /// rolling buffer, evicting the oldest entry at capacity. Returns `None`
    /// (recording nothing) when either snapshot fails the freshness bound.
    pub fn observe(
        &mut self,
        a: &MarketSnapshot,
        b: &MarketSnapshot,
        now_ms: u64,
    ) -> Option<SpreadObservation> {
        let obs = observe_pair(a, b, now_ms, self.freshness_bound_ms)?;
        if self.window.len() == self.capacity {
            self.window.pop_front();
        }
        self.window.push_back(obs);
        Some(obs)
    }

    /// Percentile rank of `value` against the buffered spreads, in [0, 100].
    pub fn current_percentile(&self, value: f64) -> f64 {
        if self.window.is_empty() {
            return 0.0;
        }
        let below = self
            .window
            .iter()
            .filter(|o| o.spread_pct <= value)
            .count();
        below as f64 / self.window.len() as f64 * 100.0
    }

    /// Spread stability over the recent window, in [0, 1]. 1.0 means the
    /// spread has been flat; 0.0 means its dispersion reached
    /// `STABILITY_SCALE` percentage points or the window is too short to
    /// judge.
    pub fn stability(&self) -> f64 {
        let recent: Vec<f64> = self
            .window
            .iter()
            .rev()
            .take(STABILITY_WINDOW)
            .map(|o| o.spread_pct)
            .collect();
        if recent.len() < 2 {
            return 0.0;
        }
        let mean = recent.iter().sum::<f64>() / recent.len() as f64;
        let var =
            recent.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / recent.len() as f64;
        let stddev = var.sqrt();
        (1.0 - stddev / STABILITY_SCALE).clamp(0.0, 1.0)
    }

    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }

    pub fn latest(&self) -> Option<&SpreadObservation> {
        self.window.back()
    }

    pub fn freshness_bound_ms(&self) -> u64 {
        self.freshness_bound_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(bid: f64, ask: f64, ts: u64) -> MarketSnapshot {
        MarketSnapshot {
            bid,
            ask,
            bid_qty: 10.0,
            ask_qty: 10.0,
            timestamp_ms: ts,
            is_live: true,
        }
    }

    #[test]
    fn observe_picks_crossable_direction() {
        // Venue A cheaper: buy A ask 100.1, sell B bid 101.0.
        let a = snap(100.0, 100.1, 1_000);
        let b = snap(101.0, 101.1, 1_000);
        let obs = observe_pair(&a, &b, 1_000, 2_000).expect("fresh snapshots");
        assert_eq!(obs.direction, SpreadDirection::BuyASellB);
        assert_eq!(obs.buy_price(), 100.1);
        assert_eq!(obs.sell_price(), 101.0);
        assert!(obs.spread_pct > 0.8 && obs.spread_pct < 1.0);
    }

    #[test]
    fn observe_flips_direction_when_b_is_cheaper() {
        let a = snap(101.0, 101.1, 1_000);
        let b = snap(100.0, 100.1, 1_000);
        let obs = observe_pair(&a, &b, 1_000, 2_000).expect("fresh snapshots");
        assert_eq!(obs.direction, SpreadDirection::BuyBSellA);
        assert_eq!(obs.buy_price(), 100.1);
        assert_eq!(obs.sell_price(), 101.0);
    }

    #[test]
    fn stale_snapshot_yields_no_observation() {
        let a = snap(100.0, 100.1, 1_000);
        let b = snap(101.0, 101.1, 4_000);
        // Venue A snapshot is 3s old against a 2s bound.
        assert!(observe_pair(&a, &b, 4_000, 2_000).is_none());
    }

    #[test]
    fn buffer_evicts_oldest_at_capacity() {
        let mut monitor = SpreadMonitor::new(3, 2_000);
        for i in 0..5u64 {
            let a = snap(100.0, 100.1, i * 10);
            let b = snap(101.0, 101.1, i * 10);
            monitor.observe(&a, &b, i * 10);
        }
        assert_eq!(monitor.len(), 3);
        assert_eq!(monitor.latest().map(|o| o.timestamp_ms), Some(40));
    }

    #[test]
    fn percentile_ranks_within_bounds() {
        let mut monitor = SpreadMonitor::new(16, 2_000);
        for i in 1..=10u64 {
            let a = snap(100.0, 100.0 + i as f64 * 0.01, i);
            let b = snap(101.0, 101.1, i);
            monitor.observe(&a, &b, i);
        }
        let p = monitor.current_percentile(0.5);
        assert!((0.0..=100.0).contains(&p));
        assert_eq!(monitor.current_percentile(f64::MAX), 100.0);
    }

    #[test]
    fn flat_spread_is_maximally_stable() {
        let mut monitor = SpreadMonitor::new(32, 2_000);
        for i in 0..20u64 {
            let a = snap(100.0, 100.1, i);
            let b = snap(101.0, 101.1, i);
            monitor.observe(&a, &b, i);
        }
        assert!(monitor.stability() > 0.99);
    }

    #[test]
    fn short_window_has_zero_stability() {
        let monitor = SpreadMonitor::new(8, 2_000);
        assert_eq!(monitor.stability(), 0.0);
    }
}
