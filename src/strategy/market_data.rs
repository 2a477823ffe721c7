use crate::strategy::error::StrategyError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Latest top-of-book for one (venue, symbol). Timestamps reported by a feed
/// must be monotonically non-decreasing per venue.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub bid: f64,
    pub ask: f64,
    pub bid_qty: f64,
    pub ask_qty: f64,
    pub timestamp_ms: u64,
    pub is_live: bool,
}

impl MarketSnapshot {
    pub fn mid(&self) -> f64 {
        (self.bid + self.ask) / 2.0
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp_ms)
    }

    /// Fresh means live and no older than the freshness bound. Stale data
    /// must never feed a trading decision.
    pub fn is_fresh(&self, now_ms: u64, bound_ms: u64) -> bool {
        self.is_live && self.age_ms(now_ms) <= bound_ms
    }

    pub fn has_valid_prices(&self) -> bool {
        self.bid > 0.0 && self.ask > 0.0 && self.ask >= self.bid
    }
}

/// Market-data collaborator boundary. Ingestion and parsing live behind this
/// trait; the core only reads the latest snapshot per venue.
#[async_trait::async_trait]
pub trait MarketDataFeed: Send + Sync {
    async fn latest_snapshot(
        &self,
        venue: &str,
        symbol: &str,
    ) -> Result<MarketSnapshot, StrategyError>;
}

/// Fetch snapshots for both monitored venues concurrently, bounded by
/// `fetch_timeout`. A breached timeout surfaces as a connectivity error,
/// never an indefinite hang.
pub async fn fetch_pair(
    feed: &Arc<dyn MarketDataFeed>,
    venue_a: &str,
    venue_b: &str,
    symbol: &str,
    fetch_timeout: Duration,
) -> Result<(MarketSnapshot, MarketSnapshot), StrategyError> {
    let both = timeout(fetch_timeout, async {
        tokio::join!(
            feed.latest_snapshot(venue_a, symbol),
            feed.latest_snapshot(venue_b, symbol)
        )
    })
    .await
    .map_err(|_| {
        StrategyError::Connectivity(format!(
            "snapshot fetch for {}/{} exceeded {}ms",
            venue_a,
            venue_b,
            fetch_timeout.as_millis()
        ))
    })?;

    let (a, b) = both;
    Ok((a?, b?))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(ts: u64, live: bool) -> MarketSnapshot {
        MarketSnapshot {
            bid: 100.0,
            ask: 100.1,
            bid_qty: 5.0,
            ask_qty: 5.0,
            timestamp_ms: ts,
            is_live: live,
        }
    }

    #[test]
    fn freshness_respects_bound() {
        let s = snap(10_000, true);
        assert!(s.is_fresh(11_000, 2_000));
        assert!(s.is_fresh(12_000, 2_000));
        assert!(!s.is_fresh(12_001, 2_000));
    }

    #[test]
    fn dead_feed_is_never_fresh() {
        let s = snap(10_000, false);
        assert!(!s.is_fresh(10_000, 2_000));
    }

    #[test]
    fn crossed_book_is_invalid() {
        let mut s = snap(0, true);
        s.bid = 101.0;
        s.ask = 100.0;
        assert!(!s.has_valid_prices());
    }
}
