use crate::strategy::types::{
    now_ms, ExecutionResult, Fill, NetDeltaState, OrderRequest, OrderSide, Position, QTY_EPSILON,
};
use log::{debug, info};
use std::collections::HashMap;
use std::time::{Duration, Instant};

/// Maintains current net exposure across venues and decides when a
/// rebalance is required. Positions are owned exclusively here under a
/// single-writer discipline; every other component sees cloned snapshots.
pub struct DeltaTracker {
    positions: HashMap<String, Position>,
    symbol: String,
    hedge_venue: String,
    base_position_size: f64,
    rebalance_threshold_pct: f64,
    max_rebalance_interval: Duration,
    last_rebalance: Instant,
    last_rebalance_ms: u64,
    session_pnl: f64,
}

impl DeltaTracker {
    pub fn new(
        symbol: &str,
        hedge_venue: &str,
        base_position_size: f64,
        rebalance_threshold_pct: f64,
        max_rebalance_interval: Duration,
    ) -> Self {
        Self {
            positions: HashMap::new(),
            symbol: symbol.to_string(),
            hedge_venue: hedge_venue.to_string(),
            base_position_size,
            rebalance_threshold_pct,
            max_rebalance_interval,
            last_rebalance: Instant::now(),
            last_rebalance_ms: now_ms(),
            session_pnl: 0.0,
        }
    }

    /// Apply a confirmed single-leg fill and return the updated aggregate
    /// state.
    pub fn apply_fill(&mut self, fill: &Fill) -> NetDeltaState {
        let position = self
            .positions
            .entry(fill.venue.clone())
            .or_insert_with(|| Position::new(&fill.venue, &fill.symbol));
        let realized = position.apply(fill.side, fill.quantity, fill.price, fill.timestamp_ms);
        self.session_pnl += realized;
        debug!(
            "[DELTA] fill applied: {} {:?} {:.4} @ {:.4} on {} (realized {:.4})",
            fill.symbol, fill.side, fill.quantity, fill.price, fill.venue, realized
        );
        self.state()
    }

    /// Apply both legs of a completed dual-leg execution as one atomic
    /// update. The tracker is never fed from a half-complete execution.
    pub fn apply_execution(&mut self, result: &ExecutionResult) -> NetDeltaState {
        self.apply_fill(&result.taker_fill);
        self.apply_fill(&result.maker_fill)
    }

    /// Overwrite one venue's quantity with the live value reported by the
    /// venue itself. Used only during reconciliation after a logic or
    /// partial-fill fault; the average entry price is kept, since the venue
    /// does not report our basis.
    pub fn reconcile(&mut self, venue: &str, live_quantity: f64) {
        let position = self
            .positions
            .entry(venue.to_string())
            .or_insert_with(|| Position::new(venue, &self.symbol.clone()));
        if (position.quantity - live_quantity).abs() > QTY_EPSILON {
            info!(
                "[DELTA] reconciled {} on {}: local {:.4} -> live {:.4}",
                position.symbol, venue, position.quantity, live_quantity
            );
            position.quantity = live_quantity;
            position.updated_at_ms = now_ms();
        }
    }

    pub fn net_delta(&self) -> f64 {
        self.positions.values().map(|p| p.quantity).sum()
    }

    pub fn state(&self) -> NetDeltaState {
        NetDeltaState::new(
            self.net_delta(),
            self.base_position_size,
            self.last_rebalance_ms,
        )
    }

    /// Rebalance is required once deviation reaches the threshold, or when
    /// the maximum interval has elapsed even absent drift, to bound how
    /// stale the hedge ratio can get.
    pub fn needs_rebalance(&self, state: &NetDeltaState) -> bool {
        state.deviation_pct >= self.rebalance_threshold_pct
            || self.last_rebalance.elapsed() >= self.max_rebalance_interval
    }

    /// The minimal corrective order on the hedging venue that brings
    /// deviation back to zero. `None` when already neutral: invoking
    /// rebalance at zero deviation places no order.
    pub fn rebalance_order(&self, state: &NetDeltaState) -> Option<OrderRequest> {
        if state.net_delta.abs() < QTY_EPSILON {
            return None;
        }
        let side = if state.net_delta > 0.0 {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        };
        Some(OrderRequest::market(
            &self.hedge_venue,
            &self.symbol,
            side,
            state.net_delta.abs(),
        ))
    }

    pub fn mark_rebalanced(&mut self) {
        self.last_rebalance = Instant::now();
        self.last_rebalance_ms = now_ms();
    }

    pub fn positions_snapshot(&self) -> Vec<Position> {
        let mut positions: Vec<Position> = self.positions.values().cloned().collect();
        positions.sort_by(|a, b| a.venue.cmp(&b.venue));
        positions
    }

    pub fn session_pnl(&self) -> f64 {
        self.session_pnl
    }

    pub fn rebalance_threshold_pct(&self) -> f64 {
        self.rebalance_threshold_pct
    }
}
