use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Quantities below this are treated as flat.
pub const QTY_EPSILON: f64 = 1e-9;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// Orders
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OrderSide {
    #[default]
    Buy,
    Sell,
}

impl OrderSide {
    pub fn flipped(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }

    /// Sign applied to quantities for delta accounting: Buy = +1, Sell = -1.
    pub fn sign(self) -> f64 {
        match self {
            OrderSide::Buy => 1.0,
            OrderSide::Sell => -1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OrderType {
    #[default]
    Limit,
    Market,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum OrderStatus {
    #[default]
    Pending,
    Filled,
    PartiallyFilled,
    Cancelled,
    Rejected,
}

/// Order status information including filled quantity and average fill price.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct OrderStatusInfo {
    pub status: OrderStatus,
    pub filled_quantity: f64,
    pub total_quantity: f64,
    pub fill_price: Option<f64>,
}

impl OrderStatusInfo {
    pub fn new(
        status: OrderStatus,
        filled_quantity: f64,
        total_quantity: f64,
        fill_price: Option<f64>,
    ) -> Self {
        Self {
            status,
            filled_quantity,
            total_quantity,
            fill_price,
        }
    }

    pub fn is_fully_filled(&self) -> bool {
        self.status == OrderStatus::Filled
            && self.filled_quantity >= self.total_quantity - QTY_EPSILON
    }

    pub fn is_partially_filled(&self) -> bool {
        self.filled_quantity > QTY_EPSILON
            && self.filled_quantity < self.total_quantity - QTY_EPSILON
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderRequest {
    pub id: String,
    pub venue: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: f64,
    /// Limit price; None for market orders.
    pub price: Option<f64>,
    pub created_at_ms: u64,
}

impl OrderRequest {
    pub fn market(venue: &str, symbol: &str, side: OrderSide, quantity: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            venue: venue.to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Market,
            quantity,
            price: None,
            created_at_ms: now_ms(),
        }
    }

    pub fn limit(venue: &str, symbol: &str, side: OrderSide, quantity: f64, price: f64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            venue: venue.to_string(),
            symbol: symbol.to_string(),
            side,
            order_type: OrderType::Limit,
            quantity,
            price: Some(price),
            created_at_ms: now_ms(),
        }
    }
}

/// Handle returned by a backend on order acceptance, used for status polls
/// and cancellation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderHandle {
    pub order_id: String,
    pub venue: String,
    pub symbol: String,
}

/// A confirmed execution on one venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Fill {
    pub order_id: String,
    pub venue: String,
    pub symbol: String,
    pub side: OrderSide,
    pub quantity: f64,
    pub price: f64,
    pub timestamp_ms: u64,
}

impl Fill {
    /// Quantity signed by side: buys positive, sells negative.
    pub fn signed_quantity(&self) -> f64 {
        self.side.sign() * self.quantity
    }
}

// ============================================================================
// Positions and net delta
// ============================================================================

/// One position per (venue, symbol). Owned exclusively by the delta tracker
/// and mutated only after a confirmed fill.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub venue: String,
    pub symbol: String,
    /// Signed quantity: positive long, negative short.
    pub quantity: f64,
    pub avg_entry_price: f64,
    pub updated_at_ms: u64,
}

impl Position {
    pub fn new(venue: &str, symbol: &str) -> Self {
        Self {
            venue: venue.to_string(),
            symbol: symbol.to_string(),
            quantity: 0.0,
            avg_entry_price: 0.0,
            updated_at_ms: 0,
        }
    }

    pub fn is_flat(&self) -> bool {
        self.quantity.abs() < QTY_EPSILON
    }

    /// Apply a fill to this position and return the realized pnl of any
    /// closed quantity.
    pub fn apply(&mut self, side: OrderSide, quantity: f64, price: f64, ts_ms: u64) -> f64 {
        let signed = side.sign() * quantity;
        let old_qty = self.quantity;
        self.updated_at_ms = ts_ms;

        let same_direction = old_qty.abs() < QTY_EPSILON || (old_qty > 0.0) == (signed > 0.0);
        if same_direction {
            let new_qty = old_qty + signed;
            self.avg_entry_price = if new_qty.abs() < QTY_EPSILON {
                0.0
            } else {
                (self.avg_entry_price * old_qty.abs() + price * signed.abs()) / new_qty.abs()
            };
            self.quantity = new_qty;
            return 0.0;
        }

        // Opposing fill: realize pnl on the closed quantity.
        let closing = signed.abs().min(old_qty.abs());
        let realized = (price - self.avg_entry_price) * closing * old_qty.signum();
        self.quantity = old_qty + signed;

        if self.quantity.abs() < QTY_EPSILON {
            self.quantity = 0.0;
            self.avg_entry_price = 0.0;
        } else if signed.abs() > old_qty.abs() {
            // Crossed through zero: remainder opened at the fill price.
            self.avg_entry_price = price;
        }
        realized
    }
}

/// Aggregate signed exposure across all venues for the traded symbol.
/// Target is zero; deviation is expressed relative to the base position size.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct NetDeltaState {
    pub net_delta: f64,
    pub base_position_size: f64,
    pub deviation_pct: f64,
    pub last_rebalance_ms: u64,
}

impl NetDeltaState {
    pub fn new(net_delta: f64, base_position_size: f64, last_rebalance_ms: u64) -> Self {
        let deviation_pct = if base_position_size > 0.0 {
            net_delta.abs() / base_position_size * 100.0
        } else {
            0.0
        };
        Self {
            net_delta,
            base_position_size,
            deviation_pct,
            last_rebalance_ms,
        }
    }

    pub fn is_neutral(&self) -> bool {
        self.net_delta.abs() < QTY_EPSILON
    }
}

// ============================================================================
// Spread observations and opportunities
// ============================================================================

/// Which way the spread is crossed: buy on the cheaper venue, sell on the
/// richer one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SpreadDirection {
    /// Buy at venue A's ask, sell at venue B's bid.
    BuyASellB,
    /// Buy at venue B's ask, sell at venue A's bid.
    BuyBSellA,
}

/// Immutable once recorded; appended to the spread monitor's bounded buffer.
/// Prices are the crossable prices for the entry direction (buy-side ask,
/// sell-side bid), not mids.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SpreadObservation {
    pub timestamp_ms: u64,
    pub venue_a_price: f64,
    pub venue_b_price: f64,
    pub spread_pct: f64,
    pub liquidity_a: f64,
    pub liquidity_b: f64,
    pub direction: SpreadDirection,
}

impl SpreadObservation {
    pub fn buy_price(&self) -> f64 {
        match self.direction {
            SpreadDirection::BuyASellB => self.venue_a_price,
            SpreadDirection::BuyBSellA => self.venue_b_price,
        }
    }

    pub fn sell_price(&self) -> f64 {
        match self.direction {
            SpreadDirection::BuyASellB => self.venue_b_price,
            SpreadDirection::BuyBSellA => self.venue_a_price,
        }
    }

    pub fn buy_liquidity(&self) -> f64 {
        match self.direction {
            SpreadDirection::BuyASellB => self.liquidity_a,
            SpreadDirection::BuyBSellA => self.liquidity_b,
        }
    }

    pub fn sell_liquidity(&self) -> f64 {
        match self.direction {
            SpreadDirection::BuyASellB => self.liquidity_b,
            SpreadDirection::BuyBSellA => self.liquidity_a,
        }
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp_ms)
    }
}

/// Ephemeral, derived at validation time and never persisted or cached
/// across the validation boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrageOpportunity {
    pub symbol: String,
    pub buy_venue: String,
    pub sell_venue: String,
    pub buy_price: f64,
    pub sell_price: f64,
    pub spread_pct: f64,
    pub direction: SpreadDirection,
    pub max_tradable_quantity: f64,
    pub quantity: f64,
    pub estimated_net_pnl: f64,
    /// In [0, 1], derived from recent spread stability.
    pub confidence_score: f64,
    pub signal_ts_ms: u64,
}

/// Result of a coordinated two-leg execution: both legs confirmed filled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub taker_fill: Fill,
    pub maker_fill: Fill,
    pub realized_spread_pct: f64,
    pub estimated_pnl: f64,
}

// ============================================================================
// State machine
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum StrategyState {
    Initializing,
    EstablishingDeltaNeutral,
    DeltaNeutralActive,
    MonitoringSpreads,
    PreparingArbitrage,
    ExecutingArbitrage,
    RebalancingDelta,
    ErrorRecovery,
    Shutdown,
}

impl StrategyState {
    /// Whether the transition table permits `self -> to`. The external stop
    /// signal may force Shutdown from any state.
    pub fn can_transition(self, to: StrategyState) -> bool {
        use StrategyState::*;
        if to == Shutdown {
            return true;
        }
        matches!(
            (self, to),
            (Initializing, EstablishingDeltaNeutral)
                | (Initializing, ErrorRecovery)
                | (EstablishingDeltaNeutral, DeltaNeutralActive)
                | (EstablishingDeltaNeutral, ErrorRecovery)
                | (DeltaNeutralActive, MonitoringSpreads)
                | (MonitoringSpreads, PreparingArbitrage)
                | (MonitoringSpreads, RebalancingDelta)
                | (MonitoringSpreads, ErrorRecovery)
                | (PreparingArbitrage, ExecutingArbitrage)
                | (PreparingArbitrage, MonitoringSpreads)
                | (PreparingArbitrage, ErrorRecovery)
                | (ExecutingArbitrage, MonitoringSpreads)
                | (ExecutingArbitrage, RebalancingDelta)
                | (ExecutingArbitrage, ErrorRecovery)
                | (RebalancingDelta, MonitoringSpreads)
                | (RebalancingDelta, ErrorRecovery)
                | (ErrorRecovery, MonitoringSpreads)
        )
    }
}

// ============================================================================
// Session reporting
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct SessionStats {
    pub trades_executed: u64,
    pub unwinds: u64,
    pub rebalances: u64,
    pub recovery_episodes: u64,
    pub session_pnl: f64,
}

/// Snapshot of the running strategy published to the host.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub state: StrategyState,
    pub net_delta: f64,
    pub deviation_pct: f64,
    pub session_pnl: f64,
}

/// One structured error event, reported upward whether or not it was retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub kind: crate::strategy::error::ErrorKind,
    pub attempt: u32,
    pub message: String,
    pub at_ms: u64,
}

/// Final report emitted on shutdown; the session never exits silently.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub cause: String,
    pub attempt_history: Vec<AttemptRecord>,
    pub final_positions: Vec<Position>,
    pub final_net_delta: f64,
    pub session_pnl: f64,
    pub stats: SessionStats,
    pub ended_at: String,
}
