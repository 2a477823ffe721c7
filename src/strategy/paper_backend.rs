use crate::strategy::error::StrategyError;
use crate::strategy::execution::ExecutionBackend;
use crate::strategy::market_data::{MarketDataFeed, MarketSnapshot};
use crate::strategy::types::{
    now_ms, OrderHandle, OrderRequest, OrderSide, OrderStatus, OrderStatusInfo, OrderType,
};
use crate::DynError;
use dashmap::DashMap;
use log::{debug, info};
use std::sync::Arc;

// ============================================================================
// Simulated market data feed
// ============================================================================

/// In-memory feed with settable books per (venue, symbol). Venues can be
/// marked down to simulate connectivity faults.
pub struct SimFeed {
    books: DashMap<(String, String), MarketSnapshot>,
    down: DashMap<String, ()>,
}

impl SimFeed {
    pub fn new() -> Self {
        Self {
            books: DashMap::new(),
            down: DashMap::new(),
        }
    }

    /// Set the book with the current timestamp and equal depth on both sides.
    pub fn set_book(&self, venue: &str, symbol: &str, bid: f64, ask: f64, depth: f64) {
        self.set_book_at(venue, symbol, bid, ask, depth, now_ms(), true);
    }

    pub fn set_book_at(
        &self,
        venue: &str,
        symbol: &str,
        bid: f64,
        ask: f64,
        depth: f64,
        timestamp_ms: u64,
        is_live: bool,
    ) {
        self.books.insert(
            (venue.to_string(), symbol.to_string()),
            MarketSnapshot {
                bid,
                ask,
                bid_qty: depth,
                ask_qty: depth,
                timestamp_ms,
                is_live,
            },
        );
    }

    /// Mark a venue unreachable; its snapshots fail with a connectivity
    /// error until it is brought back up.
    pub fn set_venue_down(&self, venue: &str, down: bool) {
        if down {
            self.down.insert(venue.to_string(), ());
        } else {
            self.down.remove(venue);
        }
    }

    fn book(&self, venue: &str, symbol: &str) -> Option<MarketSnapshot> {
        self.books
            .get(&(venue.to_string(), symbol.to_string()))
            .map(|entry| *entry.value())
    }
}

impl Default for SimFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl MarketDataFeed for SimFeed {
    async fn latest_snapshot(
        &self,
        venue: &str,
        symbol: &str,
    ) -> Result<MarketSnapshot, StrategyError> {
        if self.down.contains_key(venue) {
            return Err(StrategyError::Connectivity(format!(
                "{} unreachable",
                venue
            )));
        }
        self.book(venue, symbol).ok_or_else(|| {
            StrategyError::Connectivity(format!("no book for {} on {}", symbol, venue))
        })
    }
}

// ============================================================================
// Paper execution backend
// ============================================================================

struct PaperOrder {
    request: OrderRequest,
    handle: OrderHandle,
    status: OrderStatus,
    filled_quantity: f64,
    fill_price: Option<f64>,
}

/// Fill-at-book execution backend. Market orders fill immediately against
/// the simulated book; limit orders fill only when crossable, otherwise
/// they rest until cancelled or force-filled. Venues can be set to reject
/// orders, to leave them resting, to fill them only partially, or to fill
/// a resting order just as its cancel arrives, to exercise the unwind
/// paths.
pub struct PaperBackend {
    feed: Arc<SimFeed>,
    orders: DashMap<String, PaperOrder>,
    positions: DashMap<(String, String), f64>,
    rejecting: DashMap<String, ()>,
    resting_only: DashMap<String, ()>,
    fill_on_cancel: DashMap<String, ()>,
    partial_fill: DashMap<String, f64>,
}

impl PaperBackend {
    pub fn new(feed: Arc<SimFeed>) -> Self {
        Self {
            feed,
            orders: DashMap::new(),
            positions: DashMap::new(),
            rejecting: DashMap::new(),
            resting_only: DashMap::new(),
            fill_on_cancel: DashMap::new(),
            partial_fill: DashMap::new(),
        }
    }

    /// Make a venue reject every new order.
    pub fn set_rejecting(&self, venue: &str, rejecting: bool) {
        if rejecting {
            self.rejecting.insert(venue.to_string(), ());
        } else {
            self.rejecting.remove(venue);
        }
    }

    /// Make a venue accept orders but never fill them, leaving them resting.
    pub fn set_resting_only(&self, venue: &str, resting: bool) {
        if resting {
            self.resting_only.insert(venue.to_string(), ());
        } else {
            self.resting_only.remove(venue);
        }
    }

    /// Make a venue fill a resting order the moment its cancel arrives,
    /// reporting the cancel as lost.
    pub fn set_cancel_loses_race(&self, venue: &str, loses: bool) {
        if loses {
            self.fill_on_cancel.insert(venue.to_string(), ());
        } else {
            self.fill_on_cancel.remove(venue);
        }
    }

    /// Cap fills on a venue at `quantity`: crossable orders above the cap
    /// fill partially and the remainder rests. `None` restores full fills.
    pub fn set_partial_fill(&self, venue: &str, quantity: Option<f64>) {
        match quantity {
            Some(qty) => {
                self.partial_fill.insert(venue.to_string(), qty);
            }
            None => {
                self.partial_fill.remove(venue);
            }
        }
    }

    /// Fill a resting order at its limit price (or the current book for a
    /// market order). Models the venue filling behind our back, e.g. while
    /// a cancel is in flight.
    pub fn force_fill(&self, order_id: &str) -> bool {
        let mut entry = match self.orders.get_mut(order_id) {
            Some(e) => e,
            None => return false,
        };
        if entry.status != OrderStatus::Pending {
            return false;
        }
        let price = match entry.request.price {
            Some(p) => p,
            None => match self.feed.book(&entry.request.venue, &entry.request.symbol) {
                Some(book) => match entry.request.side {
                    OrderSide::Buy => book.ask,
                    OrderSide::Sell => book.bid,
                },
                None => return false,
            },
        };
        entry.status = OrderStatus::Filled;
        entry.filled_quantity = entry.request.quantity;
        entry.fill_price = Some(price);
        let request = entry.request.clone();
        drop(entry);
        self.bump_position(&request, request.quantity, price);
        true
    }

    /// Signed fill quantity applied to the venue position.
    fn bump_position(&self, request: &OrderRequest, quantity: f64, price: f64) {
        let key = (request.venue.clone(), request.symbol.clone());
        let mut position = self.positions.entry(key).or_insert(0.0);
        *position += request.side.sign() * quantity;
        debug!(
            "[PAPER] {:?} {:.4} {} @ {:.4} on {} -> position {:.4}",
            request.side, quantity, request.symbol, price, request.venue, *position
        );
    }

    fn crossable(&self, request: &OrderRequest, book: &MarketSnapshot) -> Option<f64> {
        match request.order_type {
            OrderType::Market => Some(match request.side {
                OrderSide::Buy => book.ask,
                OrderSide::Sell => book.bid,
            }),
            OrderType::Limit => {
                let limit = request.price?;
                match request.side {
                    OrderSide::Buy if book.ask <= limit => Some(limit.min(book.ask)),
                    OrderSide::Sell if book.bid >= limit => Some(limit.max(book.bid)),
                    _ => None,
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl ExecutionBackend for PaperBackend {
    async fn place_order(&self, order: OrderRequest) -> Result<OrderHandle, DynError> {
        let handle = OrderHandle {
            order_id: order.id.clone(),
            venue: order.venue.clone(),
            symbol: order.symbol.clone(),
        };

        if self.rejecting.contains_key(&order.venue) {
            info!("[PAPER] {} rejecting order {}", order.venue, order.id);
            self.orders.insert(
                order.id.clone(),
                PaperOrder {
                    handle: handle.clone(),
                    request: order,
                    status: OrderStatus::Rejected,
                    filled_quantity: 0.0,
                    fill_price: None,
                },
            );
            return Ok(handle);
        }

        let resting_only = self.resting_only.contains_key(&order.venue);
        let book = self.feed.book(&order.venue, &order.symbol);
        let fill = if resting_only {
            None
        } else {
            book.as_ref().and_then(|b| self.crossable(&order, b))
        };

        let fill_cap = self.partial_fill.get(&order.venue).map(|e| *e.value());
        let paper = match fill {
            Some(price) => match fill_cap {
                Some(cap) if cap < order.quantity => {
                    self.bump_position(&order, cap, price);
                    PaperOrder {
                        handle: handle.clone(),
                        status: OrderStatus::PartiallyFilled,
                        filled_quantity: cap,
                        fill_price: Some(price),
                        request: order,
                    }
                }
                _ => {
                    self.bump_position(&order, order.quantity, price);
                    PaperOrder {
                        handle: handle.clone(),
                        status: OrderStatus::Filled,
                        filled_quantity: order.quantity,
                        fill_price: Some(price),
                        request: order,
                    }
                }
            },
            None => PaperOrder {
                handle: handle.clone(),
                status: OrderStatus::Pending,
                filled_quantity: 0.0,
                fill_price: None,
                request: order,
            },
        };
        self.orders.insert(paper.request.id.clone(), paper);
        Ok(handle)
    }

    async fn order_status(&self, handle: &OrderHandle) -> Result<OrderStatusInfo, DynError> {
        let entry = self
            .orders
            .get(&handle.order_id)
            .ok_or_else(|| format!("unknown order {}", handle.order_id))?;
        Ok(OrderStatusInfo::new(
            entry.status,
            entry.filled_quantity,
            entry.request.quantity,
            entry.fill_price,
        ))
    }

    async fn cancel_order(&self, handle: &OrderHandle) -> Result<bool, DynError> {
        let mut entry = self
            .orders
            .get_mut(&handle.order_id)
            .ok_or_else(|| format!("unknown order {}", handle.order_id))?;
        match entry.status {
            OrderStatus::Pending => {
                if self.fill_on_cancel.contains_key(&entry.request.venue) {
                    // The venue filled the order a moment before the cancel
                    // arrived.
                    let price = entry.request.price.or_else(|| {
                        self.feed
                            .book(&entry.request.venue, &entry.request.symbol)
                            .map(|book| match entry.request.side {
                                OrderSide::Buy => book.ask,
                                OrderSide::Sell => book.bid,
                            })
                    });
                    if let Some(price) = price {
                        entry.status = OrderStatus::Filled;
                        entry.filled_quantity = entry.request.quantity;
                        entry.fill_price = Some(price);
                        let request = entry.request.clone();
                        drop(entry);
                        self.bump_position(&request, request.quantity, price);
                        return Ok(false);
                    }
                }
                entry.status = OrderStatus::Cancelled;
                Ok(true)
            }
            // Remainder comes off the book; the filled part stays.
            OrderStatus::PartiallyFilled => {
                entry.status = OrderStatus::Cancelled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn open_orders(&self) -> Result<Vec<OrderHandle>, DynError> {
        Ok(self
            .orders
            .iter()
            .filter(|entry| entry.status == OrderStatus::Pending)
            .map(|entry| entry.handle.clone())
            .collect())
    }

    async fn position_snapshot(&self, venue: &str, symbol: &str) -> Result<f64, DynError> {
        Ok(self
            .positions
            .get(&(venue.to_string(), symbol.to_string()))
            .map(|entry| *entry.value())
            .unwrap_or(0.0))
    }

    fn backend_name(&self) -> &str {
        "paper"
    }
}
