use crate::strategy::error::{ExecutionError, StrategyError};
use crate::strategy::types::{
    now_ms, ArbitrageOpportunity, ExecutionResult, Fill, OrderHandle, OrderRequest, OrderSide,
    OrderStatus, OrderStatusInfo,
};
use crate::DynError;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

/// Order-routing collaborator boundary (paper, testnet, live).
#[async_trait::async_trait]
pub trait ExecutionBackend: Send + Sync {
    /// Submit an order; an `Ok` means the venue accepted it, not that it
    /// filled.
    async fn place_order(&self, order: OrderRequest) -> Result<OrderHandle, DynError>;

    /// Poll order status including filled quantity and average fill price.
    async fn order_status(&self, handle: &OrderHandle) -> Result<OrderStatusInfo, DynError>;

    /// Cancel an order. `Ok(false)` means the cancel lost the race (already
    /// filled or gone).
    async fn cancel_order(&self, handle: &OrderHandle) -> Result<bool, DynError>;

    /// All orders still resting on any venue.
    async fn open_orders(&self) -> Result<Vec<OrderHandle>, DynError>;

    /// Signed position quantity currently held at the venue, for
    /// reconciliation against local accounting.
    async fn position_snapshot(&self, venue: &str, symbol: &str) -> Result<f64, DynError>;

    fn backend_name(&self) -> &str;
}

/// Ordering of the compensating actions after an asymmetric dual-leg
/// outcome: cancel the resting leg first, or flatten the filled leg first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum UnwindPolicy {
    CancelFirst,
    FlattenFirst,
}

impl std::str::FromStr for UnwindPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cancel_first" | "cancelfirst" => Ok(UnwindPolicy::CancelFirst),
            "flatten_first" | "flattenfirst" => Ok(UnwindPolicy::FlattenFirst),
            other => Err(format!("unknown unwind policy: {}", other)),
        }
    }
}

/// Outcome of one leg placement: the handle survives even when the fill did
/// not, so the unwind path can cancel or re-check it.
struct LegOutcome {
    request: OrderRequest,
    handle: Option<OrderHandle>,
    fill: Option<Fill>,
    error: Option<ExecutionError>,
}

/// What a cancel actually left behind on the venue.
enum CancelOutcome {
    /// Nothing filled; the order is off the book.
    Cleared,
    /// The cancel lost the race and the order filled in full.
    Adopted(Fill),
    /// Cancelled, but a partial quantity had already filled and must be
    /// offset.
    Residue(Fill),
}

fn fill_from(request: &OrderRequest, handle: &OrderHandle, info: &OrderStatusInfo) -> Fill {
    Fill {
        order_id: handle.order_id.clone(),
        venue: request.venue.clone(),
        symbol: request.symbol.clone(),
        side: request.side,
        quantity: info.filled_quantity,
        price: info.fill_price.or(request.price).unwrap_or_default(),
        timestamp_ms: now_ms(),
    }
}

async fn await_fill(
    backend: &dyn ExecutionBackend,
    request: &OrderRequest,
    handle: &OrderHandle,
    poll_interval: Duration,
) -> Result<Fill, ExecutionError> {
    loop {
        let info = backend
            .order_status(handle)
            .await
            .map_err(|e| ExecutionError::Rejected(format!("status query failed: {}", e)))?;
        match info.status {
            OrderStatus::Filled if info.is_fully_filled() => {
                return Ok(fill_from(request, handle, &info))
            }
            OrderStatus::Rejected => {
                return Err(ExecutionError::Rejected(format!(
                    "{} rejected order {}",
                    request.venue, handle.order_id
                )))
            }
            OrderStatus::Cancelled => {
                return Err(ExecutionError::Rejected(format!(
                    "order {} cancelled on {}",
                    handle.order_id, request.venue
                )))
            }
            _ => tokio::time::sleep(poll_interval).await,
        }
    }
}

/// Place one order and poll it to a terminal outcome within `fill_timeout`.
async fn place_and_confirm(
    backend: Arc<dyn ExecutionBackend>,
    request: OrderRequest,
    fill_timeout: Duration,
    poll_interval: Duration,
) -> LegOutcome {
    let handle = match backend.place_order(request.clone()).await {
        Ok(h) => h,
        Err(e) => {
            return LegOutcome {
                request,
                handle: None,
                fill: None,
                error: Some(ExecutionError::Rejected(e.to_string())),
            }
        }
    };

    match timeout(
        fill_timeout,
        await_fill(&*backend, &request, &handle, poll_interval),
    )
    .await
    {
        Ok(Ok(fill)) => LegOutcome {
            request,
            handle: Some(handle),
            fill: Some(fill),
            error: None,
        },
        Ok(Err(e)) => LegOutcome {
            request,
            handle: Some(handle),
            fill: None,
            error: Some(e),
        },
        Err(_) => {
            let venue = request.venue.clone();
            LegOutcome {
                request,
                handle: Some(handle),
                fill: None,
                error: Some(ExecutionError::Timeout(format!(
                    "awaiting fill on {} after {}ms",
                    venue,
                    fill_timeout.as_millis()
                ))),
            }
        }
    }
}

/// Places and confirms the legs of a trade. The dual-leg path dispatches
/// both legs concurrently and treats any asymmetric outcome as requiring a
/// compensating action; the single-leg path serves hedge establishment and
/// rebalancing, where one side is already fixed.
pub struct ExecutionCoordinator {
    backend: Arc<dyn ExecutionBackend>,
    leg_fill_timeout: Duration,
    single_leg_timeout: Duration,
    poll_interval: Duration,
    unwind_policy: UnwindPolicy,
}

impl ExecutionCoordinator {
    pub fn new(
        backend: Arc<dyn ExecutionBackend>,
        leg_fill_timeout: Duration,
        single_leg_timeout: Duration,
        poll_interval: Duration,
        unwind_policy: UnwindPolicy,
    ) -> Self {
        Self {
            backend,
            leg_fill_timeout,
            single_leg_timeout,
            poll_interval,
            unwind_policy,
        }
    }

    pub fn backend(&self) -> &Arc<dyn ExecutionBackend> {
        &self.backend
    }

    /// Execute both legs of a validated opportunity: a taking (market) order
    /// on the cheaper venue, where slippage risk concentrates, and a resting
    /// limit on the richer venue. Both placements are dispatched without
    /// waiting on each other, then joined under the leg fill timeout.
    ///
    /// Success requires both legs confirmed filled. Any other outcome is
    /// unwound to a zero net position change and reported as a partial-fill
    /// execution error; a naked position is never left silently.
    pub async fn execute(
        &self,
        opportunity: &ArbitrageOpportunity,
    ) -> Result<ExecutionResult, StrategyError> {
        let taker = OrderRequest::market(
            &opportunity.buy_venue,
            &opportunity.symbol,
            OrderSide::Buy,
            opportunity.quantity,
        );
        let maker = OrderRequest::limit(
            &opportunity.sell_venue,
            &opportunity.symbol,
            OrderSide::Sell,
            opportunity.quantity,
            opportunity.sell_price,
        );

        info!(
            "[EXECUTION] dual leg {}: buy {:.4} @ {} (market), sell @ {} (limit {:.4})",
            opportunity.symbol,
            opportunity.quantity,
            opportunity.buy_venue,
            opportunity.sell_venue,
            opportunity.sell_price
        );

        let taker_req = taker.clone();
        let maker_req = maker.clone();
        let taker_task = tokio::spawn(place_and_confirm(
            Arc::clone(&self.backend),
            taker,
            self.leg_fill_timeout,
            self.poll_interval,
        ));
        let maker_task = tokio::spawn(place_and_confirm(
            Arc::clone(&self.backend),
            maker,
            self.leg_fill_timeout,
            self.poll_interval,
        ));
        let (taker_join, maker_join) = tokio::join!(taker_task, maker_task);

        let mut taker_leg = taker_join.unwrap_or_else(|e| LegOutcome {
            request: taker_req,
            handle: None,
            fill: None,
            error: Some(ExecutionError::Rejected(format!("leg task failed: {}", e))),
        });
        let mut maker_leg = maker_join.unwrap_or_else(|e| LegOutcome {
            request: maker_req,
            handle: None,
            fill: None,
            error: Some(ExecutionError::Rejected(format!("leg task failed: {}", e))),
        });

        match (taker_leg.fill.take(), maker_leg.fill.take()) {
            (Some(taker_fill), Some(maker_fill)) => {
                Ok(self.build_result(opportunity, taker_fill, maker_fill))
            }
            (Some(taker_fill), None) => {
                warn!(
                    "[EXECUTION] maker leg failed on {}: {:?}",
                    maker_leg.request.venue, maker_leg.error
                );
                match self.unwind_partial(&taker_fill, &maker_leg).await? {
                    Some(maker_fill) => Ok(self.build_result(opportunity, taker_fill, maker_fill)),
                    None => Err(ExecutionError::PartialFill(format!(
                        "maker leg on {} did not fill; taker leg on {} unwound",
                        maker_leg.request.venue, taker_fill.venue
                    ))
                    .into()),
                }
            }
            (None, Some(maker_fill)) => {
                warn!(
                    "[EXECUTION] taker leg failed on {}: {:?}",
                    taker_leg.request.venue, taker_leg.error
                );
                match self.unwind_partial(&maker_fill, &taker_leg).await? {
                    Some(taker_fill) => Ok(self.build_result(opportunity, taker_fill, maker_fill)),
                    None => Err(ExecutionError::PartialFill(format!(
                        "taker leg on {} did not fill; maker leg on {} unwound",
                        taker_leg.request.venue, maker_fill.venue
                    ))
                    .into()),
                }
            }
            (None, None) => {
                // Neither leg confirmed in time: clear both, adopting anything
                // the cancels lost to, so no fill is left unaccounted.
                let taker_out = self.cancel_or_adopt(&taker_leg).await;
                let maker_out = self.cancel_or_adopt(&maker_leg).await;
                match (taker_out, maker_out) {
                    (CancelOutcome::Adopted(taker_fill), CancelOutcome::Adopted(maker_fill)) => {
                        info!("[EXECUTION] both cancels lost the race; pair held");
                        Ok(self.build_result(opportunity, taker_fill, maker_fill))
                    }
                    (CancelOutcome::Adopted(fill), other)
                    | (other, CancelOutcome::Adopted(fill)) => {
                        if let CancelOutcome::Residue(residue) = other {
                            self.flatten(&residue).await?;
                        }
                        self.flatten(&fill).await?;
                        Err(ExecutionError::PartialFill(format!(
                            "late fill on {} flattened after both legs timed out",
                            fill.venue
                        ))
                        .into())
                    }
                    (taker_out, maker_out) => {
                        let mut residue_venues = Vec::new();
                        for out in [taker_out, maker_out] {
                            if let CancelOutcome::Residue(residue) = out {
                                residue_venues.push(residue.venue.clone());
                                self.flatten(&residue).await?;
                            }
                        }
                        if residue_venues.is_empty() {
                            let err = taker_leg
                                .error
                                .take()
                                .or_else(|| maker_leg.error.take())
                                .unwrap_or_else(|| {
                                    ExecutionError::Rejected("no leg placed".to_string())
                                });
                            Err(err.into())
                        } else {
                            Err(ExecutionError::PartialFill(format!(
                                "partial fills on {} flattened after both legs timed out",
                                residue_venues.join(", ")
                            ))
                            .into())
                        }
                    }
                }
            }
        }
    }

    /// Place a single order and confirm its fill within the single-leg
    /// timeout, cancelling it on timeout. Used for hedge establishment,
    /// rebalancing, and final position flattening.
    pub async fn execute_single(&self, order: OrderRequest) -> Result<Fill, StrategyError> {
        let mut outcome = place_and_confirm(
            Arc::clone(&self.backend),
            order,
            self.single_leg_timeout,
            self.poll_interval,
        )
        .await;

        if let Some(fill) = outcome.fill.take() {
            return Ok(fill);
        }
        match self.cancel_or_adopt(&outcome).await {
            CancelOutcome::Adopted(fill) => {
                info!(
                    "[EXECUTION] cancel lost the race on {}; adopting fill",
                    fill.venue
                );
                return Ok(fill);
            }
            CancelOutcome::Residue(residue) => {
                self.flatten(&residue).await?;
                return Err(ExecutionError::PartialFill(format!(
                    "order on {} filled {:.4} of {:.4} before cancel; residue flattened",
                    residue.venue, residue.quantity, outcome.request.quantity
                ))
                .into());
            }
            CancelOutcome::Cleared => {}
        }
        let err = outcome
            .error
            .take()
            .unwrap_or_else(|| ExecutionError::Rejected("order did not fill".to_string()));
        Err(err.into())
    }

    fn build_result(
        &self,
        opportunity: &ArbitrageOpportunity,
        taker_fill: Fill,
        maker_fill: Fill,
    ) -> ExecutionResult {
        let buy = taker_fill.price;
        let sell = maker_fill.price;
        let realized_spread_pct = if buy > 0.0 && sell > 0.0 {
            (sell - buy) / buy.min(sell) * 100.0
        } else {
            0.0
        };
        info!(
            "[EXECUTION] both legs filled: bought {:.4} @ {:.4} on {}, sold @ {:.4} on {} ({:.3}%)",
            taker_fill.quantity,
            buy,
            taker_fill.venue,
            sell,
            maker_fill.venue,
            realized_spread_pct
        );
        ExecutionResult {
            taker_fill,
            maker_fill,
            realized_spread_pct,
            estimated_pnl: opportunity.estimated_net_pnl,
        }
    }

    /// Compensate for an asymmetric outcome. Returns `Some(fill)` when the
    /// "unfilled" leg turns out to have filled while we were cancelling it,
    /// in which case the pair is complete and nothing was flattened.
    async fn unwind_partial(
        &self,
        filled: &Fill,
        unfilled: &LegOutcome,
    ) -> Result<Option<Fill>, StrategyError> {
        match self.unwind_policy {
            UnwindPolicy::CancelFirst => match self.cancel_or_adopt(unfilled).await {
                CancelOutcome::Adopted(adopted) => {
                    info!(
                        "[EXECUTION] cancel lost the race on {}; both legs held",
                        adopted.venue
                    );
                    Ok(Some(adopted))
                }
                CancelOutcome::Residue(residue) => {
                    self.flatten(&residue).await?;
                    self.flatten(filled).await?;
                    Ok(None)
                }
                CancelOutcome::Cleared => {
                    self.flatten(filled).await?;
                    Ok(None)
                }
            },
            UnwindPolicy::FlattenFirst => {
                self.flatten(filled).await?;
                match self.cancel_or_adopt(unfilled).await {
                    // The resting leg filled while we flattened; it is naked
                    // now, flatten it as well.
                    CancelOutcome::Adopted(adopted) => self.flatten(&adopted).await?,
                    CancelOutcome::Residue(residue) => self.flatten(&residue).await?,
                    CancelOutcome::Cleared => {}
                }
                Ok(None)
            }
        }
    }

    /// Cancel a resting leg, then re-check what actually filled: a cancel
    /// that loses the race yields an adopted fill, and a cancelled order may
    /// still carry a partial quantity that needs offsetting.
    async fn cancel_or_adopt(&self, leg: &LegOutcome) -> CancelOutcome {
        let handle = match leg.handle.as_ref() {
            Some(handle) => handle,
            None => return CancelOutcome::Cleared,
        };
        let cancelled = self.backend.cancel_order(handle).await.unwrap_or(false);
        match self.backend.order_status(handle).await {
            Ok(info) if info.is_fully_filled() => {
                CancelOutcome::Adopted(fill_from(&leg.request, handle, &info))
            }
            Ok(info) if info.is_partially_filled() => {
                warn!(
                    "[EXECUTION] order {} on {} cancelled with {:.4} of {:.4} filled",
                    handle.order_id, leg.request.venue, info.filled_quantity, info.total_quantity
                );
                CancelOutcome::Residue(fill_from(&leg.request, handle, &info))
            }
            Ok(_) => {
                if cancelled {
                    info!(
                        "[EXECUTION] cancelled resting order {} on {}",
                        handle.order_id, leg.request.venue
                    );
                }
                CancelOutcome::Cleared
            }
            Err(_) => CancelOutcome::Cleared,
        }
    }

    /// Immediately offset a filled leg with a market order in the opposite
    /// direction. Failure here means a naked position we could not remove,
    /// which is a consistency fault, not a retryable execution error.
    async fn flatten(&self, fill: &Fill) -> Result<(), StrategyError> {
        let offset = OrderRequest::market(
            &fill.venue,
            &fill.symbol,
            fill.side.flipped(),
            fill.quantity,
        );
        warn!(
            "[EXECUTION] flattening {:.4} {} on {} after failed leg",
            fill.quantity, fill.symbol, fill.venue
        );
        let mut outcome = place_and_confirm(
            Arc::clone(&self.backend),
            offset,
            self.single_leg_timeout,
            self.poll_interval,
        )
        .await;
        match outcome.fill.take() {
            Some(_) => Ok(()),
            None => Err(StrategyError::Consistency(format!(
                "failed to flatten {} on {}: naked position of {:.4}",
                fill.symbol, fill.venue, fill.signed_quantity()
            ))),
        }
    }
}
