use crate::config::StrategyConfig;
use crate::strategy::delta_tracker::DeltaTracker;
use crate::strategy::error::{ExecutionError, StrategyError};
use crate::strategy::evaluator::{EvaluatorConfig, OpportunityEvaluator, StabilityScorer};
use crate::strategy::execution::{ExecutionBackend, ExecutionCoordinator};
use crate::strategy::market_data::{fetch_pair, MarketDataFeed};
use crate::strategy::recovery::{RecoveryContext, RecoveryManager, RecoveryOutcome};
use crate::strategy::spread_monitor::SpreadMonitor;
use crate::strategy::types::{
    now_ms, ArbitrageOpportunity, AttemptRecord, Fill, OrderRequest, OrderSide, Position,
    SessionReport, SessionStats, SpreadObservation, StatusSnapshot, StrategyState,
};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};

// ============================================================================
// External handle
// ============================================================================

/// Control surface handed to the host: stop, observe, nudge. All methods are
/// non-blocking; the controller task owns all strategy state.
#[derive(Clone)]
pub struct StrategyHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
    status_rx: watch::Receiver<StatusSnapshot>,
    force_rebalance: Arc<AtomicBool>,
}

impl StrategyHandle {
    /// Ask the controller to stop. Takes effect at the next suspension
    /// point; the controller still runs its full shutdown sequence.
    pub fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Latest published status snapshot.
    pub fn status(&self) -> StatusSnapshot {
        self.status_rx.borrow().clone()
    }

    /// Subscribe to status updates.
    pub fn status_stream(&self) -> watch::Receiver<StatusSnapshot> {
        self.status_rx.clone()
    }

    /// Force a rebalance pass on the next monitoring tick, regardless of
    /// current deviation. Idempotent: at zero delta no order is placed.
    pub fn request_rebalance(&self) {
        self.force_rebalance.store(true, Ordering::SeqCst);
    }
}

// ============================================================================
// Controller
// ============================================================================

/// The strategy state machine. Runs as a single task; every await point it
/// suspends on also races the stop signal, so shutdown is honored from any
/// state without killing in-flight compensation logic.
pub struct StrategyController {
    cfg: StrategyConfig,
    feed: Arc<dyn MarketDataFeed>,
    monitor: SpreadMonitor,
    evaluator: OpportunityEvaluator,
    coordinator: ExecutionCoordinator,
    tracker: DeltaTracker,
    recovery: RecoveryManager,

    state: StrategyState,
    status_tx: watch::Sender<StatusSnapshot>,
    shutdown_rx: watch::Receiver<bool>,
    force_rebalance: Arc<AtomicBool>,

    /// Ongoing fault episode, if any. One episode spans consecutive
    /// failures; it ends on successful recovery or shutdown.
    episode: Option<RecoveryContext>,
    attempt_history: Vec<AttemptRecord>,

    /// Signal carried from monitoring into validation.
    candidate: Option<(SpreadObservation, f64)>,
    /// Validated opportunity carried into execution.
    pending: Option<ArbitrageOpportunity>,

    stats: SessionStats,
    shutdown_cause: Option<String>,
}

impl StrategyController {
    pub fn new(
        cfg: StrategyConfig,
        feed: Arc<dyn MarketDataFeed>,
        backend: Arc<dyn ExecutionBackend>,
    ) -> (Self, StrategyHandle) {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (status_tx, status_rx) = watch::channel(StatusSnapshot {
            state: StrategyState::Initializing,
            net_delta: 0.0,
            deviation_pct: 0.0,
            session_pnl: 0.0,
        });
        let force_rebalance = Arc::new(AtomicBool::new(false));

        let evaluator = OpportunityEvaluator::new(
            Arc::clone(&feed),
            Arc::new(StabilityScorer),
            EvaluatorConfig {
                venue_a: cfg.venue_a.clone(),
                venue_b: cfg.venue_b.clone(),
                symbol: cfg.symbol.clone(),
                entry_threshold_pct: cfg.entry_threshold_pct,
                confirm_tolerance_pct: cfg.confirm_tolerance_pct,
                confidence_floor: cfg.confidence_floor,
                min_trade_quantity: cfg.min_trade_quantity,
                max_trade_quantity: cfg.max_trade_quantity,
                total_fee_pct: cfg.total_fee_pct,
                rebalance_threshold_pct: cfg.rebalance_threshold_pct,
                freshness_bound_ms: cfg.freshness_bound_ms,
            },
        );
        let coordinator = ExecutionCoordinator::new(
            backend,
            cfg.leg_fill_timeout(),
            cfg.single_leg_timeout(),
            cfg.order_poll_interval(),
            cfg.unwind_policy,
        );
        let tracker = DeltaTracker::new(
            &cfg.symbol,
            &cfg.hedge_venue,
            cfg.base_position_size,
            cfg.rebalance_threshold_pct,
            cfg.max_rebalance_interval(),
        );
        let recovery = RecoveryManager::new(
            cfg.recovery_base_delay(),
            cfg.recovery_max_delay(),
            cfg.max_recovery_attempts,
        );
        let monitor = SpreadMonitor::new(cfg.spread_window, cfg.freshness_bound_ms);

        let handle = StrategyHandle {
            shutdown_tx: Arc::new(shutdown_tx),
            status_rx,
            force_rebalance: Arc::clone(&force_rebalance),
        };
        let controller = Self {
            cfg,
            feed,
            monitor,
            evaluator,
            coordinator,
            tracker,
            recovery,
            state: StrategyState::Initializing,
            status_tx,
            shutdown_rx,
            force_rebalance,
            episode: None,
            attempt_history: Vec::new(),
            candidate: None,
            pending: None,
            stats: SessionStats::default(),
            shutdown_cause: None,
        };
        (controller, handle)
    }

    /// Drive the state machine to completion. Returns the final session
    /// report; the strategy never exits without one.
    pub async fn run(mut self) -> SessionReport {
        info!(
            "[CONTROLLER] starting: {} on {}/{} hedged at {}",
            self.cfg.symbol, self.cfg.venue_a, self.cfg.venue_b, self.cfg.hedge_venue
        );
        if let Err(e) = self.cfg.validate() {
            self.fail(e);
        }
        loop {
            if self.state != StrategyState::Shutdown && self.shutdown_requested() {
                self.shutdown_cause
                    .get_or_insert_with(|| "external stop request".to_string());
                self.transition(StrategyState::Shutdown, "stop signal");
            }
            match self.state {
                StrategyState::Initializing => self.step_initializing().await,
                StrategyState::EstablishingDeltaNeutral => self.step_establishing().await,
                StrategyState::DeltaNeutralActive => self.step_active(),
                StrategyState::MonitoringSpreads => self.step_monitoring().await,
                StrategyState::PreparingArbitrage => self.step_preparing().await,
                StrategyState::ExecutingArbitrage => self.step_executing().await,
                StrategyState::RebalancingDelta => self.step_rebalancing().await,
                StrategyState::ErrorRecovery => self.step_recovery().await,
                StrategyState::Shutdown => return self.finalize().await,
            }
        }
    }

    // ========================================================================
    // State steps
    // ========================================================================

    /// Verify both monitored feeds and the hedge venue respond with fresh,
    /// valid prices, within the initialization budget.
    async fn step_initializing(&mut self) {
        match timeout(self.cfg.init_timeout(), self.verify_connectivity()).await {
            Ok(Ok(())) => {
                self.transition(
                    StrategyState::EstablishingDeltaNeutral,
                    "feeds live and fresh",
                );
            }
            Ok(Err(e)) => self.fail(e),
            Err(_) => self.fail(StrategyError::Connectivity(format!(
                "initialization exceeded {}s",
                self.cfg.init_timeout_secs
            ))),
        }
    }

    /// Open the base hedge: long the base size on venue A, short it on the
    /// hedging venue, dispatched concurrently. An asymmetric outcome is
    /// flattened before the error is raised.
    async fn step_establishing(&mut self) {
        let long = OrderRequest::market(
            &self.cfg.venue_a,
            &self.cfg.symbol,
            OrderSide::Buy,
            self.cfg.base_position_size,
        );
        let short = OrderRequest::market(
            &self.cfg.hedge_venue,
            &self.cfg.symbol,
            OrderSide::Sell,
            self.cfg.base_position_size,
        );

        let hedged = timeout(self.cfg.hedge_timeout(), async {
            tokio::join!(
                self.coordinator.execute_single(long),
                self.coordinator.execute_single(short)
            )
        })
        .await;

        match hedged {
            Ok((Ok(long_fill), Ok(short_fill))) => {
                self.tracker.apply_fill(&long_fill);
                self.tracker.apply_fill(&short_fill);
                self.tracker.mark_rebalanced();
                info!(
                    "[CONTROLLER] hedge established: +{:.4} on {}, -{:.4} on {}",
                    long_fill.quantity, long_fill.venue, short_fill.quantity, short_fill.venue
                );
                self.transition(StrategyState::DeltaNeutralActive, "hedge filled both sides");
            }
            Ok((Ok(filled), Err(e))) | Ok((Err(e), Ok(filled))) => {
                warn!(
                    "[CONTROLLER] hedge leg on {} failed ({}), flattening the filled side",
                    if filled.venue == self.cfg.venue_a {
                        &self.cfg.hedge_venue
                    } else {
                        &self.cfg.venue_a
                    },
                    e
                );
                self.tracker.apply_fill(&filled);
                match self.flatten_position_of(&filled).await {
                    Ok(()) => self.fail(
                        ExecutionError::PartialFill(format!("hedge half-filled: {}", e)).into(),
                    ),
                    Err(flat_err) => self.fail(flat_err),
                }
            }
            Ok((Err(e), Err(e2))) => {
                warn!("[CONTROLLER] hedge failed on both venues: {} / {}", e, e2);
                self.fail(e);
            }
            Err(_) => self.fail(
                ExecutionError::Timeout(format!(
                    "hedge establishment exceeded {}s",
                    self.cfg.hedge_timeout_secs
                ))
                .into(),
            ),
        }
    }

    /// Confirmation state: the hedge is on and net delta is flat. Purely a
    /// checkpoint before the monitoring loop.
    fn step_active(&mut self) {
        let delta = self.tracker.state();
        info!(
            "[CONTROLLER] delta neutral: net {:.6} ({:.2}% of base)",
            delta.net_delta, delta.deviation_pct
        );
        self.transition(StrategyState::MonitoringSpreads, "entering monitor loop");
    }

    /// One monitoring tick: delta guard first, then a fresh spread
    /// observation, then either a signal hand-off or a paced sleep.
    async fn step_monitoring(&mut self) {
        if self.force_rebalance.swap(false, Ordering::SeqCst) {
            self.transition(StrategyState::RebalancingDelta, "rebalance requested");
            return;
        }

        let delta = self.tracker.state();
        if delta.deviation_pct >= self.cfg.emergency_deviation_pct {
            error!(
                "[CONTROLLER] emergency deviation {:.2}% >= {:.2}%, stopping",
                delta.deviation_pct, self.cfg.emergency_deviation_pct
            );
            self.shutdown_cause = Some(format!(
                "emergency delta deviation {:.2}%",
                delta.deviation_pct
            ));
            self.transition(StrategyState::Shutdown, "emergency deviation");
            return;
        }
        if self.tracker.needs_rebalance(&delta) {
            self.transition(StrategyState::RebalancingDelta, "deviation or interval");
            return;
        }

        let fetched = fetch_pair(
            &self.feed,
            &self.cfg.venue_a,
            &self.cfg.venue_b,
            &self.cfg.symbol,
            Duration::from_millis(self.cfg.freshness_bound_ms),
        )
        .await;
        let (a, b) = match fetched {
            Ok(pair) => pair,
            Err(e) => {
                self.fail(e);
                return;
            }
        };

        if let Some(obs) = self.monitor.observe(&a, &b, now_ms()) {
            if obs.spread_pct >= self.cfg.entry_threshold_pct {
                let stability = self.monitor.stability();
                debug!(
                    "[CONTROLLER] signal: {:.3}% (p{:.0}, stability {:.2})",
                    obs.spread_pct,
                    self.monitor.current_percentile(obs.spread_pct),
                    stability
                );
                self.candidate = Some((obs, stability));
                self.transition(StrategyState::PreparingArbitrage, "spread above threshold");
                return;
            }
        }
        self.publish();
        self.pause(self.cfg.monitor_interval()).await;
    }

    /// Validate the carried signal with a second independent read. A
    /// discarded signal is routine, not a fault.
    async fn step_preparing(&mut self) {
        let (obs, stability) = match self.candidate.take() {
            Some(c) => c,
            None => {
                self.transition(StrategyState::MonitoringSpreads, "no signal to validate");
                return;
            }
        };
        let delta = self.tracker.state();
        match self.evaluator.evaluate(&obs, stability, &delta).await {
            Ok(Some(opportunity)) => {
                self.pending = Some(opportunity);
                self.transition(StrategyState::ExecutingArbitrage, "opportunity confirmed");
            }
            Ok(None) => {
                self.transition(StrategyState::MonitoringSpreads, "signal discarded");
            }
            Err(e) => self.fail(e),
        }
    }

    async fn step_executing(&mut self) {
        let opportunity = match self.pending.take() {
            Some(o) => o,
            None => {
                self.transition(StrategyState::MonitoringSpreads, "no validated opportunity");
                return;
            }
        };
        match self.coordinator.execute(&opportunity).await {
            Ok(result) => {
                let delta = self.tracker.apply_execution(&result);
                self.stats.trades_executed += 1;
                self.stats.session_pnl = self.tracker.session_pnl();
                info!(
                    "[CONTROLLER] trade complete: realized {:.3}% | net delta {:.6}",
                    result.realized_spread_pct, delta.net_delta
                );
                if self.tracker.needs_rebalance(&delta) {
                    self.transition(StrategyState::RebalancingDelta, "post-trade drift");
                } else {
                    self.transition(StrategyState::MonitoringSpreads, "trade settled");
                }
            }
            Err(e) => self.fail(e),
        }
    }

    /// Place the minimal corrective order on the hedging venue. At zero
    /// deviation this is a no-op pass that only refreshes the rebalance
    /// clock.
    async fn step_rebalancing(&mut self) {
        let delta = self.tracker.state();
        let order = match self.tracker.rebalance_order(&delta) {
            Some(order) => order,
            None => {
                debug!("[CONTROLLER] rebalance pass at zero deviation, nothing to do");
                self.tracker.mark_rebalanced();
                self.transition(StrategyState::MonitoringSpreads, "already neutral");
                return;
            }
        };
        info!(
            "[CONTROLLER] rebalancing: {:?} {:.6} {} on {}",
            order.side, order.quantity, order.symbol, order.venue
        );
        match self.coordinator.execute_single(order).await {
            Ok(fill) => {
                let after = self.tracker.apply_fill(&fill);
                self.tracker.mark_rebalanced();
                self.stats.rebalances += 1;
                self.stats.session_pnl = self.tracker.session_pnl();
                info!(
                    "[CONTROLLER] rebalanced: net delta {:.6} ({:.2}%)",
                    after.net_delta, after.deviation_pct
                );
                self.transition(StrategyState::MonitoringSpreads, "delta restored");
            }
            Err(e) => self.fail(e),
        }
    }

    /// One recovery attempt: back off, then probe or reconcile depending on
    /// the fault kind. A failed attempt stays in this state; the attempt
    /// counter keeps climbing until recovery or exhaustion.
    async fn step_recovery(&mut self) {
        let mut ctx = match self.episode.take() {
            None => {
                self.transition(StrategyState::MonitoringSpreads, "no active fault");
                return;
            }
            Some(ctx) => ctx,
        };

        let outcome = self.recovery.attempt_recovery(&mut ctx);
        let attempt = ctx.attempt_count;
        match outcome {
            RecoveryOutcome::Unrecoverable => {
                self.shutdown_cause = Some(format!(
                    "unrecoverable after {} attempts ({:?})",
                    ctx.max_attempts, ctx.last_error_kind
                ));
                self.transition(StrategyState::Shutdown, "recovery exhausted");
            }
            RecoveryOutcome::Retry { wait } => {
                self.episode = Some(ctx);
                info!(
                    "[RECOVERY] attempt {}: waiting {}ms then re-probing feeds",
                    attempt,
                    wait.as_millis()
                );
                if !self.pause(wait).await {
                    return;
                }
                match self.verify_connectivity().await {
                    Ok(()) => {
                        self.episode = None;
                        info!("[RECOVERY] probe succeeded, resuming");
                        self.transition(StrategyState::MonitoringSpreads, "recovered");
                    }
                    Err(e) => {
                        warn!("[RECOVERY] probe failed: {}", e);
                        self.record_attempt(&e, attempt);
                        if let Some(ctx) = self.episode.as_mut() {
                            let error = e;
                            self.recovery.note_failure(ctx, &error);
                        }
                    }
                }
            }
            RecoveryOutcome::Reconcile { wait } => {
                self.episode = Some(ctx);
                info!(
                    "[RECOVERY] attempt {}: waiting {}ms then reconciling positions",
                    attempt,
                    wait.as_millis()
                );
                if !self.pause(wait).await {
                    return;
                }
                match self.reconcile_positions().await {
                    Ok(()) => {
                        let delta = self.tracker.state();
                        if delta.deviation_pct >= self.cfg.emergency_deviation_pct {
                            self.shutdown_cause = Some(format!(
                                "emergency deviation {:.2}% found during reconciliation",
                                delta.deviation_pct
                            ));
                            self.transition(StrategyState::Shutdown, "emergency deviation");
                            return;
                        }
                        self.episode = None;
                        info!(
                            "[RECOVERY] positions reconciled, net delta {:.6}",
                            delta.net_delta
                        );
                        self.transition(StrategyState::MonitoringSpreads, "reconciled");
                    }
                    Err(e) => {
                        warn!("[RECOVERY] reconciliation failed: {}", e);
                        self.record_attempt(&e, attempt);
                        if let Some(ctx) = self.episode.as_mut() {
                            let error = e;
                            self.recovery.note_failure(ctx, &error);
                        }
                    }
                }
            }
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Orderly teardown: cancel everything resting, flatten everything held,
    /// then emit the report. Flatten failures are recorded, never silently
    /// dropped.
    async fn finalize(mut self) -> SessionReport {
        info!("[CONTROLLER] shutting down, cancelling open orders");
        match self.coordinator.backend().open_orders().await {
            Ok(handles) => {
                let backend = self.coordinator.backend();
                let cancels = handles.iter().map(|h| backend.cancel_order(h));
                for (handle, outcome) in
                    handles.iter().zip(futures_util::future::join_all(cancels).await)
                {
                    if let Err(e) = outcome {
                        warn!(
                            "[CONTROLLER] failed to cancel {} on {}: {}",
                            handle.order_id, handle.venue, e
                        );
                    }
                }
            }
            Err(e) => warn!("[CONTROLLER] could not list open orders: {}", e),
        }

        for position in self.tracker.positions_snapshot() {
            if position.is_flat() {
                continue;
            }
            let side = if position.quantity > 0.0 {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            };
            let order = OrderRequest::market(
                &position.venue,
                &position.symbol,
                side,
                position.quantity.abs(),
            );
            match self.coordinator.execute_single(order).await {
                Ok(fill) => {
                    self.tracker.apply_fill(&fill);
                }
                Err(e) => {
                    error!(
                        "[CONTROLLER] could not flatten {:.4} on {} during shutdown: {}",
                        position.quantity, position.venue, e
                    );
                    self.attempt_history.push(AttemptRecord {
                        kind: e.kind(),
                        attempt: 0,
                        message: format!("shutdown flatten failed: {}", e),
                        at_ms: now_ms(),
                    });
                }
            }
        }

        self.stats.session_pnl = self.tracker.session_pnl();
        self.publish();

        let final_positions: Vec<Position> = self.tracker.positions_snapshot();
        let report = SessionReport {
            cause: self
                .shutdown_cause
                .unwrap_or_else(|| "external stop request".to_string()),
            attempt_history: self.attempt_history,
            final_net_delta: final_positions.iter().map(|p| p.quantity).sum(),
            final_positions,
            session_pnl: self.tracker.session_pnl(),
            stats: self.stats,
            ended_at: chrono::Utc::now().to_rfc3339(),
        };
        info!(
            "[CONTROLLER] session over: {} | trades {} | pnl {:.4}",
            report.cause, report.stats.trades_executed, report.session_pnl
        );
        report
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn shutdown_requested(&self) -> bool {
        *self.shutdown_rx.borrow()
    }

    /// Sleep for `wait`, returning early (false) if the stop signal arrives.
    async fn pause(&self, wait: Duration) -> bool {
        let mut rx = self.shutdown_rx.clone();
        tokio::select! {
            _ = sleep(wait) => true,
            _ = rx.wait_for(|stop| *stop) => false,
        }
    }

    fn transition(&mut self, to: StrategyState, reason: &str) {
        if !self.state.can_transition(to) {
            error!(
                "[CONTROLLER] illegal transition {:?} -> {:?} ({}), forcing shutdown",
                self.state, to, reason
            );
            self.shutdown_cause.get_or_insert_with(|| {
                format!("illegal transition {:?} -> {:?}", self.state, to)
            });
            self.state = StrategyState::Shutdown;
        } else {
            info!("[CONTROLLER] {:?} -> {:?}: {}", self.state, to, reason);
            self.state = to;
        }
        self.publish();
    }

    fn publish(&self) {
        let delta = self.tracker.state();
        let _ = self.status_tx.send(StatusSnapshot {
            state: self.state,
            net_delta: delta.net_delta,
            deviation_pct: delta.deviation_pct,
            session_pnl: self.tracker.session_pnl(),
        });
    }

    /// Route a failure: record it, count unwinds, and either enter recovery
    /// or shut down outright for fatal configuration errors.
    fn fail(&mut self, error: StrategyError) {
        let attempt = self
            .episode
            .as_ref()
            .map(|c| c.attempt_count)
            .unwrap_or(0);
        self.record_attempt(&error, attempt);

        if error.is_fatal() {
            error!("[CONTROLLER] fatal: {}", error);
            self.shutdown_cause = Some(format!("fatal: {}", error));
            self.transition(StrategyState::Shutdown, "configuration error");
            return;
        }
        if matches!(
            error,
            StrategyError::Execution(ExecutionError::PartialFill(_))
        ) {
            self.stats.unwinds += 1;
        }

        warn!("[CONTROLLER] fault ({:?}): {}", error.kind(), error);
        match self.episode.as_mut() {
            Some(ctx) => self.recovery.note_failure(ctx, &error),
            None => {
                self.stats.recovery_episodes += 1;
                self.episode = Some(self.recovery.begin(&error));
            }
        }
        self.transition(StrategyState::ErrorRecovery, "fault raised");
    }

    fn record_attempt(&mut self, error: &StrategyError, attempt: u32) {
        self.attempt_history.push(AttemptRecord {
            kind: error.kind(),
            attempt,
            message: error.to_string(),
            at_ms: now_ms(),
        });
    }

    /// Probe all three venues for fresh, valid prices.
    async fn verify_connectivity(&self) -> Result<(), StrategyError> {
        let bound = Duration::from_millis(self.cfg.freshness_bound_ms);
        let (a, b) = fetch_pair(
            &self.feed,
            &self.cfg.venue_a,
            &self.cfg.venue_b,
            &self.cfg.symbol,
            bound,
        )
        .await?;
        let hedge = timeout(
            bound,
            self.feed.latest_snapshot(&self.cfg.hedge_venue, &self.cfg.symbol),
        )
        .await
        .map_err(|_| {
            StrategyError::Connectivity(format!(
                "snapshot fetch for {} exceeded {}ms",
                self.cfg.hedge_venue, self.cfg.freshness_bound_ms
            ))
        })??;

        let now = now_ms();
        for (venue, snap) in [
            (&self.cfg.venue_a, &a),
            (&self.cfg.venue_b, &b),
            (&self.cfg.hedge_venue, &hedge),
        ] {
            if !snap.has_valid_prices() {
                return Err(StrategyError::DataFreshness(format!(
                    "invalid prices from {}",
                    venue
                )));
            }
            if !snap.is_fresh(now, self.cfg.freshness_bound_ms) {
                return Err(StrategyError::DataFreshness(format!(
                    "stale snapshot from {} ({}ms old)",
                    venue,
                    snap.age_ms(now)
                )));
            }
        }
        Ok(())
    }

    /// Overwrite local position quantities with what each venue reports.
    async fn reconcile_positions(&mut self) -> Result<(), StrategyError> {
        let backend = Arc::clone(self.coordinator.backend());
        for venue in [
            self.cfg.venue_a.clone(),
            self.cfg.venue_b.clone(),
            self.cfg.hedge_venue.clone(),
        ] {
            let live = backend
                .position_snapshot(&venue, &self.cfg.symbol)
                .await
                .map_err(|e| {
                    StrategyError::Connectivity(format!(
                        "position query on {} failed: {}",
                        venue, e
                    ))
                })?;
            self.tracker.reconcile(&venue, live);
        }
        Ok(())
    }

    /// Offset a fill with an opposing market order and drop the pair from
    /// local accounting.
    async fn flatten_position_of(&mut self, fill: &Fill) -> Result<(), StrategyError> {
        let offset = OrderRequest::market(
            &fill.venue,
            &fill.symbol,
            fill.side.flipped(),
            fill.quantity,
        );
        let offset_fill = self.coordinator.execute_single(offset).await.map_err(|_| {
            StrategyError::Consistency(format!(
                "failed to flatten {:.4} on {} after half-filled hedge",
                fill.quantity, fill.venue
            ))
        })?;
        self.tracker.apply_fill(&offset_fill);
        Ok(())
    }
}
