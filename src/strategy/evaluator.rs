use crate::strategy::error::StrategyError;
use crate::strategy::market_data::{fetch_pair, MarketDataFeed};
use crate::strategy::spread_monitor::observe_pair;
use crate::strategy::types::{now_ms, ArbitrageOpportunity, NetDeltaState, SpreadObservation};
use log::{debug, info};
use std::sync::Arc;
use std::time::Duration;

/// Pluggable confidence scoring. Input is the recent spread stability in
/// [0, 1] from the monitor window; output must be in [0, 1].
pub trait ConfidenceScorer: Send + Sync {
    fn score(&self, stability: f64) -> f64;
}

/// Default scorer: confidence tracks stability directly, clamped to [0, 1].
pub struct StabilityScorer;

impl ConfidenceScorer for StabilityScorer {
    fn score(&self, stability: f64) -> f64 {
        stability.clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone)]
pub struct EvaluatorConfig {
    pub venue_a: String,
    pub venue_b: String,
    pub symbol: String,
    pub entry_threshold_pct: f64,
    pub confirm_tolerance_pct: f64,
    pub confidence_floor: f64,
    pub min_trade_quantity: f64,
    pub max_trade_quantity: f64,
    /// Combined fees for both legs, as a percentage of notional.
    pub total_fee_pct: f64,
    pub rebalance_threshold_pct: f64,
    pub freshness_bound_ms: u64,
}

/// Validates a candidate spread immediately before execution. The two-phase
/// check (signal, then an independent fresh confirm read) is the core
/// anti-staleness safeguard: the triggering observation is never reused.
pub struct OpportunityEvaluator {
    feed: Arc<dyn MarketDataFeed>,
    scorer: Arc<dyn ConfidenceScorer>,
    cfg: EvaluatorConfig,
}

impl OpportunityEvaluator {
    pub fn new(
        feed: Arc<dyn MarketDataFeed>,
        scorer: Arc<dyn ConfidenceScorer>,
        cfg: EvaluatorConfig,
    ) -> Self {
        Self { feed, scorer, cfg }
    }

    /// Validate `observation` against freshness, threshold, liquidity and
    /// confidence rules, then confirm it against a second independent read
    /// of live prices. `Ok(None)` means "no tradable opportunity"; errors are
    /// reserved for collaborator failures.
    pub async fn evaluate(
        &self,
        observation: &SpreadObservation,
        stability: f64,
        delta: &NetDeltaState,
    ) -> Result<Option<ArbitrageOpportunity>, StrategyError> {
        let cfg = &self.cfg;

        if observation.age_ms(now_ms()) > cfg.freshness_bound_ms {
            debug!("[EVALUATOR] signal expired before validation");
            return Ok(None);
        }
        if observation.spread_pct < cfg.entry_threshold_pct {
            return Ok(None);
        }
        if observation.buy_liquidity() < cfg.min_trade_quantity
            || observation.sell_liquidity() < cfg.min_trade_quantity
        {
            debug!(
                "[EVALUATOR] rejected: liquidity {:.4}/{:.4} below minimum {:.4}",
                observation.buy_liquidity(),
                observation.sell_liquidity(),
                cfg.min_trade_quantity
            );
            return Ok(None);
        }
        // Exposure already drifting: rebalancing takes priority over new risk.
        if delta.deviation_pct >= cfg.rebalance_threshold_pct {
            debug!(
                "[EVALUATOR] rejected: deviation {:.2}% at rebalance threshold",
                delta.deviation_pct
            );
            return Ok(None);
        }

        let confidence = self.scorer.score(stability).clamp(0.0, 1.0);
        if confidence < cfg.confidence_floor {
            debug!(
                "[EVALUATOR] rejected: confidence {:.2} below floor {:.2}",
                confidence, cfg.confidence_floor
            );
            return Ok(None);
        }

        // Second, independent fresh read. Re-fetching live prices is
        // mandatory here; the signal observation is already latency-stale
        // with respect to execution.
        let (a, b) = fetch_pair(
            &self.feed,
            &cfg.venue_a,
            &cfg.venue_b,
            &cfg.symbol,
            Duration::from_millis(cfg.freshness_bound_ms),
        )
        .await?;

        let confirm = match observe_pair(&a, &b, now_ms(), cfg.freshness_bound_ms) {
            Some(obs) => obs,
            None => {
                debug!("[EVALUATOR] confirm read stale, discarding opportunity");
                return Ok(None);
            }
        };

        if confirm.direction != observation.direction
            || (confirm.spread_pct - observation.spread_pct).abs() > cfg.confirm_tolerance_pct
        {
            info!(
                "[EVALUATOR] confirm disagreed with signal ({:.3}% vs {:.3}%), discarding",
                confirm.spread_pct, observation.spread_pct
            );
            return Ok(None);
        }
        if confirm.spread_pct < cfg.entry_threshold_pct {
            return Ok(None);
        }

        let max_tradable = confirm
            .buy_liquidity()
            .min(confirm.sell_liquidity())
            .min(cfg.max_trade_quantity);
        if max_tradable < cfg.min_trade_quantity {
            return Ok(None);
        }
        let quantity = max_tradable;

        let buy_price = confirm.buy_price();
        let sell_price = confirm.sell_price();
        let estimated_net_pnl =
            quantity * buy_price * (confirm.spread_pct - cfg.total_fee_pct) / 100.0;
        if estimated_net_pnl <= 0.0 {
            debug!(
                "[EVALUATOR] rejected: unprofitable after fees ({:.3}% - {:.3}%)",
                confirm.spread_pct, cfg.total_fee_pct
            );
            return Ok(None);
        }

        let (buy_venue, sell_venue) = match confirm.direction {
            crate::strategy::types::SpreadDirection::BuyASellB => {
                (cfg.venue_a.clone(), cfg.venue_b.clone())
            }
            crate::strategy::types::SpreadDirection::BuyBSellA => {
                (cfg.venue_b.clone(), cfg.venue_a.clone())
            }
        };

        info!(
            "[EVALUATOR] {} | spread {:.3}% | confidence {:.2} | qty {:.4} | est pnl {:.2}",
            cfg.symbol, confirm.spread_pct, confidence, quantity, estimated_net_pnl
        );

        Ok(Some(ArbitrageOpportunity {
            symbol: cfg.symbol.clone(),
            buy_venue,
            sell_venue,
            buy_price,
            sell_price,
            spread_pct: confirm.spread_pct,
            direction: confirm.direction,
            max_tradable_quantity: max_tradable,
            quantity,
            estimated_net_pnl,
            confidence_score: confidence,
            signal_ts_ms: observation.timestamp_ms,
        }))
    }
}
