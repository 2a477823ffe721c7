use crate::strategy::error::StrategyError;
use crate::strategy::execution::UnwindPolicy;
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Strategy configuration. Loaded from environment variables over built-in
/// defaults; a malformed or inconsistent value is a configuration error,
/// which is fatal and never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub venue_a: String,
    pub venue_b: String,
    pub hedge_venue: String,
    pub symbol: String,

    /// Size of each hedge leg; the denominator for delta deviation.
    pub base_position_size: f64,
    pub entry_threshold_pct: f64,
    pub confirm_tolerance_pct: f64,
    pub confidence_floor: f64,
    pub min_trade_quantity: f64,
    pub max_trade_quantity: f64,
    /// Combined taker + maker fees for one dual-leg trade, pct of notional.
    pub total_fee_pct: f64,

    pub freshness_bound_ms: u64,
    pub spread_window: usize,
    pub monitor_interval_ms: u64,

    pub rebalance_threshold_pct: f64,
    pub emergency_deviation_pct: f64,
    pub max_rebalance_interval_secs: u64,

    pub leg_fill_timeout_ms: u64,
    pub single_leg_timeout_ms: u64,
    pub order_poll_interval_ms: u64,
    pub unwind_policy: UnwindPolicy,

    pub init_timeout_secs: u64,
    pub hedge_timeout_secs: u64,

    pub max_recovery_attempts: u32,
    pub recovery_base_delay_ms: u64,
    pub recovery_max_delay_ms: u64,
}

impl StrategyConfig {
    pub fn default_paper() -> Self {
        Self {
            venue_a: "alpha".to_string(),
            venue_b: "beta".to_string(),
            hedge_venue: "hedge".to_string(),
            symbol: "BTCUSDT".to_string(),
            base_position_size: 1.0,
            entry_threshold_pct: 0.5,
            confirm_tolerance_pct: 0.1,
            confidence_floor: 0.3,
            min_trade_quantity: 0.01,
            max_trade_quantity: 0.5,
            total_fee_pct: 0.1,
            freshness_bound_ms: 2_000,
            spread_window: 600,
            monitor_interval_ms: 250,
            rebalance_threshold_pct: 5.0,
            emergency_deviation_pct: 15.0,
            max_rebalance_interval_secs: 300,
            leg_fill_timeout_ms: 80,
            single_leg_timeout_ms: 1_000,
            order_poll_interval_ms: 5,
            unwind_policy: UnwindPolicy::CancelFirst,
            init_timeout_secs: 10,
            hedge_timeout_secs: 15,
            max_recovery_attempts: 5,
            recovery_base_delay_ms: 500,
            recovery_max_delay_ms: 10_000,
        }
    }

    /// Build from `ARB_*` environment variables over the paper defaults.
    pub fn from_env() -> Result<Self, StrategyError> {
        let d = Self::default_paper();
        let cfg = Self {
            venue_a: env_str("ARB_VENUE_A", &d.venue_a),
            venue_b: env_str("ARB_VENUE_B", &d.venue_b),
            hedge_venue: env_str("ARB_HEDGE_VENUE", &d.hedge_venue),
            symbol: env_str("ARB_SYMBOL", &d.symbol),
            base_position_size: env_f64("ARB_BASE_POSITION_SIZE", d.base_position_size)?,
            entry_threshold_pct: env_f64("ARB_ENTRY_THRESHOLD_PCT", d.entry_threshold_pct)?,
            confirm_tolerance_pct: env_f64("ARB_CONFIRM_TOLERANCE_PCT", d.confirm_tolerance_pct)?,
            confidence_floor: env_f64("ARB_CONFIDENCE_FLOOR", d.confidence_floor)?,
            min_trade_quantity: env_f64("ARB_MIN_TRADE_QTY", d.min_trade_quantity)?,
            max_trade_quantity: env_f64("ARB_MAX_TRADE_QTY", d.max_trade_quantity)?,
            total_fee_pct: env_f64("ARB_TOTAL_FEE_PCT", d.total_fee_pct)?,
            freshness_bound_ms: env_u64("ARB_FRESHNESS_BOUND_MS", d.freshness_bound_ms)?,
            spread_window: env_u64("ARB_SPREAD_WINDOW", d.spread_window as u64)? as usize,
            monitor_interval_ms: env_u64("ARB_MONITOR_INTERVAL_MS", d.monitor_interval_ms)?,
            rebalance_threshold_pct: env_f64(
                "ARB_REBALANCE_THRESHOLD_PCT",
                d.rebalance_threshold_pct,
            )?,
            emergency_deviation_pct: env_f64(
                "ARB_EMERGENCY_DEVIATION_PCT",
                d.emergency_deviation_pct,
            )?,
            max_rebalance_interval_secs: env_u64(
                "ARB_MAX_REBALANCE_INTERVAL_SECS",
                d.max_rebalance_interval_secs,
            )?,
            leg_fill_timeout_ms: env_u64("ARB_LEG_FILL_TIMEOUT_MS", d.leg_fill_timeout_ms)?,
            single_leg_timeout_ms: env_u64("ARB_SINGLE_LEG_TIMEOUT_MS", d.single_leg_timeout_ms)?,
            order_poll_interval_ms: env_u64(
                "ARB_ORDER_POLL_INTERVAL_MS",
                d.order_poll_interval_ms,
            )?,
            unwind_policy: env_unwind_policy("ARB_UNWIND_POLICY", d.unwind_policy)?,
            init_timeout_secs: env_u64("ARB_INIT_TIMEOUT_SECS", d.init_timeout_secs)?,
            hedge_timeout_secs: env_u64("ARB_HEDGE_TIMEOUT_SECS", d.hedge_timeout_secs)?,
            max_recovery_attempts: env_u64(
                "ARB_MAX_RECOVERY_ATTEMPTS",
                d.max_recovery_attempts as u64,
            )? as u32,
            recovery_base_delay_ms: env_u64(
                "ARB_RECOVERY_BASE_DELAY_MS",
                d.recovery_base_delay_ms,
            )?,
            recovery_max_delay_ms: env_u64("ARB_RECOVERY_MAX_DELAY_MS", d.recovery_max_delay_ms)?,
        };
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), StrategyError> {
        if self.base_position_size <= 0.0 {
            return Err(StrategyError::Configuration(
                "base_position_size must be positive".to_string(),
            ));
        }
        if self.entry_threshold_pct <= 0.0 {
            return Err(StrategyError::Configuration(
                "entry_threshold_pct must be positive".to_string(),
            ));
        }
        if self.min_trade_quantity <= 0.0 || self.max_trade_quantity < self.min_trade_quantity {
            return Err(StrategyError::Configuration(
                "trade quantity bounds are inverted".to_string(),
            ));
        }
        if self.emergency_deviation_pct <= self.rebalance_threshold_pct {
            return Err(StrategyError::Configuration(
                "emergency_deviation_pct must exceed rebalance_threshold_pct".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.confidence_floor) {
            return Err(StrategyError::Configuration(
                "confidence_floor must be in [0, 1]".to_string(),
            ));
        }
        if self.venue_a == self.venue_b {
            return Err(StrategyError::Configuration(
                "venue_a and venue_b must differ".to_string(),
            ));
        }
        if self.max_recovery_attempts == 0 {
            return Err(StrategyError::Configuration(
                "max_recovery_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    pub fn leg_fill_timeout(&self) -> Duration {
        Duration::from_millis(self.leg_fill_timeout_ms)
    }

    pub fn single_leg_timeout(&self) -> Duration {
        Duration::from_millis(self.single_leg_timeout_ms)
    }

    pub fn order_poll_interval(&self) -> Duration {
        Duration::from_millis(self.order_poll_interval_ms)
    }

    pub fn monitor_interval(&self) -> Duration {
        Duration::from_millis(self.monitor_interval_ms)
    }

    pub fn max_rebalance_interval(&self) -> Duration {
        Duration::from_secs(self.max_rebalance_interval_secs)
    }

    pub fn init_timeout(&self) -> Duration {
        Duration::from_secs(self.init_timeout_secs)
    }

    pub fn hedge_timeout(&self) -> Duration {
        Duration::from_secs(self.hedge_timeout_secs)
    }

    pub fn recovery_base_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_base_delay_ms)
    }

    pub fn recovery_max_delay(&self) -> Duration {
        Duration::from_millis(self.recovery_max_delay_ms)
    }
}

fn env_str(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_f64(key: &str, default: f64) -> Result<f64, StrategyError> {
    match env::var(key) {
        Ok(raw) => raw
            .parse::<f64>()
            .map_err(|_| StrategyError::Configuration(format!("{} is not a number: {}", key, raw))),
        Err(_) => Ok(default),
    }
}

fn env_u64(key: &str, default: u64) -> Result<u64, StrategyError> {
    match env::var(key) {
        Ok(raw) => raw.parse::<u64>().map_err(|_| {
            StrategyError::Configuration(format!("{} is not an integer: {}", key, raw))
        }),
        Err(_) => Ok(default),
    }
}

fn env_unwind_policy(key: &str, default: UnwindPolicy) -> Result<UnwindPolicy, StrategyError> {
    match env::var(key) {
        Ok(raw) => raw.parse::<UnwindPolicy>().map_err(StrategyError::Configuration),
        Err(_) => Ok(default),
    }
}
