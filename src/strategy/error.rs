use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy for the strategy core. Transient kinds are retried with
/// bounded backoff by the recovery manager; `Consistency` forces a position
/// reconciliation before any retry; `Configuration` is fatal and never
/// retried.
#[derive(Debug, Error)]
pub enum StrategyError {
    #[error("connectivity: {0}")]
    Connectivity(String),

    #[error("stale market data: {0}")]
    DataFreshness(String),

    #[error("execution: {0}")]
    Execution(#[from] ExecutionError),

    #[error("consistency: {0}")]
    Consistency(String),

    #[error("configuration: {0}")]
    Configuration(String),
}

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("timed out {0}")]
    Timeout(String),

    #[error("partial fill: {0}")]
    PartialFill(String),
}

/// Coarse error kind used by the recovery policy.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ErrorKind {
    Network,
    Api,
    Data,
    Logic,
    PartialFill,
}

impl StrategyError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            StrategyError::Connectivity(_) => ErrorKind::Network,
            StrategyError::DataFreshness(_) => ErrorKind::Data,
            StrategyError::Execution(ExecutionError::Rejected(_)) => ErrorKind::Api,
            StrategyError::Execution(ExecutionError::Timeout(_)) => ErrorKind::Network,
            StrategyError::Execution(ExecutionError::PartialFill(_)) => ErrorKind::PartialFill,
            StrategyError::Consistency(_) => ErrorKind::Logic,
            // Never reaches the recovery manager; the controller shuts down
            // directly on configuration errors.
            StrategyError::Configuration(_) => ErrorKind::Logic,
        }
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, StrategyError::Configuration(_))
    }
}
