use crate::strategy::error::{ErrorKind, StrategyError};
use crate::strategy::types::now_ms;
use log::warn;
use std::time::Duration;

/// Created on the first failure of a fault episode, discarded on successful
/// recovery or shutdown.
#[derive(Debug, Clone)]
pub struct RecoveryContext {
    pub attempt_count: u32,
    pub max_attempts: u32,
    pub last_error_kind: ErrorKind,
    pub backoff_until_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// Wait out the backoff, then re-probe the failed collaborator.
    Retry { wait: Duration },
    /// Wait, then force a position reconciliation against live venue state
    /// before anything else resumes.
    Reconcile { wait: Duration },
    /// Attempts exhausted; the only remaining transition is shutdown.
    Unrecoverable,
}

/// Classifies faults and applies the per-kind recovery policy with capped
/// backoff.
pub struct RecoveryManager {
    base_delay: Duration,
    max_delay: Duration,
    max_attempts: u32,
}

impl RecoveryManager {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
        }
    }

    pub fn classify(error: &StrategyError) -> ErrorKind {
        error.kind()
    }

    /// Start a fault episode from its first error.
    pub fn begin(&self, error: &StrategyError) -> RecoveryContext {
        RecoveryContext {
            attempt_count: 0,
            max_attempts: self.max_attempts,
            last_error_kind: Self::classify(error),
            backoff_until_ms: now_ms(),
        }
    }

    /// Fold a further failure into an ongoing episode. The attempt counter
    /// keeps climbing across error kinds; a fault episode ends only in
    /// recovery or shutdown.
    pub fn note_failure(&self, context: &mut RecoveryContext, error: &StrategyError) {
        context.last_error_kind = Self::classify(error);
    }

    /// `wait = min(attempt * base_delay, max_delay)`; non-decreasing in the
    /// attempt number up to the cap.
    pub fn backoff_wait(&self, attempt: u32) -> Duration {
        let scaled = self.base_delay.saturating_mul(attempt.max(1));
        scaled.min(self.max_delay)
    }

    /// Consume one attempt and decide what to do next. `Logic` and
    /// `PartialFill` faults must reconcile positions before any retry; the
    /// transient kinds go straight to a re-probe.
    pub fn attempt_recovery(&self, context: &mut RecoveryContext) -> RecoveryOutcome {
        context.attempt_count += 1;
        if context.attempt_count > context.max_attempts {
            warn!(
                "[RECOVERY] attempts exhausted ({}/{}), unrecoverable",
                context.attempt_count - 1,
                context.max_attempts
            );
            return RecoveryOutcome::Unrecoverable;
        }

        let wait = self.backoff_wait(context.attempt_count);
        context.backoff_until_ms = now_ms() + wait.as_millis() as u64;
        match context.last_error_kind {
            ErrorKind::Logic | ErrorKind::PartialFill => RecoveryOutcome::Reconcile { wait },
            ErrorKind::Network | ErrorKind::Api | ErrorKind::Data => {
                RecoveryOutcome::Retry { wait }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::error::ExecutionError;

    fn manager() -> RecoveryManager {
        RecoveryManager::new(Duration::from_millis(100), Duration::from_millis(350), 3)
    }

    #[test]
    fn backoff_scales_linearly_and_caps() {
        let m = manager();
        assert_eq!(m.backoff_wait(1), Duration::from_millis(100));
        assert_eq!(m.backoff_wait(2), Duration::from_millis(200));
        assert_eq!(m.backoff_wait(3), Duration::from_millis(300));
        assert_eq!(m.backoff_wait(4), Duration::from_millis(350));
        assert_eq!(m.backoff_wait(100), Duration::from_millis(350));
    }

    #[test]
    fn transient_errors_retry_then_exhaust() {
        let m = manager();
        let err = StrategyError::Connectivity("socket closed".to_string());
        let mut ctx = m.begin(&err);

        for attempt in 1..=3u32 {
            match m.attempt_recovery(&mut ctx) {
                RecoveryOutcome::Retry { wait } => {
                    assert_eq!(wait, m.backoff_wait(attempt));
                }
                other => panic!("expected retry, got {:?}", other),
            }
        }
        assert_eq!(m.attempt_recovery(&mut ctx), RecoveryOutcome::Unrecoverable);
    }

    #[test]
    fn partial_fill_forces_reconciliation() {
        let m = manager();
        let err = StrategyError::Execution(ExecutionError::PartialFill("maker leg".to_string()));
        let mut ctx = m.begin(&err);
        assert!(matches!(
            m.attempt_recovery(&mut ctx),
            RecoveryOutcome::Reconcile { .. }
        ));
    }

    #[test]
    fn classification_covers_the_taxonomy() {
        assert_eq!(
            RecoveryManager::classify(&StrategyError::Connectivity(String::new())),
            ErrorKind::Network
        );
        assert_eq!(
            RecoveryManager::classify(&StrategyError::DataFreshness(String::new())),
            ErrorKind::Data
        );
        assert_eq!(
            RecoveryManager::classify(&StrategyError::Execution(ExecutionError::Rejected(
                String::new()
            ))),
            ErrorKind::Api
        );
        assert_eq!(
            RecoveryManager::classify(&StrategyError::Execution(ExecutionError::Timeout(
                String::new()
            ))),
            ErrorKind::Network
        );
        assert_eq!(
            RecoveryManager::classify(&StrategyError::Consistency(String::new())),
            ErrorKind::Logic
        );
    }

    #[test]
    fn later_errors_update_the_kind_not_the_count() {
        let m = manager();
        let mut ctx = m.begin(&StrategyError::Connectivity("down".to_string()));
        m.attempt_recovery(&mut ctx);
        m.note_failure(
            &mut ctx,
            &StrategyError::Execution(ExecutionError::PartialFill("leg".to_string())),
        );
        assert_eq!(ctx.attempt_count, 1);
        assert_eq!(ctx.last_error_kind, ErrorKind::PartialFill);
    }
}
