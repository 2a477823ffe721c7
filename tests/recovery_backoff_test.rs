/// Recovery policy: classification, capped backoff, and episode lifecycle.
///
/// Verifies that:
/// 1. Errors classify to the kinds the recovery policy keys on
/// 2. Backoff grows linearly with the attempt number and caps out
/// 3. Logic and partial-fill faults demand reconciliation before retry
/// 4. An episode becomes unrecoverable once attempts are exhausted
/// 5. A different error mid-episode changes the policy, not the counter
use delta_arb::strategy::error::{ErrorKind, ExecutionError, StrategyError};
use delta_arb::strategy::recovery::{RecoveryManager, RecoveryOutcome};
use std::time::Duration;

fn manager(max_attempts: u32) -> RecoveryManager {
    RecoveryManager::new(
        Duration::from_millis(100),
        Duration::from_millis(450),
        max_attempts,
    )
}

#[test]
fn classification_matches_recovery_policy() {
    let cases = [
        (
            StrategyError::Connectivity("ws dropped".into()),
            ErrorKind::Network,
        ),
        (
            StrategyError::DataFreshness("old book".into()),
            ErrorKind::Data,
        ),
        (
            StrategyError::Execution(ExecutionError::Rejected("margin".into())),
            ErrorKind::Api,
        ),
        (
            StrategyError::Execution(ExecutionError::Timeout("slow venue".into())),
            ErrorKind::Network,
        ),
        (
            StrategyError::Execution(ExecutionError::PartialFill("one leg".into())),
            ErrorKind::PartialFill,
        ),
        (
            StrategyError::Consistency("delta mismatch".into()),
            ErrorKind::Logic,
        ),
    ];
    for (error, expected) in cases {
        assert_eq!(RecoveryManager::classify(&error), expected, "{}", error);
    }
    assert!(StrategyError::Configuration("bad threshold".into()).is_fatal());
    assert!(!StrategyError::Connectivity("x".into()).is_fatal());
}

#[test]
fn backoff_is_linear_up_to_the_cap() {
    let m = manager(10);
    assert_eq!(m.backoff_wait(1), Duration::from_millis(100));
    assert_eq!(m.backoff_wait(2), Duration::from_millis(200));
    assert_eq!(m.backoff_wait(4), Duration::from_millis(400));
    // Attempts 5 and beyond are capped.
    assert_eq!(m.backoff_wait(5), Duration::from_millis(450));
    assert_eq!(m.backoff_wait(50), Duration::from_millis(450));
}

#[test]
fn transient_faults_retry_and_structural_faults_reconcile() {
    let m = manager(10);

    let mut ctx = m.begin(&StrategyError::Connectivity("down".into()));
    assert!(matches!(
        m.attempt_recovery(&mut ctx),
        RecoveryOutcome::Retry { .. }
    ));

    let mut ctx = m.begin(&StrategyError::Execution(ExecutionError::PartialFill(
        "one leg".into(),
    )));
    assert!(matches!(
        m.attempt_recovery(&mut ctx),
        RecoveryOutcome::Reconcile { .. }
    ));

    let mut ctx = m.begin(&StrategyError::Consistency("drift".into()));
    assert!(matches!(
        m.attempt_recovery(&mut ctx),
        RecoveryOutcome::Reconcile { .. }
    ));
}

#[test]
fn episode_exhausts_after_max_attempts() {
    let m = manager(3);
    let mut ctx = m.begin(&StrategyError::Connectivity("down".into()));

    for attempt in 1..=3u32 {
        match m.attempt_recovery(&mut ctx) {
            RecoveryOutcome::Retry { wait } => {
                assert_eq!(wait, m.backoff_wait(attempt));
            }
            other => panic!("attempt {} should retry, got {:?}", attempt, other),
        }
    }
    assert_eq!(m.attempt_recovery(&mut ctx), RecoveryOutcome::Unrecoverable);
}

#[test]
fn error_kind_change_mid_episode_keeps_the_counter() {
    let m = manager(5);
    let mut ctx = m.begin(&StrategyError::Connectivity("down".into()));
    assert!(matches!(
        m.attempt_recovery(&mut ctx),
        RecoveryOutcome::Retry { .. }
    ));
    assert_eq!(ctx.attempt_count, 1);

    // The next failure is structural; the episode continues, escalated.
    m.note_failure(
        &mut ctx,
        &StrategyError::Consistency("positions disagree".into()),
    );
    match m.attempt_recovery(&mut ctx) {
        RecoveryOutcome::Reconcile { wait } => {
            assert_eq!(ctx.attempt_count, 2);
            assert_eq!(wait, m.backoff_wait(2));
        }
        other => panic!("expected reconcile, got {:?}", other),
    }
}
