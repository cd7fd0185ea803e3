//! Tests for the retry strategy and backoff presets.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;

use muster::error::{MusterError, Result};
use muster::util::backoff::{BackoffStrategy, RetryConfig};
use muster::util::retry::RetryStrategy;

fn counting<T: Send + 'static>(
    calls: &Arc<AtomicU32>,
    outcome: impl Fn(u32) -> Result<T> + Send + Sync + 'static,
) -> impl FnMut() -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<T>> + Send>> {
    let calls = Arc::clone(calls);
    let outcome = Arc::new(outcome);
    move || {
        let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = Arc::clone(&outcome);
        Box::pin(async move { outcome(call) })
    }
}

#[tokio::test(start_paused = true)]
async fn fixed_policy_recovers_on_third_attempt() {
    let config = RetryConfig::fixed()
        .with_base_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_millis(100));
    let mut strategy = RetryStrategy::new(config).unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    let value = strategy
        .execute(counting(&calls, |call| {
            if call < 3 {
                Err(MusterError::Timeout(10))
            } else {
                Ok(format!("call {call}"))
            }
        }))
        .await
        .unwrap();

    assert_eq!(value, "call 3");
    assert_eq!(strategy.attempts().len(), 2);
    assert_eq!(
        strategy
            .attempts()
            .iter()
            .map(|a| a.attempt)
            .collect::<Vec<_>>(),
        vec![1, 2]
    );
}

#[tokio::test(start_paused = true)]
async fn always_failing_recoverable_operation_uses_every_attempt() {
    for max_attempts in [1, 2, 5] {
        let config = RetryConfig::immediate().with_max_attempts(max_attempts);
        let mut strategy = RetryStrategy::new(config).unwrap().for_server("fs");
        let calls = Arc::new(AtomicU32::new(0));

        let err = strategy
            .execute(counting(&calls, |_| {
                Err::<(), _>(MusterError::connection_failed("fs", "refused"))
            }))
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), max_attempts);
        assert_eq!(strategy.attempts().len() as u32, max_attempts);
        match err {
            MusterError::RetryExhausted {
                server,
                attempts,
                last_error,
                history,
            } => {
                assert_eq!(server.as_deref(), Some("fs"));
                assert_eq!(attempts, max_attempts);
                assert!(matches!(*last_error, MusterError::ConnectionFailed { .. }));
                assert_eq!(history.len() as u32, max_attempts);
            }
            other => panic!("expected exhaustion, got {other:?}"),
        }
    }
}

#[tokio::test(start_paused = true)]
async fn non_recoverable_error_stops_after_one_attempt() {
    let mut strategy = RetryStrategy::new(RetryConfig::fast()).unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    let err = strategy
        .execute(counting(&calls, |_| {
            Err::<(), _>(MusterError::Configuration("bad command".into()))
        }))
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(strategy.attempts().len(), 1);
    assert!(matches!(err, MusterError::RetryExhausted { attempts: 1, .. }));
}

#[tokio::test(start_paused = true)]
async fn custom_predicate_overrides_default_classification() {
    let mut strategy = RetryStrategy::new(RetryConfig::immediate())
        .unwrap()
        .with_predicate(|err: &MusterError| matches!(err, MusterError::ToolExecution { .. }));
    let calls = Arc::new(AtomicU32::new(0));

    let value = strategy
        .execute(counting(&calls, |call| {
            if call == 1 {
                Err(MusterError::ToolExecution {
                    tool_name: "read".into(),
                    message: "busy".into(),
                })
            } else {
                Ok(call)
            }
        }))
        .await
        .unwrap();
    assert_eq!(value, 2);
}

#[tokio::test(start_paused = true)]
async fn total_budget_produces_recovery_timeout() {
    let config = RetryConfig::linear()
        .with_max_attempts(50)
        .with_max_total_time(Some(Duration::from_millis(2_500)));
    let mut strategy = RetryStrategy::new(config).unwrap().for_server("db");
    let calls = Arc::new(AtomicU32::new(0));

    let err = strategy
        .execute(counting(&calls, |_| Err::<(), _>(MusterError::Timeout(5))))
        .await
        .unwrap_err();

    match err {
        MusterError::RecoveryTimeout {
            server,
            budget_ms,
            elapsed_ms,
            ..
        } => {
            assert_eq!(server.as_deref(), Some("db"));
            assert_eq!(budget_ms, 2_500);
            assert!(elapsed_ms >= 2_500);
        }
        other => panic!("expected recovery timeout, got {other:?}"),
    }
    // Linear delays of 1s and 2s exhaust the 2.5s budget after the second failure.
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[test]
fn exponential_without_jitter_is_monotonic_and_capped() {
    let config = RetryConfig::exponential_with_jitter()
        .with_jitter(0.0)
        .with_base_delay(Duration::from_millis(100))
        .with_max_delay(Duration::from_secs(3))
        .with_multiplier(2.0);
    let err = MusterError::Timeout(1);

    let mut previous = Duration::ZERO;
    for attempt in 1..=12u32 {
        let delay = config.delay_for(attempt, &err);
        let expected = Duration::from_millis(100 * 2u64.pow(attempt - 1)).min(Duration::from_secs(3));
        assert_eq!(delay, expected, "attempt {attempt}");
        assert!(delay >= previous);
        previous = delay;
    }
}

#[test]
fn jitter_stays_within_bounds() {
    let config = RetryConfig::fixed().with_jitter(0.5);
    let err = MusterError::Timeout(1);
    for attempt in 1..=100 {
        let delay = config.delay_for(attempt, &err);
        assert!(delay >= Duration::from_secs(1), "{delay:?}");
        assert!(delay <= Duration::from_secs(3), "{delay:?}");
    }
}

#[test]
fn custom_delay_function_receives_attempt_and_error() {
    let config = RetryConfig::custom(4, |attempt, err| match err {
        MusterError::Timeout(ms) => Duration::from_millis(*ms * u64::from(attempt)),
        _ => Duration::ZERO,
    });
    assert!(matches!(config.strategy, BackoffStrategy::Custom(_)));
    assert_eq!(
        config.delay_for(3, &MusterError::Timeout(20)),
        Duration::from_millis(60)
    );
    assert_eq!(
        config.delay_for(3, &MusterError::NotFound("x".into())),
        Duration::ZERO
    );
}

#[test]
fn presets_validate_and_bad_configs_are_rejected() {
    for preset in [
        RetryConfig::exponential_with_jitter(),
        RetryConfig::linear(),
        RetryConfig::fixed(),
        RetryConfig::immediate(),
        RetryConfig::fast(),
    ] {
        assert!(RetryStrategy::new(preset).is_ok());
    }

    let bad = [
        RetryConfig::fast().with_max_attempts(0),
        RetryConfig::fast().with_max_delay(Duration::from_millis(1)),
        RetryConfig::fast().with_multiplier(0.0),
        RetryConfig::fast().with_jitter(1.5),
    ];
    for config in bad {
        let err = RetryStrategy::new(config).unwrap_err();
        assert!(matches!(err, MusterError::Configuration(_)));
    }
}
