//! Retry, deadline and circuit breaker behaviour in isolation.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use atelier::policy::{PolicyCell, parse_document};
use atelier::resilience::{
    CircuitBreakerRegistry, CircuitState, ResiliencePolicy, RetryPolicy, TimeoutPolicy,
    with_retry, with_timeout,
};
use atelier::AtelierError;

fn provider_error(status: u16) -> AtelierError {
    AtelierError::Provider {
        provider: "openai".into(),
        status: Some(status),
        message: "upstream".into(),
    }
}

// ============================================================================
// Retry
// ============================================================================

#[tokio::test]
async fn non_retryable_error_returns_immediately() {
    let calls = AtomicU32::new(0);
    let result: atelier::Result<()> = with_retry(&RetryPolicy::default(), "openai", || async {
        calls.fetch_add(1, Ordering::SeqCst);
        Err(provider_error(401))
    })
    .await;

    assert!(matches!(result, Err(AtelierError::Provider { status: Some(401), .. })));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn succeeds_after_transient_failures() {
    let calls = AtomicU32::new(0);
    let result = with_retry(&RetryPolicy::default(), "openai", || async {
        match calls.fetch_add(1, Ordering::SeqCst) {
            0 => Err(AtelierError::Connect("connection refused".into())),
            1 => Err(provider_error(429)),
            _ => Ok("done"),
        }
    })
    .await;

    assert_eq!(result.unwrap(), "done");
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn delay_is_capped_at_max_delay() {
    let policy = RetryPolicy {
        max_attempts: 4,
        initial_delay_seconds: 4.0,
        backoff_factor: 3.0,
        max_delay_seconds: 5.0,
        ..RetryPolicy::default()
    };
    let start = tokio::time::Instant::now();
    let result: atelier::Result<()> =
        with_retry(&policy, "openai", || async { Err(provider_error(503)) }).await;

    assert!(result.is_err());
    // 4s, then 5s twice (12s and 36s capped).
    assert_eq!(start.elapsed(), Duration::from_secs(14));
}

#[test]
fn exception_style_category_names_are_accepted() {
    let doc = r#"
resilience:
  retry:
    retry_on_status_codes: []
    retry_on_exceptions: ["httpx.ConnectError", "httpx.TimeoutException"]
"#;
    let policy = parse_document::<ResiliencePolicy>(doc).unwrap();
    let retry = &policy.retry;

    assert!(retry.is_retryable(&AtelierError::Connect("refused".into())));
    assert!(retry.is_retryable(&AtelierError::Timeout {
        provider: "openai".into(),
        endpoint: "/v1/images/generate".into(),
        after: Duration::from_secs(1),
    }));
    assert!(!retry.is_retryable(&provider_error(503)));
    assert!(!retry.is_retryable(&AtelierError::Http("bad body".into())));
}

#[test]
fn disabled_retry_means_one_attempt() {
    let policy = RetryPolicy {
        enabled: false,
        max_attempts: 5,
        ..RetryPolicy::default()
    };
    assert_eq!(policy.attempts(), 1);
}

// ============================================================================
// Deadlines
// ============================================================================

#[tokio::test(start_paused = true)]
async fn endpoint_deadline_wins_over_provider_deadline() {
    let doc = r#"
resilience:
  timeout:
    default_timeout_seconds: 120
    per_provider_timeouts:
      replicate: 300
    per_endpoint_timeouts:
      /v1/videos/animate: 10
"#;
    let policy = parse_document::<ResiliencePolicy>(doc).unwrap();

    let result: atelier::Result<()> =
        with_timeout(&policy.timeout, "replicate", "/v1/videos/animate", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;

    match result {
        Err(AtelierError::Timeout { after, endpoint, .. }) => {
            assert_eq!(after, Duration::from_secs(10));
            assert_eq!(endpoint, "/v1/videos/animate");
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn timed_out_attempts_are_retried() {
    let policy = ResiliencePolicy {
        timeout: TimeoutPolicy {
            default_timeout_seconds: 1,
            ..TimeoutPolicy::default()
        },
        ..ResiliencePolicy::default()
    };
    let calls = AtomicU32::new(0);

    let result = with_retry(&policy.retry, "runway", || {
        let n = calls.fetch_add(1, Ordering::SeqCst);
        with_timeout(&policy.timeout, "runway", "/v1/videos/generate", async move {
            if n == 0 {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Ok(n)
        })
    })
    .await;

    assert_eq!(result.unwrap(), 1);
}

// ============================================================================
// Circuit breaker
// ============================================================================

fn breakers(doc: &str) -> CircuitBreakerRegistry {
    CircuitBreakerRegistry::new(PolicyCell::new(parse_document(doc).unwrap()))
}

#[tokio::test(start_paused = true)]
async fn failed_probe_reopens_the_circuit() {
    let registry = breakers(
        "resilience:\n  circuit_breaker:\n    failure_threshold: 1\n    recovery_timeout_seconds: 10\n",
    );
    registry.record_failure("runway");
    assert!(!registry.can_attempt("runway"));

    tokio::time::advance(Duration::from_secs(10)).await;
    assert!(registry.can_attempt("runway"));
    assert_eq!(registry.state("runway"), CircuitState::HalfOpen);

    registry.record_failure("runway");
    assert_eq!(registry.state("runway"), CircuitState::Open);
    // The cooldown restarts from the probe failure.
    tokio::time::advance(Duration::from_secs(9)).await;
    assert!(!registry.can_attempt("runway"));
}

#[tokio::test(start_paused = true)]
async fn half_open_admits_a_bounded_number_of_probes() {
    let registry = breakers(
        r#"
resilience:
  circuit_breaker:
    failure_threshold: 1
    recovery_timeout_seconds: 5
    success_threshold: 2
    half_open_max_calls: 2
"#,
    );
    registry.record_failure("openai");
    tokio::time::advance(Duration::from_secs(5)).await;

    assert!(registry.can_attempt("openai"));
    assert!(registry.can_attempt("openai"));
    assert!(!registry.can_attempt("openai"));
    assert_eq!(registry.state("openai"), CircuitState::HalfOpen);

    registry.record_success("openai");
    registry.record_success("openai");
    assert_eq!(registry.state("openai"), CircuitState::Closed);
}
