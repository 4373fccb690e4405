//! Bounded retry with exponential backoff.

use std::future::Future;

use tracing::warn;

use super::RetryPolicy;
use crate::telemetry;
use crate::{AtelierError, Result};

/// Execute an async operation with retry logic.
///
/// Retries only failures the policy classifies as retryable (see
/// [`RetryPolicy::is_retryable`]), up to [`RetryPolicy::attempts`] total
/// attempts. The delay starts at `initial_delay`, is multiplied by
/// `backoff_factor` after each retryable failure and is capped at
/// `max_delay`. No sleep follows the final attempt.
///
/// Non-retryable errors are returned immediately.
pub async fn with_retry<F, Fut, T>(policy: &RetryPolicy, provider: &str, mut f: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = policy.attempts();
    let mut last_err = None;
    for attempt in 0..max_attempts {
        match f().await {
            Ok(result) => return Ok(result),
            Err(e) if policy.is_retryable(&e) => {
                if attempt + 1 < max_attempts {
                    let delay = policy.delay_for_attempt(attempt);
                    metrics::counter!(telemetry::RETRIES_TOTAL,
                        "provider" => provider.to_owned(),
                    )
                    .increment(1);
                    warn!(
                        provider,
                        attempt = attempt + 1,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying after retryable error"
                    );
                    tokio::time::sleep(delay).await;
                }
                last_err = Some(e);
            }
            Err(e) => return Err(e), // not retryable
        }
    }
    Err(last_err.unwrap_or_else(|| AtelierError::NoProvider(format!("no attempt made for {provider}"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn unavailable() -> AtelierError {
        AtelierError::Provider {
            provider: "p".into(),
            status: Some(503),
            message: "unavailable".into(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn sleeps_between_attempts_only() {
        let policy = RetryPolicy {
            max_attempts: 3,
            initial_delay_seconds: 1.0,
            backoff_factor: 2.0,
            ..RetryPolicy::default()
        };
        let calls = AtomicU32::new(0);
        let start = tokio::time::Instant::now();

        let result: Result<()> = with_retry(&policy, "p", || async {
            calls.fetch_add(1, Ordering::Relaxed);
            Err(unavailable())
        })
        .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::Relaxed), 3);
        // 1s + 2s between the three attempts, nothing after the last.
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }
}
