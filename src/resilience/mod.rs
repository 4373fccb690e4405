//! Per-attempt resilience controls: circuit breaking, retry with backoff,
//! deadlines, and degradation to a last-resort provider.
//!
//! The pieces compose around a single provider attempt:
//!
//! ```text
//! breaker.can_attempt(provider)?
//!     └─ with_retry(policy.retry)
//!           └─ with_timeout(policy.timeout)
//!                 └─ provider call
//! breaker.record_success / record_failure
//! ```
//!
//! The router's fallback loop sits outside this stack and moves to the
//! next provider when the whole stack fails.

pub mod circuit_breaker;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{CircuitBreakerRegistry, CircuitSnapshot, CircuitState};
pub use retry::with_retry;
pub use timeout::with_timeout;

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;

use crate::AtelierError;
use crate::policy::{Policy, PolicyDomain};

// ============================================================================
// Retry
// ============================================================================

fn enabled() -> bool {
    true
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay() -> f64 {
    0.5
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_delay() -> f64 {
    10.0
}

fn default_status_codes() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}

fn default_categories() -> Vec<String> {
    vec!["connect".into(), "timeout".into()]
}

/// Retry behaviour for a single provider attempt.
#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Attempts including the first. Default: 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay")]
    pub initial_delay_seconds: f64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_delay")]
    pub max_delay_seconds: f64,
    #[serde(default = "default_status_codes")]
    pub retry_on_status_codes: Vec<u16>,
    /// Failure categories (`connect`, `timeout`, `http`, ...) that are retried.
    /// Exception-style names such as `ConnectError` or
    /// `httpx.TimeoutException` are accepted and reduced to their category.
    #[serde(default = "default_categories", alias = "retry_on_exceptions")]
    pub retry_on_categories: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: default_max_attempts(),
            initial_delay_seconds: default_initial_delay(),
            backoff_factor: default_backoff_factor(),
            max_delay_seconds: default_max_delay(),
            retry_on_status_codes: default_status_codes(),
            retry_on_categories: default_categories(),
        }
    }
}

/// `httpx.ConnectError` → `connect`, `TimeoutException` → `timeout`.
fn category_of(name: &str) -> String {
    let last = name.rsplit('.').next().unwrap_or(name).to_ascii_lowercase();
    last.trim_end_matches("exception")
        .trim_end_matches("error")
        .trim_end_matches('_')
        .to_string()
}

impl RetryPolicy {
    /// Effective attempt bound: one when retry is disabled.
    pub fn attempts(&self) -> u32 {
        if self.enabled {
            self.max_attempts.max(1)
        } else {
            1
        }
    }

    /// Delay before retry number `retry` (0-indexed):
    /// `initial * factor^retry`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, retry: u32) -> Duration {
        let exp = i32::try_from(retry).unwrap_or(i32::MAX);
        let secs = self.initial_delay_seconds * self.backoff_factor.powi(exp);
        let capped = secs.min(self.max_delay_seconds).max(0.0);
        if capped.is_finite() {
            Duration::from_secs_f64(capped)
        } else {
            Duration::from_secs_f64(self.max_delay_seconds.max(0.0))
        }
    }

    /// Whether `err` matches a configured status code or category.
    pub fn is_retryable(&self, err: &AtelierError) -> bool {
        if let Some(status) = err.status_code() {
            if self.retry_on_status_codes.contains(&status) {
                return true;
            }
        }
        let category = err.category();
        self.retry_on_categories
            .iter()
            .any(|c| category_of(c) == category)
    }
}

// ============================================================================
// Circuit breaker
// ============================================================================

fn default_failure_threshold() -> u32 {
    5
}

fn default_recovery_timeout() -> u64 {
    30
}

fn default_success_threshold() -> u32 {
    2
}

fn default_half_open_max_calls() -> u32 {
    3
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerPolicy {
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Consecutive failures in Closed that open the circuit.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    /// Seconds an open circuit waits before admitting a probe.
    #[serde(default = "default_recovery_timeout")]
    pub recovery_timeout_seconds: u64,
    /// Probe successes in HalfOpen that close the circuit.
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
    #[serde(default = "default_half_open_max_calls")]
    pub half_open_max_calls: u32,
}

impl Default for CircuitBreakerPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            recovery_timeout_seconds: default_recovery_timeout(),
            success_threshold: default_success_threshold(),
            half_open_max_calls: default_half_open_max_calls(),
        }
    }
}

impl CircuitBreakerPolicy {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_seconds)
    }
}

// ============================================================================
// Timeout
// ============================================================================

fn default_timeout_seconds() -> u64 {
    120
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimeoutPolicy {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default = "default_timeout_seconds")]
    pub default_timeout_seconds: u64,
    #[serde(default)]
    pub per_provider_timeouts: HashMap<String, u64>,
    /// Endpoint path → seconds. Wins over the provider override.
    #[serde(default)]
    pub per_endpoint_timeouts: HashMap<String, u64>,
}

impl Default for TimeoutPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            default_timeout_seconds: default_timeout_seconds(),
            per_provider_timeouts: HashMap::new(),
            per_endpoint_timeouts: HashMap::new(),
        }
    }
}

impl TimeoutPolicy {
    /// Effective deadline for one attempt; `None` when timeouts are disabled.
    pub fn resolve(&self, provider: &str, endpoint: &str) -> Option<Duration> {
        if !self.enabled {
            return None;
        }
        let secs = self
            .per_endpoint_timeouts
            .get(endpoint)
            .or_else(|| self.per_provider_timeouts.get(provider))
            .copied()
            .unwrap_or(self.default_timeout_seconds);
        Some(Duration::from_secs(secs))
    }
}

// ============================================================================
// Degradation
// ============================================================================

fn default_degradation_message() -> String {
    "Service is currently degraded. Please try again later or with a simpler request.".into()
}

/// Last-resort provider appended to every fallback chain when enabled.
#[derive(Debug, Clone, Deserialize)]
pub struct DegradationPolicy {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub degrade_to_provider: Option<String>,
    #[serde(default)]
    pub degrade_to_model: Option<String>,
    #[serde(default = "default_degradation_message")]
    pub message: String,
}

impl Default for DegradationPolicy {
    fn default() -> Self {
        Self {
            enabled: false,
            degrade_to_provider: None,
            degrade_to_model: None,
            message: default_degradation_message(),
        }
    }
}

impl DegradationPolicy {
    /// The degradation target, if degradation is active.
    pub fn target(&self) -> Option<&str> {
        if self.enabled {
            self.degrade_to_provider.as_deref().filter(|p| !p.is_empty())
        } else {
            None
        }
    }
}

// ============================================================================
// Policy document
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResiliencePolicy {
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerPolicy,
    #[serde(default)]
    pub timeout: TimeoutPolicy,
    #[serde(default)]
    pub degradation: DegradationPolicy,
}

impl Policy for ResiliencePolicy {
    const DOMAIN: PolicyDomain = PolicyDomain::Resilience;

    fn prepare(&mut self) -> Result<(), String> {
        let r = &self.retry;
        if !(r.initial_delay_seconds.is_finite() && r.initial_delay_seconds >= 0.0) {
            return Err("retry.initial_delay_seconds must be non-negative".into());
        }
        if !(r.backoff_factor.is_finite() && r.backoff_factor >= 1.0) {
            return Err("retry.backoff_factor must be at least 1.0".into());
        }
        if !(r.max_delay_seconds.is_finite() && r.max_delay_seconds >= 0.0) {
            return Err("retry.max_delay_seconds must be non-negative".into());
        }
        if self.circuit_breaker.failure_threshold == 0 {
            return Err("circuit_breaker.failure_threshold must be at least 1".into());
        }
        if self.circuit_breaker.success_threshold == 0 {
            return Err("circuit_breaker.success_threshold must be at least 1".into());
        }
        if self.circuit_breaker.success_threshold > self.circuit_breaker.half_open_max_calls {
            return Err(
                "circuit_breaker.success_threshold must not exceed half_open_max_calls".into(),
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::parse_document;

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            initial_delay_seconds: 0.5,
            backoff_factor: 2.0,
            max_delay_seconds: 3.0,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.delay_for_attempt(0), Duration::from_millis(500));
        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(3));
        assert_eq!(policy.delay_for_attempt(40), Duration::from_secs(3));
    }

    #[test]
    fn exception_names_reduce_to_categories() {
        assert_eq!(category_of("httpx.ConnectError"), "connect");
        assert_eq!(category_of("httpx.TimeoutException"), "timeout");
        assert_eq!(category_of("timeout"), "timeout");
    }

    #[test]
    fn retryable_by_status_or_category() {
        let policy = RetryPolicy::default();
        let status = |s| AtelierError::Provider {
            provider: "p".into(),
            status: Some(s),
            message: String::new(),
        };
        assert!(policy.is_retryable(&status(503)));
        assert!(policy.is_retryable(&status(429)));
        assert!(!policy.is_retryable(&status(400)));
        assert!(policy.is_retryable(&AtelierError::Connect("refused".into())));
        assert!(!policy.is_retryable(&AtelierError::Http("bad body".into())));
    }

    #[test]
    fn disabled_retry_means_single_attempt() {
        let policy = RetryPolicy {
            enabled: false,
            max_attempts: 7,
            ..RetryPolicy::default()
        };
        assert_eq!(policy.attempts(), 1);
    }

    #[test]
    fn timeout_endpoint_override_beats_provider() {
        let doc = r#"
resilience:
  timeout:
    default_timeout_seconds: 90
    per_provider_timeouts:
      runway: 300
    per_endpoint_timeouts:
      /v1/videos/animate: 200
"#;
        let policy = parse_document::<ResiliencePolicy>(doc).unwrap();
        let t = &policy.timeout;
        assert_eq!(
            t.resolve("runway", "/v1/videos/animate"),
            Some(Duration::from_secs(200))
        );
        assert_eq!(
            t.resolve("runway", "/v1/videos/generate"),
            Some(Duration::from_secs(300))
        );
        assert_eq!(
            t.resolve("replicate", "/v1/videos/generate"),
            Some(Duration::from_secs(90))
        );
    }

    #[test]
    fn exception_alias_is_accepted() {
        let doc = "resilience:\n  retry:\n    retry_on_exceptions: [httpx.ConnectError]\n";
        let policy = parse_document::<ResiliencePolicy>(doc).unwrap();
        assert!(policy.retry.is_retryable(&AtelierError::Connect("x".into())));
        assert!(!policy.retry.is_retryable(&AtelierError::Timeout {
            provider: "p".into(),
            endpoint: "e".into(),
            after: Duration::from_secs(1),
        }));
    }

    #[test]
    fn degradation_target_requires_enabled() {
        let mut d = DegradationPolicy {
            degrade_to_provider: Some("cipher".into()),
            ..DegradationPolicy::default()
        };
        assert_eq!(d.target(), None);
        d.enabled = true;
        assert_eq!(d.target(), Some("cipher"));
    }

    #[test]
    fn zero_backoff_factor_is_malformed() {
        let doc = "resilience:\n  retry:\n    backoff_factor: 0\n";
        assert!(parse_document::<ResiliencePolicy>(doc).is_err());
    }

    #[test]
    fn unreachable_success_threshold_is_malformed() {
        let doc = "resilience:\n  circuit_breaker:\n    success_threshold: 5\n";
        let err = parse_document::<ResiliencePolicy>(doc).unwrap_err();
        assert!(err.contains("half_open_max_calls"), "{err}");

        let doc = "resilience:\n  circuit_breaker:\n    success_threshold: 5\n    half_open_max_calls: 5\n";
        assert!(parse_document::<ResiliencePolicy>(doc).is_ok());
    }
}
