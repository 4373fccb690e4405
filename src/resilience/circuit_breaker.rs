//! Per-provider circuit breakers.
//!
//! ```text
//!            failures ≥ failure_threshold
//!   Closed ─────────────────────────────────► Open
//!     ▲                                       │  recovery timeout elapsed,
//!     │ successes ≥ success_threshold         │  next can_attempt()
//!     │                                       ▼
//!     └───────────────────────────────── HalfOpen
//!                  any failure ──► Open
//! ```
//!
//! Callers follow every admitted `can_attempt` with exactly one
//! `record_success`, `record_failure` or `record_neutral`. Thresholds are
//! read from the current resilience policy on every call.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::time::Instant;
use tracing::{info, warn};

use super::{CircuitBreakerPolicy, ResiliencePolicy};
use crate::policy::PolicyCell;
use crate::telemetry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }
}

#[derive(Debug)]
struct CircuitBreaker {
    state: CircuitState,
    failure_count: u32,
    success_count: u32,
    last_failure_time: Option<Instant>,
    half_open_calls: u32,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            success_count: 0,
            last_failure_time: None,
            half_open_calls: 0,
        }
    }
}

impl CircuitBreaker {
    fn transition(&mut self, provider: &str, to: CircuitState) {
        self.state = to;
        metrics::counter!(telemetry::CIRCUIT_TRANSITIONS_TOTAL,
            "provider" => provider.to_owned(),
            "state" => to.as_str(),
        )
        .increment(1);
    }

    fn can_attempt(&mut self, provider: &str, policy: &CircuitBreakerPolicy, now: Instant) -> bool {
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => {
                let cooled = self
                    .last_failure_time
                    .is_none_or(|t| now.duration_since(t) >= policy.recovery_timeout());
                if cooled {
                    info!(provider, "circuit breaker entering half-open");
                    self.transition(provider, CircuitState::HalfOpen);
                    self.success_count = 0;
                    // The transitioning call is the first probe.
                    self.half_open_calls = 1;
                    true
                } else {
                    false
                }
            }
            CircuitState::HalfOpen => {
                if self.half_open_calls < policy.half_open_max_calls {
                    self.half_open_calls += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    fn record_success(&mut self, provider: &str, policy: &CircuitBreakerPolicy) {
        match self.state {
            CircuitState::HalfOpen => {
                self.success_count += 1;
                if self.success_count >= policy.success_threshold {
                    info!(provider, "circuit breaker closing");
                    self.transition(provider, CircuitState::Closed);
                    self.failure_count = 0;
                    self.success_count = 0;
                    self.half_open_calls = 0;
                }
            }
            CircuitState::Closed => self.failure_count = 0,
            // A call admitted before the circuit opened finished late.
            CircuitState::Open => {}
        }
    }

    /// An admitted attempt ended without saying anything about the
    /// provider's health. Hands the probe slot back in HalfOpen.
    fn record_neutral(&mut self) {
        if self.state == CircuitState::HalfOpen {
            self.half_open_calls = self.half_open_calls.saturating_sub(1);
        }
    }

    fn record_failure(&mut self, provider: &str, policy: &CircuitBreakerPolicy, now: Instant) {
        self.last_failure_time = Some(now);
        match self.state {
            CircuitState::HalfOpen => {
                warn!(provider, "circuit breaker reopening");
                self.transition(provider, CircuitState::Open);
                self.success_count = 0;
                self.half_open_calls = 0;
            }
            CircuitState::Closed => {
                self.failure_count += 1;
                if self.failure_count >= policy.failure_threshold {
                    warn!(
                        provider,
                        failures = self.failure_count,
                        "circuit breaker opening"
                    );
                    self.transition(provider, CircuitState::Open);
                }
            }
            CircuitState::Open => {}
        }
    }
}

/// Point-in-time view of one provider's breaker.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitSnapshot {
    pub provider: String,
    pub state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

/// Owns one breaker per provider, created on first reference.
pub struct CircuitBreakerRegistry {
    policy: PolicyCell<ResiliencePolicy>,
    breakers: Mutex<HashMap<String, CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new(policy: PolicyCell<ResiliencePolicy>) -> Self {
        Self {
            policy,
            breakers: Mutex::new(HashMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, CircuitBreaker>> {
        self.breakers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Admission check for one attempt. May move Open → HalfOpen.
    pub fn can_attempt(&self, provider: &str) -> bool {
        let policy = self.policy.load();
        let cb = &policy.circuit_breaker;
        if !cb.enabled {
            return true;
        }
        let mut breakers = self.lock();
        let breaker = breakers.entry(provider.to_string()).or_default();
        let admitted = breaker.can_attempt(provider, cb, Instant::now());
        if !admitted {
            metrics::counter!(telemetry::CIRCUIT_REJECTIONS_TOTAL,
                "provider" => provider.to_owned(),
            )
            .increment(1);
        }
        admitted
    }

    pub fn record_success(&self, provider: &str) {
        let policy = self.policy.load();
        let cb = &policy.circuit_breaker;
        if !cb.enabled {
            return;
        }
        let mut breakers = self.lock();
        breakers
            .entry(provider.to_string())
            .or_default()
            .record_success(provider, cb);
    }

    pub fn record_failure(&self, provider: &str) {
        let policy = self.policy.load();
        let cb = &policy.circuit_breaker;
        if !cb.enabled {
            return;
        }
        let mut breakers = self.lock();
        breakers
            .entry(provider.to_string())
            .or_default()
            .record_failure(provider, cb, Instant::now());
    }

    /// Finish an admitted attempt whose outcome does not count either way.
    pub fn record_neutral(&self, provider: &str) {
        let policy = self.policy.load();
        if !policy.circuit_breaker.enabled {
            return;
        }
        if let Some(breaker) = self.lock().get_mut(provider) {
            breaker.record_neutral();
        }
    }

    /// Current state; providers never referenced report Closed.
    pub fn state(&self, provider: &str) -> CircuitState {
        self.lock()
            .get(provider)
            .map_or(CircuitState::Closed, |b| b.state)
    }

    /// All known breakers, sorted by provider name.
    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut all: Vec<_> = self
            .lock()
            .iter()
            .map(|(provider, b)| CircuitSnapshot {
                provider: provider.clone(),
                state: b.state,
                failure_count: b.failure_count,
                success_count: b.success_count,
            })
            .collect();
        all.sort_by(|a, b| a.provider.cmp(&b.provider));
        all
    }

    /// Providers whose circuit is currently open.
    pub fn open_circuits(&self) -> Vec<String> {
        self.snapshot()
            .into_iter()
            .filter(|s| s.state == CircuitState::Open)
            .map(|s| s.provider)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn registry(cb: CircuitBreakerPolicy) -> CircuitBreakerRegistry {
        CircuitBreakerRegistry::new(PolicyCell::from_policy(ResiliencePolicy {
            circuit_breaker: cb,
            ..ResiliencePolicy::default()
        }))
    }

    #[test]
    fn success_in_closed_resets_failure_count() {
        let r = registry(CircuitBreakerPolicy {
            failure_threshold: 3,
            ..CircuitBreakerPolicy::default()
        });
        r.record_failure("openai");
        r.record_failure("openai");
        r.record_success("openai");
        r.record_failure("openai");
        r.record_failure("openai");
        assert_eq!(r.state("openai"), CircuitState::Closed);
        r.record_failure("openai");
        assert_eq!(r.state("openai"), CircuitState::Open);
    }

    #[test]
    fn breakers_are_independent_per_provider() {
        let r = registry(CircuitBreakerPolicy {
            failure_threshold: 1,
            ..CircuitBreakerPolicy::default()
        });
        r.record_failure("runway");
        assert!(!r.can_attempt("runway"));
        assert!(r.can_attempt("replicate"));
        assert_eq!(r.open_circuits(), vec!["runway".to_string()]);
    }

    #[test]
    fn disabled_breaker_always_admits() {
        let r = registry(CircuitBreakerPolicy {
            enabled: false,
            failure_threshold: 1,
            ..CircuitBreakerPolicy::default()
        });
        r.record_failure("openai");
        r.record_failure("openai");
        assert!(r.can_attempt("openai"));
        assert!(r.snapshot().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn neutral_outcome_returns_the_probe_slot() {
        let r = registry(CircuitBreakerPolicy {
            failure_threshold: 1,
            success_threshold: 1,
            half_open_max_calls: 1,
            ..CircuitBreakerPolicy::default()
        });
        r.record_failure("openai");
        tokio::time::advance(Duration::from_secs(31)).await;

        for _ in 0..5 {
            assert!(r.can_attempt("openai"));
            r.record_neutral("openai");
        }
        assert_eq!(r.state("openai"), CircuitState::HalfOpen);

        assert!(r.can_attempt("openai"));
        assert!(!r.can_attempt("openai"));
        r.record_success("openai");
        assert_eq!(r.state("openai"), CircuitState::Closed);
    }

    #[test]
    fn neutral_outcome_in_closed_keeps_failure_count() {
        let r = registry(CircuitBreakerPolicy {
            failure_threshold: 2,
            ..CircuitBreakerPolicy::default()
        });
        r.record_failure("openai");
        r.record_neutral("openai");
        r.record_failure("openai");
        assert_eq!(r.state("openai"), CircuitState::Open);
    }

    #[test]
    fn unknown_provider_reports_closed() {
        let r = registry(CircuitBreakerPolicy::default());
        assert_eq!(r.state("never-seen"), CircuitState::Closed);
    }
}
