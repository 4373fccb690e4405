//! Telemetry metric name constants.
//!
//! Centralised metric names for atelier operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `atelier_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`, `_usd`).
//!
//! # Common labels
//!
//! - `provider` — provider name (e.g. "openai", "replicate")
//! - `endpoint` — logical endpoint (e.g. "/v1/images/generate")
//! - `status` — outcome: "ok" or "error"
//! - `stage` — content pipeline stage that rejected a request

/// Total generation requests handled by the gateway.
///
/// Labels: `provider`, `endpoint`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "atelier_requests_total";

/// Request duration in seconds, from screening to response.
///
/// Labels: `provider`, `endpoint`.
pub const REQUEST_DURATION_SECONDS: &str = "atelier_request_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `provider`.
pub const RETRIES_TOTAL: &str = "atelier_retries_total";

/// Total fallbacks to the next provider in a chain.
///
/// Labels: `from`, `to`.
pub const FALLBACKS_TOTAL: &str = "atelier_fallbacks_total";

/// Total attempts aborted by the per-attempt deadline.
///
/// Labels: `provider`.
pub const TIMEOUTS_TOTAL: &str = "atelier_timeouts_total";

/// Total response cache hits.
///
/// Labels: `endpoint`.
pub const CACHE_HITS_TOTAL: &str = "atelier_cache_hits_total";

/// Total response cache misses.
///
/// Labels: `endpoint`.
pub const CACHE_MISSES_TOTAL: &str = "atelier_cache_misses_total";

/// Total entries evicted for size or count.
pub const CACHE_EVICTIONS_TOTAL: &str = "atelier_cache_evictions_total";

/// Total circuit breaker state transitions.
///
/// Labels: `provider`, `state` ("closed" | "open" | "half_open").
pub const CIRCUIT_TRANSITIONS_TOTAL: &str = "atelier_circuit_transitions_total";

/// Total attempts rejected by an open circuit.
///
/// Labels: `provider`.
pub const CIRCUIT_REJECTIONS_TOTAL: &str = "atelier_circuit_rejections_total";

/// Spend booked in the current daily period, in USD.
pub const BUDGET_DAILY_SPENT_USD: &str = "atelier_budget_daily_spent_usd";

/// Spend booked in the current monthly period, in USD.
pub const BUDGET_MONTHLY_SPENT_USD: &str = "atelier_budget_monthly_spent_usd";

/// Total requests denied by the budget tracker.
pub const BUDGET_DENIALS_TOTAL: &str = "atelier_budget_denials_total";

/// Total requests rejected by a content pipeline stage.
///
/// Labels: `stage`.
pub const PIPELINE_REJECTIONS_TOTAL: &str = "atelier_pipeline_rejections_total";

/// Total policy reloads.
///
/// Labels: `domain`, `outcome` ("loaded" | "defaulted").
pub const POLICY_RELOADS_TOTAL: &str = "atelier_policy_reloads_total";
