//! Spend tracking against per-request, daily and monthly ceilings.
//!
//! All counters live behind one mutex owned by [`BudgetTracker`]. Every
//! public operation first rolls the daily and monthly periods forward
//! if a boundary has been crossed since the last reset, then reads or
//! mutates. There is no background timer.
//!
//! Two usage styles are supported:
//!
//! - [`check_budget`](BudgetTracker::check_budget) followed later by
//!   [`record_spend`](BudgetTracker::record_spend). The two calls are not
//!   atomic together, so concurrent callers can both pass the check and
//!   overshoot a ceiling.
//! - [`try_reserve`](BudgetTracker::try_reserve), which checks and books
//!   the estimate under a single lock, followed by
//!   [`commit`](BudgetTracker::commit) or [`release`](BudgetTracker::release).
//!   The gateway uses this form.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Datelike, Duration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::policy::{Policy, PolicyCell, PolicyDomain};
use crate::telemetry;
use crate::types::Endpoint;

// ============================================================================
// Policy
// ============================================================================

fn enabled() -> bool {
    true
}

fn default_daily() -> f64 {
    100.0
}

fn default_monthly() -> f64 {
    3000.0
}

fn default_per_request() -> f64 {
    1.0
}

/// Spend ceilings, in USD.
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetLimits {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default = "default_daily")]
    pub daily_limit_usd: f64,
    #[serde(default = "default_monthly")]
    pub monthly_limit_usd: f64,
    #[serde(default = "default_per_request")]
    pub per_request_limit_usd: f64,
    /// Hour of day (UTC, 0-23) at which the daily counter resets.
    #[serde(default)]
    pub reset_hour_utc: u32,
}

impl Default for BudgetLimits {
    fn default() -> Self {
        Self {
            enabled: true,
            daily_limit_usd: default_daily(),
            monthly_limit_usd: default_monthly(),
            per_request_limit_usd: default_per_request(),
            reset_hour_utc: 0,
        }
    }
}

/// Provider → endpoint path → estimated USD per request.
pub type PricingTable = HashMap<String, HashMap<String, f64>>;

fn default_pricing() -> PricingTable {
    let mut table = PricingTable::new();
    let mut add = |provider: &str, entries: &[(&str, f64)]| {
        table.insert(
            provider.to_string(),
            entries.iter().map(|(e, p)| (e.to_string(), *p)).collect(),
        );
    };
    add(
        "openai",
        &[
            ("/v1/images/generate", 0.04),
            ("/v1/images/generate/thumbnail", 0.04),
        ],
    );
    add("stable-diffusion", &[("/v1/images/generate", 0.002)]);
    add("cipher", &[("/v1/images/generate", 0.01)]);
    add(
        "replicate",
        &[("/v1/videos/generate", 0.05), ("/v1/videos/animate", 0.05)],
    );
    add(
        "runway",
        &[("/v1/videos/generate", 0.10), ("/v1/videos/animate", 0.10)],
    );
    table
}

/// Cost control policy.
#[derive(Debug, Clone, Deserialize)]
pub struct BudgetPolicy {
    #[serde(default)]
    pub budget: BudgetLimits,
    #[serde(default = "default_pricing")]
    pub pricing: PricingTable,
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self {
            budget: BudgetLimits::default(),
            pricing: default_pricing(),
        }
    }
}

impl Policy for BudgetPolicy {
    const DOMAIN: PolicyDomain = PolicyDomain::Budget;

    fn prepare(&mut self) -> Result<(), String> {
        let b = &self.budget;
        if b.reset_hour_utc > 23 {
            return Err(format!(
                "reset_hour_utc must be 0-23, got {}",
                b.reset_hour_utc
            ));
        }
        for (name, value) in [
            ("daily_limit_usd", b.daily_limit_usd),
            ("monthly_limit_usd", b.monthly_limit_usd),
            ("per_request_limit_usd", b.per_request_limit_usd),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{name} must be a non-negative number"));
            }
        }
        self.pricing = std::mem::take(&mut self.pricing)
            .into_iter()
            .map(|(provider, prices)| (provider.to_ascii_lowercase(), prices))
            .collect();
        Ok(())
    }
}

impl BudgetPolicy {
    /// Estimated cost of one request to `provider` on `endpoint`.
    ///
    /// Falls back to the price of the kind's primary endpoint (thumbnails
    /// price as image generation unless listed), then to zero.
    pub fn estimate_cost(&self, provider: &str, endpoint: Endpoint) -> f64 {
        let Some(prices) = self.pricing.get(&provider.to_ascii_lowercase()) else {
            return 0.0;
        };
        let primary = match endpoint {
            Endpoint::ImageThumbnail => Endpoint::ImageGenerate,
            Endpoint::VideoAnimate => Endpoint::VideoGenerate,
            other => other,
        };
        prices
            .get(endpoint.path())
            .or_else(|| prices.get(primary.path()))
            .copied()
            .unwrap_or(0.0)
    }
}

// ============================================================================
// Decisions and snapshots
// ============================================================================

/// Outcome of a budget check.
#[derive(Debug, Clone, PartialEq)]
pub enum BudgetDecision {
    Allowed,
    Denied(String),
}

impl BudgetDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, BudgetDecision::Allowed)
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            BudgetDecision::Allowed => None,
            BudgetDecision::Denied(reason) => Some(reason),
        }
    }
}

/// Estimated spend booked by [`BudgetTracker::try_reserve`].
///
/// Remembers the periods it was booked in, so releasing it after a reset
/// does not subtract from the new period.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "a reservation must be committed or released"]
pub struct Reservation {
    amount: f64,
    daily_period: DateTime<Utc>,
    monthly_period: DateTime<Utc>,
}

impl Reservation {
    pub fn amount(&self) -> f64 {
        self.amount
    }
}

/// Point-in-time budget status.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BudgetStatus {
    pub enabled: bool,
    pub daily_spent_usd: f64,
    pub daily_limit_usd: f64,
    pub daily_remaining_usd: f64,
    pub monthly_spent_usd: f64,
    pub monthly_limit_usd: f64,
    pub monthly_remaining_usd: f64,
    pub per_request_limit_usd: f64,
    pub last_daily_reset: DateTime<Utc>,
    pub last_monthly_reset: DateTime<Utc>,
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Most recent `hour:00` UTC at or before `now`.
fn daily_boundary(now: DateTime<Utc>, hour: u32) -> DateTime<Utc> {
    let today = Utc
        .with_ymd_and_hms(now.year(), now.month(), now.day(), hour.min(23), 0, 0)
        .single()
        .unwrap_or(now);
    if now.hour() < hour {
        today - Duration::days(1)
    } else {
        today
    }
}

/// First instant of the calendar month containing `now`.
fn monthly_boundary(now: DateTime<Utc>) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(now.year(), now.month(), 1, 0, 0, 0)
        .single()
        .unwrap_or(now)
}

// ============================================================================
// Tracker
// ============================================================================

#[derive(Debug)]
struct BudgetState {
    daily_spent: f64,
    monthly_spent: f64,
    last_daily_reset: DateTime<Utc>,
    last_monthly_reset: DateTime<Utc>,
}

impl BudgetState {
    fn roll(&mut self, now: DateTime<Utc>, reset_hour: u32) {
        let daily = daily_boundary(now, reset_hour);
        if daily > self.last_daily_reset {
            if self.daily_spent > 0.0 {
                info!(spent = self.daily_spent, "daily budget reset");
            }
            self.daily_spent = 0.0;
            self.last_daily_reset = daily;
        }
        let monthly = monthly_boundary(now);
        if monthly > self.last_monthly_reset {
            if self.monthly_spent > 0.0 {
                info!(spent = self.monthly_spent, "monthly budget reset");
            }
            self.monthly_spent = 0.0;
            self.last_monthly_reset = monthly;
        }
    }

    fn evaluate(&self, cost: f64, limits: &BudgetLimits) -> BudgetDecision {
        if cost > limits.per_request_limit_usd {
            return BudgetDecision::Denied(format!(
                "Estimated cost ${cost:.2} exceeds per-request limit of ${:.2}",
                limits.per_request_limit_usd
            ));
        }
        if self.daily_spent + cost > limits.daily_limit_usd {
            return BudgetDecision::Denied(format!(
                "Estimated cost ${cost:.2} would exceed daily budget of ${:.2}",
                limits.daily_limit_usd
            ));
        }
        if self.monthly_spent + cost > limits.monthly_limit_usd {
            return BudgetDecision::Denied(format!(
                "Estimated cost ${cost:.2} would exceed monthly budget of ${:.2}",
                limits.monthly_limit_usd
            ));
        }
        BudgetDecision::Allowed
    }

    fn add(&mut self, amount: f64) {
        self.daily_spent += amount;
        self.monthly_spent += amount;
    }

    fn undo(&mut self, reservation: &Reservation) {
        if reservation.daily_period == self.last_daily_reset {
            self.daily_spent = (self.daily_spent - reservation.amount).max(0.0);
        }
        if reservation.monthly_period == self.last_monthly_reset {
            self.monthly_spent = (self.monthly_spent - reservation.amount).max(0.0);
        }
    }

    fn publish(&self) {
        metrics::gauge!(telemetry::BUDGET_DAILY_SPENT_USD).set(self.daily_spent);
        metrics::gauge!(telemetry::BUDGET_MONTHLY_SPENT_USD).set(self.monthly_spent);
    }
}

/// Running spend counters governed by the cost control policy.
pub struct BudgetTracker {
    policy: PolicyCell<BudgetPolicy>,
    state: Mutex<BudgetState>,
}

impl BudgetTracker {
    pub fn new(policy: PolicyCell<BudgetPolicy>) -> Self {
        Self::new_at(policy, Utc::now())
    }

    /// Tracker whose initial periods are the ones containing `now`.
    pub fn new_at(policy: PolicyCell<BudgetPolicy>, now: DateTime<Utc>) -> Self {
        let hour = policy.load().budget.reset_hour_utc;
        let state = BudgetState {
            daily_spent: 0.0,
            monthly_spent: 0.0,
            last_daily_reset: daily_boundary(now, hour),
            last_monthly_reset: monthly_boundary(now),
        };
        Self {
            policy,
            state: Mutex::new(state),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BudgetState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Estimated cost for `provider` on `endpoint` under the current pricing.
    pub fn estimate_cost(&self, provider: &str, endpoint: Endpoint) -> f64 {
        self.policy.load().estimate_cost(provider, endpoint)
    }

    pub fn check_budget(&self, estimated_cost: f64) -> BudgetDecision {
        self.check_budget_at(estimated_cost, Utc::now())
    }

    /// Check `estimated_cost` against the per-request, daily and monthly
    /// ceilings, in that order. The first violated ceiling wins.
    pub fn check_budget_at(&self, estimated_cost: f64, now: DateTime<Utc>) -> BudgetDecision {
        let policy = self.policy.load();
        if !policy.budget.enabled {
            return BudgetDecision::Allowed;
        }
        let mut state = self.lock();
        state.roll(now, policy.budget.reset_hour_utc);
        state.evaluate(estimated_cost, &policy.budget)
    }

    pub fn record_spend(&self, amount: f64) {
        self.record_spend_at(amount, Utc::now());
    }

    /// Add `amount` to both counters without re-checking ceilings.
    /// Negative or non-finite amounts are ignored.
    pub fn record_spend_at(&self, amount: f64, now: DateTime<Utc>) {
        let policy = self.policy.load();
        if !policy.budget.enabled {
            return;
        }
        if !amount.is_finite() || amount < 0.0 {
            warn!(amount, "ignoring invalid spend amount");
            return;
        }
        let mut state = self.lock();
        state.roll(now, policy.budget.reset_hour_utc);
        state.add(amount);
        debug!(
            amount,
            daily_spent = state.daily_spent,
            monthly_spent = state.monthly_spent,
            "recorded spend"
        );
        state.publish();
    }

    pub fn try_reserve(&self, estimated_cost: f64) -> Result<Reservation, String> {
        self.try_reserve_at(estimated_cost, Utc::now())
    }

    /// Check and book `estimated_cost` atomically.
    pub fn try_reserve_at(
        &self,
        estimated_cost: f64,
        now: DateTime<Utc>,
    ) -> Result<Reservation, String> {
        let policy = self.policy.load();
        let mut state = self.lock();
        state.roll(now, policy.budget.reset_hour_utc);

        let amount = if estimated_cost.is_finite() {
            estimated_cost.max(0.0)
        } else {
            0.0
        };
        let reservation = |amount| Reservation {
            amount,
            daily_period: state.last_daily_reset,
            monthly_period: state.last_monthly_reset,
        };

        if !policy.budget.enabled {
            return Ok(reservation(0.0));
        }
        if let BudgetDecision::Denied(reason) = state.evaluate(amount, &policy.budget) {
            metrics::counter!(telemetry::BUDGET_DENIALS_TOTAL).increment(1);
            return Err(reason);
        }
        let booked = reservation(amount);
        state.add(amount);
        state.publish();
        Ok(booked)
    }

    pub fn commit(&self, reservation: Reservation, actual_cost: f64) {
        self.commit_at(reservation, actual_cost, Utc::now());
    }

    /// Replace a reservation with the actual cost of the call.
    pub fn commit_at(&self, reservation: Reservation, actual_cost: f64, now: DateTime<Utc>) {
        let policy = self.policy.load();
        let mut state = self.lock();
        state.roll(now, policy.budget.reset_hour_utc);
        state.undo(&reservation);
        if policy.budget.enabled && actual_cost.is_finite() && actual_cost > 0.0 {
            state.add(actual_cost);
        }
        state.publish();
    }

    pub fn release(&self, reservation: Reservation) {
        self.release_at(reservation, Utc::now());
    }

    /// Give back a reservation whose request did not complete.
    pub fn release_at(&self, reservation: Reservation, now: DateTime<Utc>) {
        let policy = self.policy.load();
        let mut state = self.lock();
        state.roll(now, policy.budget.reset_hour_utc);
        state.undo(&reservation);
        state.publish();
    }

    pub fn status(&self) -> BudgetStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> BudgetStatus {
        let policy = self.policy.load();
        let limits = &policy.budget;
        let mut state = self.lock();
        state.roll(now, limits.reset_hour_utc);
        BudgetStatus {
            enabled: limits.enabled,
            daily_spent_usd: round4(state.daily_spent),
            daily_limit_usd: limits.daily_limit_usd,
            daily_remaining_usd: round4((limits.daily_limit_usd - state.daily_spent).max(0.0)),
            monthly_spent_usd: round4(state.monthly_spent),
            monthly_limit_usd: limits.monthly_limit_usd,
            monthly_remaining_usd: round4(
                (limits.monthly_limit_usd - state.monthly_spent).max(0.0),
            ),
            per_request_limit_usd: limits.per_request_limit_usd,
            last_daily_reset: state.last_daily_reset,
            last_monthly_reset: state.last_monthly_reset,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    fn tracker(limits: BudgetLimits, now: DateTime<Utc>) -> BudgetTracker {
        let policy = BudgetPolicy {
            budget: limits,
            ..BudgetPolicy::default()
        };
        BudgetTracker::new_at(PolicyCell::from_policy(policy), now)
    }

    #[test]
    fn daily_boundary_before_reset_hour_is_yesterday() {
        assert_eq!(daily_boundary(at(2026, 3, 10, 5, 30), 6), at(2026, 3, 9, 6, 0));
        assert_eq!(daily_boundary(at(2026, 3, 10, 6, 0), 6), at(2026, 3, 10, 6, 0));
        assert_eq!(daily_boundary(at(2026, 3, 1, 0, 15), 0), at(2026, 3, 1, 0, 0));
    }

    #[test]
    fn monthly_boundary_is_first_of_month() {
        assert_eq!(monthly_boundary(at(2026, 2, 28, 23, 59)), at(2026, 2, 1, 0, 0));
    }

    #[test]
    fn estimate_cost_uses_pricing_table() {
        let policy = BudgetPolicy::default();
        assert_eq!(policy.estimate_cost("openai", Endpoint::ImageGenerate), 0.04);
        assert_eq!(policy.estimate_cost("OpenAI", Endpoint::ImageThumbnail), 0.04);
        assert_eq!(policy.estimate_cost("cipher", Endpoint::ImageThumbnail), 0.01);
        assert_eq!(policy.estimate_cost("runway", Endpoint::VideoAnimate), 0.10);
        assert_eq!(policy.estimate_cost("anthropic", Endpoint::DiagramGenerate), 0.0);
    }

    #[test]
    fn reason_strings_name_each_ceiling() {
        let now = at(2026, 5, 4, 12, 0);
        let t = tracker(
            BudgetLimits {
                daily_limit_usd: 1.0,
                monthly_limit_usd: 1.5,
                per_request_limit_usd: 0.75,
                ..BudgetLimits::default()
            },
            now,
        );

        assert_eq!(
            t.check_budget_at(0.8, now).reason(),
            Some("Estimated cost $0.80 exceeds per-request limit of $0.75")
        );

        t.record_spend_at(0.5, now);
        t.record_spend_at(0.3, now);
        assert_eq!(
            t.check_budget_at(0.5, now).reason(),
            Some("Estimated cost $0.50 would exceed daily budget of $1.00")
        );

        // Next day: daily counter is fresh, monthly still carries 0.8.
        let tomorrow = at(2026, 5, 5, 12, 0);
        t.record_spend_at(0.5, tomorrow);
        assert_eq!(
            t.check_budget_at(0.5, tomorrow).reason(),
            Some("Estimated cost $0.50 would exceed monthly budget of $1.50")
        );
    }

    #[test]
    fn negative_spend_is_ignored() {
        let now = at(2026, 5, 4, 12, 0);
        let t = tracker(BudgetLimits::default(), now);
        t.record_spend_at(-5.0, now);
        t.record_spend_at(f64::NAN, now);
        assert_eq!(t.status_at(now).daily_spent_usd, 0.0);
    }

    #[test]
    fn disabled_budget_allows_and_records_nothing() {
        let now = at(2026, 5, 4, 12, 0);
        let t = tracker(
            BudgetLimits {
                enabled: false,
                per_request_limit_usd: 0.0,
                ..BudgetLimits::default()
            },
            now,
        );
        assert!(t.check_budget_at(50.0, now).is_allowed());
        t.record_spend_at(3.0, now);
        let r = t.try_reserve_at(50.0, now).unwrap();
        assert_eq!(r.amount(), 0.0);
        assert_eq!(t.status_at(now).monthly_spent_usd, 0.0);
    }

    #[test]
    fn reservation_is_atomic_check_and_book() {
        let now = at(2026, 5, 4, 12, 0);
        let t = tracker(
            BudgetLimits {
                daily_limit_usd: 0.10,
                ..BudgetLimits::default()
            },
            now,
        );
        let first = t.try_reserve_at(0.06, now).unwrap();
        let second = t.try_reserve_at(0.06, now);
        assert!(second.is_err(), "second reservation must see the first");

        t.release_at(first, now);
        assert!(t.try_reserve_at(0.06, now).is_ok());
    }

    #[test]
    fn commit_replaces_estimate_with_actual() {
        let now = at(2026, 5, 4, 12, 0);
        let t = tracker(BudgetLimits::default(), now);
        let r = t.try_reserve_at(0.04, now).unwrap();
        t.commit_at(r, 0.01, now);
        assert_eq!(t.status_at(now).daily_spent_usd, 0.01);
    }

    #[test]
    fn release_after_reset_does_not_touch_new_period() {
        let now = at(2026, 5, 4, 23, 59);
        let t = tracker(BudgetLimits::default(), now);
        let r = t.try_reserve_at(0.5, now).unwrap();

        let next_day = at(2026, 5, 5, 0, 1);
        t.record_spend_at(0.2, next_day);
        t.release_at(r, next_day);

        let status = t.status_at(next_day);
        assert_eq!(status.daily_spent_usd, 0.2);
        // Same month, so the monthly counter gives the reservation back.
        assert_eq!(status.monthly_spent_usd, 0.2);
    }

    #[test]
    fn status_rounds_to_four_places() {
        let now = at(2026, 5, 4, 12, 0);
        let t = tracker(BudgetLimits::default(), now);
        t.record_spend_at(0.123456, now);
        let s = t.status_at(now);
        assert_eq!(s.daily_spent_usd, 0.1235);
        assert_eq!(s.daily_remaining_usd, 99.8765);
    }
}
