//! Service health report.

use std::time::Duration;

use moka::sync::Cache;
use serde::Serialize;

use crate::version;

/// How long a computed report is served before the checks run again.
pub const HEALTH_TTL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Ok,
    /// Working, but on a fallback path. Does not make the report unhealthy.
    Degraded,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheck {
    pub name: String,
    pub status: CheckStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl HealthCheck {
    pub fn ok(name: &str) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            detail: None,
        }
    }

    pub fn degraded(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Degraded,
            detail: Some(detail.into()),
        }
    }

    #[cfg(test)]
    pub(crate) fn error(name: &str, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            detail: Some(detail.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub checks: Vec<HealthCheck>,
    pub version: String,
}

impl HealthReport {
    /// Unhealthy iff any check is in error.
    pub fn from_checks(checks: Vec<HealthCheck>) -> Self {
        let status = if checks.iter().any(|c| c.status == CheckStatus::Error) {
            HealthStatus::Unhealthy
        } else {
            HealthStatus::Healthy
        };
        Self {
            status,
            checks,
            version: version::version_string(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HealthStatus::Healthy
    }
}

/// Memoizes the last report for [`HEALTH_TTL`].
#[derive(Clone)]
pub(crate) struct HealthCache {
    cache: Cache<(), HealthReport>,
}

impl HealthCache {
    pub(crate) fn new() -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(1)
                .time_to_live(HEALTH_TTL)
                .build(),
        }
    }

    pub(crate) fn get_or_compute(&self, compute: impl FnOnce() -> HealthReport) -> HealthReport {
        self.cache.get_with((), compute)
    }

    pub(crate) fn invalidate(&self) {
        self.cache.invalidate_all();
    }
}
