//! One swappable snapshot per policy domain.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use super::{PolicyCell, PolicyDomain, PolicySource, Versioned, parse_document};
use crate::budget::BudgetPolicy;
use crate::cache::CachePolicy;
use crate::features::FeatureFlags;
use crate::policy::Policy;
use crate::resilience::ResiliencePolicy;
use crate::router::RoutingPolicy;
use crate::screening::{QualityPolicy, SecurityPolicy};
use crate::telemetry;

/// Result of loading one domain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReloadOutcome {
    /// The document parsed and is now live.
    Loaded { version: String },
    /// Built-in defaults are live; `reason` says why.
    Defaulted { reason: String },
}

impl ReloadOutcome {
    fn label(&self) -> &'static str {
        match self {
            ReloadOutcome::Loaded { .. } => "loaded",
            ReloadOutcome::Defaulted { .. } => "defaulted",
        }
    }
}

/// Holds the live policy for every domain.
///
/// The store is never empty: a domain whose document is missing or
/// malformed runs on built-in defaults, and the failure is logged rather
/// than returned.
pub struct PolicyStore {
    source: Arc<dyn PolicySource>,
    routing: PolicyCell<RoutingPolicy>,
    budget: PolicyCell<BudgetPolicy>,
    resilience: PolicyCell<ResiliencePolicy>,
    security: PolicyCell<SecurityPolicy>,
    quality: PolicyCell<QualityPolicy>,
    cache: PolicyCell<CachePolicy>,
    features: PolicyCell<FeatureFlags>,
}

impl PolicyStore {
    /// Store with every domain on defaults. Nothing is fetched until
    /// [`load_all`](Self::load_all) or [`reload`](Self::reload).
    pub fn new(source: Arc<dyn PolicySource>) -> Self {
        Self {
            source,
            routing: PolicyCell::default(),
            budget: PolicyCell::default(),
            resilience: PolicyCell::default(),
            security: PolicyCell::default(),
            quality: PolicyCell::default(),
            cache: PolicyCell::default(),
            features: PolicyCell::default(),
        }
    }

    /// Create a store and load every domain from `source`.
    pub fn load_all(source: Arc<dyn PolicySource>) -> Self {
        let store = Self::new(source);
        store.reload_all();
        store
    }

    /// Re-read one domain and swap it in.
    pub fn reload(&self, domain: PolicyDomain) -> ReloadOutcome {
        let outcome = match domain {
            PolicyDomain::Routing => self.reload_cell(&self.routing),
            PolicyDomain::Budget => self.reload_cell(&self.budget),
            PolicyDomain::Resilience => self.reload_cell(&self.resilience),
            PolicyDomain::Security => self.reload_cell(&self.security),
            PolicyDomain::Quality => self.reload_cell(&self.quality),
            PolicyDomain::Cache => self.reload_cell(&self.cache),
            PolicyDomain::Features => self.reload_cell(&self.features),
        };
        metrics::counter!(telemetry::POLICY_RELOADS_TOTAL,
            "domain" => domain.as_str(),
            "outcome" => outcome.label(),
        )
        .increment(1);
        outcome
    }

    pub fn reload_all(&self) -> Vec<(PolicyDomain, ReloadOutcome)> {
        PolicyDomain::ALL
            .into_iter()
            .map(|d| (d, self.reload(d)))
            .collect()
    }

    fn reload_cell<T: Policy>(&self, cell: &PolicyCell<T>) -> ReloadOutcome {
        let domain = T::DOMAIN;
        let location = self.source.describe(domain);
        let (snapshot, outcome) = match self.source.fetch(domain) {
            Ok(Some(text)) => match parse_document::<T>(&text) {
                Ok(snapshot) => {
                    info!(%domain, file = %location, version = %snapshot.version, "policy loaded");
                    let version = snapshot.version.clone();
                    (snapshot, ReloadOutcome::Loaded { version })
                }
                Err(reason) => {
                    error!(%domain, file = %location, error = %reason, "failed to load policy, using defaults");
                    (Versioned::default_snapshot(true), ReloadOutcome::Defaulted { reason })
                }
            },
            Ok(None) => {
                warn!(%domain, file = %location, "policy file not found, using defaults");
                (
                    Versioned::default_snapshot(false),
                    ReloadOutcome::Defaulted {
                        reason: format!("policy file not found: {location}"),
                    },
                )
            }
            Err(reason) => {
                error!(%domain, file = %location, error = %reason, "policy source unreadable, using defaults");
                (Versioned::default_snapshot(true), ReloadOutcome::Defaulted { reason })
            }
        };
        cell.replace(snapshot);
        outcome
    }

    /// Version string of the live document for `domain`.
    pub fn version(&self, domain: PolicyDomain) -> String {
        match domain {
            PolicyDomain::Routing => self.routing.load().version.clone(),
            PolicyDomain::Budget => self.budget.load().version.clone(),
            PolicyDomain::Resilience => self.resilience.load().version.clone(),
            PolicyDomain::Security => self.security.load().version.clone(),
            PolicyDomain::Quality => self.quality.load().version.clone(),
            PolicyDomain::Cache => self.cache.load().version.clone(),
            PolicyDomain::Features => self.features.load().version.clone(),
        }
    }

    /// Domains running on defaults because their document failed to load.
    /// Absent documents do not count.
    pub fn degraded_domains(&self) -> Vec<PolicyDomain> {
        PolicyDomain::ALL
            .into_iter()
            .filter(|d| match d {
                PolicyDomain::Routing => self.routing.load().defaulted,
                PolicyDomain::Budget => self.budget.load().defaulted,
                PolicyDomain::Resilience => self.resilience.load().defaulted,
                PolicyDomain::Security => self.security.load().defaulted,
                PolicyDomain::Quality => self.quality.load().defaulted,
                PolicyDomain::Cache => self.cache.load().defaulted,
                PolicyDomain::Features => self.features.load().defaulted,
            })
            .collect()
    }

    pub fn routing(&self) -> PolicyCell<RoutingPolicy> {
        self.routing.clone()
    }

    pub fn budget(&self) -> PolicyCell<BudgetPolicy> {
        self.budget.clone()
    }

    pub fn resilience(&self) -> PolicyCell<ResiliencePolicy> {
        self.resilience.clone()
    }

    pub fn security(&self) -> PolicyCell<SecurityPolicy> {
        self.security.clone()
    }

    pub fn quality(&self) -> PolicyCell<QualityPolicy> {
        self.quality.clone()
    }

    pub fn cache(&self) -> PolicyCell<CachePolicy> {
        self.cache.clone()
    }

    pub fn features(&self) -> PolicyCell<FeatureFlags> {
        self.features.clone()
    }
}

impl std::fmt::Debug for PolicyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut s = f.debug_struct("PolicyStore");
        for domain in PolicyDomain::ALL {
            s.field(domain.as_str(), &self.version(domain));
        }
        s.finish()
    }
}
