//! Versioned, hot-reloadable policy snapshots.
//!
//! Every cross-cutting concern (routing, budget, resilience, security,
//! quality, caching, feature flags) is governed by one policy document.
//! Documents are YAML with a top-level `version` and a domain-keyed body:
//!
//! ```yaml
//! version: "1.2.0"
//! caching:
//!   enabled: true
//!   ttl:
//!     default_seconds: 600
//! ```
//!
//! Components never hold a policy value directly. They hold a
//! [`PolicyCell`] and call [`PolicyCell::load`] once per operation, which
//! yields an immutable `Arc` snapshot. A reload swaps the `Arc` under a
//! short write lock, so a reader sees either the old or the new snapshot
//! in full.

mod source;
mod store;

pub use source::{FilePolicySource, PolicySource, StaticPolicySource};
pub use store::{PolicyStore, ReloadOutcome};

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use serde::de::DeserializeOwned;

use crate::AtelierError;

/// Version reported for documents that omit `version` and for defaults.
pub const DEFAULT_VERSION: &str = "1.0.0";

/// Closed set of policy domains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PolicyDomain {
    Routing,
    Budget,
    Resilience,
    Security,
    Quality,
    Cache,
    Features,
}

impl PolicyDomain {
    pub const ALL: [PolicyDomain; 7] = [
        PolicyDomain::Routing,
        PolicyDomain::Budget,
        PolicyDomain::Resilience,
        PolicyDomain::Security,
        PolicyDomain::Quality,
        PolicyDomain::Cache,
        PolicyDomain::Features,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PolicyDomain::Routing => "routing",
            PolicyDomain::Budget => "budget",
            PolicyDomain::Resilience => "resilience",
            PolicyDomain::Security => "security",
            PolicyDomain::Quality => "quality",
            PolicyDomain::Cache => "cache",
            PolicyDomain::Features => "features",
        }
    }

    /// Top-level key holding the policy body inside its document.
    pub fn yaml_key(self) -> &'static str {
        match self {
            PolicyDomain::Routing => "routing",
            PolicyDomain::Budget => "cost_control",
            PolicyDomain::Resilience => "resilience",
            PolicyDomain::Security => "security",
            PolicyDomain::Quality => "quality",
            PolicyDomain::Cache => "caching",
            PolicyDomain::Features => "feature_flags",
        }
    }

    /// Document file name inside the policy directory.
    pub fn file_name(self) -> String {
        format!("{}.yaml", self.yaml_key())
    }
}

impl fmt::Display for PolicyDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PolicyDomain {
    type Err = AtelierError;

    /// Accepts both the short name and the document key
    /// (`budget` / `cost_control`, `cache` / `caching`, ...).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase().replace('-', "_");
        PolicyDomain::ALL
            .into_iter()
            .find(|d| d.as_str() == lower || d.yaml_key() == lower)
            .ok_or_else(|| AtelierError::InvalidInput(format!("unknown policy domain: {s}")))
    }
}

/// A policy document body for one domain.
pub trait Policy: DeserializeOwned + Default + Send + Sync + 'static {
    const DOMAIN: PolicyDomain;

    /// Validate and precompute derived state (compiled patterns, etc.).
    ///
    /// An error marks the whole document as malformed; the store then
    /// installs the default policy instead.
    fn prepare(&mut self) -> Result<(), String> {
        Ok(())
    }
}

/// An immutable policy snapshot tagged with its document version.
#[derive(Debug)]
pub struct Versioned<T> {
    pub version: String,
    pub policy: T,
    /// Set when this snapshot is the built-in default installed after a
    /// load failure or a missing document.
    pub defaulted: bool,
}

impl<T: Policy> Versioned<T> {
    /// Built-in defaults.
    pub fn default_snapshot(defaulted: bool) -> Self {
        let mut policy = T::default();
        // Defaults only carry literal patterns; preparing them cannot fail
        // unless the built-in tables are broken.
        if let Err(e) = policy.prepare() {
            tracing::error!(domain = %T::DOMAIN, error = %e, "default policy failed to prepare");
        }
        Self {
            version: DEFAULT_VERSION.to_string(),
            policy,
            defaulted,
        }
    }
}

impl<T> std::ops::Deref for Versioned<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.policy
    }
}

/// Shared handle to an atomically swappable policy snapshot.
///
/// Cloning the cell shares the slot; a `replace` through any clone is
/// observed by the next `load` through every other clone.
pub struct PolicyCell<T> {
    slot: Arc<RwLock<Arc<Versioned<T>>>>,
}

impl<T> Clone for PolicyCell<T> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<T: Policy> Default for PolicyCell<T> {
    fn default() -> Self {
        Self::new(Versioned::default_snapshot(false))
    }
}

impl<T: Policy> PolicyCell<T> {
    pub fn new(snapshot: Versioned<T>) -> Self {
        Self {
            slot: Arc::new(RwLock::new(Arc::new(snapshot))),
        }
    }

    /// Cell holding `policy` as-is, after running [`Policy::prepare`].
    pub fn from_policy(mut policy: T) -> Self {
        if let Err(e) = policy.prepare() {
            tracing::warn!(domain = %T::DOMAIN, error = %e, "policy failed to prepare");
        }
        Self::new(Versioned {
            version: DEFAULT_VERSION.to_string(),
            policy,
            defaulted: false,
        })
    }

    /// Current snapshot.
    pub fn load(&self) -> Arc<Versioned<T>> {
        let guard = self.slot.read().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(&guard)
    }

    /// Swap in a new snapshot.
    pub fn replace(&self, snapshot: Versioned<T>) {
        let next = Arc::new(snapshot);
        let mut guard = self.slot.write().unwrap_or_else(PoisonError::into_inner);
        *guard = next;
    }
}

/// Parse a policy document for domain `T`.
///
/// Returns a human-readable error string for malformed input.
pub fn parse_document<T: Policy>(text: &str) -> Result<Versioned<T>, String> {
    let document: serde_yaml::Value =
        serde_yaml::from_str(text).map_err(|e| format!("invalid YAML: {e}"))?;
    let mapping = document
        .as_mapping()
        .ok_or_else(|| format!("invalid {} policy structure", T::DOMAIN))?;

    let body = mapping
        .get(T::DOMAIN.yaml_key())
        .cloned()
        .ok_or_else(|| format!("missing top-level `{}` key", T::DOMAIN.yaml_key()))?;

    let version = match mapping.get("version") {
        Some(serde_yaml::Value::String(v)) => v.clone(),
        Some(serde_yaml::Value::Number(n)) => n.to_string(),
        _ => DEFAULT_VERSION.to_string(),
    };

    // An empty body (`routing:`) means "all defaults".
    let mut policy: T = if body.is_null() {
        T::default()
    } else {
        serde_yaml::from_value(body).map_err(|e| e.to_string())?
    };
    policy.prepare()?;

    Ok(Versioned {
        version,
        policy,
        defaulted: false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    #[serde(default)]
    struct Toy {
        limit: u32,
        name: String,
    }

    impl Default for Toy {
        fn default() -> Self {
            Self {
                limit: 10,
                name: "toy".into(),
            }
        }
    }

    impl Policy for Toy {
        const DOMAIN: PolicyDomain = PolicyDomain::Cache;

        fn prepare(&mut self) -> Result<(), String> {
            if self.limit == 0 {
                return Err("limit must be positive".into());
            }
            Ok(())
        }
    }

    #[test]
    fn domain_parses_short_and_document_names() {
        assert_eq!("budget".parse::<PolicyDomain>().unwrap(), PolicyDomain::Budget);
        assert_eq!(
            "cost_control".parse::<PolicyDomain>().unwrap(),
            PolicyDomain::Budget
        );
        assert_eq!(
            "feature-flags".parse::<PolicyDomain>().unwrap(),
            PolicyDomain::Features
        );
        assert!("billing".parse::<PolicyDomain>().is_err());
    }

    #[test]
    fn document_missing_fields_take_defaults() {
        let doc = "version: \"2.1.0\"\ncaching:\n  limit: 3\n";
        let parsed = parse_document::<Toy>(doc).unwrap();
        assert_eq!(parsed.version, "2.1.0");
        assert_eq!(parsed.limit, 3);
        assert_eq!(parsed.name, "toy");
        assert!(!parsed.defaulted);
    }

    #[test]
    fn document_without_domain_key_is_rejected() {
        let err = parse_document::<Toy>("version: 1\nrouting: {}\n").unwrap_err();
        assert!(err.contains("caching"), "{err}");
    }

    #[test]
    fn prepare_failure_rejects_document() {
        let err = parse_document::<Toy>("caching:\n  limit: 0\n").unwrap_err();
        assert_eq!(err, "limit must be positive");
    }

    #[test]
    fn cell_clones_observe_replacement() {
        let cell: PolicyCell<Toy> = PolicyCell::default();
        let reader = cell.clone();
        let before = reader.load();

        cell.replace(parse_document("version: \"9\"\ncaching:\n  limit: 7\n").unwrap());

        assert_eq!(before.limit, 10, "old snapshot is unaffected");
        let after = reader.load();
        assert_eq!(after.limit, 7);
        assert_eq!(after.version, "9");
    }
}
