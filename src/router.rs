//! Provider selection and sequential fallback.
//!
//! Each generation kind has its own route table. [`Router::select`] picks
//! a primary provider and its fallback chain; [`execute_with_fallback`]
//! walks `[primary] + chain` until an attempt succeeds.
//!
//! The fallback loop knows nothing about circuit breakers, retries or
//! deadlines. Callers wrap each attempt's operation with those.

use std::collections::HashSet;
use std::future::Future;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::policy::{Policy, PolicyCell, PolicyDomain};
use crate::telemetry;
use crate::types::GenerationKind;
use crate::{AtelierError, Result};

// ============================================================================
// Policy
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Low,
    #[default]
    Medium,
    High,
}

/// Ranking strategy for automatic selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostMode {
    CostOptimized,
    #[default]
    Balanced,
    QualityOptimized,
}

fn enabled() -> bool {
    true
}

fn default_priority() -> u32 {
    99
}

/// One routable provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Lower is preferred.
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default)]
    pub cost_tier: Tier,
    #[serde(default)]
    pub quality_tier: Tier,
    /// Providers tried, in order, after this one fails.
    #[serde(default)]
    pub fallback_to: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ProviderDescriptor {
    fn new(name: &str, priority: u32, cost: Tier, quality: Tier, fallback: &[&str], desc: &str) -> Self {
        Self {
            name: name.to_string(),
            enabled: true,
            priority,
            cost_tier: cost,
            quality_tier: quality,
            fallback_to: fallback.iter().map(|s| s.to_string()).collect(),
            description: Some(desc.to_string()),
        }
    }
}

/// Route table for one generation kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteTable {
    pub default_provider: String,
    #[serde(default)]
    pub providers: Vec<ProviderDescriptor>,
}

impl RouteTable {
    fn validate(&self, kind: GenerationKind) {
        let known: HashSet<String> = self
            .providers
            .iter()
            .map(|p| p.name.to_ascii_lowercase())
            .collect();
        for p in &self.providers {
            for next in &p.fallback_to {
                if next.eq_ignore_ascii_case(&p.name) {
                    warn!(
                        kind = %kind,
                        provider = %p.name,
                        "fallback chain lists the provider itself; it will be attempted again"
                    );
                } else if !known.contains(&next.to_ascii_lowercase()) {
                    warn!(
                        kind = %kind,
                        provider = %p.name,
                        fallback = %next,
                        "fallback chain names a provider missing from the route table"
                    );
                }
            }
        }
    }
}

fn default_images() -> RouteTable {
    RouteTable {
        default_provider: "openai".into(),
        providers: vec![
            ProviderDescriptor::new(
                "openai",
                1,
                Tier::High,
                Tier::High,
                &["stable-diffusion", "cipher"],
                "DALL-E 3. Best for high-quality thumbnails and illustrations",
            ),
            ProviderDescriptor::new(
                "stable-diffusion",
                2,
                Tier::Low,
                Tier::Medium,
                &["cipher"],
                "Stable Diffusion XL. Good for artistic and diagram-style images",
            ),
            ProviderDescriptor::new(
                "cipher",
                3,
                Tier::Low,
                Tier::Low,
                &[],
                "OpenAI-compatible alternative provider",
            ),
        ],
    }
}

fn default_diagrams() -> RouteTable {
    RouteTable {
        default_provider: "openai".into(),
        providers: vec![
            ProviderDescriptor::new(
                "openai",
                1,
                Tier::Medium,
                Tier::High,
                &["anthropic"],
                "Writes Mermaid or Graphviz source with a chat model",
            ),
            ProviderDescriptor::new(
                "anthropic",
                2,
                Tier::Medium,
                Tier::High,
                &[],
                "Writes Mermaid or Graphviz source with a chat model",
            ),
        ],
    }
}

fn default_videos() -> RouteTable {
    RouteTable {
        default_provider: "replicate".into(),
        providers: vec![
            ProviderDescriptor::new(
                "replicate",
                1,
                Tier::Medium,
                Tier::Medium,
                &[],
                "Stable Video Diffusion. Generates short videos from images",
            ),
            ProviderDescriptor::new(
                "runway",
                2,
                Tier::High,
                Tier::High,
                &["replicate"],
                "Runway Gen-2 video generation",
            ),
        ],
    }
}

/// Routing policy: one table per generation kind.
#[derive(Debug, Clone, Deserialize)]
pub struct RoutingPolicy {
    #[serde(default = "default_images")]
    pub images: RouteTable,
    #[serde(default = "default_diagrams")]
    pub diagrams: RouteTable,
    #[serde(default = "default_videos")]
    pub videos: RouteTable,
}

impl Default for RoutingPolicy {
    fn default() -> Self {
        Self {
            images: default_images(),
            diagrams: default_diagrams(),
            videos: default_videos(),
        }
    }
}

impl RoutingPolicy {
    pub fn table(&self, kind: GenerationKind) -> &RouteTable {
        match kind {
            GenerationKind::Image => &self.images,
            GenerationKind::Diagram => &self.diagrams,
            GenerationKind::Video => &self.videos,
        }
    }
}

impl Policy for RoutingPolicy {
    const DOMAIN: PolicyDomain = PolicyDomain::Routing;

    fn prepare(&mut self) -> std::result::Result<(), String> {
        for kind in GenerationKind::ALL {
            self.table(kind).validate(kind);
        }
        Ok(())
    }
}

// ============================================================================
// Selection
// ============================================================================

/// A primary provider and the ordered providers to try after it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selection {
    pub provider: String,
    pub fallback_chain: Vec<String>,
}

impl Selection {
    /// `[provider] + fallback_chain`.
    pub fn attempts(&self) -> Vec<String> {
        std::iter::once(self.provider.clone())
            .chain(self.fallback_chain.iter().cloned())
            .collect()
    }
}

/// Chooses providers from the routing policy.
#[derive(Clone)]
pub struct Router {
    policy: PolicyCell<RoutingPolicy>,
}

impl Router {
    pub fn new(policy: PolicyCell<RoutingPolicy>) -> Self {
        Self { policy }
    }

    /// Pick the provider for a request.
    ///
    /// An enabled, explicitly requested provider (case-insensitive) wins
    /// with its configured chain. Otherwise enabled providers are ranked
    /// by `cost_mode`; ties keep table order. With nothing enabled the
    /// table's default provider is returned with an empty chain.
    pub fn select(
        &self,
        kind: GenerationKind,
        requested: Option<&str>,
        cost_mode: CostMode,
    ) -> Selection {
        let policy = self.policy.load();
        let table = policy.table(kind);

        if let Some(requested) = requested.filter(|r| !r.is_empty()) {
            if let Some(p) = table
                .providers
                .iter()
                .find(|p| p.enabled && p.name.eq_ignore_ascii_case(requested))
            {
                info!(kind = %kind, provider = %p.name, "explicit provider selected");
                return Selection {
                    provider: p.name.clone(),
                    fallback_chain: p.fallback_to.clone(),
                };
            }
        }

        let mut available: Vec<&ProviderDescriptor> =
            table.providers.iter().filter(|p| p.enabled).collect();
        if available.is_empty() {
            return Selection {
                provider: table.default_provider.clone(),
                fallback_chain: Vec::new(),
            };
        }

        // sort_by_key is stable; `false` orders first.
        match cost_mode {
            CostMode::CostOptimized => {
                available.sort_by_key(|p| (p.cost_tier != Tier::Low, p.priority))
            }
            CostMode::QualityOptimized => {
                available.sort_by_key(|p| (p.quality_tier != Tier::High, p.priority))
            }
            CostMode::Balanced => available.sort_by_key(|p| p.priority),
        }

        let selected = available[0];
        info!(kind = %kind, provider = %selected.name, ?cost_mode, "auto-selected provider");
        Selection {
            provider: selected.name.clone(),
            fallback_chain: selected.fallback_to.clone(),
        }
    }

    /// Enabled providers of `kind`, in priority order.
    pub fn listing(&self, kind: GenerationKind) -> Vec<ProviderDescriptor> {
        let policy = self.policy.load();
        let mut providers: Vec<_> = policy
            .table(kind)
            .providers
            .iter()
            .filter(|p| p.enabled)
            .cloned()
            .collect();
        providers.sort_by_key(|p| p.priority);
        providers
    }

    pub fn default_provider(&self, kind: GenerationKind) -> String {
        self.policy.load().table(kind).default_provider.clone()
    }
}

/// Result of a fallback run: the value and the provider that produced it.
#[derive(Debug)]
pub struct Served<T> {
    pub provider: String,
    pub value: T,
}

/// Attempt `attempts` in order until one succeeds.
///
/// Each failure is logged and the next provider tried; the last failure
/// propagates when every attempt fails.
pub async fn execute_with_fallback<F, Fut, T>(
    attempts: &[String],
    endpoint: &str,
    mut op: F,
) -> Result<Served<T>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut last_err = None;
    for (i, provider) in attempts.iter().enumerate() {
        info!(attempt = i + 1, provider = %provider, endpoint, "attempting provider");
        match op(provider.clone()).await {
            Ok(value) => {
                return Ok(Served {
                    provider: provider.clone(),
                    value,
                });
            }
            Err(e) => {
                if let Some(next) = attempts.get(i + 1) {
                    warn!(provider = %provider, next = %next, error = %e, "attempt failed, falling back");
                    metrics::counter!(telemetry::FALLBACKS_TOTAL,
                        "from" => provider.clone(),
                        "to" => next.clone(),
                    )
                    .increment(1);
                } else {
                    warn!(provider = %provider, error = %e, "final attempt failed");
                }
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| AtelierError::NoProvider(format!("no provider available for {endpoint}"))))
}
