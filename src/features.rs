//! Feature flags with explicit, typed lookups.
//!
//! Flags live in three categories. Provider and endpoint flags default to
//! enabled when a document does not mention them; custom flags default to
//! disabled.

use std::collections::HashMap;
use std::fmt;

use serde::Deserialize;
use tracing::warn;

use crate::policy::{Policy, PolicyDomain};

/// Category a flag lookup resolves against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlagCategory {
    Providers,
    Endpoints,
    Custom,
}

impl FlagCategory {
    fn prefix(self) -> &'static str {
        match self {
            FlagCategory::Providers => "providers",
            FlagCategory::Endpoints => "endpoints",
            FlagCategory::Custom => "custom_flags",
        }
    }
}

impl fmt::Display for FlagCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

fn enabled() -> bool {
    true
}

/// Feature flag policy.
#[derive(Debug, Clone, Deserialize)]
pub struct FeatureFlags {
    #[serde(default = "enabled")]
    pub streaming_enabled: bool,
    #[serde(default = "enabled")]
    pub caching_enabled: bool,
    #[serde(default)]
    pub providers: HashMap<String, bool>,
    #[serde(default)]
    pub endpoints: HashMap<String, bool>,
    #[serde(default)]
    pub custom_flags: HashMap<String, bool>,
}

impl Default for FeatureFlags {
    fn default() -> Self {
        let all_on = |names: &[&str]| -> HashMap<String, bool> {
            names.iter().map(|n| (n.to_string(), true)).collect()
        };
        Self {
            streaming_enabled: true,
            caching_enabled: true,
            providers: all_on(&["openai", "stable_diffusion", "cipher", "replicate", "runway"]),
            endpoints: all_on(&[
                "image_generation",
                "diagram_generation",
                "video_generation",
                "image_animation",
            ]),
            custom_flags: HashMap::new(),
        }
    }
}

impl Policy for FeatureFlags {
    const DOMAIN: PolicyDomain = PolicyDomain::Features;

    fn prepare(&mut self) -> Result<(), String> {
        // Provider names appear hyphenated in routing (`stable-diffusion`)
        // and underscored in flag documents; store one canonical form.
        self.providers = std::mem::take(&mut self.providers)
            .into_iter()
            .map(|(k, v)| (normalize(&k), v))
            .collect();
        Ok(())
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('-', "_")
}

impl FeatureFlags {
    /// Resolve a flag in `category`.
    pub fn is_enabled(&self, category: FlagCategory, name: &str) -> bool {
        match category {
            FlagCategory::Providers => self.providers.get(&normalize(name)).copied().unwrap_or(true),
            FlagCategory::Endpoints => self.endpoints.get(name).copied().unwrap_or(true),
            FlagCategory::Custom => self.custom_flags.get(name).copied().unwrap_or(false),
        }
    }

    pub fn provider_enabled(&self, provider: &str) -> bool {
        self.is_enabled(FlagCategory::Providers, provider)
    }

    pub fn endpoint_enabled(&self, endpoint: &str) -> bool {
        self.is_enabled(FlagCategory::Endpoints, endpoint)
    }

    /// Resolve a dotted flag name: `streaming_enabled`, `caching_enabled`,
    /// `providers.<name>`, `endpoints.<name>`, `custom_flags.<name>`, or a
    /// bare custom flag. Unknown names resolve to `false`.
    pub fn lookup(&self, flag: &str) -> bool {
        match flag {
            "streaming_enabled" => return self.streaming_enabled,
            "caching_enabled" => return self.caching_enabled,
            _ => {}
        }

        if let Some((prefix, name)) = flag.split_once('.') {
            let category = [
                FlagCategory::Providers,
                FlagCategory::Endpoints,
                FlagCategory::Custom,
            ]
            .into_iter()
            .find(|c| c.prefix() == prefix);
            if let Some(category) = category {
                return self.is_enabled(category, name);
            }
        }

        if let Some(value) = self.custom_flags.get(flag) {
            return *value;
        }

        warn!(feature = flag, "unknown feature flag");
        false
    }
}
