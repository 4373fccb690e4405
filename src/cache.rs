//! Response cache for generation results.
//!
//! [`ResponseCache`] maps a [`RequestFingerprint`] key to a previously
//! produced response. Entries are bounded in three ways:
//!
//! - **time**: each entry expires `ttl` after insertion, where `ttl` is the
//!   per-endpoint override or the policy default. Expired entries are
//!   dropped lazily when read; nothing sweeps in the background.
//! - **count**: at most `max_entries` entries.
//! - **bytes**: at most `max_size_mb` of serialized JSON.
//!
//! Both ceilings are enforced after every insert by evicting the least
//! recently used entry until the cache fits. A hit promotes the entry.
//!
//! Policy is read on every call, so a reload applies to the next
//! operation. Shrinking a ceiling takes effect on the next insert.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use lru::LruCache;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

use crate::policy::{Policy, PolicyCell, PolicyDomain};
use crate::telemetry;
use crate::types::GenerationKind;

// ============================================================================
// Policy
// ============================================================================

fn enabled() -> bool {
    true
}

fn default_ttl_seconds() -> u64 {
    3600
}

fn default_max_entries() -> usize {
    10_000
}

fn default_max_size_mb() -> u64 {
    500
}

/// Time-to-live settings.
#[derive(Debug, Clone, Deserialize)]
pub struct TtlConfig {
    /// When false, entries never expire by time.
    #[serde(default = "enabled")]
    pub enabled: bool,
    /// Default TTL in seconds; 0 means no time-based expiry.
    #[serde(default = "default_ttl_seconds")]
    pub default_seconds: u64,
    /// Endpoint path → TTL in seconds.
    #[serde(default)]
    pub per_endpoint_seconds: HashMap<String, u64>,
}

impl Default for TtlConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_seconds: default_ttl_seconds(),
            per_endpoint_seconds: HashMap::new(),
        }
    }
}

/// Entry-count and byte ceilings.
#[derive(Debug, Clone, Deserialize)]
pub struct SizeLimits {
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,
    #[serde(default = "default_max_size_mb")]
    pub max_size_mb: u64,
}

impl Default for SizeLimits {
    fn default() -> Self {
        Self {
            max_entries: default_max_entries(),
            max_size_mb: default_max_size_mb(),
        }
    }
}

impl SizeLimits {
    pub fn max_size_bytes(&self) -> usize {
        usize::try_from(self.max_size_mb.saturating_mul(1024 * 1024)).unwrap_or(usize::MAX)
    }
}

/// Caching policy.
#[derive(Debug, Clone, Deserialize)]
pub struct CachePolicy {
    #[serde(default = "enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub ttl: TtlConfig,
    #[serde(default)]
    pub size_limits: SizeLimits,
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: TtlConfig::default(),
            size_limits: SizeLimits::default(),
        }
    }
}

impl Policy for CachePolicy {
    const DOMAIN: PolicyDomain = PolicyDomain::Cache;
}

impl CachePolicy {
    /// Effective TTL for `endpoint`; `None` means no time-based expiry.
    pub fn ttl_for(&self, endpoint: &str) -> Option<Duration> {
        if !self.ttl.enabled {
            return None;
        }
        let secs = self
            .ttl
            .per_endpoint_seconds
            .get(endpoint)
            .copied()
            .unwrap_or(self.ttl.default_seconds);
        (secs > 0).then(|| Duration::from_secs(secs))
    }
}

// ============================================================================
// Fingerprint
// ============================================================================

/// Identifies the cacheable equivalence class of a generation request.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestFingerprint {
    pub kind: GenerationKind,
    pub provider: String,
    pub prompt: String,
    pub style: String,
    pub size: Option<String>,
}

impl RequestFingerprint {
    /// Builds a fingerprint. The prompt is trimmed and runs of whitespace
    /// are collapsed, so cosmetic spacing differences share an entry.
    pub fn new(
        kind: GenerationKind,
        provider: &str,
        prompt: &str,
        style: &str,
        size: Option<&str>,
    ) -> Self {
        Self {
            kind,
            provider: provider.to_string(),
            prompt: prompt.split_whitespace().collect::<Vec<_>>().join(" "),
            style: style.to_string(),
            size: size.map(str::to_string),
        }
    }

    /// `{kind}:{provider}:{prompt}:{style}:{size|default}`
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}:{}:{}",
            self.kind,
            self.provider,
            self.prompt,
            self.style,
            self.size.as_deref().unwrap_or("default")
        )
    }
}

// ============================================================================
// Cache
// ============================================================================

#[derive(Debug)]
struct CacheEntry {
    value: Value,
    expires_at: Option<Instant>,
    size_bytes: usize,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

struct CacheInner {
    entries: LruCache<String, CacheEntry>,
    total_bytes: usize,
}

impl CacheInner {
    fn remove(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.pop(key)?;
        self.total_bytes = self.total_bytes.saturating_sub(entry.size_bytes);
        Some(entry)
    }
}

/// Snapshot of cache occupancy.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheStats {
    pub enabled: bool,
    pub current_entries: usize,
    pub max_entries: usize,
    pub current_size_bytes: usize,
    pub max_size_bytes: usize,
}

/// In-memory, policy-governed response cache.
pub struct ResponseCache {
    policy: PolicyCell<CachePolicy>,
    inner: Mutex<CacheInner>,
}

impl ResponseCache {
    pub fn new(policy: PolicyCell<CachePolicy>) -> Self {
        Self {
            policy,
            inner: Mutex::new(CacheInner {
                entries: LruCache::unbounded(),
                total_bytes: 0,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Look up `key`. Expired entries are removed and reported absent.
    /// A hit becomes the most recently used entry.
    pub fn get(&self, key: &str) -> Option<Value> {
        if !self.policy.load().enabled {
            return None;
        }

        let now = Instant::now();
        let mut inner = self.lock();
        let expired = inner.entries.peek(key)?.is_expired(now);
        if expired {
            inner.remove(key);
            debug!(key, "cache entry expired");
            return None;
        }
        inner.entries.get(key).map(|entry| entry.value.clone())
    }

    /// Store `value` under `key`, replacing any existing entry, then evict
    /// least recently used entries while over either ceiling.
    pub fn put(&self, key: impl Into<String>, value: Value, endpoint: &str) {
        let policy = self.policy.load();
        if !policy.enabled {
            return;
        }

        let key = key.into();
        let size_bytes = serde_json::to_vec(&value).map(|v| v.len()).unwrap_or(0);
        let expires_at = policy.ttl_for(endpoint).map(|ttl| Instant::now() + ttl);

        let max_entries = policy.size_limits.max_entries;
        let max_bytes = policy.size_limits.max_size_bytes();

        let mut inner = self.lock();
        inner.remove(&key);
        inner.entries.put(
            key,
            CacheEntry {
                value,
                expires_at,
                size_bytes,
            },
        );
        inner.total_bytes += size_bytes;

        let mut evicted = 0u64;
        while inner.entries.len() > max_entries || inner.total_bytes > max_bytes {
            match inner.entries.pop_lru() {
                Some((_, entry)) => {
                    inner.total_bytes = inner.total_bytes.saturating_sub(entry.size_bytes);
                    evicted += 1;
                }
                None => break,
            }
        }
        drop(inner);

        if evicted > 0 {
            metrics::counter!(telemetry::CACHE_EVICTIONS_TOTAL).increment(evicted);
            debug!(evicted, "cache evicted entries");
        }
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.entries.clear();
        inner.total_bytes = 0;
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> CacheStats {
        let policy = self.policy.load();
        let inner = self.lock();
        CacheStats {
            enabled: policy.enabled,
            current_entries: inner.entries.len(),
            max_entries: policy.size_limits.max_entries,
            current_size_bytes: inner.total_bytes,
            max_size_bytes: policy.size_limits.max_size_bytes(),
        }
    }
}
