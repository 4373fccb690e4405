//! Response cache expiry and eviction.

use std::time::Duration;

use serde_json::json;

use atelier::cache::{CachePolicy, ResponseCache};
use atelier::policy::{PolicyCell, parse_document};

const IMAGES: &str = "/v1/images/generate";
const DIAGRAMS: &str = "/v1/diagrams/generate";

fn cache(doc: &str) -> (ResponseCache, PolicyCell<CachePolicy>) {
    let cell = PolicyCell::new(parse_document::<CachePolicy>(doc).unwrap());
    (ResponseCache::new(cell.clone()), cell)
}

#[tokio::test(start_paused = true)]
async fn entries_expire_after_their_endpoint_ttl() {
    let (cache, _) = cache(
        r#"
caching:
  ttl:
    default_seconds: 3600
    per_endpoint_seconds:
      /v1/diagrams/generate: 60
"#,
    );
    cache.put("image", json!({"provider": "openai"}), IMAGES);
    cache.put("diagram", json!({"provider": "openai"}), DIAGRAMS);

    tokio::time::advance(Duration::from_secs(59)).await;
    assert!(cache.get("diagram").is_some());

    tokio::time::advance(Duration::from_secs(1)).await;
    assert_eq!(cache.get("diagram"), None);
    assert_eq!(cache.len(), 1, "expired entry is dropped on read");
    assert!(cache.get("image").is_some());

    tokio::time::advance(Duration::from_secs(3600)).await;
    assert_eq!(cache.get("image"), None);
    assert!(cache.is_empty());
}

#[tokio::test(start_paused = true)]
async fn zero_ttl_never_expires() {
    let (cache, _) = cache("caching:\n  ttl:\n    default_seconds: 0\n");
    cache.put("k", json!(1), IMAGES);

    tokio::time::advance(Duration::from_secs(365 * 24 * 3600)).await;
    assert_eq!(cache.get("k"), Some(json!(1)));
}

#[test]
fn entry_ceiling_evicts_least_recently_used() {
    let (cache, _) = cache("caching:\n  size_limits:\n    max_entries: 2\n");
    cache.put("a", json!("a"), IMAGES);
    cache.put("b", json!("b"), IMAGES);
    // Touch `a` so `b` becomes the eviction candidate.
    assert!(cache.get("a").is_some());
    cache.put("c", json!("c"), IMAGES);

    assert_eq!(cache.len(), 2);
    assert_eq!(cache.get("b"), None);
    assert!(cache.get("a").is_some());
    assert!(cache.get("c").is_some());
}

#[test]
fn reloaded_ceiling_applies_on_next_insert() {
    let (cache, cell) = cache("caching:\n  size_limits:\n    max_entries: 10\n");
    for key in ["a", "b", "c", "d"] {
        cache.put(key, json!(key), IMAGES);
    }
    assert_eq!(cache.len(), 4);

    cell.replace(parse_document("caching:\n  size_limits:\n    max_entries: 2\n").unwrap());
    assert_eq!(cache.len(), 4);
    assert_eq!(cache.stats().max_entries, 2);

    cache.put("e", json!("e"), IMAGES);
    assert_eq!(cache.len(), 2);
    assert!(cache.get("d").is_some());
    assert!(cache.get("e").is_some());
}

#[test]
fn disabling_the_cache_hides_existing_entries() {
    let (cache, cell) = cache("caching:\n  enabled: true\n");
    cache.put("k", json!(1), IMAGES);

    cell.replace(parse_document("caching:\n  enabled: false\n").unwrap());
    assert_eq!(cache.get("k"), None);
    assert!(!cache.stats().enabled);
}
