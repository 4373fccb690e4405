//! Request flow for the generation endpoints.
//!
//! Every generation call runs the same sequence:
//!
//! 1. validate the request and check the endpoint flag
//! 2. screen the prompt (length, content filter, injection, PII, toxicity)
//! 3. answer from the cache when possible
//! 4. select a provider and build the attempt chain
//! 5. reserve the estimated cost
//! 6. walk the chain; each attempt is admitted by the provider's circuit
//!    breaker, then retried with backoff under a per-attempt deadline
//! 7. screen the response (format, quality, sanitization)
//! 8. cache the response and commit the spend
//!
//! A reservation is released whenever no response is returned, so failed
//! requests never count against the budget.

use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::budget::{BudgetStatus, BudgetTracker, Reservation};
use crate::cache::{CacheStats, RequestFingerprint, ResponseCache};
use crate::features::FeatureFlags;
use crate::health::{HealthCache, HealthCheck, HealthReport};
use crate::policy::{PolicyCell, PolicyDomain, PolicyStore, ReloadOutcome};
use crate::providers::{ImageJob, ProviderRegistry};
use crate::resilience::{
    CircuitBreakerRegistry, CircuitSnapshot, ResiliencePolicy, with_retry, with_timeout,
};
use crate::router::{ProviderDescriptor, Router, Selection, Served, execute_with_fallback};
use crate::screening::{ContentPipeline, ScreenedPrompt, note_warning};
use crate::telemetry;
use crate::types::{
    DiagramRequest, DiagramResponse, Endpoint, GenerationKind, ImageRequest, ImageResponse,
    ImageStyle, VideoRequest, VideoResponse,
};
use crate::{AtelierError, Result};

/// Routable providers for one generation kind.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderListing {
    pub kind: GenerationKind,
    pub default_provider: String,
    pub providers: Vec<ProviderDescriptor>,
}

/// The generation gateway. Cheap to share behind an `Arc`.
pub struct Gateway {
    store: Arc<PolicyStore>,
    providers: ProviderRegistry,
    router: Router,
    cache: ResponseCache,
    budget: BudgetTracker,
    breakers: CircuitBreakerRegistry,
    pipeline: ContentPipeline,
    resilience: PolicyCell<ResiliencePolicy>,
    features: PolicyCell<FeatureFlags>,
    health: HealthCache,
}

/// `None` when the caller leaves provider choice to the router.
fn explicit(requested: &str) -> Option<&str> {
    let requested = requested.trim();
    (!requested.is_empty() && !requested.eq_ignore_ascii_case("auto")).then_some(requested)
}

/// Failures that say nothing about the provider's health.
fn counts_against_breaker(err: &AtelierError) -> bool {
    !err.is_client_error()
        && !matches!(
            err,
            AtelierError::NoProvider(_) | AtelierError::CircuitOpen { .. }
        )
}

impl Gateway {
    pub(crate) fn new(store: PolicyStore, providers: ProviderRegistry) -> Self {
        let store = Arc::new(store);
        Self {
            router: Router::new(store.routing()),
            cache: ResponseCache::new(store.cache()),
            budget: BudgetTracker::new(store.budget()),
            breakers: CircuitBreakerRegistry::new(store.resilience()),
            pipeline: ContentPipeline::new(store.security(), store.quality()),
            resilience: store.resilience(),
            features: store.features(),
            health: HealthCache::new(),
            providers,
            store,
        }
    }

    // ========================================================================
    // Generation
    // ========================================================================

    #[instrument(skip_all, fields(endpoint = %Endpoint::ImageGenerate, provider = %request.provider))]
    pub async fn generate_image(&self, request: ImageRequest) -> Result<ImageResponse> {
        let start = Instant::now();
        let result = self.image(Endpoint::ImageGenerate, request).await;
        record_request(Endpoint::ImageGenerate, result.as_ref().map(|r| r.provider.as_str()), start);
        result
    }

    /// Image generation with the thumbnail style forced.
    #[instrument(skip_all, fields(endpoint = %Endpoint::ImageThumbnail, provider = %request.provider))]
    pub async fn generate_thumbnail(&self, mut request: ImageRequest) -> Result<ImageResponse> {
        let start = Instant::now();
        request.style = ImageStyle::Thumbnail;
        let result = self.image(Endpoint::ImageThumbnail, request).await;
        record_request(Endpoint::ImageThumbnail, result.as_ref().map(|r| r.provider.as_str()), start);
        result
    }

    #[instrument(skip_all, fields(endpoint = %Endpoint::DiagramGenerate, provider = %request.ai_provider))]
    pub async fn generate_diagram(&self, request: DiagramRequest) -> Result<DiagramResponse> {
        let start = Instant::now();
        let result = self.diagram(request).await;
        record_request(Endpoint::DiagramGenerate, result.as_ref().map(|r| r.provider.as_str()), start);
        result
    }

    #[instrument(skip_all, fields(endpoint = %Endpoint::VideoGenerate, provider = %request.provider))]
    pub async fn generate_video(&self, request: VideoRequest) -> Result<VideoResponse> {
        let start = Instant::now();
        let result = self.video(Endpoint::VideoGenerate, request).await;
        record_request(Endpoint::VideoGenerate, result.as_ref().map(|r| r.provider.as_str()), start);
        result
    }

    /// Animate a still image; same pipeline as [`generate_video`](Self::generate_video).
    #[instrument(skip_all, fields(endpoint = %Endpoint::VideoAnimate, provider = %request.provider))]
    pub async fn animate_image(&self, request: VideoRequest) -> Result<VideoResponse> {
        let start = Instant::now();
        let result = self.video(Endpoint::VideoAnimate, request).await;
        record_request(Endpoint::VideoAnimate, result.as_ref().map(|r| r.provider.as_str()), start);
        result
    }

    async fn image(&self, endpoint: Endpoint, request: ImageRequest) -> Result<ImageResponse> {
        request.validate()?;
        self.admit(endpoint)?;

        let screened = self.screen(endpoint, &request.prompt)?;
        let context = match request.context.as_deref().filter(|c| !c.trim().is_empty()) {
            Some(ctx) => Some(self.screen(endpoint, ctx)?.text),
            None => None,
        };
        let prompt = request.style.enhance(&screened.text, context.as_deref());

        let key = RequestFingerprint::new(
            GenerationKind::Image,
            &request.provider,
            &prompt,
            request.style.as_str(),
            request.size.as_deref(),
        )
        .key();
        if let Some(hit) = self.cached::<ImageResponse>(endpoint, &key) {
            return Ok(hit);
        }

        let selection = self.router.select(
            GenerationKind::Image,
            explicit(&request.provider),
            request.cost_mode,
        );
        let attempts = self.attempt_chain(GenerationKind::Image, &selection)?;
        let reservation = self.reserve(&selection.provider, endpoint)?;

        let job = ImageJob {
            prompt,
            size: request.size.clone(),
            n: request.n,
        };
        let providers = &self.providers;
        let job = &job;
        let served = self
            .run(endpoint, &attempts, reservation, |name| async move {
                providers.image(&name)?.generate_images(job).await
            })
            .await?;

        let response = ImageResponse {
            data: served.value.data,
            provider: served.provider,
            prompt: screened.text,
        };
        self.finish(endpoint, served.value.reservation, response, Some(key))
    }

    async fn diagram(&self, request: DiagramRequest) -> Result<DiagramResponse> {
        let endpoint = Endpoint::DiagramGenerate;
        self.admit(endpoint)?;

        let screened = self.screen(endpoint, &request.description)?;
        let style = format!(
            "{}:{}:{}",
            request.diagram_type.as_str(),
            request.diagram_kind,
            request.output_format.as_str()
        );
        let key = RequestFingerprint::new(
            GenerationKind::Diagram,
            &request.ai_provider,
            &screened.text,
            &style,
            None,
        )
        .key();
        if let Some(hit) = self.cached::<DiagramResponse>(endpoint, &key) {
            return Ok(hit);
        }

        let selection = self.router.select(
            GenerationKind::Diagram,
            explicit(&request.ai_provider),
            request.cost_mode,
        );
        let attempts = self.attempt_chain(GenerationKind::Diagram, &selection)?;
        let reservation = self.reserve(&selection.provider, endpoint)?;

        let providers = &self.providers;
        let request = &request;
        let description = screened.text.as_str();
        let served = self
            .run(endpoint, &attempts, reservation, |name| async move {
                providers
                    .diagram(&name)?
                    .generate_diagram(request, description)
                    .await
            })
            .await?;

        let response = DiagramResponse {
            b64_json: served.value.data.b64_json,
            code: served.value.data.code,
            format: request.output_format.as_str().to_string(),
            diagram_type: request.diagram_type.as_str().to_string(),
            provider: served.provider,
        };
        self.finish(endpoint, served.value.reservation, response, Some(key))
    }

    /// Videos carry no prompt and are never cached.
    async fn video(&self, endpoint: Endpoint, request: VideoRequest) -> Result<VideoResponse> {
        request.validate()?;
        self.admit(endpoint)?;

        let selection = self.router.select(
            GenerationKind::Video,
            explicit(&request.provider),
            request.cost_mode,
        );
        let attempts = self.attempt_chain(GenerationKind::Video, &selection)?;
        let reservation = self.reserve(&selection.provider, endpoint)?;

        let providers = &self.providers;
        let request = &request;
        let served = self
            .run(endpoint, &attempts, reservation, |name| async move {
                providers.video(&name)?.generate_video(request).await
            })
            .await?;

        let output = served.value.data;
        let response = VideoResponse {
            video_url: output.video_url,
            video_b64: output.video_b64,
            format: output.format,
            provider: served.provider,
        };
        self.finish(endpoint, served.value.reservation, response, None)
    }

    // ========================================================================
    // Stages
    // ========================================================================

    fn admit(&self, endpoint: Endpoint) -> Result<()> {
        if self.features.load().endpoint_enabled(endpoint.flag_name()) {
            Ok(())
        } else {
            Err(AtelierError::FeatureDisabled(endpoint.flag_name().to_string()))
        }
    }

    fn screen(&self, endpoint: Endpoint, text: &str) -> Result<ScreenedPrompt> {
        let screened = self.pipeline.screen_prompt(endpoint, text)?;
        note_warning(endpoint, &screened);
        Ok(screened)
    }

    /// A cached response, if caching is on and the entry still decodes.
    fn cached<T: DeserializeOwned>(&self, endpoint: Endpoint, key: &str) -> Option<T> {
        if !self.features.load().caching_enabled {
            return None;
        }
        let hit = self
            .cache
            .get(key)
            .and_then(|value| match serde_json::from_value(value) {
                Ok(response) => Some(response),
                Err(e) => {
                    warn!(key, error = %e, "discarding undecodable cache entry");
                    None
                }
            });
        let counter = if hit.is_some() {
            telemetry::CACHE_HITS_TOTAL
        } else {
            telemetry::CACHE_MISSES_TOTAL
        };
        metrics::counter!(counter, "endpoint" => endpoint.path()).increment(1);
        if hit.is_some() {
            debug!(endpoint = %endpoint, "served from cache");
        }
        hit
    }

    /// `[primary] + fallbacks + degradation target`, minus disabled providers.
    fn attempt_chain(&self, kind: GenerationKind, selection: &Selection) -> Result<Vec<String>> {
        let mut attempts = selection.attempts();

        let resilience = self.resilience.load();
        if let Some(target) = resilience.degradation.target() {
            let present = attempts.iter().any(|a| a.eq_ignore_ascii_case(target));
            if !present && self.providers.contains(kind, target) {
                attempts.push(target.to_string());
            }
        }

        let flags = self.features.load();
        attempts.retain(|p| {
            let enabled = flags.provider_enabled(p);
            if !enabled {
                debug!(provider = %p, "skipping disabled provider");
            }
            enabled
        });

        if attempts.is_empty() {
            return Err(AtelierError::NoProvider(format!(
                "every {kind} provider is disabled"
            )));
        }
        Ok(attempts)
    }

    fn reserve(&self, provider: &str, endpoint: Endpoint) -> Result<Reservation> {
        let estimate = self.budget.estimate_cost(provider, endpoint);
        self.budget.try_reserve(estimate).map_err(|reason| {
            warn!(provider, endpoint = %endpoint, estimate, reason = %reason, "budget denied request");
            AtelierError::BudgetExceeded { reason }
        })
    }

    /// Walk the attempt chain. The reservation is released if every attempt
    /// fails and handed back otherwise.
    async fn run<F, Fut, T>(
        &self,
        endpoint: Endpoint,
        attempts: &[String],
        reservation: Reservation,
        op: F,
    ) -> Result<Served<Reserved<T>>>
    where
        F: Fn(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let policy = self.resilience.load();
        let breakers = &self.breakers;
        let op = &op;

        let outcome = execute_with_fallback(attempts, endpoint.path(), |provider| {
            let policy = Arc::clone(&policy);
            async move {
                if !breakers.can_attempt(&provider) {
                    return Err(AtelierError::CircuitOpen { provider });
                }
                let result = with_retry(&policy.retry, &provider, || {
                    with_timeout(&policy.timeout, &provider, endpoint.path(), op(provider.clone()))
                })
                .await;
                match &result {
                    Ok(_) => breakers.record_success(&provider),
                    Err(e) if counts_against_breaker(e) => breakers.record_failure(&provider),
                    Err(_) => breakers.record_neutral(&provider),
                }
                result
            }
        })
        .await;

        match outcome {
            Ok(served) => {
                if policy.degradation.target() == Some(served.provider.as_str())
                    && attempts.first() != Some(&served.provider)
                {
                    warn!(provider = %served.provider, "{}", policy.degradation.message);
                }
                Ok(Served {
                    provider: served.provider,
                    value: Reserved {
                        data: served.value,
                        reservation,
                    },
                })
            }
            Err(e) => {
                self.budget.release(reservation);
                Err(e)
            }
        }
    }

    /// Screen the response, cache it, book the spend.
    fn finish<T>(
        &self,
        endpoint: Endpoint,
        reservation: Reservation,
        response: T,
        cache_key: Option<String>,
    ) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
    {
        let screened = serde_json::to_value(&response)
            .map_err(AtelierError::from)
            .and_then(|value| self.pipeline.screen_response(endpoint, value));
        let screened: Value = match screened {
            Ok(value) => value,
            Err(e) => {
                self.budget.release(reservation);
                return Err(e);
            }
        };
        let response: T = match serde_json::from_value(screened.clone()) {
            Ok(response) => response,
            Err(e) => {
                self.budget.release(reservation);
                return Err(e.into());
            }
        };

        if let Some(key) = cache_key {
            if self.features.load().caching_enabled {
                self.cache.put(key, screened.clone(), endpoint.path());
            }
        }

        let provider = screened
            .get("provider")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let cost = self.budget.estimate_cost(provider, endpoint);
        self.budget.commit(reservation, cost);
        info!(endpoint = %endpoint, provider, cost, "generation complete");
        Ok(response)
    }

    // ========================================================================
    // Operations
    // ========================================================================

    pub fn budget_status(&self) -> BudgetStatus {
        self.budget.status()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        info!("response cache cleared");
    }

    pub fn circuits(&self) -> Vec<CircuitSnapshot> {
        self.breakers.snapshot()
    }

    /// Reload one policy domain from its source.
    pub fn reload(&self, domain: PolicyDomain) -> ReloadOutcome {
        let outcome = self.store.reload(domain);
        self.health.invalidate();
        outcome
    }

    pub fn reload_all(&self) -> Vec<(PolicyDomain, ReloadOutcome)> {
        let outcomes = self.store.reload_all();
        self.health.invalidate();
        outcomes
    }

    pub fn policies(&self) -> &PolicyStore {
        &self.store
    }

    pub fn health(&self) -> HealthReport {
        self.health.get_or_compute(|| {
            let mut checks = vec![HealthCheck::ok("service")];

            let degraded = self.store.degraded_domains();
            checks.push(if degraded.is_empty() {
                HealthCheck::ok("policies")
            } else {
                let names: Vec<_> = degraded.iter().map(|d| d.as_str()).collect();
                HealthCheck::degraded("policies", format!("running on defaults: {}", names.join(", ")))
            });

            let open = self.breakers.open_circuits();
            checks.push(if open.is_empty() {
                HealthCheck::ok("circuits")
            } else {
                HealthCheck::degraded("circuits", format!("open: {}", open.join(", ")))
            });

            HealthReport::from_checks(checks)
        })
    }

    pub fn provider_listing(&self, kind: GenerationKind) -> ProviderListing {
        ProviderListing {
            kind,
            default_provider: self.router.default_provider(kind),
            providers: self.router.listing(kind),
        }
    }

    /// Provider names with a registered client, per kind.
    pub fn registered_providers(&self, kind: GenerationKind) -> Vec<String> {
        self.providers.names(kind)
    }
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("store", &self.store)
            .field("providers", &self.providers)
            .finish_non_exhaustive()
    }
}

/// A provider result together with the budget it is booked against.
struct Reserved<T> {
    data: T,
    reservation: Reservation,
}

fn record_request(endpoint: Endpoint, provider: std::result::Result<&str, &AtelierError>, start: Instant) {
    let (provider, status) = match provider {
        Ok(p) => (p.to_owned(), "ok"),
        Err(_) => ("none".to_owned(), "error"),
    };
    metrics::counter!(telemetry::REQUESTS_TOTAL,
        "provider" => provider.clone(),
        "endpoint" => endpoint.path(),
        "status" => status,
    )
    .increment(1);
    metrics::histogram!(telemetry::REQUEST_DURATION_SECONDS,
        "provider" => provider,
        "endpoint" => endpoint.path(),
    )
    .record(start.elapsed().as_secs_f64());
}
