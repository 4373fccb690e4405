//! axum routes over a shared [`Gateway`].

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Serialize;
use tower::limit::GlobalConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use super::config::LimitsConfig;
use super::error::ApiError;
use crate::budget::BudgetStatus;
use crate::cache::CacheStats;
use crate::gateway::{Gateway, ProviderListing};
use crate::health::HealthReport;
use crate::policy::{PolicyDomain, ReloadOutcome};
use crate::resilience::CircuitSnapshot;
use crate::types::{
    DiagramRequest, DiagramResponse, GenerationKind, ImageRequest, ImageResponse, VideoRequest,
    VideoResponse,
};
use crate::AtelierError;

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Build the HTTP surface.
pub fn router(gateway: Arc<Gateway>, limits: &LimitsConfig) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/v1/images/generate", post(generate_image))
        .route("/v1/images/generate/thumbnail", post(generate_thumbnail))
        .route("/v1/diagrams/generate", post(generate_diagram))
        .route("/v1/videos/generate", post(generate_video))
        .route("/v1/videos/animate", post(animate_image))
        .route("/v1/providers/{kind}", get(list_providers))
        .route("/v1/policies/{domain}/reload", post(reload_policy))
        .route("/v1/cost-control/budget", get(budget_status))
        .route("/v1/cache/stats", get(cache_stats))
        .route("/v1/cache", delete(clear_cache))
        .route("/v1/circuits", get(circuits))
        .layer(TimeoutLayer::new(limits.request_timeout()))
        .layer(GlobalConcurrencyLimitLayer::new(limits.max_concurrent_requests.max(1)))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_headers(Any)
                .allow_methods(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(gateway)
}

async fn healthz(State(gateway): State<Arc<Gateway>>) -> (StatusCode, Json<HealthReport>) {
    let report = gateway.health();
    let status = if report.is_healthy() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status, Json(report))
}

async fn generate_image(
    State(gateway): State<Arc<Gateway>>,
    Json(request): Json<ImageRequest>,
) -> ApiResult<ImageResponse> {
    Ok(Json(gateway.generate_image(request).await?))
}

async fn generate_thumbnail(
    State(gateway): State<Arc<Gateway>>,
    Json(request): Json<ImageRequest>,
) -> ApiResult<ImageResponse> {
    Ok(Json(gateway.generate_thumbnail(request).await?))
}

async fn generate_diagram(
    State(gateway): State<Arc<Gateway>>,
    Json(request): Json<DiagramRequest>,
) -> ApiResult<DiagramResponse> {
    Ok(Json(gateway.generate_diagram(request).await?))
}

async fn generate_video(
    State(gateway): State<Arc<Gateway>>,
    Json(request): Json<VideoRequest>,
) -> ApiResult<VideoResponse> {
    Ok(Json(gateway.generate_video(request).await?))
}

async fn animate_image(
    State(gateway): State<Arc<Gateway>>,
    Json(request): Json<VideoRequest>,
) -> ApiResult<VideoResponse> {
    Ok(Json(gateway.animate_image(request).await?))
}

async fn list_providers(
    State(gateway): State<Arc<Gateway>>,
    Path(kind): Path<String>,
) -> ApiResult<ProviderListing> {
    let kind = GenerationKind::from_plural(&kind).ok_or_else(|| {
        AtelierError::InvalidInput(format!(
            "unknown provider kind '{kind}', expected images, diagrams or videos"
        ))
    })?;
    Ok(Json(gateway.provider_listing(kind)))
}

#[derive(Serialize)]
struct ReloadResponse {
    domain: &'static str,
    #[serde(flatten)]
    outcome: ReloadOutcome,
}

async fn reload_policy(
    State(gateway): State<Arc<Gateway>>,
    Path(domain): Path<String>,
) -> ApiResult<ReloadResponse> {
    let domain: PolicyDomain = domain.parse()?;
    let outcome = gateway.reload(domain);
    Ok(Json(ReloadResponse {
        domain: domain.as_str(),
        outcome,
    }))
}

async fn budget_status(State(gateway): State<Arc<Gateway>>) -> Json<BudgetStatus> {
    Json(gateway.budget_status())
}

async fn cache_stats(State(gateway): State<Arc<Gateway>>) -> Json<CacheStats> {
    Json(gateway.cache_stats())
}

async fn clear_cache(State(gateway): State<Arc<Gateway>>) -> StatusCode {
    gateway.clear_cache();
    StatusCode::NO_CONTENT
}

async fn circuits(State(gateway): State<Arc<Gateway>>) -> Json<Vec<CircuitSnapshot>> {
    Json(gateway.circuits())
}
