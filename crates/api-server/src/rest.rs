//! REST handlers for the ad-serving, admin, and analytics endpoints.

use crate::server::AppState;
use adserve_catalog::CatalogError;
use adserve_core::error::AdServeError;
use adserve_core::types::{
    Ad, ClickRequest, CreateAdRequest, ImpressionRequest, ServeRequest, ServeResponse,
};
use adserve_engine::sanitize_customer_id;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use serde_json::json;
use tracing::error;

/// Error wrapper mapping the engine taxonomy onto HTTP statuses. Client
/// errors keep their message; internal failures are logged and collapsed.
pub struct ApiError(pub AdServeError);

impl From<AdServeError> for ApiError {
    fn from(err: AdServeError) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self.0 {
            AdServeError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            AdServeError::Unauthenticated(msg) => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": msg }))).into_response()
            }
            AdServeError::Forbidden(msg) => {
                (StatusCode::FORBIDDEN, Json(json!({ "error": msg }))).into_response()
            }
            AdServeError::NotFound(msg) => {
                (StatusCode::NOT_FOUND, Json(json!({ "message": msg }))).into_response()
            }
            AdServeError::RateLimited {
                retry_after_secs,
                tier,
            } => {
                let mut body = json!({
                    "error": "Rate limit exceeded",
                    "retryAfter": retry_after_secs,
                });
                if let Some(tier) = tier {
                    body["tier"] = json!(tier);
                }
                (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response()
            }
            err => {
                error!(error = %err, "Request failed");
                metrics::counter!("api.errors").increment(1);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": err.to_string() })),
                )
                    .into_response()
            }
        }
    }
}

fn map_catalog(err: CatalogError) -> ApiError {
    match err {
        CatalogError::Invalid(msg) => ApiError(AdServeError::Validation(msg)),
        CatalogError::Unavailable(msg) => {
            ApiError(AdServeError::Internal(anyhow::anyhow!(msg)))
        }
    }
}

#[derive(Serialize)]
pub struct AckResponse {
    pub status: &'static str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: String,
    pub uptime_secs: u64,
    pub kv_available: bool,
}

/// POST /api/v1/ads/serve — the targeting pipeline.
pub async fn serve_ad(
    State(state): State<AppState>,
    Json(request): Json<ServeRequest>,
) -> Result<Json<ServeResponse>, ApiError> {
    let response = state.engine.serve(request).await?;
    Ok(Json(response))
}

/// POST /api/v1/ads/create — persist an ad, then invalidate every cached
/// response the new ad could change. Invalidation is asynchronous and its
/// failure never fails the create.
pub async fn create_ad(
    State(state): State<AppState>,
    Json(request): Json<CreateAdRequest>,
) -> Result<(StatusCode, Json<Ad>), ApiError> {
    let ad = state.catalog.create_ad(request).await.map_err(map_catalog)?;
    metrics::counter!("catalog.ads_created").increment(1);

    let cache = state.cache.clone();
    let segments = ad.segments.clone();
    let channels = ad.channels.clone();
    tokio::spawn(async move {
        cache.invalidate(&segments, &channels).await;
    });

    Ok((StatusCode::CREATED, Json(ad)))
}

/// POST /api/v1/ads/impression — analytics increment, plus a best-effort
/// profile record when the caller names the customer.
pub async fn record_impression(
    State(state): State<AppState>,
    Json(request): Json<ImpressionRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    let found = state
        .catalog
        .increment_impressions(&request.ad_id)
        .await
        .map_err(map_catalog)?;
    if !found {
        return Err(ApiError(AdServeError::NotFound("Ad not found".to_string())));
    }
    metrics::counter!("catalog.impressions").increment(1);

    if let Some(customer_id) = request
        .customer_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
    {
        let profiles = state.profiles.clone();
        let customer = sanitize_customer_id(customer_id);
        let ad_id = request.ad_id.clone();
        tokio::spawn(async move {
            profiles.record_impression(&customer, &ad_id).await;
        });
    }

    Ok(Json(AckResponse { status: "recorded" }))
}

/// POST /api/v1/ads/click — analytics increment.
pub async fn record_click(
    State(state): State<AppState>,
    Json(request): Json<ClickRequest>,
) -> Result<Json<AckResponse>, ApiError> {
    let found = state
        .catalog
        .increment_clicks(&request.ad_id)
        .await
        .map_err(map_catalog)?;
    if !found {
        return Err(ApiError(AdServeError::NotFound("Ad not found".to_string())));
    }
    metrics::counter!("catalog.clicks").increment(1);
    Ok(Json(AckResponse { status: "recorded" }))
}

/// GET /api/v1/health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
        kv_available: state.kv.is_available(),
    })
}

/// GET /ready — Readiness probe.
pub async fn readiness() -> StatusCode {
    StatusCode::OK
}

/// GET /live — Liveness probe.
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}
