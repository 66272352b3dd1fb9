//! API-key authentication for the admin and analytics routes.
//!
//! Keys arrive in the `X-API-Key` header and map to a tier in configuration.
//! The tier rides along in request extensions so the rate limiter downstream
//! can pick the right bucket.

use crate::server::AppState;
use adserve_core::config::ApiTier;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

pub const API_KEY_HEADER: &str = "x-api-key";

/// Authenticated caller context for downstream middleware.
#[derive(Debug, Clone)]
pub struct ApiKeyContext {
    pub key: String,
    pub tier: ApiTier,
}

pub async fn require_api_key(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let presented = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string);

    match presented {
        None => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "API key required" })),
        )
            .into_response(),
        Some(key) => match state.auth.tier_for(&key) {
            Some(tier) => {
                request
                    .extensions_mut()
                    .insert(ApiKeyContext { key, tier });
                next.run(request).await
            }
            None => {
                metrics::counter!("auth.rejected").increment(1);
                (
                    StatusCode::FORBIDDEN,
                    Json(json!({ "error": "Invalid API key" })),
                )
                    .into_response()
            }
        },
    }
}
