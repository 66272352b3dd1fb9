//! Rate-limit middleware.
//!
//! Applies the two-layer sliding-window limiter and decorates every response
//! with `X-RateLimit-Limit` / `X-RateLimit-Remaining`. Denials return 429
//! with `Retry-After` and a JSON body; the limiter itself fails open when the
//! KV store is unreachable.

use crate::auth::ApiKeyContext;
use crate::server::AppState;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use tracing::debug;

pub const LIMIT_HEADER: &str = "x-ratelimit-limit";
pub const REMAINING_HEADER: &str = "x-ratelimit-remaining";

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct RateLimitBody {
    error: &'static str,
    retry_after: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    tier: Option<&'static str>,
}

/// Client IP for the per-IP bucket: first `X-Forwarded-For` entry, then
/// `X-Real-IP`, else a shared "unknown" bucket.
pub fn client_ip(headers: &HeaderMap) -> String {
    if let Some(forwarded) = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
    {
        if let Some(first) = forwarded.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }
    headers
        .get("x-real-ip")
        .and_then(|value| value.to_str().ok())
        .map(|ip| ip.trim().to_string())
        .filter(|ip| !ip.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let ip = client_ip(request.headers());
    let api_key = request.extensions().get::<ApiKeyContext>().cloned();

    let outcome = state
        .limiter
        .check(
            &ip,
            api_key.as_ref().map(|ctx| (ctx.key.as_str(), ctx.tier)),
            &path,
        )
        .await;

    if !outcome.allowed {
        debug!(ip, path, "Request rate limited");
        let mut response = (
            StatusCode::TOO_MANY_REQUESTS,
            Json(RateLimitBody {
                error: "Rate limit exceeded",
                retry_after: outcome.retry_after_secs,
                tier: outcome.tier.map(|tier| tier.as_str()),
            }),
        )
            .into_response();
        let headers = response.headers_mut();
        insert_number(headers, "retry-after", outcome.retry_after_secs);
        insert_number(headers, LIMIT_HEADER, outcome.limit as u64);
        insert_number(headers, REMAINING_HEADER, 0);
        return response;
    }

    let mut response = next.run(request).await;
    let headers = response.headers_mut();
    insert_number(headers, LIMIT_HEADER, outcome.limit as u64);
    insert_number(headers, REMAINING_HEADER, outcome.remaining as u64);
    response
}

fn insert_number(headers: &mut HeaderMap, name: &'static str, value: u64) {
    if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
        headers.insert(name, value);
    }
}
