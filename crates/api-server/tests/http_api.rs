//! HTTP-level tests over the full router with in-memory adapters.

use adserve_api::{build_router, AppState};
use adserve_catalog::MemoryCatalog;
use adserve_core::clock::FixedClock;
use adserve_core::config::AppConfig;
use adserve_core::types::{Ad, AdStatus, Channel, Segment};
use adserve_kv::{KvStore, MemoryKv};
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;
use tower::ServiceExt;

const DEV_KEY: &str = "adserve-dev-standard";

fn ten_am() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap()
}

fn ad(id: &str, segment: Segment) -> Ad {
    let now = ten_am();
    Ad {
        id: id.to_string(),
        title: format!("Ad {id}"),
        image_url: format!("https://cdn/{id}.png"),
        video_url: None,
        cta: None,
        segments: vec![segment],
        channels: vec![Channel::Atm],
        locations: None,
        time_slots: None,
        start_date: now - Duration::days(1),
        end_date: now + Duration::days(1),
        status: AdStatus::Active,
        priority: 1.0,
        impressions: 0,
        clicks: 0,
        advertiser: None,
        created_at: now,
        updated_at: now,
    }
}

struct TestApp {
    app: Router,
    kv: Arc<MemoryKv>,
    catalog: Arc<MemoryCatalog>,
}

fn test_app() -> TestApp {
    let kv = Arc::new(MemoryKv::new());
    let catalog = Arc::new(MemoryCatalog::new());
    let clock = FixedClock::at(ten_am());
    let state = AppState::new(
        &AppConfig::default(),
        kv.clone(),
        catalog.clone(),
        Arc::new(clock),
    );
    TestApp {
        app: build_router(state),
        kv,
        catalog,
    }
}

fn json_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .expect("request")
}

fn authed_request(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .header("x-api-key", DEV_KEY)
        .body(Body::from(body.to_string()))
        .expect("request")
}

async fn read_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("body");
    serde_json::from_slice(&bytes).expect("json")
}

fn serve_body(customer: &str) -> serde_json::Value {
    serde_json::json!({
        "balance": 120000,
        "channel": "ATM",
        "customerId": customer,
    })
}

#[tokio::test]
async fn health_is_open_and_reports_kv_state() {
    let t = test_app();
    let response = t
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["kvAvailable"], serde_json::Value::Bool(true));
}

#[tokio::test]
async fn serve_returns_ad_with_rate_limit_headers() {
    let t = test_app();
    t.catalog.insert(ad("promo", Segment::Mass));

    let response = t
        .app
        .clone()
        .oneshot(json_request("POST", "/api/v1/ads/serve", serve_body("C1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get("x-ratelimit-limit").unwrap(),
        "100"
    );
    assert_eq!(
        response.headers().get("x-ratelimit-remaining").unwrap(),
        "99"
    );
    let body = read_json(response).await;
    assert_eq!(body["adId"], "promo");
    assert_eq!(body["segment"], "mass");
    assert_eq!(body["channel"], "ATM");
}

#[tokio::test]
async fn serve_validates_input() {
    let t = test_app();

    let response = t
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/ads/serve",
            serde_json::json!({ "balance": 100 }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = read_json(response).await;
    assert_eq!(body["error"], "customerId is required");

    let response = t
        .app
        .clone()
        .oneshot(json_request(
            "POST",
            "/api/v1/ads/serve",
            serde_json::json!({ "balance": -5, "customerId": "C1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn serve_without_matches_is_404() {
    let t = test_app();
    let response = t
        .app
        .clone()
        .oneshot(json_request("POST", "/api/v1/ads/serve", serve_body("C1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = read_json(response).await;
    assert_eq!(body["message"], "No ad available");
}

#[tokio::test]
async fn hundred_and_first_request_is_rate_limited() {
    let t = test_app();
    t.catalog.insert(ad("promo", Segment::Mass));

    for i in 0..100 {
        let response = t
            .app
            .clone()
            .oneshot(json_request("POST", "/api/v1/ads/serve", serve_body("C1")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK, "request {i}");
    }

    let response = t
        .app
        .clone()
        .oneshot(json_request("POST", "/api/v1/ads/serve", serve_body("C1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(response.headers().get("retry-after").unwrap(), "60");
    assert_eq!(
        response.headers().get("x-ratelimit-remaining").unwrap(),
        "0"
    );
    let body = read_json(response).await;
    assert_eq!(body["error"], "Rate limit exceeded");
    assert_eq!(body["retryAfter"], 60);
}

#[tokio::test]
async fn distinct_ips_have_distinct_budgets() {
    let t = test_app();
    t.catalog.insert(ad("promo", Segment::Mass));

    for _ in 0..101 {
        let mut request = json_request("POST", "/api/v1/ads/serve", serve_body("C1"));
        request
            .headers_mut()
            .insert("x-forwarded-for", "203.0.113.1".parse().unwrap());
        t.app.clone().oneshot(request).await.unwrap();
    }

    let mut request = json_request("POST", "/api/v1/ads/serve", serve_body("C1"));
    request
        .headers_mut()
        .insert("x-forwarded-for", "203.0.113.2".parse().unwrap());
    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

fn create_body() -> serde_json::Value {
    serde_json::json!({
        "title": "Term deposit special",
        "imageUrl": "https://cdn/term.png",
        "segments": ["mass"],
        "channels": ["ATM"],
        "startDate": "2024-06-01T00:00:00Z",
        "endDate": "2024-12-31T00:00:00Z",
        "priority": 2.5,
    })
}

#[tokio::test]
async fn create_requires_a_valid_api_key() {
    let t = test_app();

    let response = t
        .app
        .clone()
        .oneshot(json_request("POST", "/api/v1/ads/create", create_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let mut request = json_request("POST", "/api/v1/ads/create", create_body());
    request
        .headers_mut()
        .insert("x-api-key", "not-a-real-key".parse().unwrap());
    let response = t.app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = t
        .app
        .clone()
        .oneshot(authed_request("POST", "/api/v1/ads/create", create_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    assert_eq!(body["title"], "Term deposit special");
    assert!(body["id"].as_str().is_some());
    assert_eq!(t.catalog.len(), 1);
}

#[tokio::test]
async fn create_rejects_invalid_payload() {
    let t = test_app();
    let mut body = create_body();
    body["startDate"] = serde_json::json!("2025-06-01T00:00:00Z");
    let response = t
        .app
        .clone()
        .oneshot(authed_request("POST", "/api/v1/ads/create", body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn create_invalidates_cached_responses_for_its_targeting() {
    let t = test_app();
    t.catalog.insert(ad("old", Segment::Mass));

    // Populate the personalised cache for (mass, ATM, C1).
    t.app
        .clone()
        .oneshot(json_request("POST", "/api/v1/ads/serve", serve_body("C1")))
        .await
        .unwrap();
    let mut present = false;
    for _ in 0..200 {
        if t.kv.get("ad:mass:ATM:C1").await.unwrap().is_some() {
            present = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(present, "cache entry must be written first");

    // Creating a mass/ATM ad must sweep that key.
    let response = t
        .app
        .clone()
        .oneshot(authed_request("POST", "/api/v1/ads/create", create_body()))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let mut removed = false;
    for _ in 0..200 {
        if t.kv.get("ad:mass:ATM:C1").await.unwrap().is_none() {
            removed = true;
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(removed, "stale cache entry must be invalidated");
}

#[tokio::test]
async fn impression_and_click_update_counters() {
    let t = test_app();
    t.catalog.insert(ad("promo", Segment::Mass));

    let response = t
        .app
        .clone()
        .oneshot(authed_request(
            "POST",
            "/api/v1/ads/impression",
            serde_json::json!({ "adId": "promo", "customerId": "C1" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["status"], "recorded");

    let response = t
        .app
        .clone()
        .oneshot(authed_request(
            "POST",
            "/api/v1/ads/click",
            serde_json::json!({ "adId": "promo" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    use adserve_catalog::AdCatalog;
    let stored = t.catalog.get_ad("promo").await.unwrap().unwrap();
    assert_eq!(stored.impressions, 1);
    assert_eq!(stored.clicks, 1);

    // The named customer eventually gets a profile entry.
    let mut recorded = false;
    for _ in 0..200 {
        if let Ok(Some(json)) = t.kv.get("userprofile:C1").await {
            if json.contains("promo") {
                recorded = true;
                break;
            }
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    assert!(recorded);
}

#[tokio::test]
async fn analytics_reject_unknown_ads() {
    let t = test_app();
    let response = t
        .app
        .clone()
        .oneshot(authed_request(
            "POST",
            "/api/v1/ads/impression",
            serde_json::json!({ "adId": "ghost" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = read_json(response).await;
    assert_eq!(body["message"], "Ad not found");
}

#[tokio::test]
async fn serve_survives_kv_outage() {
    let t = test_app();
    t.catalog.insert(ad("promo", Segment::Mass));
    t.kv.set_available(false);

    let response = t
        .app
        .clone()
        .oneshot(json_request("POST", "/api/v1/ads/serve", serve_body("C1")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK, "fail-open end to end");
    let body = read_json(response).await;
    assert_eq!(body["adId"], "promo");
}
