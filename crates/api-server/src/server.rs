//! Server assembly: shared state, router, and the HTTP + metrics listeners.

use crate::{auth, limit, rest};
use adserve_catalog::AdCatalog;
use adserve_core::clock::Clock;
use adserve_core::config::{AppConfig, AuthConfig};
use adserve_engine::{ProfileStore, ServeCache, ServeEngine};
use adserve_kv::KvStore;
use adserve_rate_limit::SlidingWindowLimiter;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state for handlers and middleware.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<ServeEngine>,
    pub catalog: Arc<dyn AdCatalog>,
    pub cache: ServeCache,
    pub profiles: ProfileStore,
    pub limiter: Arc<SlidingWindowLimiter>,
    pub kv: Arc<dyn KvStore>,
    pub auth: Arc<AuthConfig>,
    pub start_time: Instant,
}

impl AppState {
    pub fn new(
        config: &AppConfig,
        kv: Arc<dyn KvStore>,
        catalog: Arc<dyn AdCatalog>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let engine = Arc::new(ServeEngine::new(
            catalog.clone(),
            kv.clone(),
            clock.clone(),
            config.serving.clone(),
        ));
        let limiter = Arc::new(SlidingWindowLimiter::new(
            kv.clone(),
            clock,
            config.rate_limit.clone(),
        ));
        Self {
            cache: engine.cache(),
            profiles: engine.profiles(),
            engine,
            catalog,
            limiter,
            kv,
            auth: Arc::new(config.auth.clone()),
            start_time: Instant::now(),
        }
    }
}

/// Assemble the full route tree. Auth runs before rate limiting on the
/// analytics routes so tier buckets apply.
pub fn build_router(state: AppState) -> Router {
    let serve_routes = Router::new()
        .route("/api/v1/ads/serve", post(rest::serve_ad))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            limit::rate_limit,
        ))
        .with_state(state.clone());

    let admin_routes = Router::new()
        .route("/api/v1/ads/create", post(rest::create_ad))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .with_state(state.clone());

    let analytics_routes = Router::new()
        .route("/api/v1/ads/impression", post(rest::record_impression))
        .route("/api/v1/ads/click", post(rest::record_click))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            limit::rate_limit,
        ))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ))
        .with_state(state.clone());

    let ops_routes = Router::new()
        .route("/api/v1/health", get(rest::health_check))
        .route("/ready", get(rest::readiness))
        .route("/live", get(rest::liveness))
        .with_state(state);

    Router::new()
        .merge(serve_routes)
        .merge(admin_routes)
        .merge(analytics_routes)
        .merge(ops_routes)
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

/// HTTP server plus the Prometheus side listener.
pub struct ApiServer {
    config: AppConfig,
    state: AppState,
}

impl ApiServer {
    pub fn new(config: AppConfig, state: AppState) -> Self {
        Self { config, state }
    }

    /// Start the HTTP server. Blocks until shutdown.
    pub async fn start_http(&self) -> anyhow::Result<()> {
        let app = build_router(self.state.clone());
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.api.http_port);

        info!(addr = %addr, "Starting HTTP server");

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app).await?;
        Ok(())
    }

    /// Start the metrics exporter on its own port.
    pub fn start_metrics(&self) -> anyhow::Result<()> {
        let addr = SocketAddr::new(self.config.api.host.parse()?, self.config.metrics.port);
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()?;
        info!(port = self.config.metrics.port, "Metrics exporter started");
        Ok(())
    }
}
