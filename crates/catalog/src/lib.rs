//! Catalog port over the durable ad store.
//!
//! The engine only depends on the operations here; the persistence schema
//! behind them is a deployment concern.

use adserve_core::types::{Ad, CreateAdRequest, Segment};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub mod memory;

pub use memory::MemoryCatalog;

pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("{0}")]
    Invalid(String),

    #[error("catalog unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait AdCatalog: Send + Sync {
    /// Active ads matching `(segment, channel)` whose date window contains
    /// `now`, ordered by descending priority.
    async fn find_candidates(
        &self,
        segment: Segment,
        channel: &str,
        now: DateTime<Utc>,
    ) -> CatalogResult<Vec<Ad>>;

    async fn get_ad(&self, ad_id: &str) -> CatalogResult<Option<Ad>>;

    /// Persist a new ad and return the stored record.
    async fn create_ad(&self, request: CreateAdRequest) -> CatalogResult<Ad>;

    /// Best-effort counter increment. Returns whether the ad exists.
    async fn increment_impressions(&self, ad_id: &str) -> CatalogResult<bool>;

    /// Best-effort counter increment. Returns whether the ad exists.
    async fn increment_clicks(&self, ad_id: &str) -> CatalogResult<bool>;
}
