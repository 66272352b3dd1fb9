//! Serving orchestrator.
//!
//! Composes the pipeline stages and owns the degradation policy: a KV outage
//! quietly disables cache and profile features, an empty post-filter set
//! falls back to the least-shown catalog match, and an unexpected pipeline
//! failure attempts one degraded priority-ordered lookup before giving up.

use crate::cache::{sanitize_customer_id, ServeCache};
use crate::filters::{filter_by_frequency, filter_by_time_slot};
use crate::profile::ProfileStore;
use crate::scorer::rank;
use adserve_catalog::{AdCatalog, CatalogError};
use adserve_core::clock::Clock;
use adserve_core::config::ServingConfig;
use adserve_core::error::{AdServeError, AdServeResult};
use adserve_core::types::{Ad, Segment, ServeRequest, ServeResponse};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const MAX_CUSTOMER_ID_LEN: usize = 64;

pub struct ServeEngine {
    catalog: Arc<dyn AdCatalog>,
    profiles: ProfileStore,
    cache: ServeCache,
    clock: Arc<dyn Clock>,
    config: ServingConfig,
}

#[derive(Debug)]
struct ValidInput {
    balance: f64,
    channel: String,
    customer_id: String,
}

fn validate(request: &ServeRequest) -> AdServeResult<ValidInput> {
    let customer_id = request
        .customer_id
        .as_deref()
        .map(str::trim)
        .unwrap_or_default();
    if customer_id.is_empty() {
        return Err(AdServeError::Validation("customerId is required".to_string()));
    }
    if customer_id.chars().count() > MAX_CUSTOMER_ID_LEN {
        return Err(AdServeError::Validation(format!(
            "customerId must be at most {MAX_CUSTOMER_ID_LEN} characters"
        )));
    }

    let balance = request
        .balance
        .filter(|balance| balance.is_finite() && *balance >= 0.0)
        .ok_or_else(|| {
            AdServeError::Validation("balance must be a non-negative number".to_string())
        })?;

    let channel = request
        .channel
        .as_deref()
        .map(str::trim)
        .filter(|channel| !channel.is_empty())
        .unwrap_or("ATM")
        .to_string();

    Ok(ValidInput {
        balance,
        channel,
        customer_id: customer_id.to_string(),
    })
}

fn response_for(ad: &Ad, segment: Segment, channel: &str, fallback: bool) -> ServeResponse {
    ServeResponse {
        ad_id: ad.id.clone(),
        title: ad.title.clone(),
        image_url: ad.image_url.clone(),
        video_url: ad.video_url.clone(),
        cta: ad.cta.clone(),
        segment,
        channel: channel.to_string(),
        fallback: fallback.then_some(true),
    }
}

fn map_catalog(err: CatalogError) -> AdServeError {
    match err {
        CatalogError::Invalid(msg) => AdServeError::Validation(msg),
        CatalogError::Unavailable(msg) => AdServeError::Internal(anyhow::anyhow!(msg)),
    }
}

impl ServeEngine {
    pub fn new(
        catalog: Arc<dyn AdCatalog>,
        kv: Arc<dyn adserve_kv::KvStore>,
        clock: Arc<dyn Clock>,
        config: ServingConfig,
    ) -> Self {
        let profiles = ProfileStore::new(kv.clone(), clock.clone(), &config);
        let cache = ServeCache::new(kv, config.cache.clone());
        Self {
            catalog,
            profiles,
            cache,
            clock,
            config,
        }
    }

    /// Shared handle to the serve cache, used by the admin path to fan out
    /// invalidations.
    pub fn cache(&self) -> ServeCache {
        self.cache.clone()
    }

    /// Shared handle to the profile store, used by the analytics path.
    pub fn profiles(&self) -> ProfileStore {
        self.profiles.clone()
    }

    /// Select one ad for the customer. Client errors (validation, no match)
    /// surface as-is; anything unexpected takes the degraded path before a
    /// 500 is admitted.
    pub async fn serve(&self, request: ServeRequest) -> AdServeResult<ServeResponse> {
        metrics::counter!("serve.requests").increment(1);

        let input = validate(&request)?;
        let segment = Segment::from_balance(input.balance, &self.config.segment_thresholds);
        let customer = sanitize_customer_id(&input.customer_id);

        if let Some(hit) = self.cache.lookup(segment, &input.channel, &customer).await {
            return Ok(hit);
        }

        match self.run_pipeline(segment, &input.channel, &customer).await {
            Ok(response) => Ok(response),
            Err(err @ AdServeError::NotFound(_)) => {
                metrics::counter!("serve.not_found").increment(1);
                Err(err)
            }
            Err(err) => {
                warn!(
                    segment = %segment,
                    channel = %input.channel,
                    error = %err,
                    "Serve pipeline failed, taking degraded path"
                );
                metrics::counter!("serve.fallback.outer").increment(1);
                self.degraded(segment, &input.channel).await
            }
        }
    }

    async fn run_pipeline(
        &self,
        segment: Segment,
        channel: &str,
        customer: &str,
    ) -> AdServeResult<ServeResponse> {
        let now = self.clock.now();
        let profile = self.profiles.get(customer).await;

        let candidates = tokio::time::timeout(
            Duration::from_millis(self.config.catalog_timeout_ms),
            self.catalog.find_candidates(segment, channel, now),
        )
        .await
        .map_err(|_| AdServeError::CatalogTimeout)?
        .map_err(map_catalog)?;

        if candidates.is_empty() {
            return Err(AdServeError::NotFound("No ad available".to_string()));
        }

        let (slot_eligible, slot_excluded) = filter_by_time_slot(candidates.clone(), now);
        let (eligible, freq_excluded) =
            filter_by_frequency(slot_eligible, &profile, now, &self.config.frequency);
        if !slot_excluded.is_empty() || !freq_excluded.is_empty() {
            debug!(
                customer,
                outside_slot = slot_excluded.len(),
                frequency_capped = freq_excluded.len(),
                "Filtered candidates"
            );
        }

        let supply = eligible.len();
        let winner = if eligible.is_empty() {
            // Every match is capped or out of slot. Serve the least-shown ad
            // from the pre-filter set rather than nothing.
            metrics::counter!("serve.fallback.least_shown").increment(1);
            candidates
                .iter()
                .min_by(|a, b| {
                    a.impressions
                        .cmp(&b.impressions)
                        .then_with(|| a.id.cmp(&b.id))
                })
                .cloned()
                .ok_or_else(|| AdServeError::NotFound("No ad available".to_string()))?
        } else {
            let mut ranked = rank(eligible, now, &self.config);
            ranked.remove(0).ad
        };

        let response = response_for(&winner, segment, channel, false);

        let profiles = self.profiles.clone();
        let record_customer = customer.to_string();
        let record_ad = winner.id.clone();
        tokio::spawn(async move {
            profiles.record_impression(&record_customer, &record_ad).await;
        });

        let cache = self.cache.clone();
        let cache_channel = channel.to_string();
        let cache_customer = customer.to_string();
        let cached = response.clone();
        tokio::spawn(async move {
            cache
                .store(segment, &cache_channel, &cache_customer, &cached, supply)
                .await;
        });

        Ok(response)
    }

    /// Degraded path: one priority-ordered lookup under the same catalog
    /// deadline as the pipeline, no filters, no profile write. The missing
    /// impression record here matches the observed behavior of the original
    /// service and is pending a product decision.
    async fn degraded(&self, segment: Segment, channel: &str) -> AdServeResult<ServeResponse> {
        let now = self.clock.now();
        let ads = tokio::time::timeout(
            Duration::from_millis(self.config.catalog_timeout_ms),
            self.catalog.find_candidates(segment, channel, now),
        )
        .await
        .map_err(|_| {
            warn!("Degraded catalog lookup timed out");
            AdServeError::Internal(anyhow::anyhow!("Failed to serve ad"))
        })?
        .map_err(|err| {
            warn!(error = %err, "Degraded catalog lookup failed");
            AdServeError::Internal(anyhow::anyhow!("Failed to serve ad"))
        })?;

        match ads.first() {
            Some(ad) => Ok(response_for(ad, segment, channel, true)),
            None => Err(AdServeError::Internal(anyhow::anyhow!("Failed to serve ad"))),
        }
    }
}
