//! In-memory ad catalog backed by DashMap.
//!
//! Production: replace with a durable document store behind the same trait.
//! This adapter provides the full API surface for development and the test
//! suite.

use crate::{AdCatalog, CatalogError, CatalogResult};
use adserve_core::types::{default_channels, Ad, AdStatus, CreateAdRequest, Segment};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryCatalog {
    ads: DashMap<String, Ad>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self { ads: DashMap::new() }
    }

    /// Insert a fully formed record, for tests and seeding.
    pub fn insert(&self, ad: Ad) {
        self.ads.insert(ad.id.clone(), ad);
    }

    pub fn len(&self) -> usize {
        self.ads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ads.is_empty()
    }

    /// Seed a handful of demo ads across segments, for local development.
    pub fn seed_demo(&self) {
        let now = Utc::now();
        let demo = [
            ("Everyday savings booster", Segment::Low, 2.0),
            ("Premier cashback card", Segment::Mass, 3.0),
            ("Wealth advisory consult", Segment::Affluent, 4.0),
            ("Private banking desk", Segment::Hnw, 5.0),
        ];
        for (title, segment, priority) in demo {
            let id = Uuid::new_v4().to_string();
            self.ads.insert(
                id.clone(),
                Ad {
                    id,
                    title: title.to_string(),
                    image_url: format!(
                        "https://cdn.adserve.local/{}.png",
                        title.to_lowercase().replace(' ', "-")
                    ),
                    video_url: None,
                    cta: Some("Learn more".to_string()),
                    segments: vec![segment],
                    channels: default_channels(),
                    locations: None,
                    time_slots: None,
                    start_date: now - Duration::days(1),
                    end_date: now + Duration::days(30),
                    status: AdStatus::Active,
                    priority,
                    impressions: 0,
                    clicks: 0,
                    advertiser: None,
                    created_at: now,
                    updated_at: now,
                },
            );
        }
        info!(count = self.ads.len(), "Seeded demo ads");
    }
}

fn validate(request: &CreateAdRequest) -> CatalogResult<()> {
    if request.title.trim().is_empty() {
        return Err(CatalogError::Invalid("title is required".to_string()));
    }
    if request.image_url.trim().is_empty() {
        return Err(CatalogError::Invalid("imageUrl is required".to_string()));
    }
    if request.segments.is_empty() {
        return Err(CatalogError::Invalid(
            "at least one segment is required".to_string(),
        ));
    }
    if request.start_date > request.end_date {
        return Err(CatalogError::Invalid(
            "startDate must not be after endDate".to_string(),
        ));
    }
    Ok(())
}

#[async_trait]
impl AdCatalog for MemoryCatalog {
    async fn find_candidates(
        &self,
        segment: Segment,
        channel: &str,
        now: DateTime<Utc>,
    ) -> CatalogResult<Vec<Ad>> {
        let mut candidates: Vec<Ad> = self
            .ads
            .iter()
            .filter(|entry| {
                let ad = entry.value();
                ad.status == AdStatus::Active
                    && ad.segments.contains(&segment)
                    && ad.channels.iter().any(|c| c.as_str() == channel)
                    && ad.start_date <= now
                    && now <= ad.end_date
            })
            .map(|entry| entry.value().clone())
            .collect();

        candidates.sort_by(|a, b| {
            b.priority
                .total_cmp(&a.priority)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(candidates)
    }

    async fn get_ad(&self, ad_id: &str) -> CatalogResult<Option<Ad>> {
        Ok(self.ads.get(ad_id).map(|entry| entry.value().clone()))
    }

    async fn create_ad(&self, request: CreateAdRequest) -> CatalogResult<Ad> {
        validate(&request)?;
        let now = Utc::now();
        // Channel default mirrors the persistence schema: absent means ATM.
        let channels = if request.channels.is_empty() {
            default_channels()
        } else {
            request.channels
        };
        let ad = Ad {
            id: Uuid::new_v4().to_string(),
            title: request.title,
            image_url: request.image_url,
            video_url: request.video_url,
            cta: request.cta,
            segments: request.segments,
            channels,
            locations: request.locations,
            time_slots: request.time_slots,
            start_date: request.start_date,
            end_date: request.end_date,
            status: request.status,
            priority: request.priority,
            impressions: 0,
            clicks: 0,
            advertiser: request.advertiser,
            created_at: now,
            updated_at: now,
        };
        self.ads.insert(ad.id.clone(), ad.clone());
        Ok(ad)
    }

    async fn increment_impressions(&self, ad_id: &str) -> CatalogResult<bool> {
        match self.ads.get_mut(ad_id) {
            Some(mut entry) => {
                entry.impressions += 1;
                entry.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn increment_clicks(&self, ad_id: &str) -> CatalogResult<bool> {
        match self.ads.get_mut(ad_id) {
            Some(mut entry) => {
                entry.clicks += 1;
                entry.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }
}
