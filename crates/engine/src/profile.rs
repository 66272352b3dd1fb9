//! Per-customer impression profiles in the KV store.
//!
//! Profiles are advisory: a read that fails for any reason yields an empty
//! profile, and a write that fails is logged and dropped. Serving never
//! blocks on this store.

use adserve_core::clock::Clock;
use adserve_core::config::ServingConfig;
use adserve_core::types::{ImpressionRecord, UserProfile};
use adserve_kv::{KvCommand, KvStore};
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, warn};

pub fn profile_key(customer_id: &str) -> String {
    format!("userprofile:{customer_id}")
}

#[derive(Clone)]
pub struct ProfileStore {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    ttl_secs: u64,
    max_entries: usize,
}

impl ProfileStore {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: &ServingConfig) -> Self {
        Self {
            kv,
            clock,
            ttl_secs: config.profile_ttl_secs,
            max_entries: config.max_profile_entries,
        }
    }

    /// Load a profile. Misses, parse failures, and store outages all yield a
    /// fresh empty profile; this call never fails.
    pub async fn get(&self, customer_id: &str) -> UserProfile {
        let now = self.clock.now();
        match self.kv.get(&profile_key(customer_id)).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(profile) => profile,
                Err(err) => {
                    warn!(customer_id, error = %err, "Corrupt profile, starting fresh");
                    UserProfile::empty(customer_id, now)
                }
            },
            Ok(None) => UserProfile::empty(customer_id, now),
            Err(err) => {
                debug!(customer_id, error = %err, "Profile read failed, using empty profile");
                metrics::counter!("profile.read_errors").increment(1);
                UserProfile::empty(customer_id, now)
            }
        }
    }

    /// Append one impression, prune history older than 24 h, cap the entry
    /// count, and persist with a refreshed TTL. Concurrent writers race under
    /// last-writer-wins; a lost impression is acceptable.
    pub async fn record_impression(&self, customer_id: &str, ad_id: &str) {
        let now = self.clock.now();
        let mut profile = self.get(customer_id).await;

        profile.impressions.push(ImpressionRecord {
            ad_id: ad_id.to_string(),
            timestamp: now,
        });
        let cutoff = now - Duration::hours(24);
        profile.impressions.retain(|entry| entry.timestamp > cutoff);
        if profile.impressions.len() > self.max_entries {
            let excess = profile.impressions.len() - self.max_entries;
            profile.impressions.drain(..excess);
        }
        profile.last_updated = now;

        let key = profile_key(customer_id);
        let json = match serde_json::to_string(&profile) {
            Ok(json) => json,
            Err(err) => {
                warn!(customer_id, error = %err, "Failed to encode profile");
                return;
            }
        };

        let commands = vec![
            KvCommand::Set {
                key: key.clone(),
                value: json,
            },
            KvCommand::Expire {
                key,
                ttl_secs: self.ttl_secs,
            },
        ];
        if let Err(err) = self.kv.pipeline(commands).await {
            warn!(customer_id, ad_id, error = %err, "Failed to persist impression");
            metrics::counter!("profile.write_errors").increment(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use adserve_core::clock::FixedClock;
    use adserve_core::config::ServingConfig;
    use adserve_kv::MemoryKv;
    use chrono::{TimeZone, Utc};

    fn store(kv: Arc<MemoryKv>, clock: FixedClock) -> ProfileStore {
        ProfileStore::new(kv, Arc::new(clock), &ServingConfig::default())
    }

    fn test_clock() -> FixedClock {
        FixedClock::at(Utc.with_ymd_and_hms(2024, 6, 3, 10, 0, 0).unwrap())
    }

    #[tokio::test]
    async fn miss_yields_empty_profile() {
        let kv = Arc::new(MemoryKv::new());
        let profiles = store(kv, test_clock());
        let profile = profiles.get("C9").await;
        assert_eq!(profile.customer_id, "C9");
        assert!(profile.impressions.is_empty());
    }

    #[tokio::test]
    async fn outage_yields_empty_profile() {
        let kv = Arc::new(MemoryKv::new());
        kv.set_available(false);
        let profiles = store(kv, test_clock());
        let profile = profiles.get("C9").await;
        assert!(profile.impressions.is_empty());
    }

    #[tokio::test]
    async fn corrupt_payload_yields_empty_profile() {
        let kv = Arc::new(MemoryKv::new());
        kv.set_with_ttl(&profile_key("C9"), "{not json", 60)
            .await
            .unwrap();
        let profiles = store(kv, test_clock());
        assert!(profiles.get("C9").await.impressions.is_empty());
    }

    #[tokio::test]
    async fn record_appends_and_sets_ttl() {
        let kv = Arc::new(MemoryKv::new());
        let clock = test_clock();
        let profiles = store(kv.clone(), clock.clone());

        profiles.record_impression("C1", "ad-1").await;
        profiles.record_impression("C1", "ad-2").await;

        let profile = profiles.get("C1").await;
        assert_eq!(profile.impressions.len(), 2);
        assert_eq!(profile.last_updated, clock.now());
        assert_eq!(kv.ttl_of(&profile_key("C1")), Some(86_400));
    }

    #[tokio::test]
    async fn entries_older_than_a_day_are_pruned() {
        let kv = Arc::new(MemoryKv::new());
        let clock = test_clock();
        let profiles = store(kv, clock.clone());

        profiles.record_impression("C1", "ad-old").await;
        clock.advance(Duration::hours(25));
        profiles.record_impression("C1", "ad-new").await;

        let profile = profiles.get("C1").await;
        assert_eq!(profile.impressions.len(), 1);
        assert_eq!(profile.impressions[0].ad_id, "ad-new");

        // Every surviving entry is within the 24 h window.
        let cutoff = clock.now() - Duration::hours(24);
        assert!(profile.impressions.iter().all(|e| e.timestamp > cutoff));
    }

    #[tokio::test]
    async fn history_is_bounded() {
        let kv = Arc::new(MemoryKv::new());
        let clock = test_clock();
        let mut config = ServingConfig::default();
        config.max_profile_entries = 3;
        let profiles = ProfileStore::new(kv, Arc::new(clock.clone()), &config);

        for i in 0..6 {
            profiles.record_impression("C1", &format!("ad-{i}")).await;
            clock.advance(Duration::minutes(1));
        }

        let profile = profiles.get("C1").await;
        assert_eq!(profile.impressions.len(), 3);
        // The newest entries win.
        assert_eq!(profile.impressions[0].ad_id, "ad-3");
        assert_eq!(profile.impressions[2].ad_id, "ad-5");
    }

    #[tokio::test]
    async fn write_failure_is_swallowed() {
        let kv = Arc::new(MemoryKv::new());
        kv.set_available(false);
        let profiles = store(kv, test_clock());
        // Must not panic or error.
        profiles.record_impression("C1", "ad-1").await;
    }
}
