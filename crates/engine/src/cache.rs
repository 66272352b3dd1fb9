//! Personalised serve cache.
//!
//! Entries are keyed by `ad:{segment}:{channel}:{customer}` and hold the full
//! serialised response. The TTL adapts to candidate supply: a thin supply
//! gets a short TTL so one customer is not pinned to the same ad and new
//! catalog entries surface quickly. Catalog mutations fan out an asynchronous
//! pattern invalidation.

use adserve_core::config::CacheConfig;
use adserve_core::types::{Channel, Segment, ServeResponse};
use adserve_kv::KvStore;
use std::sync::Arc;
use tracing::{debug, warn};

const SCAN_BATCH: usize = 100;
const MAX_CUSTOMER_ID_LEN: usize = 64;

/// Replace separator and whitespace characters so customer identifiers are
/// safe inside colon-delimited keys, capped at 64 characters.
pub fn sanitize_customer_id(raw: &str) -> String {
    raw.chars()
        .map(|c| if c == ':' || c.is_whitespace() { '_' } else { c })
        .take(MAX_CUSTOMER_ID_LEN)
        .collect()
}

pub fn cache_key(segment: Segment, channel: &str, customer: &str) -> String {
    format!("ad:{}:{channel}:{customer}", segment.as_str())
}

#[derive(Clone)]
pub struct ServeCache {
    kv: Arc<dyn KvStore>,
    config: CacheConfig,
}

impl ServeCache {
    pub fn new(kv: Arc<dyn KvStore>, config: CacheConfig) -> Self {
        Self { kv, config }
    }

    /// Cached response for this `(segment, channel, customer)`, if the store
    /// is reachable and holds a parseable entry.
    pub async fn lookup(
        &self,
        segment: Segment,
        channel: &str,
        customer: &str,
    ) -> Option<ServeResponse> {
        if !self.kv.is_available() {
            return None;
        }
        let key = cache_key(segment, channel, customer);
        match self.kv.get(&key).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(response) => {
                    metrics::counter!("serve.cache.hit").increment(1);
                    Some(response)
                }
                Err(err) => {
                    warn!(key, error = %err, "Corrupt cache entry, ignoring");
                    None
                }
            },
            Ok(None) => {
                metrics::counter!("serve.cache.miss").increment(1);
                None
            }
            Err(err) => {
                debug!(key, error = %err, "Cache read failed");
                None
            }
        }
    }

    /// Write-through after a successful serve. `supply` is the candidate
    /// count that survived filtering.
    pub async fn store(
        &self,
        segment: Segment,
        channel: &str,
        customer: &str,
        response: &ServeResponse,
        supply: usize,
    ) {
        let ttl_secs = if supply <= self.config.thin_supply_threshold {
            self.config.thin_supply_ttl_secs
        } else {
            self.config.ample_supply_ttl_secs
        };
        let key = cache_key(segment, channel, customer);
        let json = match serde_json::to_string(response) {
            Ok(json) => json,
            Err(err) => {
                warn!(key, error = %err, "Failed to encode cache entry");
                return;
            }
        };
        if let Err(err) = self.kv.set_with_ttl(&key, &json, ttl_secs).await {
            debug!(key, error = %err, "Cache write failed");
        }
    }

    /// Remove every cached response a catalog mutation could have staled:
    /// each `(segment, channel)` pair the ad targets, across all customers.
    /// Failures are logged; the mutation itself is never failed.
    pub async fn invalidate(&self, segments: &[Segment], channels: &[Channel]) {
        let mut stale: Vec<String> = Vec::new();

        for segment in segments {
            for channel in channels {
                let pattern = format!("ad:{}:{}:*", segment.as_str(), channel.as_str());
                let mut cursor = 0;
                loop {
                    match self.kv.scan(&pattern, cursor, SCAN_BATCH).await {
                        Ok((next, keys)) => {
                            stale.extend(keys);
                            if next == 0 {
                                break;
                            }
                            cursor = next;
                        }
                        Err(err) => {
                            warn!(pattern, error = %err, "Cache invalidation scan failed");
                            return;
                        }
                    }
                }
            }
        }

        if stale.is_empty() {
            return;
        }
        let count = stale.len();
        match self.kv.delete(&stale).await {
            Ok(()) => {
                debug!(count, "Invalidated cached serve responses");
                metrics::counter!("serve.cache.invalidated").increment(count as u64);
            }
            Err(err) => warn!(error = %err, "Cache invalidation delete failed"),
        }
    }
}
