//! Distributed sliding-window rate limiter over KV sorted sets.
//!
//! Each bucket is a sorted set of admitted-request members scored by their
//! millisecond timestamp. One atomic pipeline per check prunes the expired
//! window, records the request, reads the cardinality, and refreshes the
//! bucket TTL. Two dimensions are evaluated in order: per-IP, then
//! per-API-key tier. The limiter fails open: an unreachable store admits the
//! request with a warning.

use adserve_core::clock::Clock;
use adserve_core::config::{ApiTier, RateLimitConfig};
use adserve_kv::{KvCommand, KvError, KvReply, KvResult, KvStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::warn;

/// Outcome of a limiter check, carrying what the HTTP layer needs for the
/// `X-RateLimit-*` and `Retry-After` headers.
#[derive(Debug, Clone)]
pub struct LayerOutcome {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    pub retry_after_secs: u64,
    pub tier: Option<ApiTier>,
}

impl LayerOutcome {
    fn admitted(limit: u32, remaining: u32, window_secs: u64) -> Self {
        Self {
            allowed: true,
            limit,
            remaining,
            retry_after_secs: window_secs,
            tier: None,
        }
    }

    fn denied(limit: u32, window_secs: u64) -> Self {
        Self {
            allowed: false,
            limit,
            remaining: 0,
            retry_after_secs: window_secs,
            tier: None,
        }
    }

    fn with_tier(mut self, tier: ApiTier) -> Self {
        self.tier = Some(tier);
        self
    }
}

pub struct SlidingWindowLimiter {
    kv: Arc<dyn KvStore>,
    clock: Arc<dyn Clock>,
    config: RateLimitConfig,
    rng: Mutex<StdRng>,
}

impl SlidingWindowLimiter {
    pub fn new(kv: Arc<dyn KvStore>, clock: Arc<dyn Clock>, config: RateLimitConfig) -> Self {
        Self {
            kv,
            clock,
            config,
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Deterministic member suffixes for reproducible tests.
    pub fn with_seed(
        kv: Arc<dyn KvStore>,
        clock: Arc<dyn Clock>,
        config: RateLimitConfig,
        seed: u64,
    ) -> Self {
        Self {
            kv,
            clock,
            config,
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Evaluate both layers for one request. A denial from either layer wins;
    /// an admitted request reports the tightest remaining budget.
    pub async fn check(
        &self,
        ip: &str,
        api_key: Option<(&str, ApiTier)>,
        path: &str,
    ) -> LayerOutcome {
        let ip_outcome = self.check_ip(ip, path).await;
        if !ip_outcome.allowed {
            return ip_outcome;
        }

        match api_key {
            Some((key, tier)) => {
                let key_outcome = self.check_api_key(key, tier, path).await;
                if !key_outcome.allowed || key_outcome.remaining < ip_outcome.remaining {
                    key_outcome
                } else {
                    ip_outcome
                }
            }
            None => ip_outcome,
        }
    }

    pub async fn check_ip(&self, ip: &str, path: &str) -> LayerOutcome {
        let bucket = format!("ratelimit:ip:{ip}:{path}");
        self.check_bucket(
            &bucket,
            self.config.ip_window_secs,
            self.config.ip_max_requests,
        )
        .await
    }

    pub async fn check_api_key(&self, api_key: &str, tier: ApiTier, path: &str) -> LayerOutcome {
        let (window_secs, max_requests) = self.config.tier_limits(tier);
        let bucket = format!("ratelimit:apikey:{}:{path}", key_suffix(api_key));
        self.check_bucket(&bucket, window_secs, max_requests)
            .await
            .with_tier(tier)
    }

    async fn check_bucket(&self, bucket: &str, window_secs: u64, max_requests: u32) -> LayerOutcome {
        if !self.kv.is_available() {
            warn!(bucket, "rate limiter KV unavailable, admitting (fail-open)");
            metrics::counter!("ratelimit.fail_open").increment(1);
            return LayerOutcome::admitted(max_requests, max_requests, window_secs);
        }

        match self.slide_window(bucket, window_secs).await {
            Ok(current) => {
                if current > max_requests as u64 {
                    metrics::counter!("ratelimit.denied").increment(1);
                    LayerOutcome::denied(max_requests, window_secs)
                } else {
                    let remaining = max_requests.saturating_sub(current as u32);
                    LayerOutcome::admitted(max_requests, remaining, window_secs)
                }
            }
            Err(err) => {
                warn!(bucket, error = %err, "rate limiter pipeline failed, admitting (fail-open)");
                metrics::counter!("ratelimit.fail_open").increment(1);
                LayerOutcome::admitted(max_requests, max_requests, window_secs)
            }
        }
    }

    /// Prune + record + count + refresh TTL in one atomic batch. Returns the
    /// bucket cardinality including this request.
    async fn slide_window(&self, bucket: &str, window_secs: u64) -> KvResult<u64> {
        let now_ms = self.clock.now().timestamp_millis();
        let window_ms = (window_secs * 1_000) as i64;
        let member = format!("{now_ms}:{:08x}", self.suffix());

        let replies = self
            .kv
            .pipeline(vec![
                KvCommand::SortedSetRemoveRange {
                    key: bucket.to_string(),
                    min_score: 0.0,
                    max_score: (now_ms - window_ms) as f64,
                },
                KvCommand::SortedSetAdd {
                    key: bucket.to_string(),
                    score: now_ms as f64,
                    member,
                },
                KvCommand::SortedSetCardinality {
                    key: bucket.to_string(),
                },
                KvCommand::Expire {
                    key: bucket.to_string(),
                    ttl_secs: window_secs,
                },
            ])
            .await?;

        match replies.get(2).and_then(KvReply::count) {
            Some(count) => Ok(count),
            None => Err(KvError::UnexpectedReply(
                "missing cardinality reply".to_string(),
            )),
        }
    }

    /// Uniqueness suffix for same-millisecond admits.
    fn suffix(&self) -> u32 {
        self.rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .gen()
    }
}

/// Last 8 characters of the API key, used as the bucket identity so full keys
/// never land in the store.
fn key_suffix(api_key: &str) -> &str {
    match api_key.char_indices().rev().nth(7) {
        Some((idx, _)) => &api_key[idx..],
        None => api_key,
    }
}
