use crate::error::{AdServeError, AdServeResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Root application configuration. Loaded from environment variables with the
/// prefix `ADSERVE__` and validated once at startup; the process refuses to
/// start on an invalid scoring or segmentation setup.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub serving: ServingConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_http_port")]
    pub http_port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    #[serde(default = "default_redis_url")]
    pub url: String,
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// Everything the targeting pipeline needs: segment thresholds, filter
/// parameters, score weights, and cache behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct ServingConfig {
    #[serde(default)]
    pub segment_thresholds: SegmentThresholds,
    #[serde(default)]
    pub frequency: FrequencyConfig,
    #[serde(default)]
    pub weights: ScoreWeights,
    #[serde(default)]
    pub ctr: CtrConfig,
    #[serde(default = "default_recency_horizon_days")]
    pub recency_horizon_days: i64,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default = "default_catalog_timeout_ms")]
    pub catalog_timeout_ms: u64,
    #[serde(default = "default_profile_ttl_secs")]
    pub profile_ttl_secs: u64,
    #[serde(default = "default_max_profile_entries")]
    pub max_profile_entries: usize,
}

/// Balance cut-offs for segment derivation. Upper bounds are exclusive.
#[derive(Debug, Clone, Deserialize)]
pub struct SegmentThresholds {
    #[serde(default = "default_low_max")]
    pub low_max: f64,
    #[serde(default = "default_mass_max")]
    pub mass_max: f64,
    #[serde(default = "default_affluent_max")]
    pub affluent_max: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct FrequencyConfig {
    #[serde(default = "default_max_per_day")]
    pub max_per_day: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
}

/// Composite score weights. Must sum to 1.0 within 1e-3.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoreWeights {
    #[serde(default = "default_weight_priority")]
    pub priority: f64,
    #[serde(default = "default_weight_ctr")]
    pub ctr: f64,
    #[serde(default = "default_weight_recency")]
    pub recency: f64,
    #[serde(default = "default_weight_freshness")]
    pub freshness: f64,
}

impl ScoreWeights {
    pub fn sum(&self) -> f64 {
        self.priority + self.ctr + self.recency + self.freshness
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CtrConfig {
    /// Below this many impressions the default CTR is used instead of the
    /// observed ratio.
    #[serde(default = "default_ctr_min_impressions")]
    pub min_impressions: u64,
    #[serde(default = "default_ctr_default")]
    pub default_ctr: f64,
    /// CTR at which the score component saturates at 1.0.
    #[serde(default = "default_ctr_target")]
    pub target_ctr: f64,
}

/// Personalised serve-cache TTLs. The short TTL applies when candidate supply
/// is thin so repeated exposure stays bounded.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_thin_supply_ttl_secs")]
    pub thin_supply_ttl_secs: u64,
    #[serde(default = "default_ample_supply_ttl_secs")]
    pub ample_supply_ttl_secs: u64,
    #[serde(default = "default_thin_supply_threshold")]
    pub thin_supply_threshold: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_ip_window_secs")]
    pub ip_window_secs: u64,
    #[serde(default = "default_ip_max_requests")]
    pub ip_max_requests: u32,
    #[serde(default = "default_tier_window_secs")]
    pub tier_window_secs: u64,
    #[serde(default = "default_standard_max")]
    pub standard_max_requests: u32,
    #[serde(default = "default_premium_max")]
    pub premium_max_requests: u32,
    #[serde(default = "default_enterprise_max")]
    pub enterprise_max_requests: u32,
}

impl RateLimitConfig {
    /// `(window_secs, max_requests)` for an API-key tier.
    pub fn tier_limits(&self, tier: ApiTier) -> (u64, u32) {
        let max = match tier {
            ApiTier::Standard => self.standard_max_requests,
            ApiTier::Premium => self.premium_max_requests,
            ApiTier::Enterprise => self.enterprise_max_requests,
        };
        (self.tier_window_secs, max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApiTier {
    Standard,
    Premium,
    Enterprise,
}

impl ApiTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiTier::Standard => "standard",
            ApiTier::Premium => "premium",
            ApiTier::Enterprise => "enterprise",
        }
    }
}

/// API keys and their tiers for the admin/analytics routes.
/// Development: ships with demo keys. Production: inject real keys via
/// configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_api_keys")]
    pub api_keys: HashMap<String, ApiTier>,
}

impl AuthConfig {
    pub fn tier_for(&self, api_key: &str) -> Option<ApiTier> {
        self.api_keys.get(api_key).copied()
    }
}

// Default functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_http_port() -> u16 {
    8080
}
fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}
fn default_connect_timeout_ms() -> u64 {
    5000
}
fn default_metrics_port() -> u16 {
    9091
}
fn default_low_max() -> f64 {
    50_000.0
}
fn default_mass_max() -> f64 {
    200_000.0
}
fn default_affluent_max() -> f64 {
    1_000_000.0
}
fn default_max_per_day() -> u32 {
    3
}
fn default_cooldown_secs() -> u64 {
    7_200
}
fn default_weight_priority() -> f64 {
    0.35
}
fn default_weight_ctr() -> f64 {
    0.25
}
fn default_weight_recency() -> f64 {
    0.20
}
fn default_weight_freshness() -> f64 {
    0.20
}
fn default_ctr_min_impressions() -> u64 {
    10
}
fn default_ctr_default() -> f64 {
    0.02
}
fn default_ctr_target() -> f64 {
    0.1
}
fn default_recency_horizon_days() -> i64 {
    30
}
fn default_thin_supply_ttl_secs() -> u64 {
    30
}
fn default_ample_supply_ttl_secs() -> u64 {
    120
}
fn default_thin_supply_threshold() -> usize {
    3
}
fn default_catalog_timeout_ms() -> u64 {
    2_000
}
fn default_profile_ttl_secs() -> u64 {
    86_400
}
fn default_max_profile_entries() -> usize {
    100
}
fn default_ip_window_secs() -> u64 {
    60
}
fn default_ip_max_requests() -> u32 {
    100
}
fn default_tier_window_secs() -> u64 {
    60
}
fn default_standard_max() -> u32 {
    500
}
fn default_premium_max() -> u32 {
    1_000
}
fn default_enterprise_max() -> u32 {
    5_000
}
fn default_api_keys() -> HashMap<String, ApiTier> {
    // Development keys only.
    HashMap::from([
        ("adserve-dev-standard".to_string(), ApiTier::Standard),
        ("adserve-dev-premium".to_string(), ApiTier::Premium),
        ("adserve-dev-enterprise".to_string(), ApiTier::Enterprise),
    ])
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            http_port: default_http_port(),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: default_redis_url(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            port: default_metrics_port(),
        }
    }
}

impl Default for SegmentThresholds {
    fn default() -> Self {
        Self {
            low_max: default_low_max(),
            mass_max: default_mass_max(),
            affluent_max: default_affluent_max(),
        }
    }
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        Self {
            max_per_day: default_max_per_day(),
            cooldown_secs: default_cooldown_secs(),
        }
    }
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            priority: default_weight_priority(),
            ctr: default_weight_ctr(),
            recency: default_weight_recency(),
            freshness: default_weight_freshness(),
        }
    }
}

impl Default for CtrConfig {
    fn default() -> Self {
        Self {
            min_impressions: default_ctr_min_impressions(),
            default_ctr: default_ctr_default(),
            target_ctr: default_ctr_target(),
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            thin_supply_ttl_secs: default_thin_supply_ttl_secs(),
            ample_supply_ttl_secs: default_ample_supply_ttl_secs(),
            thin_supply_threshold: default_thin_supply_threshold(),
        }
    }
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            segment_thresholds: SegmentThresholds::default(),
            frequency: FrequencyConfig::default(),
            weights: ScoreWeights::default(),
            ctr: CtrConfig::default(),
            recency_horizon_days: default_recency_horizon_days(),
            cache: CacheConfig::default(),
            catalog_timeout_ms: default_catalog_timeout_ms(),
            profile_ttl_secs: default_profile_ttl_secs(),
            max_profile_entries: default_max_profile_entries(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            ip_window_secs: default_ip_window_secs(),
            ip_max_requests: default_ip_max_requests(),
            tier_window_secs: default_tier_window_secs(),
            standard_max_requests: default_standard_max(),
            premium_max_requests: default_premium_max(),
            enterprise_max_requests: default_enterprise_max(),
        }
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            api_keys: default_api_keys(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            api: ApiConfig::default(),
            redis: RedisConfig::default(),
            metrics: MetricsConfig::default(),
            serving: ServingConfig::default(),
            rate_limit: RateLimitConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder().add_source(
            config::Environment::with_prefix("ADSERVE")
                .separator("__")
                .try_parsing(true)
                .list_separator(","),
        );

        let config = builder.build()?;
        config.try_deserialize()
    }

    /// Startup validation. A scoring or segmentation misconfiguration is a
    /// programmer error and the process must not serve with it.
    pub fn validate(&self) -> AdServeResult<()> {
        let sum = self.serving.weights.sum();
        if (sum - 1.0).abs() > 1e-3 {
            return Err(AdServeError::Config(format!(
                "score weights must sum to 1.0, got {sum}"
            )));
        }

        let t = &self.serving.segment_thresholds;
        if !(t.low_max > 0.0 && t.low_max < t.mass_max && t.mass_max < t.affluent_max) {
            return Err(AdServeError::Config(format!(
                "segment thresholds must be strictly increasing, got {}/{}/{}",
                t.low_max, t.mass_max, t.affluent_max
            )));
        }

        let c = &self.serving.cache;
        if c.thin_supply_ttl_secs == 0 || c.ample_supply_ttl_secs < c.thin_supply_ttl_secs {
            return Err(AdServeError::Config(format!(
                "cache TTLs must satisfy 0 < thin ({}) <= ample ({})",
                c.thin_supply_ttl_secs, c.ample_supply_ttl_secs
            )));
        }

        if self.serving.frequency.max_per_day == 0 {
            return Err(AdServeError::Config(
                "frequency cap must allow at least one impression per day".to_string(),
            ));
        }

        if self.serving.ctr.target_ctr <= 0.0 {
            return Err(AdServeError::Config(
                "CTR target must be positive".to_string(),
            ));
        }

        Ok(())
    }
}
