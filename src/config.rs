use crate::storage::CompressionAlgorithm;
use std::str::FromStr;
use std::time::Duration;

/// Tunables for [`crate::BeaconCache`] and its background tasks
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Delay between self-healing passes (default: 60s)
    pub self_heal_interval: Duration,
    /// Health entropy above which a pass evicts (default: 0.8)
    pub entropy_threshold: f64,
    /// Largest share of the cache a single pass may evict (default: 0.1)
    pub eviction_fraction: f64,
    /// Multiplier applied to every health score after each pass (default: 0.99)
    pub decay_rate: f64,
    /// Scores below this are eviction candidates (default: 0.3)
    pub low_health_threshold: f64,
    /// Health delta applied on a cache hit, before scaling (default: 0.1)
    pub hit_delta: f64,
    /// Cap on `find_related` results (default: 10)
    pub related_limit: usize,
    /// Delay between autosaves (default: 30s)
    pub autosave_interval: Duration,
    /// How long a prime table or provider upgrade may take (default: 3s)
    pub upgrade_timeout: Duration,
    /// Name of the durable blob (default: "beacon_cache")
    pub storage_key: String,
    pub compression: CompressionAlgorithm,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            self_heal_interval: Duration::from_secs(60),
            entropy_threshold: 0.8,
            eviction_fraction: 0.1,
            decay_rate: 0.99,
            low_health_threshold: 0.3,
            hit_delta: 0.1,
            related_limit: 10,
            autosave_interval: Duration::from_secs(30),
            upgrade_timeout: Duration::from_secs(3),
            storage_key: "beacon_cache".to_string(),
            compression: CompressionAlgorithm::LZ4,
        }
    }
}

impl CacheConfig {
    /// Create config from `BEACON_CACHE_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(secs) = env_parse::<u64>("BEACON_CACHE_SELF_HEAL_SECS") {
            config.self_heal_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(threshold) = env_parse::<f64>("BEACON_CACHE_ENTROPY_THRESHOLD") {
            config.entropy_threshold = threshold;
        }
        if let Some(fraction) = env_parse::<f64>("BEACON_CACHE_EVICTION_FRACTION") {
            config.eviction_fraction = fraction.clamp(0.0, 1.0);
        }
        if let Some(rate) = env_parse::<f64>("BEACON_CACHE_DECAY_RATE") {
            config.decay_rate = rate.clamp(0.0, 1.0);
        }
        if let Some(threshold) = env_parse::<f64>("BEACON_CACHE_LOW_HEALTH") {
            config.low_health_threshold = threshold;
        }
        if let Some(delta) = env_parse::<f64>("BEACON_CACHE_HIT_DELTA") {
            config.hit_delta = delta;
        }
        if let Some(limit) = env_parse::<usize>("BEACON_CACHE_RELATED_LIMIT") {
            config.related_limit = limit;
        }
        if let Some(secs) = env_parse::<u64>("BEACON_CACHE_AUTOSAVE_SECS") {
            config.autosave_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(ms) = env_parse::<u64>("BEACON_CACHE_UPGRADE_TIMEOUT_MS") {
            config.upgrade_timeout = Duration::from_millis(ms);
        }
        if let Ok(key) = std::env::var("BEACON_CACHE_STORAGE_KEY") {
            if !key.trim().is_empty() {
                config.storage_key = key.trim().to_string();
            }
        }
        if let Some(algorithm) = std::env::var("BEACON_CACHE_COMPRESSION")
            .ok()
            .and_then(|name| CompressionAlgorithm::parse(&name))
        {
            config.compression = algorithm;
        }

        config
    }
}

fn env_parse<T: FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok()?.trim().parse().ok()
}
