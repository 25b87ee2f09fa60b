use super::codec::MemoryCodec;
use super::entry::Beacon;
use super::health::{HealthMonitor, INITIAL_HEALTH};
use super::prime_index::PrimeIndexer;
use super::primes::PrimeTable;
use super::provider::{EncodingProvider, ProviderSlot};
use crate::config::CacheConfig;
use crate::storage::normalize::{normalize, normalize_all};
use crate::storage::persistence::spawn_autosave;
use crate::storage::{AutosaveHandle, CachePersistence, DurableStore, LoadedCache, StorageError};
use crate::transport::{BeaconFetcher, FetchError};
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

type PendingFetch = Shared<BoxFuture<'static, Result<Option<Beacon>, FetchError>>>;

/// The four structures a beacon lives in; always mutated together
#[derive(Debug)]
struct CacheState {
    beacons: HashMap<String, Beacon>,
    user_index: HashMap<String, HashSet<String>>,
    prime_index: PrimeIndexer,
    health: HealthMonitor,
}

impl CacheState {
    fn new(prime_index: PrimeIndexer) -> Self {
        Self {
            beacons: HashMap::new(),
            user_index: HashMap::new(),
            prime_index,
            health: HealthMonitor::new(),
        }
    }

    fn insert(&mut self, beacon: Beacon) {
        let id = beacon.beacon_id.clone();
        if self.beacons.contains_key(&id) {
            self.prime_index.remove(&id);
        }
        self.prime_index.index(&beacon);
        self.health.initialize(&id, INITIAL_HEALTH);
        self.user_index
            .entry(beacon.author_id.clone())
            .or_default()
            .insert(id.clone());
        self.beacons.insert(id, beacon);
    }

    /// Leaves the author's index entry alone; lookups by author skip ids
    /// that are no longer cached.
    fn remove(&mut self, id: &str) -> bool {
        self.prime_index.remove(id);
        self.health.remove(id);
        self.beacons.remove(id).is_some()
    }

    fn clear(&mut self) {
        self.beacons.clear();
        self.user_index.clear();
        self.prime_index.clear();
        self.health.clear();
    }
}

/// Point-in-time copy of what gets persisted, written outside the state lock
struct Snapshot {
    beacons: HashMap<String, Beacon>,
    user_index: HashMap<String, HashSet<String>>,
    health: HashMap<String, f64>,
}

impl Snapshot {
    fn save_to(&self, persistence: &CachePersistence) -> Result<(), StorageError> {
        persistence.save(&self.beacons, &self.user_index, &self.health)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub total_beacons: usize,
    pub prime_index_size: usize,
    pub avg_health: f64,
    pub entropy: f64,
    /// Reported as the average health
    pub hit_rate: f64,
}

/// Outcome of one self-healing pass
#[derive(Debug, Clone, PartialEq)]
pub struct SelfHealReport {
    pub entropy: f64,
    pub evicted: Vec<String>,
    pub remaining: usize,
}

/// Content-addressed beacon cache with prime relatedness, health-driven
/// eviction and durable persistence.
///
/// Without a fetcher the cache is push-only: misses return `None`. With one,
/// concurrent misses for the same id share a single fetch.
pub struct BeaconCache {
    state: RwLock<CacheState>,
    pending: Mutex<HashMap<String, PendingFetch>>,
    fetcher: Option<Arc<dyn BeaconFetcher>>,
    persistence: Arc<CachePersistence>,
    codec: MemoryCodec,
    table: Arc<PrimeTable>,
    config: CacheConfig,
}

impl BeaconCache {
    /// Push-only cache on the local prime table and encoding provider,
    /// restored from whatever `store` holds.
    pub fn new(store: Arc<dyn DurableStore>, config: CacheConfig) -> Self {
        Self::with_components(
            store,
            config,
            Arc::new(PrimeTable::new()),
            Arc::new(ProviderSlot::local()),
        )
    }

    pub fn with_components(
        store: Arc<dyn DurableStore>,
        config: CacheConfig,
        table: Arc<PrimeTable>,
        providers: Arc<ProviderSlot>,
    ) -> Self {
        let persistence =
            CachePersistence::new(store, config.storage_key.clone(), config.compression);
        let mut state = CacheState::new(PrimeIndexer::with_limit(
            Arc::clone(&table),
            config.related_limit,
        ));

        let LoadedCache {
            cache,
            user_index,
            mut health_map,
        } = persistence.load();
        // Exactly one score per cached beacon
        health_map.retain(|id, _| cache.contains_key(id));
        state.health = HealthMonitor::from_scores(health_map);
        for (id, beacon) in cache {
            state.prime_index.index(&beacon);
            if !state.health.contains(&id) {
                state.health.initialize(&id, INITIAL_HEALTH);
            }
            state.beacons.insert(id, beacon);
        }
        state.user_index = user_index;

        Self {
            state: RwLock::new(state),
            pending: Mutex::new(HashMap::new()),
            fetcher: None,
            persistence: Arc::new(persistence),
            codec: MemoryCodec::new(Arc::clone(&table), providers),
            table,
            config,
        }
    }

    /// Makes misses fall through to `fetcher`
    pub fn with_fetcher(mut self, fetcher: Arc<dyn BeaconFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn is_fetch_capable(&self) -> bool {
        self.fetcher.is_some()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn codec(&self) -> &MemoryCodec {
        &self.codec
    }

    pub fn prime_table(&self) -> &Arc<PrimeTable> {
        &self.table
    }

    /// Starts a prime table upgrade bounded by `upgrade_timeout`. Indexing
    /// keeps using the current table until a new one lands.
    pub fn upgrade_prime_table<F, E>(&self, generator: F) -> JoinHandle<bool>
    where
        F: Future<Output = Result<Vec<u64>, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        self.table.spawn_upgrade(generator, self.config.upgrade_timeout)
    }

    /// Installs a richer encoding provider if `loader` resolves within
    /// `upgrade_timeout`; otherwise the current provider stays.
    pub async fn upgrade_provider<F, E>(&self, loader: F) -> bool
    where
        F: Future<Output = Result<Arc<dyn EncodingProvider>, E>>,
        E: Display,
    {
        self.codec
            .providers()
            .upgrade_within(loader, self.config.upgrade_timeout)
            .await
    }

    pub fn len(&self) -> usize {
        self.state.read().beacons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().beacons.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.read().beacons.contains_key(id)
    }

    pub fn health(&self, id: &str) -> Option<f64> {
        let state = self.state.read();
        state.health.contains(id).then(|| state.health.score(id))
    }

    /// Cached beacon, counted as a hit
    fn lookup(&self, id: &str) -> Option<Beacon> {
        let mut state = self.state.write();
        let beacon = state.beacons.get(id).cloned()?;
        state.health.touch(id, self.config.hit_delta);
        Some(beacon)
    }

    /// Returns the beacon, fetching it on a miss when a fetcher is configured.
    ///
    /// Concurrent misses for one id observe a single fetch and share its
    /// result, errors included.
    pub async fn get_by_id(&self, id: &str) -> Result<Option<Beacon>, FetchError> {
        if let Some(beacon) = self.lookup(id) {
            return Ok(Some(beacon));
        }
        let Some(fetcher) = &self.fetcher else {
            return Ok(None);
        };

        let fetch = {
            let mut pending = self.pending.lock();
            // A fetch may have landed between the miss and taking the lock
            if let Some(beacon) = self.lookup(id) {
                return Ok(Some(beacon));
            }
            pending
                .entry(id.to_string())
                .or_insert_with(|| {
                    debug!(beacon_id = %id, "Starting beacon fetch");
                    fetch_one(Arc::clone(fetcher), id.to_string())
                })
                .clone()
        };

        let result = fetch.clone().await;

        let retired = {
            let mut pending = self.pending.lock();
            let owns_entry = matches!(pending.get(id), Some(entry) if entry.ptr_eq(&fetch));
            if owns_entry {
                pending.remove(id);
                if let Ok(Some(beacon)) = &result {
                    self.state.write().insert(beacon.clone());
                }
            }
            owns_entry
        };
        if retired && matches!(result, Ok(Some(_))) {
            self.save_blocking().await;
        }

        result
    }

    /// Cached beacons registered under `author_id`, optionally of one type
    pub fn get_by_author(&self, author_id: &str, beacon_type: Option<&str>) -> Vec<Beacon> {
        let state = self.state.read();
        let Some(ids) = state.user_index.get(author_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| state.beacons.get(id))
            .filter(|beacon| beacon_type.map_or(true, |t| beacon.beacon_type == t))
            .cloned()
            .collect()
    }

    /// Pulls the author's beacons through the fetcher, caches them, then
    /// answers from the cache. Push-only caches answer from the cache alone.
    pub async fn fetch_author(
        &self,
        author_id: &str,
        beacon_type: Option<&str>,
    ) -> Result<Vec<Beacon>, FetchError> {
        if let Some(fetcher) = &self.fetcher {
            let raws = fetcher.fetch_by_author(author_id, beacon_type).await?;
            let fetched = normalize_all(&raws);
            if !fetched.is_empty() {
                debug!(author_id, count = fetched.len(), "Caching fetched author beacons");
                {
                    let mut state = self.state.write();
                    for beacon in fetched {
                        state.insert(beacon);
                    }
                }
                self.save_blocking().await;
            }
        }
        Ok(self.get_by_author(author_id, beacon_type))
    }

    pub fn get_by_type(&self, beacon_type: &str) -> Vec<Beacon> {
        self.state
            .read()
            .beacons
            .values()
            .filter(|beacon| beacon.beacon_type == beacon_type)
            .cloned()
            .collect()
    }

    /// Newest of the author's beacons by `created_at`
    pub fn get_most_recent(&self, author_id: &str, beacon_type: Option<&str>) -> Option<Beacon> {
        self.get_by_author(author_id, beacon_type)
            .into_iter()
            .min_by(Beacon::cmp_newest_first)
    }

    /// Normalizes and stores a raw beacon. Returns its id, or `None` if the
    /// payload was unusable.
    pub fn add_beacon(&self, raw: &Value) -> Option<String> {
        let Some(beacon) = normalize(raw) else {
            debug!("Ignoring unusable beacon payload");
            return None;
        };
        Some(self.insert(beacon))
    }

    pub fn insert(&self, beacon: Beacon) -> String {
        let id = beacon.beacon_id.clone();
        self.state.write().insert(beacon);
        self.save();
        id
    }

    pub fn invalidate(&self, id: &str) -> bool {
        let removed = self.state.write().remove(id);
        if removed {
            self.save();
        }
        removed
    }

    /// Invalidates every beacon registered under the author and drops the
    /// author's index entry. Returns how many cached beacons went away.
    pub fn invalidate_author(&self, author_id: &str) -> usize {
        let removed = {
            let mut state = self.state.write();
            let ids = state.user_index.remove(author_id).unwrap_or_default();
            ids.iter().filter(|id| state.remove(id)).count()
        };
        if removed > 0 {
            info!(author_id, removed, "Invalidated author beacons");
        }
        self.save();
        removed
    }

    /// Empties every structure and deletes the durable blob. Fetches still
    /// in flight answer their callers but no longer land in the cache.
    pub fn clear(&self) {
        let mut pending = self.pending.lock();
        let abandoned = pending.len();
        pending.clear();
        self.state.write().clear();
        drop(pending);

        if abandoned > 0 {
            debug!(abandoned, "Abandoned in-flight fetches on clear");
        }
        if let Err(e) = self.persistence.clear() {
            warn!(error = %e, "Failed to delete beacon cache blob");
        }
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.read();
        let avg_health = state.health.average();
        CacheStats {
            total_beacons: state.beacons.len(),
            prime_index_size: state.prime_index.len(),
            avg_health,
            entropy: state.health.entropy(state.beacons.len()),
            hit_rate: avg_health,
        }
    }

    /// Cached beacons sharing a basis prime with `id`, the beacon itself included
    pub fn find_related(&self, id: &str) -> Vec<Beacon> {
        let state = self.state.read();
        state
            .prime_index
            .find_related(id)
            .iter()
            .filter_map(|related| state.beacons.get(related))
            .cloned()
            .collect()
    }

    /// Recovers the text carried by a cached beacon
    pub fn decode_text(&self, id: &str) -> Option<String> {
        let beacon = self.state.read().beacons.get(id).cloned()?;
        self.codec.decode_beacon(&beacon)
    }

    /// Recovers text from a raw beacon or fragment that need not be cached
    pub fn decode(&self, raw: &Value) -> Option<String> {
        self.codec.decode(raw)
    }

    /// One maintenance pass: evict the least healthy beacons when health
    /// entropy is high, then decay every score.
    pub fn self_heal(&self) -> SelfHealReport {
        let report = {
            let mut state = self.state.write();
            let size = state.beacons.len();
            let entropy = state.health.entropy(size);

            let mut evicted = Vec::new();
            if entropy > self.config.entropy_threshold {
                let cap = (size as f64 * self.config.eviction_fraction).floor() as usize;
                let mut candidates: Vec<(String, f64)> = state
                    .health
                    .low_health(self.config.low_health_threshold)
                    .into_iter()
                    .map(|id| {
                        let score = state.health.score(&id);
                        (id, score)
                    })
                    .collect();
                candidates.sort_by(|a, b| a.1.total_cmp(&b.1));

                for (id, _) in candidates.into_iter().take(cap) {
                    state.remove(&id);
                    evicted.push(id);
                }
            }
            state.health.decay_all(self.config.decay_rate);

            SelfHealReport {
                entropy,
                evicted,
                remaining: state.beacons.len(),
            }
        };

        if report.evicted.is_empty() {
            debug!(entropy = report.entropy, "Self-healing pass completed");
        } else {
            info!(
                entropy = report.entropy,
                evicted = report.evicted.len(),
                remaining = report.remaining,
                "Self-healing evicted beacons"
            );
            self.save();
        }
        report
    }

    /// Runs [`Self::self_heal`] every `self_heal_interval` until the cache is
    /// dropped. A pass always finishes before the next delay starts.
    pub fn spawn_self_healing(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::downgrade(self);
        let interval = self.config.self_heal_interval;

        let handle = tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                let Some(cache) = cache.upgrade() else {
                    break;
                };
                if let Err(e) = tokio::task::spawn_blocking(move || cache.self_heal()).await {
                    warn!(error = %e, "Self-healing pass failed");
                }
            }
            debug!("Self-healing task stopped");
        });

        info!(
            interval_secs = interval.as_secs(),
            "Self-healing task started"
        );
        handle
    }

    /// Saves every `autosave_interval` and on host signals. Drop the handle
    /// before the cache so the final save still sees it.
    pub fn spawn_autosave(self: &Arc<Self>) -> AutosaveHandle {
        let cache = Arc::downgrade(self);
        spawn_autosave(
            move || match cache.upgrade() {
                Some(cache) => cache.try_save(),
                None => Ok(()),
            },
            self.config.autosave_interval,
        )
    }

    fn snapshot(&self) -> Snapshot {
        let state = self.state.read();
        Snapshot {
            beacons: state.beacons.clone(),
            user_index: state.user_index.clone(),
            health: state.health.export(),
        }
    }

    pub fn try_save(&self) -> Result<(), StorageError> {
        self.snapshot().save_to(&self.persistence)
    }

    /// [`Self::save`] for async callers; the write runs on the blocking pool
    async fn save_blocking(&self) {
        let snapshot = self.snapshot();
        let persistence = Arc::clone(&self.persistence);
        match tokio::task::spawn_blocking(move || snapshot.save_to(&persistence)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to persist beacon cache"),
            Err(e) => warn!(error = %e, "Beacon cache save task failed"),
        }
    }

    /// Persists the cache, logging instead of failing
    pub fn save(&self) {
        if let Err(e) = self.try_save() {
            warn!(error = %e, "Failed to persist beacon cache");
        }
    }
}

fn fetch_one(fetcher: Arc<dyn BeaconFetcher>, id: String) -> PendingFetch {
    async move {
        match fetcher.fetch_beacon(&id).await {
            Err(e) => Err(e),
            Ok(None) => Ok(None),
            Ok(Some(raw)) => normalize(&raw)
                .map(Some)
                .ok_or_else(|| FetchError::InvalidPayload(id)),
        }
    }
    .boxed()
    .shared()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn cache() -> BeaconCache {
        BeaconCache::new(Arc::new(MemoryStore::new()), CacheConfig::default())
    }

    struct SlowFetcher {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl BeaconFetcher for SlowFetcher {
        async fn fetch_beacon(&self, beacon_id: &str) -> Result<Option<Value>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(FetchError::Transport("offline".to_string()));
            }
            Ok(Some(json!({"beacon_id": beacon_id, "author_id": "remote"})))
        }
    }

    #[test]
    fn test_add_and_lookup_by_author_and_type() {
        let cache = cache();
        cache.add_beacon(&json!({"beacon_id": "a", "author_id": "alice", "beacon_type": "post"}));
        cache.add_beacon(&json!({"beacon_id": "b", "author_id": "alice", "beacon_type": "reply"}));
        cache.add_beacon(&json!({"beacon_id": "c", "author_id": "bob", "beacon_type": "post"}));

        assert_eq!(cache.get_by_author("alice", None).len(), 2);
        assert_eq!(cache.get_by_author("alice", Some("reply")).len(), 1);
        assert_eq!(cache.get_by_type("post").len(), 2);
        assert!(cache.add_beacon(&json!("junk")).is_none());
        assert_eq!(cache.len(), 3);
    }

    #[test]
    fn test_most_recent() {
        let cache = cache();
        cache.insert(Beacon::new("old", "post", "alice").with_created_at("2024-01-01T00:00:00Z"));
        cache.insert(Beacon::new("new", "post", "alice").with_created_at("2024-05-01T00:00:00Z"));
        let newest = cache.get_most_recent("alice", Some("post")).unwrap();
        assert_eq!(newest.beacon_id, "new");
        assert!(cache.get_most_recent("nobody", None).is_none());
    }

    #[tokio::test]
    async fn test_hit_touches_health() {
        let cache = cache();
        cache.insert(Beacon::new("a", "post", "alice"));
        cache.state.write().health.initialize("a", 0.5);

        assert!(cache.get_by_id("a").await.unwrap().is_some());
        assert!((cache.health("a").unwrap() - 0.51).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_push_only_miss_has_no_side_effects() {
        let cache = cache();
        assert_eq!(cache.get_by_id("missing").await, Ok(None));
        assert!(cache.is_empty());
        assert!(cache.health("missing").is_none());
    }

    #[tokio::test]
    async fn test_single_flight_fetch() {
        let fetcher = Arc::new(SlowFetcher {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let cache = cache().with_fetcher(fetcher.clone());

        let lookups = (0..8).map(|_| cache.get_by_id("remote-1"));
        let results = futures::future::join_all(lookups).await;

        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
        assert!(results.iter().all(|r| matches!(r, Ok(Some(b)) if b.beacon_id == "remote-1")));
        assert!(cache.contains("remote-1"));
        assert!(cache.pending.lock().is_empty());
        assert_eq!(cache.get_by_author("remote", None).len(), 1);
    }

    #[tokio::test]
    async fn test_failed_fetch_reaches_every_waiter() {
        let fetcher = Arc::new(SlowFetcher {
            calls: AtomicUsize::new(0),
            fail: true,
        });
        let cache = cache().with_fetcher(fetcher.clone());

        let (a, b) = tokio::join!(cache.get_by_id("x"), cache.get_by_id("x"));
        assert!(matches!(a, Err(FetchError::Transport(_))));
        assert_eq!(a, b);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);

        // Nothing sticks around, so the next miss fetches again
        let _ = cache.get_by_id("x").await;
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        assert!(!cache.contains("x"));
    }

    #[test]
    fn test_invalidate_keeps_author_entry() {
        let cache = cache();
        cache.insert(Beacon::new("a", "post", "alice").with_primes(&[2, 3]));
        assert!(cache.invalidate("a"));
        assert!(!cache.invalidate("a"));

        let state = cache.state.read();
        assert!(state.user_index["alice"].contains("a"));
        assert!(state.prime_index.is_empty());
        assert!(!state.health.contains("a"));
        drop(state);
        assert!(cache.get_by_author("alice", None).is_empty());
    }

    #[test]
    fn test_invalidate_author() {
        let cache = cache();
        cache.insert(Beacon::new("a", "post", "alice"));
        cache.insert(Beacon::new("b", "post", "alice"));
        cache.insert(Beacon::new("c", "post", "bob"));

        assert_eq!(cache.invalidate_author("alice"), 2);
        assert_eq!(cache.len(), 1);
        assert!(!cache.state.read().user_index.contains_key("alice"));
        assert!(cache.health("a").is_none());
    }

    #[test]
    fn test_find_related_scenario() {
        let cache = cache();
        cache.insert(Beacon::new("A", "post", "x").with_primes(&[2, 3, 5]));
        cache.insert(Beacon::new("B", "post", "y").with_primes(&[3, 7]));
        cache.insert(Beacon::new("C", "post", "z").with_primes(&[11]));

        let related: Vec<String> = cache
            .find_related("B")
            .into_iter()
            .map(|b| b.beacon_id)
            .collect();
        assert!(related.contains(&"A".to_string()));
        assert!(related.contains(&"B".to_string()));
        assert!(!related.contains(&"C".to_string()));
    }

    #[test]
    fn test_self_heal_respects_eviction_cap() {
        let cache = cache();
        for i in 0..25 {
            cache.insert(Beacon::new(format!("b{i}"), "post", "alice"));
        }
        {
            let mut state = cache.state.write();
            for i in 0..25 {
                state.health.initialize(&format!("b{i}"), 0.05 + i as f64 * 0.001);
            }
        }

        let report = cache.self_heal();
        assert!(report.entropy > 0.8);
        assert_eq!(report.evicted.len(), 2);
        assert_eq!(report.evicted, vec!["b0".to_string(), "b1".to_string()]);
        assert_eq!(report.remaining, 23);
        assert_eq!(cache.state.read().health.len(), 23);
    }

    #[test]
    fn test_self_heal_decays_without_evicting_healthy_cache() {
        let cache = cache();
        cache.insert(Beacon::new("a", "post", "alice"));
        cache.insert(Beacon::new("b", "post", "alice"));

        // Two beacons never allow an eviction at a 10% cap
        for _ in 0..100 {
            assert!(cache.self_heal().evicted.is_empty());
        }
        let health = cache.health("a").unwrap_or(0.0);
        assert!(cache.contains("a"));
        assert!((health - 0.99f64.powi(100)).abs() < 1e-9);
    }

    #[test]
    fn test_stats() {
        let cache = cache();
        assert_eq!(cache.stats().total_beacons, 0);
        assert_eq!(cache.stats().avg_health, 0.0);

        cache.insert(Beacon::new("a", "post", "alice").with_primes(&[2, 3]));
        let stats = cache.stats();
        assert_eq!(stats.total_beacons, 1);
        assert_eq!(stats.prime_index_size, 2);
        assert_eq!(stats.avg_health, 1.0);
        assert_eq!(stats.hit_rate, stats.avg_health);
        assert_eq!(stats.entropy, 0.0);
    }

    #[test]
    fn test_state_survives_reload() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let cache = BeaconCache::new(Arc::clone(&store), CacheConfig::default());
        cache.insert(
            Beacon::new("a", "post", "alice")
                .with_primes(&[2, 3])
                .with_fingerprint(vec![1, 2, 3]),
        );
        cache.state.write().health.initialize("a", 0.4);
        cache.save();
        drop(cache);

        let reloaded = BeaconCache::new(store, CacheConfig::default());
        assert_eq!(reloaded.len(), 1);
        assert_eq!(reloaded.get_by_author("alice", None)[0].fingerprint, vec![1, 2, 3]);
        assert_eq!(reloaded.health("a"), Some(0.4));
        assert_eq!(reloaded.stats().prime_index_size, 2);
    }

    #[test]
    fn test_clear_resets_everything() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let cache = BeaconCache::new(Arc::clone(&store), CacheConfig::default());
        cache.insert(Beacon::new("a", "post", "alice"));
        cache.clear();

        assert!(cache.is_empty());
        assert_eq!(cache.stats().prime_index_size, 0);
        assert_eq!(store.read("beacon_cache").unwrap(), None);
    }

    #[test]
    fn test_decode_text_for_cached_beacon() {
        let cache = cache();
        let beacon = cache
            .codec()
            .encoder()
            .encode_beacon("cached text", "alice", "post")
            .unwrap();
        let id = cache.insert(beacon);
        assert_eq!(cache.decode_text(&id), Some("cached text".to_string()));
        assert_eq!(cache.decode_text("missing"), None);
    }

    #[tokio::test]
    async fn test_clear_abandons_in_flight_fetch() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(SlowFetcher {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let cache = Arc::new(
            BeaconCache::new(Arc::clone(&store), CacheConfig::default()).with_fetcher(fetcher),
        );

        let lookup = {
            let cache = Arc::clone(&cache);
            tokio::spawn(async move { cache.get_by_id("x").await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert_eq!(cache.pending.lock().len(), 1);
        cache.clear();

        // The caller still gets its answer, but the cache stays empty
        let fetched = lookup.await.unwrap();
        assert!(matches!(fetched, Ok(Some(ref b)) if b.beacon_id == "x"));
        assert!(cache.is_empty());
        assert!(cache.pending.lock().is_empty());
        assert_eq!(store.read("beacon_cache").unwrap(), None);
    }

    #[tokio::test]
    async fn test_fetched_beacon_is_persisted() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let fetcher = Arc::new(SlowFetcher {
            calls: AtomicUsize::new(0),
            fail: false,
        });
        let cache = BeaconCache::new(Arc::clone(&store), CacheConfig::default())
            .with_fetcher(fetcher);
        assert!(cache.get_by_id("remote-2").await.unwrap().is_some());

        let reloaded = BeaconCache::new(store, CacheConfig::default());
        assert!(reloaded.contains("remote-2"));
    }

    #[test]
    fn test_load_aligns_health_with_cache() {
        let store: Arc<dyn DurableStore> = Arc::new(MemoryStore::new());
        let persistence = CachePersistence::new(
            Arc::clone(&store),
            "beacon_cache",
            crate::storage::CompressionAlgorithm::LZ4,
        );
        let beacons = HashMap::from([
            ("a".to_string(), Beacon::new("a", "post", "alice")),
            ("b".to_string(), Beacon::new("b", "post", "alice")),
        ]);
        let health = HashMap::from([("a".to_string(), 0.4), ("ghost".to_string(), 0.2)]);
        persistence.save(&beacons, &HashMap::new(), &health).unwrap();

        let cache = BeaconCache::new(store, CacheConfig::default());
        assert_eq!(cache.health("a"), Some(0.4));
        assert_eq!(cache.health("b"), Some(INITIAL_HEALTH));
        assert_eq!(cache.health("ghost"), None);
        assert!((cache.stats().avg_health - 0.7).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_prime_table_upgrade_uses_configured_timeout() {
        let config = CacheConfig {
            upgrade_timeout: Duration::from_millis(20),
            ..CacheConfig::default()
        };
        let cache = BeaconCache::new(Arc::new(MemoryStore::new()), config);
        let before = cache.prime_table().len();

        let slow = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<_, String>(vec![2, 3])
        };
        assert!(!cache.upgrade_prime_table(slow).await.unwrap());
        assert_eq!(cache.prime_table().len(), before);

        let fast = async { Ok::<_, String>(vec![2, 3, 5, 7]) };
        assert!(cache.upgrade_prime_table(fast).await.unwrap());
        assert_eq!(cache.prime_table().len(), 4);
    }

    struct RemoteProvider;

    impl EncodingProvider for RemoteProvider {
        fn name(&self) -> &str {
            "remote"
        }

        fn encode(
            &self,
            text: &str,
            basis: &[u64],
        ) -> Result<crate::memory::fragment::ResonantFragment, crate::memory::provider::CodecError>
        {
            crate::memory::provider::LocalProvider.encode(text, basis)
        }

        fn sample_field(
            &self,
            _field: &crate::memory::provider::HolographicField,
            _x: f64,
            _y: f64,
        ) -> Option<f64> {
            None
        }
    }

    #[tokio::test]
    async fn test_provider_upgrade_uses_configured_timeout() {
        let config = CacheConfig {
            upgrade_timeout: Duration::from_millis(20),
            ..CacheConfig::default()
        };
        let cache = BeaconCache::new(Arc::new(MemoryStore::new()), config);

        let slow = async {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok::<Arc<dyn EncodingProvider>, String>(Arc::new(RemoteProvider))
        };
        assert!(!cache.upgrade_provider(slow).await);
        assert!(cache.codec().providers().is_reduced_fidelity());

        let fast = async { Ok::<Arc<dyn EncodingProvider>, String>(Arc::new(RemoteProvider)) };
        assert!(cache.upgrade_provider(fast).await);
        assert!(!cache.codec().providers().is_reduced_fidelity());
    }
}
