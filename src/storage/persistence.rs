//! Save/load of the whole cache as a single durable blob.
//!
//! The blob is a JSON document (`cache`, `userIndex`, `healthMap`,
//! `timestamp`) inside a bincode envelope carrying a CRC32 of the document
//! and the compression used. Any failure on the way back in is treated as
//! corruption: the blob is deleted and the cache starts empty.

use super::compression::{CompressionAlgorithm, Compressor};
use super::normalize::normalize;
use super::{DurableStore, StorageError};
use crate::memory::entry::Beacon;
use bincode::{deserialize, serialize};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Fields outside the canonical schema that must survive a save/load cycle;
/// the decode chain reads them.
pub const PRESERVED_FIELDS: &[&str] = &[
    "originalText",
    "content",
    "data",
    "coeffs",
    "center",
    "entropy",
];

#[derive(Serialize, Deserialize)]
struct StoredBlob {
    checksum: u32,
    algorithm: CompressionAlgorithm,
    payload: Vec<u8>,
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PersistedCache {
    cache: Map<String, Value>,
    user_index: Vec<(String, Vec<String>)>,
    health_map: HashMap<String, f64>,
    timestamp: i64,
}

/// Everything `load` hands back to the cache
#[derive(Debug, Default)]
pub struct LoadedCache {
    pub cache: HashMap<String, Beacon>,
    pub user_index: HashMap<String, HashSet<String>>,
    pub health_map: HashMap<String, f64>,
}

impl LoadedCache {
    pub fn is_empty(&self) -> bool {
        self.cache.is_empty() && self.user_index.is_empty() && self.health_map.is_empty()
    }
}

pub struct CachePersistence {
    store: Arc<dyn DurableStore>,
    key: String,
    compressor: Compressor,
}

impl CachePersistence {
    pub fn new(
        store: Arc<dyn DurableStore>,
        key: impl Into<String>,
        algorithm: CompressionAlgorithm,
    ) -> Self {
        Self {
            store,
            key: key.into(),
            compressor: Compressor::new(algorithm),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Reads the blob. Corrupt blobs are deleted and reported as empty.
    pub fn load(&self) -> LoadedCache {
        match self.try_load() {
            Ok(Some(loaded)) => {
                info!(
                    beacons = loaded.cache.len(),
                    authors = loaded.user_index.len(),
                    "Beacon cache loaded"
                );
                loaded
            }
            Ok(None) => LoadedCache::default(),
            Err(e) => {
                warn!(error = %e, key = %self.key, "Discarding corrupt beacon cache blob");
                if let Err(e) = self.store.remove(&self.key) {
                    warn!(error = %e, "Failed to delete corrupt beacon cache blob");
                }
                LoadedCache::default()
            }
        }
    }

    fn try_load(&self) -> Result<Option<LoadedCache>, StorageError> {
        let Some(raw) = self.store.read(&self.key)? else {
            return Ok(None);
        };

        let blob: StoredBlob = deserialize(&raw)?;
        let document = Compressor::decompress(blob.algorithm, &blob.payload)?;
        if crc32fast::hash(&document) != blob.checksum {
            return Err(StorageError::ChecksumMismatch(self.key.clone()));
        }
        let persisted: PersistedCache = serde_json::from_slice(&document)?;

        let mut cache = HashMap::with_capacity(persisted.cache.len());
        for (id, value) in &persisted.cache {
            let beacon = normalize(value).ok_or_else(|| StorageError::InvalidBeacon(id.clone()))?;
            cache.insert(beacon.beacon_id.clone(), beacon);
        }
        let user_index = persisted
            .user_index
            .into_iter()
            .map(|(author, ids)| (author, ids.into_iter().collect()))
            .collect();

        Ok(Some(LoadedCache {
            cache,
            user_index,
            health_map: persisted.health_map,
        }))
    }

    /// Writes the whole cache, replacing any previous blob
    pub fn save(
        &self,
        cache: &HashMap<String, Beacon>,
        user_index: &HashMap<String, HashSet<String>>,
        health_map: &HashMap<String, f64>,
    ) -> Result<(), StorageError> {
        let mut beacons = Map::new();
        for (id, beacon) in cache {
            beacons.insert(id.clone(), persisted_beacon(beacon)?);
        }

        let document = PersistedCache {
            cache: beacons,
            user_index: user_index
                .iter()
                .map(|(author, ids)| (author.clone(), ids.iter().cloned().collect()))
                .collect(),
            health_map: health_map.clone(),
            timestamp: Utc::now().timestamp_millis(),
        };
        let document = serde_json::to_vec(&document)?;

        let checksum = crc32fast::hash(&document);
        let (payload, metrics) = self.compressor.compress(&document);
        let encoded = serialize(&StoredBlob {
            checksum,
            algorithm: self.compressor.algorithm(),
            payload,
        })?;
        self.store.write(&self.key, &encoded)?;

        debug!(
            beacons = cache.len(),
            bytes = encoded.len(),
            ratio = metrics.compression_ratio(),
            "Beacon cache saved"
        );
        Ok(())
    }

    pub fn clear(&self) -> Result<(), StorageError> {
        self.store.remove(&self.key)
    }
}

/// Canonical fields plus the preserved non-canonical ones
fn persisted_beacon(beacon: &Beacon) -> Result<Value, StorageError> {
    let mut canonical = beacon.clone();
    canonical.extra = beacon
        .extra
        .iter()
        .filter(|(key, _)| PRESERVED_FIELDS.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    Ok(serde_json::to_value(&canonical)?)
}

/// Lifecycle transitions reported by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSignal {
    /// Host went to the background; save now in case it is never resumed
    Hidden,
    /// Host is shutting down; save once more and stop
    Teardown,
}

/// Keeps an autosave task alive. Dropping it triggers a final save.
pub struct AutosaveHandle {
    signals: mpsc::UnboundedSender<HostSignal>,
    task: JoinHandle<()>,
}

impl AutosaveHandle {
    pub fn signal(&self, signal: HostSignal) {
        if self.signals.send(signal).is_err() {
            debug!(?signal, "Autosave task already stopped");
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

impl Drop for AutosaveHandle {
    fn drop(&mut self) {
        let _ = self.signals.send(HostSignal::Teardown);
    }
}

/// Runs `save` every `interval`, on [`HostSignal::Hidden`], and once more on
/// teardown. Saves run on the blocking pool; failures are logged and the loop
/// carries on.
pub fn spawn_autosave<F>(save: F, interval: Duration) -> AutosaveHandle
where
    F: Fn() -> Result<(), StorageError> + Send + Sync + 'static,
{
    let (signals, mut receiver) = mpsc::unbounded_channel();
    let save = Arc::new(save);
    let run_save = move |reason: &'static str| {
        let save = Arc::clone(&save);
        async move {
            match tokio::task::spawn_blocking(move || save()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!(error = %e, reason, "Autosave failed"),
                Err(e) => warn!(error = %e, reason, "Autosave task failed"),
            }
        }
    };

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => run_save("interval").await,
                signal = receiver.recv() => match signal {
                    Some(HostSignal::Hidden) => run_save("hidden").await,
                    Some(HostSignal::Teardown) | None => {
                        run_save("teardown").await;
                        break;
                    }
                },
            }
        }
        debug!("Autosave task stopped");
    });

    info!(interval_secs = interval.as_secs(), "Autosave task started");
    AutosaveHandle { signals, task }
}
