//! Core logic for caching, indexing and decoding beacons.

pub mod beacon_cache;
pub mod codec;
pub mod decoder;
pub mod encoder;
pub mod entry;
pub mod fallback;
pub mod fragment;
pub mod health;
pub mod prime_index;
pub mod primes;
pub mod provider;
pub mod wire;

pub use beacon_cache::{BeaconCache, CacheStats, SelfHealReport};
pub use codec::MemoryCodec;
pub use entry::Beacon;
pub use fallback::{DecodeAttempt, FallbackDecoder};
pub use fragment::ResonantFragment;
pub use health::HealthMonitor;
pub use prime_index::PrimeIndexer;
pub use primes::PrimeTable;
pub use provider::{CodecError, EncodingProvider, HolographicField, LocalProvider, ProviderSlot};
