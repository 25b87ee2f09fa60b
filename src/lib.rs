//! Content-addressed beacon cache with prime-factor relatedness, health-driven
//! self-healing, durable persistence and a layered text decoder.

pub mod config;
pub mod memory;
pub mod storage;
pub mod transport;

pub use config::CacheConfig;
pub use memory::{
    Beacon, BeaconCache, CacheStats, CodecError, MemoryCodec, ResonantFragment, SelfHealReport,
};
pub use storage::{
    AutosaveHandle, CompressionAlgorithm, DurableStore, FileStore, HostSignal, MemoryStore,
    StorageError,
};
pub use transport::{BeaconFetcher, FetchError};
