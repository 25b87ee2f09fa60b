//! Request/response seam used by fetch-capable lookups.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Cloned to every caller sharing one in-flight fetch
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Invalid beacon payload: {0}")]
    InvalidPayload(String),
}

/// Fetches raw beacon JSON from wherever beacons live
#[async_trait]
pub trait BeaconFetcher: Send + Sync {
    /// `Ok(None)` when the remote has no beacon with this id
    async fn fetch_beacon(&self, beacon_id: &str) -> Result<Option<Value>, FetchError>;

    async fn fetch_by_author(
        &self,
        _author_id: &str,
        _beacon_type: Option<&str>,
    ) -> Result<Vec<Value>, FetchError> {
        Ok(Vec::new())
    }
}
