use crate::memory::entry::Beacon;
use serde_json::Value;
use tracing::debug;

/// Canonical beacon from any wire or storage shape, or `None` so callers can filter
pub fn normalize(raw: &Value) -> Option<Beacon> {
    if !raw.is_object() {
        return None;
    }
    match serde_json::from_value::<Beacon>(raw.clone()) {
        Ok(beacon) if !beacon.beacon_id.is_empty() => Some(beacon),
        Ok(_) => {
            debug!("Dropping beacon without an id");
            None
        }
        Err(e) => {
            debug!(error = %e, "Dropping unparseable beacon");
            None
        }
    }
}

/// Normalizes a batch, skipping anything unusable
pub fn normalize_all<'a>(raws: impl IntoIterator<Item = &'a Value>) -> Vec<Beacon> {
    raws.into_iter().filter_map(normalize).collect()
}
