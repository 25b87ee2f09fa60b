use super::wire::{base64_bytes, metadata_text, parse_basis, prime_list};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Represents a single content-addressed beacon held by the cache
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beacon {
    #[serde(alias = "beaconId")]
    pub beacon_id: String,
    #[serde(default, alias = "beaconType")]
    pub beacon_type: String,
    #[serde(default, alias = "authorId")]
    pub author_id: String,
    /// Serialized factor basis, kept verbatim so a malformed list survives storage
    #[serde(
        default,
        alias = "primeIndices",
        with = "prime_list",
        skip_serializing_if = "Option::is_none"
    )]
    pub prime_indices: Option<String>,
    #[serde(default)]
    pub epoch: i64,
    #[serde(default, with = "base64_bytes")]
    pub fingerprint: Vec<u8>,
    #[serde(default, with = "base64_bytes")]
    pub signature: Vec<u8>,
    #[serde(default, with = "metadata_text", skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    #[serde(default, alias = "createdAt")]
    pub created_at: String,
    /// Fields outside the canonical schema (`content`, `coeffs`, `originalText`, ...)
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Beacon {
    /// Creates a beacon stamped with the current time
    pub fn new(
        beacon_id: impl Into<String>,
        beacon_type: impl Into<String>,
        author_id: impl Into<String>,
    ) -> Self {
        Self {
            beacon_id: beacon_id.into(),
            beacon_type: beacon_type.into(),
            author_id: author_id.into(),
            prime_indices: None,
            epoch: 0,
            fingerprint: Vec::new(),
            signature: Vec::new(),
            metadata: None,
            created_at: Utc::now().to_rfc3339(),
            extra: Map::new(),
        }
    }

    pub fn with_primes(mut self, primes: &[u64]) -> Self {
        self.prime_indices = Some(Value::from(primes.to_vec()).to_string());
        self
    }

    pub fn with_fingerprint(mut self, fingerprint: Vec<u8>) -> Self {
        self.fingerprint = fingerprint;
        self
    }

    pub fn with_signature(mut self, signature: Vec<u8>) -> Self {
        self.signature = signature;
        self
    }

    pub fn with_metadata(mut self, metadata: impl Into<String>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    pub fn with_created_at(mut self, created_at: impl Into<String>) -> Self {
        self.created_at = created_at.into();
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: Value) -> Self {
        self.extra.insert(key.into(), value);
        self
    }

    /// The explicit factor basis, if present and parseable
    pub fn basis(&self) -> Option<Vec<u64>> {
        self.prime_indices.as_deref().and_then(parse_basis)
    }

    /// Full JSON view, including non-canonical fields
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Orders two beacons newest first by `created_at`
    pub fn cmp_newest_first(&self, other: &Self) -> Ordering {
        match (parse_timestamp(&self.created_at), parse_timestamp(&other.created_at)) {
            (Some(a), Some(b)) => b.cmp(&a),
            _ => other.created_at.cmp(&self.created_at),
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_beacon_creation() {
        let beacon = Beacon::new("b1", "post", "alice").with_primes(&[2, 3, 5]);
        assert_eq!(beacon.beacon_id, "b1");
        assert_eq!(beacon.basis(), Some(vec![2, 3, 5]));
        assert!(parse_timestamp(&beacon.created_at).is_some());
    }

    #[test]
    fn test_wire_forms_deserialize() {
        let beacon: Beacon = serde_json::from_value(json!({
            "beaconId": "b2",
            "beacon_type": "post",
            "author_id": "bob",
            "prime_indices": [3, 7],
            "fingerprint": {"type": "Buffer", "data": [9, 8]},
            "signature": "AQID",
            "metadata": {"originalText": "hi"},
            "content": "extra field"
        }))
        .unwrap();

        assert_eq!(beacon.beacon_id, "b2");
        assert_eq!(beacon.basis(), Some(vec![3, 7]));
        assert_eq!(beacon.fingerprint, vec![9, 8]);
        assert_eq!(beacon.signature, vec![1, 2, 3]);
        assert_eq!(beacon.metadata.as_deref(), Some(r#"{"originalText":"hi"}"#));
        assert_eq!(beacon.extra.get("content"), Some(&json!("extra field")));
    }

    #[test]
    fn test_unparseable_basis_is_kept() {
        let beacon: Beacon = serde_json::from_value(json!({
            "beacon_id": "b3",
            "prime_indices": "not primes"
        }))
        .unwrap();
        assert_eq!(beacon.prime_indices.as_deref(), Some("not primes"));
        assert_eq!(beacon.basis(), None);
    }

    #[test]
    fn test_newest_first_ordering() {
        let old = Beacon::new("a", "post", "x").with_created_at("2024-01-01T00:00:00Z");
        let new = Beacon::new("b", "post", "x").with_created_at("2024-06-01T00:00:00+02:00");
        let mut beacons = vec![old.clone(), new.clone()];
        beacons.sort_by(Beacon::cmp_newest_first);
        assert_eq!(beacons[0].beacon_id, "b");
    }
}
