use super::entry::Beacon;
use super::fragment::ResonantFragment;
use super::primes::PrimeTable;
use super::provider::{CodecError, ProviderSlot};
use chrono::Utc;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use tracing::debug;

/// Forward path: text to fragment, and text to a storable beacon
#[derive(Debug, Clone)]
pub struct MemoryEncoder {
    table: Arc<PrimeTable>,
    providers: Arc<ProviderSlot>,
}

impl MemoryEncoder {
    pub fn new(table: Arc<PrimeTable>, providers: Arc<ProviderSlot>) -> Self {
        Self { table, providers }
    }

    /// Encodes over the leading primes of the current table, one per text byte
    pub fn encode(&self, text: &str) -> Result<ResonantFragment, CodecError> {
        let table = self.table.snapshot();
        let basis = &table[..text.len().min(table.len())];
        self.providers.current().encode(text, basis)
    }

    /// Builds a content-addressed beacon for `text`.
    ///
    /// The id is the hex SHA-256 of `author_id:text`. The signature carries the
    /// text behind a little-endian `u32` length and the metadata carries it as
    /// `originalText`, so the structural decoders can recover it without the
    /// coefficient path.
    pub fn encode_beacon(
        &self,
        text: &str,
        author_id: &str,
        beacon_type: &str,
    ) -> Result<Beacon, CodecError> {
        let provider = self.providers.current();
        let fragment = self.encode(text)?;
        let coeffs = fragment.sorted_coeffs();

        let primes: Vec<u64> = coeffs.iter().map(|&(prime, _)| prime).collect();
        let fingerprint: Vec<u8> = coeffs
            .iter()
            .map(|&(_, amp)| (amp.clamp(0.0, 1.0) * 255.0).round() as u8)
            .collect();

        let text_len = u32::try_from(text.len())
            .map_err(|_| CodecError::Malformed("text longer than u32::MAX bytes".into()))?;
        let mut signature = text_len.to_le_bytes().to_vec();
        signature.extend_from_slice(text.as_bytes());

        let beacon_id = hex::encode(Sha256::digest(format!("{author_id}:{text}").as_bytes()));
        let metadata = json!({
            "originalText": text,
            "encoder": provider.name(),
            "entropy": fragment.entropy,
        });

        let mut beacon = Beacon::new(beacon_id, beacon_type, author_id)
            .with_primes(&primes)
            .with_fingerprint(fingerprint)
            .with_signature(signature)
            .with_metadata(metadata.to_string());
        beacon.epoch = Utc::now().timestamp();

        debug!(
            beacon_id = %beacon.beacon_id,
            provider = provider.name(),
            basis = primes.len(),
            "Encoded beacon"
        );
        Ok(beacon)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encoder() -> MemoryEncoder {
        MemoryEncoder::new(Arc::new(PrimeTable::new()), Arc::new(ProviderSlot::local()))
    }

    #[test]
    fn test_encode_uses_leading_primes() {
        let fragment = encoder().encode("abc").unwrap();
        let primes: Vec<u64> = fragment.sorted_coeffs().iter().map(|&(p, _)| p).collect();
        assert_eq!(primes, vec![2, 3, 5]);
        assert!(fragment.holographic_field.is_some());
    }

    #[test]
    fn test_encode_beacon_layout() {
        let beacon = encoder().encode_beacon("hello", "alice", "post").unwrap();
        assert_eq!(beacon.beacon_id.len(), 64);
        assert_eq!(beacon.author_id, "alice");
        assert_eq!(beacon.basis(), Some(vec![2, 3, 5, 7, 11]));
        assert_eq!(beacon.fingerprint, b"hello".to_vec());
        assert_eq!(&beacon.signature[..4], &5u32.to_le_bytes());
        assert_eq!(&beacon.signature[4..], b"hello");
        assert!(beacon.metadata.unwrap().contains("\"originalText\":\"hello\""));
    }

    #[test]
    fn test_same_author_and_text_share_an_id() {
        let encoder = encoder();
        let a = encoder.encode_beacon("same", "alice", "post").unwrap();
        let b = encoder.encode_beacon("same", "alice", "reply").unwrap();
        let c = encoder.encode_beacon("same", "bob", "post").unwrap();
        assert_eq!(a.beacon_id, b.beacon_id);
        assert_ne!(a.beacon_id, c.beacon_id);
    }

    #[test]
    fn test_empty_text_fails() {
        assert!(matches!(encoder().encode(""), Err(CodecError::EmptyInput)));
    }
}
