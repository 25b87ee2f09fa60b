use super::entry::Beacon;
use super::fragment::ResonantFragment;
use super::primes::PrimeTable;
use super::provider::{CodecError, ProviderSlot};
use rand::Rng;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

const PRINTABLE: std::ops::RangeInclusive<f64> = 32.0..=126.0;

/// Coefficient-based decoding of beacons and fragments
#[derive(Debug, Clone)]
pub struct MemoryDecoder {
    table: Arc<PrimeTable>,
    providers: Arc<ProviderSlot>,
}

impl MemoryDecoder {
    pub fn new(table: Arc<PrimeTable>, providers: Arc<ProviderSlot>) -> Self {
        Self { table, providers }
    }

    /// Canonical fragment view of a raw value.
    ///
    /// Fragment-shaped input passes through, beacon-shaped input is rebuilt
    /// from its basis and fingerprint, any other object yields an empty
    /// fragment. Non-objects and malformed fragment fields are errors.
    pub fn to_resonant_fragment(&self, raw: &Value) -> Result<ResonantFragment, CodecError> {
        let fields = raw
            .as_object()
            .ok_or_else(|| CodecError::Malformed("expected a JSON object".into()))?;

        if fields.contains_key("coeffs") {
            return parse_fragment(fields);
        }
        if is_beacon_shape(fields) {
            let beacon: Beacon = serde_json::from_value(raw.clone())
                .map_err(|e| CodecError::Malformed(e.to_string()))?;
            return Ok(self.fragment_from_beacon(&beacon));
        }
        Ok(ResonantFragment::empty())
    }

    /// Pairs each basis prime with a fingerprint byte scaled to [0, 1], or a
    /// random amplitude once the fingerprint runs out.
    pub fn fragment_from_beacon(&self, beacon: &Beacon) -> ResonantFragment {
        let basis = beacon
            .basis()
            .unwrap_or_else(|| self.table.hash_basis(&beacon.beacon_id));
        let mut rng = rand::thread_rng();
        let pairs: Vec<(u64, f64)> = basis
            .iter()
            .enumerate()
            .map(|(i, &prime)| {
                let amplitude = match beacon.fingerprint.get(i) {
                    Some(&byte) => byte as f64 / 255.0,
                    None => rng.gen::<f64>(),
                };
                (prime, amplitude)
            })
            .collect();
        ResonantFragment::from_coefficients(&pairs, &beacon.fingerprint)
    }

    /// Direct numeric reconstruction, one character per coefficient
    pub fn decode_with_primes(&self, fragment: &ResonantFragment) -> Option<String> {
        let text: String = fragment
            .sorted_coeffs()
            .into_iter()
            .filter_map(|(prime, amplitude)| printable_char(prime, amplitude))
            .collect();
        (!text.is_empty()).then_some(text)
    }

    /// Samples the provider's holographic field at one point per coefficient rank
    pub fn decode_with_holographic_field(&self, fragment: &ResonantFragment) -> Option<String> {
        let field = fragment.holographic_field.as_ref()?;
        let provider = self.providers.current();
        if provider.name() != field.provider() {
            debug!(
                field = field.provider(),
                provider = provider.name(),
                "Holographic field belongs to another provider"
            );
            return None;
        }

        let text: String = fragment
            .sorted_coeffs()
            .iter()
            .enumerate()
            .filter_map(|(rank, &(prime, _))| {
                provider.sample_field(field, rank as f64, prime as f64 / 100.0)
            })
            .map(|sample| (sample * 255.0).round())
            .filter(|code| PRINTABLE.contains(code))
            .map(|code| code as u8 as char)
            .collect();
        (!text.is_empty()).then_some(text)
    }
}

/// Amplitude-scaled, prime-modulo, then averaged; first printable code wins
fn printable_char(prime: u64, amplitude: f64) -> Option<char> {
    let scaled = (amplitude * 255.0).round();
    let modulo = (prime % 128) as f64;
    let averaged = ((scaled + modulo) / 2.0).round();
    [scaled, modulo, averaged]
        .into_iter()
        .find(|code| PRINTABLE.contains(code))
        .map(|code| code as u8 as char)
}

fn is_beacon_shape(fields: &Map<String, Value>) -> bool {
    (fields.contains_key("beacon_id") || fields.contains_key("beaconId"))
        && fields.contains_key("fingerprint")
}

fn parse_fragment(fields: &Map<String, Value>) -> Result<ResonantFragment, CodecError> {
    let coeffs: HashMap<u64, f64> = fields
        .get("coeffs")
        .and_then(Value::as_object)
        .ok_or_else(|| CodecError::Malformed("coeffs must be an object".into()))?
        .iter()
        .map(|(key, value)| {
            let prime = key
                .parse::<u64>()
                .map_err(|_| CodecError::Malformed(format!("coefficient key {key:?}")))?;
            let amplitude = value
                .as_f64()
                .ok_or_else(|| CodecError::Malformed(format!("coefficient {prime} amplitude")))?;
            Ok((prime, amplitude))
        })
        .collect::<Result<_, CodecError>>()?;

    let center = match fields.get("center") {
        None | Some(Value::Null) => (0.0, 0.0),
        Some(Value::Array(point)) if point.len() == 2 => match (point[0].as_f64(), point[1].as_f64()) {
            (Some(x), Some(y)) => (x, y),
            _ => return Err(CodecError::Malformed("center must be numeric".into())),
        },
        Some(_) => return Err(CodecError::Malformed("center must be a pair".into())),
    };

    Ok(ResonantFragment {
        coeffs,
        center,
        entropy: fields.get("entropy").and_then(Value::as_f64).unwrap_or(0.0),
        prime_resonance: fields.get("primeResonance").and_then(Value::as_f64),
        holographic_field: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::provider::{EncodingProvider, LocalProvider};
    use serde_json::json;

    fn decoder() -> MemoryDecoder {
        MemoryDecoder::new(Arc::new(PrimeTable::new()), Arc::new(ProviderSlot::local()))
    }

    #[test]
    fn test_fragment_passthrough() {
        let fragment = decoder()
            .to_resonant_fragment(&json!({
                "coeffs": {"2": 0.5, "3": 0.25},
                "center": [0.1, 0.2],
                "entropy": 0.7
            }))
            .unwrap();
        assert_eq!(fragment.coeffs.len(), 2);
        assert_eq!(fragment.center, (0.1, 0.2));
        assert_eq!(fragment.entropy, 0.7);
    }

    #[test]
    fn test_malformed_fragment_is_an_error() {
        let decoder = decoder();
        assert!(decoder.to_resonant_fragment(&json!({"coeffs": [1, 2]})).is_err());
        assert!(decoder
            .to_resonant_fragment(&json!({"coeffs": {"x": 1.0}}))
            .is_err());
        assert!(decoder.to_resonant_fragment(&json!(42)).is_err());
    }

    #[test]
    fn test_beacon_shape_uses_fingerprint() {
        let fragment = decoder()
            .to_resonant_fragment(&json!({
                "beacon_id": "b1",
                "prime_indices": [2, 3, 5],
                "fingerprint": [72, 105, 33]
            }))
            .unwrap();
        assert_eq!(fragment.coeffs.len(), 3);
        assert!((fragment.coeffs[&3] - 105.0 / 255.0).abs() < 1e-12);
        assert!(fragment.prime_resonance.is_some());
        assert_eq!(decoder().decode_with_primes(&fragment), Some("Hi!".to_string()));
    }

    #[test]
    fn test_short_fingerprint_gets_random_amplitudes() {
        let beacon = Beacon::new("b2", "post", "u")
            .with_primes(&[2, 3, 5, 7])
            .with_fingerprint(vec![255]);
        let fragment = decoder().fragment_from_beacon(&beacon);
        assert_eq!(fragment.coeffs.len(), 4);
        assert_eq!(fragment.coeffs[&2], 1.0);
        assert!(fragment.coeffs.values().all(|a| (0.0..=1.0).contains(a)));
    }

    #[test]
    fn test_unknown_shape_is_empty() {
        let fragment = decoder().to_resonant_fragment(&json!({"foo": 1})).unwrap();
        assert!(fragment.is_empty());
        assert_eq!(decoder().decode_with_primes(&fragment), None);
    }

    #[test]
    fn test_printable_strategies() {
        // Scaled amplitude is printable
        assert_eq!(printable_char(2, 65.0 / 255.0), Some('A'));
        // Scaled is out of range, prime % 128 = 97
        assert_eq!(printable_char(97, 0.0), Some('a'));
        // No strategy lands in range: 255, 5 and 130
        assert_eq!(printable_char(5, 1.0), None);
        // Only the average lands in range: (200 + 131 % 128) / 2 rounds to 102
        assert_eq!(printable_char(131, 200.0 / 255.0), Some('f'));
    }

    #[test]
    fn test_holographic_decode_with_local_field() {
        let decoder = decoder();
        let basis = PrimeTable::new().snapshot();
        let fragment = LocalProvider.encode("field text", &basis).unwrap();
        assert_eq!(
            decoder.decode_with_holographic_field(&fragment),
            Some("field text".to_string())
        );

        let mut without_field = fragment.clone();
        without_field.holographic_field = None;
        assert_eq!(decoder.decode_with_holographic_field(&without_field), None);
    }
}
