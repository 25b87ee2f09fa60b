use super::provider::HolographicField;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::f64::consts::PI;

/// Coefficient-map view of a beacon consumed by the numeric decode strategies
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResonantFragment {
    /// One amplitude per basis prime
    pub coeffs: HashMap<u64, f64>,
    pub center: (f64, f64),
    /// Normalized Shannon entropy of the source bytes, in [0, 1]
    pub entropy: f64,
    #[serde(
        default,
        rename = "primeResonance",
        skip_serializing_if = "Option::is_none"
    )]
    pub prime_resonance: Option<f64>,
    /// Handle owned by the encoding provider; never built by the decoder
    #[serde(skip)]
    pub holographic_field: Option<HolographicField>,
}

impl ResonantFragment {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Builds a fragment from `(prime, amplitude)` pairs and the bytes they came from.
    pub fn from_coefficients(pairs: &[(u64, f64)], source: &[u8]) -> Self {
        let coeffs: HashMap<u64, f64> = pairs.iter().copied().collect();
        let prime_resonance = if pairs.is_empty() {
            None
        } else {
            Some(
                pairs
                    .iter()
                    .map(|&(prime, amp)| amp * (prime as f64 * PI / 100.0).sin())
                    .sum::<f64>()
                    / pairs.len() as f64,
            )
        };

        Self {
            coeffs,
            center: centroid(pairs),
            entropy: byte_entropy(source),
            prime_resonance,
            holographic_field: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.coeffs.is_empty()
    }

    /// Coefficients in ascending prime order
    pub fn sorted_coeffs(&self) -> Vec<(u64, f64)> {
        let mut pairs: Vec<(u64, f64)> = self.coeffs.iter().map(|(&p, &a)| (p, a)).collect();
        pairs.sort_unstable_by_key(|&(prime, _)| prime);
        pairs
    }
}

/// Amplitude-weighted centroid: each coefficient sits on the unit circle at an
/// angle set by its rank, scaled by the prime's share of the largest prime.
fn centroid(pairs: &[(u64, f64)]) -> (f64, f64) {
    if pairs.is_empty() {
        return (0.0, 0.0);
    }
    let n = pairs.len() as f64;
    let max_prime = pairs.iter().map(|&(p, _)| p).max().unwrap_or(1).max(1) as f64;

    let (x, y) = pairs
        .iter()
        .enumerate()
        .fold((0.0, 0.0), |(x, y), (i, &(prime, amp))| {
            let angle = 2.0 * PI * i as f64 / n;
            let radius = amp * prime as f64 / max_prime;
            (x + radius * angle.cos(), y + radius * angle.sin())
        });
    (x / n, y / n)
}

/// Shannon entropy of a byte distribution, normalized to [0, 1]
pub fn byte_entropy(bytes: &[u8]) -> f64 {
    if bytes.is_empty() {
        return 0.0;
    }
    let mut counts = [0usize; 256];
    for &b in bytes {
        counts[b as usize] += 1;
    }
    let total = bytes.len() as f64;
    let entropy: f64 = counts
        .iter()
        .filter(|&&c| c > 0)
        .map(|&c| {
            let p = c as f64 / total;
            -p * p.log2()
        })
        .sum();
    (entropy / 8.0).clamp(0.0, 1.0)
}
