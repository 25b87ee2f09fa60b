use super::decoder::MemoryDecoder;
use super::encoder::MemoryEncoder;
use super::entry::Beacon;
use super::fallback::FallbackDecoder;
use super::fragment::ResonantFragment;
use super::primes::PrimeTable;
use super::provider::{CodecError, ProviderSlot};
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};

/// Encoder, structural fallback and coefficient decoders behind one decode policy
#[derive(Debug, Clone)]
pub struct MemoryCodec {
    fallback: FallbackDecoder,
    decoder: MemoryDecoder,
    encoder: MemoryEncoder,
    providers: Arc<ProviderSlot>,
}

impl MemoryCodec {
    pub fn new(table: Arc<PrimeTable>, providers: Arc<ProviderSlot>) -> Self {
        Self {
            fallback: FallbackDecoder::new(),
            decoder: MemoryDecoder::new(Arc::clone(&table), Arc::clone(&providers)),
            encoder: MemoryEncoder::new(table, Arc::clone(&providers)),
            providers,
        }
    }

    pub fn providers(&self) -> &Arc<ProviderSlot> {
        &self.providers
    }

    pub fn decoder(&self) -> &MemoryDecoder {
        &self.decoder
    }

    pub fn encoder(&self) -> &MemoryEncoder {
        &self.encoder
    }

    pub fn encode(&self, text: &str) -> Result<ResonantFragment, CodecError> {
        self.encoder.encode(text)
    }

    /// Recovers text from a raw beacon or fragment.
    ///
    /// Structural fallback first, then holographic and prime decoding of the
    /// fragment view. A failed conversion gets one more structural pass.
    /// `None` means nothing could be recovered.
    pub fn decode(&self, raw: &Value) -> Option<String> {
        if let Some(text) = self.fallback.decode(raw) {
            return Some(text);
        }

        match self.decoder.to_resonant_fragment(raw) {
            Ok(fragment) => {
                if let Some(text) = self.decode_fragment(&fragment) {
                    return Some(text);
                }
            }
            Err(e) => {
                warn!(error = %e, "Fragment conversion failed, retrying structural decode");
                if let Some(text) = self.fallback.decode(raw) {
                    return Some(text);
                }
            }
        }

        debug!("No decode strategy recovered any text");
        None
    }

    pub fn decode_beacon(&self, beacon: &Beacon) -> Option<String> {
        self.decode(&beacon.to_value())
    }

    /// Coefficient strategies only: holographic field, then primes
    pub fn decode_fragment(&self, fragment: &ResonantFragment) -> Option<String> {
        self.decoder
            .decode_with_holographic_field(fragment)
            .or_else(|| self.decoder.decode_with_primes(fragment))
    }
}

impl Default for MemoryCodec {
    fn default() -> Self {
        Self::new(Arc::new(PrimeTable::new()), Arc::new(ProviderSlot::local()))
    }
}
