//! Encoding providers: the capability that turns text into coefficient
//! fragments and samples the holographic fields attached to them.
//!
//! A deterministic [`LocalProvider`] is always available; a richer provider
//! can be swapped in at construction or through a bounded async upgrade.

use super::fragment::ResonantFragment;
use parking_lot::RwLock;
use std::any::Any;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CodecError {
    #[error("Nothing to encode")]
    EmptyInput,
    #[error("Malformed fragment input: {0}")]
    Malformed(String),
    #[error("Encoding provider {provider} failed: {reason}")]
    Provider { provider: String, reason: String },
}

/// Opaque field handle produced by an encoding provider
#[derive(Clone)]
pub struct HolographicField {
    provider: String,
    handle: Arc<dyn Any + Send + Sync>,
}

impl HolographicField {
    pub fn new<T: Any + Send + Sync>(provider: impl Into<String>, handle: T) -> Self {
        Self {
            provider: provider.into(),
            handle: Arc::new(handle),
        }
    }

    /// Name of the provider that owns the handle
    pub fn provider(&self) -> &str {
        &self.provider
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        (*self.handle).downcast_ref::<T>()
    }
}

impl fmt::Debug for HolographicField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HolographicField")
            .field("provider", &self.provider)
            .finish_non_exhaustive()
    }
}

pub trait EncodingProvider: Send + Sync {
    fn name(&self) -> &str;

    /// Encodes `text` over `basis` (ascending primes) into a fragment carrying
    /// this provider's holographic field.
    fn encode(&self, text: &str, basis: &[u64]) -> Result<ResonantFragment, CodecError>;

    /// Samples a field at `(x, y)`. `None` when the field is foreign or the
    /// coordinates fall outside it.
    fn sample_field(&self, field: &HolographicField, x: f64, y: f64) -> Option<f64>;
}

pub const LOCAL_PROVIDER: &str = "local";

/// Per-rank amplitudes kept by [`LocalProvider`] fields
#[derive(Debug)]
struct LocalField {
    amplitudes: Vec<f64>,
}

/// Deterministic provider: one byte per basis prime, amplitude `byte / 255`
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalProvider;

impl EncodingProvider for LocalProvider {
    fn name(&self) -> &str {
        LOCAL_PROVIDER
    }

    fn encode(&self, text: &str, basis: &[u64]) -> Result<ResonantFragment, CodecError> {
        if text.is_empty() {
            return Err(CodecError::EmptyInput);
        }
        let bytes = text.as_bytes();
        if basis.len() < bytes.len() {
            warn!(
                text_bytes = bytes.len(),
                basis = basis.len(),
                "Basis shorter than text, encoding is truncated"
            );
        }

        let pairs: Vec<(u64, f64)> = basis
            .iter()
            .zip(bytes)
            .map(|(&prime, &byte)| (prime, byte as f64 / 255.0))
            .collect();
        let amplitudes = pairs.iter().map(|&(_, amp)| amp).collect();

        let mut fragment = ResonantFragment::from_coefficients(&pairs, bytes);
        fragment.holographic_field = Some(HolographicField::new(
            LOCAL_PROVIDER,
            LocalField { amplitudes },
        ));
        Ok(fragment)
    }

    fn sample_field(&self, field: &HolographicField, x: f64, _y: f64) -> Option<f64> {
        let local = field.downcast_ref::<LocalField>()?;
        if !x.is_finite() || x < 0.0 {
            return None;
        }
        local.amplitudes.get(x.round() as usize).copied()
    }
}

/// Holds the active provider; readers clone the `Arc` and never block a swap
pub struct ProviderSlot {
    current: RwLock<Arc<dyn EncodingProvider>>,
}

impl ProviderSlot {
    pub fn new(provider: Arc<dyn EncodingProvider>) -> Self {
        Self {
            current: RwLock::new(provider),
        }
    }

    pub fn local() -> Self {
        Self::new(Arc::new(LocalProvider))
    }

    pub fn current(&self) -> Arc<dyn EncodingProvider> {
        Arc::clone(&*self.current.read())
    }

    pub fn replace(&self, provider: Arc<dyn EncodingProvider>) {
        info!(provider = provider.name(), "Encoding provider installed");
        *self.current.write() = provider;
    }

    /// True while only the deterministic fallback is installed
    pub fn is_reduced_fidelity(&self) -> bool {
        self.current.read().name() == LOCAL_PROVIDER
    }

    /// Installs the provider produced by `loader` if it resolves within `timeout`
    pub async fn upgrade_within<F, E>(&self, loader: F, timeout: Duration) -> bool
    where
        F: Future<Output = Result<Arc<dyn EncodingProvider>, E>>,
        E: fmt::Display,
    {
        match tokio::time::timeout(timeout, loader).await {
            Ok(Ok(provider)) => {
                self.replace(provider);
                true
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Encoding provider unavailable, staying on local provider");
                false
            }
            Err(_) => {
                debug!("Encoding provider load timed out, staying on local provider");
                false
            }
        }
    }
}

impl Default for ProviderSlot {
    fn default() -> Self {
        Self::local()
    }
}

impl fmt::Debug for ProviderSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSlot")
            .field("provider", &self.current.read().name())
            .finish()
    }
}
