//! Prime table backing basis derivation.
//!
//! The table starts from a local sieve and can be swapped wholesale for a
//! larger one produced elsewhere. Readers take an `Arc` snapshot, so a swap
//! never disturbs an indexing call already holding the previous table.

use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub const DEFAULT_SIEVE_LIMIT: usize = 10_000;

/// Sieve of Eratosthenes over `[2, limit]`
pub fn sieve(limit: usize) -> Vec<u64> {
    if limit < 2 {
        return Vec::new();
    }
    let mut composite = vec![false; limit + 1];
    let mut primes = Vec::new();
    for n in 2..=limit {
        if composite[n] {
            continue;
        }
        primes.push(n as u64);
        let mut multiple = n * n;
        while multiple <= limit {
            composite[multiple] = true;
            multiple += n;
        }
    }
    primes
}

#[derive(Debug)]
pub struct PrimeTable {
    primes: RwLock<Arc<Vec<u64>>>,
}

impl PrimeTable {
    pub fn new() -> Self {
        Self::with_primes(sieve(DEFAULT_SIEVE_LIMIT))
    }

    pub fn with_primes(mut primes: Vec<u64>) -> Self {
        primes.sort_unstable();
        primes.dedup();
        Self {
            primes: RwLock::new(Arc::new(primes)),
        }
    }

    /// The table as it stands right now
    pub fn snapshot(&self) -> Arc<Vec<u64>> {
        Arc::clone(&*self.primes.read())
    }

    pub fn len(&self) -> usize {
        self.primes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.primes.read().is_empty()
    }

    /// Replaces the whole table. Empty tables are refused.
    pub fn replace(&self, mut primes: Vec<u64>) -> bool {
        primes.retain(|&p| p >= 2);
        if primes.is_empty() {
            return false;
        }
        primes.sort_unstable();
        primes.dedup();
        let size = primes.len();
        *self.primes.write() = Arc::new(primes);
        info!(primes = size, "Prime table replaced");
        true
    }

    /// Waits up to `timeout` for an external generator; on time and success the
    /// table is swapped, otherwise the current table stays in place.
    pub async fn upgrade_within<F, E>(&self, generator: F, timeout: Duration) -> bool
    where
        F: Future<Output = Result<Vec<u64>, E>>,
        E: Display,
    {
        match tokio::time::timeout(timeout, generator).await {
            Ok(Ok(primes)) => self.replace(primes),
            Ok(Err(e)) => {
                warn!(error = %e, "Prime generator failed, keeping sieve table");
                false
            }
            Err(_) => {
                debug!(
                    timeout_ms = timeout.as_millis() as u64,
                    "Prime generator timed out, keeping sieve table"
                );
                false
            }
        }
    }

    /// Fire-and-forget variant of [`PrimeTable::upgrade_within`]
    pub fn spawn_upgrade<F, E>(self: &Arc<Self>, generator: F, timeout: Duration) -> JoinHandle<bool>
    where
        F: Future<Output = Result<Vec<u64>, E>> + Send + 'static,
        E: Display + Send + 'static,
    {
        let table = Arc::clone(self);
        tokio::spawn(async move { table.upgrade_within(generator, timeout).await })
    }

    /// Distinct prime factors of `n` that appear in `table`, ascending
    pub fn factor_with(table: &[u64], mut n: u64) -> Vec<u64> {
        let mut factors = Vec::new();
        for &p in table {
            if p.saturating_mul(p) > n {
                break;
            }
            if n % p == 0 {
                factors.push(p);
                while n % p == 0 {
                    n /= p;
                }
            }
        }
        if n > 1 && table.binary_search(&n).is_ok() {
            factors.push(n);
        }
        factors
    }

    /// Deterministic basis for an id: the id is hashed to an integer which is
    /// then factored against the table.
    pub fn hash_basis(&self, id: &str) -> Vec<u64> {
        let table = self.snapshot();
        hash_basis_with(&table, id)
    }
}

impl Default for PrimeTable {
    fn default() -> Self {
        Self::new()
    }
}

pub(crate) fn hash_basis_with(table: &[u64], id: &str) -> Vec<u64> {
    if table.is_empty() {
        return Vec::new();
    }
    let digest = Sha256::digest(id.as_bytes());
    let hash = u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]]) as u64;
    let factors = PrimeTable::factor_with(table, hash.max(2));
    if factors.is_empty() {
        // Hash has no factor inside the table; pin it to one table prime instead
        vec![table[(hash % table.len() as u64) as usize]]
    } else {
        factors
    }
}
