use super::entry::Beacon;
use super::primes::{hash_basis_with, PrimeTable};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Upper bound on ids returned by [`PrimeIndexer::find_related`]
pub const DEFAULT_RELATED_LIMIT: usize = 10;

/// Reverse index from basis prime to the beacons sharing it
#[derive(Debug)]
pub struct PrimeIndexer {
    table: Arc<PrimeTable>,
    buckets: BTreeMap<u64, Vec<String>>,
    // Basis each id was indexed under
    bases: HashMap<String, Vec<u64>>,
    related_limit: usize,
}

impl PrimeIndexer {
    pub fn new(table: Arc<PrimeTable>) -> Self {
        Self::with_limit(table, DEFAULT_RELATED_LIMIT)
    }

    pub fn with_limit(table: Arc<PrimeTable>, related_limit: usize) -> Self {
        Self {
            table,
            buckets: BTreeMap::new(),
            bases: HashMap::new(),
            related_limit,
        }
    }

    /// Explicit basis when it parses, otherwise one derived from the id
    pub fn basis_for(&self, beacon: &Beacon) -> Vec<u64> {
        match beacon.basis() {
            Some(basis) => basis,
            None => self.derived_basis(&beacon.beacon_id),
        }
    }

    fn derived_basis(&self, id: &str) -> Vec<u64> {
        // One snapshot for the whole call, even if the table is swapped meanwhile
        let table = self.table.snapshot();
        hash_basis_with(&table, id)
    }

    /// Appends the beacon id to each basis bucket. Repeated indexing appends again.
    pub fn index(&mut self, beacon: &Beacon) -> Vec<u64> {
        let basis = self.basis_for(beacon);
        for &prime in &basis {
            self.buckets
                .entry(prime)
                .or_default()
                .push(beacon.beacon_id.clone());
        }
        self.bases.insert(beacon.beacon_id.clone(), basis.clone());
        basis
    }

    /// Ids sharing at least one factor with `id`, in discovery order.
    ///
    /// Indexed ids are looked up under the basis they were indexed with; unknown
    /// ids fall back to the hash-derived basis. The query id itself is not filtered.
    pub fn find_related(&self, id: &str) -> Vec<String> {
        let basis = match self.bases.get(id) {
            Some(basis) => basis.clone(),
            None => self.derived_basis(id),
        };

        let mut seen = HashSet::new();
        let mut related = Vec::new();
        for prime in basis {
            let Some(bucket) = self.buckets.get(&prime) else {
                continue;
            };
            for member in bucket {
                if related.len() >= self.related_limit {
                    return related;
                }
                if seen.insert(member.as_str()) {
                    related.push(member.clone());
                }
            }
        }
        related
    }

    /// Drops the id from every bucket, deleting buckets left empty
    pub fn remove(&mut self, id: &str) -> usize {
        let mut removed = 0;
        self.buckets.retain(|_, members| {
            let before = members.len();
            members.retain(|member| member != id);
            removed += before - members.len();
            !members.is_empty()
        });
        self.bases.remove(id);
        removed
    }

    /// Number of live buckets
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn bucket(&self, prime: u64) -> Option<&[String]> {
        self.buckets.get(&prime).map(Vec::as_slice)
    }

    pub fn clear(&mut self) {
        self.buckets.clear();
        self.bases.clear();
    }
}
