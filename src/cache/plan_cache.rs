use std::collections::hash_map::{Entry, RandomState};
use std::collections::HashMap;
use std::hash::{BuildHasher, Hash};
use std::sync::{Arc, Mutex};

use log::debug;

use crate::error::Result;

/// Keyed store of opaque backend plans, indexed by a per-domain fingerprint.
///
/// Constructing a backend execution plan costs orders of magnitude more than
/// executing one, so each domain front end keeps a cache keyed by the exact
/// parameters that determine whether two requests can share a plan. Hashing
/// only locates a bucket; equality of the full fingerprint is authoritative,
/// so hash collisions affect lookup speed, never correctness.
///
/// The hash strategy is supplied per domain through the `S` parameter; the
/// equality strategy is the key's `Eq` implementation.
///
/// The cache owns every plan it holds. Lookups hand out `Arc` borrows; no
/// eviction is exposed, so entries live until the process exits. Bounding
/// growth (e.g. an LRU capacity) is a known open question.
pub struct PlanCache<K, V, S = RandomState> {
    // One lock spans the miss check through the insert in `get_or_create`,
    // so callers racing on an equal fingerprint build at most one plan.
    entries: Mutex<HashMap<K, Arc<V>, S>>,
}

impl<K: Eq + Hash + Clone, V> PlanCache<K, V> {
    pub fn new() -> Self {
        Self::with_hasher(RandomState::new())
    }
}

impl<K: Eq + Hash + Clone, V> Default for PlanCache<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Eq + Hash + Clone, V, S: BuildHasher> PlanCache<K, V, S> {
    pub fn with_hasher(hasher: S) -> Self {
        Self {
            entries: Mutex::new(HashMap::with_hasher(hasher)),
        }
    }

    /// Return the plan stored for a fingerprint structurally equal to `key`.
    pub fn lookup(&self, key: &K) -> Option<Arc<V>> {
        self.entries.lock().unwrap().get(key).cloned()
    }

    /// Record a plan for `key`. If an equal fingerprint was already inserted,
    /// the existing plan is retained and returned; at most one plan is ever
    /// observable per fingerprint value.
    pub fn insert(&self, key: K, plan: V) -> Arc<V> {
        let mut entries = self.entries.lock().unwrap();
        match entries.entry(key) {
            Entry::Occupied(entry) => entry.get().clone(),
            Entry::Vacant(entry) => entry.insert(Arc::new(plan)).clone(),
        }
    }

    /// Look up `key`, building and inserting the plan on a miss.
    ///
    /// The cache lock is held across `build`, which serializes construction
    /// for the whole cache instance but makes miss-construct-insert atomic:
    /// concurrent callers with equal fingerprints observe exactly one plan,
    /// and a failed build inserts nothing.
    pub fn get_or_create<F>(&self, key: &K, build: F) -> Result<Arc<V>>
    where
        F: FnOnce() -> Result<V>,
    {
        let mut entries = self.entries.lock().unwrap();
        if let Some(plan) = entries.get(key) {
            return Ok(plan.clone());
        }

        debug!("plan cache miss; constructing new plan ({} cached)", entries.len());
        let plan = Arc::new(build()?);
        entries.insert(key.clone(), plan.clone());
        Ok(plan)
    }

    /// Number of cached plans.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().unwrap().is_empty()
    }
}
