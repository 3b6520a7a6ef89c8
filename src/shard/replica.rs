//! Replica selection.
//!
//! Each master owns an ordered pool of zero or more read-only replicas.
//! Selection is uniform random per call with no affinity and no health
//! tracking.

use std::sync::Arc;

use rand::Rng;

use crate::backend::Backend;

/// Immutable per-master replica pools.
#[derive(Debug, Clone, Default)]
pub struct ReplicaSelector {
    pools: Vec<Vec<Arc<dyn Backend>>>,
}

impl ReplicaSelector {
    /// Builds a selector from one pool per master, indexed by master.
    pub fn new(pools: Vec<Vec<Arc<dyn Backend>>>) -> Self {
        Self { pools }
    }

    /// Picks a replica for `master_index`, or `None` when it has none.
    pub fn pick(&self, master_index: usize) -> Option<(usize, &Arc<dyn Backend>)> {
        let pool = self.pools.get(master_index)?;
        if pool.is_empty() {
            return None;
        }
        let slot = rand::thread_rng().gen_range(0..pool.len());
        Some((slot, &pool[slot]))
    }

    /// Number of replicas registered for `master_index`.
    pub fn replica_count(&self, master_index: usize) -> usize {
        self.pools.get(master_index).map_or(0, Vec::len)
    }

    /// Every replica handle, with its master index.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &Arc<dyn Backend>)> {
        self.pools
            .iter()
            .enumerate()
            .flat_map(|(master, pool)| pool.iter().map(move |handle| (master, handle)))
    }
}
