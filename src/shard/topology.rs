//! Shard topology.
//!
//! Fixed master list plus replica pools, built once and shared read-only by
//! every caller and the reclaimer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use super::{ReplicaSelector, ShardRouter};
use crate::backend::Backend;
use crate::error::{Result, StoreError};

/// Which handle served a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadTarget {
    /// Consistent read on the master
    Master,
    /// Replica `slot` of the shard's pool
    Replica(usize),
    /// Inconsistent read served by the master because the pool is empty
    MasterFallback,
}

impl fmt::Display for ReadTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadTarget::Master => write!(f, "master"),
            ReadTarget::Replica(slot) => write!(f, "replica {}", slot),
            ReadTarget::MasterFallback => write!(f, "master (no replicas)"),
        }
    }
}

/// Immutable shard layout.
#[derive(Debug)]
pub struct Topology {
    router: ShardRouter,
    masters: Vec<Arc<dyn Backend>>,
    replicas: ReplicaSelector,
}

impl Topology {
    /// Validates and builds the layout.
    ///
    /// Fails when there are no masters or when a replica pool names a master
    /// index that does not exist.
    pub fn new(
        masters: Vec<Arc<dyn Backend>>,
        mut replicas: HashMap<usize, Vec<Arc<dyn Backend>>>,
    ) -> Result<Self> {
        let router = ShardRouter::new(masters.len())
            .ok_or_else(|| StoreError::Config("at least one master shard is required".to_string()))?;

        if let Some(bad) = replicas.keys().copied().find(|&index| index >= masters.len()) {
            return Err(StoreError::Config(format!(
                "replicas registered for master {} but only {} masters exist",
                bad,
                masters.len()
            )));
        }

        let pools = (0..masters.len())
            .map(|index| replicas.remove(&index).unwrap_or_default())
            .collect();

        Ok(Self {
            router,
            masters,
            replicas: ReplicaSelector::new(pools),
        })
    }

    /// Number of master shards.
    pub fn shard_count(&self) -> usize {
        self.router.num_shards()
    }

    /// Shard index owning `key`.
    pub fn shard_of(&self, key: &str) -> usize {
        self.router.shard_of(key)
    }

    /// Write handle for a shard.
    pub fn master(&self, index: usize) -> &Arc<dyn Backend> {
        &self.masters[index]
    }

    /// All master handles in shard order.
    pub fn masters(&self) -> &[Arc<dyn Backend>] {
        &self.masters
    }

    /// The replica pools.
    pub fn replicas(&self) -> &ReplicaSelector {
        &self.replicas
    }

    /// Chooses the handle for a read on shard `index`.
    ///
    /// Consistent reads always target the master. Other reads pick a random
    /// replica and fall back to the master when the pool is empty.
    pub fn read_handle(&self, index: usize, consistent: bool) -> (ReadTarget, &Arc<dyn Backend>) {
        if consistent {
            debug!("Using master {} for consistent read", index);
            return (ReadTarget::Master, self.master(index));
        }

        match self.replicas.pick(index) {
            Some((slot, handle)) => {
                debug!("Using replica {} of master {}", slot, index);
                (ReadTarget::Replica(slot), handle)
            }
            None => {
                info!("No replicas found for master {}, falling back to master", index);
                (ReadTarget::MasterFallback, self.master(index))
            }
        }
    }
}
