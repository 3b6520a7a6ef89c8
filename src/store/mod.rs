//! Store Module
//!
//! The key-value engine: sharded writes, master/replica read splitting and
//! the expiry policy layered on top of the backing stores.

mod clock;
mod engine;
mod stats;


use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::backend::Backend;
use crate::error::{Result, StoreError};

pub use clock::{Clock, ManualClock, SystemClock};
pub use engine::{ScopedStore, ShardedStore};
pub(crate) use engine::StoreCore;
pub use stats::{StatsSnapshot, StoreStats};

// == Public Constants ==
/// TTL applied to every write unless configured otherwise
pub const DEFAULT_EXPIRY_TIME: Duration = Duration::from_secs(60);

/// Reclaim sweep period unless configured otherwise
pub const DEFAULT_PURGE_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// The operations callers issue against the store.
///
/// `ShardedStore` is the production implementation and `ScopedStore` binds
/// it to a caller's cancellation token. Cancelled or timed-out operations
/// report a cancellation-class error only when nothing was written.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns the live value for `key`.
    ///
    /// `consistent` reads go to the shard's master; other reads go to a
    /// replica and may lag behind recent writes.
    async fn get(&self, key: &str, consistent: bool) -> Result<String>;

    /// Upserts `key` on its master and returns the new expiry.
    async fn put(&self, key: &str, value: &str) -> Result<DateTime<Utc>>;

    /// Logically deletes a live key. A second delete reports `NotFound`.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Physically removes expired rows from every master.
    async fn purge(&self) -> Result<PurgeReport>;
}

// == Expiry Policy ==
/// TTL for writes and period of the reclaim sweep. Both are positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiryPolicy {
    expiry_time: Duration,
    purge_interval: Duration,
}

impl ExpiryPolicy {
    pub fn new(expiry_time: Duration, purge_interval: Duration) -> Result<Self> {
        if expiry_time.is_zero() {
            return Err(StoreError::Config("expiry time must be positive".to_string()));
        }
        if purge_interval.is_zero() {
            return Err(StoreError::Config("purge interval must be positive".to_string()));
        }
        Ok(Self {
            expiry_time,
            purge_interval,
        })
    }

    pub fn expiry_time(&self) -> Duration {
        self.expiry_time
    }

    pub fn purge_interval(&self) -> Duration {
        self.purge_interval
    }
}

impl Default for ExpiryPolicy {
    fn default() -> Self {
        Self {
            expiry_time: DEFAULT_EXPIRY_TIME,
            purge_interval: DEFAULT_PURGE_INTERVAL,
        }
    }
}

// == Purge Report ==
/// Outcome of one sweep over every master.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PurgeReport {
    /// Rows removed across all shards
    pub removed: u64,
    /// Master indices whose sweep failed
    pub failed_shards: Vec<usize>,
}

impl PurgeReport {
    /// True when every shard was swept.
    pub fn is_complete(&self) -> bool {
        self.failed_shards.is_empty()
    }
}

// == Store Config ==
/// Everything needed to build a [`ShardedStore`].
#[derive(Debug)]
pub struct StoreConfig {
    /// Write handles, one per shard, in shard order
    pub masters: Vec<Arc<dyn Backend>>,
    /// Read-only handles keyed by master index
    pub replicas: HashMap<usize, Vec<Arc<dyn Backend>>>,
    /// TTL and purge cadence
    pub policy: ExpiryPolicy,
    /// Deadline for each backing-store round trip
    pub op_timeout: Option<Duration>,
    /// Source of "now" for expiry decisions
    pub clock: Arc<dyn Clock>,
}

impl StoreConfig {
    /// Masters only, default policy, system clock, no timeout.
    pub fn new(masters: Vec<Arc<dyn Backend>>) -> Self {
        Self {
            masters,
            replicas: HashMap::new(),
            policy: ExpiryPolicy::default(),
            op_timeout: None,
            clock: Arc::new(SystemClock),
        }
    }

    /// Appends a replica to the pool of `master_index`.
    pub fn with_replica(mut self, master_index: usize, replica: Arc<dyn Backend>) -> Self {
        self.replicas.entry(master_index).or_default().push(replica);
        self
    }

    pub fn with_policy(mut self, policy: ExpiryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_op_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.op_timeout = timeout;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_rejects_zero() {
        assert!(ExpiryPolicy::new(Duration::ZERO, Duration::from_secs(1)).is_err());
        assert!(ExpiryPolicy::new(Duration::from_secs(1), Duration::ZERO).is_err());
        let policy = ExpiryPolicy::new(Duration::from_secs(1), Duration::from_secs(2)).unwrap();
        assert_eq!(policy.expiry_time(), Duration::from_secs(1));
        assert_eq!(policy.purge_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_policy_defaults() {
        let policy = ExpiryPolicy::default();
        assert_eq!(policy.expiry_time(), Duration::from_secs(60));
        assert_eq!(policy.purge_interval(), Duration::from_secs(600));
    }
}
