//! Store Statistics Module
//!
//! Tracks read routing, hit/miss and reclamation counters. Counters are
//! atomics so concurrent callers never contend on a lock.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::Serialize;

use crate::shard::ReadTarget;

// == Store Stats ==
/// Live counters shared by every operation.
#[derive(Debug, Default)]
pub struct StoreStats {
    hits: AtomicU64,
    misses: AtomicU64,
    master_reads: AtomicU64,
    replica_reads: AtomicU64,
    fallback_reads: AtomicU64,
    writes: AtomicU64,
    deletes: AtomicU64,
    purged: AtomicU64,
    reclaim_failures: AtomicU64,
}

/// Point-in-time copy of [`StoreStats`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    /// Reads that found a live value
    pub hits: u64,
    /// Reads that found nothing live
    pub misses: u64,
    /// Consistent reads sent to a master
    pub master_reads: u64,
    /// Reads sent to a replica
    pub replica_reads: u64,
    /// Inconsistent reads served by a master with no replicas
    pub fallback_reads: u64,
    /// Successful upserts
    pub writes: u64,
    /// Successful logical deletes
    pub deletes: u64,
    /// Rows physically removed by purges
    pub purged: u64,
    /// Per-shard purge failures
    pub reclaim_failures: u64,
}

impl StatsSnapshot {
    // == Hit Rate ==
    /// Returns hits / (hits + misses), or 0.0 if no reads have completed.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

impl StoreStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts which kind of handle a read was routed to.
    pub fn record_read(&self, target: ReadTarget) {
        let counter = match target {
            ReadTarget::Master => &self.master_reads,
            ReadTarget::Replica(_) => &self.replica_reads,
            ReadTarget::MasterFallback => &self.fallback_reads,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_delete(&self) {
        self.deletes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_purged(&self, rows: u64) {
        self.purged.fetch_add(rows, Ordering::Relaxed);
    }

    pub fn record_reclaim_failure(&self) {
        self.reclaim_failures.fetch_add(1, Ordering::Relaxed);
    }

    // == Snapshot ==
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            master_reads: self.master_reads.load(Ordering::Relaxed),
            replica_reads: self.replica_reads.load(Ordering::Relaxed),
            fallback_reads: self.fallback_reads.load(Ordering::Relaxed),
            writes: self.writes.load(Ordering::Relaxed),
            deletes: self.deletes.load(Ordering::Relaxed),
            purged: self.purged.load(Ordering::Relaxed),
            reclaim_failures: self.reclaim_failures.load(Ordering::Relaxed),
        }
    }
}
