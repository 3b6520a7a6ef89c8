//! Sharded Store Module
//!
//! Composes the topology, the expiry policy and the reclaimer into the
//! concrete key-value engine.

use std::future::{self, Future};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{Clock, ExpiryPolicy, KvStore, PurgeReport, StatsSnapshot, StoreConfig, StoreStats};
use crate::backend::{BackendResult, Record};
use crate::error::{Result, StoreError};
use crate::shard::Topology;
use crate::tasks::Reclaimer;

/// State shared by callers and the reclaimer. Immutable apart from the
/// atomic counters.
#[derive(Debug)]
pub(crate) struct StoreCore {
    topology: Topology,
    policy: ExpiryPolicy,
    clock: Arc<dyn Clock>,
    stats: StoreStats,
    op_timeout: Option<Duration>,
    shutdown: CancellationToken,
}

impl StoreCore {
    /// Runs one backend call under store shutdown, the caller's `scope` and
    /// the per-op deadline.
    ///
    /// When any of them fires the call's abort token is cancelled and the
    /// call is awaited until it settles. A call that took effect anyway keeps
    /// its result; one that was interrupted reports `Cancelled` or `Timeout`.
    async fn guarded<T, F, Fut>(&self, scope: Option<&CancellationToken>, call: F) -> Result<T>
    where
        F: FnOnce(CancellationToken) -> Fut,
        Fut: Future<Output = BackendResult<T>>,
    {
        if self.shutdown.is_cancelled() || scope.is_some_and(CancellationToken::is_cancelled) {
            return Err(StoreError::Cancelled);
        }

        let abort = CancellationToken::new();
        // Dropping this future abandons the call too
        let _abort_on_drop = abort.clone().drop_guard();
        let call = call(abort.clone());
        tokio::pin!(call);

        let deadline = async {
            match self.op_timeout {
                Some(limit) => {
                    tokio::time::sleep(limit).await;
                    StoreError::Timeout(limit)
                }
                None => future::pending().await,
            }
        };
        let caller = async {
            match scope {
                Some(token) => token.cancelled().await,
                None => future::pending().await,
            }
        };

        let reason = tokio::select! {
            biased;
            result = &mut call => return result.map_err(StoreError::from),
            _ = self.shutdown.cancelled() => StoreError::Cancelled,
            _ = caller => StoreError::Cancelled,
            timeout = deadline => timeout,
        };

        abort.cancel();
        match call.await {
            Ok(value) => {
                debug!("Backend call completed before abort ({})", reason);
                Ok(value)
            }
            Err(e) if e.is_interrupted() => Err(reason),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes expired rows on every master, continuing past failures.
    ///
    /// Stops with `Cancelled` if the store or the caller cancels mid-sweep;
    /// rows already removed stay removed and are counted.
    pub(crate) async fn purge_expired(&self, scope: Option<&CancellationToken>) -> Result<PurgeReport> {
        let mut report = PurgeReport::default();

        for (index, master) in self.topology.masters().iter().enumerate() {
            let now = self.clock.now();
            match self
                .guarded(scope, |abort| async move { master.delete_expired(now, &abort).await })
                .await
            {
                Ok(removed) => {
                    debug!("Purged {} expired entries from master {}", removed, index);
                    report.removed += removed;
                }
                Err(StoreError::Cancelled) => {
                    debug!("Purge cancelled at master {}", index);
                    self.stats.record_purged(report.removed);
                    return Err(StoreError::Cancelled);
                }
                Err(e) => {
                    warn!("Error purging expired entries from master {}: {}", index, e);
                    self.stats.record_reclaim_failure();
                    report.failed_shards.push(index);
                }
            }
        }

        self.stats.record_purged(report.removed);
        Ok(report)
    }

    pub(crate) fn purge_interval(&self) -> Duration {
        self.policy.purge_interval()
    }

    pub(crate) fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    async fn get(&self, key: &str, consistent: bool, scope: Option<&CancellationToken>) -> Result<String> {
        let index = self.topology.shard_of(key);
        let (target, handle) = self.topology.read_handle(index, consistent);
        self.stats.record_read(target);

        let now = self.clock.now();
        let fetched = self
            .guarded(scope, |abort| async move { handle.fetch_live(key, now, &abort).await })
            .await;
        match fetched {
            Ok(Some(record)) => {
                self.stats.record_hit();
                Ok(record.value)
            }
            Ok(None) => {
                self.stats.record_miss();
                debug!("Key not found or expired: {}", key);
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => {
                warn!("Error reading key {} from shard {} ({}): {}", key, index, target, e);
                Err(e)
            }
        }
    }

    async fn put(&self, key: &str, value: &str, scope: Option<&CancellationToken>) -> Result<DateTime<Utc>> {
        let index = self.topology.shard_of(key);
        debug!("Writing at master index {}", index);

        let mut record = Record::new(key, value, self.clock.now(), self.policy.expiry_time());
        // Rows keep millisecond precision
        record.expiry = record.expiry.trunc_subsecs(3);
        let master = self.topology.master(index);
        self.guarded(scope, |abort| async move {
            master.upsert(&record, &abort).await.map(|_| record)
        })
        .await
        .map(|record| {
            self.stats.record_write();
            record.expiry
        })
        .map_err(|e| {
            warn!("Error upserting key {} on master {}: {}", key, index, e);
            e
        })
    }

    async fn delete(&self, key: &str, scope: Option<&CancellationToken>) -> Result<()> {
        let index = self.topology.shard_of(key);
        let now = self.clock.now();
        let master = self.topology.master(index);

        let changed = self
            .guarded(scope, |abort| async move { master.expire(key, now, &abort).await })
            .await
            .map_err(|e| {
                warn!("Error deleting key {} on master {}: {}", key, index, e);
                e
            })?;

        if changed == 0 {
            debug!("Key not found or already expired: {}", key);
            return Err(StoreError::NotFound(key.to_string()));
        }

        self.stats.record_delete();
        Ok(())
    }
}

/// The sharded, replicated key-value engine.
///
/// Shared by reference between concurrent callers; the background reclaimer
/// runs until [`ShardedStore::shutdown`] or drop.
#[derive(Debug)]
pub struct ShardedStore {
    core: Arc<StoreCore>,
    reclaimer: Reclaimer,
}

impl ShardedStore {
    // == Constructor ==
    /// Validates the topology, pings every handle and starts the reclaimer.
    ///
    /// Fails if any master or replica cannot be reached.
    pub async fn open(config: StoreConfig) -> Result<Self> {
        let StoreConfig {
            masters,
            replicas,
            policy,
            op_timeout,
            clock,
        } = config;

        let topology = Topology::new(masters, replicas)?;
        let shutdown = CancellationToken::new();

        for (index, master) in topology.masters().iter().enumerate() {
            master.ping(&shutdown).await.map_err(|e| {
                error!("Failed to connect to master {}: {}", index, e);
                StoreError::from(e)
            })?;
        }
        for (index, replica) in topology.replicas().iter() {
            replica.ping(&shutdown).await.map_err(|e| {
                error!("Failed to connect to replica for master {}: {}", index, e);
                StoreError::from(e)
            })?;
        }

        info!(
            "Store opened: shards={}, replicas={}, expiry_time={:?}, purge_interval={:?}",
            topology.shard_count(),
            topology.replicas().iter().count(),
            policy.expiry_time(),
            policy.purge_interval()
        );

        let core = Arc::new(StoreCore {
            topology,
            policy,
            clock,
            stats: StoreStats::new(),
            op_timeout,
            shutdown,
        });
        let reclaimer = Reclaimer::spawn(Arc::clone(&core));

        Ok(Self { core, reclaimer })
    }

    /// Number of master shards.
    pub fn shard_count(&self) -> usize {
        self.core.topology.shard_count()
    }

    /// Shard index owning `key`.
    pub fn shard_of(&self, key: &str) -> usize {
        self.core.topology.shard_of(key)
    }

    /// The expiry policy in force.
    pub fn policy(&self) -> ExpiryPolicy {
        self.core.policy
    }

    /// Current counters.
    pub fn stats(&self) -> StatsSnapshot {
        self.core.stats.snapshot()
    }

    /// A view of the store whose operations also stop when `token` fires.
    ///
    /// Cancelled operations report `StoreError::Cancelled` and leave the
    /// backing stores untouched.
    pub fn with_cancellation(&self, token: CancellationToken) -> ScopedStore<'_> {
        ScopedStore { store: self, token }
    }

    /// Stops the reclaimer and cancels in-flight operations.
    ///
    /// Operations issued afterwards report `Cancelled`.
    pub async fn shutdown(&self) {
        self.core.shutdown.cancel();
        self.reclaimer.join().await;
        info!("Store shut down");
    }
}

#[async_trait]
impl KvStore for ShardedStore {
    async fn get(&self, key: &str, consistent: bool) -> Result<String> {
        self.core.get(key, consistent, None).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<DateTime<Utc>> {
        self.core.put(key, value, None).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.core.delete(key, None).await
    }

    async fn purge(&self) -> Result<PurgeReport> {
        self.core.purge_expired(None).await
    }
}

/// Store operations bound to a caller's cancellation token.
#[derive(Debug)]
pub struct ScopedStore<'a> {
    store: &'a ShardedStore,
    token: CancellationToken,
}

#[async_trait]
impl KvStore for ScopedStore<'_> {
    async fn get(&self, key: &str, consistent: bool) -> Result<String> {
        self.store.core.get(key, consistent, Some(&self.token)).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<DateTime<Utc>> {
        self.store.core.put(key, value, Some(&self.token)).await
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.store.core.delete(key, Some(&self.token)).await
    }

    async fn purge(&self) -> Result<PurgeReport> {
        self.store.core.purge_expired(Some(&self.token)).await
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{Backend, MemoryBackend, EXPIRED_SENTINEL};
    use crate::error::BackendError;
    use crate::store::ManualClock;

    const TTL: Duration = Duration::from_secs(60);

    struct Fixture {
        store: ShardedStore,
        masters: Vec<MemoryBackend>,
        clock: Arc<ManualClock>,
    }

    async fn fixture(shards: usize, replicated: bool) -> Fixture {
        let masters: Vec<MemoryBackend> = (0..shards)
            .map(|i| MemoryBackend::new(format!("master-{}", i)))
            .collect();
        let clock = Arc::new(ManualClock::default());

        let mut config = StoreConfig::new(
            masters
                .iter()
                .map(|m| Arc::new(m.clone()) as Arc<dyn Backend>)
                .collect(),
        )
        .with_policy(ExpiryPolicy::new(TTL, Duration::from_secs(3600)).unwrap())
        .with_clock(clock.clone());

        if replicated {
            for (i, master) in masters.iter().enumerate() {
                config = config.with_replica(i, Arc::new(master.replica(format!("replica-{}", i))));
            }
        }

        let store = ShardedStore::open(config).await.unwrap();
        Fixture {
            store,
            masters,
            clock,
        }
    }

    #[tokio::test]
    async fn test_put_then_consistent_get() {
        let f = fixture(2, true).await;

        f.store.put("a", "1").await.unwrap();
        assert_eq!(f.store.get("a", true).await.unwrap(), "1");
        assert_eq!(f.store.get("a", false).await.unwrap(), "1");
    }

    #[tokio::test]
    async fn test_put_targets_owning_master_only() {
        let f = fixture(2, false).await;

        f.store.put("user:1", "alice").await.unwrap();
        let owner = f.store.shard_of("user:1");
        assert!(f.masters[owner].raw_get("user:1").await.is_some());
        assert!(f.masters[1 - owner].raw_get("user:1").await.is_none());
    }

    #[tokio::test]
    async fn test_put_sets_expiry_from_now() {
        let f = fixture(1, false).await;

        let expiry = f.store.put("k", "v").await.unwrap();
        let expected = (f.clock.now() + chrono::Duration::seconds(60)).trunc_subsecs(3);
        assert_eq!(expiry, expected);
        assert_eq!(expiry.timestamp_subsec_nanos() % 1_000_000, 0);
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let f = fixture(2, true).await;

        let result = f.store.get("nope", true).await;
        assert!(matches!(result, Err(StoreError::NotFound(key)) if key == "nope"));
    }

    #[tokio::test]
    async fn test_delete_twice_reports_not_found() {
        let f = fixture(2, true).await;

        f.store.put("k", "v").await.unwrap();
        f.store.delete("k").await.unwrap();

        assert!(matches!(f.store.delete("k").await, Err(StoreError::NotFound(_))));
        assert!(matches!(f.store.get("k", true).await, Err(StoreError::NotFound(_))));

        let owner = f.store.shard_of("k");
        let row = f.masters[owner].raw_get("k").await.unwrap();
        assert_eq!(row.expiry, EXPIRED_SENTINEL);
    }

    #[tokio::test]
    async fn test_expired_key_hidden_before_purge() {
        let f = fixture(2, true).await;

        f.store.put("k", "v").await.unwrap();
        f.clock.advance(TTL);

        assert!(matches!(f.store.get("k", true).await, Err(StoreError::NotFound(_))));
        assert!(matches!(f.store.get("k", false).await, Err(StoreError::NotFound(_))));
        assert!(matches!(f.store.delete("k").await, Err(StoreError::NotFound(_))));

        let owner = f.store.shard_of("k");
        assert_eq!(f.masters[owner].raw_len().await, 1);
    }

    #[tokio::test]
    async fn test_put_revives_expired_key() {
        let f = fixture(1, false).await;

        f.store.put("k", "old").await.unwrap();
        f.clock.advance(TTL * 2);
        f.store.put("k", "new").await.unwrap();

        assert_eq!(f.store.get("k", true).await.unwrap(), "new");
        assert_eq!(f.masters[0].raw_len().await, 1);
    }

    #[tokio::test]
    async fn test_purge_removes_only_expired_rows() {
        let f = fixture(2, false).await;

        for i in 0..20 {
            f.store.put(&format!("old_{}", i), "v").await.unwrap();
        }
        f.clock.advance(TTL);
        for i in 0..5 {
            f.store.put(&format!("new_{}", i), "v").await.unwrap();
        }
        f.store.put("gone", "v").await.unwrap();
        f.store.delete("gone").await.unwrap();

        let report = f.store.purge().await.unwrap();
        assert_eq!(report.removed, 21);
        assert!(report.is_complete());

        for i in 0..5 {
            assert_eq!(f.store.get(&format!("new_{}", i), true).await.unwrap(), "v");
        }
        let rows: usize = total_rows(&f.masters).await;
        assert_eq!(rows, 5);
        assert_eq!(f.store.stats().purged, 21);
    }

    async fn total_rows(masters: &[MemoryBackend]) -> usize {
        let mut total = 0;
        for master in masters {
            total += master.raw_len().await;
        }
        total
    }

    #[tokio::test]
    async fn test_purge_continues_past_failed_shard() {
        let f = fixture(2, false).await;

        f.masters[0]
            .upsert(&Record::new("a", "v", f.clock.now(), TTL), &CancellationToken::new())
            .await
            .unwrap();
        f.masters[1]
            .upsert(&Record::new("b", "v", f.clock.now(), TTL), &CancellationToken::new())
            .await
            .unwrap();
        f.clock.advance(TTL);
        f.masters[0].set_available(false);

        let report = f.store.purge().await.unwrap();
        assert_eq!(report.failed_shards, vec![0]);
        assert_eq!(report.removed, 1);
        assert_eq!(f.masters[1].raw_len().await, 0);
        assert_eq!(f.store.stats().reclaim_failures, 1);
    }

    #[tokio::test]
    async fn test_zero_replicas_fall_back_to_master() {
        let f = fixture(2, false).await;

        f.store.put("k", "v").await.unwrap();
        for _ in 0..5 {
            assert_eq!(f.store.get("k", false).await.unwrap(), "v");
        }

        let stats = f.store.stats();
        assert_eq!(stats.fallback_reads, 5);
        assert_eq!(stats.replica_reads, 0);
    }

    #[tokio::test]
    async fn test_lagging_replica_converges() {
        let master = MemoryBackend::new("master");
        let replica = MemoryBackend::new("replica");
        let config = StoreConfig::new(vec![Arc::new(master.clone())])
            .with_replica(0, Arc::new(replica.clone()));
        let store = ShardedStore::open(config).await.unwrap();

        store.put("a", "1").await.unwrap();
        assert_eq!(store.get("a", true).await.unwrap(), "1");
        assert!(matches!(store.get("a", false).await, Err(StoreError::NotFound(_))));

        replica.sync_from(&master).await;
        assert_eq!(store.get("a", false).await.unwrap(), "1");
    }

    #[tokio::test]
    async fn test_backend_failure_surfaces() {
        let f = fixture(1, false).await;
        f.masters[0].set_available(false);

        assert!(matches!(f.store.put("k", "v").await, Err(StoreError::Backend(_))));
        assert!(matches!(f.store.get("k", true).await, Err(StoreError::Backend(_))));
        assert!(matches!(f.store.delete("k").await, Err(StoreError::Backend(_))));
    }

    #[tokio::test]
    async fn test_failed_replica_is_not_retried() {
        let master = MemoryBackend::new("master");
        let replica = master.replica("replica");
        let config = StoreConfig::new(vec![Arc::new(master.clone())])
            .with_replica(0, Arc::new(replica.clone()));
        let store = ShardedStore::open(config).await.unwrap();

        store.put("k", "v").await.unwrap();
        replica.set_available(false);

        assert!(matches!(store.get("k", false).await, Err(StoreError::Backend(_))));
        assert_eq!(store.get("k", true).await.unwrap(), "v");
    }

    #[tokio::test]
    async fn test_open_fails_when_handle_unreachable() {
        let master = MemoryBackend::new("master");
        let replica = MemoryBackend::new("replica");
        replica.set_available(false);
        let config = StoreConfig::new(vec![Arc::new(master)]).with_replica(0, Arc::new(replica));

        assert!(matches!(ShardedStore::open(config).await, Err(StoreError::Backend(_))));
    }

    #[tokio::test]
    async fn test_operations_cancelled_after_shutdown() {
        let f = fixture(1, false).await;
        f.store.shutdown().await;

        assert!(matches!(f.store.put("k", "v").await, Err(StoreError::Cancelled)));
        assert!(matches!(f.store.get("k", true).await, Err(StoreError::Cancelled)));
        assert!(matches!(f.store.purge().await, Err(StoreError::Cancelled)));
    }

    /// Never answers until its call is aborted.
    #[derive(Debug)]
    struct StalledBackend;

    async fn stall<T>(abort: &CancellationToken) -> BackendResult<T> {
        abort.cancelled().await;
        Err(BackendError::Interrupted)
    }

    #[async_trait]
    impl Backend for StalledBackend {
        async fn ping(&self, _: &CancellationToken) -> BackendResult<()> {
            Ok(())
        }
        async fn fetch_live(
            &self,
            _: &str,
            _: DateTime<Utc>,
            abort: &CancellationToken,
        ) -> BackendResult<Option<Record>> {
            stall(abort).await
        }
        async fn upsert(&self, _: &Record, abort: &CancellationToken) -> BackendResult<u64> {
            stall(abort).await
        }
        async fn expire(&self, _: &str, _: DateTime<Utc>, abort: &CancellationToken) -> BackendResult<u64> {
            stall(abort).await
        }
        async fn delete_expired(&self, _: DateTime<Utc>, abort: &CancellationToken) -> BackendResult<u64> {
            stall(abort).await
        }
    }

    #[tokio::test]
    async fn test_stalled_backend_times_out() {
        let limit = Duration::from_millis(50);
        let config = StoreConfig::new(vec![Arc::new(StalledBackend)]).with_op_timeout(Some(limit));
        let store = ShardedStore::open(config).await.unwrap();

        assert!(matches!(store.get("k", true).await, Err(StoreError::Timeout(d)) if d == limit));
        assert!(matches!(store.put("k", "v").await, Err(StoreError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_caller_cancellation_aborts_stalled_call() {
        let store = ShardedStore::open(StoreConfig::new(vec![Arc::new(StalledBackend)]))
            .await
            .unwrap();
        let token = CancellationToken::new();

        let canceller = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel();
        });

        let result = store.with_cancellation(token.clone()).get("k", true).await;
        assert!(matches!(result, Err(StoreError::Cancelled)));

        // A fired token refuses new work without touching the backend
        let scoped = store.with_cancellation(token);
        assert!(matches!(scoped.put("k", "v").await, Err(StoreError::Cancelled)));
    }

    #[tokio::test]
    async fn test_scoped_store_runs_until_cancelled() {
        let f = fixture(2, true).await;
        let scoped = f.store.with_cancellation(CancellationToken::new());

        scoped.put("k", "v").await.unwrap();
        assert_eq!(scoped.get("k", true).await.unwrap(), "v");
        scoped.delete("k").await.unwrap();
        assert!(scoped.purge().await.unwrap().is_complete());
    }

    #[tokio::test]
    async fn test_shutdown_during_purge_is_not_a_failure() {
        let store = ShardedStore::open(StoreConfig::new(vec![
            Arc::new(StalledBackend) as Arc<dyn Backend>,
            Arc::new(StalledBackend),
        ]))
        .await
        .unwrap();

        let (purge, _) = tokio::join!(store.purge(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            store.shutdown().await;
        });

        assert!(matches!(purge, Err(StoreError::Cancelled)));
        assert_eq!(store.stats().reclaim_failures, 0);
    }

    #[tokio::test]
    async fn test_purge_timeout_counts_as_shard_failure() {
        let limit = Duration::from_millis(20);
        let store = ShardedStore::open(
            StoreConfig::new(vec![Arc::new(StalledBackend)]).with_op_timeout(Some(limit)),
        )
        .await
        .unwrap();

        let report = store.purge().await.unwrap();
        assert_eq!(report.failed_shards, vec![0]);
        assert_eq!(store.stats().reclaim_failures, 1);
    }
}
