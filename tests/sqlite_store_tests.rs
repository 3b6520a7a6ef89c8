//! Integration Tests for the store over SQLite shards
//!
//! Exercises real databases on disk with wall-clock expiry.

use std::sync::Arc;
use std::time::Duration;

use shardkv::{
    backend::{Backend, SqliteBackend},
    store::ExpiryPolicy,
    KvStore, ShardedStore, StoreConfig, StoreError,
};

struct Shards {
    _dir: tempfile::TempDir,
    masters: Vec<SqliteBackend>,
    replicas: Vec<SqliteBackend>,
}

fn open_shards(count: usize) -> Shards {
    let dir = tempfile::tempdir().unwrap();
    let masters: Vec<SqliteBackend> = (0..count)
        .map(|i| SqliteBackend::open(dir.path().join(format!("shard-{}.db", i))).unwrap())
        .collect();
    let replicas = (0..count)
        .map(|i| SqliteBackend::open_read_only(dir.path().join(format!("shard-{}.db", i))).unwrap())
        .collect();
    Shards {
        _dir: dir,
        masters,
        replicas,
    }
}

async fn open_store(shards: &Shards, expiry: Duration) -> ShardedStore {
    let masters: Vec<Arc<dyn Backend>> = shards
        .masters
        .iter()
        .map(|m| Arc::new(m.clone()) as Arc<dyn Backend>)
        .collect();
    let mut config = StoreConfig::new(masters)
        .with_policy(ExpiryPolicy::new(expiry, Duration::from_secs(3600)).unwrap());
    for (i, replica) in shards.replicas.iter().enumerate() {
        config = config.with_replica(i, Arc::new(replica.clone()));
    }
    ShardedStore::open(config).await.unwrap()
}

async fn total_rows(shards: &Shards) -> u64 {
    let mut total = 0;
    for master in &shards.masters {
        total += master.row_count().await.unwrap();
    }
    total
}

#[tokio::test]
async fn test_put_get_delete_round_trip() {
    let shards = open_shards(2);
    let store = open_store(&shards, Duration::from_secs(60)).await;

    store.put("alpha", "1").await.unwrap();
    store.put("beta", "2").await.unwrap();

    assert_eq!(store.get("alpha", true).await.unwrap(), "1");
    assert_eq!(store.get("beta", false).await.unwrap(), "2");

    store.delete("alpha").await.unwrap();
    assert!(matches!(store.get("alpha", true).await, Err(StoreError::NotFound(_))));
    assert!(matches!(store.get("alpha", false).await, Err(StoreError::NotFound(_))));
    assert!(matches!(store.delete("alpha").await, Err(StoreError::NotFound(_))));

    store.shutdown().await;
}

#[tokio::test]
async fn test_ttl_expiry_and_purge() {
    let shards = open_shards(2);
    let store = open_store(&shards, Duration::from_secs(1)).await;

    store.put("x", "short-lived").await.unwrap();
    assert_eq!(store.get("x", true).await.unwrap(), "short-lived");

    tokio::time::sleep(Duration::from_millis(1500)).await;

    // Row is still physically present but no longer readable
    assert!(matches!(store.get("x", true).await, Err(StoreError::NotFound(_))));
    assert_eq!(total_rows(&shards).await, 1);

    let report = store.purge().await.unwrap();
    assert_eq!(report.removed, 1);
    assert!(report.is_complete());
    assert_eq!(total_rows(&shards).await, 0);

    store.shutdown().await;
}

#[tokio::test]
async fn test_put_overwrites_value() {
    let shards = open_shards(1);
    let store = open_store(&shards, Duration::from_secs(60)).await;

    store.put("k", "old").await.unwrap();
    store.put("k", "new").await.unwrap();

    assert_eq!(store.get("k", true).await.unwrap(), "new");
    assert_eq!(total_rows(&shards).await, 1);

    store.shutdown().await;
}

#[tokio::test]
async fn test_read_only_open_requires_existing_database() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("absent.db");
    assert!(SqliteBackend::open_read_only(&missing).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writes_survive_running_purge() {
    let shards = open_shards(3);

    // Rows left behind by a short-lived writer, expired by the time the
    // main store starts sweeping
    let short_lived = open_store(&shards, Duration::from_secs(1)).await;
    for i in 0..30 {
        short_lived.put(&format!("stale{}", i), "old").await.unwrap();
    }
    short_lived.shutdown().await;
    tokio::time::sleep(Duration::from_millis(1100)).await;

    let store = Arc::new(open_store(&shards, Duration::from_secs(60)).await);
    let mut handles = vec![];
    for i in 0..50 {
        let store = Arc::clone(&store);
        handles.push(tokio::spawn(async move {
            let key = format!("live{}", i);
            let value = format!("value{}", i);
            store.put(&key, &value).await.unwrap();
            assert_eq!(store.get(&key, true).await.unwrap(), value);
        }));
    }
    let purger = {
        let store = Arc::clone(&store);
        tokio::spawn(async move {
            let mut removed = 0;
            for _ in 0..5 {
                let report = store.purge().await.unwrap();
                assert!(report.is_complete());
                removed += report.removed;
            }
            removed
        })
    };

    for handle in handles {
        handle.await.unwrap();
    }
    let removed = purger.await.unwrap();
    assert_eq!(removed, 30);

    for i in 0..50 {
        let key = format!("live{}", i);
        assert_eq!(store.get(&key, true).await.unwrap(), format!("value{}", i));
    }
    assert_eq!(total_rows(&shards).await, 50);

    store.shutdown().await;
}
