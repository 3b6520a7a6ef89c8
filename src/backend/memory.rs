//! In-memory backend.
//!
//! A `HashMap` behind a tokio `RwLock`, used as a test double for a shard
//! and for local runs without durable storage.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio_util::sync::CancellationToken;

use super::{Backend, BackendResult, Record, EXPIRED_SENTINEL};
use crate::error::BackendError;

/// In-memory backing store.
///
/// `Clone` shares the underlying rows, which is how [`MemoryBackend::replica`]
/// models a synchronously replicated read handle.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    rows: Arc<RwLock<HashMap<String, Record>>>,
    available: Arc<AtomicBool>,
    name: String,
}

impl MemoryBackend {
    /// Creates an empty, reachable backend.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            rows: Arc::default(),
            available: Arc::new(AtomicBool::new(true)),
            name: name.into(),
        }
    }

    /// A read handle over the same rows with its own availability switch.
    pub fn replica(&self, name: impl Into<String>) -> Self {
        Self {
            rows: Arc::clone(&self.rows),
            available: Arc::new(AtomicBool::new(true)),
            name: name.into(),
        }
    }

    /// Copies every row from `source`, standing in for asynchronous replication.
    pub async fn sync_from(&self, source: &MemoryBackend) {
        let snapshot = source.rows.read().await.clone();
        *self.rows.write().await = snapshot;
    }

    /// Simulates the handle going down or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    /// Raw row lookup, ignoring expiry.
    pub async fn raw_get(&self, key: &str) -> Option<Record> {
        self.rows.read().await.get(key).cloned()
    }

    /// Number of physical rows, expired ones included.
    pub async fn raw_len(&self) -> usize {
        self.rows.read().await.len()
    }

    fn check_available(&self) -> BackendResult<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(BackendError::Unavailable(self.name.clone()))
        }
    }

    async fn read_rows(
        &self,
        abort: &CancellationToken,
    ) -> BackendResult<RwLockReadGuard<'_, HashMap<String, Record>>> {
        self.check_available()?;
        tokio::select! {
            biased;
            _ = abort.cancelled() => Err(BackendError::Interrupted),
            rows = self.rows.read() => Ok(rows),
        }
    }

    /// Mutations happen under the guard in one step, so an abort either
    /// wins before the lock is taken or not at all.
    async fn write_rows(
        &self,
        abort: &CancellationToken,
    ) -> BackendResult<RwLockWriteGuard<'_, HashMap<String, Record>>> {
        self.check_available()?;
        tokio::select! {
            biased;
            _ = abort.cancelled() => Err(BackendError::Interrupted),
            rows = self.rows.write() => Ok(rows),
        }
    }
}

#[async_trait]
impl Backend for MemoryBackend {
    async fn ping(&self, abort: &CancellationToken) -> BackendResult<()> {
        self.check_available()?;
        if abort.is_cancelled() {
            return Err(BackendError::Interrupted);
        }
        Ok(())
    }

    async fn fetch_live(
        &self,
        key: &str,
        now: DateTime<Utc>,
        abort: &CancellationToken,
    ) -> BackendResult<Option<Record>> {
        let rows = self.read_rows(abort).await?;
        Ok(rows.get(key).filter(|r| r.is_live(now)).cloned())
    }

    async fn upsert(&self, record: &Record, abort: &CancellationToken) -> BackendResult<u64> {
        self.write_rows(abort)
            .await?
            .insert(record.key.clone(), record.clone());
        Ok(1)
    }

    async fn expire(
        &self,
        key: &str,
        now: DateTime<Utc>,
        abort: &CancellationToken,
    ) -> BackendResult<u64> {
        let mut rows = self.write_rows(abort).await?;
        match rows.get_mut(key) {
            Some(record) if record.is_live(now) => {
                record.expiry = EXPIRED_SENTINEL;
                Ok(1)
            }
            _ => Ok(0),
        }
    }

    async fn delete_expired(
        &self,
        now: DateTime<Utc>,
        abort: &CancellationToken,
    ) -> BackendResult<u64> {
        let mut rows = self.write_rows(abort).await?;
        let before = rows.len();
        rows.retain(|_, record| record.is_live(now));
        Ok((before - rows.len()) as u64)
    }
}
