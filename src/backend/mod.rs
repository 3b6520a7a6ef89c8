//! Backend Module
//!
//! The capability surface the store needs from one backing-store handle,
//! plus the two implementations shipped with the crate.

mod memory;
mod record;
mod sqlite;

use std::fmt::Debug;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::BackendError;

pub use memory::MemoryBackend;
pub use record::{expiry_after, Record, EXPIRED_SENTINEL};
pub use sqlite::SqliteBackend;

/// Result type for backend calls.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// One durable, queryable connection (master or replica).
///
/// Handles are shared between every caller and the reclaimer, so
/// implementations must be safe for concurrent use.
///
/// Every call takes an `abort` token. Once it fires the call must settle
/// promptly: either with [`BackendError::Interrupted`], meaning nothing was
/// written, or with its normal result if it had already taken effect.
#[async_trait]
pub trait Backend: Debug + Send + Sync + 'static {
    /// Connectivity check run once at startup.
    async fn ping(&self, abort: &CancellationToken) -> BackendResult<()>;

    /// Returns the row for `key` if its expiry is after `now`.
    async fn fetch_live(
        &self,
        key: &str,
        now: DateTime<Utc>,
        abort: &CancellationToken,
    ) -> BackendResult<Option<Record>>;

    /// Inserts the record or replaces value and expiry of an existing key.
    async fn upsert(&self, record: &Record, abort: &CancellationToken) -> BackendResult<u64>;

    /// Moves the expiry of a live `key` to [`EXPIRED_SENTINEL`].
    ///
    /// Returns the number of rows changed; zero means absent or already expired.
    async fn expire(
        &self,
        key: &str,
        now: DateTime<Utc>,
        abort: &CancellationToken,
    ) -> BackendResult<u64>;

    /// Physically removes every row with `expiry <= now`.
    async fn delete_expired(
        &self,
        now: DateTime<Utc>,
        abort: &CancellationToken,
    ) -> BackendResult<u64>;
}
