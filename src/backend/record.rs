//! Record Module
//!
//! Defines the stored row shape and its liveness rule.

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use std::time::Duration;

/// Expiry written by a logical delete; earlier than any clock reading.
pub const EXPIRED_SENTINEL: DateTime<Utc> = DateTime::<Utc>::MIN_UTC;

// == Record ==
/// A single key-value row with its absolute expiry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Record {
    /// Unique key within the keyspace
    pub key: String,
    /// The stored value
    pub value: String,
    /// Instant after which the row is logically deleted
    pub expiry: DateTime<Utc>,
}

impl Record {
    // == Constructor ==
    /// Creates a record that expires `ttl` after `now`.
    pub fn new(key: impl Into<String>, value: impl Into<String>, now: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            expiry: expiry_after(now, ttl),
        }
    }

    // == Is Live ==
    /// A row is live while its expiry is strictly in the future.
    ///
    /// The boundary instant `expiry == now` already counts as expired, so a
    /// purge at that instant may remove it.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expiry > now
    }
}

/// Adds a TTL to `now`, saturating at the maximum representable instant.
pub fn expiry_after(now: DateTime<Utc>, ttl: Duration) -> DateTime<Utc> {
    ChronoDuration::from_std(ttl)
        .ok()
        .and_then(|ttl| now.checked_add_signed(ttl))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
