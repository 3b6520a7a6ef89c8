//! Response DTOs for the HTTP adapter
//!
//! Defines the structure of outgoing HTTP response bodies.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::store::{PurgeReport, StatsSnapshot};

/// Response body for the GET operation (GET /get/:key)
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    /// The requested key
    pub key: String,
    /// The stored value
    pub value: String,
}

impl GetResponse {
    /// Creates a new GetResponse
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Response body for the PUT operation (PUT /put)
#[derive(Debug, Clone, Serialize)]
pub struct PutResponse {
    /// Success message
    pub message: String,
    /// The key that was written
    pub key: String,
    /// When the value stops being readable
    pub expiry: DateTime<Utc>,
}

impl PutResponse {
    /// Creates a new PutResponse
    pub fn new(key: impl Into<String>, expiry: DateTime<Utc>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' upserted successfully", key),
            key,
            expiry,
        }
    }
}

/// Response body for the DELETE operation (DELETE /delete/:key)
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    /// The key that was marked expired
    pub key: String,
}

impl DeleteResponse {
    /// Creates a new DeleteResponse
    pub fn new(key: impl Into<String>) -> Self {
        let key = key.into();
        Self {
            message: format!("Key '{}' marked as expired", key),
            key,
        }
    }
}

/// Response body for a manual sweep (POST /purge)
#[derive(Debug, Clone, Serialize)]
pub struct PurgeResponse {
    /// Rows physically removed
    pub removed: u64,
    /// Master indices that could not be swept
    pub failed_shards: Vec<usize>,
}

impl From<PurgeReport> for PurgeResponse {
    fn from(report: PurgeReport) -> Self {
        Self {
            removed: report.removed,
            failed_shards: report.failed_shards,
        }
    }
}

/// Response body for the stats endpoint (GET /stats)
#[derive(Debug, Clone, Serialize)]
pub struct StatsResponse {
    /// Raw engine counters
    #[serde(flatten)]
    pub counters: StatsSnapshot,
    /// Hit rate (hits / (hits + misses))
    pub hit_rate: f64,
    /// Number of master shards
    pub shards: usize,
}

impl StatsResponse {
    /// Creates a new StatsResponse from engine counters
    pub fn new(counters: StatsSnapshot, shards: usize) -> Self {
        Self {
            hit_rate: counters.hit_rate(),
            counters,
            shards,
        }
    }
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Health status (e.g., "healthy")
    pub status: String,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
    /// Number of master shards
    pub shards: usize,
}

impl HealthResponse {
    /// Creates a new HealthResponse with current timestamp
    pub fn healthy(shards: usize) -> Self {
        Self {
            status: "healthy".to_string(),
            timestamp: chrono::Utc::now().to_rfc3339(),
            shards,
        }
    }
}
