//! Configuration Module
//!
//! Handles loading and managing server configuration from environment variables.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Result, StoreError};
use crate::store::{ExpiryPolicy, DEFAULT_EXPIRY_TIME, DEFAULT_PURGE_INTERVAL};

/// Deadline for one backing-store round trip unless configured otherwise
pub const DEFAULT_OP_TIMEOUT: Duration = Duration::from_secs(5);

/// Server configuration parameters.
///
/// All values can be configured via environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct Config {
    /// TTL applied to every write
    pub expiry_time: Duration,
    /// Interval between expiry reclaim sweeps
    pub purge_interval: Duration,
    /// Deadline for each backing-store call
    pub op_timeout: Duration,
    /// HTTP server port
    pub server_port: u16,
    /// One SQLite database per master shard, in shard order
    pub masters: Vec<PathBuf>,
    /// Read-only replica databases keyed by master index
    pub replicas: HashMap<usize, Vec<PathBuf>>,
}

impl Config {
    /// Creates a new Config by loading values from environment variables.
    ///
    /// Unset or unparsable values fall back to their defaults.
    ///
    /// # Environment Variables
    /// - `EXPIRY_TIME` - TTL for writes, e.g. `90s` (default: 60s)
    /// - `PURGE_INTERVAL` - Reclaim sweep period (default: 10m)
    /// - `OP_TIMEOUT` - Backing-store call deadline (default: 5s)
    /// - `SERVER_PORT` - HTTP server port (default: 8080)
    /// - `SHARD_MASTERS` - Comma-separated database paths (default: two shards under `data/`)
    /// - `SHARD_REPLICAS` - `index=path|path;index=path` (default: none)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            expiry_time: env_duration("EXPIRY_TIME").unwrap_or(defaults.expiry_time),
            purge_interval: env_duration("PURGE_INTERVAL").unwrap_or(defaults.purge_interval),
            op_timeout: env_duration("OP_TIMEOUT").unwrap_or(defaults.op_timeout),
            server_port: env::var("SERVER_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.server_port),
            masters: env::var("SHARD_MASTERS")
                .ok()
                .and_then(|v| parse_masters(&v))
                .unwrap_or(defaults.masters),
            replicas: env::var("SHARD_REPLICAS")
                .ok()
                .and_then(|v| parse_replicas(&v))
                .unwrap_or(defaults.replicas),
        }
    }

    /// The validated expiry policy.
    pub fn expiry_policy(&self) -> Result<ExpiryPolicy> {
        ExpiryPolicy::new(self.expiry_time, self.purge_interval)
    }

    /// Checks that every replica refers to a configured master.
    pub fn validate(&self) -> Result<()> {
        if self.masters.is_empty() {
            return Err(StoreError::Config("no master shards configured".to_string()));
        }
        if let Some(index) = self.replicas.keys().find(|&&i| i >= self.masters.len()) {
            return Err(StoreError::Config(format!(
                "replicas configured for master {} but only {} masters exist",
                index,
                self.masters.len()
            )));
        }
        self.expiry_policy().map(|_| ())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            expiry_time: DEFAULT_EXPIRY_TIME,
            purge_interval: DEFAULT_PURGE_INTERVAL,
            op_timeout: DEFAULT_OP_TIMEOUT,
            server_port: 8080,
            masters: vec![
                PathBuf::from("data/shard-0.db"),
                PathBuf::from("data/shard-1.db"),
            ],
            replicas: HashMap::new(),
        }
    }
}

fn env_duration(name: &str) -> Option<Duration> {
    env::var(name).ok().and_then(|v| parse_duration(&v))
}

/// Parses durations such as `300ms`, `90s`, `10m` or `1h30m`.
///
/// A bare integer is read as seconds. Zero and malformed input yield `None`.
pub fn parse_duration(input: &str) -> Option<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(secs) = input.parse::<u64>() {
        return (secs > 0).then(|| Duration::from_secs(secs));
    }

    let mut total = Duration::ZERO;
    let mut rest = input;
    while !rest.is_empty() {
        let digits = rest.find(|c: char| !c.is_ascii_digit())?;
        if digits == 0 {
            return None;
        }
        let amount: u64 = rest[..digits].parse().ok()?;
        rest = &rest[digits..];

        let unit_len = rest.find(|c: char| c.is_ascii_digit()).unwrap_or(rest.len());
        let part = match &rest[..unit_len] {
            "ms" => Duration::from_millis(amount),
            "s" => Duration::from_secs(amount),
            "m" => Duration::from_secs(amount.checked_mul(60)?),
            "h" => Duration::from_secs(amount.checked_mul(3600)?),
            _ => return None,
        };
        total = total.checked_add(part)?;
        rest = &rest[unit_len..];
    }

    (!total.is_zero()).then_some(total)
}

fn parse_masters(input: &str) -> Option<Vec<PathBuf>> {
    let paths: Vec<PathBuf> = input
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
        .collect();
    (!paths.is_empty()).then_some(paths)
}

fn parse_replicas(input: &str) -> Option<HashMap<usize, Vec<PathBuf>>> {
    let mut replicas: HashMap<usize, Vec<PathBuf>> = HashMap::new();
    for group in input.split(';').map(str::trim).filter(|g| !g.is_empty()) {
        let (index, paths) = group.split_once('=')?;
        let index: usize = index.trim().parse().ok()?;
        replicas.entry(index).or_default().extend(
            paths
                .split('|')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from),
        );
    }
    Some(replicas)
}
