//! shardkv - A sharded, replicated key-value store
//!
//! Routes keys to master shards by checksum, splits reads between masters
//! and replicas, and expires records on a TTL with background reclamation.

pub mod api;
pub mod backend;
pub mod config;
pub mod error;
pub mod models;
pub mod shard;
pub mod store;
pub mod tasks;

pub use api::AppState;
pub use config::Config;
pub use error::{BackendError, StoreError};
pub use store::{KvStore, ShardedStore, StoreConfig};
