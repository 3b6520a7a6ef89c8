//! Key routing logic for sharding
//!
//! Routes keys to master shards with an IEEE CRC-32 checksum reduced modulo
//! the shard count. Changing the shard count remaps most keys, and no
//! migration path exists for that; the count is fixed for the process.

/// Routes keys to master shard indices.
#[derive(Debug, Clone, Copy)]
pub struct ShardRouter {
    num_shards: usize,
}

impl ShardRouter {
    /// Create a new shard router. Returns `None` for zero shards.
    pub fn new(num_shards: usize) -> Option<Self> {
        (num_shards > 0).then_some(ShardRouter { num_shards })
    }

    /// Route a key to a shard index in `[0, num_shards)`.
    ///
    /// Any string is accepted, including the empty one.
    pub fn shard_of(&self, key: &str) -> usize {
        let hash = crc32fast::hash(key.as_bytes());
        (hash % self.num_shards as u32) as usize
    }

    /// Get the number of shards
    pub fn num_shards(&self) -> usize {
        self.num_shards
    }
}
