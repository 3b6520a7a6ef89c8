//! Shard Module
//!
//! Key-to-shard routing, replica selection and the fixed topology they
//! operate on.

mod replica;
mod router;
mod topology;

pub use replica::ReplicaSelector;
pub use router::ShardRouter;
pub use topology::{ReadTarget, Topology};
