//! In-memory, multi-node implementation of [`aerocache::KeyValueStore`].
//!
//! Each node keeps its records in a moka cache with per-record expiry and
//! answers the admin text protocol. Nodes can be taken down or hung to
//! exercise failure handling.

pub mod cluster;
pub mod moka_node;

pub use cluster::{ClusterOptions, MemoryCluster};
pub use moka_node::{MokaNode, NodeState, StoredRecord};
