#![deny(clippy::all)]

pub mod domain;
pub mod key;
pub mod planes;
pub mod ports;
pub mod source;

#[cfg(test)]
pub(crate) mod testing;

pub use domain::response::{ClearResponse, DeleteResponse};
pub use domain::{Bin, Bins, CacheConfig, CacheStats, Document, Node, Record, ScanRecord};
pub use key::{Digest, Key, UserKey, digest};
pub use planes::control::{AdminAggregator, AdminCommand, AdminReply, Aggregate, InfoResponse};
pub use planes::data::{CacheMap, ReadThroughCache, SingleFlight};
pub use ports::{KeyValueStore, SourceFetcher};
pub use source::HttpSourceFetcher;

pub use shared::{Error, FetchError, NodeFailure, NodeId, Operation, PartialFailure, Result, TtlSecs};
