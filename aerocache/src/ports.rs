use crate::domain::{Bin, Document, Node, Record, ScanRecord};
use crate::key::Key;
use async_trait::async_trait;
use futures::stream::BoxStream;
use shared::{FetchError, Result, TtlSecs};

// Ports are the pluggable collaborators behind the read-through cache

/// Port for the distributed key-value store the cache lives in.
///
/// Single-record calls must report store trouble as `StoreUnavailable` or
/// `StoreTimeout`; "absent" is `Ok(None)` / `Ok(false)`, never an error.
#[async_trait]
pub trait KeyValueStore: Send + Sync + 'static {
    async fn exists(&self, key: &Key) -> Result<bool>;

    /// Reads the named bins of a record. An empty `bins` slice reads all.
    async fn get(&self, key: &Key, bins: &[&str]) -> Result<Option<Record>>;

    /// Writes bins into the record, merging with bins already present, and
    /// (re)arms its expiry.
    async fn put(&self, key: &Key, bins: &[Bin], ttl: TtlSecs) -> Result<()>;

    /// Returns whether a record existed.
    async fn delete(&self, key: &Key) -> Result<bool>;

    /// Current cluster members. Callers must not hold on to the list.
    async fn nodes(&self) -> Result<Vec<Node>>;

    /// Sends one administrative command to one node and returns its raw
    /// single-line reply.
    async fn admin_request(&self, node: &Node, command: &str) -> Result<String>;

    /// Starts a fresh scan over every record of `namespace`/`set`.
    ///
    /// The stream is lazy and finite. A failure mid-scan is yielded as an
    /// `Err` item, after which the stream ends.
    fn scan_all(&self, namespace: &str, set: &str, bins: &[&str]) -> BoxStream<'static, Result<ScanRecord>>;
}

/// Port for the upstream the cache reads through to.
#[async_trait]
pub trait SourceFetcher: Send + Sync + 'static {
    async fn fetch(&self, identifier: &str) -> std::result::Result<Document, FetchError>;
}
