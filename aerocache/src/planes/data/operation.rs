use crate::domain::response::{ClearResponse, DeleteResponse};
use crate::key::{Digest, Key, UserKey};
use async_trait::async_trait;
use futures::stream::BoxStream;
use shared::{Operation, Result};

/// Associative contract of a cache scoped to one namespace and set.
///
/// Every operation either does its job or fails; unsupported ones fail with
/// `UnsupportedOperation` and `supports` says which ones those are.
#[async_trait]
pub trait CacheMap<V>: Send + Sync + 'static
where
    V: Send + Sync + 'static,
{
    fn supports(&self, operation: Operation) -> bool;

    /// Stored value, or the upstream one after writing it back.
    async fn get(&self, key: &UserKey) -> Result<V>;

    async fn contains_key(&self, key: &UserKey) -> Result<bool>;

    async fn remove(&self, key: &UserKey) -> Result<DeleteResponse>;

    async fn put(&self, key: &UserKey, value: V) -> Result<()>;

    async fn put_all(&self, entries: Vec<(UserKey, V)>) -> Result<()>;

    async fn clear(&self) -> Result<ClearResponse>;

    async fn size(&self) -> Result<u64>;

    async fn is_empty(&self) -> Result<bool>;

    /// Digests of every record; a new scan per call.
    fn key_set(&self) -> BoxStream<'static, Result<Digest>>;

    fn values(&self) -> BoxStream<'static, Result<V>>;

    /// Original keys, where the records carry them.
    fn user_keys(&self) -> Result<BoxStream<'static, Result<Option<UserKey>>>>;

    fn entry_set(&self) -> Result<BoxStream<'static, Result<(Key, V)>>>;

    async fn contains_value(&self, value: &V) -> Result<bool>;
}
