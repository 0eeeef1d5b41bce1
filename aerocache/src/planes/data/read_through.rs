use super::operation::CacheMap;
use super::single_flight::{Role, SingleFlight};
use crate::domain::response::{ClearResponse, DeleteResponse};
use crate::domain::{Bin, CacheConfig, CacheStats, StatsCounters};
use crate::key::{Digest, Key, UserKey};
use crate::planes::control::AdminAggregator;
use crate::ports::{KeyValueStore, SourceFetcher};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde_json::Value;
use shared::{Error, Operation, Result};
use std::marker::PhantomData;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Read-through cache over a [`KeyValueStore`] set, populated from a
/// [`SourceFetcher`] on miss.
///
/// Each entry is one record whose data bin holds the source document as
/// JSON. Records expire on their own after the configured TTL; the cache
/// never reads expiry back.
pub struct ReadThroughCache<V> {
    store: Arc<dyn KeyValueStore>,
    source: Arc<dyn SourceFetcher>,
    admin: AdminAggregator,
    config: Arc<CacheConfig>,
    flights: SingleFlight<Digest, V>,
    stats: Arc<StatsCounters>,
    _value: PhantomData<fn() -> V>,
}

impl<V> ReadThroughCache<V>
where
    V: DeserializeOwned + Clone + Send + Sync + 'static,
{
    pub fn new(
        store: Arc<dyn KeyValueStore>,
        source: Arc<dyn SourceFetcher>,
        config: CacheConfig,
    ) -> Result<Self> {
        config.validate()?;
        let admin = AdminAggregator::new(Arc::clone(&store), config.admin_timeout);
        Ok(Self {
            store,
            source,
            admin,
            config: Arc::new(config),
            flights: SingleFlight::new(),
            stats: Arc::new(StatsCounters::default()),
            _value: PhantomData,
        })
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Full store key of `user_key` in this cache's namespace and set.
    pub fn key(&self, user_key: &UserKey) -> Result<Key> {
        Key::new(&self.config.namespace, &self.config.set, user_key.clone())
    }

    /// Aborts the upstream fetch in progress for `user_key`, if any. Every
    /// caller waiting on it fails with the same cancellation.
    pub fn cancel_fetch(&self, user_key: &UserKey) -> Result<bool> {
        let key = self.key(user_key)?;
        Ok(self.flights.cancel(&key.digest()))
    }

    pub fn stats(&self) -> CacheStats {
        self.stats.snapshot()
    }

    fn unsupported<T>(operation: Operation) -> Result<T> {
        Err(Error::UnsupportedOperation(operation))
    }
}

async fn read_value<V>(store: &dyn KeyValueStore, config: &CacheConfig, key: &Key) -> Result<Option<V>>
where
    V: DeserializeOwned,
{
    let Some(mut record) = store.get(key, &[config.data_bin.as_str()]).await? else {
        return Ok(None);
    };
    let document = record.take_bin(&config.data_bin).ok_or_else(|| {
        Error::Decode(format!(
            "record {} has no '{}' bin",
            key.digest(),
            config.data_bin
        ))
    })?;
    decode(document).map(Some)
}

fn decode<V: DeserializeOwned>(document: Value) -> Result<V> {
    serde_json::from_value(document).map_err(|e| Error::Decode(e.to_string()))
}

/// Body of one single-flight fetch: look again, fetch, write back.
async fn fetch_and_store<V>(
    store: Arc<dyn KeyValueStore>,
    source: Arc<dyn SourceFetcher>,
    config: Arc<CacheConfig>,
    stats: Arc<StatsCounters>,
    key: Key,
) -> Result<V>
where
    V: DeserializeOwned,
{
    // A flight that finished just before this one started has already written.
    if let Some(value) = read_value(&*store, &config, &key).await? {
        debug!("Record {} appeared before fetching", key.digest());
        return Ok(value);
    }

    let identifier = key.user_key().identifier();
    stats.fetch();
    debug!("Fetching '{}' from source", identifier);
    let document = source
        .fetch(&identifier)
        .await
        .map_err(|cause| Error::SourceFetchFailed {
            identifier: identifier.clone(),
            cause,
        })?;

    let document = Value::Object(document);
    let value = decode(document.clone())?;

    let mut bins = vec![Bin::new(&config.data_bin, document)];
    if let Some(key_bin) = &config.key_bin {
        let stored_key = serde_json::to_value(key.user_key()).map_err(|e| Error::Decode(e.to_string()))?;
        bins.push(Bin::new(key_bin, stored_key));
    }
    store.put(&key, &bins, config.default_ttl).await?;
    stats.write_back();
    debug!(
        "Wrote back '{}' as {} with ttl {}s",
        identifier,
        key.digest(),
        config.default_ttl.0
    );

    Ok(value)
}

#[async_trait]
impl<V> CacheMap<V> for ReadThroughCache<V>
where
    V: DeserializeOwned + Clone + Send + Sync + 'static,
{
    fn supports(&self, operation: Operation) -> bool {
        match operation {
            Operation::Get
            | Operation::ContainsKey
            | Operation::Remove
            | Operation::Clear
            | Operation::Size
            | Operation::IsEmpty
            | Operation::KeySet
            | Operation::Values => true,
            Operation::UserKeys => self.config.key_bin.is_some(),
            Operation::Put | Operation::PutAll | Operation::EntrySet | Operation::ContainsValue => false,
        }
    }

    async fn get(&self, user_key: &UserKey) -> Result<V> {
        let key = self.key(user_key)?;

        if let Some(value) = read_value(&*self.store, &self.config, &key).await? {
            self.stats.hit();
            debug!("Hit for '{}' ({})", user_key, key.digest());
            return Ok(value);
        }
        self.stats.miss();
        debug!("Miss for '{}' ({})", user_key, key.digest());

        let digest = key.digest();
        let identifier = user_key.identifier();
        let work = fetch_and_store(
            Arc::clone(&self.store),
            Arc::clone(&self.source),
            Arc::clone(&self.config),
            Arc::clone(&self.stats),
            key,
        );
        let (result, role) = self.flights.run(digest, &identifier, work).await;
        if role == Role::Follower {
            self.stats.coalesced();
        }
        result
    }

    async fn contains_key(&self, user_key: &UserKey) -> Result<bool> {
        let key = self.key(user_key)?;
        self.store.exists(&key).await
    }

    async fn remove(&self, user_key: &UserKey) -> Result<DeleteResponse> {
        let key = self.key(user_key)?;
        let deleted = self.store.delete(&key).await?;
        debug!("Removed '{}' ({}): existed={}", user_key, key.digest(), deleted);
        Ok(DeleteResponse::new(deleted))
    }

    async fn put(&self, _key: &UserKey, _value: V) -> Result<()> {
        Self::unsupported(Operation::Put)
    }

    async fn put_all(&self, _entries: Vec<(UserKey, V)>) -> Result<()> {
        Self::unsupported(Operation::PutAll)
    }

    async fn clear(&self) -> Result<ClearResponse> {
        let (namespace, set) = (&self.config.namespace, &self.config.set);
        let aggregate = self.admin.delete_set(namespace, set).await?;
        match aggregate.into_result(|_| None) {
            Ok(((), nodes)) => {
                info!("Cleared {}/{} on {} node(s)", namespace, set, nodes.len());
                Ok(ClearResponse::new(nodes))
            }
            Err(e) => {
                warn!("Clear of {}/{} incomplete: {}", namespace, set, e);
                Err(e)
            }
        }
    }

    async fn size(&self) -> Result<u64> {
        let aggregate = self
            .admin
            .object_count(&self.config.namespace, &self.config.set)
            .await?;
        aggregate.into_result(|count| Some(*count)).map(|(count, _)| count)
    }

    async fn is_empty(&self) -> Result<bool> {
        Ok(self.size().await? == 0)
    }

    fn key_set(&self) -> BoxStream<'static, Result<Digest>> {
        // Digests only; an empty selection would load every bin.
        self.store
            .scan_all(&self.config.namespace, &self.config.set, &[self.config.data_bin.as_str()])
            .map(|item| item.map(|scanned| scanned.digest))
            .boxed()
    }

    fn values(&self) -> BoxStream<'static, Result<V>> {
        let data_bin = self.config.data_bin.clone();
        let scan = self
            .store
            .scan_all(&self.config.namespace, &self.config.set, &[data_bin.as_str()]);

        scan.map(move |item| {
            let mut scanned = item?;
            let document = scanned.record.take_bin(&data_bin).ok_or_else(|| {
                Error::Decode(format!("record {} has no '{}' bin", scanned.digest, data_bin))
            })?;
            decode(document)
        })
        .boxed()
    }

    fn user_keys(&self) -> Result<BoxStream<'static, Result<Option<UserKey>>>> {
        let Some(key_bin) = self.config.key_bin.clone() else {
            return Self::unsupported(Operation::UserKeys);
        };
        let scan = self
            .store
            .scan_all(&self.config.namespace, &self.config.set, &[key_bin.as_str()]);

        Ok(scan
            .map(move |item| {
                let mut scanned = item?;
                scanned
                    .record
                    .take_bin(&key_bin)
                    .map(|stored| serde_json::from_value(stored).map_err(|e| Error::Decode(e.to_string())))
                    .transpose()
            })
            .boxed())
    }

    fn entry_set(&self) -> Result<BoxStream<'static, Result<(Key, V)>>> {
        Self::unsupported(Operation::EntrySet)
    }

    async fn contains_value(&self, _value: &V) -> Result<bool> {
        Self::unsupported(Operation::ContainsValue)
    }
}

impl<V> std::fmt::Debug for ReadThroughCache<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadThroughCache")
            .field("config", &self.config)
            .field("admin", &self.admin)
            .field("flights", &self.flights)
            .finish()
    }
}
