use aerocache::{AdminCommand, Bin, Bins, Digest, InfoResponse, Key, Node, Record, ScanRecord};
use moka::Expiry;
use moka::future::Cache;
use shared::{Error, Result, TtlSecs};
use std::fmt::Debug;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

/// Health of one in-memory node, switchable at runtime for failure tests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeState {
    Up = 0,
    /// Refuses every request.
    Down = 1,
    /// Accepts requests and never answers them.
    Hung = 2,
}

impl NodeState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => NodeState::Down,
            2 => NodeState::Hung,
            _ => NodeState::Up,
        }
    }
}

#[derive(Clone, Debug)]
pub struct StoredRecord {
    namespace: String,
    set: String,
    bins: Bins,
    ttl: Option<Duration>,
}

impl StoredRecord {
    fn belongs_to(&self, namespace: &str, set: &str) -> bool {
        self.namespace == namespace && self.set == set
    }

    fn select(&self, bins: &[&str]) -> Record {
        if bins.is_empty() {
            return Record::new(self.bins.clone());
        }
        Record::new(
            self.bins
                .iter()
                .filter(|(name, _)| bins.contains(&name.as_str()))
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
        )
    }
}

/// Each record expires after the TTL it was last written with.
struct RecordExpiry;

impl Expiry<Digest, StoredRecord> for RecordExpiry {
    fn expire_after_create(&self, _key: &Digest, value: &StoredRecord, _created_at: Instant) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &Digest,
        value: &StoredRecord,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// One cluster member: a moka cache of the records whose partitions it
/// owns, plus the server side of the admin protocol.
pub struct MokaNode {
    node: Node,
    records: Cache<Digest, StoredRecord>,
    /// Applied to writes that ask for the store default.
    default_ttl: Option<Duration>,
    state: AtomicU8,
}

impl MokaNode {
    pub fn new(node: Node, max_records: Option<u64>, default_ttl: Option<Duration>) -> Self {
        let mut builder = Cache::builder().name(&node.id.0).expire_after(RecordExpiry);

        if let Some(capacity) = max_records {
            builder = builder.max_capacity(capacity);
        }

        Self {
            node,
            records: builder.build(),
            default_ttl,
            state: AtomicU8::new(NodeState::Up as u8),
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn state(&self) -> NodeState {
        NodeState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn set_state(&self, state: NodeState) {
        debug!("Node {} is now {:?}", self.node.id, state);
        self.state.store(state as u8, Ordering::SeqCst);
    }

    async fn available(&self) -> Result<()> {
        match self.state() {
            NodeState::Up => Ok(()),
            NodeState::Down => Err(Error::StoreUnavailable(format!("node {} is down", self.node.id))),
            NodeState::Hung => std::future::pending().await,
        }
    }

    pub async fn exists(&self, digest: &Digest) -> Result<bool> {
        self.available().await?;
        Ok(self.records.contains_key(digest))
    }

    pub async fn get(&self, digest: &Digest, bins: &[&str]) -> Result<Option<Record>> {
        self.available().await?;
        Ok(self.records.get(digest).await.map(|stored| stored.select(bins)))
    }

    /// Merges `bins` into the record and restarts its expiry.
    pub async fn put(&self, key: &Key, bins: &[Bin], ttl: TtlSecs) -> Result<()> {
        self.available().await?;

        let ttl = ttl.as_duration().or(self.default_ttl);
        let namespace = key.namespace().to_string();
        let set = key.set().to_string();
        let written: Vec<(String, serde_json::Value)> = bins
            .iter()
            .map(|bin| (bin.name.clone(), bin.value.clone()))
            .collect();

        self.records
            .entry(key.digest())
            .and_upsert_with(|existing| {
                let mut merged = existing.map(|entry| entry.into_value().bins).unwrap_or_default();
                merged.extend(written);
                std::future::ready(StoredRecord {
                    namespace,
                    set,
                    bins: merged,
                    ttl,
                })
            })
            .await;
        Ok(())
    }

    pub async fn delete(&self, digest: &Digest) -> Result<bool> {
        self.available().await?;
        Ok(self.records.remove(digest).await.is_some())
    }

    /// Snapshot of this node's records in `namespace`/`set`.
    pub async fn scan(&self, namespace: &str, set: &str, bins: &[&str]) -> Result<Vec<ScanRecord>> {
        self.available().await?;
        Ok(self
            .records
            .iter()
            .filter(|(_, stored)| stored.belongs_to(namespace, set))
            .map(|(digest, stored)| ScanRecord {
                digest: *digest,
                record: stored.select(bins),
            })
            .collect())
    }

    /// Answers one admin command the way a server does: errors become an
    /// `ERROR::` reply, not a failed request.
    pub async fn admin(&self, command: &str) -> Result<String> {
        self.available().await?;

        let command = match AdminCommand::parse(command) {
            Ok(command) => command,
            Err(reason) => return Ok(format!("ERROR::{reason}")),
        };

        match command {
            AdminCommand::SetStats { namespace, set } => {
                let objects = self.count_in(&namespace, &set);
                Ok(InfoResponse::new()
                    .with_field("objects", objects)
                    .with_field("tombstones", 0)
                    .with_field("truncate_lut", 0)
                    .to_wire())
            }
            AdminCommand::DeleteSet { namespace, set } => {
                let doomed: Vec<Digest> = self
                    .records
                    .iter()
                    .filter(|(_, stored)| stored.belongs_to(&namespace, &set))
                    .map(|(digest, _)| *digest)
                    .collect();
                for digest in &doomed {
                    self.records.invalidate(digest).await;
                }
                debug!(
                    "Node {} deleted {} record(s) of {}/{}",
                    self.node.id,
                    doomed.len(),
                    namespace,
                    set
                );
                Ok("ok".to_string())
            }
        }
    }

    fn count_in(&self, namespace: &str, set: &str) -> usize {
        self.records
            .iter()
            .filter(|(_, stored)| stored.belongs_to(namespace, set))
            .count()
    }

    /// Live records on this node across all sets, regardless of state.
    pub fn record_count(&self) -> usize {
        self.records.iter().count()
    }

    /// TTL the record was last written with, regardless of state.
    pub async fn ttl_of(&self, digest: &Digest) -> Option<Duration> {
        self.records.get(digest).await.and_then(|stored| stored.ttl)
    }
}

impl Debug for MokaNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaNode")
            .field("node", &self.node)
            .field("state", &self.state())
            .field("entry_count", &self.records.entry_count())
            .finish()
    }
}
