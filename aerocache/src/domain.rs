use crate::key::Digest;
use serde_json::Value;
use shared::config::Config;
use shared::{Error, NodeId, Result, TtlSecs};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// A JSON object as received from the source and stored in the data bin.
pub type Document = serde_json::Map<String, Value>;

/// Named value slots of one record.
pub type Bins = BTreeMap<String, Value>;

/// Longest bin name the store accepts.
pub const MAX_BIN_NAME_LEN: usize = 15;

#[derive(Clone, Debug, PartialEq)]
pub struct Bin {
    pub name: String,
    pub value: Value,
}

impl Bin {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    pub bins: Bins,
}

impl Record {
    pub fn new(bins: Bins) -> Self {
        Self { bins }
    }

    pub fn bin(&self, name: &str) -> Option<&Value> {
        self.bins.get(name)
    }

    pub fn take_bin(&mut self, name: &str) -> Option<Value> {
        self.bins.remove(name)
    }
}

/// One record yielded by a set scan. Only the digest survives a scan; the
/// user key is gone unless the writer stored it in a bin.
#[derive(Clone, Debug)]
pub struct ScanRecord {
    pub digest: Digest,
    pub record: Record,
}

/// Handle to one cluster member for administrative requests.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Node {
    pub id: NodeId,
    pub address: String,
}

impl Node {
    pub fn new(id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            id: NodeId(id.into()),
            address: address.into(),
        }
    }
}

pub mod response {
    use shared::NodeId;

    #[derive(Clone, Debug)]
    pub struct DeleteResponse {
        pub deleted: bool,
    }

    impl DeleteResponse {
        pub fn new(deleted: bool) -> Self {
            Self { deleted }
        }
    }

    #[derive(Clone, Debug)]
    pub struct ClearResponse {
        pub cleared_nodes: Vec<NodeId>,
    }

    impl ClearResponse {
        pub fn new(cleared_nodes: Vec<NodeId>) -> Self {
            Self { cleared_nodes }
        }
    }
}

/// Adapter configuration. Immutable once the cache is built.
#[derive(Clone, Debug)]
pub struct CacheConfig {
    pub namespace: String,
    pub set: String,
    pub default_ttl: TtlSecs,
    pub data_bin: String,
    /// Second bin holding the original user key, so scans can recover it.
    pub key_bin: Option<String>,
    /// Upper bound for one node's answer to an admin request.
    pub admin_timeout: Duration,
}

impl CacheConfig {
    pub const DEFAULT_DATA_BIN: &str = Config::DEFAULT_DATA_BIN;
    pub const DEFAULT_KEY_BIN: &str = Config::DEFAULT_KEY_BIN;
    pub const DEFAULT_TTL: TtlSecs = TtlSecs(300);
    pub const DEFAULT_ADMIN_TIMEOUT: Duration = Duration::from_secs(1);

    pub fn new(namespace: impl Into<String>, set: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            set: set.into(),
            default_ttl: Self::DEFAULT_TTL,
            data_bin: Self::DEFAULT_DATA_BIN.to_string(),
            key_bin: Some(Self::DEFAULT_KEY_BIN.to_string()),
            admin_timeout: Self::DEFAULT_ADMIN_TIMEOUT,
        }
    }

    pub fn with_default_ttl(mut self, ttl: TtlSecs) -> Self {
        self.default_ttl = ttl;
        self
    }

    pub fn with_data_bin(mut self, name: impl Into<String>) -> Self {
        self.data_bin = name.into();
        self
    }

    pub fn with_key_bin(mut self, name: Option<String>) -> Self {
        self.key_bin = name;
        self
    }

    pub fn with_admin_timeout(mut self, timeout: Duration) -> Self {
        self.admin_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.namespace.is_empty() {
            return Err(Error::InvalidConfig("namespace must not be empty".to_string()));
        }
        if self.set.is_empty() {
            return Err(Error::InvalidConfig("set must not be empty".to_string()));
        }
        validate_bin_name(&self.data_bin)?;
        if let Some(key_bin) = &self.key_bin {
            validate_bin_name(key_bin)?;
            if key_bin == &self.data_bin {
                return Err(Error::InvalidConfig(format!(
                    "key bin and data bin are both '{key_bin}'"
                )));
            }
        }
        if self.admin_timeout.is_zero() {
            return Err(Error::InvalidConfig("admin timeout must be positive".to_string()));
        }
        Ok(())
    }
}

impl From<&Config> for CacheConfig {
    fn from(config: &Config) -> Self {
        CacheConfig::new(&config.namespace, &config.set)
            .with_default_ttl(TtlSecs(config.ttl_secs))
            .with_data_bin(&config.data_bin)
            .with_key_bin(config.key_bin.clone())
            .with_admin_timeout(config.admin_timeout)
    }
}

fn validate_bin_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_BIN_NAME_LEN {
        return Err(Error::InvalidConfig(format!(
            "bin name '{name}' must be 1..={MAX_BIN_NAME_LEN} bytes"
        )));
    }
    Ok(())
}

/// Point-in-time copy of the adapter's counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Upstream fetches actually issued.
    pub fetches: u64,
    /// Misses that waited on a fetch another caller had already started.
    pub coalesced: u64,
    pub write_backs: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    coalesced: AtomicU64,
    write_backs: AtomicU64,
}

impl StatsCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn fetch(&self) {
        self.fetches.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn coalesced(&self) {
        self.coalesced.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn write_back(&self) {
        self.write_backs.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            fetches: self.fetches.load(Ordering::Relaxed),
            coalesced: self.coalesced.load(Ordering::Relaxed),
            write_backs: self.write_backs.load(Ordering::Relaxed),
        }
    }
}
