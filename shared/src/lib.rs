// shared/src/lib.rs

use std::fmt;
use std::time::Duration;

pub mod config;
pub mod failure;

pub use failure::{FetchError, NodeFailure, PartialFailure};

#[derive(thiserror::Error, Debug, Clone)]
pub enum Error {
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),
    #[error("store timed out: {0}")]
    StoreTimeout(String),
    #[error("unsupported key type: {0}")]
    KeyEncodingUnsupported(&'static str),
    #[error("fetching '{identifier}' from source failed: {cause}")]
    SourceFetchFailed {
        identifier: String,
        #[source]
        cause: FetchError,
    },
    #[error("admin command '{command}' failed on node {node}: {reason}")]
    AdminCommandFailed {
        node: NodeId,
        command: String,
        reason: String,
    },
    #[error("cluster operation partially failed: {0}")]
    PartialFailure(PartialFailure),
    #[error("cluster operation failed on every node: {}", failure::describe(.0))]
    ClusterFailure(Vec<NodeFailure>),
    #[error("operation not supported: {0}")]
    UnsupportedOperation(Operation),
    #[error("decode: {0}")]
    Decode(String),
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl Error {
    /// Timeouts and unreachable stores are worth retrying as-is; everything
    /// else needs a change of input or configuration first.
    pub fn is_transient(&self) -> bool {
        match self {
            Error::StoreUnavailable(_) | Error::StoreTimeout(_) => true,
            Error::SourceFetchFailed { cause, .. } => cause.is_transient(),
            Error::PartialFailure(_) | Error::ClusterFailure(_) => true,
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Record time-to-live in seconds. Zero leaves expiry to the store's
/// namespace default.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TtlSecs(pub u32);

impl TtlSecs {
    pub const STORE_DEFAULT: TtlSecs = TtlSecs(0);

    pub fn as_duration(&self) -> Option<Duration> {
        match self.0 {
            0 => None,
            secs => Some(Duration::from_secs(u64::from(secs))),
        }
    }
}

/// Identity of one cluster member, as reported by node discovery.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub String);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(name: &str) -> Self {
        NodeId(name.to_string())
    }
}

/// Every operation of the cache map contract, used to tag capabilities and
/// to name the operation an `UnsupportedOperation` refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Operation {
    Get,
    ContainsKey,
    Remove,
    Put,
    PutAll,
    Clear,
    Size,
    IsEmpty,
    KeySet,
    Values,
    UserKeys,
    EntrySet,
    ContainsValue,
}

impl Operation {
    pub const ALL: [Operation; 13] = [
        Operation::Get,
        Operation::ContainsKey,
        Operation::Remove,
        Operation::Put,
        Operation::PutAll,
        Operation::Clear,
        Operation::Size,
        Operation::IsEmpty,
        Operation::KeySet,
        Operation::Values,
        Operation::UserKeys,
        Operation::EntrySet,
        Operation::ContainsValue,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Operation::Get => "get",
            Operation::ContainsKey => "contains_key",
            Operation::Remove => "remove",
            Operation::Put => "put",
            Operation::PutAll => "put_all",
            Operation::Clear => "clear",
            Operation::Size => "size",
            Operation::IsEmpty => "is_empty",
            Operation::KeySet => "key_set",
            Operation::Values => "values",
            Operation::UserKeys => "user_keys",
            Operation::EntrySet => "entry_set",
            Operation::ContainsValue => "contains_value",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
