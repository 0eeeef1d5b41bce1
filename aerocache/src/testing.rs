//! Scripted collaborators for unit tests inside this crate.

use crate::domain::{Bin, Document, Node, Record, ScanRecord};
use crate::key::Key;
use crate::ports::{KeyValueStore, SourceFetcher};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use shared::{Error, FetchError, NodeId, Result, TtlSecs};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

pub(crate) enum Scripted {
    Reply(String),
    Fail(Error),
    Hang,
}

impl Scripted {
    pub(crate) fn reply(raw: &str) -> Self {
        Scripted::Reply(raw.to_string())
    }
}

/// Answers admin requests from a script. Holds no records: every
/// single-record call reports the store as unreachable.
pub(crate) struct ScriptedCluster {
    nodes: Vec<(Node, Scripted)>,
    commands: Mutex<Vec<(NodeId, String)>>,
    scanned_bins: Mutex<Vec<Vec<String>>>,
}

impl ScriptedCluster {
    pub(crate) fn new(script: Vec<(&str, Scripted)>) -> Self {
        Self {
            nodes: script
                .into_iter()
                .map(|(name, reply)| (Node::new(name, format!("{name}:3000")), reply))
                .collect(),
            commands: Mutex::new(Vec::new()),
            scanned_bins: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn commands(&self) -> Vec<(NodeId, String)> {
        self.commands.lock().unwrap().clone()
    }

    /// Bin selection of every scan started, in order.
    pub(crate) fn scanned_bins(&self) -> Vec<Vec<String>> {
        self.scanned_bins.lock().unwrap().clone()
    }

    fn no_records() -> Error {
        Error::StoreUnavailable("scripted cluster holds no records".to_string())
    }
}

#[async_trait]
impl KeyValueStore for ScriptedCluster {
    async fn exists(&self, _key: &Key) -> Result<bool> {
        Err(Self::no_records())
    }

    async fn get(&self, _key: &Key, _bins: &[&str]) -> Result<Option<Record>> {
        Err(Self::no_records())
    }

    async fn put(&self, _key: &Key, _bins: &[Bin], _ttl: TtlSecs) -> Result<()> {
        Err(Self::no_records())
    }

    async fn delete(&self, _key: &Key) -> Result<bool> {
        Err(Self::no_records())
    }

    async fn nodes(&self) -> Result<Vec<Node>> {
        Ok(self.nodes.iter().map(|(node, _)| node.clone()).collect())
    }

    async fn admin_request(&self, node: &Node, command: &str) -> Result<String> {
        self.commands
            .lock()
            .unwrap()
            .push((node.id.clone(), command.to_string()));

        let (_, scripted) = self
            .nodes
            .iter()
            .find(|(candidate, _)| candidate.id == node.id)
            .ok_or_else(|| Error::StoreUnavailable(format!("unknown node {}", node.id)))?;

        match scripted {
            Scripted::Reply(raw) => Ok(raw.clone()),
            Scripted::Fail(error) => Err(error.clone()),
            Scripted::Hang => std::future::pending().await,
        }
    }

    fn scan_all(&self, _namespace: &str, _set: &str, bins: &[&str]) -> BoxStream<'static, Result<ScanRecord>> {
        self.scanned_bins
            .lock()
            .unwrap()
            .push(bins.iter().map(ToString::to_string).collect());
        stream::once(async { Err(Self::no_records()) }).boxed()
    }
}

/// Fetcher that is never expected to be called; counts calls if it is.
#[derive(Default)]
pub(crate) struct UnreachableSource {
    pub(crate) calls: AtomicUsize,
}

#[async_trait]
impl SourceFetcher for UnreachableSource {
    async fn fetch(&self, _identifier: &str) -> std::result::Result<Document, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(FetchError::Status(503))
    }
}
