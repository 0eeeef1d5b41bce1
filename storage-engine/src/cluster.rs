use crate::moka_node::{MokaNode, NodeState};
use aerocache::{Bin, Digest, Key, KeyValueStore, Node, Record, ScanRecord};
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::{self, BoxStream};
use shared::{Error, Result, TtlSecs};
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::debug;

#[derive(Clone, Debug)]
pub struct ClusterOptions {
    /// Bound on every single-node request, after which it is a timeout.
    pub op_timeout: Duration,
    /// Namespace default TTL, used for writes with `TtlSecs::STORE_DEFAULT`.
    pub default_ttl: Option<Duration>,
    pub max_records_per_node: Option<u64>,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_secs(1),
            default_ttl: None,
            max_records_per_node: None,
        }
    }
}

/// In-process cluster of [`MokaNode`]s. Records are placed on one node by
/// the partition of their digest.
pub struct MemoryCluster {
    nodes: Vec<Arc<MokaNode>>,
    reachable: Arc<AtomicBool>,
    op_timeout: Duration,
}

impl MemoryCluster {
    pub fn new(node_count: usize) -> Self {
        Self::with_options(node_count, ClusterOptions::default())
    }

    pub fn with_options(node_count: usize, options: ClusterOptions) -> Self {
        let nodes = (0..node_count)
            .map(|i| {
                let node = Node::new(format!("node-{i}"), format!("127.0.0.1:{}", 3000 + i));
                Arc::new(MokaNode::new(node, options.max_records_per_node, options.default_ttl))
            })
            .collect();

        Self {
            nodes,
            reachable: Arc::new(AtomicBool::new(true)),
            op_timeout: options.op_timeout,
        }
    }

    /// Cuts the client off from the whole cluster, or reconnects it.
    pub fn set_reachable(&self, reachable: bool) {
        debug!("Cluster reachable: {}", reachable);
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn set_node_state(&self, index: usize, state: NodeState) {
        if let Some(node) = self.nodes.get(index) {
            node.set_state(state);
        }
    }

    pub fn node(&self, index: usize) -> Option<&MokaNode> {
        self.nodes.get(index).map(Arc::as_ref)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Index of the node that owns `digest`.
    pub fn owner_index(&self, digest: &Digest) -> Option<usize> {
        if self.nodes.is_empty() {
            None
        } else {
            Some(usize::from(digest.partition()) % self.nodes.len())
        }
    }

    /// TTL of the stored record, bypassing reachability and node state.
    pub async fn record_ttl(&self, key: &Key) -> Option<Duration> {
        let owner = self.owner_index(&key.digest())?;
        self.nodes[owner].ttl_of(&key.digest()).await
    }

    pub fn record_count(&self) -> usize {
        self.nodes.iter().map(|node| node.record_count()).sum()
    }

    fn owner(&self, digest: &Digest) -> Result<&MokaNode> {
        self.owner_index(digest)
            .map(|index| self.nodes[index].as_ref())
            .ok_or_else(|| Error::StoreUnavailable("cluster has no nodes".to_string()))
    }

    fn check_reachable(&self) -> Result<()> {
        check_reachable(&self.reachable)
    }

    async fn on_node<T, F>(&self, node: &MokaNode, request: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check_reachable()?;
        bounded(self.op_timeout, node, request).await
    }
}

fn check_reachable(reachable: &AtomicBool) -> Result<()> {
    if reachable.load(Ordering::SeqCst) {
        Ok(())
    } else {
        Err(Error::StoreUnavailable("cluster is unreachable".to_string()))
    }
}

async fn bounded<T, F>(limit: Duration, node: &MokaNode, request: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, request).await {
        Ok(outcome) => outcome,
        Err(_) => Err(Error::StoreTimeout(format!(
            "node {} did not answer within {:?}",
            node.node().id,
            limit
        ))),
    }
}

#[async_trait]
impl KeyValueStore for MemoryCluster {
    async fn exists(&self, key: &Key) -> Result<bool> {
        let node = self.owner(&key.digest())?;
        self.on_node(node, node.exists(&key.digest())).await
    }

    async fn get(&self, key: &Key, bins: &[&str]) -> Result<Option<Record>> {
        let node = self.owner(&key.digest())?;
        self.on_node(node, node.get(&key.digest(), bins)).await
    }

    async fn put(&self, key: &Key, bins: &[Bin], ttl: TtlSecs) -> Result<()> {
        let node = self.owner(&key.digest())?;
        self.on_node(node, node.put(key, bins, ttl)).await
    }

    async fn delete(&self, key: &Key) -> Result<bool> {
        let node = self.owner(&key.digest())?;
        self.on_node(node, node.delete(&key.digest())).await
    }

    async fn nodes(&self) -> Result<Vec<Node>> {
        self.check_reachable()?;
        Ok(self.nodes.iter().map(|node| node.node().clone()).collect())
    }

    async fn admin_request(&self, node: &Node, command: &str) -> Result<String> {
        let target = self
            .nodes
            .iter()
            .find(|candidate| candidate.node().id == node.id)
            .ok_or_else(|| Error::StoreUnavailable(format!("unknown node {}", node.id)))?;
        self.on_node(target, target.admin(command)).await
    }

    fn scan_all(&self, namespace: &str, set: &str, bins: &[&str]) -> BoxStream<'static, Result<ScanRecord>> {
        let scan = Scan {
            nodes: self.nodes.clone(),
            next_node: 0,
            buffered: VecDeque::new(),
            namespace: namespace.to_string(),
            set: set.to_string(),
            bins: bins.iter().map(|bin| bin.to_string()).collect(),
            reachable: Arc::clone(&self.reachable),
            op_timeout: self.op_timeout,
            finished: false,
        };

        stream::unfold(scan, |mut scan| async move {
            let item = scan.next().await?;
            Some((item, scan))
        })
        .boxed()
    }
}

/// Cursor over a set, one node at a time.
struct Scan {
    nodes: Vec<Arc<MokaNode>>,
    next_node: usize,
    buffered: VecDeque<ScanRecord>,
    namespace: String,
    set: String,
    bins: Vec<String>,
    reachable: Arc<AtomicBool>,
    op_timeout: Duration,
    finished: bool,
}

impl Scan {
    async fn next(&mut self) -> Option<Result<ScanRecord>> {
        loop {
            if let Some(record) = self.buffered.pop_front() {
                return Some(Ok(record));
            }
            if self.finished {
                return None;
            }
            let Some(node) = self.nodes.get(self.next_node).cloned() else {
                self.finished = true;
                return None;
            };
            self.next_node += 1;

            match self.load(&node).await {
                Ok(records) => self.buffered.extend(records),
                Err(e) => {
                    self.finished = true;
                    return Some(Err(e));
                }
            }
        }
    }

    async fn load(&self, node: &MokaNode) -> Result<Vec<ScanRecord>> {
        check_reachable(&self.reachable)?;
        let bins: Vec<&str> = self.bins.iter().map(String::as_str).collect();
        debug!("Scanning {}/{} on node {}", self.namespace, self.set, node.node().id);
        bounded(self.op_timeout, node, node.scan(&self.namespace, &self.set, &bins)).await
    }
}

impl std::fmt::Debug for MemoryCluster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCluster")
            .field("nodes", &self.nodes)
            .field("reachable", &self.reachable.load(Ordering::SeqCst))
            .field("op_timeout", &self.op_timeout)
            .finish()
    }
}
