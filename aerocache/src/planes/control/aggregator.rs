use super::protocol::{AdminCommand, AdminReply};
use crate::domain::Node;
use crate::ports::KeyValueStore;
use futures::future::join_all;
use shared::{Error, NodeFailure, NodeId, PartialFailure, Result};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Raw reply of one node to a fanned-out command.
#[derive(Debug)]
pub struct NodeResponse {
    pub node: Node,
    pub reply: Result<String>,
}

/// Merged outcome of a command sent to every node.
#[derive(Clone, Debug)]
pub enum Aggregate<T> {
    Complete {
        value: T,
        nodes: Vec<NodeId>,
    },
    Partial {
        value: T,
        succeeded: Vec<NodeId>,
        failed: Vec<NodeFailure>,
    },
    Failed {
        failed: Vec<NodeFailure>,
    },
}

impl<T> Aggregate<T> {
    fn from_parts(value: T, succeeded: Vec<NodeId>, failed: Vec<NodeFailure>) -> Self {
        if failed.is_empty() {
            Aggregate::Complete {
                value,
                nodes: succeeded,
            }
        } else if succeeded.is_empty() {
            Aggregate::Failed { failed }
        } else {
            Aggregate::Partial {
                value,
                succeeded,
                failed,
            }
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Aggregate::Complete { .. })
    }

    pub fn failed(&self) -> &[NodeFailure] {
        match self {
            Aggregate::Complete { .. } => &[],
            Aggregate::Partial { failed, .. } | Aggregate::Failed { failed } => failed,
        }
    }

    /// Only a complete aggregate is a success. `partial_count` extracts the
    /// number reported alongside a partial failure, if the value has one.
    pub fn into_result(self, partial_count: impl FnOnce(&T) -> Option<u64>) -> Result<(T, Vec<NodeId>)> {
        match self {
            Aggregate::Complete { value, nodes } => Ok((value, nodes)),
            Aggregate::Partial {
                value,
                succeeded,
                failed,
            } => Err(Error::PartialFailure(PartialFailure {
                partial_count: partial_count(&value),
                succeeded,
                failed,
            })),
            Aggregate::Failed { failed } => Err(Error::ClusterFailure(failed)),
        }
    }
}

/// Sends administrative commands to every cluster node and folds the
/// replies into one [`Aggregate`].
#[derive(Clone)]
pub struct AdminAggregator {
    store: Arc<dyn KeyValueStore>,
    timeout: Duration,
}

impl AdminAggregator {
    pub fn new(store: Arc<dyn KeyValueStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Nodes as of now. An empty cluster counts as unreachable.
    pub async fn discover(&self) -> Result<Vec<Node>> {
        let nodes = self.store.nodes().await?;
        if nodes.is_empty() {
            return Err(Error::StoreUnavailable("cluster reported no nodes".to_string()));
        }
        Ok(nodes)
    }

    /// Sends `command` to each of `nodes` concurrently and waits for all of
    /// them to answer, fail or time out.
    pub async fn fan_out(&self, nodes: &[Node], command: &AdminCommand) -> Vec<NodeResponse> {
        let wire = command.to_wire();
        let wire = wire.as_str();
        debug!("Fanning out '{}' to {} node(s)", wire, nodes.len());

        let requests = nodes.iter().map(|node| async move {
            NodeResponse {
                node: node.clone(),
                reply: self.request(node, wire).await,
            }
        });
        join_all(requests).await
    }

    async fn request(&self, node: &Node, wire: &str) -> Result<String> {
        match tokio::time::timeout(self.timeout, self.store.admin_request(node, wire)).await {
            Ok(reply) => reply,
            Err(_) => Err(Error::StoreTimeout(format!(
                "node {} did not answer '{}' within {:?}",
                node.id, wire, self.timeout
            ))),
        }
    }

    /// Fans `command` out to `nodes`, turns each reply into a `T` with
    /// `extract` and sums the successes with `merge`. A reply that does not
    /// extract fails only its own node.
    pub async fn collect_on<T, E, M>(
        &self,
        nodes: &[Node],
        command: &AdminCommand,
        extract: E,
        merge: M,
    ) -> Aggregate<T>
    where
        T: Default,
        E: Fn(AdminReply) -> std::result::Result<T, String>,
        M: Fn(T, T) -> T,
    {
        self.collect_raw_on(
            nodes,
            command,
            |raw: &str| AdminReply::parse(raw).and_then(&extract),
            merge,
        )
        .await
    }

    /// Like [`collect_on`](Self::collect_on), with `extract` seeing the raw
    /// reply body.
    async fn collect_raw_on<T, E, M>(
        &self,
        nodes: &[Node],
        command: &AdminCommand,
        extract: E,
        merge: M,
    ) -> Aggregate<T>
    where
        T: Default,
        E: Fn(&str) -> std::result::Result<T, String>,
        M: Fn(T, T) -> T,
    {
        let wire = command.to_wire();
        let mut value = T::default();
        let mut succeeded = Vec::new();
        let mut failed = Vec::new();

        for NodeResponse { node, reply } in self.fan_out(nodes, command).await {
            let outcome = reply.and_then(|raw| {
                extract(&raw).map_err(|reason| Error::AdminCommandFailed {
                        node: node.id.clone(),
                        command: wire.clone(),
                        reason,
                    })
            });

            match outcome {
                Ok(part) => {
                    value = merge(value, part);
                    succeeded.push(node.id);
                }
                Err(error) => {
                    warn!("Node {} failed '{}': {}", node.id, wire, error);
                    failed.push(NodeFailure::new(node.id, error));
                }
            }
        }

        Aggregate::from_parts(value, succeeded, failed)
    }

    pub async fn collect<T, E, M>(&self, command: &AdminCommand, extract: E, merge: M) -> Result<Aggregate<T>>
    where
        T: Default,
        E: Fn(AdminReply) -> std::result::Result<T, String>,
        M: Fn(T, T) -> T,
    {
        let nodes = self.discover().await?;
        Ok(self.collect_on(&nodes, command, extract, merge).await)
    }

    /// Deletes the whole set on every node. Reply bodies are ignored; only
    /// delivery and error replies count.
    pub async fn delete_set(&self, namespace: &str, set: &str) -> Result<Aggregate<()>> {
        let nodes = self.discover().await?;
        Ok(self
            .collect_raw_on(
                &nodes,
                &AdminCommand::delete_set(namespace, set),
                |raw: &str| AdminReply::reject_error(raw).map(|_| ()),
                |_, _| (),
            )
            .await)
    }

    /// Sum of per-node object counts of the set.
    pub async fn object_count(&self, namespace: &str, set: &str) -> Result<Aggregate<u64>> {
        self.collect(
            &AdminCommand::set_stats(namespace, set),
            |reply| match reply {
                AdminReply::Fields(info) => info.object_count(),
                AdminReply::Empty => Ok(0),
                AdminReply::Ack => Err("Expected set statistics, got a bare ack".to_string()),
            },
            |total, count| total + count,
        )
        .await
    }
}

impl std::fmt::Debug for AdminAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminAggregator")
            .field("timeout", &self.timeout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{Scripted, ScriptedCluster};

    fn aggregator(cluster: ScriptedCluster) -> (Arc<ScriptedCluster>, AdminAggregator) {
        let cluster = Arc::new(cluster);
        let aggregator = AdminAggregator::new(cluster.clone(), Duration::from_millis(100));
        (cluster, aggregator)
    }

    #[tokio::test]
    async fn test_object_count_sums_all_nodes() {
        let (_, admin) = aggregator(ScriptedCluster::new(vec![
            ("A", Scripted::reply("objects=3:tombstones=0")),
            ("B", Scripted::reply("n_objects=4")),
            ("C", Scripted::reply("")),
        ]));

        match admin.object_count("test", "flights").await.unwrap() {
            Aggregate::Complete { value, nodes } => {
                assert_eq!(value, 7);
                assert_eq!(nodes.len(), 3);
            }
            other => panic!("Expected complete, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_node_fails_alone() {
        let (_, admin) = aggregator(ScriptedCluster::new(vec![
            ("A", Scripted::reply("objects=3")),
            ("B", Scripted::reply("objects")),
            ("C", Scripted::reply("objects=5")),
        ]));

        match admin.object_count("test", "flights").await.unwrap() {
            Aggregate::Partial {
                value,
                succeeded,
                failed,
            } => {
                assert_eq!(value, 8);
                assert_eq!(succeeded, vec![NodeId::from("A"), NodeId::from("C")]);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].node, NodeId::from("B"));
                assert!(matches!(failed[0].error, Error::AdminCommandFailed { .. }));
            }
            other => panic!("Expected partial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_hung_node_times_out_without_blocking_others() {
        let (_, admin) = aggregator(ScriptedCluster::new(vec![
            ("A", Scripted::reply("ok")),
            ("B", Scripted::Hang),
        ]));

        let aggregate = admin.delete_set("test", "flights").await.unwrap();
        let failed = aggregate.failed();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].node, NodeId::from("B"));
        assert!(matches!(failed[0].error, Error::StoreTimeout(_)));
    }

    #[tokio::test]
    async fn test_error_reply_is_node_failure() {
        let (_, admin) = aggregator(ScriptedCluster::new(vec![
            ("A", Scripted::reply("ERROR::bad-namespace")),
            ("B", Scripted::Fail(Error::StoreUnavailable("B down".to_string()))),
        ]));

        let aggregate = admin.delete_set("nope", "flights").await.unwrap();
        assert!(matches!(aggregate, Aggregate::Failed { ref failed } if failed.len() == 2));
        assert!(matches!(
            aggregate.into_result(|_| None),
            Err(Error::ClusterFailure(failures)) if failures.len() == 2
        ));
    }

    #[tokio::test]
    async fn test_delete_set_sends_wire_command_to_every_node() {
        let (cluster, admin) = aggregator(ScriptedCluster::new(vec![
            ("A", Scripted::reply("ok")),
            ("B", Scripted::reply("ok")),
        ]));

        assert!(admin.delete_set("test", "flights").await.unwrap().is_complete());
        let sent = cluster.commands();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(_, cmd)| {
            cmd == "set-config:context=namespace;id=test;set=flights;set-delete=true;"
        }));
    }

    #[tokio::test]
    async fn test_delete_set_accepts_any_non_error_body() {
        let (_, admin) = aggregator(ScriptedCluster::new(vec![
            ("A", Scripted::reply("done")),
            ("B", Scripted::reply("")),
            ("C", Scripted::reply("ERROR:4:set not found")),
        ]));

        match admin.delete_set("test", "flights").await.unwrap() {
            Aggregate::Partial { succeeded, failed, .. } => {
                assert_eq!(succeeded, vec![NodeId::from("A"), NodeId::from("B")]);
                assert_eq!(failed.len(), 1);
                assert_eq!(failed[0].node, NodeId::from("C"));
            }
            other => panic!("Expected partial, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_empty_cluster_is_unavailable() {
        let (_, admin) = aggregator(ScriptedCluster::new(vec![]));
        assert!(matches!(
            admin.object_count("test", "flights").await,
            Err(Error::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_partial_into_result_keeps_count() {
        let (_, admin) = aggregator(ScriptedCluster::new(vec![
            ("A", Scripted::reply("objects=10")),
            ("B", Scripted::Fail(Error::StoreUnavailable("B down".to_string()))),
        ]));

        let err = admin
            .object_count("test", "flights")
            .await
            .unwrap()
            .into_result(|count| Some(*count))
            .unwrap_err();
        match err {
            Error::PartialFailure(partial) => {
                assert_eq!(partial.partial_count, Some(10));
                assert_eq!(partial.succeeded, vec![NodeId::from("A")]);
                assert_eq!(partial.failed_nodes().collect::<Vec<_>>(), vec![&NodeId::from("B")]);
            }
            other => panic!("Expected partial failure, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_collect_on_retries_only_given_nodes() {
        let (cluster, admin) = aggregator(ScriptedCluster::new(vec![
            ("A", Scripted::reply("objects=1")),
            ("B", Scripted::reply("objects=2")),
        ]));
        let nodes = admin.discover().await.unwrap();
        let only_b = &nodes[1..];

        let aggregate = admin
            .collect_on(
                only_b,
                &AdminCommand::set_stats("test", "flights"),
                |reply| match reply {
                    AdminReply::Fields(info) => info.object_count(),
                    _ => Err("no fields".to_string()),
                },
                |a, b| a + b,
            )
            .await;
        assert!(matches!(aggregate, Aggregate::Complete { value: 2, .. }));
        assert_eq!(cluster.commands(), vec![(NodeId::from("B"), "sets/test/flights".to_string())]);
    }
}
