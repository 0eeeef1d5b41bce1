use crate::{Error, NodeId};
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

type Cause = Arc<dyn StdError + Send + Sync>;

/// Why an upstream fetch did not produce a document.
#[derive(thiserror::Error, Debug, Clone)]
pub enum FetchError {
    #[error("transport error: {0}")]
    Transport(#[source] Cause),
    #[error("request timed out")]
    Timeout,
    #[error("upstream returned status {0}")]
    Status(u16),
    #[error("malformed body: {reason}")]
    Malformed {
        reason: String,
        #[source]
        source: Option<Cause>,
    },
    #[error("fetch was cancelled")]
    Cancelled,
}

impl FetchError {
    pub fn transport(err: impl StdError + Send + Sync + 'static) -> Self {
        FetchError::Transport(Arc::new(err))
    }

    pub fn malformed(reason: impl Into<String>) -> Self {
        FetchError::Malformed {
            reason: reason.into(),
            source: None,
        }
    }

    pub fn malformed_by(reason: impl Into<String>, err: impl StdError + Send + Sync + 'static) -> Self {
        FetchError::Malformed {
            reason: reason.into(),
            source: Some(Arc::new(err)),
        }
    }

    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Transport(_) | FetchError::Timeout | FetchError::Cancelled => true,
            FetchError::Status(code) => *code == 429 || *code >= 500,
            FetchError::Malformed { .. } => false,
        }
    }
}

/// One node's share of a failed cluster-wide operation.
#[derive(Debug, Clone)]
pub struct NodeFailure {
    pub node: NodeId,
    pub error: Error,
}

impl NodeFailure {
    pub fn new(node: NodeId, error: Error) -> Self {
        Self { node, error }
    }
}

impl fmt::Display for NodeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.node, self.error)
    }
}

/// A cluster-wide operation that reached some nodes but not all of them.
/// Carries enough detail to retry only the nodes in `failed`.
#[derive(Debug, Clone)]
pub struct PartialFailure {
    pub succeeded: Vec<NodeId>,
    pub failed: Vec<NodeFailure>,
    /// Sum over the succeeded nodes, for counting operations.
    pub partial_count: Option<u64>,
}

impl PartialFailure {
    pub fn failed_nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.failed.iter().map(|f| &f.node)
    }
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.succeeded.len() + self.failed.len();
        write!(f, "{}/{} nodes succeeded", self.succeeded.len(), total)?;
        if let Some(count) = self.partial_count {
            write!(f, " (partial count {count})")?;
        }
        write!(f, "; failed: {}", describe(&self.failed))
    }
}

pub(crate) fn describe(failures: &[NodeFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_error_transience() {
        assert!(FetchError::Timeout.is_transient());
        assert!(FetchError::Status(503).is_transient());
        assert!(FetchError::Status(429).is_transient());
        assert!(!FetchError::Status(404).is_transient());
        assert!(!FetchError::malformed("not json").is_transient());
    }

    #[test]
    fn test_fetch_error_keeps_cause() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = Error::SourceFetchFailed {
            identifier: "IAD".to_string(),
            cause: FetchError::transport(io),
        };

        let cause = err.source().expect("fetch cause");
        let transport = cause.source().expect("transport cause");
        assert_eq!(transport.to_string(), "refused");
    }

    #[test]
    fn test_partial_failure_display_names_failed_nodes() {
        let partial = PartialFailure {
            succeeded: vec![NodeId::from("A1"), NodeId::from("A2")],
            failed: vec![NodeFailure::new(
                NodeId::from("A3"),
                Error::StoreTimeout("A3".to_string()),
            )],
            partial_count: Some(7),
        };

        let text = partial.to_string();
        assert!(text.starts_with("2/3 nodes succeeded (partial count 7)"));
        assert!(text.contains("A3: store timed out"));
        assert_eq!(partial.failed_nodes().collect::<Vec<_>>(), vec![&NodeId::from("A3")]);
    }
}
