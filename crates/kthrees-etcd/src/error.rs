//! Error types for etcd client generation.
//!
//! Per-node failures (`Connection`, `MemberQuery`, `ProxyPodNotFound`)
//! are collected while walking the candidate list and only surface as
//! one `AggregateError` once every candidate has been tried. Everything
//! else aborts the call immediately.

use std::fmt;

use thiserror::Error;

/// Result type alias for client generation.
pub type ClientResult<T> = Result<T, ClientError>;

/// Coarse classification of a `ClientError`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A single node or its proxy could not be reached or queried.
    Connectivity,
    /// The proxy pod inventory could not be built.
    Inventory,
    /// A node has no proxy pod.
    NotFound,
    /// Etcd reported a state that contradicts the known nodes.
    Inconsistency,
    /// The caller passed an unusable argument.
    InvalidArgument,
    /// Several per-node failures, wrapped after exhausting the candidates.
    Aggregate,
}

/// Failures while building the proxy pod inventory.
#[derive(Debug, Error)]
pub enum InventoryError {
    #[error("unable to list etcd-proxy pods in target cluster: {0}")]
    List(#[source] anyhow::Error),

    #[error("there isn't any etcd-proxy pods in target cluster")]
    Empty,
}

/// Errors returned by `EtcdClientGenerator`.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error(transparent)]
    Inventory(#[from] InventoryError),

    #[error("unable to find etcd proxy pod for node {node}")]
    ProxyPodNotFound { node: String },

    #[error("failed to connect to etcd node {node} via pod {pod}: {source:#}")]
    Connection {
        node: String,
        pod: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("failed to list etcd members via node {node}: {source:#}")]
    MemberQuery {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("etcd leader is reported as {leader_id:x}, but we couldn't find any matching member (queried via node {queried_node})")]
    LeaderNotInMembers { leader_id: u64, queried_node: String },

    #[error("etcd leader is reported as {leader_id:x} with node name {node_name:?}, but we couldn't find a corresponding Node in the cluster")]
    LeaderNodeNotCandidate { leader_id: u64, node_name: String },

    #[error("failed to connect to etcd leader {leader_id:x} on node {node}: {source}")]
    LeaderUnreachable {
        leader_id: u64,
        node: String,
        #[source]
        source: Box<ClientError>,
    },

    #[error("could not establish a connection to any node: {0}")]
    NoAvailableNode(AggregateError),

    #[error("could not establish a connection to the etcd leader: {0}")]
    NoReachableLeader(AggregateError),
}

impl ClientError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) => ErrorKind::InvalidArgument,
            Self::Inventory(_) => ErrorKind::Inventory,
            Self::ProxyPodNotFound { .. } => ErrorKind::NotFound,
            Self::Connection { .. } | Self::MemberQuery { .. } | Self::LeaderUnreachable { .. } => {
                ErrorKind::Connectivity
            }
            Self::LeaderNotInMembers { .. } | Self::LeaderNodeNotCandidate { .. } => {
                ErrorKind::Inconsistency
            }
            Self::NoAvailableNode(_) | Self::NoReachableLeader(_) => ErrorKind::Aggregate,
        }
    }

    /// Whether the failure is scoped to one candidate, so the next
    /// candidate may still succeed.
    ///
    /// Failing to reach an already identified leader is not: the leader
    /// lives on one specific node.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ProxyPodNotFound { .. } | Self::Connection { .. } | Self::MemberQuery { .. }
        )
    }

    /// The wrapped per-node failures, if this is an exhaustion error.
    pub fn causes(&self) -> Option<&AggregateError> {
        match self {
            Self::NoAvailableNode(agg) | Self::NoReachableLeader(agg) => Some(agg),
            _ => None,
        }
    }
}

/// Ordered collection of per-node failures.
#[derive(Debug, Default)]
pub struct AggregateError {
    errors: Vec<ClientError>,
}

impl AggregateError {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, err: ClientError) {
        self.errors.push(err);
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    /// Iterate the failures in the order they were recorded.
    pub fn iter(&self) -> std::slice::Iter<'_, ClientError> {
        self.errors.iter()
    }

    pub fn into_inner(self) -> Vec<ClientError> {
        self.errors
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.errors.as_slice() {
            [] => f.write_str("no errors recorded"),
            [only] => write!(f, "{only}"),
            errors => {
                f.write_str("[")?;
                for (i, err) in errors.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{err}")?;
                }
                f.write_str("]")
            }
        }
    }
}

impl std::error::Error for AggregateError {}

impl<'a> IntoIterator for &'a AggregateError {
    type Item = &'a ClientError;
    type IntoIter = std::slice::Iter<'a, ClientError>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl FromIterator<ClientError> for AggregateError {
    fn from_iter<I: IntoIterator<Item = ClientError>>(iter: I) -> Self {
        Self {
            errors: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn not_found(node: &str) -> ClientError {
        ClientError::ProxyPodNotFound {
            node: node.to_string(),
        }
    }

    #[test]
    fn classification() {
        assert_eq!(
            ClientError::InvalidArgument("x").kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            ClientError::from(InventoryError::Empty).kind(),
            ErrorKind::Inventory
        );
        assert_eq!(not_found("n1").kind(), ErrorKind::NotFound);
        assert_eq!(
            ClientError::LeaderNotInMembers {
                leader_id: 1,
                queried_node: "n1".to_string(),
            }
            .kind(),
            ErrorKind::Inconsistency
        );
    }

    #[test]
    fn only_per_node_failures_are_retryable() {
        assert!(not_found("n1").is_retryable());
        assert!(
            ClientError::MemberQuery {
                node: "n1".to_string(),
                source: anyhow::anyhow!("deadline exceeded"),
            }
            .is_retryable()
        );
        assert!(!ClientError::from(InventoryError::Empty).is_retryable());
        assert!(
            !ClientError::LeaderUnreachable {
                leader_id: 1,
                node: "n1".to_string(),
                source: Box::new(not_found("n1")),
            }
            .is_retryable()
        );
        assert!(
            !ClientError::LeaderNodeNotCandidate {
                leader_id: 1,
                node_name: "n9".to_string(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn aggregate_preserves_order() {
        let agg: AggregateError = vec![not_found("a"), not_found("b")].into_iter().collect();
        let nodes: Vec<String> = agg
            .iter()
            .map(|e| match e {
                ClientError::ProxyPodNotFound { node } => node.clone(),
                other => panic!("unexpected {other}"),
            })
            .collect();
        assert_eq!(nodes, vec!["a", "b"]);
    }

    #[test]
    fn aggregate_display() {
        let mut agg = AggregateError::new();
        assert_eq!(agg.to_string(), "no errors recorded");

        agg.push(not_found("a"));
        assert_eq!(agg.to_string(), "unable to find etcd proxy pod for node a");

        agg.push(not_found("b"));
        assert_eq!(
            agg.to_string(),
            "[unable to find etcd proxy pod for node a, unable to find etcd proxy pod for node b]"
        );
    }

    #[test]
    fn exhaustion_messages_carry_label() {
        let err = ClientError::NoReachableLeader(vec![not_found("a")].into_iter().collect());
        assert!(
            err.to_string()
                .starts_with("could not establish a connection to the etcd leader")
        );
        assert_eq!(err.causes().map(AggregateError::len), Some(1));
    }

    #[test]
    fn leader_id_rendered_as_hex() {
        let err = ClientError::LeaderNodeNotCandidate {
            leader_id: 0xabc,
            node_name: "cp-3".to_string(),
        };
        assert!(err.to_string().contains("abc"));
        assert!(err.to_string().contains("\"cp-3\""));
    }
}
