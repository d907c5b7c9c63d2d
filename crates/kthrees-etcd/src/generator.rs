//! Etcd client generator — connects to members behind etcd-proxy pods.
//!
//! Two resolution strategies walk an ordered list of candidate nodes:
//!
//! - `for_first_available_node` returns a client for the first node
//!   whose member can be reached.
//! - `for_leader` asks each reachable member who the leader is and
//!   returns a client connected to the leader's node.
//!
//! Per-node failures (no proxy pod, dial error, failed member query) are
//! recorded and the next candidate is tried. A member list that does not
//! contain the reported leader, or a leader running on a node outside the
//! candidate list, means the cluster is in an inconsistent state; that is
//! returned immediately without trying further candidates.
//!
//! Candidates are tried one at a time, in order, with no delay between
//! attempts. The overall deadline is the caller's: drop the future or
//! wrap it in `tokio::time::timeout`.

use std::collections::HashSet;

use kthrees_proxy::PortForwarder;
use tracing::{debug, info, warn};

use crate::client::{ClientFactory, EtcdClient, ProxiedClientFactory};
use crate::config::GeneratorConfig;
use crate::error::{AggregateError, ClientError, ClientResult};
use crate::pods::{EtcdPodMap, KubePodInventory, PodInventory, ProxyPod};
use crate::tls::TlsMaterial;

/// Generates etcd clients connected to the members on specific control
/// plane nodes.
///
/// Resolution methods take `&mut self` because the first call builds the
/// proxy pod map; share a generator between tasks behind a
/// `tokio::sync::Mutex`.
pub struct EtcdClientGenerator<F: ClientFactory = ProxiedClientFactory> {
    factory: F,
    inventory: Box<dyn PodInventory>,
    pod_map: EtcdPodMap,
}

impl EtcdClientGenerator<ProxiedClientFactory> {
    /// Create a generator for the cluster reachable through `client`,
    /// using the default etcd-proxy layout.
    pub fn new(
        client: kube::Client,
        tls: Option<&TlsMaterial>,
        dial_timeout: std::time::Duration,
        call_timeout: std::time::Duration,
    ) -> Self {
        let config = GeneratorConfig::default().with_timeouts(dial_timeout, call_timeout);
        Self::with_config(client, tls, &config)
    }

    /// Create a generator with a custom proxy layout.
    pub fn with_config(
        client: kube::Client,
        tls: Option<&TlsMaterial>,
        config: &GeneratorConfig,
    ) -> Self {
        let forwarder = PortForwarder::new(client.clone(), &config.proxy());
        let factory = ProxiedClientFactory::new(
            forwarder,
            tls.map(TlsMaterial::to_tls_options),
            config.dial_timeout,
            config.call_timeout,
        );
        let inventory =
            KubePodInventory::new(client, &config.namespace, &config.label_selector);
        Self::with_factory(factory, inventory)
    }
}

impl<F: ClientFactory> EtcdClientGenerator<F> {
    /// Create a generator from explicit strategies.
    pub fn with_factory(factory: F, inventory: impl PodInventory + 'static) -> Self {
        Self {
            factory,
            inventory: Box::new(inventory),
            pod_map: EtcdPodMap::new(),
        }
    }

    /// The cached proxy pod map.
    pub fn pod_map(&self) -> &EtcdPodMap {
        &self.pod_map
    }

    /// Forget the cached proxy pod map; the next resolution lists again.
    pub fn invalidate_pods(&mut self) {
        self.pod_map.invalidate();
    }

    /// Re-list the proxy pods now.
    pub async fn refresh_pods(&mut self) -> ClientResult<()> {
        self.pod_map.rebuild(&*self.inventory).await
    }

    /// The proxy pods known to this generator, building the map if needed.
    pub async fn proxy_pods(&mut self) -> ClientResult<Vec<ProxyPod>> {
        self.pod_map.ensure(&*self.inventory).await?;
        Ok(self.pod_map.entries())
    }

    /// Return a client for the first node in `nodes` that connects.
    pub async fn for_first_available_node<S: AsRef<str>>(
        &mut self,
        nodes: &[S],
    ) -> ClientResult<F::Client> {
        if nodes.is_empty() {
            return Err(ClientError::InvalidArgument(
                "for_first_available_node can't be called with an empty list of nodes",
            ));
        }

        self.pod_map.ensure(&*self.inventory).await?;

        let mut errors = AggregateError::new();
        for node in nodes {
            let node = node.as_ref();
            match self.connect_node(node).await {
                Ok(client) => {
                    info!(node, pod = client.endpoint(), "connected to etcd node");
                    return Ok(client);
                }
                Err(err) => {
                    warn!(node, error = %err, "etcd node unavailable, trying next candidate");
                    errors.push(err);
                }
            }
        }

        Err(ClientError::NoAvailableNode(errors))
    }

    /// Return a client connected to the etcd leader.
    ///
    /// The leader's node must be one of `nodes`.
    pub async fn for_leader<S: AsRef<str>>(&mut self, nodes: &[S]) -> ClientResult<F::Client> {
        if nodes.is_empty() {
            return Err(ClientError::InvalidArgument(
                "for_leader can't be called with an empty list of nodes",
            ));
        }

        self.pod_map.ensure(&*self.inventory).await?;

        let candidates: HashSet<&str> = nodes.iter().map(|n| n.as_ref()).collect();

        let mut errors = AggregateError::new();
        for node in nodes {
            let node = node.as_ref();
            match self.leader_client(node, &candidates).await {
                Ok(client) => return Ok(client),
                Err(err) if err.is_retryable() => {
                    warn!(node, error = %err, "could not query etcd leader, trying next candidate");
                    errors.push(err);
                }
                Err(err) => return Err(err),
            }
        }

        Err(ClientError::NoReachableLeader(errors))
    }

    /// Ask the member on `node` for the leader, then connect to the
    /// leader's node.
    ///
    /// Only `Connection`, `ProxyPodNotFound` and `MemberQuery` errors from
    /// here are safe to skip over.
    async fn leader_client(
        &self,
        node: &str,
        candidates: &HashSet<&str>,
    ) -> ClientResult<F::Client> {
        let mut probe = self.connect_node(node).await?;

        let queried = probe.members().await;
        let leader_id = probe.leader_id();
        probe.close();

        let members = queried.map_err(|source| ClientError::MemberQuery {
            node: node.to_string(),
            source,
        })?;

        let leader = members
            .iter()
            .find(|m| m.id == leader_id)
            .ok_or_else(|| ClientError::LeaderNotInMembers {
                leader_id,
                queried_node: node.to_string(),
            })?;

        let leader_node = leader.node_name();
        if !candidates.contains(leader_node) {
            return Err(ClientError::LeaderNodeNotCandidate {
                leader_id,
                node_name: leader_node.to_string(),
            });
        }

        debug!(
            queried = node,
            leader = leader_node,
            leader_id = format!("{leader_id:x}"),
            "found etcd leader"
        );

        let client = self
            .connect_node(leader_node)
            .await
            .map_err(|source| ClientError::LeaderUnreachable {
                leader_id,
                node: leader_node.to_string(),
                source: Box::new(source),
            })?;

        info!(node = leader_node, pod = client.endpoint(), "connected to etcd leader");
        Ok(client)
    }

    /// Dial the member on a single node through its proxy pod.
    async fn connect_node(&self, node: &str) -> ClientResult<F::Client> {
        let pod = self.pod_map.resolve(node)?;
        debug!(node, pod, "connecting to etcd member");

        self.factory
            .create_client(pod)
            .await
            .map_err(|source| ClientError::Connection {
                node: node.to_string(),
                pod: pod.to_string(),
                source,
            })
    }
}
