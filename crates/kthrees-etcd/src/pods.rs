//! Proxy pod inventory — which etcd-proxy pod serves which node.
//!
//! The inventory is listed once, on first use, and cached in an
//! `EtcdPodMap` for the lifetime of its owner. It is not refreshed when
//! proxy pods are rescheduled afterwards; callers that know the pods
//! moved can `invalidate` or `rebuild` the map explicitly.

use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Pod;
use kube::Api;
use kube::api::ListParams;
use tracing::{debug, info, warn};

use crate::error::{ClientError, ClientResult, InventoryError};

/// Label selector matching the etcd-proxy pods.
pub const ETCD_PROXY_SELECTOR: &str = "app=etcd-proxy";

/// A proxy pod and the node it is scheduled on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyPod {
    pub node_name: String,
    pub pod_name: String,
}

/// Lists the proxy pods of the target cluster.
#[async_trait]
pub trait PodInventory: Send + Sync {
    async fn list_proxy_pods(&self) -> anyhow::Result<Vec<ProxyPod>>;
}

/// `PodInventory` backed by the Kubernetes API.
pub struct KubePodInventory {
    pods: Api<Pod>,
    params: ListParams,
}

impl KubePodInventory {
    pub fn new(client: kube::Client, namespace: &str, label_selector: &str) -> Self {
        Self {
            pods: Api::namespaced(client, namespace),
            params: ListParams::default().labels(label_selector),
        }
    }
}

#[async_trait]
impl PodInventory for KubePodInventory {
    async fn list_proxy_pods(&self) -> anyhow::Result<Vec<ProxyPod>> {
        let list = self
            .pods
            .list(&self.params)
            .await
            .context("pod list request failed")?;

        let mut pods = Vec::with_capacity(list.items.len());
        for pod in list.items {
            let pod_name = pod.metadata.name;
            let node_name = pod.spec.and_then(|s| s.node_name);
            match (node_name, pod_name) {
                (Some(node_name), Some(pod_name)) => pods.push(ProxyPod {
                    node_name,
                    pod_name,
                }),
                (None, Some(pod_name)) => {
                    debug!(pod = %pod_name, "skipping unscheduled etcd-proxy pod");
                }
                _ => {}
            }
        }
        Ok(pods)
    }
}

/// Cached node name → proxy pod name mapping.
///
/// Built at most once until invalidated. Mutation requires `&mut self`,
/// so concurrent users must wrap the owner in a lock.
#[derive(Debug, Default)]
pub struct EtcdPodMap {
    pods: Option<HashMap<String, String>>,
}

impl EtcdPodMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the inventory has been listed.
    pub fn is_built(&self) -> bool {
        self.pods.is_some()
    }

    /// Number of cached nodes (zero before the first build).
    pub fn len(&self) -> usize {
        self.pods.as_ref().map_or(0, HashMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Build the map from `inventory` unless it is already built.
    pub async fn ensure(&mut self, inventory: &dyn PodInventory) -> ClientResult<()> {
        if self.pods.is_none() {
            self.rebuild(inventory).await?;
        }
        Ok(())
    }

    /// List the inventory and replace the cached map.
    ///
    /// On failure the previous map, if any, is kept.
    pub async fn rebuild(&mut self, inventory: &dyn PodInventory) -> ClientResult<()> {
        let pods = inventory
            .list_proxy_pods()
            .await
            .map_err(InventoryError::List)?;

        if pods.is_empty() {
            warn!("no etcd-proxy pods found in target cluster");
            return Err(InventoryError::Empty.into());
        }

        let map: HashMap<String, String> = pods
            .into_iter()
            .map(|p| (p.node_name, p.pod_name))
            .collect();

        info!(nodes = map.len(), "etcd-proxy pod map built");
        self.pods = Some(map);
        Ok(())
    }

    /// Drop the cached map; the next `ensure` lists again.
    pub fn invalidate(&mut self) {
        if self.pods.take().is_some() {
            debug!("etcd-proxy pod map invalidated");
        }
    }

    /// Look up the proxy pod for `node`.
    ///
    /// Fails with `ProxyPodNotFound` on a miss, including when the map
    /// has not been built yet.
    pub fn resolve(&self, node: &str) -> ClientResult<&str> {
        self.pods
            .as_ref()
            .and_then(|m| m.get(node))
            .map(String::as_str)
            .ok_or_else(|| ClientError::ProxyPodNotFound {
                node: node.to_string(),
            })
    }

    /// Snapshot of the cached entries, sorted by node name.
    pub fn entries(&self) -> Vec<ProxyPod> {
        let mut entries: Vec<ProxyPod> = self
            .pods
            .iter()
            .flatten()
            .map(|(node, pod)| ProxyPod {
                node_name: node.clone(),
                pod_name: pod.clone(),
            })
            .collect();
        entries.sort_by(|a, b| a.node_name.cmp(&b.node_name));
        entries
    }
}
