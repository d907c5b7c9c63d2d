//! Forwarding target descriptor.

/// Namespace holding the etcd-proxy pods on k3s control plane nodes.
pub const NAMESPACE_SYSTEM: &str = "kube-system";

/// Client port of the etcd member behind each proxy pod.
pub const ETCD_CLIENT_PORT: u16 = 2379;

/// Describes which pod port a tunnel should reach. Tunnels always target
/// pods through the core `pods/portforward` subresource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Proxy {
    /// Namespace of the target pods.
    pub namespace: String,
    /// Remote port inside the pod.
    pub port: u16,
}

impl Proxy {
    /// A proxy targeting `port` on pods in `namespace`.
    pub fn pods(namespace: impl Into<String>, port: u16) -> Self {
        Self {
            namespace: namespace.into(),
            port,
        }
    }
}

impl Default for Proxy {
    fn default() -> Self {
        Self::pods(NAMESPACE_SYSTEM, ETCD_CLIENT_PORT)
    }
}
