//! Generator configuration.

use std::time::Duration;

use kthrees_proxy::Proxy;
use kthrees_proxy::proxy::{ETCD_CLIENT_PORT, NAMESPACE_SYSTEM};

use crate::pods::ETCD_PROXY_SELECTOR;

/// Where to find the proxy pods and how long to wait on etcd.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorConfig {
    /// Namespace of the etcd-proxy pods.
    pub namespace: String,
    /// Label selector matching the etcd-proxy pods.
    pub label_selector: String,
    /// Etcd client port inside each proxy pod.
    pub etcd_port: u16,
    /// Upper bound for establishing one etcd connection.
    pub dial_timeout: Duration,
    /// Upper bound for a single etcd call.
    pub call_timeout: Duration,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            namespace: NAMESPACE_SYSTEM.to_string(),
            label_selector: ETCD_PROXY_SELECTOR.to_string(),
            etcd_port: ETCD_CLIENT_PORT,
            dial_timeout: Duration::from_secs(10),
            call_timeout: Duration::from_secs(15),
        }
    }
}

impl GeneratorConfig {
    pub fn with_timeouts(mut self, dial_timeout: Duration, call_timeout: Duration) -> Self {
        self.dial_timeout = dial_timeout;
        self.call_timeout = call_timeout;
        self
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn with_label_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = selector.into();
        self
    }

    pub fn with_etcd_port(mut self, port: u16) -> Self {
        self.etcd_port = port;
        self
    }

    /// Tunnel target for this configuration.
    pub fn proxy(&self) -> Proxy {
        Proxy::pods(self.namespace.clone(), self.etcd_port)
    }
}
