//! Loopback bridge onto the Kubernetes port-forward subresource.
//!
//! `PortForwarder::open` binds an ephemeral listener on 127.0.0.1 and
//! returns its address. Each connection accepted there gets its own
//! port-forward stream to the target pod, and bytes are copied in both
//! directions until either side closes. Dropping the returned
//! `ForwardedEndpoint` stops the listener and every live bridge.

use std::net::{Ipv4Addr, SocketAddr};

use k8s_openapi::api::core::v1::Pod;
use kube::{Api, Client};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, warn};

use crate::proxy::Proxy;

/// Errors raised while opening or serving a tunnel.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("unable to bind local tunnel listener: {0}")]
    Bind(#[source] std::io::Error),

    #[error("unable to get proxy pod {pod}: {source}")]
    Lookup {
        pod: String,
        #[source]
        source: kube::Error,
    },

    #[error("proxy pod {pod} is not running (phase: {phase})")]
    PodNotRunning { pod: String, phase: String },

    #[error("unable to port-forward to pod {pod}: {source}")]
    Forward {
        pod: String,
        #[source]
        source: kube::Error,
    },

    #[error("port-forward to pod {pod} has no stream for port {port}")]
    StreamUnavailable { pod: String, port: u16 },

    #[error("tunnel i/o error: {0}")]
    Io(#[source] std::io::Error),
}

/// Opens tunnels to pod ports through the Kubernetes API server.
#[derive(Clone)]
pub struct PortForwarder {
    pods: Api<Pod>,
    port: u16,
}

impl PortForwarder {
    /// Create a forwarder for the pods and port described by `proxy`.
    pub fn new(client: Client, proxy: &Proxy) -> Self {
        Self {
            pods: Api::namespaced(client, &proxy.namespace),
            port: proxy.port,
        }
    }

    /// Expose the proxy port of `pod_name` on a local loopback address.
    ///
    /// The pod must exist and be running; the port-forward itself is
    /// established lazily, once per accepted connection.
    pub async fn open(&self, pod_name: &str) -> Result<ForwardedEndpoint, ProxyError> {
        let pod = self.pods.get(pod_name).await.map_err(|source| ProxyError::Lookup {
            pod: pod_name.to_string(),
            source,
        })?;

        let phase = pod
            .status
            .and_then(|s| s.phase)
            .unwrap_or_else(|| "Unknown".to_string());
        if phase != "Running" {
            return Err(ProxyError::PodNotRunning {
                pod: pod_name.to_string(),
                phase,
            });
        }

        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .map_err(ProxyError::Bind)?;
        let local_addr = listener.local_addr().map_err(ProxyError::Bind)?;

        let task = tokio::spawn(accept_loop(
            listener,
            self.pods.clone(),
            pod_name.to_string(),
            self.port,
        ));

        debug!(pod = pod_name, port = self.port, %local_addr, "tunnel listener opened");
        Ok(ForwardedEndpoint::new(pod_name.to_string(), local_addr, task))
    }
}

/// A local address that tunnels to one pod port.
#[derive(Debug)]
pub struct ForwardedEndpoint {
    pod: String,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ForwardedEndpoint {
    pub(crate) fn new(pod: String, local_addr: SocketAddr, task: JoinHandle<()>) -> Self {
        Self {
            pod,
            local_addr,
            task,
        }
    }

    /// Name of the pod at the far end of the tunnel.
    pub fn pod(&self) -> &str {
        &self.pod
    }

    /// Loopback address accepting tunnel connections.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL for dialing the tunnel with the given scheme.
    pub fn url(&self, scheme: &str) -> String {
        format!("{scheme}://{}", self.local_addr)
    }
}

impl Drop for ForwardedEndpoint {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn accept_loop(listener: TcpListener, pods: Api<Pod>, pod: String, port: u16) {
    // Aborting this task drops the set, which aborts every live bridge.
    let mut bridges = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((socket, peer)) => {
                    debug!(%pod, %peer, "tunnel connection accepted");
                    bridges.spawn(serve_connection(socket, pods.clone(), pod.clone(), port));
                }
                Err(e) => {
                    warn!(%pod, error = %e, "tunnel listener failed");
                    break;
                }
            },
            Some(_) = bridges.join_next(), if !bridges.is_empty() => {}
        }
    }
}

async fn serve_connection(mut socket: TcpStream, pods: Api<Pod>, pod: String, port: u16) {
    if let Err(e) = bridge(&mut socket, &pods, &pod, port).await {
        warn!(%pod, port, error = %e, "tunnel connection failed");
    }
}

async fn bridge(
    socket: &mut TcpStream,
    pods: &Api<Pod>,
    pod: &str,
    port: u16,
) -> Result<(), ProxyError> {
    let mut forwarder = pods
        .portforward(pod, &[port])
        .await
        .map_err(|source| ProxyError::Forward {
            pod: pod.to_string(),
            source,
        })?;

    let mut upstream = forwarder
        .take_stream(port)
        .ok_or_else(|| ProxyError::StreamUnavailable {
            pod: pod.to_string(),
            port,
        })?;

    let (sent, received) = tokio::io::copy_bidirectional(socket, &mut upstream)
        .await
        .map_err(ProxyError::Io)?;

    drop(upstream);
    if let Err(e) = forwarder.join().await {
        debug!(pod, error = %e, "port-forward ended with error");
    }

    debug!(pod, sent, received, "tunnel connection closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn endpoint_url_uses_local_address() {
        let addr: SocketAddr = "127.0.0.1:40123".parse().unwrap();
        let endpoint = ForwardedEndpoint::new(
            "etcd-proxy-abc".to_string(),
            addr,
            tokio::spawn(async {}),
        );

        assert_eq!(endpoint.pod(), "etcd-proxy-abc");
        assert_eq!(endpoint.local_addr(), addr);
        assert_eq!(endpoint.url("https"), "https://127.0.0.1:40123");
    }

    #[tokio::test]
    async fn dropping_endpoint_stops_listener_task() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let task = tokio::spawn(async move {
            let _tx = tx;
            std::future::pending::<()>().await;
        });

        let endpoint = ForwardedEndpoint::new(
            "etcd-proxy-abc".to_string(),
            "127.0.0.1:1".parse().unwrap(),
            task,
        );
        drop(endpoint);

        // The sender is dropped once the aborted task is torn down.
        assert!(rx.await.is_err());
    }

    #[test]
    fn error_messages_name_the_pod() {
        let err = ProxyError::PodNotRunning {
            pod: "etcd-proxy-x".to_string(),
            phase: "Pending".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "proxy pod etcd-proxy-x is not running (phase: Pending)"
        );

        let err = ProxyError::StreamUnavailable {
            pod: "etcd-proxy-x".to_string(),
            port: 2379,
        };
        assert!(err.to_string().contains("2379"));
    }
}
