//! Etcd client handles and the factory that opens them.
//!
//! `EtcdClientGenerator` never dials etcd itself: it asks a
//! `ClientFactory` for a handle to the member behind a proxy pod. The
//! production factory tunnels through the Kubernetes API; tests plug in
//! their own factory.

use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use etcd_client::{ConnectOptions, TlsOptions};
use kthrees_proxy::{ForwardedEndpoint, PortForwarder};
use tracing::debug;

use crate::member::Member;

/// An open connection to one etcd member.
///
/// Handles are exclusively owned. `close` consumes the handle; dropping
/// it without closing also releases the connection.
#[async_trait]
pub trait EtcdClient: Send {
    /// The endpoint this handle was created for (the proxy pod name).
    fn endpoint(&self) -> &str;

    /// Member ID of the leader, as reported when the handle was opened.
    fn leader_id(&self) -> u64;

    /// List the cluster members.
    async fn members(&mut self) -> anyhow::Result<Vec<Member>>;

    /// Release the connection.
    fn close(self)
    where
        Self: Sized;
}

/// Opens etcd client handles for an endpoint.
#[async_trait]
pub trait ClientFactory: Send + Sync {
    type Client: EtcdClient;

    async fn create_client(&self, endpoint: &str) -> anyhow::Result<Self::Client>;
}

/// Etcd client reached through a proxy pod tunnel.
pub struct ProxiedClient {
    endpoint: String,
    leader_id: u64,
    client: etcd_client::Client,
    call_timeout: Duration,
    // Declared last so the client is torn down before its tunnel.
    _tunnel: ForwardedEndpoint,
}

impl std::fmt::Debug for ProxiedClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxiedClient")
            .field("endpoint", &self.endpoint)
            .field("leader_id", &format_args!("{:x}", self.leader_id))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl EtcdClient for ProxiedClient {
    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn leader_id(&self) -> u64 {
        self.leader_id
    }

    async fn members(&mut self) -> anyhow::Result<Vec<Member>> {
        let resp = tokio::time::timeout(self.call_timeout, self.client.member_list())
            .await
            .map_err(|_| anyhow!("member list timed out after {:?}", self.call_timeout))?
            .context("member list failed")?;

        Ok(resp.members().iter().map(Member::from).collect())
    }

    fn close(self) {
        debug!(endpoint = %self.endpoint, "closing etcd client");
    }
}

/// Production `ClientFactory`: tunnels to the proxy pod and connects to
/// the etcd client port on the other side.
pub struct ProxiedClientFactory {
    forwarder: PortForwarder,
    tls: Option<TlsOptions>,
    dial_timeout: Duration,
    call_timeout: Duration,
}

impl ProxiedClientFactory {
    pub fn new(
        forwarder: PortForwarder,
        tls: Option<TlsOptions>,
        dial_timeout: Duration,
        call_timeout: Duration,
    ) -> Self {
        Self {
            forwarder,
            tls,
            dial_timeout,
            call_timeout,
        }
    }
}

#[async_trait]
impl ClientFactory for ProxiedClientFactory {
    type Client = ProxiedClient;

    async fn create_client(&self, endpoint: &str) -> anyhow::Result<ProxiedClient> {
        let tunnel = self
            .forwarder
            .open(endpoint)
            .await
            .with_context(|| format!("unable to open tunnel to etcd proxy pod {endpoint}"))?;

        let scheme = if self.tls.is_some() { "https" } else { "http" };
        let url = tunnel.url(scheme);

        let mut options = ConnectOptions::new()
            .with_connect_timeout(self.dial_timeout)
            .with_timeout(self.call_timeout);
        if let Some(tls) = &self.tls {
            options = options.with_tls(tls.clone());
        }

        let mut client = tokio::time::timeout(
            self.dial_timeout,
            etcd_client::Client::connect([url.as_str()], Some(options)),
        )
        .await
        .map_err(|_| anyhow!("dial to {url} timed out after {:?}", self.dial_timeout))?
        .with_context(|| format!("unable to create etcd client for pod {endpoint}"))?;

        // The leader ID is captured once per handle; resolvers open a fresh
        // handle for every attempt.
        let status = tokio::time::timeout(self.call_timeout, client.status())
            .await
            .map_err(|_| anyhow!("status call timed out after {:?}", self.call_timeout))?
            .with_context(|| format!("unable to get etcd status via pod {endpoint}"))?;

        debug!(
            endpoint,
            %url,
            leader_id = format!("{:x}", status.leader()),
            "etcd client connected"
        );

        Ok(ProxiedClient {
            endpoint: endpoint.to_string(),
            leader_id: status.leader(),
            client,
            call_timeout: self.call_timeout,
            _tunnel: tunnel,
        })
    }
}
