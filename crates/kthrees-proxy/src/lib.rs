//! kthrees proxy tunnel — reach etcd members that have no routable address.
//!
//! Every control plane node runs an `etcd-proxy` pod exposing the node's
//! local etcd member. The management cluster cannot dial those members
//! directly, so connections are carried over the Kubernetes API
//! port-forward subresource instead.
//!
//! # Components
//!
//! - **`proxy`** — Descriptor of the forwarding target (namespace,
//!   port)
//! - **`forward`** — Loopback listener that bridges each accepted TCP
//!   connection onto a pod port-forward stream

pub mod forward;
pub mod proxy;

pub use forward::{ForwardedEndpoint, PortForwarder, ProxyError};
pub use proxy::Proxy;
