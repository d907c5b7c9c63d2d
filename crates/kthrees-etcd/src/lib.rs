//! kthrees-etcd — etcd client generation for k3s control planes.
//!
//! Etcd members run one per control plane node and are only reachable
//! through the `etcd-proxy` pod on that node. This crate finds the proxy
//! pods, dials members through them, and locates the current leader.
//!
//! # Architecture
//!
//! ```text
//! EtcdClientGenerator
//!   ├── for_first_available_node(nodes) → first member that connects
//!   ├── for_leader(nodes)               → member reporting itself leader
//!   ├── EtcdPodMap
//!   │   └── PodInventory (kube: list pods, app=etcd-proxy)
//!   └── ClientFactory
//!       └── ProxiedClientFactory
//!           ├── PortForwarder (kthrees-proxy)
//!           └── etcd-client (member list, status)
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod generator;
pub mod member;
pub mod pods;
pub mod tls;

pub use client::{ClientFactory, EtcdClient, ProxiedClient, ProxiedClientFactory};
pub use config::GeneratorConfig;
pub use error::{AggregateError, ClientError, ClientResult, ErrorKind, InventoryError};
pub use generator::EtcdClientGenerator;
pub use member::{Member, node_name_from_member};
pub use pods::{EtcdPodMap, KubePodInventory, PodInventory, ProxyPod};
pub use tls::{TlsError, TlsMaterial};
