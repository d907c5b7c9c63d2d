//! kthrees-etcdctl — locate etcd members of a k3s control plane.
//!
//! Connects to the workload cluster's API server, finds the etcd-proxy
//! pods, and reaches etcd members through them.
//!
//! # Usage
//!
//! ```text
//! kthrees-etcdctl --config etcdctl.toml leader --node cp-0 --node cp-1 --node cp-2
//! kthrees-etcdctl first-available --node cp-0 --node cp-1
//! kthrees-etcdctl pods
//! ```

mod config;
mod report;

use std::path::PathBuf;

use anyhow::{Context, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use kthrees_etcd::{EtcdClient, EtcdClientGenerator};
use tracing::{debug, info};

use crate::config::{EtcdctlConfig, TlsConfig, parse_duration};
use crate::report::{ConnectionReport, OutputFormat, PodsReport};

#[derive(Parser)]
#[command(
    name = "kthrees-etcdctl",
    about = "Locate and inspect etcd members behind etcd-proxy pods",
    version
)]
struct Cli {
    /// Path to an etcdctl.toml config file.
    #[arg(long, env = "KTHREES_ETCDCTL_CONFIG")]
    config: Option<PathBuf>,

    /// Kubeconfig of the workload cluster (defaults to the usual lookup).
    #[arg(long)]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use.
    #[arg(long)]
    context: Option<String>,

    /// Etcd CA bundle (PEM).
    #[arg(long, requires_all = ["cert", "key"])]
    ca: Option<PathBuf>,

    /// Etcd client certificate (PEM).
    #[arg(long, requires_all = ["ca", "key"])]
    cert: Option<PathBuf>,

    /// Etcd client key (PEM).
    #[arg(long, requires_all = ["ca", "cert"])]
    key: Option<PathBuf>,

    /// Name to verify against the etcd server certificate.
    #[arg(long)]
    server_name: Option<String>,

    /// Etcd dial timeout, e.g. "5s".
    #[arg(long)]
    dial_timeout: Option<String>,

    /// Etcd call timeout, e.g. "10s".
    #[arg(long)]
    call_timeout: Option<String>,

    /// Overall deadline for the command.
    #[arg(long, default_value = "60s")]
    timeout: String,

    /// Output format.
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,

    /// Log format.
    #[arg(long, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Connect to the etcd leader and list members.
    Leader {
        /// Candidate control plane node, in trial order.
        #[arg(long = "node", required = true)]
        nodes: Vec<String>,
    },
    /// Connect to the first reachable etcd member and list members.
    FirstAvailable {
        /// Candidate control plane node, in trial order.
        #[arg(long = "node", required = true)]
        nodes: Vec<String>,
    },
    /// List the etcd-proxy pods by node.
    Pods,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr so command output stays parseable.
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info,kthrees=debug"));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match cli.log_format {
        LogFormat::Text => subscriber.init(),
        LogFormat::Json => subscriber.json().init(),
    }

    // kube and etcd-client may pull in different rustls backends.
    let _ = rustls::crypto::ring::default_provider().install_default();

    let deadline = parse_duration(&cli.timeout)
        .ok_or_else(|| anyhow!("invalid --timeout: {:?}", cli.timeout))?;

    let output = tokio::time::timeout(deadline, run(cli))
        .await
        .map_err(|_| anyhow!("command timed out after {deadline:?}"))??;

    print!("{output}");
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<String> {
    let config = load_config(&cli)?;

    let generator_config = config.generator_config()?;
    let tls = config.tls_material()?;
    if tls.is_none() {
        info!("no TLS material configured, dialing etcd in plaintext");
    }

    let client = kube_client(&config).await?;
    let mut generator = EtcdClientGenerator::with_config(client, tls.as_ref(), &generator_config);

    match cli.command {
        Command::Leader { nodes } => {
            let etcd = generator
                .for_leader(&nodes)
                .await
                .context("unable to connect to the etcd leader")?;
            connection_report(etcd, cli.output).await
        }
        Command::FirstAvailable { nodes } => {
            let etcd = generator
                .for_first_available_node(&nodes)
                .await
                .context("unable to connect to an etcd member")?;
            connection_report(etcd, cli.output).await
        }
        Command::Pods => {
            let pods = generator.proxy_pods().await?;
            PodsReport::new(pods).render(cli.output)
        }
    }
}

async fn connection_report<C: EtcdClient>(
    mut etcd: C,
    format: OutputFormat,
) -> anyhow::Result<String> {
    let members = etcd.members().await;
    let report = members.map(|m| ConnectionReport::new(etcd.endpoint(), etcd.leader_id(), &m));
    etcd.close();
    report?.render(format)
}

/// Merge the config file with command line overrides.
fn load_config(cli: &Cli) -> anyhow::Result<EtcdctlConfig> {
    let mut config = match &cli.config {
        Some(path) => EtcdctlConfig::from_file(path)?,
        None => EtcdctlConfig::default(),
    };

    if let Some(path) = &cli.kubeconfig {
        config.kubernetes.kubeconfig = Some(path.clone());
    }
    if let Some(context) = &cli.context {
        config.kubernetes.context = Some(context.clone());
    }
    if let (Some(ca), Some(cert), Some(key)) = (&cli.ca, &cli.cert, &cli.key) {
        config.tls = Some(TlsConfig {
            ca: ca.clone(),
            cert: cert.clone(),
            key: key.clone(),
            server_name: None,
        });
    }
    if let (Some(name), Some(tls)) = (&cli.server_name, config.tls.as_mut()) {
        tls.server_name = Some(name.clone());
    }
    if let Some(d) = &cli.dial_timeout {
        config.etcd.dial_timeout = Some(d.clone());
    }
    if let Some(d) = &cli.call_timeout {
        config.etcd.call_timeout = Some(d.clone());
    }

    debug!(?config, "effective configuration");
    Ok(config)
}

async fn kube_client(config: &EtcdctlConfig) -> anyhow::Result<kube::Client> {
    let options = kube::config::KubeConfigOptions {
        context: config.kubernetes.context.clone(),
        ..Default::default()
    };

    let kube_config = match &config.kubernetes.kubeconfig {
        Some(path) => {
            let kubeconfig = kube::config::Kubeconfig::read_from(path)
                .with_context(|| format!("unable to read kubeconfig {}", path.display()))?;
            kube::Config::from_custom_kubeconfig(kubeconfig, &options).await?
        }
        None if options.context.is_some() => kube::Config::from_kubeconfig(&options).await?,
        None => kube::Config::infer().await?,
    };

    info!(cluster_url = %kube_config.cluster_url, "connecting to workload cluster");
    let client = kube::Client::try_from(kube_config)
        .context("unable to create client to target cluster")?;
    Ok(client)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn cli_definition_is_valid() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_repeated_nodes() {
        let cli = Cli::try_parse_from([
            "kthrees-etcdctl",
            "leader",
            "--node",
            "cp-0",
            "--node",
            "cp-1",
        ])
        .unwrap();
        match cli.command {
            Command::Leader { nodes } => assert_eq!(nodes, vec!["cp-0", "cp-1"]),
            _ => panic!("expected leader command"),
        }
    }

    #[test]
    fn leader_requires_nodes() {
        assert!(Cli::try_parse_from(["kthrees-etcdctl", "leader"]).is_err());
    }

    #[test]
    fn tls_flags_must_come_together() {
        let result = Cli::try_parse_from(["kthrees-etcdctl", "--ca", "ca.crt", "pods"]);
        assert!(result.is_err());
    }

    #[test]
    fn flags_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etcdctl.toml");
        std::fs::write(
            &path,
            "[kubernetes]\ncontext = \"file\"\n[etcd]\ndial_timeout = \"1s\"\ncall_timeout = \"2s\"\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "kthrees-etcdctl",
            "--config",
            path.to_str().unwrap(),
            "--context",
            "flag",
            "--dial-timeout",
            "3s",
            "pods",
        ])
        .unwrap();

        let config = load_config(&cli).unwrap();
        assert_eq!(config.kubernetes.context.as_deref(), Some("flag"));
        let generator = config.generator_config().unwrap();
        assert_eq!(generator.dial_timeout, Duration::from_secs(3));
        assert_eq!(generator.call_timeout, Duration::from_secs(2));
    }
}
