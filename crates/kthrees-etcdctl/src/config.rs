//! etcdctl.toml configuration parser.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, anyhow};
use kthrees_etcd::{GeneratorConfig, TlsMaterial};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EtcdctlConfig {
    #[serde(default)]
    pub kubernetes: KubernetesConfig,
    pub tls: Option<TlsConfig>,
    #[serde(default)]
    pub etcd: EtcdConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KubernetesConfig {
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TlsConfig {
    pub ca: PathBuf,
    pub cert: PathBuf,
    pub key: PathBuf,
    pub server_name: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EtcdConfig {
    pub namespace: Option<String>,
    pub label_selector: Option<String>,
    pub port: Option<u16>,
    pub dial_timeout: Option<String>,
    pub call_timeout: Option<String>,
}

impl EtcdctlConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("unable to read {}", path.display()))?;
        let config: EtcdctlConfig = toml::from_str(&content)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Generator settings, falling back to the defaults for anything unset.
    pub fn generator_config(&self) -> anyhow::Result<GeneratorConfig> {
        let mut config = GeneratorConfig::default();
        let etcd = &self.etcd;

        if let Some(ns) = &etcd.namespace {
            config = config.with_namespace(ns.clone());
        }
        if let Some(selector) = &etcd.label_selector {
            config = config.with_label_selector(selector.clone());
        }
        if let Some(port) = etcd.port {
            config = config.with_etcd_port(port);
        }
        if let Some(s) = &etcd.dial_timeout {
            config.dial_timeout = parse_duration(s)
                .ok_or_else(|| anyhow!("invalid etcd.dial_timeout: {s:?}"))?;
        }
        if let Some(s) = &etcd.call_timeout {
            config.call_timeout = parse_duration(s)
                .ok_or_else(|| anyhow!("invalid etcd.call_timeout: {s:?}"))?;
        }

        Ok(config)
    }

    /// Load the configured TLS material, if any.
    pub fn tls_material(&self) -> anyhow::Result<Option<TlsMaterial>> {
        let Some(tls) = &self.tls else {
            return Ok(None);
        };

        let mut material = TlsMaterial::from_files(&tls.ca, &tls.cert, &tls.key)?;
        if let Some(name) = &tls.server_name {
            material = material.with_server_name(name.clone());
        }
        Ok(Some(material))
    }
}

/// Parse "500ms", "5s", "2m" or a bare number of seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        ms.parse::<u64>().ok().map(Duration::from_millis)
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.parse::<u64>().ok().map(Duration::from_secs)
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_empty_config() {
        let config: EtcdctlConfig = toml::from_str("").unwrap();
        assert!(config.tls.is_none());
        assert_eq!(config.generator_config().unwrap(), GeneratorConfig::default());
        assert!(config.tls_material().unwrap().is_none());
    }

    #[test]
    fn parse_full_config() {
        let toml_str = r#"
[kubernetes]
kubeconfig = "/etc/capi/workload.kubeconfig"
context = "workload-admin@workload"

[tls]
ca = "/etc/etcd/server-ca.crt"
cert = "/etc/etcd/client.crt"
key = "/etc/etcd/client.key"
server_name = "localhost"

[etcd]
namespace = "kube-system"
label_selector = "app=etcd-proxy,tier=control-plane"
port = 2379
dial_timeout = "500ms"
call_timeout = "2m"
"#;
        let config: EtcdctlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(
            config.kubernetes.context.as_deref(),
            Some("workload-admin@workload")
        );
        assert_eq!(config.tls.as_ref().unwrap().server_name.as_deref(), Some("localhost"));

        let generator = config.generator_config().unwrap();
        assert_eq!(generator.label_selector, "app=etcd-proxy,tier=control-plane");
        assert_eq!(generator.dial_timeout, Duration::from_millis(500));
        assert_eq!(generator.call_timeout, Duration::from_secs(120));
    }

    #[test]
    fn unknown_keys_rejected() {
        let result: Result<EtcdctlConfig, _> = toml::from_str("[etcd]\nleader = \"n1\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn bad_timeout_reported() {
        let config: EtcdctlConfig = toml::from_str("[etcd]\ndial_timeout = \"soon\"\n").unwrap();
        let err = config.generator_config().unwrap_err();
        assert!(err.to_string().contains("dial_timeout"));
    }

    #[test]
    fn missing_tls_files_reported() {
        let dir = tempfile::tempdir().unwrap();
        let config = EtcdctlConfig {
            tls: Some(TlsConfig {
                ca: dir.path().join("ca.crt"),
                cert: dir.path().join("client.crt"),
                key: dir.path().join("client.key"),
                server_name: None,
            }),
            ..Default::default()
        };
        let err = config.tls_material().unwrap_err();
        assert!(err.to_string().contains("ca.crt"));
    }

    #[test]
    fn from_file_reads_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etcdctl.toml");
        std::fs::write(&path, "[etcd]\nport = 12379\n").unwrap();

        let config = EtcdctlConfig::from_file(&path).unwrap();
        assert_eq!(config.generator_config().unwrap().etcd_port, 12379);

        assert!(EtcdctlConfig::from_file(&dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("250ms"), Some(Duration::from_millis(250)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("fast"), None);
    }

    #[test]
    fn parse_duration_rejects_minute_overflow() {
        assert_eq!(parse_duration("999999999999999999m"), None);
        assert_eq!(
            parse_duration(&format!("{}m", u64::MAX / 60)),
            Some(Duration::from_secs(u64::MAX / 60 * 60))
        );
    }
}
