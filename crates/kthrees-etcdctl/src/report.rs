//! Human and JSON rendering of command results.

use std::fmt::Write as _;

use clap::ValueEnum;
use kthrees_etcd::{Member, ProxyPod};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// The member a command connected to, and the cluster as it reported it.
#[derive(Debug, Serialize)]
pub struct ConnectionReport {
    pub pod: String,
    pub leader_id: String,
    pub members: Vec<MemberRow>,
}

#[derive(Debug, Serialize)]
pub struct MemberRow {
    pub id: String,
    pub name: String,
    pub node: String,
    pub leader: bool,
    pub learner: bool,
    pub client_urls: Vec<String>,
}

impl ConnectionReport {
    pub fn new(pod: &str, leader_id: u64, members: &[Member]) -> Self {
        Self {
            pod: pod.to_string(),
            leader_id: format!("{leader_id:x}"),
            members: members
                .iter()
                .map(|m| MemberRow {
                    id: format!("{:x}", m.id),
                    name: m.name.clone(),
                    node: m.node_name().to_string(),
                    leader: m.id == leader_id,
                    learner: m.is_learner,
                    client_urls: m.client_urls.clone(),
                })
                .collect(),
        }
    }

    pub fn render(&self, format: OutputFormat) -> anyhow::Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::Text => {
                let mut out = String::new();
                writeln!(out, "pod:       {}", self.pod)?;
                writeln!(out, "leader id: {}", self.leader_id)?;
                writeln!(out, "{:<18} {:<32} {:<24} {}", "ID", "NAME", "NODE", "ROLE")?;
                for m in &self.members {
                    let role = match (m.leader, m.learner) {
                        (true, _) => "leader",
                        (false, true) => "learner",
                        (false, false) => "follower",
                    };
                    writeln!(out, "{:<18} {:<32} {:<24} {}", m.id, m.name, m.node, role)?;
                }
                Ok(out)
            }
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PodsReport {
    pub pods: Vec<PodRow>,
}

#[derive(Debug, Serialize)]
pub struct PodRow {
    pub node: String,
    pub pod: String,
}

impl PodsReport {
    pub fn new(pods: Vec<ProxyPod>) -> Self {
        Self {
            pods: pods
                .into_iter()
                .map(|p| PodRow {
                    node: p.node_name,
                    pod: p.pod_name,
                })
                .collect(),
        }
    }

    pub fn render(&self, format: OutputFormat) -> anyhow::Result<String> {
        match format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(self)?),
            OutputFormat::Text => {
                let mut out = String::new();
                writeln!(out, "{:<32} {}", "NODE", "POD")?;
                for p in &self.pods {
                    writeln!(out, "{:<32} {}", p.node, p.pod)?;
                }
                Ok(out)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn members() -> Vec<Member> {
        vec![
            Member {
                id: 0x1a,
                name: "cp-0-11111111".to_string(),
                peer_urls: Vec::new(),
                client_urls: vec!["https://10.0.0.1:2379".to_string()],
                is_learner: false,
            },
            Member {
                id: 0x2b,
                name: "cp-1-22222222".to_string(),
                peer_urls: Vec::new(),
                client_urls: Vec::new(),
                is_learner: true,
            },
        ]
    }

    #[test]
    fn marks_leader_and_learner() {
        let report = ConnectionReport::new("etcd-proxy-cp-0", 0x1a, &members());
        assert_eq!(report.leader_id, "1a");
        assert!(report.members[0].leader);
        assert_eq!(report.members[0].node, "cp-0");
        assert!(!report.members[1].leader);
        assert!(report.members[1].learner);

        let text = report.render(OutputFormat::Text).unwrap();
        assert!(text.contains("etcd-proxy-cp-0"));
        assert!(text.contains("leader"));
        assert!(text.contains("learner"));
    }

    #[test]
    fn json_output_parses() {
        let report = ConnectionReport::new("etcd-proxy-cp-0", 0x2b, &members());
        let json = report.render(OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["leader_id"], "2b");
        assert_eq!(value["members"][1]["leader"], true);
    }

    #[test]
    fn pods_render() {
        let report = PodsReport::new(vec![ProxyPod {
            node_name: "cp-0".to_string(),
            pod_name: "etcd-proxy-x7k2p".to_string(),
        }]);
        let text = report.render(OutputFormat::Text).unwrap();
        assert!(text.contains("cp-0"));
        assert!(text.contains("etcd-proxy-x7k2p"));

        let json = report.render(OutputFormat::Json).unwrap();
        assert!(json.contains("\"node\": \"cp-0\""));
    }
}
