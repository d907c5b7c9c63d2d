//! Etcd member view.

use serde::Serialize;

/// One etcd cluster member, as reported by a member-list query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Member {
    pub id: u64,
    pub name: String,
    pub peer_urls: Vec<String>,
    pub client_urls: Vec<String>,
    pub is_learner: bool,
}

impl Member {
    /// Node hosting this member. See [`node_name_from_member`].
    pub fn node_name(&self) -> &str {
        node_name_from_member(&self.name)
    }
}

impl From<&etcd_client::Member> for Member {
    fn from(m: &etcd_client::Member) -> Self {
        Self {
            id: m.id(),
            name: m.name().to_string(),
            peer_urls: m.peer_urls().to_vec(),
            client_urls: m.client_urls().to_vec(),
            is_learner: m.is_learner(),
        }
    }
}

/// k3s registers etcd members as `<node name>-<random suffix>`; strip the
/// suffix to recover the node. Names without a dash are returned as-is.
pub fn node_name_from_member(member_name: &str) -> &str {
    match member_name.rfind('-') {
        Some(idx) => &member_name[..idx],
        None => member_name,
    }
}
