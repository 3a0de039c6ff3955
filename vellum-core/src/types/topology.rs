//! Topology snapshots and their wire shapes.

use super::node::{ServerNode, ServerRole};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Etag carried by a topology built from seed URLs before any server answered.
///
/// Every etag a server reports is greater than this, so the first fetched
/// snapshot always replaces the seed one.
pub const SEED_ETAG: i64 = -1;

/// Immutable snapshot of the cluster as seen by the client.
///
/// Node order is significant: it is the fallback order for failover and the
/// preferred order for the `None` read balance policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topology {
    /// Ordered nodes.
    pub nodes: Vec<ServerNode>,
    /// Monotonic version reported by the server.
    pub etag: i64,
    /// Cluster tag of the leader, when the server reported one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leader: Option<String>,
}

impl Topology {
    /// Create a snapshot from nodes and an etag.
    pub fn new(nodes: Vec<ServerNode>, etag: i64) -> Self {
        Self {
            nodes,
            etag,
            leader: None,
        }
    }

    /// Set the leader tag.
    #[must_use]
    pub fn with_leader(mut self, tag: impl Into<String>) -> Self {
        self.leader = Some(tag.into());
        self
    }

    /// Build the bootstrap snapshot from seed URLs.
    pub fn seed<S: AsRef<str>>(urls: &[S], database: Option<&str>) -> Self {
        let nodes = urls
            .iter()
            .map(|url| ServerNode {
                url: url.as_ref().to_string(),
                cluster_tag: "?".to_string(),
                database: database.map(str::to_string),
                role: ServerRole::Member,
            })
            .collect();
        Self::new(nodes, SEED_ETAG)
    }

    /// True while no server-provided snapshot has been installed.
    pub fn is_seed(&self) -> bool {
        self.etag == SEED_ETAG
    }

    /// Number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// True if there are no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Index of the leader node, if known and present.
    pub fn leader_index(&self) -> Option<usize> {
        let leader = self.leader.as_deref()?;
        self.nodes.iter().position(|n| n.cluster_tag == leader)
    }

    /// Find a node by cluster tag.
    pub fn node_by_tag(&self, tag: &str) -> Option<&ServerNode> {
        self.nodes.iter().find(|n| n.cluster_tag == tag)
    }

    /// True if this snapshot should replace `current`.
    pub fn supersedes(&self, current: &Topology) -> bool {
        self.etag > current.etag
    }
}

/// Body of `GET /topology?name={database}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct DatabaseTopologyResponse {
    /// Nodes hosting the database, in preference order.
    pub nodes: Vec<ServerNode>,
    /// Topology version.
    pub etag: i64,
}

impl From<DatabaseTopologyResponse> for Topology {
    fn from(response: DatabaseTopologyResponse) -> Self {
        Topology::new(response.nodes, response.etag)
    }
}

/// Node membership grouped by role, keyed by cluster tag.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct ClusterMembership {
    /// Voting members: tag -> url.
    pub members: BTreeMap<String, String>,
    /// Promotable nodes: tag -> url.
    pub promotables: BTreeMap<String, String>,
    /// Watchers: tag -> url.
    pub watchers: BTreeMap<String, String>,
}

/// Body of `GET /cluster/topology`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ClusterTopologyResponse {
    /// Tag of the current leader.
    #[serde(default)]
    pub leader: Option<String>,
    /// Topology version.
    pub etag: i64,
    /// Membership by role.
    pub topology: ClusterMembership,
}

impl From<ClusterTopologyResponse> for Topology {
    fn from(response: ClusterTopologyResponse) -> Self {
        let membership = response.topology;
        let by_role = [
            (membership.members, ServerRole::Member),
            (membership.promotables, ServerRole::Promotable),
            (membership.watchers, ServerRole::Watcher),
        ];

        let nodes = by_role
            .into_iter()
            .flat_map(|(group, role)| {
                group
                    .into_iter()
                    .map(move |(tag, url)| ServerNode::new(url, tag).with_role(role))
            })
            .collect();

        Topology {
            nodes,
            etag: response.etag,
            leader: response.leader,
        }
    }
}
