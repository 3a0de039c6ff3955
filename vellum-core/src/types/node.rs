//! Node records.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role a node plays in the cluster.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServerRole {
    /// Full voting member serving reads and writes.
    #[default]
    Member,
    /// Catching up; becomes a member once in sync.
    Promotable,
    /// Non-voting observer.
    Watcher,
}

impl fmt::Display for ServerRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Member => write!(f, "member"),
            Self::Promotable => write!(f, "promotable"),
            Self::Watcher => write!(f, "watcher"),
        }
    }
}

/// A single server as seen by the client.
///
/// Role transitions only arrive through a fresh topology snapshot; a record
/// is never updated in place.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ServerNode {
    /// Base URL of the node (e.g., "http://10.0.0.1:8080").
    pub url: String,
    /// Logical cluster tag ("A", "B", ...). Seed nodes use "?".
    pub cluster_tag: String,
    /// Database this record was reported for, if any.
    #[serde(default)]
    pub database: Option<String>,
    /// Cluster role.
    #[serde(rename = "ServerRole", default)]
    pub role: ServerRole,
}

impl ServerNode {
    /// Create a member node with the given URL and tag.
    pub fn new(url: impl Into<String>, cluster_tag: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            cluster_tag: cluster_tag.into(),
            database: None,
            role: ServerRole::Member,
        }
    }

    /// Set the owning database.
    #[must_use]
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// Set the role.
    #[must_use]
    pub fn with_role(mut self, role: ServerRole) -> Self {
        self.role = role;
        self
    }

    /// Base URL without a trailing slash.
    pub fn base_url(&self) -> &str {
        self.url.trim_end_matches('/')
    }
}

impl fmt::Display for ServerNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.cluster_tag, self.url)
    }
}
