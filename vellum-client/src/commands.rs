//! Built-in commands the engine itself needs.

use vellum_core::{Command, ClusterTopologyResponse, DatabaseTopologyResponse, RequestDescriptor};

/// Fetch the nodes hosting one database.
#[derive(Debug, Clone)]
pub struct GetDatabaseTopology {
    database: String,
}

impl GetDatabaseTopology {
    /// Create the command.
    pub fn new(database: impl Into<String>) -> Self {
        Self {
            database: database.into(),
        }
    }
}

impl Command for GetDatabaseTopology {
    type Output = DatabaseTopologyResponse;

    fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::get(format!(
            "/topology?name={}",
            urlencoding::encode(&self.database)
        ))
        .server_scoped()
        .no_cache()
    }
}

/// Fetch cluster membership and the current leader.
#[derive(Debug, Clone, Copy, Default)]
pub struct GetClusterTopology;

impl Command for GetClusterTopology {
    type Output = ClusterTopologyResponse;

    fn descriptor(&self) -> RequestDescriptor {
        RequestDescriptor::get("/cluster/topology")
            .server_scoped()
            .no_cache()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_core::RouteScope;

    #[test]
    fn database_topology_route_is_encoded() {
        let descriptor = GetDatabaseTopology::new("sales & ops").descriptor();
        assert_eq!(descriptor.route, "/topology?name=sales%20%26%20ops");
        assert_eq!(descriptor.scope, RouteScope::Server);
        assert!(!descriptor.is_cacheable());
    }

    #[test]
    fn cluster_topology_route() {
        let descriptor = GetClusterTopology.descriptor();
        assert_eq!(descriptor.route, "/cluster/topology");
        assert!(descriptor.is_read);
    }
}
