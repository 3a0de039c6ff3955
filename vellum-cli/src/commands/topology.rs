//! Topology commands - show the nodes of a database or the cluster membership.

use super::ConnectionArgs;
use anyhow::{Context, Result};
use std::fmt::Write;
use vellum_client::{GetClusterTopology, GetDatabaseTopology};
use vellum_core::{ClusterTopologyResponse, DatabaseTopologyResponse};

/// Run the topology command.
pub async fn database(conn: &ConnectionArgs) -> Result<()> {
    let executor = conn.connect()?;
    let database = executor
        .config()
        .database
        .clone()
        .context("This command needs a database; pass --database")?;

    tracing::info!(database = %database, "Fetching database topology");

    let result = executor.execute(&GetDatabaseTopology::new(&database)).await;
    executor.close();

    let topology = result?.with_context(|| format!("Database not found: {}", database))?;
    print!("{}", render_database(&database, &topology));
    Ok(())
}

/// Run the cluster-topology command.
pub async fn cluster(conn: &ConnectionArgs) -> Result<()> {
    let executor = conn.connect()?;
    tracing::info!("Fetching cluster topology");

    let result = executor.execute(&GetClusterTopology).await;
    executor.close();

    let topology = result?.context("Server returned no cluster topology")?;
    print!("{}", render_cluster(&topology));
    Ok(())
}

fn render_database(database: &str, topology: &DatabaseTopologyResponse) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Database Topology: {}", database);
    let _ = writeln!(out, "Etag: {}", topology.etag);
    let _ = writeln!(out);
    let _ = writeln!(out, "{:<6} {:<12} URL", "TAG", "ROLE");
    let _ = writeln!(out, "{:<6} {:<12} ---", "---", "----");
    for node in &topology.nodes {
        let _ = writeln!(
            out,
            "{:<6} {:<12} {}",
            node.cluster_tag,
            node.role.to_string(),
            node.url
        );
    }
    out
}

fn render_cluster(topology: &ClusterTopologyResponse) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Cluster Topology");
    let _ = writeln!(
        out,
        "Leader: {}",
        topology.leader.as_deref().unwrap_or("(none)")
    );
    let _ = writeln!(out, "Etag: {}", topology.etag);
    let _ = writeln!(out);
    let _ = writeln!(out, "{:<6} {:<12} URL", "TAG", "ROLE");
    let _ = writeln!(out, "{:<6} {:<12} ---", "---", "----");

    let groups = [
        ("member", &topology.topology.members),
        ("promotable", &topology.topology.promotables),
        ("watcher", &topology.topology.watchers),
    ];
    for (role, nodes) in groups {
        for (tag, url) in nodes {
            let _ = writeln!(out, "{:<6} {:<12} {}", tag, role, url);
        }
    }
    out
}
