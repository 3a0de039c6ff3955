//! Cluster membership types.
//!
//! Node records and topology snapshots are plain values. A snapshot is never
//! mutated after construction; a newer view of the cluster is always a new
//! [`Topology`].

mod node;
mod topology;

pub use node::{ServerNode, ServerRole};
pub use topology::{
    ClusterMembership, ClusterTopologyResponse, DatabaseTopologyResponse, SEED_ETAG, Topology,
};
