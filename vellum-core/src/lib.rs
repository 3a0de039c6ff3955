//! Vellum Core Library
//!
//! This crate provides the foundational types shared by the vellum
//! document-database driver runtime.
//!
//! # Overview
//!
//! The request execution engine in `vellum-client` consumes a small set of
//! value types from here:
//!
//! - **Types**: node records ([`ServerNode`]) and immutable [`Topology`]
//!   snapshots, plus the wire shapes the server returns for topology queries
//! - **Command**: the request descriptor ([`RequestDescriptor`]) and the
//!   [`Command`] trait that pairs a descriptor with its result shape
//! - **Transport**: the HTTP-shaped seam ([`HttpTransport`]) the engine sends
//!   through, so tests can swap in [`testing::MockTransport`]
//! - **Error**: the typed failure taxonomy ([`VellumError`])
//!
//! # Example
//!
//! ```
//! use vellum_core::{RequestDescriptor, ServerNode, Topology};
//!
//! let topology = Topology::new(
//!     vec![
//!         ServerNode::new("http://10.0.0.1:8080", "A"),
//!         ServerNode::new("http://10.0.0.2:8080", "B"),
//!     ],
//!     12,
//! );
//! assert_eq!(topology.len(), 2);
//!
//! let read = RequestDescriptor::get("/docs?id=users/1");
//! assert!(read.is_read);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod command;
pub mod error;
pub mod testing;
pub mod transport;
pub mod types;

pub use command::{Command, HttpMethod, RequestDescriptor, RouteScope, TypedCommand};
pub use error::{NodeFailure, Result, VellumError};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, TransportError, TransportFuture};
pub use types::{
    ClusterMembership, ClusterTopologyResponse, DatabaseTopologyResponse, SEED_ETAG, ServerNode,
    ServerRole, Topology,
};
