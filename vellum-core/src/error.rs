//! Error types for vellum.
//!
//! Every failure a caller can see is one variant of [`VellumError`]. The
//! variants keep "no node could be reached" ([`VellumError::ClusterUnreachable`])
//! apart from "a node answered and refused" (conflict, validation, not found),
//! since the first calls for infrastructure work and the second for
//! application handling.

use crate::transport::TransportError;
use crate::types::{ServerNode, Topology};
use std::sync::Arc;
use thiserror::Error;

/// Result type for vellum operations.
pub type Result<T> = std::result::Result<T, VellumError>;

/// One failed attempt against one node.
#[derive(Debug)]
pub struct NodeFailure {
    /// The node that was tried.
    pub node: ServerNode,
    /// Why the attempt failed.
    pub error: VellumError,
}

/// The main error type for vellum operations.
#[derive(Debug, Error)]
pub enum VellumError {
    /// The transport could not complete the exchange (refused, reset, timed out).
    #[error("Request to {url} failed: {source}")]
    Transport {
        /// URL that was being requested.
        url: String,
        /// Underlying transport failure.
        #[source]
        source: TransportError,
    },

    /// Every node in the topology was tried and none answered usefully.
    #[error(
        "All topology nodes are down: {} attempt(s) failed against topology etag {}",
        .failures.len(),
        .topology.etag
    )]
    ClusterUnreachable {
        /// Snapshot the failed call was routed with.
        topology: Arc<Topology>,
        /// Failed attempts in the order they were made.
        failures: Vec<NodeFailure>,
    },

    /// Optimistic concurrency check failed.
    #[error("Concurrency conflict: expected version {expected:?}, actual {actual:?}: {message}")]
    ConcurrencyConflict {
        /// Version the caller sent.
        expected: Option<String>,
        /// Version the server holds.
        actual: Option<String>,
        /// Server message.
        message: String,
    },

    /// The target resource does not exist.
    #[error("Resource not found: {route}")]
    NotFound {
        /// Route that was requested.
        route: String,
    },

    /// The server rejected the request (authentication, authorization, validation).
    #[error("Request rejected (status {status}): {message}")]
    ValidationOrAuth {
        /// HTTP status code.
        status: u16,
        /// Server message.
        message: String,
    },

    /// Any other unsuccessful response.
    #[error("Server error (status {status}): {message}")]
    Unclassified {
        /// HTTP status code.
        status: u16,
        /// Parsed server message, or the raw body when it was not structured.
        message: String,
        /// Raw response body.
        body: String,
    },

    /// The topology has no nodes to route to.
    #[error("Topology contains no nodes")]
    EmptyTopology,

    /// Encoding a request or decoding a response failed.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid URL provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl VellumError {
    /// True for failures that warrant trying another node.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }

    /// True when no node could be reached.
    pub fn is_unreachable(&self) -> bool {
        matches!(self, Self::ClusterUnreachable { .. } | Self::Transport { .. })
    }

    /// HTTP status of a server-side refusal, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::ValidationOrAuth { status, .. } | Self::Unclassified { status, .. } => {
                Some(*status)
            }
            Self::ConcurrencyConflict { .. } => Some(409),
            Self::NotFound { .. } => Some(404),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for VellumError {
    fn from(e: serde_json::Error) -> Self {
        VellumError::Serialization(e.to_string())
    }
}
