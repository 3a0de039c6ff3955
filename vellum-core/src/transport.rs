//! HTTP-shaped transport seam.
//!
//! The engine talks to nodes only through [`HttpTransport`]. Production code
//! plugs in a real HTTP client; tests plug in
//! [`MockTransport`](crate::testing::MockTransport).

use crate::command::HttpMethod;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;

/// Header names the engine reads or writes.
pub mod headers {
    /// Conditional-request validator.
    pub const IF_NONE_MATCH: &str = "If-None-Match";
    /// Expected version for optimistic concurrency.
    pub const IF_MATCH: &str = "If-Match";
    /// Validator returned by the server.
    pub const ETAG: &str = "ETag";
    /// Idempotency token of a cluster-mutating command.
    pub const RAFT_REQUEST_ID: &str = "Raft-Request-Id";
    /// Etag of the topology the client routed with.
    pub const TOPOLOGY_ETAG: &str = "Topology-Etag";
    /// Set by the server when the client's topology is out of date.
    pub const REFRESH_TOPOLOGY: &str = "Refresh-Topology";
    /// Bearer token.
    pub const AUTHORIZATION: &str = "Authorization";
    /// Body media type.
    pub const CONTENT_TYPE: &str = "Content-Type";
    /// Accepted media type.
    pub const ACCEPT: &str = "Accept";
}

/// Outbound request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// HTTP method.
    pub method: HttpMethod,
    /// Absolute URL.
    pub url: String,
    /// Request headers.
    pub headers: HashMap<String, String>,
    /// Request body.
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    /// Create a request without headers or body.
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HashMap::new(),
            body: None,
        }
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Look up a header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }
}

/// Inbound response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body.
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Create a response.
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: HashMap::new(),
            body: body.into(),
        }
    }

    /// Create a JSON response.
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self::new(status, value.to_string().into_bytes())
            .with_header("content-type", "application/json")
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Look up a header, ignoring case.
    pub fn header(&self, name: &str) -> Option<&str> {
        find_header(&self.headers, name)
    }

    /// Validator the server attached, if any.
    pub fn etag(&self) -> Option<&str> {
        self.header(headers::ETAG)
    }

    /// True for 2xx.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// True for 304.
    pub fn is_not_modified(&self) -> bool {
        self.status == 304
    }

    /// Body as lossy UTF-8.
    pub fn body_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

fn find_header<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value.as_str())
}

/// Error type for transport operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// Connection could not be established or was dropped.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),
    /// The attempt did not finish in time.
    #[error("Request timed out")]
    Timeout,
    /// No mock rule matched.
    #[error("No mock rule matched for {method} {url}")]
    NoMockMatch {
        /// Request method.
        method: String,
        /// Request URL.
        url: String,
    },
    /// Other error.
    #[error("{0}")]
    Other(String),
}

/// Boxed future returned by [`HttpTransport::send`].
pub type TransportFuture<'a> =
    Pin<Box<dyn Future<Output = Result<HttpResponse, TransportError>> + Send + 'a>>;

/// Sends one HTTP exchange to one node.
///
/// Implementations must not retry; failover is the executor's job.
pub trait HttpTransport: Send + Sync {
    /// Send a request and wait for the full response.
    fn send(&self, request: HttpRequest) -> TransportFuture<'_>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn header_lookup_ignores_case() {
        let response = HttpResponse::new(200, Vec::new()).with_header("etag", "\"abc\"");
        assert_eq!(response.etag(), Some("\"abc\""));
        assert_eq!(response.header("ETAG"), Some("\"abc\""));
        assert_eq!(response.header("Refresh-Topology"), None);
    }

    #[test]
    fn json_response_sets_content_type() {
        let response = HttpResponse::json(201, &json!({"id": 1}));
        assert_eq!(response.header("Content-Type"), Some("application/json"));
        assert!(response.is_success());
        assert_eq!(response.body_string(), r#"{"id":1}"#);
    }

    #[test]
    fn not_modified_is_not_success() {
        let response = HttpResponse::new(304, Vec::new());
        assert!(response.is_not_modified());
        assert!(!response.is_success());
    }
}
