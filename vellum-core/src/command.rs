//! Request descriptors.
//!
//! The engine never knows what a particular operation means. It only sees a
//! [`RequestDescriptor`]: method, route, body, whether the request is a read,
//! and whether it mutates cluster-wide state (and so needs a raft id).
//! The caller picks the result shape through [`Command::Output`].

use crate::error::Result;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::marker::PhantomData;

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HttpMethod {
    /// GET
    Get,
    /// HEAD
    Head,
    /// POST
    Post,
    /// PUT
    Put,
    /// PATCH
    Patch,
    /// DELETE
    Delete,
}

impl HttpMethod {
    /// Upper-case method name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Head => "HEAD",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
        }
    }

    /// True for methods that do not change server state.
    pub fn is_safe(&self) -> bool {
        matches!(self, Self::Get | Self::Head)
    }
}

impl fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for HttpMethod {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Self::Get),
            "HEAD" => Ok(Self::Head),
            "POST" => Ok(Self::Post),
            "PUT" => Ok(Self::Put),
            "PATCH" => Ok(Self::Patch),
            "DELETE" => Ok(Self::Delete),
            other => Err(format!("unsupported HTTP method: {}", other)),
        }
    }
}

/// Where a route is resolved.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RouteScope {
    /// `{node}/databases/{database}{route}`
    #[default]
    Database,
    /// `{node}{route}`
    Server,
}

/// Everything the engine needs to know about one logical request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestDescriptor {
    /// HTTP method.
    pub method: HttpMethod,
    /// Path plus query, starting with '/'.
    pub route: String,
    /// Database or server scope.
    pub scope: RouteScope,
    /// Serialized request body.
    pub body: Option<Vec<u8>>,
    /// Read requests honor the read balance policy and may be cached.
    pub is_read: bool,
    /// Cluster-mutating commands carry an idempotency token.
    pub raft_id_required: bool,
    /// Token assigned ahead of time; reused verbatim when present.
    pub raft_id: Option<String>,
    /// Version the caller expects the target to be at (sent as `If-Match`).
    pub expected_version: Option<String>,
    /// Treat 404 on a read as an error instead of an empty result.
    pub require_existence: bool,
    /// Never serve or store this read in the response cache.
    pub no_cache: bool,
    /// Cache prefix a successful write invalidates (defaults to the route path).
    pub invalidates: Option<String>,
}

impl RequestDescriptor {
    /// Create a descriptor. GET and HEAD are reads, everything else is a write.
    pub fn new(method: HttpMethod, route: impl Into<String>) -> Self {
        let route = route.into();
        let route = if route.starts_with('/') {
            route
        } else {
            format!("/{}", route)
        };

        Self {
            method,
            route,
            scope: RouteScope::Database,
            body: None,
            is_read: method.is_safe(),
            raft_id_required: false,
            raft_id: None,
            expected_version: None,
            require_existence: false,
            no_cache: false,
            invalidates: None,
        }
    }

    /// GET request.
    pub fn get(route: impl Into<String>) -> Self {
        Self::new(HttpMethod::Get, route)
    }

    /// POST request.
    pub fn post(route: impl Into<String>) -> Self {
        Self::new(HttpMethod::Post, route)
    }

    /// PUT request.
    pub fn put(route: impl Into<String>) -> Self {
        Self::new(HttpMethod::Put, route)
    }

    /// DELETE request.
    pub fn delete(route: impl Into<String>) -> Self {
        Self::new(HttpMethod::Delete, route)
    }

    /// Resolve the route against the server root instead of a database.
    #[must_use]
    pub fn server_scoped(mut self) -> Self {
        self.scope = RouteScope::Server;
        self
    }

    /// Attach a raw body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Serialize `value` as the JSON body.
    pub fn with_json_body<T: Serialize + ?Sized>(mut self, value: &T) -> Result<Self> {
        self.body = Some(serde_json::to_vec(value)?);
        Ok(self)
    }

    /// Override the read/write classification (e.g. a POST query is a read).
    #[must_use]
    pub fn read(mut self, is_read: bool) -> Self {
        self.is_read = is_read;
        self
    }

    /// Mark as cluster-mutating; an idempotency token is attached on send.
    #[must_use]
    pub fn raft(mut self) -> Self {
        self.raft_id_required = true;
        self
    }

    /// Mark as cluster-mutating with a caller-chosen token.
    #[must_use]
    pub fn with_raft_id(mut self, id: impl Into<String>) -> Self {
        self.raft_id_required = true;
        self.raft_id = Some(id.into());
        self
    }

    /// Require the target to be at `version`.
    #[must_use]
    pub fn expect_version(mut self, version: impl Into<String>) -> Self {
        self.expected_version = Some(version.into());
        self
    }

    /// Fail with `NotFound` instead of returning an empty result.
    #[must_use]
    pub fn require_existence(mut self) -> Self {
        self.require_existence = true;
        self
    }

    /// Bypass the response cache.
    #[must_use]
    pub fn no_cache(mut self) -> Self {
        self.no_cache = true;
        self
    }

    /// Set the cache prefix invalidated after a successful write.
    #[must_use]
    pub fn invalidates(mut self, prefix: impl Into<String>) -> Self {
        self.invalidates = Some(prefix.into());
        self
    }

    /// Route without the query string.
    pub fn path(&self) -> &str {
        self.route
            .split_once('?')
            .map_or(self.route.as_str(), |(path, _)| path)
    }

    /// Prefix of cache routes a successful write makes stale.
    pub fn invalidation_prefix(&self) -> &str {
        self.invalidates.as_deref().unwrap_or_else(|| self.path())
    }

    /// True if a response to this request may be served from or stored in cache.
    pub fn is_cacheable(&self) -> bool {
        self.is_read && self.method == HttpMethod::Get && !self.no_cache
    }

    /// Pair this descriptor with a result type.
    pub fn expecting<T: DeserializeOwned + Send>(self) -> TypedCommand<T> {
        TypedCommand::new(self)
    }
}

/// A request together with the shape its response decodes into.
pub trait Command {
    /// Decoded result type.
    type Output: DeserializeOwned + Send;

    /// Describe the request to send.
    fn descriptor(&self) -> RequestDescriptor;
}

impl Command for RequestDescriptor {
    type Output = serde_json::Value;

    fn descriptor(&self) -> RequestDescriptor {
        self.clone()
    }
}

/// A descriptor with a caller-chosen result type.
#[derive(Debug, Clone)]
pub struct TypedCommand<T> {
    descriptor: RequestDescriptor,
    _output: PhantomData<fn() -> T>,
}

impl<T> TypedCommand<T> {
    /// Wrap a descriptor.
    pub fn new(descriptor: RequestDescriptor) -> Self {
        Self {
            descriptor,
            _output: PhantomData,
        }
    }
}

impl<T: DeserializeOwned + Send> Command for TypedCommand<T> {
    type Output = T;

    fn descriptor(&self) -> RequestDescriptor {
        self.descriptor.clone()
    }
}
