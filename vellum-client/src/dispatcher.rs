//! Response classification.
//!
//! Every exchange ends up in one [`Disposition`]. The executor's state machine
//! only looks at the disposition; status codes are interpreted here and
//! nowhere else.

use crate::config::FailoverPolicy;
use serde::Deserialize;
use vellum_core::transport::headers;
use vellum_core::{HttpResponse, RequestDescriptor, TransportError, VellumError};

/// What the executor should do with one exchange.
#[derive(Debug)]
pub enum Disposition {
    /// 2xx or 304: decode and return.
    Success,
    /// 404: empty result for reads, error for writes or required reads.
    NotFound,
    /// The attempt failed.
    Failed(Failure),
}

/// A failed attempt.
#[derive(Debug)]
pub enum Failure {
    /// Try the next candidate.
    Retry {
        /// Why this attempt failed.
        error: VellumError,
        /// Whether the topology should be refreshed.
        refresh_topology: bool,
    },
    /// Stop and return this error.
    Terminal(VellumError),
}

impl Failure {
    /// The underlying error.
    pub fn into_error(self) -> VellumError {
        match self {
            Self::Retry { error, .. } | Self::Terminal(error) => error,
        }
    }
}

/// Structured error body the server sends with failures.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
struct ServerErrorBody {
    #[serde(rename = "Type")]
    kind: Option<String>,
    message: Option<String>,
    error: Option<String>,
    expected: Option<String>,
    expected_change_vector: Option<String>,
    actual: Option<String>,
    actual_change_vector: Option<String>,
}

impl ServerErrorBody {
    // A body that fails to parse degrades to an empty one.
    fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_default()
    }
}

/// Classifies exchanges according to a [`FailoverPolicy`].
#[derive(Debug, Clone, Default)]
pub struct ExceptionDispatcher {
    policy: FailoverPolicy,
}

impl ExceptionDispatcher {
    /// Create a dispatcher.
    pub fn new(policy: FailoverPolicy) -> Self {
        Self { policy }
    }

    /// The status policy in force.
    pub fn policy(&self) -> &FailoverPolicy {
        &self.policy
    }

    /// Classify a response.
    pub fn classify(&self, descriptor: &RequestDescriptor, response: &HttpResponse) -> Disposition {
        let status = response.status;

        if response.is_success() || response.is_not_modified() {
            return Disposition::Success;
        }

        let failure = match status {
            404 => return Disposition::NotFound,
            409 => Failure::Terminal(conflict(descriptor, response)),
            s if self.policy.refresh_statuses.contains(&s) => Failure::Retry {
                error: unclassified(response),
                refresh_topology: true,
            },
            s if self.policy.retryable_statuses.contains(&s) => Failure::Retry {
                error: unclassified(response),
                refresh_topology: false,
            },
            400..=499 => Failure::Terminal(VellumError::ValidationOrAuth {
                status,
                message: error_message(response),
            }),
            _ => Failure::Terminal(unclassified(response)),
        };
        Disposition::Failed(failure)
    }

    /// Classify a transport failure. These are always retryable.
    pub fn classify_transport(&self, url: &str, error: TransportError) -> Failure {
        Failure::Retry {
            error: VellumError::Transport {
                url: url.to_string(),
                source: error,
            },
            refresh_topology: false,
        }
    }

    /// True if the server asked the client to refetch the topology.
    pub fn refresh_requested(response: &HttpResponse) -> bool {
        response
            .header(headers::REFRESH_TOPOLOGY)
            .is_some_and(|v| v.trim().eq_ignore_ascii_case("true"))
    }
}

fn conflict(descriptor: &RequestDescriptor, response: &HttpResponse) -> VellumError {
    let body = ServerErrorBody::parse(&response.body);
    let message = describe(&body, response);

    VellumError::ConcurrencyConflict {
        expected: body
            .expected
            .or(body.expected_change_vector)
            .or_else(|| descriptor.expected_version.clone()),
        actual: body
            .actual
            .or(body.actual_change_vector)
            .or_else(|| response.etag().map(str::to_string)),
        message,
    }
}

fn unclassified(response: &HttpResponse) -> VellumError {
    VellumError::Unclassified {
        status: response.status,
        message: error_message(response),
        body: response.body_string(),
    }
}

fn error_message(response: &HttpResponse) -> String {
    describe(&ServerErrorBody::parse(&response.body), response)
}

fn describe(body: &ServerErrorBody, response: &HttpResponse) -> String {
    let message = body.message.as_ref().or(body.error.as_ref()).cloned();

    match (&body.kind, message) {
        (Some(kind), Some(message)) => format!("{}: {}", kind, message),
        (None, Some(message)) => message,
        _ => {
            let raw = response.body_string();
            if raw.trim().is_empty() {
                format!("HTTP {}", response.status)
            } else {
                raw
            }
        }
    }
}
