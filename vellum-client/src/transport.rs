//! reqwest-backed transport.

use reqwest::Client as HttpClient;
use std::collections::HashMap;
use std::time::Duration;
use vellum_core::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, Result, TransportError, TransportFuture,
    VellumError,
};

/// Sends requests over HTTP with a shared connection pool.
///
/// Per-attempt timeouts are enforced by the executor. The executor also
/// builds its client with the same timeout so a stalled body read is bounded.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: HttpClient,
}

impl ReqwestTransport {
    /// Create a transport with default settings.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self> {
        let http = HttpClient::builder()
            .build()
            .map_err(|e| VellumError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    /// Create a transport whose client also enforces `timeout`.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let http = HttpClient::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| VellumError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }
}

impl HttpTransport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
        Box::pin(async move {
            let method = match request.method {
                HttpMethod::Get => reqwest::Method::GET,
                HttpMethod::Head => reqwest::Method::HEAD,
                HttpMethod::Post => reqwest::Method::POST,
                HttpMethod::Put => reqwest::Method::PUT,
                HttpMethod::Patch => reqwest::Method::PATCH,
                HttpMethod::Delete => reqwest::Method::DELETE,
            };

            let mut builder = self.http.request(method, &request.url);
            for (key, value) in &request.headers {
                builder = builder.header(key.as_str(), value.as_str());
            }
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await.map_err(map_error)?;

            let status = response.status().as_u16();
            let headers: HashMap<String, String> = response
                .headers()
                .iter()
                .filter_map(|(k, v)| v.to_str().ok().map(|v| (k.to_string(), v.to_string())))
                .collect();
            let body = response.bytes().await.map_err(map_error)?.to_vec();

            Ok(HttpResponse {
                status,
                headers,
                body,
            })
        })
    }
}

fn map_error(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::ConnectionFailed(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}

/// Send with a per-attempt deadline. Expiry is reported like any transport failure.
pub(crate) async fn send_with_timeout(
    transport: &dyn HttpTransport,
    request: HttpRequest,
    timeout: Duration,
) -> std::result::Result<HttpResponse, TransportError> {
    match tokio::time::timeout(timeout, transport.send(request)).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::Timeout),
    }
}
