//! Rule-based mock transport.

use crate::command::HttpMethod;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError, TransportFuture};
use parking_lot::RwLock;
use regex::Regex;
use std::time::Duration;

/// What a matched rule does.
#[derive(Debug, Clone)]
pub enum MockReply {
    /// Answer with this response.
    Respond(HttpResponse),
    /// Fail at the transport level.
    Fail(TransportError),
}

/// A rule for matching and answering requests.
#[derive(Clone)]
pub struct MockRule {
    /// HTTP method to match (None = any method).
    pub method: Option<HttpMethod>,
    /// URL pattern (regex).
    pub url_pattern: Regex,
    /// Reply to produce.
    pub reply: MockReply,
    /// Simulated latency.
    pub latency: Option<Duration>,
    /// Number of times this rule should match (None = unlimited).
    pub times: Option<usize>,
    /// Number of times this rule has matched.
    matched_count: usize,
}

impl MockRule {
    /// Create a rule matching any method.
    ///
    /// # Panics
    ///
    /// Panics if `url_pattern` is not a valid regex.
    pub fn new(url_pattern: &str, reply: MockReply) -> Self {
        Self {
            method: None,
            url_pattern: Regex::new(url_pattern).expect("Invalid URL regex pattern"),
            reply,
            latency: None,
            times: None,
            matched_count: 0,
        }
    }

    fn matches(&self, method: HttpMethod, url: &str) -> bool {
        if let Some(expected) = self.method {
            if expected != method {
                return false;
            }
        }

        if let Some(limit) = self.times {
            if self.matched_count >= limit {
                return false;
            }
        }

        self.url_pattern.is_match(url)
    }
}

impl std::fmt::Debug for MockRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockRule")
            .field("method", &self.method)
            .field("url_pattern", &self.url_pattern.as_str())
            .field("reply", &self.reply)
            .field("latency", &self.latency)
            .field("times", &self.times)
            .finish()
    }
}

/// Mock transport for engine tests.
///
/// Rules are checked in insertion order; a rule limited with `times(n)` stops
/// matching after `n` hits, so later rules for the same URL script a sequence.
/// Every request is recorded before it is answered.
///
/// # Example
///
/// ```
/// use vellum_core::testing::MockTransport;
/// use serde_json::json;
///
/// let mock = MockTransport::new()
///     .on_any(r"^http://a:8080/").refuse()
///     .on_get(r"^http://b:8080/databases/orders/docs").respond_json(200, json!({"id": 1}));
/// ```
pub struct MockTransport {
    rules: RwLock<Vec<MockRule>>,
    requests: RwLock<Vec<HttpRequest>>,
}

impl MockTransport {
    /// Create an empty mock. Unmatched requests fail with `NoMockMatch`.
    pub fn new() -> Self {
        Self {
            rules: RwLock::new(Vec::new()),
            requests: RwLock::new(Vec::new()),
        }
    }

    /// Add a rule.
    pub fn rule(self, rule: MockRule) -> Self {
        self.rules.write().push(rule);
        self
    }

    /// Add a rule to a mock that is already shared.
    pub fn push_rule(&self, rule: MockRule) {
        self.rules.write().push(rule);
    }

    /// Start a GET rule.
    pub fn on_get(self, url_pattern: &str) -> MockRuleBuilder {
        MockRuleBuilder::new(self, Some(HttpMethod::Get), url_pattern)
    }

    /// Start a PUT rule.
    pub fn on_put(self, url_pattern: &str) -> MockRuleBuilder {
        MockRuleBuilder::new(self, Some(HttpMethod::Put), url_pattern)
    }

    /// Start a POST rule.
    pub fn on_post(self, url_pattern: &str) -> MockRuleBuilder {
        MockRuleBuilder::new(self, Some(HttpMethod::Post), url_pattern)
    }

    /// Start a DELETE rule.
    pub fn on_delete(self, url_pattern: &str) -> MockRuleBuilder {
        MockRuleBuilder::new(self, Some(HttpMethod::Delete), url_pattern)
    }

    /// Start a rule matching any method.
    pub fn on_any(self, url_pattern: &str) -> MockRuleBuilder {
        MockRuleBuilder::new(self, None, url_pattern)
    }

    /// All recorded requests.
    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.read().clone()
    }

    /// Recorded requests whose URL matches `url_pattern`.
    ///
    /// # Panics
    ///
    /// Panics if `url_pattern` is not a valid regex.
    pub fn requests_matching(&self, url_pattern: &str) -> Vec<HttpRequest> {
        let re = Regex::new(url_pattern).expect("Invalid URL pattern");
        self.requests
            .read()
            .iter()
            .filter(|r| re.is_match(&r.url))
            .cloned()
            .collect()
    }

    /// Number of requests made.
    pub fn request_count(&self) -> usize {
        self.requests.read().len()
    }

    /// Clear recorded requests.
    pub fn clear_requests(&self) {
        self.requests.write().clear();
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl HttpTransport for MockTransport {
    fn send(&self, request: HttpRequest) -> TransportFuture<'_> {
        let method = request.method;
        let url = request.url.clone();
        self.requests.write().push(request);

        let matched = {
            let mut rules = self.rules.write();
            rules
                .iter_mut()
                .find(|rule| rule.matches(method, &url))
                .map(|rule| {
                    rule.matched_count += 1;
                    (rule.reply.clone(), rule.latency)
                })
        };

        Box::pin(async move {
            let Some((reply, latency)) = matched else {
                return Err(TransportError::NoMockMatch {
                    method: method.to_string(),
                    url,
                });
            };

            if let Some(delay) = latency {
                tokio::time::sleep(delay).await;
            }

            match reply {
                MockReply::Respond(response) => Ok(response),
                MockReply::Fail(error) => Err(error),
            }
        })
    }
}

/// Builder for fluent rule creation.
pub struct MockRuleBuilder {
    mock: MockTransport,
    method: Option<HttpMethod>,
    url_pattern: String,
    latency: Option<Duration>,
    times: Option<usize>,
}

impl MockRuleBuilder {
    fn new(mock: MockTransport, method: Option<HttpMethod>, url_pattern: &str) -> Self {
        Self {
            mock,
            method,
            url_pattern: url_pattern.to_string(),
            latency: None,
            times: None,
        }
    }

    /// Set simulated latency.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Limit the number of matches.
    pub fn times(mut self, n: usize) -> Self {
        self.times = Some(n);
        self
    }

    /// Finish with an explicit reply.
    pub fn reply(self, reply: MockReply) -> MockTransport {
        let mut rule = MockRule::new(&self.url_pattern, reply);
        rule.method = self.method;
        rule.latency = self.latency;
        rule.times = self.times;
        self.mock.rule(rule)
    }

    /// Answer with a response.
    pub fn respond(self, response: HttpResponse) -> MockTransport {
        self.reply(MockReply::Respond(response))
    }

    /// Answer with a JSON body.
    pub fn respond_json(self, status: u16, value: serde_json::Value) -> MockTransport {
        self.respond(HttpResponse::json(status, &value))
    }

    /// Answer with a structured server error.
    pub fn respond_error(self, status: u16, message: &str) -> MockTransport {
        self.respond_json(
            status,
            serde_json::json!({"Type": "ServerError", "Message": message}),
        )
    }

    /// Refuse the connection.
    pub fn refuse(self) -> MockTransport {
        self.reply(MockReply::Fail(TransportError::ConnectionFailed(
            "connection refused".to_string(),
        )))
    }

    /// Fail with a transport timeout.
    pub fn time_out(self) -> MockTransport {
        self.reply(MockReply::Fail(TransportError::Timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn get(url: &str) -> HttpRequest {
        HttpRequest::new(HttpMethod::Get, url)
    }

    #[tokio::test]
    async fn matches_by_method_and_url() {
        let mock = MockTransport::new()
            .on_get(r"^http://a:8080/docs$")
            .respond_json(200, json!({"name": "Ada"}));

        let response = mock.send(get("http://a:8080/docs")).await.unwrap();
        assert_eq!(response.status, 200);

        let result = mock
            .send(HttpRequest::new(HttpMethod::Put, "http://a:8080/docs"))
            .await;
        assert!(matches!(result, Err(TransportError::NoMockMatch { .. })));
    }

    #[tokio::test]
    async fn times_scripts_a_sequence() {
        let mock = MockTransport::new()
            .on_get(r"^http://a:8080/")
            .times(1)
            .refuse()
            .on_get(r"^http://a:8080/")
            .respond_json(200, json!({}));

        let first = mock.send(get("http://a:8080/docs")).await;
        assert!(matches!(first, Err(TransportError::ConnectionFailed(_))));

        let second = mock.send(get("http://a:8080/docs")).await.unwrap();
        assert_eq!(second.status, 200);
    }

    #[tokio::test]
    async fn records_requests() {
        let mock = MockTransport::new().on_any(r".*").time_out();

        let _ = mock.send(get("http://a:8080/x")).await;
        let _ = mock.send(get("http://b:8080/y")).await;

        assert_eq!(mock.request_count(), 2);
        assert_eq!(mock.requests_matching(r"^http://b:8080/").len(), 1);

        mock.clear_requests();
        assert_eq!(mock.request_count(), 0);
    }

    #[tokio::test]
    async fn push_rule_on_shared_mock() {
        let mock = MockTransport::new();
        mock.push_rule(MockRule::new(
            r"^http://a:8080/",
            MockReply::Respond(HttpResponse::new(204, Vec::new())),
        ));

        let response = mock.send(get("http://a:8080/ping")).await.unwrap();
        assert_eq!(response.status, 204);
    }
}
