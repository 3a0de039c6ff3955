//! The request executor.
//!
//! One [`RequestExecutor`] serves every caller of one database (or of the
//! cluster, when built without a database). Each call walks a small state
//! machine:
//!
//! ```text
//! SelectNode ──► Send(node) ──► Success            (return)
//!     ▲              │
//!     │              ├────────► Terminal           (return error)
//!     │              ▼
//!     └──── RetryableFailure(node, error)
//! ```
//!
//! `SelectNode` with no candidates left ends the call with
//! [`VellumError::ClusterUnreachable`]. Only transport failures and the
//! statuses in the failover policy lead to `RetryableFailure`.

use crate::cache::{CacheEntry, CacheKey, ResponseCache};
use crate::config::ExecutorConfig;
use crate::dispatcher::{Disposition, ExceptionDispatcher, Failure};
use crate::failover::FailoverState;
use crate::raft::{RaftIdGenerator, RaftIdTagger};
use crate::selector::NodeSelector;
use crate::transport::{ReqwestTransport, send_with_timeout};
use crate::watcher::{TopologyHolder, TopologySource, TopologyWatcher, WatcherSettings};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::sync::OnceCell;
use tracing::instrument;
use vellum_core::transport::headers;
use vellum_core::{
    Command, HttpRequest, HttpResponse, HttpTransport, NodeFailure, RequestDescriptor, Result,
    RouteScope, ServerNode, Topology, VellumError,
};

/// Outcome of a successful call.
#[derive(Debug)]
pub struct Execution<T> {
    /// Decoded result; `None` for empty bodies and for reads that found nothing.
    pub result: Option<T>,
    /// Node that answered.
    pub node: ServerNode,
    /// Attempts that failed before the answering one.
    pub failed_attempts: Vec<NodeFailure>,
    /// True if the payload was served from cache after a `304`.
    pub from_cache: bool,
}

enum Step {
    SelectNode,
    Send(usize),
    RetryableFailure {
        node: usize,
        error: VellumError,
        refresh_topology: bool,
    },
}

enum Attempt {
    Success {
        payload: Vec<u8>,
        from_cache: bool,
    },
    Empty,
    Failed(Failure),
}

/// Fixed inputs of one call.
struct CallContext<'a> {
    descriptor: &'a RequestDescriptor,
    raft_id: Option<&'a str>,
    cache_key: Option<CacheKey>,
    cached: Option<Arc<CacheEntry>>,
}

/// Routes commands to cluster nodes with failover, caching and idempotent retries.
///
/// # Example
///
/// ```no_run
/// use vellum_client::{ExecutorConfig, RequestExecutor};
/// use vellum_core::RequestDescriptor;
///
/// # async fn example() -> vellum_core::Result<()> {
/// let config = ExecutorConfig::builder()
///     .url("http://10.0.0.1:8080")
///     .url("http://10.0.0.2:8080")
///     .database("orders")
///     .build()?;
/// let executor = RequestExecutor::new(config)?;
///
/// let order = executor
///     .execute(&RequestDescriptor::get("/docs?id=orders/1"))
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct RequestExecutor {
    config: ExecutorConfig,
    transport: Arc<dyn HttpTransport>,
    topology: Arc<TopologyHolder>,
    cache: Arc<ResponseCache>,
    selector: NodeSelector,
    dispatcher: ExceptionDispatcher,
    tagger: RaftIdTagger,
    watcher: Arc<TopologyWatcher>,
    round_robin: AtomicU64,
    bootstrap: OnceCell<()>,
}

impl RequestExecutor {
    /// Create an executor that talks HTTP through reqwest.
    pub fn new(config: ExecutorConfig) -> Result<Self> {
        let transport = ReqwestTransport::with_timeout(config.request_timeout())?;
        Self::with_transport(config, Arc::new(transport))
    }

    /// Create an executor over a custom transport.
    pub fn with_transport(config: ExecutorConfig, transport: Arc<dyn HttpTransport>) -> Result<Self> {
        config.validate()?;

        let topology = Arc::new(TopologyHolder::new(Topology::seed(
            config.urls.as_slice(),
            config.database.as_deref(),
        )));
        let dispatcher = ExceptionDispatcher::new(config.failover.clone());
        let source = match &config.database {
            Some(name) => TopologySource::Database(name.clone()),
            None => TopologySource::Cluster,
        };
        let watcher = Arc::new(TopologyWatcher::new(
            topology.clone(),
            transport.clone(),
            dispatcher.clone(),
            WatcherSettings {
                source,
                seeds: config.urls.clone(),
                api_key: config.api_key.clone(),
                request_timeout: config.request_timeout(),
            },
        ));

        Ok(Self {
            cache: Arc::new(ResponseCache::new(config.cache_max_age())),
            selector: NodeSelector::new(config.read_balance, config.cluster_mode),
            tagger: RaftIdTagger::new(),
            round_robin: AtomicU64::new(0),
            bootstrap: OnceCell::new(),
            config,
            transport,
            topology,
            dispatcher,
            watcher,
        })
    }

    /// Replace the raft id source.
    #[must_use]
    pub fn with_raft_id_generator(mut self, generator: impl RaftIdGenerator + 'static) -> Self {
        self.tagger = RaftIdTagger::with_generator(generator);
        self
    }

    /// Configuration in force.
    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    /// Current topology snapshot.
    pub fn topology(&self) -> Arc<Topology> {
        self.topology.current()
    }

    /// The response cache.
    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// The topology watcher.
    pub fn watcher(&self) -> &TopologyWatcher {
        &self.watcher
    }

    /// The node selector and its statistics.
    pub fn selector(&self) -> &NodeSelector {
        &self.selector
    }

    /// Failed attempts per node URL since the executor was created.
    pub fn node_failures(&self) -> HashMap<String, u64> {
        self.selector.stats().failures()
    }

    /// Install a snapshot obtained elsewhere. Stale snapshots are discarded.
    pub fn update_topology(&self, topology: Topology) -> bool {
        self.topology.try_update(topology)
    }

    /// Fetch the topology now instead of waiting for the watcher.
    pub async fn refresh_topology(&self) -> Result<bool> {
        self.watcher.refresh().await
    }

    /// Stop the background watcher. Calls in flight are not affected.
    pub fn close(&self) {
        self.watcher.stop();
    }

    /// Run a command and decode its result.
    pub async fn execute<C: Command>(&self, command: &C) -> Result<Option<C::Output>> {
        let seed = self.round_robin.fetch_add(1, Ordering::Relaxed);
        Ok(self.run(command.descriptor(), seed).await?.result)
    }

    /// Run a command with a fixed round-robin seed, so calls with the same
    /// seed start at the same node.
    pub async fn execute_with_seed<C: Command>(
        &self,
        command: &C,
        seed: u64,
    ) -> Result<Option<C::Output>> {
        Ok(self.run(command.descriptor(), seed).await?.result)
    }

    /// Run a command and report how it was served.
    pub async fn execute_detailed<C: Command>(&self, command: &C) -> Result<Execution<C::Output>> {
        let seed = self.round_robin.fetch_add(1, Ordering::Relaxed);
        self.run(command.descriptor(), seed).await
    }

    /// Returns true if this call performed the bootstrap fetch.
    async fn ensure_started(&self) -> bool {
        if !self.config.topology_updates {
            return false;
        }

        let fetched = AtomicBool::new(false);
        self.bootstrap
            .get_or_init(|| async {
                if self.topology.current().is_seed() {
                    fetched.store(true, Ordering::Relaxed);
                    if let Err(e) = self.watcher.refresh().await {
                        tracing::warn!(error = %e, "Initial topology fetch failed, using seed nodes");
                    }
                }
                self.watcher.start(
                    self.config.topology_refresh_interval(),
                    self.config.cache_enabled.then(|| self.cache.clone()),
                );
            })
            .await;
        fetched.into_inner()
    }

    #[instrument(
        name = "request_execution",
        skip_all,
        fields(
            method = %descriptor.method,
            route = %descriptor.route,
            database = ?self.config.database,
            raft_id = tracing::field::Empty,
        )
    )]
    async fn run<T: DeserializeOwned>(
        &self,
        descriptor: RequestDescriptor,
        seed: u64,
    ) -> Result<Execution<T>> {
        if descriptor.scope == RouteScope::Database && self.config.database.is_none() {
            return Err(VellumError::Config(format!(
                "{} is database-scoped but the executor has no database",
                descriptor.route
            )));
        }

        let bootstrapped = self.ensure_started().await;

        // Drawn once, reused on every attempt of this call.
        let raft_id = self.tagger.tag(&descriptor);
        if let Some(id) = &raft_id {
            tracing::Span::current().record("raft_id", id.as_str());
        }

        let cache_key = (self.config.cache_enabled && descriptor.is_cacheable()).then(|| {
            CacheKey::new(
                self.database_for(&descriptor),
                descriptor.method,
                descriptor.route.clone(),
            )
        });
        let cached = cache_key.as_ref().and_then(|key| self.cache.get(key));

        let ctx = CallContext {
            descriptor: &descriptor,
            raft_id: raft_id.as_deref(),
            cache_key,
            cached,
        };

        let topology = self.topology.current();
        let candidates = self.selector.select(&topology, descriptor.is_read, seed)?;
        let mut state = FailoverState::new(topology, candidates, self.watcher.last_refresh());
        if bootstrapped {
            // The bootstrap fetch is this call's refresh.
            state.claim_refresh();
        }
        let mut step = Step::SelectNode;

        loop {
            step = match step {
                Step::SelectNode => match state.next_candidate() {
                    Some(index) => Step::Send(index),
                    None => {
                        tracing::warn!(
                            attempts = state.attempts(),
                            etag = state.topology().etag,
                            last_node = ?state.last_tried().map(|i| &state.topology().nodes[i].url),
                            since_refresh_ms = ?state.last_refresh().map(|t| t.elapsed().as_millis() as u64),
                            "All topology nodes are down"
                        );
                        if state.claim_refresh() {
                            self.watcher.request_refresh();
                        }
                        return Err(state.into_unreachable());
                    }
                },

                Step::Send(index) => {
                    let node = state.topology().nodes[index].clone();
                    let etag = state.topology().etag;

                    match self.attempt(&ctx, &node, etag, &mut state).await {
                        Attempt::Success {
                            payload,
                            from_cache,
                        } => {
                            return Ok(Execution {
                                result: decode(&payload)?,
                                node,
                                failed_attempts: state.into_failures(),
                                from_cache,
                            });
                        }
                        Attempt::Empty => {
                            return Ok(Execution {
                                result: None,
                                node,
                                failed_attempts: state.into_failures(),
                                from_cache: false,
                            });
                        }
                        Attempt::Failed(Failure::Retry {
                            error,
                            refresh_topology,
                        }) => Step::RetryableFailure {
                            node: index,
                            error,
                            refresh_topology,
                        },
                        Attempt::Failed(Failure::Terminal(error)) => return Err(error),
                    }
                }

                Step::RetryableFailure {
                    node,
                    error,
                    refresh_topology,
                } => {
                    let url = state.topology().nodes[node].url.clone();
                    self.selector.stats().record_failure(&url);
                    state.record_failure(node, error);

                    tracing::warn!(
                        node = %url,
                        errors = state.error_count(node),
                        attempt = state.attempts(),
                        "Attempt failed, trying next node"
                    );
                    if refresh_topology && state.claim_refresh() {
                        self.watcher.request_refresh();
                    }
                    Step::SelectNode
                }
            };
        }
    }

    async fn attempt(
        &self,
        ctx: &CallContext<'_>,
        node: &ServerNode,
        topology_etag: i64,
        state: &mut FailoverState,
    ) -> Attempt {
        let descriptor = ctx.descriptor;
        let request = self.build_request(ctx, node, topology_etag);
        let url = request.url.clone();

        tracing::debug!(node = %node.url, attempt = state.attempts() + 1, "Sending request");

        let started = Instant::now();
        let response =
            match send_with_timeout(self.transport.as_ref(), request, self.config.request_timeout())
                .await
            {
                Ok(response) => response,
                Err(error) => {
                    return Attempt::Failed(self.dispatcher.classify_transport(&url, error));
                }
            };

        if ExceptionDispatcher::refresh_requested(&response) && state.claim_refresh() {
            tracing::debug!(node = %node.url, "Server signalled topology change");
            self.watcher.request_refresh();
        }

        match self.dispatcher.classify(descriptor, &response) {
            Disposition::Success => {
                self.selector
                    .stats()
                    .record_success(&node.url, started.elapsed());
                tracing::debug!(node = %node.url, status = response.status, "Request succeeded");
                self.on_success(ctx, response)
            }
            Disposition::NotFound => {
                if descriptor.is_read && !descriptor.require_existence {
                    if let Some(key) = &ctx.cache_key {
                        self.cache.remove(key);
                    }
                    Attempt::Empty
                } else {
                    Attempt::Failed(Failure::Terminal(VellumError::NotFound {
                        route: descriptor.route.clone(),
                    }))
                }
            }
            Disposition::Failed(failure) => {
                tracing::debug!(node = %node.url, status = response.status, "Request failed");
                Attempt::Failed(failure)
            }
        }
    }

    fn on_success(&self, ctx: &CallContext<'_>, response: HttpResponse) -> Attempt {
        let descriptor = ctx.descriptor;

        if response.is_not_modified() {
            return match &ctx.cached {
                Some(entry) => Attempt::Success {
                    payload: entry.payload.clone(),
                    from_cache: true,
                },
                None => Attempt::Empty,
            };
        }

        if let Some(key) = &ctx.cache_key {
            match response.etag() {
                Some(validator) => {
                    self.cache
                        .put(key.clone(), validator.to_string(), response.body.clone())
                }
                None => {
                    self.cache.remove(key);
                }
            }
        }

        if !descriptor.is_read {
            self.cache.invalidate(
                self.database_for(descriptor),
                descriptor.invalidation_prefix(),
            );
        }

        if response.status == 204 {
            return Attempt::Empty;
        }
        Attempt::Success {
            payload: response.body,
            from_cache: false,
        }
    }

    fn build_request(
        &self,
        ctx: &CallContext<'_>,
        node: &ServerNode,
        topology_etag: i64,
    ) -> HttpRequest {
        let descriptor = ctx.descriptor;
        let url = match (descriptor.scope, self.config.database.as_deref()) {
            (RouteScope::Database, Some(database)) => format!(
                "{}/databases/{}{}",
                node.base_url(),
                urlencoding::encode(database),
                descriptor.route
            ),
            _ => format!("{}{}", node.base_url(), descriptor.route),
        };

        let mut request = HttpRequest::new(descriptor.method, url)
            .with_header(headers::ACCEPT, "application/json")
            .with_header(headers::TOPOLOGY_ETAG, topology_etag.to_string());

        if let Some(key) = &self.config.api_key {
            request = request.with_header(headers::AUTHORIZATION, format!("Bearer {}", key));
        }
        if let Some(entry) = &ctx.cached {
            request = request.with_header(headers::IF_NONE_MATCH, entry.validator.clone());
        }
        if let Some(version) = &descriptor.expected_version {
            request = request.with_header(headers::IF_MATCH, version.clone());
        }
        if let Some(id) = ctx.raft_id {
            request = request.with_header(headers::RAFT_REQUEST_ID, id);
        }
        if let Some(body) = &descriptor.body {
            request = request.with_header(headers::CONTENT_TYPE, "application/json");
            request.body = Some(body.clone());
        }

        request
    }

    fn database_for<'a>(&'a self, descriptor: &RequestDescriptor) -> Option<&'a str> {
        match descriptor.scope {
            RouteScope::Database => self.config.database.as_deref(),
            RouteScope::Server => None,
        }
    }
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<Option<T>> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(payload)?))
}

impl Drop for RequestExecutor {
    fn drop(&mut self) {
        self.watcher.stop();
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("database", &self.config.database)
            .field("topology_etag", &self.topology.current().etag)
            .field("cached_entries", &self.cache.len())
            .finish_non_exhaustive()
    }
}
