//! Topology ownership and refresh.
//!
//! [`TopologyHolder`] owns the current snapshot. Readers clone the `Arc` and
//! keep using it for the rest of their call; refreshes swap in a new `Arc`
//! only when its etag is strictly greater, so racing refreshes can finish in
//! any order without regressing the held snapshot.
//!
//! [`TopologyWatcher`] fetches snapshots: on demand ([`TopologyWatcher::refresh`]),
//! when signalled ([`TopologyWatcher::request_refresh`]), and on a timer once
//! its loop is started.

use crate::cache::ResponseCache;
use crate::commands::{GetClusterTopology, GetDatabaseTopology};
use crate::dispatcher::{Disposition, ExceptionDispatcher};
use crate::transport::send_with_timeout;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Notify, oneshot};
use tokio::time::MissedTickBehavior;
use vellum_core::transport::headers;
use vellum_core::{
    ClusterTopologyResponse, Command, DatabaseTopologyResponse, HttpMethod, HttpRequest,
    HttpTransport, NodeFailure, Result, ServerNode, Topology, VellumError,
};

/// Holds the current topology snapshot.
#[derive(Debug)]
pub struct TopologyHolder {
    current: RwLock<Arc<Topology>>,
}

impl TopologyHolder {
    /// Start with `topology`.
    pub fn new(topology: Topology) -> Self {
        Self {
            current: RwLock::new(Arc::new(topology)),
        }
    }

    /// Current snapshot.
    pub fn current(&self) -> Arc<Topology> {
        self.current.read().clone()
    }

    /// Install `candidate` if it supersedes the held snapshot.
    ///
    /// Returns true if it was installed.
    pub fn try_update(&self, candidate: Topology) -> bool {
        let mut current = self.current.write();
        if !candidate.supersedes(&current) {
            tracing::debug!(
                held = current.etag,
                offered = candidate.etag,
                "Discarding stale topology"
            );
            return false;
        }

        tracing::info!(
            previous = current.etag,
            etag = candidate.etag,
            nodes = candidate.len(),
            leader = ?candidate.leader,
            "Topology updated"
        );
        *current = Arc::new(candidate);
        true
    }
}

/// Where snapshots come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopologySource {
    /// `GET /topology?name={database}`
    Database(String),
    /// `GET /cluster/topology`
    Cluster,
}

impl TopologySource {
    fn descriptor(&self) -> vellum_core::RequestDescriptor {
        match self {
            Self::Database(name) => GetDatabaseTopology::new(name.as_str()).descriptor(),
            Self::Cluster => GetClusterTopology.descriptor(),
        }
    }

    fn parse(&self, body: &[u8]) -> Result<Topology> {
        Ok(match self {
            Self::Database(_) => serde_json::from_slice::<DatabaseTopologyResponse>(body)?.into(),
            Self::Cluster => serde_json::from_slice::<ClusterTopologyResponse>(body)?.into(),
        })
    }
}

/// Watcher state.
///
/// A failed refresh returns the watcher to `Idle` with the held topology
/// untouched; [`TopologyWatcher::last_error`] reports what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatcherState {
    /// No refresh in flight.
    Idle,
    /// At least one refresh is in flight.
    Refreshing,
}

/// Settings for a [`TopologyWatcher`].
#[derive(Debug, Clone)]
pub struct WatcherSettings {
    /// Where to fetch from.
    pub source: TopologySource,
    /// Seed URLs tried after the nodes of the held snapshot.
    pub seeds: Vec<String>,
    /// Bearer token.
    pub api_key: Option<String>,
    /// Per-node fetch timeout.
    pub request_timeout: Duration,
}

/// Fetches topology snapshots and swaps them into a [`TopologyHolder`].
pub struct TopologyWatcher {
    holder: Arc<TopologyHolder>,
    transport: Arc<dyn HttpTransport>,
    dispatcher: ExceptionDispatcher,
    settings: WatcherSettings,
    in_flight: AtomicUsize,
    last_error: Mutex<Option<String>>,
    last_refresh: Mutex<Option<Instant>>,
    refresh_requests: AtomicU64,
    notify: Notify,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl TopologyWatcher {
    /// Create a watcher. Nothing runs until [`refresh`](Self::refresh) or
    /// [`start`](Self::start) is called.
    pub fn new(
        holder: Arc<TopologyHolder>,
        transport: Arc<dyn HttpTransport>,
        dispatcher: ExceptionDispatcher,
        settings: WatcherSettings,
    ) -> Self {
        Self {
            holder,
            transport,
            dispatcher,
            settings,
            in_flight: AtomicUsize::new(0),
            last_error: Mutex::new(None),
            last_refresh: Mutex::new(None),
            refresh_requests: AtomicU64::new(0),
            notify: Notify::new(),
            shutdown_tx: Mutex::new(None),
        }
    }

    /// Current state.
    pub fn state(&self) -> WatcherState {
        if self.in_flight.load(Ordering::SeqCst) > 0 {
            WatcherState::Refreshing
        } else {
            WatcherState::Idle
        }
    }

    /// Error of the last refresh, if it failed. Cleared by a successful one.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    /// When the last successful refresh finished.
    pub fn last_refresh(&self) -> Option<Instant> {
        *self.last_refresh.lock()
    }

    /// Number of refresh signals received.
    pub fn refresh_requests(&self) -> u64 {
        self.refresh_requests.load(Ordering::SeqCst)
    }

    /// True while the background loop is running.
    pub fn is_running(&self) -> bool {
        self.shutdown_tx.lock().is_some()
    }

    /// Ask the loop for a refresh without waiting for it.
    ///
    /// Signals coalesce: several requests while a refresh is running lead to
    /// one more refresh, not one each.
    pub fn request_refresh(&self) {
        self.refresh_requests.fetch_add(1, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Fetch a snapshot now, trying each known node until one answers.
    ///
    /// Returns whether the fetched snapshot replaced the held one. Fails with
    /// `ClusterUnreachable` when no node answered; the held topology is kept.
    pub async fn refresh(&self) -> Result<bool> {
        let _guard = InFlight::enter(&self.in_flight);
        let outcome = self.refresh_once().await;
        *self.last_error.lock() = outcome.as_ref().err().map(ToString::to_string);
        outcome
    }

    async fn refresh_once(&self) -> Result<bool> {
        let snapshot = self.holder.current();
        let mut failures = Vec::new();

        for node in self.refresh_targets(&snapshot) {
            match self.fetch(&node).await {
                Ok(topology) => {
                    *self.last_refresh.lock() = Some(Instant::now());
                    return Ok(self.holder.try_update(topology));
                }
                Err(error) => {
                    tracing::debug!(node = %node.url, error = %error, "Topology fetch failed");
                    failures.push(NodeFailure { node, error });
                }
            }
        }

        tracing::warn!(
            attempts = failures.len(),
            etag = snapshot.etag,
            "Topology refresh reached no node, keeping current topology"
        );
        Err(VellumError::ClusterUnreachable {
            topology: snapshot,
            failures,
        })
    }

    // Nodes of the held snapshot first, then any seed not among them.
    fn refresh_targets(&self, snapshot: &Topology) -> Vec<ServerNode> {
        let mut targets = snapshot.nodes.clone();
        let database = match &self.settings.source {
            TopologySource::Database(name) => Some(name.as_str()),
            TopologySource::Cluster => None,
        };

        for seed in Topology::seed(self.settings.seeds.as_slice(), database).nodes {
            if !targets.iter().any(|n| n.base_url() == seed.base_url()) {
                targets.push(seed);
            }
        }
        targets
    }

    async fn fetch(&self, node: &ServerNode) -> Result<Topology> {
        let descriptor = self.settings.source.descriptor();
        let url = format!("{}{}", node.base_url(), descriptor.route);

        let mut request = HttpRequest::new(HttpMethod::Get, url.clone())
            .with_header(headers::ACCEPT, "application/json");
        if let Some(key) = &self.settings.api_key {
            request = request.with_header(headers::AUTHORIZATION, format!("Bearer {}", key));
        }

        let response = send_with_timeout(
            self.transport.as_ref(),
            request,
            self.settings.request_timeout,
        )
        .await
        .map_err(|source| VellumError::Transport {
            url: url.clone(),
            source,
        })?;

        match self.dispatcher.classify(&descriptor, &response) {
            Disposition::Success => self.settings.source.parse(&response.body),
            Disposition::NotFound => Err(VellumError::NotFound {
                route: descriptor.route,
            }),
            Disposition::Failed(failure) => Err(failure.into_error()),
        }
    }

    /// Start the background loop.
    ///
    /// Every `interval` the loop evicts expired cache entries and refreshes;
    /// a [`request_refresh`](Self::request_refresh) signal refreshes at once.
    /// Calling `start` on a running watcher does nothing.
    pub fn start(self: &Arc<Self>, interval: Duration, cache: Option<Arc<ResponseCache>>) {
        let mut slot = self.shutdown_tx.lock();
        if slot.is_some() {
            return;
        }

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        *slot = Some(shutdown_tx);
        drop(slot);

        let watcher = Arc::clone(self);
        tokio::spawn(async move { watcher.run(interval, cache, shutdown_rx).await });
    }

    /// Stop the background loop.
    pub fn stop(&self) {
        if let Some(tx) = self.shutdown_tx.lock().take() {
            let _ = tx.send(());
        }
    }

    async fn run(
        self: Arc<Self>,
        interval: Duration,
        cache: Option<Arc<ResponseCache>>,
        mut shutdown_rx: oneshot::Receiver<()>,
    ) {
        tracing::info!(
            interval_ms = interval.as_millis() as u64,
            "Topology watcher started"
        );

        // Signalled refreshes must not postpone the periodic tick.
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut shutdown_rx => {
                    tracing::info!("Topology watcher shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    if let Some(cache) = &cache {
                        let evicted = cache.evict_expired();
                        if evicted > 0 {
                            tracing::debug!(evicted, "Evicted expired cache entries");
                        }
                    }
                    let _ = self.refresh().await;
                }
                _ = self.notify.notified() => {
                    tracing::debug!("Topology refresh requested");
                    let _ = self.refresh().await;
                }
            }
        }
    }
}

/// Counts a refresh as in flight until dropped, including on cancellation.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl Drop for TopologyWatcher {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for TopologyWatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TopologyWatcher")
            .field("source", &self.settings.source)
            .field("state", &self.state())
            .field("refresh_requests", &self.refresh_requests())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vellum_core::testing::MockTransport;

    fn settings(source: TopologySource, seeds: &[&str]) -> WatcherSettings {
        WatcherSettings {
            source,
            seeds: seeds.iter().map(|s| s.to_string()).collect(),
            api_key: None,
            request_timeout: Duration::from_secs(1),
        }
    }

    fn database_topology(etag: i64, urls: &[(&str, &str)]) -> serde_json::Value {
        let nodes: Vec<_> = urls
            .iter()
            .map(|(tag, url)| json!({"Url": url, "ClusterTag": tag, "Database": "orders"}))
            .collect();
        json!({"Etag": etag, "Nodes": nodes})
    }

    fn watcher(mock: MockTransport, seeds: &[&str]) -> (Arc<TopologyHolder>, TopologyWatcher) {
        let holder = Arc::new(TopologyHolder::new(Topology::seed(seeds, Some("orders"))));
        let watcher = TopologyWatcher::new(
            holder.clone(),
            Arc::new(mock),
            ExceptionDispatcher::default(),
            settings(TopologySource::Database("orders".to_string()), seeds),
        );
        (holder, watcher)
    }

    #[test]
    fn holder_rejects_stale_snapshots() {
        let holder = TopologyHolder::new(Topology::new(Vec::new(), 5));

        assert!(!holder.try_update(Topology::new(vec![ServerNode::new("http://a:8080", "A")], 5)));
        assert!(!holder.try_update(Topology::new(vec![ServerNode::new("http://a:8080", "A")], 4)));
        assert!(holder.try_update(Topology::new(vec![ServerNode::new("http://a:8080", "A")], 6)));
        assert_eq!(holder.current().etag, 6);
    }

    #[test]
    fn in_flight_snapshot_survives_swap() {
        let holder = TopologyHolder::new(Topology::new(vec![ServerNode::new("http://a:8080", "A")], 1));
        let in_flight = holder.current();

        holder.try_update(Topology::new(vec![ServerNode::new("http://b:8080", "B")], 2));

        assert_eq!(in_flight.nodes[0].cluster_tag, "A");
        assert_eq!(holder.current().nodes[0].cluster_tag, "B");
    }

    #[tokio::test]
    async fn refresh_installs_fetched_topology() {
        let mock = MockTransport::new()
            .on_get(r"^http://a:8080/topology\?name=orders$")
            .respond_json(
                200,
                database_topology(3, &[("A", "http://a:8080"), ("B", "http://b:8080")]),
            );
        let (holder, watcher) = watcher(mock, &["http://a:8080"]);

        assert!(watcher.refresh().await.unwrap());
        let topology = holder.current();
        assert_eq!(topology.etag, 3);
        assert_eq!(topology.nodes[1].cluster_tag, "B");
        assert_eq!(watcher.state(), WatcherState::Idle);
        assert!(watcher.last_refresh().is_some());
    }

    #[tokio::test]
    async fn refresh_tries_next_node() {
        let mock = MockTransport::new()
            .on_any(r"^http://a:8080/")
            .refuse()
            .on_get(r"^http://b:8080/topology")
            .respond_json(200, database_topology(2, &[("B", "http://b:8080")]));
        let (holder, watcher) = watcher(mock, &["http://a:8080", "http://b:8080"]);

        assert!(watcher.refresh().await.unwrap());
        assert_eq!(holder.current().etag, 2);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_topology() {
        let mock = MockTransport::new().on_any(r".*").refuse();
        let (holder, watcher) = watcher(mock, &["http://a:8080", "http://b:8080"]);

        let error = watcher.refresh().await.unwrap_err();
        match error {
            VellumError::ClusterUnreachable { failures, .. } => assert_eq!(failures.len(), 2),
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(holder.current().is_seed());
        assert_eq!(watcher.state(), WatcherState::Idle);
        assert!(watcher.last_error().is_some());
    }

    #[tokio::test]
    async fn successful_refresh_clears_last_error() {
        let mock = MockTransport::new()
            .on_get(r"^http://a:8080/topology")
            .times(1)
            .refuse()
            .on_get(r"^http://a:8080/topology")
            .respond_json(200, database_topology(2, &[("A", "http://a:8080")]));
        let (holder, watcher) = watcher(mock, &["http://a:8080"]);

        assert!(watcher.refresh().await.is_err());
        assert_eq!(watcher.state(), WatcherState::Idle);
        assert!(watcher.last_error().is_some());

        assert!(watcher.refresh().await.unwrap());
        assert_eq!(holder.current().etag, 2);
        assert!(watcher.last_error().is_none());
    }

    #[tokio::test]
    async fn concurrent_refreshes_keep_newest_snapshot() {
        // The first fetch is slow and carries the older etag.
        let mock = MockTransport::new()
            .on_get(r"^http://a:8080/topology")
            .times(1)
            .with_latency(Duration::from_millis(200))
            .respond_json(200, database_topology(1, &[("A", "http://a:8080")]))
            .on_get(r"^http://a:8080/topology")
            .respond_json(
                200,
                database_topology(2, &[("A", "http://a:8080"), ("B", "http://b:8080")]),
            );
        let (holder, watcher) = watcher(mock, &["http://a:8080"]);

        let (slow, fast) = tokio::join!(watcher.refresh(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            watcher.refresh().await
        });

        assert!(fast.unwrap());
        assert!(!slow.unwrap());
        let topology = holder.current();
        assert_eq!(topology.etag, 2);
        assert_eq!(topology.len(), 2);
    }

    #[tokio::test]
    async fn seeds_are_tried_after_known_nodes() {
        let mock = MockTransport::new()
            .on_any(r"^http://b:8080/")
            .refuse()
            .on_get(r"^http://seed:8080/topology")
            .respond_json(200, database_topology(8, &[("C", "http://c:8080")]));
        let holder = Arc::new(TopologyHolder::new(Topology::new(
            vec![ServerNode::new("http://b:8080", "B")],
            7,
        )));
        let watcher = TopologyWatcher::new(
            holder.clone(),
            Arc::new(mock),
            ExceptionDispatcher::default(),
            settings(TopologySource::Database("orders".to_string()), &["http://seed:8080"]),
        );

        assert!(watcher.refresh().await.unwrap());
        assert_eq!(holder.current().nodes[0].cluster_tag, "C");
    }

    #[tokio::test]
    async fn cluster_source_parses_leader() {
        let mock = MockTransport::new().on_get(r"^http://a:8080/cluster/topology$").respond_json(
            200,
            json!({
                "Leader": "B",
                "Etag": 4,
                "Topology": {"Members": {"A": "http://a:8080", "B": "http://b:8080"}}
            }),
        );
        let holder = Arc::new(TopologyHolder::new(Topology::seed(&["http://a:8080"], None)));
        let watcher = TopologyWatcher::new(
            holder.clone(),
            Arc::new(mock),
            ExceptionDispatcher::default(),
            settings(TopologySource::Cluster, &["http://a:8080"]),
        );

        watcher.refresh().await.unwrap();
        assert_eq!(holder.current().leader.as_deref(), Some("B"));
        assert_eq!(holder.current().leader_index(), Some(1));
    }

    #[tokio::test]
    async fn loop_refreshes_on_signal_and_stops() {
        let mock = MockTransport::new()
            .on_get(r"^http://a:8080/topology")
            .respond_json(200, database_topology(1, &[("A", "http://a:8080")]));
        let (holder, watcher) = watcher(mock, &["http://a:8080"]);
        let watcher = Arc::new(watcher);

        watcher.start(Duration::from_secs(3600), None);
        assert!(watcher.is_running());

        watcher.request_refresh();
        for _ in 0..50 {
            if !holder.current().is_seed() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(holder.current().etag, 1);
        assert_eq!(watcher.refresh_requests(), 1);

        watcher.stop();
        assert!(!watcher.is_running());
    }

    #[tokio::test]
    async fn frequent_signals_do_not_starve_periodic_eviction() {
        let mock = MockTransport::new().on_any(r".*").refuse();
        let (_holder, watcher) = watcher(mock, &["http://a:8080"]);
        let watcher = Arc::new(watcher);
        let cache = Arc::new(ResponseCache::new(Duration::from_millis(40)));
        cache.put(
            crate::cache::CacheKey::new(Some("orders"), HttpMethod::Get, "/docs?id=1"),
            "v1",
            Vec::new(),
        );

        watcher.start(Duration::from_millis(60), Some(cache.clone()));
        for _ in 0..30 {
            watcher.request_refresh();
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(cache.is_empty());
        watcher.stop();
    }
}
