//! Executor configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use vellum_core::{Result, VellumError};

/// How read requests pick their first node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReadBalance {
    /// Always start at the first node in topology order.
    #[default]
    None,
    /// Start at the node with the lowest observed latency.
    FastestNode,
    /// Rotate the starting node by a seed.
    RoundRobin,
}

impl std::str::FromStr for ReadBalance {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "none" => Ok(Self::None),
            "fastest_node" | "fastest" => Ok(Self::FastestNode),
            "round_robin" => Ok(Self::RoundRobin),
            other => Err(format!("unknown read balance policy: {}", other)),
        }
    }
}

/// How writes are routed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClusterMode {
    /// Writes go to the leader first when one is known.
    #[default]
    SingleLeader,
    /// Writes go to the first node in topology order.
    MultiNode,
}

/// Which response statuses lead to another attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FailoverPolicy {
    /// Statuses retried on the next node.
    pub retryable_statuses: Vec<u16>,

    /// Statuses retried on the next node that also signal a topology refresh.
    /// A node answering one of these no longer serves the database.
    pub refresh_statuses: Vec<u16>,
}

impl Default for FailoverPolicy {
    fn default() -> Self {
        Self {
            retryable_statuses: vec![502, 503, 504],
            refresh_statuses: vec![410],
        }
    }
}

/// Configuration for a [`RequestExecutor`](crate::RequestExecutor).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Seed node URLs used until the first topology is fetched.
    pub urls: Vec<String>,

    /// Database this executor talks to. `None` makes a cluster-level executor.
    pub database: Option<String>,

    /// Read balance policy.
    pub read_balance: ReadBalance,

    /// Write routing mode.
    pub cluster_mode: ClusterMode,

    /// Per-attempt timeout in milliseconds.
    pub request_timeout_ms: u64,

    /// Interval between periodic topology refreshes in milliseconds.
    pub topology_refresh_interval_ms: u64,

    /// Fetch the topology on first use and keep it fresh.
    /// When false the seed URLs are used as-is for the executor's lifetime.
    pub topology_updates: bool,

    /// Enable the conditional-request response cache.
    pub cache_enabled: bool,

    /// Entries older than this are dropped, in milliseconds.
    pub cache_max_age_ms: u64,

    /// Status policy table.
    pub failover: FailoverPolicy,

    /// Bearer token sent with every request.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            urls: Vec::new(),
            database: None,
            read_balance: ReadBalance::None,
            cluster_mode: ClusterMode::SingleLeader,
            request_timeout_ms: 30_000,
            topology_refresh_interval_ms: 60_000,
            topology_updates: true,
            cache_enabled: true,
            cache_max_age_ms: 300_000,
            failover: FailoverPolicy::default(),
            api_key: None,
        }
    }
}

impl ExecutorConfig {
    /// Create a new configuration builder.
    pub fn builder() -> ExecutorConfigBuilder {
        ExecutorConfigBuilder::default()
    }

    /// Load a configuration from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| VellumError::Config(format!("invalid YAML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Per-attempt timeout as a Duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Topology refresh interval as a Duration.
    pub fn topology_refresh_interval(&self) -> Duration {
        Duration::from_millis(self.topology_refresh_interval_ms)
    }

    /// Cache max age as a Duration.
    pub fn cache_max_age(&self) -> Duration {
        Duration::from_millis(self.cache_max_age_ms)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.urls.is_empty() {
            return Err(VellumError::Config(
                "at least one seed URL is required".to_string(),
            ));
        }

        for url in &self.urls {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err(VellumError::InvalidUrl(format!(
                    "URL must start with http:// or https://, got: {}",
                    url
                )));
            }
        }

        if let Some(database) = &self.database {
            if database.trim().is_empty() {
                return Err(VellumError::Config(
                    "database name must not be blank".to_string(),
                ));
            }
        }

        if self.request_timeout_ms == 0 {
            return Err(VellumError::Config(
                "request_timeout_ms must be > 0".to_string(),
            ));
        }

        if self.topology_updates && self.topology_refresh_interval_ms == 0 {
            return Err(VellumError::Config(
                "topology_refresh_interval_ms must be > 0".to_string(),
            ));
        }

        let failover = &self.failover;
        if let Some(status) = failover
            .retryable_statuses
            .iter()
            .chain(&failover.refresh_statuses)
            .find(|s| (200..300).contains(*s) || **s == 304 || **s == 404 || **s == 409)
        {
            return Err(VellumError::Config(format!(
                "status {} cannot be treated as retryable",
                status
            )));
        }

        Ok(())
    }
}

/// Builder for ExecutorConfig.
#[derive(Debug, Default)]
pub struct ExecutorConfigBuilder {
    config: ExecutorConfig,
}

impl ExecutorConfigBuilder {
    /// Add a seed URL.
    pub fn url(mut self, url: impl Into<String>) -> Self {
        self.config.urls.push(url.into());
        self
    }

    /// Set all seed URLs at once.
    pub fn urls<S: Into<String>>(mut self, urls: impl IntoIterator<Item = S>) -> Self {
        self.config.urls = urls.into_iter().map(Into::into).collect();
        self
    }

    /// Set the database.
    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.config.database = Some(database.into());
        self
    }

    /// Set the read balance policy.
    pub fn read_balance(mut self, policy: ReadBalance) -> Self {
        self.config.read_balance = policy;
        self
    }

    /// Set the write routing mode.
    pub fn cluster_mode(mut self, mode: ClusterMode) -> Self {
        self.config.cluster_mode = mode;
        self
    }

    /// Set the per-attempt timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.config.request_timeout_ms = timeout.as_millis() as u64;
        self
    }

    /// Set the topology refresh interval.
    pub fn topology_refresh_interval(mut self, interval: Duration) -> Self {
        self.config.topology_refresh_interval_ms = interval.as_millis() as u64;
        self
    }

    /// Enable or disable topology updates.
    pub fn topology_updates(mut self, enabled: bool) -> Self {
        self.config.topology_updates = enabled;
        self
    }

    /// Enable or disable the response cache.
    pub fn cache_enabled(mut self, enabled: bool) -> Self {
        self.config.cache_enabled = enabled;
        self
    }

    /// Set the cache max age.
    pub fn cache_max_age(mut self, max_age: Duration) -> Self {
        self.config.cache_max_age_ms = max_age.as_millis() as u64;
        self
    }

    /// Set the status policy table.
    pub fn failover(mut self, policy: FailoverPolicy) -> Self {
        self.config.failover = policy;
        self
    }

    /// Set the API key.
    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    /// Build the configuration.
    pub fn build(self) -> Result<ExecutorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ExecutorConfig::default();
        assert_eq!(config.read_balance, ReadBalance::None);
        assert_eq!(config.cluster_mode, ClusterMode::SingleLeader);
        assert_eq!(config.request_timeout(), Duration::from_secs(30));
        assert_eq!(config.failover.retryable_statuses, vec![502, 503, 504]);
        assert_eq!(config.failover.refresh_statuses, vec![410]);
        assert!(config.cache_enabled);
    }

    #[test]
    fn test_builder() {
        let config = ExecutorConfig::builder()
            .url("http://a:8080")
            .url("http://b:8080")
            .database("orders")
            .read_balance(ReadBalance::RoundRobin)
            .request_timeout(Duration::from_millis(500))
            .build()
            .unwrap();

        assert_eq!(config.urls.len(), 2);
        assert_eq!(config.database.as_deref(), Some("orders"));
        assert_eq!(config.request_timeout_ms, 500);
    }

    #[test]
    fn test_validation() {
        assert!(matches!(
            ExecutorConfig::builder().build(),
            Err(VellumError::Config(_))
        ));

        assert!(matches!(
            ExecutorConfig::builder().url("a:8080").build(),
            Err(VellumError::InvalidUrl(_))
        ));

        let policy = FailoverPolicy {
            retryable_statuses: vec![409],
            refresh_statuses: vec![],
        };
        assert!(
            ExecutorConfig::builder()
                .url("http://a:8080")
                .failover(policy)
                .build()
                .is_err()
        );
    }

    #[test]
    fn test_from_yaml() {
        let yaml = r#"
urls:
  - http://a:8080
  - http://b:8080
database: orders
read_balance: fastest_node
failover:
  retryable_statuses: [503]
"#;
        let config = ExecutorConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.read_balance, ReadBalance::FastestNode);
        assert_eq!(config.failover.retryable_statuses, vec![503]);
        // Unspecified fields keep their defaults.
        assert_eq!(config.failover.refresh_statuses, vec![410]);
        assert_eq!(config.topology_refresh_interval_ms, 60_000);
    }

    #[test]
    fn test_read_balance_parsing() {
        assert_eq!(
            "round-robin".parse::<ReadBalance>().unwrap(),
            ReadBalance::RoundRobin
        );
        assert_eq!(
            "FASTEST_NODE".parse::<ReadBalance>().unwrap(),
            ReadBalance::FastestNode
        );
        assert!("random".parse::<ReadBalance>().is_err());
    }
}
