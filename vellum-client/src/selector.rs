//! Node selection.
//!
//! [`NodeSelector::select`] turns a topology into the ordered list of node
//! indices one call will try. Only the first candidate depends on policy;
//! the rest are the remaining nodes in topology order, so every node is
//! reachable no matter which policy picked the first one.

use crate::config::{ClusterMode, ReadBalance};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;
use vellum_core::{Result, Topology, VellumError};

/// Weight of the newest sample in the latency average.
const LATENCY_SMOOTHING: f64 = 0.3;

/// Observed behavior of one node.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NodeStat {
    /// Exponentially weighted average latency of successful attempts.
    pub average_latency: Option<Duration>,
    /// Successful attempts.
    pub successes: u64,
    /// Failed attempts (transport failures and retryable statuses).
    pub failures: u64,
    /// The latest attempt failed. Cleared by the next success.
    pub failing: bool,
}

/// Per-node statistics shared by every call on one executor, keyed by node URL.
#[derive(Debug, Default)]
pub struct NodeStats {
    stats: RwLock<HashMap<String, NodeStat>>,
}

impl NodeStats {
    /// Create empty statistics.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful attempt and fold its latency into the average.
    pub fn record_success(&self, url: &str, latency: Duration) {
        let mut stats = self.stats.write();
        let stat = stats.entry(url.to_string()).or_default();
        stat.successes += 1;
        stat.failing = false;
        stat.average_latency = Some(match stat.average_latency {
            None => latency,
            Some(previous) => previous.mul_f64(1.0 - LATENCY_SMOOTHING)
                + latency.mul_f64(LATENCY_SMOOTHING),
        });
    }

    /// Record a failed attempt. The node stops competing for
    /// [`ReadBalance::FastestNode`] until it succeeds again.
    pub fn record_failure(&self, url: &str) {
        let mut stats = self.stats.write();
        let stat = stats.entry(url.to_string()).or_default();
        stat.failures += 1;
        stat.failing = true;
    }

    /// Statistics for one node.
    pub fn get(&self, url: &str) -> NodeStat {
        self.stats.read().get(url).copied().unwrap_or_default()
    }

    /// Failure counts of every node that has failed at least once.
    pub fn failures(&self) -> HashMap<String, u64> {
        self.stats
            .read()
            .iter()
            .filter(|(_, stat)| stat.failures > 0)
            .map(|(url, stat)| (url.clone(), stat.failures))
            .collect()
    }

    /// Forget everything.
    pub fn reset(&self) {
        self.stats.write().clear();
    }
}

/// Picks the candidate order for a call.
#[derive(Debug)]
pub struct NodeSelector {
    read_balance: ReadBalance,
    cluster_mode: ClusterMode,
    stats: NodeStats,
}

impl NodeSelector {
    /// Create a selector.
    pub fn new(read_balance: ReadBalance, cluster_mode: ClusterMode) -> Self {
        Self {
            read_balance,
            cluster_mode,
            stats: NodeStats::new(),
        }
    }

    /// Configured read balance policy.
    pub fn read_balance(&self) -> ReadBalance {
        self.read_balance
    }

    /// Statistics that feed [`ReadBalance::FastestNode`].
    pub fn stats(&self) -> &NodeStats {
        &self.stats
    }

    /// Ordered candidate indices into `topology.nodes`.
    ///
    /// `seed` only matters for [`ReadBalance::RoundRobin`] reads: equal seeds
    /// on the same topology always start at the same node.
    pub fn select(&self, topology: &Topology, is_read: bool, seed: u64) -> Result<Vec<usize>> {
        let len = topology.len();
        if len == 0 {
            return Err(VellumError::EmptyTopology);
        }

        let first = if is_read {
            self.first_for_read(topology, seed)
        } else {
            self.first_for_write(topology)
        };

        let mut candidates = Vec::with_capacity(len);
        candidates.push(first);
        candidates.extend((0..len).filter(|&i| i != first));
        Ok(candidates)
    }

    fn first_for_write(&self, topology: &Topology) -> usize {
        match self.cluster_mode {
            ClusterMode::SingleLeader => topology.leader_index().unwrap_or(0),
            ClusterMode::MultiNode => 0,
        }
    }

    fn first_for_read(&self, topology: &Topology, seed: u64) -> usize {
        match self.read_balance {
            ReadBalance::None => 0,
            ReadBalance::RoundRobin => (seed % topology.len() as u64) as usize,
            ReadBalance::FastestNode => self.fastest(topology),
        }
    }

    // Failing nodes are skipped, unmeasured ones lose to any measured one,
    // ties keep topology order. With nothing usable, the first node that is
    // not failing wins.
    fn fastest(&self, topology: &Topology) -> usize {
        let stats = self.stats.stats.read();
        let mut best: Option<(usize, Duration)> = None;
        let mut first_healthy = None;

        for (index, node) in topology.nodes.iter().enumerate() {
            let stat = stats.get(&node.url);
            if stat.is_some_and(|s| s.failing) {
                continue;
            }
            first_healthy.get_or_insert(index);

            let Some(latency) = stat.and_then(|s| s.average_latency) else {
                continue;
            };
            match best {
                Some((_, fastest)) if latency >= fastest => {}
                _ => best = Some((index, latency)),
            }
        }

        best.map(|(index, _)| index).or(first_healthy).unwrap_or(0)
    }
}
