//! Per-call failover bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use vellum_core::{NodeFailure, Topology, VellumError};

/// State of one `execute` call. Owned by the calling task, discarded afterwards.
#[derive(Debug)]
pub(crate) struct FailoverState {
    topology: Arc<Topology>,
    candidates: Vec<usize>,
    cursor: usize,
    last_tried: Option<usize>,
    error_counts: HashMap<usize, u32>,
    failures: Vec<NodeFailure>,
    refresh_requested: bool,
    last_refresh: Option<Instant>,
}

impl FailoverState {
    pub(crate) fn new(
        topology: Arc<Topology>,
        candidates: Vec<usize>,
        last_refresh: Option<Instant>,
    ) -> Self {
        Self {
            topology,
            candidates,
            cursor: 0,
            last_tried: None,
            error_counts: HashMap::new(),
            failures: Vec::new(),
            refresh_requested: false,
            last_refresh,
        }
    }

    pub(crate) fn topology(&self) -> &Arc<Topology> {
        &self.topology
    }

    /// Next candidate that has not failed during this call.
    pub(crate) fn next_candidate(&mut self) -> Option<usize> {
        while let Some(&index) = self.candidates.get(self.cursor) {
            self.cursor += 1;
            if !self.error_counts.contains_key(&index) {
                self.last_tried = Some(index);
                return Some(index);
            }
        }
        None
    }

    pub(crate) fn last_tried(&self) -> Option<usize> {
        self.last_tried
    }

    pub(crate) fn record_failure(&mut self, index: usize, error: VellumError) {
        *self.error_counts.entry(index).or_insert(0) += 1;
        self.failures.push(NodeFailure {
            node: self.topology.nodes[index].clone(),
            error,
        });
    }

    pub(crate) fn error_count(&self, index: usize) -> u32 {
        self.error_counts.get(&index).copied().unwrap_or(0)
    }

    /// True the first time it is called; one call signals the watcher at most once.
    pub(crate) fn claim_refresh(&mut self) -> bool {
        !std::mem::replace(&mut self.refresh_requested, true)
    }

    pub(crate) fn last_refresh(&self) -> Option<Instant> {
        self.last_refresh
    }

    pub(crate) fn attempts(&self) -> usize {
        self.failures.len()
    }

    pub(crate) fn into_failures(self) -> Vec<NodeFailure> {
        self.failures
    }

    pub(crate) fn into_unreachable(self) -> VellumError {
        VellumError::ClusterUnreachable {
            topology: self.topology,
            failures: self.failures,
        }
    }
}
