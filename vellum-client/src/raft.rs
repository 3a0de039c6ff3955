//! Idempotency tokens for cluster-mutating commands.
//!
//! A token is drawn once per logical call, before the first attempt, and sent
//! unchanged on every retry. The server uses it to recognize a command it
//! already applied before a failover.

use std::sync::atomic::{AtomicU64, Ordering};
use uuid::Uuid;
use vellum_core::RequestDescriptor;

/// Source of fresh raft request ids.
pub trait RaftIdGenerator: Send + Sync {
    /// Produce a new, never-before-returned id.
    fn next_id(&self) -> String;
}

/// Random v4 UUIDs.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidRaftIds;

impl RaftIdGenerator for UuidRaftIds {
    fn next_id(&self) -> String {
        Uuid::new_v4().to_string()
    }
}

/// Deterministic ids for tests: `00000000-0000-0000-0000-000000000001`, then `...002`.
#[derive(Debug, Default)]
pub struct SequentialRaftIds {
    counter: AtomicU64,
}

impl SequentialRaftIds {
    /// Start at 1.
    pub fn new() -> Self {
        Self::default()
    }
}

impl RaftIdGenerator for SequentialRaftIds {
    fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Uuid::from_u128(u128::from(n)).to_string()
    }
}

/// Attaches tokens to descriptors that need one.
pub struct RaftIdTagger {
    generator: Box<dyn RaftIdGenerator>,
}

impl RaftIdTagger {
    /// Tagger backed by random UUIDs.
    pub fn new() -> Self {
        Self::with_generator(UuidRaftIds)
    }

    /// Tagger backed by a custom generator.
    pub fn with_generator(generator: impl RaftIdGenerator + 'static) -> Self {
        Self {
            generator: Box::new(generator),
        }
    }

    /// Token for one logical call.
    ///
    /// A caller-assigned id is returned as-is; descriptors that do not mutate
    /// cluster state get none.
    pub fn tag(&self, descriptor: &RequestDescriptor) -> Option<String> {
        if !descriptor.raft_id_required {
            return None;
        }
        Some(
            descriptor
                .raft_id
                .clone()
                .unwrap_or_else(|| self.generator.next_id()),
        )
    }
}

impl Default for RaftIdTagger {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for RaftIdTagger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RaftIdTagger").finish_non_exhaustive()
    }
}
