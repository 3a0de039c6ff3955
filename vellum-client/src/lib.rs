//! Vellum Client
//!
//! The request execution and topology failover engine of the vellum driver.
//!
//! A [`RequestExecutor`] turns a [`Command`](vellum_core::Command) into a
//! routed HTTP exchange against a multi-node cluster:
//!
//! - [`NodeSelector`] orders the nodes of the current topology according to
//!   the read balance policy and the cluster mode
//! - [`ExceptionDispatcher`] classifies each answer as success, not found,
//!   retryable or terminal
//! - [`ResponseCache`] supplies conditional-request validators and serves
//!   `304` answers
//! - [`RaftIdTagger`] attaches one idempotency token per logical call
//! - [`TopologyWatcher`] keeps the topology fresh in the background
//!
//! # Example
//!
//! ```no_run
//! use vellum_client::{ExecutorConfig, ReadBalance, RequestExecutor};
//! use vellum_core::RequestDescriptor;
//!
//! # async fn example() -> vellum_core::Result<()> {
//! let executor = RequestExecutor::new(
//!     ExecutorConfig::builder()
//!         .urls(["http://10.0.0.1:8080", "http://10.0.0.2:8080"])
//!         .database("orders")
//!         .read_balance(ReadBalance::RoundRobin)
//!         .build()?,
//! )?;
//!
//! let put = RequestDescriptor::put("/docs?id=orders/1")
//!     .with_json_body(&serde_json::json!({"total": 12}))?;
//! executor.execute(&put).await?;
//!
//! let order = executor.execute(&RequestDescriptor::get("/docs?id=orders/1")).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod executor;
mod failover;
pub mod raft;
pub mod selector;
pub mod transport;
pub mod watcher;

pub use cache::{CacheEntry, CacheKey, ResponseCache};
pub use commands::{GetClusterTopology, GetDatabaseTopology};
pub use config::{ClusterMode, ExecutorConfig, ExecutorConfigBuilder, FailoverPolicy, ReadBalance};
pub use dispatcher::{Disposition, ExceptionDispatcher, Failure};
pub use executor::{Execution, RequestExecutor};
pub use raft::{RaftIdGenerator, RaftIdTagger, SequentialRaftIds, UuidRaftIds};
pub use selector::{NodeSelector, NodeStat, NodeStats};
pub use transport::ReqwestTransport;
pub use watcher::{TopologyHolder, TopologySource, TopologyWatcher, WatcherSettings, WatcherState};
