//! Volley Worker
//!
//! The worker side of Volley: everything that actually reaches remote
//! hosts and records what happened.
//!
//! This crate contains:
//! - Executor: The execution engine contract, its registry and the built-in `shell` engine
//! - Task: Task plugins and their registry
//! - Service: Result aggregation for one job
//! - Scheduler: The in-process worker pool that runs submitted jobs

pub mod config;
pub mod executor;
pub mod scheduler;
pub mod service;
pub mod task;

pub use config::WorkerConfig;
pub use executor::{ExecStream, Executor, ExecutorRegistry};
pub use scheduler::WorkerPool;
pub use service::{ResultAggregator, WorkRunner};
pub use task::{TaskPlugin, TaskRegistry};
