//! Application context
//!
//! Everything a request handler needs, built once at startup:
//! - the configuration
//! - the coordination store
//! - the execution engine and the task plugins
//! - the background substrate jobs are submitted to

use anyhow::Context as AnyhowContext;
use std::sync::Arc;
use tokio::task::JoinHandle;

use volley_core::store::{CoordinationStore, MemoryStore};
use volley_core::submit::Submitter;
use volley_worker::{Executor, ExecutorRegistry, ResultAggregator, TaskRegistry, WorkerPool};

use crate::config::Config;

/// Shared, immutable application context
pub struct AppContext {
    pub config: Config,
    pub store: Arc<dyn CoordinationStore>,
    pub executor: Arc<dyn Executor>,
    pub tasks: Arc<TaskRegistry>,
    pub submitter: Arc<dyn Submitter>,
}

impl AppContext {
    /// Creates a new context from already built parts
    pub fn new(
        config: Config,
        store: Arc<dyn CoordinationStore>,
        executor: Arc<dyn Executor>,
        tasks: Arc<TaskRegistry>,
        submitter: Arc<dyn Submitter>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            store,
            executor,
            tasks,
            submitter,
        })
    }

    /// Wires the built-in store, engines and worker pool
    ///
    /// Returns the context together with the worker pool's dispatcher.
    pub fn bootstrap(config: Config) -> anyhow::Result<(Arc<Self>, JoinHandle<()>)> {
        let store: Arc<dyn CoordinationStore> = Arc::new(MemoryStore::new());

        let executor = ExecutorRegistry::builtin()
            .build(&config.worker)
            .context("Failed to load execution engine")?;
        let tasks = Arc::new(TaskRegistry::builtin());

        let aggregator = ResultAggregator::new(
            Arc::clone(&store),
            Arc::clone(&executor),
            Arc::clone(&tasks),
            config.worker.association_timeout,
        );
        let (pool, dispatcher) = WorkerPool::start(&config.worker, Arc::new(aggregator));

        let context = Self::new(config, store, executor, tasks, Arc::new(pool));
        Ok((context, dispatcher))
    }
}
