//! Execution engines
//!
//! An [`Executor`] is what actually reaches remote hosts. Every operation
//! returns a lazy [`ExecStream`] of per-host outcomes; errors that prevent
//! the operation from running at all are yielded as the stream's first
//! item.
//!
//! Engines are looked up by name in an [`ExecutorRegistry`]. The registry
//! knows the built-in engines and accepts explicit registrations at startup.

mod inventory;
mod shell;

pub use inventory::Inventory;
pub use shell::{Remote, RemoteOutput, ShellExecutor, SshRemote};

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;

use volley_core::domain::job::OperateArgs;
use volley_core::domain::result::ExecEvent;
use volley_core::{Error, Result};

use crate::config::WorkerConfig;

/// Lazy sequence of execution events
pub type ExecStream = BoxStream<'static, Result<ExecEvent>>;

/// Remote execution engine
#[async_trait]
pub trait Executor: Send + Sync {
    /// Registry name of the engine
    fn name(&self) -> &str;

    /// Returns the hosts matching a target pattern
    async fn target(&self, pattern: &str) -> Result<Vec<String>>;

    fn ping(&self, hosts: &[String]) -> ExecStream;

    /// Gathers facts, one `key -> value` map per host
    fn facter(&self, hosts: &[String]) -> ExecStream;

    fn service(
        &self,
        hosts: &[String],
        name: &str,
        start: bool,
        restart: bool,
        graceful: bool,
    ) -> ExecStream;

    /// Runs a shell command, payload is `{stdout, stderr, rc}`
    fn raw_execute(&self, hosts: &[String], command: &str) -> ExecStream;

    /// Runs a role step by step, announcing each step before running it
    fn deploy(
        &self,
        hosts: &[String],
        role: &str,
        extra_vars: &OperateArgs,
        partial: Option<&[String]>,
    ) -> ExecStream;

    /// Extracts a human-readable error from a failed outcome's payload
    fn extract_error_message(&self, payload: &JsonValue) -> String;
}

/// Builds an engine from the worker configuration
pub type ExecutorFactory = Arc<dyn Fn(&WorkerConfig) -> Result<Arc<dyn Executor>> + Send + Sync>;

/// Lookup of execution engines by name
#[derive(Clone)]
pub struct ExecutorRegistry {
    factories: HashMap<String, ExecutorFactory>,
}

impl ExecutorRegistry {
    /// Creates a registry holding the built-in engines
    pub fn builtin() -> Self {
        let mut registry = Self {
            factories: HashMap::new(),
        };
        registry.register(
            "shell",
            Arc::new(|config: &WorkerConfig| {
                Ok(Arc::new(ShellExecutor::from_config(config)?) as Arc<dyn Executor>)
            }),
        );
        registry
    }

    /// Registers an engine, replacing any engine of the same name
    pub fn register(&mut self, name: impl Into<String>, factory: ExecutorFactory) {
        self.factories.insert(name.into(), factory);
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Builds the engine named by `config.executor`
    pub fn build(&self, config: &WorkerConfig) -> Result<Arc<dyn Executor>> {
        let factory = self.factories.get(&config.executor).ok_or_else(|| {
            Error::Prepare(format!(
                "executor plugin <{}> could not be loaded",
                config.executor
            ))
        })?;

        let executor = factory(config)?;
        tracing::info!("Using executor: <{}>", executor.name());
        Ok(executor)
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
