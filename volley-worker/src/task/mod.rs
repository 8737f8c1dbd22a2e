//! Task plugins
//!
//! A task plugin turns free-form `taskopts` into a stream of step outcomes,
//! driving the execution engine it is handed. Plugins are looked up by
//! their type string in a [`TaskRegistry`]; there is no discovery, every
//! plugin is registered explicitly at startup.

mod script;

pub use script::ScriptTask;

use std::collections::BTreeMap;
use std::sync::Arc;

use volley_core::Result;
use volley_core::domain::job::OperateArgs;
use volley_core::dto::operation::TaskPluginInfo;

use crate::executor::{ExecStream, Executor};

/// A generic task runnable through `POST /task`
pub trait TaskPlugin: Send + Sync {
    /// Human-readable plugin name
    fn name(&self) -> &str;

    /// Type string callers select the plugin with
    fn kind(&self) -> &str;

    /// Starts the task
    ///
    /// Returns `Err(Prepare)` when `taskopts` cannot be accepted. The stream
    /// follows the deploy shape: announcements for step boundaries, then one
    /// step outcome per host. It may end with `Err(TaskAbort)` or
    /// `Err(Task)` to stop the task early.
    ///
    /// # Arguments
    /// * `hosts` - Targets of the job
    /// * `executor` - Engine used to reach the hosts
    /// * `taskopts` - Plugin-specific options
    fn run_task(
        &self,
        hosts: &[String],
        executor: Arc<dyn Executor>,
        taskopts: &OperateArgs,
    ) -> Result<ExecStream>;
}

/// Task plugins by type
#[derive(Clone)]
pub struct TaskRegistry {
    plugins: BTreeMap<String, Arc<dyn TaskPlugin>>,
}

impl TaskRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self {
            plugins: BTreeMap::new(),
        }
    }

    /// Creates a registry holding the built-in plugins
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(ScriptTask));
        registry
    }

    /// Registers a plugin under its type, replacing any previous one
    pub fn register(&mut self, plugin: Arc<dyn TaskPlugin>) {
        tracing::debug!(
            "Registered task plugin <{}> of type <{}>",
            plugin.name(),
            plugin.kind()
        );
        self.plugins.insert(plugin.kind().to_string(), plugin);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn TaskPlugin>> {
        self.plugins.get(kind).cloned()
    }

    /// Lists the registered plugins, ordered by type
    pub fn describe(&self) -> Vec<TaskPluginInfo> {
        self.plugins
            .values()
            .map(|plugin| TaskPluginInfo {
                name: plugin.name().to_string(),
                kind: plugin.kind().to_string(),
            })
            .collect()
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}
