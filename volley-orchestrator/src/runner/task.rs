//! Task runner
//!
//! Launches a generic task through a registered task plugin, selected by
//! the caller's `tasktype`.

use serde_json::Value as JsonValue;
use std::sync::Arc;

use volley_core::domain::job::OperateArgs;
use volley_core::dto::operation::{Operation, TaskPluginInfo};
use volley_core::{Error, Result};

use super::{Dispatch, launch, require_targets};
use crate::context::AppContext;

const ERR_BAD_TSKPARAMS: &str = "bad task params";
const ERR_BAD_EXTRAOPTS: &str = "extra opts for task handler should be an json object";

pub struct TaskRunner {
    ctx: Arc<AppContext>,
}

impl TaskRunner {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Lists the registered task plugins
    pub fn query(&self) -> Vec<TaskPluginInfo> {
        self.ctx.tasks.describe()
    }

    /// Launches a task job
    ///
    /// # Arguments
    /// * `targets` - Hosts to run the task on
    /// * `taskname` - Free-form name of this task run
    /// * `tasktype` - Type of the plugin to run it with
    /// * `taskopts` - Plugin options, a JSON object or nothing
    /// * `run_async` - Must be true
    pub async fn handle(
        &self,
        targets: Vec<String>,
        taskname: String,
        tasktype: String,
        taskopts: Option<JsonValue>,
        run_async: bool,
    ) -> Result<Dispatch> {
        if !run_async {
            return Err(Error::NotSupported(
                "task can only run asynchronously".to_string(),
            ));
        }

        let targets = require_targets(targets)?;
        if taskname.trim().is_empty() || tasktype.trim().is_empty() {
            return Err(Error::Invalid(ERR_BAD_TSKPARAMS.to_string()));
        }
        let taskopts = match taskopts {
            None | Some(JsonValue::Null) => OperateArgs::new(),
            Some(JsonValue::Object(opts)) => opts,
            Some(_) => return Err(Error::Invalid(ERR_BAD_EXTRAOPTS.to_string())),
        };

        if self.ctx.tasks.get(&tasktype).is_none() {
            return Err(Error::NotSupported(format!(
                "task plugin of type <{}> is not supported",
                tasktype
            )));
        }

        let operation = Operation::Task {
            taskname,
            tasktype,
            taskopts,
        };
        launch(&self.ctx, targets, operation)
            .await
            .map(Dispatch::Launched)
    }
}
