//! Execute runner

use std::sync::Arc;

use volley_core::dto::operation::Operation;
use volley_core::{Error, Result};

use super::{Dispatch, first, launch, require_targets};
use crate::context::AppContext;

pub struct ExecuteRunner {
    ctx: Arc<AppContext>,
}

impl ExecuteRunner {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Runs a shell command on the targets
    pub async fn handle(
        &self,
        targets: Vec<String>,
        cmd: Option<String>,
        run_async: bool,
    ) -> Result<Dispatch> {
        let targets = require_targets(targets)?;
        let command = cmd
            .filter(|c| !c.trim().is_empty())
            .ok_or_else(|| Error::Invalid("cmd should be a non-empty string".to_string()))?;

        if run_async {
            return launch(&self.ctx, targets, Operation::Execute { command })
                .await
                .map(Dispatch::Launched);
        }

        first(self.ctx.executor.raw_execute(&targets, &command))
            .await
            .map(Dispatch::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volley_core::store::CoordinationStore;

    use crate::context::testing;

    #[tokio::test]
    async fn test_missing_or_empty_cmd_creates_nothing() {
        let (ctx, store, submitter) = testing::context();
        let runner = ExecuteRunner::new(ctx);

        for cmd in [None, Some(String::new()), Some("   ".to_string())] {
            for run_async in [false, true] {
                let result = runner
                    .handle(vec!["h1".to_string(), "h2".to_string()], cmd.clone(), run_async)
                    .await;
                assert!(matches!(result, Err(Error::Invalid(_))));
            }
        }

        assert!(store.keys("*").await.unwrap().is_empty());
        assert!(submitter.units.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_execute() {
        let (ctx, _, _) = testing::context();
        let runner = ExecuteRunner::new(ctx);

        match runner
            .handle(vec!["h3".to_string()], Some("uptime".to_string()), false)
            .await
            .unwrap()
        {
            Dispatch::Completed(Some(event)) => {
                assert_eq!(event.record.payload["stdout"], "uptime")
            }
            other => panic!("unexpected dispatch {:?}", other),
        }
    }
}
