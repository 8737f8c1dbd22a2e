//! Service runner
//!
//! Starts, stops or restarts a system service. The requested state comes as
//! `0=started, 1=stopped, 2=restarted`; `graceful` turns a restart into a
//! reload where the service supports it.

use std::sync::Arc;

use volley_core::dto::operation::{Operation, ServiceState};
use volley_core::{Error, Result};

use super::{Dispatch, first, launch, require_targets};
use crate::context::AppContext;

const ERR_BAD_SERVPARAMS: &str = "bad service name or state";

pub struct ServiceRunner {
    ctx: Arc<AppContext>,
}

impl ServiceRunner {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Drives a service into the requested state
    ///
    /// # Arguments
    /// * `targets` - Hosts to operate on
    /// * `name` - Service name
    /// * `state` - Requested state code
    /// * `graceful` - Prefer reload over restart
    /// * `run_async` - Launch a background job instead of running in-line
    pub async fn handle(
        &self,
        targets: Vec<String>,
        name: Option<String>,
        state: Option<i64>,
        graceful: bool,
        run_async: bool,
    ) -> Result<Dispatch> {
        let targets = require_targets(targets)?;

        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .ok_or_else(|| Error::Invalid(ERR_BAD_SERVPARAMS.to_string()))?;
        let state = state.ok_or_else(|| Error::Invalid(ERR_BAD_SERVPARAMS.to_string()))?;
        let (start, restart) = ServiceState::from_code(state)?.flags();

        if run_async {
            let operation = Operation::Service {
                name,
                start,
                restart,
                graceful,
            };
            return launch(&self.ctx, targets, operation)
                .await
                .map(Dispatch::Launched);
        }

        let stream = self
            .ctx
            .executor
            .service(&targets, &name, start, restart, graceful);
        first(stream).await.map(Dispatch::Completed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use volley_core::repository::job_repository;
    use volley_core::store::CoordinationStore;

    use crate::context::testing;

    #[tokio::test]
    async fn test_bad_state_rejected_without_side_effects() {
        let (ctx, store, _) = testing::context();
        let runner = ServiceRunner::new(ctx);

        for (name, state) in [
            (Some("nginx".to_string()), Some(7)),
            (Some("nginx".to_string()), None),
            (Some(" ".to_string()), Some(0)),
            (None, Some(0)),
        ] {
            let result = runner
                .handle(vec!["h1".to_string()], name, state, false, true)
                .await;
            match result {
                Err(Error::Invalid(msg)) => assert_eq!(msg, ERR_BAD_SERVPARAMS),
                other => panic!("expected invalid, got {:?}", other),
            }
        }
        assert!(store.keys("*").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_async_restart_records_flags() {
        let (ctx, store, _) = testing::context();
        let runner = ServiceRunner::new(ctx);

        let dispatch = runner
            .handle(vec!["h1".to_string()], Some("nginx".to_string()), Some(2), true, true)
            .await
            .unwrap();
        let Dispatch::Launched(jid) = dispatch else {
            panic!("expected a launched job");
        };

        let job = job_repository::load(&store, &jid).await.unwrap().unwrap();
        assert_eq!(job.operate_args()["restart"], true);
        assert_eq!(job.operate_args()["graceful"], true);
    }
}
