//! Facter runner

use std::sync::Arc;

use volley_core::Result;
use volley_core::dto::operation::Operation;

use super::{Dispatch, first, launch, require_targets};
use crate::context::AppContext;

pub struct FacterRunner {
    ctx: Arc<AppContext>,
}

impl FacterRunner {
    pub fn new(ctx: Arc<AppContext>) -> Self {
        Self { ctx }
    }

    /// Gathers facts from the targets
    pub async fn handle(&self, targets: Vec<String>, run_async: bool) -> Result<Dispatch> {
        let targets = require_targets(targets)?;

        if run_async {
            return launch(&self.ctx, targets, Operation::Facter)
                .await
                .map(Dispatch::Launched);
        }

        first(self.ctx.executor.facter(&targets))
            .await
            .map(Dispatch::Completed)
    }
}
