//! Service layer
//!
//! Services contain the worker's business logic. The [`WorkRunner`] trait is
//! what the scheduler drives for every queued work unit; the
//! [`ResultAggregator`] is the standard implementation that runs the
//! operation and folds its outcomes into the coordination store.

mod aggregator;

use async_trait::async_trait;
use volley_core::dto::operation::WorkUnit;

pub use aggregator::ResultAggregator;

/// Runs one unit of background work to completion
#[async_trait]
pub trait WorkRunner: Send + Sync {
    /// Runs the unit submitted under `task_id`
    ///
    /// Never fails: every error is recorded on the job itself.
    async fn run(&self, task_id: String, unit: WorkUnit);

    /// Finalizes a unit whose run died before finishing it
    async fn abandon(&self, task_id: String, unit: WorkUnit, reason: String);
}
