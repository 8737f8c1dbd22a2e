//! Background execution substrate contract
//!
//! The request-handling side only needs "fire and track": hand over a work
//! unit, get back the id the job will be known by.

use async_trait::async_trait;

use crate::dto::operation::WorkUnit;
use crate::error::Result;

/// Handle returned by a [`Submitter`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskHandle {
    pub id: String,
}

#[async_trait]
pub trait Submitter: Send + Sync {
    /// Queues a work unit and returns its task handle
    ///
    /// Must not wait for the work to start.
    async fn submit(&self, unit: WorkUnit) -> Result<TaskHandle>;
}
