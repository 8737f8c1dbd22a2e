//! Runner facades
//!
//! One facade per operation. Each validates its arguments, then either
//! calls the execution engine in-line (synchronous mode) or creates a job,
//! submits it to the background substrate and returns its task id
//! (asynchronous mode). Nothing touches the store before validation passed.

pub mod deploy;
pub mod execute;
pub mod facter;
pub mod ping;
pub mod service;
pub mod target;
pub mod task;

pub use deploy::DeployRunner;
pub use execute::ExecuteRunner;
pub use facter::FacterRunner;
pub use ping::PingRunner;
pub use service::ServiceRunner;
pub use target::TargetRunner;
pub use task::TaskRunner;

use futures::StreamExt;

use volley_core::domain::job::Job;
use volley_core::domain::result::ExecEvent;
use volley_core::dto::operation::{Operation, WorkUnit};
use volley_core::repository::job_repository;
use volley_core::{Error, Result};
use volley_worker::ExecStream;

use crate::context::AppContext;

/// Outcome of a facade call
#[derive(Debug)]
pub enum Dispatch {
    /// Synchronous result, `None` when the engine produced nothing
    Completed(Option<ExecEvent>),
    /// Task id of the launched job
    Launched(String),
}

/// Drops blank targets, failing if none is left
pub(crate) fn require_targets(targets: Vec<String>) -> Result<Vec<String>> {
    let targets: Vec<String> = targets
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    if targets.is_empty() {
        return Err(Error::Invalid("no target(s) given".to_string()));
    }
    Ok(targets)
}

/// Creates, submits and associates a job
///
/// If the submission fails the job's meta keys are released again, so the
/// hosts do not stay locked by a job nobody runs.
pub(crate) async fn launch(
    ctx: &AppContext,
    targets: Vec<String>,
    operation: Operation,
) -> Result<String> {
    let store = ctx.store.as_ref();
    let mut job = Job::new(
        targets,
        operation.name(),
        operation.mutex(),
        operation.operate_args(),
    )?;
    job_repository::create(store, &job).await?;

    let unit = WorkUnit {
        job: job.descriptor(),
        operation,
    };
    let handle = match ctx.submitter.submit(unit).await {
        Ok(handle) => handle,
        Err(e) => {
            if let Err(release) = job_repository::release(store, &job).await {
                tracing::warn!("Cannot release meta keys of unsubmitted job: {}", release);
            }
            return Err(e);
        }
    };

    job_repository::associate(store, &mut job, &handle).await
}

/// First event of a synchronous run
pub(crate) async fn first(mut stream: ExecStream) -> Result<Option<ExecEvent>> {
    stream.next().await.transpose()
}
