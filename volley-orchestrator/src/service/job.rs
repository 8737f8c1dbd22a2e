//! Job Service
//!
//! Listing, inspection, live follow and deletion of jobs.

use std::sync::Arc;

use volley_core::domain::job::{Job, JobContext, JobState};
use volley_core::dto::job::JobListing;
use volley_core::repository::{JobFollower, job_repository};
use volley_core::store::CoordinationStore;
use volley_core::{Error, Result};

/// What `get` hands back
pub enum JobView {
    Context(JobContext),
    Follow(JobFollower),
}

/// Lists every job, as ids or as full contexts
///
/// Records that cannot be decoded are skipped in detailed mode.
pub async fn list(store: &dyn CoordinationStore, detail: bool) -> Result<JobListing> {
    let ids = job_repository::list_ids(store).await?;
    if !detail {
        return Ok(JobListing::Ids(ids));
    }

    let mut contexts = Vec::with_capacity(ids.len());
    for id in ids {
        match job_repository::load(store, &id).await {
            Ok(Some(job)) => contexts.push(job.context()),
            Ok(None) => tracing::debug!("Job {} vanished while listing", id),
            Err(e) => tracing::warn!("Skipping job {}: {}", id, e),
        }
    }
    Ok(JobListing::Detailed(contexts))
}

/// Gets a job, optionally with its result history or as a live follow
///
/// # Arguments
/// * `store` - Coordination store
/// * `jid` - Task id of the job
/// * `outputs` - Include the per-host result history
/// * `follow` - Stream the job's events instead of returning its context
pub async fn get(
    store: Arc<dyn CoordinationStore>,
    jid: &str,
    outputs: bool,
    follow: bool,
) -> Result<JobView> {
    let mut job = find(store.as_ref(), jid).await?;

    if follow {
        let follower = JobFollower::start(store, job, outputs).await?;
        return Ok(JobView::Follow(follower));
    }

    if outputs {
        job_repository::load_data(store.as_ref(), &mut job).await?;
    }
    Ok(JobView::Context(job.context()))
}

/// Deletes a finished job and its result history
pub async fn delete(store: &dyn CoordinationStore, jid: &str) -> Result<()> {
    let job = find(store, jid).await?;
    if job.state() == JobState::Running {
        return Err(Error::Delete(format!(
            "cannot delete a running job, jid {}",
            jid
        )));
    }

    job_repository::sweep(store, &job).await
}

async fn find(store: &dyn CoordinationStore, jid: &str) -> Result<Job> {
    job_repository::load(store, jid)
        .await?
        .ok_or_else(|| Error::NotFound(format!("no such jid {}", jid)))
}
