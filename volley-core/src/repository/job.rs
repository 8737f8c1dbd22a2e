//! Job Repository
//!
//! Handles all coordination store operations related to jobs: conflict
//! detection on creation, task association, result persistence,
//! finalization and sweeping.

use std::time::Duration;

use crate::domain::job::{Job, JobState};
use crate::domain::keys;
use crate::domain::result::ResultRecord;
use crate::error::{Error, Result};
use crate::store::{Batch, CoordinationStore};
use crate::submit::TaskHandle;

/// Interval between two association checks
const ASSOCIATION_POLL: Duration = Duration::from_millis(50);

/// Attempts at committing a finalization before giving up
const FINALIZE_ATTEMPTS: usize = 3;

// =============================================================================
// Creation
// =============================================================================

/// Creates the per-host meta markers of a job, or fails on conflict
///
/// All meta keys are watched, checked for existence and then created in a
/// single watched transaction holding the job's creation timestamp. A key
/// that already exists, or a write racing in between the check and the
/// commit, both fail with [`Error::Conflict`].
pub async fn create(store: &dyn CoordinationStore, job: &Job) -> Result<()> {
    let meta_keys = job.meta_keys();
    let watch = store.watch(&meta_keys).await?;

    for key in &meta_keys {
        if store.exists(key).await? {
            return Err(Error::Conflict(
                "operate conflict, job already running on some host(s)".to_string(),
            ));
        }
    }

    tracing::debug!("Creating job meta keys <{}>", meta_keys.join(";"));

    let mut batch = Batch::new();
    for key in &meta_keys {
        batch.hset_field(key.clone(), "startat", job.startat().to_string());
    }

    if !store.execute_watched(batch, watch).await? {
        tracing::info!("Conflict detected creating meta keys <{}>", meta_keys.join(";"));
        return Err(Error::Conflict("operate conflict, try again later".to_string()));
    }

    tracing::info!("Job meta keys created <{}>", meta_keys.join(";"));
    Ok(())
}

/// Deletes the meta keys of a job that never reached the background substrate
pub async fn release(store: &dyn CoordinationStore, job: &Job) -> Result<()> {
    let meta_keys = job.meta_keys();
    let mut batch = Batch::new();
    batch.delete(meta_keys.clone());
    store.execute(batch).await?;

    tracing::info!("Job meta keys released <{}>", meta_keys.join(";"));
    Ok(())
}

/// Binds a created job to its background task and writes the job record
///
/// The record and the back-references on every meta key are written in one
/// batch.
pub async fn associate(
    store: &dyn CoordinationStore,
    job: &mut Job,
    handle: &TaskHandle,
) -> Result<String> {
    job.bind(handle.id.clone());

    let mut batch = Batch::new();
    batch.hset(keys::job_key(&handle.id), job.record_fields()?);
    for key in job.meta_keys() {
        batch.hset_field(key, "associate", handle.id.clone());
    }
    store.execute(batch).await?;

    tracing::info!(
        "Job {} associated ({} on {} host(s))",
        handle.id,
        job.operation(),
        job.targets().len()
    );
    Ok(handle.id.clone())
}

/// Waits until the job record of `task_id` exists
///
/// Returns false if it did not show up within `timeout`.
pub async fn wait_for_association(
    store: &dyn CoordinationStore,
    task_id: &str,
    timeout: Duration,
) -> Result<bool> {
    let key = keys::job_key(task_id);
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if store.exists(&key).await? {
            return Ok(true);
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(ASSOCIATION_POLL).await;
    }
}

// =============================================================================
// Queries
// =============================================================================

/// Loads a job by task id, `None` if no record exists
pub async fn load(store: &dyn CoordinationStore, task_id: &str) -> Result<Option<Job>> {
    let fields = store.hgetall(&keys::job_key(task_id)).await?;
    if fields.is_empty() {
        return Ok(None);
    }
    Job::from_record(task_id, &fields).map(Some)
}

/// Lists the task id of every stored job
pub async fn list_ids(store: &dyn CoordinationStore) -> Result<Vec<String>> {
    let keys = store.keys(&keys::job_key_pattern()).await?;
    Ok(keys
        .iter()
        .filter_map(|key| keys::task_id_from_key(key))
        .map(str::to_string)
        .collect())
}

/// Loads the per-host result history into the job
pub async fn load_data(store: &dyn CoordinationStore, job: &mut Job) -> Result<()> {
    let targets = job.targets().to_vec();
    for host in targets {
        let raw = store.lrange(&job.data_key(&host)).await?;
        let mut records = Vec::with_capacity(raw.len());
        for entry in raw {
            match serde_json::from_str::<ResultRecord>(&entry) {
                Ok(record) => records.push(record),
                Err(e) => tracing::warn!(
                    "Skipping bad result record of {} on {}: {}",
                    job.id().unwrap_or("<unbound>"),
                    host,
                    e
                ),
            }
        }
        job.set_results(host, records);
    }
    Ok(())
}

// =============================================================================
// Worker-side updates
// =============================================================================

/// Appends a result record to the host's data list and publishes it
pub async fn push_return_data(
    store: &dyn CoordinationStore,
    job: &Job,
    host: &str,
    record: &ResultRecord,
) -> Result<()> {
    let content = serde_json::to_string(record)?;

    let mut batch = Batch::new();
    batch.rpush(job.data_key(host), content.clone());
    store.execute(batch).await?;
    store.publish(&job.host_channel(host), &content).await?;

    tracing::debug!(
        "{} record for {} of {}",
        record.status,
        host,
        job.id().unwrap_or("<unbound>")
    );
    Ok(())
}

/// Records that a host finished its part of the job
///
/// Marks the host's meta key and seeds the fallback error message on the
/// first failure.
pub async fn target_done(
    store: &dyn CoordinationStore,
    job: &mut Job,
    host: &str,
    failed: bool,
) -> Result<()> {
    let state = if failed {
        job.note_failure(host);
        JobState::Failed
    } else {
        JobState::Done
    };

    let mut batch = Batch::new();
    batch.hset_field(job.meta_key(host), "state", i64::from(state).to_string());
    store.execute(batch).await?;

    tracing::info!(
        "{} operation on {} of {} was {}",
        job.operation(),
        host,
        job.id().unwrap_or("<unbound>"),
        if failed { "failed" } else { "successful" }
    );
    Ok(())
}

/// Moves the job into its terminal state
///
/// Writes the state and error onto the job record and deletes every meta
/// key in one watched transaction, then publishes the terminal sentinel on
/// the control channel. Finalizing a job that is already terminal, in
/// memory or in the store, is a no-op and returns `None`.
pub async fn done(
    store: &dyn CoordinationStore,
    job: &mut Job,
    failed: bool,
    error: Option<String>,
) -> Result<Option<JobState>> {
    let task_id = job
        .id()
        .ok_or_else(|| Error::InvalidState("job is not associated with a task".to_string()))?
        .to_string();
    let key = keys::job_key(&task_id);

    if job.state().is_terminal() {
        tracing::info!("Job {} already finalized, ignoring", task_id);
        return Ok(None);
    }

    for _ in 0..FINALIZE_ATTEMPTS {
        let watch = store.watch(std::slice::from_ref(&key)).await?;
        let stored = load(store, &task_id).await?.map(|stored| stored.state());
        if let Some(stored) = stored.filter(|state| state.is_terminal()) {
            tracing::info!("Job {} already finalized as {}, ignoring", task_id, stored);
            return Ok(None);
        }

        let mut finished = job.clone();
        let state = finished.finish(failed, error.clone())?;

        let mut batch = Batch::new();
        batch.hset(key.clone(), finished.record_fields()?);
        batch.delete(finished.meta_keys());

        if store.execute_watched(batch, watch).await? {
            *job = finished;
            let sentinel = match state {
                JobState::Failed => keys::CONTROL_FAILED,
                _ => keys::CONTROL_DONE,
            };
            store.publish(&job.control_channel(), sentinel).await?;

            tracing::info!("Job {} finalized as {}", task_id, state);
            return Ok(Some(state));
        }

        tracing::debug!("Job record {} changed during finalization, retrying", task_id);
    }

    Err(Error::Conflict(format!(
        "job {} record kept changing during finalization",
        task_id
    )))
}

// =============================================================================
// Deletion
// =============================================================================

/// Deletes the job's data keys and its record
pub async fn sweep(store: &dyn CoordinationStore, job: &Job) -> Result<()> {
    let task_id = job
        .id()
        .ok_or_else(|| Error::InvalidState("job is not associated with a task".to_string()))?;

    let mut batch = Batch::new();
    batch.delete(job.data_keys());
    batch.delete(vec![keys::job_key(task_id)]);
    store.execute(batch).await?;

    tracing::info!("Job {} swept", task_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::OperateArgs;
    use crate::domain::result::ExecStatus;
    use crate::store::{MemoryStore, StoreResult, Subscription, Watch};
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Lets another writer touch the first watched key right before commit
    struct RacingStore {
        inner: MemoryStore,
    }

    #[async_trait]
    impl CoordinationStore for RacingStore {
        async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
            self.inner.hgetall(key).await
        }

        async fn lrange(&self, key: &str) -> StoreResult<Vec<String>> {
            self.inner.lrange(key).await
        }

        async fn exists(&self, key: &str) -> StoreResult<bool> {
            self.inner.exists(key).await
        }

        async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
            self.inner.keys(pattern).await
        }

        async fn publish(&self, channel: &str, payload: &str) -> StoreResult<usize> {
            self.inner.publish(channel, payload).await
        }

        async fn subscribe(&self, channels: &[String]) -> StoreResult<Box<dyn Subscription>> {
            self.inner.subscribe(channels).await
        }

        async fn watch(&self, keys: &[String]) -> StoreResult<Watch> {
            self.inner.watch(keys).await
        }

        async fn execute(&self, batch: Batch) -> StoreResult<()> {
            self.inner.execute(batch).await
        }

        async fn execute_watched(&self, batch: Batch, watch: Watch) -> StoreResult<bool> {
            if let Some((key, _)) = watch.versions().first() {
                let mut racer = Batch::new();
                racer.hset_field(key.clone(), "startat", "0");
                self.inner.execute(racer).await?;
            }
            self.inner.execute_watched(batch, watch).await
        }
    }

    fn job(hosts: &[&str], operation: &str, mutex: bool) -> Job {
        Job::new(
            hosts.iter().map(|h| h.to_string()).collect(),
            operation,
            mutex,
            OperateArgs::new(),
        )
        .unwrap()
    }

    async fn running(store: &MemoryStore, hosts: &[&str], operation: &str, mutex: bool) -> Job {
        let mut job = job(hosts, operation, mutex);
        create(store, &job).await.unwrap();
        let handle = TaskHandle {
            id: uuid::Uuid::new_v4().to_string(),
        };
        associate(store, &mut job, &handle).await.unwrap();
        job
    }

    #[tokio::test]
    async fn test_overlapping_mutex_jobs_conflict() {
        let store = MemoryStore::new();
        running(&store, &["h1", "h2"], "deploy", true).await;

        let overlapping = job(&["h2", "h3"], "deploy", true);
        assert!(matches!(
            create(&store, &overlapping).await,
            Err(Error::Conflict(_))
        ));

        let disjoint = job(&["h3"], "deploy", true);
        assert!(create(&store, &disjoint).await.is_ok());
    }

    #[tokio::test]
    async fn test_non_mutex_jobs_never_conflict() {
        let store = MemoryStore::new();
        let a = job(&["h1"], "ping", false);
        let b = job(&["h1"], "ping", false);
        create(&store, &a).await.unwrap();
        create(&store, &b).await.unwrap();
    }

    #[tokio::test]
    async fn test_write_racing_the_commit_conflicts() {
        let store = RacingStore {
            inner: MemoryStore::new(),
        };
        let racing = job(&["h1", "h2"], "deploy", true);

        match create(&store, &racing).await {
            Err(Error::Conflict(msg)) => assert_eq!(msg, "operate conflict, try again later"),
            other => panic!("expected conflict, got {:?}", other),
        }
        // Only the racing write landed
        let meta = store.inner.hgetall("h1:deploy:meta").await.unwrap();
        assert_eq!(meta["startat"], "0");
        assert!(!store.inner.exists("h2:deploy:meta").await.unwrap());
    }

    #[tokio::test]
    async fn test_host_named_job_is_not_listed() {
        let store = MemoryStore::new();
        let first = running(&store, &["job"], "deploy", true).await;
        let second = running(&store, &["job"], "ping", false).await;
        let record = ResultRecord::new(ExecStatus::Ok, serde_json::Value::Null);
        push_return_data(&store, &second, "job", &record)
            .await
            .unwrap();

        let mut ids = list_ids(&store).await.unwrap();
        ids.sort();
        let mut expected = vec![
            first.id().unwrap().to_string(),
            second.id().unwrap().to_string(),
        ];
        expected.sort();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_release_frees_hosts() {
        let store = MemoryStore::new();
        let first = job(&["h1"], "deploy", true);
        create(&store, &first).await.unwrap();
        release(&store, &first).await.unwrap();

        let second = job(&["h1"], "deploy", true);
        assert!(create(&store, &second).await.is_ok());
    }

    #[tokio::test]
    async fn test_association_writes_record_and_back_references() {
        let store = MemoryStore::new();
        let job = running(&store, &["h1"], "deploy", true).await;
        let id = job.id().unwrap();

        let meta = store.hgetall("h1:deploy:meta").await.unwrap();
        assert_eq!(meta["associate"], id);
        assert_eq!(meta["startat"], job.startat().to_string());

        let loaded = load(&store, id).await.unwrap().unwrap();
        assert_eq!(loaded.state(), JobState::Running);
        assert_eq!(loaded.operate(), "deploy");
        assert_eq!(list_ids(&store).await.unwrap(), vec![id.to_string()]);
    }

    #[tokio::test]
    async fn test_done_removes_meta_keeps_data() {
        let store = MemoryStore::new();
        let mut job = running(&store, &["h1", "h2"], "ping", false).await;
        let record = ResultRecord::new(ExecStatus::Ok, serde_json::Value::Null);
        push_return_data(&store, &job, "h1", &record).await.unwrap();

        let state = done(&store, &mut job, false, None).await.unwrap();
        assert_eq!(state, Some(JobState::Done));

        for key in job.meta_keys() {
            assert!(!store.exists(&key).await.unwrap());
        }
        assert_eq!(store.lrange(&job.data_key("h1")).await.unwrap().len(), 1);

        let loaded = load(&store, job.id().unwrap()).await.unwrap().unwrap();
        assert_eq!(loaded.state(), JobState::Done);
    }

    #[tokio::test]
    async fn test_done_is_exactly_once() {
        let store = MemoryStore::new();
        let mut job = running(&store, &["h1"], "deploy", true).await;
        let mut stale = job.clone();

        done(&store, &mut job, true, Some("boom".into())).await.unwrap();
        assert_eq!(done(&store, &mut job, false, None).await.unwrap(), None);
        assert_eq!(done(&store, &mut stale, false, None).await.unwrap(), None);

        let loaded = load(&store, job.id().unwrap()).await.unwrap().unwrap();
        assert_eq!(loaded.state(), JobState::Failed);
        assert_eq!(loaded.error(), "boom");
    }

    #[tokio::test]
    async fn test_done_publishes_after_state_written() {
        let store = MemoryStore::new();
        let mut job = running(&store, &["h1"], "deploy", true).await;
        let mut sub = store.subscribe(&[job.control_channel()]).await.unwrap();

        done(&store, &mut job, true, None).await.unwrap();

        let msg = sub.recv().await.unwrap();
        assert_eq!(msg.payload, keys::CONTROL_FAILED);
        let loaded = load(&store, job.id().unwrap()).await.unwrap().unwrap();
        assert_eq!(loaded.state(), JobState::Failed);
    }

    #[tokio::test]
    async fn test_target_done_marks_meta_and_fallback_error() {
        let store = MemoryStore::new();
        let mut job = running(&store, &["h1", "h2"], "ping", false).await;

        target_done(&store, &mut job, "h1", true).await.unwrap();
        target_done(&store, &mut job, "h2", false).await.unwrap();
        assert_eq!(store.hgetall(&job.meta_key("h1")).await.unwrap()["state"], "2");
        assert_eq!(store.hgetall(&job.meta_key("h2")).await.unwrap()["state"], "0");

        done(&store, &mut job, true, None).await.unwrap();
        let loaded = load(&store, job.id().unwrap()).await.unwrap().unwrap();
        assert_eq!(loaded.error(), "some operations failed on h1");
    }

    #[tokio::test]
    async fn test_sweep_and_load_data() {
        let store = MemoryStore::new();
        let mut job = running(&store, &["h1"], "execute", false).await;
        let record = ResultRecord::new(ExecStatus::Failed, serde_json::json!({"rc": 1}));
        push_return_data(&store, &job, "h1", &record).await.unwrap();
        done(&store, &mut job, true, None).await.unwrap();

        let mut loaded = load(&store, job.id().unwrap()).await.unwrap().unwrap();
        load_data(&store, &mut loaded).await.unwrap();
        assert_eq!(loaded.results()["h1"], vec![record]);

        sweep(&store, &loaded).await.unwrap();
        assert!(load(&store, job.id().unwrap()).await.unwrap().is_none());
        assert!(!store.exists(&job.data_key("h1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_wait_for_association_times_out() {
        let store = MemoryStore::new();
        let found = wait_for_association(&store, "missing", Duration::from_millis(120))
            .await
            .unwrap();
        assert!(!found);

        let job = running(&store, &["h1"], "ping", false).await;
        assert!(
            wait_for_association(&store, job.id().unwrap(), Duration::from_millis(10))
                .await
                .unwrap()
        );
    }
}
