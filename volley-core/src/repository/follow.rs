//! Live follow of a running job
//!
//! A [`JobFollower`] subscribes to the job's control channel and to one live
//! channel per target before it reads the snapshot, so no event published in
//! between can be missed. It yields the snapshot first, then one event per
//! published record, and ends at the terminal signal.

use futures::Stream;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::domain::job::Job;
use crate::domain::keys;
use crate::domain::result::ResultRecord;
use crate::dto::job::FollowEvent;
use crate::error::Result;
use crate::repository::job_repository;
use crate::store::{CoordinationStore, Subscription};

/// Event sequence of one followed job
///
/// Dropping the follower, or calling [`JobFollower::close`], releases the
/// underlying subscription.
pub struct JobFollower {
    store: Arc<dyn CoordinationStore>,
    task_id: String,
    control: String,
    snapshot: Option<FollowEvent>,
    subscription: Option<Box<dyn Subscription>>,
}

impl JobFollower {
    /// Starts following a job
    ///
    /// # Arguments
    /// * `store` - Coordination store the job lives in
    /// * `job` - A job loaded from the store (must carry its task id)
    /// * `outputs` - Whether the snapshot includes the result history
    pub async fn start(store: Arc<dyn CoordinationStore>, job: Job, outputs: bool) -> Result<Self> {
        let task_id = job.id().unwrap_or_default().to_string();
        let control = job.control_channel();

        let mut channels = vec![control.clone()];
        channels.extend(job.targets().iter().map(|host| job.host_channel(host)));
        let subscription = store.subscribe(&channels).await?;

        // Re-read after subscribing; anything newer arrives on the channels.
        let mut current = match job_repository::load(store.as_ref(), &task_id).await? {
            Some(current) => current,
            None => job,
        };
        if outputs {
            job_repository::load_data(store.as_ref(), &mut current).await?;
        }

        let running = !current.state().is_terminal();
        tracing::debug!(
            "Following job {} ({} channel(s), running: {})",
            task_id,
            channels.len(),
            running
        );

        Ok(Self {
            store,
            task_id,
            control,
            snapshot: Some(FollowEvent::Snapshot(current.context())),
            subscription: running.then_some(subscription),
        })
    }

    /// Waits for the next event, `None` once the job has finished
    pub async fn next(&mut self) -> Option<FollowEvent> {
        if let Some(snapshot) = self.snapshot.take() {
            return Some(snapshot);
        }

        loop {
            let message = self.subscription.as_mut()?.recv().await;
            let Some(message) = message else {
                self.close();
                return None;
            };

            if message.channel == self.control {
                // Mutex operations share one control channel across jobs,
                // only stop once this job is actually terminal.
                if finished(Arc::clone(&self.store), self.task_id.clone()).await {
                    self.close();
                    return None;
                }
                continue;
            }

            match serde_json::from_str::<ResultRecord>(&message.payload) {
                Ok(record) => {
                    let host = keys::host_from_channel(&message.channel).to_string();
                    return Some(FollowEvent::Update(BTreeMap::from([(host, record)])));
                }
                Err(e) => tracing::warn!(
                    "Dropping undecodable event on {} for job {}: {}",
                    message.channel,
                    self.task_id,
                    e
                ),
            }
        }
    }

    /// Releases the subscription; later calls to `next` return `None`
    pub fn close(&mut self) {
        self.snapshot = None;
        self.subscription = None;
    }

    /// Turns the follower into a stream, for streaming responses
    pub fn into_stream(self) -> impl Stream<Item = FollowEvent> + Send + 'static {
        futures::stream::unfold(self, |mut follower| async move {
            follower.next().await.map(|event| (event, follower))
        })
    }

}

/// Whether the job is terminal, or gone
async fn finished(store: Arc<dyn CoordinationStore>, task_id: String) -> bool {
    match job_repository::load(store.as_ref(), &task_id).await {
        Ok(Some(job)) => job.state().is_terminal(),
        Ok(None) => true,
        Err(e) => {
            tracing::warn!("Cannot reload followed job {}: {}", task_id, e);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::job::{JobState, OperateArgs};
    use crate::domain::result::ExecStatus;
    use crate::store::MemoryStore;
    use crate::submit::TaskHandle;
    use futures::StreamExt;

    async fn running(store: &MemoryStore, hosts: &[&str], operation: &str, mutex: bool) -> Job {
        let mut job = Job::new(
            hosts.iter().map(|h| h.to_string()).collect(),
            operation,
            mutex,
            OperateArgs::new(),
        )
        .unwrap();
        job_repository::create(store, &job).await.unwrap();
        let handle = TaskHandle {
            id: uuid::Uuid::new_v4().to_string(),
        };
        job_repository::associate(store, &mut job, &handle)
            .await
            .unwrap();
        job
    }

    #[tokio::test]
    async fn test_terminal_job_yields_only_snapshot() {
        let store = MemoryStore::new();
        let mut job = running(&store, &["h1"], "ping", false).await;
        job_repository::done(&store, &mut job, false, None)
            .await
            .unwrap();

        let shared: Arc<dyn CoordinationStore> = Arc::new(store.clone());
        let mut follower = JobFollower::start(shared, job, false).await.unwrap();

        match follower.next().await {
            Some(FollowEvent::Snapshot(ctx)) => assert_eq!(ctx.state, JobState::Done),
            other => panic!("expected snapshot, got {:?}", other),
        }
        assert!(follower.next().await.is_none());
    }

    #[tokio::test]
    async fn test_running_job_streams_until_control_signal() {
        let store = MemoryStore::new();
        let job = running(&store, &["h1", "h2"], "ping", false).await;
        let shared: Arc<dyn CoordinationStore> = Arc::new(store.clone());
        let follower = JobFollower::start(shared, job.clone(), false).await.unwrap();

        let writer = {
            let store = store.clone();
            let mut job = job.clone();
            tokio::spawn(async move {
                let ok = ResultRecord::new(ExecStatus::Ok, serde_json::Value::Null);
                let down = ResultRecord::new(ExecStatus::Unreachable, serde_json::Value::Null);
                job_repository::push_return_data(&store, &job, "h1", &ok)
                    .await
                    .unwrap();
                job_repository::push_return_data(&store, &job, "h2", &down)
                    .await
                    .unwrap();
                job_repository::done(&store, &mut job, true, None)
                    .await
                    .unwrap();
            })
        };

        let events: Vec<FollowEvent> = follower.into_stream().collect().await;
        writer.await.unwrap();

        assert_eq!(events.len(), 3);
        assert!(matches!(events[0], FollowEvent::Snapshot(_)));
        match &events[2] {
            FollowEvent::Update(map) => assert_eq!(map["h2"].status, ExecStatus::Unreachable),
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_shared_control_channel_does_not_stop_other_job() {
        let store = MemoryStore::new();
        let followed = running(&store, &["h1"], "deploy", true).await;
        let mut other = running(&store, &["h2"], "deploy", true).await;

        let shared: Arc<dyn CoordinationStore> = Arc::new(store.clone());
        let mut follower = JobFollower::start(shared, followed.clone(), false)
            .await
            .unwrap();
        assert!(matches!(follower.next().await, Some(FollowEvent::Snapshot(_))));

        job_repository::done(&store, &mut other, false, None)
            .await
            .unwrap();
        let record = ResultRecord::step(ExecStatus::Changed, "install", serde_json::Value::Null);
        job_repository::push_return_data(&store, &followed, "h1", &record)
            .await
            .unwrap();

        match follower.next().await {
            Some(FollowEvent::Update(map)) => assert_eq!(map["h1"], record),
            other => panic!("expected update, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_runs_on_spawned_task() {
        let store = MemoryStore::new();
        let mut job = running(&store, &["h1"], "ping", false).await;
        let shared: Arc<dyn CoordinationStore> = Arc::new(store.clone());
        let follower = JobFollower::start(shared, job.clone(), false).await.unwrap();

        let reader = tokio::spawn(follower.into_stream().collect::<Vec<FollowEvent>>());
        let ok = ResultRecord::new(ExecStatus::Ok, serde_json::Value::Null);
        job_repository::push_return_data(&store, &job, "h1", &ok)
            .await
            .unwrap();
        job_repository::done(&store, &mut job, false, None)
            .await
            .unwrap();

        let events = reader.await.unwrap();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], FollowEvent::Update(_)));
    }

    #[tokio::test]
    async fn test_close_releases_subscription() {
        let store = MemoryStore::new();
        let job = running(&store, &["h1"], "ping", false).await;
        let shared: Arc<dyn CoordinationStore> = Arc::new(store.clone());
        let mut follower = JobFollower::start(shared, job.clone(), false).await.unwrap();

        follower.close();
        assert!(follower.next().await.is_none());
        assert_eq!(store.publish(&job.control_channel(), "x").await.unwrap(), 0);
    }
}
