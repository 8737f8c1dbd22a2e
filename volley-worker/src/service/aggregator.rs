//! Result aggregation
//!
//! Drives the execution engine (or a task plugin) for one job and merges
//! the resulting outcome stream into the store:
//!
//! - ping, facter, service and execute yield one final outcome per host,
//!   so each host is marked done as soon as its outcome arrives
//! - deploy and task report many step outcomes per host and announce step
//!   boundaries; hosts are marked done once the stream is exhausted
//!
//! Whatever happens, the job ends finalized: errors are turned into a
//! `FAILED` (or, for a task abort, `DONE`) job with a message.

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value as JsonValue;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use volley_core::domain::job::Job;
use volley_core::domain::result::ResultRecord;
use volley_core::dto::operation::{Operation, WorkUnit};
use volley_core::repository::job_repository;
use volley_core::store::CoordinationStore;
use volley_core::{Error, Result};

use super::WorkRunner;
use crate::executor::{ExecStream, Executor};
use crate::task::TaskRegistry;

/// Standard [`WorkRunner`]
pub struct ResultAggregator {
    store: Arc<dyn CoordinationStore>,
    executor: Arc<dyn Executor>,
    tasks: Arc<TaskRegistry>,
    association_timeout: Duration,
}

impl ResultAggregator {
    /// Creates a new aggregator
    ///
    /// # Arguments
    /// * `store` - Coordination store jobs live in
    /// * `executor` - Engine used for every operation
    /// * `tasks` - Plugins available to `task` jobs
    /// * `association_timeout` - How long to wait for a job record to show up
    pub fn new(
        store: Arc<dyn CoordinationStore>,
        executor: Arc<dyn Executor>,
        tasks: Arc<TaskRegistry>,
        association_timeout: Duration,
    ) -> Self {
        Self {
            store,
            executor,
            tasks,
            association_timeout,
        }
    }

    /// Starts the operation's outcome stream
    fn start(&self, job: &Job, operation: &Operation) -> Result<ExecStream> {
        let targets = job.targets();
        Ok(match operation {
            Operation::Ping => self.executor.ping(targets),
            Operation::Facter => self.executor.facter(targets),
            Operation::Service {
                name,
                start,
                restart,
                graceful,
            } => self
                .executor
                .service(targets, name, *start, *restart, *graceful),
            Operation::Execute { command } => self.executor.raw_execute(targets, command),
            Operation::Deploy {
                role,
                extra_vars,
                partial,
            } => self
                .executor
                .deploy(targets, role, extra_vars, partial.as_deref()),
            Operation::Task {
                taskname,
                tasktype,
                taskopts,
            } => {
                let plugin = self.tasks.get(tasktype).ok_or_else(|| {
                    Error::NotSupported(format!("unknown task type <{}>", tasktype))
                })?;
                info!(
                    "Running task {} with plugin <{}> on {} host(s)",
                    taskname,
                    plugin.name(),
                    targets.len()
                );
                plugin.run_task(targets, Arc::clone(&self.executor), taskopts)?
            }
        })
    }

    /// Runs the operation, returning how many distinct hosts failed
    async fn aggregate(&self, job: &mut Job, operation: &Operation) -> Result<usize> {
        let stream = self.start(job, operation)?;
        if operation.per_host() {
            self.collect_per_host(job, stream).await
        } else {
            self.collect_stepwise(job, stream).await
        }
    }

    async fn collect_per_host(&self, job: &mut Job, mut stream: ExecStream) -> Result<usize> {
        let store = self.store.as_ref();
        let mut reported = BTreeSet::new();
        let mut failed = BTreeSet::new();

        while let Some(event) = stream.next().await {
            let event = event?;
            let Some(host) = event.target() else {
                debug!("Ignoring announcement {:?}", event.record.name);
                continue;
            };
            if !job.targets().iter().any(|t| t == host) {
                warn!("Ignoring outcome for unexpected host {}", host);
                continue;
            }
            let host = host.to_string();

            let is_failure = event.record.status.is_failure();
            job_repository::push_return_data(store, job, &host, &event.record).await?;
            job_repository::target_done(store, job, &host, is_failure).await?;

            if is_failure {
                failed.insert(host.clone());
            }
            reported.insert(host);
        }

        ensure_covered(job.targets(), &reported)?;
        Ok(failed.len())
    }

    async fn collect_stepwise(&self, job: &mut Job, mut stream: ExecStream) -> Result<usize> {
        let store = self.store.as_ref();
        let targets = job.targets().to_vec();
        let mut reported = BTreeSet::new();
        let mut failed = BTreeSet::new();

        while let Some(event) = stream.next().await {
            let event = event?;
            let status = event.record.status;

            match event.target() {
                None => {
                    let record = ResultRecord {
                        status,
                        name: event.record.name.clone(),
                        payload: JsonValue::from(status.name()),
                    };
                    for host in &targets {
                        job_repository::push_return_data(store, job, host, &record).await?;
                    }
                }
                Some(host) if targets.iter().any(|t| t == host) => {
                    let payload = if status.is_failure() {
                        failed.insert(host.to_string());
                        JsonValue::from(self.executor.extract_error_message(&event.record.payload))
                    } else {
                        JsonValue::from(status.name())
                    };
                    let record = ResultRecord {
                        status,
                        name: event.record.name.clone(),
                        payload,
                    };
                    job_repository::push_return_data(store, job, host, &record).await?;
                    reported.insert(host.to_string());
                }
                Some(host) => warn!("Ignoring outcome for unexpected host {}", host),
            }
        }

        ensure_covered(&targets, &reported)?;
        for host in &targets {
            job_repository::target_done(store, job, host, failed.contains(host)).await?;
        }

        Ok(failed.len())
    }

    async fn finalize(&self, job: &mut Job, failed: bool, message: Option<String>) {
        let task_id = job.id().unwrap_or_default().to_string();
        if let Err(e) = job_repository::done(self.store.as_ref(), job, failed, message).await {
            error!("Failed to finalize job {}: {}", task_id, e);
        }
    }
}

/// Fails with [`Error::NoMatch`] naming the targets that never reported
fn ensure_covered(targets: &[String], reported: &BTreeSet<String>) -> Result<()> {
    let missing: Vec<&str> = targets
        .iter()
        .filter(|host| !reported.contains(*host))
        .map(String::as_str)
        .collect();
    if missing.is_empty() {
        return Ok(());
    }
    Err(Error::NoMatch(format!(
        "target not found: {}",
        missing.join(",")
    )))
}

#[async_trait]
impl WorkRunner for ResultAggregator {
    async fn run(&self, task_id: String, unit: WorkUnit) {
        let mut job = Job::from_descriptor(unit.job);
        job.bind(task_id.clone());

        let associated = job_repository::wait_for_association(
            self.store.as_ref(),
            &task_id,
            self.association_timeout,
        )
        .await;
        match associated {
            Ok(true) => {}
            Ok(false) => {
                warn!("Job {} was never associated, giving up", task_id);
                let message = "job was never associated with its task".to_string();
                self.finalize(&mut job, true, Some(message)).await;
                return;
            }
            Err(e) => {
                error!("Cannot check association of job {}: {}", task_id, e);
                let message = format!("got unexpected error, {}", e);
                self.finalize(&mut job, true, Some(message)).await;
                return;
            }
        }

        info!(
            "Running {} job {} on {} host(s)",
            unit.operation.name(),
            task_id,
            job.targets().len()
        );

        let (failed, message) = match self.aggregate(&mut job, &unit.operation).await {
            Ok(0) => (false, None),
            Ok(count) => (
                true,
                Some(format!(
                    "{} of {} remote host(s) got {} errors",
                    count,
                    job.targets().len(),
                    unit.operation.noun()
                )),
            ),
            Err(Error::TaskAbort(reason)) => {
                info!("Task of job {} aborted by plugin: {}", task_id, reason);
                (false, Some(format!("task aborted by plugin, {}", reason)))
            }
            Err(e @ Error::Task(_)) => {
                warn!("Task of job {} failed: {}", task_id, e);
                (true, Some(e.to_string()))
            }
            Err(e) if e.is_engine_error() => {
                error!("Executor error on job {}: {}", task_id, e);
                (true, Some(format!("got executor error, {}", e)))
            }
            Err(e) => {
                error!("Unexpected error on job {}: {}", task_id, e);
                (true, Some(format!("got unexpected error, {}", e)))
            }
        };

        self.finalize(&mut job, failed, message).await;
    }

    async fn abandon(&self, task_id: String, unit: WorkUnit, reason: String) {
        let mut job = Job::from_descriptor(unit.job);
        job.bind(task_id);
        let message = format!("got unexpected error, {}", reason);
        self.finalize(&mut job, true, Some(message)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use serde_json::json;
    use volley_core::domain::job::{JobState, OperateArgs};
    use volley_core::domain::result::{ExecEvent, ExecStatus};
    use volley_core::store::MemoryStore;
    use volley_core::submit::TaskHandle;

    /// Replays the same outcomes for every operation
    struct ScriptedExecutor {
        events: Vec<ExecEvent>,
        error: Option<&'static str>,
    }

    impl ScriptedExecutor {
        fn new(events: Vec<ExecEvent>) -> Self {
            Self {
                events,
                error: None,
            }
        }

        fn failing(events: Vec<ExecEvent>, error: &'static str) -> Self {
            Self {
                events,
                error: Some(error),
            }
        }

        fn replay(&self) -> ExecStream {
            let mut items: Vec<Result<ExecEvent>> = self.events.iter().cloned().map(Ok).collect();
            if let Some(message) = self.error {
                items.push(Err(Error::Execution(message.to_string())));
            }
            stream::iter(items).boxed()
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        fn name(&self) -> &str {
            "scripted"
        }

        async fn target(&self, _pattern: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn ping(&self, _hosts: &[String]) -> ExecStream {
            self.replay()
        }

        fn facter(&self, _hosts: &[String]) -> ExecStream {
            self.replay()
        }

        fn service(&self, _: &[String], _: &str, _: bool, _: bool, _: bool) -> ExecStream {
            self.replay()
        }

        fn raw_execute(&self, _hosts: &[String], _command: &str) -> ExecStream {
            self.replay()
        }

        fn deploy(
            &self,
            _hosts: &[String],
            _role: &str,
            _extra_vars: &OperateArgs,
            _partial: Option<&[String]>,
        ) -> ExecStream {
            self.replay()
        }

        fn extract_error_message(&self, payload: &JsonValue) -> String {
            payload["msg"].as_str().unwrap_or_default().to_string()
        }
    }

    fn outcome(host: &str, status: ExecStatus) -> ExecEvent {
        ExecEvent::host(host, ResultRecord::new(status, JsonValue::Null))
    }

    fn aggregator(store: &MemoryStore, executor: ScriptedExecutor) -> ResultAggregator {
        ResultAggregator::new(
            Arc::new(store.clone()),
            Arc::new(executor),
            Arc::new(TaskRegistry::builtin()),
            Duration::from_millis(200),
        )
    }

    /// Creates and associates a job, returning its task id and work unit
    async fn launch(
        store: &MemoryStore,
        hosts: &[&str],
        operation: Operation,
    ) -> (String, WorkUnit) {
        let mut job = Job::new(
            hosts.iter().map(|h| h.to_string()).collect(),
            operation.name(),
            operation.mutex(),
            operation.operate_args(),
        )
        .unwrap();
        job_repository::create(store, &job).await.unwrap();
        let handle = TaskHandle {
            id: uuid::Uuid::new_v4().to_string(),
        };
        let task_id = job_repository::associate(store, &mut job, &handle)
            .await
            .unwrap();
        let unit = WorkUnit {
            job: job.descriptor(),
            operation,
        };
        (task_id, unit)
    }

    async fn reload(store: &MemoryStore, task_id: &str) -> Job {
        let mut job = job_repository::load(store, task_id).await.unwrap().unwrap();
        job_repository::load_data(store, &mut job).await.unwrap();
        job
    }

    async fn meta_left(store: &MemoryStore, job: &Job) -> bool {
        for key in job.meta_keys() {
            if store.exists(&key).await.unwrap() {
                return true;
            }
        }
        false
    }

    #[tokio::test]
    async fn test_all_hosts_ok() {
        let store = MemoryStore::new();
        let executor = ScriptedExecutor::new(vec![
            outcome("h1", ExecStatus::Ok),
            outcome("h2", ExecStatus::Ok),
        ]);
        let (task_id, unit) = launch(&store, &["h1", "h2"], Operation::Ping).await;

        aggregator(&store, executor).run(task_id.clone(), unit).await;

        let job = reload(&store, &task_id).await;
        assert_eq!(job.state(), JobState::Done);
        assert_eq!(job.error(), "");
        assert_eq!(job.results()["h1"].len(), 1);
        assert_eq!(job.results()["h2"].len(), 1);
        assert!(!meta_left(&store, &job).await);
    }

    #[tokio::test]
    async fn test_unreachable_host_fails_job() {
        let store = MemoryStore::new();
        let executor = ScriptedExecutor::new(vec![
            outcome("h1", ExecStatus::Unreachable),
            outcome("h2", ExecStatus::Ok),
        ]);
        let (task_id, unit) = launch(&store, &["h1", "h2"], Operation::Ping).await;

        aggregator(&store, executor).run(task_id.clone(), unit).await;

        let job = reload(&store, &task_id).await;
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.error(), "1 of 2 remote host(s) got ping errors");
        assert_eq!(job.results()["h1"][0].status, ExecStatus::Unreachable);
        assert!(!meta_left(&store, &job).await);
    }

    #[tokio::test]
    async fn test_missing_host_is_no_match() {
        let store = MemoryStore::new();
        let executor = ScriptedExecutor::new(vec![
            outcome("h1", ExecStatus::Ok),
            outcome("stranger", ExecStatus::Ok),
        ]);
        let (task_id, unit) = launch(&store, &["h1", "h2", "h3"], Operation::Facter).await;

        aggregator(&store, executor).run(task_id.clone(), unit).await;

        let job = reload(&store, &task_id).await;
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.error(), "got executor error, target not found: h2,h3");
        assert_eq!(job.results()["h1"].len(), 1);
    }

    #[tokio::test]
    async fn test_engine_error_keeps_earlier_records() {
        let store = MemoryStore::new();
        let executor =
            ScriptedExecutor::failing(vec![outcome("h1", ExecStatus::Ok)], "ssh exploded");
        let operation = Operation::Execute {
            command: "uptime".to_string(),
        };
        let (task_id, unit) = launch(&store, &["h1", "h2"], operation).await;

        aggregator(&store, executor).run(task_id.clone(), unit).await;

        let job = reload(&store, &task_id).await;
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.error(), "got executor error, ssh exploded");
        assert_eq!(job.results()["h1"].len(), 1);
        assert!(job.results()["h2"].is_empty());
        assert!(!meta_left(&store, &job).await);
    }

    #[tokio::test]
    async fn test_deploy_broadcasts_announcements() {
        let store = MemoryStore::new();
        let executor = ScriptedExecutor::new(vec![
            ExecEvent::announce("install"),
            ExecEvent::host(
                "h1",
                ResultRecord::step(ExecStatus::Changed, "install", json!({"rc": 0})),
            ),
            ExecEvent::host(
                "h2",
                ResultRecord::step(ExecStatus::Failed, "install", json!({"msg": "boom"})),
            ),
        ]);
        let operation = Operation::Deploy {
            role: "web".to_string(),
            extra_vars: OperateArgs::new(),
            partial: None,
        };
        let (task_id, unit) = launch(&store, &["h1", "h2"], operation).await;

        aggregator(&store, executor).run(task_id.clone(), unit).await;

        let job = reload(&store, &task_id).await;
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.error(), "1 of 2 remote host(s) got deploy errors");

        let h1 = &job.results()["h1"];
        assert_eq!(h1.len(), 2);
        assert_eq!(h1[0].status, ExecStatus::Announce);
        assert_eq!(h1[0].name.as_deref(), Some("install"));
        assert_eq!(h1[1].payload, json!("CHANGED"));

        let h2 = &job.results()["h2"];
        assert_eq!(h2[0].status, ExecStatus::Announce);
        assert_eq!(h2[1].payload, json!("boom"));
        assert!(!meta_left(&store, &job).await);
    }

    #[tokio::test]
    async fn test_deploy_host_without_outcome_is_no_match() {
        let store = MemoryStore::new();
        let executor = ScriptedExecutor::new(vec![
            ExecEvent::announce("install"),
            ExecEvent::host(
                "h1",
                ResultRecord::step(ExecStatus::Changed, "install", json!({"rc": 0})),
            ),
        ]);
        let operation = Operation::Deploy {
            role: "web".to_string(),
            extra_vars: OperateArgs::new(),
            partial: None,
        };
        let (task_id, unit) = launch(&store, &["h1", "ghost"], operation).await;

        aggregator(&store, executor).run(task_id.clone(), unit).await;

        let job = reload(&store, &task_id).await;
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.error(), "got executor error, target not found: ghost");
        assert_eq!(job.results()["h1"].len(), 2);
        assert!(!meta_left(&store, &job).await);
    }

    #[tokio::test]
    async fn test_unknown_task_type() {
        let store = MemoryStore::new();
        let operation = Operation::Task {
            taskname: "nightly".to_string(),
            tasktype: "lua".to_string(),
            taskopts: OperateArgs::new(),
        };
        let (task_id, unit) = launch(&store, &["h1"], operation).await;

        aggregator(&store, ScriptedExecutor::new(vec![]))
            .run(task_id.clone(), unit)
            .await;

        let job = reload(&store, &task_id).await;
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.error(), "got unexpected error, unknown task type <lua>");
    }

    #[tokio::test]
    async fn test_task_abort_finishes_done() {
        let store = MemoryStore::new();
        let executor = ScriptedExecutor::new(vec![
            outcome("h1", ExecStatus::Ok),
            ExecEvent::host(
                "h2",
                ResultRecord::new(ExecStatus::Failed, json!({"msg": "exit 1"})),
            ),
        ]);
        let taskopts = json!({
            "steps": [{"name": "migrate", "cmd": "./migrate"}, {"name": "seed", "cmd": "./seed"}],
            "on_failure": "stop"
        });
        let operation = Operation::Task {
            taskname: "db".to_string(),
            tasktype: "script".to_string(),
            taskopts: taskopts.as_object().cloned().unwrap(),
        };
        let (task_id, unit) = launch(&store, &["h1", "h2"], operation).await;

        aggregator(&store, executor).run(task_id.clone(), unit).await;

        let job = reload(&store, &task_id).await;
        assert_eq!(job.state(), JobState::Done);
        assert_eq!(
            job.error(),
            "task aborted by plugin, step migrate failed on h2"
        );
        // announce + outcome, the "seed" step never ran
        assert_eq!(job.results()["h1"].len(), 2);
        assert_eq!(job.results()["h2"][1].payload, json!("exit 1"));
        assert!(!meta_left(&store, &job).await);
    }

    #[tokio::test]
    async fn test_abandon_releases_running_job() {
        let store = MemoryStore::new();
        let operation = Operation::Deploy {
            role: "web".to_string(),
            extra_vars: OperateArgs::new(),
            partial: None,
        };
        let (task_id, unit) = launch(&store, &["h1"], operation).await;

        aggregator(&store, ScriptedExecutor::new(vec![]))
            .abandon(task_id.clone(), unit, "worker panicked".to_string())
            .await;

        let job = reload(&store, &task_id).await;
        assert_eq!(job.state(), JobState::Failed);
        assert_eq!(job.error(), "got unexpected error, worker panicked");
        assert!(!meta_left(&store, &job).await);
    }

    #[tokio::test]
    async fn test_unassociated_job_is_released() {
        let store = MemoryStore::new();
        let job = Job::new(vec!["h1".to_string()], "deploy", true, OperateArgs::new()).unwrap();
        job_repository::create(&store, &job).await.unwrap();
        let unit = WorkUnit {
            job: job.descriptor(),
            operation: Operation::Deploy {
                role: "web".to_string(),
                extra_vars: OperateArgs::new(),
                partial: None,
            },
        };

        aggregator(&store, ScriptedExecutor::new(vec![]))
            .run("lost".to_string(), unit)
            .await;

        let stored = job_repository::load(&store, "lost").await.unwrap().unwrap();
        assert_eq!(stored.state(), JobState::Failed);
        assert_eq!(stored.error(), "job was never associated with its task");

        let again = Job::new(vec!["h1".to_string()], "deploy", true, OperateArgs::new()).unwrap();
        assert!(job_repository::create(&store, &again).await.is_ok());
    }
}
