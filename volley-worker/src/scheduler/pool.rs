//! Worker pool
//!
//! In-process background substrate. `submit` only queues the unit and hands
//! back its task id; a dispatcher task pulls units off the queue and runs
//! each one in its own task, holding a semaphore permit for its lifetime.
//! A run that panics is handed back to the runner to be abandoned.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use volley_core::dto::operation::WorkUnit;
use volley_core::submit::{Submitter, TaskHandle};
use volley_core::{Error, Result};

use crate::config::WorkerConfig;
use crate::service::WorkRunner;

/// Queued unit with the id it was submitted under
struct Queued {
    task_id: String,
    unit: WorkUnit,
}

/// [`Submitter`] running work units on the local tokio runtime
#[derive(Clone)]
pub struct WorkerPool {
    queue: mpsc::UnboundedSender<Queued>,
}

impl WorkerPool {
    /// Starts the dispatcher
    ///
    /// The dispatcher stops once every clone of the pool is dropped and the
    /// queue is drained; the returned handle resolves after that.
    pub fn start(config: &WorkerConfig, runner: Arc<dyn WorkRunner>) -> (Self, JoinHandle<()>) {
        let (queue, receiver) = mpsc::unbounded_channel();
        let semaphore = Arc::new(Semaphore::new(config.max_parallel_jobs));

        info!(
            "Starting worker pool (max parallel jobs: {})",
            config.max_parallel_jobs
        );
        let handle = tokio::spawn(dispatch(receiver, semaphore, runner));

        (Self { queue }, handle)
    }
}

#[async_trait]
impl Submitter for WorkerPool {
    async fn submit(&self, unit: WorkUnit) -> Result<TaskHandle> {
        let task_id = Uuid::new_v4().to_string();
        self.queue
            .send(Queued {
                task_id: task_id.clone(),
                unit,
            })
            .map_err(|_| Error::Execution("worker pool is shut down".to_string()))?;

        debug!("Queued work unit {}", task_id);
        Ok(TaskHandle { id: task_id })
    }
}

async fn dispatch(
    mut receiver: mpsc::UnboundedReceiver<Queued>,
    semaphore: Arc<Semaphore>,
    runner: Arc<dyn WorkRunner>,
) {
    while let Some(Queued { task_id, unit }) = receiver.recv().await {
        let permit = match Arc::clone(&semaphore).acquire_owned().await {
            Ok(permit) => permit,
            Err(_) => {
                warn!("Worker pool semaphore closed, dropping {}", task_id);
                break;
            }
        };

        let runner = Arc::clone(&runner);
        tokio::spawn(async move {
            debug!("Starting work unit {}", task_id);
            let run = tokio::spawn({
                let runner = Arc::clone(&runner);
                let (task_id, unit) = (task_id.clone(), unit.clone());
                async move { runner.run(task_id, unit).await }
            });

            if let Err(e) = run.await {
                error!("Work unit {} did not finish: {}", task_id, e);
                let reason = if e.is_panic() {
                    "worker panicked"
                } else {
                    "worker cancelled"
                };
                runner.abandon(task_id, unit, reason.to_string()).await;
            }
            // Permit is released when dropped
            drop(permit);
        });
    }

    debug!("Worker pool queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Mutex;
    use volley_core::domain::job::Job;
    use volley_core::dto::operation::Operation;

    /// Records every unit and tracks how many run at once
    #[derive(Default)]
    struct CountingRunner {
        running: AtomicUsize,
        peak: AtomicUsize,
        seen: Mutex<Vec<String>>,
        abandoned: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl WorkRunner for CountingRunner {
        async fn run(&self, task_id: String, _unit: WorkUnit) {
            let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(30)).await;
            self.seen.lock().await.push(task_id);
            self.running.fetch_sub(1, Ordering::SeqCst);
        }

        async fn abandon(&self, task_id: String, _unit: WorkUnit, reason: String) {
            self.abandoned.lock().await.push((task_id, reason));
        }
    }

    /// Panics on every unit
    #[derive(Default)]
    struct PanickingRunner {
        abandoned: Mutex<Vec<(String, String)>>,
    }

    #[async_trait]
    impl WorkRunner for PanickingRunner {
        async fn run(&self, task_id: String, _unit: WorkUnit) {
            panic!("runner blew up on {}", task_id);
        }

        async fn abandon(&self, task_id: String, _unit: WorkUnit, reason: String) {
            self.abandoned.lock().await.push((task_id, reason));
        }
    }

    fn unit() -> WorkUnit {
        let job = Job::new(
            vec!["h1".to_string()],
            "ping",
            false,
            Default::default(),
        )
        .unwrap();
        WorkUnit {
            job: job.descriptor(),
            operation: Operation::Ping,
        }
    }

    #[tokio::test]
    async fn test_submit_runs_units_with_bounded_parallelism() {
        let mut config = WorkerConfig::default();
        config.max_parallel_jobs = 2;
        let runner = Arc::new(CountingRunner::default());
        let (pool, dispatcher) = WorkerPool::start(&config, runner.clone());

        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(pool.submit(unit()).await.unwrap().id);
        }
        drop(pool);
        dispatcher.await.unwrap();

        // The dispatcher exits once the last unit is started, wait for the rest
        for _ in 0..50 {
            if runner.seen.lock().await.len() == ids.len() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let mut seen = runner.seen.lock().await.clone();
        seen.sort();
        ids.sort();
        assert_eq!(seen, ids);
        assert!(runner.peak.load(Ordering::SeqCst) <= 2);
        assert!(runner.abandoned.lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_panicking_run_is_abandoned() {
        let runner = Arc::new(PanickingRunner::default());
        let (pool, _dispatcher) = WorkerPool::start(&WorkerConfig::default(), runner.clone());

        let handle = pool.submit(unit()).await.unwrap();

        for _ in 0..50 {
            if !runner.abandoned.lock().await.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let abandoned = runner.abandoned.lock().await.clone();
        assert_eq!(
            abandoned,
            vec![(handle.id, "worker panicked".to_string())]
        );
    }

    #[tokio::test]
    async fn test_task_ids_are_unique() {
        let runner = Arc::new(CountingRunner::default());
        let (pool, _dispatcher) = WorkerPool::start(&WorkerConfig::default(), runner);

        let a = pool.submit(unit()).await.unwrap();
        let b = pool.submit(unit()).await.unwrap();
        assert_ne!(a.id, b.id);
    }
}
