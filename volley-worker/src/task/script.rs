//! Script task plugin
//!
//! Runs a list of shell steps on every target, in order:
//!
//! ```json
//! {
//!   "steps": [{"name": "fetch", "cmd": "git pull"}, {"name": "build", "cmd": "make"}],
//!   "on_failure": "continue"
//! }
//! ```
//!
//! `on_failure` decides what happens after a step failed on some host:
//! `continue` (default) runs the next step on the remaining hosts, `fail`
//! stops the task and fails the job, `stop` stops the task but still
//! counts the job as done. `abort_on_failure: true` is accepted as a
//! shorthand for `fail`.

use futures::StreamExt;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use volley_core::domain::job::OperateArgs;
use volley_core::domain::result::{ExecEvent, ResultRecord};
use volley_core::{Error, Result};

use super::TaskPlugin;
use crate::executor::{ExecStream, Executor};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum OnFailure {
    #[default]
    Continue,
    Fail,
    Stop,
}

#[derive(Debug, Clone, Deserialize)]
struct ScriptStep {
    name: String,
    cmd: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ScriptOptions {
    steps: Vec<ScriptStep>,
    #[serde(default)]
    on_failure: OnFailure,
    #[serde(default)]
    abort_on_failure: bool,
}

impl ScriptOptions {
    fn parse(taskopts: &OperateArgs) -> Result<Self> {
        let mut options: ScriptOptions =
            serde_json::from_value(serde_json::Value::Object(taskopts.clone()))
                .map_err(|e| Error::Prepare(format!("bad script options: {}", e)))?;

        if options.steps.is_empty() {
            return Err(Error::Prepare("script task has no steps".to_string()));
        }
        if let Some(step) = options
            .steps
            .iter()
            .find(|s| s.name.trim().is_empty() || s.cmd.trim().is_empty())
        {
            return Err(Error::Prepare(format!(
                "script step <{}> needs a name and a cmd",
                step.name
            )));
        }
        if options.abort_on_failure {
            options.on_failure = OnFailure::Fail;
        }
        Ok(options)
    }
}

/// Built-in `script` task
pub struct ScriptTask;

impl TaskPlugin for ScriptTask {
    fn name(&self) -> &str {
        "shell script"
    }

    fn kind(&self) -> &str {
        "script"
    }

    fn run_task(
        &self,
        hosts: &[String],
        executor: Arc<dyn Executor>,
        taskopts: &OperateArgs,
    ) -> Result<ExecStream> {
        let options = ScriptOptions::parse(taskopts)?;
        let mut active = hosts.to_vec();
        let (tx, rx) = mpsc::channel(64);

        tokio::spawn(async move {
            for step in options.steps {
                if active.is_empty() {
                    break;
                }
                if tx.send(Ok(ExecEvent::announce(&step.name))).await.is_err() {
                    return;
                }

                let mut failed = Vec::new();
                let mut events = executor.raw_execute(&active, &step.cmd);
                while let Some(event) = events.next().await {
                    let event = event.map(|event| {
                        if event.record.status.is_failure() {
                            if let Some(host) = event.target() {
                                failed.push(host.to_string());
                            }
                        }
                        let record = ResultRecord::step(
                            event.record.status,
                            &step.name,
                            event.record.payload,
                        );
                        ExecEvent {
                            origin: event.origin,
                            record,
                        }
                    });

                    let stop = event.is_err();
                    if tx.send(event).await.is_err() || stop {
                        return;
                    }
                }

                if failed.is_empty() {
                    continue;
                }
                let message = format!("step {} failed on {}", step.name, failed.join(","));
                let outcome = match options.on_failure {
                    OnFailure::Continue => {
                        active.retain(|host| !failed.contains(host));
                        continue;
                    }
                    OnFailure::Fail => Error::Task(message),
                    OnFailure::Stop => Error::TaskAbort(message),
                };
                let _ = tx.send(Err(outcome)).await;
                return;
            }
        });

        Ok(ReceiverStream::new(rx).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{Remote, RemoteOutput, ShellExecutor};
    use async_trait::async_trait;
    use serde_json::json;
    use std::path::PathBuf;
    use volley_core::domain::result::ExecStatus;

    /// Fails every command on `bad-host` containing "deploy"
    struct FlakyRemote;

    #[async_trait]
    impl Remote for FlakyRemote {
        async fn run(&self, host: &str, command: &str) -> Result<RemoteOutput> {
            let rc = if host == "bad-host" && command.contains("deploy") { 1 } else { 0 };
            Ok(RemoteOutput {
                stdout: String::new(),
                stderr: if rc == 0 { String::new() } else { "deploy failed".to_string() },
                rc,
            })
        }
    }

    fn executor() -> Arc<dyn Executor> {
        Arc::new(ShellExecutor::new(
            Arc::new(FlakyRemote),
            None,
            PathBuf::from("/nonexistent"),
            2,
        ))
    }

    fn opts(value: serde_json::Value) -> OperateArgs {
        value.as_object().cloned().unwrap_or_default()
    }

    fn hosts() -> Vec<String> {
        vec!["good-host".to_string(), "bad-host".to_string()]
    }

    #[test]
    fn test_bad_options_are_prepare_errors() {
        let task = ScriptTask;
        for bad in [
            json!({}),
            json!({"steps": []}),
            json!({"steps": [{"name": "x"}]}),
            json!({"steps": [{"name": "x", "cmd": "ls"}], "on_failure": "explode"}),
        ] {
            let result = task.run_task(&hosts(), executor(), &opts(bad));
            assert!(matches!(result, Err(Error::Prepare(_))));
        }
    }

    #[tokio::test]
    async fn test_continue_drops_failed_hosts() {
        let taskopts = opts(json!({
            "steps": [
                {"name": "deploy", "cmd": "./deploy.sh"},
                {"name": "verify", "cmd": "./verify.sh"}
            ]
        }));
        let events: Vec<Result<ExecEvent>> = ScriptTask
            .run_task(&hosts(), executor(), &taskopts)
            .unwrap()
            .collect()
            .await;

        assert!(events.iter().all(|e| e.is_ok()));
        let events: Vec<ExecEvent> = events.into_iter().map(|e| e.unwrap()).collect();

        let verify: Vec<&ExecEvent> = events
            .iter()
            .filter(|e| e.target().is_some() && e.record.name.as_deref() == Some("verify"))
            .collect();
        assert_eq!(verify.len(), 1);
        assert_eq!(verify[0].target(), Some("good-host"));

        let failed: Vec<&ExecEvent> = events
            .iter()
            .filter(|e| e.record.status == ExecStatus::Failed)
            .collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].record.name.as_deref(), Some("deploy"));
    }

    #[tokio::test]
    async fn test_abort_on_failure_ends_with_task_error() {
        let taskopts = opts(json!({
            "steps": [
                {"name": "deploy", "cmd": "./deploy.sh"},
                {"name": "verify", "cmd": "./verify.sh"}
            ],
            "abort_on_failure": true
        }));
        let events: Vec<Result<ExecEvent>> = ScriptTask
            .run_task(&hosts(), executor(), &taskopts)
            .unwrap()
            .collect()
            .await;

        match events.last() {
            Some(Err(Error::Task(msg))) => assert_eq!(msg, "step deploy failed on bad-host"),
            other => panic!("expected task error, got {:?}", other),
        }
        assert!(
            !events
                .iter()
                .filter_map(|e| e.as_ref().ok())
                .any(|e| e.record.name.as_deref() == Some("verify"))
        );
    }

    #[tokio::test]
    async fn test_stop_ends_with_abort() {
        let taskopts = opts(json!({
            "steps": [{"name": "deploy", "cmd": "./deploy.sh"}],
            "on_failure": "stop"
        }));
        let events: Vec<Result<ExecEvent>> = ScriptTask
            .run_task(&hosts(), executor(), &taskopts)
            .unwrap()
            .collect()
            .await;

        assert!(matches!(events.last(), Some(Err(Error::TaskAbort(_)))));
    }
}
