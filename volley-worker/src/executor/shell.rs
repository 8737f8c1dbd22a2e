//! Shell execution engine
//!
//! Reaches hosts over ssh and runs plain shell commands:
//! - ping: `true`
//! - facter: a small script printing `key=value` facts
//! - service: `systemctl start|stop|restart|reload-or-restart`
//! - deploy: the steps of `<roles_dir>/<role>.role`, one `name: command`
//!   per line, with extra vars exported as shell variables
//!
//! Remote calls go through the [`Remote`] trait so the engine logic can be
//! exercised without a network.

use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use futures::StreamExt;
use serde_json::{Value as JsonValue, json};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use volley_core::domain::job::OperateArgs;
use volley_core::domain::result::{ExecEvent, ExecStatus, ResultRecord};
use volley_core::{Error, Result};

use super::{ExecStream, Executor, Inventory};
use crate::config::WorkerConfig;

/// Exit code ssh reports when the connection itself failed
const UNREACHABLE_RC: i32 = 255;

/// Prints one `key=value` fact per line
const FACTER_SCRIPT: &str = r#"printf 'hostname=%s\n' "$(hostname)"
printf 'kernel=%s\n' "$(uname -s)"
printf 'kernel_release=%s\n' "$(uname -r)"
printf 'arch=%s\n' "$(uname -m)"
if [ -r /etc/os-release ]; then . /etc/os-release; printf 'os=%s\nos_version=%s\n' "$ID" "$VERSION_ID"; fi
printf 'cpus=%s\n' "$(getconf _NPROCESSORS_ONLN 2>/dev/null)""#;

// =============================================================================
// Remote transport
// =============================================================================

/// Outcome of one remote command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteOutput {
    pub stdout: String,
    pub stderr: String,
    pub rc: i32,
}

impl RemoteOutput {
    pub fn status(&self) -> ExecStatus {
        match self.rc {
            0 => ExecStatus::Ok,
            UNREACHABLE_RC => ExecStatus::Unreachable,
            _ => ExecStatus::Failed,
        }
    }

    fn error_text(&self) -> String {
        let stderr = self.stderr.trim();
        if stderr.is_empty() {
            format!("command exited with rc {}", self.rc)
        } else {
            stderr.to_string()
        }
    }

    fn payload(&self) -> JsonValue {
        json!({
            "stdout": self.stdout,
            "stderr": self.stderr,
            "rc": self.rc,
        })
    }
}

/// Runs a command on a remote host
#[async_trait]
pub trait Remote: Send + Sync {
    /// Returns `Err` only when the command could not be started at all
    async fn run(&self, host: &str, command: &str) -> Result<RemoteOutput>;
}

/// [`Remote`] backed by the `ssh` client
pub struct SshRemote {
    user: Option<String>,
    connect_timeout: u64,
    timeout: Option<Duration>,
}

impl SshRemote {
    pub fn new(user: Option<String>, connect_timeout: u64, timeout: Option<Duration>) -> Self {
        Self {
            user,
            connect_timeout,
            timeout,
        }
    }
}

#[async_trait]
impl Remote for SshRemote {
    async fn run(&self, host: &str, command: &str) -> Result<RemoteOutput> {
        let destination = match &self.user {
            Some(user) => format!("{}@{}", user, host),
            None => host.to_string(),
        };

        let mut cmd = Command::new("ssh");
        cmd.arg("-o")
            .arg("BatchMode=yes")
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout))
            .arg(&destination)
            .arg("--")
            .arg(command)
            .stdin(Stdio::null())
            .kill_on_drop(true);

        debug!("ssh {}: {}", destination, command);

        let output = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, cmd.output()).await {
                Ok(output) => output,
                Err(_) => {
                    return Ok(RemoteOutput {
                        stdout: String::new(),
                        stderr: format!("timed out after {}s", limit.as_secs()),
                        rc: UNREACHABLE_RC,
                    });
                }
            },
            None => cmd.output().await,
        }
        .map_err(|e| Error::Execution(format!("failed to run ssh: {}", e)))?;

        Ok(RemoteOutput {
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            rc: output.status.code().unwrap_or(UNREACHABLE_RC),
        })
    }
}

// =============================================================================
// Engine
// =============================================================================

/// One step of a deploy role
#[derive(Debug, Clone, PartialEq, Eq)]
struct RoleStep {
    name: String,
    command: String,
}

pub struct ShellExecutor {
    remote: Arc<dyn Remote>,
    inventory: Option<Inventory>,
    roles_dir: PathBuf,
    concurrency: usize,
}

impl ShellExecutor {
    pub fn new(
        remote: Arc<dyn Remote>,
        inventory: Option<Inventory>,
        roles_dir: PathBuf,
        concurrency: usize,
    ) -> Self {
        Self {
            remote,
            inventory,
            roles_dir,
            concurrency: concurrency.max(1),
        }
    }

    pub fn from_config(config: &WorkerConfig) -> Result<Self> {
        let inventory = config
            .inventory
            .as_deref()
            .map(Inventory::load)
            .transpose()?;
        let remote = SshRemote::new(
            config.ssh_user.clone(),
            config.ssh_connect_timeout,
            config.timeout,
        );

        Ok(Self::new(
            Arc::new(remote),
            inventory,
            config.roles_dir.clone(),
            config.concurrency,
        ))
    }

    /// Drops hosts unknown to the inventory
    fn known(&self, hosts: &[String]) -> Vec<String> {
        match &self.inventory {
            None => hosts.to_vec(),
            Some(inventory) => hosts
                .iter()
                .filter(|host| {
                    let known = inventory.contains(host);
                    if !known {
                        debug!("Host {} is not in the inventory, skipping", host);
                    }
                    known
                })
                .cloned()
                .collect(),
        }
    }

    fn fan_out<F>(&self, hosts: &[String], command: String, to_record: F) -> ExecStream
    where
        F: Fn(RemoteOutput) -> ResultRecord + Send + Sync + 'static,
    {
        run_on(
            Arc::clone(&self.remote),
            self.known(hosts),
            command,
            self.concurrency,
        )
        .map(move |(host, output)| output.map(|output| ExecEvent::host(host, to_record(output))))
        .boxed()
    }

    fn load_role(&self, role: &str, partial: Option<&[String]>) -> Result<Vec<RoleStep>> {
        if role.is_empty() || role.contains('/') || role.contains("..") {
            return Err(Error::Prepare(format!("bad role name <{}>", role)));
        }

        let path = self.roles_dir.join(format!("{}.role", role));
        let content = std::fs::read_to_string(&path).map_err(|e| {
            Error::Prepare(format!("cannot read role <{}> at {}: {}", role, path.display(), e))
        })?;

        let mut steps = parse_role(&content)?;
        if steps.is_empty() {
            return Err(Error::Prepare(format!("role <{}> has no steps", role)));
        }

        if let Some(partial) = partial {
            steps.retain(|step| partial.contains(&step.name));
            if steps.is_empty() {
                return Err(Error::Prepare(format!(
                    "no step of role <{}> matches <{}>",
                    role,
                    partial.join(",")
                )));
            }
        }

        Ok(steps)
    }
}

#[async_trait]
impl Executor for ShellExecutor {
    fn name(&self) -> &str {
        "shell"
    }

    async fn target(&self, pattern: &str) -> Result<Vec<String>> {
        Ok(match &self.inventory {
            Some(inventory) => inventory.matching(pattern),
            None if pattern.contains(['*', '?']) => Vec::new(),
            None => vec![pattern.to_string()],
        })
    }

    fn ping(&self, hosts: &[String]) -> ExecStream {
        self.fan_out(hosts, "true".to_string(), |output| {
            let payload = match output.status() {
                ExecStatus::Ok => JsonValue::Null,
                _ => json!({ "msg": output.error_text() }),
            };
            ResultRecord::new(output.status(), payload)
        })
    }

    fn facter(&self, hosts: &[String]) -> ExecStream {
        self.fan_out(hosts, FACTER_SCRIPT.to_string(), |output| {
            let payload = match output.status() {
                ExecStatus::Ok => JsonValue::Object(parse_facts(&output.stdout)),
                _ => json!({ "msg": output.error_text() }),
            };
            ResultRecord::new(output.status(), payload)
        })
    }

    fn service(
        &self,
        hosts: &[String],
        name: &str,
        start: bool,
        restart: bool,
        graceful: bool,
    ) -> ExecStream {
        let action = match (start, restart, graceful) {
            (false, _, _) => "stop",
            (true, false, _) => "start",
            (true, true, true) => "reload-or-restart",
            (true, true, false) => "restart",
        };
        let command = format!("systemctl {} {}", action, shell_quote(name));
        let name = name.to_string();

        self.fan_out(hosts, command, move |output| {
            let payload = match output.status() {
                ExecStatus::Ok => json!({ "name": name, "action": action }),
                _ => json!({ "msg": output.error_text() }),
            };
            ResultRecord::new(output.status(), payload)
        })
    }

    fn raw_execute(&self, hosts: &[String], command: &str) -> ExecStream {
        self.fan_out(hosts, command.to_string(), |output| {
            ResultRecord::new(output.status(), output.payload())
        })
    }

    fn deploy(
        &self,
        hosts: &[String],
        role: &str,
        extra_vars: &OperateArgs,
        partial: Option<&[String]>,
    ) -> ExecStream {
        let prepared = self
            .load_role(role, partial)
            .and_then(|steps| Ok((steps, export_vars(extra_vars)?)));
        let (steps, prelude) = match prepared {
            Ok(prepared) => prepared,
            Err(e) => return stream::once(async move { Err(e) }).boxed(),
        };

        let (tx, rx) = mpsc::channel(64);
        let remote = Arc::clone(&self.remote);
        let concurrency = self.concurrency;
        let mut active = self.known(hosts);

        tokio::spawn(async move {
            for step in steps {
                if active.is_empty() {
                    break;
                }
                if tx.send(Ok(ExecEvent::announce(&step.name))).await.is_err() {
                    return;
                }

                let command = format!("{}{}", prelude, step.command);
                let mut outcomes =
                    run_on(Arc::clone(&remote), active.clone(), command, concurrency);

                while let Some((host, output)) = outcomes.next().await {
                    let event = output.map(|output| {
                        let status = match output.status() {
                            ExecStatus::Ok => ExecStatus::Changed,
                            other => other,
                        };
                        if status.is_failure() {
                            // Failed hosts sit out the remaining steps
                            active.retain(|h| h != &host);
                        }
                        let mut payload = output.payload();
                        if status.is_failure() {
                            payload["msg"] = JsonValue::String(output.error_text());
                        }
                        ExecEvent::host(host, ResultRecord::step(status, &step.name, payload))
                    });

                    let stop = event.is_err();
                    if tx.send(event).await.is_err() || stop {
                        return;
                    }
                }
            }
        });

        ReceiverStream::new(rx).boxed()
    }

    fn extract_error_message(&self, payload: &JsonValue) -> String {
        if let Some(msg) = payload.get("msg").and_then(JsonValue::as_str) {
            return msg.to_string();
        }
        payload
            .get("stderr")
            .and_then(JsonValue::as_str)
            .map(|stderr| stderr.trim().to_string())
            .unwrap_or_default()
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Runs one command on many hosts, at most `concurrency` at a time
fn run_on(
    remote: Arc<dyn Remote>,
    hosts: Vec<String>,
    command: String,
    concurrency: usize,
) -> BoxStream<'static, (String, Result<RemoteOutput>)> {
    let command = Arc::new(command);
    stream::iter(hosts)
        .map(move |host| {
            let remote = Arc::clone(&remote);
            let command = Arc::clone(&command);
            async move {
                let output = remote.run(&host, &command).await;
                (host, output)
            }
        })
        .buffer_unordered(concurrency)
        .boxed()
}

fn parse_role(content: &str) -> Result<Vec<RoleStep>> {
    let mut steps = Vec::new();
    for (number, line) in content.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (name, command) = line.split_once(':').ok_or_else(|| {
            Error::Prepare(format!("bad role step at line {}: {}", number + 1, line))
        })?;
        let (name, command) = (name.trim(), command.trim());
        if name.is_empty() || command.is_empty() {
            return Err(Error::Prepare(format!(
                "bad role step at line {}: {}",
                number + 1,
                line
            )));
        }
        steps.push(RoleStep {
            name: name.to_string(),
            command: command.to_string(),
        });
    }
    Ok(steps)
}

fn parse_facts(stdout: &str) -> serde_json::Map<String, JsonValue> {
    stdout
        .lines()
        .filter_map(|line| line.split_once('='))
        .filter(|(key, _)| !key.trim().is_empty())
        .map(|(key, value)| (key.trim().to_string(), JsonValue::from(value.trim())))
        .collect()
}

/// Renders extra vars as `export NAME='value'; ` statements
fn export_vars(extra_vars: &OperateArgs) -> Result<String> {
    let mut prelude = String::new();
    for (name, value) in extra_vars {
        let valid = name
            .chars()
            .next()
            .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if !valid {
            return Err(Error::Prepare(format!("bad extra var name <{}>", name)));
        }

        let value = match value {
            JsonValue::String(s) => s.clone(),
            other => other.to_string(),
        };
        prelude.push_str(&format!("export {}={}; ", name, shell_quote(&value)));
    }
    Ok(prelude)
}

fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}
