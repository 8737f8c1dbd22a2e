//! Job domain types
//!
//! A [`Job`] is one tracked operation against a fixed set of hosts. The type
//! owns no I/O: it knows how to name its coordination keys and how to
//! serialize itself, while the repository layer moves it in and out of the
//! coordination store.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use crate::domain::keys;
use crate::domain::result::ResultRecord;
use crate::error::{Error, Result};

/// Operation-specific job arguments, persisted alongside the job record
pub type OperateArgs = serde_json::Map<String, JsonValue>;

/// Job lifecycle state
///
/// Stored and serialized as an integer: `DONE=0, RUNNING=1, FAILED=2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i64", try_from = "i64")]
pub enum JobState {
    Done,
    Running,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        self != JobState::Running
    }

    /// States only move forward: `RUNNING -> DONE` or `RUNNING -> FAILED`
    pub fn can_transition_to(self, next: JobState) -> bool {
        self == JobState::Running && next.is_terminal()
    }
}

impl From<JobState> for i64 {
    fn from(state: JobState) -> Self {
        match state {
            JobState::Done => 0,
            JobState::Running => 1,
            JobState::Failed => 2,
        }
    }
}

impl TryFrom<i64> for JobState {
    type Error = String;

    fn try_from(value: i64) -> std::result::Result<Self, Self::Error> {
        match value {
            0 => Ok(JobState::Done),
            1 => Ok(JobState::Running),
            2 => Ok(JobState::Failed),
            other => Err(format!("unknown job state {}", other)),
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobState::Done => write!(f, "done"),
            JobState::Running => write!(f, "running"),
            JobState::Failed => write!(f, "failed"),
        }
    }
}

/// Serializable form of a job handed to the background substrate
///
/// Carries everything the worker needs to rebuild the job without touching
/// the store. The stored `operate` already includes the uniqueness tag of
/// non-mutex jobs, so rebuilding never re-tags.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub targets: Vec<String>,
    pub operate: String,
    #[serde(default)]
    pub operate_args: OperateArgs,
    pub startat: i64,
    pub utag: String,
}

/// Job context as returned to query clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobContext {
    pub taskid: Option<String>,
    pub targets: Vec<String>,
    pub operate: String,
    pub operate_args: OperateArgs,
    pub startat: i64,
    pub state: JobState,
    pub error: String,
    #[serde(default)]
    pub return_data: BTreeMap<String, Vec<ResultRecord>>,
}

/// One tracked operation instance
#[derive(Debug, Clone)]
pub struct Job {
    id: Option<String>,
    targets: Vec<String>,
    operate: String,
    operate_args: OperateArgs,
    startat: i64,
    utag: String,
    state: JobState,
    error: String,
    results: BTreeMap<String, Vec<ResultRecord>>,
}

impl Job {
    /// Creates a new in-memory job
    ///
    /// # Arguments
    /// * `targets` - Hosts to operate on, must not be empty
    /// * `operation` - Operation kind (e.g. "ping", "deploy")
    /// * `mutex` - Whether the operation requires exclusive access to its hosts
    /// * `operate_args` - Operation arguments to persist with the job
    pub fn new(
        targets: Vec<String>,
        operation: &str,
        mutex: bool,
        operate_args: OperateArgs,
    ) -> Result<Self> {
        let mut unique = Vec::with_capacity(targets.len());
        for target in targets {
            if !target.is_empty() && !unique.contains(&target) {
                unique.push(target);
            }
        }
        if unique.is_empty() {
            return Err(Error::Invalid("no target(s) given".to_string()));
        }

        let operate = if mutex {
            operation.to_string()
        } else {
            format!("{}:{}", operation, random_tag())
        };

        Ok(Self {
            id: None,
            targets: unique,
            operate,
            operate_args,
            startat: chrono::Utc::now().timestamp(),
            utag: random_tag(),
            state: JobState::Running,
            error: String::new(),
            results: BTreeMap::new(),
        })
    }

    /// Rebuilds a job from the descriptor carried by a work unit
    pub fn from_descriptor(descriptor: JobDescriptor) -> Self {
        Self {
            id: None,
            targets: descriptor.targets,
            operate: descriptor.operate,
            operate_args: descriptor.operate_args,
            startat: descriptor.startat,
            utag: descriptor.utag,
            state: JobState::Running,
            error: String::new(),
            results: BTreeMap::new(),
        }
    }

    /// Rebuilds a job from the fields of its `job:<taskid>` hash
    pub fn from_record(task_id: &str, fields: &HashMap<String, String>) -> Result<Self> {
        let key = keys::job_key(task_id);
        let field = |name: &str| {
            fields.get(name).ok_or_else(|| Error::Corrupted {
                key: key.clone(),
                reason: format!("missing field '{}'", name),
            })
        };
        let corrupted = |reason: String| Error::Corrupted {
            key: key.clone(),
            reason,
        };

        let targets: Vec<String> = serde_json::from_str(field("targets")?)
            .map_err(|e| corrupted(format!("bad targets: {}", e)))?;
        let operate_args: OperateArgs = serde_json::from_str(field("operate_args")?)
            .map_err(|e| corrupted(format!("bad operate_args: {}", e)))?;
        let startat = field("startat")?
            .parse::<i64>()
            .map_err(|e| corrupted(format!("bad startat: {}", e)))?;
        let state = field("state")?
            .parse::<i64>()
            .map_err(|e| corrupted(format!("bad state: {}", e)))
            .and_then(|raw| JobState::try_from(raw).map_err(corrupted))?;

        Ok(Self {
            id: Some(task_id.to_string()),
            targets,
            operate: field("operate")?.clone(),
            operate_args,
            startat,
            utag: field("utag")?.clone(),
            state,
            error: fields.get("error").cloned().unwrap_or_default(),
            results: BTreeMap::new(),
        })
    }

    /// Serializable descriptor for the background substrate
    pub fn descriptor(&self) -> JobDescriptor {
        JobDescriptor {
            targets: self.targets.clone(),
            operate: self.operate.clone(),
            operate_args: self.operate_args.clone(),
            startat: self.startat,
            utag: self.utag.clone(),
        }
    }

    /// Fields of the `job:<taskid>` hash written on association
    pub fn record_fields(&self) -> Result<Vec<(String, String)>> {
        Ok(vec![
            ("state".to_string(), i64::from(self.state).to_string()),
            ("targets".to_string(), serde_json::to_string(&self.targets)?),
            ("operate".to_string(), self.operate.clone()),
            (
                "operate_args".to_string(),
                serde_json::to_string(&self.operate_args)?,
            ),
            ("utag".to_string(), self.utag.clone()),
            ("startat".to_string(), self.startat.to_string()),
            ("error".to_string(), self.error.clone()),
        ])
    }

    /// Job context for query responses
    pub fn context(&self) -> JobContext {
        JobContext {
            taskid: self.id.clone(),
            targets: self.targets.clone(),
            operate: self.operation().to_string(),
            operate_args: self.operate_args.clone(),
            startat: self.startat,
            state: self.state,
            error: self.error.clone(),
            return_data: self.results.clone(),
        }
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Binds the job to the task id assigned by the background substrate
    pub fn bind(&mut self, task_id: impl Into<String>) {
        self.id = Some(task_id.into());
    }

    pub fn targets(&self) -> &[String] {
        &self.targets
    }

    /// Operation kind without the uniqueness tag
    pub fn operation(&self) -> &str {
        self.operate.split(':').next().unwrap_or(&self.operate)
    }

    /// Operation name as stored, including the tag of non-mutex jobs
    pub fn operate(&self) -> &str {
        &self.operate
    }

    pub fn operate_args(&self) -> &OperateArgs {
        &self.operate_args
    }

    pub fn startat(&self) -> i64 {
        self.startat
    }

    pub fn utag(&self) -> &str {
        &self.utag
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn error(&self) -> &str {
        &self.error
    }

    pub fn results(&self) -> &BTreeMap<String, Vec<ResultRecord>> {
        &self.results
    }

    pub fn set_results(&mut self, host: impl Into<String>, records: Vec<ResultRecord>) {
        self.results.insert(host.into(), records);
    }

    // =========================================================================
    // Keys
    // =========================================================================

    pub fn meta_key(&self, host: &str) -> String {
        keys::meta_key(host, &self.operate)
    }

    pub fn meta_keys(&self) -> Vec<String> {
        self.targets.iter().map(|t| self.meta_key(t)).collect()
    }

    pub fn data_key(&self, host: &str) -> String {
        keys::data_key(host, &self.operate, &self.utag)
    }

    pub fn data_keys(&self) -> Vec<String> {
        self.targets.iter().map(|t| self.data_key(t)).collect()
    }

    pub fn host_channel(&self, host: &str) -> String {
        keys::host_channel(host, &self.operate)
    }

    pub fn control_channel(&self) -> String {
        keys::control_channel(&self.operate)
    }

    // =========================================================================
    // State transitions
    // =========================================================================

    /// Records the first failing host as the fallback error message
    pub fn note_failure(&mut self, host: &str) {
        if self.error.is_empty() {
            self.error = format!("some operations failed on {}", host);
        }
    }

    /// Moves the job into its terminal state
    ///
    /// An explicit `error` replaces the fallback message recorded by
    /// [`Job::note_failure`].
    pub fn finish(&mut self, failed: bool, error: Option<String>) -> Result<JobState> {
        let next = if failed {
            JobState::Failed
        } else {
            JobState::Done
        };
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidState(format!(
                "job {} cannot move from {} to {}",
                self.id.as_deref().unwrap_or("<unbound>"),
                self.state,
                next
            )));
        }
        if let Some(error) = error.filter(|e| !e.is_empty()) {
            self.error = error;
        }
        self.state = next;
        Ok(next)
    }
}

/// Random hex token used for uniqueness tags
fn random_tag() -> String {
    Uuid::new_v4().simple().to_string()
}
