//! Operation DTOs
//!
//! Request bodies for every operation endpoint, and the [`WorkUnit`] that
//! carries a job to the worker pool.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::domain::job::{JobDescriptor, OperateArgs};
use crate::dto::deserialize_flag;
use crate::error::{Error, Result};

// =============================================================================
// Operations
// =============================================================================

/// Operation executed by a worker, with its arguments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Operation {
    Ping,
    Facter,
    Service {
        name: String,
        start: bool,
        restart: bool,
        graceful: bool,
    },
    Execute {
        command: String,
    },
    Deploy {
        role: String,
        #[serde(default)]
        extra_vars: OperateArgs,
        #[serde(default)]
        partial: Option<Vec<String>>,
    },
    Task {
        taskname: String,
        tasktype: String,
        #[serde(default)]
        taskopts: OperateArgs,
    },
}

impl Operation {
    /// Operation kind, used as the coordination key namespace
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Ping => "ping",
            Operation::Facter => "facter",
            Operation::Service { .. } => "service",
            Operation::Execute { .. } => "execute",
            Operation::Deploy { .. } => "deploy",
            Operation::Task { .. } => "task",
        }
    }

    /// Whether the operation needs exclusive access to its hosts
    pub fn mutex(&self) -> bool {
        matches!(self, Operation::Deploy { .. } | Operation::Task { .. })
    }

    /// Whether each host yields exactly one final outcome
    ///
    /// Stepwise operations (deploy, task) report many outcomes per host and
    /// announce step boundaries instead.
    pub fn per_host(&self) -> bool {
        !self.mutex()
    }

    /// Word used in failure summaries ("got facts errors")
    pub fn noun(&self) -> &'static str {
        match self {
            Operation::Facter => "facts",
            other => other.name(),
        }
    }

    /// Arguments persisted with the job record
    pub fn operate_args(&self) -> OperateArgs {
        let value = match self {
            Operation::Ping | Operation::Facter => JsonValue::Object(OperateArgs::new()),
            Operation::Service {
                name,
                start,
                restart,
                graceful,
            } => serde_json::json!({
                "name": name,
                "start": start,
                "restart": restart,
                "graceful": graceful,
            }),
            Operation::Execute { command } => serde_json::json!({ "command": command }),
            Operation::Deploy {
                role,
                extra_vars,
                partial,
            } => serde_json::json!({
                "role": role,
                "extra_vars": extra_vars,
                "partial": partial,
            }),
            Operation::Task {
                taskname,
                tasktype,
                taskopts,
            } => serde_json::json!({
                "taskname": taskname,
                "tasktype": tasktype,
                "taskopts": taskopts,
            }),
        };
        match value {
            JsonValue::Object(map) => map,
            _ => OperateArgs::new(),
        }
    }
}

/// Background work handed to the worker pool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkUnit {
    pub job: JobDescriptor,
    pub operation: Operation,
}

// =============================================================================
// Service state
// =============================================================================

/// Desired service state, `0=started, 1=stopped, 2=restarted` on the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    Started,
    Stopped,
    Restarted,
}

impl ServiceState {
    pub fn from_code(code: i64) -> Result<Self> {
        match code {
            0 => Ok(ServiceState::Started),
            1 => Ok(ServiceState::Stopped),
            2 => Ok(ServiceState::Restarted),
            _ => Err(Error::Invalid("bad service name or state".to_string())),
        }
    }

    /// `(start, restart)` flags passed to the execution engine
    pub fn flags(self) -> (bool, bool) {
        match self {
            ServiceState::Started => (true, false),
            ServiceState::Stopped => (false, false),
            ServiceState::Restarted => (true, true),
        }
    }
}

// =============================================================================
// Request bodies
// =============================================================================

/// Query of `GET /target`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetQuery {
    pub pattern: Option<String>,
}

/// Query of the synchronous `GET /ping` and `GET /facter`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostQuery {
    pub target: Option<String>,
}

/// Body of the asynchronous `POST /ping` and `POST /facter`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TargetsRequest {
    #[serde(default)]
    pub targets: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteQuery {
    pub target: Option<String>,
    pub cmd: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecuteRequest {
    #[serde(default)]
    pub targets: Vec<String>,
    pub cmd: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceQuery {
    pub target: Option<String>,
    pub name: Option<String>,
    pub state: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub graceful: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceRequest {
    #[serde(default)]
    pub targets: Vec<String>,
    pub name: Option<String>,
    pub state: Option<i64>,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub graceful: bool,
}

/// Body of `POST /deploy`
///
/// `extra_vars` and `partial` stay untyped here: their shape is checked by
/// the deploy runner so that bad input is reported with a precise message.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeployRequest {
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub extra_vars: Option<JsonValue>,
    #[serde(default)]
    pub partial: Option<JsonValue>,
}

/// Body of `POST /task`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskRequest {
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub taskname: String,
    #[serde(default)]
    pub tasktype: String,
    #[serde(default)]
    pub taskopts: Option<JsonValue>,
}

/// Entry of `GET /task`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskPluginInfo {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: String,
}
