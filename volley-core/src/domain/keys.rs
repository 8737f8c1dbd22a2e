//! Coordination store key layout
//!
//! All keys a job touches, formatted so that a job written by one process can
//! be found and followed by any other process sharing the store:
//!
//! ```text
//! job:<taskid>                       hash  job record
//! <host>:<operate>:meta              hash  per-host coordination marker
//! <host>:<operate>:<utag>:data       list  per-host result records
//! <host>:<operate>                   pub/sub live channel
//! <operate>:control                  pub/sub terminal signal
//! ```
//!
//! `operate` is the stored operation name: the bare kind (`deploy`) for mutex
//! operations and `kind:tag` for non-mutex ones, so the meta key of a
//! non-mutex job reads `<host>:ping:<tag>:meta`.

/// Prefix of every job record key
pub const JOB_PREFIX: &str = "job";

/// Sentinel published on the control channel when a job finishes
pub const CONTROL_DONE: &str = "__DONE__";

/// Sentinel published on the control channel when a job fails
pub const CONTROL_FAILED: &str = "__FAILURE__";

/// `job:<taskid>`
pub fn job_key(task_id: &str) -> String {
    format!("{}:{}", JOB_PREFIX, task_id)
}

/// Pattern matching every job record key
pub fn job_key_pattern() -> String {
    job_key("*")
}

/// Extracts the task id from a `job:<taskid>` key
///
/// Meta and data keys of a host named `job` share the prefix, they are
/// told apart by the extra `:` segments.
pub fn task_id_from_key(key: &str) -> Option<&str> {
    key.strip_prefix(JOB_PREFIX)?
        .strip_prefix(':')
        .filter(|id| !id.is_empty() && !id.contains(':'))
}

pub fn meta_key(host: &str, operate: &str) -> String {
    format!("{}:{}:meta", host, operate)
}

pub fn data_key(host: &str, operate: &str, utag: &str) -> String {
    format!("{}:{}:{}:data", host, operate, utag)
}

pub fn host_channel(host: &str, operate: &str) -> String {
    format!("{}:{}", host, operate)
}

pub fn control_channel(operate: &str) -> String {
    format!("{}:control", operate)
}

/// Strips the operation suffix from a live channel name, leaving the host
pub fn host_from_channel(channel: &str) -> &str {
    channel.split(':').next().unwrap_or(channel)
}
