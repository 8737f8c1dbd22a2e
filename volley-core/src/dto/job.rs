//! Job DTOs for the query API

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::domain::job::JobContext;
use crate::domain::result::ResultRecord;
use crate::dto::deserialize_flag;

/// Query parameters of `GET /jobs`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListQuery {
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub detail: bool,
}

/// Query parameters of `GET /jobs/{jid}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobQuery {
    /// Include per-host result history
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub outputs: bool,
    /// Stream live events until the job finishes
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub follow: bool,
}

/// Response of every asynchronous launch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LaunchResponse {
    pub jid: String,
}

/// Response of `GET /jobs`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JobListing {
    Ids(Vec<String>),
    Detailed(Vec<JobContext>),
}

/// One line of a follow stream
///
/// The first event is always the job snapshot; every later one maps the
/// reporting host to the record it just produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FollowEvent {
    Snapshot(JobContext),
    Update(BTreeMap<String, ResultRecord>),
}
