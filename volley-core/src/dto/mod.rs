//! Data Transfer Objects for inter-service communication
//!
//! Request and response bodies of the HTTP API, plus the work unit handed
//! from the request-handling side to the worker pool.

pub mod job;
pub mod operation;

use serde::{Deserialize, Deserializer};

/// Deserializes a loosely typed boolean flag
///
/// Query strings carry flags as text, so `yes`, `1` and `true` (any case)
/// are accepted alongside JSON booleans. Anything else is `false`.
pub fn deserialize_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Text(String),
    }

    Ok(match Option::<Flag>::deserialize(deserializer)? {
        None => false,
        Some(Flag::Bool(value)) => value,
        Some(Flag::Text(text)) => matches!(text.to_lowercase().as_str(), "yes" | "1" | "true"),
    })
}
