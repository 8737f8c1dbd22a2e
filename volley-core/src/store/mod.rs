//! Coordination store contract
//!
//! The store is the only shared mutable resource between the request-handling
//! side and the workers. It provides hashes, append-only lists, pub/sub, and
//! a watch + transaction primitive used as a multi-key compare-and-set.
//!
//! [`MemoryStore`] implements the contract in-process.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

/// Errors raised by a coordination store
#[derive(Debug, Error)]
pub enum StoreError {
    /// Operation applied to a key holding the wrong kind of value
    #[error("operation against key <{0}> holding the wrong kind of value")]
    WrongType(String),

    /// The store could not be reached
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A single write in a [`Batch`]
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Set fields on a hash, creating it if needed
    HSet {
        key: String,
        fields: Vec<(String, String)>,
    },
    /// Append a value to the tail of a list, creating it if needed
    RPush { key: String, value: String },
    /// Remove keys of any kind
    Delete(Vec<String>),
}

/// Ordered group of writes sent in one round trip
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hset(&mut self, key: impl Into<String>, fields: Vec<(String, String)>) -> &mut Self {
        self.commands.push(Command::HSet {
            key: key.into(),
            fields,
        });
        self
    }

    pub fn hset_field(
        &mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<String>,
    ) -> &mut Self {
        self.hset(key, vec![(field.into(), value.into())])
    }

    pub fn rpush(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.commands.push(Command::RPush {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn delete(&mut self, keys: Vec<String>) -> &mut Self {
        if !keys.is_empty() {
            self.commands.push(Command::Delete(keys));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    pub fn into_commands(self) -> Vec<Command> {
        self.commands
    }
}

/// Snapshot of watched keys taken by [`CoordinationStore::watch`]
///
/// A watched transaction commits only if none of the watched keys were
/// written or deleted since the snapshot was taken.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watch {
    versions: Vec<(String, u64)>,
}

impl Watch {
    pub fn new(versions: Vec<(String, u64)>) -> Self {
        Self { versions }
    }

    pub fn versions(&self) -> &[(String, u64)] {
        &self.versions
    }
}

/// Message delivered to a subscriber
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub channel: String,
    pub payload: String,
}

/// Live pub/sub subscription
///
/// Dropping the subscription unsubscribes from all of its channels.
#[async_trait]
pub trait Subscription: Send {
    /// Waits for the next message, `None` once the store side is gone
    async fn recv(&mut self) -> Option<Message>;
}

/// Key-value + pub/sub store used as the coordination medium
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Returns every field of a hash, empty if the key does not exist
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>>;

    /// Returns the whole list stored at `key`, empty if it does not exist
    async fn lrange(&self, key: &str) -> StoreResult<Vec<String>>;

    async fn exists(&self, key: &str) -> StoreResult<bool>;

    /// Returns keys matching a glob pattern (`*` and `?` wildcards)
    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>>;

    /// Publishes a payload, returning the number of receivers
    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<usize>;

    /// Subscribes to every channel in `channels` at once
    async fn subscribe(&self, channels: &[String]) -> StoreResult<Box<dyn Subscription>>;

    /// Starts watching keys for a later [`CoordinationStore::execute_watched`]
    async fn watch(&self, keys: &[String]) -> StoreResult<Watch>;

    /// Applies a batch of writes without isolation guarantees across keys
    async fn execute(&self, batch: Batch) -> StoreResult<()>;

    /// Applies a batch atomically if no watched key changed
    ///
    /// Returns `Ok(false)` without writing anything when a watched key was
    /// modified after the watch was taken.
    async fn execute_watched(&self, batch: Batch, watch: Watch) -> StoreResult<bool>;
}

/// Glob match supporting `*` (any run) and `?` (any single char)
pub fn glob_match(pattern: &str, text: &str) -> bool {
    let pattern: Vec<char> = pattern.chars().collect();
    let text: Vec<char> = text.chars().collect();

    let (mut p, mut t) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && (pattern[p] == '?' || pattern[p] == text[t]) {
            p += 1;
            t += 1;
        } else if p < pattern.len() && pattern[p] == '*' {
            backtrack = Some((p, t));
            p += 1;
        } else if let Some((star, matched)) = backtrack {
            p = star + 1;
            t = matched + 1;
            backtrack = Some((star, matched + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|c| *c == '*')
}
