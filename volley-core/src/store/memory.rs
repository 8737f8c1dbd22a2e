//! In-memory coordination store
//!
//! Keeps hashes and lists in a single map guarded by a mutex, with a global
//! write clock for watches and tokio channels for pub/sub. Every write bumps
//! the version of the keys it touches, deletions included, so a watch taken
//! before a create-then-delete still detects the change.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

use super::{
    Batch, Command, CoordinationStore, Message, StoreError, StoreResult, Subscription, Watch,
    glob_match,
};

#[derive(Debug, Clone)]
enum Value {
    Hash(HashMap<String, String>),
    List(Vec<String>),
}

#[derive(Default)]
struct Inner {
    values: HashMap<String, Value>,
    versions: HashMap<String, u64>,
    clock: u64,
    subscribers: HashMap<String, Vec<(u64, mpsc::UnboundedSender<Message>)>>,
    next_subscriber: u64,
}

impl Inner {
    fn version(&self, key: &str) -> u64 {
        self.versions.get(key).copied().unwrap_or(0)
    }

    fn touch(&mut self, key: &str) {
        self.clock += 1;
        self.versions.insert(key.to_string(), self.clock);
    }

    /// Checks a batch can be applied before writing anything
    fn check(&self, batch: &Batch) -> StoreResult<()> {
        for command in batch.commands() {
            match command {
                Command::HSet { key, .. } => {
                    if let Some(Value::List(_)) = self.values.get(key) {
                        return Err(StoreError::WrongType(key.clone()));
                    }
                }
                Command::RPush { key, .. } => {
                    if let Some(Value::Hash(_)) = self.values.get(key) {
                        return Err(StoreError::WrongType(key.clone()));
                    }
                }
                Command::Delete(_) => {}
            }
        }
        Ok(())
    }

    fn apply(&mut self, batch: Batch) {
        for command in batch.into_commands() {
            match command {
                Command::HSet { key, fields } => {
                    if let Value::Hash(hash) = self
                        .values
                        .entry(key.clone())
                        .or_insert_with(|| Value::Hash(HashMap::new()))
                    {
                        hash.extend(fields);
                    }
                    self.touch(&key);
                }
                Command::RPush { key, value } => {
                    if let Value::List(list) = self
                        .values
                        .entry(key.clone())
                        .or_insert_with(|| Value::List(Vec::new()))
                    {
                        list.push(value);
                    }
                    self.touch(&key);
                }
                Command::Delete(keys) => {
                    for key in keys {
                        if self.values.remove(&key).is_some() {
                            self.touch(&key);
                        }
                    }
                }
            }
        }
    }
}

/// Coordination store held entirely in process memory
///
/// Cloning yields another handle onto the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A panic while holding the lock cannot leave a half-applied batch:
        // batches are validated before any write.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn hgetall(&self, key: &str) -> StoreResult<HashMap<String, String>> {
        match self.lock().values.get(key) {
            None => Ok(HashMap::new()),
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(Value::List(_)) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn lrange(&self, key: &str) -> StoreResult<Vec<String>> {
        match self.lock().values.get(key) {
            None => Ok(Vec::new()),
            Some(Value::List(list)) => Ok(list.clone()),
            Some(Value::Hash(_)) => Err(StoreError::WrongType(key.to_string())),
        }
    }

    async fn exists(&self, key: &str) -> StoreResult<bool> {
        Ok(self.lock().values.contains_key(key))
    }

    async fn keys(&self, pattern: &str) -> StoreResult<Vec<String>> {
        let mut keys: Vec<String> = self
            .lock()
            .values
            .keys()
            .filter(|key| glob_match(pattern, key))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn publish(&self, channel: &str, payload: &str) -> StoreResult<usize> {
        let mut inner = self.lock();
        let Some(subscribers) = inner.subscribers.get_mut(channel) else {
            return Ok(0);
        };

        subscribers.retain(|(_, tx)| {
            tx.send(Message {
                channel: channel.to_string(),
                payload: payload.to_string(),
            })
            .is_ok()
        });
        Ok(subscribers.len())
    }

    async fn subscribe(&self, channels: &[String]) -> StoreResult<Box<dyn Subscription>> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;

        for channel in channels {
            inner
                .subscribers
                .entry(channel.clone())
                .or_default()
                .push((id, tx.clone()));
        }

        Ok(Box::new(MemorySubscription {
            id,
            channels: channels.to_vec(),
            inner: Arc::clone(&self.inner),
            rx,
        }))
    }

    async fn watch(&self, keys: &[String]) -> StoreResult<Watch> {
        let inner = self.lock();
        Ok(Watch::new(
            keys.iter()
                .map(|key| (key.clone(), inner.version(key)))
                .collect(),
        ))
    }

    async fn execute(&self, batch: Batch) -> StoreResult<()> {
        let mut inner = self.lock();
        inner.check(&batch)?;
        inner.apply(batch);
        Ok(())
    }

    async fn execute_watched(&self, batch: Batch, watch: Watch) -> StoreResult<bool> {
        let mut inner = self.lock();
        let changed = watch
            .versions()
            .iter()
            .any(|(key, version)| inner.version(key) != *version);
        if changed {
            return Ok(false);
        }

        inner.check(&batch)?;
        inner.apply(batch);
        Ok(true)
    }
}

struct MemorySubscription {
    id: u64,
    channels: Vec<String>,
    inner: Arc<Mutex<Inner>>,
    rx: mpsc::UnboundedReceiver<Message>,
}

#[async_trait]
impl Subscription for MemorySubscription {
    async fn recv(&mut self) -> Option<Message> {
        self.rx.recv().await
    }
}

impl Drop for MemorySubscription {
    fn drop(&mut self) {
        let mut inner = self
            .inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        for channel in &self.channels {
            if let Some(subscribers) = inner.subscribers.get_mut(channel) {
                subscribers.retain(|(id, _)| *id != self.id);
                if subscribers.is_empty() {
                    inner.subscribers.remove(channel);
                }
            }
        }
    }
}
