//! Debounced, rate-limited mirror of selected state into a [`KeyValueStorage`].
//!
//! This layer is a cache. Failed or dropped writes are logged and forgotten; nothing
//! here ever reports an error to the caller.

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::time::Instant;
use tracing::{debug, warn};

use super::KeyValueStorage;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalPersistenceConfig {
    pub debounce_ms: u64,
    pub max_writes_per_window: usize,
    pub window_ms: u64,
}

impl Default for LocalPersistenceConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 500,
            max_writes_per_window: 5,
            window_ms: 1000,
        }
    }
}

impl LocalPersistenceConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteOutcome {
    /// A write is pending and will land after the debounce window.
    Scheduled,
    /// Value matches what was last written; nothing to do.
    Unchanged,
    /// Dropped by the circuit breaker.
    Throttled,
    /// Value could not be serialized.
    Failed,
}

#[derive(Debug, Default)]
struct KeyState {
    last_written: Option<String>,
    pending: Option<String>,
    generation: u64,
    attempts: VecDeque<Instant>,
}

struct Inner {
    storage: Arc<dyn KeyValueStorage>,
    config: LocalPersistenceConfig,
    keys: Mutex<HashMap<String, KeyState>>,
    /// Source of write generations; never reused, even across `clear`.
    generations: AtomicU64,
}

/// One instance per process, shared by reference (it is cheap to clone).
#[derive(Clone)]
pub struct LocalPersistence {
    inner: Arc<Inner>,
}

impl LocalPersistence {
    pub fn new(storage: Arc<dyn KeyValueStorage>, config: LocalPersistenceConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                storage,
                config,
                keys: Mutex::new(HashMap::new()),
                generations: AtomicU64::new(0),
            }),
        }
    }

    pub fn config(&self) -> &LocalPersistenceConfig {
        &self.inner.config
    }

    pub fn storage(&self) -> &Arc<dyn KeyValueStorage> {
        &self.inner.storage
    }

    /// Queues `value` for `key`, coalescing repeated calls inside the debounce window.
    ///
    /// Without a tokio runtime the write happens immediately.
    pub fn debounced_write<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> WriteOutcome {
        let serialized = match serde_json::to_string(value) {
            Ok(serialized) => serialized,
            Err(err) => {
                warn!(key, "local write skipped, value not serializable: {err}");
                return WriteOutcome::Failed;
            }
        };

        let now = Instant::now();
        let window = self.inner.config.window();
        let generation = {
            let mut keys = self.inner.keys.lock();
            let state = keys.entry(key.to_string()).or_default();

            while state
                .attempts
                .front()
                .is_some_and(|at| now.duration_since(*at) >= window)
            {
                state.attempts.pop_front();
            }
            if state.attempts.len() >= self.inner.config.max_writes_per_window {
                warn!(
                    key,
                    attempts = state.attempts.len(),
                    "local write dropped by circuit breaker"
                );
                return WriteOutcome::Throttled;
            }
            state.attempts.push_back(now);

            if state.last_written.as_deref() == Some(serialized.as_str()) {
                if state.pending.take().is_some() {
                    state.generation = self.inner.next_generation();
                }
                return WriteOutcome::Unchanged;
            }

            state.generation = self.inner.next_generation();
            state.pending = Some(serialized);
            state.generation
        };

        match Handle::try_current() {
            Ok(handle) => {
                let inner = Arc::clone(&self.inner);
                let key = key.to_string();
                let delay = self.inner.config.debounce();
                handle.spawn(async move {
                    tokio::time::sleep(delay).await;
                    inner.commit(&key, Some(generation));
                });
            }
            Err(_) => self.inner.commit(key, Some(generation)),
        }
        WriteOutcome::Scheduled
    }

    /// Reads and decodes `key`, falling back to `default` on any failure.
    ///
    /// A write still waiting out its debounce window is visible here.
    pub fn safe_read<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        let pending = self
            .inner
            .keys
            .lock()
            .get(key)
            .and_then(|state| state.pending.clone());
        let raw = match pending {
            Some(raw) => raw,
            None => match self.inner.storage.get(key) {
                Ok(Some(raw)) => raw,
                Ok(None) => return default,
                Err(err) => {
                    warn!(key, "local read failed: {err}");
                    return default;
                }
            },
        };
        match serde_json::from_str(&raw) {
            Ok(value) => value,
            Err(err) => {
                warn!(key, "local value could not be decoded: {err}");
                default
            }
        }
    }

    /// Removes the key and forgets everything tracked about it.
    pub fn clear(&self, key: &str) {
        self.inner.keys.lock().remove(key);
        if let Err(err) = self.inner.storage.remove(key) {
            warn!(key, "local clear failed: {err}");
        }
    }

    /// Writes any pending value for `key` now.
    pub fn flush(&self, key: &str) {
        self.inner.commit(key, None);
    }

    pub fn flush_all(&self) {
        let keys: Vec<String> = self
            .inner
            .keys
            .lock()
            .iter()
            .filter(|(_, state)| state.pending.is_some())
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            self.inner.commit(&key, None);
        }
    }

    pub fn has_pending(&self, key: &str) -> bool {
        self.inner
            .keys
            .lock()
            .get(key)
            .is_some_and(|state| state.pending.is_some())
    }
}

impl Inner {
    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Writes the pending value if it is still the one scheduled as `generation`
    /// (any generation when `None`).
    fn commit(&self, key: &str, generation: Option<u64>) {
        let value = {
            let mut keys = self.keys.lock();
            let Some(state) = keys.get_mut(key) else {
                return;
            };
            if generation.is_some_and(|g| g != state.generation) {
                return;
            }
            let Some(value) = state.pending.take() else {
                return;
            };
            state.generation = self.next_generation();
            value
        };

        match self.storage.set(key, &value) {
            Ok(()) => {
                debug!(key, bytes = value.len(), "local value written");
                if let Some(state) = self.keys.lock().get_mut(key) {
                    state.last_written = Some(value);
                }
            }
            Err(err) => warn!(key, "local write failed: {err}"),
        }
    }
}
