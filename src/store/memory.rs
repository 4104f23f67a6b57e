use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::{AppError, Result};

use super::{KeyValueStore, WindowCount};

/// Expired entries are swept when the map grows past this many keys.
const SWEEP_THRESHOLD: usize = 4096;

#[derive(Debug, Clone)]
enum Value {
    Text(String),
    Hash(HashMap<String, String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: Value,
    expires_at: Instant,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at > now
    }
}

/// In-process store for a single instance (dev mode, tests).
///
/// A single mutex guards the map, so each trait method is atomic with respect
/// to every other. Expiry is checked lazily on access.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, Entry>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live keys (for tests and diagnostics).
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        let entries = self.entries.lock().await;
        entries.values().filter(|e| e.is_live(now)).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

fn live<'a>(entries: &'a HashMap<String, Entry>, key: &str, now: Instant) -> Option<&'a Entry> {
    entries.get(key).filter(|e| e.is_live(now))
}

fn sweep(entries: &mut HashMap<String, Entry>, now: Instant) {
    if entries.len() > SWEEP_THRESHOLD {
        entries.retain(|_, e| e.is_live(now));
    }
}

fn wrong_type(key: &str) -> AppError {
    AppError::Storage(format!("WRONGTYPE operation against key {}", key))
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        if live(&entries, key, now).is_some() {
            return Ok(false);
        }
        sweep(&mut entries, now);
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        sweep(&mut entries, now);
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(value.to_string()),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self.entries.lock().await;
        match live(&entries, key, Instant::now()) {
            Some(Entry { value: Value::Text(v), .. }) => Ok(Some(v.clone())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        Ok(entries.remove(key).is_some_and(|e| e.is_live(now)))
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<bool> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let matches = matches!(
            live(&entries, key, now),
            Some(Entry { value: Value::Text(v), .. }) if v == expected
        );
        if matches {
            entries.remove(key);
        }
        Ok(matches)
    }

    async fn take(&self, key: &str) -> Result<Option<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        let is_text = live(&entries, key, now).map(|e| matches!(e.value, Value::Text(_)));
        match is_text {
            Some(true) => match entries.remove(key) {
                Some(Entry { value: Value::Text(v), .. }) => Ok(Some(v)),
                _ => Ok(None),
            },
            Some(false) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn hash_set(&self, key: &str, fields: &[(&str, &str)], ttl: Duration) -> Result<()> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let mut hash = match live(&entries, key, now) {
            Some(Entry { value: Value::Hash(h), .. }) => h.clone(),
            Some(_) => return Err(wrong_type(key)),
            None => HashMap::new(),
        };
        for (field, value) in fields {
            hash.insert(field.to_string(), value.to_string());
        }

        sweep(&mut entries, now);
        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Hash(hash),
                expires_at: now + ttl,
            },
        );
        Ok(())
    }

    async fn hash_get_all(&self, key: &str) -> Result<Option<HashMap<String, String>>> {
        let entries = self.entries.lock().await;
        match live(&entries, key, Instant::now()) {
            Some(Entry { value: Value::Hash(h), .. }) => Ok(Some(h.clone())),
            Some(_) => Err(wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn increment(&self, key: &str, window: Duration) -> Result<WindowCount> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;

        let (count, expires_at) = match live(&entries, key, now) {
            Some(Entry { value: Value::Text(v), expires_at }) => {
                let current: u64 = v.parse().map_err(|_| {
                    AppError::Storage(format!("value at {} is not an integer", key))
                })?;
                (current + 1, *expires_at)
            }
            Some(_) => return Err(wrong_type(key)),
            None => (1, now + window),
        };

        entries.insert(
            key.to_string(),
            Entry {
                value: Value::Text(count.to_string()),
                expires_at,
            },
        );

        Ok(WindowCount {
            count,
            resets_in: expires_at.saturating_duration_since(now),
        })
    }
}
