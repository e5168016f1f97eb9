//! ---
//! ra_section: "03-persistence-logging"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Key-value store abstraction shared by the verdict and header caches."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
//! The admin surface memoizes results in an external key-value store. The
//! [`KeyValueStore`] trait is that seam; [`MemoryStore`] is the in-process
//! implementation used by the daemon and by tests.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;

/// Result alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Error type for key-value store backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A value could not be encoded or decoded.
    #[error("store serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// String-valued key-value store with optional per-key expiry.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Fetch a live value.
    async fn get(&self, key: &str) -> Result<Option<String>>;
    /// Store a value, replacing any previous one. `None` keeps it until deleted.
    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()>;
    /// Remove a key. Returns whether a live value was removed.
    async fn delete(&self, key: &str) -> Result<bool>;
    /// Remaining lifetime of a key; `None` when absent or without expiry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;
    /// Live keys beginning with `prefix`, sorted.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Debug, Clone)]
struct StoredValue {
    value: String,
    expires_at: Option<Instant>,
}

impl StoredValue {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.map_or(true, |deadline| now < deadline)
    }
}

/// In-memory [`KeyValueStore`]. Expired entries are dropped lazily on access.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredValue>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn live(&self, key: &str) -> Option<StoredValue> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(stored) if stored.is_live(now) => Some(stored.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.live(key).map(|stored| stored.value))
    }

    async fn set(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|ttl| Instant::now() + ttl);
        self.entries
            .lock()
            .insert(key.to_owned(), StoredValue { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .remove(key)
            .is_some_and(|stored| stored.is_live(now)))
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let now = Instant::now();
        Ok(self
            .live(key)
            .and_then(|stored| stored.expires_at)
            .map(|deadline| deadline.saturating_duration_since(now)))
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        entries.retain(|_, stored| stored.is_live(now));
        let mut keys: Vec<String> = entries
            .keys()
            .filter(|key| key.starts_with(prefix))
            .cloned()
            .collect();
        keys.sort();
        Ok(keys)
    }
}
