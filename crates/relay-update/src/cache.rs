//! ---
//! ra_section: "14-versioning"
//! ra_subsection: "module"
//! ra_type: "source"
//! ra_scope: "code"
//! ra_description: "Time-bounded memoization of update verdicts."
//! ra_version: "v0.1.0"
//! ra_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::verdict::VerdictRecord;
use relay_common::KeyValueStore;

/// Store key holding the last verdict.
pub const VERSION_CHECK_KEY: &str = "version_check_cache";

/// Cached payload with the time it was stored and its freshness window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry<T> {
    pub payload: T,
    pub stored_at: DateTime<Utc>,
    pub ttl_seconds: u64,
}

impl<T> CacheEntry<T> {
    /// Within its TTL at `now`.
    pub fn is_fresh_at(&self, now: DateTime<Utc>) -> bool {
        let age = now.signed_duration_since(self.stored_at);
        age >= chrono::Duration::zero() && age.num_seconds() < self.ttl_seconds as i64
    }

    pub fn is_fresh(&self) -> bool {
        self.is_fresh_at(Utc::now())
    }
}

/// Verdict memoization over a [`KeyValueStore`].
///
/// Entries are fresh for `ttl` and kept in the store for `retention` so an
/// expired entry can still be served when upstream is unreachable.
#[derive(Clone)]
pub struct VerdictCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    retention: Duration,
}

impl VerdictCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration, retention: Duration) -> Self {
        Self {
            store,
            ttl,
            retention: retention.max(ttl),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Entry under `key` regardless of freshness. Unreadable entries count as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<CacheEntry<T>> {
        let raw = match self.store.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                warn!(key, error = %err, "cache read failed");
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(entry) => Some(entry),
            Err(err) => {
                warn!(key, error = %err, "discarding malformed cache entry");
                None
            }
        }
    }

    /// Store `payload` under `key`, fresh for `ttl`.
    pub async fn put<T: Serialize>(&self, key: &str, payload: &T, ttl: Duration) -> Result<()> {
        let entry = CacheEntry {
            payload,
            stored_at: Utc::now(),
            ttl_seconds: ttl.as_secs(),
        };
        let raw = serde_json::to_string(&entry)?;
        self.store
            .set(key, raw, Some(self.retention.max(ttl)))
            .await?;
        debug!(key, ttl_s = ttl.as_secs(), "cache entry stored");
        Ok(())
    }

    pub async fn invalidate(&self, key: &str) -> Result<bool> {
        Ok(self.store.delete(key).await?)
    }

    pub async fn verdict(&self) -> Option<CacheEntry<VerdictRecord>> {
        self.get(VERSION_CHECK_KEY).await
    }

    pub async fn store_verdict(&self, record: &VerdictRecord) -> Result<()> {
        self.put(VERSION_CHECK_KEY, record, self.ttl).await
    }

    pub async fn invalidate_verdict(&self) -> Result<bool> {
        self.invalidate(VERSION_CHECK_KEY).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::DeploymentMode;
    use crate::verdict::ReleaseInfo;
    use relay_common::MemoryStore;

    fn cache(store: Arc<MemoryStore>) -> VerdictCache {
        VerdictCache::new(store, Duration::from_secs(600), Duration::from_secs(86_400))
    }

    #[tokio::test]
    async fn stores_and_reads_verdicts() {
        let store = Arc::new(MemoryStore::new());
        let cache = cache(store.clone());
        assert!(cache.verdict().await.is_none());

        let record = VerdictRecord::unavailable("1.0.0", DeploymentMode::Unmanaged, ReleaseInfo::no_releases());
        cache.store_verdict(&record).await.unwrap();
        let entry = cache.verdict().await.unwrap();
        assert!(entry.is_fresh());
        assert_eq!(entry.ttl_seconds, 600);
        assert_eq!(entry.payload.method, DeploymentMode::Unmanaged);

        let retention = store.ttl(VERSION_CHECK_KEY).await.unwrap().unwrap();
        assert!(retention > Duration::from_secs(600));

        assert!(cache.invalidate_verdict().await.unwrap());
        assert!(cache.verdict().await.is_none());
    }

    #[tokio::test]
    async fn malformed_entries_are_misses() {
        let store = Arc::new(MemoryStore::new());
        store
            .set(VERSION_CHECK_KEY, "{\"latest\":".into(), None)
            .await
            .unwrap();
        assert!(cache(store).verdict().await.is_none());
    }

    #[test]
    fn freshness_window() {
        let stored_at = Utc::now();
        let entry = CacheEntry {
            payload: (),
            stored_at,
            ttl_seconds: 600,
        };
        assert!(entry.is_fresh_at(stored_at + chrono::Duration::seconds(599)));
        assert!(!entry.is_fresh_at(stored_at + chrono::Duration::seconds(600)));
        assert!(!entry.is_fresh_at(stored_at - chrono::Duration::seconds(5)));
    }
}
