//! TTL cache in front of the config store with single-flight coalescing.

use std::{
    collections::HashMap,
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use {tokio::sync::Mutex, tracing::info};

use crate::{
    Result,
    store::ConfigStore,
    types::ClientConfig,
};

const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

struct CacheEntry {
    config: ClientConfig,
    expires_at: Instant,
}

/// In-memory cache keyed by client id.
///
/// Expiry is lazy: an expired entry is logically absent and refetched on the
/// next read. Concurrent lookups for the same uncached key coalesce into a
/// single store round-trip, so first contact from a sender never creates
/// duplicate default-config rows.
pub struct ConfigCache {
    store: Arc<dyn ConfigStore>,
    ttl: Duration,
    entries: RwLock<HashMap<String, CacheEntry>>,
    /// Per-key fetch locks; the map itself is only held long enough to
    /// clone a key's lock out.
    in_flight: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConfigCache {
    #[must_use]
    pub fn new(store: Arc<dyn ConfigStore>) -> Self {
        Self::with_ttl(store, DEFAULT_TTL)
    }

    #[must_use]
    pub fn with_ttl(store: Arc<dyn ConfigStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            entries: RwLock::new(HashMap::new()),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve the config for a client, fetching and caching on miss.
    ///
    /// A client unknown to the store gets a default config created for it.
    /// Store failures surface as [`crate::Error::Store`]; nothing is cached
    /// in that case.
    pub async fn get(&self, client_id: &str) -> Result<ClientConfig> {
        if let Some(config) = self.fresh(client_id) {
            return Ok(config);
        }

        let key_lock = {
            let mut in_flight = self.in_flight.lock().await;
            Arc::clone(
                in_flight
                    .entry(client_id.to_string())
                    .or_insert_with(|| Arc::new(Mutex::new(()))),
            )
        };
        let _guard = key_lock.lock().await;

        // Another caller may have completed the fetch while we waited.
        if let Some(config) = self.fresh(client_id) {
            return Ok(config);
        }

        let config = match self.store.find_by_client(client_id).await? {
            Some(config) => config,
            None => {
                info!(client_id, "no stored config, creating default");
                self.store
                    .create(ClientConfig::default_for(client_id))
                    .await?
            },
        };

        self.insert(client_id, config.clone());

        // The entry is cached; waiters re-check it, so the key lock can go.
        let mut in_flight = self.in_flight.lock().await;
        in_flight.remove(client_id);

        Ok(config)
    }

    /// Overwrite the cached value after an explicit config mutation.
    pub fn set(&self, client_id: &str, config: ClientConfig) {
        self.insert(client_id, config);
    }

    /// Evict a cache entry immediately.
    pub fn invalidate(&self, client_id: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.remove(client_id);
    }

    fn fresh(&self, client_id: &str) -> Option<ClientConfig> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(client_id).and_then(|entry| {
            if entry.expires_at > Instant::now() {
                Some(entry.config.clone())
            } else {
                None
            }
        })
    }

    fn insert(&self, client_id: &str, config: ClientConfig) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.insert(client_id.to_string(), CacheEntry {
            config,
            expires_at: Instant::now() + self.ttl,
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use {
        async_trait::async_trait,
        std::time::Duration,
    };

    use super::*;
    use crate::{Error, store::MemoryConfigStore};

    /// Store that pauses inside lookups so concurrent callers overlap.
    struct SlowStore {
        inner: MemoryConfigStore,
    }

    #[async_trait]
    impl ConfigStore for SlowStore {
        async fn find_by_client(&self, client_id: &str) -> Result<Option<ClientConfig>> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.inner.find_by_client(client_id).await
        }

        async fn create(&self, config: ClientConfig) -> Result<ClientConfig> {
            tokio::time::sleep(Duration::from_millis(10)).await;
            self.inner.create(config).await
        }
    }

    struct FailingStore;

    #[async_trait]
    impl ConfigStore for FailingStore {
        async fn find_by_client(&self, _client_id: &str) -> Result<Option<ClientConfig>> {
            Err(Error::store(
                "lookup",
                std::io::Error::other("store down"),
            ))
        }

        async fn create(&self, _config: ClientConfig) -> Result<ClientConfig> {
            Err(Error::store(
                "create",
                std::io::Error::other("store down"),
            ))
        }
    }

    #[tokio::test]
    async fn second_get_within_ttl_skips_the_store() {
        let store = Arc::new(MemoryConfigStore::new());
        let cache = ConfigCache::new(Arc::clone(&store) as Arc<dyn ConfigStore>);

        let first = cache.get("5215550001").await.unwrap();
        let second = cache.get("5215550001").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(store.find_calls(), 1);
        assert_eq!(store.create_calls(), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_refetched() {
        let store = Arc::new(MemoryConfigStore::new());
        let cache =
            ConfigCache::with_ttl(Arc::clone(&store) as Arc<dyn ConfigStore>, Duration::ZERO);

        cache.get("5215550001").await.unwrap();
        cache.get("5215550001").await.unwrap();

        // Second get misses the expired entry but finds the stored row.
        assert_eq!(store.find_calls(), 2);
        assert_eq!(store.create_calls(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_first_contact_creates_once() {
        let slow = Arc::new(SlowStore {
            inner: MemoryConfigStore::new(),
        });
        let cache = Arc::new(ConfigCache::new(Arc::clone(&slow) as Arc<dyn ConfigStore>));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(
                async move { cache.get("5215550001").await },
            ));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(slow.inner.create_calls(), 1);
    }

    #[tokio::test]
    async fn set_and_invalidate() {
        let store = Arc::new(MemoryConfigStore::new());
        let cache = ConfigCache::new(Arc::clone(&store) as Arc<dyn ConfigStore>);

        let mut config = ClientConfig::default_for("5215550001");
        config.settings.language = "en".into();
        cache.set("5215550001", config.clone());

        assert_eq!(cache.get("5215550001").await.unwrap(), config);
        assert_eq!(store.find_calls(), 0);

        cache.invalidate("5215550001");
        let refetched = cache.get("5215550001").await.unwrap();
        // Store had never seen this client, so it gets the default now.
        assert_eq!(refetched.settings.language, "es");
        assert_eq!(store.create_calls(), 1);
    }

    #[tokio::test]
    async fn store_failure_surfaces_and_is_not_cached() {
        let cache = ConfigCache::new(Arc::new(FailingStore));

        assert!(matches!(
            cache.get("5215550001").await,
            Err(Error::Store { .. })
        ));
        // Still no entry: the next get hits the store again and fails again.
        assert!(cache.get("5215550001").await.is_err());
    }
}
