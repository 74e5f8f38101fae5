use std::{
    collections::HashMap,
    sync::{
        RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;

use crate::{Result, types::ClientConfig};

/// Persistent key-based storage for client configurations.
///
/// Both operations must be idempotent-safe under retry: `create` for an
/// already-existing client returns the stored row rather than failing.
#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn find_by_client(&self, client_id: &str) -> Result<Option<ClientConfig>>;
    async fn create(&self, config: ClientConfig) -> Result<ClientConfig>;
}

/// In-memory [`ConfigStore`] used when running without a database and as a
/// test double. Counts round-trips so cache behavior can be asserted.
#[derive(Default)]
pub struct MemoryConfigStore {
    configs: RwLock<HashMap<String, ClientConfig>>,
    find_calls: AtomicUsize,
    create_calls: AtomicUsize,
}

impl MemoryConfigStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a config, bypassing the round-trip counters.
    pub fn seed(&self, config: ClientConfig) {
        let mut configs = self.configs.write().unwrap_or_else(|e| e.into_inner());
        configs.insert(config.client_id.clone(), config);
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ConfigStore for MemoryConfigStore {
    async fn find_by_client(&self, client_id: &str) -> Result<Option<ClientConfig>> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        let configs = self.configs.read().unwrap_or_else(|e| e.into_inner());
        Ok(configs.get(client_id).cloned())
    }

    async fn create(&self, config: ClientConfig) -> Result<ClientConfig> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        let mut configs = self.configs.write().unwrap_or_else(|e| e.into_inner());
        // Idempotent under retry: an existing row wins.
        let entry = configs
            .entry(config.client_id.clone())
            .or_insert(config)
            .clone();
        Ok(entry)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn create_is_idempotent() {
        let store = MemoryConfigStore::new();
        let first = store
            .create(ClientConfig::default_for("111"))
            .await
            .unwrap();

        let mut changed = ClientConfig::default_for("111");
        changed.settings.language = "en".into();
        let second = store.create(changed).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(second.settings.language, "es");
        assert_eq!(store.create_calls(), 2);
    }

    #[tokio::test]
    async fn find_returns_seeded_config() {
        let store = MemoryConfigStore::new();
        store.seed(ClientConfig::default_for("222"));

        let found = store.find_by_client("222").await.unwrap();
        assert_eq!(found.map(|c| c.client_id), Some("222".into()));
        assert!(store.find_by_client("999").await.unwrap().is_none());
    }
}
