//! Embedding cache.
//!
//! Repeated questions (suggested prompts, retries after a dropped stream)
//! skip the embedding call. The cache is owned by whoever builds the
//! pipeline and handed in explicitly.

use std::sync::Arc;
use std::time::Duration;

use moka::future::Cache;

use crate::config::CacheConfig;

/// Bounded TTL cache from query text to its embedding.
#[derive(Clone)]
pub struct EmbeddingCache {
    inner: Cache<String, Arc<Vec<f32>>>,
}

impl std::fmt::Debug for EmbeddingCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingCache")
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}

impl EmbeddingCache {
    pub fn new(max_entries: u64, ttl: Duration) -> Self {
        Self {
            inner: Cache::builder()
                .max_capacity(max_entries)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Build from config, or `None` when caching is disabled.
    pub fn from_config(config: &CacheConfig) -> Option<Self> {
        config
            .enabled
            .then(|| Self::new(config.max_entries, Duration::from_secs(config.ttl_secs)))
    }

    pub async fn get(&self, text: &str) -> Option<Arc<Vec<f32>>> {
        self.inner.get(text).await
    }

    pub async fn insert(&self, text: &str, embedding: Vec<f32>) {
        self.inner.insert(text.to_string(), Arc::new(embedding)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stores_and_returns_embedding() {
        let cache = EmbeddingCache::new(10, Duration::from_secs(60));
        assert!(cache.get("안녕").await.is_none());
        cache.insert("안녕", vec![0.1, 0.2]).await;
        assert_eq!(cache.get("안녕").await.as_deref(), Some(&vec![0.1, 0.2]));
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = EmbeddingCache::new(10, Duration::from_millis(50));
        cache.insert("q", vec![1.0]).await;
        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(cache.get("q").await.is_none());
    }

    #[test]
    fn disabled_config_builds_nothing() {
        assert!(EmbeddingCache::from_config(&CacheConfig::default()).is_none());
        let enabled = CacheConfig {
            enabled: true,
            ..CacheConfig::default()
        };
        assert!(EmbeddingCache::from_config(&enabled).is_some());
    }
}
