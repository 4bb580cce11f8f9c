use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;
use warden_storage::{CacheClient, CacheError};

use crate::background::BackgroundTasks;
use crate::config::CacheConfig;
use crate::metrics::Metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl: Duration,
}

impl CacheSettings {
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            ttl: Duration::from_secs(config.ttl_secs),
        }
    }
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Advisory cache in front of the durable store.
///
/// Reads never fail: a cache error is logged, counted and reported as a
/// miss. Writes and invalidations run on the background queue. With
/// caching disabled every read misses and every write is skipped.
pub struct CacheLayer<C> {
    client: Arc<C>,
    settings: CacheSettings,
    tasks: BackgroundTasks,
    metrics: Arc<Metrics>,
}

impl<C> Clone for CacheLayer<C> {
    fn clone(&self) -> Self {
        Self {
            client: Arc::clone(&self.client),
            settings: self.settings,
            tasks: self.tasks.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<C: CacheClient + 'static> CacheLayer<C> {
    pub fn new(
        client: Arc<C>,
        settings: CacheSettings,
        tasks: BackgroundTasks,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            client,
            settings,
            tasks,
            metrics,
        }
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    fn record_lookup<T>(&self, key: &str, result: Result<Option<T>, CacheError>) -> Option<T> {
        match result {
            Ok(Some(value)) => {
                self.metrics.record_cache_hit();
                Some(value)
            }
            Ok(None) => {
                self.metrics.record_cache_miss();
                None
            }
            Err(error) => {
                tracing::warn!(key, %error, "cache read failed, treating as miss");
                self.metrics.record_cache_error();
                None
            }
        }
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        if !self.settings.enabled {
            return None;
        }
        let raw = self.record_lookup(key, self.client.get(key).await)?;
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(error) => {
                tracing::warn!(key, %error, "discarding undecodable cache entry");
                self.metrics.record_cache_error();
                self.invalidate_later(vec![key.to_string()]);
                None
            }
        }
    }

    pub async fn get_ids(&self, key: &str) -> Option<Vec<String>> {
        if !self.settings.enabled {
            return None;
        }
        self.record_lookup(key, self.client.get_array(key).await)
    }

    /// Whether a direct existence key is present.
    pub async fn exists(&self, key: &str) -> bool {
        if !self.settings.enabled {
            return false;
        }
        self.record_lookup(key, self.client.get(key).await).is_some()
    }

    pub fn store_json_later<T: Serialize>(&self, key: String, value: &T) {
        if !self.settings.enabled {
            return;
        }
        let encoded = match serde_json::to_string(value) {
            Ok(encoded) => encoded,
            Err(error) => {
                tracing::warn!(key = %key, %error, "skipping cache write for unserializable value");
                return;
            }
        };
        let client = Arc::clone(&self.client);
        let ttl = self.settings.ttl;
        self.tasks.submit("cache_set", async move {
            client.set(&key, encoded, ttl).await
        });
    }

    pub fn store_ids_later(&self, key: String, ids: Vec<String>) {
        if !self.settings.enabled {
            return;
        }
        let client = Arc::clone(&self.client);
        let ttl = self.settings.ttl;
        self.tasks.submit("cache_set_array", async move {
            client.set_array(&key, ids, ttl).await
        });
    }

    /// Writes a direct existence key.
    pub fn mark_later(&self, key: String) {
        if !self.settings.enabled {
            return;
        }
        let client = Arc::clone(&self.client);
        let ttl = self.settings.ttl;
        self.tasks.submit("cache_mark", async move {
            client.set(&key, "1".to_string(), ttl).await
        });
    }

    /// Deletes every key. One failed delete does not stop the rest; the
    /// last error is reported to the background worker.
    pub fn invalidate_later(&self, keys: Vec<String>) {
        if !self.settings.enabled || keys.is_empty() {
            return;
        }
        let client = Arc::clone(&self.client);
        self.tasks.submit("cache_invalidate", async move {
            let mut outcome = Ok(());
            for key in &keys {
                if let Err(error) = client.delete(key).await {
                    tracing::warn!(key = %key, %error, "cache invalidation failed");
                    outcome = Err(error);
                }
            }
            outcome
        });
    }
}
