use std::future::Future;
use std::time::{Duration, Instant};

use moka::Expiry;
use moka::future::Cache;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheError {
    #[error("cache key '{key}' does not hold {expected}")]
    WrongType { key: String, expected: &'static str },
    #[error("cache unavailable: {0}")]
    Unavailable(String),
}

/// Key/value cache with per-entry TTL. Entries are either a scalar string
/// or an array of strings; reading one as the other is an error.
pub trait CacheClient: Send + Sync {
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, CacheError>> + Send;

    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn delete(&self, key: &str) -> impl Future<Output = Result<(), CacheError>> + Send;

    fn get_array(
        &self,
        key: &str,
    ) -> impl Future<Output = Result<Option<Vec<String>>, CacheError>> + Send;

    fn set_array(
        &self,
        key: &str,
        values: Vec<String>,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), CacheError>> + Send;
}

#[derive(Debug, Clone)]
enum CacheValue {
    Scalar(String),
    Array(Vec<String>),
}

#[derive(Debug, Clone)]
struct Entry {
    value: CacheValue,
    ttl: Duration,
}

struct EntryTtl;

impl Expiry<String, Entry> for EntryTtl {
    fn expire_after_create(
        &self,
        _key: &String,
        value: &Entry,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &Entry,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process cache client backed by `moka`.
#[derive(Clone)]
pub struct MokaCacheClient {
    cache: Cache<String, Entry>,
}

impl std::fmt::Debug for MokaCacheClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaCacheClient")
            .field("entry_count", &self.cache.entry_count())
            .finish()
    }
}

impl MokaCacheClient {
    pub fn new(max_capacity: u64) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(EntryTtl)
            .build();
        Self { cache }
    }
}

impl CacheClient for MokaCacheClient {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        match self.cache.get(key).await {
            None => Ok(None),
            Some(Entry {
                value: CacheValue::Scalar(s),
                ..
            }) => Ok(Some(s)),
            Some(_) => Err(CacheError::WrongType {
                key: key.to_string(),
                expected: "a scalar",
            }),
        }
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let entry = Entry {
            value: CacheValue::Scalar(value),
            ttl,
        };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    async fn get_array(&self, key: &str) -> Result<Option<Vec<String>>, CacheError> {
        match self.cache.get(key).await {
            None => Ok(None),
            Some(Entry {
                value: CacheValue::Array(values),
                ..
            }) => Ok(Some(values)),
            Some(_) => Err(CacheError::WrongType {
                key: key.to_string(),
                expected: "an array",
            }),
        }
    }

    async fn set_array(
        &self,
        key: &str,
        values: Vec<String>,
        ttl: Duration,
    ) -> Result<(), CacheError> {
        let entry = Entry {
            value: CacheValue::Array(values),
            ttl,
        };
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }
}
