use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub cache: CacheConfig,
    pub search: SearchConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    /// Read replica. Reads go to the primary when unset.
    pub replica_url: Option<String>,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub max_capacity: u64,
    pub ttl_secs: u64,
    pub queue_capacity: usize,
    pub recent_activity_limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Index holding activity documents.
    pub index: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub format: LogFormat,
    pub level: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgresql://localhost:5432/warden".to_string(),
            replica_url: None,
            max_connections: 10,
        }
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_capacity: 100_000,
            ttl_secs: 3600,
            queue_capacity: 1024,
            recent_activity_limit: 20,
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            index: "activities".to_string(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::Json,
            level: "info".to_string(),
        }
    }
}

impl AppConfig {
    pub fn load(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = if let Some(path) = config_path {
            let contents = std::fs::read_to_string(path)
                .map_err(|e| ConfigError::ReadFile(path.display().to_string(), e.to_string()))?;
            toml::from_str::<AppConfig>(&contents)
                .map_err(|e| ConfigError::ParseToml(e.to_string()))?
        } else {
            AppConfig::default()
        };

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("WARDEN_DATABASE_URL") {
            self.database.url = v;
        }
        if let Ok(v) = std::env::var("WARDEN_DATABASE_REPLICA_URL") {
            self.database.replica_url = Some(v).filter(|url| !url.is_empty());
        }
        if let Ok(v) = std::env::var("WARDEN_DATABASE_MAX_CONNECTIONS")
            && let Ok(n) = v.parse()
        {
            self.database.max_connections = n;
        }
        if let Ok(v) = std::env::var("WARDEN_CACHE_ENABLED")
            && let Ok(enabled) = v.parse()
        {
            self.cache.enabled = enabled;
        }
        if let Ok(v) = std::env::var("WARDEN_CACHE_TTL_SECS")
            && let Ok(n) = v.parse()
        {
            self.cache.ttl_secs = n;
        }
        if let Ok(v) = std::env::var("WARDEN_CACHE_QUEUE_CAPACITY")
            && let Ok(n) = v.parse()
        {
            self.cache.queue_capacity = n;
        }
        if let Ok(v) = std::env::var("WARDEN_SEARCH_INDEX") {
            self.search.index = v;
        }
        if let Ok(v) = std::env::var("WARDEN_LOG_LEVEL") {
            self.log.level = v;
        }
        if let Ok(v) = std::env::var("WARDEN_LOG_FORMAT") {
            match v.as_str() {
                "json" => self.log.format = LogFormat::Json,
                "pretty" => self.log.format = LogFormat::Pretty,
                _ => {}
            }
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::Validation(
                "database.max_connections must be non-zero".to_string(),
            ));
        }
        if self.cache.ttl_secs == 0 {
            return Err(ConfigError::Validation(
                "cache.ttl_secs must be non-zero".to_string(),
            ));
        }
        if self.cache.queue_capacity == 0 {
            return Err(ConfigError::Validation(
                "cache.queue_capacity must be non-zero".to_string(),
            ));
        }
        if self.search.index.is_empty() {
            return Err(ConfigError::Validation(
                "search.index must not be empty".to_string(),
            ));
        }
        if self.cache.recent_activity_limit == 0 {
            return Err(ConfigError::Validation(
                "cache.recent_activity_limit must be non-zero".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{0}': {1}")]
    ReadFile(String, String),

    #[error("failed to parse TOML config: {0}")]
    ParseToml(String),

    #[error("config validation failed: {0}")]
    Validation(String),
}
