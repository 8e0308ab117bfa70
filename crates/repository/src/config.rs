//! Per-collection repository configuration.
//!
//! A [`RepositoryConfig`] is fixed when the repository is constructed. It
//! can be built in code, deserialized (durations use humantime strings such
//! as `"5m"`), or overlaid from environment variables:
//!
//! | variable | field |
//! |---|---|
//! | `REPOSITORY_ENABLE_CACHE` | `enable_cache` |
//! | `REPOSITORY_CACHE_TTL` | `cache_ttl` |
//! | `REPOSITORY_CACHE_MAX_ITEMS` | `cache_max_items` |
//! | `REPOSITORY_SOFT_DELETES` | `use_soft_deletes` |
//! | `REPOSITORY_VERSIONING` | `use_versioning` |

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::batch::BatchConfig;
use crate::core::transaction::TransactionOptions;
use crate::error::ValidationError;

/// Environment variable toggling the cache.
pub const ENV_ENABLE_CACHE: &str = "REPOSITORY_ENABLE_CACHE";
/// Environment variable for the cache TTL (humantime format).
pub const ENV_CACHE_TTL: &str = "REPOSITORY_CACHE_TTL";
/// Environment variable for the cache capacity.
pub const ENV_CACHE_MAX_ITEMS: &str = "REPOSITORY_CACHE_MAX_ITEMS";
/// Environment variable toggling soft deletes.
pub const ENV_SOFT_DELETES: &str = "REPOSITORY_SOFT_DELETES";
/// Environment variable toggling optimistic versioning.
pub const ENV_VERSIONING: &str = "REPOSITORY_VERSIONING";

/// Configuration of one repository (one collection).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Collection name.
    pub collection: String,

    /// Mark entities deleted instead of removing them.
    #[serde(default = "default_true")]
    pub use_soft_deletes: bool,

    /// Maintain a `version` counter on every entity.
    #[serde(default = "default_true")]
    pub use_versioning: bool,

    /// Enable the read-through cache.
    #[serde(default = "default_true")]
    pub enable_cache: bool,

    /// Time-to-live of cache entries. Zero disables caching.
    #[serde(with = "humantime_serde", default = "default_cache_ttl")]
    pub cache_ttl: Duration,

    /// Cache capacity.
    #[serde(default = "default_cache_max_items")]
    pub cache_max_items: usize,

    /// Interval of the background expiry sweep.
    #[serde(with = "humantime_serde", default = "default_sweep_interval")]
    pub cache_sweep_interval: Duration,

    /// Fields that must be present and non-null on create.
    #[serde(default)]
    pub required_fields: Vec<String>,

    /// Fields whose values must be unique among live entities.
    #[serde(default)]
    pub unique_fields: Vec<String>,

    /// Payload fields stored as native timestamps.
    #[serde(default)]
    pub date_fields: Vec<String>,

    /// Batch size bounds.
    #[serde(default)]
    pub batch: BatchConfig,

    /// Default transaction options.
    #[serde(default)]
    pub transaction: TransactionOptions,
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> Duration {
    Duration::from_secs(300)
}

fn default_cache_max_items() -> usize {
    1000
}

fn default_sweep_interval() -> Duration {
    Duration::from_secs(60)
}

impl RepositoryConfig {
    /// Creates a configuration with defaults for `collection`.
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            use_soft_deletes: true,
            use_versioning: true,
            enable_cache: true,
            cache_ttl: default_cache_ttl(),
            cache_max_items: default_cache_max_items(),
            cache_sweep_interval: default_sweep_interval(),
            required_fields: Vec::new(),
            unique_fields: Vec::new(),
            date_fields: Vec::new(),
            batch: BatchConfig::default(),
            transaction: TransactionOptions::default(),
        }
    }

    /// Starts a builder for `collection`.
    pub fn builder(collection: impl Into<String>) -> RepositoryConfigBuilder {
        RepositoryConfigBuilder {
            config: Self::new(collection),
        }
    }

    /// Creates a configuration from environment variables over the defaults.
    pub fn from_env(collection: impl Into<String>) -> Result<Self, ValidationError> {
        Self::from_lookup(collection, |key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env), reading values through `lookup`.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_lookup<F>(collection: impl Into<String>, lookup: F) -> Result<Self, ValidationError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::new(collection);

        if let Some(v) = lookup(ENV_ENABLE_CACHE).and_then(|v| parse_bool(ENV_ENABLE_CACHE, &v)) {
            config.enable_cache = v;
        }
        if let Some(v) = lookup(ENV_CACHE_TTL) {
            match humantime::parse_duration(&v) {
                Ok(ttl) => config.cache_ttl = ttl,
                Err(err) => {
                    tracing::warn!(variable = ENV_CACHE_TTL, value = %v, error = %err, "ignoring invalid duration")
                }
            }
        }
        if let Some(v) = lookup(ENV_CACHE_MAX_ITEMS) {
            match v.parse() {
                Ok(max) => config.cache_max_items = max,
                Err(_) => {
                    tracing::warn!(variable = ENV_CACHE_MAX_ITEMS, value = %v, "ignoring invalid number")
                }
            }
        }
        if let Some(v) = lookup(ENV_SOFT_DELETES).and_then(|v| parse_bool(ENV_SOFT_DELETES, &v)) {
            config.use_soft_deletes = v;
        }
        if let Some(v) = lookup(ENV_VERSIONING).and_then(|v| parse_bool(ENV_VERSIONING, &v)) {
            config.use_versioning = v;
        }

        config.validate()?;
        Ok(config)
    }

    /// Returns `true` if the cache stores anything at all.
    pub fn cache_active(&self) -> bool {
        self.enable_cache && !self.cache_ttl.is_zero() && self.cache_max_items > 0
    }

    /// Checks the configuration for values the engine cannot work with.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let invalid = |message: String| Err(ValidationError::InvalidConfig { message });

        if self.collection.trim().is_empty() {
            return invalid("collection name must not be empty".to_string());
        }
        if self.collection.contains('/') {
            return invalid(format!(
                "collection name '{}' must not contain '/'",
                self.collection
            ));
        }
        if self.enable_cache && self.cache_max_items == 0 {
            return invalid("cache_max_items must be at least 1 when caching is enabled".to_string());
        }
        if self.batch.chunk_size == 0 {
            return invalid("batch.chunk_size must be at least 1".to_string());
        }
        if self.batch.min_items > self.batch.max_items {
            return invalid(format!(
                "batch.min_items ({}) exceeds batch.max_items ({})",
                self.batch.min_items, self.batch.max_items
            ));
        }
        if self.transaction.max_attempts == 0 {
            return invalid("transaction.max_attempts must be at least 1".to_string());
        }
        Ok(())
    }
}

fn parse_bool(variable: &str, value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => {
            tracing::warn!(variable, value, "ignoring invalid boolean");
            None
        }
    }
}

/// Builder for [`RepositoryConfig`].
#[derive(Debug, Clone)]
pub struct RepositoryConfigBuilder {
    config: RepositoryConfig,
}

impl RepositoryConfigBuilder {
    /// Enables or disables soft deletes.
    pub fn soft_deletes(mut self, enabled: bool) -> Self {
        self.config.use_soft_deletes = enabled;
        self
    }

    /// Enables or disables versioning.
    pub fn versioning(mut self, enabled: bool) -> Self {
        self.config.use_versioning = enabled;
        self
    }

    /// Enables or disables the cache.
    pub fn cache(mut self, enabled: bool) -> Self {
        self.config.enable_cache = enabled;
        self
    }

    /// Sets the cache TTL.
    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.config.cache_ttl = ttl;
        self
    }

    /// Sets the cache capacity.
    pub fn cache_max_items(mut self, max: usize) -> Self {
        self.config.cache_max_items = max;
        self
    }

    /// Sets the background sweep interval.
    pub fn cache_sweep_interval(mut self, interval: Duration) -> Self {
        self.config.cache_sweep_interval = interval;
        self
    }

    /// Sets the required fields.
    pub fn required_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.required_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the unique fields.
    pub fn unique_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.unique_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the payload fields stored as native timestamps.
    pub fn date_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.date_fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the batch bounds.
    pub fn batch(mut self, batch: BatchConfig) -> Self {
        self.config.batch = batch;
        self
    }

    /// Sets the default transaction options.
    pub fn transaction(mut self, options: TransactionOptions) -> Self {
        self.config.transaction = options;
        self
    }

    /// Validates and returns the configuration.
    pub fn build(self) -> Result<RepositoryConfig, ValidationError> {
        self.config.validate()?;
        Ok(self.config)
    }
}

/// Serde module for Duration with humantime format.
pub(crate) mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&humantime::format_duration(*duration).to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = RepositoryConfig::new("products");
        assert!(config.use_soft_deletes);
        assert!(config.use_versioning);
        assert!(config.enable_cache);
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert_eq!(config.cache_max_items, 1000);
        assert_eq!(config.batch.chunk_size, 500);
        assert_eq!(config.transaction.max_attempts, 5);
        assert!(config.cache_active());
    }

    #[test]
    fn test_builder_validation() {
        assert!(RepositoryConfig::builder("").build().is_err());
        assert!(RepositoryConfig::builder("a/b").build().is_err());
        assert!(
            RepositoryConfig::builder("stock")
                .cache_max_items(0)
                .build()
                .is_err()
        );
        let config = RepositoryConfig::builder("stock")
            .cache(false)
            .cache_max_items(0)
            .required_fields(["sku"])
            .build()
            .unwrap();
        assert!(!config.cache_active());
        assert_eq!(config.required_fields, vec!["sku".to_string()]);
    }

    #[test]
    fn test_from_lookup_overlays_values() {
        let vars: HashMap<&str, &str> = [
            (ENV_ENABLE_CACHE, "false"),
            (ENV_CACHE_TTL, "90s"),
            (ENV_CACHE_MAX_ITEMS, "25"),
            (ENV_SOFT_DELETES, "0"),
            (ENV_VERSIONING, "not-a-bool"),
        ]
        .into_iter()
        .collect();

        let config =
            RepositoryConfig::from_lookup("warehouses", |k| vars.get(k).map(|v| v.to_string()))
                .unwrap();

        assert!(!config.enable_cache);
        assert_eq!(config.cache_ttl, Duration::from_secs(90));
        assert_eq!(config.cache_max_items, 25);
        assert!(!config.use_soft_deletes);
        // invalid values keep the default
        assert!(config.use_versioning);
    }

    #[test]
    fn test_deserialize_with_humantime() {
        let config: RepositoryConfig = serde_json::from_str(
            r#"{"collection": "credentials", "cache_ttl": "5m", "use_versioning": false}"#,
        )
        .unwrap();
        assert_eq!(config.cache_ttl, Duration::from_secs(300));
        assert!(!config.use_versioning);
        assert_eq!(config.cache_sweep_interval, Duration::from_secs(60));
    }
}
