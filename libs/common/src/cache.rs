//! Redis cache module
//!
//! Thin async wrapper over a Redis client. Every key is namespaced with the
//! configured prefix and values are written with a TTL unless it is zero.

use anyhow::{Context, Result};
use redis::{AsyncCommands, Client};
use serde::{Serialize, de::DeserializeOwned};
use tracing::info;

/// Configuration for Redis connection
#[derive(Debug, Clone)]
pub struct RedisConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379")
    pub url: String,
    /// TTL applied to entries written without an explicit one; 0 disables expiry
    pub default_ttl_seconds: u64,
    /// Prepended to every key, separated by a colon
    pub key_prefix: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            default_ttl_seconds: 3600,
            key_prefix: "bank".to_string(),
        }
    }
}

impl RedisConfig {
    /// Create a new RedisConfig from environment variables
    ///
    /// # Environment Variables
    /// - `REDIS_URL`: Redis connection URL (default: "redis://localhost:6379")
    /// - `REDIS_DEFAULT_TTL_SECONDS`: Default entry TTL (default: 3600)
    /// - `REDIS_KEY_PREFIX`: Key namespace (default: "bank")
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let default_ttl_seconds = match std::env::var("REDIS_DEFAULT_TTL_SECONDS") {
            Ok(raw) => raw
                .parse()
                .with_context(|| format!("Invalid REDIS_DEFAULT_TTL_SECONDS: {}", raw))?,
            Err(_) => defaults.default_ttl_seconds,
        };

        Ok(RedisConfig {
            url: std::env::var("REDIS_URL").unwrap_or(defaults.url),
            default_ttl_seconds,
            key_prefix: std::env::var("REDIS_KEY_PREFIX").unwrap_or(defaults.key_prefix),
        })
    }
}

/// Redis connection handle, cheap to clone
#[derive(Clone)]
pub struct RedisPool {
    client: Client,
    default_ttl_seconds: u64,
    key_prefix: String,
}

impl RedisPool {
    /// Open a client; no connection is made until the first command
    pub async fn new(config: &RedisConfig) -> Result<Self> {
        let client = Client::open(config.url.clone())?;
        info!(
            "Redis client initialized with URL: {} (prefix '{}')",
            config.url, config.key_prefix
        );
        Ok(RedisPool {
            client,
            default_ttl_seconds: config.default_ttl_seconds,
            key_prefix: config.key_prefix.clone(),
        })
    }

    /// Full Redis key for a logical key
    pub fn namespaced(&self, key: &str) -> String {
        if self.key_prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}:{}", self.key_prefix, key)
        }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        let conn = self.client.get_multiplexed_async_connection().await?;
        Ok(conn)
    }

    /// Store a string value, falling back to the default TTL when none is given
    pub async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<()> {
        let mut conn = self.connection().await?;
        let key = self.namespaced(key);

        match ttl_seconds.unwrap_or(self.default_ttl_seconds) {
            0 => conn.set::<_, _, ()>(key, value).await?,
            ttl => conn.set_ex::<_, _, ()>(key, value, ttl).await?,
        }

        Ok(())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.connection().await?;
        let value: Option<String> = conn.get(self.namespaced(key)).await?;
        Ok(value)
    }

    /// Store a value as a JSON document
    pub async fn set_json<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl_seconds: Option<u64>,
    ) -> Result<()> {
        let raw = serde_json::to_string(value)
            .with_context(|| format!("Failed to encode cache entry {}", key))?;
        self.set(key, &raw, ttl_seconds).await
    }

    /// Load a JSON document; a value that no longer decodes is an error
    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.get(key).await? {
            Some(raw) => {
                let value = serde_json::from_str(&raw)
                    .with_context(|| format!("Failed to decode cache entry {}", key))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Delete every given key in one round trip
    pub async fn delete(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = keys.iter().map(|k| self.namespaced(k)).collect();
        let mut conn = self.connection().await?;
        let _: u64 = conn.del(keys).await?;
        Ok(())
    }

    /// Check if Redis is reachable
    pub async fn health_check(&self) -> Result<bool> {
        let mut conn = self.connection().await?;
        let pong: String = redis::cmd("PING").query_async(&mut conn).await?;
        Ok(pong == "PONG")
    }
}
