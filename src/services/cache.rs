//! Redis cache for finished agent executions.
//!
//! Only terminal executions are cached; a running execution is always read
//! from the store so its status stays fresh.

use anyhow::{Context, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::{de::DeserializeOwned, Serialize};
use std::time::Duration;
use tracing::{debug, error, instrument, warn};

/// Redis cache client with connection pooling.
#[derive(Clone)]
pub struct RedisCache {
    conn: ConnectionManager,
    default_ttl: Duration,
}

impl RedisCache {
    /// Create a new Redis cache connection.
    pub async fn new(redis_url: &str, default_ttl_seconds: u64) -> Result<Self> {
        let client = redis::Client::open(redis_url).context("Failed to create Redis client")?;

        let conn = ConnectionManager::new(client)
            .await
            .context("Failed to connect to Redis")?;

        tracing::info!("Redis cache connected");

        Ok(Self {
            conn,
            default_ttl: Duration::from_secs(default_ttl_seconds),
        })
    }

    /// Get a value from cache. Errors count as a miss.
    #[instrument(skip(self), fields(cache_hit))]
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let mut conn = self.conn.clone();

        let hit = match conn.get::<_, Option<String>>(key).await {
            Ok(Some(data)) => match serde_json::from_str(&data) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!(key = key, error = %e, "Failed to deserialize cached value");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                error!(key = key, error = %e, "Redis get error");
                None
            }
        };

        debug!(key = key, hit = hit.is_some(), "Cache lookup");
        tracing::Span::current().record("cache_hit", hit.is_some());
        hit
    }

    /// Set a value with the default TTL.
    #[instrument(skip(self, value))]
    pub async fn set<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let mut conn = self.conn.clone();

        let data = serde_json::to_string(value).context("Failed to serialize value for cache")?;

        conn.set_ex::<_, _, ()>(key, data, self.default_ttl.as_secs())
            .await
            .context("Failed to set cache value")?;

        debug!(key = key, ttl_secs = self.default_ttl.as_secs(), "Cached value");
        Ok(())
    }

    /// Check if Redis is healthy.
    pub async fn health_check(&self) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .context("Redis health check failed")?;
        Ok(())
    }
}

/// Cache key builders.
pub mod keys {
    use uuid::Uuid;

    /// Finished execution record
    pub fn execution(execution_id: Uuid) -> String {
        format!("agent:execution:{}", execution_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn execution_keys_are_namespaced() {
        let id = Uuid::nil();
        assert_eq!(
            keys::execution(id),
            "agent:execution:00000000-0000-0000-0000-000000000000"
        );
    }
}
