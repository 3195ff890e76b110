use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use uuid::Uuid;

use super::{StoredToken, TokenStore, token_key};
use crate::error::{AppError, Result};

/// Token store backed by Redis, shared by every service instance.
///
/// Values are JSON. Expiry is Redis's own TTL.
#[derive(Clone)]
pub struct RedisTokenStore {
    redis: ConnectionManager,
}

impl RedisTokenStore {
    pub fn new(redis: ConnectionManager) -> Self {
        Self { redis }
    }

    /// Connects to `redis_url` with a pooled connection manager.
    pub async fn connect(redis_url: &str) -> Result<Self> {
        let client = redis::Client::open(redis_url)?;
        let redis = ConnectionManager::new(client).await?;
        tracing::info!("✅ Redis token store connected");
        Ok(Self::new(redis))
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn get(&self, session_id: Uuid) -> Result<Option<StoredToken>> {
        let mut redis = self.redis.clone();
        let raw: Option<String> = redis.get(token_key(session_id)).await.map_err(|e| {
            tracing::error!("❌ Redis GET failed for token:{}: {}", session_id, e);
            AppError::Redis(e)
        })?;

        raw.map(|json| {
            sonic_rs::from_str::<StoredToken>(&json)
                .map_err(|e| AppError::Cache(format!("Corrupt token entry: {}", e)))
        })
        .transpose()
    }

    async fn set(&self, token: &StoredToken, ttl: Duration) -> Result<()> {
        let mut redis = self.redis.clone();
        let json = sonic_rs::to_string(token)
            .map_err(|e| AppError::Internal(format!("Token serialization failed: {}", e)))?;

        // SET with EX replaces value and expiry in one command.
        let _: () = redis
            .set_ex(token_key(token.session_id), &json, ttl.as_secs().max(1))
            .await
            .map_err(|e| {
                tracing::error!("❌ Redis set_ex failed: {}", e);
                AppError::Redis(e)
            })?;

        Ok(())
    }

    async fn delete(&self, session_id: Uuid) -> Result<()> {
        let mut redis = self.redis.clone();
        let _: () = redis.del(token_key(session_id)).await?;
        Ok(())
    }
}
