//! Token cache
//!
//! Holds the single current QR token per session. Two drivers:
//! - In-memory, for single-instance deployments and tests
//! - Redis, for deployments with more than one service instance
//!
//! Both replace an entry in one atomic step. Readers never observe a
//! half-rotated token.

pub mod memory;
pub mod redis;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;

pub use memory::MemoryTokenStore;
pub use self::redis::RedisTokenStore;

/// The token record kept for the current rotation of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredToken {
    pub session_id: Uuid,
    /// Unix seconds.
    pub issued_at: i64,
    /// Lowercase hex HMAC-SHA256.
    pub signature: String,
    /// Unix seconds at which the cache entry lapses.
    pub expires_at: i64,
}

/// Cache key for a session's current token.
pub fn token_key(session_id: Uuid) -> String {
    format!("token:{}", session_id)
}

/// Storage for current tokens.
///
/// `set` must overwrite any previous entry for the session atomically.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Current token for a session, or `None` once it has lapsed.
    async fn get(&self, session_id: Uuid) -> Result<Option<StoredToken>>;

    /// Replaces the session's current token, expiring after `ttl`.
    async fn set(&self, token: &StoredToken, ttl: Duration) -> Result<()>;

    /// Drops the session's current token, if any.
    async fn delete(&self, session_id: Uuid) -> Result<()>;
}
