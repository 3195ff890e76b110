use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{StoredToken, TokenStore};
use crate::clock::Clock;
use crate::error::Result;

/// A cached token plus the instant it lapses.
#[derive(Clone)]
struct Entry {
    token: StoredToken,
    /// Unix seconds; the entry is live up to and including this second.
    lapses_at: i64,
}

/// An in-process token store.
///
/// Expiry is judged against the injected clock, so tests can move time by hand.
#[derive(Clone)]
pub struct MemoryTokenStore {
    entries: Arc<RwLock<HashMap<Uuid, Entry>>>,
    clock: Arc<dyn Clock>,
}

impl MemoryTokenStore {
    /// Creates a new, empty `MemoryTokenStore`.
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            clock,
        }
    }

    /// Drops every lapsed entry. Lookups already ignore them; this only frees memory.
    pub async fn purge_expired(&self) -> usize {
        let now = self.clock.unix_seconds();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.lapses_at >= now);
        before - entries.len()
    }

    /// Purges lapsed entries every `every` on a background task.
    pub fn spawn_purge(&self, every: Duration) -> tokio::task::JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(every).await;
                let purged = store.purge_expired().await;
                if purged > 0 {
                    tracing::debug!("🧹 Purged {} lapsed token(s)", purged);
                }
            }
        })
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn get(&self, session_id: Uuid) -> Result<Option<StoredToken>> {
        let now = self.clock.unix_seconds();
        let entries = self.entries.read().await;
        Ok(entries
            .get(&session_id)
            .filter(|entry| entry.lapses_at >= now)
            .map(|entry| entry.token.clone()))
    }

    async fn set(&self, token: &StoredToken, ttl: Duration) -> Result<()> {
        let lapses_at = self.clock.unix_seconds() + ttl.as_secs() as i64;
        let mut entries = self.entries.write().await;
        entries.insert(
            token.session_id,
            Entry {
                token: token.clone(),
                lapses_at,
            },
        );
        Ok(())
    }

    async fn delete(&self, session_id: Uuid) -> Result<()> {
        let mut entries = self.entries.write().await;
        entries.remove(&session_id);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn token(session_id: Uuid, issued_at: i64) -> StoredToken {
        StoredToken {
            session_id,
            issued_at,
            signature: format!("sig-{}", issued_at),
            expires_at: issued_at + 45,
        }
    }

    #[tokio::test]
    async fn entry_lives_for_its_ttl() {
        let clock = ManualClock::at(1_000);
        let store = MemoryTokenStore::new(Arc::new(clock.clone()));
        let session = Uuid::new_v4();

        store.set(&token(session, 1_000), Duration::from_secs(45)).await.unwrap();

        clock.advance(45);
        assert!(store.get(session).await.unwrap().is_some());

        clock.advance(1);
        assert!(store.get(session).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_replaces_previous_token() {
        let clock = ManualClock::at(1_000);
        let store = MemoryTokenStore::new(Arc::new(clock.clone()));
        let session = Uuid::new_v4();

        store.set(&token(session, 1_000), Duration::from_secs(45)).await.unwrap();
        clock.advance(10);
        store.set(&token(session, 1_010), Duration::from_secs(45)).await.unwrap();

        let current = store.get(session).await.unwrap().unwrap();
        assert_eq!(current.issued_at, 1_010);
    }

    #[tokio::test]
    async fn delete_and_purge() {
        let clock = ManualClock::at(1_000);
        let store = MemoryTokenStore::new(Arc::new(clock.clone()));
        let kept = Uuid::new_v4();
        let removed = Uuid::new_v4();
        let lapsed = Uuid::new_v4();

        store.set(&token(kept, 1_000), Duration::from_secs(60)).await.unwrap();
        store.set(&token(removed, 1_000), Duration::from_secs(60)).await.unwrap();
        store.set(&token(lapsed, 1_000), Duration::from_secs(5)).await.unwrap();

        store.delete(removed).await.unwrap();
        assert!(store.get(removed).await.unwrap().is_none());

        clock.advance(30);
        assert_eq!(store.purge_expired().await, 1);
        assert!(store.get(kept).await.unwrap().is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn background_purge_drops_lapsed_entries() {
        let clock = ManualClock::at(1_000);
        let store = MemoryTokenStore::new(Arc::new(clock.clone()));
        let session = Uuid::new_v4();
        store.set(&token(session, 1_000), Duration::from_secs(5)).await.unwrap();

        let purge = store.spawn_purge(Duration::from_secs(60));
        clock.advance(10);
        tokio::time::sleep(Duration::from_secs(61)).await;

        assert!(store.entries.read().await.is_empty());
        purge.abort();
    }
}
