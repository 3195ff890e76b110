use std::sync::Arc;
use std::time::Duration;

use crate::cache::{MemoryTokenStore, RedisTokenStore, TokenStore};
use crate::clock::{Clock, SystemClock};
use crate::config::{Config, PresenceConfig, TokenCacheDriver};
use crate::error::Result;
use crate::repositories::attempts::{AttemptLedger, PgAttemptLedger};
use crate::services::check_in::CheckInCoordinator;
use crate::services::tokens::TokenService;

/// How often the in-memory token cache drops lapsed entries.
const TOKEN_PURGE_INTERVAL: Duration = Duration::from_secs(60);

/// The application's state.
#[derive(Clone)]
pub struct AppState {
    /// Issues and validates QR tokens.
    pub tokens: Arc<TokenService>,
    /// Runs check-ins.
    pub coordinator: Arc<CheckInCoordinator>,
    /// Sessions and recorded attempts.
    pub ledger: Arc<dyn AttemptLedger>,
}

impl AppState {
    /// Creates a new `AppState` backed by PostgreSQL and the configured token cache.
    ///
    /// # Arguments
    ///
    /// * `config` - The application's configuration.
    ///
    /// # Returns
    ///
    /// A `Result` containing the `AppState`.
    pub async fn new(config: &Config) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);

        let db = crate::db::create_pool(&config.database_url)?;
        tracing::info!("✅ PostgreSQL Pool initialized with deadpool-postgres");

        let store: Arc<dyn TokenStore> = match config.token_cache {
            TokenCacheDriver::Redis => Arc::new(RedisTokenStore::connect(&config.redis_url).await?),
            TokenCacheDriver::Memory => {
                tracing::warn!("⚠️  In-memory token cache: tokens are not shared between instances");
                let store = MemoryTokenStore::new(clock.clone());
                store.spawn_purge(TOKEN_PURGE_INTERVAL);
                tracing::info!("✅ Token purge job started (runs every minute)");
                Arc::new(store)
            }
        };

        let ledger = Arc::new(PgAttemptLedger::new(
            db,
            config.presence.serialize_same_session,
        ));
        if !config.presence.serialize_same_session {
            tracing::warn!("⚠️  Same-session check-ins are not serialized; anomaly checks are best-effort");
        }

        Ok(Self::from_parts(config.presence.clone(), store, ledger, clock))
    }

    /// Wires the services over the given stores.
    pub fn from_parts(
        presence: PresenceConfig,
        store: Arc<dyn TokenStore>,
        ledger: Arc<dyn AttemptLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let tokens = Arc::new(TokenService::new(&presence, store, clock.clone()));
        let coordinator = Arc::new(CheckInCoordinator::new(
            &presence,
            tokens.clone(),
            ledger.clone(),
            clock,
        ));

        Self {
            tokens,
            coordinator,
            ledger,
        }
    }
}
