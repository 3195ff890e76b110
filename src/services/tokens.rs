use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;
use zeroize::Zeroizing;

use crate::cache::{StoredToken, TokenStore};
use crate::clock::Clock;
use crate::config::{MAX_ROTATION_SECS, MIN_ROTATION_SECS, PresenceConfig};
use crate::crypto::token::{self, PresentedToken};
use crate::error::{AppError, Result};
use crate::models::verdict::Rejection;

/// What the lecturer display needs to render the current QR code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    /// The string to encode in the QR image, `sessionId|issuedAt|signature`.
    pub qr_payload: String,
    pub issued_at: i64,
    pub expires_at: i64,
}

/// A token that passed every check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidatedToken {
    pub session_id: Uuid,
    pub issued_at: i64,
}

/// Whether a session currently has a scannable token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenStatus {
    pub active: bool,
    pub issued_at: Option<i64>,
    /// Seconds until the current token rotates out.
    pub expires_in: Option<i64>,
}

/// Issues, validates and retires rotating QR tokens.
pub struct TokenService {
    store: Arc<dyn TokenStore>,
    clock: Arc<dyn Clock>,
    secret: Zeroizing<Vec<u8>>,
    rotation_interval_secs: u64,
    staleness_ceiling_secs: i64,
}

impl TokenService {
    pub fn new(config: &PresenceConfig, store: Arc<dyn TokenStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            clock,
            secret: config.token_secret.clone(),
            rotation_interval_secs: config.rotation_interval_secs,
            staleness_ceiling_secs: config.staleness_ceiling_secs,
        }
    }

    /// Signs a fresh token for `session_id` and makes it the only current one.
    ///
    /// `rotation_interval_secs` overrides the configured interval and must lie
    /// within 30–60 seconds.
    pub async fn issue(&self, session_id: Uuid, rotation_interval_secs: Option<u64>) -> Result<IssuedToken> {
        let interval = rotation_interval_secs.unwrap_or(self.rotation_interval_secs);
        if !(MIN_ROTATION_SECS..=MAX_ROTATION_SECS).contains(&interval) {
            return Err(AppError::Validation(format!(
                "Rotation interval must be between {} and {} seconds",
                MIN_ROTATION_SECS, MAX_ROTATION_SECS
            )));
        }

        let issued_at = self.clock.unix_seconds();
        let signature = token::sign(&self.secret, &session_id.to_string(), issued_at)?;
        let expires_at = issued_at + interval as i64;

        let record = StoredToken {
            session_id,
            issued_at,
            signature,
            expires_at,
        };
        self.store.set(&record, Duration::from_secs(interval)).await?;

        tracing::info!("🔄 Token rotated for session {} (valid {}s)", session_id, interval);

        Ok(IssuedToken {
            qr_payload: token::encode(session_id, issued_at, &record.signature),
            issued_at,
            expires_at,
        })
    }

    /// Checks a presented token against the current one for `session_id`.
    ///
    /// Presence failures come back as [`AppError::Rejected`]; cache outages as
    /// their own transient errors.
    pub async fn validate(&self, session_id: Uuid, raw: &str) -> Result<ValidatedToken> {
        let presented = PresentedToken::parse(raw).map_err(AppError::Rejected)?;

        if presented.session_uuid() != Some(session_id) {
            tracing::warn!("❌ Token for another session presented to {}", session_id);
            return Err(AppError::Rejected(Rejection::InvalidSession));
        }

        let Some(current) = self.store.get(session_id).await? else {
            tracing::debug!("No current token for session {}", session_id);
            return Err(AppError::Rejected(Rejection::TokenExpired));
        };

        let now = self.clock.unix_seconds();
        let max_age = self
            .staleness_ceiling_secs
            .max(current.expires_at - current.issued_at);
        let age = now.saturating_sub(presented.issued_at);
        if age > max_age {
            tracing::debug!(
                "Token for session {} is {}s old (ceiling {}s)",
                session_id,
                age,
                max_age
            );
            return Err(AppError::Rejected(Rejection::TokenExpired));
        }

        if !token::verify(&self.secret, &presented)? {
            tracing::warn!("❌ Token signature mismatch for session {}", session_id);
            return Err(AppError::Rejected(Rejection::TokenForgery));
        }

        // Authentic but superseded by a later rotation.
        if presented.issued_at != current.issued_at
            || !token::same_signature(presented.signature, &current.signature)
        {
            tracing::debug!("Superseded token replayed for session {}", session_id);
            return Err(AppError::Rejected(Rejection::TokenExpired));
        }

        Ok(ValidatedToken {
            session_id,
            issued_at: presented.issued_at,
        })
    }

    pub async fn status(&self, session_id: Uuid) -> Result<TokenStatus> {
        let now = self.clock.unix_seconds();
        Ok(match self.store.get(session_id).await? {
            Some(current) => TokenStatus {
                active: true,
                issued_at: Some(current.issued_at),
                expires_in: Some((current.expires_at - now).max(0)),
            },
            None => TokenStatus {
                active: false,
                issued_at: None,
                expires_in: None,
            },
        })
    }

    /// Retires the current token; nothing validates until the next issue.
    pub async fn revoke(&self, session_id: Uuid) -> Result<()> {
        self.store.delete(session_id).await?;
        tracing::info!("🛑 Token revoked for session {}", session_id);
        Ok(())
    }
}
