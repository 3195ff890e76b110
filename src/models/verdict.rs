use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The single authoritative outcome of one check-in attempt.
///
/// Stored as the `checkin_verdict` Postgres enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "snake_case")]
#[postgres(name = "checkin_verdict")]
pub enum Verdict {
    #[postgres(name = "success")]
    Success,
    #[postgres(name = "gps_fail")]
    GpsFail,
    #[postgres(name = "spoofed")]
    Spoofed,
    #[postgres(name = "expired_token")]
    ExpiredToken,
    #[postgres(name = "invalid_session")]
    InvalidSession,
}

impl Verdict {
    /// Rank used when more than one check fails on the same attempt.
    ///
    /// Anomaly outranks geofence, which outranks token and session failures.
    /// `Success` ranks lowest so any failure replaces it.
    pub fn precedence(self) -> u8 {
        match self {
            Verdict::Spoofed => 4,
            Verdict::GpsFail => 3,
            Verdict::ExpiredToken => 2,
            Verdict::InvalidSession => 1,
            Verdict::Success => 0,
        }
    }

    /// Picks the highest-precedence failure, or `Success` when there is none.
    pub fn resolve<I>(failures: I) -> Verdict
    where
        I: IntoIterator<Item = Verdict>,
    {
        failures
            .into_iter()
            .max_by_key(|v| v.precedence())
            .unwrap_or(Verdict::Success)
    }

    pub fn is_success(self) -> bool {
        self == Verdict::Success
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Verdict::Success => "success",
            Verdict::GpsFail => "gps_fail",
            Verdict::Spoofed => "spoofed",
            Verdict::ExpiredToken => "expired_token",
            Verdict::InvalidSession => "invalid_session",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a presence check failed.
///
/// Each member maps onto exactly one [`Verdict`]. Store outages are not part of
/// this taxonomy; they surface as transient [`crate::error::AppError`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("session id is unknown or malformed")]
    InvalidSession,
    #[error("no current token for the session, or the token is stale")]
    TokenExpired,
    #[error("token signature does not verify")]
    TokenForgery,
    #[error("submitted location is outside the geofence")]
    GeofenceViolation,
    #[error("device fingerprint was used by another student")]
    FingerprintAnomaly,
}

impl Rejection {
    pub fn verdict(self) -> Verdict {
        match self {
            Rejection::InvalidSession => Verdict::InvalidSession,
            // Forgery is reported exactly like expiry.
            Rejection::TokenExpired | Rejection::TokenForgery => Verdict::ExpiredToken,
            Rejection::GeofenceViolation => Verdict::GpsFail,
            Rejection::FingerprintAnomaly => Verdict::Spoofed,
        }
    }

    /// Message safe to show to the client.
    pub fn public_reason(self) -> &'static str {
        match self {
            Rejection::InvalidSession => "This class session is not accepting check-ins",
            Rejection::TokenExpired | Rejection::TokenForgery => {
                "QR code expired, scan the code currently on screen"
            }
            Rejection::GeofenceViolation => "You are outside the classroom geofence",
            Rejection::FingerprintAnomaly => "This device was already used by another student",
        }
    }
}
