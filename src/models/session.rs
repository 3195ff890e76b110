use chrono::{DateTime, Utc};
use postgres_types::{FromSql, ToSql};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::services::geofence::Coordinates;

/// Lifecycle of a class session. Owned by the scheduling side; read-only here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSql, FromSql)]
#[serde(rename_all = "snake_case")]
#[postgres(name = "session_status")]
pub enum SessionStatus {
    #[postgres(name = "scheduled")]
    Scheduled,
    #[postgres(name = "active")]
    Active,
    #[postgres(name = "ended")]
    Ended,
    #[postgres(name = "cancelled")]
    Cancelled,
}

/// The session metadata the presence checks need.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassSession {
    /// The unique identifier for the session.
    pub id: Uuid,
    /// The lecturer running the session.
    pub lecturer_id: Uuid,
    /// Classroom latitude in degrees. Fixed once the session exists.
    pub latitude: f64,
    /// Classroom longitude in degrees. Fixed once the session exists.
    pub longitude: f64,
    /// Geofence radius in meters, if the session overrides the default.
    pub geofence_radius_meters: Option<f64>,
    /// The session status.
    pub status: SessionStatus,
    /// Start of the active window.
    pub starts_at: DateTime<Utc>,
    /// End of the active window, if bounded.
    pub ends_at: Option<DateTime<Utc>>,
}

impl ClassSession {
    pub fn location(&self) -> Coordinates {
        Coordinates::new(self.latitude, self.longitude)
    }

    pub fn radius_or(&self, default_meters: f64) -> f64 {
        self.geofence_radius_meters.unwrap_or(default_meters)
    }

    /// Whether a check-in submitted at `at` may count for this session.
    pub fn accepts_check_ins(&self, at: DateTime<Utc>) -> bool {
        let open = matches!(self.status, SessionStatus::Scheduled | SessionStatus::Active);
        let started = at >= self.starts_at;
        let not_over = self.ends_at.is_none_or(|end| at <= end);
        open && started && not_over
    }
}
