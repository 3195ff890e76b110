use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::verdict::Verdict;
use crate::services::geofence::Coordinates;

/// One recorded check-in attempt. Append-only once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInAttempt {
    /// The unique identifier for the attempt.
    pub id: Uuid,
    /// The session the attempt was made against.
    pub session_id: Uuid,
    /// The student who submitted it.
    pub student_id: Uuid,
    /// Submitted latitude in degrees.
    pub latitude: f64,
    /// Submitted longitude in degrees.
    pub longitude: f64,
    /// Distance from the classroom, rounded to the meter, when it was computed.
    pub distance_meters: Option<i32>,
    /// Opaque device fingerprint, if the client sent one.
    pub device_fingerprint: Option<String>,
    /// The outcome.
    pub verdict: Verdict,
    /// When the attempt was submitted.
    pub submitted_at: DateTime<Utc>,
}

/// The submitted half of an attempt, before a verdict exists.
#[derive(Debug, Clone)]
pub struct AttemptDraft {
    pub session_id: Uuid,
    pub student_id: Uuid,
    pub location: Coordinates,
    pub fingerprint: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl AttemptDraft {
    /// Seals the draft into the record that gets persisted.
    pub fn finish(&self, verdict: Verdict, distance_meters: Option<i32>) -> CheckInAttempt {
        CheckInAttempt {
            id: Uuid::new_v4(),
            session_id: self.session_id,
            student_id: self.student_id,
            latitude: self.location.latitude,
            longitude: self.location.longitude,
            distance_meters,
            device_fingerprint: self.fingerprint.clone(),
            verdict,
            submitted_at: self.submitted_at,
        }
    }
}

/// A prior attempt as seen by the anomaly detector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEntry {
    pub student_id: Uuid,
    pub fingerprint: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl From<&CheckInAttempt> for WindowEntry {
    fn from(attempt: &CheckInAttempt) -> Self {
        Self {
            student_id: attempt.student_id,
            fingerprint: attempt.device_fingerprint.clone(),
            submitted_at: attempt.submitted_at,
        }
    }
}

/// Attempt counts per verdict.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerdictCounts {
    pub success: i64,
    pub gps_fail: i64,
    pub spoofed: i64,
    pub expired_token: i64,
    pub invalid_session: i64,
}

impl VerdictCounts {
    pub fn add(&mut self, verdict: Verdict, count: i64) {
        let slot = match verdict {
            Verdict::Success => &mut self.success,
            Verdict::GpsFail => &mut self.gps_fail,
            Verdict::Spoofed => &mut self.spoofed,
            Verdict::ExpiredToken => &mut self.expired_token,
            Verdict::InvalidSession => &mut self.invalid_session,
        };
        *slot += count;
    }

    pub fn total(&self) -> i64 {
        self.success + self.gps_fail + self.spoofed + self.expired_token + self.invalid_session
    }
}

/// Attendance roll-up for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    /// The session summarized.
    pub session_id: Uuid,
    /// Every recorded attempt, accepted or not.
    pub total_attempts: i64,
    /// Distinct students with at least one accepted attempt.
    pub students_present: i64,
    /// Attempts broken down by verdict.
    pub by_verdict: VerdictCounts,
}
