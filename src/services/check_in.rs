use garde::Validate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::{AnomalyPolicy, PresenceConfig};
use crate::error::{AppError, Result};
use crate::models::attempt::{AttemptDraft, WindowEntry};
use crate::models::session::ClassSession;
use crate::models::verdict::{Rejection, Verdict};
use crate::repositories::attempts::{AttemptLedger, RecordedAttempt};
use crate::services::anomaly::{self, AnomalyReport};
use crate::services::geofence::{self, Coordinates, GeofenceOutcome};
use crate::services::tokens::{TokenService, ValidatedToken};
use crate::validation::check_in::normalize_fingerprint;

/// A student's check-in submission.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CheckInRequest {
    #[garde(length(max = 64))]
    pub session_id: String,
    #[garde(length(min = 1, max = 256))]
    pub presented_token: String,
    #[garde(skip)]
    pub latitude: f64,
    #[garde(skip)]
    pub longitude: f64,
    #[garde(skip)]
    #[serde(default)]
    pub fingerprint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnomalySummary {
    pub suspicious: bool,
    pub student_count: usize,
}

/// What the student sees after a check-in.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInResponse {
    pub success: bool,
    pub verdict: Verdict,
    pub distance_meters: Option<i32>,
    pub anomaly: AnomalySummary,
    pub reason: String,
    /// Absent when nothing was recorded.
    pub attempt_id: Option<Uuid>,
}

impl From<RecordedAttempt> for CheckInResponse {
    fn from(recorded: RecordedAttempt) -> Self {
        let assessment = recorded.assessment;
        Self {
            success: assessment.verdict.is_success(),
            verdict: assessment.verdict,
            distance_meters: assessment.distance_meters(),
            anomaly: AnomalySummary {
                suspicious: assessment.anomaly.suspicious,
                student_count: assessment.anomaly.student_count,
            },
            reason: assessment.reason,
            attempt_id: recorded.attempt.map(|a| a.id),
        }
    }
}

/// Everything decided about one attempt.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    pub verdict: Verdict,
    /// Present only when the geofence check ran.
    pub geofence: Option<GeofenceOutcome>,
    pub anomaly: AnomalyReport,
    pub reason: String,
}

impl Assessment {
    pub fn rejected(rejection: Rejection) -> Self {
        Self {
            verdict: rejection.verdict(),
            geofence: None,
            anomaly: AnomalyReport::clear(),
            reason: rejection.public_reason().to_string(),
        }
    }

    pub fn distance_meters(&self) -> Option<i32> {
        self.geofence.as_ref().and_then(GeofenceOutcome::rounded_distance)
    }
}

/// Settings the verdict depends on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerdictRules {
    pub default_radius_meters: f64,
    pub anomaly_policy: AnomalyPolicy,
}

impl From<&PresenceConfig> for VerdictRules {
    fn from(config: &PresenceConfig) -> Self {
        Self {
            default_radius_meters: config.default_geofence_radius_meters,
            anomaly_policy: config.anomaly_policy,
        }
    }
}

/// Derives the verdict for one attempt. Pure; runs inside the ledger transaction.
///
/// `window` holds prior attempts on the same session within the lookback
/// period, before this one is written.
pub fn assess(
    token: &std::result::Result<ValidatedToken, Rejection>,
    session: Option<&ClassSession>,
    draft: &AttemptDraft,
    window: &[WindowEntry],
    rules: &VerdictRules,
) -> Assessment {
    let Some(session) = session else {
        return Assessment::rejected(Rejection::InvalidSession);
    };

    if let Err(rejection) = token {
        return Assessment::rejected(*rejection);
    }

    if !session.accepts_check_ins(draft.submitted_at) {
        return Assessment::rejected(Rejection::InvalidSession);
    }

    let geofence = geofence::validate(
        draft.location,
        session.location(),
        session.radius_or(rules.default_radius_meters),
    );
    let anomaly = anomaly::detect(draft.fingerprint.as_deref(), draft.student_id, window);

    let mut failures = Vec::with_capacity(2);
    if !geofence.valid {
        failures.push(Verdict::GpsFail);
    }
    if anomaly.suspicious && rules.anomaly_policy == AnomalyPolicy::Reject {
        failures.push(Verdict::Spoofed);
    }
    let verdict = Verdict::resolve(failures);

    let reason = match verdict {
        Verdict::Spoofed => anomaly.message(),
        Verdict::GpsFail => geofence
            .reason
            .clone()
            .unwrap_or_else(|| Rejection::GeofenceViolation.public_reason().to_string()),
        _ if anomaly.suspicious => {
            format!("Check-in recorded, flagged for review: {}", anomaly.message())
        }
        _ => "Check-in recorded".to_string(),
    };

    Assessment {
        verdict,
        geofence: Some(geofence),
        anomaly,
        reason,
    }
}

/// Runs a check-in end to end: token, session, geofence, anomaly, record.
pub struct CheckInCoordinator {
    tokens: Arc<TokenService>,
    ledger: Arc<dyn AttemptLedger>,
    clock: Arc<dyn Clock>,
    rules: VerdictRules,
    lookback: chrono::Duration,
}

impl CheckInCoordinator {
    pub fn new(
        config: &PresenceConfig,
        tokens: Arc<TokenService>,
        ledger: Arc<dyn AttemptLedger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            tokens,
            ledger,
            clock,
            rules: VerdictRules::from(config),
            lookback: config.lookback(),
        }
    }

    /// Verifies and records one submission from `student_id`.
    ///
    /// Every outcome except an unknown or malformed session is persisted.
    /// Cache and database faults are returned as errors and record nothing.
    pub async fn check_in(&self, student_id: Uuid, request: CheckInRequest) -> Result<CheckInResponse> {
        request.validate()?;
        let fingerprint = normalize_fingerprint(request.fingerprint)?;

        let Ok(session_id) = Uuid::parse_str(request.session_id.trim()) else {
            tracing::warn!("❌ Malformed session id from student {}", student_id);
            return Ok(RecordedAttempt {
                assessment: Assessment::rejected(Rejection::InvalidSession),
                attempt: None,
            }
            .into());
        };

        let submitted_at = self.clock.now();

        let token = match self.tokens.validate(session_id, &request.presented_token).await {
            Ok(validated) => Ok(validated),
            Err(AppError::Rejected(rejection)) => Err(rejection),
            Err(e) => {
                if e.is_transient() {
                    tracing::error!("❌ Token cache unavailable for session {}: {}", session_id, e);
                } else {
                    tracing::error!("❌ Token validation failed for session {}: {}", session_id, e);
                }
                return Err(e);
            }
        };

        let draft = AttemptDraft {
            session_id,
            student_id,
            location: Coordinates::new(request.latitude, request.longitude),
            fingerprint,
            submitted_at,
        };

        // Prior attempts only matter when the anomaly check can run.
        let window = match (&token, &draft.fingerprint) {
            (Ok(_), Some(_)) => Some(self.lookback),
            _ => None,
        };

        let decide = |session: Option<&ClassSession>, window: &[WindowEntry]| {
            assess(&token, session, &draft, window, &self.rules)
        };

        let recorded = self
            .ledger
            .record_attempt(&draft, window, &decide)
            .await
            .inspect_err(|e| {
                if e.is_transient() {
                    tracing::error!(
                        "❌ Check-in for session {} not recorded, store unavailable: {}",
                        session_id,
                        e
                    );
                }
            })?;
        let verdict = recorded.assessment.verdict;

        match (&recorded.attempt, verdict) {
            (None, _) => {
                tracing::warn!("❌ Check-in for unknown session {} by {}", session_id, student_id)
            }
            (Some(attempt), Verdict::Success) => tracing::info!(
                "✅ Check-in {} recorded for student {} in session {}",
                attempt.id,
                student_id,
                session_id
            ),
            (Some(attempt), _) => tracing::warn!(
                "❌ Check-in {} rejected as {} for student {} in session {}",
                attempt.id,
                verdict,
                student_id,
                session_id
            ),
        }

        if recorded.assessment.anomaly.suspicious {
            tracing::warn!(
                "⚠️  Fingerprint reuse in session {}: {} other student(s)",
                session_id,
                recorded.assessment.anomaly.student_count
            );
        }

        Ok(recorded.into())
    }
}
