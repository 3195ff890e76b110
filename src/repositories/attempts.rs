use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::{IsolationLevel, Row};
use uuid::Uuid;

use crate::{
    error::{AppError, Result},
    models::{
        attempt::{AttemptDraft, CheckInAttempt, SessionSummary, VerdictCounts, WindowEntry},
        session::ClassSession,
        verdict::Verdict,
    },
    services::check_in::Assessment,
};

/// Decides an attempt from the session (if it exists) and the prior attempts
/// in the lookback window.
pub type Assess<'a> = dyn Fn(Option<&ClassSession>, &[WindowEntry]) -> Assessment + Send + Sync + 'a;

/// The outcome of [`AttemptLedger::record_attempt`].
#[derive(Debug, Clone)]
pub struct RecordedAttempt {
    pub assessment: Assessment,
    /// `None` when the session does not exist and nothing was written.
    pub attempt: Option<CheckInAttempt>,
}

/// Durable store for sessions (read-only) and check-in attempts (append-only).
#[async_trait]
pub trait AttemptLedger: Send + Sync {
    async fn find_session(&self, session_id: Uuid) -> Result<Option<ClassSession>>;

    /// Looks up the session, reads the prior attempts sharing the draft's
    /// fingerprint within `window`, runs `assess`, and appends the attempt,
    /// all as one unit.
    ///
    /// With `window` of `None` no prior attempts are read and `assess` sees an
    /// empty slice.
    async fn record_attempt(
        &self,
        draft: &AttemptDraft,
        window: Option<chrono::Duration>,
        assess: &Assess<'_>,
    ) -> Result<RecordedAttempt>;

    async fn summarize(&self, session_id: Uuid) -> Result<SessionSummary>;

    /// A student's attempts, newest first.
    async fn history(&self, student_id: Uuid, limit: i64, offset: i64) -> Result<Vec<CheckInAttempt>>;
}

const FIND_SESSION: &str = r#"
    SELECT id, lecturer_id, latitude, longitude, geofence_radius_meters, status, starts_at, ends_at
    FROM class_sessions
    WHERE id = $1
"#;

const LOCK_SESSION: &str = r#"
    SELECT id, lecturer_id, latitude, longitude, geofence_radius_meters, status, starts_at, ends_at
    FROM class_sessions
    WHERE id = $1
    FOR UPDATE
"#;

const RECENT_BY_FINGERPRINT: &str = r#"
    SELECT student_id, device_fingerprint, submitted_at
    FROM check_in_attempts
    WHERE session_id = $1 AND submitted_at >= $2 AND device_fingerprint = $3
"#;

const INSERT_ATTEMPT: &str = r#"
    INSERT INTO check_in_attempts (
        id, session_id, student_id, latitude, longitude,
        distance_meters, device_fingerprint, verdict, submitted_at
    )
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
"#;

const COUNT_BY_VERDICT: &str = r#"
    SELECT verdict, COUNT(*) AS attempts
    FROM check_in_attempts
    WHERE session_id = $1
    GROUP BY verdict
"#;

const COUNT_PRESENT: &str = r#"
    SELECT COUNT(DISTINCT student_id) AS present
    FROM check_in_attempts
    WHERE session_id = $1 AND verdict = 'success'
"#;

const STUDENT_HISTORY: &str = r#"
    SELECT
        id, session_id, student_id, latitude, longitude,
        distance_meters, device_fingerprint, verdict, submitted_at
    FROM check_in_attempts
    WHERE student_id = $1
    ORDER BY submitted_at DESC
    LIMIT $2 OFFSET $3
"#;

fn column<'a, T>(row: &'a Row, name: &str) -> Result<T>
where
    T: tokio_postgres::types::FromSql<'a>,
{
    row.try_get(name).map_err(|_| AppError::MissingData(name.to_string()))
}

fn row_to_session(row: &Row) -> Result<ClassSession> {
    Ok(ClassSession {
        id: column(row, "id")?,
        lecturer_id: column(row, "lecturer_id")?,
        latitude: column(row, "latitude")?,
        longitude: column(row, "longitude")?,
        geofence_radius_meters: column(row, "geofence_radius_meters")?,
        status: column(row, "status")?,
        starts_at: column(row, "starts_at")?,
        ends_at: column(row, "ends_at")?,
    })
}

fn row_to_attempt(row: &Row) -> Result<CheckInAttempt> {
    Ok(CheckInAttempt {
        id: column(row, "id")?,
        session_id: column(row, "session_id")?,
        student_id: column(row, "student_id")?,
        latitude: column(row, "latitude")?,
        longitude: column(row, "longitude")?,
        distance_meters: column(row, "distance_meters")?,
        device_fingerprint: column(row, "device_fingerprint")?,
        verdict: column(row, "verdict")?,
        submitted_at: column(row, "submitted_at")?,
    })
}

fn row_to_window_entry(row: &Row) -> Result<WindowEntry> {
    Ok(WindowEntry {
        student_id: column(row, "student_id")?,
        fingerprint: column(row, "device_fingerprint")?,
        submitted_at: column(row, "submitted_at")?,
    })
}

/// Postgres-backed ledger.
#[derive(Clone)]
pub struct PgAttemptLedger {
    pool: Pool,
    /// Take a row lock on the session so same-session check-ins run one at a time.
    serialize_same_session: bool,
}

impl PgAttemptLedger {
    pub fn new(pool: Pool, serialize_same_session: bool) -> Self {
        Self {
            pool,
            serialize_same_session,
        }
    }
}

#[async_trait]
impl AttemptLedger for PgAttemptLedger {
    async fn find_session(&self, session_id: Uuid) -> Result<Option<ClassSession>> {
        let client = self.pool.get().await?;
        let stmt = client.prepare_cached(FIND_SESSION).await?;
        let row = client.query_opt(&stmt, &[&session_id]).await?;
        row.map(|r| row_to_session(&r)).transpose()
    }

    async fn record_attempt(
        &self,
        draft: &AttemptDraft,
        window: Option<chrono::Duration>,
        assess: &Assess<'_>,
    ) -> Result<RecordedAttempt> {
        let mut client = self.pool.get().await?;

        // Dropping `tx` without commit rolls back.
        let tx = client
            .build_transaction()
            .isolation_level(IsolationLevel::ReadCommitted)
            .start()
            .await
            .map_err(|e| {
                tracing::error!("Database transaction begin failed: {}", e);
                AppError::Database(e)
            })?;

        let lookup = if self.serialize_same_session {
            LOCK_SESSION
        } else {
            FIND_SESSION
        };
        let stmt = tx.prepare_cached(lookup).await?;
        let session = tx
            .query_opt(&stmt, &[&draft.session_id])
            .await?
            .map(|r| row_to_session(&r))
            .transpose()?;

        let prior = match (&session, window, draft.fingerprint.as_deref()) {
            (Some(_), Some(lookback), Some(fingerprint)) => {
                let since = draft.submitted_at - lookback;
                let stmt = tx.prepare_cached(RECENT_BY_FINGERPRINT).await?;
                tx.query(&stmt, &[&draft.session_id, &since, &fingerprint])
                    .await?
                    .iter()
                    .map(row_to_window_entry)
                    .collect::<Result<Vec<_>>>()?
            }
            _ => Vec::new(),
        };

        let assessment = assess(session.as_ref(), &prior);

        if session.is_none() {
            tx.rollback().await?;
            return Ok(RecordedAttempt {
                assessment,
                attempt: None,
            });
        }

        let attempt = draft.finish(assessment.verdict, assessment.distance_meters());
        let stmt = tx.prepare_cached(INSERT_ATTEMPT).await?;
        tx.execute(
            &stmt,
            &[
                &attempt.id,
                &attempt.session_id,
                &attempt.student_id,
                &attempt.latitude,
                &attempt.longitude,
                &attempt.distance_meters,
                &attempt.device_fingerprint,
                &attempt.verdict,
                &attempt.submitted_at,
            ],
        )
        .await
        .map_err(|e| {
            tracing::error!("Failed to insert check-in attempt: {}", e);
            AppError::Database(e)
        })?;

        tx.commit().await?;

        Ok(RecordedAttempt {
            assessment,
            attempt: Some(attempt),
        })
    }

    async fn summarize(&self, session_id: Uuid) -> Result<SessionSummary> {
        let client = self.pool.get().await?;

        let stmt = client.prepare_cached(COUNT_BY_VERDICT).await?;
        let mut by_verdict = VerdictCounts::default();
        for row in client.query(&stmt, &[&session_id]).await? {
            let verdict: Verdict = column(&row, "verdict")?;
            let attempts: i64 = column(&row, "attempts")?;
            by_verdict.add(verdict, attempts);
        }

        let stmt = client.prepare_cached(COUNT_PRESENT).await?;
        let row = client.query_one(&stmt, &[&session_id]).await?;
        let students_present: i64 = column(&row, "present")?;

        Ok(SessionSummary {
            session_id,
            total_attempts: by_verdict.total(),
            students_present,
            by_verdict,
        })
    }

    async fn history(&self, student_id: Uuid, limit: i64, offset: i64) -> Result<Vec<CheckInAttempt>> {
        let client = self.pool.get().await?;
        let stmt = client.prepare_cached(STUDENT_HISTORY).await?;
        client
            .query(&stmt, &[&student_id, &limit, &offset])
            .await?
            .iter()
            .map(row_to_attempt)
            .collect()
    }
}
