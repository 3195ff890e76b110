use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

use super::attempts::{Assess, AttemptLedger, RecordedAttempt};
use crate::error::Result;
use crate::models::attempt::{
    AttemptDraft, CheckInAttempt, SessionSummary, VerdictCounts, WindowEntry,
};
use crate::models::session::ClassSession;
use crate::models::verdict::Verdict;

/// In-process ledger for single-instance runs and tests.
///
/// Each session has its own lock, so same-session check-ins are serialized
/// while different sessions proceed independently. A lock lives only while a
/// check-in for its session is in flight.
#[derive(Clone, Default)]
pub struct MemoryAttemptLedger {
    sessions: Arc<RwLock<HashMap<Uuid, ClassSession>>>,
    attempts: Arc<RwLock<Vec<CheckInAttempt>>>,
    locks: Arc<Mutex<HashMap<Uuid, Arc<Mutex<()>>>>>,
}

impl MemoryAttemptLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a session.
    pub async fn insert_session(&self, session: ClassSession) {
        self.sessions.write().await.insert(session.id, session);
    }

    /// Every recorded attempt for `session_id`, oldest first.
    pub async fn attempts_for(&self, session_id: Uuid) -> Vec<CheckInAttempt> {
        self.attempts
            .read()
            .await
            .iter()
            .filter(|a| a.session_id == session_id)
            .cloned()
            .collect()
    }

    async fn session_lock(&self, session_id: Uuid) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(session_id).or_default().clone()
    }

    /// Forgets the session's lock once no other check-in holds or awaits it.
    async fn release_lock(&self, session_id: Uuid, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock().await;
        drop(lock);
        if locks
            .get(&session_id)
            .is_some_and(|held| Arc::strong_count(held) == 1)
        {
            locks.remove(&session_id);
        }
    }

    /// Body of `record_attempt`; the caller holds the session lock.
    async fn record_locked(
        &self,
        draft: &AttemptDraft,
        window: Option<chrono::Duration>,
        assess: &Assess<'_>,
    ) -> Result<RecordedAttempt> {
        let session = self.find_session(draft.session_id).await?;

        let prior: Vec<WindowEntry> = match (&session, window, draft.fingerprint.as_deref()) {
            (Some(_), Some(lookback), Some(fingerprint)) => {
                let since = draft.submitted_at - lookback;
                self.attempts
                    .read()
                    .await
                    .iter()
                    .filter(|a| a.session_id == draft.session_id)
                    .filter(|a| a.submitted_at >= since)
                    .filter(|a| a.device_fingerprint.as_deref() == Some(fingerprint))
                    .map(WindowEntry::from)
                    .collect()
            }
            _ => Vec::new(),
        };

        let assessment = assess(session.as_ref(), &prior);

        if session.is_none() {
            return Ok(RecordedAttempt {
                assessment,
                attempt: None,
            });
        }

        let attempt = draft.finish(assessment.verdict, assessment.distance_meters());
        self.attempts.write().await.push(attempt.clone());

        Ok(RecordedAttempt {
            assessment,
            attempt: Some(attempt),
        })
    }
}

#[async_trait]
impl AttemptLedger for MemoryAttemptLedger {
    async fn find_session(&self, session_id: Uuid) -> Result<Option<ClassSession>> {
        Ok(self.sessions.read().await.get(&session_id).cloned())
    }

    async fn record_attempt(
        &self,
        draft: &AttemptDraft,
        window: Option<chrono::Duration>,
        assess: &Assess<'_>,
    ) -> Result<RecordedAttempt> {
        let lock = self.session_lock(draft.session_id).await;
        let recorded = {
            let _guard = lock.lock().await;
            self.record_locked(draft, window, assess).await
        };
        self.release_lock(draft.session_id, lock).await;
        recorded
    }

    async fn summarize(&self, session_id: Uuid) -> Result<SessionSummary> {
        let attempts = self.attempts.read().await;
        let mut by_verdict = VerdictCounts::default();
        let mut present = HashSet::new();

        for attempt in attempts.iter().filter(|a| a.session_id == session_id) {
            by_verdict.add(attempt.verdict, 1);
            if attempt.verdict == Verdict::Success {
                present.insert(attempt.student_id);
            }
        }

        Ok(SessionSummary {
            session_id,
            total_attempts: by_verdict.total(),
            students_present: present.len() as i64,
            by_verdict,
        })
    }

    async fn history(&self, student_id: Uuid, limit: i64, offset: i64) -> Result<Vec<CheckInAttempt>> {
        let attempts = self.attempts.read().await;
        let mut mine: Vec<CheckInAttempt> = attempts
            .iter()
            .filter(|a| a.student_id == student_id)
            .cloned()
            .collect();
        mine.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));

        Ok(mine
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::session::SessionStatus;
    use crate::models::verdict::Rejection;
    use crate::services::check_in::Assessment;
    use crate::services::geofence::Coordinates;
    use chrono::{DateTime, Duration, Utc};

    fn at(seconds: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000 + seconds, 0).unwrap()
    }

    fn session() -> ClassSession {
        ClassSession {
            id: Uuid::new_v4(),
            lecturer_id: Uuid::new_v4(),
            latitude: 0.0,
            longitude: 0.0,
            geofence_radius_meters: None,
            status: SessionStatus::Active,
            starts_at: at(0),
            ends_at: None,
        }
    }

    fn draft(session_id: Uuid, student_id: Uuid, fingerprint: &str, seconds: i64) -> AttemptDraft {
        AttemptDraft {
            session_id,
            student_id,
            location: Coordinates::new(0.0, 0.0),
            fingerprint: Some(fingerprint.to_string()),
            submitted_at: at(seconds),
        }
    }

    fn verdict_only(verdict: Verdict) -> impl Fn(Option<&ClassSession>, &[WindowEntry]) -> Assessment {
        move |_, _| Assessment {
            verdict,
            ..Assessment::rejected(Rejection::InvalidSession)
        }
    }

    #[tokio::test]
    async fn unknown_session_records_nothing() {
        let ledger = MemoryAttemptLedger::new();
        let missing = Uuid::new_v4();
        let recorded = ledger
            .record_attempt(
                &draft(missing, Uuid::new_v4(), "fp", 10),
                None,
                &|session: Option<&ClassSession>, _: &[WindowEntry]| {
                    assert!(session.is_none());
                    Assessment::rejected(Rejection::InvalidSession)
                },
            )
            .await
            .unwrap();

        assert!(recorded.attempt.is_none());
        assert!(ledger.attempts_for(missing).await.is_empty());
    }

    #[tokio::test]
    async fn window_is_limited_to_lookback_and_fingerprint() {
        let ledger = MemoryAttemptLedger::new();
        let session = session();
        ledger.insert_session(session.clone()).await;

        let success = verdict_only(Verdict::Success);
        ledger
            .record_attempt(&draft(session.id, Uuid::new_v4(), "fp-old", 0), None, &success)
            .await
            .unwrap();
        ledger
            .record_attempt(&draft(session.id, Uuid::new_v4(), "fp-1", 4_000), None, &success)
            .await
            .unwrap();
        ledger
            .record_attempt(&draft(session.id, Uuid::new_v4(), "fp-2", 4_100), None, &success)
            .await
            .unwrap();

        let seen = std::sync::Mutex::new(Vec::new());
        ledger
            .record_attempt(
                &draft(session.id, Uuid::new_v4(), "fp-1", 4_200),
                Some(Duration::hours(1)),
                &|_: Option<&ClassSession>, window: &[WindowEntry]| {
                    seen.lock().unwrap().extend_from_slice(window);
                    Assessment {
                        verdict: Verdict::Success,
                        ..Assessment::rejected(Rejection::InvalidSession)
                    }
                },
            )
            .await
            .unwrap();

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].fingerprint.as_deref(), Some("fp-1"));
    }

    #[tokio::test]
    async fn session_locks_are_released() {
        let ledger = MemoryAttemptLedger::new();
        let session = session();
        ledger.insert_session(session.clone()).await;

        let mut handles = Vec::new();
        for i in 0..10 {
            let ledger = ledger.clone();
            let draft = draft(session.id, Uuid::new_v4(), "fp", i);
            handles.push(tokio::spawn(async move {
                ledger
                    .record_attempt(&draft, None, &verdict_only(Verdict::Success))
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let unknown = draft(Uuid::new_v4(), Uuid::new_v4(), "fp", 20);
        ledger
            .record_attempt(&unknown, None, &verdict_only(Verdict::InvalidSession))
            .await
            .unwrap();

        assert_eq!(ledger.attempts_for(session.id).await.len(), 10);
        assert!(ledger.locks.lock().await.is_empty());
    }

    #[tokio::test]
    async fn summary_and_history() {
        let ledger = MemoryAttemptLedger::new();
        let session = session();
        ledger.insert_session(session.clone()).await;
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();

        for (student, verdict, seconds) in [
            (alice, Verdict::ExpiredToken, 10),
            (alice, Verdict::Success, 20),
            (alice, Verdict::Success, 30),
            (bob, Verdict::GpsFail, 40),
        ] {
            ledger
                .record_attempt(&draft(session.id, student, "fp", seconds), None, &verdict_only(verdict))
                .await
                .unwrap();
        }

        let summary = ledger.summarize(session.id).await.unwrap();
        assert_eq!(summary.total_attempts, 4);
        assert_eq!(summary.students_present, 1);
        assert_eq!(summary.by_verdict.success, 2);
        assert_eq!(summary.by_verdict.gps_fail, 1);

        let history = ledger.history(alice, 2, 0).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].submitted_at, at(30));
        assert_eq!(history[1].submitted_at, at(20));

        let rest = ledger.history(alice, 2, 2).await.unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].verdict, Verdict::ExpiredToken);
    }
}
