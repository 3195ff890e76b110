//! Device fingerprint reuse detection.
//!
//! A fingerprint is an opaque, client-built string meant to be stable per
//! physical device. When the same fingerprint shows up under more than one
//! student inside the lookback window, the device is probably checking in on
//! someone else's behalf. Shared kiosks produce the same signal, so this is a
//! flag for review, not proof.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::attempt::WindowEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    High,
}

/// What the detector concluded about one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnomalyReport {
    /// Whether another student already used this fingerprint in the window.
    pub suspicious: bool,
    /// Distinct *other* students seen with the same fingerprint.
    pub student_count: usize,
    pub severity: Severity,
}

impl AnomalyReport {
    /// The report for an attempt that was never checked.
    pub fn clear() -> Self {
        Self {
            suspicious: false,
            student_count: 0,
            severity: Severity::Low,
        }
    }

    pub fn message(&self) -> String {
        if self.suspicious {
            format!(
                "Fingerprint already used by {} other student(s) in this session",
                self.student_count
            )
        } else {
            "No anomalies detected".to_string()
        }
    }
}

/// Looks for `candidate` among `window` under identities other than `student_id`.
///
/// `window` must already be restricted to the session and the lookback period.
/// An absent or blank fingerprint disables the check.
pub fn detect(candidate: Option<&str>, student_id: Uuid, window: &[WindowEntry]) -> AnomalyReport {
    let Some(candidate) = candidate.map(str::trim).filter(|f| !f.is_empty()) else {
        return AnomalyReport::clear();
    };

    let others: HashSet<Uuid> = window
        .iter()
        .filter(|entry| entry.fingerprint.as_deref().map(str::trim) == Some(candidate))
        .map(|entry| entry.student_id)
        .filter(|id| *id != student_id)
        .collect();

    let suspicious = !others.is_empty();

    AnomalyReport {
        suspicious,
        student_count: others.len(),
        severity: if suspicious { Severity::High } else { Severity::Low },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn entry(student_id: Uuid, fingerprint: &str) -> WindowEntry {
        WindowEntry {
            student_id,
            fingerprint: Some(fingerprint.to_string()),
            submitted_at: Utc::now(),
        }
    }

    #[test]
    fn self_reuse_is_not_anomalous() {
        let alice = Uuid::new_v4();
        let window = vec![entry(alice, "fp-1"), entry(alice, "fp-1")];

        let report = detect(Some("fp-1"), alice, &window);
        assert!(!report.suspicious);
        assert_eq!(report.student_count, 0);
        assert_eq!(report.severity, Severity::Low);
    }

    #[test]
    fn cross_identity_reuse_is_flagged() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let window = vec![entry(alice, "fp-1")];

        let report = detect(Some("fp-1"), bob, &window);
        assert!(report.suspicious);
        assert_eq!(report.student_count, 1);
        assert_eq!(report.severity, Severity::High);
    }

    #[test]
    fn counts_distinct_students_only() {
        let alice = Uuid::new_v4();
        let bob = Uuid::new_v4();
        let carol = Uuid::new_v4();
        let window = vec![
            entry(alice, "fp-1"),
            entry(alice, "fp-1"),
            entry(bob, "fp-1"),
            entry(carol, "fp-2"),
            entry(carol, "fp-1"),
        ];

        let report = detect(Some("fp-1"), carol, &window);
        assert_eq!(report.student_count, 2);
    }

    #[test]
    fn different_fingerprints_do_not_match() {
        let window = vec![entry(Uuid::new_v4(), "fp-1")];
        assert!(!detect(Some("fp-2"), Uuid::new_v4(), &window).suspicious);
    }

    #[test]
    fn missing_fingerprint_is_a_no_op() {
        let window = vec![WindowEntry {
            student_id: Uuid::new_v4(),
            fingerprint: None,
            submitted_at: Utc::now(),
        }];

        assert_eq!(detect(None, Uuid::new_v4(), &window), AnomalyReport::clear());
        assert_eq!(detect(Some("   "), Uuid::new_v4(), &window), AnomalyReport::clear());
    }
}
