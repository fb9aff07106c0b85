use std::fmt;

use serde_json::Value;
use tracing::{debug, info, warn};

use super::state::SyncState;
use crate::catalog::{CatalogRecord, SkippedRecord};
use crate::log_record;
use crate::logging::LogConfig;

/// How a current record relates to the previous state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordStatus {
    /// Identifier absent from the previous state.
    New,
    /// Identifier present with a different fingerprint.
    Changed,
    /// Identifier present with an identical fingerprint.
    Unchanged,
}

impl RecordStatus {
    pub fn needs_republish(self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// What the run has to do downstream of the diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncDecision {
    /// Nothing to republish; no writes at all.
    NoOp,
    /// Some records changed against a non-empty previous state.
    PartialUpdate,
    /// No previous state; every record is published.
    FullPublish,
}

impl fmt::Display for SyncDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::NoOp => "no-op",
            Self::PartialUpdate => "partial-update",
            Self::FullPublish => "full-publish",
        };
        f.write_str(name)
    }
}

/// A current record and its status against the previous state.
#[derive(Debug, Clone)]
pub struct PlanEntry {
    pub record: CatalogRecord,
    pub status: RecordStatus,
}

/// Result of a diff that found nothing suspicious.
#[derive(Debug, Clone)]
pub struct SyncPlan {
    pub decision: SyncDecision,
    /// Every valid current record, in fetch order.
    pub entries: Vec<PlanEntry>,
    /// State reflecting every valid current record.
    pub next_state: SyncState,
    pub skipped: Vec<SkippedRecord>,
    /// Identifiers in the previous state that the fetch no longer returned.
    pub removed: Vec<String>,
}

impl SyncPlan {
    /// Records that must be re-materialized.
    pub fn republish(&self) -> impl Iterator<Item = &PlanEntry> {
        self.entries.iter().filter(|e| e.status.needs_republish())
    }

    /// Every valid current record.
    pub fn records(&self) -> impl Iterator<Item = &CatalogRecord> {
        self.entries.iter().map(|e| &e.record)
    }

    pub fn count(&self, status: RecordStatus) -> usize {
        self.entries.iter().filter(|e| e.status == status).count()
    }

    /// Whether any record needs republishing.
    pub fn has_changes(&self) -> bool {
        self.decision != SyncDecision::NoOp
    }
}

/// A fetch that returned far fewer records than the previous state holds.
#[derive(Debug, Clone, PartialEq)]
pub struct ShrinkReport {
    pub previous: usize,
    pub current: usize,
    pub min_retained_ratio: f64,
}

impl fmt::Display for ShrinkReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "fetch returned {} valid records against {} in previous state (minimum retained ratio {})",
            self.current, self.previous, self.min_retained_ratio
        )
    }
}

/// Outcome of comparing a fetch against the previous state.
#[derive(Debug, Clone)]
pub enum DiffOutcome {
    Proceed(SyncPlan),
    /// The caller decides; nothing has been concluded about deletions.
    SuspiciousShrink(ShrinkReport),
}

/// Threshold below which a shrinking fetch is treated as suspicious.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShrinkGuard {
    min_retained_ratio: f64,
}

impl Default for ShrinkGuard {
    fn default() -> Self {
        Self {
            min_retained_ratio: 0.5,
        }
    }
}

impl ShrinkGuard {
    /// Flags fetches smaller than `ratio` times the previous state size.
    pub fn new(min_retained_ratio: f64) -> Self {
        Self {
            min_retained_ratio: min_retained_ratio.clamp(0.0, 1.0),
        }
    }

    /// Accepts any shrinkage.
    pub fn disabled() -> Self {
        Self {
            min_retained_ratio: 0.0,
        }
    }

    pub fn min_retained_ratio(&self) -> f64 {
        self.min_retained_ratio
    }

    fn check(&self, previous: usize, current: usize) -> Option<ShrinkReport> {
        if previous == 0 || self.min_retained_ratio <= 0.0 {
            return None;
        }
        if (current as f64) < previous as f64 * self.min_retained_ratio {
            Some(ShrinkReport {
                previous,
                current,
                min_retained_ratio: self.min_retained_ratio,
            })
        } else {
            None
        }
    }
}

/// Compares fetched documents against the previous [`SyncState`].
///
/// Pure: no I/O, and it never fails. Malformed documents are set aside as
/// [`SkippedRecord`]s. The input order carries no meaning; the result is the
/// same for any permutation of `fetched`, apart from entry order.
#[derive(Debug, Clone, Default)]
pub struct SyncDiffer {
    guard: ShrinkGuard,
    log_config: LogConfig,
}

impl SyncDiffer {
    pub fn new(guard: ShrinkGuard) -> Self {
        Self {
            guard,
            log_config: LogConfig::default(),
        }
    }

    pub fn with_log_config(mut self, log_config: LogConfig) -> Self {
        self.log_config = log_config;
        self
    }

    pub fn guard(&self) -> ShrinkGuard {
        self.guard
    }

    pub fn diff(&self, fetched: Vec<Value>, previous: &SyncState) -> DiffOutcome {
        let mut entries = Vec::with_capacity(fetched.len());
        let mut skipped = Vec::new();

        for document in fetched {
            match CatalogRecord::from_value(document) {
                Ok(record) => entries.push(record),
                Err(skip) => {
                    log_record!(self.log_config, reason = %skip.reason, id = ?skip.identifier, "Skipping malformed record");
                    skipped.push(skip);
                }
            }
        }

        if let Some(report) = self.guard.check(previous.len(), entries.len()) {
            warn!(
                previous = report.previous,
                current = report.current,
                "Suspiciously small result set"
            );
            return DiffOutcome::SuspiciousShrink(report);
        }

        let mut next_state = SyncState::new();
        let entries: Vec<PlanEntry> = entries
            .into_iter()
            .map(|record| {
                let status = match previous.fingerprint(record.id()) {
                    None => RecordStatus::New,
                    Some(stored) if stored == record.fingerprint() => RecordStatus::Unchanged,
                    Some(_) => RecordStatus::Changed,
                };
                if status.needs_republish() {
                    log_record!(self.log_config, id = %record.id(), status = ?status, "Record needs republish");
                }
                next_state.insert(record.id(), record.fingerprint());
                PlanEntry { record, status }
            })
            .collect();

        let removed: Vec<String> = previous
            .iter()
            .filter(|(id, _)| !next_state.contains(id))
            .map(|(id, _)| id.clone())
            .collect();

        let changes = entries.iter().filter(|e| e.status.needs_republish()).count();
        let decision = if changes == 0 {
            SyncDecision::NoOp
        } else if previous.is_empty() {
            SyncDecision::FullPublish
        } else {
            SyncDecision::PartialUpdate
        };

        if !skipped.is_empty() {
            warn!(skipped = skipped.len(), "Skipped malformed records");
        }
        if !removed.is_empty() {
            debug!(removed = removed.len(), "Identifiers dropped from state");
        }
        info!(
            records = entries.len(),
            changed = changes,
            removed = removed.len(),
            decision = %decision,
            "Diff complete"
        );

        DiffOutcome::Proceed(SyncPlan {
            decision,
            entries,
            next_state,
            skipped,
            removed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(id: &str, ts: &str) -> Value {
        json!({"_id": id, "uploaded_at": ts})
    }

    fn plan(outcome: DiffOutcome) -> SyncPlan {
        match outcome {
            DiffOutcome::Proceed(plan) => plan,
            DiffOutcome::SuspiciousShrink(report) => panic!("unexpected shrink: {report}"),
        }
    }

    #[test]
    fn test_new_record_alongside_unchanged() {
        let previous: SyncState = [("img1", "2024-01-01T00:00:00Z")].into_iter().collect();
        let fetched = vec![
            doc("img1", "2024-01-01T00:00:00Z"),
            doc("img2", "2024-02-01T00:00:00Z"),
        ];

        let plan = plan(SyncDiffer::default().diff(fetched, &previous));

        let republished: Vec<&str> = plan.republish().map(|e| e.record.id()).collect();
        assert_eq!(republished, vec!["img2"]);
        assert_eq!(plan.decision, SyncDecision::PartialUpdate);
        assert_eq!(
            plan.next_state,
            [("img1", "2024-01-01T00:00:00Z"), ("img2", "2024-02-01T00:00:00Z")]
                .into_iter()
                .collect()
        );
    }

    #[test]
    fn test_changed_fingerprint_is_republished() {
        let previous: SyncState = [("img1", "2024-01-01")].into_iter().collect();
        let plan = plan(SyncDiffer::default().diff(vec![doc("img1", "2024-03-01")], &previous));

        assert_eq!(plan.count(RecordStatus::Changed), 1);
        assert_eq!(plan.next_state.fingerprint("img1"), Some("2024-03-01"));
    }

    #[test]
    fn test_identical_fetch_is_noop() {
        let previous: SyncState = [("a", "t1"), ("b", "t2")].into_iter().collect();
        let plan = plan(
            SyncDiffer::default().diff(vec![doc("b", "t2"), doc("a", "t1")], &previous),
        );

        assert_eq!(plan.decision, SyncDecision::NoOp);
        assert!(!plan.has_changes());
        assert_eq!(plan.republish().count(), 0);
    }

    #[test]
    fn test_first_run_is_full_publish() {
        let plan = plan(
            SyncDiffer::default().diff(vec![doc("a", "t1"), doc("b", "t2")], &SyncState::new()),
        );
        assert_eq!(plan.decision, SyncDecision::FullPublish);
        assert_eq!(plan.count(RecordStatus::New), 2);
    }

    #[test]
    fn test_missing_identifiers_are_dropped_from_state() {
        let previous: SyncState = [("a", "t1"), ("b", "t2"), ("c", "t3")].into_iter().collect();
        let plan = plan(
            SyncDiffer::default().diff(vec![doc("a", "t1"), doc("b", "t2-new")], &previous),
        );

        assert_eq!(plan.removed, vec!["c".to_string()]);
        assert!(!plan.next_state.contains("c"));
        assert_eq!(plan.decision, SyncDecision::PartialUpdate);
    }

    #[test]
    fn test_malformed_records_are_skipped_not_fatal() {
        let fetched = vec![
            doc("a", "t1"),
            json!({"uploaded_at": "t2"}),
            json!({"_id": "c"}),
        ];
        let plan = plan(SyncDiffer::default().diff(fetched, &SyncState::new()));

        assert_eq!(plan.entries.len(), 1);
        assert_eq!(plan.skipped.len(), 2);
        assert_eq!(plan.next_state.len(), 1);
    }

    #[test]
    fn test_truncated_fetch_is_suspicious() {
        let previous: SyncState = (0..100).map(|i| (format!("img{i}"), "t")).collect();
        let fetched = (0..10).map(|i| doc(&format!("img{i}"), "t")).collect();

        match SyncDiffer::default().diff(fetched, &previous) {
            DiffOutcome::SuspiciousShrink(report) => {
                assert_eq!(report.previous, 100);
                assert_eq!(report.current, 10);
            }
            DiffOutcome::Proceed(_) => panic!("expected shrink signal"),
        }
    }

    #[test]
    fn test_disabled_guard_accepts_shrink() {
        let previous: SyncState = (0..100).map(|i| (format!("img{i}"), "t")).collect();
        let plan = plan(
            SyncDiffer::new(ShrinkGuard::disabled()).diff(vec![doc("img0", "t")], &previous),
        );
        assert_eq!(plan.removed.len(), 99);
        assert_eq!(plan.decision, SyncDecision::NoOp);
    }

    #[test]
    fn test_moderate_shrink_proceeds() {
        let previous: SyncState = (0..10).map(|i| (format!("img{i}"), "t")).collect();
        let fetched = (0..6).map(|i| doc(&format!("img{i}"), "t")).collect();
        assert!(matches!(
            SyncDiffer::default().diff(fetched, &previous),
            DiffOutcome::Proceed(_)
        ));
    }
}
