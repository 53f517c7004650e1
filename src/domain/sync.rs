//! Sync phase state and the reports produced by each sync operation.

use std::collections::BTreeMap;

use serde::Serialize;

use super::models::MirrorTable;
use super::outbox::Family;

/// The engine's phase. At most one non-idle phase is active at a time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum SyncPhase {
    #[default]
    Idle,
    SyncingUp,
    SyncingDown,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::SyncingUp => write!(f, "syncing up"),
            Self::SyncingDown => write!(f, "syncing down"),
        }
    }
}

/// Why a sync operation did not run. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// The local store failed to initialize.
    StoreInactive,
    /// Another phase holds the engine.
    Busy(SyncPhase),
    /// The connectivity oracle reported offline.
    Offline,
    /// A bare Sync-Down would overwrite a mirror with undrained local writes.
    PendingOutbox(usize),
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StoreInactive => write!(f, "local store inactive"),
            Self::Busy(phase) => write!(f, "engine busy ({phase})"),
            Self::Offline => write!(f, "offline"),
            Self::PendingOutbox(n) => write!(f, "{n} outbox entries pending"),
        }
    }
}

/// Result of a sync operation that may have been skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Outcome<T> {
    Skipped(SkipReason),
    Done(T),
}

impl<T> Outcome<T> {
    #[must_use]
    pub const fn is_done(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    /// The report, if the operation ran.
    pub fn done(self) -> Option<T> {
        match self {
            Self::Done(t) => Some(t),
            Self::Skipped(_) => None,
        }
    }
}

/// Per-family counters for one Sync-Up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FamilyReport {
    /// Entries acknowledged by the remote and removed locally.
    pub applied: usize,
    /// Entries whose dispatch or removal failed; still pending.
    pub failed: usize,
}

/// Report of one Sync-Up.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpReport {
    pub families: BTreeMap<String, FamilyReport>,
}

impl UpReport {
    pub(crate) fn record(&mut self, family: Family, report: FamilyReport) {
        self.families.insert(family.to_string(), report);
    }

    /// Counters for one family.
    #[must_use]
    pub fn family(&self, family: Family) -> FamilyReport {
        self.families
            .get(&family.to_string())
            .copied()
            .unwrap_or_default()
    }

    #[must_use]
    pub fn applied(&self) -> usize {
        self.families.values().map(|r| r.applied).sum()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.families.values().map(|r| r.failed).sum()
    }
}

/// Report of one Sync-Down: rows written per mirrored table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DownReport {
    pub rows: BTreeMap<String, usize>,
}

impl DownReport {
    pub(crate) fn record(&mut self, table: MirrorTable, rows: usize) {
        self.rows.insert(table.to_string(), rows);
    }

    #[must_use]
    pub fn total_rows(&self) -> usize {
        self.rows.values().sum()
    }
}

/// Report of a Full-Sync. Phase errors are captured here instead of returned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FullSyncReport {
    pub up: Option<UpReport>,
    pub down: Option<DownReport>,
    pub skipped: Option<SkipReason>,
    pub errors: Vec<String>,
}

impl FullSyncReport {
    pub(crate) const fn skipped(reason: SkipReason) -> Self {
        Self {
            up: None,
            down: None,
            skipped: Some(reason),
            errors: Vec::new(),
        }
    }

    /// Both phases ran, every entry was applied and nothing failed.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.errors.is_empty()
            && self.down.is_some()
            && self.up.as_ref().is_some_and(|u| u.failed() == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_up_report_totals() {
        let mut report = UpReport::default();
        report.record(
            Family::Clients,
            FamilyReport {
                applied: 2,
                failed: 1,
            },
        );
        report.record(
            Family::Orders,
            FamilyReport {
                applied: 3,
                failed: 0,
            },
        );

        assert_eq!(report.applied(), 5);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.family(Family::Quotes), FamilyReport::default());
    }

    #[test]
    fn test_full_report_completeness() {
        let mut report = FullSyncReport::skipped(SkipReason::Offline);
        assert!(!report.is_complete());

        report.skipped = None;
        report.up = Some(UpReport::default());
        report.down = Some(DownReport::default());
        assert!(report.is_complete());

        report.errors.push("fetch failed".into());
        assert!(!report.is_complete());
    }

    #[test]
    fn test_skip_reason_display() {
        assert_eq!(
            SkipReason::Busy(SyncPhase::SyncingDown).to_string(),
            "engine busy (syncing down)"
        );
        assert_eq!(
            SkipReason::PendingOutbox(3).to_string(),
            "3 outbox entries pending"
        );
    }
}
