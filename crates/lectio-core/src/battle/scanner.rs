//! Health scan: classify family records against the issue taxonomy.
//!
//! Classification is a pure function of a record's shape and never
//! mutates anything. Each issue carries the pre-computed detail the
//! repair engine needs, so repairing requires no further reads.

use serde::{Deserialize, Serialize};

use super::{BattleHistory, BattleState, FamilyRecord, LegacyHistory};
use crate::bulk::{self, UnitError};
use crate::error::Result;
use crate::storage::Store;

/// How urgent an issue is to repair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
}

/// Issue kinds, in repair-union order. The repair engine applies
/// per-issue patches in exactly this order, so later fixes may
/// overwrite fields set by earlier ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IssueKind {
    DualStructure,
    InconsistentState,
    MissingHistory,
    InvalidMath,
    OrphanedData,
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            IssueKind::DualStructure => "DUAL_STRUCTURE",
            IssueKind::InconsistentState => "INCONSISTENT_STATE",
            IssueKind::MissingHistory => "MISSING_HISTORY",
            IssueKind::InvalidMath => "INVALID_MATH",
            IssueKind::OrphanedData => "ORPHANED_DATA",
        };
        f.write_str(name)
    }
}

/// The four battle counters in a generation-neutral shape, used in
/// issue payloads so both history generations compare directly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counters {
    pub total: u32,
    pub children_wins: u32,
    pub parent_wins: u32,
    pub ties: u32,
}

impl From<&LegacyHistory> for Counters {
    fn from(legacy: &LegacyHistory) -> Self {
        Self {
            total: legacy.battles,
            children_wins: legacy.children_wins,
            parent_wins: legacy.parent_wins,
            ties: legacy.ties,
        }
    }
}

impl From<&BattleHistory> for Counters {
    fn from(history: &BattleHistory) -> Self {
        Self {
            total: history.total_battles,
            children_wins: history.children_wins,
            parent_wins: history.parent_wins,
            ties: history.ties,
        }
    }
}

/// One classified issue with the detail repair needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Issue {
    /// Both the legacy and current structures are present.
    DualStructure { legacy: Counters, current: Counters },
    /// `enabled = false` contradicts live battle data.
    InconsistentState {
        has_current_week: bool,
        has_completed_week: bool,
        week_activity: bool,
        history_data: bool,
    },
    /// `enabled = true` but no history sub-structure exists.
    MissingHistory,
    /// `total_battles` disagrees with the sum of the win/tie counters.
    InvalidMath { total_battles: u32, expected: u32 },
    /// Legacy history exists but no current structure at all.
    OrphanedData { legacy: Counters },
}

impl Issue {
    pub fn kind(&self) -> IssueKind {
        match self {
            Issue::DualStructure { .. } => IssueKind::DualStructure,
            Issue::InconsistentState { .. } => IssueKind::InconsistentState,
            Issue::MissingHistory => IssueKind::MissingHistory,
            Issue::InvalidMath { .. } => IssueKind::InvalidMath,
            Issue::OrphanedData { .. } => IssueKind::OrphanedData,
        }
    }

    pub fn severity(&self) -> Severity {
        match self.kind() {
            IssueKind::DualStructure | IssueKind::MissingHistory => Severity::High,
            IssueKind::InconsistentState | IssueKind::InvalidMath => Severity::Medium,
            IssueKind::OrphanedData => Severity::Low,
        }
    }
}

/// Classify one family record. Returns issues in repair-union order;
/// a healthy record returns an empty list.
pub fn scan_record(record: &FamilyRecord) -> Vec<Issue> {
    let mut issues = Vec::new();

    match record.battle_state() {
        BattleState::Neither => return issues,
        BattleState::Legacy(legacy) => {
            issues.push(Issue::OrphanedData {
                legacy: legacy.into(),
            });
            return issues;
        }
        BattleState::Both(battle, legacy) => {
            let current = battle
                .history
                .as_ref()
                .map(Counters::from)
                .unwrap_or_default();
            issues.push(Issue::DualStructure {
                legacy: legacy.into(),
                current,
            });
            push_current_issues(battle, &mut issues);
        }
        BattleState::Current(battle) => {
            push_current_issues(battle, &mut issues);
        }
    }

    issues
}

fn push_current_issues(battle: &super::FamilyBattle, issues: &mut Vec<Issue>) {
    let has_current_week = battle.current_week.is_some();
    let has_completed_week = battle.completed_week.is_some();

    if !battle.enabled && (has_current_week || has_completed_week) {
        let week_activity = battle
            .current_week
            .as_ref()
            .is_some_and(super::WeekBattle::has_activity)
            || battle
                .completed_week
                .as_ref()
                .is_some_and(super::WeekBattle::has_activity);
        issues.push(Issue::InconsistentState {
            has_current_week,
            has_completed_week,
            week_activity,
            history_data: battle.history.as_ref().is_some_and(BattleHistory::has_data),
        });
    }

    if battle.enabled && battle.history.is_none() {
        issues.push(Issue::MissingHistory);
    }

    if let Some(history) = &battle.history {
        if history.total_battles != history.wins_sum() {
            issues.push(Issue::InvalidMath {
                total_battles: history.total_battles,
                expected: history.wins_sum(),
            });
        }
    }
}

/// Issue report for one family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FamilyIssueReport {
    pub family_id: String,
    pub family_name: String,
    pub issues: Vec<Issue>,
}

impl FamilyIssueReport {
    /// Highest severity among the family's issues.
    pub fn severity(&self) -> Option<Severity> {
        self.issues.iter().map(Issue::severity).max()
    }
}

/// Outcome of a full health scan.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScanReport {
    /// Families examined.
    pub scanned: usize,
    /// Families with zero issues.
    pub healthy: usize,
    /// One report per family with at least one issue.
    pub reports: Vec<FamilyIssueReport>,
    /// Families whose stored JSON failed to decode.
    pub malformed: Vec<UnitError>,
}

impl ScanReport {
    pub fn family_ids(&self) -> Vec<String> {
        self.reports.iter().map(|r| r.family_id.clone()).collect()
    }

    /// Distinguishes "healthy" from "issues found but not yet repaired".
    pub fn message(&self) -> String {
        if self.reports.is_empty() && self.malformed.is_empty() {
            format!("No issues found across {} family record(s).", self.scanned)
        } else {
            format!(
                "{} of {} family record(s) have issues ({} malformed); repair has not run.",
                self.reports.len(),
                self.scanned,
                self.malformed.len()
            )
        }
    }
}

/// Scan every family record in the store.
///
/// Rows are read sequentially; decode + classification fan out over the
/// bounded pool. Read-only: no record is mutated.
pub fn scan_all(store: &Store, concurrency: usize) -> Result<ScanReport> {
    let rows = store.list_family_rows()?;
    let mut report = ScanReport {
        scanned: rows.len(),
        ..Default::default()
    };

    let classified = bulk::run_bounded(&rows, concurrency, |row| {
        let record = FamilyRecord::decode(row).map_err(|e| e.to_string())?;
        Ok((record.name.clone(), scan_record(&record)))
    });

    for (row, result) in rows.iter().zip(classified) {
        match result {
            Ok((_, issues)) if issues.is_empty() => report.healthy += 1,
            Ok((name, issues)) => report.reports.push(FamilyIssueReport {
                family_id: row.id.clone(),
                family_name: name,
                issues,
            }),
            Err(message) => report.malformed.push(UnitError::new(&row.id, message)),
        }
    }

    Ok(report)
}

/// A student whose own battle opt-in flag disagrees with the family's.
///
/// Report-only: there is no repair for enrollment drift, the operator
/// resolves it with the family directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrollmentDrift {
    pub student_id: String,
    pub family_id: String,
    pub family_enabled: bool,
    pub student_enabled: bool,
}

/// Scan for students whose `battle_enabled` flag disagrees with their
/// family's `enabled` flag. Students without a family reference and
/// families that fail to decode are skipped.
pub fn scan_enrollment_drift(store: &Store) -> Result<Vec<EnrollmentDrift>> {
    let mut drift = Vec::new();
    let rows = store.list_family_rows()?;
    let mut enabled_by_family = std::collections::HashMap::new();
    for row in &rows {
        if let Ok(record) = FamilyRecord::decode(row) {
            let enabled = record.battle.map(|b| b.enabled).unwrap_or(false);
            enabled_by_family.insert(record.id, enabled);
        }
    }

    for student in store.list_students()? {
        let Some(family_id) = student.family_id.clone() else {
            continue;
        };
        let Some(&family_enabled) = enabled_by_family.get(&family_id) else {
            continue;
        };
        if family_enabled != student.battle_enabled {
            drift.push(EnrollmentDrift {
                student_id: student.id,
                family_id,
                family_enabled,
                student_enabled: student.battle_enabled,
            });
        }
    }

    Ok(drift)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::{FamilyBattle, WeekBattle};

    fn record_with(battle: Option<FamilyBattle>, legacy: Option<LegacyHistory>) -> FamilyRecord {
        FamilyRecord {
            id: "f1".to_string(),
            name: "Doe".to_string(),
            battle,
            legacy,
            last_repaired: None,
            repaired_by: None,
        }
    }

    #[test]
    fn healthy_record_has_no_issues() {
        let battle = FamilyBattle {
            enabled: true,
            history: Some(BattleHistory {
                total_battles: 4,
                children_wins: 2,
                parent_wins: 1,
                ties: 1,
                ..Default::default()
            }),
            ..Default::default()
        };
        assert!(scan_record(&record_with(Some(battle), None)).is_empty());
    }

    #[test]
    fn empty_record_is_healthy() {
        assert!(scan_record(&record_with(None, None)).is_empty());
    }

    #[test]
    fn dual_structure_carries_both_counter_sets() {
        let battle = FamilyBattle {
            enabled: true,
            history: Some(BattleHistory {
                total_battles: 3,
                children_wins: 1,
                parent_wins: 1,
                ties: 1,
                ..Default::default()
            }),
            ..Default::default()
        };
        let legacy = LegacyHistory {
            battles: 5,
            children_wins: 2,
            parent_wins: 3,
            ties: 0,
        };
        let issues = scan_record(&record_with(Some(battle), Some(legacy)));
        assert_eq!(issues.len(), 1);
        match &issues[0] {
            Issue::DualStructure { legacy, current } => {
                assert_eq!(legacy.total, 5);
                assert_eq!(current.total, 3);
            }
            other => panic!("expected DualStructure, got {other:?}"),
        }
        assert_eq!(issues[0].severity(), Severity::High);
    }

    #[test]
    fn disabled_with_live_week_is_inconsistent() {
        let battle = FamilyBattle {
            enabled: false,
            current_week: Some(WeekBattle {
                week: "2025-W10".to_string(),
                children_minutes: 120,
                parent_minutes: 90,
            }),
            ..Default::default()
        };
        let issues = scan_record(&record_with(Some(battle), None));
        assert_eq!(issues.len(), 1);
        match &issues[0] {
            Issue::InconsistentState {
                has_current_week,
                week_activity,
                ..
            } => {
                assert!(has_current_week);
                assert!(week_activity);
            }
            other => panic!("expected InconsistentState, got {other:?}"),
        }
    }

    #[test]
    fn enabled_without_history_is_missing_history() {
        let battle = FamilyBattle {
            enabled: true,
            ..Default::default()
        };
        let issues = scan_record(&record_with(Some(battle), None));
        assert_eq!(issues, vec![Issue::MissingHistory]);
        assert_eq!(issues[0].severity(), Severity::High);
    }

    #[test]
    fn mismatched_total_is_invalid_math() {
        let battle = FamilyBattle {
            enabled: true,
            history: Some(BattleHistory {
                total_battles: 10,
                children_wins: 2,
                parent_wins: 3,
                ties: 1,
                ..Default::default()
            }),
            ..Default::default()
        };
        let issues = scan_record(&record_with(Some(battle), None));
        assert_eq!(
            issues,
            vec![Issue::InvalidMath {
                total_battles: 10,
                expected: 6
            }]
        );
    }

    #[test]
    fn legacy_only_is_orphaned() {
        let legacy = LegacyHistory {
            battles: 7,
            children_wins: 0,
            parent_wins: 0,
            ties: 0,
        };
        let issues = scan_record(&record_with(None, Some(legacy)));
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].kind(), IssueKind::OrphanedData);
        assert_eq!(issues[0].severity(), Severity::Low);
    }

    #[test]
    fn a_family_can_have_multiple_issues_in_union_order() {
        // Dual structure + disabled-with-live-week + bad math at once.
        let battle = FamilyBattle {
            enabled: false,
            completed_week: Some(WeekBattle {
                week: "2025-W09".to_string(),
                children_minutes: 60,
                parent_minutes: 45,
            }),
            history: Some(BattleHistory {
                total_battles: 9,
                children_wins: 1,
                parent_wins: 1,
                ties: 0,
                ..Default::default()
            }),
            ..Default::default()
        };
        let legacy = LegacyHistory {
            battles: 2,
            children_wins: 1,
            parent_wins: 1,
            ties: 0,
        };
        let issues = scan_record(&record_with(Some(battle), Some(legacy)));
        let kinds: Vec<IssueKind> = issues.iter().map(Issue::kind).collect();
        assert_eq!(
            kinds,
            vec![
                IssueKind::DualStructure,
                IssueKind::InconsistentState,
                IssueKind::InvalidMath
            ]
        );
    }
}
