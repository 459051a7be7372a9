//! Repair engine: heal scanned family records.
//!
//! For each family the engine computes one merged patch that resolves
//! every scanned issue, applies it in a single transactional write and
//! stamps the repair metadata. Per-issue fixes are unioned in taxonomy
//! order, so a later fix may overwrite fields set by an earlier one.
//!
//! Every computed patch satisfies the full issue taxonomy: re-scanning
//! a repaired record yields zero issues, which is what makes re-running
//! an interrupted batch safe. A patch that fails its own re-scan is a
//! bug in this module; it is logged loudly and never written.

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::scanner::{self, Issue};
use super::{BattleHistory, FamilyBattle, FamilyRecord};
use crate::bulk::{self, UnitError};
use crate::error::Result;
use crate::storage::Store;

/// The resolved end state for one family: the battle structure to write
/// and whether the legacy column is deleted alongside it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RepairPatch {
    pub family_id: String,
    pub battle: FamilyBattle,
    pub drop_legacy: bool,
}

/// Compute the merged repair patch for a scanned family.
///
/// Pure: reads only the record and its issue list. Issues are applied
/// in taxonomy order regardless of the order they were handed in.
pub fn compute_repair(record: &FamilyRecord, issues: &[Issue]) -> RepairPatch {
    let mut ordered: Vec<&Issue> = issues.iter().collect();
    ordered.sort_by_key(|issue| issue.kind());

    let mut battle = record.battle.clone().unwrap_or_default();
    let mut drop_legacy = false;

    for issue in ordered {
        match issue {
            Issue::DualStructure { legacy, current: _ } => {
                let history = battle.history.take().unwrap_or_default();
                battle.history = Some(merge_counters(history, legacy));
                drop_legacy = true;
            }
            Issue::InconsistentState {
                week_activity,
                history_data,
                ..
            } => {
                if *week_activity || *history_data {
                    // Live battle data contradicts the disabled flag:
                    // trust the data, not the flag.
                    battle.enabled = true;
                    battle.history.get_or_insert_with(BattleHistory::default);
                } else {
                    // Nothing of value behind the pointers.
                    battle.current_week = None;
                    battle.completed_week = None;
                }
            }
            Issue::MissingHistory => {
                battle.history.get_or_insert_with(BattleHistory::default);
            }
            Issue::InvalidMath { .. } => {
                if let Some(history) = &mut battle.history {
                    history.total_battles = history.wins_sum();
                }
            }
            Issue::OrphanedData { legacy } => {
                // Synthesize a current structure from the legacy one.
                // Disabled: families must explicitly re-opt-in. The
                // week-level fields (streak, recent battles, XP) start
                // empty since the legacy generation never carried them.
                battle = FamilyBattle {
                    enabled: false,
                    current_week: None,
                    completed_week: None,
                    history: Some(merge_counters(BattleHistory::default(), legacy)),
                };
                drop_legacy = true;
            }
        }
    }

    RepairPatch {
        family_id: record.id.clone(),
        battle,
        drop_legacy,
    }
}

/// Max-merge legacy counters into a history: never double-count, never
/// lose data. Battles the merged breakdown cannot account for are kept
/// as ties rather than dropped, so the total always equals the
/// component sum afterwards.
fn merge_counters(mut history: BattleHistory, legacy: &scanner::Counters) -> BattleHistory {
    history.children_wins = history.children_wins.max(legacy.children_wins);
    history.parent_wins = history.parent_wins.max(legacy.parent_wins);
    history.ties = history.ties.max(legacy.ties);

    let total = history
        .total_battles
        .max(legacy.total)
        .max(history.wins_sum());
    history.ties += total - history.wins_sum();
    history.total_battles = total;
    history
}

/// What the record will look like after the patch is applied.
fn patched_record(record: &FamilyRecord, patch: &RepairPatch) -> FamilyRecord {
    FamilyRecord {
        id: record.id.clone(),
        name: record.name.clone(),
        battle: Some(patch.battle.clone()),
        legacy: if patch.drop_legacy {
            None
        } else {
            record.legacy
        },
        last_repaired: record.last_repaired,
        repaired_by: record.repaired_by.clone(),
    }
}

/// Re-scan the would-be end state. Remaining issues mean the patch
/// computation is broken; the caller must not write the patch.
fn verify_patch(record: &FamilyRecord, patch: &RepairPatch) -> Result<(), String> {
    let healed = patched_record(record, patch);
    let remaining = scanner::scan_record(&healed);
    if remaining.is_empty() {
        Ok(())
    } else {
        let kinds: Vec<String> = remaining.iter().map(|i| i.kind().to_string()).collect();
        Err(format!("patch leaves issues unresolved: {}", kinds.join(", ")))
    }
}

/// Outcome of a batch repair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RepairReport {
    /// Families that completed without error (repaired or already healthy).
    pub success: usize,
    /// Families that failed.
    pub failed: usize,
    /// Per-family failure messages.
    pub errors: Vec<UnitError>,
    /// Ids actually written; healthy families are skipped, not written.
    pub repaired: Vec<String>,
}

impl RepairReport {
    /// Final operator-facing summary line.
    pub fn message(&self) -> String {
        if self.success + self.failed == 0 {
            "No families selected.".to_string()
        } else if self.repaired.is_empty() && self.failed == 0 {
            format!("All {} selected family record(s) already healthy.", self.success)
        } else {
            format!(
                "Repair attempted: {} succeeded ({} written), {} failed.",
                self.success,
                self.repaired.len(),
                self.failed
            )
        }
    }
}

enum PlannedUnit {
    Healthy,
    Patch(Box<(FamilyRecord, Vec<Issue>, RepairPatch)>),
}

/// Plan repairs for a set of family ids: fetch, decode, scan, compute
/// and verify the patch for each, with per-family failure isolation.
fn plan_repairs(
    store: &Store,
    ids: &[String],
    concurrency: usize,
) -> Result<(Vec<(String, PlannedUnit)>, Vec<UnitError>)> {
    let mut errors = Vec::new();
    let mut rows = Vec::new();
    for id in ids {
        match store.get_family_row(id)? {
            Some(row) => rows.push(row),
            None => errors.push(UnitError::new(id, "family not found")),
        }
    }

    let planned = bulk::run_bounded(&rows, concurrency, |row| {
        let record = FamilyRecord::decode(row).map_err(|e| format!("malformed record: {e}"))?;
        let issues = scanner::scan_record(&record);
        if issues.is_empty() {
            return Ok(PlannedUnit::Healthy);
        }
        let patch = compute_repair(&record, &issues);
        verify_patch(&record, &patch)?;
        Ok(PlannedUnit::Patch(Box::new((record, issues, patch))))
    });

    let mut units = Vec::new();
    for (row, result) in rows.into_iter().zip(planned) {
        match result {
            Ok(unit) => units.push((row.id, unit)),
            Err(message) => {
                if message.starts_with("patch leaves issues unresolved") {
                    // Should be impossible by construction; see module doc.
                    log::error!("invariant violation for family {}: {message}", row.id);
                }
                errors.push(UnitError::new(row.id, message));
            }
        }
    }
    Ok((units, errors))
}

/// Repair a set of families. Each family is an independent unit: one
/// failure never aborts the rest. Repairing an already-healthy family
/// is a successful no-op.
pub fn repair_families(
    store: &Store,
    ids: &[String],
    operator: &str,
    concurrency: usize,
) -> Result<RepairReport> {
    let (units, errors) = plan_repairs(store, ids, concurrency)?;

    let mut report = RepairReport::default();
    for error in errors {
        report.failed += 1;
        report.errors.push(error);
    }

    for (family_id, unit) in units {
        match unit {
            PlannedUnit::Healthy => report.success += 1,
            PlannedUnit::Patch(boxed) => {
                let (_, _, patch) = *boxed;
                match store.apply_repair(&patch, operator, Utc::now()) {
                    Ok(()) => {
                        report.success += 1;
                        report.repaired.push(family_id);
                    }
                    Err(e) => {
                        report.failed += 1;
                        report.errors.push(UnitError::new(family_id, e.to_string()));
                    }
                }
            }
        }
    }

    log::info!(
        "battle repair: {} succeeded, {} written, {} failed",
        report.success,
        report.repaired.len(),
        report.failed
    );
    Ok(report)
}

/// Render the same patches a batch repair would apply as an executable
/// SQL script, for operators who prefer manual execution. Computes
/// everything a real repair would, writes nothing.
pub fn generate_repair_script(
    store: &Store,
    ids: &[String],
    operator: &str,
    concurrency: usize,
) -> Result<String> {
    let (units, errors) = plan_repairs(store, ids, concurrency)?;

    let mut entries = Vec::new();
    for (_, unit) in units {
        if let PlannedUnit::Patch(boxed) = unit {
            entries.push(*boxed);
        }
    }
    Ok(render_script(&entries, &errors, operator))
}

/// Pure rendering half of the dry-run mode.
pub fn render_script(
    entries: &[(FamilyRecord, Vec<Issue>, RepairPatch)],
    skipped: &[UnitError],
    operator: &str,
) -> String {
    let mut script = String::new();
    script.push_str("-- lectio family battle repair script (dry run)\n");
    script.push_str(&format!(
        "-- {} family record(s) to repair, operator: {}\n",
        entries.len(),
        operator
    ));
    for error in skipped {
        script.push_str(&format!("-- skipped {}: {}\n", error.key, error.message));
    }
    if entries.is_empty() {
        script.push_str("-- nothing to do\n");
        return script;
    }

    script.push_str("BEGIN;\n");
    for (record, issues, patch) in entries {
        let kinds: Vec<String> = issues.iter().map(|i| i.kind().to_string()).collect();
        script.push_str(&format!(
            "-- family {} ({}): {}\n",
            record.id,
            record.name,
            kinds.join(", ")
        ));
        let battle_json = serde_json::to_string(&patch.battle)
            .unwrap_or_else(|_| "null".to_string())
            .replace('\'', "''");
        let legacy_sql = if patch.drop_legacy {
            ", legacy_history = NULL"
        } else {
            ""
        };
        script.push_str(&format!(
            "UPDATE families SET battle = '{}'{}, repaired_by = '{}' WHERE id = '{}';\n",
            battle_json,
            legacy_sql,
            operator.replace('\'', "''"),
            record.id
        ));
    }
    script.push_str("COMMIT;\n");
    script
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::battle::{LegacyHistory, WeekBattle};
    use indoc::indoc;
    use proptest::prelude::*;

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

    fn repair(record: &FamilyRecord) -> RepairPatch {
        let issues = scanner::scan_record(record);
        let patch = compute_repair(record, &issues);
        verify_patch(record, &patch).expect("repair must satisfy the taxonomy");
        patch
    }

    #[test]
    fn dual_structure_merge_never_loses_data() {
        // Legacy totals (5,2,3,0) merged with current totals (3,1,1,1).
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
        let patch = repair(&record_with(Some(battle), Some(legacy)));

        let history = patch.battle.history.unwrap();
        assert_eq!(history.children_wins, 2);
        assert_eq!(history.parent_wins, 3);
        assert_eq!(history.ties, 1);
        assert!(history.total_battles >= 6);
        assert_eq!(history.total_battles, history.wins_sum());
        assert!(patch.drop_legacy);
    }

    #[test]
    fn merge_keeps_unattributed_battles_as_ties() {
        // Legacy counted 10 battles but the breakdown only explains 6:
        // the 4 unexplained battles survive the merge as ties.
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
            battles: 10,
            children_wins: 2,
            parent_wins: 3,
            ties: 0,
        };
        let patch = repair(&record_with(Some(battle), Some(legacy)));

        let history = patch.battle.history.unwrap();
        assert_eq!(history.total_battles, 10);
        assert_eq!(history.children_wins, 2);
        assert_eq!(history.parent_wins, 3);
        assert_eq!(history.ties, 5);
        assert_eq!(history.total_battles, history.wins_sum());
    }

    #[test]
    fn inconsistent_state_with_signals_forces_enabled() {
        let battle = FamilyBattle {
            enabled: false,
            current_week: Some(WeekBattle {
                week: "2025-W12".to_string(),
                children_minutes: 45,
                parent_minutes: 0,
            }),
            ..Default::default()
        };
        let patch = repair(&record_with(Some(battle), None));

        assert!(patch.battle.enabled);
        assert!(patch.battle.history.is_some());
        // The live week is data; it is kept, not discarded.
        assert!(patch.battle.current_week.is_some());
    }

    #[test]
    fn inconsistent_state_without_signals_clears_dangling_weeks() {
        let battle = FamilyBattle {
            enabled: false,
            current_week: Some(WeekBattle {
                week: "2025-W12".to_string(),
                children_minutes: 0,
                parent_minutes: 0,
            }),
            completed_week: Some(WeekBattle::default()),
            ..Default::default()
        };
        let patch = repair(&record_with(Some(battle), None));

        assert!(!patch.battle.enabled);
        assert!(patch.battle.current_week.is_none());
        assert!(patch.battle.completed_week.is_none());
    }

    #[test]
    fn missing_history_installs_zeroed_default() {
        let battle = FamilyBattle {
            enabled: true,
            ..Default::default()
        };
        let patch = repair(&record_with(Some(battle), None));
        assert_eq!(patch.battle.history, Some(BattleHistory::default()));
    }

    #[test]
    fn invalid_math_recomputes_total_from_components() {
        let battle = FamilyBattle {
            enabled: true,
            history: Some(BattleHistory {
                total_battles: 99,
                children_wins: 2,
                parent_wins: 3,
                ties: 1,
                ..Default::default()
            }),
            ..Default::default()
        };
        let patch = repair(&record_with(Some(battle), None));
        let history = patch.battle.history.unwrap();
        assert_eq!(history.total_battles, 6);
    }

    #[test]
    fn orphaned_data_synthesizes_disabled_current_structure() {
        let legacy = LegacyHistory {
            battles: 7,
            children_wins: 3,
            parent_wins: 2,
            ties: 2,
        };
        let patch = repair(&record_with(None, Some(legacy)));

        assert!(!patch.battle.enabled, "families must explicitly re-opt-in");
        assert!(patch.drop_legacy);
        let history = patch.battle.history.unwrap();
        assert_eq!(history.total_battles, 7);
        assert_eq!(history.total_battles, history.wins_sum());
        assert!(history.recent_battles.is_empty());
        assert!(history.xp_awarded.is_empty());
    }

    #[test]
    fn repair_is_idempotent() {
        let battle = FamilyBattle {
            enabled: false,
            completed_week: Some(WeekBattle {
                week: "2025-W08".to_string(),
                children_minutes: 30,
                parent_minutes: 30,
            }),
            history: Some(BattleHistory {
                total_battles: 4,
                children_wins: 1,
                parent_wins: 1,
                ties: 0,
                ..Default::default()
            }),
            ..Default::default()
        };
        let legacy = LegacyHistory {
            battles: 2,
            children_wins: 2,
            parent_wins: 0,
            ties: 0,
        };
        let record = record_with(Some(battle), Some(legacy));
        let patch = repair(&record);

        // A repaired record scans clean, so a second repair never fires.
        let healed = patched_record(&record, &patch);
        assert!(scanner::scan_record(&healed).is_empty());

        // And computing a repair for the healed record with no issues
        // changes nothing.
        let second = compute_repair(&healed, &[]);
        assert_eq!(second.battle, patch.battle);
        assert!(!second.drop_legacy);
    }

    #[test]
    fn render_script_lists_issues_and_updates() {
        let battle = FamilyBattle {
            enabled: true,
            ..Default::default()
        };
        let record = record_with(Some(battle), None);
        let issues = scanner::scan_record(&record);
        let patch = compute_repair(&record, &issues);
        let script = render_script(&[(record, issues, patch)], &[], "admin");

        assert!(script.contains("-- family f1 (Doe): MISSING_HISTORY"));
        assert!(script.contains("UPDATE families SET battle = "));
        assert!(script.contains("WHERE id = 'f1';"));
        assert!(script.starts_with("-- lectio family battle repair script"));
        assert!(script.ends_with("COMMIT;\n"));
    }

    fn seeded_store() -> (Store, Vec<String>) {
        let store = Store::open_memory().unwrap();

        let healthy = store.add_family("Healthy").unwrap();
        store
            .write_family_battle(
                &healthy,
                &FamilyBattle {
                    enabled: true,
                    history: Some(BattleHistory {
                        total_battles: 2,
                        children_wins: 1,
                        parent_wins: 1,
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .unwrap();

        let dual = store.add_family("Dual").unwrap();
        store
            .set_family_raw(
                &dual,
                Some(
                    r#"{"enabled":true,"history":{"total_battles":3,"children_wins":1,"parent_wins":1,"ties":1}}"#,
                ),
                Some(r#"{"battles":5,"children_wins":2,"parent_wins":3,"ties":0}"#),
            )
            .unwrap();

        let orphaned = store.add_family("Orphaned").unwrap();
        store
            .set_family_raw(
                &orphaned,
                None,
                Some(r#"{"battles":4,"children_wins":2,"parent_wins":1,"ties":1}"#),
            )
            .unwrap();

        let inconsistent = store.add_family("Inconsistent").unwrap();
        store
            .set_family_raw(
                &inconsistent,
                Some(
                    r#"{"enabled":false,"current_week":{"week":"2025-W11","children_minutes":40,"parent_minutes":10}}"#,
                ),
                None,
            )
            .unwrap();

        (store, vec![healthy, dual, orphaned, inconsistent])
    }

    #[test]
    fn scan_repair_scan_converges_to_empty() {
        let (store, _) = seeded_store();

        let scan = scanner::scan_all(&store, 4).unwrap();
        assert_eq!(scan.scanned, 4);
        assert_eq!(scan.healthy, 1);
        assert_eq!(scan.reports.len(), 3);
        assert!(scan.message().contains("repair has not run"));

        let ids = scan.family_ids();
        let report = repair_families(&store, &ids, "admin", 4).unwrap();
        assert_eq!(report.failed, 0);
        assert_eq!(report.success, 3);
        assert_eq!(report.repaired.len(), 3);

        let rescan = scanner::scan_all(&store, 4).unwrap();
        assert!(rescan.reports.is_empty());
        assert!(rescan.malformed.is_empty());
        assert_eq!(rescan.healthy, 4);
        assert!(rescan.message().contains("No issues found"));
    }

    #[test]
    fn repairing_healthy_families_is_a_no_op() {
        let (store, ids) = seeded_store();

        // Repair everything, then repair everything again: the second
        // pass writes nothing.
        repair_families(&store, &ids, "admin", 4).unwrap();
        let second = repair_families(&store, &ids, "admin", 4).unwrap();
        assert_eq!(second.success, 4);
        assert_eq!(second.failed, 0);
        assert!(second.repaired.is_empty());
        assert!(second.message().contains("already healthy"));
    }

    #[test]
    fn malformed_records_are_reported_never_fatal() {
        let store = Store::open_memory().unwrap();
        let broken = store.add_family("Broken").unwrap();
        store.set_family_raw(&broken, Some("{not json"), None).unwrap();
        let fine = store.add_family("Fine").unwrap();
        store
            .set_family_raw(&fine, None, Some(r#"{"battles":1,"children_wins":1}"#))
            .unwrap();

        let scan = scanner::scan_all(&store, 2).unwrap();
        assert_eq!(scan.malformed.len(), 1);
        assert_eq!(scan.malformed[0].key, broken);
        assert_eq!(scan.reports.len(), 1);

        let report =
            repair_families(&store, &[broken.clone(), fine.clone()], "admin", 2).unwrap();
        assert_eq!(report.success, 1);
        assert_eq!(report.failed, 1);
        assert!(report.errors[0].message.contains("malformed record"));
    }

    #[test]
    fn unknown_family_is_an_isolated_unit_failure() {
        let (store, _) = seeded_store();
        let scan = scanner::scan_all(&store, 4).unwrap();
        let mut ids = scan.family_ids();
        ids.push("ghost".to_string());

        let report = repair_families(&store, &ids, "admin", 4).unwrap();
        assert_eq!(report.success, 3);
        assert_eq!(report.failed, 1);
        assert_eq!(report.errors[0].key, "ghost");
        assert_eq!(report.errors[0].message, "family not found");
    }

    #[test]
    fn generate_repair_script_writes_nothing() {
        let (store, _) = seeded_store();
        let scan = scanner::scan_all(&store, 4).unwrap();

        let script = generate_repair_script(&store, &scan.family_ids(), "admin", 4).unwrap();
        assert!(script.contains("UPDATE families SET battle = "));
        assert!(script.contains("DUAL_STRUCTURE"));

        // Dry run: the drift is still there.
        let rescan = scanner::scan_all(&store, 4).unwrap();
        assert_eq!(rescan.reports.len(), 3);
    }

    #[test]
    fn render_script_with_nothing_to_do() {
        let script = render_script(&[], &[], "admin");
        let expected = indoc! {"
            -- lectio family battle repair script (dry run)
            -- 0 family record(s) to repair, operator: admin
            -- nothing to do
        "};
        assert_eq!(script, expected);
    }

    fn arb_history() -> impl Strategy<Value = BattleHistory> {
        (0u32..20, 0u32..10, 0u32..10, 0u32..10).prop_map(|(total, cw, pw, ties)| BattleHistory {
            total_battles: total,
            children_wins: cw,
            parent_wins: pw,
            ties,
            ..Default::default()
        })
    }

    fn arb_week() -> impl Strategy<Value = WeekBattle> {
        (0u32..200, 0u32..200).prop_map(|(c, p)| WeekBattle {
            week: "2025-W01".to_string(),
            children_minutes: c,
            parent_minutes: p,
        })
    }

    fn arb_battle() -> impl Strategy<Value = FamilyBattle> {
        (
            any::<bool>(),
            proptest::option::of(arb_week()),
            proptest::option::of(arb_week()),
            proptest::option::of(arb_history()),
        )
            .prop_map(|(enabled, current_week, completed_week, history)| FamilyBattle {
                enabled,
                current_week,
                completed_week,
                history,
            })
    }

    fn arb_legacy() -> impl Strategy<Value = LegacyHistory> {
        (0u32..20, 0u32..10, 0u32..10, 0u32..10).prop_map(|(battles, cw, pw, ties)| {
            LegacyHistory {
                battles,
                children_wins: cw,
                parent_wins: pw,
                ties,
            }
        })
    }

    proptest! {
        /// Any record shape, however drifted, heals to a clean record in
        /// one repair, and the healed record satisfies the math invariant.
        #[test]
        fn any_repair_scans_clean(
            battle in proptest::option::of(arb_battle()),
            legacy in proptest::option::of(arb_legacy()),
        ) {
            let record = record_with(battle, legacy);
            let issues = scanner::scan_record(&record);
            prop_assume!(!issues.is_empty());

            let patch = compute_repair(&record, &issues);
            prop_assert!(verify_patch(&record, &patch).is_ok());

            if let Some(history) = &patch.battle.history {
                prop_assert_eq!(history.total_battles, history.wins_sum());
            }
        }
    }
}
