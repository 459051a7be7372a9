//! Streak derivation from the reading-session log.
//!
//! The session log is the ground truth; the aggregate fields cached on a
//! student record (current streak, longest streak, reading-day totals)
//! are a materialized view that must always be reproducible by re-running
//! [`derive`] over the log.
//!
//! All date arithmetic is calendar-day based on `NaiveDate` -- never
//! duration based -- so streaks are immune to DST and timezone drift.
//! "Today" is always passed in by the caller per the tenant's local
//! calendar; the derivation itself never consults a clock.

use std::collections::BTreeSet;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::bulk::{self, UnitError};
use crate::error::{CoreError, Result};
use crate::storage::Store;

/// Runaway guard for the backward walk. No real log produces a streak
/// this long; hitting the cap indicates corrupted data.
pub const MAX_STREAK_WALK: u32 = 1000;

/// One calendar day of a student's session log.
///
/// A day is `completed` when at least one session on that date met the
/// completion threshold. Streaks count completed days only; the total
/// reading-day count includes incomplete days as well.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionDay {
    pub date: NaiveDate,
    pub completed: bool,
}

/// Canonical derived aggregates for one student.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakSummary {
    pub current_streak: u32,
    pub longest_streak: u32,
    /// Distinct dates with at least one session, completed or not.
    pub total_reading_days: u32,
    /// Most recent date with a completed session.
    pub last_reading_date: Option<NaiveDate>,
}

/// Derive the canonical streak aggregates from a session log.
///
/// Pure and idempotent: the same log and the same `today` always yield
/// the same summary. An empty log yields the all-zero summary.
pub fn derive(days: &[SessionDay], today: NaiveDate) -> StreakSummary {
    let mut completed: BTreeSet<NaiveDate> = BTreeSet::new();
    let mut any: BTreeSet<NaiveDate> = BTreeSet::new();
    for day in days {
        any.insert(day.date);
        if day.completed {
            completed.insert(day.date);
        }
    }

    StreakSummary {
        current_streak: current_streak(&completed, today),
        longest_streak: longest_streak(&completed),
        total_reading_days: any.len() as u32,
        last_reading_date: completed.iter().next_back().copied(),
    }
}

/// Walk backward from the anchor day counting consecutive completed days.
///
/// The anchor is today if today has a completed session, else yesterday
/// (one-day grace so a streak survives until the day is fully over).
fn current_streak(completed: &BTreeSet<NaiveDate>, today: NaiveDate) -> u32 {
    let anchor = if completed.contains(&today) {
        today
    } else {
        match today.pred_opt() {
            Some(yesterday) if completed.contains(&yesterday) => yesterday,
            _ => return 0,
        }
    };

    let mut streak = 0;
    let mut cursor = anchor;
    while completed.contains(&cursor) {
        streak += 1;
        if streak >= MAX_STREAK_WALK {
            break;
        }
        match cursor.pred_opt() {
            Some(prev) => cursor = prev,
            None => break,
        }
    }
    streak
}

/// Single ascending scan; the running length resets whenever the gap to
/// the previous date is not exactly one day.
fn longest_streak(completed: &BTreeSet<NaiveDate>) -> u32 {
    let mut longest = 0;
    let mut run = 0;
    let mut prev: Option<NaiveDate> = None;
    for &date in completed {
        run = match prev {
            Some(p) if p.succ_opt() == Some(date) => run + 1,
            _ => 1,
        };
        longest = longest.max(run);
        prev = Some(date);
    }
    longest
}

/// Outcome of a bulk streak migration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MigrationReport {
    /// Students examined.
    pub processed: usize,
    /// Students whose cached aggregates were stale and got rewritten.
    pub updated: usize,
    /// Per-student failures; a failing student never blocks the rest.
    pub errors: Vec<UnitError>,
}

impl MigrationReport {
    pub fn message(&self) -> String {
        format!(
            "{} student(s) processed, {} updated, {} failed.",
            self.processed,
            self.updated,
            self.errors.len()
        )
    }
}

/// Re-derive one student's aggregates from their log and overwrite the
/// cached fields. Returns the freshly derived summary.
pub fn recompute_student(store: &Store, student_id: &str, today: NaiveDate) -> Result<StreakSummary> {
    if store.get_student(student_id)?.is_none() {
        return Err(CoreError::NotFound {
            kind: "student",
            id: student_id.to_string(),
        });
    }
    let days = store.session_days(student_id)?;
    let summary = derive(&days, today);
    store.update_student_aggregates(student_id, &summary)?;
    Ok(summary)
}

/// Re-derive aggregates for every student in the store.
///
/// Reads are sequential on the connection; derivation fans out over a
/// bounded worker pool; writes are applied per student with failure
/// isolation. Safe to re-run after a partial failure: already-consistent
/// students are skipped, so the operation converges.
pub fn migrate_all_students(
    store: &Store,
    today: NaiveDate,
    concurrency: usize,
) -> Result<MigrationReport> {
    let students = store.list_students()?;
    let mut report = MigrationReport::default();

    let mut inputs = Vec::with_capacity(students.len());
    for student in students {
        match store.session_days(&student.id) {
            Ok(days) => inputs.push((student, days)),
            Err(e) => {
                report.processed += 1;
                report.errors.push(UnitError::new(&student.id, e.to_string()));
            }
        }
    }

    let derived = bulk::run_bounded(&inputs, concurrency, |(_, days)| {
        Ok::<StreakSummary, String>(derive(days, today))
    });

    for ((student, _), result) in inputs.iter().zip(derived) {
        report.processed += 1;
        let summary = match result {
            Ok(summary) => summary,
            Err(message) => {
                report.errors.push(UnitError::new(&student.id, message));
                continue;
            }
        };
        if student.aggregates_match(&summary) {
            continue;
        }
        match store.update_student_aggregates(&student.id, &summary) {
            Ok(()) => report.updated += 1,
            Err(e) => report.errors.push(UnitError::new(&student.id, e.to_string())),
        }
    }

    log::info!(
        "streak migration: {} processed, {} updated, {} failed",
        report.processed,
        report.updated,
        report.errors.len()
    );
    Ok(report)
}
