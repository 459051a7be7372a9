//! SQLite-backed record store.
//!
//! The store models the hierarchical document layout of the upstream
//! system: students (keyed by entity and school) own an append-only
//! reading-session log, families carry their battle state as JSON
//! columns -- including the nullable legacy column whose drift the
//! health scan exists to catch -- and a singleton program row holds the
//! phase and academic year.
//!
//! Record structures are stored as JSON via serde_json; per-statement
//! atomicity is all the consistency engine relies on.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{data_dir, migrations};
use crate::battle::repair::RepairPatch;
use crate::battle::FamilyBattle;
use crate::error::{CoreError, DatabaseError, Result, ValidationError};
use crate::phase::{AcademicYear, ProgramPhase, ProgramState};
use crate::streak::{SessionDay, StreakSummary};

/// Input for creating a student record.
#[derive(Debug, Clone)]
pub struct StudentInput {
    pub entity: String,
    pub school: String,
    pub name: String,
    pub family_id: Option<String>,
}

/// A student record with cached aggregates.
///
/// The streak and total fields are a materialized view over the session
/// log; `total_days_read` duplicates `total_reading_days` for callers
/// of the old field name and the two are always written together.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StudentRecord {
    pub id: String,
    pub entity: String,
    pub school: String,
    pub name: String,
    pub family_id: Option<String>,
    pub current_streak: u32,
    pub longest_streak: u32,
    pub last_reading_date: Option<NaiveDate>,
    pub total_reading_days: u32,
    pub total_days_read: u32,
    pub lifetime_xp: u32,
    pub badges: Vec<String>,
    pub battle_enabled: bool,
    pub books_submitted_year: u32,
    pub bookshelf: Vec<String>,
    pub votes: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl StudentRecord {
    /// True when the cached aggregates already equal the derived
    /// summary, including the duplicated total field.
    pub fn aggregates_match(&self, summary: &StreakSummary) -> bool {
        self.current_streak == summary.current_streak
            && self.longest_streak == summary.longest_streak
            && self.last_reading_date == summary.last_reading_date
            && self.total_reading_days == summary.total_reading_days
            && self.total_days_read == summary.total_reading_days
    }
}

/// Input for appending one reading session.
#[derive(Debug, Clone)]
pub struct SessionInput {
    pub date: NaiveDate,
    pub duration_min: u32,
    pub book_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub target_duration_min: u32,
}

/// One stored reading session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionRecord {
    pub id: i64,
    pub student_id: String,
    pub date: NaiveDate,
    pub duration_min: u32,
    pub completed: bool,
    pub book_id: Option<String>,
    pub started_at: DateTime<Utc>,
    pub target_duration_min: u32,
}

/// A raw family row. The JSON columns are decoded by the battle module
/// so a malformed record surfaces per family instead of failing the
/// whole read.
#[derive(Debug, Clone)]
pub struct FamilyRow {
    pub id: String,
    pub name: String,
    pub battle_json: Option<String>,
    pub legacy_json: Option<String>,
    pub last_repaired: Option<DateTime<Utc>>,
    pub repaired_by: Option<String>,
}

const STUDENT_COLUMNS: &str = "id, entity, school, name, family_id, current_streak, \
     longest_streak, last_reading_date, total_reading_days, total_days_read, lifetime_xp, \
     badges, battle_enabled, books_submitted_year, bookshelf, votes, created_at";

/// Parse datetime from RFC3339 string with fallback to current time.
fn parse_datetime_fallback(dt_str: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(dt_str)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn parse_date(date_str: &str) -> Result<NaiveDate, ValidationError> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .map_err(|_| ValidationError::InvalidDate(date_str.to_string()))
}

fn decode_list(json: &str) -> Vec<String> {
    serde_json::from_str(json).unwrap_or_default()
}

fn row_to_student(row: &rusqlite::Row) -> rusqlite::Result<StudentRecord> {
    let last_reading_date: Option<String> = row.get(7)?;
    let badges: String = row.get(11)?;
    let bookshelf: String = row.get(14)?;
    let votes: String = row.get(15)?;
    let created_at: String = row.get(16)?;
    Ok(StudentRecord {
        id: row.get(0)?,
        entity: row.get(1)?,
        school: row.get(2)?,
        name: row.get(3)?,
        family_id: row.get(4)?,
        current_streak: row.get(5)?,
        longest_streak: row.get(6)?,
        last_reading_date: last_reading_date.and_then(|s| parse_date(&s).ok()),
        total_reading_days: row.get(8)?,
        total_days_read: row.get(9)?,
        lifetime_xp: row.get(10)?,
        badges: decode_list(&badges),
        battle_enabled: row.get(12)?,
        books_submitted_year: row.get(13)?,
        bookshelf: decode_list(&bookshelf),
        votes: decode_list(&votes),
        created_at: parse_datetime_fallback(&created_at),
    })
}

fn row_to_family(row: &rusqlite::Row) -> rusqlite::Result<FamilyRow> {
    let last_repaired: Option<String> = row.get(4)?;
    Ok(FamilyRow {
        id: row.get(0)?,
        name: row.get(1)?,
        battle_json: row.get(2)?,
        legacy_json: row.get(3)?,
        last_repaired: last_repaired.as_deref().map(parse_datetime_fallback),
        repaired_by: row.get(5)?,
    })
}

/// SQLite database holding students, sessions, families and the
/// program config singleton.
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open the store at `<data_dir>/lectio.db`.
    ///
    /// Creates the database file, applies migrations and bootstraps the
    /// program config row if needed.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("lectio.db");
        let conn = Connection::open(&path).map_err(|source| DatabaseError::OpenFailed {
            path: path.clone(),
            source,
        })?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    /// Open an in-memory store (for tests).
    #[cfg(test)]
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(DatabaseError::from)?;
        let store = Self { conn };
        store.migrate()?;
        Ok(store)
    }

    fn migrate(&self) -> Result<()> {
        // Base (v1) tables; later generations are added by migrations.
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS students (
                    id                 TEXT PRIMARY KEY,
                    entity             TEXT NOT NULL,
                    school             TEXT NOT NULL,
                    name               TEXT NOT NULL,
                    family_id          TEXT,
                    current_streak     INTEGER NOT NULL DEFAULT 0,
                    longest_streak     INTEGER NOT NULL DEFAULT 0,
                    last_reading_date  TEXT,
                    total_reading_days INTEGER NOT NULL DEFAULT 0,
                    lifetime_xp        INTEGER NOT NULL DEFAULT 0,
                    badges             TEXT NOT NULL DEFAULT '[]',
                    battle_enabled     INTEGER NOT NULL DEFAULT 0,
                    created_at         TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS reading_sessions (
                    id                  INTEGER PRIMARY KEY AUTOINCREMENT,
                    student_id          TEXT NOT NULL,
                    date                TEXT NOT NULL,
                    duration_min        INTEGER NOT NULL,
                    completed           INTEGER NOT NULL,
                    book_id             TEXT,
                    started_at          TEXT NOT NULL,
                    target_duration_min INTEGER NOT NULL
                );

                CREATE TABLE IF NOT EXISTS families (
                    id             TEXT PRIMARY KEY,
                    name           TEXT NOT NULL,
                    legacy_history TEXT,
                    created_at     TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS program (
                    id            INTEGER PRIMARY KEY CHECK (id = 1),
                    phase         TEXT NOT NULL,
                    academic_year TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_sessions_student_date
                    ON reading_sessions(student_id, date);
                CREATE INDEX IF NOT EXISTS idx_students_school
                    ON students(entity, school);",
            )
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        migrations::migrate(&self.conn)
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;

        // Bootstrap the program config singleton. Created exactly once;
        // from here on only the phase machine writes it.
        let year = AcademicYear::containing(chrono::Local::now().date_naive());
        self.conn.execute(
            "INSERT OR IGNORE INTO program (id, phase, academic_year) VALUES (1, ?1, ?2)",
            params![ProgramPhase::Setup.as_str(), year.as_str()],
        )?;

        Ok(())
    }

    // ── Students ─────────────────────────────────────────────────────

    /// Create a student record. Returns the generated id.
    pub fn add_student(&self, input: &StudentInput) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO students (id, entity, school, name, family_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id,
                input.entity,
                input.school,
                input.name,
                input.family_id,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    pub fn get_student(&self, id: &str) -> Result<Option<StudentRecord>> {
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM students WHERE id = ?1");
        let student = self
            .conn
            .query_row(&sql, params![id], row_to_student)
            .optional()?;
        Ok(student)
    }

    pub fn list_students(&self) -> Result<Vec<StudentRecord>> {
        let sql = format!("SELECT {STUDENT_COLUMNS} FROM students ORDER BY created_at, id");
        let mut stmt = self.conn.prepare(&sql)?;
        let students = stmt
            .query_map([], row_to_student)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(students)
    }

    pub fn list_student_ids(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id FROM students ORDER BY created_at, id")?;
        let ids = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(ids)
    }

    pub fn set_student_family(&self, id: &str, family_id: Option<&str>) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE students SET family_id = ?1 WHERE id = ?2",
            params![family_id, id],
        )?;
        self.require_student_hit(changed, id)
    }

    pub fn set_battle_enabled(&self, id: &str, enabled: bool) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE students SET battle_enabled = ?1 WHERE id = ?2",
            params![enabled, id],
        )?;
        self.require_student_hit(changed, id)
    }

    /// Overwrite the cached aggregate fields with a derived summary,
    /// keeping the duplicated total fields equal.
    pub fn update_student_aggregates(&self, id: &str, summary: &StreakSummary) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE students SET current_streak = ?1, longest_streak = ?2,
                 last_reading_date = ?3, total_reading_days = ?4, total_days_read = ?4
             WHERE id = ?5",
            params![
                summary.current_streak,
                summary.longest_streak,
                summary
                    .last_reading_date
                    .map(|d| d.format("%Y-%m-%d").to_string()),
                summary.total_reading_days,
                id,
            ],
        )?;
        self.require_student_hit(changed, id)
    }

    /// Reset the per-year fields, leaving cross-year fields (badges,
    /// streaks, lifetime XP) untouched. Idempotent.
    pub fn clear_student_year_data(&self, id: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE students SET books_submitted_year = 0, bookshelf = '[]', votes = '[]'
             WHERE id = ?1",
            params![id],
        )?;
        self.require_student_hit(changed, id)
    }

    pub fn award_xp(&self, id: &str, amount: u32) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE students SET lifetime_xp = lifetime_xp + ?1 WHERE id = ?2",
            params![amount, id],
        )?;
        self.require_student_hit(changed, id)
    }

    /// Add a badge to the collection. Already-held badges are kept
    /// once; a badge is never collected twice.
    pub fn award_badge(&self, id: &str, badge: &str) -> Result<()> {
        let student = self.get_student(id)?.ok_or_else(|| CoreError::NotFound {
            kind: "student",
            id: id.to_string(),
        })?;
        if student.badges.iter().any(|b| b == badge) {
            return Ok(());
        }
        let mut badges = student.badges;
        badges.push(badge.to_string());
        self.conn.execute(
            "UPDATE students SET badges = ?1 WHERE id = ?2",
            params![serde_json::to_string(&badges)?, id],
        )?;
        Ok(())
    }

    /// Put a book on this year's shelf. Re-submitting the same book is
    /// a no-op; the per-year counter tracks distinct titles.
    pub fn submit_book(&self, id: &str, book_id: &str) -> Result<()> {
        let student = self.get_student(id)?.ok_or_else(|| CoreError::NotFound {
            kind: "student",
            id: id.to_string(),
        })?;
        if student.bookshelf.iter().any(|b| b == book_id) {
            return Ok(());
        }
        let mut bookshelf = student.bookshelf;
        bookshelf.push(book_id.to_string());
        self.conn.execute(
            "UPDATE students SET bookshelf = ?1, books_submitted_year = ?2 WHERE id = ?3",
            params![
                serde_json::to_string(&bookshelf)?,
                bookshelf.len() as u32,
                id,
            ],
        )?;
        Ok(())
    }

    /// Record a vote cast this year.
    pub fn cast_vote(&self, id: &str, book_id: &str) -> Result<()> {
        let student = self.get_student(id)?.ok_or_else(|| CoreError::NotFound {
            kind: "student",
            id: id.to_string(),
        })?;
        let mut votes = student.votes;
        votes.push(book_id.to_string());
        self.conn.execute(
            "UPDATE students SET votes = ?1 WHERE id = ?2",
            params![serde_json::to_string(&votes)?, id],
        )?;
        Ok(())
    }

    fn require_student_hit(&self, changed: usize, id: &str) -> Result<()> {
        if changed == 0 {
            return Err(CoreError::NotFound {
                kind: "student",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    // ── Reading sessions ─────────────────────────────────────────────

    /// Append a reading session. `completed` is derived here: a session
    /// counts once its duration reaches the completion threshold.
    pub fn record_session(
        &self,
        student_id: &str,
        input: &SessionInput,
        completion_threshold_min: u32,
    ) -> Result<i64> {
        if self.get_student(student_id)?.is_none() {
            return Err(CoreError::NotFound {
                kind: "student",
                id: student_id.to_string(),
            });
        }
        let completed = input.duration_min >= completion_threshold_min;
        self.conn.execute(
            "INSERT INTO reading_sessions
                 (student_id, date, duration_min, completed, book_id, started_at, target_duration_min)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                student_id,
                input.date.format("%Y-%m-%d").to_string(),
                input.duration_min,
                completed,
                input.book_id,
                input.started_at.to_rfc3339(),
                input.target_duration_min,
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn list_sessions(&self, student_id: &str) -> Result<Vec<SessionRecord>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, student_id, date, duration_min, completed, book_id, started_at,
                    target_duration_min
             FROM reading_sessions WHERE student_id = ?1 ORDER BY date, id",
        )?;
        let sessions = stmt
            .query_map(params![student_id], |row| {
                let date: String = row.get(2)?;
                let started_at: String = row.get(6)?;
                Ok(SessionRecord {
                    id: row.get(0)?,
                    student_id: row.get(1)?,
                    date: parse_date(&date).map_err(|e| {
                        rusqlite::Error::FromSqlConversionFailure(
                            2,
                            rusqlite::types::Type::Text,
                            Box::new(e),
                        )
                    })?,
                    duration_min: row.get(3)?,
                    completed: row.get(4)?,
                    book_id: row.get(5)?,
                    started_at: parse_datetime_fallback(&started_at),
                    target_duration_min: row.get(7)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(sessions)
    }

    /// The per-date view of a student's log that streak derivation
    /// consumes: one entry per distinct date, completed if any session
    /// on that date completed.
    pub fn session_days(&self, student_id: &str) -> Result<Vec<SessionDay>> {
        let mut stmt = self.conn.prepare(
            "SELECT date, MAX(completed) FROM reading_sessions
             WHERE student_id = ?1 GROUP BY date ORDER BY date",
        )?;
        let rows = stmt
            .query_map(params![student_id], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, bool>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut days = Vec::with_capacity(rows.len());
        for (date, completed) in rows {
            days.push(SessionDay {
                date: parse_date(&date)?,
                completed,
            });
        }
        Ok(days)
    }

    // ── Families ─────────────────────────────────────────────────────

    /// Create a family record with no battle state. Returns the id.
    pub fn add_family(&self, name: &str) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO families (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![id, name, Utc::now().to_rfc3339()],
        )?;
        Ok(id)
    }

    pub fn get_family_row(&self, id: &str) -> Result<Option<FamilyRow>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, name, battle, legacy_history, last_repaired, repaired_by
                 FROM families WHERE id = ?1",
                params![id],
                row_to_family,
            )
            .optional()?;
        Ok(row)
    }

    pub fn list_family_rows(&self) -> Result<Vec<FamilyRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, battle, legacy_history, last_repaired, repaired_by
             FROM families ORDER BY created_at, id",
        )?;
        let rows = stmt
            .query_map([], row_to_family)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Write the current battle structure for a family.
    pub fn write_family_battle(&self, id: &str, battle: &FamilyBattle) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE families SET battle = ?1 WHERE id = ?2",
            params![serde_json::to_string(battle)?, id],
        )?;
        if changed == 0 {
            return Err(CoreError::NotFound {
                kind: "family",
                id: id.to_string(),
            });
        }
        Ok(())
    }

    /// Apply a repair patch in one atomic statement and stamp the
    /// repair metadata.
    pub fn apply_repair(
        &self,
        patch: &RepairPatch,
        operator: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let battle_json = serde_json::to_string(&patch.battle)?;
        let changed = if patch.drop_legacy {
            self.conn.execute(
                "UPDATE families SET battle = ?1, legacy_history = NULL,
                     last_repaired = ?2, repaired_by = ?3
                 WHERE id = ?4",
                params![battle_json, now.to_rfc3339(), operator, patch.family_id],
            )?
        } else {
            self.conn.execute(
                "UPDATE families SET battle = ?1, last_repaired = ?2, repaired_by = ?3
                 WHERE id = ?4",
                params![battle_json, now.to_rfc3339(), operator, patch.family_id],
            )?
        };
        if changed == 0 {
            return Err(CoreError::NotFound {
                kind: "family",
                id: patch.family_id.clone(),
            });
        }
        Ok(())
    }

    /// Write raw JSON columns to fabricate drifted or malformed
    /// records in tests.
    #[cfg(test)]
    pub fn set_family_raw(
        &self,
        id: &str,
        battle_json: Option<&str>,
        legacy_json: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE families SET battle = ?1, legacy_history = ?2 WHERE id = ?3",
            params![battle_json, legacy_json, id],
        )?;
        Ok(())
    }

    // ── Program config ───────────────────────────────────────────────

    pub fn get_program(&self) -> Result<ProgramState> {
        let row = self
            .conn
            .query_row(
                "SELECT phase, academic_year FROM program WHERE id = 1",
                [],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;
        let Some((phase_str, year_str)) = row else {
            return Err(crate::error::PhaseError::ProgramMissing.into());
        };
        let phase = ProgramPhase::parse(&phase_str).ok_or(ValidationError::InvalidValue {
            field: "program.phase".to_string(),
            message: format!("unknown phase '{phase_str}'"),
        })?;
        let academic_year = AcademicYear::new(&year_str)?;
        Ok(ProgramState {
            phase,
            academic_year,
        })
    }

    pub fn set_program(&self, state: &ProgramState) -> Result<()> {
        self.conn.execute(
            "UPDATE program SET phase = ?1, academic_year = ?2 WHERE id = 1",
            params![state.phase.as_str(), state.academic_year.as_str()],
        )?;
        Ok(())
    }
}
