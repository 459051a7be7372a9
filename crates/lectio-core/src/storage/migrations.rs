//! Database schema migrations for lectio.
//!
//! Migrations are versioned and applied automatically when opening the
//! database. The `schema_version` table tracks the current version.
//!
//! The migration history mirrors the two generations of family battle
//! state: v1 databases carry only the flat `legacy_history` column, v2
//! adds the current `battle` structure plus repair metadata, and v3
//! adds the per-year student fields cleared at rollover.

use rusqlite::{Connection, Result as SqliteResult};

/// Apply all pending migrations to bring the database to the current
/// schema version.
///
/// # Errors
/// Returns an error if migration fails.
pub fn migrate(conn: &Connection) -> SqliteResult<()> {
    create_schema_version_table(conn)?;

    let current_version = get_schema_version(conn);

    if current_version < 1 {
        migrate_v1(conn)?;
    }
    if current_version < 2 {
        migrate_v2(conn)?;
    }
    if current_version < 3 {
        migrate_v3(conn)?;
    }

    Ok(())
}

fn create_schema_version_table(conn: &Connection) -> SqliteResult<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        );",
    )
}

/// Get the current schema version from the database.
///
/// Returns 0 if no version is set (initial database).
fn get_schema_version(conn: &Connection) -> i32 {
    conn.query_row("SELECT version FROM schema_version", [], |row| {
        row.get::<_, i32>(0)
    })
    .unwrap_or(0)
}

fn set_schema_version(conn: &Connection, version: i32) -> SqliteResult<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute(
        "INSERT INTO schema_version (version) VALUES (?1)",
        [version],
    )?;
    Ok(())
}

/// Migration v1: initial schema (baseline).
///
/// The base tables are created by `Store::migrate()` directly; this
/// only stamps the version.
fn migrate_v1(conn: &Connection) -> SqliteResult<()> {
    set_schema_version(conn, 1)?;
    Ok(())
}

/// Migration v2: current-generation battle structure.
///
/// Adds to the families table:
/// - battle: JSON current battle structure (nullable)
/// - last_repaired / repaired_by: repair metadata
///
/// Existing `legacy_history` data is left in place; the health scan and
/// repair engine reconcile the two generations.
fn migrate_v2(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "ALTER TABLE families ADD COLUMN battle TEXT;
         ALTER TABLE families ADD COLUMN last_repaired TEXT;
         ALTER TABLE families ADD COLUMN repaired_by TEXT;",
    )?;

    tx.execute("DELETE FROM schema_version", [])?;
    tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [2])?;

    tx.commit()?;
    Ok(())
}

/// Migration v3: per-year student fields.
///
/// Adds:
/// - total_days_read: duplicate of total_reading_days kept for callers
///   of the old field name; backfilled from total_reading_days
/// - books_submitted_year, bookshelf, votes: per-year data cleared at
///   every academic-year rollover
fn migrate_v3(conn: &Connection) -> SqliteResult<()> {
    let tx = conn.unchecked_transaction()?;

    tx.execute_batch(
        "ALTER TABLE students ADD COLUMN total_days_read INTEGER NOT NULL DEFAULT 0;
         ALTER TABLE students ADD COLUMN books_submitted_year INTEGER NOT NULL DEFAULT 0;
         ALTER TABLE students ADD COLUMN bookshelf TEXT NOT NULL DEFAULT '[]';
         ALTER TABLE students ADD COLUMN votes TEXT NOT NULL DEFAULT '[]';",
    )?;

    tx.execute(
        "UPDATE students SET total_days_read = total_reading_days",
        [],
    )?;

    tx.execute("DELETE FROM schema_version", [])?;
    tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [3])?;

    tx.commit()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_v1_tables(conn: &Connection) {
        conn.execute_batch(
            "CREATE TABLE students (
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
            CREATE TABLE families (
                id             TEXT PRIMARY KEY,
                name           TEXT NOT NULL,
                legacy_history TEXT,
                created_at     TEXT NOT NULL
            );",
        )
        .unwrap();
    }

    #[test]
    fn migrate_from_scratch_reaches_v3() {
        let conn = Connection::open_in_memory().unwrap();
        create_v1_tables(&conn);

        conn.execute(
            "INSERT INTO students (id, entity, school, name, total_reading_days, created_at)
             VALUES ('s1', 'e1', 'school-1', 'Reader', 12, '2024-09-01T12:00:00Z')",
            [],
        )
        .unwrap();

        migrate(&conn).unwrap();
        assert_eq!(get_schema_version(&conn), 3);

        // v3 backfills the duplicated total from the canonical field.
        let total_days_read: i64 = conn
            .query_row(
                "SELECT total_days_read FROM students WHERE id = 's1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(total_days_read, 12);

        // v2 columns exist and default to NULL.
        let battle: Option<String> = conn
            .query_row("SELECT battle FROM families LIMIT 1", [], |row| row.get(0))
            .unwrap_or(None);
        assert!(battle.is_none());
    }

    #[test]
    fn migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        create_v1_tables(&conn);

        migrate(&conn).unwrap();
        migrate(&conn).unwrap();

        assert_eq!(get_schema_version(&conn), 3);
    }

    #[test]
    fn legacy_data_survives_migration() {
        let conn = Connection::open_in_memory().unwrap();
        create_v1_tables(&conn);

        conn.execute(
            "INSERT INTO families (id, name, legacy_history, created_at)
             VALUES ('f1', 'Doe', '{\"battles\":4}', '2024-09-01T12:00:00Z')",
            [],
        )
        .unwrap();

        migrate(&conn).unwrap();

        let legacy: Option<String> = conn
            .query_row(
                "SELECT legacy_history FROM families WHERE id = 'f1'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(legacy.as_deref(), Some("{\"battles\":4}"));
    }
}
