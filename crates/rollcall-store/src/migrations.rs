//! Schema migrations, tracked in a single-row `schema_version` table.

use rusqlite::{Connection, OptionalExtension};

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// Bring the database up to [`SCHEMA_VERSION`].
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);",
    )?;

    let current = schema_version(conn)?;

    if current < 1 {
        migrate_v1(conn)?;
    }

    Ok(())
}

/// Version recorded in the database, 0 for a fresh file.
pub fn schema_version(conn: &Connection) -> rusqlite::Result<i32> {
    let version: Option<i32> = conn
        .query_row("SELECT MAX(version) FROM schema_version", [], |row| row.get(0))
        .optional()?
        .flatten();
    Ok(version.unwrap_or(0))
}

fn set_version(conn: &Connection, version: i32) -> rusqlite::Result<()> {
    conn.execute("DELETE FROM schema_version", [])?;
    conn.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
    Ok(())
}

/// Subjects, enrolled encodings and the attendance log.
fn migrate_v1(conn: &Connection) -> rusqlite::Result<()> {
    tracing::info!("applying schema migration v1");

    conn.execute_batch(
        "BEGIN;
         CREATE TABLE IF NOT EXISTS subjects (
             id          TEXT PRIMARY KEY,
             code        TEXT NOT NULL UNIQUE,
             name        TEXT NOT NULL,
             created_at  TEXT NOT NULL
         );
         CREATE TABLE IF NOT EXISTS student_encodings (
             id          TEXT PRIMARY KEY,
             student_id  TEXT NOT NULL,
             encoding    TEXT NOT NULL,
             created_at  TEXT NOT NULL
         );
         CREATE INDEX IF NOT EXISTS idx_student_encodings_student
             ON student_encodings(student_id);
         CREATE TABLE IF NOT EXISTS attendance (
             id          TEXT PRIMARY KEY,
             student_id  TEXT NOT NULL,
             subject_id  TEXT NOT NULL REFERENCES subjects(id),
             session_id  TEXT NOT NULL,
             marked_at   TEXT NOT NULL,
             UNIQUE (student_id, subject_id, session_id)
         );
         CREATE INDEX IF NOT EXISTS idx_attendance_subject
             ON attendance(subject_id, marked_at);
         COMMIT;",
    )?;

    set_version(conn, 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fresh_database_migrates() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_version", [], |r| r.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}
