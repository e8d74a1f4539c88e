//! rollcall-store — SQLite persistence for rollcall.
//!
//! Implements the gallery, subject directory and attendance log interfaces
//! from `rollcall-core` on one SQLite database. The connection lives on a
//! dedicated thread via `tokio-rusqlite`, so calls never block the runtime.

pub mod migrations;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rollcall_core::{
    AttendanceLog, AttendanceMark, Encoding, GalleryEntry, GalleryStore, StoreError, SubjectDirectory,
    SubjectId,
};
use rusqlite::{params, OptionalExtension};
use serde::Serialize;
use std::path::{Path, PathBuf};

pub type Result<T> = std::result::Result<T, StoreError>;

/// A subject as listed by the catalogue.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Subject {
    pub id: SubjectId,
    pub code: String,
    pub name: String,
}

/// One stored attendance mark.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub subject_id: SubjectId,
    pub session_id: String,
    pub marked_at: DateTime<Utc>,
}

/// Default database location: `$ROLLCALL_DB_PATH`, else
/// `$XDG_DATA_HOME/rollcall/attendance.db`, else `~/.local/share/rollcall/attendance.db`.
pub fn default_db_path() -> PathBuf {
    if let Ok(path) = std::env::var("ROLLCALL_DB_PATH") {
        return PathBuf::from(path);
    }
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
        .join("attendance.db")
}

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    conn: tokio_rusqlite::Connection,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Unavailable(format!("creating {}: {e}", parent.display()))
                })?;
            }
        }

        let conn = tokio_rusqlite::Connection::open(path)
            .await
            .map_err(|e| StoreError::Unavailable(format!("opening {}: {e}", path.display())))?;
        let store = Self::init(conn).await?;
        tracing::info!(path = %path.display(), "attendance database opened");
        Ok(store)
    }

    /// Fresh in-memory database, used by tests and dry runs.
    pub async fn open_in_memory() -> Result<Self> {
        let conn = tokio_rusqlite::Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;
        Self::init(conn).await
    }

    async fn init(conn: tokio_rusqlite::Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch("PRAGMA foreign_keys = ON;")?;
            migrations::run_migrations(conn)?;
            Ok(())
        })
        .await
        .map_err(store_err)?;
        Ok(Self { conn })
    }

    /// Insert a subject, or rename it if the code already exists.
    pub async fn upsert_subject(&self, code: &str, name: &str) -> Result<Subject> {
        let code = code.trim().to_string();
        let name = name.trim().to_string();
        if code.is_empty() {
            return Err(StoreError::Query("subject code must not be empty".into()));
        }

        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO subjects (id, code, name, created_at) VALUES (?1, ?2, ?3, ?4)
                     ON CONFLICT(code) DO UPDATE SET name = excluded.name",
                    params![
                        uuid::Uuid::new_v4().to_string(),
                        code,
                        name,
                        Utc::now().to_rfc3339()
                    ],
                )?;
                let subject = conn.query_row(
                    "SELECT id, code, name FROM subjects WHERE code = ?1",
                    [&code],
                    |row| {
                        Ok(Subject {
                            id: row.get(0)?,
                            code: row.get(1)?,
                            name: row.get(2)?,
                        })
                    },
                )?;
                Ok(subject)
            })
            .await
            .map_err(store_err)
    }

    /// Look up a subject by its code.
    pub async fn subject_by_code(&self, code: &str) -> Result<Option<Subject>> {
        let code = code.to_string();
        self.conn
            .call(move |conn| {
                let subject = conn
                    .query_row(
                        "SELECT id, code, name FROM subjects WHERE code = ?1",
                        [&code],
                        |row| {
                            Ok(Subject {
                                id: row.get(0)?,
                                code: row.get(1)?,
                                name: row.get(2)?,
                            })
                        },
                    )
                    .optional()?;
                Ok(subject)
            })
            .await
            .map_err(store_err)
    }

    /// All subjects, ordered by code.
    pub async fn list_subjects(&self) -> Result<Vec<Subject>> {
        self.conn
            .call(|conn| {
                let mut stmt = conn.prepare("SELECT id, code, name FROM subjects ORDER BY code")?;
                let rows = stmt.query_map([], |row| {
                    Ok(Subject {
                        id: row.get(0)?,
                        code: row.get(1)?,
                        name: row.get(2)?,
                    })
                })?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
            .map_err(store_err)
    }

    /// Store one encoding for a student. An empty encoding is kept as a
    /// placeholder until the photo is processed. Returns the new row id.
    pub async fn enroll(&self, student_id: &str, encoding: &Encoding) -> Result<String> {
        let student_id = student_id.trim().to_string();
        if student_id.is_empty() {
            return Err(StoreError::Query("student id must not be empty".into()));
        }
        let json = serde_json::to_string(encoding)
            .map_err(|e| StoreError::Query(format!("encoding serialization: {e}")))?;
        let id = uuid::Uuid::new_v4().to_string();
        let dims = encoding.len();

        let row_id = id.clone();
        self.conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO student_encodings (id, student_id, encoding, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![row_id, student_id, json, Utc::now().to_rfc3339()],
                )?;
                Ok(())
            })
            .await
            .map_err(store_err)?;

        tracing::info!(id = %id, dims, "encoding enrolled");
        Ok(id)
    }

    /// Number of enrolled encodings, placeholders included.
    pub async fn gallery_size(&self) -> Result<usize> {
        self.conn
            .call(|conn| {
                let count: i64 =
                    conn.query_row("SELECT COUNT(*) FROM student_encodings", [], |row| row.get(0))?;
                Ok(count as usize)
            })
            .await
            .map_err(store_err)
    }

    /// Attendance marks for one subject, most recent first.
    pub async fn attendance_for_subject(&self, subject_id: &str) -> Result<Vec<AttendanceRecord>> {
        let subject_id = subject_id.to_string();
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, student_id, subject_id, session_id, marked_at
                     FROM attendance WHERE subject_id = ?1
                     ORDER BY marked_at DESC, student_id",
                )?;
                let rows = stmt.query_map([&subject_id], attendance_row)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
            .map_err(store_err)
    }

    /// Attendance marks for one student, optionally restricted to one
    /// subject, most recent first.
    pub async fn attendance_for_student(
        &self,
        student_id: &str,
        subject_id: Option<&str>,
    ) -> Result<Vec<AttendanceRecord>> {
        let student_id = student_id.trim().to_string();
        let subject_id = subject_id.map(str::to_string);
        self.conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, student_id, subject_id, session_id, marked_at
                     FROM attendance
                     WHERE student_id = ?1 AND (?2 IS NULL OR subject_id = ?2)
                     ORDER BY marked_at DESC, subject_id",
                )?;
                let rows = stmt.query_map(params![student_id, subject_id], attendance_row)?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
            .map_err(store_err)
    }

    /// Number of encodings enrolled for one student, placeholders included.
    pub async fn enrolled_count(&self, student_id: &str) -> Result<usize> {
        let student_id = student_id.trim().to_string();
        self.conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM student_encodings WHERE student_id = ?1",
                    [&student_id],
                    |row| row.get(0),
                )?;
                Ok(count as usize)
            })
            .await
            .map_err(store_err)
    }
}

fn attendance_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AttendanceRecord> {
    let marked_at: String = row.get(4)?;
    Ok(AttendanceRecord {
        id: row.get(0)?,
        student_id: row.get(1)?,
        subject_id: row.get(2)?,
        session_id: row.get(3)?,
        marked_at: parse_timestamp(4, &marked_at)?,
    })
}

#[async_trait]
impl GalleryStore for SqliteStore {
    async fn fetch_all_encodings(&self) -> Result<Vec<GalleryEntry>> {
        let rows = self
            .conn
            .call(|conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, student_id, encoding FROM student_encodings ORDER BY created_at, id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?;
                Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
            })
            .await
            .map_err(store_err)?;

        Ok(rows
            .into_iter()
            .map(|(id, student_id, raw)| {
                let encoding = serde_json::from_str::<Encoding>(&raw).unwrap_or_else(|e| {
                    tracing::warn!(id = %id, student = %student_id, error = %e, "undecodable encoding; treating as placeholder");
                    Encoding::placeholder()
                });
                GalleryEntry { student_id, encoding }
            })
            .collect())
    }
}

#[async_trait]
impl SubjectDirectory for SqliteStore {
    async fn resolve_subject(&self, code: &str) -> Result<Option<SubjectId>> {
        Ok(self.subject_by_code(code).await?.map(|s| s.id))
    }
}

#[async_trait]
impl AttendanceLog for SqliteStore {
    async fn record_attendance(&self, mark: &AttendanceMark) -> Result<()> {
        let mark = mark.clone();
        let inserted = self
            .conn
            .call(move |conn| {
                let n = conn.execute(
                    "INSERT OR IGNORE INTO attendance (id, student_id, subject_id, session_id, marked_at)
                     VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        uuid::Uuid::new_v4().to_string(),
                        mark.student_id,
                        mark.subject_id,
                        mark.session_id,
                        mark.marked_at.to_rfc3339()
                    ],
                )?;
                Ok(n > 0)
            })
            .await
            .map_err(store_err)?;

        if !inserted {
            tracing::debug!("attendance already recorded for this session");
        }
        Ok(())
    }
}

fn parse_timestamp(idx: usize, raw: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e)))
}

fn store_err(e: tokio_rusqlite::Error) -> StoreError {
    match e {
        tokio_rusqlite::Error::ConnectionClosed => StoreError::Unavailable("database connection closed".into()),
        other => StoreError::Query(other.to_string()),
    }
}
