//! Collaborator interfaces consumed by the marking flow.
//!
//! The matcher never touches storage directly: it reads the gallery, resolves
//! subject codes and requests attendance writes through these traits.

use crate::types::{AttendanceMark, GalleryEntry, SubjectId};
use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    Query(String),
}

/// Read access to every enrolled (student, encoding) pair.
#[async_trait]
pub trait GalleryStore: Send + Sync {
    async fn fetch_all_encodings(&self) -> Result<Vec<GalleryEntry>, StoreError>;
}

/// Resolution of human-readable subject codes.
#[async_trait]
pub trait SubjectDirectory: Send + Sync {
    /// `Ok(None)` when the code is well-formed but unknown.
    async fn resolve_subject(&self, code: &str) -> Result<Option<SubjectId>, StoreError>;
}

/// Append-only attendance log.
///
/// Implementations must tolerate a repeated mark for the same
/// (student, subject, session).
#[async_trait]
pub trait AttendanceLog: Send + Sync {
    async fn record_attendance(&self, mark: &AttendanceMark) -> Result<(), StoreError>;
}
