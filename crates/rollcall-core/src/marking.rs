//! Batch attendance marking: validate, resolve, match, write, report.

use crate::matcher::{DuplicatePolicy, MatchConfig, Matcher, NearestNeighborMatcher};
use crate::request::MarkRequest;
use crate::store::{AttendanceLog, GalleryStore, StoreError, SubjectDirectory};
use crate::types::{AttendanceMark, FailedWrite, MatchReport, SessionId, StudentId};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum MarkError {
    #[error("invalid request: {0}")]
    Validation(String),
    #[error("unknown subject: {0}")]
    UnknownSubject(String),
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl MarkError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            MarkError::Validation(_) => "validation_error",
            MarkError::UnknownSubject(_) => "unknown_subject",
            MarkError::Store(_) => "store_error",
        }
    }
}

/// Runs marking batches against a gallery, subject directory and attendance log.
///
/// Holds no per-batch state, so one marker may serve concurrent batches.
#[derive(Clone)]
pub struct AttendanceMarker {
    gallery: Arc<dyn GalleryStore>,
    subjects: Arc<dyn SubjectDirectory>,
    log: Arc<dyn AttendanceLog>,
    config: MatchConfig,
}

impl AttendanceMarker {
    pub fn new(
        gallery: Arc<dyn GalleryStore>,
        subjects: Arc<dyn SubjectDirectory>,
        log: Arc<dyn AttendanceLog>,
        config: MatchConfig,
    ) -> Self {
        Self {
            gallery,
            subjects,
            log,
            config,
        }
    }

    /// Build a marker over a single backend implementing all three interfaces.
    pub fn with_backend<S>(backend: Arc<S>, config: MatchConfig) -> Self
    where
        S: GalleryStore + SubjectDirectory + AttendanceLog + 'static,
    {
        Self::new(backend.clone(), backend.clone(), backend, config)
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    /// Process one batch to completion.
    ///
    /// Subject resolution and gallery read failures abort before any write.
    /// Individual write failures are recorded in the report and do not stop
    /// the batch; writes already committed are kept.
    pub async fn mark(
        &self,
        request: &MarkRequest,
        default_session: impl FnOnce() -> SessionId,
    ) -> Result<MatchReport, MarkError> {
        let code = request.subject_code.trim();
        if code.is_empty() {
            return Err(MarkError::Validation("subject_code must not be empty".into()));
        }

        let subject_id = self
            .subjects
            .resolve_subject(code)
            .await?
            .ok_or_else(|| MarkError::UnknownSubject(code.to_string()))?;

        let gallery = self.gallery.fetch_all_encodings().await?;
        let session_id = request.session_id.clone().unwrap_or_else(default_session);

        tracing::debug!(
            subject = code,
            session = %session_id,
            probes = request.encodings.len(),
            gallery = gallery.len(),
            "matching batch"
        );

        let matcher = NearestNeighborMatcher::from(&self.config);
        let assignments = matcher.assign_batch(&request.encodings, &gallery);

        let mut written: HashSet<StudentId> = HashSet::new();
        let mut marked_students: Vec<StudentId> = Vec::new();
        let mut failed_writes: Vec<FailedWrite> = Vec::new();
        let mut unknown_faces: Vec<usize> = Vec::new();

        for assignment in &assignments {
            let Some(student_id) = assignment.student_id.as_ref() else {
                unknown_faces.push(assignment.probe);
                continue;
            };

            // Claim the student before issuing the write so overlapping
            // probes cannot produce a second write in this batch.
            let first_claim = written.insert(student_id.clone());
            if !first_claim && self.config.duplicate_policy == DuplicatePolicy::Batch {
                tracing::trace!(probe = assignment.probe, student = %student_id, "duplicate match suppressed");
                continue;
            }

            let mark = AttendanceMark {
                student_id: student_id.clone(),
                subject_id: subject_id.clone(),
                session_id: session_id.clone(),
                marked_at: Utc::now(),
            };

            match self.log.record_attendance(&mark).await {
                Ok(()) => {
                    failed_writes.retain(|f| &f.student_id != student_id);
                    if !marked_students.contains(student_id) {
                        marked_students.push(student_id.clone());
                    }
                }
                Err(e) => {
                    tracing::warn!(student = %student_id, subject = code, error = %e, "attendance write failed");
                    // Let a later probe of the same student retry.
                    written.remove(student_id);
                    if !marked_students.contains(student_id)
                        && !failed_writes.iter().any(|f| &f.student_id == student_id)
                    {
                        failed_writes.push(FailedWrite {
                            student_id: student_id.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }

        tracing::info!(
            subject = code,
            session = %session_id,
            marked = marked_students.len(),
            unknown = unknown_faces.len(),
            failed = failed_writes.len(),
            "batch processed"
        );

        Ok(MatchReport {
            success: true,
            marked: marked_students.len(),
            unknown: unknown_faces.len(),
            marked_students,
            unknown_faces,
            session_id,
            assignments,
            failed_writes,
        })
    }
}
