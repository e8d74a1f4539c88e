use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Opaque student identity, as stored by the gallery.
pub type StudentId = String;

/// Opaque subject identity, resolved from a human-readable subject code.
pub type SubjectId = String;

/// Identity of one capture session (one batch, or one day, depending on the caller).
pub type SessionId = String;

/// Face encoding vector produced by an external recognition model.
///
/// Serializes as a bare JSON array of numbers. A zero-length encoding is an
/// enrollment placeholder awaiting processing and never matches anything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Encoding {
    pub values: Vec<f32>,
}

impl Encoding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// An empty encoding, stored at enrollment before the photo is processed.
    pub fn placeholder() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether two encodings can be compared at all.
    pub fn comparable_with(&self, other: &Encoding) -> bool {
        !self.is_empty() && self.len() == other.len()
    }

    /// Cosine similarity in [-1, 1]. Zero-norm vectors have similarity 0.
    ///
    /// Callers must check [`comparable_with`](Self::comparable_with) first;
    /// extra trailing dimensions are ignored.
    pub fn similarity(&self, other: &Encoding) -> f32 {
        let mut dot = 0.0f32;
        let mut norm_a = 0.0f32;
        let mut norm_b = 0.0f32;

        for (a, b) in self.values.iter().zip(other.values.iter()) {
            dot += a * b;
            norm_a += a * a;
            norm_b += b * b;
        }

        let denom = norm_a.sqrt() * norm_b.sqrt();
        if denom > 0.0 { dot / denom } else { 0.0 }
    }

    /// Euclidean distance over the shared dimensions.
    pub fn euclidean_distance(&self, other: &Encoding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }
}

impl From<Vec<f32>> for Encoding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

/// One enrolled encoding belonging to a student. A student may own many.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GalleryEntry {
    pub student_id: StudentId,
    pub encoding: Encoding,
}

impl GalleryEntry {
    pub fn new(student_id: impl Into<StudentId>, encoding: impl Into<Encoding>) -> Self {
        Self {
            student_id: student_id.into(),
            encoding: encoding.into(),
        }
    }
}

/// Outcome of matching one probe against the gallery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchAssignment {
    /// 0-based position of the probe in its batch.
    pub probe: usize,
    /// Matched student, if the nearest neighbour fell under the threshold.
    pub student_id: Option<StudentId>,
    /// Distance to the nearest comparable gallery entry, if any.
    pub distance: Option<f32>,
}

impl MatchAssignment {
    pub fn is_match(&self) -> bool {
        self.student_id.is_some()
    }
}

/// A request to record one student present for one subject in one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceMark {
    pub student_id: StudentId,
    pub subject_id: SubjectId,
    pub session_id: SessionId,
    pub marked_at: DateTime<Utc>,
}

/// An attendance write that failed for one student in a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedWrite {
    pub student_id: StudentId,
    pub error: String,
}

/// Structured result of one marking batch.
///
/// `marked` always equals `marked_students.len()` and `unknown` always
/// equals `unknown_faces.len()`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchReport {
    pub success: bool,
    pub marked: usize,
    pub unknown: usize,
    pub marked_students: Vec<StudentId>,
    pub unknown_faces: Vec<usize>,
    pub session_id: SessionId,
    pub assignments: Vec<MatchAssignment>,
    pub failed_writes: Vec<FailedWrite>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cosine_similarity_identical() {
        let a = Encoding::new(vec![1.0, 0.0, 0.0]);
        let b = Encoding::new(vec![1.0, 0.0, 0.0]);
        assert!((a.similarity(&b) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_opposite() {
        let a = Encoding::new(vec![1.0, 0.0]);
        let b = Encoding::new(vec![-1.0, 0.0]);
        assert!((a.similarity(&b) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_zero_vector() {
        let a = Encoding::new(vec![0.0, 0.0]);
        let b = Encoding::new(vec![1.0, 0.0]);
        assert_eq!(a.similarity(&b), 0.0);
    }

    #[test]
    fn test_euclidean_distance() {
        let a = Encoding::new(vec![0.0, 0.0]);
        let b = Encoding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_placeholder_not_comparable() {
        let empty = Encoding::placeholder();
        assert!(!empty.comparable_with(&Encoding::placeholder()));
        assert!(!empty.comparable_with(&Encoding::new(vec![1.0])));
        assert!(!Encoding::new(vec![1.0, 2.0]).comparable_with(&Encoding::new(vec![1.0])));
    }

    #[test]
    fn test_encoding_serializes_as_array() {
        let json = serde_json::to_string(&Encoding::new(vec![0.5, -1.0])).unwrap();
        assert_eq!(json, "[0.5,-1.0]");
    }

    #[test]
    fn test_report_field_names() {
        let report = MatchReport {
            success: true,
            marked: 0,
            unknown: 1,
            marked_students: vec![],
            unknown_faces: vec![0],
            session_id: "s".into(),
            assignments: vec![],
            failed_writes: vec![],
        };
        let value = serde_json::to_value(&report).unwrap();
        assert!(value.get("markedStudents").is_some());
        assert!(value.get("unknownFaces").is_some());
        assert!(value.get("failedWrites").is_some());
        assert_eq!(value["unknown"], 1);
    }
}
