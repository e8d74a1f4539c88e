//! rollcall-core — Face-encoding matcher and attendance marking engine.
//!
//! Assigns captured face encodings to enrolled students by nearest-neighbour
//! search under a distance threshold, and turns matches into at most one
//! attendance write per student per batch.

pub mod distance;
pub mod marking;
pub mod matcher;
pub mod request;
pub mod store;
pub mod types;

pub use distance::{DistanceMetric, MISMATCH_DISTANCE};
pub use marking::{AttendanceMarker, MarkError};
pub use matcher::{DuplicatePolicy, MatchConfig, Matcher, NearestNeighborMatcher, DEFAULT_THRESHOLD};
pub use request::MarkRequest;
pub use store::{AttendanceLog, GalleryStore, StoreError, SubjectDirectory};
pub use types::{
    AttendanceMark, Encoding, FailedWrite, GalleryEntry, MatchAssignment, MatchReport, SessionId,
    StudentId, SubjectId,
};
