//! Nearest-neighbour assignment of probe encodings to enrolled students.

use crate::distance::DistanceMetric;
use crate::types::{Encoding, GalleryEntry, MatchAssignment};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Default maximum distance for a positive match.
pub const DEFAULT_THRESHOLD: f32 = 0.6;

/// How repeated matches of one student within a batch turn into writes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePolicy {
    /// One write per student per batch; later probes only count for reporting.
    #[default]
    Batch,
    /// One write per matching probe; the store's uniqueness constraint deduplicates.
    Store,
}

impl fmt::Display for DuplicatePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DuplicatePolicy::Batch => f.write_str("batch"),
            DuplicatePolicy::Store => f.write_str("store"),
        }
    }
}

impl FromStr for DuplicatePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "batch" => Ok(DuplicatePolicy::Batch),
            "store" => Ok(DuplicatePolicy::Store),
            other => Err(format!("unknown duplicate policy: {other}")),
        }
    }
}

/// Matching parameters for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MatchConfig {
    pub metric: DistanceMetric,
    /// A probe matches only if its nearest distance is strictly below this.
    pub threshold: f32,
    pub duplicate_policy: DuplicatePolicy,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            metric: DistanceMetric::default(),
            threshold: DEFAULT_THRESHOLD,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }
}

/// Strategy for assigning a probe to at most one gallery identity.
pub trait Matcher {
    fn assign(&self, probe_index: usize, probe: &Encoding, gallery: &[GalleryEntry]) -> MatchAssignment;

    /// Assign every probe of a batch, in probe order.
    fn assign_batch(&self, probes: &[Encoding], gallery: &[GalleryEntry]) -> Vec<MatchAssignment> {
        probes
            .iter()
            .enumerate()
            .map(|(i, probe)| self.assign(i, probe, gallery))
            .collect()
    }
}

/// Full-scan nearest-neighbour matcher.
///
/// Every gallery entry is compared; the first strictly closest entry wins, so
/// the outcome does not depend on which under-threshold entry comes first.
/// A student with several encodings matches on the best of them.
#[derive(Debug, Clone, Copy)]
pub struct NearestNeighborMatcher {
    pub metric: DistanceMetric,
    pub threshold: f32,
}

impl NearestNeighborMatcher {
    pub fn new(metric: DistanceMetric, threshold: f32) -> Self {
        Self { metric, threshold }
    }
}

impl From<&MatchConfig> for NearestNeighborMatcher {
    fn from(config: &MatchConfig) -> Self {
        Self::new(config.metric, config.threshold)
    }
}

impl Matcher for NearestNeighborMatcher {
    fn assign(&self, probe_index: usize, probe: &Encoding, gallery: &[GalleryEntry]) -> MatchAssignment {
        let mut best_dist = f32::INFINITY;
        let mut best_idx: Option<usize> = None;

        // No early exit: a later, closer entry must override an earlier one.
        for (i, entry) in gallery.iter().enumerate() {
            let dist = self.metric.distance(probe, &entry.encoding);
            if dist < best_dist {
                best_dist = dist;
                best_idx = Some(i);
            }
        }

        match best_idx {
            Some(idx) if best_dist < self.threshold => MatchAssignment {
                probe: probe_index,
                student_id: Some(gallery[idx].student_id.clone()),
                distance: Some(best_dist),
            },
            _ => MatchAssignment {
                probe: probe_index,
                student_id: None,
                distance: best_idx.map(|_| best_dist),
            },
        }
    }
}
