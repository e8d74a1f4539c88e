//! Distance metrics between face encodings.

use crate::types::Encoding;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Distance reported for encodings that cannot be compared (length mismatch
/// or empty placeholder). Exceeds every finite threshold.
pub const MISMATCH_DISTANCE: f32 = f32::INFINITY;

/// Metric used to compare a probe against gallery encodings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    /// Square root of the summed squared differences.
    #[default]
    Euclidean,
    /// `1 - cosine similarity`, in [0, 2].
    Cosine,
}

impl DistanceMetric {
    /// Distance between two encodings. Never fails: incomparable encodings
    /// yield [`MISMATCH_DISTANCE`].
    pub fn distance(&self, a: &Encoding, b: &Encoding) -> f32 {
        if !a.comparable_with(b) {
            return MISMATCH_DISTANCE;
        }
        match self {
            DistanceMetric::Euclidean => a.euclidean_distance(b),
            DistanceMetric::Cosine => (1.0 - a.similarity(b)).max(0.0),
        }
    }
}

impl fmt::Display for DistanceMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DistanceMetric::Euclidean => f.write_str("euclidean"),
            DistanceMetric::Cosine => f.write_str("cosine"),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(format!("unknown distance metric: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enc(values: &[f32]) -> Encoding {
        Encoding::new(values.to_vec())
    }

    #[test]
    fn test_euclidean_symmetric_and_non_negative() {
        let a = enc(&[0.1, -0.4, 0.9, 0.0]);
        let b = enc(&[0.3, 0.2, -0.5, 1.0]);
        let ab = DistanceMetric::Euclidean.distance(&a, &b);
        let ba = DistanceMetric::Euclidean.distance(&b, &a);
        assert!(ab >= 0.0);
        assert_eq!(ab, ba);
    }

    #[test]
    fn test_euclidean_self_is_zero() {
        let a = enc(&[0.25, 0.5, -0.75]);
        assert_eq!(DistanceMetric::Euclidean.distance(&a, &a), 0.0);
    }

    #[test]
    fn test_length_mismatch_exceeds_default_threshold() {
        let a = enc(&[0.0, 0.0, 0.0]);
        let b = enc(&[0.0, 0.0]);
        for metric in [DistanceMetric::Euclidean, DistanceMetric::Cosine] {
            let d = metric.distance(&a, &b);
            assert!(d > 0.6, "{metric}: {d}");
            assert_eq!(d, MISMATCH_DISTANCE);
        }
    }

    #[test]
    fn test_placeholder_is_infinitely_distant() {
        let empty = Encoding::placeholder();
        assert_eq!(DistanceMetric::Euclidean.distance(&empty, &empty), MISMATCH_DISTANCE);
    }

    #[test]
    fn test_cosine_distance() {
        let a = enc(&[1.0, 0.0]);
        let b = enc(&[0.0, 1.0]);
        assert!((DistanceMetric::Cosine.distance(&a, &b) - 1.0).abs() < 1e-6);
        assert!(DistanceMetric::Cosine.distance(&a, &a).abs() < 1e-6);
    }

    #[test]
    fn test_parse_metric() {
        assert_eq!("Euclidean".parse::<DistanceMetric>(), Ok(DistanceMetric::Euclidean));
        assert_eq!("cosine".parse::<DistanceMetric>(), Ok(DistanceMetric::Cosine));
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }
}
