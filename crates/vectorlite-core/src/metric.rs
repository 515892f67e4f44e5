use crate::error::{Result, VectorLiteError};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Tolerance for the unit-norm invariant on cosine-stored vectors.
pub const NORM_EPSILON: f32 = 1e-6;

/// Vector comparison function. Scores are oriented so that higher always
/// means closer, regardless of metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    Cosine,
    L2,
    Dot,
}

impl Metric {
    pub fn label(self) -> &'static str {
        match self {
            Metric::Cosine => "cosine",
            Metric::L2 => "l2",
            Metric::Dot => "dot",
        }
    }

    pub fn from_label(label: &str) -> Result<Self> {
        match label {
            "cosine" => Ok(Metric::Cosine),
            "l2" => Ok(Metric::L2),
            "dot" => Ok(Metric::Dot),
            other => Err(VectorLiteError::InvalidArgument(format!(
                "unknown metric '{other}'"
            ))),
        }
    }

    /// Similarity score between two vectors of equal dimension.
    /// Cosine assumes both sides are already normalized.
    #[inline]
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        match self {
            Metric::Cosine | Metric::Dot => dot(a, b),
            Metric::L2 => -l2_sq(a, b),
        }
    }

    /// Distance form of [`Metric::score`]: lower means closer. Graph
    /// traversal code works in this orientation.
    #[inline]
    pub fn distance(self, a: &[f32], b: &[f32]) -> f32 {
        -self.score(a, b)
    }

    /// Metric-aware ingest preprocessing. Cosine normalizes to unit length;
    /// the all-zero vector passes through untouched so no NaN can appear.
    pub fn preprocess<'a>(self, vector: &'a [f32]) -> Cow<'a, [f32]> {
        if self != Metric::Cosine {
            return Cow::Borrowed(vector);
        }
        let norm_sq: f32 = vector.iter().map(|x| x * x).sum();
        if norm_sq == 0.0 || (norm_sq - 1.0).abs() < NORM_EPSILON {
            return Cow::Borrowed(vector);
        }
        let inv = 1.0 / norm_sq.sqrt();
        Cow::Owned(vector.iter().map(|x| x * inv).collect())
    }
}

#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn l2_sq(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| {
            let d = x - y;
            d * d
        })
        .sum()
}

pub fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_preprocess_normalizes() {
        let v = [3.0, 0.0, 0.0];
        let out = Metric::Cosine.preprocess(&v);
        assert!((out[0] - 1.0).abs() < NORM_EPSILON);
        assert!((l2_norm(&out) - 1.0).abs() < NORM_EPSILON);
    }

    #[test]
    fn cosine_preprocess_zero_passes_through() {
        let v = [0.0f32; 4];
        let out = Metric::Cosine.preprocess(&v);
        assert_eq!(out.as_ref(), &v);
        assert!(out.iter().all(|x| !x.is_nan()));
    }

    #[test]
    fn unit_vector_borrows() {
        let v = [0.0, 1.0, 0.0];
        assert!(matches!(Metric::Cosine.preprocess(&v), Cow::Borrowed(_)));
    }

    #[test]
    fn l2_score_is_negated_distance() {
        let a = [0.0, 0.0];
        let b = [3.0, 4.0];
        assert_eq!(Metric::L2.score(&a, &b), -25.0);
        assert_eq!(Metric::L2.distance(&a, &b), 25.0);
    }

    #[test]
    fn label_round_trip() {
        for m in [Metric::Cosine, Metric::L2, Metric::Dot] {
            assert_eq!(Metric::from_label(m.label()).unwrap(), m);
        }
        assert!(Metric::from_label("hamming").is_err());
    }
}
