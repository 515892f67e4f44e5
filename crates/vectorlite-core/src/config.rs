use crate::error::{Result, VectorLiteError};
use crate::metric::Metric;
use serde::{Deserialize, Serialize};

/// ANN strategy selector. All three share one operation contract; the
/// engine dispatches on this tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnnStrategy {
    BruteForce,
    Hnsw,
    Ivf,
}

impl AnnStrategy {
    pub fn label(self) -> &'static str {
        match self {
            AnnStrategy::BruteForce => "bruteforce",
            AnnStrategy::Hnsw => "hnsw",
            AnnStrategy::Ivf => "ivf",
        }
    }

    pub fn from_label(label: &str) -> Result<Self> {
        match label {
            "bruteforce" => Ok(AnnStrategy::BruteForce),
            "hnsw" => Ok(AnnStrategy::Hnsw),
            "ivf" => Ok(AnnStrategy::Ivf),
            other => Err(VectorLiteError::InvalidArgument(format!(
                "unknown strategy '{other}'"
            ))),
        }
    }
}

/// HNSW tuning knobs.
#[derive(Debug, Clone, PartialEq)]
pub struct HnswParams {
    /// Max links per node on layers above 0. Layer 0 allows `2 * m`.
    pub m: usize,
    /// Beam width while building.
    pub ef_construction: usize,
    /// Beam width while searching; the effective width is `max(ef_search, k)`.
    pub ef_search: usize,
    /// Level sampling multiplier; `None` resolves to `1 / ln(m)`.
    pub level_mult: Option<f64>,
    /// RNG seed for level sampling. Fixed seed + insertion order gives a
    /// deterministic graph.
    pub seed: u64,
    /// Re-adding a deleted id reuses its old neighborhood instead of
    /// re-linking from scratch.
    pub allow_replace_deleted: bool,
}

impl Default for HnswParams {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            level_mult: None,
            seed: 42,
            allow_replace_deleted: false,
        }
    }
}

impl HnswParams {
    #[allow(clippy::cast_precision_loss)]
    pub fn level_multiplier(&self) -> f64 {
        self.level_mult
            .unwrap_or_else(|| 1.0 / (self.m.max(2) as f64).ln())
    }
}

/// IVF tuning knobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvfParams {
    /// Number of centroids.
    pub nlist: usize,
    /// Posting lists scanned per query.
    pub nprobe: usize,
}

impl Default for IvfParams {
    fn default() -> Self {
        Self {
            nlist: 16,
            nprobe: 1,
        }
    }
}

/// Engine construction options. `dim` is required; everything else has the
/// documented defaults.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub dim: u16,
    pub metric: Metric,
    pub capacity: u32,
    pub strategy: AnnStrategy,
    pub hnsw: HnswParams,
    pub ivf: IvfParams,
    /// Keep WAL frames in memory until `flush_wal`/`persist` instead of
    /// writing through on every mutation.
    pub wal_buffered: bool,
}

impl EngineOptions {
    pub fn new(dim: u16) -> Self {
        Self {
            dim,
            metric: Metric::Cosine,
            capacity: 1024,
            strategy: AnnStrategy::BruteForce,
            hnsw: HnswParams::default(),
            ivf: IvfParams::default(),
            wal_buffered: false,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.dim == 0 {
            return Err(VectorLiteError::InvalidArgument(
                "dim must be positive".to_string(),
            ));
        }
        if self.hnsw.m < 2 {
            return Err(VectorLiteError::InvalidArgument(
                "hnsw.m must be at least 2".to_string(),
            ));
        }
        if self.hnsw.ef_construction == 0 || self.hnsw.ef_search == 0 {
            return Err(VectorLiteError::InvalidArgument(
                "hnsw beam widths must be positive".to_string(),
            ));
        }
        if self.ivf.nlist == 0 || self.ivf.nprobe == 0 {
            return Err(VectorLiteError::InvalidArgument(
                "ivf.nlist and ivf.nprobe must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_documented_values() {
        let opts = EngineOptions::new(8);
        assert_eq!(opts.metric, Metric::Cosine);
        assert_eq!(opts.capacity, 1024);
        assert_eq!(opts.strategy, AnnStrategy::BruteForce);
        assert_eq!(opts.hnsw.m, 16);
        assert_eq!(opts.hnsw.ef_construction, 200);
        assert_eq!(opts.hnsw.ef_search, 50);
        assert_eq!(opts.ivf.nprobe, 1);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn level_mult_defaults_to_inverse_log_m() {
        let params = HnswParams::default();
        let expected = 1.0 / (16f64).ln();
        assert!((params.level_multiplier() - expected).abs() < 1e-12);

        let pinned = HnswParams {
            level_mult: Some(0.5),
            ..HnswParams::default()
        };
        assert!((pinned.level_multiplier() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_dim_rejected() {
        assert!(EngineOptions::new(0).validate().is_err());
    }
}
