//! One contract over three search strategies. The engine dispatches on the
//! tag; strategy state stays serializable and value-owned.

use crate::bruteforce;
use crate::hnsw::HnswIndex;
use crate::ivf::IvfIndex;
use roaring::RoaringBitmap;
use vectorlite_core::{AnnStrategy, EngineOptions, Result, VectorId, VectorLiteError};
use vectorlite_store::VectorStore;

/// One search result before meta enrichment. Higher score = closer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Hit {
    pub id: VectorId,
    pub score: f32,
}

#[derive(Debug)]
pub enum AnnIndex {
    BruteForce,
    Hnsw(HnswIndex),
    Ivf(IvfIndex),
}

impl AnnIndex {
    pub fn for_options(options: &EngineOptions) -> Self {
        match options.strategy {
            AnnStrategy::BruteForce => AnnIndex::BruteForce,
            AnnStrategy::Hnsw => AnnIndex::Hnsw(HnswIndex::new(options.hnsw.clone())),
            AnnStrategy::Ivf => {
                AnnIndex::Ivf(IvfIndex::new(options.ivf.clone(), usize::from(options.dim)))
            }
        }
    }

    pub fn strategy(&self) -> AnnStrategy {
        match self {
            AnnIndex::BruteForce => AnnStrategy::BruteForce,
            AnnIndex::Hnsw(_) => AnnStrategy::Hnsw,
            AnnIndex::Ivf(_) => AnnStrategy::Ivf,
        }
    }

    /// Incremental index update after the store mutation for `id`.
    pub fn insert(&mut self, store: &VectorStore, id: VectorId) {
        match self {
            AnnIndex::BruteForce => {}
            AnnIndex::Hnsw(index) => index.insert(store, id),
            AnnIndex::Ivf(index) => index.insert(store, id),
        }
    }

    pub fn remove(&mut self, id: VectorId) {
        match self {
            AnnIndex::BruteForce => {}
            AnnIndex::Hnsw(index) => index.remove(id),
            AnnIndex::Ivf(index) => index.remove(id),
        }
    }

    pub fn search(
        &self,
        store: &VectorStore,
        query: &[f32],
        k: usize,
        allowed: Option<&RoaringBitmap>,
    ) -> Vec<Hit> {
        match self {
            AnnIndex::BruteForce => bruteforce::search(store, query, k, allowed),
            AnnIndex::Hnsw(index) => index.search(store, query, k, allowed),
            AnnIndex::Ivf(index) => index.search(store, query, k, allowed),
        }
    }

    /// Reconstruct the strategy state from the store alone.
    pub fn rebuild(&mut self, store: &VectorStore) {
        match self {
            AnnIndex::BruteForce => {}
            AnnIndex::Hnsw(index) => index.rebuild(store),
            AnnIndex::Ivf(index) => index.rebuild(store),
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            AnnIndex::BruteForce => {}
            AnnIndex::Hnsw(index) => index
                .encode(&mut buf)
                .map_err(|e| VectorLiteError::Storage(e.to_string()))?,
            AnnIndex::Ivf(index) => index
                .encode(&mut buf)
                .map_err(|e| VectorLiteError::Storage(e.to_string()))?,
        }
        Ok(buf)
    }

    pub fn decode(strategy: AnnStrategy, bytes: &[u8]) -> Result<Self> {
        match strategy {
            AnnStrategy::BruteForce => {
                if bytes.is_empty() {
                    Ok(AnnIndex::BruteForce)
                } else {
                    Err(VectorLiteError::CorruptSnapshot(
                        "bruteforce strategy carries no state".to_string(),
                    ))
                }
            }
            AnnStrategy::Hnsw => HnswIndex::decode(bytes)
                .map(AnnIndex::Hnsw)
                .map_err(|e| VectorLiteError::CorruptSnapshot(format!("hnsw state: {e}"))),
            AnnStrategy::Ivf => IvfIndex::decode(bytes)
                .map(AnnIndex::Ivf)
                .map_err(|e| VectorLiteError::CorruptSnapshot(format!("ivf state: {e}"))),
        }
    }
}
