use crate::coord::{self, CasOutcome, CommitTsInput, HeadPointer, HeadStore};
use crate::lock::AsyncLock;
use crate::recovery;
use roaring::RoaringBitmap;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};
use vectorlite_core::{
    AnnStrategy, EngineOptions, FilterExpr, Metric, Result, VectorId, VectorLiteError,
};
use vectorlite_index::{evaluate, snapshot, AnnIndex, AttributeIndex, IvfEvaluation};
use vectorlite_store::wal::{WalRecord, WalWriter};
use vectorlite_store::{StorageAdapter, UpsertOutcome, VectorStore};

/// One search result: id, metric score (higher = closer), attached meta.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchHit {
    pub id: VectorId,
    pub score: f32,
    pub meta: Option<Value>,
}

/// Search restriction: a filter-expression tree evaluated through the
/// attribute index, or an arbitrary predicate over `(id, meta)`.
#[derive(Clone)]
pub enum SearchFilter {
    Expr(FilterExpr),
    Predicate(Arc<dyn Fn(VectorId, Option<&Value>) -> bool + Send + Sync>),
}

impl SearchFilter {
    pub fn predicate(f: impl Fn(VectorId, Option<&Value>) -> bool + Send + Sync + 'static) -> Self {
        SearchFilter::Predicate(Arc::new(f))
    }
}

impl From<FilterExpr> for SearchFilter {
    fn from(expr: FilterExpr) -> Self {
        SearchFilter::Expr(expr)
    }
}

impl fmt::Debug for SearchFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchFilter::Expr(expr) => f.debug_tuple("Expr").field(expr).finish(),
            SearchFilter::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

#[derive(Debug)]
pub struct SearchOptions {
    /// Number of results; defaults to 5.
    pub k: usize,
    pub filter: Option<SearchFilter>,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self { k: 5, filter: None }
    }
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn k(mut self, k: usize) -> Self {
        self.k = k;
        self
    }

    pub fn filter(mut self, filter: impl Into<SearchFilter>) -> Self {
        self.filter = Some(filter.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct EngineStats {
    pub name: String,
    pub dim: usize,
    pub metric: Metric,
    pub strategy: AnnStrategy,
    pub count: usize,
    pub capacity: usize,
    pub snapshot_id: u64,
    pub wal_frames_appended: u64,
    pub wal_pending_bytes: usize,
}

struct EngineInner {
    store: VectorStore,
    ann: AnnIndex,
    attrs: AttributeIndex,
    wal: WalWriter,
    snapshot_id: u64,
}

/// The embeddable vector database façade.
///
/// Mutations run in order: validate, store, ANN, attribute index, WAL
/// append. Validation failures mutate nothing; a WAL append failure after
/// the in-memory mutation leaves the engine consistent but ahead of the
/// log, and is logged as a warning. All public calls serialize through an
/// internal [`AsyncLock`] in arrival order.
pub struct VectorLite {
    name: String,
    options: EngineOptions,
    index_adapter: Arc<dyn StorageAdapter>,
    head: HeadStore,
    snap_key: String,
    state: AsyncLock<EngineInner>,
}

impl fmt::Debug for VectorLite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VectorLite").field("name", &self.name).finish()
    }
}

impl VectorLite {
    /// Open (or create) database `name`: load `${name}.snap` if present,
    /// replay the WAL tail, heal a crash tail, and return a writable
    /// engine.
    pub async fn open(
        name: impl Into<String>,
        options: EngineOptions,
        index_adapter: Arc<dyn StorageAdapter>,
        data_adapter: Arc<dyn StorageAdapter>,
    ) -> Result<Self> {
        let name = name.into();
        options.validate()?;
        let snap_key = format!("{name}.snap");
        let wal_key = format!("{name}.wal");
        let head_key = format!("{name}.head");

        let boot =
            recovery::bootstrap(&options, &index_adapter, &data_adapter, &snap_key, &wal_key)
                .await?;
        let wal = WalWriter::new(data_adapter, wal_key, options.wal_buffered);

        Ok(Self {
            name,
            head: HeadStore::new(index_adapter.clone(), head_key),
            index_adapter,
            snap_key,
            options,
            state: AsyncLock::new(EngineInner {
                store: boot.store,
                ann: boot.ann,
                attrs: boot.attrs,
                wal,
                snapshot_id: boot.snapshot_id,
            }),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Insert or overwrite a record.
    pub async fn add(
        &self,
        id: VectorId,
        vector: &[f32],
        meta: Option<Value>,
    ) -> Result<UpsertOutcome> {
        let mut guard = self.state.lock().await;
        let inner = &mut *guard;

        let outcome = inner.store.add_or_update(id, vector, meta.clone())?;
        inner.ann.insert(&inner.store, id);
        match &meta {
            Some(Value::Object(map)) => inner.attrs.set_attrs(id, Some(map)),
            _ => inner.attrs.set_attrs(id, None),
        }

        // Log the vector as stored (normalized under cosine) so replay
        // reconstructs byte-identical state.
        let stored = inner
            .store
            .get(id)
            .map(|(v, _)| v.to_vec())
            .unwrap_or_default();
        let record = match outcome {
            UpsertOutcome::Added => WalRecord::Add {
                id,
                vector: stored,
                meta,
            },
            UpsertOutcome::Updated => WalRecord::Update {
                id,
                vector: stored,
                meta,
            },
        };
        if let Err(e) = inner.wal.append(&record).await {
            warn!(id, error = %e, "wal append failed; memory state is ahead of the log");
        }
        Ok(outcome)
    }

    /// Owned copy of a record, or `None` if absent.
    pub async fn get(&self, id: VectorId) -> Option<(Vec<f32>, Option<Value>)> {
        let guard = self.state.lock().await;
        guard.store.get(id).map(|(v, m)| (v.to_vec(), m.cloned()))
    }

    /// Remove a record. Returns whether it existed.
    pub async fn delete(&self, id: VectorId) -> Result<bool> {
        let mut guard = self.state.lock().await;
        let inner = &mut *guard;
        if inner.store.remove_by_id(id).is_none() {
            return Ok(false);
        }
        inner.ann.remove(id);
        inner.attrs.remove_id(id);
        if let Err(e) = inner.wal.append(&WalRecord::Delete { id }).await {
            warn!(id, error = %e, "wal append failed; memory state is ahead of the log");
        }
        Ok(true)
    }

    /// Top-k search with optional restriction, results sorted by score
    /// descending with meta attached.
    pub async fn find_many(
        &self,
        query: &[f32],
        options: &SearchOptions,
    ) -> Result<Vec<SearchHit>> {
        if options.k == 0 {
            return Err(VectorLiteError::InvalidArgument(
                "k must be positive".to_string(),
            ));
        }
        let mut guard = self.state.lock().await;
        let inner = &mut *guard;
        if query.len() != inner.store.dim() {
            return Err(VectorLiteError::InvalidArgument(format!(
                "query dimension mismatch: expected {}, got {}",
                inner.store.dim(),
                query.len()
            )));
        }
        let processed = inner.store.metric().preprocess(query);

        let allowed: Option<RoaringBitmap> = match &options.filter {
            None => None,
            Some(SearchFilter::Expr(expr)) => {
                expr.validate()?;
                let universe: RoaringBitmap = inner.store.ids().iter().copied().collect();
                evaluate(expr, &mut inner.attrs, &universe)
            }
            Some(SearchFilter::Predicate(pred)) => {
                let mut set = RoaringBitmap::new();
                for (id, _, meta) in inner.store.iter() {
                    if pred(id, meta) {
                        set.insert(id);
                    }
                }
                Some(set)
            }
        };
        if allowed.as_ref().is_some_and(RoaringBitmap::is_empty) {
            return Ok(Vec::new());
        }

        let hits = inner
            .ann
            .search(&inner.store, &processed, options.k, allowed.as_ref());
        Ok(hits
            .into_iter()
            .map(|h| SearchHit {
                id: h.id,
                score: h.score,
                meta: inner.store.get(h.id).and_then(|(_, m)| m.cloned()),
            })
            .collect())
    }

    /// Checkpoint: write the snapshot atomically, log a checkpoint frame,
    /// truncate the WAL to it, and advance the head pointer. After this
    /// returns, the snapshot bytes are in storage and pre-checkpoint WAL
    /// frames are gone.
    pub async fn persist(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        let inner = &mut *guard;

        let next_id = inner.snapshot_id + 1;
        let blob = snapshot::encode(&inner.store, &inner.ann, &inner.attrs, next_id)?;
        self.index_adapter
            .atomic_write(&self.snap_key, &blob)
            .await?;

        let checkpoint = WalRecord::Checkpoint {
            snapshot_id: next_id,
        };
        inner.wal.append(&checkpoint).await?;
        inner.wal.rewrite(std::slice::from_ref(&checkpoint)).await?;
        inner.snapshot_id = next_id;

        let now = coord::system_now_ms();
        let current = self.head.load().await?;
        let commit_ts = coord::compute_commit_ts(CommitTsInput {
            prepare_ts: now,
            last_committed_ts: current.as_ref().map_or(0, |h| h.commit_ts),
            now_ts: now,
            delta: 1,
        });
        let next = HeadPointer {
            manifest: self.snap_key.clone(),
            epoch: current.as_ref().map_or(1, |h| h.epoch),
            commit_ts,
        };
        match self.head.try_update(&next).await? {
            CasOutcome::Accepted(_) => {}
            CasOutcome::Rejected { current, reason } => {
                warn!(
                    ?reason,
                    epoch = current.epoch,
                    "head cas lost; another writer advanced the head"
                );
            }
        }

        debug!(
            snapshot_id = next_id,
            count = inner.store.count(),
            "persisted snapshot"
        );
        Ok(())
    }

    /// Push buffered WAL frames to storage.
    pub async fn flush_wal(&self) -> Result<()> {
        self.state.lock().await.wal.flush().await
    }

    /// Reconstruct the ANN index from the store alone. Clears HNSW
    /// deletion marks; useful after heavy deletion or parameter drift.
    pub async fn rebuild(&self) -> Result<()> {
        let mut guard = self.state.lock().await;
        let inner = &mut *guard;
        inner.ann.rebuild(&inner.store);
        Ok(())
    }

    pub async fn stats(&self) -> EngineStats {
        let guard = self.state.lock().await;
        EngineStats {
            name: self.name.clone(),
            dim: guard.store.dim(),
            metric: guard.store.metric(),
            strategy: guard.ann.strategy(),
            count: guard.store.count(),
            capacity: guard.store.capacity(),
            snapshot_id: guard.snapshot_id,
            wal_frames_appended: guard.wal.appended_frames(),
            wal_pending_bytes: guard.wal.pending_bytes(),
        }
    }

    /// Run k-means training on the IVF strategy. `Unsupported` for other
    /// strategies.
    pub async fn train_ivf_centroids(&self, iters: usize, seed: u64) -> Result<usize> {
        let mut guard = self.state.lock().await;
        let inner = &mut *guard;
        match &mut inner.ann {
            AnnIndex::Ivf(ivf) => ivf.train_centroids(&inner.store, iters, seed),
            _ => Err(VectorLiteError::Unsupported(
                "ivf training requires the ivf strategy".to_string(),
            )),
        }
    }

    /// Rebuild IVF posting lists against the current centroids; returns
    /// how many ids changed list.
    pub async fn reassign_ivf_lists(&self) -> Result<usize> {
        let mut guard = self.state.lock().await;
        let inner = &mut *guard;
        match &mut inner.ann {
            AnnIndex::Ivf(ivf) => ivf.reassign_lists(&inner.store),
            _ => Err(VectorLiteError::Unsupported(
                "ivf reassignment requires the ivf strategy".to_string(),
            )),
        }
    }

    /// Mean IVF recall against brute force for `queries`.
    pub async fn evaluate_ivf(&self, queries: &[Vec<f32>], k: usize) -> Result<IvfEvaluation> {
        let guard = self.state.lock().await;
        match &guard.ann {
            AnnIndex::Ivf(ivf) => {
                let processed: Vec<Vec<f32>> = queries
                    .iter()
                    .map(|q| guard.store.metric().preprocess(q).into_owned())
                    .collect();
                Ok(ivf.evaluate(&guard.store, &processed, k))
            }
            _ => Err(VectorLiteError::Unsupported(
                "ivf evaluation requires the ivf strategy".to_string(),
            )),
        }
    }
}
