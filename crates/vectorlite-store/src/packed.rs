use serde_json::Value;
use std::collections::HashMap;
use vectorlite_core::{Metric, Result, VectorId, VectorLiteError};

/// Outcome of [`VectorStore::add_or_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Added,
    Updated,
}

/// Packed columnar store of `(id, vector, meta)` records.
///
/// `ids` and `vectors` are preallocated to `capacity`; the live prefix is
/// `count` entries. `pos` maps each id to its slot in the prefix. Removal is
/// swap-and-pop, so slot positions are unstable but ids are not. Cosine
/// vectors are L2-normalized on ingest.
#[derive(Debug, Clone)]
pub struct VectorStore {
    dim: usize,
    metric: Metric,
    capacity: usize,
    count: usize,
    ids: Vec<VectorId>,
    vectors: Vec<f32>,
    metas: Vec<Option<Value>>,
    pos: HashMap<VectorId, usize>,
}

impl VectorStore {
    pub fn new(dim: u16, metric: Metric, capacity: u32) -> Result<Self> {
        if dim == 0 {
            return Err(VectorLiteError::InvalidArgument(
                "dim must be positive".to_string(),
            ));
        }
        let dim = dim as usize;
        let capacity = (capacity as usize).max(1);
        Ok(Self {
            dim,
            metric,
            capacity,
            count: 0,
            ids: vec![0; capacity],
            vectors: vec![0.0; capacity * dim],
            metas: Vec::new(),
            pos: HashMap::new(),
        })
    }

    /// Rebuild a store from decoded snapshot sections. Fails if the parallel
    /// arrays disagree or ids repeat.
    pub fn from_parts(
        dim: u16,
        metric: Metric,
        ids: Vec<VectorId>,
        vectors: Vec<f32>,
        metas: Vec<Option<Value>>,
    ) -> Result<Self> {
        let count = ids.len();
        if metas.len() != count || vectors.len() != count * dim as usize {
            return Err(VectorLiteError::CorruptSnapshot(
                "store sections disagree on record count".to_string(),
            ));
        }
        let mut store = Self::new(dim, metric, count.max(1) as u32)?;
        store.ids[..count].copy_from_slice(&ids);
        store.vectors[..vectors.len()].copy_from_slice(&vectors);
        store.metas = metas;
        store.count = count;
        for (slot, &id) in ids.iter().enumerate() {
            if store.pos.insert(id, slot).is_some() {
                return Err(VectorLiteError::CorruptSnapshot(format!(
                    "duplicate id {id} in store section"
                )));
            }
        }
        Ok(store)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn contains(&self, id: VectorId) -> bool {
        self.pos.contains_key(&id)
    }

    /// Slot of `id` in the packed prefix, if present.
    pub fn position_of(&self, id: VectorId) -> Option<usize> {
        self.pos.get(&id).copied()
    }

    /// Live ids in slot order.
    pub fn ids(&self) -> &[VectorId] {
        &self.ids[..self.count]
    }

    /// Vector at a packed slot. Panics on an out-of-range slot; use
    /// [`VectorStore::get`] for id-based access.
    pub fn vector_at(&self, slot: usize) -> &[f32] {
        let start = slot * self.dim;
        &self.vectors[start..start + self.dim]
    }

    pub fn meta_at(&self, slot: usize) -> Option<&Value> {
        self.metas[slot].as_ref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (VectorId, &[f32], Option<&Value>)> {
        (0..self.count).map(move |slot| (self.ids[slot], self.vector_at(slot), self.meta_at(slot)))
    }

    /// Insert or overwrite a record. The returned outcome says which
    /// happened. The vector is copied (and normalized under cosine); the
    /// view handed back by [`VectorStore::get`] stays internal.
    pub fn add_or_update(
        &mut self,
        id: VectorId,
        vector: &[f32],
        meta: Option<Value>,
    ) -> Result<UpsertOutcome> {
        if vector.len() != self.dim {
            return Err(VectorLiteError::InvalidArgument(format!(
                "vector dimension mismatch: expected {}, got {}",
                self.dim,
                vector.len()
            )));
        }
        let processed = self.metric.preprocess(vector);

        if let Some(&slot) = self.pos.get(&id) {
            let start = slot * self.dim;
            self.vectors[start..start + self.dim].copy_from_slice(&processed);
            self.metas[slot] = meta;
            return Ok(UpsertOutcome::Updated);
        }

        if self.count == self.capacity {
            self.grow();
        }
        let slot = self.count;
        self.ids[slot] = id;
        let start = slot * self.dim;
        self.vectors[start..start + self.dim].copy_from_slice(&processed);
        self.metas.push(meta);
        self.pos.insert(id, slot);
        self.count += 1;
        Ok(UpsertOutcome::Added)
    }

    /// Borrowed view of a record. Callers that want to mutate the vector
    /// must copy first.
    pub fn get(&self, id: VectorId) -> Option<(&[f32], Option<&Value>)> {
        let slot = *self.pos.get(&id)?;
        Some((self.vector_at(slot), self.meta_at(slot)))
    }

    pub fn update_meta(&mut self, id: VectorId, meta: Option<Value>) -> Result<()> {
        let slot = *self
            .pos
            .get(&id)
            .ok_or_else(|| VectorLiteError::NotFound(format!("id {id}")))?;
        self.metas[slot] = meta;
        Ok(())
    }

    /// Swap-and-pop removal. Returns the removed record, or `None` without
    /// mutating if the id was absent.
    pub fn remove_by_id(&mut self, id: VectorId) -> Option<(Vec<f32>, Option<Value>)> {
        let slot = self.pos.remove(&id)?;
        let start = slot * self.dim;
        let removed_vec = self.vectors[start..start + self.dim].to_vec();

        let last = self.count - 1;
        if slot != last {
            let moved_id = self.ids[last];
            self.ids[slot] = moved_id;
            let last_start = last * self.dim;
            self.vectors
                .copy_within(last_start..last_start + self.dim, start);
            self.metas.swap(slot, last);
            self.pos.insert(moved_id, slot);
        }
        let removed_meta = self.metas.pop().flatten();
        self.count = last;
        Some((removed_vec, removed_meta))
    }

    /// `capacity = max(count, 1)`, reallocating the packed arrays.
    pub fn shrink_to_fit(&mut self) {
        self.set_capacity(self.count.max(1));
    }

    /// Explicit resize; clamped so capacity never drops below `count`.
    pub fn resize_capacity(&mut self, capacity: u32) {
        self.set_capacity((capacity as usize).max(self.count).max(1));
    }

    /// Low-level escape hatch used by recovery: raw write into an occupied
    /// slot, no metric preprocessing.
    pub fn write_vector_at(&mut self, slot: usize, vector: &[f32]) -> Result<()> {
        if slot >= self.count {
            return Err(VectorLiteError::InvalidArgument(format!(
                "slot {slot} out of range (count {})",
                self.count
            )));
        }
        if vector.len() != self.dim {
            return Err(VectorLiteError::InvalidArgument(format!(
                "vector dimension mismatch: expected {}, got {}",
                self.dim,
                vector.len()
            )));
        }
        let start = slot * self.dim;
        self.vectors[start..start + self.dim].copy_from_slice(vector);
        Ok(())
    }

    fn grow(&mut self) {
        self.set_capacity((self.capacity * 2).max(1));
    }

    fn set_capacity(&mut self, capacity: usize) {
        debug_assert!(capacity >= self.count);
        self.capacity = capacity;
        self.ids.resize(capacity, 0);
        self.vectors.resize(capacity * self.dim, 0.0);
    }

    /// Debug check of the §3 structural invariants. Cheap enough for tests,
    /// not called on hot paths.
    #[doc(hidden)]
    pub fn check_invariants(&self) -> Result<()> {
        if self.count > self.capacity || self.pos.len() != self.count {
            return Err(VectorLiteError::InvalidArgument(
                "count/capacity/pos out of sync".to_string(),
            ));
        }
        if self.metas.len() != self.count {
            return Err(VectorLiteError::InvalidArgument(
                "metas length mismatch".to_string(),
            ));
        }
        for (&id, &slot) in &self.pos {
            if slot >= self.count || self.ids[slot] != id {
                return Err(VectorLiteError::InvalidArgument(format!(
                    "pos[{id}] = {slot} does not invert ids[]"
                )));
            }
        }
        Ok(())
    }
}
