//! Inverted-file index: k-means centroids over the store, posting lists
//! per centroid, `nprobe` lists scanned per query with exact re-ranking.

use crate::ann::Hit;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use ordered_float::OrderedFloat;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use roaring::RoaringBitmap;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::io::{self, Cursor};
use vectorlite_core::metric::l2_sq;
use vectorlite_core::{IvfParams, Metric, Result, VectorId, VectorLiteError};
use vectorlite_store::VectorStore;

/// Centroid movement below this is "converged" for the moved count.
const MOVE_EPSILON: f32 = 1e-6;

/// Posting-list tag for ids held before training.
const FALLBACK_LIST: u32 = u32::MAX;

/// Recall of IVF search against the exact baseline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IvfEvaluation {
    pub recall: f64,
    pub queries: usize,
}

#[derive(Debug)]
pub struct IvfIndex {
    params: IvfParams,
    dim: usize,
    centroids: Vec<f32>,
    lists: Vec<Vec<VectorId>>,
    id_to_list: HashMap<VectorId, u32>,
    // Untrained case: one flat list so search stays exact until training.
    fallback: Vec<VectorId>,
    trained_iters: u32,
}

impl IvfIndex {
    pub fn new(params: IvfParams, dim: usize) -> Self {
        Self {
            params,
            dim,
            centroids: Vec::new(),
            lists: Vec::new(),
            id_to_list: HashMap::new(),
            fallback: Vec::new(),
            trained_iters: 0,
        }
    }

    pub fn params(&self) -> &IvfParams {
        &self.params
    }

    pub fn is_trained(&self) -> bool {
        !self.centroids.is_empty()
    }

    pub fn centroid_count(&self) -> usize {
        if self.dim == 0 {
            0
        } else {
            self.centroids.len() / self.dim
        }
    }

    pub fn trained_iters(&self) -> u32 {
        self.trained_iters
    }

    fn centroid(&self, c: usize) -> &[f32] {
        &self.centroids[c * self.dim..(c + 1) * self.dim]
    }

    fn nearest_centroid(&self, metric: Metric, vector: &[f32]) -> u32 {
        let mut best = 0usize;
        let mut best_score = f32::NEG_INFINITY;
        for c in 0..self.centroid_count() {
            let score = metric.score(vector, self.centroid(c));
            if score > best_score {
                best_score = score;
                best = c;
            }
        }
        best as u32
    }

    /// Track `id` incrementally. Before training everything lands in the
    /// fallback list; afterwards the nearest centroid's list. An id whose
    /// vector changed keeps its list until an explicit reassignment.
    pub fn insert(&mut self, store: &VectorStore, id: VectorId) {
        if self.id_to_list.contains_key(&id) {
            return;
        }
        if self.is_trained() {
            let Some((vector, _)) = store.get(id) else {
                return;
            };
            let list = self.nearest_centroid(store.metric(), vector);
            self.lists[list as usize].push(id);
            self.id_to_list.insert(id, list);
        } else {
            self.fallback.push(id);
            self.id_to_list.insert(id, FALLBACK_LIST);
        }
    }

    pub fn remove(&mut self, id: VectorId) {
        match self.id_to_list.remove(&id) {
            Some(FALLBACK_LIST) => self.fallback.retain(|&x| x != id),
            Some(list) => self.lists[list as usize].retain(|&x| x != id),
            None => {}
        }
    }

    /// Lloyd's iterations under the store metric, from a seeded sample of
    /// distinct stored vectors. Empty clusters are re-seeded from the
    /// vector farthest from its centroid. Returns how many centroids still
    /// moved more than epsilon in the final iteration; posting lists are
    /// rebuilt afterwards so the index is never stale.
    pub fn train_centroids(
        &mut self,
        store: &VectorStore,
        iters: usize,
        seed: u64,
    ) -> Result<usize> {
        let n = store.count();
        if n == 0 {
            return Err(VectorLiteError::InvalidArgument(
                "cannot train ivf centroids on an empty store".to_string(),
            ));
        }
        let metric = store.metric();
        let ncent = self.params.nlist.min(n);
        let mut rng = StdRng::seed_from_u64(seed);

        let mut slots: Vec<usize> = (0..n).collect();
        slots.shuffle(&mut rng);
        let mut centroids: Vec<f32> = Vec::with_capacity(ncent * self.dim);
        for &slot in &slots[..ncent] {
            centroids.extend_from_slice(store.vector_at(slot));
        }

        let mut moved = 0usize;
        for _ in 0..iters.max(1) {
            // Assignment pass.
            let mut assignment = vec![0usize; n];
            let mut assigned_score = vec![0f32; n];
            for slot in 0..n {
                let vector = store.vector_at(slot);
                let mut best = 0usize;
                let mut best_score = f32::NEG_INFINITY;
                for c in 0..ncent {
                    let score = metric.score(vector, &centroids[c * self.dim..(c + 1) * self.dim]);
                    if score > best_score {
                        best_score = score;
                        best = c;
                    }
                }
                assignment[slot] = best;
                assigned_score[slot] = best_score;
            }

            // Mean update.
            let mut sums = vec![0f64; ncent * self.dim];
            let mut counts = vec![0usize; ncent];
            for slot in 0..n {
                let c = assignment[slot];
                counts[c] += 1;
                let vector = store.vector_at(slot);
                for (d, &v) in vector.iter().enumerate() {
                    sums[c * self.dim + d] += f64::from(v);
                }
            }

            let mut next = vec![0f32; ncent * self.dim];
            for c in 0..ncent {
                let target = &mut next[c * self.dim..(c + 1) * self.dim];
                if counts[c] == 0 {
                    continue;
                }
                for (d, out) in target.iter_mut().enumerate() {
                    *out = (sums[c * self.dim + d] / counts[c] as f64) as f32;
                }
                if metric == Metric::Cosine {
                    let norm: f32 = target.iter().map(|x| x * x).sum::<f32>().sqrt();
                    if norm > 0.0 {
                        for out in target.iter_mut() {
                            *out /= norm;
                        }
                    }
                }
            }

            // Re-seed empty clusters from the worst-assigned vectors.
            let mut stolen: Vec<usize> = Vec::new();
            for c in 0..ncent {
                if counts[c] > 0 {
                    continue;
                }
                let worst = (0..n)
                    .filter(|slot| !stolen.contains(slot))
                    .min_by(|&a, &b| {
                        assigned_score[a]
                            .partial_cmp(&assigned_score[b])
                            .unwrap_or(std::cmp::Ordering::Equal)
                            .then(a.cmp(&b))
                    });
                if let Some(slot) = worst {
                    next[c * self.dim..(c + 1) * self.dim].copy_from_slice(store.vector_at(slot));
                    stolen.push(slot);
                }
            }

            moved = (0..ncent)
                .filter(|&c| {
                    l2_sq(
                        &centroids[c * self.dim..(c + 1) * self.dim],
                        &next[c * self.dim..(c + 1) * self.dim],
                    )
                    .sqrt()
                        > MOVE_EPSILON
                })
                .count();
            centroids = next;
        }

        self.centroids = centroids;
        self.trained_iters += u32::try_from(iters).unwrap_or(u32::MAX);
        self.reassign_lists(store)?;
        Ok(moved)
    }

    /// Rebuild posting lists and `id_to_list` from the current centroids.
    /// Returns the number of ids whose list changed.
    pub fn reassign_lists(&mut self, store: &VectorStore) -> Result<usize> {
        if !self.is_trained() {
            return Err(VectorLiteError::InvalidArgument(
                "ivf index is not trained".to_string(),
            ));
        }
        let metric = store.metric();
        let ncent = self.centroid_count();
        let mut lists: Vec<Vec<VectorId>> = vec![Vec::new(); ncent];
        let mut id_to_list = HashMap::with_capacity(store.count());
        let mut migrated = 0usize;

        for (id, vector, _) in store.iter() {
            let list = self.nearest_centroid(metric, vector);
            if self.id_to_list.get(&id) != Some(&list) {
                migrated += 1;
            }
            lists[list as usize].push(id);
            id_to_list.insert(id, list);
        }

        self.lists = lists;
        self.id_to_list = id_to_list;
        self.fallback.clear();
        Ok(migrated)
    }

    /// Score the centroids, scan the top `nprobe` lists, exact-score the
    /// collected candidates (restriction applied before the re-rank).
    pub fn search(
        &self,
        store: &VectorStore,
        query: &[f32],
        k: usize,
        allowed: Option<&RoaringBitmap>,
    ) -> Vec<Hit> {
        if k == 0 {
            return Vec::new();
        }
        if !self.is_trained() {
            return self.rank_candidates(store, query, k, allowed, self.fallback.iter().copied());
        }

        let metric = store.metric();
        let ncent = self.centroid_count();
        let mut scored: Vec<(OrderedFloat<f32>, usize)> = (0..ncent)
            .map(|c| (OrderedFloat(metric.score(query, self.centroid(c))), c))
            .collect();
        scored.sort_unstable_by(|a, b| b.0.cmp(&a.0).then(a.1.cmp(&b.1)));

        let probes = scored.iter().take(self.params.nprobe).map(|&(_, c)| c);
        let candidates = probes.flat_map(|c| self.lists[c].iter().copied());
        self.rank_candidates(store, query, k, allowed, candidates)
    }

    fn rank_candidates(
        &self,
        store: &VectorStore,
        query: &[f32],
        k: usize,
        allowed: Option<&RoaringBitmap>,
        candidates: impl Iterator<Item = VectorId>,
    ) -> Vec<Hit> {
        let metric = store.metric();
        let mut heap: BinaryHeap<Reverse<(OrderedFloat<f32>, Reverse<u32>)>> =
            BinaryHeap::with_capacity(k + 1);
        for id in candidates {
            if allowed.map_or(false, |set| !set.contains(id)) {
                continue;
            }
            let Some(slot) = store.position_of(id) else {
                continue;
            };
            let score = metric.score(query, store.vector_at(slot));
            heap.push(Reverse((OrderedFloat(score), Reverse(id))));
            if heap.len() > k {
                heap.pop();
            }
        }
        let mut hits: Vec<Hit> = heap
            .into_iter()
            .map(|Reverse((score, Reverse(id)))| Hit {
                id,
                score: score.into_inner(),
            })
            .collect();
        hits.sort_unstable_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.id.cmp(&b.id))
        });
        hits
    }

    /// Mean recall of this index against the brute-force baseline on the
    /// same store.
    pub fn evaluate(&self, store: &VectorStore, queries: &[Vec<f32>], k: usize) -> IvfEvaluation {
        let mut total = 0f64;
        let mut counted = 0usize;
        for query in queries {
            let truth = crate::bruteforce::search(store, query, k, None);
            if truth.is_empty() {
                continue;
            }
            let mine: std::collections::HashSet<VectorId> =
                self.search(store, query, k, None).iter().map(|h| h.id).collect();
            let overlap = truth.iter().filter(|h| mine.contains(&h.id)).count();
            total += overlap as f64 / truth.len() as f64;
            counted += 1;
        }
        IvfEvaluation {
            recall: if counted == 0 { 1.0 } else { total / counted as f64 },
            queries: counted,
        }
    }

    /// Drop all derived state and re-track the store contents. Centroids
    /// are kept; call `train_centroids` to move them.
    pub fn rebuild(&mut self, store: &VectorStore) {
        self.lists.clear();
        self.id_to_list.clear();
        self.fallback.clear();
        if self.is_trained() {
            self.lists = vec![Vec::new(); self.centroid_count()];
            // Reassignment against existing centroids cannot fail.
            let _ = self.reassign_lists(store);
        } else {
            let ids: Vec<VectorId> = store.ids().to_vec();
            for id in ids {
                self.fallback.push(id);
                self.id_to_list.insert(id, FALLBACK_LIST);
            }
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        buf.write_u32::<LittleEndian>(self.params.nlist as u32)?;
        buf.write_u32::<LittleEndian>(self.params.nprobe as u32)?;
        buf.write_u32::<LittleEndian>(self.dim as u32)?;
        buf.write_u32::<LittleEndian>(self.trained_iters)?;
        buf.write_u32::<LittleEndian>(self.centroid_count() as u32)?;
        for &v in &self.centroids {
            buf.write_f32::<LittleEndian>(v)?;
        }
        buf.write_u32::<LittleEndian>(self.lists.len() as u32)?;
        for list in &self.lists {
            buf.write_u32::<LittleEndian>(list.len() as u32)?;
            for &id in list {
                buf.write_u32::<LittleEndian>(id)?;
            }
        }
        buf.write_u32::<LittleEndian>(self.fallback.len() as u32)?;
        for &id in &self.fallback {
            buf.write_u32::<LittleEndian>(id)?;
        }
        Ok(())
    }

    pub fn decode(bytes: &[u8]) -> io::Result<Self> {
        let mut cur = Cursor::new(bytes);
        let nlist = cur.read_u32::<LittleEndian>()? as usize;
        let nprobe = cur.read_u32::<LittleEndian>()? as usize;
        let dim = cur.read_u32::<LittleEndian>()? as usize;
        let trained_iters = cur.read_u32::<LittleEndian>()?;
        let ncent = cur.read_u32::<LittleEndian>()? as usize;
        let mut centroids = Vec::with_capacity(ncent * dim);
        for _ in 0..ncent * dim {
            centroids.push(cur.read_f32::<LittleEndian>()?);
        }

        let nlists = cur.read_u32::<LittleEndian>()? as usize;
        if !centroids.is_empty() && nlists != ncent {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "ivf list count does not match centroid count",
            ));
        }
        let mut lists = Vec::with_capacity(nlists);
        let mut id_to_list = HashMap::new();
        for li in 0..nlists {
            let len = cur.read_u32::<LittleEndian>()? as usize;
            let mut list = Vec::with_capacity(len);
            for _ in 0..len {
                let id = cur.read_u32::<LittleEndian>()?;
                id_to_list.insert(id, li as u32);
                list.push(id);
            }
            lists.push(list);
        }

        let fallback_len = cur.read_u32::<LittleEndian>()? as usize;
        let mut fallback = Vec::with_capacity(fallback_len);
        for _ in 0..fallback_len {
            let id = cur.read_u32::<LittleEndian>()?;
            id_to_list.insert(id, FALLBACK_LIST);
            fallback.push(id);
        }

        Ok(Self {
            params: IvfParams { nlist, nprobe },
            dim,
            centroids,
            lists,
            id_to_list,
            fallback,
            trained_iters,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line_store(n: u32) -> VectorStore {
        let mut store = VectorStore::new(2, Metric::L2, n).unwrap();
        for id in 0..n {
            store
                .add_or_update(id, &[id as f32, 0.0], None)
                .unwrap();
        }
        store
    }

    #[test]
    fn untrained_search_is_exact_over_fallback() {
        let store = line_store(6);
        let mut index = IvfIndex::new(IvfParams::default(), 2);
        for id in 0..6 {
            index.insert(&store, id);
        }
        let hits = index.search(&store, &[2.2, 0.0], 2, None);
        assert_eq!(hits[0].id, 2);
        assert_eq!(hits[1].id, 3);
    }

    #[test]
    fn training_converges_and_assigns_lists() {
        let store = line_store(10);
        let mut index = IvfIndex::new(
            IvfParams {
                nlist: 2,
                nprobe: 1,
            },
            2,
        );
        for id in 0..10 {
            index.insert(&store, id);
        }
        index.train_centroids(&store, 10, 7).unwrap();
        assert!(index.is_trained());
        assert_eq!(index.centroid_count(), 2);
        // Every id assigned to exactly one list, fallback drained.
        let assigned: usize = (0..2).map(|c| index.lists[c].len()).sum();
        assert_eq!(assigned, 10);
        assert!(index.fallback.is_empty());

        // Converged training moves nothing on a second run with the same
        // data; reassignment finds nothing to migrate.
        assert_eq!(index.reassign_lists(&store).unwrap(), 0);
    }

    #[test]
    fn train_on_empty_store_is_invalid() {
        let store = VectorStore::new(2, Metric::L2, 1).unwrap();
        let mut index = IvfIndex::new(IvfParams::default(), 2);
        assert!(matches!(
            index.train_centroids(&store, 5, 1),
            Err(VectorLiteError::InvalidArgument(_))
        ));
    }

    #[test]
    fn remove_drops_from_lists() {
        let store = line_store(4);
        let mut index = IvfIndex::new(
            IvfParams {
                nlist: 2,
                nprobe: 2,
            },
            2,
        );
        for id in 0..4 {
            index.insert(&store, id);
        }
        index.train_centroids(&store, 5, 3).unwrap();
        index.remove(1);
        let hits = index.search(&store, &[1.0, 0.0], 4, None);
        assert!(hits.iter().all(|h| h.id != 1));
    }

    #[test]
    fn encode_decode_round_trip() {
        let store = line_store(8);
        let mut index = IvfIndex::new(
            IvfParams {
                nlist: 3,
                nprobe: 2,
            },
            2,
        );
        for id in 0..8 {
            index.insert(&store, id);
        }
        index.train_centroids(&store, 6, 11).unwrap();

        let mut buf = Vec::new();
        index.encode(&mut buf).unwrap();
        let decoded = IvfIndex::decode(&buf).unwrap();
        let mut buf2 = Vec::new();
        decoded.encode(&mut buf2).unwrap();
        assert_eq!(buf, buf2);

        let a = index.search(&store, &[3.0, 0.0], 3, None);
        let b = decoded.search(&store, &[3.0, 0.0], 3, None);
        assert_eq!(
            a.iter().map(|h| h.id).collect::<Vec<_>>(),
            b.iter().map(|h| h.id).collect::<Vec<_>>()
        );
    }
}
