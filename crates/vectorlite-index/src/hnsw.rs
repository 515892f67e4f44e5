//! Hierarchical navigable small-world graph.
//!
//! Nodes reference neighbors by record id, never by pointer, so the graph
//! serializes flat and survives store compaction. Deletions are soft marks
//! in a roaring bitmap; search skips marked nodes but still navigates
//! through them. `rebuild` is the only compaction.

use crate::ann::Hit;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use roaring::RoaringBitmap;
use smallvec::SmallVec;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::io::{self, Cursor, Read};
use vectorlite_core::{HnswParams, VectorId};
use vectorlite_store::VectorStore;

const MAX_LEVEL: usize = 15;

type Neighbors = SmallVec<[VectorId; 16]>;

#[derive(Debug, Clone, Default)]
struct Node {
    // Neighbor lists per layer; layers[0] is the dense base layer.
    layers: Vec<Neighbors>,
}

impl Node {
    fn level(&self) -> usize {
        self.layers.len().saturating_sub(1)
    }
}

/// Nearest-neighbor candidate during traversal. Lower distance = closer.
#[derive(Debug, Copy, Clone, PartialEq)]
struct Candidate {
    id: VectorId,
    dist: f32,
}

// Reverse ordering so BinaryHeap pops the closest candidate first.
impl Eq for Candidate {}
impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other
            .dist
            .partial_cmp(&self.dist)
            .unwrap_or(CmpOrdering::Equal)
            .then(other.id.cmp(&self.id))
    }
}
impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug)]
pub struct HnswIndex {
    params: HnswParams,
    nodes: HashMap<VectorId, Node>,
    entry: Option<VectorId>,
    top_level: usize,
    deleted: RoaringBitmap,
    rng: StdRng,
}

impl HnswIndex {
    pub fn new(params: HnswParams) -> Self {
        let rng = StdRng::seed_from_u64(params.seed);
        Self {
            params,
            nodes: HashMap::new(),
            entry: None,
            top_level: 0,
            deleted: RoaringBitmap::new(),
            rng,
        }
    }

    pub fn params(&self) -> &HnswParams {
        &self.params
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn deleted_count(&self) -> u64 {
        self.deleted.len()
    }

    fn dist(&self, store: &VectorStore, id: VectorId, query: &[f32]) -> f32 {
        match store.position_of(id) {
            Some(slot) => store.metric().distance(query, store.vector_at(slot)),
            // Stale link to a record the store no longer holds.
            None => f32::INFINITY,
        }
    }

    fn sample_level(&mut self) -> usize {
        let mult = self.params.level_multiplier();
        let u: f64 = self.rng.gen_range(f64::MIN_POSITIVE..1.0);
        #[allow(clippy::cast_sign_loss)]
        let level = (-u.ln() * mult).floor().max(0.0) as usize;
        level.min(MAX_LEVEL)
    }

    /// Index `id`, whose vector must already be in the store.
    ///
    /// Re-adding an existing id keeps its edges (the vector was updated in
    /// place). A soft-deleted id is unmarked; with `allow_replace_deleted`
    /// its old neighborhood is reused as-is, otherwise it is unlinked and
    /// re-inserted fresh.
    pub fn insert(&mut self, store: &VectorStore, id: VectorId) {
        if self.nodes.contains_key(&id) {
            let was_deleted = self.deleted.remove(id);
            if !was_deleted || self.params.allow_replace_deleted {
                return;
            }
            self.unlink(id);
        }

        let level = self.sample_level();
        self.nodes.insert(
            id,
            Node {
                layers: vec![Neighbors::new(); level + 1],
            },
        );

        let Some(entry) = self.entry else {
            self.entry = Some(id);
            self.top_level = level;
            return;
        };

        let query: Vec<f32> = match store.get(id) {
            Some((vector, _)) => vector.to_vec(),
            None => return,
        };

        // Zoom in greedily through layers above the sampled level.
        let mut curr = entry;
        let mut curr_dist = self.dist(store, curr, &query);
        for layer in ((level + 1)..=self.top_level).rev() {
            self.greedy_step(store, &query, &mut curr, &mut curr_dist, layer);
        }

        // Link downward from min(level, top_level) to the base layer.
        for layer in (0..=level.min(self.top_level)).rev() {
            let m_max = self.m_max(layer);
            let found = self.beam_search(store, &query, curr, layer, self.params.ef_construction);
            let selected = self.select_neighbors(store, &found, m_max);

            for &neighbor in &selected {
                self.add_link(id, neighbor, layer);
                self.add_link(neighbor, id, layer);
                self.prune(store, neighbor, layer);
            }
            if let Some(&closest) = selected.first() {
                curr = closest;
            }
        }

        if level > self.top_level {
            self.top_level = level;
            self.entry = Some(id);
        }
    }

    /// Soft delete. The node stays in the graph as a waypoint.
    pub fn remove(&mut self, id: VectorId) {
        if self.nodes.contains_key(&id) {
            self.deleted.insert(id);
        }
    }

    pub fn is_deleted(&self, id: VectorId) -> bool {
        self.deleted.contains(id)
    }

    /// Top-k search. `allowed` restricts result candidates; deleted and
    /// disallowed nodes are still traversed for navigation.
    pub fn search(
        &self,
        store: &VectorStore,
        query: &[f32],
        k: usize,
        allowed: Option<&RoaringBitmap>,
    ) -> Vec<Hit> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };
        if k == 0 {
            return Vec::new();
        }

        let mut curr = entry;
        let mut curr_dist = self.dist(store, curr, query);
        for layer in (1..=self.top_level).rev() {
            self.greedy_step(store, query, &mut curr, &mut curr_dist, layer);
        }

        let ef = self.params.ef_search.max(k);
        self.search_layer0(store, query, curr, k, ef, allowed)
    }

    /// One greedy descent pass on `layer`: move to the best-improving
    /// neighbor until no neighbor improves.
    fn greedy_step(
        &self,
        store: &VectorStore,
        query: &[f32],
        curr: &mut VectorId,
        curr_dist: &mut f32,
        layer: usize,
    ) {
        let mut changed = true;
        while changed {
            changed = false;
            let Some(node) = self.nodes.get(curr) else {
                return;
            };
            let Some(neighbors) = node.layers.get(layer) else {
                return;
            };
            for &neighbor in neighbors {
                let d = self.dist(store, neighbor, query);
                if d < *curr_dist {
                    *curr_dist = d;
                    *curr = neighbor;
                    changed = true;
                }
            }
        }
    }

    /// Beam search on one layer; returns up to `ef` candidates sorted
    /// closest-first. Construction path: no validity filtering.
    fn beam_search(
        &self,
        store: &VectorStore,
        query: &[f32],
        start: VectorId,
        layer: usize,
        ef: usize,
    ) -> Vec<Candidate> {
        let mut visited = RoaringBitmap::new();
        let mut candidates: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut results: BinaryHeap<std::cmp::Reverse<Candidate>> = BinaryHeap::new();

        let first = Candidate {
            id: start,
            dist: self.dist(store, start, query),
        };
        visited.insert(start);
        candidates.push(first);
        results.push(std::cmp::Reverse(first));

        while let Some(cand) = candidates.pop() {
            let worst = results.peek().map_or(f32::INFINITY, |r| r.0.dist);
            if results.len() >= ef && cand.dist > worst {
                break;
            }
            let Some(node) = self.nodes.get(&cand.id) else {
                continue;
            };
            let Some(neighbors) = node.layers.get(layer) else {
                continue;
            };
            for &neighbor in neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                let dist = self.dist(store, neighbor, query);
                let worst = results.peek().map_or(f32::INFINITY, |r| r.0.dist);
                if results.len() < ef || dist < worst {
                    let c = Candidate { id: neighbor, dist };
                    candidates.push(c);
                    results.push(std::cmp::Reverse(c));
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = results.into_iter().map(|r| r.0).collect();
        out.sort_unstable_by(|a, b| {
            a.dist
                .partial_cmp(&b.dist)
                .unwrap_or(CmpOrdering::Equal)
                .then(a.id.cmp(&b.id))
        });
        out
    }

    /// Base-layer beam search with validity filtering: disallowed nodes
    /// navigate but never land in the result set.
    fn search_layer0(
        &self,
        store: &VectorStore,
        query: &[f32],
        start: VectorId,
        k: usize,
        ef: usize,
        allowed: Option<&RoaringBitmap>,
    ) -> Vec<Hit> {
        let is_valid = |id: VectorId| -> bool {
            !self.deleted.contains(id) && allowed.map_or(true, |set| set.contains(id))
        };

        let mut visited = RoaringBitmap::new();
        let mut candidates: BinaryHeap<Candidate> = BinaryHeap::new();
        let mut results: BinaryHeap<std::cmp::Reverse<Candidate>> = BinaryHeap::new();

        let first = Candidate {
            id: start,
            dist: self.dist(store, start, query),
        };
        visited.insert(start);
        candidates.push(first);
        if is_valid(start) {
            results.push(std::cmp::Reverse(first));
        }

        while let Some(cand) = candidates.pop() {
            if results.len() >= ef {
                let worst = results.peek().map_or(f32::INFINITY, |r| r.0.dist);
                if cand.dist > worst {
                    break;
                }
            }
            let Some(node) = self.nodes.get(&cand.id) else {
                continue;
            };
            let Some(neighbors) = node.layers.first() else {
                continue;
            };
            for &neighbor in neighbors {
                if !visited.insert(neighbor) {
                    continue;
                }
                let dist = self.dist(store, neighbor, query);
                let keep = if results.len() >= ef {
                    let worst = results.peek().map_or(f32::INFINITY, |r| r.0.dist);
                    dist < worst
                } else {
                    true
                };
                if keep {
                    let c = Candidate { id: neighbor, dist };
                    candidates.push(c);
                    if is_valid(neighbor) {
                        results.push(std::cmp::Reverse(c));
                        if results.len() > ef {
                            results.pop();
                        }
                    }
                }
            }
        }

        let mut out: Vec<Candidate> = results.into_iter().map(|r| r.0).collect();
        out.sort_unstable_by(|a, b| {
            a.dist
                .partial_cmp(&b.dist)
                .unwrap_or(CmpOrdering::Equal)
                .then(a.id.cmp(&b.id))
        });
        out.truncate(k);
        out.into_iter()
            .map(|c| Hit {
                id: c.id,
                score: -c.dist,
            })
            .collect()
    }

    fn m_max(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.m * 2
        } else {
            self.params.m
        }
    }

    /// Classic HNSW diversity heuristic: keep a candidate only if no
    /// already-selected neighbor is closer to it than the query is.
    fn select_neighbors(
        &self,
        store: &VectorStore,
        candidates: &[Candidate],
        m: usize,
    ) -> Vec<VectorId> {
        let mut selected: Vec<Candidate> = Vec::with_capacity(m);
        for &cand in candidates {
            if selected.len() >= m {
                break;
            }
            let Some(slot) = store.position_of(cand.id) else {
                continue;
            };
            let cand_vec = store.vector_at(slot);
            let dominated = selected.iter().any(|kept| {
                self.dist(store, kept.id, cand_vec) < cand.dist
            });
            if !dominated {
                selected.push(cand);
            }
        }
        selected.into_iter().map(|c| c.id).collect()
    }

    fn add_link(&mut self, src: VectorId, dst: VectorId, layer: usize) {
        if src == dst {
            return;
        }
        if let Some(node) = self.nodes.get_mut(&src) {
            if let Some(links) = node.layers.get_mut(layer) {
                if !links.contains(&dst) {
                    links.push(dst);
                }
            }
        }
    }

    /// Shrink an over-full neighbor list back to `m_max` with the same
    /// diversity heuristic, keyed on the node's own vector.
    fn prune(&mut self, store: &VectorStore, node_id: VectorId, layer: usize) {
        let m_max = self.m_max(layer);
        let links: Vec<VectorId> = match self.nodes.get(&node_id).and_then(|n| n.layers.get(layer))
        {
            Some(links) if links.len() > m_max => links.iter().copied().collect(),
            _ => return,
        };
        let Some(slot) = store.position_of(node_id) else {
            return;
        };
        let node_vec: Vec<f32> = store.vector_at(slot).to_vec();

        let mut candidates: Vec<Candidate> = links
            .iter()
            .map(|&id| Candidate {
                id,
                dist: self.dist(store, id, &node_vec),
            })
            .collect();
        candidates.sort_unstable_by(|a, b| {
            a.dist
                .partial_cmp(&b.dist)
                .unwrap_or(CmpOrdering::Equal)
                .then(a.id.cmp(&b.id))
        });
        let keepers = self.select_neighbors(store, &candidates, m_max);

        if let Some(node) = self.nodes.get_mut(&node_id) {
            if let Some(list) = node.layers.get_mut(layer) {
                *list = keepers.into_iter().collect();
            }
        }
    }

    /// Hard-remove a node before fresh re-insertion: drop backlinks from
    /// its neighbors and repair the entry point if needed.
    fn unlink(&mut self, id: VectorId) {
        let Some(node) = self.nodes.remove(&id) else {
            return;
        };
        for (layer, neighbors) in node.layers.iter().enumerate() {
            for &neighbor in neighbors {
                if let Some(n) = self.nodes.get_mut(&neighbor) {
                    if let Some(links) = n.layers.get_mut(layer) {
                        links.retain(|l| *l != id);
                    }
                }
            }
        }
        if self.entry == Some(id) {
            let replacement = self
                .nodes
                .iter()
                .max_by_key(|(nid, n)| (n.level(), std::cmp::Reverse(**nid)))
                .map(|(&nid, n)| (nid, n.level()));
            match replacement {
                Some((nid, level)) => {
                    self.entry = Some(nid);
                    self.top_level = level;
                }
                None => {
                    self.entry = None;
                    self.top_level = 0;
                }
            }
        }
    }

    /// Rebuild the graph from the store alone: fresh seeded RNG, records
    /// inserted in packed order, deletion marks cleared.
    pub fn rebuild(&mut self, store: &VectorStore) {
        let params = self.params.clone();
        *self = HnswIndex::new(params);
        let ids: Vec<VectorId> = store.ids().to_vec();
        for id in ids {
            self.insert(store, id);
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) -> io::Result<()> {
        buf.write_u16::<LittleEndian>(self.params.m as u16)?;
        buf.write_u32::<LittleEndian>(self.params.ef_construction as u32)?;
        buf.write_u32::<LittleEndian>(self.params.ef_search as u32)?;
        match self.params.level_mult {
            Some(mult) => {
                buf.write_u8(1)?;
                buf.write_f64::<LittleEndian>(mult)?;
            }
            None => {
                buf.write_u8(0)?;
                buf.write_f64::<LittleEndian>(0.0)?;
            }
        }
        buf.write_u64::<LittleEndian>(self.params.seed)?;
        buf.write_u8(u8::from(self.params.allow_replace_deleted))?;

        match self.entry {
            Some(entry) => {
                buf.write_u8(1)?;
                buf.write_u32::<LittleEndian>(entry)?;
            }
            None => {
                buf.write_u8(0)?;
                buf.write_u32::<LittleEndian>(0)?;
            }
        }
        buf.write_u16::<LittleEndian>(self.top_level as u16)?;

        // Sorted ids keep the encoding deterministic.
        let mut ids: Vec<VectorId> = self.nodes.keys().copied().collect();
        ids.sort_unstable();
        buf.write_u32::<LittleEndian>(ids.len() as u32)?;
        for id in ids {
            let node = &self.nodes[&id];
            buf.write_u32::<LittleEndian>(id)?;
            buf.write_u16::<LittleEndian>(node.layers.len() as u16)?;
            for layer in &node.layers {
                buf.write_u16::<LittleEndian>(layer.len() as u16)?;
                for &neighbor in layer {
                    buf.write_u32::<LittleEndian>(neighbor)?;
                }
            }
        }

        let mut deleted = Vec::new();
        self.deleted
            .serialize_into(&mut deleted)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        buf.write_u32::<LittleEndian>(deleted.len() as u32)?;
        buf.extend_from_slice(&deleted);
        Ok(())
    }

    pub fn decode(bytes: &[u8]) -> io::Result<Self> {
        let mut cur = Cursor::new(bytes);
        let m = cur.read_u16::<LittleEndian>()? as usize;
        let ef_construction = cur.read_u32::<LittleEndian>()? as usize;
        let ef_search = cur.read_u32::<LittleEndian>()? as usize;
        let has_mult = cur.read_u8()? != 0;
        let mult = cur.read_f64::<LittleEndian>()?;
        let seed = cur.read_u64::<LittleEndian>()?;
        let allow_replace_deleted = cur.read_u8()? != 0;

        let params = HnswParams {
            m,
            ef_construction,
            ef_search,
            level_mult: has_mult.then_some(mult),
            seed,
            allow_replace_deleted,
        };

        let has_entry = cur.read_u8()? != 0;
        let entry_id = cur.read_u32::<LittleEndian>()?;
        let top_level = cur.read_u16::<LittleEndian>()? as usize;

        let node_count = cur.read_u32::<LittleEndian>()? as usize;
        let mut nodes = HashMap::with_capacity(node_count);
        for _ in 0..node_count {
            let id = cur.read_u32::<LittleEndian>()?;
            let layer_count = cur.read_u16::<LittleEndian>()? as usize;
            let mut layers = Vec::with_capacity(layer_count);
            for _ in 0..layer_count {
                let n = cur.read_u16::<LittleEndian>()? as usize;
                let mut neighbors = Neighbors::with_capacity(n);
                for _ in 0..n {
                    neighbors.push(cur.read_u32::<LittleEndian>()?);
                }
                layers.push(neighbors);
            }
            nodes.insert(id, Node { layers });
        }

        let deleted_len = cur.read_u32::<LittleEndian>()? as usize;
        let mut deleted_bytes = vec![0u8; deleted_len];
        cur.read_exact(&mut deleted_bytes)?;
        let deleted = RoaringBitmap::deserialize_from(&deleted_bytes[..])
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

        let rng = StdRng::seed_from_u64(params.seed);
        Ok(Self {
            params,
            nodes,
            entry: has_entry.then_some(entry_id),
            top_level,
            deleted,
            rng,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vectorlite_core::Metric;

    fn build(metric: Metric, rows: &[(u32, [f32; 2])]) -> (VectorStore, HnswIndex) {
        let mut store = VectorStore::new(2, metric, 8).unwrap();
        let mut index = HnswIndex::new(HnswParams::default());
        for (id, v) in rows {
            store.add_or_update(*id, v, None).unwrap();
            index.insert(&store, *id);
        }
        (store, index)
    }

    #[test]
    fn finds_exact_matches() {
        let rows = [
            (1, [0.0f32, 1.0]),
            (2, [1.0, 0.0]),
            (3, [0.7, 0.7]),
            (4, [-1.0, 0.0]),
        ];
        let (store, index) = build(Metric::L2, &rows);
        for (id, v) in rows {
            let hits = index.search(&store, &v, 1, None);
            assert_eq!(hits[0].id, id, "query for {id}");
            assert!(hits[0].score >= -1e-6);
        }
    }

    #[test]
    fn deleted_nodes_are_skipped_but_traversed() {
        let (store, mut index) = build(
            Metric::L2,
            &[(1, [0.0, 0.0]), (2, [0.1, 0.0]), (3, [0.2, 0.0])],
        );
        index.remove(2);
        let hits = index.search(&store, &[0.1, 0.0], 3, None);
        let ids: Vec<u32> = hits.iter().map(|h| h.id).collect();
        assert!(!ids.contains(&2));
        assert_eq!(ids.len(), 2);
    }

    #[test]
    fn update_in_place_keeps_graph_connected() {
        let (mut store, mut index) = build(
            Metric::L2,
            &[(1, [0.0, 0.0]), (2, [1.0, 1.0]), (3, [2.0, 2.0])],
        );
        store.add_or_update(2, &[5.0, 5.0], None).unwrap();
        index.insert(&store, 2);
        let hits = index.search(&store, &[5.0, 5.0], 1, None);
        assert_eq!(hits[0].id, 2);
    }

    #[test]
    fn readd_after_delete_without_replace_relinks() {
        let (store, mut index) = build(
            Metric::L2,
            &[(1, [0.0, 0.0]), (2, [1.0, 0.0]), (3, [0.0, 1.0])],
        );
        index.remove(2);
        assert!(index.is_deleted(2));
        index.insert(&store, 2);
        assert!(!index.is_deleted(2));
        let hits = index.search(&store, &[1.0, 0.0], 1, None);
        assert_eq!(hits[0].id, 2);
    }

    #[test]
    fn fixed_seed_builds_identical_graphs() {
        let rows: Vec<(u32, [f32; 2])> = (0..40)
            .map(|i| {
                let a = f32::from(i16::try_from(i).unwrap()) * 0.37;
                (u32::try_from(i).unwrap(), [a.sin(), a.cos()])
            })
            .collect();
        let (store_a, index_a) = build(Metric::L2, &rows);
        let (_store_b, index_b) = build(Metric::L2, &rows);

        let mut a = Vec::new();
        let mut b = Vec::new();
        index_a.encode(&mut a).unwrap();
        index_b.encode(&mut b).unwrap();
        assert_eq!(a, b);

        // Identical graph + query + ef gives identical results.
        let h1 = index_a.search(&store_a, &[0.3, 0.8], 5, None);
        let h2 = index_b.search(&store_a, &[0.3, 0.8], 5, None);
        assert_eq!(
            h1.iter().map(|h| h.id).collect::<Vec<_>>(),
            h2.iter().map(|h| h.id).collect::<Vec<_>>()
        );
    }

    #[test]
    fn encode_decode_round_trip() {
        let (store, mut index) = build(
            Metric::L2,
            &[(1, [0.0, 0.0]), (2, [1.0, 0.0]), (3, [0.0, 1.0])],
        );
        index.remove(3);

        let mut buf = Vec::new();
        index.encode(&mut buf).unwrap();
        let decoded = HnswIndex::decode(&buf).unwrap();

        let mut buf2 = Vec::new();
        decoded.encode(&mut buf2).unwrap();
        assert_eq!(buf, buf2);
        assert!(decoded.is_deleted(3));
        assert_eq!(
            decoded
                .search(&store, &[1.0, 0.0], 1, None)
                .first()
                .map(|h| h.id),
            Some(2)
        );
    }

    #[test]
    fn rebuild_clears_deletions_and_stale_nodes() {
        let (mut store, mut index) = build(
            Metric::L2,
            &[(1, [0.0, 0.0]), (2, [1.0, 0.0]), (3, [0.0, 1.0])],
        );
        index.remove(3);
        store.remove_by_id(3);

        index.rebuild(&store);
        assert_eq!(index.node_count(), 2);
        assert_eq!(index.deleted_count(), 0);
        let hits = index.search(&store, &[0.0, 1.0], 3, None);
        assert!(hits.iter().all(|h| h.id != 3));
    }
}
