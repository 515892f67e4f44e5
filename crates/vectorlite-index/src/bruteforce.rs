//! Exact linear-scan search. Also the ground truth other strategies are
//! measured against.

use crate::ann::Hit;
use ordered_float::OrderedFloat;
use roaring::RoaringBitmap;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use vectorlite_store::VectorStore;

/// Scan the packed prefix (or just the restriction set) and keep the best
/// `k` by score. Heap entries order ties toward smaller ids so equal-score
/// results are deterministic.
pub fn search(
    store: &VectorStore,
    query: &[f32],
    k: usize,
    allowed: Option<&RoaringBitmap>,
) -> Vec<Hit> {
    if k == 0 || store.is_empty() {
        return Vec::new();
    }
    let metric = store.metric();
    let mut heap: BinaryHeap<Reverse<(OrderedFloat<f32>, Reverse<u32>)>> =
        BinaryHeap::with_capacity(k + 1);

    let mut consider = |id: u32, slot: usize| {
        let score = metric.score(query, store.vector_at(slot));
        heap.push(Reverse((OrderedFloat(score), Reverse(id))));
        if heap.len() > k {
            heap.pop();
        }
    };

    match allowed {
        Some(set) => {
            for id in set {
                if let Some(slot) = store.position_of(id) {
                    consider(id, slot);
                }
            }
        }
        None => {
            for (slot, &id) in store.ids().iter().enumerate() {
                consider(id, slot);
            }
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

#[cfg(test)]
mod tests {
    use super::*;
    use vectorlite_core::Metric;

    fn store_with(metric: Metric, rows: &[(u32, [f32; 2])]) -> VectorStore {
        let mut s = VectorStore::new(2, metric, 4).unwrap();
        for (id, v) in rows {
            s.add_or_update(*id, v, None).unwrap();
        }
        s
    }

    #[test]
    fn dot_ranks_by_projection() {
        let s = store_with(
            Metric::Dot,
            &[(1, [1.0, 0.0]), (2, [2.0, 0.0]), (3, [0.0, 5.0])],
        );
        let hits = search(&s, &[1.0, 0.0], 2, None);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, 2);
        assert_eq!(hits[1].id, 1);
        assert!(hits[0].score >= hits[1].score);
    }

    #[test]
    fn l2_higher_score_means_closer() {
        let s = store_with(Metric::L2, &[(1, [0.0, 0.0]), (2, [3.0, 4.0])]);
        let hits = search(&s, &[0.1, 0.0], 2, None);
        assert_eq!(hits[0].id, 1);
        assert_eq!(hits[1].id, 2);
        assert!(hits[0].score > hits[1].score);
        assert!((hits[1].score - -(2.9f32 * 2.9 + 16.0)).abs() < 1e-4);
    }

    #[test]
    fn restriction_limits_candidates() {
        let s = store_with(
            Metric::Dot,
            &[(1, [1.0, 0.0]), (2, [2.0, 0.0]), (3, [3.0, 0.0])],
        );
        let allowed: RoaringBitmap = [1u32, 2].into_iter().collect();
        let hits = search(&s, &[1.0, 0.0], 5, Some(&allowed));
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![2, 1]);
    }

    #[test]
    fn equal_scores_break_ties_by_id() {
        let s = store_with(Metric::Dot, &[(9, [1.0, 0.0]), (4, [1.0, 0.0])]);
        let hits = search(&s, &[1.0, 0.0], 2, None);
        assert_eq!(hits.iter().map(|h| h.id).collect::<Vec<_>>(), vec![4, 9]);
    }

    #[test]
    fn zero_k_returns_nothing() {
        let s = store_with(Metric::Dot, &[(1, [1.0, 0.0])]);
        assert!(search(&s, &[1.0, 0.0], 0, None).is_empty());
    }
}
