use proptest::prelude::*;
use std::collections::HashMap;
use vectorlite_core::Metric;
use vectorlite_store::VectorStore;

const D: u16 = 3;

#[derive(Debug, Clone)]
enum Op {
    Upsert(u32, Vec<f32>),
    Remove(u32),
    Shrink,
    Resize(u32),
}

fn arb_op() -> impl Strategy<Value = Op> {
    // Small id space so upsert/remove collisions actually happen.
    prop_oneof![
        4 => (0u32..16, proptest::collection::vec(-10.0f32..10.0, D as usize))
            .prop_map(|(id, v)| Op::Upsert(id, v)),
        2 => (0u32..16).prop_map(Op::Remove),
        1 => Just(Op::Shrink),
        1 => (0u32..64).prop_map(Op::Resize),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(40))]

    #[test]
    fn store_matches_model_under_random_ops(ops in proptest::collection::vec(arb_op(), 1..80)) {
        let mut store = VectorStore::new(D, Metric::L2, 2).unwrap();
        let mut model: HashMap<u32, Vec<f32>> = HashMap::new();

        for op in ops {
            match op {
                Op::Upsert(id, v) => {
                    store.add_or_update(id, &v, None).unwrap();
                    model.insert(id, v);
                }
                Op::Remove(id) => {
                    let removed = store.remove_by_id(id);
                    assert_eq!(removed.is_some(), model.remove(&id).is_some());
                }
                Op::Shrink => store.shrink_to_fit(),
                Op::Resize(n) => store.resize_capacity(n),
            }
            store.check_invariants().unwrap();
            assert_eq!(store.count(), model.len());
            assert!(store.capacity() >= store.count());
        }

        for (id, v) in &model {
            let (stored, _) = store.get(*id).unwrap();
            assert_eq!(stored, v.as_slice());
        }
    }
}
