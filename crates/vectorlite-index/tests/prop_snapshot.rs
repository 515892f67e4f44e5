use proptest::prelude::*;
use serde_json::Value;
use vectorlite_core::{AnnStrategy, EngineOptions, Metric};
use vectorlite_index::{snapshot, AnnIndex, AttributeIndex};
use vectorlite_store::VectorStore;

const D: u16 = 3;

#[derive(Debug, Clone)]
struct Row {
    id: u32,
    vector: Vec<f32>,
    meta: Option<Value>,
}

fn arb_meta() -> impl Strategy<Value = Option<Value>> {
    proptest::option::of(
        proptest::collection::hash_map(
            "[a-c]",
            prop_oneof![
                "[a-z]{1,3}".prop_map(Value::from),
                (-50i64..50).prop_map(Value::from),
                any::<bool>().prop_map(Value::from),
            ],
            0..3,
        )
        .prop_map(|m| serde_json::to_value(m).unwrap()),
    )
}

fn arb_rows() -> impl Strategy<Value = Vec<Row>> {
    proptest::collection::vec(
        (
            0u32..64,
            proptest::collection::vec(-10.0f32..10.0, D as usize),
            arb_meta(),
        )
            .prop_map(|(id, vector, meta)| Row { id, vector, meta }),
        0..24,
    )
}

fn arb_strategy() -> impl Strategy<Value = AnnStrategy> {
    prop_oneof![
        Just(AnnStrategy::BruteForce),
        Just(AnnStrategy::Hnsw),
        Just(AnnStrategy::Ivf),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn snapshot_round_trip_is_identity(rows in arb_rows(), strategy in arb_strategy()) {
        let mut options = EngineOptions::new(D);
        options.strategy = strategy;
        options.metric = Metric::L2;

        let mut store = VectorStore::new(D, Metric::L2, 4).unwrap();
        let mut ann = AnnIndex::for_options(&options);
        let mut attrs = AttributeIndex::new();

        for row in &rows {
            store.add_or_update(row.id, &row.vector, row.meta.clone()).unwrap();
            ann.insert(&store, row.id);
            match &row.meta {
                Some(Value::Object(map)) => attrs.set_attrs(row.id, Some(map)),
                _ => attrs.set_attrs(row.id, None),
            }
        }

        let blob = snapshot::encode(&store, &ann, &attrs, 42).unwrap();
        let decoded = snapshot::decode(&blob).unwrap();

        decoded.store.check_invariants().unwrap();
        prop_assert_eq!(decoded.snapshot_id, 42);
        prop_assert_eq!(decoded.store.count(), store.count());
        for &id in store.ids() {
            let (v_a, m_a) = store.get(id).unwrap();
            let (v_b, m_b) = decoded.store.get(id).unwrap();
            prop_assert_eq!(v_a, v_b);
            prop_assert_eq!(m_a, m_b);
        }

        // Decode(encode(state)) re-encodes to the same bytes.
        let blob2 = snapshot::encode(&decoded.store, &decoded.ann, &decoded.attrs, 42).unwrap();
        prop_assert_eq!(blob, blob2);
    }
}
