use proptest::prelude::*;
use serde_json::json;
use std::sync::Arc;
use vectorlite_store::wal::{scan, WalRecord, WalWriter};
use vectorlite_store::{MemoryAdapter, StorageAdapter};

const D: usize = 4;

fn arb_vector() -> impl Strategy<Value = Vec<f32>> {
    proptest::collection::vec(-100.0f32..100.0, D)
}

fn arb_meta() -> impl Strategy<Value = Option<serde_json::Value>> {
    proptest::option::of(
        proptest::collection::hash_map("[a-z]", "[a-z0-9]", 0..4)
            .prop_map(|m| serde_json::to_value(m).unwrap()),
    )
}

fn arb_record() -> impl Strategy<Value = WalRecord> {
    prop_oneof![
        (any::<u32>(), arb_vector(), arb_meta())
            .prop_map(|(id, vector, meta)| WalRecord::Add { id, vector, meta }),
        (any::<u32>(), arb_vector(), arb_meta())
            .prop_map(|(id, vector, meta)| WalRecord::Update { id, vector, meta }),
        any::<u32>().prop_map(|id| WalRecord::Delete { id }),
    ]
}

async fn write_all(records: &[WalRecord], buffered: bool) -> Arc<MemoryAdapter> {
    let adapter = Arc::new(MemoryAdapter::new());
    let mut writer = WalWriter::new(adapter.clone(), "db.wal", buffered);
    for record in records {
        writer.append(record).await.unwrap();
    }
    writer.flush().await.unwrap();
    adapter
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    #[test]
    fn append_then_scan_round_trips(records in proptest::collection::vec(arb_record(), 1..40)) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            for buffered in [false, true] {
                let adapter = write_all(&records, buffered).await;
                let bytes = adapter.read("db.wal").await.unwrap();
                let replay = scan(&bytes);
                assert!(!replay.truncated);
                assert_eq!(replay.records, records);
            }
        });
    }

    #[test]
    fn truncated_log_recovers_prefix(
        records in proptest::collection::vec(arb_record(), 1..40),
        cut in 1usize..80,
    ) {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async {
            let adapter = write_all(&records, false).await;
            let mut bytes = adapter.read("db.wal").await.unwrap();
            let cut = cut.min(bytes.len().saturating_sub(1));
            bytes.truncate(bytes.len() - cut);

            let replay = scan(&bytes);
            // Whatever survives is an exact prefix of what was written.
            assert!(replay.records.len() <= records.len());
            assert_eq!(replay.records[..], records[..replay.records.len()]);
            assert!(replay.valid_len <= bytes.len() as u64);

            // Healing: once truncated to the valid prefix, the scan is clean.
            bytes.truncate(usize::try_from(replay.valid_len).unwrap());
            let healed = scan(&bytes);
            healed.check().unwrap();
            assert_eq!(healed.records, replay.records);
        });
    }
}

#[tokio::test]
async fn checkpoint_rewrite_leaves_only_checkpoint_frame() {
    let adapter = Arc::new(MemoryAdapter::new());
    let mut writer = WalWriter::new(adapter.clone(), "db.wal", false);
    writer
        .append(&WalRecord::Add {
            id: 1,
            vector: vec![1.0; D],
            meta: Some(json!({"n": 1})),
        })
        .await
        .unwrap();
    writer.append(&WalRecord::Delete { id: 1 }).await.unwrap();

    let checkpoint = WalRecord::Checkpoint { snapshot_id: 5 };
    writer.append(&checkpoint).await.unwrap();
    writer.rewrite(std::slice::from_ref(&checkpoint)).await.unwrap();

    let bytes = adapter.read("db.wal").await.unwrap();
    let replay = scan(&bytes);
    assert_eq!(replay.records, vec![checkpoint.clone()]);
    assert!(replay.tail_after_checkpoint(5).is_empty());
}
