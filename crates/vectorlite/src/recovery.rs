//! Open-time recovery: load the snapshot if one exists, then replay the
//! WAL tail that postdates its checkpoint. A corrupt WAL tail is truncated
//! and logged, never surfaced; a corrupt snapshot is fatal.

use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, warn};
use vectorlite_core::{EngineOptions, Result, VectorLiteError};
use vectorlite_index::{snapshot, AnnIndex, AttributeIndex};
use vectorlite_store::wal::{scan, WalRecord};
use vectorlite_store::{StorageAdapter, VectorStore};

/// Engine state assembled by `open`.
pub struct Bootstrap {
    pub store: VectorStore,
    pub ann: AnnIndex,
    pub attrs: AttributeIndex,
    pub snapshot_id: u64,
    /// Operations replayed from the WAL tail.
    pub replayed: usize,
    /// A crash tail was cut off the WAL.
    pub wal_truncated: bool,
}

pub async fn bootstrap(
    options: &EngineOptions,
    index_adapter: &Arc<dyn StorageAdapter>,
    data_adapter: &Arc<dyn StorageAdapter>,
    snap_key: &str,
    wal_key: &str,
) -> Result<Bootstrap> {
    let (mut store, mut ann, mut attrs, snapshot_id) = match index_adapter.read(snap_key).await {
        Ok(bytes) => {
            let decoded = snapshot::decode(&bytes)?;
            if decoded.store.dim() != usize::from(options.dim)
                || decoded.store.metric() != options.metric
                || decoded.ann.strategy() != options.strategy
            {
                return Err(VectorLiteError::InvalidArgument(format!(
                    "snapshot is dim={} metric={} strategy={}, options say dim={} metric={} strategy={}",
                    decoded.store.dim(),
                    decoded.store.metric().label(),
                    decoded.ann.strategy().label(),
                    options.dim,
                    options.metric.label(),
                    options.strategy.label()
                )));
            }
            debug!(
                key = snap_key,
                count = decoded.store.count(),
                snapshot_id = decoded.snapshot_id,
                "loaded snapshot"
            );
            (
                decoded.store,
                decoded.ann,
                decoded.attrs,
                decoded.snapshot_id,
            )
        }
        Err(VectorLiteError::NotFound(_)) => (
            VectorStore::new(options.dim, options.metric, options.capacity)?,
            AnnIndex::for_options(options),
            AttributeIndex::new(),
            0,
        ),
        Err(e) => return Err(e),
    };

    let wal_bytes = match data_adapter.read(wal_key).await {
        Ok(bytes) => bytes,
        Err(VectorLiteError::NotFound(_)) => Vec::new(),
        Err(e) => return Err(e),
    };

    let replay = scan(&wal_bytes);
    let mut truncate_at = replay.truncated.then_some(replay.valid_len);

    let mut replayed = 0usize;
    for record in replay.tail_after_checkpoint(snapshot_id) {
        match apply(&mut store, &mut ann, &mut attrs, record) {
            Ok(applied) => replayed += usize::from(applied),
            Err(e) => {
                // A frame that passed its checksum but cannot apply is
                // treated like a crash tail: stop and heal.
                warn!(error = %e, "wal replay stopped at inapplicable frame");
                truncate_at = Some(replay.valid_len);
                break;
            }
        }
    }

    let wal_truncated = truncate_at.is_some();
    if let Some(valid_len) = truncate_at {
        warn!(
            key = wal_key,
            old_len = wal_bytes.len(),
            new_len = valid_len,
            "healing wal: truncating crash tail"
        );
        data_adapter
            .write(wal_key, &wal_bytes[..valid_len as usize])
            .await?;
    }

    if replayed > 0 {
        debug!(key = wal_key, replayed, "replayed wal tail");
    }

    Ok(Bootstrap {
        store,
        ann,
        attrs,
        snapshot_id,
        replayed,
        wal_truncated,
    })
}

/// Apply one logged operation to the in-memory state. Returns whether it
/// was a data operation (checkpoints are skipped).
pub(crate) fn apply(
    store: &mut VectorStore,
    ann: &mut AnnIndex,
    attrs: &mut AttributeIndex,
    record: &WalRecord,
) -> Result<bool> {
    match record {
        WalRecord::Add { id, vector, meta } | WalRecord::Update { id, vector, meta } => {
            store.add_or_update(*id, vector, meta.clone())?;
            ann.insert(store, *id);
            match meta {
                Some(Value::Object(map)) => attrs.set_attrs(*id, Some(map)),
                _ => attrs.set_attrs(*id, None),
            }
            Ok(true)
        }
        WalRecord::Delete { id } => {
            if store.remove_by_id(*id).is_some() {
                ann.remove(*id);
                attrs.remove_id(*id);
            }
            Ok(true)
        }
        WalRecord::Checkpoint { .. } => Ok(false),
    }
}
