//! Coordination primitives for writers sharing a storage backend: the
//! epoch-carrying head pointer with compare-and-set, monotonic commit
//! timestamps with commit-wait, and a TTL/epoch memory lock.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use vectorlite_core::{Result, VectorLiteError};
use vectorlite_store::StorageAdapter;

/// Authoritative pointer to the current manifest/snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeadPointer {
    pub manifest: String,
    pub epoch: u64,
    #[serde(rename = "commitTs")]
    pub commit_ts: u64,
}

/// Why a head CAS was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadCasReason {
    EpochRegressed,
    CommitTsRegressed,
}

/// Outcome of a head compare-and-set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    Accepted(HeadPointer),
    Rejected {
        current: HeadPointer,
        reason: HeadCasReason,
    },
}

impl CasOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, CasOutcome::Accepted(_))
    }
}

/// Monotonicity rule: accept iff `next.epoch >= cur.epoch` and the pair
/// `(epoch, commit_ts)` strictly advances.
pub fn head_accepts(cur: Option<&HeadPointer>, next: &HeadPointer) -> Result<(), HeadCasReason> {
    let Some(cur) = cur else { return Ok(()) };
    if next.epoch < cur.epoch {
        return Err(HeadCasReason::EpochRegressed);
    }
    if next.epoch == cur.epoch && next.commit_ts <= cur.commit_ts {
        return Err(HeadCasReason::CommitTsRegressed);
    }
    Ok(())
}

/// Head pointer persisted as JSON under one storage key.
pub struct HeadStore {
    adapter: Arc<dyn StorageAdapter>,
    key: String,
}

impl HeadStore {
    pub fn new(adapter: Arc<dyn StorageAdapter>, key: impl Into<String>) -> Self {
        Self {
            adapter,
            key: key.into(),
        }
    }

    pub async fn load(&self) -> Result<Option<HeadPointer>> {
        match self.adapter.read(&self.key).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| VectorLiteError::Storage(format!("head pointer: {e}"))),
            Err(VectorLiteError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Load-check-write CAS. Callers racing on the same backend serialize
    /// through the memory lock.
    pub async fn try_update(&self, next: &HeadPointer) -> Result<CasOutcome> {
        let current = self.load().await?;
        match head_accepts(current.as_ref(), next) {
            Ok(()) => {
                let bytes = serde_json::to_vec(next)
                    .map_err(|e| VectorLiteError::Storage(e.to_string()))?;
                self.adapter.atomic_write(&self.key, &bytes).await?;
                Ok(CasOutcome::Accepted(next.clone()))
            }
            Err(reason) => Ok(CasOutcome::Rejected {
                current: current.unwrap_or_else(|| next.clone()),
                reason,
            }),
        }
    }
}

/// Inputs to [`compute_commit_ts`], all in the same millisecond clock.
#[derive(Debug, Clone, Copy)]
pub struct CommitTsInput {
    pub prepare_ts: u64,
    pub last_committed_ts: u64,
    pub now_ts: u64,
    pub delta: u64,
}

/// `max(prepare_ts, last_committed_ts + delta, now_ts)`: monotone across
/// writers whose clocks agree within `delta`.
pub fn compute_commit_ts(input: CommitTsInput) -> u64 {
    input
        .prepare_ts
        .max(input.last_committed_ts + input.delta)
        .max(input.now_ts)
}

pub fn system_now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_millis() as u64)
}

/// Sleep until `now >= commit_ts + epsilon_ms`, so externally visible
/// effects never precede their commit timestamp.
pub async fn commit_wait(commit_ts: u64, epsilon_ms: u64) {
    let target = commit_ts + epsilon_ms;
    loop {
        let now = system_now_ms();
        if now >= target {
            return;
        }
        tokio::time::sleep(Duration::from_millis(target - now)).await;
    }
}

#[derive(Debug, Clone)]
struct LockEntry {
    client: String,
    epoch: u64,
    expires_at: u64,
}

/// In-process lease table: per-name exclusive locks with TTL expiry and an
/// epoch that increments on every (re-)acquisition, so stale holders can
/// be fenced.
#[derive(Debug, Default)]
pub struct MemoryLock {
    entries: Mutex<HashMap<String, LockEntry>>,
}

impl MemoryLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self, name: &str, ttl_ms: u64, client: &str) -> Result<u64> {
        self.acquire_at(name, ttl_ms, client, system_now_ms())
    }

    pub fn renew(&self, name: &str, epoch: u64, ttl_ms: u64, client: &str) -> Result<u64> {
        self.renew_at(name, epoch, ttl_ms, client, system_now_ms())
    }

    pub fn release(&self, name: &str, epoch: u64, client: &str) -> Result<()> {
        self.release_at(name, epoch, client)
    }

    pub fn acquire_at(&self, name: &str, ttl_ms: u64, client: &str, now_ms: u64) -> Result<u64> {
        let mut entries = self.entries.lock();
        match entries.get_mut(name) {
            None => {
                entries.insert(
                    name.to_string(),
                    LockEntry {
                        client: client.to_string(),
                        epoch: 1,
                        expires_at: now_ms + ttl_ms,
                    },
                );
                Ok(1)
            }
            Some(entry) if entry.expires_at <= now_ms => {
                entry.client = client.to_string();
                entry.epoch += 1;
                entry.expires_at = now_ms + ttl_ms;
                Ok(entry.epoch)
            }
            Some(entry) if entry.client == client => {
                // Idempotent re-acquire by the live holder refreshes the lease.
                entry.expires_at = now_ms + ttl_ms;
                Ok(entry.epoch)
            }
            Some(entry) => Err(VectorLiteError::LockBusy(format!(
                "'{name}' held by '{}' until {}",
                entry.client, entry.expires_at
            ))),
        }
    }

    pub fn renew_at(
        &self,
        name: &str,
        epoch: u64,
        ttl_ms: u64,
        client: &str,
        now_ms: u64,
    ) -> Result<u64> {
        let mut entries = self.entries.lock();
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| VectorLiteError::LockBusy(format!("'{name}' is not held")))?;
        if entry.expires_at <= now_ms {
            return Err(VectorLiteError::LockBusy(format!("'{name}' lease expired")));
        }
        if entry.client != client {
            return Err(VectorLiteError::LockBusy(format!(
                "'{name}' held by '{}'",
                entry.client
            )));
        }
        if entry.epoch != epoch {
            return Err(VectorLiteError::LockEpochMismatch {
                expected: entry.epoch,
                actual: epoch,
            });
        }
        entry.expires_at = now_ms + ttl_ms;
        Ok(entry.epoch)
    }

    pub fn release_at(&self, name: &str, epoch: u64, client: &str) -> Result<()> {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(name) else {
            return Ok(());
        };
        if entry.client != client {
            return Err(VectorLiteError::LockBusy(format!(
                "'{name}' held by '{}'",
                entry.client
            )));
        }
        if entry.epoch != epoch {
            return Err(VectorLiteError::LockEpochMismatch {
                expected: entry.epoch,
                actual: epoch,
            });
        }
        // Keep the entry so the epoch sequence survives the release.
        entry.expires_at = 0;
        Ok(())
    }
}
