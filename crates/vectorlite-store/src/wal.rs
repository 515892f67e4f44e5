//! Append-only write-ahead log.
//!
//! Frame layout, all integers little-endian:
//!
//! ```text
//! | magic "VLWL" (4) | version (1) | opcode (1) | payload_len (u32) | payload | crc32c (4) |
//! ```
//!
//! The checksum covers the payload only (Castagnoli polynomial). Replay
//! scans from offset 0 and stops at the first frame with a bad magic,
//! version, opcode, checksum, or a truncated payload; the caller truncates
//! the log to the reported valid prefix.

use crate::adapter::StorageAdapter;
use crate::encoding::{read_f32s, read_meta, write_f32s, write_meta};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde_json::Value;
use std::io::{self, Cursor};
use std::sync::Arc;
use tracing::warn;
use vectorlite_core::{Result, VectorId, VectorLiteError};

pub const WAL_MAGIC: [u8; 4] = *b"VLWL";
pub const WAL_VERSION: u8 = 1;

const FRAME_HEADER_LEN: usize = 4 + 1 + 1 + 4;
const FRAME_TRAILER_LEN: usize = 4;

const OP_ADD: u8 = 1;
const OP_UPDATE: u8 = 2;
const OP_DELETE: u8 = 3;
const OP_CHECKPOINT: u8 = 4;

/// One logged operation.
#[derive(Debug, Clone, PartialEq)]
pub enum WalRecord {
    Add {
        id: VectorId,
        vector: Vec<f32>,
        meta: Option<Value>,
    },
    Update {
        id: VectorId,
        vector: Vec<f32>,
        meta: Option<Value>,
    },
    Delete {
        id: VectorId,
    },
    Checkpoint {
        snapshot_id: u64,
    },
}

impl WalRecord {
    fn opcode(&self) -> u8 {
        match self {
            WalRecord::Add { .. } => OP_ADD,
            WalRecord::Update { .. } => OP_UPDATE,
            WalRecord::Delete { .. } => OP_DELETE,
            WalRecord::Checkpoint { .. } => OP_CHECKPOINT,
        }
    }

    fn encode_payload(&self) -> io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        match self {
            WalRecord::Add { id, vector, meta } | WalRecord::Update { id, vector, meta } => {
                buf.write_u32::<LittleEndian>(*id)?;
                buf.write_u16::<LittleEndian>(vector.len() as u16)?;
                write_f32s(&mut buf, vector)?;
                write_meta(&mut buf, meta.as_ref())?;
            }
            WalRecord::Delete { id } => buf.write_u32::<LittleEndian>(*id)?,
            WalRecord::Checkpoint { snapshot_id } => buf.write_u64::<LittleEndian>(*snapshot_id)?,
        }
        Ok(buf)
    }

    fn decode_payload(opcode: u8, payload: &[u8]) -> io::Result<Self> {
        let mut cur = Cursor::new(payload);
        let record = match opcode {
            OP_ADD | OP_UPDATE => {
                let id = cur.read_u32::<LittleEndian>()?;
                let dim = cur.read_u16::<LittleEndian>()?;
                let vector = read_f32s(&mut cur, dim as usize)?;
                let meta = read_meta(&mut cur)?;
                if opcode == OP_ADD {
                    WalRecord::Add { id, vector, meta }
                } else {
                    WalRecord::Update { id, vector, meta }
                }
            }
            OP_DELETE => WalRecord::Delete {
                id: cur.read_u32::<LittleEndian>()?,
            },
            OP_CHECKPOINT => WalRecord::Checkpoint {
                snapshot_id: cur.read_u64::<LittleEndian>()?,
            },
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "unknown opcode",
                ))
            }
        };
        if cur.position() != payload.len() as u64 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "trailing bytes in payload",
            ));
        }
        Ok(record)
    }
}

pub fn encode_frame(record: &WalRecord) -> Result<Vec<u8>> {
    let payload = record
        .encode_payload()
        .map_err(|e| VectorLiteError::InvalidArgument(e.to_string()))?;
    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len() + FRAME_TRAILER_LEN);
    frame.extend_from_slice(&WAL_MAGIC);
    frame.push(WAL_VERSION);
    frame.push(record.opcode());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    frame.extend_from_slice(&crc32c::crc32c(&payload).to_le_bytes());
    Ok(frame)
}

/// Result of scanning a log image.
#[derive(Debug)]
pub struct WalScan {
    pub records: Vec<WalRecord>,
    /// Byte length of the well-formed prefix.
    pub valid_len: u64,
    /// A crash tail (or corruption) was cut off at `valid_len`.
    pub truncated: bool,
}

impl WalScan {
    /// Typed corruption error, for callers that treat a damaged log as
    /// fatal instead of healable.
    pub fn check(&self) -> Result<()> {
        if self.truncated {
            return Err(VectorLiteError::CorruptWal {
                offset: self.valid_len,
                reason: "frame damaged or truncated".to_string(),
            });
        }
        Ok(())
    }

    /// Operations after the most recent checkpoint for `snapshot_id`, or
    /// the whole log if that checkpoint is not present.
    pub fn tail_after_checkpoint(&self, snapshot_id: u64) -> &[WalRecord] {
        let cut = self
            .records
            .iter()
            .rposition(|r| matches!(r, WalRecord::Checkpoint { snapshot_id: s } if *s == snapshot_id))
            .map_or(0, |i| i + 1);
        &self.records[cut..]
    }
}

/// Replay a log image from offset 0, stopping at the first damaged frame.
pub fn scan(bytes: &[u8]) -> WalScan {
    let mut records = Vec::new();
    let mut offset = 0usize;

    loop {
        let remaining = &bytes[offset..];
        if remaining.is_empty() {
            break;
        }
        if remaining.len() < FRAME_HEADER_LEN {
            warn!(offset, "wal: truncated frame header, cutting tail");
            break;
        }
        if remaining[..4] != WAL_MAGIC {
            warn!(offset, "wal: bad frame magic, cutting tail");
            break;
        }
        if remaining[4] != WAL_VERSION {
            warn!(offset, version = remaining[4], "wal: unknown frame version, cutting tail");
            break;
        }
        let opcode = remaining[5];
        let payload_len =
            u32::from_le_bytes([remaining[6], remaining[7], remaining[8], remaining[9]]) as usize;
        let frame_len = FRAME_HEADER_LEN + payload_len + FRAME_TRAILER_LEN;
        if remaining.len() < frame_len {
            warn!(offset, "wal: truncated frame payload, cutting tail");
            break;
        }
        let payload = &remaining[FRAME_HEADER_LEN..FRAME_HEADER_LEN + payload_len];
        let stored_crc = u32::from_le_bytes([
            remaining[frame_len - 4],
            remaining[frame_len - 3],
            remaining[frame_len - 2],
            remaining[frame_len - 1],
        ]);
        if crc32c::crc32c(payload) != stored_crc {
            warn!(offset, "wal: frame crc mismatch, cutting tail");
            break;
        }
        match WalRecord::decode_payload(opcode, payload) {
            Ok(record) => records.push(record),
            Err(e) => {
                warn!(offset, error = %e, "wal: undecodable frame, cutting tail");
                break;
            }
        }
        offset += frame_len;
    }

    WalScan {
        records,
        valid_len: offset as u64,
        truncated: offset < bytes.len(),
    }
}

/// Frame-at-a-time appender over a storage adapter.
///
/// Write-through by default: each frame reaches the adapter before the
/// append returns. Buffered mode accumulates frames in memory until
/// [`WalWriter::flush`], for callers that want mutations to stay
/// suspension-free.
pub struct WalWriter {
    adapter: Arc<dyn StorageAdapter>,
    key: String,
    buffered: bool,
    pending: Vec<u8>,
    appended_frames: u64,
}

impl WalWriter {
    pub fn new(adapter: Arc<dyn StorageAdapter>, key: impl Into<String>, buffered: bool) -> Self {
        Self {
            adapter,
            key: key.into(),
            buffered,
            pending: Vec::new(),
            appended_frames: 0,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub async fn append(&mut self, record: &WalRecord) -> Result<()> {
        let frame = encode_frame(record)?;
        if self.buffered {
            self.pending.extend_from_slice(&frame);
        } else {
            self.adapter.append(&self.key, &frame).await?;
        }
        self.appended_frames += 1;
        Ok(())
    }

    /// Push any buffered frames to the adapter.
    pub async fn flush(&mut self) -> Result<()> {
        if !self.pending.is_empty() {
            let pending = std::mem::take(&mut self.pending);
            if let Err(e) = self.adapter.append(&self.key, &pending).await {
                self.pending = pending;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Replace the log with exactly `records` (checkpoint truncation) and
    /// drop anything buffered.
    pub async fn rewrite(&mut self, records: &[WalRecord]) -> Result<()> {
        let mut image = Vec::new();
        for record in records {
            image.extend_from_slice(&encode_frame(record)?);
        }
        self.adapter.write(&self.key, &image).await?;
        self.pending.clear();
        Ok(())
    }

    /// Truncate the on-storage log to its well-formed prefix.
    pub async fn truncate_to(&self, valid: &[u8]) -> Result<()> {
        self.adapter.write(&self.key, valid).await
    }

    pub fn pending_bytes(&self) -> usize {
        self.pending.len()
    }

    pub fn appended_frames(&self) -> u64 {
        self.appended_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_records() -> Vec<WalRecord> {
        vec![
            WalRecord::Add {
                id: 1,
                vector: vec![1.0, 2.0],
                meta: Some(json!({"k": "v"})),
            },
            WalRecord::Update {
                id: 1,
                vector: vec![3.0, 4.0],
                meta: None,
            },
            WalRecord::Delete { id: 9 },
            WalRecord::Checkpoint { snapshot_id: 3 },
        ]
    }

    fn image(records: &[WalRecord]) -> Vec<u8> {
        let mut out = Vec::new();
        for r in records {
            out.extend_from_slice(&encode_frame(r).unwrap());
        }
        out
    }

    #[test]
    fn scan_round_trips_clean_log() {
        let records = sample_records();
        let scan = scan(&image(&records));
        assert_eq!(scan.records, records);
        assert!(!scan.truncated);
        assert_eq!(scan.valid_len, image(&records).len() as u64);
    }

    #[test]
    fn crc_flip_cuts_tail_at_bad_frame() {
        let records = sample_records();
        let mut bytes = image(&records);
        // Flip one payload byte inside the second frame.
        let first_len = encode_frame(&records[0]).unwrap().len();
        bytes[first_len + FRAME_HEADER_LEN] ^= 0xFF;

        let scan = scan(&bytes);
        assert_eq!(scan.records, records[..1]);
        assert!(scan.truncated);
        assert_eq!(scan.valid_len, first_len as u64);

        let err = scan.check().unwrap_err();
        assert!(err.is_corruption());
        assert!(matches!(
            err,
            VectorLiteError::CorruptWal { offset, .. } if offset == first_len as u64
        ));
    }

    #[test]
    fn torn_final_frame_is_dropped() {
        let records = sample_records();
        let mut bytes = image(&records);
        bytes.truncate(bytes.len() - 3);
        let scan = scan(&bytes);
        assert_eq!(scan.records, records[..3]);
        assert!(scan.truncated);
    }

    #[test]
    fn unknown_opcode_terminates_replay() {
        let records = vec![WalRecord::Delete { id: 5 }];
        let mut bytes = image(&records);
        let mut rogue = encode_frame(&WalRecord::Delete { id: 6 }).unwrap();
        rogue[5] = 0x77; // opcode slot; crc still matches the payload
        bytes.extend_from_slice(&rogue);

        let scan = scan(&bytes);
        assert_eq!(scan.records, records);
        assert!(scan.truncated);
    }

    #[test]
    fn tail_after_checkpoint_skips_applied_prefix() {
        let records = vec![
            WalRecord::Add {
                id: 1,
                vector: vec![0.0],
                meta: None,
            },
            WalRecord::Checkpoint { snapshot_id: 7 },
            WalRecord::Delete { id: 1 },
        ];
        let scan = scan(&image(&records));
        assert_eq!(scan.tail_after_checkpoint(7), &records[2..]);
        // A checkpoint for some other snapshot does not cut anything.
        assert_eq!(scan.tail_after_checkpoint(99), &records[..]);
    }
}
