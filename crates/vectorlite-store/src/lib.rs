#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]

pub mod adapter;
pub mod encoding;
pub mod packed;
pub mod wal;

pub use adapter::{FileAdapter, MemoryAdapter, StorageAdapter};
pub use packed::{UpsertOutcome, VectorStore};
pub use wal::{WalRecord, WalScan, WalWriter};
