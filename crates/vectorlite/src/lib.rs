#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]

pub mod coord;
pub mod debounce;
mod engine;
pub mod lock;
pub mod placement;
pub mod recovery;

pub use engine::{EngineStats, SearchFilter, SearchHit, SearchOptions, VectorLite};
pub use recovery::Bootstrap;

pub use vectorlite_core::{
    AnnStrategy, EngineOptions, FilterExpr, HnswParams, IvfParams, Metric, NumericBounds, Result,
    ScalarValue, VectorId, VectorLiteError,
};
pub use vectorlite_index::IvfEvaluation;
pub use vectorlite_store::{
    FileAdapter, MemoryAdapter, StorageAdapter, UpsertOutcome,
};
