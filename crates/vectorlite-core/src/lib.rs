#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]

pub mod codec;
pub mod config;
pub mod error;
pub mod filter;
pub mod metric;

pub use codec::{metric_codec, strategy_codec, EnumCodec};
pub use config::{AnnStrategy, EngineOptions, HnswParams, IvfParams};
pub use error::{Result, VectorLiteError};
pub use filter::{FilterExpr, NumericBounds, ScalarValue};
pub use metric::Metric;

/// User-assigned record identifier, unique per database.
pub type VectorId = u32;
