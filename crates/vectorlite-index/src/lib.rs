#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

pub mod ann;
pub mod attrs;
pub mod bruteforce;
pub mod eval;
pub mod hnsw;
pub mod ivf;
pub mod snapshot;

pub use ann::{AnnIndex, Hit};
pub use attrs::AttributeIndex;
pub use eval::evaluate;
pub use hnsw::HnswIndex;
pub use ivf::{IvfEvaluation, IvfIndex};
pub use snapshot::{DecodedSnapshot, SNAP_MAGIC, SNAP_VERSION};
