//! Analysis pipeline.
//!
//! Three stages, each consuming the output of the previous one:
//! - `flatten` expands multi-component observations into single records.
//! - `bucket` filters by recency and groups records by calendar period.
//! - `aggregator` computes per-period and whole-series statistics.

pub mod aggregator;
pub mod bucket;
pub mod flatten;

pub use aggregator::*;
pub use bucket::*;
pub use flatten::*;
