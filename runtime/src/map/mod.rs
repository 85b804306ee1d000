//! Taxonomy data model and result persistence.

pub mod sink;
pub mod types;
pub mod writer;

pub use sink::{FlushReport, ManifestEntry, ManifestOutcome, ResultSink, RunSummary};
pub use types::*;
