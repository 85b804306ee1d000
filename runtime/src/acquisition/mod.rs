//! Data acquisition through the application's own query and export controls.

pub mod download;

pub use download::{DownloadCorrelator, FetchOutcome, FetchStage};
