//! Result sink: accumulates taxonomy rows and per-node outcomes in memory,
//! and writes them out once at the end of a run.

use crate::error::ActionError;
use crate::map::types::{ClassificationRecord, VisitKey};
use crate::map::writer;
use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Outcome tag written to the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManifestOutcome {
    Success,
    Partial,
    NoData,
    Timeout,
    DownloadTimeout,
    NotFound,
    NotVisible,
    Disabled,
    Stale,
    Unreachable,
    SessionLost,
    Failed,
}

impl ManifestOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            ManifestOutcome::Success => "success",
            ManifestOutcome::Partial => "partial",
            ManifestOutcome::NoData => "no_data",
            ManifestOutcome::Timeout => "timeout",
            ManifestOutcome::DownloadTimeout => "download_timeout",
            ManifestOutcome::NotFound => "not_found",
            ManifestOutcome::NotVisible => "not_visible",
            ManifestOutcome::Disabled => "disabled",
            ManifestOutcome::Stale => "stale",
            ManifestOutcome::Unreachable => "unreachable",
            ManifestOutcome::SessionLost => "session_lost",
            ManifestOutcome::Failed => "failed",
        }
    }
}

impl From<&ActionError> for ManifestOutcome {
    fn from(err: &ActionError) -> Self {
        match err {
            ActionError::NotFound(_) => ManifestOutcome::NotFound,
            ActionError::NotVisible(_) => ManifestOutcome::NotVisible,
            ActionError::Disabled(_) => ManifestOutcome::Disabled,
            ActionError::Stale { .. } => ManifestOutcome::Stale,
            ActionError::Timeout { .. } => ManifestOutcome::Timeout,
            ActionError::SessionLost => ManifestOutcome::SessionLost,
            ActionError::Unreachable(_) => ManifestOutcome::Unreachable,
            ActionError::DownloadTimeout(_) => ManifestOutcome::DownloadTimeout,
            ActionError::Driver(_) => ManifestOutcome::Failed,
        }
    }
}

impl fmt::Display for ManifestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One manifest row: what happened to a path or identifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub identifier: String,
    pub outcome: ManifestOutcome,
    pub reason: String,
    pub artifact: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

impl ManifestEntry {
    pub fn new(identifier: impl Into<String>, outcome: ManifestOutcome) -> Self {
        Self {
            identifier: identifier.into(),
            outcome,
            reason: String::new(),
            artifact: None,
            recorded_at: Utc::now(),
        }
    }

    pub fn failed(identifier: impl Into<String>, err: &ActionError) -> Self {
        Self::new(identifier, err.into()).with_reason(err.to_string())
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = reason.into();
        self
    }

    pub fn with_artifact(mut self, artifact: &Path) -> Self {
        self.artifact = Some(artifact.display().to_string());
        self
    }
}

/// Aggregate counts over the sink's contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub majors: usize,
    pub middles: usize,
    pub rows: usize,
    pub leaf_rows: usize,
    pub partial_rows: usize,
    pub outcomes: BTreeMap<String, usize>,
    pub started_at: Option<DateTime<Local>>,
    pub finished_at: Option<DateTime<Local>>,
}

/// Paths written by [`ResultSink::flush`].
#[derive(Debug, Clone)]
pub struct FlushReport {
    pub taxonomy_csv: PathBuf,
    pub taxonomy_json: PathBuf,
    pub manifest_csv: Option<PathBuf>,
    pub summary_json: PathBuf,
    pub rows: usize,
}

/// Append-only store for one run.
///
/// Owned by the caller and lent to the walker, so records collected before a
/// cancellation or a fatal error are still flushed.
#[derive(Debug)]
pub struct ResultSink {
    records: Vec<ClassificationRecord>,
    keys: HashSet<VisitKey>,
    manifest: Vec<ManifestEntry>,
    started_at: DateTime<Local>,
}

impl Default for ResultSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ResultSink {
    pub fn new() -> Self {
        Self {
            records: Vec::new(),
            keys: HashSet::new(),
            manifest: Vec::new(),
            started_at: Local::now(),
        }
    }

    /// Append a record. A second record for the same path is dropped.
    pub fn add(&mut self, record: ClassificationRecord) -> bool {
        if !self.keys.insert(record.key().clone()) {
            debug!(key = %record.key(), "duplicate record ignored");
            return false;
        }
        self.records.push(record);
        true
    }

    pub fn note(&mut self, entry: ManifestEntry) {
        debug!(identifier = %entry.identifier, outcome = %entry.outcome, "manifest");
        self.manifest.push(entry);
    }

    pub fn records(&self) -> &[ClassificationRecord] {
        &self.records
    }

    pub fn manifest(&self) -> &[ManifestEntry] {
        &self.manifest
    }

    pub fn summary(&self) -> RunSummary {
        let majors: HashSet<(&str, &str)> = self
            .records
            .iter()
            .map(|r| (r.major_code.as_str(), r.major_name.as_str()))
            .collect();
        let middles: HashSet<(&str, &str, &str)> = self
            .records
            .iter()
            .filter(|r| r.depth() >= 2)
            .map(|r| (r.major_name.as_str(), r.middle_code.as_str(), r.middle_name.as_str()))
            .collect();
        let partial_rows = self.records.iter().filter(|r| r.is_partial()).count();
        let mut outcomes = BTreeMap::new();
        for entry in &self.manifest {
            *outcomes.entry(entry.outcome.as_str().to_string()).or_insert(0) += 1;
        }
        RunSummary {
            majors: majors.len(),
            middles: middles.len(),
            rows: self.records.len(),
            leaf_rows: self.records.len() - partial_rows,
            partial_rows,
            outcomes,
            started_at: Some(self.started_at),
            finished_at: None,
        }
    }

    /// Write every output into `dir`, creating it when missing.
    pub fn flush(&self, dir: &Path) -> io::Result<FlushReport> {
        std::fs::create_dir_all(dir)?;
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

        let taxonomy_csv = dir.join(format!("taxonomy_{stamp}.csv"));
        writer::write_records_csv(&taxonomy_csv, &self.records)?;

        let taxonomy_json = dir.join(format!("taxonomy_{stamp}.json"));
        writer::write_json(&taxonomy_json, &self.records)?;

        let manifest_csv = if self.manifest.is_empty() {
            None
        } else {
            let path = dir.join(format!("manifest_{stamp}.csv"));
            writer::write_manifest_csv(&path, &self.manifest)?;
            Some(path)
        };

        let mut summary = self.summary();
        summary.finished_at = Some(Local::now());
        let summary_json = dir.join(format!("summary_{stamp}.json"));
        writer::write_json(&summary_json, &summary)?;

        info!(
            rows = self.records.len(),
            manifest = self.manifest.len(),
            dir = %dir.display(),
            "results written"
        );
        Ok(FlushReport {
            taxonomy_csv,
            taxonomy_json,
            manifest_csv,
            summary_json,
            rows: self.records.len(),
        })
    }
}
