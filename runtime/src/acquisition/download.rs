//! Download correlation: run the application's query for the selected leaf
//! (or a given identifier), export the result, and tie the downloaded file
//! back to the path that produced it.

use crate::config::{DownloadConfig, SurfaceConfig, WalkerConfig};
use crate::error::ActionError;
use crate::live::act::{ActionExecutor, Constraints};
use crate::live::surface::Surface;
use crate::map::sink::{ManifestEntry, ManifestOutcome};
use crate::map::types::{ClassificationRecord, TraversalPath};
use crate::renderer::RenderContext;
use chrono::Local;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Which wait ran out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchStage {
    /// The export control never became actionable.
    Export,
    /// The export was clicked but no file landed.
    Download,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Success { artifact: PathBuf },
    /// The application answered with its no-data sentinel. Terminal.
    NoData,
    Timeout { stage: FetchStage },
}

impl FetchOutcome {
    pub fn manifest_entry(&self, identifier: impl Into<String>) -> ManifestEntry {
        match self {
            FetchOutcome::Success { artifact } => {
                ManifestEntry::new(identifier, ManifestOutcome::Success).with_artifact(artifact)
            }
            FetchOutcome::NoData => ManifestEntry::new(identifier, ManifestOutcome::NoData)
                .with_reason("query returned no data"),
            FetchOutcome::Timeout {
                stage: FetchStage::Export,
            } => ManifestEntry::new(identifier, ManifestOutcome::Timeout)
                .with_reason("export control never became actionable"),
            FetchOutcome::Timeout {
                stage: FetchStage::Download,
            } => ManifestEntry::new(identifier, ManifestOutcome::DownloadTimeout)
                .with_reason("download did not complete"),
        }
    }
}

pub struct DownloadCorrelator {
    config: DownloadConfig,
    surface: SurfaceConfig,
    dir: PathBuf,
}

impl DownloadCorrelator {
    /// Artifacts are renamed into `dir`.
    pub fn new(config: &WalkerConfig, dir: PathBuf) -> Self {
        Self {
            config: config.download.clone(),
            surface: config.surface.clone(),
            dir,
        }
    }

    /// Query and export for the leaf the UI has just selected.
    ///
    /// The application copies the leaf's code into the search field on
    /// selection; when it did not, the record's code is filled in instead.
    pub async fn fetch(
        &self,
        exec: &ActionExecutor,
        view: &dyn RenderContext,
        path: &TraversalPath,
        record: &ClassificationRecord,
    ) -> Result<FetchOutcome, ActionError> {
        Surface::new(exec, &self.surface).close(view).await?;

        let value = exec.read_field(view, &self.config.search_input).await?;
        if value.trim().is_empty() {
            if record.minor_code.is_empty() {
                return Err(ActionError::NotFound(format!(
                    "search field is empty after selecting {path}"
                )));
            }
            debug!(code = %record.minor_code, "search field empty, filling from record");
            exec.fill_field(view, &self.config.search_input, &record.minor_code)
                .await?;
        }

        self.run_query(exec, view, &path.visit_key().to_string())
            .await
    }

    /// Query and export for an identifier typed into the search field.
    pub async fn fetch_identifier(
        &self,
        exec: &ActionExecutor,
        view: &dyn RenderContext,
        identifier: &str,
    ) -> Result<FetchOutcome, ActionError> {
        Surface::new(exec, &self.surface).close(view).await?;
        exec.fill_field(view, &self.config.search_input, identifier)
            .await?;
        self.run_query(exec, view, identifier).await
    }

    async fn run_query(
        &self,
        exec: &ActionExecutor,
        view: &dyn RenderContext,
        label: &str,
    ) -> Result<FetchOutcome, ActionError> {
        let gate = self.config.gate_timeout_ms;
        exec.click(view, &self.config.query, Constraints::actionable(gate))
            .await?;

        let ready = exec
            .wait_for_any(
                view,
                &[
                    (self.config.export.as_slice(), Constraints::actionable(0)),
                    (self.config.no_data.as_slice(), Constraints::visible(0)),
                ],
                gate,
            )
            .await;
        match ready {
            Ok(0) => {}
            Ok(_) => {
                info!(%label, "no data");
                return Ok(FetchOutcome::NoData);
            }
            Err(ActionError::Timeout { .. }) => {
                warn!(%label, "export control never became actionable");
                return Ok(FetchOutcome::Timeout {
                    stage: FetchStage::Export,
                });
            }
            Err(e) => return Err(e),
        }

        exec.click(view, &self.config.export, Constraints::actionable(gate))
            .await?;
        let downloaded = match view.wait_for_download(self.config.download_timeout_ms).await {
            Ok(path) => path,
            Err(ActionError::DownloadTimeout(_)) | Err(ActionError::Timeout { .. }) => {
                warn!(%label, "download did not land");
                return Ok(FetchOutcome::Timeout {
                    stage: FetchStage::Download,
                });
            }
            Err(e) => return Err(e),
        };

        let artifact = self.correlate(&downloaded, label)?;
        info!(%label, artifact = %artifact.display(), "downloaded");
        Ok(FetchOutcome::Success { artifact })
    }

    /// Move the file to `<label>_<timestamp>_<original name>` in the
    /// artifact directory.
    fn correlate(&self, downloaded: &Path, label: &str) -> Result<PathBuf, ActionError> {
        let original = downloaded
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "download".to_string());
        let stamp = Local::now().format("%Y%m%d_%H%M%S");
        let target = self
            .dir
            .join(format!("{}_{stamp}_{original}", file_label(label)));

        std::fs::create_dir_all(&self.dir).map_err(|e| ActionError::Driver(e.to_string()))?;
        if std::fs::rename(downloaded, &target).is_err() {
            // Across filesystems rename fails; copy and remove instead.
            std::fs::copy(downloaded, &target).map_err(|e| ActionError::Driver(e.to_string()))?;
            let _ = std::fs::remove_file(downloaded);
        }
        Ok(target)
    }
}

/// Filesystem-safe form of a path label.
fn file_label(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut last_sep = false;
    for c in label.chars() {
        if c.is_alphanumeric() || c == '-' {
            out.push(c);
            last_sep = false;
        } else if !last_sep {
            out.push('_');
            last_sep = true;
        }
    }
    let trimmed = out.trim_matches('_');
    if trimmed.is_empty() {
        "item".to_string()
    } else {
        trimmed.chars().take(120).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::scripted::{test_config, two_major_tree, Behavior, ScriptedUi};

    fn ui(has_data: bool, export_ready: bool, dir: &Path) -> ScriptedUi {
        let behavior = Behavior {
            has_data,
            export_ready,
            download_dir: Some(dir.to_path_buf()),
            ..Behavior::default()
        };
        ScriptedUi::with_behavior(two_major_tree(), behavior).opened()
    }

    #[tokio::test(start_paused = true)]
    async fn test_identifier_download_is_renamed() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config();
        let exec = ActionExecutor::new(&config.timeouts);
        let correlator = DownloadCorrelator::new(&config, dir.path().join("artifacts"));
        let view = ui(true, true, dir.path());

        let outcome = correlator
            .fetch_identifier(&exec, &view, "AA100")
            .await
            .unwrap();
        let FetchOutcome::Success { artifact } = outcome else {
            panic!("expected a download, got {outcome:?}");
        };
        let name = artifact.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("AA100_"));
        assert!(name.ends_with("_export_1.xlsx"));
        assert!(artifact.exists());
        assert!(!dir.path().join("export_1.xlsx").exists());
        assert!(!view.state().lock().unwrap().surface_open);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_data_sentinel() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config();
        let exec = ActionExecutor::new(&config.timeouts);
        let correlator = DownloadCorrelator::new(&config, dir.path().to_path_buf());
        let view = ui(false, true, dir.path());

        let outcome = correlator.fetch_identifier(&exec, &view, "ZZ999").await.unwrap();
        assert_eq!(outcome, FetchOutcome::NoData);
        assert_eq!(outcome.manifest_entry("ZZ999").outcome, ManifestOutcome::NoData);
    }

    #[tokio::test(start_paused = true)]
    async fn test_export_never_enabled_times_out() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config();
        let exec = ActionExecutor::new(&config.timeouts);
        let correlator = DownloadCorrelator::new(&config, dir.path().to_path_buf());
        let view = ui(true, false, dir.path());

        let outcome = correlator.fetch_identifier(&exec, &view, "AA100").await.unwrap();
        assert_eq!(
            outcome,
            FetchOutcome::Timeout {
                stage: FetchStage::Export
            }
        );
        assert_eq!(outcome.manifest_entry("AA100").outcome, ManifestOutcome::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_search_field_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let config = test_config();
        let exec = ActionExecutor::new(&config.timeouts);
        let correlator = DownloadCorrelator::new(&config, dir.path().to_path_buf());
        let view = ui(true, true, dir.path());
        let path = TraversalPath::root();
        let record = ClassificationRecord::from_path(&path, "");

        let err = correlator.fetch(&exec, &view, &path, &record).await.unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_file_label() {
        assert_eq!(file_label("행위(A) → 01 기본진료료"), "행위_A_01_기본진료료");
        assert_eq!(file_label("///"), "item");
    }
}
