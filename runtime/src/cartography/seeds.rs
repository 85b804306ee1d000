//! Seed mode: run the query/export protocol for a list of identifiers
//! instead of discovering them through the tree.

use crate::acquisition::{DownloadCorrelator, FetchOutcome};
use crate::config::WalkerConfig;
use crate::error::{ActionError, WalkError};
use crate::live::act::ActionExecutor;
use crate::live::session::SessionGuard;
use crate::map::sink::{ManifestEntry, ResultSink};
use crate::renderer::Renderer;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize)]
pub struct SeedStats {
    pub identifiers: usize,
    pub downloaded: usize,
    pub no_data: usize,
    pub failed: usize,
}

pub struct SeedRunner {
    exec: ActionExecutor,
    guard: SessionGuard,
    correlator: DownloadCorrelator,
    stats: SeedStats,
}

impl SeedRunner {
    pub fn new(renderer: Arc<dyn Renderer>, config: &WalkerConfig, correlator: DownloadCorrelator) -> Self {
        Self {
            exec: ActionExecutor::new(&config.timeouts),
            guard: SessionGuard::new(renderer, config),
            correlator,
            stats: SeedStats::default(),
        }
    }

    pub async fn run(
        &mut self,
        identifiers: &[String],
        sink: &mut ResultSink,
    ) -> Result<SeedStats, WalkError> {
        self.guard.start(&self.exec).await?;
        let result = self.fetch_all(identifiers, sink).await;
        self.guard.close().await;
        result.map(|()| self.stats.clone())
    }

    async fn fetch_all(&mut self, identifiers: &[String], sink: &mut ResultSink) -> Result<(), WalkError> {
        for (i, id) in identifiers.iter().enumerate() {
            self.stats.identifiers += 1;
            let outcome = self.fetch_one(id).await?;
            match &outcome {
                Ok(FetchOutcome::Success { .. }) => self.stats.downloaded += 1,
                Ok(FetchOutcome::NoData) => self.stats.no_data += 1,
                _ => self.stats.failed += 1,
            }
            let entry = match outcome {
                Ok(outcome) => outcome.manifest_entry(id.as_str()),
                Err(e) => {
                    warn!(identifier = %id, "fetch failed: {e}");
                    ManifestEntry::failed(id.as_str(), &e)
                }
            };
            sink.note(entry);
            info!(identifier = %id, done = i + 1, total = identifiers.len(), "identifier processed");
        }
        Ok(())
    }

    /// One identifier; a lost session is recovered and the identifier
    /// retried once.
    async fn fetch_one(&mut self, id: &str) -> Result<Result<FetchOutcome, ActionError>, WalkError> {
        let mut retried = false;
        loop {
            self.guard.ensure_live(&self.exec).await?;
            let result = match self.guard.view() {
                Ok(view) => self.correlator.fetch_identifier(&self.exec, view, id).await,
                Err(e) => Err(e),
            };
            match result {
                Err(ActionError::SessionLost) if !retried => {
                    warn!(identifier = %id, "session lost, retrying after recovery");
                    self.guard.invalidate();
                    retried = true;
                }
                Err(ActionError::SessionLost) => {
                    self.guard.invalidate();
                    return Ok(Err(ActionError::SessionLost));
                }
                other => return Ok(other),
            }
        }
    }
}
