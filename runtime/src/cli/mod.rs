//! CLI subcommand implementations for the indexwalk binary.

pub mod config_cmd;
pub mod fetch_cmd;
pub mod output;
pub mod progress;
pub mod walk_cmd;

use crate::config::WalkerConfig;
use crate::map::sink::{FlushReport, ResultSink};
use crate::renderer::chromium::{ChromiumRenderer, LaunchOptions};
use anyhow::{Context, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Options shared by the commands that drive a browser.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub out: PathBuf,
    pub config: Option<PathBuf>,
    pub budget_secs: Option<u64>,
    pub headed: bool,
    pub chrome: Option<PathBuf>,
}

impl RunOptions {
    pub fn downloads_dir(&self) -> PathBuf {
        self.out.join("downloads")
    }

    pub fn load_config(&self) -> Result<WalkerConfig> {
        WalkerConfig::load(self.config.as_deref())
    }

    /// Browser saves land in a staging directory; correlated files are
    /// moved out of it into `downloads_dir`.
    pub async fn launch(&self) -> Result<ChromiumRenderer> {
        let options = LaunchOptions {
            headless: !self.headed,
            chrome_path: self.chrome.clone(),
            download_dir: self.out.join(".staging"),
        };
        ChromiumRenderer::launch(options)
            .await
            .context("failed to start the browser")
    }
}

/// Initialize tracing: `indexwalk=info` by default, `debug` with
/// `--verbose`, `RUST_LOG` respected.
pub fn init_tracing() {
    let level = if output::is_verbose() { "debug" } else { "info" };
    let directive = format!("indexwalk={level}");
    let mut filter = tracing_subscriber::EnvFilter::from_default_env();
    if let Ok(d) = directive.parse() {
        filter = filter.add_directive(d);
    }
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = if output::is_json() {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

/// How a bounded run ended.
#[derive(Debug)]
pub enum Finish<T> {
    Completed(T),
    BudgetExhausted,
    Interrupted,
}

/// Drive `work` until it completes, the wall-clock budget runs out, or
/// Ctrl-C arrives.
pub async fn bounded<F: Future>(work: F, budget_secs: Option<u64>) -> Finish<F::Output> {
    bounded_by(work, budget_secs, tokio::signal::ctrl_c()).await
}

async fn bounded_by<F, S>(work: F, budget_secs: Option<u64>, signal: S) -> Finish<F::Output>
where
    F: Future,
    S: Future<Output = std::io::Result<()>>,
{
    let limited = async {
        match budget_secs {
            Some(secs) => tokio::time::timeout(Duration::from_secs(secs), work).await.ok(),
            None => Some(work.await),
        }
    };
    tokio::select! {
        out = limited => match out {
            Some(v) => Finish::Completed(v),
            None => {
                warn!("wall-clock budget exhausted");
                Finish::BudgetExhausted
            }
        },
        () = interrupted(signal) => {
            warn!("interrupted");
            Finish::Interrupted
        }
    }
}

/// Resolves once `signal` fires. When the handler cannot be installed this
/// never resolves, so the work runs to completion or to its budget.
async fn interrupted<S: Future<Output = std::io::Result<()>>>(signal: S) {
    if let Err(e) = signal.await {
        warn!("cannot listen for Ctrl-C: {e}");
        std::future::pending::<()>().await;
    }
}

/// Write the sink's outputs, whatever happened to the run.
pub fn flush(sink: &ResultSink, out: &Path) -> Result<FlushReport> {
    let report = sink
        .flush(out)
        .with_context(|| format!("writing results to {}", out.display()))?;
    info!(rows = report.rows, csv = %report.taxonomy_csv.display(), "results written");
    Ok(report)
}
