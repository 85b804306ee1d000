//! `indexwalk fetch`: export data for identifiers listed in a file.

use crate::acquisition::DownloadCorrelator;
use crate::cartography::{SeedRunner, TaxonomyWalker};
use crate::cli::output::{self, Styled};
use crate::cli::{progress, Finish, RunOptions};
use crate::error::WalkError;
use crate::input::{read_identifiers, read_mapping};
use crate::map::sink::ResultSink;
use crate::renderer::Renderer;
use anyhow::{bail, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Where the identifiers come from.
#[derive(Debug, Clone)]
pub enum Seeds {
    /// Typed into the search field one by one.
    Identifiers(PathBuf),
    /// Reached by selecting their labels in the tree.
    Mapping(PathBuf),
}

pub async fn run(opts: &RunOptions, seeds: &Seeds) -> Result<()> {
    let s = Styled::new();
    let config = opts.load_config()?;
    let (identifiers, mapping) = match seeds {
        Seeds::Identifiers(path) => (read_identifiers(path)?, None),
        Seeds::Mapping(path) => {
            let rows = read_mapping(path)?;
            (rows.iter().map(|r| r.identifier.clone()).collect::<Vec<_>>(), Some(rows))
        }
    };
    let source = match seeds {
        Seeds::Identifiers(path) | Seeds::Mapping(path) => path.display().to_string(),
    };
    if !output::is_quiet() && !output::is_json() {
        output::print_header(&s, "fetch");
        eprintln!("  {} identifiers from {source}", identifiers.len());
    }
    info!(count = identifiers.len(), mapped = mapping.is_some(), "starting seed fetch");

    let renderer: Arc<dyn Renderer> = Arc::new(opts.launch().await?);
    let correlator = DownloadCorrelator::new(&config, opts.downloads_dir());

    let bar = progress::create_spinner(&format!("fetching {} identifiers", identifiers.len()));
    let mut sink = ResultSink::new();
    let finish: Finish<Result<(), WalkError>> = match mapping {
        Some(rows) => {
            let mut walker =
                TaxonomyWalker::new(Arc::clone(&renderer), config.clone()).with_downloads(correlator);
            let ticker = bar.clone();
            walker = walker.with_progress(Box::new(move |stats| {
                ticker.set_message(progress::walk_message(stats));
            }));
            map_finish(super::bounded(walker.run_mapped(&rows, &mut sink), opts.budget_secs).await)
        }
        None => {
            let mut runner = SeedRunner::new(Arc::clone(&renderer), &config, correlator);
            map_finish(super::bounded(runner.run(&identifiers, &mut sink), opts.budget_secs).await)
        }
    };

    if let Err(e) = renderer.close().await {
        warn!("closing browser: {e}");
    }
    let report = super::flush(&sink, &opts.out)?;
    let summary = sink.summary();

    let (headline, failure) = match finish {
        Finish::Completed(Ok(())) => ("fetch complete", None),
        Finish::Completed(Err(e)) => ("fetch aborted", Some(e.to_string())),
        Finish::BudgetExhausted => ("time budget exhausted", None),
        Finish::Interrupted => ("interrupted", None),
    };
    progress::finish(&bar, headline);

    if output::is_json() {
        output::print_json(&serde_json::json!({
            "status": headline,
            "error": failure,
            "requested": identifiers.len(),
            "outcomes": summary.outcomes,
            "taxonomy_csv": report.taxonomy_csv,
            "manifest_csv": report.manifest_csv,
        }));
    } else if !output::is_quiet() {
        let symbol = if failure.is_some() { s.fail_sym() } else { s.ok_sym() };
        eprintln!();
        eprintln!("  {symbol} {}", s.bold(headline));
        if let Some(e) = &failure {
            eprintln!("    {}", s.red(e));
        }
        for (outcome, count) in &summary.outcomes {
            output::print_check(s.ok_sym(), outcome, &count.to_string());
        }
        if let Some(manifest) = &report.manifest_csv {
            eprintln!();
            eprintln!("  {}", s.dim(&manifest.display().to_string()));
        }
    }

    match failure {
        Some(e) => bail!("{e}"),
        None => Ok(()),
    }
}

fn map_finish<T>(finish: Finish<Result<T, WalkError>>) -> Finish<Result<(), WalkError>> {
    match finish {
        Finish::Completed(result) => Finish::Completed(result.map(|_| ())),
        Finish::BudgetExhausted => Finish::BudgetExhausted,
        Finish::Interrupted => Finish::Interrupted,
    }
}
