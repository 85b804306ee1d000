//! `indexwalk walk`: enumerate the whole classification tree.

use crate::acquisition::DownloadCorrelator;
use crate::cartography::{TaxonomyWalker, WalkStats};
use crate::cli::output::{self, Styled};
use crate::cli::{progress, Finish, RunOptions};
use crate::map::sink::{FlushReport, ResultSink};
use crate::renderer::Renderer;
use anyhow::{bail, Result};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, warn};

pub async fn run(opts: &RunOptions, download: bool) -> Result<()> {
    let s = Styled::new();
    let config = opts.load_config()?;
    if !output::is_quiet() && !output::is_json() {
        output::print_header(&s, "walk");
    }
    info!(app = %config.entry.app_url, download, "starting walk");

    let renderer: Arc<dyn Renderer> = Arc::new(opts.launch().await?);
    let mut walker = TaxonomyWalker::new(Arc::clone(&renderer), config.clone());
    if download {
        walker = walker.with_downloads(DownloadCorrelator::new(&config, opts.downloads_dir()));
    }

    let bar = progress::create_spinner("starting session");
    let ticker = bar.clone();
    walker = walker.with_progress(Box::new(move |stats| {
        ticker.set_message(progress::walk_message(stats));
    }));

    let started = Instant::now();
    let mut sink = ResultSink::new();
    let finish = super::bounded(walker.run(&mut sink), opts.budget_secs).await;
    let mut stats = walker.stats().clone();
    stats.elapsed_ms = started.elapsed().as_millis() as u64;

    if let Err(e) = renderer.close().await {
        warn!("closing browser: {e}");
    }
    let report = super::flush(&sink, &opts.out)?;

    let (headline, failure) = match finish {
        Finish::Completed(Ok(_)) => ("walk complete".to_string(), None),
        Finish::Completed(Err(e)) => ("walk aborted".to_string(), Some(e.to_string())),
        Finish::BudgetExhausted => ("time budget exhausted".to_string(), None),
        Finish::Interrupted => ("interrupted".to_string(), None),
    };
    progress::finish(&bar, &headline);

    if output::is_json() {
        print_json(&headline, failure.as_deref(), &stats, &report, &sink);
    } else if !output::is_quiet() {
        print_summary(&s, &headline, failure.as_deref(), &stats, &report);
    }

    match failure {
        Some(e) => bail!("{e}"),
        None => Ok(()),
    }
}

fn print_summary(
    s: &Styled,
    headline: &str,
    failure: Option<&str>,
    stats: &WalkStats,
    report: &FlushReport,
) {
    let symbol = if failure.is_some() { s.fail_sym() } else { s.ok_sym() };
    eprintln!();
    eprintln!(
        "  {symbol} {} in {}",
        s.bold(headline),
        output::format_duration(stats.elapsed_ms / 1000)
    );
    if let Some(e) = failure {
        eprintln!("    {}", s.red(e));
    }
    eprintln!();
    output::print_check(s.ok_sym(), "rows", &report.rows.to_string());
    output::print_check(
        s.ok_sym(),
        "levels",
        &format!("{} major, {} middle, {} minor", stats.majors, stats.middles, stats.minors),
    );
    if stats.partial_records > 0 {
        output::print_check(s.warn_sym(), "partial", &stats.partial_records.to_string());
    }
    if stats.skipped > 0 {
        output::print_check(s.warn_sym(), "skipped", &stats.skipped.to_string());
    }
    if stats.recoveries > 0 {
        output::print_check(s.warn_sym(), "recoveries", &stats.recoveries.to_string());
    }
    if stats.downloads > 0 {
        output::print_check(s.ok_sym(), "downloads", &stats.downloads.to_string());
    }
    eprintln!();
    eprintln!("  {}", s.dim(&report.taxonomy_csv.display().to_string()));
}

fn print_json(
    headline: &str,
    failure: Option<&str>,
    stats: &WalkStats,
    report: &FlushReport,
    sink: &ResultSink,
) {
    output::print_json(&serde_json::json!({
        "status": headline,
        "error": failure,
        "stats": stats,
        "summary": sink.summary(),
        "outputs": {
            "taxonomy_csv": report.taxonomy_csv,
            "taxonomy_json": report.taxonomy_json,
            "manifest_csv": report.manifest_csv,
            "summary_json": report.summary_json,
        },
    }));
}
