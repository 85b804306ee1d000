//! Spinner display for long walks.
//!
//! Uses `indicatif`; hidden entirely in quiet and JSON modes.

use crate::cartography::WalkStats;
use crate::cli::output;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

fn spinner_style() -> ProgressStyle {
    ProgressStyle::with_template("  {spinner:.cyan} {elapsed_precise} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
        .tick_chars("\u{25b8}\u{25b9}\u{25b8}\u{25b9}\u{25b8}")
}

/// Create a spinner, or a hidden bar when output is suppressed.
pub fn create_spinner(message: &str) -> ProgressBar {
    if output::is_quiet() || output::is_json() {
        return ProgressBar::hidden();
    }
    let bar = ProgressBar::new_spinner();
    bar.set_style(spinner_style());
    bar.set_message(message.to_string());
    bar.enable_steady_tick(Duration::from_millis(120));
    bar
}

/// One-line rendering of walk progress.
pub fn walk_message(stats: &WalkStats) -> String {
    let mut msg = format!(
        "{} major · {} middle · {} minor · {} rows",
        stats.majors,
        stats.middles,
        stats.minors,
        stats.leaf_records + stats.partial_records
    );
    if stats.skipped > 0 {
        msg.push_str(&format!(" · {} skipped", stats.skipped));
    }
    if stats.recoveries > 0 {
        msg.push_str(&format!(" · {} recoveries", stats.recoveries));
    }
    msg
}

pub fn finish(bar: &ProgressBar, message: &str) {
    bar.set_style(
        ProgressStyle::with_template("  {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    bar.finish_with_message(message.to_string());
}
