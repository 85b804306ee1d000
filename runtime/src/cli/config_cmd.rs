//! `indexwalk config`: print the effective configuration.

use crate::config::WalkerConfig;
use anyhow::{Context, Result};
use std::path::Path;

/// Print the configuration that a run would use, as JSON on stdout.
///
/// With no file this is the built-in default, a starting point for a
/// custom `--config`.
pub fn run(path: Option<&Path>) -> Result<()> {
    let config = WalkerConfig::load(path)?;
    let json = serde_json::to_string_pretty(&config).context("serializing config")?;
    println!("{json}");
    Ok(())
}
