//! indexwalk: enumerate a click-driven classification tree in a live
//! browser session and export it as flat rows.

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use indexwalk::cli::{self, RunOptions};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "indexwalk", version, about)]
struct Cli {
    /// Only print errors.
    #[arg(long, global = true)]
    quiet: bool,

    /// Debug-level logging.
    #[arg(long, global = true)]
    verbose: bool,

    /// Machine-readable output on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Walk every major, middle and minor node and write the taxonomy.
    Walk {
        #[command(flatten)]
        run: RunArgs,

        /// Also run the query/export protocol for every leaf.
        #[arg(long)]
        download: bool,
    },

    /// Export data for each identifier in a CSV/TSV seed file.
    Fetch {
        /// Seed file; identifiers are read from the first column.
        #[arg(long, required_unless_present = "mapping", conflicts_with = "mapping")]
        input: Option<PathBuf>,

        /// Mapping file of `identifier, major, middle, minor` rows; each row
        /// is reached by selecting its labels in the tree.
        #[arg(long)]
        mapping: Option<PathBuf>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Print the configuration as JSON.
    Config {
        /// Config file to validate and print instead of the defaults.
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Output directory [default: ~/.indexwalk/runs].
    #[arg(long)]
    out: Option<PathBuf>,

    /// JSON config file overriding the defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Stop after this many seconds of wall-clock time.
    #[arg(long)]
    budget_secs: Option<u64>,

    /// Show the browser window.
    #[arg(long)]
    headed: bool,

    /// Chromium executable.
    #[arg(long)]
    chrome: Option<PathBuf>,
}

impl From<RunArgs> for RunOptions {
    fn from(a: RunArgs) -> Self {
        Self {
            out: a
                .out
                .unwrap_or_else(|| indexwalk::config::indexwalk_home().join("runs")),
            config: a.config,
            budget_secs: a.budget_secs,
            headed: a.headed,
            chrome: a.chrome,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    // Output flags travel through the environment to the cli helpers.
    if args.quiet {
        std::env::set_var("INDEXWALK_QUIET", "1");
    }
    if args.verbose {
        std::env::set_var("INDEXWALK_VERBOSE", "1");
    }
    if args.json {
        std::env::set_var("INDEXWALK_JSON", "1");
    }
    if args.no_color {
        std::env::set_var("INDEXWALK_NO_COLOR", "1");
    }

    match args.command {
        Commands::Config { config } => cli::config_cmd::run(config.as_deref()),
        Commands::Walk { run, download } => {
            cli::init_tracing();
            cli::walk_cmd::run(&run.into(), download).await
        }
        Commands::Fetch { input, mapping, run } => {
            cli::init_tracing();
            let seeds = match (input, mapping) {
                (_, Some(path)) => cli::fetch_cmd::Seeds::Mapping(path),
                (Some(path), None) => cli::fetch_cmd::Seeds::Identifiers(path),
                (None, None) => anyhow::bail!("either --input or --mapping is required"),
            };
            cli::fetch_cmd::run(&run.into(), &seeds).await
        }
    }
}
