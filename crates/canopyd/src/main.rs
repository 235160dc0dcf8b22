//! canopyd: the Canopy crawl daemon.
//!
//! Single binary that assembles every Canopy subsystem:
//! - Scheduler state (task queue + worker pool)
//! - Crawl workers and their supervisor
//! - Performance collector, resource monitor, metrics facade
//! - Scaling engine
//! - Auto-tuner
//! - Decision journal
//!
//! # Usage
//!
//! ```text
//! canopyd run --root ./docs --output tree.json
//! canopyd config --config canopy.toml
//! canopyd journal /var/lib/canopy/journal.jsonl
//! ```

mod crawl_mode;
mod inspect;

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "canopyd", about = "Canopy adaptive crawl daemon")]
struct Cli {
    /// Log output format.
    #[arg(long, global = true, value_enum, default_value = "text")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Crawl a directory tree with adaptive worker scaling.
    Run {
        /// Path to canopy.toml.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Root of the tree to crawl. Overrides `[crawl].root`.
        #[arg(long)]
        root: Option<PathBuf>,

        /// Initial worker ceiling. Overrides `[crawl].initial_workers`.
        #[arg(long)]
        workers: Option<u32>,

        /// Decision journal (JSON lines). Overrides `[journal].path`.
        #[arg(long)]
        journal: Option<PathBuf>,

        /// Write the crawled tree here as JSON.
        #[arg(long)]
        output: Option<PathBuf>,

        /// Write the final metrics tick here in Prometheus text format.
        #[arg(long)]
        metrics: Option<PathBuf>,
    },

    /// Print the effective configuration and tuning parameters.
    Config {
        /// Path to canopy.toml.
        #[arg(long)]
        config: Option<PathBuf>,
    },

    /// Summarize a decision journal.
    Journal {
        /// Journal file to read.
        path: PathBuf,
    },
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,canopyd=debug,canopy=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match cli.command {
        Command::Run {
            config,
            root,
            workers,
            journal,
            output,
            metrics,
        } => {
            crawl_mode::run_crawl(crawl_mode::CrawlOptions {
                config,
                root,
                workers,
                journal,
                output,
                metrics,
            })
            .await
        }
        Command::Config { config } => inspect::print_config(config.as_deref()),
        Command::Journal { path } => inspect::summarize_journal(&path).await,
    }
}
