//! annoflow main executable

pub mod annotate;
pub mod batch;
pub mod common;
pub mod conf;
pub mod filter;
pub mod project;
pub mod report;

use clap::{Parser, Subcommand};
use console::{Emoji, Term};

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Variant filtration, annotation and summary",
    long_about = "This tool filters VCF files, annotates them with an external \
                  annotator, and summarizes the result"
)]
struct Cli {
    /// Commonly used arguments
    #[command(flatten)]
    common: common::Args,

    /// The sub command to run
    #[command(subcommand)]
    command: Commands,
}

/// Enum supporting the parsing of top-level commands.
#[derive(Debug, Subcommand)]
enum Commands {
    /// Filter a single VCF file.
    Filter(filter::Args),
    /// Process a directory of VCF files and write the summary report.
    Batch(batch::Args),
    /// Write the summary report for existing normalized tables.
    Report(report::Args),
}

fn main() -> Result<(), anyhow::Error> {
    let cli = Cli::parse();

    // Build a tracing subscriber according to the configuration in `cli.common`.
    let collector = tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_names(true)
        .with_max_level(match cli.common.verbose.log_level() {
            Some(level) => match level {
                log::Level::Error => tracing::Level::ERROR,
                log::Level::Warn => tracing::Level::WARN,
                log::Level::Info => tracing::Level::INFO,
                log::Level::Debug => tracing::Level::DEBUG,
                log::Level::Trace => tracing::Level::TRACE,
            },
            None => tracing::Level::INFO,
        })
        .compact()
        .finish();

    // Install collector globally so worker threads log as well.
    tracing::subscriber::set_global_default(collector)?;

    let term = Term::stderr();
    match &cli.command {
        Commands::Filter(args) => filter::run(&cli.common, args)?,
        Commands::Batch(args) => batch::run(&cli.common, args)?,
        Commands::Report(args) => report::run(&cli.common, args)?,
    }
    term.write_line(&format!("All done. Have a nice day!{}", Emoji(" 😃", "")))?;

    Ok(())
}
