//! Pedigree-based variant inheritance annotator, main executable.

pub mod annotation;
pub mod classify;
pub mod cli;
pub mod common;
pub mod err;
pub mod family;
pub mod lookup;
pub mod pipeline;
pub mod sort;
pub mod variant;

use std::process::ExitCode;

use clap::{Parser, Subcommand};
use console::Term;

use err::AppError;

/// CLI parser based on clap.
#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Annotates variants with pedigree-based inheritance models",
    long_about = "Given a pedigree and a variant file, classifies each variant \
                   against the applicable Mendelian inheritance models and \
                   tags gene/exon overlap and, optionally, external scores."
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
#[allow(clippy::large_enum_variant)]
#[derive(Debug, Subcommand)]
enum Commands {
    /// Build a gene/exon interval index from a feature table.
    BuildAnnotation(annotation::builder::Args),
    /// Annotate a variant file with inheritance models and scores.
    Annotate(cli::annotate::Args),
    /// Reserved downstream analysis pass.
    Analyze(cli::analyze::Args),
}

fn run(cli: &Cli) -> Result<(), AppError> {
    match &cli.command {
        Commands::BuildAnnotation(args) => {
            annotation::builder::run(&cli.common, args).map_err(AppError::Other)
        }
        Commands::Annotate(args) => cli::annotate::run(&cli.common, args),
        Commands::Analyze(args) => cli::analyze::run(&cli.common, args),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let collector = tracing_subscriber::fmt()
        .with_target(false)
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

    let term = Term::stderr();
    let result = tracing::subscriber::with_default(collector, || run(&cli));

    match result {
        Ok(()) => {
            let _ = term.write_line("All done. Have a nice day!");
            ExitCode::SUCCESS
        }
        Err(e) => {
            let _ = term.write_line(&format!("error: {e}"));
            e.exit_code()
        }
    }
}
