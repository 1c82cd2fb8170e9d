//! Arguments for the `analyze` subcommand.
//!
//! Reserved: spec.md's Non-goals exclude any downstream filtering/scoring
//! pass beyond `annotate`'s inheritance-model tagging, so this subcommand is
//! wired into the CLI tree but does no work yet.

use crate::err::AppError;

#[derive(Debug, clap::Parser)]
pub struct Args {
    /// Annotated variant file to analyze.
    pub variant_file: String,
}

pub fn run(args_common: &crate::common::Args, args: &Args) -> Result<(), AppError> {
    let _ = args_common;
    tracing::info!(
        "analyze is not yet implemented; {:?} was not processed",
        args.variant_file
    );
    Ok(())
}
