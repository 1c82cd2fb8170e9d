//! Structured application errors with exit-code mapping.
//!
//! Exit codes follow the CLI contract: `0` success, `1` usage/consistency
//! error, `2` I/O error, `3` missing annotation index.

use std::process::ExitCode;

/// Top-level application error.
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    /// Bad command line flags or unreadable input files.
    #[error("usage error: {0}")]
    Usage(String),

    /// Pedigree individuals and variant-file individuals disagree, or any
    /// other fatal cross-check before work begins.
    #[error("consistency error: {0}")]
    Consistency(String),

    /// The annotation index directory is missing `genes`/`exons` blobs.
    #[error("missing annotation index: {0}")]
    MissingIndex(String),

    /// Any other I/O failure (reading, writing, or building temp storage).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Catch-all for errors bubbled up from deeper in the pipeline that
    /// don't need a specific exit code beyond "something went wrong".
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn exit_code(&self) -> ExitCode {
        match self {
            AppError::Usage(_) | AppError::Consistency(_) => ExitCode::from(1),
            AppError::Io(_) => ExitCode::from(2),
            AppError::MissingIndex(_) => ExitCode::from(3),
            AppError::Other(_) => ExitCode::from(1),
        }
    }
}
