//! Error types for the module loader

use std::path::PathBuf;

use thiserror::Error;

/// Result type for loader operations.
pub type LoaderResult<T> = Result<T, LoaderError>;

/// Errors that can occur while probing a shared library.
///
/// None of these are fatal to the runtime: the offending library is logged
/// and skipped, and loading continues with the rest of the directory.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("failed to open library {path}: {source}")]
    Open {
        path: PathBuf,
        source: libloading::Error,
    },

    #[error("library {path} is missing required symbol `{symbol}`: {source}")]
    MissingSymbol {
        path: PathBuf,
        symbol: &'static str,
        source: libloading::Error,
    },

    #[error("library {path} exports an invalid `name`: {reason}")]
    InvalidName { path: PathBuf, reason: String },

    #[error("failed to walk module directory: {0}")]
    Walk(#[from] walkdir::Error),
}
