//! CLI-level error type. Wraps `fragcast_engine::DownloadError` plus the
//! handful of failure modes that only exist at the front-end boundary (bad
//! input URL, output-format mismatch) — grounded on the teacher's
//! `strev-cli` pattern of a thin `thiserror` wrapper around the library
//! crate's own error type.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("could not parse input '{input}': {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("unrecognized input: '{input}'")]
    UnrecognizedInput { input: String },

    #[error("output format error: {0}")]
    OutputFormat(String),

    #[error(transparent)]
    Engine(#[from] fragcast_engine::DownloadError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Exit code spec.md §6 assigns: 0 success, 1 fatal, 2 user interrupt
    /// with no merge. Only non-success paths construct an `AppError`, so
    /// this never returns 0.
    pub fn exit_code(&self) -> i32 {
        1
    }
}
