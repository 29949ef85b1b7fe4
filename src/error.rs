// src/error.rs

use std::error::Error;
use std::path::PathBuf;
use thiserror::Error;

/// A thread-safe wrapper for standard dynamic errors,
/// so they implement `Send` and `Sync`.
pub type ThreadSafeStdError = Box<dyn Error + Send + Sync + 'static>;

/// Why a factorization produced no usable factors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FactorizationFailure {
    /// The requested rank is outside `1..=min(rows, cols)`. Detected before the backend is called.
    #[error("target rank K={k} is invalid for a {rows}x{cols} matrix (need 1 <= K <= min(rows, cols))")]
    InvalidRank { k: usize, rows: usize, cols: usize },
    /// The backend returned a nonzero status code.
    #[error("truncated SVD backend returned status {0}")]
    Status(i32),
}

/// Errors that abort a pipeline run.
///
/// Malformed CSV lines are not represented here: they are skipped and counted
/// in [`crate::ingest::IngestStats`].
#[derive(Error, Debug)]
pub enum PipelineError {
    /// Wrong argument count or shape.
    #[error("usage error: {0}")]
    Usage(String),

    /// The input could not be read or the output could not be written.
    #[error("I/O error on '{}': {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A buffer of the requested size could not be acquired.
    #[error("cannot allocate {rows}x{cols} matrix: {reason}")]
    Allocation {
        rows: usize,
        cols: usize,
        reason: String,
    },

    #[error("factorization failed: {0}")]
    Factorization(#[from] FactorizationFailure),
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            path: path.into(),
            source,
        }
    }

    /// Process exit code for this error. Every code is nonzero.
    pub fn exit_code(&self) -> i32 {
        match self {
            PipelineError::Usage(_) => 2,
            PipelineError::Io { .. } => 3,
            PipelineError::Allocation { .. } => 4,
            PipelineError::Factorization(_) => 5,
        }
    }
}
