// Dense rating-matrix truncated SVD

#![doc = include_str!("../README.md")]

pub mod context;
pub mod error;
pub mod factorize;
pub mod ingest;
pub mod instrument;
pub mod linalg_backends;
pub mod matrix;
pub mod pipeline;
pub mod predict;
pub mod profile;
pub mod serialize;

pub use context::ExecutionContext;
pub use error::{FactorizationFailure, PipelineError, ThreadSafeStdError};
pub use factorize::{FactorMatrices, Factorization, FactorizationDriver};
pub use linalg_backends::{BackendSvds, LinAlgBackendProvider, SvdsOutput};
pub use matrix::{DenseMatrix, DenseMatrixBuilder};
pub use pipeline::{run, RunOutcome, RunSummary};
pub use predict::FactorModel;
pub use profile::{ExecutionProfile, Participant, Role};
