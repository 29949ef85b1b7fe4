// src/factorize.rs

use crate::error::{FactorizationFailure, PipelineError};
use crate::linalg_backends::{BackendSvds, SVDS_STATUS_OK};
use crate::matrix::DenseMatrix;
use log::{debug, info, warn};
use ndarray::{Array2, ArrayView2};

/// The three factors of a truncated SVD. Any of them may be absent.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FactorMatrices {
    /// Shape `(rows, K)`.
    pub u: Option<Array2<f64>>,
    /// Shape `(K, K)`, singular values on the diagonal.
    pub s: Option<Array2<f64>>,
    /// Shape `(cols, K)`.
    pub v: Option<Array2<f64>>,
}

impl FactorMatrices {
    pub fn u(&self) -> Option<ArrayView2<'_, f64>> {
        self.u.as_ref().map(|m| m.view())
    }

    pub fn s(&self) -> Option<ArrayView2<'_, f64>> {
        self.s.as_ref().map(|m| m.view())
    }

    pub fn v(&self) -> Option<ArrayView2<'_, f64>> {
        self.v.as_ref().map(|m| m.view())
    }

    fn byte_len(&self) -> usize {
        [&self.u, &self.s, &self.v]
            .iter()
            .filter_map(|m| m.as_ref())
            .map(|m| m.len() * std::mem::size_of::<f64>())
            .sum()
    }
}

/// Factors of a successful factorization, owned by the driver's caller until
/// [`Factorization::release`] is called.
///
/// `release` consumes the handle, so it can run at most once; callers invoke it
/// after serialization on both the success and the failure path.
#[derive(Debug)]
#[must_use = "factor handles must be released after serialization"]
pub struct Factorization {
    factors: FactorMatrices,
    k: usize,
}

impl Factorization {
    pub fn k(&self) -> usize {
        self.k
    }

    pub fn factors(&self) -> &FactorMatrices {
        &self.factors
    }

    /// Frees the factor buffers. Returns the number of bytes released.
    pub fn release(self) -> usize {
        let bytes = self.factors.byte_len();
        drop(self.factors);
        debug!("Released rank-{} factor matrices ({} bytes).", self.k, bytes);
        bytes
    }
}

/// Checks `1 <= k <= min(rows, cols)`.
pub fn check_rank(rows: usize, cols: usize, k: usize) -> Result<(), FactorizationFailure> {
    if k == 0 || k > rows.min(cols) {
        return Err(FactorizationFailure::InvalidRank { k, rows, cols });
    }
    Ok(())
}

/// Drives a [`BackendSvds`] for one dense matrix.
pub struct FactorizationDriver<B: BackendSvds> {
    backend: B,
}

impl<B: BackendSvds> FactorizationDriver<B> {
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Computes the rank-`k` truncated SVD of `matrix`.
    ///
    /// The rank is validated before the backend is invoked. The matrix is moved
    /// into the backend and freed once the call returns.
    ///
    /// # Errors
    /// [`PipelineError::Factorization`] for an invalid rank or a nonzero backend
    /// status. Partial outputs of a failed call are dropped.
    pub fn factorize(&self, matrix: DenseMatrix, k: usize) -> Result<Factorization, PipelineError> {
        let (rows, cols) = (matrix.rows(), matrix.cols());
        check_rank(rows, cols, k)?;

        info!(
            "Computing rank-{} truncated SVD of {}x{} matrix with the {} backend.",
            k,
            rows,
            cols,
            self.backend.name()
        );
        let output = self.backend.svds_into(matrix.into_array(), k);

        if output.status != SVDS_STATUS_OK {
            let partial = [&output.u, &output.s, &output.v]
                .iter()
                .filter(|m| m.is_some())
                .count();
            warn!(
                "Backend {} returned status {}; discarding {} partial output(s).",
                self.backend.name(),
                output.status,
                partial
            );
            return Err(FactorizationFailure::Status(output.status).into());
        }

        Ok(Factorization {
            factors: FactorMatrices {
                u: output.u,
                s: output.s,
                v: output.v,
            },
            k,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::linalg_backends::SvdsOutput;
    use ndarray::array;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns fixed outputs and counts its invocations.
    pub(crate) struct ScriptedBackend {
        pub calls: AtomicUsize,
        pub status: i32,
        pub drop_s: bool,
    }

    impl ScriptedBackend {
        pub(crate) fn ok() -> Self {
            Self { calls: AtomicUsize::new(0), status: 0, drop_s: false }
        }

        pub(crate) fn failing(status: i32) -> Self {
            Self { calls: AtomicUsize::new(0), status, drop_s: false }
        }
    }

    impl BackendSvds for ScriptedBackend {
        fn svds_into(&self, matrix: Array2<f64>, k: usize) -> SvdsOutput {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (rows, cols) = matrix.dim();
            SvdsOutput {
                u: Some(Array2::from_elem((rows, k), 1.0)),
                s: if self.drop_s { None } else { Some(Array2::eye(k)) },
                v: Some(Array2::from_elem((cols, k), 2.0)),
                status: self.status,
            }
        }

        fn name(&self) -> &'static str {
            "scripted"
        }
    }

    fn matrix_2x3() -> DenseMatrix {
        DenseMatrix::from_array(array![[1.0, 0.0, 2.0], [0.0, 3.0, 0.0]])
    }

    #[test]
    fn test_check_rank_bounds() {
        assert!(check_rank(2, 3, 1).is_ok());
        assert!(check_rank(2, 3, 2).is_ok());
        assert_eq!(
            check_rank(2, 3, 0),
            Err(FactorizationFailure::InvalidRank { k: 0, rows: 2, cols: 3 })
        );
        assert!(check_rank(2, 3, 3).is_err());
        assert!(check_rank(0, 0, 1).is_err());
    }

    #[test]
    fn test_invalid_rank_never_reaches_backend() {
        let driver = FactorizationDriver::new(ScriptedBackend::ok());
        for k in [0, 3, 100] {
            match driver.factorize(matrix_2x3(), k) {
                Err(PipelineError::Factorization(FactorizationFailure::InvalidRank { .. })) => {}
                other => panic!("expected invalid rank for K={}, got {:?}", k, other.map(|f| f.release())),
            }
        }
        assert_eq!(driver.backend().calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_nonzero_status_discards_outputs() {
        let driver = FactorizationDriver::new(ScriptedBackend::failing(7));
        match driver.factorize(matrix_2x3(), 2) {
            Err(PipelineError::Factorization(FactorizationFailure::Status(7))) => {}
            other => panic!("expected status failure, got {:?}", other.map(|f| f.release())),
        }
        assert_eq!(driver.backend().calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_success_transfers_ownership_until_release() {
        let driver = FactorizationDriver::new(ScriptedBackend::ok());
        let factorization = driver.factorize(matrix_2x3(), 2).unwrap();
        assert_eq!(factorization.k(), 2);
        assert_eq!(factorization.factors().u().unwrap().dim(), (2, 2));
        assert_eq!(factorization.factors().s().unwrap().dim(), (2, 2));
        assert_eq!(factorization.factors().v().unwrap().dim(), (3, 2));
        let released = factorization.release();
        assert_eq!(released, (4 + 4 + 6) * 8);
    }

    #[test]
    fn test_missing_factor_on_success_is_kept_absent() {
        let backend = ScriptedBackend { drop_s: true, ..ScriptedBackend::ok() };
        let driver = FactorizationDriver::new(backend);
        let factorization = driver.factorize(matrix_2x3(), 1).unwrap();
        assert!(factorization.factors().s().is_none());
        assert_eq!(factorization.release(), (2 + 3) * 8);
    }
}
