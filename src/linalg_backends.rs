// src/linalg_backends.rs

use crate::error::ThreadSafeStdError;
use log::warn;
use ndarray::{s, Array2, ArrayView1, ArrayView2};

// --- Trait Definitions ---

/// Status reported by a backend that produced all three factors.
pub const SVDS_STATUS_OK: i32 = 0;
/// Status reported when the numerical library itself failed.
pub const SVDS_STATUS_LIBRARY_ERROR: i32 = 1;
/// Status reported when the library returned fewer outputs than requested.
pub const SVDS_STATUS_INCOMPLETE: i32 = 2;

/// Output of a rank-K truncated SVD call.
///
/// Any factor may be missing. A nonzero `status` means the call failed and the
/// factors, present or not, must not be used.
#[derive(Debug, Default)]
pub struct SvdsOutput {
    /// Left singular vectors, shape `(rows, K)`.
    pub u: Option<Array2<f64>>,
    /// Singular values on the diagonal of a `(K, K)` matrix, descending.
    pub s: Option<Array2<f64>>,
    /// Right singular vectors, shape `(cols, K)`.
    pub v: Option<Array2<f64>>,
    pub status: i32,
}

impl SvdsOutput {
    /// An output with no factors and the given status.
    pub fn failed(status: i32) -> Self {
        Self { u: None, s: None, v: None, status }
    }
}

/// A truncated singular value decomposition capability.
///
/// The matrix is moved into the call and released when it returns. The call
/// blocks until the factorization is complete; any internal parallelism uses
/// the rayon pool the caller is running in. `k` has already been validated
/// by the caller to lie in `1..=min(rows, cols)`.
pub trait BackendSvds: Send + Sync {
    fn svds_into(&self, matrix: Array2<f64>, k: usize) -> SvdsOutput;

    /// Short name for log messages.
    fn name(&self) -> &'static str;
}

/// Keeps the leading `k` singular triplets of a thin SVD.
///
/// `u` is `(rows, r)`, `singular_values` has length `r` in descending order and
/// `v` is `(cols, r)`, with `r >= k`.
pub(crate) fn truncate_thin_svd(
    u: ArrayView2<'_, f64>,
    singular_values: ArrayView1<'_, f64>,
    v: ArrayView2<'_, f64>,
    k: usize,
) -> Result<SvdsOutput, ThreadSafeStdError> {
    let available = singular_values.len().min(u.ncols()).min(v.ncols());
    if available < k {
        return Err(format!(
            "thin SVD produced {} singular triplets, {} requested",
            available, k
        )
        .into());
    }
    Ok(SvdsOutput {
        u: Some(u.slice(s![.., ..k]).as_standard_layout().into_owned()),
        s: Some(Array2::from_diag(&singular_values.slice(s![..k]))),
        v: Some(v.slice(s![.., ..k]).as_standard_layout().into_owned()),
        status: SVDS_STATUS_OK,
    })
}

fn status_from_error(backend: &str, e: ThreadSafeStdError) -> SvdsOutput {
    warn!("{} truncated SVD failed: {}", backend, e);
    SvdsOutput::failed(SVDS_STATUS_LIBRARY_ERROR)
}

// --- FaerLinAlgBackend Implementation ---
#[cfg(feature = "backend_faer")]
mod faer_specific_code {
    use super::{status_from_error, truncate_thin_svd, BackendSvds, SvdsOutput};
    use crate::error::ThreadSafeStdError;
    use faer::linalg::solvers::Svd as FaerSolverSvd;
    use faer::{MatRef, Par};
    use log::trace;
    use ndarray::{Array1, Array2};

    #[derive(Debug, Default, Copy, Clone)]
    pub struct FaerLinAlgBackend;

    /// Matches faer's parallelism to the rayon pool the call runs in.
    fn parallelism_for_current_pool() -> Par {
        match rayon::current_num_threads() {
            0 | 1 => Par::Seq,
            n => Par::rayon(n),
        }
    }

    /// Sets faer's global parallelism for one call and puts the previous
    /// setting back when dropped, on every exit path.
    struct ScopedParallelism {
        previous: Par,
    }

    impl ScopedParallelism {
        fn set(par: Par) -> Self {
            let previous = faer::get_global_parallelism();
            faer::set_global_parallelism(par);
            Self { previous }
        }
    }

    impl Drop for ScopedParallelism {
        fn drop(&mut self) {
            faer::set_global_parallelism(self.previous);
        }
    }

    fn thin_svd(matrix: &Array2<f64>, k: usize) -> Result<SvdsOutput, ThreadSafeStdError> {
        let (nrows, ncols) = matrix.dim();
        let slice = matrix.as_slice().ok_or_else(|| {
            format!("input matrix ({}x{}) is not in row-major layout", nrows, ncols)
        })?;
        let faer_mat_view = MatRef::from_row_major_slice(slice, nrows, ncols);

        let par = parallelism_for_current_pool();
        trace!("faer SVD of {}x{} matrix with {:?}", nrows, ncols, par);
        let _parallelism = ScopedParallelism::set(par);

        let svd_solver_instance = FaerSolverSvd::new_thin(faer_mat_view)
            .map_err(|e| format!("faer SVD computation failed: {:?}", e))?;

        let u_faer = svd_solver_instance.U();
        let v_faer = svd_solver_instance.V();
        let s_faer = svd_solver_instance.S().column_vector();

        let u = Array2::from_shape_fn((u_faer.nrows(), u_faer.ncols()), |(i, j)| u_faer[(i, j)]);
        let v = Array2::from_shape_fn((v_faer.nrows(), v_faer.ncols()), |(i, j)| v_faer[(i, j)]);
        let s = Array1::from_shape_fn(s_faer.nrows(), |i| s_faer[i]);

        truncate_thin_svd(u.view(), s.view(), v.view(), k)
    }

    impl BackendSvds for FaerLinAlgBackend {
        fn svds_into(&self, matrix: Array2<f64>, k: usize) -> SvdsOutput {
            let output = thin_svd(&matrix, k);
            drop(matrix);
            output.unwrap_or_else(|e| status_from_error(self.name(), e))
        }

        fn name(&self) -> &'static str {
            "faer"
        }
    }
} // End of faer_specific_code module

// --- NdarrayLinAlgBackend Implementation ---
#[cfg(feature = "backend_lapack")]
mod lapack_specific_code {
    use super::{status_from_error, truncate_thin_svd, BackendSvds, SvdsOutput, SVDS_STATUS_INCOMPLETE};
    use log::warn;
    use ndarray::Array2;
    use ndarray_linalg::{JobSvd, SVDDCInto};

    /// LAPACK divide-and-conquer SVD through ndarray-linalg.
    #[derive(Debug, Default, Copy, Clone)]
    pub struct NdarrayLinAlgBackend;

    impl BackendSvds for NdarrayLinAlgBackend {
        fn svds_into(&self, matrix: Array2<f64>, k: usize) -> SvdsOutput {
            // LAPACK overwrites its input, so the buffer is consumed here.
            match matrix.svddc_into(JobSvd::Some) {
                Ok((Some(u), s, Some(vt))) => {
                    truncate_thin_svd(u.view(), s.view(), vt.t(), k)
                        .unwrap_or_else(|e| status_from_error(self.name(), e))
                }
                Ok(_) => {
                    warn!("LAPACK SVD returned without singular vectors.");
                    SvdsOutput::failed(SVDS_STATUS_INCOMPLETE)
                }
                Err(e) => status_from_error(self.name(), Box::new(e)),
            }
        }

        fn name(&self) -> &'static str {
            "lapack"
        }
    }
} // End of lapack_specific_code module

#[cfg(feature = "backend_faer")]
pub use faer_specific_code::FaerLinAlgBackend;
#[cfg(feature = "backend_lapack")]
pub use lapack_specific_code::NdarrayLinAlgBackend;

#[cfg(not(any(feature = "backend_faer", feature = "backend_lapack")))]
compile_error!("enable a linear algebra backend: `backend_faer` or one of the `backend_lapack` features");

// --- LinAlgBackendProvider Dispatch ---

/// Dispatches to the linear algebra backend selected by feature flags.
/// faer is used when enabled, LAPACK otherwise.
#[derive(Debug, Default, Copy, Clone)]
pub struct LinAlgBackendProvider;

impl LinAlgBackendProvider {
    pub fn new() -> Self {
        Self
    }
}

impl BackendSvds for LinAlgBackendProvider {
    fn svds_into(&self, matrix: Array2<f64>, k: usize) -> SvdsOutput {
        #[cfg(feature = "backend_faer")]
        {
            FaerLinAlgBackend.svds_into(matrix, k)
        }
        #[cfg(all(not(feature = "backend_faer"), feature = "backend_lapack"))]
        {
            NdarrayLinAlgBackend.svds_into(matrix, k)
        }
    }

    fn name(&self) -> &'static str {
        #[cfg(feature = "backend_faer")]
        {
            FaerLinAlgBackend.name()
        }
        #[cfg(all(not(feature = "backend_faer"), feature = "backend_lapack"))]
        {
            NdarrayLinAlgBackend.name()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1};

    fn reconstruct(output: &SvdsOutput) -> Array2<f64> {
        let u = output.u.as_ref().unwrap();
        let s = output.s.as_ref().unwrap();
        let v = output.v.as_ref().unwrap();
        u.dot(s).dot(&v.t())
    }

    #[test]
    fn test_truncate_keeps_leading_triplets() {
        let u = array![[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
        let s = Array1::from(vec![3.0, 2.0, 1.0]);
        let v = array![[0.0, 1.0, 0.0], [1.0, 0.0, 0.0], [0.0, 0.0, 1.0]];
        let out = truncate_thin_svd(u.view(), s.view(), v.view(), 2).unwrap();
        assert_eq!(out.status, SVDS_STATUS_OK);
        assert_eq!(out.u.as_ref().unwrap().dim(), (3, 2));
        assert_eq!(out.s.as_ref().unwrap(), &array![[3.0, 0.0], [0.0, 2.0]]);
        assert_eq!(out.v.as_ref().unwrap().dim(), (3, 2));
        assert!(out.v.as_ref().unwrap().is_standard_layout());
    }

    #[test]
    fn test_truncate_rejects_rank_above_available() {
        let u = Array2::<f64>::eye(2);
        let s = Array1::from(vec![1.0, 0.5]);
        assert!(truncate_thin_svd(u.view(), s.view(), u.view(), 3).is_err());
    }

    #[test]
    fn test_provider_recovers_rank_one_matrix() {
        // Outer product of (1, 2, 3) and (4, 5): exactly rank one.
        let a = array![[4.0, 5.0], [8.0, 10.0], [12.0, 15.0]];
        let output = LinAlgBackendProvider::new().svds_into(a.clone(), 1);
        assert_eq!(output.status, SVDS_STATUS_OK);
        assert_eq!(output.u.as_ref().unwrap().dim(), (3, 1));
        assert_eq!(output.s.as_ref().unwrap().dim(), (1, 1));
        assert_eq!(output.v.as_ref().unwrap().dim(), (2, 1));
        let expected_sigma = (14.0f64 * 41.0).sqrt();
        assert_abs_diff_eq!(output.s.as_ref().unwrap()[[0, 0]], expected_sigma, epsilon = 1e-9);
        let rebuilt = reconstruct(&output);
        for (x, y) in rebuilt.iter().zip(a.iter()) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_provider_singular_values_descend_and_vectors_are_orthonormal() {
        let a = array![
            [3.0, 1.0, 0.0, 2.0],
            [1.0, 4.0, 1.0, 0.0],
            [0.0, 1.0, 5.0, 1.0],
            [2.0, 0.0, 1.0, 6.0],
            [1.0, 1.0, 1.0, 1.0]
        ];
        let output = LinAlgBackendProvider::new().svds_into(a, 3);
        assert_eq!(output.status, SVDS_STATUS_OK);
        let s = output.s.as_ref().unwrap();
        assert!(s[[0, 0]] >= s[[1, 1]] && s[[1, 1]] >= s[[2, 2]]);
        for factor in [output.u.as_ref().unwrap(), output.v.as_ref().unwrap()] {
            let gram = factor.t().dot(factor);
            for i in 0..3 {
                for j in 0..3 {
                    let expected = if i == j { 1.0 } else { 0.0 };
                    assert_abs_diff_eq!(gram[[i, j]], expected, epsilon = 1e-9);
                }
            }
        }
    }
}
