// src/matrix.rs

use crate::error::PipelineError;
use crate::ingest::RatingTriple;
use log::{debug, warn};
use ndarray::{Array2, ArrayView2};
use sysinfo::System;

/// A dense, row-major `rows x cols` matrix of `f64`.
///
/// The backing buffer is always in standard (C) layout, so entry `(u, m)` sits
/// at offset `u * cols + m` of [`DenseMatrix::as_slice`].
#[derive(Clone, Debug, PartialEq)]
pub struct DenseMatrix {
    data: Array2<f64>,
}

impl DenseMatrix {
    /// Allocates a zero-filled `rows x cols` matrix.
    ///
    /// The allocation is requested fallibly: an element count that overflows or
    /// a buffer the allocator cannot provide is reported instead of aborting the
    /// process. A request above the currently available physical memory is
    /// logged as a warning and still attempted.
    ///
    /// # Errors
    /// Returns [`PipelineError::Allocation`].
    pub fn zeros(rows: usize, cols: usize) -> Result<Self, PipelineError> {
        let allocation_error = |reason: String| PipelineError::Allocation { rows, cols, reason };

        let len = rows
            .checked_mul(cols)
            .ok_or_else(|| allocation_error("element count overflows usize".to_string()))?;
        let bytes = len
            .checked_mul(std::mem::size_of::<f64>())
            .ok_or_else(|| allocation_error("byte count overflows usize".to_string()))?;

        warn_if_exceeds_available_memory(bytes);

        let mut buffer: Vec<f64> = Vec::new();
        buffer
            .try_reserve_exact(len)
            .map_err(|e| allocation_error(format!("{} bytes requested: {}", bytes, e)))?;
        buffer.resize(len, 0.0);

        let data = Array2::from_shape_vec((rows, cols), buffer)
            .map_err(|e| allocation_error(e.to_string()))?;
        debug!("Allocated {}x{} dense matrix ({} bytes).", rows, cols, bytes);
        Ok(Self { data })
    }

    /// Wraps an existing array, copying it into standard layout if needed.
    pub fn from_array(array: Array2<f64>) -> Self {
        let data = if array.is_standard_layout() {
            array
        } else {
            array.as_standard_layout().into_owned()
        };
        Self { data }
    }

    pub fn rows(&self) -> usize {
        self.data.nrows()
    }

    pub fn cols(&self) -> usize {
        self.data.ncols()
    }

    /// Entry at `(row, col)`, or `None` when out of bounds.
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.data.get((row, col)).copied()
    }

    pub fn view(&self) -> ArrayView2<'_, f64> {
        self.data.view()
    }

    /// The row-major buffer, `rows * cols` long.
    pub fn as_slice(&self) -> &[f64] {
        // Standard layout is an invariant of every constructor.
        self.data.as_slice().unwrap_or_default()
    }

    /// Size of the buffer in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len() * std::mem::size_of::<f64>()
    }

    /// Gives up the buffer, for handing to a factorization backend.
    pub fn into_array(self) -> Array2<f64> {
        self.data
    }
}

fn warn_if_exceeds_available_memory(bytes: usize) {
    let mut system = System::new();
    system.refresh_memory();
    let available = system.available_memory();
    if available > 0 && bytes as u64 > available {
        warn!(
            "Dense matrix needs {} bytes but only {} bytes are currently available.",
            bytes, available
        );
    }
}

/// Counters collected while applying triples.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BuildStats {
    /// Triples written into the matrix, overwrites included.
    pub applied: u64,
    /// Triples whose indices fell outside the declared shape.
    pub dropped: u64,
}

/// Fills a zero-initialized [`DenseMatrix`] from a stream of rating triples.
///
/// Indices outside the declared shape are expected (the input may cover a
/// superset of ids) and are dropped without error. A later triple for the same
/// cell overwrites an earlier one.
pub struct DenseMatrixBuilder {
    matrix: Array2<f64>,
    index_base: i64,
    stats: BuildStats,
}

impl DenseMatrixBuilder {
    /// # Errors
    /// Returns [`PipelineError::Allocation`] if the buffer cannot be allocated.
    pub fn new(rows: usize, cols: usize) -> Result<Self, PipelineError> {
        Ok(Self {
            matrix: DenseMatrix::zeros(rows, cols)?.into_array(),
            index_base: 0,
            stats: BuildStats::default(),
        })
    }

    /// Treats `base` as the first user/item index, e.g. 1 for 1-indexed exports.
    pub fn with_index_base(mut self, base: i64) -> Self {
        self.index_base = base;
        self
    }

    /// Applies one triple.
    pub fn accept(&mut self, triple: RatingTriple) {
        match self.position(triple.user, triple.item) {
            Some((row, col)) => {
                self.matrix[[row, col]] = triple.rating;
                self.stats.applied += 1;
            }
            None => self.stats.dropped += 1,
        }
    }

    fn position(&self, user: i64, item: i64) -> Option<(usize, usize)> {
        let row = usize::try_from(user.checked_sub(self.index_base)?).ok()?;
        let col = usize::try_from(item.checked_sub(self.index_base)?).ok()?;
        (row < self.matrix.nrows() && col < self.matrix.ncols()).then_some((row, col))
    }

    pub fn stats(&self) -> BuildStats {
        self.stats
    }

    pub fn finish(self) -> (DenseMatrix, BuildStats) {
        (DenseMatrix { data: self.matrix }, self.stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn triple(user: i64, item: i64, rating: f64) -> RatingTriple {
        RatingTriple { user, item, rating }
    }

    #[test]
    fn test_example_ratings_build_expected_matrix() {
        let mut builder = DenseMatrixBuilder::new(2, 2).unwrap();
        for t in [triple(0, 0, 5.0), triple(0, 1, 3.0), triple(1, 0, 4.0)] {
            builder.accept(t);
        }
        let (matrix, stats) = builder.finish();
        assert_eq!(matrix.view(), array![[5.0, 3.0], [4.0, 0.0]].view());
        assert_eq!(stats, BuildStats { applied: 3, dropped: 0 });
    }

    #[test]
    fn test_last_write_wins() {
        let mut builder = DenseMatrixBuilder::new(3, 3).unwrap();
        builder.accept(triple(1, 2, 1.0));
        builder.accept(triple(1, 2, 2.0));
        builder.accept(triple(1, 2, -7.5));
        let (matrix, _) = builder.finish();
        assert_eq!(matrix.get(1, 2), Some(-7.5));
        let nonzero = matrix.as_slice().iter().filter(|v| **v != 0.0).count();
        assert_eq!(nonzero, 1);
    }

    #[test]
    fn test_out_of_bounds_triples_are_dropped() {
        let mut builder = DenseMatrixBuilder::new(2, 3).unwrap();
        for t in [
            triple(2, 0, 1.0),
            triple(0, 3, 1.0),
            triple(-1, 0, 1.0),
            triple(0, -1, 1.0),
            triple(i64::MIN, i64::MAX, 1.0),
        ] {
            builder.accept(t);
        }
        let (matrix, stats) = builder.finish();
        assert!(matrix.as_slice().iter().all(|v| *v == 0.0));
        assert_eq!(stats, BuildStats { applied: 0, dropped: 5 });
    }

    #[test]
    fn test_row_major_offsets() {
        let mut builder = DenseMatrixBuilder::new(2, 3).unwrap();
        builder.accept(triple(1, 2, 9.0));
        builder.accept(triple(0, 1, 4.0));
        let (matrix, _) = builder.finish();
        assert_eq!(matrix.as_slice()[1 * 3 + 2], 9.0);
        assert_eq!(matrix.as_slice()[1], 4.0);
        assert_eq!(matrix.byte_len(), 6 * 8);
    }

    #[test]
    fn test_one_based_indices() {
        let mut builder = DenseMatrixBuilder::new(2, 2).unwrap().with_index_base(1);
        builder.accept(triple(1, 1, 3.0));
        builder.accept(triple(2, 2, 4.0));
        builder.accept(triple(0, 1, 9.0));
        let (matrix, stats) = builder.finish();
        assert_eq!(matrix.view(), array![[3.0, 0.0], [0.0, 4.0]].view());
        assert_eq!(stats.dropped, 1);
    }

    #[test]
    fn test_overflowing_shape_is_allocation_error() {
        match DenseMatrix::zeros(usize::MAX, 2) {
            Err(PipelineError::Allocation { rows, cols, .. }) => {
                assert_eq!((rows, cols), (usize::MAX, 2));
            }
            other => panic!("expected allocation error, got {:?}", other.map(|m| m.rows())),
        }
    }

    #[test]
    fn test_unsatisfiable_request_is_allocation_error() {
        // Fits in usize but not in the address space.
        let rows = (isize::MAX as usize) / 8;
        assert!(matches!(
            DenseMatrix::zeros(rows, 2),
            Err(PipelineError::Allocation { .. })
        ));
    }

    #[test]
    fn test_from_array_normalizes_layout() {
        let transposed = array![[1.0, 2.0], [3.0, 4.0]].reversed_axes();
        let matrix = DenseMatrix::from_array(transposed);
        assert_eq!(matrix.as_slice(), &[1.0, 3.0, 2.0, 4.0]);
    }
}
