// src/context.rs

use std::path::{Path, PathBuf};

/// Output file used when no path is configured.
pub const DEFAULT_OUTPUT_PATH: &str = "svd_results.dat";
/// Run log used when no path is configured.
pub const DEFAULT_LOG_PATH: &str = "svd.log";

/// Everything one pipeline run needs to know: where the ratings come from,
/// the declared matrix shape, the target rank and where results and the run log go.
///
/// Built once per run and only read afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionContext {
    csv_path: PathBuf,
    rows: usize,
    cols: usize,
    k: usize,
    output_path: PathBuf,
    log_path: PathBuf,
    index_base: i64,
}

impl ExecutionContext {
    /// Creates a context with the default output and log paths and 0-based indices.
    ///
    /// # Examples
    ///
    /// ```
    /// use rating_svd::ExecutionContext;
    /// let ctx = ExecutionContext::new("ratings.csv", 480_189, 17_770, 50);
    /// assert_eq!(ctx.k(), 50);
    /// assert_eq!(ctx.output_path().to_str(), Some("svd_results.dat"));
    /// ```
    pub fn new<P: Into<PathBuf>>(csv_path: P, rows: usize, cols: usize, k: usize) -> Self {
        Self {
            csv_path: csv_path.into(),
            rows,
            cols,
            k,
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            log_path: PathBuf::from(DEFAULT_LOG_PATH),
            index_base: 0,
        }
    }

    pub fn with_output_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.output_path = path.into();
        self
    }

    pub fn with_log_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.log_path = path.into();
        self
    }

    /// Sets the index of the first user/item in the CSV (0 or 1 in practice).
    pub fn with_index_base(mut self, base: i64) -> Self {
        self.index_base = base;
        self
    }

    pub fn csv_path(&self) -> &Path {
        &self.csv_path
    }

    pub fn rows(&self) -> usize {
        self.rows
    }

    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Target rank K of the truncated SVD.
    pub fn k(&self) -> usize {
        self.k
    }

    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    pub fn index_base(&self) -> i64 {
        self.index_base
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides_defaults() {
        let ctx = ExecutionContext::new("in.csv", 3, 4, 2)
            .with_output_path("/tmp/out.dat")
            .with_log_path("/tmp/run.log")
            .with_index_base(1);
        assert_eq!(ctx.csv_path(), Path::new("in.csv"));
        assert_eq!((ctx.rows(), ctx.cols(), ctx.k()), (3, 4, 2));
        assert_eq!(ctx.output_path(), Path::new("/tmp/out.dat"));
        assert_eq!(ctx.log_path(), Path::new("/tmp/run.log"));
        assert_eq!(ctx.index_base(), 1);
    }

    #[test]
    fn test_defaults() {
        let ctx = ExecutionContext::new("in.csv", 1, 1, 1);
        assert_eq!(ctx.output_path(), Path::new(DEFAULT_OUTPUT_PATH));
        assert_eq!(ctx.log_path(), Path::new(DEFAULT_LOG_PATH));
        assert_eq!(ctx.index_base(), 0);
    }
}
