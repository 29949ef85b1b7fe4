// src/predict.rs

use crate::error::PipelineError;
use crate::factorize::FactorMatrices;
use crate::ingest::CsvIngestor;
use crate::serialize::load_factors;
use log::info;
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::error::Error;
use std::path::Path;

/// Rating predictor backed by persisted `U`, `S`, `V` factors.
///
/// The predicted rating of user `u` for item `m` is
/// `sum_r U[u, r] * sigma[r] * V[m, r]`, i.e. entry `(u, m)` of `U S V^T`.
#[derive(Debug, Clone)]
pub struct FactorModel {
    u: Array2<f64>,
    sigma: Array1<f64>,
    v: Array2<f64>,
}

/// One recommended item.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScoredItem {
    pub item: usize,
    pub score: f64,
}

/// Error statistics of a model against held-out ratings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Evaluation {
    /// Held-out ratings that fell inside the model's shape.
    pub count: u64,
    /// Held-out ratings outside the model's shape, ignored.
    pub out_of_bounds: u64,
    pub rmse: f64,
    pub mae: f64,
}

impl FactorModel {
    /// Builds a model from factors, checking that all three are present and
    /// agree on K.
    ///
    /// `S` may be stored either as a `K x K` diagonal matrix or as a single row
    /// or column of K singular values.
    ///
    /// # Errors
    /// Returns an error if a factor is missing or the shapes are inconsistent.
    pub fn from_factors(factors: FactorMatrices) -> Result<Self, Box<dyn Error>> {
        let u = factors.u.ok_or("Result file has no U matrix.")?;
        let s = factors.s.ok_or("Result file has no S matrix.")?;
        let v = factors.v.ok_or("Result file has no V matrix.")?;

        let k = u.ncols();
        let sigma = match s.dim() {
            (rows, cols) if rows == k && cols == k => s.diag().to_owned(),
            (1, cols) if cols == k => s.row(0).to_owned(),
            (rows, 1) if rows == k => s.column(0).to_owned(),
            (rows, cols) => {
                return Err(format!("S has shape {}x{}, expected {}x{} or a vector of {}", rows, cols, k, k, k).into())
            }
        };
        if v.ncols() != k {
            return Err(format!("U has {} columns but V has {}; ranks must match.", k, v.ncols()).into());
        }
        Ok(Self { u, sigma, v })
    }

    /// Loads a result file written by the pipeline.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Box<dyn Error>> {
        let factors = load_factors(path.as_ref())?;
        let model = Self::from_factors(factors)?;
        info!(
            "Loaded rank-{} model for {} users and {} items from {:?}.",
            model.rank(),
            model.num_users(),
            model.num_items(),
            path.as_ref()
        );
        Ok(model)
    }

    pub fn rank(&self) -> usize {
        self.sigma.len()
    }

    pub fn num_users(&self) -> usize {
        self.u.nrows()
    }

    pub fn num_items(&self) -> usize {
        self.v.nrows()
    }

    /// Singular values, largest first.
    pub fn singular_values(&self) -> &Array1<f64> {
        &self.sigma
    }

    /// Predicted rating of `user` for `item`; `None` if either is out of range.
    pub fn predict(&self, user: usize, item: usize) -> Option<f64> {
        if user >= self.num_users() || item >= self.num_items() {
            return None;
        }
        let u_row = self.u.row(user);
        let v_row = self.v.row(item);
        Some(
            u_row
                .iter()
                .zip(self.sigma.iter())
                .zip(v_row.iter())
                .map(|((u, s), v)| u * s * v)
                .sum(),
        )
    }

    /// Predicted ratings of `user` for every item.
    pub fn predict_user(&self, user: usize) -> Option<Array1<f64>> {
        if user >= self.num_users() {
            return None;
        }
        let weighted = &self.u.row(user) * &self.sigma;
        Some(self.v.dot(&weighted))
    }

    /// The `n` items with the highest predicted rating for `user`, best first,
    /// skipping the items in `exclude` (typically those the user already rated).
    /// Ties are broken by item index.
    pub fn recommend(&self, user: usize, n: usize, exclude: &[usize]) -> Option<Vec<ScoredItem>> {
        let scores = self.predict_user(user)?;
        let excluded: HashSet<usize> = exclude.iter().copied().collect();
        let mut candidates: Vec<ScoredItem> = scores
            .as_slice()?
            .par_iter()
            .enumerate()
            .filter(|(item, _)| !excluded.contains(item))
            .map(|(item, &score)| ScoredItem { item, score })
            .collect();
        candidates.par_sort_unstable_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then(a.item.cmp(&b.item))
        });
        candidates.truncate(n);
        Some(candidates)
    }

    /// Scores the model against a held-out ratings CSV in the pipeline's input
    /// format. Ratings outside the model's shape are counted and ignored.
    pub fn evaluate<P: AsRef<Path>>(&self, csv_path: P, index_base: i64) -> Result<Evaluation, PipelineError> {
        let mut count = 0u64;
        let mut out_of_bounds = 0u64;
        let mut squared = 0.0f64;
        let mut absolute = 0.0f64;

        CsvIngestor::open(csv_path)?.for_each_triple(|t| {
            let position = t
                .user
                .checked_sub(index_base)
                .zip(t.item.checked_sub(index_base))
                .and_then(|(u, m)| Some((usize::try_from(u).ok()?, usize::try_from(m).ok()?)));
            match position.and_then(|(u, m)| self.predict(u, m)) {
                Some(prediction) => {
                    let error = prediction - t.rating;
                    squared += error * error;
                    absolute += error.abs();
                    count += 1;
                }
                None => out_of_bounds += 1,
            }
        })?;

        let (rmse, mae) = if count == 0 {
            (f64::NAN, f64::NAN)
        } else {
            ((squared / count as f64).sqrt(), absolute / count as f64)
        };
        Ok(Evaluation { count, out_of_bounds, rmse, mae })
    }
}
