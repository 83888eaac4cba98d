use ndarray::ArrayView1;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Running per-feature statistics, with supporting max, min, mean, sum of squares, var and std.
///
/// The first update fixes the feature count; later updates must match it.
#[derive(Debug, Clone, Default)]
pub struct StreamStatistic {
    num_items: usize,
    max: Vec<f64>,
    min: Vec<f64>,
    mean: Vec<f64>,
    sum_squares: Vec<f64>,
}

impl StreamStatistic {
    pub fn new() -> Self {
        Self::default()
    }

    /// Update with a new data point
    ///
    /// # Arguments
    /// * `x` - One row of features
    pub fn update(&mut self, x: ArrayView1<'_, f64>) -> Result<(), ModelError> {
        if let Some(index) = x.iter().position(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite { index });
        }

        if self.num_items == 0 {
            let dim = x.len();
            self.max = vec![f64::NEG_INFINITY; dim];
            self.min = vec![f64::INFINITY; dim];
            self.mean = vec![0.0; dim];
            self.sum_squares = vec![0.0; dim];
        } else if x.len() != self.mean.len() {
            return Err(ModelError::DimensionMismatch {
                expected: self.mean.len(),
                found: x.len(),
            });
        }

        self.num_items += 1;
        let n = self.num_items as f64;

        for (index, &item) in x.iter().enumerate() {
            if self.max[index] < item {
                self.max[index] = item;
            }
            if self.min[index] > item {
                self.min[index] = item;
            }

            // Welford: incremental mean, no running sum
            let delta = item - self.mean[index];
            self.mean[index] += delta / n;
            self.sum_squares[index] += delta * (item - self.mean[index]);
        }
        Ok(())
    }

    /// Get the total number of items processed
    pub fn get_count(&self) -> usize {
        self.num_items
    }

    pub fn get_max(&self) -> Vec<f64> {
        self.max.clone()
    }

    pub fn get_min(&self) -> Vec<f64> {
        self.min.clone()
    }

    pub fn get_mean(&self) -> Vec<f64> {
        self.mean.clone()
    }

    /// Population variance (divides by the item count).
    pub fn get_var(&self) -> Vec<f64> {
        if self.num_items == 0 {
            return Vec::new();
        }
        let n = self.num_items as f64;
        self.sum_squares.iter().map(|s| s / n).collect()
    }

    /// Population standard deviation.
    pub fn get_std(&self) -> Vec<f64> {
        self.get_var().into_iter().map(f64::sqrt).collect()
    }
}

/// Descriptive statistics of a single vector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

impl Summary {
    /// Summarize `values` as a univariate stream. `None` when empty or non-finite.
    pub fn of(values: &[f64]) -> Option<Self> {
        let mut stat = StreamStatistic::new();
        for value in values {
            stat.update(ArrayView1::from(std::slice::from_ref(value))).ok()?;
        }
        if stat.get_count() == 0 {
            return None;
        }
        Some(Summary {
            mean: stat.get_mean()[0],
            std: stat.get_std()[0],
            min: stat.get_min()[0],
            max: stat.get_max()[0],
        })
    }
}
