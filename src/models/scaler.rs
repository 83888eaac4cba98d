// src/models/scaler.rs

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;
use crate::utils::ss::StreamStatistic;

/// Standardize features by removing the mean and scaling to unit variance.
///
/// Fitted once on a training matrix; `transform` never refits. Columns with zero
/// variance keep a scale of 1.0 so they map to 0 instead of dividing by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Vec<f64>,
    scale: Vec<f64>,
    n_samples_seen: usize,
}

impl StandardScaler {
    /// Learn per-feature mean and population standard deviation.
    pub fn fit(xs: ArrayView2<'_, f64>) -> Result<Self, ModelError> {
        if xs.nrows() == 0 || xs.ncols() == 0 {
            return Err(ModelError::EmptyData);
        }

        let mut stat = StreamStatistic::new();
        for row in xs.outer_iter() {
            stat.update(row)?;
        }

        let scale = stat
            .get_std()
            .into_iter()
            .map(|s| if s < 10.0 * f64::EPSILON { 1.0 } else { s })
            .collect();

        Ok(StandardScaler {
            mean: stat.get_mean(),
            scale,
            n_samples_seen: stat.get_count(),
        })
    }

    /// Rebuild a scaler from known statistics.
    pub fn from_parts(mean: Vec<f64>, scale: Vec<f64>) -> Result<Self, ModelError> {
        let scaler = StandardScaler {
            mean,
            scale,
            n_samples_seen: 0,
        };
        scaler.validate()?;
        Ok(scaler)
    }

    /// Check that the statistics can be applied: equal, non-zero lengths, finite
    /// means and finite positive scales. Decoded artifacts must pass this before use.
    pub fn validate(&self) -> Result<(), ModelError> {
        if self.mean.is_empty() {
            return Err(ModelError::EmptyData);
        }
        if self.mean.len() != self.scale.len() {
            return Err(ModelError::DimensionMismatch {
                expected: self.mean.len(),
                found: self.scale.len(),
            });
        }
        if let Some(index) = self.mean.iter().position(|m| !m.is_finite()) {
            return Err(ModelError::NonFinite { index });
        }
        if let Some(index) = self.scale.iter().position(|s| !s.is_finite() || *s <= 0.0) {
            return Err(ModelError::InvalidParameter {
                name: "scale",
                reason: format!("entry {index} must be finite and positive"),
            });
        }
        Ok(())
    }

    /// Mean 0, scale 1 for every feature.
    pub fn identity(n_features: usize) -> Self {
        StandardScaler {
            mean: vec![0.0; n_features],
            scale: vec![1.0; n_features],
            n_samples_seen: 0,
        }
    }

    pub fn n_features(&self) -> usize {
        self.mean.len()
    }

    pub fn mean(&self) -> &[f64] {
        &self.mean
    }

    pub fn scale(&self) -> &[f64] {
        &self.scale
    }

    pub fn n_samples_seen(&self) -> usize {
        self.n_samples_seen
    }

    fn check_width(&self, found: usize) -> Result<(), ModelError> {
        if found != self.n_features() {
            return Err(ModelError::DimensionMismatch {
                expected: self.n_features(),
                found,
            });
        }
        Ok(())
    }

    /// Scale a single row.
    pub fn transform_row(&self, x: ArrayView1<'_, f64>) -> Result<Array1<f64>, ModelError> {
        self.check_width(x.len())?;
        let mean = ArrayView1::from(&self.mean[..]);
        let scale = ArrayView1::from(&self.scale[..]);
        Ok((&x - &mean) / &scale)
    }

    /// Scale every row of a matrix.
    pub fn transform(&self, xs: ArrayView2<'_, f64>) -> Result<Array2<f64>, ModelError> {
        self.check_width(xs.ncols())?;
        let mean = ArrayView1::from(&self.mean[..]);
        let scale = ArrayView1::from(&self.scale[..]);
        Ok((&xs - &mean) / &scale)
    }
}
