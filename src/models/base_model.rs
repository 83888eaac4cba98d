use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Outcome of classifying one instance; the classifier's `1` / `-1` labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Label {
    Normal,
    Anomaly,
}

impl Label {
    pub fn is_anomaly(self) -> bool {
        self == Label::Anomaly
    }
}

/// A common trait for trained outlier models.
///
/// Models are fitted once and then only read, so every method takes `&self`.
pub trait OutlierModel {
    /// Feature count the model was fitted on.
    fn n_features(&self) -> usize;

    /// Score one instance. Lower is more abnormal.
    fn score_partial(&self, x: ArrayView1<'_, f64>) -> Result<f64, ModelError>;

    /// Signed distance to the decision boundary; negative means outlier.
    fn decision_partial(&self, x: ArrayView1<'_, f64>) -> Result<f64, ModelError>;

    /// Default: label from the decision function.
    fn predict_partial(&self, x: ArrayView1<'_, f64>) -> Result<Label, ModelError> {
        let decision = self.decision_partial(x)?;
        Ok(if decision < 0.0 {
            Label::Anomaly
        } else {
            Label::Normal
        })
    }

    /// Default: score a batch.
    fn score(&self, xs: ArrayView2<'_, f64>) -> Result<Vec<f64>, ModelError> {
        xs.outer_iter().map(|x| self.score_partial(x)).collect()
    }

    /// Default: label a batch.
    fn predict(&self, xs: ArrayView2<'_, f64>) -> Result<Vec<Label>, ModelError> {
        xs.outer_iter().map(|x| self.predict_partial(x)).collect()
    }
}
