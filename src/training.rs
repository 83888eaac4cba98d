//! Offline training: fit the scaler and outlier model, evaluate, persist, smoke-test.

use std::f64::consts::PI;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ndarray::Array2;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{ModelError, TrainingError};
use crate::handler::{ModelState, PredictionHandler};
use crate::models::base_model::OutlierModel;
use crate::models::iforest::{ClassifierInput, IsolationForest, IsolationForestParams};
use crate::models::scaler::StandardScaler;
use crate::store::{ModelStore, MODEL_ARTIFACT, SCALER_ARTIFACT};
use crate::utils::evaluation::{evaluate, DetectionReport};

/// Training run configuration.
#[derive(Debug, Clone)]
pub struct TrainingConfig {
    /// JSON matrix to train on; synthetic data when `None`
    pub data: Option<PathBuf>,
    /// Normal rows in the synthetic set
    pub n_samples: usize,
    /// Columns in the synthetic set
    pub n_features: usize,
    /// Uniform outliers added, as a share of `n_samples`
    pub outlier_fraction: f64,
    /// Seed for synthetic data
    pub seed: u64,
    pub forest: IsolationForestParams,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig {
            data: None,
            n_samples: 1000,
            n_features: 4,
            outlier_fraction: 0.1,
            seed: 42,
            forest: IsolationForestParams::default(),
        }
    }
}

/// Training matrix with optional ground truth (`true` = injected outlier).
#[derive(Debug, Clone)]
pub struct TrainingData {
    pub xs: Array2<f64>,
    pub labels: Option<Vec<bool>>,
}

/// Summary of a training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingReport {
    pub n_samples: usize,
    pub n_features: usize,
    pub classifier_input: ClassifierInput,
    /// Expected outlier share the offset was derived from
    pub contamination: f64,
    pub offset: f64,
    pub detection: Option<DetectionReport>,
    /// Vector `[1, 2, ..., n_features]` run through the reloaded handler
    pub smoke_test: Vec<f64>,
    pub smoke_test_is_anomaly: bool,
}

// Box-Muller
fn standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = rng.gen();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}

/// Normal cluster N(5, 2^2) plus uniform outliers on [-10, 20).
pub fn synthetic(
    n_samples: usize,
    n_features: usize,
    outlier_fraction: f64,
    seed: u64,
) -> TrainingData {
    let mut rng = StdRng::seed_from_u64(seed);
    let n_outliers = (n_samples as f64 * outlier_fraction) as usize;

    // Row-major fill: the normal rows come first, then the outliers.
    let xs = Array2::from_shape_fn((n_samples + n_outliers, n_features), |(row, _)| {
        if row < n_samples {
            standard_normal(&mut rng) * 2.0 + 5.0
        } else {
            rng.gen_range(-10.0..20.0)
        }
    });
    let mut labels = vec![false; n_samples];
    labels.extend(std::iter::repeat(true).take(n_outliers));

    TrainingData {
        xs,
        labels: Some(labels),
    }
}

/// Read a JSON array of equal-length numeric rows.
pub fn load_matrix(path: &Path) -> Result<Array2<f64>, TrainingError> {
    let bytes = fs::read(path).map_err(|source| TrainingError::DataIo {
        path: path.to_path_buf(),
        source,
    })?;
    let rows: Vec<Vec<f64>> =
        serde_json::from_slice(&bytes).map_err(|source| TrainingError::DataFormat {
            path: path.to_path_buf(),
            source,
        })?;

    let n_rows = rows.len();
    let n_cols = rows.first().map_or(0, Vec::len);
    if n_rows == 0 || n_cols == 0 {
        return Err(ModelError::EmptyData.into());
    }
    if let Some(bad) = rows.iter().position(|r| r.len() != n_cols) {
        return Err(ModelError::Shape(format!(
            "row {bad} has {} values, expected {n_cols}",
            rows[bad].len()
        ))
        .into());
    }

    let flat: Vec<f64> = rows.into_iter().flatten().collect();
    Array2::from_shape_vec((n_rows, n_cols), flat)
        .map_err(|e| ModelError::Shape(e.to_string()).into())
}

/// Fit, evaluate and persist the scaler and outlier model, then reload them
/// through the handler and run the smoke-test vector.
pub fn train<S: ModelStore>(
    config: &TrainingConfig,
    store: &S,
) -> Result<TrainingReport, TrainingError> {
    let data = match &config.data {
        Some(path) => TrainingData {
            xs: load_matrix(path)?,
            labels: None,
        },
        None => synthetic(
            config.n_samples,
            config.n_features,
            config.outlier_fraction,
            config.seed,
        ),
    };
    let (n_samples, n_features) = data.xs.dim();
    info!(n_samples, n_features, "training data ready");

    let scaler = StandardScaler::fit(data.xs.view())?;
    info!("fitted standard scaler");

    let input = config.forest.input;
    let forest = match input {
        ClassifierInput::Raw => IsolationForest::fit(data.xs.view(), &config.forest)?,
        ClassifierInput::Scaled => {
            let scaled = scaler.transform(data.xs.view())?;
            IsolationForest::fit(scaled.view(), &config.forest)?
        }
    };
    info!(
        n_estimators = forest.n_estimators(),
        sample_size = forest.sample_size(),
        offset = forest.offset(),
        %input,
        "fitted isolation forest"
    );

    let detection = match &data.labels {
        Some(truth) => {
            let model_xs = match input {
                ClassifierInput::Raw => data.xs.clone(),
                ClassifierInput::Scaled => scaler.transform(data.xs.view())?,
            };
            let predicted = forest.predict(model_xs.view())?;
            let abnormality: Vec<f64> = forest
                .score(model_xs.view())?
                .into_iter()
                .map(|s| -s)
                .collect();
            let report = evaluate(truth, &predicted, &abnormality);
            info!(
                precision = report.precision,
                recall = report.recall,
                f1 = report.f1,
                auroc = report.auroc,
                anomaly_rate = report.anomaly_rate,
                "detection quality on training data"
            );
            Some(report)
        }
        None => None,
    };

    store.save(SCALER_ARTIFACT, &scaler)?;
    store.save(MODEL_ARTIFACT, &forest)?;

    // Reload exactly as the handler does at startup.
    let state = ModelState::load(store, input)?;
    let handler = PredictionHandler::new(Arc::new(state));
    let smoke_test: Vec<f64> = (1..=n_features).map(|i| i as f64).collect();
    let body = handler.predict(&smoke_test).map_err(|e| {
        warn!(error = %e, "smoke test failed");
        TrainingError::SmokeTest(e)
    })?;
    let result = if body.prediction.is_anomaly { "Anomaly" } else { "Normal" };
    info!(features = ?smoke_test, result, "smoke test prediction");

    Ok(TrainingReport {
        n_samples,
        n_features,
        classifier_input: input,
        contamination: forest.contamination(),
        offset: forest.offset(),
        detection,
        smoke_test,
        smoke_test_is_anomaly: body.prediction.is_anomaly,
    })
}
