//! Command-line and environment configuration.

use std::path::PathBuf;

use clap::Args;

use crate::models::iforest::{ClassifierInput, IsolationForestParams};
use crate::store::FileModelStore;
use crate::training::TrainingConfig;

/// Default artifact directory.
pub const DEFAULT_MODEL_DIR: &str = "models";

/// Settings shared by every command that loads model state.
#[derive(Debug, Clone, Args)]
pub struct HandlerConfig {
    /// Directory holding scaler.json and model.json
    #[arg(long, env = "MODEL_DIR", default_value = DEFAULT_MODEL_DIR)]
    pub model_dir: PathBuf,

    /// Feed the outlier model raw or scaled features
    #[arg(long, env = "CLASSIFIER_INPUT", default_value_t = ClassifierInput::Raw)]
    pub classifier_input: ClassifierInput,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        HandlerConfig {
            model_dir: PathBuf::from(DEFAULT_MODEL_DIR),
            classifier_input: ClassifierInput::Raw,
        }
    }
}

impl HandlerConfig {
    pub fn store(&self) -> FileModelStore {
        FileModelStore::new(&self.model_dir)
    }
}

/// Offline training options.
#[derive(Debug, Clone, Args)]
pub struct TrainArgs {
    #[command(flatten)]
    pub handler: HandlerConfig,

    /// JSON array of numeric rows to train on instead of synthetic data
    #[arg(long)]
    pub data: Option<PathBuf>,

    /// Normal samples in the synthetic set
    #[arg(long, default_value_t = 1000)]
    pub samples: usize,

    /// Features per synthetic sample
    #[arg(long, default_value_t = 4)]
    pub features: usize,

    /// Uniform outliers added to the synthetic set, as a share of --samples
    #[arg(long, default_value_t = 0.1)]
    pub outlier_fraction: f64,

    /// Number of isolation trees
    #[arg(long, default_value_t = 100)]
    pub estimators: usize,

    /// Rows drawn per tree (default: min(256, rows))
    #[arg(long)]
    pub max_samples: Option<usize>,

    /// Expected share of outliers, sets the decision threshold
    #[arg(long, default_value_t = 0.1)]
    pub contamination: f64,

    /// Seed for data generation and tree building
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Worker threads for tree building (default: CPU count)
    #[arg(long)]
    pub jobs: Option<usize>,
}

impl TrainArgs {
    pub fn to_training_config(&self) -> TrainingConfig {
        TrainingConfig {
            data: self.data.clone(),
            n_samples: self.samples,
            n_features: self.features,
            outlier_fraction: self.outlier_fraction,
            seed: self.seed,
            forest: IsolationForestParams {
                n_estimators: self.estimators,
                max_samples: self.max_samples,
                contamination: self.contamination,
                random_state: self.seed,
                n_jobs: Some(self.jobs.unwrap_or_else(num_cpus::get)),
                input: self.handler.classifier_input,
            },
        }
    }
}
