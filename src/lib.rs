//! Outlier-detection prediction handler.
//!
//! A request carries one feature vector; the handler scales it with a
//! pre-trained [`StandardScaler`], labels it with a pre-trained
//! [`IsolationForest`], and answers with descriptive statistics, a
//! feature-importance heuristic and the anomaly flag. Model state is trained
//! offline by [`training::train`] and persisted through a [`ModelStore`].

pub mod config;
pub mod error;
pub mod handler;
pub mod logging;
pub mod models;
pub mod store;
pub mod training;
pub mod utils;

pub use error::{ErrorKind, HandlerError, ModelError, StoreError, TrainingError};
pub use handler::{ModelState, Prediction, PredictionBody, PredictionHandler, Response};
pub use models::base_model::{Label, OutlierModel};
pub use models::iforest::{ClassifierInput, IsolationForest, IsolationForestParams};
pub use models::scaler::StandardScaler;
pub use store::{FileModelStore, ModelStore};
pub use utils::evaluation::DetectionReport;
pub use utils::ss::{StreamStatistic, Summary};
