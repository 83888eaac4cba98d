//! Predict-request handler.
//!
//! Turns a function-execution event into a `{statusCode, body}` envelope:
//!
//! ```text
//! { "body": "{\"features\": [1.0, 2.0, 3.0, 4.0]}" }
//!   -> 200 {"prediction": {...}, "features": [...], "features_scaled": [...]}
//!   -> 400 {"error": "Invalid input: features must be a non-empty array"}
//!   -> 500 {"error": "Internal server error: <message>"}
//! ```
//!
//! Model state is loaded once, before the first invocation, and shared
//! read-only between invocations through an `Arc`.

use std::io::{self, BufRead, Write};
use std::sync::Arc;
use std::time::Instant;

use ndarray::Array1;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, error, field, info_span, warn};

use crate::error::{ErrorKind, HandlerError, ModelError, StoreError};
use crate::models::base_model::OutlierModel;
use crate::models::iforest::{ClassifierInput, IsolationForest};
use crate::models::scaler::StandardScaler;
use crate::store::{ModelStore, MODEL_ARTIFACT, SCALER_ARTIFACT};
use crate::utils::ss::Summary;

/// Added to the importance denominator so an all-zero vector does not divide by zero.
pub const IMPORTANCE_EPSILON: f64 = 1e-10;

/// Response envelope returned to the execution environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    /// HTTP-style status
    #[serde(rename = "statusCode")]
    pub status_code: u16,
    /// JSON-encoded payload
    pub body: String,
}

/// Derived values for one feature vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    /// Ten times the mean of the scaled features
    pub base_prediction: f64,
    /// `1 / (1 + std(scaled))`, in (0, 1]
    pub confidence: f64,
    /// Normalized absolute magnitude of each raw feature
    pub feature_importance: Vec<f64>,
    /// Outlier model labelled the vector `-1`
    pub is_anomaly: bool,
    /// Descriptive statistics of the raw features
    pub stats: Summary,
}

/// Payload of a 200 response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionBody {
    pub prediction: Prediction,
    pub features: Vec<f64>,
    pub features_scaled: Vec<f64>,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
}

/// Pre-trained scaler and outlier model, immutable once built.
#[derive(Debug, Clone)]
pub struct ModelState {
    scaler: StandardScaler,
    forest: IsolationForest,
}

impl ModelState {
    /// Pair a scaler with a forest fitted on the same feature count.
    pub fn new(scaler: StandardScaler, forest: IsolationForest) -> Result<Self, ModelError> {
        if scaler.n_features() != forest.n_features() {
            return Err(ModelError::DimensionMismatch {
                expected: scaler.n_features(),
                found: forest.n_features(),
            });
        }
        Ok(ModelState { scaler, forest })
    }

    /// Load both artifacts, validate them and check them against the configured
    /// classifier input.
    ///
    /// Fails when either artifact is missing or unusable; nothing is fitted as a fallback.
    pub fn load<S: ModelStore>(
        store: &S,
        classifier_input: ClassifierInput,
    ) -> Result<Self, StoreError> {
        let scaler: StandardScaler = store.load(SCALER_ARTIFACT)?;
        scaler.validate().map_err(|e| incompatible(SCALER_ARTIFACT, e))?;
        let forest: IsolationForest = store.load(MODEL_ARTIFACT)?;
        forest.validate().map_err(|e| incompatible(MODEL_ARTIFACT, e))?;

        if forest.input() != classifier_input {
            return Err(incompatible(
                MODEL_ARTIFACT,
                format!(
                    "model was trained on {} features but the handler is configured for {}",
                    forest.input(),
                    classifier_input
                ),
            ));
        }

        ModelState::new(scaler, forest).map_err(|e| incompatible(MODEL_ARTIFACT, e))
    }

    /// Space the outlier model reads.
    pub fn classifier_input(&self) -> ClassifierInput {
        self.forest.input()
    }

    pub fn n_features(&self) -> usize {
        self.scaler.n_features()
    }
}

/// Request handler. Cheap to clone; every clone shares the same model state.
#[derive(Debug, Clone)]
pub struct PredictionHandler {
    state: Arc<ModelState>,
}

impl PredictionHandler {
    pub fn new(state: Arc<ModelState>) -> Self {
        PredictionHandler { state }
    }

    /// Load model state from `store` once and wrap it in a handler.
    pub fn from_store<S: ModelStore>(
        store: &S,
        classifier_input: ClassifierInput,
    ) -> Result<Self, HandlerError> {
        let state = ModelState::load(store, classifier_input).map_err(|e| {
            let err = HandlerError::from(e);
            error!(kind = err.kind().as_str(), error = %err, "model state unavailable");
            err
        })?;
        Ok(PredictionHandler::new(Arc::new(state)))
    }

    pub fn state(&self) -> &ModelState {
        &self.state
    }

    /// Handle an event given as raw JSON text.
    pub fn handle_raw(&self, event: &str) -> Response {
        match serde_json::from_str::<Value>(event) {
            Ok(event) => self.handle(&event),
            Err(e) => fail(&HandlerError::MalformedEvent(e.to_string())),
        }
    }

    /// Handle a decoded event. Never panics; every failure becomes a response.
    pub fn handle(&self, event: &Value) -> Response {
        let span = info_span!("invoke", n_features = field::Empty);
        let _enter = span.enter();
        let start = Instant::now();

        let result = parse_features(event).and_then(|features| {
            span.record("n_features", features.len());
            self.predict(&features)
        });
        let response = match result {
            Ok(body) => {
                debug!(
                    n_features = body.features.len(),
                    is_anomaly = body.prediction.is_anomaly,
                    "prediction complete"
                );
                respond(200, &body)
            }
            Err(err) => fail(&err),
        };

        debug!(
            status = response.status_code,
            latency_ms = start.elapsed().as_secs_f64() * 1000.0,
            "invocation finished"
        );
        response
    }

    /// Run the model pipeline on a validated, non-empty feature vector.
    pub fn predict(&self, features: &[f64]) -> Result<PredictionBody, HandlerError> {
        if features.is_empty() {
            return Err(HandlerError::InvalidFeatures);
        }

        // 1 x N row
        let raw = Array1::from(features.to_vec());
        let scaled = self.state.scaler.transform_row(raw.view())?;

        let label = match self.state.classifier_input() {
            ClassifierInput::Raw => self.state.forest.predict_partial(raw.view())?,
            ClassifierInput::Scaled => self.state.forest.predict_partial(scaled.view())?,
        };

        let total = finite(
            "feature_importance",
            raw.iter().map(|v| v.abs()).sum::<f64>() + IMPORTANCE_EPSILON,
        )?;
        let feature_importance = raw.iter().map(|v| v.abs() / total).collect();

        let features_scaled = scaled.to_vec();
        let scaled_stats = summarize(&features_scaled)?;
        let stats = summarize(features)?;

        let prediction = Prediction {
            base_prediction: finite("base_prediction", scaled_stats.mean * 10.0)?,
            confidence: finite("confidence", 1.0 / (1.0 + scaled_stats.std))?,
            feature_importance,
            is_anomaly: label.is_anomaly(),
            stats,
        };

        Ok(PredictionBody {
            prediction,
            features: features.to_vec(),
            features_scaled,
        })
    }

    /// Answer one event per input line with one response per output line.
    ///
    /// Blank lines are skipped. Returns the number of responses written.
    pub fn serve<R: BufRead, W: Write>(&self, input: R, mut output: W) -> io::Result<usize> {
        let mut served = 0;
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let response = self.handle_raw(&line);
            serde_json::to_writer(&mut output, &response)?;
            writeln!(output)?;
            output.flush()?;
            served += 1;
        }
        Ok(served)
    }
}

fn incompatible(name: &str, reason: impl ToString) -> StoreError {
    StoreError::Incompatible {
        name: name.to_string(),
        reason: reason.to_string(),
    }
}

fn fail(err: &HandlerError) -> Response {
    let kind = err.kind();
    match kind {
        ErrorKind::Validation | ErrorKind::MalformedEvent => {
            warn!(kind = kind.as_str(), error = %err, "rejected request");
        }
        ErrorKind::ModelUnavailable | ErrorKind::Computation => {
            error!(kind = kind.as_str(), error = %err, "request failed");
        }
    }
    let message = err.public_message();
    respond(err.status_code(), &ErrorBody { error: &message })
}

/// Pull the feature vector out of `event.body`.
fn parse_features(event: &Value) -> Result<Vec<f64>, HandlerError> {
    let body = event
        .get("body")
        .ok_or_else(|| HandlerError::MalformedEvent("event has no 'body' field".to_string()))?;
    let body = body.as_str().ok_or_else(|| {
        HandlerError::MalformedEvent("event 'body' must be a JSON-encoded string".to_string())
    })?;

    let decoded: Value =
        serde_json::from_str(body).map_err(|e| HandlerError::MalformedEvent(e.to_string()))?;
    let decoded = decoded.as_object().ok_or_else(|| {
        HandlerError::MalformedEvent("request body must be a JSON object".to_string())
    })?;

    match decoded.get("features") {
        Some(Value::Array(items)) if !items.is_empty() => items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                item.as_f64().ok_or_else(|| HandlerError::NonNumericFeature {
                    index,
                    value: item.to_string(),
                })
            })
            .collect(),
        _ => Err(HandlerError::InvalidFeatures),
    }
}

fn summarize(values: &[f64]) -> Result<Summary, ModelError> {
    if let Some(index) = values.iter().position(|v| !v.is_finite()) {
        return Err(ModelError::NonFinite { index });
    }
    let summary = Summary::of(values).ok_or(ModelError::EmptyData)?;
    finite("mean", summary.mean)?;
    finite("std", summary.std)?;
    Ok(summary)
}

fn finite(quantity: &'static str, value: f64) -> Result<f64, ModelError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ModelError::Overflow { quantity })
    }
}

fn respond<T: Serialize>(status_code: u16, body: &T) -> Response {
    let body = serde_json::to_string(body).unwrap_or_else(|e| {
        format!("{{\"error\":\"Internal server error: failed to encode response: {e}\"}}")
    });
    Response { status_code, body }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::INVALID_FEATURES;
    use crate::models::iforest::IsolationForestParams;
    use ndarray::Array2;
    use rand::prelude::*;
    use serde_json::json;

    /// Forest trained on a cloud around the origin.
    fn forest(input: ClassifierInput) -> IsolationForest {
        let mut rng = StdRng::seed_from_u64(9);
        let data = Array2::from_shape_fn((200, 4), |_| rng.gen_range(-5.0..5.0));
        IsolationForest::fit(
            data.view(),
            &IsolationForestParams {
                n_estimators: 50,
                n_jobs: Some(1),
                input,
                ..IsolationForestParams::default()
            },
        )
        .unwrap()
    }

    /// Identity scaler in front of [`forest`].
    fn handler(input: ClassifierInput) -> PredictionHandler {
        let state = ModelState::new(StandardScaler::identity(4), forest(input)).unwrap();
        PredictionHandler::new(Arc::new(state))
    }

    fn event(features: Value) -> Value {
        json!({ "body": json!({ "features": features }).to_string() })
    }

    fn error_message(response: &Response) -> String {
        let body: Value = serde_json::from_str(&response.body).unwrap();
        body["error"].as_str().unwrap().to_string()
    }

    #[test]
    fn test_known_vector() {
        let response = handler(ClassifierInput::Raw).handle(&event(json!([1.0, 2.0, 3.0, 4.0])));
        assert_eq!(response.status_code, 200);

        let body: PredictionBody = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body.features, vec![1.0, 2.0, 3.0, 4.0]);
        assert_eq!(body.features_scaled, vec![1.0, 2.0, 3.0, 4.0]);

        let p = body.prediction;
        assert!((p.stats.mean - 2.5).abs() < 1e-12);
        assert!((p.stats.std - 1.118_033_988_7).abs() < 1e-9);
        assert_eq!(p.stats.min, 1.0);
        assert_eq!(p.stats.max, 4.0);
        for (got, want) in p.feature_importance.iter().zip([0.1, 0.2, 0.3, 0.4]) {
            assert!((got - want).abs() < 1e-9);
        }
        assert!((p.base_prediction - 25.0).abs() < 1e-12);
        assert!((p.confidence - 1.0 / (1.0 + 1.25f64.sqrt())).abs() < 1e-12);
    }

    #[test]
    fn test_empty_features_is_400() {
        let response = handler(ClassifierInput::Raw).handle(&event(json!([])));
        assert_eq!(response.status_code, 400);
        assert_eq!(error_message(&response), INVALID_FEATURES);
    }

    #[test]
    fn test_non_array_features_is_400() {
        let handler = handler(ClassifierInput::Raw);
        for features in [json!(3), json!("1,2,3"), json!({"a": 1}), json!(null), json!(true)] {
            let response = handler.handle(&event(features));
            assert_eq!(response.status_code, 400);
            assert_eq!(error_message(&response), INVALID_FEATURES);
        }

        let missing = json!({ "body": "{\"values\": [1, 2]}" });
        assert_eq!(handler.handle(&missing).status_code, 400);
    }

    #[test]
    fn test_malformed_body_is_500_with_parse_description() {
        let response =
            handler(ClassifierInput::Raw).handle(&json!({ "body": "{\"features\": [1, 2" }));
        assert_eq!(response.status_code, 500);
        let message = error_message(&response);
        assert!(message.starts_with("Internal server error: "));
        assert!(message.contains("EOF"), "{message}");
    }

    #[test]
    fn test_malformed_event_text_is_500() {
        let response = handler(ClassifierInput::Raw).handle_raw("{\"body\": ");
        assert_eq!(response.status_code, 500);
        assert!(error_message(&response).starts_with("Internal server error: "));
    }

    #[test]
    fn test_missing_or_non_string_body_is_500() {
        let handler = handler(ClassifierInput::Raw);
        assert_eq!(handler.handle(&json!({})).status_code, 500);
        assert_eq!(
            handler
                .handle(&json!({ "body": { "features": [1.0] } }))
                .status_code,
            500
        );
        assert_eq!(handler.handle(&json!({ "body": "[1, 2]" })).status_code, 500);
    }

    #[test]
    fn test_non_numeric_entry_is_500() {
        let response = handler(ClassifierInput::Raw).handle(&event(json!([1.0, "x", 3.0, 4.0])));
        assert_eq!(response.status_code, 500);
        assert!(error_message(&response).contains("index 1"));
    }

    #[test]
    fn test_wrong_width_is_500() {
        let response = handler(ClassifierInput::Raw).handle(&event(json!([1.0, 2.0])));
        assert_eq!(response.status_code, 500);
        assert!(error_message(&response).contains("expecting 4 features"));
    }

    #[test]
    fn test_repeat_invocations_are_byte_identical() {
        let handler = handler(ClassifierInput::Raw);
        let request = event(json!([0.5, -1.5, 2.25, 9.0]));
        let first = handler.handle(&request);
        let second = handler.handle(&request);
        assert_eq!(first, second);
    }

    #[test]
    fn test_far_vector_is_anomalous() {
        for input in [ClassifierInput::Raw, ClassifierInput::Scaled] {
            let response = handler(input).handle(&event(json!([400.0, -300.0, 250.0, 900.0])));
            let body: PredictionBody = serde_json::from_str(&response.body).unwrap();
            assert!(body.prediction.is_anomaly, "{input}");
        }
    }

    #[test]
    fn test_integer_features_are_accepted() {
        let response = handler(ClassifierInput::Raw).handle(&event(json!([1, 2, 3, 4])));
        assert_eq!(response.status_code, 200);
    }

    #[test]
    fn test_response_envelope_field_names() {
        let response = handler(ClassifierInput::Raw).handle(&event(json!([])));
        let encoded = serde_json::to_value(&response).unwrap();
        assert_eq!(encoded["statusCode"], 400);
        assert!(encoded["body"].is_string());
    }

    #[test]
    fn test_overflowing_features_are_500_not_null() {
        let data = Array2::from_shape_fn((40, 2), |(i, j)| (i * (j + 1)) as f64);
        let forest = IsolationForest::fit(
            data.view(),
            &IsolationForestParams {
                n_estimators: 10,
                n_jobs: Some(1),
                ..IsolationForestParams::default()
            },
        )
        .unwrap();
        let state = ModelState::new(StandardScaler::identity(2), forest).unwrap();
        let handler = PredictionHandler::new(Arc::new(state));

        for features in [json!([1e308, 1e308]), json!([1e308, -1e308]), json!([-1e308, -1e308])] {
            let response = handler.handle(&event(features));
            assert_eq!(response.status_code, 500, "{}", response.body);
            assert!(!response.body.contains("null"), "{}", response.body);
            assert!(error_message(&response).contains("is not finite"));
        }
    }

    #[test]
    fn test_large_finite_features_still_predict() {
        let response =
            handler(ClassifierInput::Raw).handle(&event(json!([1e300, 1e300, 1e300, 1e300])));
        assert_eq!(response.status_code, 200);
        let body: PredictionBody = serde_json::from_str(&response.body).unwrap();
        assert_eq!(body.prediction.stats.mean, 1e300);
        assert_eq!(body.prediction.confidence, 1.0);
    }

    #[test]
    fn test_load_rejects_corrupt_scaler_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::store::FileModelStore::new(dir.path());
        store.save(MODEL_ARTIFACT, &forest(ClassifierInput::Raw)).unwrap();
        let corrupt = json!({
            "mean": [0.0, 0.0, 0.0, 0.0],
            "scale": [1.0, 1.0],
            "n_samples_seen": 200
        });
        store.save(SCALER_ARTIFACT, &corrupt).unwrap();

        let err = PredictionHandler::from_store(&store, ClassifierInput::Raw).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ModelUnavailable);
        assert!(err.to_string().contains("'scaler'"), "{err}");

        store.save(SCALER_ARTIFACT, &StandardScaler::identity(4)).unwrap();
        assert!(PredictionHandler::from_store(&store, ClassifierInput::Raw).is_ok());
    }

    #[test]
    fn test_load_rejects_forest_splitting_on_unknown_feature() {
        let dir = tempfile::tempdir().unwrap();
        let store = crate::store::FileModelStore::new(dir.path());
        store.save(SCALER_ARTIFACT, &StandardScaler::identity(4)).unwrap();

        let mut encoded = serde_json::to_value(forest(ClassifierInput::Raw)).unwrap();
        encoded["trees"][0]["split_feature"] = json!(7);
        store.save(MODEL_ARTIFACT, &encoded).unwrap();

        let err = ModelState::load(&store, ClassifierInput::Raw).unwrap_err();
        assert!(matches!(err, StoreError::Incompatible { ref name, .. } if name == "model"));
    }

    #[test]
    fn test_serve_answers_each_non_blank_line() {
        let handler = handler(ClassifierInput::Raw);
        let ok = event(json!([1.0, 2.0, 3.0, 4.0])).to_string();
        let bad = event(json!([])).to_string();
        let input = format!("{ok}\n\n   \n{bad}\nnot json\n");

        let mut output = Vec::new();
        let served = handler.serve(input.as_bytes(), &mut output).unwrap();
        assert_eq!(served, 3);

        let responses: Vec<Response> = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        let codes: Vec<u16> = responses.iter().map(|r| r.status_code).collect();
        assert_eq!(codes, vec![200, 400, 500]);
        assert_eq!(responses[0], handler.handle_raw(&ok));
    }

    #[test]
    fn test_invoke_span_records_feature_count() {
        use std::sync::Mutex;

        #[derive(Clone, Default)]
        struct Captured(Arc<Mutex<Vec<u8>>>);

        impl io::Write for Captured {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                self.0.lock().unwrap().extend_from_slice(buf);
                Ok(buf.len())
            }

            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::DEBUG)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();

        let handler = handler(ClassifierInput::Raw);
        tracing::subscriber::with_default(subscriber, || {
            handler.handle(&event(json!([1.0, 2.0, 3.0, 4.0])));
        });

        let logs = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(logs.contains("invoke{n_features=4}"), "{logs}");
    }

    #[test]
    fn test_state_rejects_mismatched_widths() {
        let data = Array2::from_shape_fn((8, 2), |(i, j)| (i + j) as f64);
        let forest = IsolationForest::fit(
            data.view(),
            &IsolationForestParams {
                n_estimators: 5,
                n_jobs: Some(1),
                ..IsolationForestParams::default()
            },
        )
        .unwrap();
        assert!(ModelState::new(StandardScaler::identity(3), forest).is_err());
    }
}
