//! Error types for the model, store, handler and training layers.

use std::path::PathBuf;

use thiserror::Error;

/// Failures raised while fitting or applying a model.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModelError {
    /// Training matrix has no rows or no columns
    #[error("training data is empty")]
    EmptyData,

    /// Too few rows to learn anything meaningful
    #[error("at least {required} training samples are required, got {found}")]
    InsufficientSamples {
        /// Minimum row count
        required: usize,
        /// Rows supplied
        found: usize,
    },

    /// Input width does not match the fitted width
    #[error("X has {found} features, but the model is expecting {expected} features as input")]
    DimensionMismatch {
        /// Fitted feature count
        expected: usize,
        /// Feature count of the input
        found: usize,
    },

    /// NaN or infinity in the input
    #[error("input contains a non-finite value at feature {index}")]
    NonFinite {
        /// Offending column
        index: usize,
    },

    /// Parameter outside its valid range
    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter {
        /// Parameter name
        name: &'static str,
        /// Why it was rejected
        reason: String,
    },

    /// A derived quantity overflowed to NaN or infinity
    #[error("{quantity} is not finite")]
    Overflow {
        /// Name of the derived value
        quantity: &'static str,
    },

    /// Shape error while assembling a matrix
    #[error("invalid shape: {0}")]
    Shape(String),
}

/// Failures of the model artifact store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No artifact under that name
    #[error("model artifact '{name}' not found at {}", .path.display())]
    Missing {
        /// Artifact name
        name: String,
        /// Where it was looked up
        path: PathBuf,
    },

    /// Read or write failed
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        /// Artifact path
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Artifact could not be encoded or decoded
    #[error("artifact '{name}' is not valid: {source}")]
    Codec {
        /// Artifact name
        name: String,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// Artifact decoded but is unusable with the current configuration
    #[error("artifact '{name}' is incompatible: {reason}")]
    Incompatible {
        /// Artifact name
        name: String,
        /// Why
        reason: String,
    },
}

/// Closed set of request failure kinds, logged distinctly.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Missing, empty or non-array feature vector
    Validation,
    /// Event or body could not be parsed
    MalformedEvent,
    /// Required model state is not available
    ModelUnavailable,
    /// Processing failed on a well-formed request
    Computation,
}

impl ErrorKind {
    /// Stable name used in log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "validation",
            ErrorKind::MalformedEvent => "malformed_event",
            ErrorKind::ModelUnavailable => "model_unavailable",
            ErrorKind::Computation => "computation",
        }
    }
}

/// Message returned for every client input failure.
pub const INVALID_FEATURES: &str = "Invalid input: features must be a non-empty array";

/// Failures on the request path.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// `features` missing, empty or not an array
    #[error("Invalid input: features must be a non-empty array")]
    InvalidFeatures,

    /// Event, body or body JSON could not be decoded
    #[error("{0}")]
    MalformedEvent(String),

    /// Model state could not be obtained
    #[error(transparent)]
    ModelUnavailable(#[from] StoreError),

    /// A feature entry is not a number
    #[error("could not convert feature at index {index} to float: {value}")]
    NonNumericFeature {
        /// Position in the features array
        index: usize,
        /// The offending JSON value
        value: String,
    },

    /// Scaling or classification failed
    #[error(transparent)]
    Computation(#[from] ModelError),
}

impl HandlerError {
    /// Internal classification of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::InvalidFeatures => ErrorKind::Validation,
            HandlerError::MalformedEvent(_) => ErrorKind::MalformedEvent,
            HandlerError::ModelUnavailable(_) => ErrorKind::ModelUnavailable,
            HandlerError::NonNumericFeature { .. } | HandlerError::Computation(_) => {
                ErrorKind::Computation
            }
        }
    }

    /// HTTP-style status code for the response envelope.
    #[must_use]
    pub fn status_code(&self) -> u16 {
        match self.kind() {
            ErrorKind::Validation => 400,
            _ => 500,
        }
    }

    /// Text placed in the `error` field of the response body.
    #[must_use]
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Validation => INVALID_FEATURES.to_string(),
            _ => format!("Internal server error: {self}"),
        }
    }
}

/// Failures of the offline training routine.
#[derive(Debug, Error)]
pub enum TrainingError {
    /// Fitting failed
    #[error("model fitting failed: {0}")]
    Model(#[from] ModelError),

    /// Artifacts could not be persisted or reloaded
    #[error("model store failed: {0}")]
    Store(#[from] StoreError),

    /// Training data file could not be read
    #[error("could not read training data {}: {source}", .path.display())]
    DataIo {
        /// Data file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// Training data file is not a JSON matrix
    #[error("training data {} is not a JSON array of numeric rows: {source}", .path.display())]
    DataFormat {
        /// Data file
        path: PathBuf,
        /// Underlying error
        #[source]
        source: serde_json::Error,
    },

    /// Reloaded artifacts could not serve the smoke-test vector
    #[error("smoke test failed: {0}")]
    SmokeTest(#[source] HandlerError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_maps_to_400_with_fixed_message() {
        let err = HandlerError::InvalidFeatures;
        assert_eq!(err.status_code(), 400);
        assert_eq!(err.public_message(), INVALID_FEATURES);
    }

    #[test]
    fn test_internal_errors_map_to_500_with_prefix() {
        let err = HandlerError::Computation(ModelError::DimensionMismatch {
            expected: 4,
            found: 3,
        });
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.kind(), ErrorKind::Computation);
        assert!(err
            .public_message()
            .starts_with("Internal server error: X has 3 features"));
    }

    #[test]
    fn test_kind_names_are_distinct() {
        let names = [
            ErrorKind::Validation.as_str(),
            ErrorKind::MalformedEvent.as_str(),
            ErrorKind::ModelUnavailable.as_str(),
            ErrorKind::Computation.as_str(),
        ];
        for (i, a) in names.iter().enumerate() {
            for b in &names[i + 1..] {
                assert_ne!(a, b);
            }
        }
    }
}
