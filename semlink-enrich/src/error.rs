//! Error types for semlink-enrich
//!
//! Hard failures abort the pass and reach the caller. Soft failures
//! (fetch errors, malformed payloads, tolerated missing features) are
//! logged with `warn!` and never surface here.

use crate::normalize::NormalizeError;
use crate::transport::FetchError;
use thiserror::Error;

/// Pipeline error type
#[derive(Debug, Error)]
pub enum EnrichError {
    /// Model was trained for another language
    #[error("Language of model {model} and data do not match: model expects '{expected}', request has '{actual}'")]
    LanguageMismatch {
        model: String,
        expected: String,
        actual: String,
    },

    /// Model input width differs from the canonical feature list
    #[error("Number of features of the model must match the input. Model n_features is {model_features} and input n_features is {input_features}.")]
    DimensionMismatch {
        model_features: usize,
        input_features: usize,
    },

    /// Expected model features absent from the candidates
    #[error("Missing {} features for model {model}: {}", .missing.len(), .missing.join(", "))]
    MissingFeatures { model: String, missing: Vec<String> },

    /// No model stored under the requested name
    #[error("Model not found: {0}")]
    ModelNotFound(String),

    /// Model file exists but cannot be used
    #[error("Invalid model {name}: {reason}")]
    InvalidModel { name: String, reason: String },

    /// Required setting absent or unusable
    #[error("Invalid setting '{key}': {reason}")]
    InvalidSetting { key: String, reason: String },

    /// Background fetch worker died
    #[error("Fetch worker failed: {0}")]
    Worker(String),

    /// Transport failure surfaced from a single lookup
    #[error(transparent)]
    Fetch(#[from] FetchError),

    /// Payload could not be normalized
    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    /// semlink-common error (cache store, config, IO)
    #[error("Common error: {0}")]
    Common(#[from] semlink_common::Error),
}

impl From<sqlx::Error> for EnrichError {
    fn from(err: sqlx::Error) -> Self {
        EnrichError::Common(semlink_common::Error::Database(err))
    }
}

/// Result type for pipeline operations
pub type EnrichResult<T> = Result<T, EnrichError>;
