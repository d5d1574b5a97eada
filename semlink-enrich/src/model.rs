//! Classifier models and the model store
//!
//! A [`ModelStore`] resolves a model name to a [`LoadedModel`]: the
//! classifier plus the [`ModelDescriptor`] describing the feature
//! contract it was trained against. [`DirectoryModelStore`] reads
//! `<model_dir>/<name>.json` files holding a logistic-regression model.

use crate::error::{EnrichError, EnrichResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Probability classifier over fixed-width feature vectors
///
/// `None` entries mark features the candidate does not have.
pub trait Classifier: Send + Sync {
    /// Input width the model was trained with
    fn n_features(&self) -> usize;

    /// One `[p(negative), p(positive)]` row per input row
    fn predict_proba(&self, rows: &[Vec<Option<f64>>]) -> EnrichResult<Vec<[f64; 2]>>;
}

/// Feature contract and provenance of a model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub name: String,

    /// Where the model came from (training run, file)
    #[serde(default)]
    pub source: String,

    /// Language the model was trained for
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,

    /// Feature names the model expects
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<Vec<String>>,
}

/// A classifier together with its descriptor
#[derive(Clone)]
pub struct LoadedModel {
    pub model: Arc<dyn Classifier>,
    pub descriptor: ModelDescriptor,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("descriptor", &self.descriptor)
            .field("n_features", &self.model.n_features())
            .finish()
    }
}

/// Resolves model names
#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn load(&self, name: &str) -> EnrichResult<LoadedModel>;
}

// ============================================================================
// Logistic regression
// ============================================================================

/// Binary logistic regression with per-feature imputation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub coefficients: Vec<f64>,

    #[serde(default)]
    pub intercept: f64,

    /// Value substituted for a missing feature; 0.0 when omitted
    #[serde(default)]
    pub impute: Option<Vec<f64>>,
}

impl LogisticModel {
    fn validate(&self) -> Result<(), String> {
        if self.coefficients.is_empty() {
            return Err("model has no coefficients".to_string());
        }
        if let Some(impute) = &self.impute {
            if impute.len() != self.coefficients.len() {
                return Err(format!(
                    "impute has {} values for {} coefficients",
                    impute.len(),
                    self.coefficients.len()
                ));
            }
        }
        Ok(())
    }

    fn fill(&self, index: usize, value: Option<f64>) -> f64 {
        value.unwrap_or_else(|| {
            self.impute
                .as_ref()
                .and_then(|values| values.get(index).copied())
                .unwrap_or(0.0)
        })
    }
}

impl Classifier for LogisticModel {
    fn n_features(&self) -> usize {
        self.coefficients.len()
    }

    fn predict_proba(&self, rows: &[Vec<Option<f64>>]) -> EnrichResult<Vec<[f64; 2]>> {
        rows.iter()
            .map(|row| {
                if row.len() != self.coefficients.len() {
                    return Err(EnrichError::DimensionMismatch {
                        model_features: self.coefficients.len(),
                        input_features: row.len(),
                    });
                }
                let z = self.intercept
                    + row
                        .iter()
                        .enumerate()
                        .map(|(i, v)| self.coefficients[i] * self.fill(i, *v))
                        .sum::<f64>();
                let positive = 1.0 / (1.0 + (-z).exp());
                Ok([1.0 - positive, positive])
            })
            .collect()
    }
}

// ============================================================================
// Directory store
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ModelParameters {
    Logistic(LogisticModel),
}

#[derive(Debug, Deserialize)]
struct ModelFile {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    language: Option<String>,
    #[serde(default)]
    features: Option<Vec<String>>,
    model: ModelParameters,
}

/// Loads `<dir>/<name>.json` and keeps loaded models in memory
pub struct DirectoryModelStore {
    dir: PathBuf,
    loaded: RwLock<HashMap<String, LoadedModel>>,
}

impl DirectoryModelStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            loaded: RwLock::new(HashMap::new()),
        }
    }

    fn model_path(&self, name: &str) -> EnrichResult<PathBuf> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return Err(EnrichError::InvalidSetting {
                key: crate::types::keys::LEARNING.to_string(),
                reason: format!("'{}' is not a valid model name", name),
            });
        }
        Ok(self.dir.join(format!("{}.json", name)))
    }

    async fn read_model(&self, name: &str) -> EnrichResult<LoadedModel> {
        let path = self.model_path(name)?;

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EnrichError::ModelNotFound(name.to_string()));
            }
            Err(e) => return Err(semlink_common::Error::Io(e).into()),
        };

        let file: ModelFile =
            serde_json::from_str(&content).map_err(|e| EnrichError::InvalidModel {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let ModelParameters::Logistic(model) = file.model;
        model.validate().map_err(|reason| EnrichError::InvalidModel {
            name: name.to_string(),
            reason,
        })?;

        let descriptor = ModelDescriptor {
            name: file.name.unwrap_or_else(|| name.to_string()),
            source: file
                .source
                .unwrap_or_else(|| path.display().to_string()),
            language: file.language,
            features: file.features,
        };

        Ok(LoadedModel {
            model: Arc::new(model),
            descriptor,
        })
    }
}

#[async_trait]
impl ModelStore for DirectoryModelStore {
    async fn load(&self, name: &str) -> EnrichResult<LoadedModel> {
        if let Some(model) = self.loaded.read().await.get(name) {
            return Ok(model.clone());
        }

        let model = self.read_model(name).await?;
        tracing::debug!(model = name, dir = %self.dir.display(), "Model read from disk");

        self.loaded
            .write()
            .await
            .insert(name.to_string(), model.clone());
        Ok(model)
    }
}
