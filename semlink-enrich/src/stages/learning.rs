//! Classifier scoring stage
//!
//! With `learning` naming a model, validates the model's feature
//! contract against the candidates, scores the whole batch in one call and
//! attaches the positive-class probability as `learning_probability`.

use crate::error::{EnrichError, EnrichResult};
use crate::model::{ModelDescriptor, ModelStore};
use crate::stage::LinkStage;
use crate::types::{keys, Candidate, Settings};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

pub struct LearningStage {
    store: Arc<dyn ModelStore>,
}

impl LearningStage {
    pub fn new(store: Arc<dyn ModelStore>) -> Self {
        Self { store }
    }
}

/// Check a model against the request and return the feature order to feed it.
///
/// `available` is the sorted feature list of the first candidate. A declared
/// feature set always defines the order; with features missing that is a
/// hard error unless `tolerate_missing` is set.
pub fn canonical_feature_order(
    descriptor: &ModelDescriptor,
    n_features: usize,
    available: &[String],
    langcode: &str,
    tolerate_missing: bool,
) -> EnrichResult<Vec<String>> {
    if let Some(language) = &descriptor.language {
        if language != langcode {
            return Err(EnrichError::LanguageMismatch {
                model: descriptor.name.clone(),
                expected: language.clone(),
                actual: langcode.to_string(),
            });
        }
    }

    let order = match &descriptor.features {
        Some(expected) => {
            let available: BTreeSet<&str> = available.iter().map(String::as_str).collect();
            let expected: BTreeSet<&str> = expected.iter().map(String::as_str).collect();
            let missing: Vec<String> = expected
                .difference(&available)
                .map(|s| s.to_string())
                .collect();

            if !missing.is_empty() {
                let err = EnrichError::MissingFeatures {
                    model: descriptor.name.clone(),
                    missing,
                };
                if !tolerate_missing {
                    return Err(err);
                }
                warn!("{}", err);
            }

            expected.into_iter().map(String::from).collect()
        }
        None => available.to_vec(),
    };

    if n_features != order.len() {
        return Err(EnrichError::DimensionMismatch {
            model_features: n_features,
            input_features: order.len(),
        });
    }

    Ok(order)
}

fn feature_rows(candidates: &[Candidate], order: &[String]) -> Vec<Vec<Option<f64>>> {
    candidates
        .iter()
        .map(|candidate| {
            order
                .iter()
                .map(|name| {
                    candidate
                        .features
                        .as_ref()
                        .and_then(|features| features.get(name).copied())
                })
                .collect()
        })
        .collect()
}

#[async_trait]
impl LinkStage for LearningStage {
    fn name(&self) -> &'static str {
        "LearningStage"
    }

    async fn finalize(
        &mut self,
        candidates: &mut [Candidate],
        _text: &str,
        settings: &mut Settings,
    ) -> EnrichResult<()> {
        let Some(model_name) = settings.get(keys::LEARNING) else {
            return Ok(());
        };
        if candidates.is_empty() {
            return Ok(());
        }
        let langcode = settings.langcode().ok_or_else(|| EnrichError::InvalidSetting {
            key: keys::LANGCODE.to_string(),
            reason: "required for scoring".to_string(),
        })?;

        let loaded = self.store.load(model_name).await?;
        info!(model = model_name, "Loaded classifier from {}", loaded.descriptor.source);

        let available: Vec<String> = candidates[0]
            .features
            .as_ref()
            .map(|f| f.keys().cloned().collect())
            .unwrap_or_default();

        let order = canonical_feature_order(
            &loaded.descriptor,
            loaded.model.n_features(),
            &available,
            langcode,
            settings.contains(keys::MISSING),
        )?;

        let rows = feature_rows(candidates, &order);
        info!(
            "Start predicting of {} instances with {} features",
            rows.len(),
            order.len()
        );
        let scores = loaded.model.predict_proba(&rows)?;
        info!("Done predicting of {} instances", scores.len());

        if scores.len() != candidates.len() {
            return Err(EnrichError::InvalidModel {
                name: loaded.descriptor.name.clone(),
                reason: format!(
                    "returned {} scores for {} instances",
                    scores.len(),
                    candidates.len()
                ),
            });
        }

        let keep_features = settings.contains(keys::FEATURES);
        for (candidate, [_, positive]) in candidates.iter_mut().zip(scores) {
            candidate.learning_probability = Some(positive);
            if !keep_features {
                candidate.features = None;
            }
        }
        Ok(())
    }

    fn inspect(&self) -> serde_json::Value {
        serde_json::json!({ "batch_prediction": true })
    }
}
