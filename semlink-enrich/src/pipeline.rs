//! Pipeline orchestration
//!
//! Runs registered stages phase by phase over one candidate sequence.

use crate::error::{EnrichError, EnrichResult};
use crate::stage::LinkStage;
use crate::types::{keys, Candidate, Settings};
use serde_json::{Map, Value};
use std::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Prepare,
    Finalize,
    FilterOutput,
}

impl Phase {
    fn as_str(&self) -> &'static str {
        match self {
            Phase::Prepare => "prepare",
            Phase::Finalize => "finalize",
            Phase::FilterOutput => "filter_output",
        }
    }
}

/// Ordered set of stages
#[derive(Default)]
pub struct Pipeline {
    stages: Vec<Box<dyn LinkStage>>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage; stages run in registration order
    pub fn with_stage(mut self, stage: impl LinkStage + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
    }

    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Run one pass over `candidates`.
    ///
    /// On a hard error, background work of every stage is drained before
    /// the error is returned.
    pub async fn run(
        &mut self,
        candidates: &mut [Candidate],
        text: &str,
        settings: &mut Settings,
    ) -> EnrichResult<()> {
        let langcode = settings
            .langcode()
            .ok_or_else(|| EnrichError::InvalidSetting {
                key: keys::LANGCODE.to_string(),
                reason: "required setting is missing".to_string(),
            })?
            .to_string();

        let pass_id = Uuid::new_v4();
        let span = tracing::info_span!("pass", %pass_id, langcode = %langcode);

        async {
            let start = Instant::now();
            tracing::debug!(candidates = candidates.len(), stages = self.stages.len(), "Pass started");

            let outcome = self.run_phases(candidates, text, settings).await;

            if let Err(e) = &outcome {
                tracing::error!(error = %e, "Pass aborted");
                for stage in self.stages.iter_mut() {
                    stage.discard().await;
                }
            } else {
                tracing::info!(
                    candidates = candidates.len(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Pass complete"
                );
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run_phases(
        &mut self,
        candidates: &mut [Candidate],
        text: &str,
        settings: &mut Settings,
    ) -> EnrichResult<()> {
        for phase in [Phase::Prepare, Phase::Finalize, Phase::FilterOutput] {
            for stage in self.stages.iter_mut() {
                let start = Instant::now();
                match phase {
                    Phase::Prepare => stage.prepare(candidates, text, settings).await?,
                    Phase::Finalize => stage.finalize(candidates, text, settings).await?,
                    Phase::FilterOutput => stage.filter_output(candidates, text, settings).await?,
                }
                tracing::trace!(
                    stage = stage.name(),
                    phase = phase.as_str(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "Phase done"
                );
            }
        }
        Ok(())
    }

    /// Diagnostic view keyed by stage name
    pub fn inspect(&self) -> Value {
        let mut out = Map::new();
        for stage in &self.stages {
            let description = stage.inspect();
            if !description.is_null() {
                out.insert(stage.name().to_string(), description);
            }
        }
        Value::Object(out)
    }

    /// Shut every stage down, reporting the first failure
    pub async fn shutdown(&mut self) -> EnrichResult<()> {
        let mut first_error = None;
        for stage in self.stages.iter_mut() {
            if let Err(e) = stage.shutdown().await {
                tracing::error!(stage = stage.name(), error = %e, "Stage shutdown failed");
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
