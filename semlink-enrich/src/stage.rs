//! Three-phase stage contract
//!
//! Every pipeline pass calls all stages' `prepare`, then all `finalize`,
//! then all `filter_output`, each in registration order. A fetch stage
//! starts its background work in `prepare` and joins it in `finalize`, so
//! network round-trips of different stages overlap.
//!
//! Each phase is a no-op unless the stage's activating settings are
//! present, the candidate slice is non-empty and the active language is
//! one the stage serves. Stages check this themselves.

use crate::error::EnrichResult;
use crate::types::{Candidate, Settings};
use async_trait::async_trait;

/// One stage of the enrichment pipeline
///
/// # Example
/// ```ignore
/// struct Uppercase;
///
/// #[async_trait::async_trait]
/// impl LinkStage for Uppercase {
///     fn name(&self) -> &'static str { "Uppercase" }
///
///     async fn finalize(&mut self, candidates: &mut [Candidate], _text: &str, _settings: &mut Settings) -> EnrichResult<()> {
///         for candidate in candidates.iter_mut() {
///             candidate.extra.insert("shout".into(), candidate.title().to_uppercase().into());
///         }
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait LinkStage: Send {
    /// Stage name for logging and inspection
    fn name(&self) -> &'static str;

    /// Start background work. Must not wait on it.
    async fn prepare(
        &mut self,
        _candidates: &mut [Candidate],
        _text: &str,
        _settings: &mut Settings,
    ) -> EnrichResult<()> {
        Ok(())
    }

    /// Await background work started in `prepare`, then annotate candidates
    async fn finalize(
        &mut self,
        _candidates: &mut [Candidate],
        _text: &str,
        _settings: &mut Settings,
    ) -> EnrichResult<()> {
        Ok(())
    }

    /// Prune fields that should not reach the caller
    async fn filter_output(
        &mut self,
        _candidates: &mut [Candidate],
        _text: &str,
        _settings: &mut Settings,
    ) -> EnrichResult<()> {
        Ok(())
    }

    /// Wait out and drop background work from an aborted pass
    async fn discard(&mut self) {}

    /// Diagnostic description of the stage's configuration
    fn inspect(&self) -> serde_json::Value {
        serde_json::Value::Null
    }

    /// Flush and release owned resources
    async fn shutdown(&mut self) -> EnrichResult<()> {
        Ok(())
    }
}
