//! semlink-enrich library interface
//!
//! Enriches entity-link candidates with external entity data and page-view
//! statistics, then scores them with a classifier. See [`pipeline`] for
//! the three-phase stage protocol.

pub mod cache;
pub mod error;
pub mod model;
pub mod normalize;
pub mod pipeline;
pub mod pool;
pub mod retry;
pub mod stage;
pub mod stages;
pub mod stats;
pub mod transport;
pub mod types;

pub use crate::error::{EnrichError, EnrichResult};
pub use crate::pipeline::Pipeline;
pub use crate::stage::LinkStage;
pub use crate::types::{Candidate, EnrichmentField, Settings};

use crate::model::DirectoryModelStore;
use crate::stages::{ArticlesStage, LearningStage, StatisticsStage};
use crate::transport::Transport;
use semlink_common::config::TomlConfig;
use std::sync::Arc;

/// Build the standard pipeline: entity data, statistics, scoring.
///
/// Opens the per-language caches under `config.cache_dir`; call
/// [`Pipeline::shutdown`] when done to flush and close them.
pub async fn build_pipeline(
    config: &TomlConfig,
    transport: Arc<dyn Transport>,
) -> EnrichResult<Pipeline> {
    let articles = ArticlesStage::open(config, Arc::clone(&transport)).await?;
    let statistics = StatisticsStage::open(config, transport).await?;
    let learning = LearningStage::new(Arc::new(DirectoryModelStore::new(&config.model_dir)));

    Ok(Pipeline::new()
        .with_stage(articles)
        .with_stage(statistics)
        .with_stage(learning))
}
