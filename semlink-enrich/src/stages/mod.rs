//! Pipeline stages, in the order [`crate::build_pipeline`] registers them

pub mod articles;
pub mod learning;
pub mod statistics;

pub use articles::{ArticlesOptions, ArticlesStage};
pub use learning::LearningStage;
pub use statistics::{StatisticsOptions, StatisticsStage};
