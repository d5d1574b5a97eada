//! Test Helper Utilities
//!
//! Shared utilities for testing semlink-enrich

#![allow(dead_code, unused_imports)]

pub mod fixtures;
pub mod mock_transport;

// Re-export commonly used items
pub use fixtures::{
    entity_xml, logistic_model, monthly_views_json, test_config, StaticModelStore, ENTITY_URL,
    STATS_URL,
};
pub use mock_transport::MockTransport;
