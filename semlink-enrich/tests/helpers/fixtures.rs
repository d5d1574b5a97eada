//! Fixture builders: configs, payloads and models

use async_trait::async_trait;
use semlink_common::config::TomlConfig;
use semlink_enrich::model::{LoadedModel, LogisticModel, ModelDescriptor, ModelStore};
use semlink_enrich::{EnrichError, EnrichResult};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub const ENTITY_URL: &str = "http://wpm.test/services/exploreArticle";
pub const STATS_URL: &str = "http://stats.test/json";

/// Config pointing at a temp cache dir and the test service URLs
pub fn test_config(cache_dir: &Path) -> TomlConfig {
    let mut config = TomlConfig {
        cache_dir: cache_dir.join("cache"),
        model_dir: cache_dir.join("models"),
        langcodes: vec!["en".to_string(), "nl".to_string()],
        threads: 4,
        ..TomlConfig::default()
    };
    config.entity_service.url = ENTITY_URL.to_string();
    config
        .entity_service
        .source_names
        .insert("en".to_string(), "enwiki".to_string());
    config.statistics.base_url = STATS_URL.to_string();
    config.http.stats_first_attempt_timeout_ms = 50;
    config
}

/// Entity-service response for `title` with one of each section
pub fn entity_xml(id: i64, title: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<message service="/exploreArticle">
  <Response id="{id}" title="{title}">
    <Definition>{title} is a test article.</Definition>
    <Labels>
      <Label fromRedirect="false" fromTitle="true" isPrimary="true" occurances="10" proportion="0.9">{title}</Label>
    </Labels>
    <InLinks><InLink id="1" title="Linker" relatedness="0.4"/></InLinks>
    <OutLinks><OutLink id="2" title="Linked" relatedness="0.6"/></OutLinks>
    <ParentCategories><ParentCategory id="3" title="Tests"/></ParentCategories>
    <Image url="http://img.test/{id}.png"/>
  </Response>
</message>"#
    )
}

/// Page-view payload reporting `per_day` views for every day of the month
pub fn monthly_views_json(year: i32, month: u32, per_day: u64) -> String {
    let days: serde_json::Map<String, serde_json::Value> = (1..=31)
        .map(|d| (format!("{}-{:02}-{:02}", year, month, d), per_day.into()))
        .collect();
    serde_json::json!({ "daily_views": days, "title": "test" }).to_string()
}

pub fn logistic_model(coefficients: Vec<f64>, intercept: f64) -> Arc<LogisticModel> {
    Arc::new(LogisticModel {
        coefficients,
        intercept,
        impute: None,
    })
}

/// In-memory model store
#[derive(Default)]
pub struct StaticModelStore {
    models: HashMap<String, LoadedModel>,
}

impl StaticModelStore {
    pub fn with_model(
        mut self,
        name: &str,
        model: Arc<LogisticModel>,
        language: Option<&str>,
        features: Option<&[&str]>,
    ) -> Self {
        let descriptor = ModelDescriptor {
            name: name.to_string(),
            source: format!("fixture:{}", name),
            language: language.map(String::from),
            features: features.map(|f| f.iter().map(|s| s.to_string()).collect()),
        };
        self.models.insert(
            name.to_string(),
            LoadedModel {
                model,
                descriptor,
            },
        );
        self
    }
}

#[async_trait]
impl ModelStore for StaticModelStore {
    async fn load(&self, name: &str) -> EnrichResult<LoadedModel> {
        self.models
            .get(name)
            .cloned()
            .ok_or_else(|| EnrichError::ModelNotFound(name.to_string()))
    }
}
