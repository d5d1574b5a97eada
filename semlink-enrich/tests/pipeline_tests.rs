//! End-to-end pipeline tests against scripted services
//!
//! Each test builds the standard stage order (entity data, statistics,
//! scoring) over file-backed caches in a temp dir.

mod helpers;

use helpers::{logistic_model, test_config, MockTransport, StaticModelStore, ENTITY_URL, STATS_URL};
use semlink_common::config::TomlConfig;
use semlink_enrich::cache::PayloadCache;
use semlink_enrich::stages::{articles, ArticlesStage, LearningStage, StatisticsStage};
use semlink_enrich::stats::{WIKISTATS_4WK, WIKISTATS_DAY_OF_WK, WIKISTATS_WK, WIKISTATS_YEAR};
use semlink_enrich::transport::Transport;
use semlink_enrich::{build_pipeline, Candidate, EnrichError, EnrichmentField, Pipeline, Settings};
use std::sync::Arc;
use tempfile::TempDir;

/// 2013-03-15T00:00:00Z
const REFERENCE_TS: &str = "1363305600";

async fn pipeline(config: &TomlConfig, transport: &MockTransport, store: StaticModelStore) -> Pipeline {
    let transport: Arc<dyn Transport> = Arc::new(transport.clone());
    Pipeline::new()
        .with_stage(ArticlesStage::open(config, Arc::clone(&transport)).await.unwrap())
        .with_stage(StatisticsStage::open(config, transport).await.unwrap())
        .with_stage(LearningStage::new(Arc::new(store)))
}

fn settings(pairs: &[(&str, &str)]) -> Settings {
    pairs.iter().copied().collect()
}

fn sigmoid(z: f64) -> f64 {
    1.0 / (1.0 + (-z).exp())
}

// ============================================================================
// Scoring
// ============================================================================

#[tokio::test]
async fn test_scoring_end_to_end() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let transport = MockTransport::services(1);
    let store = StaticModelStore::default().with_model("m1", logistic_model(vec![0.8], -0.3), None, Some(&["a"]));
    let mut pipeline = pipeline(&config, &transport, store).await;

    let mut candidates = vec![Candidate::new("Foo").with_features([("a", 1.0)])];
    let mut settings = settings(&[("langcode", "en"), ("learning", "m1")]);
    pipeline.run(&mut candidates, "Foo bar", &mut settings).await.unwrap();

    let candidate = &candidates[0];
    let probability = candidate.learning_probability.unwrap();
    assert!((probability - sigmoid(0.5)).abs() < 1e-12);
    assert!(candidate.features.is_none(), "features dropped unless requested");
    for field in EnrichmentField::ALL {
        assert!(!candidate.has_field(field), "{} should be filtered", field.as_str());
    }

    let json = serde_json::to_value(candidate).unwrap();
    assert!(json.get("features").is_none());
    assert_eq!(json["title"], "Foo");

    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_missing_feature_policy() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let transport = MockTransport::services(1);
    let store = || {
        StaticModelStore::default().with_model("m2", logistic_model(vec![1.0, 1.0], 0.0), None, Some(&["a", "b"]))
    };

    // Without `missing`: hard failure
    let mut strict = pipeline(&config, &transport, store()).await;
    let mut candidates = vec![Candidate::new("Foo").with_features([("a", 1.0)])];
    let err = strict
        .run(&mut candidates, "", &mut settings(&[("langcode", "en"), ("learning", "m2")]))
        .await
        .unwrap_err();
    assert!(matches!(err, EnrichError::MissingFeatures { .. }));
    assert!(candidates[0].learning_probability.is_none());
    strict.shutdown().await.unwrap();

    // With `missing`: `b` is null-filled and imputed as 0
    let mut tolerant = pipeline(&config, &transport, store()).await;
    let mut candidates = vec![
        Candidate::new("Foo").with_features([("a", 1.0)]),
        Candidate::new("Bar").with_features([("a", -1.0)]),
    ];
    tolerant
        .run(
            &mut candidates,
            "",
            &mut settings(&[("langcode", "en"), ("learning", "m2"), ("missing", "")]),
        )
        .await
        .unwrap();
    assert!((candidates[0].learning_probability.unwrap() - sigmoid(1.0)).abs() < 1e-12);
    assert!((candidates[1].learning_probability.unwrap() - sigmoid(-1.0)).abs() < 1e-12);
    tolerant.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_dimension_mismatch_aborts_before_prediction() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let transport = MockTransport::services(1);
    let store = StaticModelStore::default().with_model("wide", logistic_model(vec![1.0; 5], 0.0), None, None);
    let mut pipeline = pipeline(&config, &transport, store).await;

    let mut candidates =
        vec![Candidate::new("Foo").with_features([("a", 1.0), ("b", 1.0), ("c", 1.0), ("d", 1.0)])];
    let err = pipeline
        .run(&mut candidates, "", &mut settings(&[("langcode", "en"), ("learning", "wide")]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EnrichError::DimensionMismatch {
            model_features: 5,
            input_features: 4
        }
    ));
    assert!(candidates[0].learning_probability.is_none());
    pipeline.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_language_mismatch_is_fatal() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let transport = MockTransport::services(1);
    let store = StaticModelStore::default().with_model("nl_model", logistic_model(vec![1.0], 0.0), Some("nl"), None);
    let mut pipeline = pipeline(&config, &transport, store).await;

    let mut candidates = vec![Candidate::new("Foo").with_features([("a", 1.0)])];
    let err = pipeline
        .run(&mut candidates, "", &mut settings(&[("langcode", "en"), ("learning", "nl_model")]))
        .await
        .unwrap_err();
    assert!(matches!(err, EnrichError::LanguageMismatch { .. }));
    pipeline.shutdown().await.unwrap();
}

// ============================================================================
// Entity data
// ============================================================================

#[tokio::test]
async fn test_entity_failure_yields_placeholder_and_no_cache_entry() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let transport = MockTransport::failing();
    let mut pipeline = pipeline(&config, &transport, StaticModelStore::default()).await;

    let mut candidates = vec![Candidate::new("Foo")];
    let mut settings = settings(&[
        ("langcode", "en"),
        ("article", "article_id,article_title,Definition,InLinks,OutLinks,Labels,Images,ParentCategories"),
    ]);
    pipeline.run(&mut candidates, "", &mut settings).await.unwrap();
    pipeline.shutdown().await.unwrap();

    assert_eq!(transport.request_count(), 2, "one attempt plus one reduced retry");

    let candidate = &candidates[0];
    assert_eq!(candidate.article_id, Some(-1));
    assert_eq!(candidate.article_title.as_deref(), Some(""));
    assert_eq!(candidate.definition.as_deref(), Some(""));
    assert_eq!(candidate.in_links, Some(vec![]));
    assert_eq!(candidate.out_links, Some(vec![]));
    assert_eq!(candidate.labels, Some(vec![]));
    assert_eq!(candidate.images, Some(vec![]));
    assert_eq!(candidate.parent_categories, Some(vec![]));

    let cache = PayloadCache::open(&config.cache_dir, "en", articles::CACHE_SOURCE).await.unwrap();
    assert!(!cache.contains("Foo").await.unwrap());
    assert_eq!(cache.len().await.unwrap(), 0);
}

#[tokio::test]
async fn test_cached_entity_needs_no_network() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());

    let online = MockTransport::services(1);
    let mut first = pipeline(&config, &online, StaticModelStore::default()).await;
    let mut candidates = vec![Candidate::new("Foo")];
    first
        .run(&mut candidates, "", &mut settings(&[("langcode", "en"), ("article", "article_id")]))
        .await
        .unwrap();
    first.shutdown().await.unwrap();
    assert_eq!(online.request_count(), 1);

    let offline = MockTransport::offline();
    let mut second = pipeline(&config, &offline, StaticModelStore::default()).await;
    let mut candidates = vec![Candidate::new("Foo")];
    second
        .run(&mut candidates, "", &mut settings(&[("langcode", "en"), ("article", "article_id")]))
        .await
        .unwrap();
    second.shutdown().await.unwrap();

    assert_eq!(offline.request_count(), 0);
    assert_eq!(candidates[0].article_id, Some(42));
}

#[tokio::test]
async fn test_shared_titles_fetched_once() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let transport = MockTransport::services(1);
    let mut pipeline = pipeline(&config, &transport, StaticModelStore::default()).await;

    let mut candidates: Vec<Candidate> = ["Foo", "Bar", "Foo", "Foo", "Bar"]
        .into_iter()
        .map(Candidate::new)
        .collect();
    pipeline
        .run(&mut candidates, "", &mut settings(&[("langcode", "en"), ("article", "Definition")]))
        .await
        .unwrap();
    pipeline.shutdown().await.unwrap();

    let mut titles: Vec<String> = transport
        .requests_to(ENTITY_URL)
        .iter()
        .filter_map(|r| r.query_value("title").map(String::from))
        .collect();
    titles.sort();
    assert_eq!(titles, vec!["Bar", "Foo"]);
    assert_eq!(candidates[2].definition.as_deref(), Some("Foo is a test article."));
}

#[tokio::test]
async fn test_definition_allow_list() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let transport = MockTransport::services(1);
    let mut pipeline = pipeline(&config, &transport, StaticModelStore::default()).await;

    let mut candidate = Candidate::new("Foo");
    candidate.extra.insert("fromTitle".into(), true.into());
    let mut candidates = vec![candidate];
    pipeline
        .run(&mut candidates, "", &mut settings(&[("langcode", "en"), ("article", "Definition")]))
        .await
        .unwrap();
    pipeline.shutdown().await.unwrap();

    let candidate = &candidates[0];
    assert_eq!(candidate.definition.as_deref(), Some("Foo is a test article."));
    for field in EnrichmentField::ALL {
        if field != EnrichmentField::Definition {
            assert!(!candidate.has_field(field), "{} should be filtered", field.as_str());
        }
    }
    assert!(!candidate.extra.contains_key("fromTitle"));
}

#[tokio::test]
async fn test_empty_article_setting_skips_entity_stage() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let transport = MockTransport::services(1);
    let mut pipeline = pipeline(&config, &transport, StaticModelStore::default()).await;

    let mut candidate = Candidate::new("Foo");
    candidate.extra.insert("fromTitle".into(), true.into());
    let mut candidates = vec![candidate];
    pipeline
        .run(&mut candidates, "", &mut settings(&[("langcode", "en"), ("article", ""), ("multi", "")]))
        .await
        .unwrap();
    pipeline.shutdown().await.unwrap();

    assert_eq!(transport.request_count(), 0);
    assert!(candidates[0].definition.is_none());
    assert!(candidates[0].extra.contains_key("fromTitle"));
}

#[tokio::test]
async fn test_unsupported_language_passes_through() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let transport = MockTransport::services(1);
    let mut pipeline = pipeline(&config, &transport, StaticModelStore::default()).await;

    let mut candidates = vec![Candidate::new("Fu")];
    pipeline
        .run(
            &mut candidates,
            "",
            &mut settings(&[("langcode", "de"), ("article", "Definition"), ("wikistats", REFERENCE_TS)]),
        )
        .await
        .unwrap();
    pipeline.shutdown().await.unwrap();

    assert_eq!(transport.request_count(), 0);
    assert_eq!(candidates[0], Candidate::new("Fu"));
}

// ============================================================================
// Statistics
// ============================================================================

#[tokio::test]
async fn test_statistics_features_feed_scoring() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let transport = MockTransport::services(2);
    let store = StaticModelStore::default().with_model(
        "stats",
        logistic_model(vec![0.1], -1.4),
        Some("en"),
        Some(&[WIKISTATS_WK]),
    );
    let mut pipeline = pipeline(&config, &transport, store).await;

    let mut candidates = vec![Candidate::new("Foo").with_features([("a", 1.0)])];
    let mut settings = settings(&[
        ("langcode", "en"),
        ("learning", "stats"),
        ("wikistats", REFERENCE_TS),
        ("features", ""),
    ]);
    pipeline.run(&mut candidates, "", &mut settings).await.unwrap();
    pipeline.shutdown().await.unwrap();

    let features = candidates[0].features.as_ref().unwrap();
    assert_eq!(features[WIKISTATS_WK], 14.0);
    assert_eq!(features[WIKISTATS_4WK], 56.0);
    assert_eq!(features[WIKISTATS_YEAR], 730.0);
    assert!((features[WIKISTATS_DAY_OF_WK] - 2.0 / 14.0).abs() < 1e-12);
    assert!(!features.contains_key("WIKISTATSDAY"));

    // 0.1 * 14 - 1.4 = 0
    assert!((candidates[0].learning_probability.unwrap() - 0.5).abs() < 1e-12);

    let stats_requests = transport.requests_to(STATS_URL);
    assert!(!stats_requests.is_empty());
    assert!(stats_requests
        .iter()
        .all(|r| r.url.starts_with("http://stats.test/json/en/") && r.url.ends_with("/Foo")));
    assert!(stats_requests.iter().any(|r| r.url.contains("/201303/")));
    assert!(stats_requests.iter().any(|r| r.url.contains("/201203/")));
}

#[tokio::test]
async fn test_statistics_failure_counts_as_zero() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let transport = MockTransport::failing();
    let mut pipeline = pipeline(&config, &transport, StaticModelStore::default()).await;

    let mut candidates = vec![Candidate::new("Foo")];
    pipeline
        .run(&mut candidates, "", &mut settings(&[("langcode", "en"), ("wikistats", REFERENCE_TS)]))
        .await
        .unwrap();
    pipeline.shutdown().await.unwrap();

    let features = candidates[0].features.as_ref().unwrap();
    assert_eq!(features[WIKISTATS_YEAR], 0.0);
    assert_eq!(features[WIKISTATS_DAY_OF_WK], 0.0);
}

// ============================================================================
// Assembly
// ============================================================================

#[tokio::test]
async fn test_build_pipeline_from_config() {
    let temp_dir = TempDir::new().unwrap();
    let config = test_config(temp_dir.path());
    let transport: Arc<dyn Transport> = Arc::new(MockTransport::offline());

    let mut pipeline = build_pipeline(&config, transport).await.unwrap();
    assert_eq!(
        pipeline.stage_names(),
        vec!["ArticlesStage", "StatisticsStage", "LearningStage"]
    );

    let description = pipeline.inspect();
    assert_eq!(
        description["StatisticsStage"]["nl"],
        "http://stats.test/json/nl/{YYYYMM}/{title}"
    );
    assert_eq!(description["ArticlesStage"]["threads"], 4);

    pipeline.shutdown().await.unwrap();
    assert!(config.cache_dir.join("en").join("article_cache.db").exists());
    assert!(config
        .cache_dir
        .join("nl")
        .join("wikipedia_statistics_cache.db")
        .exists());
}
