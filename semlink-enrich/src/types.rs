//! Core record types flowing through the pipeline
//!
//! - [`Candidate`]: one mention-to-entity link, mutated by stages
//! - [`Settings`]: per-request string map controlling stage activation
//! - [`EnrichmentField`]: the entity fields the output filter may prune

use crate::normalize::{EntityRecord, Label, RelatedLink};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Feature name → numeric value
pub type FeatureMap = BTreeMap<String, f64>;

// ============================================================================
// Settings
// ============================================================================

/// Setting keys read by the stages
pub mod keys {
    /// Active language; selects caches and statistics URLs
    pub const LANGCODE: &str = "langcode";
    /// Model name to score with
    pub const LEARNING: &str = "learning";
    /// Tolerate missing model features
    pub const MISSING: &str = "missing";
    /// Allow-list of enrichment fields kept in the output
    pub const ARTICLE: &str = "article";
    /// Keep the raw feature map in the output
    pub const FEATURES: &str = "features";
    /// Prefetch entity data without attaching it
    pub const MULTI: &str = "multi";
    /// Enable page-view statistics; empty or a Unix timestamp
    pub const WIKISTATS: &str = "wikistats";
}

/// Per-request settings map
///
/// Keys are presence-tested; values are strings. JSON numbers and
/// booleans are accepted on input and kept in their textual form.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, Value>", into = "BTreeMap<String, String>")]
pub struct Settings(BTreeMap<String, String>);

impl Settings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn langcode(&self) -> Option<&str> {
        self.get(keys::LANGCODE)
    }
}

impl From<BTreeMap<String, Value>> for Settings {
    fn from(raw: BTreeMap<String, Value>) -> Self {
        Settings(
            raw.into_iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s,
                        Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    (k, v)
                })
                .collect(),
        )
    }
}

impl From<Settings> for BTreeMap<String, String> {
    fn from(settings: Settings) -> Self {
        settings.0
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Settings {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Settings(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

// ============================================================================
// Enrichment fields
// ============================================================================

/// Entity-data fields attached by the entity stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnrichmentField {
    ArticleId,
    ArticleTitle,
    Definition,
    InLinks,
    OutLinks,
    Labels,
    Images,
    ParentCategories,
}

impl EnrichmentField {
    pub const ALL: [EnrichmentField; 8] = [
        EnrichmentField::ArticleId,
        EnrichmentField::ArticleTitle,
        EnrichmentField::Definition,
        EnrichmentField::InLinks,
        EnrichmentField::OutLinks,
        EnrichmentField::Labels,
        EnrichmentField::Images,
        EnrichmentField::ParentCategories,
    ];

    /// Output field name
    pub fn as_str(&self) -> &'static str {
        match self {
            EnrichmentField::ArticleId => "article_id",
            EnrichmentField::ArticleTitle => "article_title",
            EnrichmentField::Definition => "definition",
            EnrichmentField::InLinks => "in_links",
            EnrichmentField::OutLinks => "out_links",
            EnrichmentField::Labels => "labels",
            EnrichmentField::Images => "images",
            EnrichmentField::ParentCategories => "parent_categories",
        }
    }

    /// Parse an allow-list token.
    ///
    /// Accepts service section names (`InLinks`) and output field names
    /// (`in_links`) alike: case and underscores are ignored.
    pub fn parse(token: &str) -> Option<Self> {
        let normalized: String = token
            .trim()
            .chars()
            .filter(|c| *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match normalized.as_str() {
            "articleid" => Some(EnrichmentField::ArticleId),
            "articletitle" => Some(EnrichmentField::ArticleTitle),
            "definition" => Some(EnrichmentField::Definition),
            "inlinks" => Some(EnrichmentField::InLinks),
            "outlinks" => Some(EnrichmentField::OutLinks),
            "labels" => Some(EnrichmentField::Labels),
            "images" => Some(EnrichmentField::Images),
            "parentcategories" => Some(EnrichmentField::ParentCategories),
            _ => None,
        }
    }
}

// ============================================================================
// Candidate
// ============================================================================

/// One mention-to-entity link
///
/// `title` is fixed at construction. Enrichment fields start absent and
/// are attached by stages; a field set back to `None` is dropped from
/// the serialized output. Upstream fields this pipeline does not know
/// about are kept verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub features: Option<FeatureMap>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_id: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub article_title: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub definition: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub in_links: Option<Vec<RelatedLink>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub out_links: Option<Vec<RelatedLink>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub labels: Option<Vec<Label>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_categories: Option<Vec<RelatedLink>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_probability: Option<f64>,

    /// Upstream pass-through fields (`fromTitle`, `fromRedirect`, offsets, ...)
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl Candidate {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Builder-style feature map
    pub fn with_features<I, K>(mut self, features: I) -> Self
    where
        I: IntoIterator<Item = (K, f64)>,
        K: Into<String>,
    {
        self.features = Some(features.into_iter().map(|(k, v)| (k.into(), v)).collect());
        self
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    /// Feature map, created empty if absent
    pub fn features_mut(&mut self) -> &mut FeatureMap {
        self.features.get_or_insert_with(FeatureMap::new)
    }

    /// Attach entity data, resetting every enrichment field first.
    ///
    /// Fields the record lacks get their placeholder value: `article_id`
    /// -1, empty title and definition, empty lists.
    pub fn apply_entity(&mut self, record: &EntityRecord) {
        self.article_id = Some(record.id.unwrap_or(-1));
        self.article_title = Some(record.title.clone().unwrap_or_default());
        self.definition = Some(record.definition.clone().unwrap_or_default());
        self.in_links = Some(record.in_links.clone());
        self.out_links = Some(record.out_links.clone());
        self.labels = Some(record.labels.clone());
        self.images = Some(record.images.clone());
        self.parent_categories = Some(record.parent_categories.clone());
    }

    pub fn has_field(&self, field: EnrichmentField) -> bool {
        match field {
            EnrichmentField::ArticleId => self.article_id.is_some(),
            EnrichmentField::ArticleTitle => self.article_title.is_some(),
            EnrichmentField::Definition => self.definition.is_some(),
            EnrichmentField::InLinks => self.in_links.is_some(),
            EnrichmentField::OutLinks => self.out_links.is_some(),
            EnrichmentField::Labels => self.labels.is_some(),
            EnrichmentField::Images => self.images.is_some(),
            EnrichmentField::ParentCategories => self.parent_categories.is_some(),
        }
    }

    pub fn clear_field(&mut self, field: EnrichmentField) {
        match field {
            EnrichmentField::ArticleId => self.article_id = None,
            EnrichmentField::ArticleTitle => self.article_title = None,
            EnrichmentField::Definition => self.definition = None,
            EnrichmentField::InLinks => self.in_links = None,
            EnrichmentField::OutLinks => self.out_links = None,
            EnrichmentField::Labels => self.labels = None,
            EnrichmentField::Images => self.images = None,
            EnrichmentField::ParentCategories => self.parent_categories = None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_settings_accept_non_string_values() {
        let settings: Settings = serde_json::from_value(json!({
            "langcode": "en",
            "wikistats": 1357000000,
            "features": null,
            "multi": true
        }))
        .unwrap();

        assert_eq!(settings.langcode(), Some("en"));
        assert_eq!(settings.get(keys::WIKISTATS), Some("1357000000"));
        assert_eq!(settings.get(keys::FEATURES), Some(""));
        assert!(settings.contains(keys::FEATURES));
        assert_eq!(settings.get(keys::MULTI), Some("true"));
    }

    #[test]
    fn test_enrichment_field_parse_accepts_both_spellings() {
        assert_eq!(EnrichmentField::parse("Definition"), Some(EnrichmentField::Definition));
        assert_eq!(EnrichmentField::parse("definition"), Some(EnrichmentField::Definition));
        assert_eq!(EnrichmentField::parse("InLinks"), Some(EnrichmentField::InLinks));
        assert_eq!(EnrichmentField::parse(" in_links "), Some(EnrichmentField::InLinks));
        assert_eq!(
            EnrichmentField::parse("ParentCategories"),
            Some(EnrichmentField::ParentCategories)
        );
        assert_eq!(EnrichmentField::parse("article_id"), Some(EnrichmentField::ArticleId));
        assert_eq!(EnrichmentField::parse("fromTitle"), None);
    }

    #[test]
    fn test_candidate_keeps_upstream_fields() {
        let candidate: Candidate = serde_json::from_value(json!({
            "title": "Amsterdam",
            "features": {"LEN": 9.0},
            "fromTitle": true,
            "offset": 12
        }))
        .unwrap();

        assert_eq!(candidate.title(), "Amsterdam");
        assert_eq!(candidate.extra.get("offset"), Some(&json!(12)));

        let out = serde_json::to_value(&candidate).unwrap();
        assert_eq!(out["fromTitle"], json!(true));
        assert!(out.get("article_id").is_none(), "absent fields are not serialized");
    }

    #[test]
    fn test_apply_empty_entity_uses_placeholders() {
        let mut candidate = Candidate::new("Foo");
        candidate.apply_entity(&EntityRecord::default());

        assert_eq!(candidate.article_id, Some(-1));
        assert_eq!(candidate.article_title.as_deref(), Some(""));
        assert_eq!(candidate.definition.as_deref(), Some(""));
        assert_eq!(candidate.in_links.as_ref().map(Vec::len), Some(0));
        assert_eq!(candidate.images.as_ref().map(Vec::len), Some(0));
        for field in EnrichmentField::ALL {
            assert!(candidate.has_field(field), "{} should be attached", field.as_str());
        }
    }

    #[test]
    fn test_clear_field() {
        let mut candidate = Candidate::new("Foo");
        candidate.apply_entity(&EntityRecord::default());
        candidate.clear_field(EnrichmentField::Labels);
        assert!(!candidate.has_field(EnrichmentField::Labels));
        assert!(candidate.has_field(EnrichmentField::Definition));
    }
}
