//! Entity-data stage
//!
//! Fetches article data (definition, links, labels, categories, images)
//! for every distinct candidate title from the entity-data service,
//! caching raw responses per language.
//!
//! Activation:
//! - prefetch in `prepare` when any of `article`, `features`, `learning`
//!   or `multi` is set
//! - attach fields in `finalize` when any of `article`, `features` or
//!   `learning` is set
//! - an `article` setting that is present but empty disables the stage

use crate::cache::PayloadCache;
use crate::error::EnrichResult;
use crate::normalize::{parse_entity_response, EntityRecord};
use crate::pool::{FetchPool, KeyFetcher, PendingFetch};
use crate::retry::{retry_with_policy, RetryPolicy};
use crate::stage::LinkStage;
use crate::transport::{HttpRequest, Transport};
use crate::types::{keys, Candidate, EnrichmentField, Settings};
use async_trait::async_trait;
use semlink_common::config::TomlConfig;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Cache source name for entity payloads
pub const CACHE_SOURCE: &str = "article";

const DEFINITION_LENGTH: &str = "definitionLength";

/// Upstream fields this stage removes unless allow-listed
const PASS_THROUGH_FIELDS: [&str; 2] = ["fromTitle", "fromRedirect"];

/// Entity-service settings for [`ArticlesStage`]
#[derive(Debug, Clone)]
pub struct ArticlesOptions {
    pub service_url: String,
    /// Langcode → source name sent as `wikipedia`; defaults to the langcode
    pub source_names: BTreeMap<String, String>,
    pub threads: usize,
}

impl ArticlesOptions {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            service_url: config.entity_service.url.clone(),
            source_names: config.entity_service.source_names.clone(),
            threads: config.threads,
        }
    }
}

pub struct ArticlesStage {
    options: ArticlesOptions,
    transport: Arc<dyn Transport>,
    caches: HashMap<String, Arc<PayloadCache>>,
    pool: FetchPool,
    pending: Option<PendingFetch<String, EntityRecord>>,
}

impl ArticlesStage {
    pub fn new(
        options: ArticlesOptions,
        transport: Arc<dyn Transport>,
        caches: HashMap<String, PayloadCache>,
    ) -> Self {
        Self {
            pool: FetchPool::new(options.threads),
            options,
            transport,
            caches: caches.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
            pending: None,
        }
    }

    /// Open one cache per configured language under `cache_dir`
    pub async fn open(config: &TomlConfig, transport: Arc<dyn Transport>) -> EnrichResult<Self> {
        let mut caches = HashMap::new();
        for langcode in &config.langcodes {
            let cache = PayloadCache::open(&config.cache_dir, langcode, CACHE_SOURCE).await?;
            info!(
                "Loaded {} articles for {} from cache",
                cache.len().await?,
                langcode
            );
            caches.insert(langcode.clone(), cache);
        }
        Ok(Self::new(ArticlesOptions::from_config(config), transport, caches))
    }

    fn source_name(&self, langcode: &str) -> String {
        self.options
            .source_names
            .get(langcode)
            .cloned()
            .unwrap_or_else(|| langcode.to_string())
    }

    /// Language served by this stage, if the request's is one
    fn active_language<'a>(&self, settings: &'a Settings) -> Option<&'a str> {
        settings
            .langcode()
            .filter(|lang| self.caches.contains_key(*lang))
    }

    async fn sync_caches(&self) -> EnrichResult<()> {
        for (langcode, cache) in &self.caches {
            info!("Saving {} articles for {} to cache", cache.len().await?, langcode);
            cache.sync().await?;
        }
        Ok(())
    }
}

fn article_disabled(settings: &Settings) -> bool {
    settings.get(keys::ARTICLE).is_some_and(str::is_empty)
}

fn prefetch_requested(settings: &Settings) -> bool {
    !article_disabled(settings)
        && [keys::ARTICLE, keys::FEATURES, keys::LEARNING, keys::MULTI]
            .iter()
            .any(|k| settings.contains(k))
}

fn enrichment_requested(settings: &Settings) -> bool {
    !article_disabled(settings)
        && [keys::ARTICLE, keys::FEATURES, keys::LEARNING]
            .iter()
            .any(|k| settings.contains(k))
}

/// Fields and pass-through flags named by the `article` allow-list
struct AllowList {
    fields: HashSet<EnrichmentField>,
    pass_through: HashSet<String>,
}

impl AllowList {
    fn parse(value: Option<&str>) -> Self {
        let mut fields = HashSet::new();
        let mut pass_through = HashSet::new();

        for token in value.unwrap_or("").split([',', ';']) {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }
            if PASS_THROUGH_FIELDS.contains(&token) {
                pass_through.insert(token.to_string());
            } else if let Some(field) = EnrichmentField::parse(token) {
                fields.insert(field);
            } else {
                debug!(token, "Ignoring unknown article field");
            }
        }

        Self {
            fields,
            pass_through,
        }
    }

    fn apply(&self, candidate: &mut Candidate) {
        for field in EnrichmentField::ALL {
            if !self.fields.contains(&field) {
                candidate.clear_field(field);
            }
        }
        for name in PASS_THROUGH_FIELDS {
            if !self.pass_through.contains(name) {
                candidate.extra.remove(name);
            }
        }
    }
}

#[async_trait]
impl LinkStage for ArticlesStage {
    fn name(&self) -> &'static str {
        "ArticlesStage"
    }

    async fn prepare(
        &mut self,
        candidates: &mut [Candidate],
        _text: &str,
        settings: &mut Settings,
    ) -> EnrichResult<()> {
        if candidates.is_empty() || !prefetch_requested(settings) {
            return Ok(());
        }
        let Some(langcode) = self.active_language(settings) else {
            return Ok(());
        };
        let Some(cache) = self.caches.get(langcode) else {
            return Ok(());
        };

        let fetcher = Arc::new(EntityFetcher {
            transport: Arc::clone(&self.transport),
            cache: Arc::clone(cache),
            service_url: self.options.service_url.clone(),
            source_name: self.source_name(langcode),
        });

        let titles = candidates.iter().map(|c| c.title().to_string());
        if let Some(stale) = self.pending.replace(self.pool.spawn(titles, fetcher)) {
            warn!("Previous entity prefetch was never joined, draining it");
            let _ = stale.join().await;
        }
        Ok(())
    }

    async fn finalize(
        &mut self,
        candidates: &mut [Candidate],
        _text: &str,
        settings: &mut Settings,
    ) -> EnrichResult<()> {
        let Some(pending) = self.pending.take() else {
            return Ok(());
        };
        let records = pending.join().await?;

        if enrichment_requested(settings) {
            let placeholder = EntityRecord::default();
            for candidate in candidates.iter_mut() {
                let record = records.get(candidate.title()).unwrap_or(&placeholder);
                candidate.apply_entity(record);
            }
        }

        self.sync_caches().await
    }

    async fn filter_output(
        &mut self,
        candidates: &mut [Candidate],
        _text: &str,
        settings: &mut Settings,
    ) -> EnrichResult<()> {
        if candidates.is_empty()
            || !prefetch_requested(settings)
            || self.active_language(settings).is_none()
        {
            return Ok(());
        }

        let allow = AllowList::parse(settings.get(keys::ARTICLE));
        for candidate in candidates.iter_mut() {
            allow.apply(candidate);
        }
        Ok(())
    }

    async fn discard(&mut self) {
        if let Some(pending) = self.pending.take() {
            let _ = pending.join().await;
        }
    }

    fn inspect(&self) -> serde_json::Value {
        let mut languages: Vec<&String> = self.caches.keys().collect();
        languages.sort();
        serde_json::json!({
            "service_url": self.options.service_url,
            "languages": languages,
            "threads": self.pool.workers(),
        })
    }

    async fn shutdown(&mut self) -> EnrichResult<()> {
        self.discard().await;
        for cache in self.caches.values() {
            cache.close().await?;
        }
        Ok(())
    }
}

// ============================================================================
// Fetcher
// ============================================================================

struct EntityFetcher {
    transport: Arc<dyn Transport>,
    cache: Arc<PayloadCache>,
    service_url: String,
    source_name: String,
}

impl EntityFetcher {
    fn request(&self, title: &str) -> HttpRequest {
        HttpRequest::get(&self.service_url)
            .with_query("wikipedia", &self.source_name)
            .with_query("title", title)
            .with_query("definition", "true")
            .with_query(DEFINITION_LENGTH, "LONG")
            .with_query("linkRelatedness", "true")
            .with_query("linkFormat", "HTML")
            .with_query("inLinks", "true")
            .with_query("outLinks", "true")
            .with_query("labels", "true")
            .with_query("parentCategories", "true")
    }

    /// Raw payload from cache or service; `None` when both attempts fail
    async fn payload(&self, title: &str) -> Option<String> {
        match self.cache.get(title).await {
            Ok(Some(payload)) => {
                debug!(title = %title, "Entity cache hit");
                return Some(payload);
            }
            Ok(None) => {}
            Err(e) => warn!(title = %title, error = %e, "Entity cache read failed"),
        }

        let full = self.request(title);
        let transport = self.transport.as_ref();
        let fetched = retry_with_policy(
            "entity lookup",
            RetryPolicy::entity(),
            |attempt| {
                // Some articles fail with a long definition; retry with the default
                let request = if attempt == 1 {
                    full.clone()
                } else {
                    full.clone().without_query(DEFINITION_LENGTH)
                };
                async move { transport.get(&request).await }
            },
            |_| true,
        )
        .await;

        match fetched {
            Ok(payload) => {
                if let Err(e) = self.cache.put(title, &payload).await {
                    warn!(title = %title, error = %e, "Entity cache write failed");
                }
                Some(payload)
            }
            Err(e) => {
                warn!(title = %title, error = %e, "Entity lookup failed, using empty record");
                None
            }
        }
    }
}

#[async_trait]
impl KeyFetcher for EntityFetcher {
    type Key = String;
    type Output = EntityRecord;

    async fn fetch(&self, title: &String) -> EntityRecord {
        let Some(payload) = self.payload(title).await else {
            return EntityRecord::default();
        };

        let record = match parse_entity_response(&payload) {
            Ok(record) => record,
            Err(e) => {
                warn!(title = %title, error = %e, "Malformed entity response, using empty record");
                return EntityRecord::default();
            }
        };

        match &record.title {
            None => warn!(
                title = %title,
                error = record.error.as_deref().unwrap_or("unknown"),
                "Entity service returned no article"
            ),
            Some(returned) if returned != title => {
                warn!(requested = %title, returned = %returned, "Entity title mismatch")
            }
            Some(_) => {}
        }

        record
    }
}
