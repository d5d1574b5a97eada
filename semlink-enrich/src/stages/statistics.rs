//! Page-view statistics stage
//!
//! With `wikistats` set, prefetches monthly page-view series for every
//! distinct title and adds the windowed view features to each candidate.

use crate::cache::PayloadCache;
use crate::error::EnrichResult;
use crate::normalize::{parse_monthly_views, MonthlyViews};
use crate::pool::{FetchPool, KeyFetcher, PendingFetch};
use crate::retry::{retry_with_policy, RetryPolicy};
use crate::stage::LinkStage;
use crate::stats::{prefetch_months, reference_time, MonthKey, WindowedViews};
use crate::transport::{FetchError, HttpRequest, Transport};
use crate::types::{keys, Candidate, FeatureMap, Settings};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use reqwest::Url;
use semlink_common::config::TomlConfig;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Cache source name for page-view payloads
pub const CACHE_SOURCE: &str = "wikipedia_statistics";

/// Statistics-service settings for [`StatisticsStage`]
#[derive(Debug, Clone)]
pub struct StatisticsOptions {
    pub base_url: String,
    pub threads: usize,
    /// Timeout of the first attempt per lookup; later attempts use the transport default
    pub first_attempt_timeout: Duration,
}

impl StatisticsOptions {
    pub fn from_config(config: &TomlConfig) -> Self {
        Self {
            base_url: config.statistics.base_url.clone(),
            threads: config.threads,
            first_attempt_timeout: config.http.stats_first_attempt_timeout(),
        }
    }
}

pub struct StatisticsStage {
    base_url: Url,
    first_attempt_timeout: Duration,
    transport: Arc<dyn Transport>,
    caches: HashMap<String, Arc<PayloadCache>>,
    pool: FetchPool,
    pending: Option<(NaiveDate, PendingFetch<MonthKey, MonthlyViews>)>,
}

impl StatisticsStage {
    pub fn new(
        options: StatisticsOptions,
        transport: Arc<dyn Transport>,
        caches: HashMap<String, PayloadCache>,
    ) -> EnrichResult<Self> {
        let base_url = Url::parse(&options.base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| {
                semlink_common::Error::Config(format!(
                    "statistics.base_url '{}' is not a valid base URL",
                    options.base_url
                ))
            })?;

        Ok(Self {
            base_url,
            first_attempt_timeout: options.first_attempt_timeout,
            transport,
            caches: caches.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
            pool: FetchPool::new(options.threads),
            pending: None,
        })
    }

    /// Open one cache per configured language under `cache_dir`
    pub async fn open(config: &TomlConfig, transport: Arc<dyn Transport>) -> EnrichResult<Self> {
        let mut caches = HashMap::new();
        for langcode in &config.langcodes {
            let cache = PayloadCache::open(&config.cache_dir, langcode, CACHE_SOURCE).await?;
            info!(
                "Loaded {} sets of statistics for {} from cache",
                cache.len().await?,
                langcode
            );
            caches.insert(langcode.clone(), cache);
        }
        Self::new(StatisticsOptions::from_config(config), transport, caches)
    }

    fn active_language<'a>(&self, settings: &'a Settings) -> Option<&'a str> {
        settings
            .langcode()
            .filter(|lang| self.caches.contains_key(*lang))
    }

    fn url_template(&self, langcode: &str) -> String {
        format!(
            "{}/{}/{{YYYYMM}}/{{title}}",
            self.base_url.as_str().trim_end_matches('/'),
            langcode
        )
    }

    async fn sync_caches(&self) -> EnrichResult<()> {
        for (langcode, cache) in &self.caches {
            info!(
                "Saving {} sets of statistics for {} to cache",
                cache.len().await?,
                langcode
            );
            cache.sync().await?;
        }
        Ok(())
    }
}

/// `<base>/<lang>/<YYYYMM>/<title>`, title percent-encoded as one segment
fn month_url(base: &Url, langcode: &str, key: &MonthKey) -> Url {
    let mut url = base.clone();
    if let Ok(mut segments) = url.path_segments_mut() {
        segments
            .pop_if_empty()
            .push(langcode)
            .push(&key.yyyymm())
            .push(&key.title);
    }
    url
}

fn window_features(
    reference: NaiveDate,
    title: &str,
    months: &HashMap<MonthKey, MonthlyViews>,
) -> FeatureMap {
    // Index this title's months once instead of hashing a key per day
    let by_month: HashMap<(i32, u32), &MonthlyViews> = months
        .iter()
        .filter(|(key, _)| key.title == title)
        .map(|(key, views)| ((key.year, key.month), views))
        .collect();

    WindowedViews::compute(reference, |day| {
        by_month
            .get(&(day.year(), day.month()))
            .map_or(0, |views| views.views_on(day))
    })
    .into_features()
}

#[async_trait]
impl LinkStage for StatisticsStage {
    fn name(&self) -> &'static str {
        "StatisticsStage"
    }

    async fn prepare(
        &mut self,
        candidates: &mut [Candidate],
        _text: &str,
        settings: &mut Settings,
    ) -> EnrichResult<()> {
        let Some(wikistats) = settings.get(keys::WIKISTATS) else {
            return Ok(());
        };
        if candidates.is_empty() {
            return Ok(());
        }
        let Some(langcode) = self.active_language(settings) else {
            return Ok(());
        };
        let Some(cache) = self.caches.get(langcode) else {
            return Ok(());
        };

        let reference = reference_time(wikistats, Utc::now()).date_naive();
        let lookups: Vec<MonthKey> = candidates
            .iter()
            .flat_map(|c| prefetch_months(reference, c.title()))
            .collect();

        let fetcher = Arc::new(StatsFetcher {
            transport: Arc::clone(&self.transport),
            cache: Arc::clone(cache),
            base_url: self.base_url.clone(),
            langcode: langcode.to_string(),
            first_attempt_timeout: self.first_attempt_timeout,
        });

        debug!(%reference, lookups = lookups.len(), "Prefetching page views");
        let pending = self.pool.spawn(lookups, fetcher);
        if let Some((_, stale)) = self.pending.replace((reference, pending)) {
            warn!("Previous statistics prefetch was never joined, draining it");
            let _ = stale.join().await;
        }
        Ok(())
    }

    async fn finalize(
        &mut self,
        candidates: &mut [Candidate],
        _text: &str,
        _settings: &mut Settings,
    ) -> EnrichResult<()> {
        let Some((reference, pending)) = self.pending.take() else {
            return Ok(());
        };
        let months = pending.join().await?;

        let mut by_title: HashMap<String, FeatureMap> = HashMap::new();
        for candidate in candidates.iter_mut() {
            let features = by_title
                .entry(candidate.title().to_string())
                .or_insert_with_key(|title| window_features(reference, title, &months));
            candidate.features_mut().extend(features.clone());
        }

        self.sync_caches().await
    }

    async fn discard(&mut self) {
        if let Some((_, pending)) = self.pending.take() {
            let _ = pending.join().await;
        }
    }

    fn inspect(&self) -> serde_json::Value {
        let templates: serde_json::Map<String, serde_json::Value> = self
            .caches
            .keys()
            .map(|lang| (lang.clone(), self.url_template(lang).into()))
            .collect();
        serde_json::Value::Object(templates)
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

struct StatsFetcher {
    transport: Arc<dyn Transport>,
    cache: Arc<PayloadCache>,
    base_url: Url,
    langcode: String,
    first_attempt_timeout: Duration,
}

impl StatsFetcher {
    /// One monthly lookup; errors surface to the caller after retries
    async fn lookup(&self, key: &MonthKey) -> EnrichResult<MonthlyViews> {
        let url = month_url(&self.base_url, &self.langcode, key).to_string();

        if let Some(payload) = self.cache.get(&url).await? {
            match parse_monthly_views(&payload) {
                Ok(views) => {
                    debug!(url = %url, "Statistics cache hit");
                    return Ok(views);
                }
                Err(e) => warn!(url = %url, error = %e, "Cached page views unreadable, refetching"),
            }
        }

        let transport = self.transport.as_ref();
        let first_attempt_timeout = self.first_attempt_timeout;
        let url_ref = url.as_str();
        let payload = retry_with_policy(
            "statistics lookup",
            RetryPolicy::statistics(),
            |attempt| {
                let mut request = HttpRequest::get(url_ref);
                if attempt == 1 {
                    request = request.with_timeout(first_attempt_timeout);
                }
                async move { transport.get(&request).await }
            },
            FetchError::is_transient,
        )
        .await?;

        let views = parse_monthly_views(&payload)?;
        self.cache.put(&url, &payload).await?;
        Ok(views)
    }
}

#[async_trait]
impl KeyFetcher for StatsFetcher {
    type Key = MonthKey;
    type Output = MonthlyViews;

    async fn fetch(&self, key: &MonthKey) -> MonthlyViews {
        match self.lookup(key).await {
            Ok(views) => views,
            Err(e) => {
                warn!(
                    title = %key.title,
                    month = %key.yyyymm(),
                    error = %e,
                    "Page-view lookup failed, counting month as zero"
                );
                MonthlyViews::default()
            }
        }
    }
}
