//! Scripted transport recording every request

use super::fixtures::{entity_xml, monthly_views_json, ENTITY_URL, STATS_URL};
use async_trait::async_trait;
use semlink_enrich::transport::{FetchError, HttpRequest, Transport};
use std::sync::{Arc, Mutex};

type Handler = dyn Fn(&HttpRequest) -> Result<String, FetchError> + Send + Sync;

/// Transport answering from a closure instead of the network
#[derive(Clone)]
pub struct MockTransport {
    handler: Arc<Handler>,
    requests: Arc<Mutex<Vec<HttpRequest>>>,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&HttpRequest) -> Result<String, FetchError> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
            requests: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Every request fails with HTTP 500
    pub fn failing() -> Self {
        Self::new(|request| {
            Err(FetchError::Status {
                status: 500,
                url: request.url.clone(),
            })
        })
    }

    /// Any request is a test failure
    pub fn offline() -> Self {
        Self::new(|request| Err(FetchError::Network(format!("unexpected request to {}", request.url))))
    }

    /// Both test services: entity XML with id 42 for any title, and
    /// `views_per_day` page views for every day of any month
    pub fn services(views_per_day: u64) -> Self {
        Self::new(move |request| {
            if request.url.starts_with(ENTITY_URL) {
                let title = request.query_value("title").unwrap_or_default();
                return Ok(entity_xml(42, title));
            }
            if request.url.starts_with(STATS_URL) {
                // .../<lang>/<YYYYMM>/<title>
                let yyyymm = request.url.rsplit('/').nth(1).unwrap_or_default();
                let year = yyyymm[..4].parse().unwrap();
                let month = yyyymm[4..].parse().unwrap();
                return Ok(monthly_views_json(year, month, views_per_day));
            }
            Err(FetchError::Network(format!("no route for {}", request.url)))
        })
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    /// Requests whose URL starts with `prefix`
    pub fn requests_to(&self, prefix: &str) -> Vec<HttpRequest> {
        self.requests()
            .into_iter()
            .filter(|r| r.url.starts_with(prefix))
            .collect()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn get(&self, request: &HttpRequest) -> Result<String, FetchError> {
        self.requests.lock().unwrap().push(request.clone());
        (self.handler)(request)
    }
}
