//! Bounded fetch pool
//!
//! Resolves a deduplicated key set with at most N concurrent workers.
//! `spawn` returns immediately with a [`PendingFetch`] handle; the caller
//! awaits [`PendingFetch::join`] later, which only returns once every key
//! has a result. Stages spawn in `prepare` and join in `finalize`.

use crate::error::{EnrichError, EnrichResult};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;
use tokio::task::JoinSet;

/// Per-key fetch function
///
/// `fetch` is infallible: implementations absorb recoverable errors and
/// return an empty sentinel so one bad key cannot stall the pool.
#[async_trait]
pub trait KeyFetcher: Send + Sync + 'static {
    type Key: Clone + Eq + Hash + Debug + Send + Sync + 'static;
    type Output: Send + 'static;

    async fn fetch(&self, key: &Self::Key) -> Self::Output;
}

/// Fixed-size worker pool configuration
#[derive(Debug, Clone, Copy)]
pub struct FetchPool {
    workers: usize,
}

impl FetchPool {
    /// Pool with `workers` concurrent workers (at least 1)
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Start fetching `keys` in the background.
    ///
    /// Duplicate keys are collapsed before dispatch so each distinct key
    /// is fetched exactly once. Must be called from within a tokio runtime.
    pub fn spawn<F, I>(&self, keys: I, fetcher: Arc<F>) -> PendingFetch<F::Key, F::Output>
    where
        F: KeyFetcher,
        I: IntoIterator<Item = F::Key>,
    {
        let mut seen = HashSet::new();
        let queue: VecDeque<F::Key> = keys
            .into_iter()
            .filter(|k| seen.insert(k.clone()))
            .collect();

        let total = queue.len();
        let queue = Arc::new(Mutex::new(queue));
        let results = Arc::new(Mutex::new(HashMap::with_capacity(total)));
        let mut tasks = JoinSet::new();

        for worker_id in 0..self.workers.min(total) {
            let queue = Arc::clone(&queue);
            let results = Arc::clone(&results);
            let fetcher = Arc::clone(&fetcher);

            tasks.spawn(async move {
                let mut fetched = 0usize;
                loop {
                    let next = lock(&queue).pop_front();
                    let Some(key) = next else { break };

                    let output = fetcher.fetch(&key).await;
                    lock(&results).insert(key, output);
                    fetched += 1;
                }
                tracing::trace!(worker_id, fetched, "Fetch worker drained queue");
            });
        }

        tracing::debug!(keys = total, workers = tasks.len(), "Fetch pool started");

        PendingFetch {
            tasks,
            results,
            total,
            started: Instant::now(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A worker panicking mid-insert cannot leave the map half-written
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Handle on background fetches started by [`FetchPool::spawn`]
pub struct PendingFetch<K, V> {
    tasks: JoinSet<()>,
    results: Arc<Mutex<HashMap<K, V>>>,
    total: usize,
    started: Instant,
}

impl<K, V> PendingFetch<K, V>
where
    K: Eq + Hash + Send + 'static,
    V: Send + 'static,
{
    /// Number of distinct keys dispatched
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Wait for every worker to finish and take the result map.
    ///
    /// All workers are drained even when one of them panicked; the first
    /// panic is then reported as [`EnrichError::Worker`].
    pub async fn join(mut self) -> EnrichResult<HashMap<K, V>> {
        let mut failure = None;

        while let Some(outcome) = self.tasks.join_next().await {
            if let Err(e) = outcome {
                tracing::error!(error = %e, "Fetch worker failed");
                failure.get_or_insert_with(|| e.to_string());
            }
        }

        if let Some(reason) = failure {
            return Err(EnrichError::Worker(reason));
        }

        let results = std::mem::take(&mut *lock(&self.results));
        tracing::debug!(
            keys = self.total,
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "Fetch pool drained"
        );
        Ok(results)
    }
}
