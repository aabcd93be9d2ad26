//! Cached, ranked message search.
//!
//! [`MessageSearchService`] is the integration point between the caches, the
//! upstream search call and the relevance scorer:
//!
//! 1. look the query up in the [`SearchCache`](crate::SearchCache)
//! 2. on a miss, call the [`MessageSearcher`]
//! 3. re-rank with the [`ResultRanker`], keeping upstream order if it fails
//! 4. store the results, ignoring cache failures
//!
//! Ranking and caching never make a search fail. Only an upstream failure
//! is returned to the caller.

use crate::query::SearchOptions;
use crate::relevance::RelevanceScorer;
use crate::search_cache::CacheWrite;
use crate::service::CacheService;
use crate::Result;
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, warn};

/// One page of upstream search results.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchPage {
    /// Result records in upstream order.
    pub results: Vec<Value>,
    /// Total matches upstream.
    pub total_count: usize,
    /// Whether further pages exist.
    pub has_more: bool,
}

/// The upstream search call (for example Slack's `search.messages`).
#[async_trait]
pub trait MessageSearcher: Send + Sync {
    /// Run `query` upstream.
    async fn search(&self, query: &str, options: Option<&SearchOptions>) -> Result<SearchPage>;
}

/// Re-orders result records by relevance.
#[async_trait]
pub trait ResultRanker: Send + Sync {
    /// Return the same records, reordered.
    async fn rerank(&self, results: Vec<Value>, query: &str) -> Result<Vec<Value>>;
}

#[async_trait]
impl ResultRanker for RelevanceScorer {
    async fn rerank(&self, results: Vec<Value>, query: &str) -> Result<Vec<Value>> {
        self.rerank_results(results, query).await
    }
}

/// Results of one search call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchOutcome {
    /// Result records.
    pub results: Vec<Value>,
    /// Total matches upstream.
    pub total_count: usize,
    /// Whether further pages exist.
    pub has_more: bool,
    /// Whether the results came from the cache.
    pub cache_hit: bool,
    /// Whether this call re-ranked the results.
    pub ranked: bool,
}

/// Search with caching and ranking.
pub struct MessageSearchService {
    caches: Arc<CacheService>,
    searcher: Arc<dyn MessageSearcher>,
    ranker: Option<Arc<dyn ResultRanker>>,
}

impl std::fmt::Debug for MessageSearchService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageSearchService")
            .field("ranked", &self.ranker.is_some())
            .finish_non_exhaustive()
    }
}

impl MessageSearchService {
    /// Service without ranking.
    pub fn new(caches: Arc<CacheService>, searcher: Arc<dyn MessageSearcher>) -> Self {
        Self {
            caches,
            searcher,
            ranker: None,
        }
    }

    /// Re-rank fresh results with `ranker`.
    #[must_use]
    pub fn with_ranker(mut self, ranker: Arc<dyn ResultRanker>) -> Self {
        self.ranker = Some(ranker);
        self
    }

    /// Search, serving from and filling the search cache.
    #[tracing::instrument(skip(self, options))]
    pub async fn search(
        &self,
        query: &str,
        options: Option<&SearchOptions>,
    ) -> Result<SearchOutcome> {
        let cache = self.caches.get_search_cache();
        if let Some(hit) = cache.get(query, options) {
            debug!(results = hit.results.len(), "served from search cache");
            return Ok(SearchOutcome {
                total_count: hit.metadata.total_count,
                has_more: hit.metadata.has_more,
                results: hit.results,
                cache_hit: true,
                ranked: false,
            });
        }

        let started = Instant::now();
        let page = self.searcher.search(query, options).await?;
        let elapsed = started.elapsed();

        let (results, ranked) = self.rank(page.results, query).await;

        let mut write = CacheWrite::new(query, results.clone())
            .total_count(page.total_count)
            .has_more(page.has_more)
            .search_time(elapsed);
        if let Some(options) = options {
            write = write.options(options.clone());
        }
        if !cache.set(write) {
            debug!("search results not cached");
        }

        Ok(SearchOutcome {
            results,
            total_count: page.total_count,
            has_more: page.has_more,
            cache_hit: false,
            ranked,
        })
    }

    /// Run several searches concurrently; each succeeds or fails on its own.
    pub async fn search_batch(&self, queries: &[&str]) -> Vec<Result<SearchOutcome>> {
        futures::future::join_all(queries.iter().map(|q| self.search(q, None))).await
    }

    async fn rank(&self, original: Vec<Value>, query: &str) -> (Vec<Value>, bool) {
        let Some(ranker) = &self.ranker else {
            return (original, false);
        };
        match ranker.rerank(original.clone(), query).await {
            Ok(ranked) if ranked.len() == original.len() => (ranked, true),
            Ok(ranked) => {
                warn!(
                    expected = original.len(),
                    got = ranked.len(),
                    "ranker changed result count, keeping upstream order"
                );
                (original, false)
            },
            Err(e) => {
                warn!(error = %e, "ranking failed, keeping upstream order");
                (original, false)
            },
        }
    }
}
