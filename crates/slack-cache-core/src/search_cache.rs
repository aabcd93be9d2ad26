//! Search-result cache keyed by normalized queries.
//!
//! [`SearchCache`] sits on two [`BoundedCache`]s:
//!
//! - a normalization cache mapping raw query strings to their [`SearchQuery`]
//!   (`query_ttl_ms`), whose hits and misses are the *query* counters
//! - a result cache mapping [`generate_cache_key`] keys to [`SearchResult`]s
//!   (`result_ttl_ms`, optionally scaled by complexity), whose hits and misses
//!   are the *result* counters
//!
//! Caching is best-effort. A query that does not normalize is a miss on
//! `get` and a no-op on `set`; nothing here returns an error after
//! construction.

use crate::cache::{BoundedCache, SetOptions, json_size};
use crate::config::{BoundedCacheConfig, SearchCacheConfig};
use crate::query::{
    QueryComplexity, QueryNormalizer, SearchOptions, SearchQuery, SearchQueryParser,
    generate_cache_key,
};
use crate::Result;
use chrono::{DateTime, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Metadata stored alongside cached results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResultMetadata {
    /// Total matches reported upstream (may exceed the stored results).
    pub total_count: usize,
    /// Whether upstream has further pages.
    pub has_more: bool,
    /// Upstream search duration in milliseconds.
    pub search_time_ms: u64,
    /// When the entry was cached.
    pub timestamp: DateTime<Utc>,
}

/// A cached result set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    /// Query the results belong to.
    pub query: SearchQuery,
    /// Result records, truncated to `max_results`.
    pub results: Vec<Value>,
    /// Counts and timing.
    pub metadata: SearchResultMetadata,
}

/// One entry for [`SearchCache::set`].
#[derive(Debug, Clone, Default)]
pub struct CacheWrite {
    query: String,
    results: Vec<Value>,
    options: Option<SearchOptions>,
    total_count: Option<usize>,
    has_more: Option<bool>,
    search_time: Duration,
}

impl CacheWrite {
    /// Results for a raw query.
    pub fn new(query: impl Into<String>, results: Vec<Value>) -> Self {
        Self {
            query: query.into(),
            results,
            ..Self::default()
        }
    }

    /// Options the search ran with.
    #[must_use]
    pub fn options(mut self, options: SearchOptions) -> Self {
        self.options = Some(options);
        self
    }

    /// Upstream total; defaults to the number of results.
    #[must_use]
    pub const fn total_count(mut self, total: usize) -> Self {
        self.total_count = Some(total);
        self
    }

    /// Upstream has-more flag; defaults to `total_count > stored results`.
    #[must_use]
    pub const fn has_more(mut self, has_more: bool) -> Self {
        self.has_more = Some(has_more);
        self
    }

    /// Upstream search duration.
    #[must_use]
    pub const fn search_time(mut self, elapsed: Duration) -> Self {
        self.search_time = elapsed;
        self
    }
}

/// What an invalidation pattern matches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationKind {
    /// Channel name or ID in the query filters or result records.
    Channel,
    /// User name or ID in the query filters or result records.
    User,
    /// A `YYYY-MM-DD` day inside the query's date range.
    Date,
    /// Regular expression over the normalized query.
    QueryPattern,
}

/// Criterion for [`SearchCache::invalidate_pattern`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationPattern {
    /// What to match on.
    pub kind: InvalidationKind,
    /// Value to match.
    pub value: String,
    /// Free-form reason, logged.
    #[serde(default)]
    pub reason: Option<String>,
}

impl InvalidationPattern {
    /// Pattern without a reason.
    pub fn new(kind: InvalidationKind, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
            reason: None,
        }
    }

    /// Attach a reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Counters reported by [`SearchCache::get_metrics`].
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SearchCacheMetrics {
    /// Raw queries found in the normalization cache.
    pub query_hits: u64,
    /// Raw queries that had to be normalized.
    pub query_misses: u64,
    /// Result-set lookups that hit.
    pub result_hits: u64,
    /// Result-set lookups that missed.
    pub result_misses: u64,
    /// Entries removed by pattern invalidation.
    pub invalidations: u64,
    /// Stores whose TTL was scaled by complexity.
    pub adaptive_ttl_adjustments: u64,
    /// Bytes held by cached result sets.
    pub memory_usage: usize,
    /// Mean complexity (simple 1, moderate 2, complex 3) over normalized queries.
    pub average_complexity: f64,
    /// Cached result sets.
    pub size: usize,
}

#[derive(Default)]
struct SearchStats {
    invalidations: AtomicU64,
    adaptive_ttl_adjustments: AtomicU64,
    complexity_total: AtomicU64,
    complexity_count: AtomicU64,
}

/// Result cache with query normalization and adaptive TTL.
pub struct SearchCache {
    config: SearchCacheConfig,
    normalizer: QueryNormalizer,
    queries: BoundedCache<String, SearchQuery>,
    results: BoundedCache<String, SearchResult>,
    stats: SearchStats,
}

impl std::fmt::Debug for SearchCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchCache")
            .field("config", &self.config)
            .field("size", &self.results.len())
            .finish_non_exhaustive()
    }
}

impl SearchCache {
    /// Build a cache around the given query parser.
    pub fn new(config: SearchCacheConfig, parser: Arc<dyn SearchQueryParser>) -> Result<Self> {
        config.validate()?;
        let normalizer = QueryNormalizer::new(parser, config.complexity_thresholds);
        let queries = BoundedCache::new(BoundedCacheConfig {
            max: config.max_queries,
            ttl_ms: config.query_ttl_ms,
            max_size: None,
            update_age_on_get: true,
        })?;
        let results = BoundedCache::builder(BoundedCacheConfig {
            max: config.max_queries,
            ttl_ms: config.result_ttl_ms,
            max_size: config.max_memory,
            update_age_on_get: false,
        })
        .size_calculator(|value: &SearchResult, _key: &String| json_size(value))
        .build()?;

        info!(
            max_queries = config.max_queries,
            max_results = config.max_results,
            adaptive_ttl = config.adaptive_ttl,
            "created search cache"
        );
        Ok(Self {
            config,
            normalizer,
            queries,
            results,
            stats: SearchStats::default(),
        })
    }

    /// The configuration this cache was built with.
    pub const fn config(&self) -> &SearchCacheConfig {
        &self.config
    }

    /// Normalize a raw query through the normalization cache.
    pub fn resolve_query(&self, raw: &str) -> Result<SearchQuery> {
        let key = raw.to_string();
        let query = match self.queries.get(&key) {
            Some(query) => query,
            None => {
                let query = self.normalizer.normalize(raw)?;
                self.queries.set(key, query.clone(), SetOptions::default());
                query
            },
        };
        self.stats
            .complexity_total
            .fetch_add(u64::from(query.complexity.numeric()), Ordering::Relaxed);
        self.stats.complexity_count.fetch_add(1, Ordering::Relaxed);
        Ok(query)
    }

    /// TTL a result set for a query of the given complexity is stored with.
    ///
    /// `Duration::ZERO` means the entry never expires.
    pub fn effective_ttl(&self, complexity: QueryComplexity) -> Duration {
        let base = Duration::from_millis(self.config.result_ttl_ms);
        if !self.config.adaptive_ttl {
            return base;
        }
        let m = self.config.ttl_multipliers;
        let factor = match complexity {
            QueryComplexity::Simple => m.simple,
            QueryComplexity::Moderate => m.moderate,
            QueryComplexity::Complex => m.complex,
        };
        base.mul_f64(factor)
    }

    /// Look up cached results; any failure is a miss.
    pub fn get(&self, raw: &str, options: Option<&SearchOptions>) -> Option<SearchResult> {
        let query = match self.resolve_query(raw) {
            Ok(query) => query,
            Err(e) => {
                warn!(error = %e, "query normalization failed, treating as cache miss");
                return None;
            },
        };
        let key = generate_cache_key(&query, options);
        let hit = self.results.get(&key);
        debug!(%key, hit = hit.is_some(), "search cache lookup");
        hit
    }

    /// Store results; returns whether they were cached.
    pub fn set(&self, write: CacheWrite) -> bool {
        let query = match self.resolve_query(&write.query) {
            Ok(query) => query,
            Err(e) => {
                warn!(error = %e, "query normalization failed, results not cached");
                return false;
            },
        };
        let key = generate_cache_key(&query, write.options.as_ref());

        let mut results = write.results;
        let total_count = write.total_count.unwrap_or(results.len());
        results.truncate(self.config.max_results);
        let has_more = write.has_more.unwrap_or(total_count > results.len());

        let ttl = self.effective_ttl(query.complexity);
        if ttl != Duration::from_millis(self.config.result_ttl_ms) {
            self.stats
                .adaptive_ttl_adjustments
                .fetch_add(1, Ordering::Relaxed);
        }

        let entry = SearchResult {
            query,
            results,
            metadata: SearchResultMetadata {
                total_count,
                has_more,
                search_time_ms: u64::try_from(write.search_time.as_millis()).unwrap_or(u64::MAX),
                timestamp: Utc::now(),
            },
        };
        let stored = self.results.set(key, entry, SetOptions::with_ttl(ttl));
        if !stored {
            warn!("search results not cached");
        }
        stored
    }

    /// Look up several queries independently.
    pub fn get_batch(&self, queries: &[&str]) -> HashMap<String, Option<SearchResult>> {
        queries
            .iter()
            .map(|raw| ((*raw).to_string(), self.get(raw, None)))
            .collect()
    }

    /// Store several result sets independently; returns how many were cached.
    pub fn set_batch(&self, writes: Vec<CacheWrite>) -> usize {
        writes.into_iter().map(|w| self.set(w)).filter(|ok| *ok).count()
    }

    /// Remove every result set matching `pattern`; returns the number removed.
    ///
    /// Returns `0` without touching the cache when pattern invalidation is
    /// disabled or the pattern cannot be interpreted.
    pub fn invalidate_pattern(&self, pattern: &InvalidationPattern) -> usize {
        if !self.config.enable_pattern_invalidation {
            debug!(kind = ?pattern.kind, "pattern invalidation disabled");
            return 0;
        }

        let removed = match pattern.kind {
            InvalidationKind::Channel => {
                let needle = pattern.value.trim_start_matches('#').to_lowercase();
                self.results.remove_where(|_, entry| {
                    entry.query.targets_channel(&needle)
                        || entry
                            .results
                            .iter()
                            .any(|record| record_refers_to(record, &["channel"], &needle))
                })
            },
            InvalidationKind::User => {
                let needle = pattern.value.trim_start_matches('@').to_lowercase();
                self.results.remove_where(|_, entry| {
                    entry.query.targets_user(&needle)
                        || entry
                            .results
                            .iter()
                            .any(|record| record_refers_to(record, &["user", "username"], &needle))
                })
            },
            InvalidationKind::Date => {
                match NaiveDate::parse_from_str(pattern.value.trim(), "%Y-%m-%d") {
                    Ok(day) => self.results.remove_where(|_, entry| {
                        entry.query.date_range.is_some_and(|range| range.contains(day))
                    }),
                    Err(e) => {
                        warn!(value = %pattern.value, error = %e, "invalid date pattern");
                        0
                    },
                }
            },
            InvalidationKind::QueryPattern => match Regex::new(&pattern.value) {
                Ok(re) => self
                    .results
                    .remove_where(|_, entry| re.is_match(&entry.query.normalized)),
                Err(e) => {
                    warn!(value = %pattern.value, error = %e, "invalid query pattern");
                    0
                },
            },
        };

        self.stats
            .invalidations
            .fetch_add(removed as u64, Ordering::Relaxed);
        info!(
            kind = ?pattern.kind,
            value = %pattern.value,
            reason = pattern.reason.as_deref().unwrap_or(""),
            removed,
            "invalidated search results"
        );
        removed
    }

    /// Invalidate results that mention a channel.
    pub fn invalidate_channel(&self, channel: &str) -> usize {
        self.invalidate_pattern(
            &InvalidationPattern::new(InvalidationKind::Channel, channel)
                .with_reason("channel changed"),
        )
    }

    /// Invalidate results that mention a user.
    pub fn invalidate_user(&self, user: &str) -> usize {
        self.invalidate_pattern(
            &InvalidationPattern::new(InvalidationKind::User, user).with_reason("user changed"),
        )
    }

    /// Drop all cached queries and results.
    pub fn clear(&self) {
        self.queries.clear();
        self.results.clear();
    }

    /// Drop expired queries and results; returns how many result sets went.
    pub fn purge_stale(&self) -> usize {
        self.queries.purge_stale();
        self.results.purge_stale()
    }

    /// Number of cached result sets.
    pub fn len(&self) -> usize {
        self.results.len()
    }

    /// Whether no result sets are cached.
    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Bytes held by cached result sets.
    pub fn memory_usage(&self) -> usize {
        self.results.memory_usage()
    }

    /// Metrics of the underlying result cache.
    pub fn result_cache_metrics(&self) -> crate::CacheMetrics {
        self.results.get_metrics()
    }

    /// Snapshot of search-specific counters.
    #[allow(clippy::cast_precision_loss)]
    pub fn get_metrics(&self) -> SearchCacheMetrics {
        let queries = self.queries.get_metrics();
        let results = self.results.get_metrics();
        let total = self.stats.complexity_total.load(Ordering::Relaxed);
        let count = self.stats.complexity_count.load(Ordering::Relaxed);
        SearchCacheMetrics {
            query_hits: queries.hits,
            query_misses: queries.misses,
            result_hits: results.hits,
            result_misses: results.misses,
            invalidations: self.stats.invalidations.load(Ordering::Relaxed),
            adaptive_ttl_adjustments: self.stats.adaptive_ttl_adjustments.load(Ordering::Relaxed),
            memory_usage: results.memory_usage,
            average_complexity: if count == 0 {
                0.0
            } else {
                total as f64 / count as f64
            },
            size: results.size,
        }
    }

    /// Zero all counters; cached entries are untouched.
    pub fn reset_metrics(&self) {
        self.queries.reset_metrics();
        self.results.reset_metrics();
        for counter in [
            &self.stats.invalidations,
            &self.stats.adaptive_ttl_adjustments,
            &self.stats.complexity_total,
            &self.stats.complexity_count,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

/// Whether a result record's `fields` name `needle` (already lower-cased).
///
/// Slack search matches carry `channel` as `{id, name}` and `user` as an ID.
fn record_refers_to(record: &Value, fields: &[&str], needle: &str) -> bool {
    fields.iter().any(|field| match record.get(*field) {
        Some(Value::String(s)) => s.trim_start_matches(['#', '@']).eq_ignore_ascii_case(needle),
        Some(Value::Object(obj)) => ["id", "name"].iter().any(|k| {
            obj.get(*k)
                .and_then(Value::as_str)
                .is_some_and(|s| s.eq_ignore_ascii_case(needle))
        }),
        _ => false,
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::query::SlackQueryParser;
    use serde_json::json;

    fn cache(config: SearchCacheConfig) -> SearchCache {
        SearchCache::new(config, Arc::new(SlackQueryParser)).unwrap()
    }

    fn plain_config() -> SearchCacheConfig {
        SearchCacheConfig {
            adaptive_ttl: false,
            result_ttl_ms: 1000,
            ..SearchCacheConfig::default()
        }
    }

    #[test]
    fn test_variant_spelling_hits_same_entry() {
        let cache = cache(plain_config());
        assert!(cache.set(CacheWrite::new("hello world", vec![json!({"id": "1"})]).total_count(1)));

        let hit = cache.get("HELLO   WORLD", None).unwrap();
        assert_eq!(hit.results, vec![json!({"id": "1"})]);
        assert_eq!(hit.metadata.total_count, 1);
        assert!(!hit.metadata.has_more);

        let metrics = cache.get_metrics();
        assert_eq!(metrics.result_hits, 1);
        assert_eq!(metrics.query_misses, 2);
        assert_eq!(metrics.size, 1);
        assert!(metrics.memory_usage > 0);
    }

    #[test]
    fn test_options_separate_entries() {
        let cache = cache(plain_config());
        let page2 = SearchOptions {
            page: Some(2),
            ..SearchOptions::default()
        };
        cache.set(CacheWrite::new("deploy", vec![json!({"id": "p2"})]).options(page2.clone()));
        assert!(cache.get("deploy", None).is_none());
        assert_eq!(cache.get("deploy", Some(&page2)).unwrap().results[0]["id"], "p2");
    }

    #[test]
    fn test_results_are_truncated() {
        let cache = cache(SearchCacheConfig {
            max_results: 2,
            ..plain_config()
        });
        let results = (0..5).map(|i| json!({ "id": i })).collect();
        cache.set(CacheWrite::new("many", results));
        let hit = cache.get("many", None).unwrap();
        assert_eq!(hit.results.len(), 2);
        assert_eq!(hit.metadata.total_count, 5);
        assert!(hit.metadata.has_more);
    }

    #[test]
    fn test_adaptive_ttl_orders_by_complexity() {
        let cache = cache(SearchCacheConfig {
            result_ttl_ms: 1000,
            ..SearchCacheConfig::default()
        });
        let simple = cache.effective_ttl(QueryComplexity::Simple);
        let moderate = cache.effective_ttl(QueryComplexity::Moderate);
        let complex = cache.effective_ttl(QueryComplexity::Complex);
        assert_eq!(simple, Duration::from_secs(3));
        assert_eq!(moderate, Duration::from_secs(2));
        assert_eq!(complex, Duration::from_secs(1));

        cache.set(CacheWrite::new("simple query", vec![]));
        cache.set(CacheWrite::new("(a OR b) AND c after:2024-01-01", vec![]));
        assert_eq!(cache.get_metrics().adaptive_ttl_adjustments, 1);
    }

    #[test]
    fn test_unparseable_query_is_a_miss() {
        let cache = cache(plain_config());
        assert!(!cache.set(CacheWrite::new("\"open", vec![json!({})])));
        assert!(cache.get("\"open", None).is_none());
        assert!(cache.is_empty());
    }

    #[test]
    fn test_batch_entries_are_independent() {
        let cache = cache(plain_config());
        let stored = cache.set_batch(vec![
            CacheWrite::new("alpha", vec![json!({"id": "a"})]),
            CacheWrite::new("(broken", vec![json!({"id": "x"})]),
            CacheWrite::new("beta", vec![json!({"id": "b"})]),
        ]);
        assert_eq!(stored, 2);

        let found = cache.get_batch(&["alpha", "(broken", "gamma"]);
        assert_eq!(found.len(), 3);
        assert!(found["alpha"].is_some());
        assert!(found["(broken"].is_none());
        assert!(found["gamma"].is_none());
    }

    #[test]
    fn test_channel_and_user_invalidation() {
        let cache = cache(plain_config());
        cache.set(CacheWrite::new("deploy in:#ops", vec![]));
        cache.set(CacheWrite::new(
            "outage",
            vec![json!({"channel": {"id": "C123", "name": "ops"}, "user": "U1"})],
        ));
        cache.set(CacheWrite::new("lunch in:#random", vec![]));

        assert_eq!(cache.invalidate_channel("#ops"), 2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.invalidate_user("U1"), 0);

        cache.set(CacheWrite::new("from:@alice notes", vec![]));
        cache.set(CacheWrite::new("notes", vec![json!({"user": "U9"})]));
        assert_eq!(cache.invalidate_user("u9"), 1);
        assert_eq!(cache.invalidate_user("alice"), 1);
        assert_eq!(cache.get_metrics().invalidations, 4);
    }

    #[test]
    fn test_date_and_regex_invalidation() {
        let cache = cache(plain_config());
        cache.set(CacheWrite::new("standup during:2024-03", vec![]));
        cache.set(CacheWrite::new("retro on:2024-05-01", vec![]));
        cache.set(CacheWrite::new("incident review", vec![]));

        let march = InvalidationPattern::new(InvalidationKind::Date, "2024-03-15");
        assert_eq!(cache.invalidate_pattern(&march), 1);
        let bad_date = InvalidationPattern::new(InvalidationKind::Date, "March");
        assert_eq!(cache.invalidate_pattern(&bad_date), 0);

        let bad_regex = InvalidationPattern::new(InvalidationKind::QueryPattern, "(");
        assert_eq!(cache.invalidate_pattern(&bad_regex), 0);
        let incident = InvalidationPattern::new(InvalidationKind::QueryPattern, "^incident");
        assert_eq!(cache.invalidate_pattern(&incident), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_disabled_invalidation_is_a_no_op() {
        let cache = cache(SearchCacheConfig {
            enable_pattern_invalidation: false,
            ..plain_config()
        });
        cache.set(CacheWrite::new("in:#ops", vec![]));
        assert_eq!(cache.invalidate_channel("ops"), 0);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_average_complexity_and_reset() {
        let cache = cache(plain_config());
        cache.get("one", None);
        cache.get("(a OR b) AND c after:2024-01-01", None);
        assert!((cache.get_metrics().average_complexity - 2.0).abs() < f64::EPSILON);

        cache.reset_metrics();
        assert_eq!(cache.get_metrics(), SearchCacheMetrics::default());
    }

    #[test]
    fn test_rejects_invalid_config() {
        let err = SearchCache::new(
            SearchCacheConfig {
                max_results: 0,
                ..SearchCacheConfig::default()
            },
            Arc::new(SlackQueryParser),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("Invalid search cache configuration"));
    }
}
