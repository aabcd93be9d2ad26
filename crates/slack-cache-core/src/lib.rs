//! # slack-cache-core
//!
//! Caching and relevance ranking for a Slack integration server.
//!
//! Slack API calls are slow and rate-limited, and search results come back in
//! Slack's own order. This crate keeps recently fetched entities and search
//! results in memory and re-ranks messages by lexical relevance, recency and
//! engagement.
//!
//! ## Architecture
//!
//! - **Bounded Cache** ([`BoundedCache`]): LRU with TTL, an entry ceiling, an
//!   optional byte ceiling, dispose hooks and metrics
//! - **Query Normalizer** ([`QueryNormalizer`]): canonical forms of Slack
//!   search queries so equivalent spellings share a cache entry
//! - **Search Cache** ([`SearchCache`]): result sets keyed by normalized
//!   query, with complexity-adaptive TTL and pattern invalidation
//! - **Cache Service** ([`CacheService`]): the five domain caches, cascading
//!   invalidation and aggregated metrics
//! - **Relevance Scorer** ([`RelevanceScorer`]): composite scoring and
//!   re-ranking over a tantivy index
//!
//! ## Quick Start
//!
//! ```rust
//! use slack_cache_core::{
//!     CacheServiceDependencies, CacheServiceFactory, CacheWrite, SetOptions,
//! };
//! use serde_json::json;
//!
//! let service = CacheServiceFactory::create_with_defaults(CacheServiceDependencies::default())?;
//!
//! service
//!     .get_channel_cache()
//!     .set("C024BE91L".into(), json!({"name": "general"}), SetOptions::default());
//!
//! let search = service.get_search_cache();
//! search.set(CacheWrite::new("deploy in:#ops", vec![json!({"ts": "1700000000.000100"})]));
//! assert!(search.get("in:#ops   DEPLOY", None).is_some());
//! # Ok::<(), slack_cache_core::Error>(())
//! ```
//!
//! ## Concurrency
//!
//! Cache and scorer calls are synchronous and run to completion; the async
//! methods on [`CacheService`] and [`MessageSearchService`] never suspend
//! inside the cache layer. No component schedules background work.

/// Bounded LRU cache with TTL and byte ceiling
pub mod cache;
/// Configuration structs and loading
pub mod config;
/// Error types and result aliases
pub mod error;
/// Tracing subscriber setup
pub mod logging;
/// Benchmark timer and process memory sampling
pub mod monitor;
/// Slack query parsing and normalization
pub mod query;
/// Relevance scoring and re-ranking
pub mod relevance;
/// Search-result cache
pub mod search_cache;
/// Cached, ranked search integration point
pub mod search_service;
/// Five-cache service and its factory
pub mod service;

pub use cache::{
    BoundedCache, BoundedCacheBuilder, CacheMetrics, DisposeCallback, DisposeReason, SetOptions,
    SizeCalculator, hit_rate, json_size,
};
pub use config::{
    BoundedCacheConfig, CacheServiceConfig, ComplexityThresholds, DomainCacheConfig,
    EngagementWeights, FieldBoosts, FileCacheConfig, RelevanceConfig, RelevanceWeights,
    SearchCacheConfig, TtlMultipliers,
};
pub use error::{Error, Result};
pub use logging::{LogFormat, init_tracing};
pub use monitor::{CachePerformanceMonitor, PerformanceReport};
pub use query::{
    DateRange, ParsedQuery, QueryComplexity, QueryNormalizer, SearchOptions, SearchQuery,
    SearchQueryParser, SlackQueryParser, generate_cache_key,
};
pub use relevance::{
    LexicalIndex, Message, RelevanceResult, RelevanceScore, RelevanceScorer, ServiceResult,
    TantivyLexicalIndex, TfidfScores,
};
pub use search_cache::{
    CacheWrite, InvalidationKind, InvalidationPattern, SearchCache, SearchCacheMetrics,
    SearchResult, SearchResultMetadata,
};
pub use search_service::{
    MessageSearchService, MessageSearcher, ResultRanker, SearchOutcome, SearchPage,
};
pub use service::{
    CacheInstanceInfo, CacheKind, CacheService, CacheServiceDependencies, CacheServiceFactory,
    CacheServiceMetrics, DomainCache, GlobalCacheMetrics, InstanceConfig, InstanceMetrics,
};
