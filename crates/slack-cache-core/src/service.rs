//! The cache service: five independent caches behind one composition root.
//!
//! [`CacheServiceFactory`] validates a [`CacheServiceConfig`] section by
//! section and builds a [`CacheService`] owning the `channels`, `users`,
//! `search`, `files` and `threads` caches. The caches share no storage;
//! cross-cache invalidation names each dependent cache explicitly.
//!
//! Nothing here schedules work. Callers that want periodic sweeps invoke
//! [`CacheService::perform_maintenance`] from their own scheduler.

use crate::cache::{BoundedCache, CacheMetrics, hit_rate, json_size};
use crate::config::{BoundedCacheConfig, CacheServiceConfig, SearchCacheConfig};
use crate::query::{SearchQueryParser, SlackQueryParser};
use crate::search_cache::{SearchCache, SearchCacheMetrics};
use crate::Result;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

/// Cache of Slack entities keyed by ID.
pub type DomainCache = BoundedCache<String, Value>;

/// Collaborators injected into the service.
#[derive(Clone)]
pub struct CacheServiceDependencies {
    /// Parser used by the search cache's normalizer.
    pub query_parser: Arc<dyn SearchQueryParser>,
}

impl Default for CacheServiceDependencies {
    fn default() -> Self {
        Self {
            query_parser: Arc::new(SlackQueryParser::new()),
        }
    }
}

impl std::fmt::Debug for CacheServiceDependencies {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheServiceDependencies").finish_non_exhaustive()
    }
}

/// Builds validated [`CacheService`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheServiceFactory;

impl CacheServiceFactory {
    /// Validate every section, then build the five caches.
    ///
    /// Fails with [`Error::InvalidCacheConfig`](crate::Error::InvalidCacheConfig)
    /// naming the first invalid section.
    pub fn create(
        config: CacheServiceConfig,
        dependencies: CacheServiceDependencies,
    ) -> Result<CacheService> {
        config.validate()?;
        let channels = domain_cache(config.channels.to_bounded())?;
        let users = domain_cache(config.users.to_bounded())?;
        let search = SearchCache::new(config.search.clone(), dependencies.query_parser)?;
        let files = domain_cache(config.files.to_bounded())?;
        let threads = domain_cache(config.threads.to_bounded())?;

        info!(
            enable_metrics = config.enable_metrics,
            global_memory_limit = config.global_memory_limit,
            "created cache service"
        );
        Ok(CacheService {
            config,
            channels,
            users,
            search,
            files,
            threads,
            metrics_enabled: AtomicBool::new(false),
        })
    }

    /// Build a service with the default configuration.
    pub fn create_with_defaults(dependencies: CacheServiceDependencies) -> Result<CacheService> {
        Self::create(CacheServiceConfig::default(), dependencies)
    }
}

fn domain_cache(config: BoundedCacheConfig) -> Result<DomainCache> {
    BoundedCache::builder(config)
        .size_calculator(|value: &Value, _key: &String| json_size(value))
        .build()
}

/// Kind of cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheKind {
    /// A plain bounded LRU cache.
    Lru,
    /// The search cache.
    Search,
}

/// Configuration of one instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InstanceConfig {
    /// Domain cache settings.
    Lru(BoundedCacheConfig),
    /// Search cache settings.
    Search(SearchCacheConfig),
}

/// Metrics of one instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum InstanceMetrics {
    /// Domain cache counters.
    Lru(CacheMetrics),
    /// Search cache counters.
    Search(SearchCacheMetrics),
}

/// Description of one of the service's caches.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheInstanceInfo {
    /// `channels`, `users`, `search`, `files` or `threads`.
    pub name: &'static str,
    /// Instance kind.
    #[serde(rename = "type")]
    pub kind: CacheKind,
    /// Settings.
    pub config: InstanceConfig,
    /// Counters.
    pub metrics: InstanceMetrics,
    /// Live entries.
    pub size: usize,
    /// Computed bytes held.
    pub memory_usage: usize,
}

/// Totals across all five caches.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GlobalCacheMetrics {
    /// Summed computed bytes.
    pub total_memory_usage: usize,
    /// Summed hits.
    pub total_hits: u64,
    /// Summed misses.
    pub total_misses: u64,
    /// `total_hits / (total_hits + total_misses) * 100`, or `0`.
    pub overall_hit_rate: f64,
    /// Configured advisory ceiling.
    pub memory_limit: usize,
    /// Whether usage is above the ceiling.
    pub memory_limit_exceeded: bool,
}

/// Per-cache and global metrics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CacheServiceMetrics {
    /// Channel cache.
    pub channels: CacheMetrics,
    /// User cache.
    pub users: CacheMetrics,
    /// Search cache.
    pub search: SearchCacheMetrics,
    /// File cache.
    pub files: CacheMetrics,
    /// Thread cache.
    pub threads: CacheMetrics,
    /// Totals.
    pub global: GlobalCacheMetrics,
}

/// Owner of the five caches.
#[derive(Debug)]
pub struct CacheService {
    config: CacheServiceConfig,
    channels: DomainCache,
    users: DomainCache,
    search: SearchCache,
    files: DomainCache,
    threads: DomainCache,
    metrics_enabled: AtomicBool,
}

impl CacheService {
    /// Configuration the service was built with.
    pub const fn config(&self) -> &CacheServiceConfig {
        &self.config
    }

    /// Channel metadata keyed by channel ID.
    pub const fn get_channel_cache(&self) -> &DomainCache {
        &self.channels
    }

    /// User profiles keyed by user ID.
    pub const fn get_user_cache(&self) -> &DomainCache {
        &self.users
    }

    /// Search results.
    pub const fn get_search_cache(&self) -> &SearchCache {
        &self.search
    }

    /// File metadata keyed by file ID.
    pub const fn get_file_cache(&self) -> &DomainCache {
        &self.files
    }

    /// Thread replies keyed by `<channel_id>:<thread_ts>`.
    pub const fn get_thread_cache(&self) -> &DomainCache {
        &self.threads
    }

    /// Whether `initialize` ran with `enable_metrics` set.
    ///
    /// Counters are kept either way; this tells the host whether to export them.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_enabled.load(Ordering::Relaxed)
    }

    /// Start a fresh metrics window when `enable_metrics` is set.
    #[tracing::instrument(skip(self))]
    #[allow(clippy::unused_async)]
    pub async fn initialize(&self) -> Result<()> {
        if self.config.enable_metrics {
            self.reset_metrics();
            self.metrics_enabled.store(true, Ordering::Relaxed);
        }
        info!(metrics = self.config.enable_metrics, "cache service initialized");
        Ok(())
    }

    /// Purge expired entries from every cache; live entries stay.
    #[tracing::instrument(skip(self))]
    #[allow(clippy::unused_async)]
    pub async fn perform_maintenance(&self) -> Result<()> {
        let purged = self.channels.purge_stale()
            + self.users.purge_stale()
            + self.search.purge_stale()
            + self.files.purge_stale()
            + self.threads.purge_stale();
        debug!(purged, "maintenance sweep finished");
        self.check_memory_limit();
        Ok(())
    }

    /// Clear every cache and stop metrics collection.
    #[tracing::instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<()> {
        self.clear_all().await?;
        self.metrics_enabled.store(false, Ordering::Relaxed);
        info!("cache service shut down");
        Ok(())
    }

    /// Clear every cache; the service stays usable.
    #[tracing::instrument(skip(self))]
    #[allow(clippy::unused_async)]
    pub async fn clear_all(&self) -> Result<()> {
        self.channels.clear();
        self.users.clear();
        self.search.clear();
        self.files.clear();
        self.threads.clear();
        debug!("cleared all caches");
        Ok(())
    }

    /// Drop a channel and everything that depends on it.
    ///
    /// Removes the channel entry, its threads, every file whose `channels`
    /// list includes it, and search results filtered on or mentioning it.
    /// Returns the total removed.
    #[tracing::instrument(skip(self))]
    #[allow(clippy::unused_async)]
    pub async fn invalidate_by_channel(&self, channel_id: &str) -> Result<usize> {
        let mut removed = usize::from(self.channels.delete(&channel_id.to_string()));

        let prefix = format!("{channel_id}:");
        removed += self.threads.remove_where(|key, _| key.starts_with(&prefix));
        removed += self
            .files
            .remove_where(|_, file| array_contains(file, "channels", channel_id));
        removed += self.search.invalidate_channel(channel_id);

        info!(channel_id, removed, "invalidated channel");
        Ok(removed)
    }

    /// Drop a user and everything that depends on them.
    #[tracing::instrument(skip(self))]
    #[allow(clippy::unused_async)]
    pub async fn invalidate_by_user(&self, user_id: &str) -> Result<usize> {
        let mut removed = usize::from(self.users.delete(&user_id.to_string()));
        removed += self
            .files
            .remove_where(|_, file| file.get("user").and_then(Value::as_str) == Some(user_id));
        removed += self.search.invalidate_user(user_id);

        info!(user_id, removed, "invalidated user");
        Ok(removed)
    }

    /// Describe all five caches.
    pub fn get_cache_instances(&self) -> Vec<CacheInstanceInfo> {
        let lru = |name, cache: &DomainCache| {
            let metrics = cache.get_metrics();
            CacheInstanceInfo {
                name,
                kind: CacheKind::Lru,
                config: InstanceConfig::Lru(cache.config().clone()),
                size: metrics.size,
                memory_usage: metrics.memory_usage,
                metrics: InstanceMetrics::Lru(metrics),
            }
        };
        let search_metrics = self.search.get_metrics();
        vec![
            lru("channels", &self.channels),
            lru("users", &self.users),
            CacheInstanceInfo {
                name: "search",
                kind: CacheKind::Search,
                config: InstanceConfig::Search(self.search.config().clone()),
                size: search_metrics.size,
                memory_usage: search_metrics.memory_usage,
                metrics: InstanceMetrics::Search(search_metrics),
            },
            lru("files", &self.files),
            lru("threads", &self.threads),
        ]
    }

    /// Per-cache metrics plus global totals.
    pub fn get_metrics(&self) -> CacheServiceMetrics {
        let channels = self.channels.get_metrics();
        let users = self.users.get_metrics();
        let search = self.search.get_metrics();
        let files = self.files.get_metrics();
        let threads = self.threads.get_metrics();

        let domain = [&channels, &users, &files, &threads];
        let total_hits = domain.iter().map(|m| m.hits).sum::<u64>() + search.result_hits;
        let total_misses = domain.iter().map(|m| m.misses).sum::<u64>() + search.result_misses;
        let total_memory_usage =
            domain.iter().map(|m| m.memory_usage).sum::<usize>() + search.memory_usage;
        let memory_limit = self.config.global_memory_limit;

        CacheServiceMetrics {
            global: GlobalCacheMetrics {
                total_memory_usage,
                total_hits,
                total_misses,
                overall_hit_rate: hit_rate(total_hits, total_misses),
                memory_limit,
                memory_limit_exceeded: total_memory_usage > memory_limit,
            },
            channels,
            users,
            search,
            files,
            threads,
        }
    }

    /// Summed computed bytes across all caches.
    pub fn total_memory_usage(&self) -> usize {
        self.channels.memory_usage()
            + self.users.memory_usage()
            + self.search.memory_usage()
            + self.files.memory_usage()
            + self.threads.memory_usage()
    }

    /// Warn when usage is above the advisory ceiling; returns whether it is.
    pub fn check_memory_limit(&self) -> bool {
        let usage = self.total_memory_usage();
        let limit = self.config.global_memory_limit;
        let exceeded = usage > limit;
        if exceeded {
            warn!(usage, limit, "cache memory above global limit");
        }
        exceeded
    }

    /// Zero every cache's counters.
    pub fn reset_metrics(&self) {
        self.channels.reset_metrics();
        self.users.reset_metrics();
        self.search.reset_metrics();
        self.files.reset_metrics();
        self.threads.reset_metrics();
    }
}

fn array_contains(value: &Value, field: &str, needle: &str) -> bool {
    value
        .get(field)
        .and_then(Value::as_array)
        .is_some_and(|items| items.iter().any(|v| v.as_str() == Some(needle)))
}
