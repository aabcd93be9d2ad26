//! Configuration for the cache service, its five caches and the relevance scorer.
//!
//! Every component takes an explicit, validated configuration struct. All of
//! them deserialize from TOML with per-field defaults, so a file only needs to
//! name the values it changes.
//!
//! Durations are unsigned millisecond counts (`*_ttl_ms`). A negative TTL can
//! therefore never be constructed: it fails deserialization with
//! [`Error::Config`]. A TTL of `0` means "never expires".
//!
//! ## Example Configuration File
//!
//! ```toml
//! enable_metrics = true
//! global_memory_limit = 104857600
//!
//! [channels]
//! max = 1000
//! ttl_ms = 3600000
//! update_age_on_get = true
//!
//! [search]
//! max_queries = 200
//! adaptive_ttl = true
//!
//! [files]
//! max = 500
//! max_size = 52428800
//! ```
//!
//! ## Environment Overrides
//!
//! [`CacheServiceConfig::with_env_overrides`] reads:
//!
//! - `SLACK_CACHE_ENABLE_METRICS` (`true`/`false`)
//! - `SLACK_CACHE_GLOBAL_MEMORY_LIMIT` (bytes)
//! - `SLACK_CACHE_SEARCH_ADAPTIVE_TTL` (`true`/`false`)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

const MINUTE_MS: u64 = 60 * 1000;
const HOUR_MS: u64 = 60 * MINUTE_MS;

/// Largest Levenshtein distance the lexical index supports.
pub const MAX_FUZZY_DISTANCE: u8 = 2;

/// Settings for a single [`BoundedCache`](crate::BoundedCache).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BoundedCacheConfig {
    /// Maximum number of entries. Must be greater than zero.
    pub max: usize,
    /// Default time-to-live in milliseconds; `0` disables expiry.
    pub ttl_ms: u64,
    /// Optional ceiling on the summed computed size of all entries, in bytes.
    ///
    /// Requires a size calculator on the cache.
    pub max_size: Option<usize>,
    /// Promote an entry to most-recently-used and restart its TTL on `get`.
    pub update_age_on_get: bool,
}

impl Default for BoundedCacheConfig {
    fn default() -> Self {
        Self {
            max: 1000,
            ttl_ms: HOUR_MS,
            max_size: None,
            update_age_on_get: false,
        }
    }
}

impl BoundedCacheConfig {
    /// Default TTL as a [`Duration`], `None` when entries never expire.
    pub const fn default_ttl(&self) -> Option<Duration> {
        if self.ttl_ms == 0 {
            None
        } else {
            Some(Duration::from_millis(self.ttl_ms))
        }
    }

    /// Reject non-positive limits.
    pub fn validate(&self) -> Result<()> {
        if self.max == 0 {
            return Err(Error::Config("max must be greater than 0".into()));
        }
        if self.max_size == Some(0) {
            return Err(Error::Config("max_size must be greater than 0".into()));
        }
        Ok(())
    }
}

/// Settings shared by the channel, user and thread caches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DomainCacheConfig {
    /// Maximum number of entries.
    pub max: usize,
    /// Time-to-live in milliseconds; `0` disables expiry.
    pub ttl_ms: u64,
    /// Touch entries on read.
    pub update_age_on_get: bool,
}

impl Default for DomainCacheConfig {
    fn default() -> Self {
        Self {
            max: 1000,
            ttl_ms: HOUR_MS,
            update_age_on_get: true,
        }
    }
}

impl DomainCacheConfig {
    /// Build a domain cache config with the given limits.
    pub const fn new(max: usize, ttl_ms: u64) -> Self {
        Self {
            max,
            ttl_ms,
            update_age_on_get: true,
        }
    }

    /// Validate this section, naming it in the error.
    pub fn validate(&self, name: &str) -> Result<()> {
        if self.max == 0 {
            return Err(Error::invalid_cache_config(name, "max must be greater than 0"));
        }
        Ok(())
    }

    /// Convert into a bounded cache config.
    pub const fn to_bounded(&self) -> BoundedCacheConfig {
        BoundedCacheConfig {
            max: self.max,
            ttl_ms: self.ttl_ms,
            max_size: None,
            update_age_on_get: self.update_age_on_get,
        }
    }
}

/// Settings for the file metadata cache, which also carries a byte ceiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileCacheConfig {
    /// Maximum number of entries.
    pub max: usize,
    /// Time-to-live in milliseconds; `0` disables expiry.
    pub ttl_ms: u64,
    /// Optional byte ceiling (serialized JSON size of cached file records).
    pub max_size: Option<usize>,
}

impl Default for FileCacheConfig {
    fn default() -> Self {
        Self {
            max: 500,
            ttl_ms: 30 * MINUTE_MS,
            max_size: Some(50 * 1024 * 1024),
        }
    }
}

impl FileCacheConfig {
    /// Validate this section.
    pub fn validate(&self) -> Result<()> {
        if self.max == 0 {
            return Err(Error::invalid_cache_config("files", "max must be greater than 0"));
        }
        if self.max_size == Some(0) {
            return Err(Error::invalid_cache_config(
                "files",
                "max_size must be greater than 0",
            ));
        }
        Ok(())
    }

    /// Convert into a bounded cache config.
    pub const fn to_bounded(&self) -> BoundedCacheConfig {
        BoundedCacheConfig {
            max: self.max,
            ttl_ms: self.ttl_ms,
            max_size: self.max_size,
            update_age_on_get: true,
        }
    }
}

/// TTL multipliers applied to `result_ttl_ms` per query complexity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TtlMultipliers {
    /// Multiplier for simple queries.
    pub simple: f64,
    /// Multiplier for moderate queries.
    pub moderate: f64,
    /// Multiplier for complex queries.
    pub complex: f64,
}

impl Default for TtlMultipliers {
    fn default() -> Self {
        Self {
            simple: 3.0,
            moderate: 2.0,
            complex: 1.0,
        }
    }
}

/// Score cut-offs for query complexity classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplexityThresholds {
    /// Highest score still classified as simple.
    pub simple_max: u32,
    /// Highest score still classified as moderate.
    pub moderate_max: u32,
}

impl Default for ComplexityThresholds {
    fn default() -> Self {
        Self {
            simple_max: 5,
            moderate_max: 15,
        }
    }
}

/// Settings for the [`SearchCache`](crate::SearchCache).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchCacheConfig {
    /// Maximum number of cached result sets.
    pub max_queries: usize,
    /// Maximum number of result records kept per result set.
    pub max_results: usize,
    /// TTL of normalized-query entries in milliseconds.
    pub query_ttl_ms: u64,
    /// Base TTL of result sets in milliseconds.
    pub result_ttl_ms: u64,
    /// Scale the result TTL by query complexity.
    pub adaptive_ttl: bool,
    /// Allow channel/user/date/pattern invalidation.
    pub enable_pattern_invalidation: bool,
    /// Optional byte ceiling for cached result sets.
    pub max_memory: Option<usize>,
    /// Adaptive TTL multipliers.
    pub ttl_multipliers: TtlMultipliers,
    /// Complexity classification cut-offs.
    pub complexity_thresholds: ComplexityThresholds,
}

impl Default for SearchCacheConfig {
    fn default() -> Self {
        Self {
            max_queries: 100,
            max_results: 100,
            query_ttl_ms: 5 * MINUTE_MS,
            result_ttl_ms: 15 * MINUTE_MS,
            adaptive_ttl: true,
            enable_pattern_invalidation: true,
            max_memory: Some(20 * 1024 * 1024),
            ttl_multipliers: TtlMultipliers::default(),
            complexity_thresholds: ComplexityThresholds::default(),
        }
    }
}

impl SearchCacheConfig {
    /// Validate limits, multipliers and thresholds.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: &str| Err(Error::invalid_cache_config("search", reason));
        if self.max_queries == 0 {
            return invalid("max_queries must be greater than 0");
        }
        if self.max_results == 0 {
            return invalid("max_results must be greater than 0");
        }
        if self.max_memory == Some(0) {
            return invalid("max_memory must be greater than 0");
        }
        let m = self.ttl_multipliers;
        if [m.simple, m.moderate, m.complex]
            .iter()
            .any(|v| !v.is_finite() || *v <= 0.0)
        {
            return invalid("ttl multipliers must be positive");
        }
        if self.complexity_thresholds.simple_max > self.complexity_thresholds.moderate_max {
            return invalid("simple_max must not exceed moderate_max");
        }
        Ok(())
    }
}

/// Top-level configuration consumed by [`CacheServiceFactory`](crate::CacheServiceFactory).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheServiceConfig {
    /// Channel metadata cache.
    pub channels: DomainCacheConfig,
    /// User profile cache.
    pub users: DomainCacheConfig,
    /// Search result cache.
    pub search: SearchCacheConfig,
    /// File metadata cache.
    pub files: FileCacheConfig,
    /// Thread reply cache (keys are `<channel_id>:<thread_ts>`).
    pub threads: DomainCacheConfig,
    /// Advertise metrics to the host through
    /// [`CacheService::metrics_enabled`](crate::CacheService::metrics_enabled).
    ///
    /// Informational: counters are atomics that every cache keeps regardless,
    /// and `get_metrics` always reports them. The host decides whether to
    /// export them.
    pub enable_metrics: bool,
    /// Advisory process-wide memory ceiling in bytes.
    pub global_memory_limit: usize,
}

impl Default for CacheServiceConfig {
    fn default() -> Self {
        Self {
            channels: DomainCacheConfig::new(1000, HOUR_MS),
            users: DomainCacheConfig::new(500, 30 * MINUTE_MS),
            search: SearchCacheConfig::default(),
            files: FileCacheConfig::default(),
            threads: DomainCacheConfig::new(300, 30 * MINUTE_MS),
            enable_metrics: true,
            global_memory_limit: 100 * 1024 * 1024,
        }
    }
}

impl CacheServiceConfig {
    /// Validate each section in order, stopping at the first invalid one.
    pub fn validate(&self) -> Result<()> {
        self.channels.validate("channels")?;
        self.users.validate("users")?;
        self.search.validate()?;
        self.files.validate()?;
        self.threads.validate("threads")?;
        Ok(())
    }

    /// Parse and validate a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Apply `SLACK_CACHE_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(v) = parse_override::<bool>(&lookup, "SLACK_CACHE_ENABLE_METRICS") {
            self.enable_metrics = v;
        }
        if let Some(v) = parse_override::<usize>(&lookup, "SLACK_CACHE_GLOBAL_MEMORY_LIMIT") {
            self.global_memory_limit = v;
        }
        if let Some(v) = parse_override::<bool>(&lookup, "SLACK_CACHE_SEARCH_ADAPTIVE_TTL") {
            self.search.adaptive_ttl = v;
        }
        self
    }
}

fn parse_override<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
            None
        },
    }
}

/// Weights of the five composite-score components.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceWeights {
    /// Lexical relevance.
    pub tfidf: f64,
    /// Recency.
    pub time_decay: f64,
    /// Reactions, replies and mentions.
    pub engagement: f64,
    /// Urgency keywords.
    pub urgency: f64,
    /// Pins, files, broadcasts and thread parents.
    pub importance: f64,
}

impl Default for RelevanceWeights {
    fn default() -> Self {
        Self {
            tfidf: 0.4,
            time_decay: 0.25,
            engagement: 0.2,
            urgency: 0.1,
            importance: 0.05,
        }
    }
}

impl RelevanceWeights {
    fn as_array(&self) -> [f64; 5] {
        [
            self.tfidf,
            self.time_decay,
            self.engagement,
            self.urgency,
            self.importance,
        ]
    }

    /// Sum of all weights.
    pub fn total(&self) -> f64 {
        self.as_array().iter().sum()
    }
}

/// Per-signal weights of the engagement score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngagementWeights {
    /// Weight per reaction.
    pub reaction: f64,
    /// Weight per reply.
    pub reply: f64,
    /// Weight per mention.
    pub mention: f64,
}

impl Default for EngagementWeights {
    fn default() -> Self {
        Self {
            reaction: 0.3,
            reply: 0.5,
            mention: 0.2,
        }
    }
}

/// Per-field boosts of the lexical index.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldBoosts {
    /// Boost of the message text field.
    pub text: f32,
    /// Boost of the author field.
    pub user: f32,
}

impl Default for FieldBoosts {
    fn default() -> Self {
        Self {
            text: 2.0,
            user: 1.0,
        }
    }
}

/// Settings for the [`RelevanceScorer`](crate::RelevanceScorer).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelevanceConfig {
    /// Composite weights.
    pub weights: RelevanceWeights,
    /// Engagement weights.
    pub engagement: EngagementWeights,
    /// Half-life of the recency score in hours.
    pub decay_half_life_hours: f64,
    /// Lexical field boosts.
    pub field_boosts: FieldBoosts,
    /// Edit distance for fuzzy term expansion; `0` disables fuzzy matching.
    pub fuzzy_distance: u8,
    /// TTL of memoized lexical scores in milliseconds.
    pub cache_ttl_ms: u64,
    /// Maximum number of memoized lexical score sets.
    pub cache_max_entries: usize,
    /// Words that mark a message as urgent.
    pub urgency_keywords: Vec<String>,
}

impl Default for RelevanceConfig {
    fn default() -> Self {
        Self {
            weights: RelevanceWeights::default(),
            engagement: EngagementWeights::default(),
            decay_half_life_hours: 24.0,
            field_boosts: FieldBoosts::default(),
            fuzzy_distance: 1,
            cache_ttl_ms: 5 * MINUTE_MS,
            cache_max_entries: 100,
            urgency_keywords: [
                "urgent",
                "asap",
                "critical",
                "emergency",
                "blocker",
                "outage",
                "incident",
                "immediately",
            ]
            .iter()
            .map(ToString::to_string)
            .collect(),
        }
    }
}

impl RelevanceConfig {
    /// Reject negative or non-finite weights, a non-positive half-life and
    /// fuzzy distances the lexical index cannot run.
    pub fn validate(&self) -> Result<()> {
        let weights = self.weights.as_array();
        let engagement = [
            self.engagement.reaction,
            self.engagement.reply,
            self.engagement.mention,
        ];
        if weights
            .iter()
            .chain(engagement.iter())
            .any(|w| !w.is_finite() || *w < 0.0)
        {
            return Err(Error::Config(
                "relevance weights must be finite and non-negative".into(),
            ));
        }
        if !self.decay_half_life_hours.is_finite() || self.decay_half_life_hours <= 0.0 {
            return Err(Error::Config("decay half-life must be positive".into()));
        }
        if self.cache_max_entries == 0 {
            return Err(Error::Config(
                "relevance cache_max_entries must be greater than 0".into(),
            ));
        }
        if self.fuzzy_distance > MAX_FUZZY_DISTANCE {
            return Err(Error::Config(format!(
                "fuzzy_distance must be at most {MAX_FUZZY_DISTANCE}, got {}",
                self.fuzzy_distance
            )));
        }
        if !(self.field_boosts.text.is_finite() && self.field_boosts.user.is_finite()) {
            return Err(Error::Config("field boosts must be finite".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_validate() {
        CacheServiceConfig::default().validate().unwrap();
        RelevanceConfig::default().validate().unwrap();
        assert!((RelevanceWeights::default().total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_first_invalid_section_is_reported() {
        let mut config = CacheServiceConfig::default();
        config.channels.max = 0;
        config.files.max = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid channels cache configuration"));

        let mut config = CacheServiceConfig::default();
        config.search.max_results = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid search cache configuration"));
    }

    #[test]
    fn test_negative_ttl_is_rejected_at_parse_time() {
        let err = CacheServiceConfig::from_toml_str("[users]\nttl_ms = -5\n").unwrap_err();
        assert_eq!(err.category(), "config");
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = CacheServiceConfig::from_toml_str(
            "enable_metrics = false\n[channels]\nmax = 3\n[search]\nadaptive_ttl = false\n",
        )
        .unwrap();
        assert_eq!(config.channels.max, 3);
        assert_eq!(config.channels.ttl_ms, HOUR_MS);
        assert!(!config.enable_metrics);
        assert!(!config.search.adaptive_ttl);
        assert_eq!(config.users, CacheServiceConfig::default().users);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[threads]\nmax = 7").unwrap();
        let config = CacheServiceConfig::load(file.path()).unwrap();
        assert_eq!(config.threads.max, 7);

        let missing = CacheServiceConfig::load(Path::new("/definitely/not/here.toml"));
        assert!(matches!(missing, Err(Error::Io(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("SLACK_CACHE_ENABLE_METRICS", "false"),
            ("SLACK_CACHE_GLOBAL_MEMORY_LIMIT", "2048"),
            ("SLACK_CACHE_SEARCH_ADAPTIVE_TTL", "not-a-bool"),
        ]
        .into_iter()
        .collect();
        let config = CacheServiceConfig::default()
            .with_overrides(|key| env.get(key).map(ToString::to_string));
        assert!(!config.enable_metrics);
        assert_eq!(config.global_memory_limit, 2048);
        assert!(config.search.adaptive_ttl, "unparseable override is ignored");
    }

    #[test]
    fn test_search_config_rejects_bad_multipliers() {
        let mut config = SearchCacheConfig::default();
        config.ttl_multipliers.simple = 0.0;
        assert!(config.validate().is_err());

        let mut config = SearchCacheConfig::default();
        config.complexity_thresholds = ComplexityThresholds {
            simple_max: 20,
            moderate_max: 10,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relevance_config_rejects_negative_weights() {
        let mut config = RelevanceConfig::default();
        config.weights.engagement = -0.1;
        assert!(config.validate().is_err());

        let mut config = RelevanceConfig::default();
        config.decay_half_life_hours = 0.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_relevance_config_bounds_fuzzy_distance() {
        let mut config = RelevanceConfig::default();
        config.fuzzy_distance = MAX_FUZZY_DISTANCE;
        assert!(config.validate().is_ok());

        config.fuzzy_distance = 3;
        let err = config.validate().unwrap_err();
        assert_eq!(err.category(), "config");
        assert!(err.to_string().contains("fuzzy_distance"));

        let parsed: RelevanceConfig = toml::from_str("fuzzy_distance = 3").unwrap();
        assert!(parsed.validate().is_err());
    }
}
