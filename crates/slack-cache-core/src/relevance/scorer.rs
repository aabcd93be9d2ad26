//! Composite relevance scoring and re-ranking.
//!
//! Each message gets five sub-scores:
//!
//! | Signal       | Range    | Source                                         |
//! |--------------|----------|------------------------------------------------|
//! | `tfidf`      | 0..=1    | lexical index score divided by the set's max   |
//! | `time_decay` | 0..=1    | `2^(-age_hours / half_life)`                   |
//! | `engagement` | >= 0     | weighted reactions, replies and mentions       |
//! | `urgency`    | 0..=1    | configured urgency keywords                    |
//! | `importance` | 0..=1    | pins, files, broadcasts, thread parents        |
//!
//! The composite is the weighted sum. Entries that are not JSON objects
//! score zero everywhere instead of failing the whole call.

use super::index::{LexicalDocument, LexicalIndex, TantivyLexicalIndex};
use super::message::{Message, parse_timestamp};
use crate::cache::{BoundedCache, SetOptions};
use crate::config::{BoundedCacheConfig, FieldBoosts, RelevanceConfig};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use tracing::{debug, warn};

const IMPORTANCE_PINNED: f64 = 0.4;
const IMPORTANCE_FILES: f64 = 0.2;
const IMPORTANCE_BROADCAST: f64 = 0.2;
const IMPORTANCE_THREAD_PARENT: f64 = 0.2;
const URGENCY_PER_KEYWORD: f64 = 0.5;

const CONFIDENCE_LEXICAL: f64 = 0.4;
const CONFIDENCE_TIMESTAMP: f64 = 0.3;
const CONFIDENCE_ENGAGEMENT: f64 = 0.3;

/// Lexical scores aligned with the input messages.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TfidfScores {
    /// One score per message, `0..=1`.
    pub scores: Vec<f64>,
    /// Boosts the index ran with.
    pub field_boosts: FieldBoosts,
    /// Whether the scores came from the memo cache.
    pub cache_hit: bool,
}

/// All sub-scores of one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct RelevanceScore {
    /// Lexical match, normalized by the best match in the set.
    pub tfidf_score: f64,
    /// Recency, `0..=1`.
    pub time_decay_score: f64,
    /// Weighted reactions, replies and mentions.
    pub engagement_score: f64,
    /// Urgency keywords, `0..=1`.
    pub urgency_score: f64,
    /// Pins, files, broadcasts and thread parents, `0..=1`.
    pub importance_score: f64,
    /// Weighted sum of the five sub-scores.
    pub composite_score: f64,
    /// How much signal was available, `0..=1`.
    pub confidence: f64,
}

/// Scores for a message set, aligned by position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelevanceResult {
    /// One entry per input message.
    pub scores: Vec<RelevanceScore>,
}

/// Tagged outcome for callers that branch instead of propagating errors.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ServiceResult<T> {
    /// The call succeeded.
    Success {
        /// Payload.
        data: T,
    },
    /// The call failed.
    Error {
        /// What went wrong.
        message: String,
        /// HTTP-style status, `>= 400`.
        code: u16,
    },
}

impl<T> ServiceResult<T> {
    /// Whether this is a success.
    pub const fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }
}

impl<T> From<Result<T>> for ServiceResult<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => Self::Success { data },
            Err(e) => Self::Error {
                message: e.to_string(),
                code: e.status_code(),
            },
        }
    }
}

/// Scores and re-ranks Slack messages.
pub struct RelevanceScorer {
    config: RelevanceConfig,
    index: Mutex<Box<dyn LexicalIndex>>,
    tfidf_cache: BoundedCache<String, Vec<f64>>,
    urgency_keywords: HashSet<String>,
}

impl std::fmt::Debug for RelevanceScorer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelevanceScorer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RelevanceScorer {
    /// Scorer backed by an in-memory tantivy index.
    pub fn new(config: RelevanceConfig) -> Result<Self> {
        config.validate()?;
        let index = TantivyLexicalIndex::new(config.field_boosts, config.fuzzy_distance)?;
        Self::with_index(config, Box::new(index))
    }

    /// Scorer backed by a caller-supplied index.
    pub fn with_index(config: RelevanceConfig, index: Box<dyn LexicalIndex>) -> Result<Self> {
        config.validate()?;
        let tfidf_cache = BoundedCache::new(BoundedCacheConfig {
            max: config.cache_max_entries,
            ttl_ms: config.cache_ttl_ms,
            max_size: None,
            update_age_on_get: false,
        })?;
        let urgency_keywords = config
            .urgency_keywords
            .iter()
            .map(|k| k.to_lowercase())
            .collect();
        Ok(Self {
            config,
            index: Mutex::new(index),
            tfidf_cache,
            urgency_keywords,
        })
    }

    /// Active configuration.
    pub const fn config(&self) -> &RelevanceConfig {
        &self.config
    }

    /// Lexical scores for `messages` against `query`, normalized by the best match.
    pub fn calculate_tfidf_score(&self, messages: &[Value], query: &str) -> Result<TfidfScores> {
        let field_boosts = self.config.field_boosts;
        if query.trim().is_empty() || messages.is_empty() {
            return Ok(TfidfScores {
                scores: vec![0.0; messages.len()],
                field_boosts,
                cache_hit: false,
            });
        }

        let key = memo_key(messages, query)?;
        if let Some(scores) = self.tfidf_cache.get(&key) {
            debug!(messages = messages.len(), "lexical scores served from cache");
            return Ok(TfidfScores {
                scores,
                field_boosts,
                cache_hit: true,
            });
        }

        let documents: Vec<LexicalDocument> = messages
            .iter()
            .map(|value| {
                Message::from_json_lossy(value)
                    .map(|m| LexicalDocument {
                        text: m.text,
                        user: m.user,
                    })
                    .unwrap_or_default()
            })
            .collect();

        let hits = {
            let mut index = self.index.lock();
            index.replace_all(&documents)?;
            index.search(query, documents.len())?
        };

        let mut scores = vec![0.0; messages.len()];
        for hit in &hits {
            if let Some(slot) = scores.get_mut(hit.position) {
                *slot = f64::from(hit.score);
            }
        }
        let max = scores.iter().copied().fold(0.0_f64, f64::max);
        if max > 0.0 {
            for score in &mut scores {
                *score /= max;
            }
        }

        self.tfidf_cache
            .set(key, scores.clone(), SetOptions::default());
        Ok(TfidfScores {
            scores,
            field_boosts,
            cache_hit: false,
        })
    }

    /// Recency score in `[0, 1]`; `0` for unparseable timestamps.
    pub fn calculate_time_decay(&self, timestamp: &str) -> f64 {
        self.time_decay_at(timestamp, Utc::now())
    }

    /// Recency score relative to `now`.
    #[allow(clippy::cast_precision_loss)]
    pub fn time_decay_at(&self, timestamp: &str, now: DateTime<Utc>) -> f64 {
        let Some(ts) = parse_timestamp(timestamp) else {
            return 0.0;
        };
        let age_hours = (now - ts).num_milliseconds().max(0) as f64 / 3_600_000.0;
        let decay = (-age_hours / self.config.decay_half_life_hours).exp2();
        if decay.is_finite() {
            decay.clamp(0.0, 1.0)
        } else {
            0.0
        }
    }

    /// Weighted reactions, replies and mentions; `0` with no engagement.
    #[allow(clippy::cast_precision_loss)]
    pub fn calculate_engagement_score(&self, message: &Message) -> f64 {
        let w = self.config.engagement;
        message.reaction_count as f64 * w.reaction
            + message.reply_count as f64 * w.reply
            + message.mention_count() as f64 * w.mention
    }

    /// Share of urgency keywords present, capped at `1`.
    #[allow(clippy::cast_precision_loss)]
    pub fn calculate_urgency_score(&self, message: &Message) -> f64 {
        let text = message.text.to_lowercase();
        let matched: HashSet<&str> = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| self.urgency_keywords.contains(*word))
            .collect();
        (matched.len() as f64 * URGENCY_PER_KEYWORD).min(1.0)
    }

    /// Structural importance: pins, files, broadcasts and thread parents.
    pub fn calculate_importance_score(&self, message: &Message) -> f64 {
        let mut score = 0.0;
        if message.pinned {
            score += IMPORTANCE_PINNED;
        }
        if message.file_count > 0 {
            score += IMPORTANCE_FILES;
        }
        if message.has_broadcast() {
            score += IMPORTANCE_BROADCAST;
        }
        if message.is_thread_parent {
            score += IMPORTANCE_THREAD_PARENT;
        }
        f64::min(score, 1.0)
    }

    /// Every sub-score, the composite and a confidence per message.
    pub fn calculate_relevance(&self, messages: &[Value], query: &str) -> Result<RelevanceResult> {
        let tfidf = self.calculate_tfidf_score(messages, query)?;
        let now = Utc::now();
        let w = self.config.weights;

        let scores = messages
            .iter()
            .zip(tfidf.scores)
            .map(|(value, tfidf_score)| {
                let Some(message) = Message::from_json_lossy(value) else {
                    return RelevanceScore::default();
                };
                let time_decay_score = message
                    .timestamp
                    .as_deref()
                    .map_or(0.0, |ts| self.time_decay_at(ts, now));
                let engagement_score = self.calculate_engagement_score(&message);
                let urgency_score = self.calculate_urgency_score(&message);
                let importance_score = self.calculate_importance_score(&message);
                let composite_score = w.tfidf * tfidf_score
                    + w.time_decay * time_decay_score
                    + w.engagement * engagement_score
                    + w.urgency * urgency_score
                    + w.importance * importance_score;

                let mut confidence = 0.0;
                if tfidf_score > 0.0 {
                    confidence += CONFIDENCE_LEXICAL;
                }
                if time_decay_score > 0.0 {
                    confidence += CONFIDENCE_TIMESTAMP;
                }
                if message.has_engagement() {
                    confidence += CONFIDENCE_ENGAGEMENT;
                }

                RelevanceScore {
                    tfidf_score,
                    time_decay_score,
                    engagement_score,
                    urgency_score,
                    importance_score,
                    composite_score,
                    confidence,
                }
            })
            .collect();
        Ok(RelevanceResult { scores })
    }

    /// Reorder `results` by descending composite score.
    ///
    /// Records are returned untouched; ties keep their original order.
    #[allow(clippy::unused_async)]
    pub async fn rerank_results(&self, results: Vec<Value>, query: &str) -> Result<Vec<Value>> {
        let relevance = self.calculate_relevance(&results, query)?;
        let mut ranked: Vec<(f64, Value)> = relevance
            .scores
            .iter()
            .map(|s| s.composite_score)
            .zip(results)
            .collect();
        ranked.sort_by(|a, b| b.0.total_cmp(&a.0));
        Ok(ranked.into_iter().map(|(_, value)| value).collect())
    }

    /// Boundary wrapper over [`calculate_relevance`](Self::calculate_relevance).
    ///
    /// Expects `{"messages": [...], "query": "..."}`.
    pub fn calculate_relevance_service(&self, input: &Value) -> ServiceResult<RelevanceResult> {
        let result = parse_service_input(input)
            .and_then(|(messages, query)| self.calculate_relevance(messages, query));
        if let Err(e) = &result {
            warn!(error = %e, "relevance calculation failed");
        }
        result.into()
    }
}

fn parse_service_input(input: &Value) -> Result<(&[Value], &str)> {
    let messages = input
        .get("messages")
        .and_then(Value::as_array)
        .ok_or_else(|| Error::InvalidInput("messages must be an array".into()))?;
    let query = input
        .get("query")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::InvalidInput("query must be a string".into()))?;
    Ok((messages.as_slice(), query))
}

fn memo_key(messages: &[Value], query: &str) -> Result<String> {
    let mut hasher = Sha256::new();
    hasher.update(query.as_bytes());
    hasher.update(b"\0");
    hasher.update(serde_json::to_vec(messages)?);
    Ok(format!("{:x}", hasher.finalize()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::config::RelevanceWeights;
    use crate::relevance::index::LexicalHit;
    use chrono::Duration;
    use proptest::prelude::*;
    use serde_json::json;

    fn scorer() -> RelevanceScorer {
        RelevanceScorer::new(RelevanceConfig::default()).unwrap()
    }

    fn ts_hours_ago(hours: i64) -> String {
        let t = Utc::now() - Duration::hours(hours);
        format!("{}.000000", t.timestamp())
    }

    #[test]
    fn test_tfidf_alignment_and_cache() {
        let scorer = scorer();
        let messages = vec![
            json!({"text": "lunch at noon", "user": "bob"}),
            json!({"text": "deploy to production tonight", "user": "alice"}),
            json!(null),
        ];
        let first = scorer.calculate_tfidf_score(&messages, "deploy").unwrap();
        assert_eq!(first.scores.len(), 3);
        assert!(first.scores[0].abs() < f64::EPSILON);
        assert!((first.scores[1] - 1.0).abs() < 1e-9);
        assert!(first.scores[2].abs() < f64::EPSILON);
        assert!(!first.cache_hit);

        let second = scorer.calculate_tfidf_score(&messages, "deploy").unwrap();
        assert!(second.cache_hit);
        assert_eq!(second.scores, first.scores);
    }

    #[test]
    fn test_empty_query_scores_zero() {
        let scorer = scorer();
        let messages = vec![json!({"text": "anything"})];
        let scores = scorer.calculate_tfidf_score(&messages, "   ").unwrap();
        assert_eq!(scores.scores, vec![0.0]);
    }

    #[test]
    fn test_time_decay() {
        let scorer = scorer();
        let now = Utc::now();
        let fresh = scorer.time_decay_at(&format!("{}", now.timestamp()), now);
        assert!((fresh - 1.0).abs() < 1e-4);

        let day_old = scorer.time_decay_at(&ts_hours_ago(24), now);
        assert!((day_old - 0.5).abs() < 0.01);

        assert!(scorer.calculate_time_decay("invalid").abs() < f64::EPSILON);
        let ancient = scorer.calculate_time_decay("0.000001");
        assert!((0.0..1e-6).contains(&ancient));

        let future = scorer.time_decay_at(&ts_hours_ago(-5), now);
        assert!((future - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_engagement_floor_and_weights() {
        let scorer = scorer();
        let quiet = Message::from_json_lossy(&json!({
            "text": "nothing to see", "reactions": [], "reply_count": 0
        }))
        .unwrap();
        assert!(scorer.calculate_engagement_score(&quiet).abs() < f64::EPSILON);

        let busy = Message::from_json_lossy(&json!({
            "text": "ping <@U1>",
            "reactions": [{"name": "tada", "count": 2}],
            "reply_count": 2
        }))
        .unwrap();
        let expected = 2.0 * 0.3 + 2.0 * 0.5 + 0.2;
        assert!((scorer.calculate_engagement_score(&busy) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_urgency_and_importance() {
        let scorer = scorer();
        let urgent = Message {
            text: "URGENT: production outage, urgent!".into(),
            ..Message::default()
        };
        assert!((scorer.calculate_urgency_score(&urgent) - 1.0).abs() < f64::EPSILON);
        let calm = Message {
            text: "no rush".into(),
            ..Message::default()
        };
        assert!(scorer.calculate_urgency_score(&calm).abs() < f64::EPSILON);

        let important = Message {
            text: "<!channel> release notes".into(),
            pinned: true,
            file_count: 1,
            ..Message::default()
        };
        assert!((scorer.calculate_importance_score(&important) - 0.8).abs() < 1e-9);
    }

    #[test]
    fn test_relevance_composite_and_confidence() {
        let scorer = scorer();
        let messages = vec![
            json!({"text": "deploy finished", "ts": ts_hours_ago(1),
                   "reactions": [{"name": "rocket", "count": 1}]}),
            json!({"text": "deploy", "ts": "not a time"}),
            json!(42),
        ];
        let result = scorer.calculate_relevance(&messages, "deploy").unwrap();
        assert_eq!(result.scores.len(), 3);

        let full = result.scores[0];
        assert!((full.confidence - 1.0).abs() < 1e-9);
        let w = RelevanceWeights::default();
        let expected = w.tfidf * full.tfidf_score
            + w.time_decay * full.time_decay_score
            + w.engagement * full.engagement_score;
        assert!((full.composite_score - expected).abs() < 1e-9);

        let sparse = result.scores[1];
        assert!((sparse.confidence - 0.4).abs() < 1e-9);
        assert!(sparse.confidence < full.confidence);

        assert_eq!(result.scores[2], RelevanceScore::default());
    }

    #[tokio::test]
    async fn test_rerank_is_non_destructive() {
        let scorer = scorer();
        let results = vec![
            json!({"id": "a", "text": "coffee break", "ts": ts_hours_ago(48), "extra": {"k": 1}}),
            json!({"id": "b", "text": "deploy deploy deploy", "ts": ts_hours_ago(1)}),
            json!({"id": "c", "text": "unrelated", "ts": ts_hours_ago(200)}),
        ];
        let ranked = scorer.rerank_results(results.clone(), "deploy").await.unwrap();
        assert_eq!(ranked.len(), results.len());
        assert_eq!(ranked[0]["id"], "b");
        for original in &results {
            assert!(ranked.contains(original));
        }
    }

    #[test]
    fn test_service_wrapper_tags_errors() {
        let scorer = scorer();
        let bad = scorer.calculate_relevance_service(&json!({"messages": null, "query": "x"}));
        match bad {
            ServiceResult::Error { code, .. } => assert!(code >= 400),
            ServiceResult::Success { .. } => panic!("expected error"),
        }
        let missing_query = scorer.calculate_relevance_service(&json!({"messages": []}));
        assert!(!missing_query.is_success());

        let ok = scorer.calculate_relevance_service(&json!({
            "messages": [{"text": "hello"}], "query": "hello"
        }));
        assert!(ok.is_success());
        let tagged = serde_json::to_value(&ok).unwrap();
        assert_eq!(tagged["status"], "success");
    }

    #[test]
    fn test_unsupported_fuzzy_distance_fails_construction() {
        let config = RelevanceConfig {
            fuzzy_distance: 3,
            ..RelevanceConfig::default()
        };
        let err = RelevanceScorer::new(config).unwrap_err();
        assert_eq!(err.category(), "config");

        let fuzzy = RelevanceScorer::new(RelevanceConfig {
            fuzzy_distance: 2,
            ..RelevanceConfig::default()
        })
        .unwrap();
        let result = fuzzy
            .calculate_relevance(&[json!({"text": "deployment checklist"})], "deploymnt")
            .unwrap();
        assert!(result.scores[0].tfidf_score > 0.0);
    }

    #[test]
    fn test_weights_are_configurable() {
        let config = RelevanceConfig {
            weights: RelevanceWeights {
                tfidf: 0.0,
                time_decay: 0.0,
                engagement: 1.0,
                urgency: 0.0,
                importance: 0.0,
            },
            ..RelevanceConfig::default()
        };
        let scorer = RelevanceScorer::new(config).unwrap();
        let result = scorer
            .calculate_relevance(&[json!({"text": "x", "reply_count": 2})], "x")
            .unwrap();
        assert!((result.scores[0].composite_score - 1.0).abs() < 1e-9);
    }

    struct NoopIndex;

    impl LexicalIndex for NoopIndex {
        fn replace_all(&mut self, _documents: &[LexicalDocument]) -> Result<()> {
            Ok(())
        }

        fn search(&self, _query: &str, _limit: usize) -> Result<Vec<LexicalHit>> {
            Ok(Vec::new())
        }
    }

    #[test]
    fn test_custom_index_is_used() {
        let scorer =
            RelevanceScorer::with_index(RelevanceConfig::default(), Box::new(NoopIndex)).unwrap();
        let scores = scorer
            .calculate_tfidf_score(&[json!({"text": "deploy"})], "deploy")
            .unwrap();
        assert_eq!(scores.scores, vec![0.0]);
    }

    proptest! {
        #[test]
        fn test_time_decay_is_monotonic(a in 0i64..2_000_000_000, b in 0i64..2_000_000_000) {
            let scorer =
                RelevanceScorer::with_index(RelevanceConfig::default(), Box::new(NoopIndex))
                    .unwrap();
            let now = Utc::now();
            let (older, newer) = if a <= b { (a, b) } else { (b, a) };
            let d_old = scorer.time_decay_at(&older.to_string(), now);
            let d_new = scorer.time_decay_at(&newer.to_string(), now);
            prop_assert!(d_old <= d_new);
            prop_assert!((0.0..=1.0).contains(&d_old));
            prop_assert!(!d_old.is_nan());
        }
    }
}
