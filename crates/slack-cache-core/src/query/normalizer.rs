//! Canonical query forms for cache keys.
//!
//! Two queries that differ only in term order, operator order, case or
//! spacing normalize to the same string and hash. Boolean operators keep
//! their original relative order because reordering them changes meaning.

use super::parser::{ParsedQuery, SearchQueryParser, SlackQueryParser};
use crate::config::ComplexityThresholds;
use crate::{Error, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

const TERM_WEIGHT: u32 = 1;
const PHRASE_WEIGHT: u32 = 2;
const OPERATOR_WEIGHT: u32 = 3;
const BOOLEAN_WEIGHT: u32 = 4;
const GROUP_WEIGHT: u32 = 5;
const DATE_RANGE_WEIGHT: u32 = 5;
const MULTI_FILTER_WEIGHT: u32 = 3;

/// Coarse cost class of a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryComplexity {
    /// A few terms.
    Simple,
    /// Some operators or phrases.
    Moderate,
    /// Boolean logic, groups, date ranges.
    Complex,
}

impl QueryComplexity {
    /// Lower-case name used in cache keys.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Moderate => "moderate",
            Self::Complex => "complex",
        }
    }

    /// Numeric weight for averaging: 1, 2 or 3.
    pub const fn numeric(self) -> u32 {
        match self {
            Self::Simple => 1,
            Self::Moderate => 2,
            Self::Complex => 3,
        }
    }
}

impl fmt::Display for QueryComplexity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Inclusive calendar range extracted from `after:`/`before:`/`on:`/`during:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    /// First day included, if bounded.
    pub start: Option<NaiveDate>,
    /// Last day included, if bounded.
    pub end: Option<NaiveDate>,
}

impl DateRange {
    /// Whether `date` falls inside the range.
    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|start| date >= start) && self.end.is_none_or(|end| date <= end)
    }

    fn from_parsed(parsed: &ParsedQuery) -> Option<Self> {
        let mut range = Self {
            start: None,
            end: None,
        };
        for op in &parsed.operators {
            let value = op.value.to_lowercase();
            match op.kind.as_str() {
                // Slack's after/before are exclusive
                "after" => {
                    if let Some(date) = parse_day(&value) {
                        range.start = date.succ_opt();
                    }
                },
                "before" => {
                    if let Some(date) = parse_day(&value) {
                        range.end = date.pred_opt();
                    }
                },
                "on" => {
                    if let Some(date) = parse_day(&value) {
                        range.start = Some(date);
                        range.end = Some(date);
                    }
                },
                "during" => {
                    if let Some((start, end)) = parse_period(&value) {
                        range.start = Some(start);
                        range.end = Some(end);
                    }
                },
                _ => {},
            }
        }
        (range.start.is_some() || range.end.is_some()).then_some(range)
    }
}

fn parse_day(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d").ok()
}

fn parse_period(value: &str) -> Option<(NaiveDate, NaiveDate)> {
    if let Some(day) = parse_day(value) {
        return Some((day, day));
    }
    if let Some((year, month)) = value.split_once('-') {
        let year: i32 = year.parse().ok()?;
        let month: u32 = month.parse().ok()?;
        let start = NaiveDate::from_ymd_opt(year, month, 1)?;
        let next = if month == 12 {
            NaiveDate::from_ymd_opt(year + 1, 1, 1)?
        } else {
            NaiveDate::from_ymd_opt(year, month + 1, 1)?
        };
        return Some((start, next.pred_opt()?));
    }
    let year: i32 = value.parse().ok()?;
    let start = NaiveDate::from_ymd_opt(year, 1, 1)?;
    let end = NaiveDate::from_ymd_opt(year, 12, 31)?;
    Some((start, end))
}

/// Immutable canonical form of a raw query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchQuery {
    /// Query as the caller wrote it.
    pub raw: String,
    /// Canonical form.
    pub normalized: String,
    /// Hex SHA-256 over the canonical form and extracted filters.
    pub hash: String,
    /// Cost class.
    pub complexity: QueryComplexity,
    /// Channel names from `in:` (lower-case, without `#`).
    pub channels: Option<Vec<String>>,
    /// User names from `from:` (lower-case, without `@`).
    pub users: Option<Vec<String>>,
    /// Date filter.
    pub date_range: Option<DateRange>,
    /// Distinct operator kinds used, sorted.
    pub operator_types: Vec<String>,
}

impl SearchQuery {
    /// Whether the query filters on `channel` (name or ID, case-insensitive).
    pub fn targets_channel(&self, channel: &str) -> bool {
        let channel = channel.trim_start_matches('#').to_lowercase();
        self.channels
            .as_ref()
            .is_some_and(|channels| channels.iter().any(|c| *c == channel))
    }

    /// Whether the query filters on `user` (name or ID, case-insensitive).
    pub fn targets_user(&self, user: &str) -> bool {
        let user = user.trim_start_matches('@').to_lowercase();
        self.users
            .as_ref()
            .is_some_and(|users| users.iter().any(|u| *u == user))
    }
}

/// Search parameters that change the result set, and so the cache key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Results per page.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<u32>,
    /// One-based page number.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// `score` or `timestamp`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort: Option<String>,
    /// `asc` or `desc`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_dir: Option<String>,
    /// Whether matches are highlighted.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight: Option<bool>,
    /// Workspace to search in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub team_id: Option<String>,
}

impl SearchOptions {
    /// Whether no option is set.
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Deterministic cache key: `search:<hash>:<complexity>[:<options prefix>]`.
///
/// Empty options produce the same key as no options.
pub fn generate_cache_key(query: &SearchQuery, options: Option<&SearchOptions>) -> String {
    let base = format!("search:{}:{}", query.hash, query.complexity);
    match options.filter(|o| !o.is_empty()) {
        Some(options) => {
            let encoded = serde_json::to_vec(options).unwrap_or_default();
            let digest = format!("{:x}", Sha256::digest(&encoded));
            format!("{base}:{}", &digest[..8])
        },
        None => base,
    }
}

/// Turns raw query strings into [`SearchQuery`] values.
#[derive(Clone)]
pub struct QueryNormalizer {
    parser: Arc<dyn SearchQueryParser>,
    thresholds: ComplexityThresholds,
}

impl fmt::Debug for QueryNormalizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryNormalizer")
            .field("thresholds", &self.thresholds)
            .finish_non_exhaustive()
    }
}

impl Default for QueryNormalizer {
    fn default() -> Self {
        Self::new(Arc::new(SlackQueryParser), ComplexityThresholds::default())
    }
}

impl QueryNormalizer {
    /// Create a normalizer around a parser.
    pub fn new(parser: Arc<dyn SearchQueryParser>, thresholds: ComplexityThresholds) -> Self {
        Self { parser, thresholds }
    }

    /// Parse and canonicalize `raw`.
    pub fn normalize(&self, raw: &str) -> Result<SearchQuery> {
        let parsed = self.parser.parse(raw).map_err(|e| {
            let reason = match e {
                Error::QueryParse(reason) => reason,
                other => other.to_string(),
            };
            Error::QueryParse(format!("failed to normalize query {raw:?}: {reason}"))
        })?;

        let normalized = canonical_form(&parsed);
        let channels = extract_names(&parsed, "in", '#');
        let users = extract_names(&parsed, "from", '@');
        let date_range = DateRange::from_parsed(&parsed);
        let complexity = self.calculate_complexity(&parsed);

        let mut operator_types: Vec<String> =
            parsed.operators.iter().map(|op| op.kind.clone()).collect();
        operator_types.sort();
        operator_types.dedup();

        let hash = hash_query(&normalized, channels.as_deref(), users.as_deref(), date_range);
        debug!(%normalized, %complexity, "normalized query");

        Ok(SearchQuery {
            raw: raw.to_string(),
            normalized,
            hash,
            complexity,
            channels,
            users,
            date_range,
            operator_types,
        })
    }

    /// Classify a parsed query by weighted component counts.
    pub fn calculate_complexity(&self, parsed: &ParsedQuery) -> QueryComplexity {
        let score = self.complexity_score(parsed);
        if score <= self.thresholds.simple_max {
            QueryComplexity::Simple
        } else if score <= self.thresholds.moderate_max {
            QueryComplexity::Moderate
        } else {
            QueryComplexity::Complex
        }
    }

    /// Raw complexity score before classification.
    pub fn complexity_score(&self, parsed: &ParsedQuery) -> u32 {
        let count = |n: usize| u32::try_from(n).unwrap_or(u32::MAX);
        let mut score = count(parsed.terms.len()) * TERM_WEIGHT
            + count(parsed.phrases.len()) * PHRASE_WEIGHT
            + count(parsed.operators.len()) * OPERATOR_WEIGHT
            + count(parsed.boolean_operators.len()) * BOOLEAN_WEIGHT
            + count(parsed.groups.len()) * GROUP_WEIGHT;
        if DateRange::from_parsed(parsed).is_some() {
            score += DATE_RANGE_WEIGHT;
        }
        if parsed.operator_values("in").count() > 1 {
            score += MULTI_FILTER_WEIGHT;
        }
        if parsed.operator_values("from").count() > 1 {
            score += MULTI_FILTER_WEIGHT;
        }
        score
    }
}

fn canonical_form(parsed: &ParsedQuery) -> String {
    let mut terms: Vec<String> = parsed.terms.iter().map(|t| t.to_lowercase()).collect();
    terms.sort();

    let mut phrases: Vec<String> = parsed
        .phrases
        .iter()
        .map(|p| format!("\"{}\"", p.to_lowercase()))
        .collect();
    phrases.sort();

    let mut operators: Vec<(String, String)> = parsed
        .operators
        .iter()
        .map(|op| (op.kind.to_lowercase(), op.value.to_lowercase()))
        .collect();
    operators.sort();

    let booleans = parsed.boolean_operators.iter().map(|b| b.kind.as_str().to_string());
    let groups = parsed.groups.iter().map(|g| {
        let inner = g.content.split_whitespace().collect::<Vec<_>>().join(" ");
        format!("({})", inner.to_lowercase())
    });

    terms
        .into_iter()
        .chain(phrases)
        .chain(operators.into_iter().map(|(kind, value)| format!("{kind}:{value}")))
        .chain(booleans)
        .chain(groups)
        .collect::<Vec<_>>()
        .join(" ")
}

fn extract_names(parsed: &ParsedQuery, kind: &str, sigil: char) -> Option<Vec<String>> {
    let mut names: Vec<String> = parsed
        .operator_values(kind)
        .map(|v| v.trim_start_matches(sigil).to_lowercase())
        .filter(|v| !v.is_empty())
        .collect();
    names.sort();
    names.dedup();
    (!names.is_empty()).then_some(names)
}

fn hash_query(
    normalized: &str,
    channels: Option<&[String]>,
    users: Option<&[String]>,
    date_range: Option<DateRange>,
) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hasher.update(b"|c:");
    hasher.update(channels.unwrap_or_default().join(",").as_bytes());
    hasher.update(b"|u:");
    hasher.update(users.unwrap_or_default().join(",").as_bytes());
    if let Some(range) = date_range {
        hasher.update(format!("|d:{:?}-{:?}", range.start, range.end).as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn normalize(raw: &str) -> SearchQuery {
        QueryNormalizer::default().normalize(raw).unwrap()
    }

    #[test]
    fn test_case_and_whitespace_fold() {
        let a = normalize("hello world");
        let b = normalize("HELLO   WORLD");
        assert_eq!(a.normalized, "hello world");
        assert_eq!(a.normalized, b.normalized);
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.complexity, QueryComplexity::Simple);
    }

    #[test]
    fn test_operator_order_is_irrelevant() {
        let a = normalize("from:alice in:general");
        let b = normalize("in:general from:alice");
        assert_eq!(a.normalized, b.normalized);
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.normalized, "from:alice in:general");
        assert_eq!(a.channels, Some(vec!["general".to_string()]));
        assert_eq!(a.users, Some(vec!["alice".to_string()]));
        assert_eq!(a.operator_types, vec!["from".to_string(), "in".to_string()]);
    }

    #[test]
    fn test_boolean_order_is_preserved() {
        let a = normalize("cats AND dogs OR birds");
        let b = normalize("cats OR dogs AND birds");
        assert_ne!(a.normalized, b.normalized);
        assert_ne!(a.hash, b.hash);
        assert_eq!(a.normalized, "birds cats dogs AND OR");
    }

    #[test]
    fn test_phrases_are_quoted_and_sorted() {
        let q = normalize(r#""Zeta Release" deploy "alpha plan""#);
        assert_eq!(q.normalized, r#"deploy "alpha plan" "zeta release""#);
    }

    #[test]
    fn test_sigils_are_stripped_from_filters() {
        let q = normalize("in:#General from:@Bob in:#random");
        assert_eq!(
            q.channels,
            Some(vec!["general".to_string(), "random".to_string()])
        );
        assert!(q.targets_channel("#general"));
        assert!(q.targets_user("BOB"));
        assert!(!q.targets_user("alice"));
    }

    #[test]
    fn test_date_range_extraction() {
        let q = normalize("standup after:2024-01-01 before:2024-02-01");
        let range = q.date_range.unwrap();
        assert_eq!(range.start, NaiveDate::from_ymd_opt(2024, 1, 2));
        assert_eq!(range.end, NaiveDate::from_ymd_opt(2024, 1, 31));
        assert!(range.contains(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap()));
        assert!(!range.contains(NaiveDate::from_ymd_opt(2024, 2, 15).unwrap()));

        let month = normalize("during:2024-02").date_range.unwrap();
        assert_eq!(month.end, NaiveDate::from_ymd_opt(2024, 2, 29));

        assert!(normalize("during:yesterday").date_range.is_none());
    }

    #[test]
    fn test_complexity_classification() {
        let normalizer = QueryNormalizer::default();
        let parser = SlackQueryParser;
        let score = |raw: &str| normalizer.complexity_score(&parser.parse(raw).unwrap());

        assert_eq!(score("hello world"), 2);
        assert_eq!(score(r#"deploy "release notes" in:#general"#), 6);
        assert_eq!(score("in:#a in:#b"), 9);
        assert_eq!(score("(bug OR issue) AND after:2024-01-01"), 2 + 8 + 5 + 3 + 5);

        assert_eq!(normalize("a b c d e").complexity, QueryComplexity::Simple);
        assert_eq!(normalize("a b c d e f").complexity, QueryComplexity::Moderate);
        assert_eq!(
            normalize("(bug OR issue) AND after:2024-01-01").complexity,
            QueryComplexity::Complex
        );
    }

    #[test]
    fn test_custom_thresholds() {
        let normalizer = QueryNormalizer::new(
            Arc::new(SlackQueryParser),
            ComplexityThresholds {
                simple_max: 1,
                moderate_max: 2,
            },
        );
        assert_eq!(
            normalizer.normalize("a b c").unwrap().complexity,
            QueryComplexity::Complex
        );
    }

    #[test]
    fn test_parse_failure_is_descriptive() {
        let err = QueryNormalizer::default().normalize("\"unterminated").unwrap_err();
        assert_eq!(err.category(), "query");
        assert!(err.to_string().contains("unterminated"));
        assert_eq!(err.to_string().matches("Query parse error").count(), 1);

        let err = QueryNormalizer::default().normalize("(deploy").unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("Query parse error: failed to normalize query"));
        assert_eq!(message.matches("Query parse error").count(), 1);
    }

    #[test]
    fn test_cache_key_shape_and_options() {
        let q = normalize("deploy in:#ops");
        let plain = generate_cache_key(&q, None);
        assert_eq!(plain, format!("search:{}:simple", q.hash));
        assert_eq!(generate_cache_key(&q, Some(&SearchOptions::default())), plain);

        let page_one = SearchOptions { page: Some(1), ..SearchOptions::default() };
        let page_two = SearchOptions { page: Some(2), ..SearchOptions::default() };
        let k1 = generate_cache_key(&q, Some(&page_one));
        assert_eq!(k1, generate_cache_key(&q, Some(&page_one.clone())));
        assert_ne!(k1, generate_cache_key(&q, Some(&page_two)));
        assert!(k1.starts_with(&plain));
        assert_eq!(k1.len(), plain.len() + 9);
    }

    proptest! {
        #[test]
        fn test_term_and_operator_order_never_changes_hash(
            mut terms in proptest::collection::vec("[a-z]{1,8}", 1..6),
            channel in "[a-z]{1,8}",
            user in "[a-z]{1,8}",
        ) {
            prop_assume!(terms.iter().all(|t| !matches!(t.as_str(), "and" | "or" | "not")));
            let forward = format!("{} in:{channel} from:{user}", terms.join(" "));
            terms.reverse();
            let backward = format!("from:{user} {} in:{channel}", terms.join(" ").to_uppercase());
            let a = normalize(&forward);
            let b = normalize(&backward);
            prop_assert_eq!(a.normalized, b.normalized);
            prop_assert_eq!(a.hash, b.hash);
        }
    }
}
