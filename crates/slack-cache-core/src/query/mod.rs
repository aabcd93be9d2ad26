//! Query parsing and normalization.

pub mod normalizer;
pub mod parser;

pub use normalizer::{
    DateRange, QueryComplexity, QueryNormalizer, SearchOptions, SearchQuery, generate_cache_key,
};
pub use parser::{
    BooleanKind, BooleanOperator, ParsedQuery, QueryGroup, QueryOperator, SLACK_MODIFIERS,
    SearchQueryParser, SlackQueryParser,
};
