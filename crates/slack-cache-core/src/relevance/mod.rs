//! Relevance scoring for Slack messages.
//!
//! [`RelevanceScorer`] combines a lexical score from a [`LexicalIndex`] with
//! recency, engagement, urgency and importance signals into one composite
//! score, and re-ranks arbitrary result lists by it.

pub mod index;
pub mod message;
pub mod scorer;

pub use index::{LexicalDocument, LexicalHit, LexicalIndex, TantivyLexicalIndex};
pub use message::{Message, parse_timestamp};
pub use scorer::{RelevanceResult, RelevanceScore, RelevanceScorer, ServiceResult, TfidfScores};
