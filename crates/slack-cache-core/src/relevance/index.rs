//! Lexical index over a message set.
//!
//! The scorer only needs "index these documents, rank them for this query".
//! [`TantivyLexicalIndex`] provides that with an in-memory tantivy index:
//! BM25 over `text` and `user` with per-field boosts, plus a down-weighted
//! fuzzy clause so near-miss spellings still contribute.

use crate::config::{FieldBoosts, MAX_FUZZY_DISTANCE};
use crate::query::SLACK_MODIFIERS;
use crate::{Error, Result};
use tantivy::collector::TopDocs;
use tantivy::indexer::NoMergePolicy;
use tantivy::query::{BooleanQuery, BoostQuery, Occur, Query, QueryParser};
use tantivy::schema::{Field, INDEXED, STORED, Schema, TEXT, Value};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, doc};
use tracing::debug;

/// Smallest per-thread arena tantivy accepts.
const WRITER_MEMORY_BYTES: usize = 15_000_000;

/// Weight of the fuzzy clause relative to the exact one.
const FUZZY_CLAUSE_BOOST: f32 = 0.5;

/// A document handed to the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LexicalDocument {
    /// Message body.
    pub text: String,
    /// Author name or ID.
    pub user: String,
}

/// A ranked match, identified by the document's position in the last
/// [`LexicalIndex::replace_all`] call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LexicalHit {
    /// Index into the indexed document slice.
    pub position: usize,
    /// Raw relevance score (unnormalized).
    pub score: f32,
}

/// Index-then-search capability consumed by the relevance scorer.
pub trait LexicalIndex: Send {
    /// Replace the indexed documents.
    fn replace_all(&mut self, documents: &[LexicalDocument]) -> Result<()>;

    /// Rank indexed documents for `query`, best first.
    fn search(&self, query: &str, limit: usize) -> Result<Vec<LexicalHit>>;
}

/// In-memory tantivy implementation of [`LexicalIndex`].
pub struct TantivyLexicalIndex {
    index: Index,
    writer: IndexWriter,
    reader: IndexReader,
    text_field: Field,
    user_field: Field,
    position_field: Field,
    boosts: FieldBoosts,
    fuzzy_distance: u8,
}

impl std::fmt::Debug for TantivyLexicalIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TantivyLexicalIndex")
            .field("boosts", &self.boosts)
            .field("fuzzy_distance", &self.fuzzy_distance)
            .finish_non_exhaustive()
    }
}

impl TantivyLexicalIndex {
    /// Empty in-memory index.
    ///
    /// Fails with [`Error::Config`] when `fuzzy_distance` exceeds
    /// [`MAX_FUZZY_DISTANCE`].
    pub fn new(boosts: FieldBoosts, fuzzy_distance: u8) -> Result<Self> {
        if fuzzy_distance > MAX_FUZZY_DISTANCE {
            return Err(Error::Config(format!(
                "fuzzy_distance must be at most {MAX_FUZZY_DISTANCE}, got {fuzzy_distance}"
            )));
        }
        let mut schema_builder = Schema::builder();
        let text_field = schema_builder.add_text_field("text", TEXT | STORED);
        let user_field = schema_builder.add_text_field("user", TEXT | STORED);
        let position_field = schema_builder.add_u64_field("position", INDEXED | STORED);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let writer: IndexWriter = index
            .writer_with_num_threads(1, WRITER_MEMORY_BYTES)
            .map_err(|e| Error::Index(format!("Failed to create writer: {e}")))?;
        writer.set_merge_policy(Box::new(NoMergePolicy));

        let reader: IndexReader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()
            .map_err(|e| Error::Index(format!("Failed to create reader: {e}")))?;

        Ok(Self {
            index,
            writer,
            reader,
            text_field,
            user_field,
            position_field,
            boosts,
            fuzzy_distance,
        })
    }

    fn build_query(&self, query_str: &str) -> Option<Box<dyn Query>> {
        let sanitized = sanitize_query(query_str);
        if sanitized.trim().is_empty() {
            return None;
        }
        let fields = vec![self.text_field, self.user_field];

        let mut exact_parser = QueryParser::for_index(&self.index, fields.clone());
        exact_parser.set_field_boost(self.text_field, self.boosts.text);
        exact_parser.set_field_boost(self.user_field, self.boosts.user);
        let (exact, errors) = exact_parser.parse_query_lenient(&sanitized);
        if !errors.is_empty() {
            debug!(
                query = %sanitized,
                errors = errors.len(),
                "lenient query parse dropped clauses"
            );
        }
        if self.fuzzy_distance == 0 {
            return Some(exact);
        }

        let mut fuzzy_parser = QueryParser::for_index(&self.index, fields);
        fuzzy_parser.set_field_boost(self.text_field, self.boosts.text);
        fuzzy_parser.set_field_boost(self.user_field, self.boosts.user);
        fuzzy_parser.set_field_fuzzy(self.text_field, false, self.fuzzy_distance, true);
        fuzzy_parser.set_field_fuzzy(self.user_field, false, self.fuzzy_distance, true);
        let (fuzzy, _) = fuzzy_parser.parse_query_lenient(&sanitized);

        Some(Box::new(BooleanQuery::new(vec![
            (Occur::Should, exact),
            (
                Occur::Should,
                Box::new(BoostQuery::new(fuzzy, FUZZY_CLAUSE_BOOST)),
            ),
        ])))
    }
}

impl LexicalIndex for TantivyLexicalIndex {
    fn replace_all(&mut self, documents: &[LexicalDocument]) -> Result<()> {
        self.writer.delete_all_documents()?;
        for (position, document) in documents.iter().enumerate() {
            self.writer.add_document(doc!(
                self.text_field => document.text.as_str(),
                self.user_field => document.user.as_str(),
                self.position_field => position as u64
            ))?;
        }
        self.writer.commit()?;
        self.reader.reload()?;
        debug!(documents = documents.len(), "rebuilt lexical index");
        Ok(())
    }

    fn search(&self, query_str: &str, limit: usize) -> Result<Vec<LexicalHit>> {
        let Some(query) = self.build_query(query_str) else {
            return Ok(Vec::new());
        };
        if limit == 0 {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let top_docs = searcher.search(&query, &TopDocs::with_limit(limit))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher.doc(address)?;
            let position = doc
                .get_first(self.position_field)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| Error::Index("Field not found in document".into()))?;
            hits.push(LexicalHit {
                position: usize::try_from(position)
                    .map_err(|_| Error::Index("position out of range".into()))?,
                score,
            });
        }
        Ok(hits)
    }
}

/// Drop Slack modifiers and escape tantivy query syntax.
fn sanitize_query(query: &str) -> String {
    let mut sanitized = String::with_capacity(query.len() * 2);
    for word in query.split_whitespace() {
        if word
            .split_once(':')
            .is_some_and(|(kind, _)| SLACK_MODIFIERS.contains(&kind.to_lowercase().as_str()))
        {
            continue;
        }
        if !sanitized.is_empty() {
            sanitized.push(' ');
        }
        for ch in word.chars() {
            match ch {
                '\\' | '"' | '(' | ')' | '[' | ']' | '{' | '}' | '^' | '~' | ':' => {
                    sanitized.push('\\');
                    sanitized.push(ch);
                },
                _ => sanitized.push(ch),
            }
        }
    }
    sanitized
}
