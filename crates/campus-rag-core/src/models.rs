//! Core data models that flow through indexing and retrieval.
//!
//! Documents come from the storage collaborator, are split into [`Chunk`]s,
//! embedded into [`IndexEntry`]s, and come back from retrieval as
//! [`RetrievedPassage`]s. All text lengths and offsets are measured in
//! Unicode scalar values (`char`s).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Citation metadata attached to a document and everything derived from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    /// Browsable link or storage URL (`s3://bucket/key`, `file://...`).
    pub url: Option<String>,
    pub last_modified: Option<DateTime<Utc>>,
    /// Comma-separated topic summary, when metadata extraction ran.
    #[serde(default)]
    pub topics: Option<String>,
}

/// A raw document fetched from storage. Immutable once fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Unique identifier derived from the storage path.
    pub source_id: String,
    pub text: String,
    pub metadata: DocumentMetadata,
}

/// A bounded slice of a document's text; the retrieval unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id derived from `source_id` and `offset`.
    pub chunk_id: String,
    pub source_id: String,
    /// Ordinal within the document, starting at 0.
    pub position: usize,
    /// Char offset of the first char of `text` within the document.
    pub offset: usize,
    pub text: String,
    /// Leading chars of `text` shared with the previous chunk.
    pub overlap_text: String,
    /// SHA-256 of `text`, hex encoded.
    pub hash: String,
}

impl Chunk {
    /// Char length of `text`.
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Per-entry metadata stored alongside the vector and text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    pub source_id: String,
    pub position: usize,
    pub offset: usize,
    pub title: Option<String>,
    pub url: Option<String>,
}

impl EntryMetadata {
    pub fn for_chunk(chunk: &Chunk, doc: &DocumentMetadata) -> Self {
        Self {
            source_id: chunk.source_id.clone(),
            position: chunk.position,
            offset: chunk.offset,
            title: doc.title.clone(),
            url: doc.url.clone(),
        }
    }

    pub fn source_ref(&self) -> SourceRef {
        SourceRef {
            source_id: self.source_id.clone(),
            title: self.title.clone(),
            url: self.url.clone(),
        }
    }
}

/// One searchable record in the index, one-to-one with a [`Chunk`].
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub chunk_id: String,
    pub embedding: Vec<f32>,
    /// Duplicated chunk text for lexical search.
    pub text: String,
    pub metadata: EntryMetadata,
}

/// The search texts derived from one user query turn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryVariant {
    /// Query as asked; used for the vector search.
    pub original: String,
    /// Original plus appended synonyms; used for the lexical search.
    pub expanded: String,
    /// Query translated into the corpus language, when it differs.
    pub translated: Option<String>,
}

impl QueryVariant {
    /// A variant with no expansion or translation.
    pub fn plain(query: &str) -> Self {
        Self {
            original: query.to_string(),
            expanded: query.to_string(),
            translated: None,
        }
    }

    /// The `(semantic, lexical)` search pairs to issue for this turn.
    pub fn search_queries(&self) -> Vec<SearchQuery> {
        let mut queries = vec![SearchQuery {
            semantic: self.original.clone(),
            lexical: self.expanded.clone(),
        }];
        if let Some(translated) = &self.translated {
            queries.push(SearchQuery {
                semantic: translated.clone(),
                lexical: translated.clone(),
            });
        }
        queries
    }
}

/// One vector + keyword search pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub semantic: String,
    pub lexical: String,
}

/// Document reference used for citations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRef {
    pub source_id: String,
    pub title: Option<String>,
    pub url: Option<String>,
}

impl SourceRef {
    /// Last path segment of the source id.
    pub fn file_name(&self) -> &str {
        self.source_id
            .rsplit('/')
            .next()
            .unwrap_or(&self.source_id)
    }
}

/// A ranked retrieval result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedPassage {
    pub chunk_id: String,
    /// Combined relevance in `[0, 1]`, higher is better.
    pub score: f64,
    pub source: SourceRef,
    pub text: String,
    pub position: usize,
    pub offset: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_variant_single_query() {
        let v = QueryVariant::plain("tuition deadline");
        let qs = v.search_queries();
        assert_eq!(qs.len(), 1);
        assert_eq!(qs[0].semantic, "tuition deadline");
        assert_eq!(qs[0].lexical, "tuition deadline");
    }

    #[test]
    fn test_translated_variant_adds_query() {
        let v = QueryVariant {
            original: "срок оплаты".into(),
            expanded: "срок оплаты".into(),
            translated: Some("payment deadline".into()),
        };
        let qs = v.search_queries();
        assert_eq!(qs.len(), 2);
        assert_eq!(qs[1].semantic, "payment deadline");
        assert_eq!(qs[1].lexical, "payment deadline");
    }

    #[test]
    fn test_source_file_name() {
        let s = SourceRef {
            source_id: "docs/2024/handbook.pdf".into(),
            title: None,
            url: None,
        };
        assert_eq!(s.file_name(), "handbook.pdf");
    }
}
