//! Index backend abstraction.
//!
//! The [`IndexBackend`] trait is the seam between the retrieval pipeline and
//! the search engine holding the [`IndexEntry`] records. It exposes upsert,
//! vector search, lexical search, and schema management; backends are
//! shared across conversations and provide their own concurrency safety.
//!
//! # Score contract
//!
//! Both search methods return scores normalized to `[0, 1]`, higher is
//! better, so the retriever can combine and threshold them without knowing
//! the backend's native scoring.

pub mod memory;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{EntryMetadata, IndexEntry};

/// An index entry returned by a search, with its relevance.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredEntry {
    pub chunk_id: String,
    pub text: String,
    pub metadata: EntryMetadata,
    /// Relevance in `[0, 1]`.
    pub score: f64,
}

/// Vector + lexical search engine collaborator.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`ensure_schema`](IndexBackend::ensure_schema) | Create the index or verify its dimensionality |
/// | [`upsert`](IndexBackend::upsert) | Insert or overwrite an entry by `chunk_id` |
/// | [`search_vector`](IndexBackend::search_vector) | Top-N by embedding similarity |
/// | [`search_lexical`](IndexBackend::search_lexical) | Top-N by keyword match |
/// | [`count`](IndexBackend::count) | Number of stored entries |
/// | [`missing`](IndexBackend::missing) | Which of the given ids are not stored |
/// | [`remove`](IndexBackend::remove) | Delete entries by `chunk_id` |
/// | [`clear`](IndexBackend::clear) | Drop every entry and the schema (full re-index) |
#[async_trait]
pub trait IndexBackend: Send + Sync {
    /// Create the index with `dims`-wide vectors if absent.
    ///
    /// An existing index with a different dimensionality is a
    /// [`RagError::SchemaMismatch`](crate::RagError::SchemaMismatch); it is
    /// never migrated.
    async fn ensure_schema(&self, dims: usize) -> Result<()>;

    /// Insert an entry, overwriting any entry with the same `chunk_id`.
    async fn upsert(&self, entry: &IndexEntry) -> Result<()>;

    /// Upsert several entries. Backends may override this to batch writes.
    async fn upsert_batch(&self, entries: &[IndexEntry]) -> Result<()> {
        for entry in entries {
            self.upsert(entry).await?;
        }
        Ok(())
    }

    async fn search_vector(&self, embedding: &[f32], n: usize) -> Result<Vec<ScoredEntry>>;

    async fn search_lexical(&self, text: &str, n: usize) -> Result<Vec<ScoredEntry>>;

    async fn count(&self) -> Result<usize>;

    /// The subset of `chunk_ids` with no stored entry, in input order.
    async fn missing(&self, chunk_ids: &[String]) -> Result<Vec<String>>;

    /// Remove entries, returning how many existed.
    async fn remove(&self, chunk_ids: &[String]) -> Result<usize>;

    /// Drop every entry and forget the dimensionality.
    async fn clear(&self) -> Result<()>;
}

/// Lowercased alphanumeric terms of a lexical query, deduplicated in order.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for raw in text.split(|c: char| !c.is_alphanumeric()) {
        if raw.is_empty() {
            continue;
        }
        let term = raw.to_lowercase();
        if !terms.contains(&term) {
            terms.push(term);
        }
    }
    terms
}
