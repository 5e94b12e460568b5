//! In-memory [`IndexBackend`] for tests and small corpora.
//!
//! Entries live in a `BTreeMap` behind `std::sync::RwLock`. Vector search is
//! brute-force cosine similarity; lexical search scores each entry by the
//! fraction of query terms its text contains.

use std::collections::{BTreeMap, HashSet};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::vector_relevance;
use crate::error::{RagError, Result};
use crate::models::IndexEntry;

use super::{query_terms, IndexBackend, ScoredEntry};

#[derive(Default)]
struct Inner {
    dims: Option<usize>,
    entries: BTreeMap<String, IndexEntry>,
}

/// In-memory index backend.
#[derive(Default)]
pub struct InMemoryIndex {
    inner: RwLock<Inner>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clone of a stored entry, for inspection in tests and tooling.
    pub fn get(&self, chunk_id: &str) -> Result<Option<IndexEntry>> {
        Ok(self.read()?.entries.get(chunk_id).cloned())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Inner>> {
        self.inner
            .read()
            .map_err(|_| RagError::Other(anyhow::anyhow!("in-memory index lock poisoned")))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Inner>> {
        self.inner
            .write()
            .map_err(|_| RagError::Other(anyhow::anyhow!("in-memory index lock poisoned")))
    }
}

fn ranked(mut hits: Vec<ScoredEntry>, n: usize) -> Vec<ScoredEntry> {
    hits.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(n);
    hits
}

#[async_trait]
impl IndexBackend for InMemoryIndex {
    async fn ensure_schema(&self, dims: usize) -> Result<()> {
        let mut inner = self.write()?;
        match inner.dims {
            Some(found) if found != dims => Err(RagError::SchemaMismatch {
                expected: dims,
                found,
            }),
            Some(_) => Ok(()),
            None => {
                inner.dims = Some(dims);
                Ok(())
            }
        }
    }

    async fn upsert(&self, entry: &IndexEntry) -> Result<()> {
        let mut inner = self.write()?;
        if let Some(dims) = inner.dims {
            if entry.embedding.len() != dims {
                return Err(RagError::SchemaMismatch {
                    expected: dims,
                    found: entry.embedding.len(),
                });
            }
        }
        inner.entries.insert(entry.chunk_id.clone(), entry.clone());
        Ok(())
    }

    async fn search_vector(&self, embedding: &[f32], n: usize) -> Result<Vec<ScoredEntry>> {
        let inner = self.read()?;
        let hits = inner
            .entries
            .values()
            .map(|e| ScoredEntry {
                chunk_id: e.chunk_id.clone(),
                text: e.text.clone(),
                metadata: e.metadata.clone(),
                score: vector_relevance(embedding, &e.embedding),
            })
            .collect();
        Ok(ranked(hits, n))
    }

    async fn search_lexical(&self, text: &str, n: usize) -> Result<Vec<ScoredEntry>> {
        let terms = query_terms(text);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.read()?;
        let hits = inner
            .entries
            .values()
            .filter_map(|e| {
                let tokens: HashSet<String> = query_terms(&e.text).into_iter().collect();
                let matches = terms.iter().filter(|t| tokens.contains(t.as_str())).count();
                (matches > 0).then(|| ScoredEntry {
                    chunk_id: e.chunk_id.clone(),
                    text: e.text.clone(),
                    metadata: e.metadata.clone(),
                    score: matches as f64 / terms.len() as f64,
                })
            })
            .collect();
        Ok(ranked(hits, n))
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.read()?.entries.len())
    }

    async fn missing(&self, chunk_ids: &[String]) -> Result<Vec<String>> {
        let inner = self.read()?;
        Ok(chunk_ids
            .iter()
            .filter(|id| !inner.entries.contains_key(id.as_str()))
            .cloned()
            .collect())
    }

    async fn remove(&self, chunk_ids: &[String]) -> Result<usize> {
        let mut inner = self.write()?;
        Ok(chunk_ids
            .iter()
            .filter(|id| inner.entries.remove(id.as_str()).is_some())
            .count())
    }

    async fn clear(&self) -> Result<()> {
        let mut inner = self.write()?;
        inner.entries.clear();
        inner.dims = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EntryMetadata;

    fn entry(id: &str, text: &str, v: Vec<f32>) -> IndexEntry {
        IndexEntry {
            chunk_id: id.to_string(),
            embedding: v,
            text: text.to_string(),
            metadata: EntryMetadata {
                source_id: format!("{}.txt", id),
                ..Default::default()
            },
        }
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let index = InMemoryIndex::new();
        index.ensure_schema(2).await.unwrap();
        let e = entry("c1", "tuition fee", vec![1.0, 0.0]);
        index.upsert(&e).await.unwrap();
        index.upsert(&e).await.unwrap();
        assert_eq!(index.count().await.unwrap(), 1);
        assert_eq!(index.get("c1").unwrap(), Some(e));
    }

    #[tokio::test]
    async fn test_schema_mismatch_is_fatal() {
        let index = InMemoryIndex::new();
        index.ensure_schema(2).await.unwrap();
        index.ensure_schema(2).await.unwrap();
        let err = index.ensure_schema(3).await.unwrap_err();
        assert!(matches!(err, RagError::SchemaMismatch { expected: 3, found: 2 }));
        assert!(index.upsert(&entry("c1", "x", vec![1.0])).await.is_err());
    }

    #[tokio::test]
    async fn test_lexical_term_fraction() {
        let index = InMemoryIndex::new();
        index.upsert(&entry("c1", "The tuition deadline is near", vec![1.0, 0.0])).await.unwrap();
        index.upsert(&entry("c2", "Tuition is paid online", vec![0.0, 1.0])).await.unwrap();
        index.upsert(&entry("c3", "Library hours", vec![0.0, 1.0])).await.unwrap();

        let hits = index.search_lexical("tuition deadline", 10).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "c1");
        assert!((hits[0].score - 1.0).abs() < 1e-9);
        assert!((hits[1].score - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_lexical_matches_whole_terms() {
        let index = InMemoryIndex::new();
        index.upsert(&entry("c1", "Coffee in the example kitchen", vec![1.0, 0.0])).await.unwrap();
        index.upsert(&entry("c2", "Exam fee: 20 EUR", vec![0.0, 1.0])).await.unwrap();

        let hits = index.search_lexical("fee exam", 10).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].chunk_id, "c2");
    }

    #[tokio::test]
    async fn test_vector_top_n() {
        let index = InMemoryIndex::new();
        index.upsert(&entry("c1", "a", vec![1.0, 0.0])).await.unwrap();
        index.upsert(&entry("c2", "b", vec![0.7, 0.7])).await.unwrap();
        index.upsert(&entry("c3", "c", vec![0.0, 1.0])).await.unwrap();

        let hits = index.search_vector(&[1.0, 0.0], 2).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].chunk_id, "c1");
        assert_eq!(hits[1].chunk_id, "c2");
    }

    #[tokio::test]
    async fn test_remove_and_clear() {
        let index = InMemoryIndex::new();
        index.upsert(&entry("c1", "a", vec![1.0])).await.unwrap();
        index.upsert(&entry("c2", "b", vec![1.0])).await.unwrap();
        let removed = index
            .remove(&["c1".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        index.clear().await.unwrap();
        assert_eq!(index.count().await.unwrap(), 0);
    }
}
