//! Hybrid retrieval over an [`IndexBackend`].
//!
//! # Scoring
//!
//! For every [`SearchQuery`] derived from a [`QueryVariant`]:
//!
//! 1. Fetch `candidate_n` vector candidates for the semantic text.
//! 2. Fetch `candidate_n` lexical candidates for the lexical text.
//! 3. Combine per chunk: `score = (1 - α) × lexical + α × vector`, with a
//!    missing signal counting as `0`.
//!
//! Across queries a chunk keeps its **best** score (MAX, never a sum).
//! Passages scoring zero or below `min_score` are dropped, the rest are sorted by score
//! (desc), `source_id`, `position`, `chunk_id` (asc) and truncated to
//! `min(k, k_max)`.
//!
//! Backends already return each signal in `[0, 1]`, so scores are comparable
//! across queries and the threshold has a fixed meaning.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::debug;

use crate::embedding::{embed_one, Embedder};
use crate::error::{RagError, Result};
use crate::models::{QueryVariant, RetrievedPassage, SearchQuery};
use crate::store::{IndexBackend, ScoredEntry};

/// Retrieval tuning parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    /// Weight of the vector signal: `(1-α)*lexical + α*vector`.
    pub alpha: f64,
    /// Candidates fetched per signal per query.
    pub candidate_n: usize,
    /// Hard cap on returned passages, whatever the caller asks for.
    pub k_max: usize,
    /// Minimum combined score for a passage to count as evidence. A score of
    /// zero never counts, whatever this is set to.
    pub min_score: f64,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            alpha: 0.5,
            candidate_n: 20,
            k_max: 5,
            min_score: 0.0,
        }
    }
}

impl RetrievalParams {
    pub fn validate(&self) -> Result<()> {
        if !(0.0..=1.0).contains(&self.alpha) {
            return Err(RagError::Configuration(format!(
                "retrieval.alpha must be in [0.0, 1.0], got {}",
                self.alpha
            )));
        }
        if self.candidate_n == 0 || self.k_max == 0 {
            return Err(RagError::Configuration(
                "retrieval.candidate_n and retrieval.k_max must be > 0".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.min_score) {
            return Err(RagError::Configuration(format!(
                "retrieval.min_score must be in [0.0, 1.0], got {}",
                self.min_score
            )));
        }
        Ok(())
    }
}

/// Issues vector and lexical searches and merges them into ranked passages.
///
/// Holds shared handles to the index and embedder; one retriever serves every
/// conversation.
#[derive(Clone)]
pub struct HybridRetriever {
    backend: Arc<dyn IndexBackend>,
    embedder: Arc<dyn Embedder>,
    params: RetrievalParams,
}

impl HybridRetriever {
    pub fn new(
        backend: Arc<dyn IndexBackend>,
        embedder: Arc<dyn Embedder>,
        params: RetrievalParams,
    ) -> Result<Self> {
        params.validate()?;
        Ok(Self {
            backend,
            embedder,
            params,
        })
    }

    pub fn params(&self) -> &RetrievalParams {
        &self.params
    }

    /// Retrieve at most `min(k, k_max)` passages for a query turn.
    ///
    /// An empty result is the normal "no evidence" outcome. Errors are
    /// collaborator failures (embedding or index) for this one query.
    pub async fn retrieve(&self, variant: &QueryVariant, k: usize) -> Result<Vec<RetrievedPassage>> {
        let limit = k.min(self.params.k_max);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut best: HashMap<String, RetrievedPassage> = HashMap::new();
        for query in variant.search_queries() {
            for passage in self.search_one(&query).await? {
                match best.get(&passage.chunk_id) {
                    Some(existing) if existing.score >= passage.score => {}
                    _ => {
                        best.insert(passage.chunk_id.clone(), passage);
                    }
                }
            }
        }

        let candidates = best.len();
        let mut results: Vec<RetrievedPassage> = best
            .into_values()
            .filter(|p| p.score > 0.0 && p.score >= self.params.min_score)
            .collect();
        sort_passages(&mut results);
        results.truncate(limit);

        debug!(
            query = %variant.original,
            candidates,
            returned = results.len(),
            "hybrid retrieval"
        );
        Ok(results)
    }

    async fn search_one(&self, query: &SearchQuery) -> Result<Vec<RetrievedPassage>> {
        let n = self.params.candidate_n;
        let alpha = self.params.alpha;

        let vector_hits = if alpha > 0.0 && !query.semantic.trim().is_empty() {
            let qv = embed_one(self.embedder.as_ref(), &query.semantic).await?;
            self.backend.search_vector(&qv, n).await?
        } else {
            Vec::new()
        };
        let lexical_hits = if alpha < 1.0 && !query.lexical.trim().is_empty() {
            self.backend.search_lexical(&query.lexical, n).await?
        } else {
            Vec::new()
        };

        Ok(combine(vector_hits, lexical_hits, alpha))
    }
}

/// Merge the two signals of one query into passages with a combined score.
pub fn combine(
    vector_hits: Vec<ScoredEntry>,
    lexical_hits: Vec<ScoredEntry>,
    alpha: f64,
) -> Vec<RetrievedPassage> {
    let mut merged: HashMap<String, (ScoredEntry, f64, f64)> = HashMap::new();
    for hit in vector_hits {
        let v = hit.score;
        merged.entry(hit.chunk_id.clone()).or_insert((hit, 0.0, 0.0)).1 = v;
    }
    for hit in lexical_hits {
        let l = hit.score;
        merged.entry(hit.chunk_id.clone()).or_insert((hit, 0.0, 0.0)).2 = l;
    }

    merged
        .into_values()
        .map(|(entry, v, l)| RetrievedPassage {
            chunk_id: entry.chunk_id,
            score: (1.0 - alpha) * l + alpha * v,
            source: entry.metadata.source_ref(),
            text: entry.text,
            position: entry.metadata.position,
            offset: entry.metadata.offset,
        })
        .collect()
}

/// Score desc, then `source_id`, `position`, `chunk_id` asc.
pub fn sort_passages(passages: &mut [RetrievedPassage]) {
    passages.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.source.source_id.cmp(&b.source.source_id))
            .then_with(|| a.position.cmp(&b.position))
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}
