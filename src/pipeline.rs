//! Startup indexing pipeline.
//!
//! ```text
//! list storage ──► fingerprints ──► cache snapshot current?
//!                                     │ yes: index complete? ──► reuse (no fetch, no embed)
//!                                     │                 no ──► re-index cached chunks
//!                                     │ no / forced
//!                                     ▼
//!                      fetch ─► metadata ─► chunk ─► embed + upsert ─► drop orphans ─► write cache
//! ```
//!
//! Documents that cannot be decoded are skipped with a warning and recorded
//! with their fingerprint, so they are retried only once storage holds a new
//! version. A transient fetch failure leaves the document out of the
//! snapshot entirely, which keeps the cache stale until a fetch succeeds.
//! Fatal errors stop the run before anything is served.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use campus_rag_core::cache::{CacheSnapshot, CachedDocument};
use campus_rag_core::chunk::{chunk_document, ChunkParams};
use campus_rag_core::embedding::Embedder;
use campus_rag_core::models::{Document, DocumentMetadata};
use campus_rag_core::store::IndexBackend;
use campus_rag_core::Result;

use crate::cache::DocumentCache;
use crate::generation::{parse_metadata_reply, Generator, METADATA_INSTRUCTION};
use crate::indexer::Indexer;
use crate::storage::{file_name, DocumentSource};

/// Chars of a document shown to the model for metadata extraction.
const METADATA_SAMPLE_CHARS: usize = 1800;

const UNDEFINED_TOPICS: &str = "not defined";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Cache and index were current; nothing was fetched or embedded.
    Reused,
    /// Cache was current but the index did not match it; cached chunks re-indexed.
    Reindexed,
    /// Documents were fetched, chunked, and indexed.
    Processed,
}

impl fmt::Display for PipelineOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineOutcome::Reused => write!(f, "reused cache"),
            PipelineOutcome::Reindexed => write!(f, "re-indexed from cache"),
            PipelineOutcome::Processed => write!(f, "processed from storage"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub outcome: PipelineOutcome,
    pub listed: usize,
    pub fetched: usize,
    pub skipped: Vec<String>,
    pub chunks: usize,
    pub indexed: usize,
    pub failed: usize,
    pub removed: usize,
}

impl PipelineReport {
    fn new(outcome: PipelineOutcome, listed: usize) -> Self {
        Self {
            outcome,
            listed,
            fetched: 0,
            skipped: Vec::new(),
            chunks: 0,
            indexed: 0,
            failed: 0,
            removed: 0,
        }
    }
}

pub struct Pipeline {
    source: Arc<dyn DocumentSource>,
    backend: Arc<dyn IndexBackend>,
    embedder: Arc<dyn Embedder>,
    cache: DocumentCache,
    params: ChunkParams,
    prefix: String,
    batch_size: usize,
    metadata_generator: Option<Arc<dyn Generator>>,
}

impl Pipeline {
    pub fn new(
        source: Arc<dyn DocumentSource>,
        backend: Arc<dyn IndexBackend>,
        embedder: Arc<dyn Embedder>,
        cache: DocumentCache,
        params: ChunkParams,
    ) -> Self {
        Self {
            source,
            backend,
            embedder,
            cache,
            params,
            prefix: String::new(),
            batch_size: 32,
            metadata_generator: None,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Ask `generator` for a title and topics of each fetched document.
    pub fn with_metadata_extraction(mut self, generator: Arc<dyn Generator>) -> Self {
        self.metadata_generator = Some(generator);
        self
    }

    /// Bring the index and cache in line with storage.
    ///
    /// `force` ignores the cache and clears the index first.
    pub async fn prepare(&self, force: bool) -> Result<PipelineReport> {
        let handles = self.source.list_documents(&self.prefix).await?;
        let fingerprints: BTreeMap<String, String> = handles
            .iter()
            .map(|h| (h.source_id.clone(), h.fingerprint.clone()))
            .collect();
        info!(
            source = %self.source.describe(),
            documents = handles.len(),
            "listed storage"
        );

        let previous = if force { None } else { self.cache.load()? };

        if let Some(snapshot) = &previous {
            if !snapshot.is_stale(&fingerprints, &self.params) {
                return self.reuse(snapshot, handles.len()).await;
            }
            info!("document cache is stale, reprocessing");
        } else {
            if force {
                info!("forced reprocessing, clearing index");
            } else {
                // Without a snapshot nothing tells which stored entries are current.
                info!("no document cache, rebuilding index from storage");
                self.backend.ensure_schema(self.embedder.dims()).await?;
            }
            self.backend.clear().await?;
        }

        let mut report = PipelineReport::new(PipelineOutcome::Processed, handles.len());
        let mut snapshot = CacheSnapshot::new(self.params);
        for handle in &handles {
            let doc = match self.source.fetch(handle).await {
                Ok(doc) => doc,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(source_id = %handle.source_id, error = %e, "skipping document");
                    report.skipped.push(handle.source_id.clone());
                    if !e.is_transient() {
                        snapshot
                            .skipped
                            .insert(handle.source_id.clone(), handle.fingerprint.clone());
                    }
                    continue;
                }
            };
            report.fetched += 1;

            let metadata = self.document_metadata(&doc).await;
            let chunks = chunk_document(&doc, &self.params);
            debug!(source_id = %doc.source_id, chunks = chunks.len(), "chunked document");
            snapshot.documents.insert(
                doc.source_id.clone(),
                CachedDocument {
                    fingerprint: handle.fingerprint.clone(),
                    metadata,
                    chunks,
                },
            );
        }
        report.chunks = snapshot.chunk_count();

        let items: Vec<_> = snapshot.chunks().collect();
        let indexed = self.indexer().index(&items).await?;
        report.indexed = indexed.indexed;
        report.failed = indexed.failed;

        if let Some(old) = &previous {
            let orphans = old.orphaned_in(&snapshot);
            if !orphans.is_empty() {
                report.removed = self.backend.remove(&orphans).await?;
                info!(removed = report.removed, "removed orphaned entries");
            }
        }

        self.cache.store(&snapshot)?;
        info!(
            fetched = report.fetched,
            skipped = report.skipped.len(),
            chunks = report.chunks,
            indexed = report.indexed,
            "processing finished"
        );
        Ok(report)
    }

    async fn reuse(&self, snapshot: &CacheSnapshot, listed: usize) -> Result<PipelineReport> {
        self.backend.ensure_schema(self.embedder.dims()).await?;
        let expected: Vec<String> = snapshot.chunks().map(|(c, _)| c.chunk_id.clone()).collect();
        let missing: HashSet<String> = self.backend.missing(&expected).await?.into_iter().collect();
        let present = self.backend.count().await?;
        let extra = (present + missing.len()).saturating_sub(expected.len());

        let mut report = PipelineReport::new(PipelineOutcome::Reused, listed);
        report.chunks = expected.len();
        if missing.is_empty() && extra == 0 {
            info!(chunks = expected.len(), "document cache is current, skipping indexing");
            return Ok(report);
        }

        let items: Vec<_> = if extra > 0 {
            info!(extra, missing = missing.len(), "index holds entries outside the cache, rebuilding");
            self.backend.clear().await?;
            snapshot.chunks().collect()
        } else {
            info!(missing = missing.len(), "index is incomplete, re-indexing missing chunks");
            snapshot
                .chunks()
                .filter(|(c, _)| missing.contains(&c.chunk_id))
                .collect()
        };
        let indexed = self.indexer().index(&items).await?;
        report.outcome = PipelineOutcome::Reindexed;
        report.indexed = indexed.indexed;
        report.failed = indexed.failed;
        Ok(report)
    }

    fn indexer(&self) -> Indexer {
        Indexer::new(self.backend.clone(), self.embedder.clone(), self.batch_size)
    }

    /// Fetched metadata, enriched by the model when configured.
    ///
    /// Extraction is best effort: on any failure the document keeps its
    /// file-name title and gets `"not defined"` topics.
    async fn document_metadata(&self, doc: &Document) -> DocumentMetadata {
        let mut metadata = doc.metadata.clone();
        if metadata.title.is_none() {
            metadata.title = Some(format!("File {}", file_name(&doc.source_id)));
        }
        let Some(generator) = &self.metadata_generator else {
            return metadata;
        };

        let sample: String = doc.text.chars().take(METADATA_SAMPLE_CHARS).collect();
        match generator.complete(METADATA_INSTRUCTION, &sample).await {
            Ok(reply) => match parse_metadata_reply(&reply) {
                Some(extracted) => {
                    if let Some(title) = extracted.title.filter(|t| !t.trim().is_empty()) {
                        metadata.title = Some(title);
                    }
                    metadata.topics = extracted.topics.filter(|t| !t.trim().is_empty());
                }
                None => warn!(source_id = %doc.source_id, "unparseable metadata reply"),
            },
            Err(e) => warn!(source_id = %doc.source_id, error = %e, "metadata extraction failed"),
        }
        if metadata.topics.is_none() {
            metadata.topics = Some(UNDEFINED_TOPICS.to_string());
        }
        metadata
    }
}
