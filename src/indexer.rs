//! Embed chunks and upsert them into the index backend.
//!
//! Batches are independent: a batch whose embedding call fails after
//! retries is counted and skipped, leaving earlier batches indexed.
//! Fatal errors (schema mismatch, bad credentials) abort the run.

use std::sync::Arc;

use tracing::{debug, info, warn};

use campus_rag_core::embedding::Embedder;
use campus_rag_core::models::{Chunk, DocumentMetadata, EntryMetadata, IndexEntry};
use campus_rag_core::store::IndexBackend;
use campus_rag_core::Result;

/// Outcome of an indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexReport {
    pub indexed: usize,
    pub failed: usize,
    pub failed_batches: usize,
    pub errors: Vec<String>,
}

impl IndexReport {
    pub fn is_complete(&self) -> bool {
        self.failed == 0
    }
}

pub struct Indexer {
    backend: Arc<dyn IndexBackend>,
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
}

impl Indexer {
    pub fn new(backend: Arc<dyn IndexBackend>, embedder: Arc<dyn Embedder>, batch_size: usize) -> Self {
        Self {
            backend,
            embedder,
            batch_size: batch_size.max(1),
        }
    }

    /// Index `chunks`, returning how many entries were written.
    ///
    /// Safe to repeat: entries are upserted by `chunk_id`.
    pub async fn index(&self, chunks: &[(&Chunk, &DocumentMetadata)]) -> Result<IndexReport> {
        self.backend.ensure_schema(self.embedder.dims()).await?;

        let mut report = IndexReport::default();
        for batch in chunks.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(c, _)| c.text.clone()).collect();

            let vectors = match self.embedder.embed(&texts).await {
                Ok(vectors) => vectors,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    warn!(batch = batch.len(), error = %e, "embedding batch failed");
                    report.failed += batch.len();
                    report.failed_batches += 1;
                    report.errors.push(e.to_string());
                    continue;
                }
            };

            let entries: Vec<IndexEntry> = batch
                .iter()
                .zip(vectors)
                .map(|((chunk, meta), embedding)| IndexEntry {
                    chunk_id: chunk.chunk_id.clone(),
                    embedding,
                    text: chunk.text.clone(),
                    metadata: EntryMetadata::for_chunk(chunk, meta),
                })
                .collect();
            self.backend.upsert_batch(&entries).await?;
            report.indexed += entries.len();
            debug!(indexed = report.indexed, total = chunks.len(), "indexed batch");
        }

        info!(
            indexed = report.indexed,
            failed = report.failed,
            model = self.embedder.model_name(),
            "indexing finished"
        );
        Ok(report)
    }
}
