//! Processed-corpus snapshot and staleness detection.
//!
//! A [`CacheSnapshot`] maps each `source_id` to its chunk sequence plus the
//! fingerprint storage reported for it when it was processed. It is valid
//! for reuse only while every fingerprint still matches storage and the
//! chunking parameters are unchanged. Documents that could never be decoded
//! are remembered with their fingerprint in [`CacheSnapshot::skipped`], so
//! they count as processed until storage reports a new version. Reading and
//! writing the snapshot file lives in the app crate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chunk::ChunkParams;
use crate::models::{Chunk, DocumentMetadata};

/// Current on-disk snapshot format.
pub const SNAPSHOT_VERSION: u32 = 1;

/// One processed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedDocument {
    pub fingerprint: String,
    pub metadata: DocumentMetadata,
    pub chunks: Vec<Chunk>,
}

/// The persisted, processed corpus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub version: u32,
    pub created_at: DateTime<Utc>,
    pub params: ChunkParams,
    pub documents: BTreeMap<String, CachedDocument>,
    /// `source_id` to fingerprint of documents that failed to decode.
    #[serde(default)]
    pub skipped: BTreeMap<String, String>,
}

impl CacheSnapshot {
    pub fn new(params: ChunkParams) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            created_at: Utc::now(),
            params,
            documents: BTreeMap::new(),
            skipped: BTreeMap::new(),
        }
    }

    /// Whether the snapshot no longer reflects storage.
    ///
    /// `source_fingerprints` is the full `(source_id, fingerprint)` listing
    /// from storage. Any added, removed, or changed document, or different
    /// chunking parameters, make the snapshot stale. A skipped document with
    /// an unchanged fingerprint does not.
    pub fn is_stale(&self, source_fingerprints: &BTreeMap<String, String>, params: &ChunkParams) -> bool {
        if self.version != SNAPSHOT_VERSION || &self.params != params {
            return true;
        }
        if self.documents.len() + self.skipped.len() != source_fingerprints.len() {
            return true;
        }
        let recorded = self
            .documents
            .iter()
            .map(|(id, doc)| (id, &doc.fingerprint))
            .chain(self.skipped.iter());
        for (source_id, fingerprint) in recorded {
            if source_fingerprints.get(source_id) != Some(fingerprint) {
                return true;
            }
        }
        false
    }

    /// All chunks, ordered by `source_id` then `position`.
    pub fn chunks(&self) -> impl Iterator<Item = (&Chunk, &DocumentMetadata)> {
        self.documents
            .values()
            .flat_map(|d| d.chunks.iter().map(move |c| (c, &d.metadata)))
    }

    pub fn chunk_count(&self) -> usize {
        self.documents.values().map(|d| d.chunks.len()).sum()
    }

    /// Chunk ids present here but absent from `newer`.
    pub fn orphaned_in(&self, newer: &CacheSnapshot) -> Vec<String> {
        let keep: std::collections::HashSet<&str> =
            newer.chunks().map(|(c, _)| c.chunk_id.as_str()).collect();
        self.chunks()
            .filter(|(c, _)| !keep.contains(c.chunk_id.as_str()))
            .map(|(c, _)| c.chunk_id.clone())
            .collect()
    }
}
