//! Fixed-window text chunker with overlap.
//!
//! Splits a document's text into [`Chunk`]s of at most `chunk_size` chars,
//! where consecutive chunks share `chunk_overlap` chars. Sizes are measured
//! in Unicode scalar values, never bytes, so multibyte text never splits
//! inside a character and budget arithmetic downstream uses the same unit.
//!
//! # Algorithm
//!
//! 1. Window `[start, min(start + chunk_size, len))`, starting at 0.
//! 2. Advance `start` by `chunk_size - chunk_overlap`.
//! 3. Stop after the window that reaches the end of the text.
//!
//! The final chunk may be shorter than `chunk_size` but is never empty. An
//! empty document produces no chunks.
//!
//! Chunk ids are UUID v5 values derived from `source_id` and the chunk's char
//! offset, so identical input always yields identical ids and boundaries.
//!
//! # Example
//!
//! ```rust
//! use campus_rag_core::chunk::{chunk_text, ChunkParams};
//!
//! let params = ChunkParams::new(300, 50).unwrap();
//! let chunks = chunk_text("guide.txt", &"a".repeat(500), &params);
//! assert_eq!(chunks.len(), 2);
//! assert_eq!(chunks[1].offset, 250);
//! ```

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{RagError, Result};
use crate::models::{Chunk, Document};

/// Namespace for chunk id derivation. Changing it invalidates every index.
const CHUNK_NAMESPACE: Uuid = Uuid::from_u128(0x6a1f_52c4_9d3e_4b7a_8e21_c0d5_f3a9_1b64);

/// Validated chunking parameters, in chars.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkParams {
    pub chunk_size: usize,
    pub chunk_overlap: usize,
}

impl ChunkParams {
    /// Returns a configuration error unless `0 <= overlap < size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self> {
        if chunk_size == 0 {
            return Err(RagError::Configuration(
                "chunk_size must be > 0".to_string(),
            ));
        }
        if chunk_overlap >= chunk_size {
            return Err(RagError::Configuration(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                chunk_overlap, chunk_size
            )));
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
        })
    }

    fn stride(&self) -> usize {
        self.chunk_size - self.chunk_overlap
    }
}

/// Chunk a fetched [`Document`].
pub fn chunk_document(doc: &Document, params: &ChunkParams) -> Vec<Chunk> {
    chunk_text(&doc.source_id, &doc.text, params)
}

/// Split `text` into overlapping windows.
///
/// # Guarantees
///
/// - Positions are contiguous: `0, 1, …, N-1`.
/// - Every chunk is non-empty and at most `chunk_size` chars.
/// - [`reconstruct`] of the output equals `text`.
pub fn chunk_text(source_id: &str, text: &str, params: &ChunkParams) -> Vec<Chunk> {
    // Byte index of every char start, plus the end of the string.
    let bounds: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let len = bounds.len() - 1;

    let mut chunks = Vec::new();
    let mut start = 0usize;
    let mut prev_end = 0usize;

    while start < len {
        let end = (start + params.chunk_size).min(len);
        let shared = prev_end.saturating_sub(start);
        let body = &text[bounds[start]..bounds[end]];
        let overlap = &text[bounds[start]..bounds[start + shared]];
        chunks.push(make_chunk(source_id, chunks.len(), start, body, overlap));

        if end == len {
            break;
        }
        prev_end = end;
        start += params.stride();
    }

    chunks
}

/// Rebuild the document text from its chunks, collapsing overlaps.
///
/// Chunks must belong to one document; they are ordered by `position`.
pub fn reconstruct(chunks: &[Chunk]) -> String {
    let mut ordered: Vec<&Chunk> = chunks.iter().collect();
    ordered.sort_by_key(|c| c.position);

    let mut out = String::new();
    for chunk in ordered {
        let skip = chunk.overlap_text.chars().count();
        out.extend(chunk.text.chars().skip(skip));
    }
    out
}

/// Deterministic chunk id for a window starting at `offset`.
pub fn chunk_id(source_id: &str, offset: usize) -> String {
    Uuid::new_v5(&CHUNK_NAMESPACE, format!("{}:{}", source_id, offset).as_bytes()).to_string()
}

fn make_chunk(source_id: &str, position: usize, offset: usize, text: &str, overlap: &str) -> Chunk {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    let hash = format!("{:x}", hasher.finalize());

    Chunk {
        chunk_id: chunk_id(source_id, offset),
        source_id: source_id.to_string(),
        position,
        offset,
        text: text.to_string(),
        overlap_text: overlap.to_string(),
        hash,
    }
}
