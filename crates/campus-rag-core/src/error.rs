//! Error taxonomy shared by every pipeline stage.
//!
//! Callers branch on the variant: [`RagError::Transient`] failures are
//! retried and then surfaced for the single operation that failed;
//! configuration-class failures halt startup. "No evidence found" is not an
//! error and never appears here.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RagError>;

#[derive(Error, Debug)]
pub enum RagError {
    /// Network, timeout, or rate-limit failure from an external collaborator.
    #[error("Transient error: {0}")]
    Transient(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The index exists with a different vector dimensionality.
    #[error("Index schema mismatch: expected {expected} dims, index has {found}")]
    SchemaMismatch { expected: usize, found: usize },

    #[error("Cache file is corrupt: {0}")]
    CacheCorrupt(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RagError {
    /// Whether the failure may succeed on a later attempt.
    pub fn is_transient(&self) -> bool {
        matches!(self, RagError::Transient(_))
    }

    /// Whether the failure must halt startup rather than degrade.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RagError::Configuration(_) | RagError::SchemaMismatch { .. } | RagError::CacheCorrupt(_)
        )
    }
}
