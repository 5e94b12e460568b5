//! Raw document storage collaborators.
//!
//! A [`DocumentSource`] lists the documents under a prefix and fetches one
//! by handle. Fetching returns extracted text plus citation metadata; the
//! indexing pipeline is the only consumer.
//!
//! | Source | Backing store | Fingerprint |
//! |--------|---------------|-------------|
//! | [`s3::S3Storage`] | S3-compatible bucket | object ETag |
//! | [`fs::FilesystemStorage`] | local directory | `size:mtime` |

pub mod fs;
pub mod s3;

use anyhow::Result as AnyResult;
use async_trait::async_trait;
use std::sync::Arc;
use chrono::{DateTime, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};

use campus_rag_core::models::Document;
use campus_rag_core::Result;

use crate::config::StorageConfig;

/// A listed document, enough to fetch it and to detect staleness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentHandle {
    pub source_id: String,
    /// Store-specific locator (object key, absolute path).
    pub location: String,
    /// Changes whenever the stored bytes change.
    pub fingerprint: String,
    pub last_modified: Option<DateTime<Utc>>,
    pub size: u64,
}

#[async_trait]
pub trait DocumentSource: Send + Sync {
    /// Short label for logs (`"s3://bucket/prefix"`, a directory path).
    fn describe(&self) -> String;

    /// All documents under `prefix`, sorted by `source_id`.
    async fn list_documents(&self, prefix: &str) -> Result<Vec<DocumentHandle>>;

    /// Download and extract one document.
    async fn fetch(&self, handle: &DocumentHandle) -> Result<Document>;

    /// Browsable link for a cited source, if the store can produce one.
    fn link(&self, source_id: &str) -> Option<String>;
}

/// Build the configured storage collaborator.
pub fn create_source(config: &StorageConfig) -> AnyResult<Arc<dyn DocumentSource>> {
    match config {
        StorageConfig::S3(s3_config) => Ok(Arc::new(s3::S3Storage::from_env(s3_config.clone())?)),
        StorageConfig::Filesystem(fs_config) => {
            Ok(Arc::new(fs::FilesystemStorage::new(fs_config.clone())?))
        }
    }
}

/// Build a [`GlobSet`] from a list of glob pattern strings.
pub(crate) fn build_globset(patterns: &[String]) -> AnyResult<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

/// Last path segment, used as the fallback document title.
pub fn file_name(source_id: &str) -> &str {
    source_id.rsplit('/').next().unwrap_or(source_id)
}
