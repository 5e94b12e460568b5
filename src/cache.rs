//! The processed-documents cache file.
//!
//! A JSON [`CacheSnapshot`] read at startup and rewritten after any
//! re-processing. Writes go to `<path>.tmp` and are renamed into place, so a
//! crash mid-write leaves the previous snapshot intact.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use campus_rag_core::cache::{CacheSnapshot, SNAPSHOT_VERSION};
use campus_rag_core::{RagError, Result};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct DocumentCache {
    path: PathBuf,
}

impl DocumentCache {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the snapshot. A missing file is `None`; an unreadable or
    /// malformed one is [`RagError::CacheCorrupt`].
    pub fn load(&self) -> Result<Option<CacheSnapshot>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "no document cache");
                return Ok(None);
            }
            Err(e) => {
                return Err(RagError::CacheCorrupt(format!(
                    "{}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let snapshot: CacheSnapshot = serde_json::from_str(&content)
            .map_err(|e| RagError::CacheCorrupt(format!("{}: {}", self.path.display(), e)))?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(RagError::CacheCorrupt(format!(
                "{}: snapshot version {} (expected {})",
                self.path.display(),
                snapshot.version,
                SNAPSHOT_VERSION
            )));
        }
        Ok(Some(snapshot))
    }

    /// Atomically replace the snapshot file.
    pub fn store(&self, snapshot: &CacheSnapshot) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(anyhow::Error::from)?;
            }
        }
        let json = serde_json::to_vec_pretty(snapshot).map_err(anyhow::Error::from)?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        std::fs::write(&tmp, json).map_err(anyhow::Error::from)?;
        std::fs::rename(&tmp, &self.path).map_err(anyhow::Error::from)?;

        info!(
            path = %self.path.display(),
            documents = snapshot.documents.len(),
            chunks = snapshot.chunk_count(),
            "document cache written"
        );
        Ok(())
    }
}
