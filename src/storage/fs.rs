//! Local directory storage.
//!
//! Walks `root` with `walkdir`, filters relative paths through include and
//! exclude globs, and reads matching files on fetch. Source ids are paths
//! relative to `root` with `/` separators.

use anyhow::{bail, Context};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use globset::GlobSet;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use campus_rag_core::models::{Document, DocumentMetadata};
use campus_rag_core::Result;

use super::{build_globset, file_name, DocumentHandle, DocumentSource};
use crate::config::FilesystemStorageConfig;
use crate::extract::extract_text;

pub struct FilesystemStorage {
    config: FilesystemStorageConfig,
    include: GlobSet,
    exclude: GlobSet,
}

impl FilesystemStorage {
    pub fn new(config: FilesystemStorageConfig) -> anyhow::Result<Self> {
        let include = build_globset(&config.include_globs)?;
        let mut excludes = vec![
            "**/.git/**".to_string(),
            "**/.ipynb_checkpoints/**".to_string(),
        ];
        excludes.extend(config.exclude_globs.clone());
        let exclude = build_globset(&excludes)?;
        Ok(Self {
            config,
            include,
            exclude,
        })
    }

    fn root(&self) -> &Path {
        &self.config.root
    }

    fn scan(&self, prefix: &str) -> anyhow::Result<Vec<DocumentHandle>> {
        let root = self.root();
        if !root.exists() {
            bail!("Filesystem storage root does not exist: {}", root.display());
        }

        let mut handles = Vec::new();
        for entry in WalkDir::new(root).follow_links(self.config.follow_symlinks) {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let rel = path
                .strip_prefix(root)
                .unwrap_or(path)
                .to_string_lossy()
                .replace('\\', "/");

            if !rel.starts_with(prefix)
                || self.exclude.is_match(&rel)
                || !self.include.is_match(&rel)
            {
                continue;
            }

            let meta = entry
                .metadata()
                .with_context(|| format!("Failed to stat {}", path.display()))?;
            let modified: Option<DateTime<Utc>> = meta.modified().ok().map(DateTime::<Utc>::from);
            let mtime = modified.map(|m| m.timestamp()).unwrap_or(0);

            handles.push(DocumentHandle {
                source_id: rel,
                location: path.to_string_lossy().to_string(),
                fingerprint: format!("{}:{}", meta.len(), mtime),
                last_modified: modified,
                size: meta.len(),
            });
        }

        handles.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        Ok(handles)
    }
}

#[async_trait]
impl DocumentSource for FilesystemStorage {
    fn describe(&self) -> String {
        self.root().display().to_string()
    }

    async fn list_documents(&self, prefix: &str) -> Result<Vec<DocumentHandle>> {
        Ok(self.scan(prefix)?)
    }

    async fn fetch(&self, handle: &DocumentHandle) -> Result<Document> {
        let path = PathBuf::from(&handle.location);
        let bytes = tokio::fs::read(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let text = extract_text(&bytes, &handle.source_id).map_err(anyhow::Error::from)?;

        Ok(Document {
            source_id: handle.source_id.clone(),
            text,
            metadata: DocumentMetadata {
                title: Some(file_name(&handle.source_id).to_string()),
                url: self.link(&handle.source_id),
                last_modified: handle.last_modified,
                topics: None,
            },
        })
    }

    fn link(&self, source_id: &str) -> Option<String> {
        Some(format!("file://{}", self.root().join(source_id).display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn storage(root: &Path, include: &[&str]) -> FilesystemStorage {
        FilesystemStorage::new(FilesystemStorageConfig {
            root: root.to_path_buf(),
            include_globs: include.iter().map(|s| s.to_string()).collect(),
            exclude_globs: vec!["**/drafts/**".to_string()],
            follow_symlinks: false,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_lists_matching_files_sorted() {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("rag/drafts")).unwrap();
        std::fs::create_dir_all(tmp.path().join("rag/.ipynb_checkpoints")).unwrap();
        std::fs::write(tmp.path().join("rag/b.md"), "B").unwrap();
        std::fs::write(tmp.path().join("rag/a.txt"), "A").unwrap();
        std::fs::write(tmp.path().join("rag/drafts/c.md"), "C").unwrap();
        std::fs::write(tmp.path().join("rag/.ipynb_checkpoints/a-checkpoint.txt"), "A").unwrap();
        std::fs::write(tmp.path().join("rag/logo.png"), [0u8, 1, 2]).unwrap();
        std::fs::write(tmp.path().join("other.md"), "O").unwrap();

        let s = storage(tmp.path(), &["**/*.md", "**/*.txt"]);
        let handles = s.list_documents("rag/").await.unwrap();
        let ids: Vec<&str> = handles.iter().map(|h| h.source_id.as_str()).collect();
        assert_eq!(ids, vec!["rag/a.txt", "rag/b.md"]);
        assert_eq!(handles[0].size, 1);
        assert!(handles[0].fingerprint.starts_with("1:"));
    }

    #[tokio::test]
    async fn test_fetch_extracts_text_and_metadata() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("fees.md"), "Tuition is due May 1.\n").unwrap();
        let s = storage(tmp.path(), &["**/*.md"]);
        let handles = s.list_documents("").await.unwrap();
        let doc = s.fetch(&handles[0]).await.unwrap();
        assert_eq!(doc.source_id, "fees.md");
        assert_eq!(doc.text, "Tuition is due May 1.");
        assert_eq!(doc.metadata.title.as_deref(), Some("fees.md"));
        assert!(doc.metadata.url.unwrap().starts_with("file://"));
    }

    #[tokio::test]
    async fn test_missing_root_is_error() {
        let s = storage(Path::new("/nonexistent/campus-rag-test"), &["**/*"]);
        assert!(s.list_documents("").await.is_err());
    }
}
