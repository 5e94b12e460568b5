//! Startup pipeline tests with in-memory storage, a counting embedder, and
//! the in-memory index backend.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use campus_rag::cache::DocumentCache;
use campus_rag::generation::Generator;
use campus_rag::pipeline::{Pipeline, PipelineOutcome};
use campus_rag::storage::{DocumentHandle, DocumentSource};
use campus_rag_core::chunk::ChunkParams;
use campus_rag_core::embedding::Embedder;
use campus_rag_core::models::{Document, DocumentMetadata, EntryMetadata, IndexEntry};
use campus_rag_core::store::memory::InMemoryIndex;
use campus_rag_core::store::IndexBackend;
use campus_rag_core::{RagError, Result};

// ─── Fakes ──────────────────────────────────────────────────────────

/// Storage holding `(source_id → (fingerprint, text))`.
#[derive(Default)]
struct FakeStorage {
    docs: Mutex<BTreeMap<String, (String, String)>>,
    broken: Mutex<Vec<String>>,
    unreachable: Mutex<Vec<String>>,
    fetches: AtomicUsize,
}

impl FakeStorage {
    fn put(&self, source_id: &str, fingerprint: &str, text: &str) {
        self.docs
            .lock()
            .unwrap()
            .insert(source_id.into(), (fingerprint.into(), text.into()));
    }

    fn delete(&self, source_id: &str) {
        self.docs.lock().unwrap().remove(source_id);
    }

    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DocumentSource for FakeStorage {
    fn describe(&self) -> String {
        "fake".into()
    }

    async fn list_documents(&self, prefix: &str) -> Result<Vec<DocumentHandle>> {
        Ok(self
            .docs
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id.starts_with(prefix))
            .map(|(id, (fp, text))| DocumentHandle {
                source_id: id.clone(),
                location: id.clone(),
                fingerprint: fp.clone(),
                last_modified: None,
                size: text.len() as u64,
            })
            .collect())
    }

    async fn fetch(&self, handle: &DocumentHandle) -> Result<Document> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.broken.lock().unwrap().contains(&handle.source_id) {
            return Err(anyhow::anyhow!("cannot decode {}", handle.source_id).into());
        }
        if self.unreachable.lock().unwrap().contains(&handle.source_id) {
            return Err(RagError::Transient(format!("GetObject {} timed out", handle.source_id)));
        }
        let text = self
            .docs
            .lock()
            .unwrap()
            .get(&handle.source_id)
            .map(|(_, text)| text.clone())
            .ok_or_else(|| RagError::NotFound(handle.source_id.clone()))?;
        Ok(Document {
            source_id: handle.source_id.clone(),
            text,
            metadata: DocumentMetadata::default(),
        })
    }

    fn link(&self, _source_id: &str) -> Option<String> {
        None
    }
}

/// Two-dimensional embedder that counts calls.
#[derive(Default)]
struct CountingEmbedder {
    calls: AtomicUsize,
}

impl CountingEmbedder {
    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Embedder for CountingEmbedder {
    fn model_name(&self) -> &str {
        "counting"
    }
    fn dims(&self) -> usize {
        2
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(texts
            .iter()
            .map(|t| vec![t.chars().count() as f32, 1.0])
            .collect())
    }
}

struct Harness {
    _dir: TempDir,
    storage: Arc<FakeStorage>,
    index: Arc<InMemoryIndex>,
    embedder: Arc<CountingEmbedder>,
    cache: DocumentCache,
    params: ChunkParams,
}

impl Harness {
    fn new(chunk_size: usize, overlap: usize) -> Self {
        let dir = TempDir::new().unwrap();
        let cache = DocumentCache::new(dir.path().join("processed_docs.json"));
        Self {
            _dir: dir,
            storage: Arc::new(FakeStorage::default()),
            index: Arc::new(InMemoryIndex::new()),
            embedder: Arc::new(CountingEmbedder::default()),
            cache,
            params: ChunkParams::new(chunk_size, overlap).unwrap(),
        }
    }

    fn pipeline(&self) -> Pipeline {
        Pipeline::new(
            self.storage.clone(),
            self.index.clone(),
            self.embedder.clone(),
            self.cache.clone(),
            self.params,
        )
        .with_batch_size(4)
    }
}

// ─── Tests ──────────────────────────────────────────────────────────

#[tokio::test]
async fn three_documents_yield_eight_entries() {
    let h = Harness::new(300, 50);
    h.storage.put("rag/a.md", "1", &"a".repeat(500));
    h.storage.put("rag/b.md", "1", &"b".repeat(50));
    h.storage.put("rag/c.md", "1", &"c".repeat(1200));

    let report = h.pipeline().prepare(false).await.unwrap();
    assert_eq!(report.outcome, PipelineOutcome::Processed);
    assert_eq!(report.chunks, 8);
    assert_eq!(report.indexed, 8);
    assert_eq!(h.index.count().await.unwrap(), 8);

    let snapshot = h.cache.load().unwrap().unwrap();
    let per_doc: Vec<usize> = snapshot.documents.values().map(|d| d.chunks.len()).collect();
    assert_eq!(per_doc, vec![2, 1, 5]);
}

#[tokio::test]
async fn second_startup_reuses_cache_without_fetch_or_embed() {
    let h = Harness::new(300, 50);
    h.storage.put("rag/a.md", "etag-1", &"a".repeat(500));
    h.storage.put("rag/b.md", "etag-1", &"b".repeat(700));

    h.pipeline().prepare(false).await.unwrap();
    let fetches = h.storage.fetches();
    let embeds = h.embedder.calls();
    assert!(fetches > 0 && embeds > 0);

    let report = h.pipeline().prepare(false).await.unwrap();
    assert_eq!(report.outcome, PipelineOutcome::Reused);
    assert_eq!(h.storage.fetches(), fetches);
    assert_eq!(h.embedder.calls(), embeds);
}

#[tokio::test]
async fn fingerprint_mismatch_reprocesses_and_rewrites_cache() {
    let h = Harness::new(300, 50);
    h.storage.put("rag/a.md", "etag-1", &"a".repeat(500));
    h.pipeline().prepare(false).await.unwrap();
    let before = h.cache.load().unwrap().unwrap();

    h.storage.put("rag/a.md", "etag-2", &"z".repeat(260));
    let fetches = h.storage.fetches();
    let report = h.pipeline().prepare(false).await.unwrap();

    assert_eq!(report.outcome, PipelineOutcome::Processed);
    assert_eq!(h.storage.fetches(), fetches + 1);
    let after = h.cache.load().unwrap().unwrap();
    assert_ne!(before, after);
    assert_eq!(after.documents["rag/a.md"].fingerprint, "etag-2");
    // The old second chunk (offset 250) no longer exists.
    assert_eq!(report.removed, 1);
    assert_eq!(h.index.count().await.unwrap(), 1);
}

#[tokio::test]
async fn deleted_document_entries_are_removed() {
    let h = Harness::new(300, 50);
    h.storage.put("rag/a.md", "1", &"a".repeat(100));
    h.storage.put("rag/b.md", "1", &"b".repeat(100));
    h.pipeline().prepare(false).await.unwrap();
    assert_eq!(h.index.count().await.unwrap(), 2);

    h.storage.delete("rag/b.md");
    let report = h.pipeline().prepare(false).await.unwrap();
    assert_eq!(report.removed, 1);
    assert_eq!(h.index.count().await.unwrap(), 1);
}

#[tokio::test]
async fn reindexing_is_idempotent() {
    let h = Harness::new(300, 50);
    h.storage.put("rag/a.md", "1", &"a".repeat(900));
    h.pipeline().prepare(false).await.unwrap();
    let count = h.index.count().await.unwrap();
    let snapshot = h.cache.load().unwrap().unwrap();
    let first_id = snapshot.documents["rag/a.md"].chunks[0].chunk_id.clone();
    let entry = h.index.get(&first_id).unwrap().unwrap();

    h.pipeline().prepare(true).await.unwrap();
    h.pipeline().prepare(true).await.unwrap();
    assert_eq!(h.index.count().await.unwrap(), count);
    assert_eq!(h.index.get(&first_id).unwrap().unwrap(), entry);
}

#[tokio::test]
async fn incomplete_index_is_rebuilt_from_cache() {
    let h = Harness::new(300, 50);
    h.storage.put("rag/a.md", "1", &"a".repeat(500));
    h.pipeline().prepare(false).await.unwrap();
    let fetches = h.storage.fetches();

    h.index.clear().await.unwrap();
    let report = h.pipeline().prepare(false).await.unwrap();
    assert_eq!(report.outcome, PipelineOutcome::Reindexed);
    assert_eq!(h.storage.fetches(), fetches);
    assert_eq!(h.index.count().await.unwrap(), 2);
}

#[tokio::test]
async fn only_missing_chunks_are_reembedded() {
    let h = Harness::new(300, 50);
    h.storage.put("rag/a.md", "1", &"a".repeat(1200));
    h.pipeline().prepare(false).await.unwrap();
    let snapshot = h.cache.load().unwrap().unwrap();
    let lost = snapshot.documents["rag/a.md"].chunks[3].chunk_id.clone();
    h.index.remove(&[lost.clone()]).await.unwrap();

    let report = h.pipeline().prepare(false).await.unwrap();
    assert_eq!(report.outcome, PipelineOutcome::Reindexed);
    assert_eq!(report.indexed, 1);
    assert!(h.index.get(&lost).unwrap().is_some());
}

#[tokio::test]
async fn changed_chunk_params_make_cache_stale() {
    let h = Harness::new(300, 50);
    h.storage.put("rag/a.md", "1", &"a".repeat(500));
    h.pipeline().prepare(false).await.unwrap();

    let other = Pipeline::new(
        h.storage.clone(),
        h.index.clone(),
        h.embedder.clone(),
        h.cache.clone(),
        ChunkParams::new(200, 0).unwrap(),
    );
    let report = other.prepare(false).await.unwrap();
    assert_eq!(report.outcome, PipelineOutcome::Processed);
    assert_eq!(report.chunks, 3);
}

#[tokio::test]
async fn undecodable_document_is_skipped_until_it_changes() {
    let h = Harness::new(300, 50);
    h.storage.put("rag/a.md", "1", &"a".repeat(1200));
    h.storage.put("rag/scan.pdf", "1", "%PDF");
    h.storage.broken.lock().unwrap().push("rag/scan.pdf".into());

    let report = h.pipeline().prepare(false).await.unwrap();
    assert_eq!(report.skipped, vec!["rag/scan.pdf".to_string()]);
    assert_eq!(report.fetched, 1);
    let snapshot = h.cache.load().unwrap().unwrap();
    assert!(!snapshot.documents.contains_key("rag/scan.pdf"));
    assert_eq!(snapshot.skipped["rag/scan.pdf"], "1");

    let fetches = h.storage.fetches();
    let embeds = h.embedder.calls();
    let report = h.pipeline().prepare(false).await.unwrap();
    assert_eq!(report.outcome, PipelineOutcome::Reused);
    assert_eq!(h.storage.fetches(), fetches);
    assert_eq!(h.embedder.calls(), embeds);

    // A new upload of the same key is tried again.
    h.storage.broken.lock().unwrap().clear();
    h.storage.put("rag/scan.pdf", "2", "scanned timetable");
    let report = h.pipeline().prepare(false).await.unwrap();
    assert_eq!(report.outcome, PipelineOutcome::Processed);
    let snapshot = h.cache.load().unwrap().unwrap();
    assert!(snapshot.documents.contains_key("rag/scan.pdf"));
    assert!(snapshot.skipped.is_empty());
}

#[tokio::test]
async fn transient_fetch_failure_is_retried_next_startup() {
    let h = Harness::new(300, 50);
    h.storage.put("rag/a.md", "1", &"a".repeat(100));
    h.storage.put("rag/b.md", "1", &"b".repeat(100));
    h.storage.unreachable.lock().unwrap().push("rag/b.md".into());

    let report = h.pipeline().prepare(false).await.unwrap();
    assert_eq!(report.skipped, vec!["rag/b.md".to_string()]);
    let snapshot = h.cache.load().unwrap().unwrap();
    assert!(snapshot.skipped.is_empty());

    h.storage.unreachable.lock().unwrap().clear();
    let report = h.pipeline().prepare(false).await.unwrap();
    assert_eq!(report.outcome, PipelineOutcome::Processed);
    assert_eq!(h.index.count().await.unwrap(), 2);
}

#[tokio::test]
async fn startup_without_cache_drops_leftover_entries() {
    let h = Harness::new(300, 50);
    h.storage.put("rag/a.md", "1", &"a".repeat(100));
    h.storage.put("rag/old.md", "1", &"o".repeat(100));
    h.pipeline().prepare(false).await.unwrap();
    assert_eq!(h.index.count().await.unwrap(), 2);

    std::fs::remove_file(h.cache.path()).unwrap();
    h.storage.delete("rag/old.md");
    h.pipeline().prepare(false).await.unwrap();
    assert_eq!(h.index.count().await.unwrap(), 1);

    let report = h.pipeline().prepare(false).await.unwrap();
    assert_eq!(report.outcome, PipelineOutcome::Reused);
}

#[tokio::test]
async fn entries_outside_the_cache_force_a_rebuild() {
    let h = Harness::new(300, 50);
    h.storage.put("rag/a.md", "1", &"a".repeat(500));
    h.pipeline().prepare(false).await.unwrap();
    let snapshot = h.cache.load().unwrap().unwrap();
    let kept = snapshot.documents["rag/a.md"].chunks[1].chunk_id.clone();

    // Same count as the cache expects, but one cached chunk was replaced by a stray entry.
    h.index.remove(&[kept.clone()]).await.unwrap();
    h.index
        .upsert(&IndexEntry {
            chunk_id: "stray".into(),
            embedding: vec![1.0, 1.0],
            text: "stray".into(),
            metadata: EntryMetadata::default(),
        })
        .await
        .unwrap();

    assert_eq!(h.index.count().await.unwrap(), 2);

    let fetches = h.storage.fetches();
    let report = h.pipeline().prepare(false).await.unwrap();
    assert_eq!(report.outcome, PipelineOutcome::Reindexed);
    assert_eq!(h.storage.fetches(), fetches);
    assert_eq!(h.index.count().await.unwrap(), 2);
    assert!(h.index.get(&kept).unwrap().is_some());
    assert!(h.index.get("stray").unwrap().is_none());
}

#[tokio::test]
async fn malformed_cache_is_fatal_unless_forced() {
    let h = Harness::new(300, 50);
    h.storage.put("rag/a.md", "1", &"a".repeat(100));
    std::fs::write(h.cache.path(), "garbage").unwrap();

    let err = h.pipeline().prepare(false).await.unwrap_err();
    assert!(err.is_fatal());

    let report = h.pipeline().prepare(true).await.unwrap();
    assert_eq!(report.outcome, PipelineOutcome::Processed);
    assert!(h.cache.load().unwrap().is_some());
}

#[tokio::test]
async fn schema_mismatch_stops_startup() {
    let h = Harness::new(300, 50);
    h.storage.put("rag/a.md", "1", &"a".repeat(100));
    h.index.ensure_schema(768).await.unwrap();

    let err = h.pipeline().prepare(false).await.unwrap_err();
    assert!(matches!(err, RagError::SchemaMismatch { expected: 2, found: 768 }));
}

// ─── Metadata extraction ────────────────────────────────────────────

struct ScriptedGenerator(String);

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn complete(&self, _system: &str, user: &str) -> Result<String> {
        assert!(user.chars().count() <= 1800);
        if self.0.is_empty() {
            return Err(RagError::Transient("timeout".into()));
        }
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn metadata_extraction_fills_title_and_topics() {
    let h = Harness::new(300, 50);
    h.storage.put("rag/fees.md", "1", &"x".repeat(4000));
    let generator = Arc::new(ScriptedGenerator(
        "```json\n{\"title\": \"Tuition Fees\", \"topics\": \"fees, deadlines\"}\n```".into(),
    ));

    h.pipeline()
        .with_metadata_extraction(generator)
        .prepare(false)
        .await
        .unwrap();
    let snapshot = h.cache.load().unwrap().unwrap();
    let meta = &snapshot.documents["rag/fees.md"].metadata;
    assert_eq!(meta.title.as_deref(), Some("Tuition Fees"));
    assert_eq!(meta.topics.as_deref(), Some("fees, deadlines"));
}

#[tokio::test]
async fn metadata_extraction_failure_falls_back() {
    let h = Harness::new(300, 50);
    h.storage.put("rag/fees.md", "1", "short text");

    h.pipeline()
        .with_metadata_extraction(Arc::new(ScriptedGenerator(String::new())))
        .prepare(false)
        .await
        .unwrap();
    let snapshot = h.cache.load().unwrap().unwrap();
    let meta = &snapshot.documents["rag/fees.md"].metadata;
    assert_eq!(meta.title.as_deref(), Some("File fees.md"));
    assert_eq!(meta.topics.as_deref(), Some("not defined"));
}
