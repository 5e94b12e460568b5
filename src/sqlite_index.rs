//! SQLite index backend: entries table with BLOB vectors plus an FTS5 table.
//!
//! Vector search is a brute-force cosine scan in Rust. Lexical search ORs
//! the quoted query terms through FTS5 and maps the BM25 rank `r` to
//! `s / (1 + s)` with `s = -r`, keeping scores in `[0, 1)`.

use std::collections::HashSet;

use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use campus_rag_core::embedding::{blob_to_vec, vec_to_blob, vector_relevance};
use campus_rag_core::models::{EntryMetadata, IndexEntry};
use campus_rag_core::store::{query_terms, IndexBackend, ScoredEntry};
use campus_rag_core::{RagError, Result};

fn db_error(e: sqlx::Error) -> RagError {
    RagError::Other(anyhow::Error::from(e).context("index database error"))
}

pub struct SqliteIndex {
    pool: SqlitePool,
}

impl SqliteIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Dimensionality recorded at creation, if the schema exists.
    pub async fn stored_dims(&self) -> Result<Option<usize>> {
        let table_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='index_meta'",
        )
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;
        if !table_exists {
            return Ok(None);
        }
        let dims: Option<i64> =
            sqlx::query_scalar("SELECT CAST(value AS INTEGER) FROM index_meta WHERE key = 'dims'")
                .fetch_optional(&self.pool)
                .await
                .map_err(db_error)?;
        Ok(dims.map(|d| d as usize))
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

fn row_to_entry(row: &sqlx::sqlite::SqliteRow, score: f64) -> ScoredEntry {
    let position: i64 = row.get("position");
    let offset: i64 = row.get("char_offset");
    ScoredEntry {
        chunk_id: row.get("chunk_id"),
        text: row.get("text"),
        metadata: EntryMetadata {
            source_id: row.get("source_id"),
            position: position as usize,
            offset: offset as usize,
            title: row.get("title"),
            url: row.get("url"),
        },
        score,
    }
}

/// FTS5 query: each term quoted, joined with OR.
fn fts_query(text: &str) -> Option<String> {
    let terms = query_terms(text);
    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn bm25_relevance(rank: f64) -> f64 {
    let s = (-rank).max(0.0);
    s / (1.0 + s)
}

async fn write_entry(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    entry: &IndexEntry,
) -> std::result::Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO entries (chunk_id, source_id, position, char_offset, title, url, text, embedding)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(chunk_id) DO UPDATE SET
            source_id = excluded.source_id,
            position = excluded.position,
            char_offset = excluded.char_offset,
            title = excluded.title,
            url = excluded.url,
            text = excluded.text,
            embedding = excluded.embedding
        "#,
    )
    .bind(&entry.chunk_id)
    .bind(&entry.metadata.source_id)
    .bind(entry.metadata.position as i64)
    .bind(entry.metadata.offset as i64)
    .bind(&entry.metadata.title)
    .bind(&entry.metadata.url)
    .bind(&entry.text)
    .bind(vec_to_blob(&entry.embedding))
    .execute(&mut **tx)
    .await?;

    sqlx::query("DELETE FROM entries_fts WHERE chunk_id = ?")
        .bind(&entry.chunk_id)
        .execute(&mut **tx)
        .await?;
    sqlx::query("INSERT INTO entries_fts (chunk_id, text) VALUES (?, ?)")
        .bind(&entry.chunk_id)
        .bind(&entry.text)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

#[async_trait]
impl IndexBackend for SqliteIndex {
    async fn ensure_schema(&self, dims: usize) -> Result<()> {
        if let Some(found) = self.stored_dims().await? {
            if found != dims {
                return Err(RagError::SchemaMismatch {
                    expected: dims,
                    found,
                });
            }
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(db_error)?;
        sqlx::query("CREATE TABLE IF NOT EXISTS index_meta (key TEXT PRIMARY KEY, value TEXT NOT NULL)")
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS entries (
                chunk_id TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                position INTEGER NOT NULL,
                char_offset INTEGER NOT NULL,
                title TEXT,
                url TEXT,
                text TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_source ON entries(source_id)")
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        // FTS5 CREATE is not idempotent natively, so we check first
        let fts_exists: bool = sqlx::query_scalar(
            "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name='entries_fts'",
        )
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;
        if !fts_exists {
            sqlx::query("CREATE VIRTUAL TABLE entries_fts USING fts5(chunk_id UNINDEXED, text)")
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
        }

        sqlx::query("INSERT INTO index_meta (key, value) VALUES ('dims', ?)")
            .bind(dims.to_string())
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn upsert(&self, entry: &IndexEntry) -> Result<()> {
        self.upsert_batch(std::slice::from_ref(entry)).await
    }

    async fn upsert_batch(&self, entries: &[IndexEntry]) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        for entry in entries {
            write_entry(&mut tx, entry).await.map_err(db_error)?;
        }
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    async fn search_vector(&self, embedding: &[f32], n: usize) -> Result<Vec<ScoredEntry>> {
        let rows = sqlx::query(
            "SELECT chunk_id, source_id, position, char_offset, title, url, text, embedding FROM entries",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut hits: Vec<ScoredEntry> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                let score = vector_relevance(embedding, &blob_to_vec(&blob));
                row_to_entry(row, score)
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(n);
        Ok(hits)
    }

    async fn search_lexical(&self, text: &str, n: usize) -> Result<Vec<ScoredEntry>> {
        let Some(query) = fts_query(text) else {
            return Ok(Vec::new());
        };
        let rows = sqlx::query(
            r#"
            SELECT e.chunk_id, e.source_id, e.position, e.char_offset, e.title, e.url, e.text,
                   bm25(entries_fts) AS rank
            FROM entries_fts
            JOIN entries e ON e.chunk_id = entries_fts.chunk_id
            WHERE entries_fts MATCH ?
            ORDER BY rank, e.chunk_id
            LIMIT ?
            "#,
        )
        .bind(query)
        .bind(n as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows
            .iter()
            .map(|row| {
                let rank: f64 = row.get("rank");
                row_to_entry(row, bm25_relevance(rank))
            })
            .collect())
    }

    async fn count(&self) -> Result<usize> {
        if self.stored_dims().await?.is_none() {
            return Ok(0);
        }
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM entries")
            .fetch_one(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(count as usize)
    }

    async fn missing(&self, chunk_ids: &[String]) -> Result<Vec<String>> {
        if self.stored_dims().await?.is_none() {
            return Ok(chunk_ids.to_vec());
        }
        let stored: Vec<String> = sqlx::query_scalar("SELECT chunk_id FROM entries")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        let stored: HashSet<String> = stored.into_iter().collect();
        Ok(chunk_ids
            .iter()
            .filter(|id| !stored.contains(id.as_str()))
            .cloned()
            .collect())
    }

    async fn remove(&self, chunk_ids: &[String]) -> Result<usize> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut removed = 0;
        for id in chunk_ids {
            let result = sqlx::query("DELETE FROM entries WHERE chunk_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
            sqlx::query("DELETE FROM entries_fts WHERE chunk_id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
            removed += result.rows_affected() as usize;
        }
        tx.commit().await.map_err(db_error)?;
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        for stmt in [
            "DROP TABLE IF EXISTS entries_fts",
            "DROP TABLE IF EXISTS entries",
            "DROP TABLE IF EXISTS index_meta",
        ] {
            sqlx::query(stmt).execute(&mut *tx).await.map_err(db_error)?;
        }
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }
}
