//! Metadata storage using SQLite
//!
//! This module handles all document lifecycle storage:
//! - Documents (one row per distinct source path)
//! - Chunks (the pieces each document was split into)
//! - Processing logs (append-only status audit trail)

mod schema;

pub use schema::*;

use crate::error::{Error, Result};
use crate::store::metadata_filter_clause;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::FromRow;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use tracing::{debug, error, info};
use uuid::Uuid;

/// Document processing status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DocumentStatus::Pending => write!(f, "pending"),
            DocumentStatus::Processing => write!(f, "processing"),
            DocumentStatus::Completed => write!(f, "completed"),
            DocumentStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for DocumentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(DocumentStatus::Pending),
            "processing" => Ok(DocumentStatus::Processing),
            "completed" => Ok(DocumentStatus::Completed),
            "failed" => Ok(DocumentStatus::Failed),
            _ => Err(Error::Validation(format!("Unknown document status: {}", s))),
        }
    }
}

/// Identity and attributes of a document entering the pipeline
#[derive(Debug, Clone)]
pub struct DocumentInfo {
    pub file_path: String,
    pub filename: String,
    pub file_size: i64,
    pub file_type: Option<String>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A document row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub filename: String,
    pub file_path: String,
    pub file_size: i64,
    pub file_type: Option<String>,
    pub metadata: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl Document {
    pub fn metadata_map(&self) -> serde_json::Map<String, serde_json::Value> {
        serde_json::from_str::<serde_json::Value>(&self.metadata)
            .ok()
            .and_then(|v| v.as_object().cloned())
            .unwrap_or_default()
    }

    pub fn get_status(&self) -> Result<DocumentStatus> {
        self.status.parse()
    }
}

/// A chunk row
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Chunk {
    pub id: String,
    pub document_id: String,
    pub chunk_index: i64,
    pub content: String,
    pub metadata: String,
    pub created_at: String,
}

/// A chunk to be written for a document
#[derive(Debug, Clone)]
pub struct NewChunk {
    pub chunk_index: i64,
    pub content: String,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

/// A processing log row (append-only)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ProcessingLog {
    pub id: String,
    pub document_id: String,
    pub status: String,
    pub message: String,
    pub created_at: String,
}

/// A recently-updated document summary for dashboards
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RecentDocument {
    pub filename: String,
    pub status: String,
    pub updated_at: String,
}

/// Processing statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct ProcessingStats {
    pub total_documents: usize,
    pub total_chunks: usize,
    pub status_breakdown: HashMap<String, usize>,
    pub recent_activity: Vec<RecentDocument>,
}

/// Metadata database handle
#[derive(Clone)]
pub struct MetadataStore {
    pool: SqlitePool,
}

impl MetadataStore {
    /// Open (or create) the metadata database at the given path
    pub async fn new(db_path: &Path) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to metadata database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// Insert the document if absent, otherwise refresh its attributes.
    ///
    /// Keyed by source path; the status of an existing row is left alone so
    /// an in-flight attempt is never clobbered by a re-submission.
    pub async fn upsert_document(&self, info: &DocumentInfo) -> Result<Document> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO documents (id, filename, file_path, file_size, file_type, metadata, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)
            ON CONFLICT(file_path) DO UPDATE SET
                filename = excluded.filename,
                file_size = excluded.file_size,
                file_type = excluded.file_type,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&info.filename)
        .bind(&info.file_path)
        .bind(info.file_size)
        .bind(&info.file_type)
        .bind(serde_json::Value::Object(info.metadata.clone()).to_string())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_document(&info.file_path)
            .await?
            .ok_or_else(|| Error::NotFound(format!("document {}", info.file_path)))
    }

    /// Create the document row if absent, leaving an existing row
    /// completely untouched
    pub async fn ensure_document(&self, info: &DocumentInfo) -> Result<Document> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO documents (id, filename, file_path, file_size, file_type, metadata, status, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, 'pending', ?, ?)
            ON CONFLICT(file_path) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&info.filename)
        .bind(&info.file_path)
        .bind(info.file_size)
        .bind(&info.file_type)
        .bind(serde_json::Value::Object(info.metadata.clone()).to_string())
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        self.get_document(&info.file_path)
            .await?
            .ok_or_else(|| Error::NotFound(format!("document {}", info.file_path)))
    }

    /// Exclusive claim on a document before processing begins.
    ///
    /// Compare-and-swap into `processing`; returns false when another
    /// worker already holds the document.
    pub async fn claim_for_processing(&self, file_path: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = 'processing', updated_at = ?
            WHERE file_path = ? AND status != 'processing'
            "#,
        )
        .bind(Utc::now().to_rfc3339())
        .bind(file_path)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Store a document's chunk set and mark it completed.
    ///
    /// One transaction: the document upsert, the replacement of its chunk
    /// rows, and the final status all commit together or not at all. On
    /// failure the document is explicitly moved to `failed` with the
    /// captured error so it can never sit at `processing` indefinitely.
    pub async fn store_metadata(&self, info: &DocumentInfo, chunks: &[NewChunk]) -> Result<()> {
        match self.store_metadata_tx(info, chunks).await {
            Ok(()) => {
                info!(
                    "Stored metadata for {} ({} chunks)",
                    info.file_path,
                    chunks.len()
                );
                Ok(())
            }
            Err(e) => {
                error!("Failed to store metadata for {}: {}", info.file_path, e);
                if let Err(status_err) = self
                    .update_processing_status(&info.file_path, DocumentStatus::Failed, &e.to_string())
                    .await
                {
                    error!(
                        "Could not record failure for {}: {}",
                        info.file_path, status_err
                    );
                }
                Err(e)
            }
        }
    }

    async fn store_metadata_tx(&self, info: &DocumentInfo, chunks: &[NewChunk]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let doc_id: Option<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE file_path = ?")
                .bind(&info.file_path)
                .fetch_optional(&mut *tx)
                .await?;

        let doc_id = match doc_id {
            Some(id) => id,
            None => {
                let id = Uuid::new_v4().to_string();
                sqlx::query(
                    r#"
                    INSERT INTO documents (id, filename, file_path, file_size, file_type, metadata, status, created_at, updated_at)
                    VALUES (?, ?, ?, ?, ?, ?, 'processing', ?, ?)
                    "#,
                )
                .bind(&id)
                .bind(&info.filename)
                .bind(&info.file_path)
                .bind(info.file_size)
                .bind(&info.file_type)
                .bind(serde_json::Value::Object(info.metadata.clone()).to_string())
                .bind(&now)
                .bind(&now)
                .execute(&mut *tx)
                .await?;
                id
            }
        };

        // Replace, not append: re-ingesting a document must leave exactly
        // one chunk set behind
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(&doc_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, chunk_index, content, metadata, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&doc_id)
            .bind(chunk.chunk_index)
            .bind(&chunk.content)
            .bind(serde_json::Value::Object(chunk.metadata.clone()).to_string())
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query("UPDATE documents SET status = 'completed', updated_at = ? WHERE id = ?")
            .bind(&now)
            .bind(&doc_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(())
    }

    /// Update a document's status and append a processing log entry, as a
    /// single transaction
    pub async fn update_processing_status(
        &self,
        file_path: &str,
        status: DocumentStatus,
        message: &str,
    ) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let doc_id: Option<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE file_path = ?")
                .bind(file_path)
                .fetch_optional(&mut *tx)
                .await?;

        let doc_id = doc_id.ok_or_else(|| Error::NotFound(format!("document {}", file_path)))?;

        sqlx::query("UPDATE documents SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.to_string())
            .bind(&now)
            .bind(&doc_id)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO processing_logs (id, document_id, status, message, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(&doc_id)
        .bind(status.to_string())
        .bind(message)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!("Status for {}: {}", file_path, status);
        Ok(())
    }

    /// Get a document by source path
    pub async fn get_document(&self, file_path: &str) -> Result<Option<Document>> {
        let doc = sqlx::query_as::<_, Document>("SELECT * FROM documents WHERE file_path = ?")
            .bind(file_path)
            .fetch_optional(&self.pool)
            .await?;
        Ok(doc)
    }

    /// Get a document's chunks, ordered by chunk index
    pub async fn get_chunks_for_document(&self, file_path: &str) -> Result<Vec<Chunk>> {
        let chunks = sqlx::query_as::<_, Chunk>(
            r#"
            SELECT c.* FROM chunks c
            JOIN documents d ON c.document_id = d.id
            WHERE d.file_path = ?
            ORDER BY c.chunk_index
            "#,
        )
        .bind(file_path)
        .fetch_all(&self.pool)
        .await?;
        Ok(chunks)
    }

    /// Get the processing log history for a document, oldest first
    pub async fn get_processing_logs(&self, file_path: &str) -> Result<Vec<ProcessingLog>> {
        let logs = sqlx::query_as::<_, ProcessingLog>(
            r#"
            SELECT l.* FROM processing_logs l
            JOIN documents d ON l.document_id = d.id
            WHERE d.file_path = ?
            ORDER BY l.created_at, l.id
            "#,
        )
        .bind(file_path)
        .fetch_all(&self.pool)
        .await?;
        Ok(logs)
    }

    /// Search documents by metadata equality filters, newest first.
    ///
    /// An empty filter set returns all documents.
    pub async fn search_metadata(
        &self,
        filters: &serde_json::Map<String, serde_json::Value>,
    ) -> Result<Vec<Document>> {
        let (clause, params) = metadata_filter_clause(filters)?;

        let sql = format!(
            "SELECT * FROM documents WHERE {} ORDER BY created_at DESC",
            clause
        );

        let mut query = sqlx::query_as::<_, Document>(&sql);
        for param in &params {
            query = query.bind(param);
        }

        Ok(query.fetch_all(&self.pool).await?)
    }

    /// Delete a document's processing record and chunks.
    ///
    /// Chunk deletion is explicit here; embeddings in the vector store are
    /// a separate, caller-driven deletion. Processing logs are an
    /// append-only audit trail and survive the document.
    pub async fn delete_document(&self, file_path: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let doc_id: Option<String> =
            sqlx::query_scalar("SELECT id FROM documents WHERE file_path = ?")
                .bind(file_path)
                .fetch_optional(&mut *tx)
                .await?;

        let Some(doc_id) = doc_id else {
            return Ok(false);
        };

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(&doc_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(&doc_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }

    /// List documents currently in a given status
    pub async fn documents_with_status(&self, status: DocumentStatus) -> Result<Vec<Document>> {
        let docs = sqlx::query_as::<_, Document>(
            "SELECT * FROM documents WHERE status = ? ORDER BY updated_at DESC",
        )
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await?;
        Ok(docs)
    }

    /// Aggregate processing statistics
    pub async fn get_processing_stats(&self, recent_limit: usize) -> Result<ProcessingStats> {
        let status_rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM documents GROUP BY status")
                .fetch_all(&self.pool)
                .await?;

        let total_documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;

        let total_chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;

        let recent_activity = sqlx::query_as::<_, RecentDocument>(
            r#"
            SELECT filename, status, updated_at
            FROM documents
            ORDER BY updated_at DESC
            LIMIT ?
            "#,
        )
        .bind(recent_limit as i64)
        .fetch_all(&self.pool)
        .await?;

        Ok(ProcessingStats {
            total_documents: total_documents as usize,
            total_chunks: total_chunks as usize,
            status_breakdown: status_rows
                .into_iter()
                .map(|(status, count)| (status, count as usize))
                .collect(),
            recent_activity,
        })
    }

    /// Cheap connectivity probe for health checks
    pub async fn ping(&self) -> Result<()> {
        sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    /// Close the connection pool
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup_store() -> (MetadataStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = MetadataStore::new(&tmp.path().join("metadata.db"))
            .await
            .unwrap();
        (store, tmp)
    }

    fn doc_info(path: &str) -> DocumentInfo {
        let mut metadata = serde_json::Map::new();
        metadata.insert("origin".to_string(), json!("test"));
        DocumentInfo {
            file_path: path.to_string(),
            filename: path.rsplit('/').next().unwrap_or(path).to_string(),
            file_size: 1024,
            file_type: Some("txt".to_string()),
            metadata,
        }
    }

    fn chunk(index: i64, content: &str) -> NewChunk {
        NewChunk {
            chunk_index: index,
            content: content.to_string(),
            metadata: serde_json::Map::new(),
        }
    }

    #[tokio::test]
    async fn test_upsert_document_is_idempotent() {
        let (store, _tmp) = setup_store().await;

        let first = store.upsert_document(&doc_info("/docs/a.txt")).await.unwrap();
        let second = store.upsert_document(&doc_info("/docs/a.txt")).await.unwrap();

        assert_eq!(first.id, second.id);

        let all = store.search_metadata(&serde_json::Map::new()).await.unwrap();
        assert_eq!(all.len(), 1);
    }

    #[tokio::test]
    async fn test_store_metadata_transactional_and_idempotent() {
        let (store, _tmp) = setup_store().await;
        let info = doc_info("/docs/report.txt");
        let chunks = vec![chunk(0, "first part"), chunk(1, "second part")];

        store.store_metadata(&info, &chunks).await.unwrap();
        store.store_metadata(&info, &chunks).await.unwrap();

        let docs = store.search_metadata(&serde_json::Map::new()).await.unwrap();
        assert_eq!(docs.len(), 1, "upsert must never duplicate a document");
        assert_eq!(docs[0].status, "completed");

        let stored = store
            .get_chunks_for_document("/docs/report.txt")
            .await
            .unwrap();
        assert_eq!(stored.len(), 2, "chunk set must be replaced, not appended");
        assert_eq!(stored[0].chunk_index, 0);
        assert_eq!(stored[1].chunk_index, 1);
        assert_eq!(stored[0].content, "first part");
    }

    #[tokio::test]
    async fn test_status_update_appends_log() {
        let (store, _tmp) = setup_store().await;
        store.upsert_document(&doc_info("/docs/a.txt")).await.unwrap();

        store
            .update_processing_status("/docs/a.txt", DocumentStatus::Processing, "started")
            .await
            .unwrap();
        store
            .update_processing_status("/docs/a.txt", DocumentStatus::Failed, "provider timeout")
            .await
            .unwrap();

        let doc = store.get_document("/docs/a.txt").await.unwrap().unwrap();
        assert_eq!(doc.status, "failed");

        // Append-only: both transitions remain on record
        let logs = store.get_processing_logs("/docs/a.txt").await.unwrap();
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].status, "processing");
        assert_eq!(logs[1].status, "failed");
        assert_eq!(logs[1].message, "provider timeout");
    }

    #[tokio::test]
    async fn test_status_update_unknown_document() {
        let (store, _tmp) = setup_store().await;
        let err = store
            .update_processing_status("/nope", DocumentStatus::Completed, "")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_claim_is_exclusive() {
        let (store, _tmp) = setup_store().await;
        store.upsert_document(&doc_info("/docs/a.txt")).await.unwrap();

        assert!(store.claim_for_processing("/docs/a.txt").await.unwrap());
        // Second claim while processing must lose
        assert!(!store.claim_for_processing("/docs/a.txt").await.unwrap());

        // Released via a terminal status, the document can be claimed again
        store
            .update_processing_status("/docs/a.txt", DocumentStatus::Failed, "boom")
            .await
            .unwrap();
        assert!(store.claim_for_processing("/docs/a.txt").await.unwrap());
    }

    #[tokio::test]
    async fn test_search_metadata_filters_and_order() {
        let (store, _tmp) = setup_store().await;

        let mut info_a = doc_info("/docs/a.txt");
        info_a.metadata.insert("team".to_string(), json!("legal"));
        let mut info_b = doc_info("/docs/b.txt");
        info_b.metadata.insert("team".to_string(), json!("sales"));

        store.upsert_document(&info_a).await.unwrap();
        store.upsert_document(&info_b).await.unwrap();

        let mut filters = serde_json::Map::new();
        filters.insert("team".to_string(), json!("legal"));
        let results = store.search_metadata(&filters).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].file_path, "/docs/a.txt");

        let all = store.search_metadata(&serde_json::Map::new()).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_processing_stats() {
        let (store, _tmp) = setup_store().await;

        store
            .store_metadata(&doc_info("/docs/done.txt"), &[chunk(0, "c")])
            .await
            .unwrap();
        store.upsert_document(&doc_info("/docs/waiting.txt")).await.unwrap();

        let stats = store.get_processing_stats(10).await.unwrap();
        assert_eq!(stats.total_documents, 2);
        assert_eq!(stats.total_chunks, 1);
        assert_eq!(stats.status_breakdown.get("completed"), Some(&1));
        assert_eq!(stats.status_breakdown.get("pending"), Some(&1));
        assert_eq!(stats.recent_activity.len(), 2);

        let pending = store
            .documents_with_status(DocumentStatus::Pending)
            .await
            .unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].file_path, "/docs/waiting.txt");
    }

    #[tokio::test]
    async fn test_delete_document() {
        let (store, _tmp) = setup_store().await;
        store
            .store_metadata(&doc_info("/docs/a.txt"), &[chunk(0, "c")])
            .await
            .unwrap();

        assert!(store.delete_document("/docs/a.txt").await.unwrap());
        assert!(store.get_document("/docs/a.txt").await.unwrap().is_none());
        // Idempotent
        assert!(!store.delete_document("/docs/a.txt").await.unwrap());
    }
}
