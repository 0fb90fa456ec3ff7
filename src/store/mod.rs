//! Vector storage with exact similarity search
//!
//! Persists one record per chunk (content, embedding, metadata, source,
//! index) in SQLite, with embeddings as little-endian f32 blobs. Search is
//! an exact cosine ranking over the stored vectors: deterministic, stable,
//! and intentionally free of any approximate index structure.

use crate::embed::cosine_similarity;
use crate::error::{Error, Result};
use chrono::Utc;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use std::path::Path;
use tracing::{debug, info};

/// SQL schema for the vector database
pub const VECTOR_SCHEMA_SQL: &str = r#"
-- Embeddings: one row per stored chunk
CREATE TABLE IF NOT EXISTS embeddings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    content TEXT NOT NULL,
    embedding BLOB NOT NULL,
    metadata TEXT NOT NULL DEFAULT '{}',
    source_file TEXT NOT NULL,
    chunk_index INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS embeddings_source_idx ON embeddings(source_file);
"#;

/// A chunk record to be stored with its embedding
#[derive(Debug, Clone)]
pub struct EmbeddingRecord {
    pub content: String,
    pub embedding: Vec<f32>,
    pub metadata: Map<String, Value>,
    pub source_file: String,
    pub chunk_index: i64,
}

/// A ranked search hit
#[derive(Debug, Clone, serde::Serialize)]
pub struct SearchResult {
    pub content: String,
    pub metadata: Map<String, Value>,
    pub source_file: String,
    pub chunk_index: i64,
    pub similarity: f32,
}

/// Vector store statistics
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct VectorStoreStats {
    pub total_embeddings: usize,
    pub unique_sources: usize,
    /// Mean of each stored vector's similarity to itself. This is a storage
    /// round-trip self-check pinned at the similarity maximum by
    /// construction; it says nothing about corpus quality.
    pub avg_self_similarity: f32,
}

/// Vector store handle
#[derive(Clone)]
pub struct VectorStore {
    pool: SqlitePool,
    dimension: usize,
}

impl VectorStore {
    /// Open (or create) the vector database at the given path.
    ///
    /// The dimension is fixed for the lifetime of the store; every inserted
    /// vector must match it.
    pub async fn new(db_path: &Path, dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::Config(
                "Vector dimension must be positive".to_string(),
            ));
        }

        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        debug!("Connecting to vector database at {:?}", db_path);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let store = Self { pool, dimension };
        store.init_schema().await?;
        Ok(store)
    }

    /// Initialize the database schema
    pub async fn init_schema(&self) -> Result<()> {
        sqlx::query(VECTOR_SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }

    /// The fixed vector dimension for this store
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Batch-insert chunk records.
    ///
    /// The batch is all-or-nothing: a dimension mismatch on any record
    /// aborts the whole insert, naming the offending record.
    pub async fn store(&self, records: &[EmbeddingRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        for record in records {
            if record.embedding.len() != self.dimension {
                return Err(Error::DimensionMismatch {
                    doc_source: record.source_file.clone(),
                    chunk_index: record.chunk_index,
                    expected: self.dimension,
                    actual: record.embedding.len(),
                });
            }
        }

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for record in records {
            sqlx::query(
                r#"
                INSERT INTO embeddings (content, embedding, metadata, source_file, chunk_index, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&record.content)
            .bind(embedding_to_blob(&record.embedding))
            .bind(Value::Object(record.metadata.clone()).to_string())
            .bind(&record.source_file)
            .bind(record.chunk_index)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        info!("Stored {} embeddings", records.len());
        Ok(())
    }

    /// Search for chunks with similarity strictly greater than the
    /// threshold, ranked by descending similarity; ties keep insertion
    /// order. At most `limit` results.
    pub async fn search(
        &self,
        query_embedding: &[f32],
        limit: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let rows = sqlx::query(
            "SELECT id, content, metadata, source_file, chunk_index, embedding
             FROM embeddings ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        self.rank_rows(rows, query_embedding, limit, Some(similarity_threshold))
    }

    /// Search restricted to records whose metadata matches every `(key,
    /// value)` pair. The predicate is a parametrized equality AND; an empty
    /// filter set ranks everything.
    pub async fn search_with_metadata(
        &self,
        query_embedding: &[f32],
        filters: &Map<String, Value>,
        limit: usize,
    ) -> Result<Vec<SearchResult>> {
        let (clause, params) = metadata_filter_clause(filters)?;

        let sql = format!(
            "SELECT id, content, metadata, source_file, chunk_index, embedding
             FROM embeddings WHERE {} ORDER BY id",
            clause
        );

        let mut query = sqlx::query(&sql);
        for param in &params {
            query = query.bind(param);
        }
        let rows = query.fetch_all(&self.pool).await?;

        self.rank_rows(rows, query_embedding, limit, None)
    }

    fn rank_rows(
        &self,
        rows: Vec<sqlx::sqlite::SqliteRow>,
        query_embedding: &[f32],
        limit: usize,
        threshold: Option<f32>,
    ) -> Result<Vec<SearchResult>> {
        if query_embedding.len() != self.dimension {
            return Err(Error::Validation(format!(
                "Query vector has dimension {}, store expects {}",
                query_embedding.len(),
                self.dimension
            )));
        }
        if query_embedding.iter().all(|v| *v == 0.0) {
            return Err(Error::Validation(
                "Cannot search with a zero-norm query vector".to_string(),
            ));
        }

        let mut scored: Vec<(i64, SearchResult)> = Vec::new();
        for row in rows {
            let id: i64 = row.get("id");
            let blob: Vec<u8> = row.get("embedding");
            let embedding = blob_to_embedding(&blob);

            let similarity = match cosine_similarity(query_embedding, &embedding) {
                Ok(s) => s,
                // A degenerate stored vector cannot be ranked; leave it out
                Err(_) => continue,
            };

            if let Some(t) = threshold {
                if similarity <= t {
                    continue;
                }
            }

            let metadata_json: String = row.get("metadata");
            let metadata = serde_json::from_str::<Value>(&metadata_json)
                .ok()
                .and_then(|v| v.as_object().cloned())
                .unwrap_or_default();

            scored.push((
                id,
                SearchResult {
                    content: row.get("content"),
                    metadata,
                    source_file: row.get("source_file"),
                    chunk_index: row.get("chunk_index"),
                    similarity,
                },
            ));
        }

        scored.sort_by(|(id_a, a), (id_b, b)| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(id_a.cmp(id_b))
        });
        scored.truncate(limit);

        Ok(scored.into_iter().map(|(_, r)| r).collect())
    }

    /// Delete every record for a source. Idempotent; returns the number of
    /// rows removed.
    pub async fn delete_by_source(&self, source_file: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM embeddings WHERE source_file = ?")
            .bind(source_file)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected();
        if deleted > 0 {
            info!("Deleted {} embeddings for {}", deleted, source_file);
        }
        Ok(deleted)
    }

    /// Aggregate statistics for the store
    pub async fn get_stats(&self) -> Result<VectorStoreStats> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&self.pool)
            .await?;

        let sources: i64 = sqlx::query_scalar("SELECT COUNT(DISTINCT source_file) FROM embeddings")
            .fetch_one(&self.pool)
            .await?;

        // Diagnostic self-check: each vector compared against itself. Any
        // value below the maximum indicates a corrupted blob, not a corpus
        // property.
        let blobs: Vec<Vec<u8>> = sqlx::query_scalar("SELECT embedding FROM embeddings")
            .fetch_all(&self.pool)
            .await?;
        let mut self_sims = Vec::with_capacity(blobs.len());
        for blob in &blobs {
            let v = blob_to_embedding(blob);
            if let Ok(s) = cosine_similarity(&v, &v) {
                self_sims.push(s);
            }
        }
        let avg_self_similarity = if self_sims.is_empty() {
            0.0
        } else {
            self_sims.iter().sum::<f32>() / self_sims.len() as f32
        };

        Ok(VectorStoreStats {
            total_embeddings: total as usize,
            unique_sources: sources as usize,
            avg_self_similarity,
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

/// Build a parametrized equality-AND clause over JSON metadata keys.
///
/// Values are never interpolated into the SQL text; both the JSON path and
/// the compared value are bound parameters.
pub(crate) fn metadata_filter_clause(
    filters: &Map<String, Value>,
) -> Result<(String, Vec<String>)> {
    if filters.is_empty() {
        return Ok(("1 = 1".to_string(), Vec::new()));
    }

    let mut conditions = Vec::with_capacity(filters.len());
    let mut params = Vec::with_capacity(filters.len() * 2);

    for (key, value) in filters {
        if key.contains('"') {
            return Err(Error::Validation(format!(
                "Invalid metadata filter key: {}",
                key
            )));
        }
        conditions.push("CAST(json_extract(metadata, ?) AS TEXT) = ?".to_string());
        params.push(format!("$.\"{}\"", key));
        params.push(value_as_text(value));
    }

    Ok((conditions.join(" AND "), params))
}

/// Render a JSON value the way SQLite's CAST(... AS TEXT) does
fn value_as_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Encode an embedding as a little-endian f32 blob
pub fn embedding_to_blob(embedding: &[f32]) -> Vec<u8> {
    let mut blob = Vec::with_capacity(embedding.len() * 4);
    for value in embedding {
        blob.extend_from_slice(&value.to_le_bytes());
    }
    blob
}

/// Decode a little-endian f32 blob back into an embedding
pub fn blob_to_embedding(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    async fn setup_store(dimension: usize) -> (VectorStore, TempDir) {
        let tmp = TempDir::new().unwrap();
        let store = VectorStore::new(&tmp.path().join("vectors.db"), dimension)
            .await
            .unwrap();
        (store, tmp)
    }

    fn record(
        content: &str,
        embedding: Vec<f32>,
        source: &str,
        index: i64,
        metadata: Map<String, Value>,
    ) -> EmbeddingRecord {
        EmbeddingRecord {
            content: content.to_string(),
            embedding,
            metadata,
            source_file: source.to_string(),
            chunk_index: index,
        }
    }

    fn meta(pairs: &[(&str, Value)]) -> Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_blob_roundtrip() {
        let v = vec![0.25, -1.5, 3.75, f32::MIN_POSITIVE];
        assert_eq!(blob_to_embedding(&embedding_to_blob(&v)), v);
    }

    #[tokio::test]
    async fn test_store_and_search_ranked() {
        let (store, _tmp) = setup_store(3).await;

        store
            .store(&[
                record("exact", vec![1.0, 0.0, 0.0], "a.txt", 0, Map::new()),
                record("diagonal", vec![1.0, 1.0, 0.0], "a.txt", 1, Map::new()),
                record("orthogonal", vec![0.0, 1.0, 0.0], "a.txt", 2, Map::new()),
            ])
            .await
            .unwrap();

        let results = store.search(&[1.0, 0.0, 0.0], 10, 0.5).await.unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "exact");
        assert_eq!(results[1].content, "diagonal");
        assert!(results[0].similarity > results[1].similarity);
        for r in &results {
            assert!(r.similarity > 0.5);
        }
    }

    #[tokio::test]
    async fn test_threshold_is_strict() {
        let (store, _tmp) = setup_store(2).await;

        store
            .store(&[
                record("on-axis", vec![2.0, 0.0], "a.txt", 0, Map::new()),
                record("orthogonal", vec![0.0, 5.0], "a.txt", 1, Map::new()),
            ])
            .await
            .unwrap();

        // similarity of "orthogonal" is exactly 0.0, which must be excluded
        // by a 0.0 threshold (strictly greater, never >=)
        let results = store.search(&[1.0, 0.0], 10, 0.0).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "on-axis");
    }

    #[tokio::test]
    async fn test_limit_truncates() {
        let (store, _tmp) = setup_store(2).await;

        let records: Vec<EmbeddingRecord> = (0..10)
            .map(|i| record(&format!("c{i}"), vec![1.0, 0.0], "a.txt", i, Map::new()))
            .collect();
        store.store(&records).await.unwrap();

        let results = store.search(&[1.0, 0.0], 3, 0.5).await.unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn test_ties_keep_insertion_order() {
        let (store, _tmp) = setup_store(2).await;

        store
            .store(&[
                record("first", vec![1.0, 0.0], "a.txt", 0, Map::new()),
                record("second", vec![2.0, 0.0], "b.txt", 0, Map::new()),
                record("third", vec![0.5, 0.0], "c.txt", 0, Map::new()),
            ])
            .await
            .unwrap();

        // All three have cosine similarity 1.0 with the query
        let results = store.search(&[1.0, 0.0], 10, 0.5).await.unwrap();
        let order: Vec<&str> = results.iter().map(|r| r.content.as_str()).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_dimension_mismatch_fails_whole_batch() {
        let (store, _tmp) = setup_store(3).await;

        let err = store
            .store(&[
                record("good", vec![1.0, 0.0, 0.0], "doc.txt", 0, Map::new()),
                record("bad", vec![1.0, 0.0], "doc.txt", 1, Map::new()),
            ])
            .await
            .unwrap_err();

        match &err {
            Error::DimensionMismatch {
                doc_source: source,
                chunk_index,
                expected,
                actual,
            } => {
                assert_eq!(source, "doc.txt");
                assert_eq!(*chunk_index, 1);
                assert_eq!(*expected, 3);
                assert_eq!(*actual, 2);
            }
            other => panic!("expected dimension mismatch, got {other:?}"),
        }
        assert!(!err.is_retryable());

        // Nothing from the batch may have been written
        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_embeddings, 0);
    }

    #[tokio::test]
    async fn test_zero_norm_query_rejected() {
        let (store, _tmp) = setup_store(2).await;
        let err = store.search(&[0.0, 0.0], 10, 0.0).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_query_dimension_checked() {
        let (store, _tmp) = setup_store(3).await;
        let err = store.search(&[1.0, 0.0], 10, 0.0).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[tokio::test]
    async fn test_metadata_filter_equality_and() {
        let (store, _tmp) = setup_store(2).await;

        store
            .store(&[
                record(
                    "pdf-en",
                    vec![1.0, 0.0],
                    "a.pdf",
                    0,
                    meta(&[("file_type", json!("pdf")), ("lang", json!("en"))]),
                ),
                record(
                    "pdf-de",
                    vec![1.0, 0.0],
                    "b.pdf",
                    0,
                    meta(&[("file_type", json!("pdf")), ("lang", json!("de"))]),
                ),
                record(
                    "txt-en",
                    vec![1.0, 0.0],
                    "c.txt",
                    0,
                    meta(&[("file_type", json!("txt")), ("lang", json!("en"))]),
                ),
            ])
            .await
            .unwrap();

        let filters = meta(&[("file_type", json!("pdf")), ("lang", json!("en"))]);
        let results = store
            .search_with_metadata(&[1.0, 0.0], &filters, 10)
            .await
            .unwrap();

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "pdf-en");
    }

    #[tokio::test]
    async fn test_metadata_filter_numeric_value() {
        let (store, _tmp) = setup_store(2).await;

        store
            .store(&[
                record(
                    "page-1",
                    vec![1.0, 0.0],
                    "a.pdf",
                    0,
                    meta(&[("page", json!(1))]),
                ),
                record(
                    "page-2",
                    vec![1.0, 0.0],
                    "a.pdf",
                    1,
                    meta(&[("page", json!(2))]),
                ),
            ])
            .await
            .unwrap();

        let results = store
            .search_with_metadata(&[1.0, 0.0], &meta(&[("page", json!(2))]), 10)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "page-2");
    }

    #[tokio::test]
    async fn test_empty_filters_rank_everything() {
        let (store, _tmp) = setup_store(2).await;

        store
            .store(&[
                record("one", vec![1.0, 0.0], "a.txt", 0, Map::new()),
                record("two", vec![0.0, 1.0], "b.txt", 0, Map::new()),
            ])
            .await
            .unwrap();

        let results = store
            .search_with_metadata(&[1.0, 0.0], &Map::new(), 10)
            .await
            .unwrap();
        // No threshold on filtered search: both rows rank
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].content, "one");
    }

    #[tokio::test]
    async fn test_delete_by_source_accounting() {
        let (store, _tmp) = setup_store(2).await;

        store
            .store(&[
                record("d1c0", vec![1.0, 0.0], "doc1.pdf", 0, Map::new()),
                record("d1c1", vec![1.0, 0.0], "doc1.pdf", 1, Map::new()),
                record("d1c2", vec![1.0, 0.0], "doc1.pdf", 2, Map::new()),
                record("d2c0", vec![1.0, 0.0], "doc2.pdf", 0, Map::new()),
            ])
            .await
            .unwrap();

        let before = store.get_stats().await.unwrap();
        assert_eq!(before.total_embeddings, 4);
        assert_eq!(before.unique_sources, 2);

        let deleted = store.delete_by_source("doc1.pdf").await.unwrap();
        assert_eq!(deleted, 3);

        let after = store.get_stats().await.unwrap();
        assert_eq!(after.total_embeddings, before.total_embeddings - 3);
        assert_eq!(after.unique_sources, 1);

        let results = store.search(&[1.0, 0.0], 10, 0.5).await.unwrap();
        assert!(results.iter().all(|r| r.source_file != "doc1.pdf"));

        // Idempotent: deleting again is a no-op, not an error
        assert_eq!(store.delete_by_source("doc1.pdf").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_self_similarity_diagnostic_is_near_max() {
        let (store, _tmp) = setup_store(2).await;

        store
            .store(&[
                record("a", vec![0.3, 0.4], "a.txt", 0, Map::new()),
                record("b", vec![-2.0, 1.0], "b.txt", 0, Map::new()),
            ])
            .await
            .unwrap();

        let stats = store.get_stats().await.unwrap();
        assert!((stats.avg_self_similarity - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_filter_key_with_quote_rejected() {
        let (store, _tmp) = setup_store(2).await;
        store
            .store(&[record("x", vec![1.0, 0.0], "a.txt", 0, Map::new())])
            .await
            .unwrap();

        let filters = meta(&[("bad\"key", json!("v"))]);
        let err = store
            .search_with_metadata(&[1.0, 0.0], &filters, 10)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
