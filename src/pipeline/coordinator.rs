//! Processing coordinator
//!
//! Owns the document pipeline: a bounded task queue consumed by a fixed
//! pool of workers, per-source serialization through an exclusive claim on
//! the document row, retry/backoff classification, and the task-status
//! surface queried by callers.

use super::AppContext;
use crate::chunk::chunk_text;
use crate::config::WorkerConfig;
use crate::error::{Error, Result};
use crate::loader::minimal_document_info;
use crate::meta::{DocumentStatus, NewChunk, ProcessingStats};
use crate::store::{EmbeddingRecord, SearchResult, VectorStoreStats};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex as StdMutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Progress of a task through the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStage {
    Queued,
    Processing,
    Embedding,
    Storing,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStage::Queued => write!(f, "queued"),
            TaskStage::Processing => write!(f, "processing"),
            TaskStage::Embedding => write!(f, "embedding"),
            TaskStage::Storing => write!(f, "storing"),
            TaskStage::Completed => write!(f, "completed"),
            TaskStage::Failed => write!(f, "failed"),
        }
    }
}

/// Caller-visible view of a task
#[derive(Debug, Clone, Serialize)]
pub struct TaskSnapshot {
    pub id: Uuid,
    pub kind: String,
    pub source: String,
    pub stage: TaskStage,
    pub attempts: u32,
    pub last_error: Option<String>,
    /// Whether a retry of this failed task is pending on the queue
    pub retry_scheduled: bool,
    pub scheduled_at: String,
}

/// Internal task bookkeeping
struct TaskState {
    kind: String,
    source: String,
    stage: TaskStage,
    attempts: u32,
    last_error: Option<String>,
    retryable: bool,
    retry_pending: bool,
    cancelled: bool,
    scheduled_at: String,
    finished_at: Option<DateTime<Utc>>,
}

impl TaskState {
    fn snapshot(&self, id: Uuid) -> TaskSnapshot {
        TaskSnapshot {
            id,
            kind: self.kind.clone(),
            source: self.source.clone(),
            stage: self.stage,
            attempts: self.attempts,
            last_error: self.last_error.clone(),
            retry_scheduled: self.retry_pending,
            scheduled_at: self.scheduled_at.clone(),
        }
    }
}

/// A unit of work on the queue
#[derive(Debug, Clone)]
struct QueuedTask {
    id: Uuid,
    source: String,
    file_type_hint: Option<String>,
    /// Attempts already completed for this document
    attempt: u32,
}

/// Aggregate pipeline statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineStats {
    pub tasks: HashMap<String, usize>,
    pub vector: VectorStoreStats,
    pub processing: ProcessingStats,
}

/// Per-subsystem health report
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub healthy: bool,
    pub subsystems: HashMap<String, String>,
    pub checked_at: String,
}

/// Coordinates document processing across a worker pool
pub struct ProcessingCoordinator {
    pub(crate) ctx: Arc<AppContext>,
    tasks: RwLock<HashMap<Uuid, TaskState>>,
    queue_tx: StdMutex<Option<flume::Sender<QueuedTask>>>,
    worker_handles: StdMutex<Vec<JoinHandle<()>>>,
    maintenance_handles: StdMutex<Vec<JoinHandle<()>>>,
}

impl ProcessingCoordinator {
    /// Start the coordinator: spawn the worker pool and maintenance loops
    pub fn start(ctx: Arc<AppContext>) -> Arc<Self> {
        let worker_config = ctx.config.worker.clone();
        let (tx, rx) = flume::bounded::<QueuedTask>(worker_config.queue_capacity);

        let coordinator = Arc::new(Self {
            ctx,
            tasks: RwLock::new(HashMap::new()),
            queue_tx: StdMutex::new(Some(tx)),
            worker_handles: StdMutex::new(Vec::new()),
            maintenance_handles: StdMutex::new(Vec::new()),
        });

        let mut workers = Vec::with_capacity(worker_config.concurrency);
        for worker_id in 0..worker_config.concurrency {
            let rx = rx.clone();
            let this = Arc::clone(&coordinator);
            workers.push(tokio::spawn(async move {
                this.worker_loop(worker_id, rx).await;
            }));
        }
        *coordinator.worker_handles.lock().unwrap() = workers;

        *coordinator.maintenance_handles.lock().unwrap() =
            super::maintenance::spawn(Arc::clone(&coordinator));

        info!(workers = worker_config.concurrency, "Coordinator started");
        coordinator
    }

    /// Submit a document for processing; returns the task id to poll
    pub async fn submit_document(
        &self,
        path: &str,
        file_type_hint: Option<&str>,
    ) -> Result<Uuid> {
        let sender = self
            .queue_sender()
            .ok_or_else(|| Error::Other("Coordinator is shut down".to_string()))?;

        let id = Uuid::new_v4();
        {
            let mut tasks = self.tasks.write().await;
            tasks.insert(
                id,
                TaskState {
                    kind: "process_document".to_string(),
                    source: path.to_string(),
                    stage: TaskStage::Queued,
                    attempts: 0,
                    last_error: None,
                    retryable: false,
                    retry_pending: false,
                    cancelled: false,
                    scheduled_at: Utc::now().to_rfc3339(),
                    finished_at: None,
                },
            );
        }

        let queued = QueuedTask {
            id,
            source: path.to_string(),
            file_type_hint: file_type_hint.map(|s| s.to_string()),
            attempt: 0,
        };

        if sender.send_async(queued).await.is_err() {
            self.tasks.write().await.remove(&id);
            return Err(Error::Other("Task queue is closed".to_string()));
        }

        debug!(task = %id, source = %path, "Task queued");
        Ok(id)
    }

    /// Submit many documents as independent tasks
    pub async fn submit_batch(&self, paths: &[String]) -> Result<Vec<Uuid>> {
        let mut ids = Vec::with_capacity(paths.len());
        for path in paths {
            ids.push(self.submit_document(path, None).await?);
        }
        info!(count = ids.len(), "Batch submitted");
        Ok(ids)
    }

    /// Look up a task by id; unknown ids are an explicit `None`, not an
    /// error
    pub async fn get_task_status(&self, id: Uuid) -> Option<TaskSnapshot> {
        self.tasks.read().await.get(&id).map(|s| s.snapshot(id))
    }

    /// Best-effort cancellation: a task still queued will not execute.
    ///
    /// Returns whether the cancellation took effect. A running task is not
    /// interrupted; already-committed writes are protected by the store
    /// transaction boundaries.
    pub async fn cancel_task(&self, id: Uuid) -> bool {
        let mut tasks = self.tasks.write().await;
        match tasks.get_mut(&id) {
            Some(state) if state.stage == TaskStage::Queued => {
                state.cancelled = true;
                true
            }
            _ => false,
        }
    }

    /// Embed a query and rank stored chunks against it
    pub async fn search(
        &self,
        query: &str,
        limit: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<SearchResult>> {
        let query_embedding = self.ctx.embedder.embed_query(query).await?;
        self.ctx
            .vector_store
            .search(&query_embedding, limit, similarity_threshold)
            .await
    }

    /// Remove a source from the vector store and delete its processing
    /// record. Idempotent; returns the number of embeddings removed.
    pub async fn delete_source(&self, source: &str) -> Result<u64> {
        let deleted = self.ctx.vector_store.delete_by_source(source).await?;
        self.ctx.metadata_store.delete_document(source).await?;
        Ok(deleted)
    }

    /// Aggregate statistics. Degrades gracefully: a data-layer hiccup
    /// yields zeroed sections, never an error.
    pub async fn stats(&self) -> PipelineStats {
        let vector = match self.ctx.vector_store.get_stats().await {
            Ok(s) => s,
            Err(e) => {
                warn!("Vector store stats unavailable: {}", e);
                VectorStoreStats::default()
            }
        };

        let processing = match self.ctx.metadata_store.get_processing_stats(10).await {
            Ok(s) => s,
            Err(e) => {
                warn!("Processing stats unavailable: {}", e);
                ProcessingStats::default()
            }
        };

        let mut tasks: HashMap<String, usize> = HashMap::new();
        for state in self.tasks.read().await.values() {
            *tasks.entry(state.stage.to_string()).or_default() += 1;
        }

        PipelineStats {
            tasks,
            vector,
            processing,
        }
    }

    /// Probe each subsystem. Never errors; failures show up as per-entry
    /// status strings.
    pub async fn health_check(&self) -> HealthReport {
        let mut subsystems = HashMap::new();

        subsystems.insert(
            "metadata_store".to_string(),
            match self.ctx.metadata_store.ping().await {
                Ok(()) => "ok".to_string(),
                Err(e) => format!("error: {}", e),
            },
        );

        subsystems.insert(
            "vector_store".to_string(),
            match self.ctx.vector_store.ping().await {
                Ok(()) => "ok".to_string(),
                Err(e) => format!("error: {}", e),
            },
        );

        subsystems.insert(
            "embedding_provider".to_string(),
            format!(
                "ok (model {}, dimension {})",
                self.ctx.embedder.model_name(),
                self.ctx.embedder.dimension()
            ),
        );

        let healthy = subsystems.values().all(|s| s.starts_with("ok"));
        HealthReport {
            healthy,
            subsystems,
            checked_at: Utc::now().to_rfc3339(),
        }
    }

    /// Drop finished tasks older than the retention window; returns how
    /// many were removed
    pub async fn cleanup_finished_tasks(&self, older_than: chrono::Duration) -> usize {
        let cutoff = Utc::now() - older_than;
        let mut tasks = self.tasks.write().await;
        let before = tasks.len();
        tasks.retain(|_, state| match (state.stage, state.finished_at) {
            (TaskStage::Completed | TaskStage::Failed, Some(finished)) => finished > cutoff,
            _ => true,
        });
        before - tasks.len()
    }

    /// Re-enqueue retryable failures whose scheduled retry was lost.
    ///
    /// The normal path schedules retries directly from the failure handler;
    /// this sweep is the safety net behind it.
    pub async fn retry_sweep(&self) -> usize {
        let max_retries = self.ctx.config.worker.max_retries;
        let Some(sender) = self.queue_sender() else {
            return 0;
        };

        let candidates: Vec<QueuedTask> = {
            let mut tasks = self.tasks.write().await;
            tasks
                .iter_mut()
                .filter(|(_, s)| {
                    s.stage == TaskStage::Failed
                        && s.retryable
                        && !s.retry_pending
                        && !s.cancelled
                        && s.attempts <= max_retries
                })
                .map(|(id, s)| {
                    s.retry_pending = true;
                    QueuedTask {
                        id: *id,
                        source: s.source.clone(),
                        file_type_hint: None,
                        attempt: s.attempts,
                    }
                })
                .collect()
        };

        let mut requeued = 0;
        for task in candidates {
            let id = task.id;
            if sender.send_async(task).await.is_ok() {
                requeued += 1;
            } else {
                let mut tasks = self.tasks.write().await;
                if let Some(s) = tasks.get_mut(&id) {
                    s.retry_pending = false;
                }
            }
        }
        if requeued > 0 {
            info!(requeued, "Retry sweep re-enqueued failed tasks");
        }
        requeued
    }

    /// Stop accepting work, drain the workers, and halt maintenance
    pub async fn shutdown(&self) {
        info!("Coordinator shutting down");
        drop(self.queue_tx.lock().unwrap().take());

        for handle in std::mem::take(&mut *self.maintenance_handles.lock().unwrap()) {
            handle.abort();
        }

        let workers = std::mem::take(&mut *self.worker_handles.lock().unwrap());
        for handle in workers {
            let _ = handle.await;
        }
        info!("Coordinator stopped");
    }

    fn queue_sender(&self) -> Option<flume::Sender<QueuedTask>> {
        self.queue_tx.lock().unwrap().clone()
    }

    async fn worker_loop(self: Arc<Self>, worker_id: usize, rx: flume::Receiver<QueuedTask>) {
        debug!(worker_id, "Worker started");
        while let Ok(task) = rx.recv_async().await {
            self.run_task(task).await;
        }
        debug!(worker_id, "Worker stopped");
    }

    async fn run_task(&self, task: QueuedTask) {
        let attempt = task.attempt + 1;
        {
            let mut tasks = self.tasks.write().await;
            let Some(state) = tasks.get_mut(&task.id) else {
                return;
            };
            if state.cancelled {
                state.stage = TaskStage::Failed;
                state.last_error = Some("Cancelled before execution".to_string());
                state.finished_at = Some(Utc::now());
                return;
            }
            state.stage = TaskStage::Processing;
            state.attempts = attempt;
            state.retry_pending = false;
        }

        info!(task = %task.id, source = %task.source, attempt, "Processing document");

        let timeout = Duration::from_secs(self.ctx.config.worker.task_timeout_secs);
        let result = match tokio::time::timeout(timeout, self.process_document(&task, attempt)).await
        {
            Ok(result) => result,
            Err(_) => Err(Error::Busy(format!(
                "Task timed out after {}s",
                timeout.as_secs()
            ))),
        };

        match result {
            Ok(chunk_count) => {
                {
                    let mut tasks = self.tasks.write().await;
                    if let Some(state) = tasks.get_mut(&task.id) {
                        state.stage = TaskStage::Completed;
                        state.last_error = None;
                        state.finished_at = Some(Utc::now());
                    }
                }
                info!(task = %task.id, source = %task.source, chunk_count, "Document processed");
            }
            Err(e) => self.handle_failure(task, attempt, e).await,
        }
    }

    /// One pipeline attempt: load, chunk, embed, persist
    async fn process_document(&self, task: &QueuedTask, attempt: u32) -> Result<usize> {
        let path = Path::new(&task.source);
        let (file_type, loader) = self
            .ctx
            .loaders
            .resolve(path, task.file_type_hint.as_deref())?;

        // The document row exists before any heavy work so the exclusive
        // claim and the audit trail always have something to attach to
        self.ctx
            .metadata_store
            .ensure_document(&minimal_document_info(&task.source))
            .await?;

        if !self
            .ctx
            .metadata_store
            .claim_for_processing(&task.source)
            .await?
        {
            return Err(Error::Busy(format!(
                "{} is already being processed",
                task.source
            )));
        }

        self.ctx
            .metadata_store
            .update_processing_status(
                &task.source,
                DocumentStatus::Processing,
                &format!("attempt {}", attempt),
            )
            .await?;

        let mut doc = loader.load(path).await?;
        if doc.info.file_type.is_none() {
            doc.info.file_type = Some(file_type);
        }
        self.ctx.metadata_store.upsert_document(&doc.info).await?;

        let chunks = chunk_text(&doc.text, &self.ctx.config.chunk)?;
        if chunks.is_empty() {
            debug!(source = %task.source, "Document produced no chunks");
            self.ctx.metadata_store.store_metadata(&doc.info, &[]).await?;
            return Ok(0);
        }

        self.set_stage(task.id, TaskStage::Embedding).await;
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = self.ctx.embedder.embed_chunks(&texts).await?;

        self.set_stage(task.id, TaskStage::Storing).await;

        // Replace any previous vectors for this source so re-ingestion
        // leaves exactly one embedding set behind
        self.ctx.vector_store.delete_by_source(&task.source).await?;

        let records: Vec<EmbeddingRecord> = chunks
            .iter()
            .zip(embeddings)
            .map(|(chunk, embedding)| EmbeddingRecord {
                content: chunk.text.clone(),
                embedding,
                metadata: chunk.metadata(&doc.info.metadata),
                source_file: task.source.clone(),
                chunk_index: chunk.index as i64,
            })
            .collect();
        self.ctx.vector_store.store(&records).await?;

        let new_chunks: Vec<NewChunk> = chunks
            .iter()
            .map(|chunk| NewChunk {
                chunk_index: chunk.index as i64,
                content: chunk.text.clone(),
                metadata: chunk.metadata(&doc.info.metadata),
            })
            .collect();
        self.ctx
            .metadata_store
            .store_metadata(&doc.info, &new_chunks)
            .await?;

        Ok(chunks.len())
    }

    async fn handle_failure(&self, task: QueuedTask, attempt: u32, err: Error) {
        let retryable = err.is_retryable();
        let max_retries = self.ctx.config.worker.max_retries;
        let will_retry = retryable && attempt <= max_retries;

        error!(
            task = %task.id,
            source = %task.source,
            attempt,
            retryable,
            "Task failed: {}",
            err
        );

        // Persist the failure; create the document row if the task died
        // before the loader ever ran
        let record_result = async {
            self.ctx
                .metadata_store
                .ensure_document(&minimal_document_info(&task.source))
                .await?;
            self.ctx
                .metadata_store
                .update_processing_status(&task.source, DocumentStatus::Failed, &err.to_string())
                .await
        }
        .await;
        if let Err(e) = record_result {
            warn!("Could not record failure for {}: {}", task.source, e);
        }

        {
            let mut tasks = self.tasks.write().await;
            if let Some(state) = tasks.get_mut(&task.id) {
                state.stage = TaskStage::Failed;
                state.last_error = Some(err.to_string());
                state.retryable = retryable;
                if will_retry {
                    state.retry_pending = true;
                    state.scheduled_at = Utc::now().to_rfc3339();
                } else {
                    state.finished_at = Some(Utc::now());
                }
            }
        }

        if will_retry {
            let delay = backoff_delay(&self.ctx.config.worker, attempt);
            if let Some(sender) = self.queue_sender() {
                info!(
                    task = %task.id,
                    source = %task.source,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling retry"
                );
                let retry = QueuedTask {
                    attempt,
                    ..task.clone()
                };
                tokio::spawn(async move {
                    tokio::time::sleep(delay).await;
                    let _ = sender.send_async(retry).await;
                });
            }
        }
    }

    async fn set_stage(&self, id: Uuid, stage: TaskStage) {
        let mut tasks = self.tasks.write().await;
        if let Some(state) = tasks.get_mut(&id) {
            state.stage = stage;
        }
    }
}

/// Capped exponential backoff for the given completed-attempt count
fn backoff_delay(config: &WorkerConfig, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let delay = config
        .initial_backoff_ms
        .saturating_mul(1u64 << exponent)
        .min(config.max_backoff_ms);
    Duration::from_millis(delay)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::embed::{Embedder, EmbeddingProvider};
    use crate::loader::LoaderRegistry;
    use crate::meta::MetadataStore;
    use crate::store::VectorStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tempfile::TempDir;

    const DIM: usize = 8;

    /// Deterministic offline provider
    #[derive(Debug)]
    struct MockProvider;

    fn mock_vector(text: &str) -> Vec<f32> {
        let mut v = vec![0.0; DIM];
        v[0] = 1.0;
        v[1] = (text.len() % 97) as f32 / 97.0;
        v
    }

    #[async_trait]
    impl EmbeddingProvider for MockProvider {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|t| mock_vector(t)).collect())
        }

        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            Ok(mock_vector(text))
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn model_name(&self) -> &str {
            "mock"
        }
    }

    /// Fails the first `failures` batch calls, then behaves like the mock
    #[derive(Debug)]
    struct FlakyProvider {
        failures: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl EmbeddingProvider for FlakyProvider {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(Error::Provider("transient upstream failure".to_string()));
            }
            Ok(texts.iter().map(|t| mock_vector(t)).collect())
        }

        async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
            Ok(mock_vector(text))
        }

        fn dimension(&self) -> usize {
            DIM
        }

        fn model_name(&self) -> &str {
            "flaky"
        }
    }

    async fn setup(provider: Box<dyn EmbeddingProvider>) -> (Arc<ProcessingCoordinator>, TempDir) {
        let tmp = TempDir::new().unwrap();

        let mut config = Config::default();
        config.chunk.max_chars = 200;
        config.chunk.overlap_chars = 40;
        config.worker.concurrency = 2;
        config.worker.max_retries = 2;
        config.worker.initial_backoff_ms = 10;
        config.worker.max_backoff_ms = 50;
        config.worker.maintenance_interval_secs = 3600;

        let embedder = Arc::new(Embedder::with_provider(provider, 16, Duration::ZERO));
        let vector_store = VectorStore::new(&tmp.path().join("vectors.db"), DIM)
            .await
            .unwrap();
        let metadata_store = MetadataStore::new(&tmp.path().join("metadata.db"))
            .await
            .unwrap();

        let ctx = Arc::new(AppContext::new(
            config,
            embedder,
            vector_store,
            metadata_store,
            Arc::new(LoaderRegistry::with_defaults()),
        ));

        (ProcessingCoordinator::start(ctx), tmp)
    }

    async fn wait_for_terminal(
        coordinator: &ProcessingCoordinator,
        id: Uuid,
        timeout: Duration,
    ) -> TaskSnapshot {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let snapshot = coordinator.get_task_status(id).await.expect("task exists");
            let terminal = matches!(snapshot.stage, TaskStage::Completed | TaskStage::Failed);
            if terminal && !snapshot.retry_scheduled {
                return snapshot;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("task {id} did not finish in time (stage {:?})", snapshot.stage);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    fn write_doc(tmp: &TempDir, name: &str, sentences: usize) -> String {
        let path = tmp.path().join(name);
        let text = "The archive keeps a careful record of everything it sees. ".repeat(sentences);
        std::fs::write(&path, text.trim_end()).unwrap();
        path.to_string_lossy().to_string()
    }

    #[tokio::test]
    async fn test_document_flows_to_completed() {
        let (coordinator, tmp) = setup(Box::new(MockProvider)).await;
        let path = write_doc(&tmp, "doc.txt", 20);

        let id = coordinator.submit_document(&path, None).await.unwrap();
        let snapshot = wait_for_terminal(&coordinator, id, Duration::from_secs(5)).await;

        assert_eq!(snapshot.stage, TaskStage::Completed);
        assert_eq!(snapshot.attempts, 1);
        assert!(snapshot.last_error.is_none());

        let doc = coordinator
            .ctx
            .metadata_store
            .get_document(&path)
            .await
            .unwrap()
            .expect("document recorded");
        assert_eq!(doc.status, "completed");

        let chunks = coordinator
            .ctx
            .metadata_store
            .get_chunks_for_document(&path)
            .await
            .unwrap();
        assert!(!chunks.is_empty());

        let stats = coordinator.stats().await;
        assert_eq!(stats.vector.total_embeddings, chunks.len());
        assert_eq!(stats.processing.total_documents, 1);

        let results = coordinator.search("archive records", 5, -1.0).await.unwrap();
        assert!(!results.is_empty());
        assert!(results.iter().all(|r| r.source_file == path));

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_reingestion_replaces_not_duplicates() {
        let (coordinator, tmp) = setup(Box::new(MockProvider)).await;
        let path = write_doc(&tmp, "doc.txt", 20);

        let first = coordinator.submit_document(&path, None).await.unwrap();
        wait_for_terminal(&coordinator, first, Duration::from_secs(5)).await;
        let after_first = coordinator.stats().await;

        let second = coordinator.submit_document(&path, None).await.unwrap();
        let snapshot = wait_for_terminal(&coordinator, second, Duration::from_secs(5)).await;
        assert_eq!(snapshot.stage, TaskStage::Completed);

        let after_second = coordinator.stats().await;
        assert_eq!(
            after_first.vector.total_embeddings,
            after_second.vector.total_embeddings
        );
        assert_eq!(after_second.processing.total_documents, 1);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_unsupported_file_type_fails_without_retry() {
        let (coordinator, tmp) = setup(Box::new(MockProvider)).await;
        let path = tmp.path().join("slides.pptx");
        std::fs::write(&path, "irrelevant").unwrap();
        let path = path.to_string_lossy().to_string();

        let id = coordinator.submit_document(&path, None).await.unwrap();
        let snapshot = wait_for_terminal(&coordinator, id, Duration::from_secs(5)).await;

        assert_eq!(snapshot.stage, TaskStage::Failed);
        assert_eq!(snapshot.attempts, 1, "configuration faults are never retried");
        let message = snapshot.last_error.expect("error captured");
        assert!(message.contains("Unsupported file type"));

        // Give any (incorrect) retry a chance to surface
        tokio::time::sleep(Duration::from_millis(100)).await;
        let snapshot = coordinator.get_task_status(id).await.unwrap();
        assert_eq!(snapshot.attempts, 1);

        // Failure lands in the document trail too
        let doc = coordinator
            .ctx
            .metadata_store
            .get_document(&path)
            .await
            .unwrap()
            .expect("document recorded for audit");
        assert_eq!(doc.status, "failed");

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_provider_failure_retried_then_succeeds() {
        let (coordinator, tmp) = setup(Box::new(FlakyProvider {
            failures: 1,
            calls: AtomicU32::new(0),
        }))
        .await;
        let path = write_doc(&tmp, "doc.txt", 20);

        let id = coordinator.submit_document(&path, None).await.unwrap();
        let snapshot = wait_for_terminal(&coordinator, id, Duration::from_secs(10)).await;

        assert_eq!(snapshot.stage, TaskStage::Completed);
        assert_eq!(snapshot.attempts, 2, "one failure, one successful retry");

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_retries_exhausted_ends_failed() {
        let (coordinator, tmp) = setup(Box::new(FlakyProvider {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        }))
        .await;
        let path = write_doc(&tmp, "doc.txt", 20);

        let id = coordinator.submit_document(&path, None).await.unwrap();
        let snapshot = wait_for_terminal(&coordinator, id, Duration::from_secs(10)).await;

        assert_eq!(snapshot.stage, TaskStage::Failed);
        // max_retries = 2 means 3 attempts total
        assert_eq!(snapshot.attempts, 3);
        assert!(snapshot.last_error.unwrap().contains("transient upstream"));

        let doc = coordinator
            .ctx
            .metadata_store
            .get_document(&path)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc.status, "failed");

        // Every attempt left its mark on the audit trail
        let logs = coordinator
            .ctx
            .metadata_store
            .get_processing_logs(&path)
            .await
            .unwrap();
        assert!(logs.len() >= 3);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_batch_tasks_are_independent() {
        let (coordinator, tmp) = setup(Box::new(MockProvider)).await;
        let good = write_doc(&tmp, "good.txt", 20);
        let bad = tmp.path().join("bad.pptx");
        std::fs::write(&bad, "x").unwrap();
        let bad = bad.to_string_lossy().to_string();

        let ids = coordinator
            .submit_batch(&[good.clone(), bad.clone()])
            .await
            .unwrap();
        assert_eq!(ids.len(), 2);

        let good_snapshot = wait_for_terminal(&coordinator, ids[0], Duration::from_secs(5)).await;
        let bad_snapshot = wait_for_terminal(&coordinator, ids[1], Duration::from_secs(5)).await;

        assert_eq!(good_snapshot.stage, TaskStage::Completed);
        assert_eq!(bad_snapshot.stage, TaskStage::Failed);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_unknown_task_is_explicit_none() {
        let (coordinator, _tmp) = setup(Box::new(MockProvider)).await;
        assert!(coordinator.get_task_status(Uuid::new_v4()).await.is_none());
        assert!(!coordinator.cancel_task(Uuid::new_v4()).await);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_delete_source_is_idempotent() {
        let (coordinator, tmp) = setup(Box::new(MockProvider)).await;
        let path = write_doc(&tmp, "doc.txt", 20);

        let id = coordinator.submit_document(&path, None).await.unwrap();
        wait_for_terminal(&coordinator, id, Duration::from_secs(5)).await;

        let deleted = coordinator.delete_source(&path).await.unwrap();
        assert!(deleted > 0);
        assert_eq!(coordinator.delete_source(&path).await.unwrap(), 0);

        let stats = coordinator.stats().await;
        assert_eq!(stats.vector.total_embeddings, 0);

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_health_check_reports_subsystems() {
        let (coordinator, _tmp) = setup(Box::new(MockProvider)).await;

        let report = coordinator.health_check().await;
        assert!(report.healthy);
        assert_eq!(report.subsystems.len(), 3);
        assert_eq!(report.subsystems["metadata_store"], "ok");
        assert_eq!(report.subsystems["vector_store"], "ok");

        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_submit_after_shutdown_rejected() {
        let (coordinator, tmp) = setup(Box::new(MockProvider)).await;
        coordinator.shutdown().await;

        let path = write_doc(&tmp, "doc.txt", 5);
        let err = coordinator.submit_document(&path, None).await.unwrap_err();
        assert!(matches!(err, Error::Other(_)));
    }

    #[tokio::test]
    async fn test_cleanup_drops_old_finished_tasks() {
        let (coordinator, tmp) = setup(Box::new(MockProvider)).await;
        let path = write_doc(&tmp, "doc.txt", 5);

        let id = coordinator.submit_document(&path, None).await.unwrap();
        wait_for_terminal(&coordinator, id, Duration::from_secs(5)).await;

        // A generous retention keeps the fresh task
        assert_eq!(
            coordinator
                .cleanup_finished_tasks(chrono::Duration::hours(1))
                .await,
            0
        );
        // Zero retention drops it
        assert_eq!(
            coordinator
                .cleanup_finished_tasks(chrono::Duration::zero())
                .await,
            1
        );
        assert!(coordinator.get_task_status(id).await.is_none());

        coordinator.shutdown().await;
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let config = WorkerConfig {
            concurrency: 1,
            queue_capacity: 16,
            max_retries: 5,
            initial_backoff_ms: 100,
            max_backoff_ms: 1000,
            task_timeout_secs: 60,
            maintenance_interval_secs: 300,
        };

        assert_eq!(backoff_delay(&config, 1), Duration::from_millis(100));
        assert_eq!(backoff_delay(&config, 2), Duration::from_millis(200));
        assert_eq!(backoff_delay(&config, 3), Duration::from_millis(400));
        // Capped
        assert_eq!(backoff_delay(&config, 10), Duration::from_millis(1000));
    }
}
