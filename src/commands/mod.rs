//! CLI command implementations
//!
//! Thin wrappers over the pipeline's boundary operations, plus the
//! console output helpers for each of them.

use crate::config::Config;
use crate::error::{Error, Result};
use crate::loader::LoaderRegistry;
use crate::meta::{Document, MetadataStore, ProcessingLog};
use crate::pipeline::{
    HealthReport, PipelineStats, ProcessingCoordinator, TaskSnapshot, TaskStage,
};
use crate::store::{SearchResult, VectorStore};
use futures::future::join_all;
use ignore::WalkBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

/// Initialize configuration and databases.
///
/// Creates the base directory, writes the default config (unless one
/// exists and `force` is false), and creates both database schemas.
pub async fn cmd_init(base_dir: Option<PathBuf>, force: bool) -> Result<Config> {
    let base = base_dir.unwrap_or_else(Config::default_base_dir);
    let config_path = base.join("config.toml");

    if config_path.exists() && !force {
        return Err(Error::Config(format!(
            "Already initialized at {} (use --force to overwrite)",
            config_path.display()
        )));
    }

    std::fs::create_dir_all(&base)?;
    let config = Config::load_from(Some(base.clone())).unwrap_or_default();
    let mut config = if force { Config::default() } else { config };
    config.paths.base_dir = base.clone();
    config.paths.config_file = config_path;
    config.paths.meta_db_file = base.join("metadata.db");
    config.paths.vector_db_file = base.join("vectors.db");
    config.save()?;

    // Create both schemas up front so the first submit hits warm tables
    let vector_store =
        VectorStore::new(&config.paths.vector_db_file, config.embedding.dimension).await?;
    let metadata_store = MetadataStore::new(&config.paths.meta_db_file).await?;
    vector_store.close().await;
    metadata_store.close().await;

    info!("Initialized ragline at {}", base.display());
    Ok(config)
}

/// Submit a single document and wait for its terminal state
pub async fn cmd_submit(
    coordinator: &ProcessingCoordinator,
    path: &str,
    file_type_hint: Option<&str>,
) -> Result<TaskSnapshot> {
    let id = coordinator.submit_document(path, file_type_hint).await?;
    Ok(wait_for_task(coordinator, id).await)
}

/// Submit many documents and wait for all of them, with a progress bar
pub async fn cmd_batch(
    coordinator: &ProcessingCoordinator,
    paths: Vec<String>,
) -> Result<Vec<TaskSnapshot>> {
    if paths.is_empty() {
        return Err(Error::Validation("No files to submit".to_string()));
    }

    let ids = coordinator.submit_batch(&paths).await?;

    let bar = ProgressBar::new(ids.len() as u64);
    bar.set_style(
        ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );

    // Tasks run concurrently on the worker pool; wait on all of them at
    // once and keep submission order in the results
    let results = join_all(ids.into_iter().zip(paths).map(|(id, path)| {
        let bar = bar.clone();
        async move {
            let snapshot = wait_for_task(coordinator, id).await;
            bar.set_message(path);
            bar.inc(1);
            snapshot
        }
    }))
    .await;
    bar.finish_and_clear();

    Ok(results)
}

async fn wait_for_task(coordinator: &ProcessingCoordinator, id: Uuid) -> TaskSnapshot {
    loop {
        match coordinator.get_task_status(id).await {
            Some(snapshot) => {
                let terminal =
                    matches!(snapshot.stage, TaskStage::Completed | TaskStage::Failed);
                if terminal && !snapshot.retry_scheduled {
                    return snapshot;
                }
            }
            None => {
                // Cleaned up between polls; report it as-is
                return TaskSnapshot {
                    id,
                    kind: "process_document".to_string(),
                    source: String::new(),
                    stage: TaskStage::Failed,
                    attempts: 0,
                    last_error: Some("Task record no longer available".to_string()),
                    retry_scheduled: false,
                    scheduled_at: String::new(),
                };
            }
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

/// Expand files and directories into the list of ingestible paths.
///
/// Directories are walked with ignore-file semantics; only files whose
/// extension has a registered loader are picked up.
pub fn collect_paths(inputs: &[String], registry: &LoaderRegistry) -> Result<Vec<String>> {
    let supported = registry.supported_types();
    let mut paths = Vec::new();

    for input in inputs {
        let path = PathBuf::from(input);
        if path.is_dir() {
            for entry in WalkBuilder::new(&path).build().flatten() {
                let p = entry.path();
                if !p.is_file() {
                    continue;
                }
                let ext = p
                    .extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.to_lowercase());
                if ext.map(|e| supported.contains(&e)).unwrap_or(false) {
                    paths.push(p.to_string_lossy().to_string());
                }
            }
        } else {
            paths.push(input.clone());
        }
    }

    paths.sort();
    paths.dedup();
    Ok(paths)
}

/// A document's persisted processing state
#[derive(Debug, Clone, Serialize)]
pub struct DocumentStatusInfo {
    pub document: Document,
    pub chunk_count: usize,
    pub logs: Vec<ProcessingLog>,
}

/// Fetch the persisted status of a document by source path
pub async fn cmd_document_status(
    metadata_store: &MetadataStore,
    path: &str,
) -> Result<Option<DocumentStatusInfo>> {
    let Some(document) = metadata_store.get_document(path).await? else {
        return Ok(None);
    };

    let chunk_count = metadata_store.get_chunks_for_document(path).await?.len();
    let logs = metadata_store.get_processing_logs(path).await?;

    Ok(Some(DocumentStatusInfo {
        document,
        chunk_count,
        logs,
    }))
}

/// Run a similarity search for a query string
pub async fn cmd_search(
    coordinator: &ProcessingCoordinator,
    query: &str,
    limit: usize,
    threshold: f32,
) -> Result<Vec<SearchResult>> {
    info!(query, limit, threshold, "Searching");
    coordinator.search(query, limit, threshold).await
}

/// Aggregate stats assembled directly from the stores.
///
/// Used by CLI invocations that have no live coordinator (and therefore no
/// session task counts). Degrades gracefully like the coordinator surface.
pub async fn cmd_stats_offline(
    metadata_store: &MetadataStore,
    vector_store: &VectorStore,
) -> PipelineStats {
    let vector = vector_store.get_stats().await.unwrap_or_else(|e| {
        tracing::warn!("Vector store stats unavailable: {}", e);
        Default::default()
    });
    let processing = metadata_store
        .get_processing_stats(10)
        .await
        .unwrap_or_else(|e| {
            tracing::warn!("Processing stats unavailable: {}", e);
            Default::default()
        });

    PipelineStats {
        tasks: Default::default(),
        vector,
        processing,
    }
}

/// Health report assembled directly from the stores; the provider entry
/// reflects configuration only, since no provider client is constructed
pub async fn cmd_health_offline(
    config: &Config,
    metadata_store: &MetadataStore,
    vector_store: &VectorStore,
) -> HealthReport {
    let mut subsystems = std::collections::HashMap::new();

    subsystems.insert(
        "metadata_store".to_string(),
        match metadata_store.ping().await {
            Ok(()) => "ok".to_string(),
            Err(e) => format!("error: {}", e),
        },
    );
    subsystems.insert(
        "vector_store".to_string(),
        match vector_store.ping().await {
            Ok(()) => "ok".to_string(),
            Err(e) => format!("error: {}", e),
        },
    );
    subsystems.insert(
        "embedding_provider".to_string(),
        format!(
            "ok (configured: {} / {})",
            config.embedding.provider, config.embedding.model
        ),
    );

    let healthy = subsystems.values().all(|s| s.starts_with("ok"));
    HealthReport {
        healthy,
        subsystems,
        checked_at: chrono::Utc::now().to_rfc3339(),
    }
}

// ===== Console output =====

pub fn print_task_result(snapshot: &TaskSnapshot) {
    match snapshot.stage {
        TaskStage::Completed => {
            println!(
                "✓ {} processed (task {}, {} attempt{})",
                snapshot.source,
                snapshot.id,
                snapshot.attempts,
                if snapshot.attempts == 1 { "" } else { "s" }
            );
        }
        _ => {
            println!(
                "✗ {} failed (task {}): {}",
                snapshot.source,
                snapshot.id,
                snapshot.last_error.as_deref().unwrap_or("unknown error")
            );
        }
    }
}

pub fn print_batch_results(results: &[TaskSnapshot]) {
    let completed = results
        .iter()
        .filter(|r| r.stage == TaskStage::Completed)
        .count();
    let failed = results.len() - completed;

    println!("\n📦 Batch complete: {} succeeded, {} failed\n", completed, failed);
    for snapshot in results {
        print_task_result(snapshot);
    }
}

pub fn print_document_status(path: &str, info: Option<&DocumentStatusInfo>) {
    let Some(info) = info else {
        println!("No processing record for {}", path);
        return;
    };

    println!("\n📄 {}\n", info.document.file_path);
    println!("Status: {}", info.document.status);
    println!("Type: {}", info.document.file_type.as_deref().unwrap_or("-"));
    println!("Size: {} bytes", info.document.file_size);
    println!("Chunks: {}", info.chunk_count);
    println!("Updated: {}", info.document.updated_at);

    if !info.logs.is_empty() {
        println!("\nHistory:");
        for log in &info.logs {
            let message = if log.message.is_empty() {
                String::new()
            } else {
                format!(" — {}", log.message)
            };
            println!("  {} {}{}", log.created_at, log.status, message);
        }
    }
}

pub fn print_search_results(results: &[SearchResult]) {
    if results.is_empty() {
        println!("No results.");
        return;
    }

    println!("\n🔍 {} result{}\n", results.len(), if results.len() == 1 { "" } else { "s" });
    for (rank, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} (chunk {})",
            rank + 1,
            result.similarity,
            result.source_file,
            result.chunk_index
        );
        let preview: String = result.content.chars().take(200).collect();
        println!("   {}", preview.replace('\n', " "));
        println!();
    }
}

pub fn print_stats(stats: &PipelineStats) {
    println!("\n📊 ragline Stats\n");
    println!("Vector store:");
    println!("  Embeddings: {}", stats.vector.total_embeddings);
    println!("  Sources: {}", stats.vector.unique_sources);
    println!(
        "  Self-similarity check: {:.3}",
        stats.vector.avg_self_similarity
    );

    println!("\nDocuments:");
    println!("  Total: {}", stats.processing.total_documents);
    println!("  Chunks: {}", stats.processing.total_chunks);
    let mut statuses: Vec<_> = stats.processing.status_breakdown.iter().collect();
    statuses.sort();
    for (status, count) in statuses {
        println!("  {}: {}", status, count);
    }

    if !stats.processing.recent_activity.is_empty() {
        println!("\nRecent activity:");
        for doc in &stats.processing.recent_activity {
            println!("  {} [{}] {}", doc.updated_at, doc.status, doc.filename);
        }
    }

    if !stats.tasks.is_empty() {
        println!("\nTasks this session:");
        let mut task_stats: Vec<_> = stats.tasks.iter().collect();
        task_stats.sort();
        for (stage, count) in task_stats {
            println!("  {}: {}", stage, count);
        }
    }
}

pub fn print_health(report: &HealthReport) {
    let marker = if report.healthy { "✓" } else { "✗" };
    println!("\n{} System health ({})\n", marker, report.checked_at);

    let mut subsystems: Vec<_> = report.subsystems.iter().collect();
    subsystems.sort();
    for (name, status) in subsystems {
        println!("  {}: {}", name, status);
    }
}
