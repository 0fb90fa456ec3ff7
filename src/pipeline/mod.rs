//! Processing pipeline
//!
//! The coordinator drives documents through load → chunk → embed → store,
//! owning the worker pool, the retry state machine, and the task-status
//! surface. The [`AppContext`] bundles the components the pipeline runs
//! against; it is constructed once and passed everywhere.

mod coordinator;
mod maintenance;

pub use coordinator::*;

use crate::config::Config;
use crate::embed::Embedder;
use crate::error::Result;
use crate::loader::LoaderRegistry;
use crate::meta::MetadataStore;
use crate::store::VectorStore;
use std::sync::Arc;
use tracing::info;

/// Shared handles for every pipeline component.
///
/// Whoever constructs the context owns the lifecycle: `initialize` sets up
/// schemas and connections, `shutdown` releases them.
pub struct AppContext {
    pub config: Config,
    pub embedder: Arc<Embedder>,
    pub vector_store: VectorStore,
    pub metadata_store: MetadataStore,
    pub loaders: Arc<LoaderRegistry>,
}

impl AppContext {
    /// Construct every component from configuration.
    ///
    /// The vector store is sized from the active provider so the store
    /// dimension always matches what the embedder will produce.
    pub async fn initialize(config: Config) -> Result<Self> {
        config.validate()?;

        let embedder = Arc::new(Embedder::from_config(&config.embedding)?);
        let vector_store =
            VectorStore::new(&config.paths.vector_db_file, embedder.dimension()).await?;
        let metadata_store = MetadataStore::new(&config.paths.meta_db_file).await?;

        info!(
            provider = %config.embedding.provider,
            model = %config.embedding.model,
            dimension = embedder.dimension(),
            "Pipeline context initialized"
        );

        Ok(Self {
            config,
            embedder,
            vector_store,
            metadata_store,
            loaders: Arc::new(LoaderRegistry::with_defaults()),
        })
    }

    /// Assemble a context from pre-built components
    pub fn new(
        config: Config,
        embedder: Arc<Embedder>,
        vector_store: VectorStore,
        metadata_store: MetadataStore,
        loaders: Arc<LoaderRegistry>,
    ) -> Self {
        Self {
            config,
            embedder,
            vector_store,
            metadata_store,
            loaders,
        }
    }

    /// Release database connections
    pub async fn shutdown(&self) {
        self.vector_store.close().await;
        self.metadata_store.close().await;
    }
}
