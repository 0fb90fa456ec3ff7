//! Embedding generation
//!
//! This module provides an abstraction over embedding providers with:
//! - A trait for remote embedding backends
//! - A factory keyed on the configured provider string
//! - Batch orchestration with rate-limit pacing
//! - Cosine similarity over L2-normalized vectors

mod openai;
mod voyage;

pub use openai::*;
pub use voyage::*;

use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Trait for embedding providers
#[async_trait]
pub trait EmbeddingProvider: Send + Sync + std::fmt::Debug {
    /// Embed a batch of document texts
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a search query.
    ///
    /// Kept separate from [`embed_batch`](Self::embed_batch): some services
    /// embed queries and documents asymmetrically, and the request mode must
    /// survive to the wire.
    async fn embed_query(&self, text: &str) -> Result<Vec<f32>>;

    /// Get the embedding dimension
    fn dimension(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;
}

/// Create an embedding provider based on configuration.
///
/// Unknown provider keys fail fast before any network traffic.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAiProvider::new(config)?)),
        "voyage" => Ok(Box::new(VoyageProvider::new(config)?)),
        other => Err(Error::Config(format!(
            "Unsupported embedding provider: {}",
            other
        ))),
    }
}

/// Provider-agnostic embedding orchestrator
pub struct Embedder {
    provider: Box<dyn EmbeddingProvider>,
    batch_size: usize,
    inter_batch_delay: Duration,
}

impl Embedder {
    /// Build an embedder from configuration via the provider factory
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let provider = create_provider(config)?;
        Ok(Self::with_provider(
            provider,
            config.batch_size,
            Duration::from_millis(config.inter_batch_delay_ms),
        ))
    }

    /// Build an embedder around an existing provider
    pub fn with_provider(
        provider: Box<dyn EmbeddingProvider>,
        batch_size: usize,
        inter_batch_delay: Duration,
    ) -> Self {
        Self {
            provider,
            batch_size: batch_size.max(1),
            inter_batch_delay,
        }
    }

    /// Embed chunk texts in provider-sized batches.
    ///
    /// Batches are issued sequentially and results concatenated in input
    /// order; a failure in any batch fails the whole call. A cooperative
    /// delay between batches respects upstream rate limits.
    pub async fn embed_chunks(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut embeddings = Vec::with_capacity(texts.len());

        let batches: Vec<&[String]> = texts.chunks(self.batch_size).collect();
        let batch_count = batches.len();

        for (i, batch) in batches.into_iter().enumerate() {
            debug!(
                batch = i + 1,
                of = batch_count,
                size = batch.len(),
                "Embedding batch"
            );
            let batch_embeddings = self.provider.embed_batch(batch).await?;
            if batch_embeddings.len() != batch.len() {
                return Err(Error::Provider(format!(
                    "Provider returned {} embeddings for {} inputs",
                    batch_embeddings.len(),
                    batch.len()
                )));
            }
            embeddings.extend(batch_embeddings);

            if i + 1 < batch_count && !self.inter_batch_delay.is_zero() {
                tokio::time::sleep(self.inter_batch_delay).await;
            }
        }

        Ok(embeddings)
    }

    /// Embed a single document text
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.provider.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("Provider returned no embedding".to_string()))
    }

    /// Embed a search query in the provider's query mode
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>> {
        self.provider.embed_query(query).await
    }

    /// The embedding dimension produced by the active provider
    pub fn dimension(&self) -> usize {
        self.provider.dimension()
    }

    /// The active model name
    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }
}

/// Cosine similarity of two equal-length vectors after L2 normalization.
///
/// A zero-norm input is rejected rather than producing NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(Error::Validation(format!(
            "Cannot compare vectors of different dimensions ({} vs {})",
            a.len(),
            b.len()
        )));
    }

    let norm_a = l2_norm(a);
    let norm_b = l2_norm(b);
    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(Error::Validation(
            "Cosine similarity is undefined for a zero-norm vector".to_string(),
        ));
    }

    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    Ok(dot / (norm_a * norm_b))
}

/// Similarities between a query vector and a list of vectors
pub fn batch_similarity(query: &[f32], embeddings: &[Vec<f32>]) -> Result<Vec<f32>> {
    embeddings
        .iter()
        .map(|e| cosine_similarity(query, e))
        .collect()
}

fn l2_norm(v: &[f32]) -> f32 {
    v.iter().map(|x| x * x).sum::<f32>().sqrt()
}
