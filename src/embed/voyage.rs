//! Voyage AI embedding provider

use super::EmbeddingProvider;
use crate::config::EmbeddingConfig;
use crate::error::{Error, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.voyageai.com";

/// Expected dimension for known Voyage models
pub fn voyage_model_dimension(model: &str) -> Option<usize> {
    match model {
        "voyage-large-3" => Some(1536),
        "voyage-3" => Some(1024),
        "voyage-3-lite" => Some(512),
        _ => None,
    }
}

/// Voyage distinguishes how an input will be used
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum InputType {
    Document,
    Query,
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    input_type: InputType,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

/// Voyage AI embedding backend.
///
/// Documents and queries are embedded asymmetrically: the `input_type`
/// field changes how the service encodes the text, so the two request
/// modes are never collapsed.
#[derive(Debug)]
pub struct VoyageProvider {
    client: Client,
    base_url: Url,
    api_key: String,
    model: String,
    dimension: usize,
}

impl VoyageProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let api_key = config.api_key().ok_or_else(|| {
            Error::Config(format!(
                "Voyage API key not found in environment variable {}",
                config.api_key_env
            ))
        })?;

        let base_url = Url::parse(
            config
                .base_url
                .as_deref()
                .filter(|u| !u.is_empty())
                .unwrap_or(DEFAULT_BASE_URL),
        )?;

        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
            model: config.model.clone(),
            dimension: voyage_model_dimension(&config.model).unwrap_or(config.dimension),
        })
    }

    async fn request_embeddings(
        &self,
        input: &[String],
        input_type: InputType,
    ) -> Result<Vec<Vec<f32>>> {
        let url = self
            .base_url
            .join("/v1/embeddings")
            .map_err(|e| Error::Config(format!("Invalid Voyage base URL: {}", e)))?;

        let request = EmbeddingRequest {
            model: &self.model,
            input,
            input_type,
        };

        let response = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Voyage request failed: {}", e)))?;

        let response = response
            .error_for_status()
            .map_err(|e| Error::Provider(format!("Voyage returned error status: {}", e)))?;

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Invalid Voyage response: {}", e)))?;

        let embeddings: Vec<Vec<f32>> = parsed.data.into_iter().map(|d| d.embedding).collect();
        self.validate_dimensions(&embeddings)?;
        Ok(embeddings)
    }

    fn validate_dimensions(&self, embeddings: &[Vec<f32>]) -> Result<()> {
        if let Some(mismatch) = embeddings.iter().find(|v| v.len() != self.dimension) {
            return Err(Error::Provider(format!(
                "Voyage model '{}' returned dimension {}, expected {}",
                self.model,
                mismatch.len(),
                self.dimension
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl EmbeddingProvider for VoyageProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_embeddings(texts, InputType::Document).await
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self
            .request_embeddings(&[text.to_string()], InputType::Query)
            .await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| Error::Provider("Voyage returned no embedding for query".to_string()))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
