//! Embedding providers.
//!
//! Concrete [`Embedder`] implementations selected by `[embedding].provider`:
//!
//! | Config value | Provider |
//! |--------------|----------|
//! | `"disabled"` | [`DisabledEmbedder`] |
//! | `"openai"` | [`OpenAiEmbedder`] (`POST {url}/embeddings`) |
//! | `"ollama"` | [`OllamaEmbedder`] (`POST {url}/api/embed`) |
//! | `"local"` | `LocalEmbedder` (fastembed, `local-embeddings` feature) |
//!
//! # Retry Strategy
//!
//! Network providers retry through [`with_backoff`]:
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors and timeouts → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)
//!
//! Requests are split into `batch_size` inputs; a failed batch fails the
//! call, leaving earlier batches' results to the caller's partial-progress
//! handling.

use anyhow::{bail, Context};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use campus_rag_core::embedding::Embedder;
use campus_rag_core::{RagError, Result};

use crate::config::EmbeddingConfig;
use crate::retry::{network_error, status_error, with_backoff, RetryPolicy};

// ============ Disabled Provider ============

/// Used when `embedding.provider = "disabled"`; every call fails.
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(RagError::Configuration(
            "Embedding provider is disabled".to_string(),
        ))
    }
}

/// Settings shared by the HTTP providers.
struct HttpSettings {
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    client: reqwest::Client,
    retry: RetryPolicy,
}

impl HttpSettings {
    fn from_config(config: &EmbeddingConfig, provider: &str, default_url: &str) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .with_context(|| format!("embedding.model required for {} provider", provider))?;
        let dims = config
            .dims
            .with_context(|| format!("embedding.dims required for {} provider", provider))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| default_url.to_string())
            .trim_end_matches('/')
            .to_string();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            model,
            dims,
            url,
            batch_size: config.batch_size.max(1),
            client,
            retry: RetryPolicy::new(config.max_retries),
        })
    }

    async fn post_json(
        &self,
        service: &str,
        endpoint: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
    ) -> Result<serde_json::Value> {
        with_backoff(self.retry, service, move || async move {
            let mut req = self
                .client
                .post(endpoint)
                .header("Content-Type", "application/json")
                .json(body);
            if let Some(key) = bearer {
                req = req.header("Authorization", format!("Bearer {}", key));
            }
            let resp = req.send().await.map_err(|e| network_error(service, e))?;
            let status = resp.status();
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(status_error(service, status, &text));
            }
            resp.json::<serde_json::Value>()
                .await
                .map_err(|e| network_error(service, e))
        })
        .await
    }

    fn check(&self, service: &str, expected: usize, vectors: &[Vec<f32>]) -> Result<()> {
        if vectors.len() != expected {
            return Err(RagError::Other(anyhow::anyhow!(
                "{} returned {} embeddings for {} inputs",
                service,
                vectors.len(),
                expected
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dims) {
            return Err(RagError::SchemaMismatch {
                expected: self.dims,
                found: bad.len(),
            });
        }
        Ok(())
    }
}

// ============ OpenAI Provider ============

/// OpenAI (or OpenAI-compatible) embeddings API.
///
/// Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAiEmbedder {
    http: HttpSettings,
    api_key: String,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY environment variable not set")?;
        Self::with_api_key(config, api_key)
    }

    pub fn with_api_key(config: &EmbeddingConfig, api_key: String) -> anyhow::Result<Self> {
        Ok(Self {
            http: HttpSettings::from_config(config, "OpenAI", "https://api.openai.com/v1")?,
            api_key,
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.http.retry = retry;
        self
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.http.model
    }
    fn dims(&self) -> usize {
        self.http.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let endpoint = format!("{}/embeddings", self.http.url);
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.http.batch_size) {
            let body = serde_json::json!({
                "model": self.http.model,
                "input": batch,
            });
            let json = self
                .http
                .post_json("OpenAI embeddings", &endpoint, Some(&self.api_key), &body)
                .await?;
            let vectors = parse_openai_response(&json)?;
            self.http.check("OpenAI embeddings", batch.len(), &vectors)?;
            debug!(batch = batch.len(), "embedded batch");
            out.extend(vectors);
        }
        Ok(out)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(pos);
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow::anyhow!("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, to_f32(embedding)));
    }
    indexed.sort_by_key(|(i, _)| *i);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// A local Ollama instance (default `http://localhost:11434`).
pub struct OllamaEmbedder {
    http: HttpSettings,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        Ok(Self {
            http: HttpSettings::from_config(config, "Ollama", "http://localhost:11434")?,
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.http.model
    }
    fn dims(&self) -> usize {
        self.http.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let endpoint = format!("{}/api/embed", self.http.url);
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.http.batch_size) {
            let body = serde_json::json!({
                "model": self.http.model,
                "input": batch,
            });
            let json = self
                .http
                .post_json("Ollama embeddings", &endpoint, None, &body)
                .await?;
            let vectors = parse_ollama_response(&json)?;
            self.http.check("Ollama embeddings", batch.len(), &vectors)?;
            out.extend(vectors);
        }
        Ok(out)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: missing embeddings array"))?;

    embeddings
        .iter()
        .map(|e| {
            e.as_array()
                .map(|values| to_f32(values))
                .ok_or_else(|| anyhow::anyhow!("Invalid Ollama response: embedding is not an array").into())
        })
        .collect()
}

fn to_f32(values: &[serde_json::Value]) -> Vec<f32> {
    values
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0) as f32)
        .collect()
}

// ============ Local Provider (fastembed) ============

/// In-process embeddings via fastembed. The model downloads on first use.
#[cfg(feature = "local-embeddings")]
pub struct LocalEmbedder {
    model_name: String,
    dims: usize,
    batch_size: usize,
    model: Arc<std::sync::Mutex<fastembed::TextEmbedding>>,
}

#[cfg(feature = "local-embeddings")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model_name = config
            .model
            .clone()
            .unwrap_or_else(|| "multilingual-e5-small".to_string());
        let (fastembed_model, native_dims) = local_model(&model_name)?;
        let dims = config.dims.unwrap_or(native_dims);
        if dims != native_dims {
            bail!(
                "embedding.dims = {} does not match {} ({} dims)",
                dims,
                model_name,
                native_dims
            );
        }
        let model = fastembed::TextEmbedding::try_new(
            fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
        )
        .map_err(|e| anyhow::anyhow!("Failed to initialize local embedding model: {}", e))?;

        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            model: Arc::new(std::sync::Mutex::new(model)),
        })
    }
}

#[cfg(feature = "local-embeddings")]
fn local_model(name: &str) -> anyhow::Result<(fastembed::EmbeddingModel, usize)> {
    match name {
        "multilingual-e5-small" => Ok((fastembed::EmbeddingModel::MultilingualE5Small, 384)),
        "multilingual-e5-base" => Ok((fastembed::EmbeddingModel::MultilingualE5Base, 768)),
        "multilingual-e5-large" => Ok((fastembed::EmbeddingModel::MultilingualE5Large, 1024)),
        "all-minilm-l6-v2" => Ok((fastembed::EmbeddingModel::AllMiniLML6V2, 384)),
        "bge-small-en-v1.5" => Ok((fastembed::EmbeddingModel::BGESmallENV15, 384)),
        other => bail!(
            "Unknown local embedding model: '{}'. Supported models: \
             multilingual-e5-small, multilingual-e5-base, multilingual-e5-large, \
             all-minilm-l6-v2, bge-small-en-v1.5",
            other
        ),
    }
}

#[cfg(feature = "local-embeddings")]
#[async_trait]
impl Embedder for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.model.clone();
        let texts = texts.to_vec();
        let batch_size = self.batch_size;
        tokio::task::spawn_blocking(move || {
            let mut model = model
                .lock()
                .map_err(|_| anyhow::anyhow!("local embedding model lock poisoned"))?;
            model
                .embed(texts, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("Local embedding failed: {}", e))
        })
        .await
        .map_err(|e| anyhow::anyhow!("embedding task failed: {}", e))?
        .map_err(RagError::from)
    }
}

/// Build the configured embedding provider.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings")]
        "local" => Ok(Arc::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}
