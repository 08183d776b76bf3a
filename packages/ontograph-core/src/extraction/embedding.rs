//! Embedding providers
//!
//! - `HttpEmbeddingProvider`: OpenAI-compatible `/embeddings` endpoint
//! - `HashingEmbeddingProvider`: deterministic feature hashing, no network

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};

use super::caller::CallError;
use super::retry::RetryPolicy;
use crate::config::{secret_from_env, EmbeddingConfig};

/// Text to vector
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, CallError>;

    /// One vector per input, in input order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, CallError> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    fn dimensions(&self) -> usize;
}

/// True when the vector is non-empty and has no NaN/Infinity component
pub fn is_finite_vector(vector: &[f64]) -> bool {
    !vector.is_empty() && vector.iter().all(|x| x.is_finite())
}

/// Build the configured provider: HTTP when `base_url` is set, hashing otherwise
pub fn provider_from_config(
    config: &EmbeddingConfig,
) -> crate::Result<std::sync::Arc<dyn EmbeddingProvider>> {
    match &config.base_url {
        Some(base_url) => {
            let api_key = secret_from_env(&config.api_key_env)?;
            let retry = RetryPolicy::new(config.max_retries, config.backoff_ms, config.timeout_secs);
            let provider = HttpEmbeddingProvider::new(
                base_url,
                &config.model,
                Some(api_key),
                config.dimensions,
                retry,
            )?;
            Ok(std::sync::Arc::new(provider))
        }
        None => Ok(std::sync::Arc::new(HashingEmbeddingProvider::new(
            config.dimensions,
        ))),
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// HTTP
// ═══════════════════════════════════════════════════════════════════════════

pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
    dimensions: usize,
    retry: RetryPolicy,
}

impl HttpEmbeddingProvider {
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        api_key: Option<String>,
        dimensions: usize,
        retry: RetryPolicy,
    ) -> Result<Self, CallError> {
        let client = reqwest::Client::builder()
            .timeout(retry.timeout)
            .build()
            .map_err(|e| CallError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key,
            dimensions,
            retry,
        })
    }

    async fn request(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, CallError> {
        let mut request = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .json(&serde_json::json!({
                "model": &self.model,
                "input": texts,
                "dimensions": self.dimensions,
            }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(CallError::Api { status, body });
        }

        #[derive(Deserialize)]
        struct EmbeddingData {
            index: usize,
            embedding: Vec<f64>,
        }
        #[derive(Deserialize)]
        struct EmbeddingResponse {
            data: Vec<EmbeddingData>,
        }

        let mut parsed: EmbeddingResponse = response.json().await?;
        if parsed.data.len() != texts.len() {
            return Err(CallError::InvalidResponse(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|d| d.index);
        Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, CallError> {
        let texts = [text.to_string()];
        let mut vectors = self.retry.run("embed", || self.request(&texts)).await?;
        vectors
            .pop()
            .ok_or_else(|| CallError::InvalidResponse("no embedding returned".to_string()))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>, CallError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.retry.run("embed_batch", || self.request(texts)).await
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}

// ═══════════════════════════════════════════════════════════════════════════
// Hashing
// ═══════════════════════════════════════════════════════════════════════════

/// Signed feature hashing over lowercase word tokens, L2-normalized
///
/// Same text, same vector. Texts sharing words land close in cosine space.
#[derive(Debug, Clone)]
pub struct HashingEmbeddingProvider {
    dimensions: usize,
}

impl HashingEmbeddingProvider {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn embed_sync(&self, text: &str) -> Vec<f64> {
        let mut vector = vec![0.0; self.dimensions];
        let lowered = text.to_lowercase();
        for token in lowered
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
        {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket = [0u8; 8];
            bucket.copy_from_slice(&digest[..8]);
            let index = (u64::from_le_bytes(bucket) % self.dimensions as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[index] += sign;
        }
        let norm = vector.iter().map(|x| x * x).sum::<f64>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbeddingProvider {
    async fn embed(&self, text: &str) -> Result<Vec<f64>, CallError> {
        Ok(self.embed_sync(text))
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
