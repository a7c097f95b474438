//! Embedding providers.
//!
//! - [`HashingEmbedder`] is local and deterministic: lowercase word tokens are
//!   hashed into a fixed number of buckets and the vector is L2-normalized, so
//!   cosine similarity measures vocabulary overlap.
//! - [`OpenAiEmbedder`] calls an OpenAI-compatible `POST /embeddings` endpoint,
//!   retrying 429 and 5xx responses with exponential backoff.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, warn};

use replier_core::config::{EmbeddingConfig, EmbeddingProvider};

pub const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "can", "do", "does", "for", "from", "how",
    "i", "if", "in", "is", "it", "of", "on", "or", "that", "the", "this", "to", "was", "what",
    "when", "where", "which", "who", "why", "with", "you", "your",
];

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("embedding provider is misconfigured: {0}")]
    Config(String),
    #[error("embedding request failed: {0}")]
    Request(String),
    #[error("embedding endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("embedding response was invalid: {0}")]
    InvalidResponse(String),
}

#[async_trait]
pub trait Embedder: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;

    /// Embeds `texts`, returning one vector per input in input order.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError>;

    async fn embed_query(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let mut vectors = self.embed(&[text.to_owned()]).await?;
        vectors
            .pop()
            .ok_or_else(|| EmbeddingError::InvalidResponse("no vector for query".to_owned()))
    }
}

pub fn build_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>, EmbeddingError> {
    match config.provider {
        EmbeddingProvider::Hashing => Ok(Arc::new(HashingEmbedder::new(config.dims))),
        EmbeddingProvider::OpenAi => Ok(Arc::new(OpenAiEmbedder::from_config(config)?)),
    }
}

#[derive(Clone, Debug)]
pub struct HashingEmbedder {
    dims: usize,
}

impl HashingEmbedder {
    pub fn new(dims: usize) -> Self {
        Self { dims: dims.max(1) }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut counts: HashMap<String, u32> = HashMap::new();
        for token in tokens(text) {
            *counts.entry(token).or_insert(0) += 1;
        }

        let mut vector = vec![0.0_f32; self.dims];
        for (token, count) in counts {
            let digest = Sha256::digest(token.as_bytes());
            let mut bucket_bytes = [0_u8; 8];
            bucket_bytes.copy_from_slice(&digest[..8]);
            let bucket = (u64::from_le_bytes(bucket_bytes) % self.dims as u64) as usize;
            let sign = if digest[8] & 1 == 0 { 1.0 } else { -1.0 };
            vector[bucket] += sign * (1.0 + (count as f32).ln());
        }

        let norm = vector.iter().map(|value| value * value).sum::<f32>().sqrt();
        if norm > f32::EPSILON {
            vector.iter_mut().for_each(|value| *value /= norm);
        }
        vector
    }
}

fn tokens(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|ch: char| !ch.is_alphanumeric())
        .filter(|token| token.chars().count() > 1)
        .map(str::to_lowercase)
        .filter(|token| !STOPWORDS.contains(&token.as_str()))
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn model_name(&self) -> &str {
        "hashing"
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Ok(texts.iter().map(|text| self.embed_text(text)).collect())
    }
}

pub struct OpenAiEmbedder {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
    dims: usize,
    max_retries: u32,
    retry_base: Duration,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

impl OpenAiEmbedder {
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let api_key = config.api_key.clone().ok_or_else(|| {
            EmbeddingError::Config("embedding.api_key is required for the openai provider".to_owned())
        })?;
        let base_url = config.base_url.clone().unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_owned());
        Self::new(base_url, api_key, config.model.clone(), config.dims)
    }

    pub fn new(
        base_url: impl Into<String>,
        api_key: SecretString,
        model: impl Into<String>,
        dims: usize,
    ) -> Result<Self, EmbeddingError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|error| EmbeddingError::Config(error.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            api_key,
            model: model.into(),
            dims,
            max_retries: 3,
            retry_base: Duration::from_secs(1),
        })
    }

    pub fn with_retry(mut self, max_retries: u32, retry_base: Duration) -> Self {
        self.max_retries = max_retries;
        self.retry_base = retry_base;
        self
    }

    async fn request_once(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let response = self
            .http
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&json!({ "model": self.model, "input": texts }))
            .send()
            .await
            .map_err(|error| EmbeddingError::Request(error.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingError::Status { status: status.as_u16(), body });
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|error| EmbeddingError::InvalidResponse(error.to_string()))?;
        if parsed.data.len() != texts.len() {
            return Err(EmbeddingError::InvalidResponse(format!(
                "expected {} vectors, got {}",
                texts.len(),
                parsed.data.len()
            )));
        }
        parsed.data.sort_by_key(|datum| datum.index);
        Ok(parsed.data.into_iter().map(|datum| datum.embedding).collect())
    }
}

fn is_retryable(error: &EmbeddingError) -> bool {
    match error {
        EmbeddingError::Request(_) => true,
        EmbeddingError::Status { status, .. } => *status == 429 || *status >= 500,
        EmbeddingError::Config(_) | EmbeddingError::InvalidResponse(_) => false,
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut attempt = 0_u32;
        loop {
            match self.request_once(texts).await {
                Ok(vectors) => {
                    debug!(event_name = "ingest.embed.batch", count = vectors.len(), "embedded batch");
                    return Ok(vectors);
                }
                Err(error) if is_retryable(&error) && attempt < self.max_retries => {
                    let delay = self.retry_base.saturating_mul(1 << attempt.min(5));
                    warn!(
                        event_name = "ingest.embed.retry",
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "retrying embedding request"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}
