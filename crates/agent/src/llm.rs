//! Claude over the Messages API, either directly from Anthropic or through
//! Vertex AI's `rawPredict` endpoint. Both speak the same request and response
//! shapes; only the URL, the auth header and where the model name goes differ.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, warn};

use replier_core::config::{LlmConfig, LlmProvider};

use crate::credentials::{GoogleCredentials, GoogleTokenSource, StaticTokenSource, TokenSource};

pub const ANTHROPIC_API_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const VERTEX_ANTHROPIC_VERSION: &str = "vertex-2023-10-16";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum LlmError {
    #[error("llm provider is misconfigured: {0}")]
    Config(String),
    #[error("llm request failed: {0}")]
    Request(String),
    #[error("llm endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("llm response was invalid: {0}")]
    InvalidResponse(String),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CompletionRequest {
    pub system: String,
    pub prompt: String,
    pub max_tokens: u32,
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    fn model(&self) -> &str;
    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError>;
}

pub fn build_llm_client(config: &LlmConfig) -> Result<Arc<dyn LlmClient>, LlmError> {
    match config.provider {
        LlmProvider::Anthropic => Ok(Arc::new(AnthropicClient::from_config(config)?)),
        LlmProvider::Vertex => Ok(Arc::new(VertexClient::from_config(config)?)),
    }
}

fn http_client(timeout_secs: u64) -> Result<reqwest::Client, LlmError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs.max(1)))
        .build()
        .map_err(|error| LlmError::Config(error.to_string()))
}

fn messages(request: &CompletionRequest) -> Value {
    json!([{ "role": "user", "content": request.prompt }])
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

async fn send(builder: reqwest::RequestBuilder, body: &Value) -> Result<String, LlmError> {
    let response =
        builder.json(body).send().await.map_err(|error| LlmError::Request(error.to_string()))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(LlmError::Status { status: status.as_u16(), body });
    }

    let parsed: MessagesResponse =
        response.json().await.map_err(|error| LlmError::InvalidResponse(error.to_string()))?;
    let text = parsed
        .content
        .into_iter()
        .filter(|block| block.kind == "text")
        .filter_map(|block| block.text)
        .collect::<Vec<_>>()
        .join("");
    if text.trim().is_empty() {
        return Err(LlmError::InvalidResponse("response contained no text".to_owned()));
    }
    Ok(text.trim().to_owned())
}

pub struct AnthropicClient {
    http: reqwest::Client,
    base_url: String,
    api_key: SecretString,
    model: String,
}

impl AnthropicClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let api_key = config
            .api_key
            .clone()
            .ok_or_else(|| LlmError::Config("llm.api_key is required for anthropic".to_owned()))?;
        Ok(Self {
            http: http_client(config.timeout_secs)?,
            base_url: config
                .base_url
                .as_deref()
                .unwrap_or(ANTHROPIC_API_BASE_URL)
                .trim_end_matches('/')
                .to_owned(),
            api_key,
            model: config.model.clone(),
        })
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        debug!(event_name = "query.llm.request", provider = "anthropic", model = %self.model, "calling model");
        let body = json!({
            "model": self.model,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": messages(request),
        });
        let builder = self
            .http
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", self.api_key.expose_secret())
            .header("anthropic-version", ANTHROPIC_VERSION);
        send(builder, &body).await
    }
}

pub struct VertexClient {
    http: reqwest::Client,
    endpoint: String,
    tokens: Arc<dyn TokenSource>,
    model: String,
}

impl VertexClient {
    /// A configured `access_token` is used as-is. Otherwise Google credentials
    /// are discovered and their tokens refreshed before they expire.
    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        let http = http_client(config.timeout_secs)?;
        let tokens: Arc<dyn TokenSource> = match &config.access_token {
            Some(token) => Arc::new(StaticTokenSource::new(token.clone())),
            None => Arc::new(GoogleTokenSource::new(
                http.clone(),
                GoogleCredentials::discover(config.credentials_file.as_deref())?,
            )),
        };
        Self::with_token_source(config, http, tokens)
    }

    pub fn with_token_source(
        config: &LlmConfig,
        http: reqwest::Client,
        tokens: Arc<dyn TokenSource>,
    ) -> Result<Self, LlmError> {
        let project = config
            .project
            .clone()
            .ok_or_else(|| LlmError::Config("llm.project is required for vertex".to_owned()))?;
        let region = config.region.clone().unwrap_or_else(|| "us-east5".to_owned());

        let base_url = config
            .base_url
            .clone()
            .unwrap_or_else(|| format!("https://{region}-aiplatform.googleapis.com"));
        let endpoint = format!(
            "{}/v1/projects/{project}/locations/{region}/publishers/anthropic/models/{}:rawPredict",
            base_url.trim_end_matches('/'),
            config.model
        );

        Ok(Self { http, endpoint, tokens, model: config.model.clone() })
    }

    async fn call(&self, body: &Value) -> Result<String, LlmError> {
        let token = self.tokens.access_token().await?;
        let builder = self.http.post(&self.endpoint).bearer_auth(token.expose_secret());
        send(builder, body).await
    }
}

#[async_trait]
impl LlmClient for VertexClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String, LlmError> {
        debug!(event_name = "query.llm.request", provider = "vertex", model = %self.model, "calling model");
        let body = json!({
            "anthropic_version": VERTEX_ANTHROPIC_VERSION,
            "max_tokens": request.max_tokens,
            "system": request.system,
            "messages": messages(request),
        });
        match self.call(&body).await {
            Err(LlmError::Status { status: 401, .. }) => {
                warn!(event_name = "query.llm.token_rejected", model = %self.model, "vertex rejected the access token, retrying once");
                self.tokens.invalidate().await;
                self.call(&body).await
            }
            result => result,
        }
    }
}
