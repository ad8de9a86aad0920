//! HTTP embedding adapters and provider selection.
//!
//! Failures are classified so ingestion can choose its cooldown:
//! `429` is quota exhaustion, `408`/`502`/`503`/`504` and connect or timeout
//! errors are transient, and everything else is a plain failure.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::info;

use storyrank_core::config::{EmbeddingConfig, EmbeddingProviderKind};
use storyrank_core::error::StoryrankError;
use storyrank_core::types::Embedding;

use crate::embedding::{check_vector, DynEmbeddingProvider, EmbedError, EmbeddingProvider, MockEmbedding};

/// Longest slice of an error body carried into an error message.
const MAX_ERROR_BODY: usize = 200;

/// Classify a non-success HTTP status.
pub fn classify_status(status: StatusCode, body: &str) -> EmbedError {
    let body: String = body.trim().chars().take(MAX_ERROR_BODY).collect();
    let message = if body.is_empty() {
        format!("provider returned {}", status)
    } else {
        format!("provider returned {}: {}", status, body)
    };
    match status {
        StatusCode::TOO_MANY_REQUESTS => EmbedError::QuotaExceeded(message),
        StatusCode::REQUEST_TIMEOUT
        | StatusCode::BAD_GATEWAY
        | StatusCode::SERVICE_UNAVAILABLE
        | StatusCode::GATEWAY_TIMEOUT => EmbedError::Transient(message),
        _ => EmbedError::Other(message),
    }
}

/// Classify a transport-level failure.
pub fn classify_transport(err: reqwest::Error) -> EmbedError {
    if err.is_timeout() || err.is_connect() {
        EmbedError::Transient(err.to_string())
    } else {
        EmbedError::Other(err.to_string())
    }
}

async fn read_error(resp: reqwest::Response) -> EmbedError {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    classify_status(status, &body)
}

fn build_client(timeout: Duration, headers: HeaderMap) -> Result<reqwest::Client, StoryrankError> {
    reqwest::Client::builder()
        .timeout(timeout)
        .default_headers(headers)
        .build()
        .map_err(|e| StoryrankError::Config(format!("Failed to build embedding HTTP client: {}", e)))
}

// ---------------------------------------------------------------------------
// LocalEmbeddingClient - companion embedding service
// ---------------------------------------------------------------------------

/// Client for a companion service exposing `POST /embed`.
///
/// Request: `{"text": "..."}`. Response: `{"embedding": [...]}`, or a body
/// with an `error` field when the service could not embed the text.
#[derive(Debug, Clone)]
pub struct LocalEmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
}

#[derive(Serialize)]
struct LocalRequest<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct LocalResponse {
    #[serde(default)]
    embedding: Embedding,
    #[serde(default)]
    error: Option<String>,
}

impl LocalEmbeddingClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, StoryrankError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(Self {
            client: build_client(timeout, headers)?,
            endpoint: format!("{}/embed", base_url.trim_end_matches('/')),
        })
    }
}

impl EmbeddingProvider for LocalEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbedError> {
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&LocalRequest { text })
            .send()
            .await
            .map_err(classify_transport)?;

        if !resp.status().is_success() {
            return Err(read_error(resp).await);
        }

        let parsed: LocalResponse = resp
            .json()
            .await
            .map_err(|e| EmbedError::Other(format!("Invalid embedding response: {}", e)))?;
        if let Some(error) = parsed.error.filter(|e| !e.trim().is_empty()) {
            return Err(EmbedError::Other(error));
        }
        check_vector(parsed.embedding)
    }

    fn model_name(&self) -> &str {
        "local"
    }
}

// ---------------------------------------------------------------------------
// OpenAiEmbeddingClient - OpenAI-compatible /embeddings
// ---------------------------------------------------------------------------

/// Client for OpenAI-compatible `POST /embeddings` endpoints.
#[derive(Debug, Clone)]
pub struct OpenAiEmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
    dimensions: Option<usize>,
}

#[derive(Serialize)]
struct OpenAiRequest<'a> {
    model: &'a str,
    input: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

#[derive(Deserialize)]
struct OpenAiResponse {
    data: Vec<OpenAiEmbedding>,
}

#[derive(Deserialize)]
struct OpenAiEmbedding {
    embedding: Embedding,
}

impl OpenAiEmbeddingClient {
    pub fn new(
        api_key: &str,
        base_url: &str,
        model: &str,
        dimensions: Option<usize>,
        timeout: Duration,
    ) -> Result<Self, StoryrankError> {
        if api_key.trim().is_empty() {
            return Err(StoryrankError::Config("Missing embedding API key".to_string()));
        }
        if model.trim().is_empty() {
            return Err(StoryrankError::Config("Missing embedding model name".to_string()));
        }

        let mut headers = HeaderMap::new();
        let auth = format!("Bearer {}", api_key.trim());
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&auth)
                .map_err(|_| StoryrankError::Config("Invalid embedding API key".to_string()))?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        Ok(Self {
            client: build_client(timeout, headers)?,
            endpoint: format!("{}/embeddings", base_url.trim_end_matches('/')),
            model: model.to_string(),
            dimensions,
        })
    }
}

impl EmbeddingProvider for OpenAiEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Embedding, EmbedError> {
        let request = OpenAiRequest {
            model: &self.model,
            input: text,
            dimensions: self.dimensions,
        };
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(classify_transport)?;

        if !resp.status().is_success() {
            return Err(read_error(resp).await);
        }

        let parsed: OpenAiResponse = resp
            .json()
            .await
            .map_err(|e| EmbedError::Other(format!("Invalid embedding response: {}", e)))?;
        let first = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::Other("Provider returned no embeddings".to_string()))?;
        check_vector(first.embedding)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

/// Build the provider selected by `config`.
pub fn build_provider(config: &EmbeddingConfig) -> Result<Arc<dyn DynEmbeddingProvider>, StoryrankError> {
    let provider: Arc<dyn DynEmbeddingProvider> = match config.provider {
        EmbeddingProviderKind::Local => {
            Arc::new(LocalEmbeddingClient::new(&config.base_url, config.timeout())?)
        }
        EmbeddingProviderKind::OpenAi => Arc::new(OpenAiEmbeddingClient::new(
            config.api_key.as_deref().unwrap_or_default(),
            &config.base_url,
            &config.model,
            config.dimensions,
            config.timeout(),
        )?),
        EmbeddingProviderKind::Onnx => build_onnx(config)?,
        EmbeddingProviderKind::Mock => {
            Arc::new(MockEmbedding::with_dimensions(config.dimensions.unwrap_or(384)))
        }
    };
    info!(
        provider = ?config.provider,
        model = provider.model_name(),
        "Embedding provider ready"
    );
    Ok(provider)
}

#[cfg(feature = "onnx")]
fn build_onnx(config: &EmbeddingConfig) -> Result<Arc<dyn DynEmbeddingProvider>, StoryrankError> {
    let dir = config
        .model_dir
        .as_deref()
        .ok_or_else(|| StoryrankError::Config("embedding.model_dir is required for the onnx provider".into()))?;
    Ok(Arc::new(crate::onnx::OnnxEmbeddingProvider::from_directory(dir)?))
}

#[cfg(not(feature = "onnx"))]
fn build_onnx(_config: &EmbeddingConfig) -> Result<Arc<dyn DynEmbeddingProvider>, StoryrankError> {
    Err(StoryrankError::Config(
        "The onnx embedding provider requires building with the `onnx` feature".into(),
    ))
}
