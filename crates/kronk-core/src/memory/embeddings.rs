//! ============================================================================
//! Embedding Service - Vector embeddings for semantic recall
//! ============================================================================
//! Generates text embeddings with a local Ollama model, or with an
//! OpenAI-compatible API when a key is configured. Every failure is reported
//! as `MemoryError::EmbeddingUnavailable` so callers can degrade.
//! ============================================================================

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::types::MemoryError;
use crate::config::MemoryConfig;

/// Default Ollama embedding model
pub const DEFAULT_OLLAMA_EMBEDDING_MODEL: &str = "nomic-embed-text";

/// Default OpenAI-compatible embedding model
pub const DEFAULT_OPENAI_EMBEDDING_MODEL: &str = "text-embedding-3-small";

/// Anything that can turn text into a vector
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a single text. Exactly one external call per invocation.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError>;
}

/// Wire format spoken by the embedding endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmbeddingApi {
    /// `POST /api/embed`
    Ollama,
    /// `POST /embeddings` with bearer auth
    OpenAi,
}

/// HTTP embedding service
pub struct EmbeddingService {
    client: Client,
    api: EmbeddingApi,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[derive(Debug, Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedData {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

/// Ollama returns `{"error": "..."}`, OpenAI `{"error": {"message": "..."}}`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Plain(String),
    Detailed { message: String },
}

impl EmbeddingService {
    /// Local Ollama embeddings
    pub fn new_ollama(base_url: String, model: String, timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            api: EmbeddingApi::Ollama,
            api_key: None,
            base_url,
            model,
        }
    }

    /// OpenAI embeddings
    pub fn new_openai(api_key: String, timeout: Duration) -> Self {
        Self::new_custom(
            EmbeddingApi::OpenAi,
            Some(api_key),
            "https://api.openai.com/v1".to_string(),
            DEFAULT_OPENAI_EMBEDDING_MODEL.to_string(),
            timeout,
        )
    }

    /// Use a different model on the same endpoint
    pub fn with_model(mut self, model: String) -> Self {
        self.model = model;
        self
    }

    /// Create with explicit API flavour, base URL and model
    pub fn new_custom(
        api: EmbeddingApi,
        api_key: Option<String>,
        base_url: String,
        model: String,
        timeout: Duration,
    ) -> Self {
        Self {
            client: build_client(timeout),
            api,
            api_key,
            base_url,
            model,
        }
    }

    pub fn api(&self) -> EmbeddingApi {
        self.api
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn embed_ollama(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let request = OllamaEmbedRequest {
            model: &self.model,
            input: text,
        };
        let body = self
            .post(format!("{}/api/embed", self.base_url.trim_end_matches('/')), &request)
            .await?;

        let response: OllamaEmbedResponse = serde_json::from_str(&body).map_err(|e| {
            MemoryError::EmbeddingUnavailable(format!("failed to parse Ollama response: {}", e))
        })?;

        response.embeddings.into_iter().next().ok_or_else(|| {
            MemoryError::EmbeddingUnavailable("Ollama returned no embeddings".to_string())
        })
    }

    async fn embed_openai(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        let request = OpenAiEmbedRequest {
            model: &self.model,
            input: vec![text],
        };
        let body = self
            .post(format!("{}/embeddings", self.base_url.trim_end_matches('/')), &request)
            .await?;

        let response: OpenAiEmbedResponse = serde_json::from_str(&body).map_err(|e| {
            MemoryError::EmbeddingUnavailable(format!("failed to parse embedding response: {}", e))
        })?;

        response
            .data
            .into_iter()
            .min_by_key(|d| d.index)
            .map(|d| d.embedding)
            .ok_or_else(|| MemoryError::EmbeddingUnavailable("no embedding returned".to_string()))
    }

    async fn post<T: Serialize + ?Sized>(&self, url: String, request: &T) -> Result<String, MemoryError> {
        let mut builder = self.client.post(&url).json(request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| {
            MemoryError::EmbeddingUnavailable(format!("failed to send embedding request: {}", e))
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            MemoryError::EmbeddingUnavailable(format!("failed to read response body: {}", e))
        })?;

        if !status.is_success() {
            let detail = match serde_json::from_str::<ErrorResponse>(&body) {
                Ok(ErrorResponse { error: ErrorBody::Plain(message) })
                | Ok(ErrorResponse { error: ErrorBody::Detailed { message } }) => message,
                Err(_) => body,
            };
            return Err(MemoryError::EmbeddingUnavailable(format!(
                "embedding API error ({}): {}",
                status, detail
            )));
        }

        Ok(body)
    }
}

#[async_trait]
impl Embedder for EmbeddingService {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, MemoryError> {
        debug!("Embedding {} chars with {}", text.len(), self.model);

        let embedding = match self.api {
            EmbeddingApi::Ollama => self.embed_ollama(text).await?,
            EmbeddingApi::OpenAi => self.embed_openai(text).await?,
        };

        if embedding.is_empty() {
            return Err(MemoryError::EmbeddingUnavailable(
                "embedding vector is empty".to_string(),
            ));
        }
        Ok(embedding)
    }
}

/// Build the embedding service the configuration asks for.
/// An OpenAI key takes precedence over the local Ollama model; the
/// configured model is used there too unless it is still the Ollama default.
pub fn create_embedding_service(config: &MemoryConfig) -> EmbeddingService {
    let timeout = Duration::from_secs(config.request_timeout_secs);
    match &config.openai_api_key {
        Some(key) if !key.is_empty() => {
            debug!("Using OpenAI-compatible API for embeddings");
            let service = EmbeddingService::new_openai(key.clone(), timeout);
            if config.embedding_model == DEFAULT_OLLAMA_EMBEDDING_MODEL {
                service
            } else {
                service.with_model(config.embedding_model.clone())
            }
        }
        _ => {
            debug!("Using Ollama at {} for embeddings", config.ollama_url);
            EmbeddingService::new_ollama(config.ollama_url.clone(), config.embedding_model.clone(), timeout)
        }
    }
}

fn build_client(timeout: Duration) -> Client {
    Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_else(|_| Client::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ollama_is_default() {
        let service = create_embedding_service(&MemoryConfig::default());
        assert_eq!(service.api(), EmbeddingApi::Ollama);
        assert_eq!(service.model(), DEFAULT_OLLAMA_EMBEDDING_MODEL);
        assert_eq!(service.base_url(), "http://localhost:11434");
    }

    #[test]
    fn test_openai_key_selects_openai() {
        let config = MemoryConfig {
            openai_api_key: Some("sk-test".to_string()),
            ..MemoryConfig::default()
        };
        let service = create_embedding_service(&config);
        assert_eq!(service.api(), EmbeddingApi::OpenAi);
        assert_eq!(service.base_url(), "https://api.openai.com/v1");
        assert_eq!(service.model(), DEFAULT_OPENAI_EMBEDDING_MODEL);
    }

    #[test]
    fn test_openai_uses_configured_model() {
        let config = MemoryConfig {
            openai_api_key: Some("sk-test".to_string()),
            embedding_model: "text-embedding-3-large".to_string(),
            ..MemoryConfig::default()
        };
        let service = create_embedding_service(&config);
        assert_eq!(service.api(), EmbeddingApi::OpenAi);
        assert_eq!(service.model(), "text-embedding-3-large");
    }

    #[test]
    fn test_error_body_shapes() {
        let plain: ErrorResponse = serde_json::from_str(r#"{"error": "model not found"}"#).unwrap();
        assert!(matches!(plain.error, ErrorBody::Plain(ref m) if m == "model not found"));

        let detailed: ErrorResponse =
            serde_json::from_str(r#"{"error": {"message": "bad key", "type": "auth"}}"#).unwrap();
        assert!(matches!(detailed.error, ErrorBody::Detailed { ref message } if message == "bad key"));
    }

    #[tokio::test]
    async fn test_unreachable_service_is_unavailable() {
        let service = EmbeddingService::new_ollama(
            "http://127.0.0.1:9".to_string(),
            DEFAULT_OLLAMA_EMBEDDING_MODEL.to_string(),
            Duration::from_secs(2),
        );
        let result = service.embed("hello").await;
        assert!(matches!(result, Err(MemoryError::EmbeddingUnavailable(_))));
    }
}
