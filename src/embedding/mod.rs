//! Embedding clients. Every call embeds exactly one text with one request; nothing is batched
//! or cached.

use crate::config::{Config, EmbeddingProvider, get_config};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

const DEFAULT_OLLAMA_URL: &str = "http://127.0.0.1:11434";
const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider could not be reached.
    #[error("Embedding provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider answered with a body we could not interpret.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
    /// Returned embedding dimension does not match configuration.
    #[error("Embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension configured on the server.
        expected: usize,
        /// Dimension produced by the provider.
        actual: usize,
    },
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce the embedding vector for one text.
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError>;

    /// Length of the vectors this client produces.
    fn dimension(&self) -> usize;
}

/// Deterministic offline encoder folding the bytes of the text into a unit vector.
///
/// Identical texts always map to identical vectors, which makes it usable for smoke tests and
/// air-gapped demos. It carries no semantic signal.
pub struct HashEmbeddingClient {
    dimension: usize,
}

impl HashEmbeddingClient {
    /// Construct an encoder producing vectors of `dimension` components.
    pub const fn new(dimension: usize) -> Self {
        Self { dimension }
    }

    fn encode(text: &str, dimension: usize) -> Vec<f32> {
        let mut embedding = vec![0.0_f32; dimension];

        for (idx, byte) in text.bytes().enumerate() {
            embedding[idx % dimension] += f32::from(byte) / 255.0;
        }

        let norm = embedding
            .iter()
            .map(|value| value * value)
            .sum::<f32>()
            .sqrt();

        if norm > 0.0 {
            for value in &mut embedding {
                *value /= norm;
            }
        }

        embedding
    }
}

#[async_trait]
impl EmbeddingClient for HashEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        if self.dimension == 0 {
            return Err(EmbeddingClientError::GenerationFailed(
                "embedding dimension must be greater than zero".to_string(),
            ));
        }
        if text.is_empty() {
            return Err(EmbeddingClientError::GenerationFailed(
                "no text provided".to_string(),
            ));
        }
        Ok(Self::encode(text, self.dimension))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embeddings from a local Ollama runtime (`POST /api/embed`).
pub struct OllamaEmbeddingClient {
    http: Client,
    base_url: String,
    model: String,
    dimension: usize,
}

impl OllamaEmbeddingClient {
    /// Construct a client for `model` served at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Result<Self, EmbeddingClientError> {
        Ok(Self {
            http: build_http_client("citerag/embed")?,
            base_url: base_url.into(),
            model: model.into(),
            dimension,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/api/embed", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OllamaEmbedResponse {
    #[serde(default)]
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl EmbeddingClient for OllamaEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        tracing::debug!(model = %self.model, chars = text.len(), "Requesting Ollama embedding");
        let response = self
            .http
            .post(self.endpoint())
            .json(&json!({ "model": self.model, "input": text }))
            .send()
            .await
            .map_err(|error| {
                EmbeddingClientError::ProviderUnavailable(format!(
                    "failed to reach Ollama at {}: {error}",
                    self.base_url
                ))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "Ollama returned {status}: {body}"
            )));
        }

        let body: OllamaEmbedResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!(
                "failed to decode Ollama response: {error}"
            ))
        })?;
        let vector = body.embeddings.into_iter().next().ok_or_else(|| {
            EmbeddingClientError::InvalidResponse("Ollama returned no embeddings".into())
        })?;
        check_dimension(vector, self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Embeddings from an OpenAI-compatible API (`POST {base}/embeddings`).
pub struct OpenAiEmbeddingClient {
    http: Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    dimension: usize,
}

impl OpenAiEmbeddingClient {
    /// Construct a client for `model` served at `base_url`.
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        dimension: usize,
    ) -> Result<Self, EmbeddingClientError> {
        Ok(Self {
            http: build_http_client("citerag/embed")?,
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            dimension,
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/embeddings", self.base_url.trim_end_matches('/'))
    }
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedResponse {
    #[serde(default)]
    data: Vec<OpenAiEmbedding>,
}

#[derive(Debug, Deserialize)]
struct OpenAiEmbedding {
    embedding: Vec<f32>,
}

#[async_trait]
impl EmbeddingClient for OpenAiEmbeddingClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingClientError> {
        tracing::debug!(model = %self.model, chars = text.len(), "Requesting OpenAI embedding");
        let mut request = self
            .http
            .post(self.endpoint())
            .json(&json!({ "model": self.model, "input": text }));
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key);
        }

        let response = request.send().await.map_err(|error| {
            EmbeddingClientError::ProviderUnavailable(format!(
                "failed to reach {}: {error}",
                self.base_url
            ))
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(EmbeddingClientError::GenerationFailed(format!(
                "embeddings API returned {status}: {body}"
            )));
        }

        let body: OpenAiEmbedResponse = response.json().await.map_err(|error| {
            EmbeddingClientError::InvalidResponse(format!(
                "failed to decode embeddings response: {error}"
            ))
        })?;
        let vector = body
            .data
            .into_iter()
            .next()
            .map(|item| item.embedding)
            .ok_or_else(|| {
                EmbeddingClientError::InvalidResponse("embeddings API returned no data".into())
            })?;
        check_dimension(vector, self.dimension)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

fn check_dimension(vector: Vec<f32>, expected: usize) -> Result<Vec<f32>, EmbeddingClientError> {
    if vector.len() == expected {
        Ok(vector)
    } else {
        Err(EmbeddingClientError::DimensionMismatch {
            expected,
            actual: vector.len(),
        })
    }
}

fn build_http_client(user_agent: &str) -> Result<Client, EmbeddingClientError> {
    Client::builder()
        .user_agent(user_agent)
        .build()
        .map_err(|error| EmbeddingClientError::ProviderUnavailable(error.to_string()))
}

/// Build the embedding client selected by `config`.
pub fn embedding_client_from_config(
    config: &Config,
) -> Result<Box<dyn EmbeddingClient>, EmbeddingClientError> {
    let dimension = config.embedding_dimension;
    let client: Box<dyn EmbeddingClient> = match config.embedding_provider {
        EmbeddingProvider::Ollama => Box::new(OllamaEmbeddingClient::new(
            config
                .ollama_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string()),
            config.embedding_model.clone(),
            dimension,
        )?),
        EmbeddingProvider::OpenAI => Box::new(OpenAiEmbeddingClient::new(
            config
                .openai_base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            config.openai_api_key.clone(),
            config.embedding_model.clone(),
            dimension,
        )?),
        EmbeddingProvider::Hash => Box::new(HashEmbeddingClient::new(dimension)),
    };
    tracing::info!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension,
        "Embedding client initialized"
    );
    Ok(client)
}

/// Build an embedding client for the globally loaded configuration.
pub fn get_embedding_client() -> Result<Box<dyn EmbeddingClient>, EmbeddingClientError> {
    embedding_client_from_config(get_config())
}
