use serde::Deserialize;
use std::env;
use std::path::Path;
use std::sync::OnceLock;
use thiserror::Error;

/// Errors encountered while loading configuration from environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Required environment variable was not provided.
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),
    /// Environment variable contained a value that could not be parsed.
    #[error("Invalid value for environment variable: {0}")]
    InvalidValue(String),
    /// An explicitly requested dotenv file is missing or malformed.
    #[error("Failed to load env file {path}: {message}")]
    EnvFile {
        /// Path passed on the command line.
        path: String,
        /// Loader error message.
        message: String,
    },
}

/// Runtime configuration for the citation RAG server.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Backend persisting the citation records and their vectors.
    pub vector_store: VectorStoreProvider,
    /// Base URL of the Qdrant instance that stores embeddings.
    pub qdrant_url: String,
    /// Name of the Qdrant collection holding the citation records.
    pub qdrant_collection_name: String,
    /// Optional API key required to access Qdrant.
    pub qdrant_api_key: Option<String>,
    /// Name of the vector field the similarity index is built on.
    pub vector_field_name: String,
    /// Embedding provider used to generate vector representations.
    pub embedding_provider: EmbeddingProvider,
    /// Embedding model identifier passed to the provider.
    pub embedding_model: String,
    /// Dimensionality of the produced vectors.
    pub embedding_dimension: usize,
    /// Base URL of the local Ollama runtime.
    pub ollama_url: Option<String>,
    /// Base URL of an OpenAI-compatible embeddings API.
    pub openai_base_url: Option<String>,
    /// API key for the OpenAI-compatible embeddings API.
    pub openai_api_key: Option<String>,
    /// API key shared by the segmentation and chat models.
    pub gemini_api_key: Option<String>,
    /// Base URL of the native Gemini REST API used for page segmentation.
    pub gemini_base_url: String,
    /// Base URL of the OpenAI-compatible chat completion endpoint.
    pub gemini_openai_base_url: String,
    /// Model used to turn PDF pages into citation records.
    pub segmenter_model: String,
    /// Default chat model used for grounded answers.
    pub chat_model: String,
    /// Default completion budget for grounded answers.
    pub chat_max_tokens: u32,
    /// Number of results returned when a caller omits `top_searches`.
    pub search_default_limit: usize,
    /// Upper bound applied to caller supplied `top_searches`.
    pub search_max_limit: usize,
    /// Pause between two embedded records during PDF ingestion, in milliseconds.
    pub ingest_record_delay_ms: u64,
    /// Pause between two segmented pages during PDF ingestion, in milliseconds.
    pub ingest_page_delay_ms: u64,
    /// Optional override for the HTTP server port.
    pub server_port: Option<u16>,
}

/// Supported embedding backends for the retrieval pipeline.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    /// Local Ollama runtime.
    Ollama,
    /// Hosted OpenAI-compatible embeddings API.
    OpenAI,
    /// Deterministic byte-hash encoder that needs no network access.
    Hash,
}

/// Supported storage backends for citation records.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VectorStoreProvider {
    /// Qdrant over its REST API.
    Qdrant,
    /// Process-local store, lost on restart.
    Memory,
}

const DEFAULT_GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_GEMINI_OPENAI_BASE_URL: &str =
    "https://generativelanguage.googleapis.com/v1beta/openai";
const DEFAULT_GEMINI_MODEL: &str = "gemini-2.0-flash";

impl Config {
    /// Load configuration from environment variables, performing validation along the way.
    pub fn from_env() -> Result<Self, ConfigError> {
        let search_default_limit = parse_optional("SEARCH_DEFAULT_LIMIT")?.unwrap_or(5);
        let search_max_limit = parse_optional("SEARCH_MAX_LIMIT")?.unwrap_or(50);
        if search_default_limit == 0 || search_max_limit < search_default_limit {
            return Err(ConfigError::InvalidValue("SEARCH_DEFAULT_LIMIT".into()));
        }

        Ok(Self {
            vector_store: load_env_optional("VECTOR_STORE")
                .map(|value| {
                    value
                        .parse()
                        .map_err(|()| ConfigError::InvalidValue("VECTOR_STORE".into()))
                })
                .transpose()?
                .unwrap_or(VectorStoreProvider::Qdrant),
            qdrant_url: load_env_optional("QDRANT_URL")
                .unwrap_or_else(|| "http://127.0.0.1:6333".to_string()),
            qdrant_collection_name: load_env("QDRANT_COLLECTION_NAME")?,
            qdrant_api_key: load_env_optional("QDRANT_API_KEY"),
            vector_field_name: load_env_optional("VECTOR_FIELD_NAME")
                .unwrap_or_else(|| "document_embedding".to_string()),
            embedding_provider: load_env("EMBEDDING_PROVIDER")?.parse().map_err(|()| {
                ConfigError::InvalidValue("EMBEDDING_PROVIDER".to_string())
            })?,
            embedding_model: load_env("EMBEDDING_MODEL")?,
            embedding_dimension: load_env("EMBEDDING_DIMENSION")?
                .parse()
                .ok()
                .filter(|dimension: &usize| *dimension > 0)
                .ok_or_else(|| ConfigError::InvalidValue("EMBEDDING_DIMENSION".to_string()))?,
            ollama_url: load_env_optional("OLLAMA_URL"),
            openai_base_url: load_env_optional("OPENAI_BASE_URL"),
            openai_api_key: load_env_optional("OPENAI_API_KEY"),
            gemini_api_key: load_env_optional("GEMINI_API_KEY"),
            gemini_base_url: load_env_optional("GEMINI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
            gemini_openai_base_url: load_env_optional("GEMINI_OPENAI_BASE_URL")
                .unwrap_or_else(|| DEFAULT_GEMINI_OPENAI_BASE_URL.to_string()),
            segmenter_model: load_env_optional("SEGMENTER_MODEL")
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            chat_model: load_env_optional("CHAT_MODEL")
                .unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            chat_max_tokens: parse_optional("CHAT_MAX_TOKENS")?.unwrap_or(300),
            search_default_limit,
            search_max_limit,
            ingest_record_delay_ms: parse_optional("INGEST_RECORD_DELAY_MS")?.unwrap_or(500),
            ingest_page_delay_ms: parse_optional("INGEST_PAGE_DELAY_MS")?.unwrap_or(1000),
            server_port: parse_optional("SERVER_PORT")?,
        })
    }
}

fn load_env(key: &str) -> Result<String, ConfigError> {
    env::var(key).map_err(|_| ConfigError::MissingVariable(key.to_string()))
}

fn load_env_optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_optional<T: std::str::FromStr>(key: &str) -> Result<Option<T>, ConfigError> {
    load_env_optional(key)
        .map(|value| {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidValue(key.to_string()))
        })
        .transpose()
}

impl std::str::FromStr for EmbeddingProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ollama" => Ok(Self::Ollama),
            "openai" => Ok(Self::OpenAI),
            "hash" => Ok(Self::Hash),
            _ => Err(()),
        }
    }
}

impl std::str::FromStr for VectorStoreProvider {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "qdrant" => Ok(Self::Qdrant),
            "memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

/// Global configuration cache populated during process start.
pub static CONFIG: OnceLock<Config> = OnceLock::new();

/// Retrieve the loaded configuration, panicking if initialization has not occurred.
pub fn get_config() -> &'static Config {
    CONFIG.get().expect("Config not initialized")
}

/// Load configuration from the environment and install it in the global cache.
///
/// When `env_file` is given it is loaded instead of the `.env` discovered from the working
/// directory.
pub fn init_config(env_file: Option<&Path>) -> Result<&'static Config, ConfigError> {
    load_env_file(env_file)?;
    let config = Config::from_env()?;
    tracing::debug!(
        vector_store = ?config.vector_store,
        qdrant_url = %config.qdrant_url,
        collection = %config.qdrant_collection_name,
        embedding_provider = ?config.embedding_provider,
        embedding_dimension = config.embedding_dimension,
        server_port = ?config.server_port,
        "Loaded configuration"
    );
    Ok(CONFIG.get_or_init(|| config))
}

// The implicit `.env` is optional; an explicit path must load.
fn load_env_file(env_file: Option<&Path>) -> Result<(), ConfigError> {
    match env_file {
        Some(path) => dotenvy::from_path(path)
            .map(|_| ())
            .map_err(|error| ConfigError::EnvFile {
                path: path.display().to_string(),
                message: error.to_string(),
            }),
        None => {
            dotenvy::dotenv().ok();
            Ok(())
        }
    }
}
