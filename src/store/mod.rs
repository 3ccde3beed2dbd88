//! Vector store abstraction over the citation corpus.
//!
//! Stores own the persisted [`StoredDocument`](crate::records::StoredDocument)s. Documents are
//! written once and never updated; the only removal is [`VectorStore::clear`] before a source
//! document is re-ingested.

mod memory;
mod qdrant;

pub use memory::InMemoryStore;
pub use qdrant::QdrantStore;

use crate::config::{Config, VectorStoreProvider, get_config};
use crate::records::{CitationRecord, SearchResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

/// Errors returned by vector store backends.
#[derive(Debug, Error)]
pub enum VectorStoreError {
    /// Base URL failed to parse or normalize.
    #[error("Invalid vector store URL: {0}")]
    InvalidUrl(String),
    /// HTTP layer failed before receiving a response.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    /// The backend responded with an unexpected status code.
    #[error("Unexpected vector store response ({status}): {body}")]
    UnexpectedStatus {
        /// HTTP status returned by the backend.
        status: StatusCode,
        /// Body payload associated with the failing response.
        body: String,
    },
    /// Vector length does not match the store's configured dimension.
    #[error("Vector dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Dimension the store was provisioned with.
        expected: usize,
        /// Dimension of the rejected vector.
        actual: usize,
    },
}

/// Persistence and similarity search for citation records.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Write one record with its embedding, stamping it with the current time.
    async fn insert(
        &self,
        record: &CitationRecord,
        embedding: Vec<f32>,
    ) -> Result<(), VectorStoreError>;

    /// Exact nearest-neighbor search returning at most `top_k` results, best first.
    async fn search(
        &self,
        vector: Vec<f32>,
        top_k: usize,
    ) -> Result<Vec<SearchResult>, VectorStoreError>;

    /// Delete every stored document.
    async fn clear(&self) -> Result<(), VectorStoreError>;

    /// Check that the backend is reachable and the collection is present.
    async fn ping(&self) -> Result<(), VectorStoreError>;
}

/// Build the vector store selected by `config`, creating the Qdrant collection when missing.
pub async fn vector_store_from_config(
    config: &Config,
) -> Result<Box<dyn VectorStore>, VectorStoreError> {
    match config.vector_store {
        VectorStoreProvider::Qdrant => {
            let store = QdrantStore::new(
                &config.qdrant_url,
                config.qdrant_api_key.clone(),
                &config.qdrant_collection_name,
                &config.vector_field_name,
                config.embedding_dimension,
            )?;
            store.ensure_collection().await?;
            Ok(Box::new(store))
        }
        VectorStoreProvider::Memory => {
            tracing::warn!("Using the in-memory vector store; the corpus is lost on restart");
            Ok(Box::new(InMemoryStore::new(config.embedding_dimension)))
        }
    }
}

/// Build a vector store for the globally loaded configuration.
pub async fn get_vector_store() -> Result<Box<dyn VectorStore>, VectorStoreError> {
    vector_store_from_config(get_config()).await
}
