//! Request, outcome, and error types for the retrieval pipeline.

use crate::{
    embedding::EmbeddingClientError,
    records::{ChatMessage, InvalidReference},
    segmenter::{SegmenterError, pdf::PdfError},
    store::VectorStoreError,
};
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Errors emitted by the retrieval pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Caller supplied input the pipeline cannot act on.
    #[error("{0}")]
    InvalidInput(String),
    /// A raw document carried a malformed reference.
    #[error(transparent)]
    InvalidReference(#[from] InvalidReference),
    /// The uploaded file is not a readable PDF.
    #[error(transparent)]
    Pdf(#[from] PdfError),
    /// Page segmentation failed upstream.
    #[error(transparent)]
    Segmentation(#[from] SegmenterError),
    /// Embedding provider failed to produce a vector.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Vector store interaction failed.
    #[error("Vector store request failed: {0}")]
    Store(#[from] VectorStoreError),
    /// A blocking worker task panicked or was cancelled.
    #[error("Background task failed: {0}")]
    Worker(String),
}

impl PipelineError {
    /// Whether the error stems from the caller's input rather than an upstream service.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput(_) | Self::InvalidReference(_) | Self::Pdf(_)
        )
    }
}

/// Inclusive 1-based page range selected for ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRange {
    /// First page to ingest.
    pub start: u32,
    /// Last page to ingest; clamped to the page count.
    pub end: u32,
}

impl PageRange {
    /// Validate the raw bounds supplied by a caller.
    pub fn new(start: u32, end: u32) -> Result<Self, PipelineError> {
        if start < 1 {
            return Err(PipelineError::InvalidInput(
                "starting_page must be >= 1".into(),
            ));
        }
        if end < 1 {
            return Err(PipelineError::InvalidInput("ending_page must be >= 1".into()));
        }
        if end < start {
            return Err(PipelineError::InvalidInput(
                "ending_page must be >= starting_page".into(),
            ));
        }
        Ok(Self { start, end })
    }

    /// Zero-based indices of the selected pages within a document of `page_count` pages.
    pub(crate) fn indices(&self, page_count: usize) -> std::ops::Range<usize> {
        let start = (self.start as usize - 1).min(page_count);
        let end = (self.end as usize).min(page_count);
        start..end
    }
}

impl Default for PageRange {
    fn default() -> Self {
        Self { start: 1, end: 1 }
    }
}

/// Outcome of one PDF ingestion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    /// Pages in the uploaded document.
    pub page_count: usize,
    /// Pages sent to the segmentation model.
    pub pages_processed: usize,
    /// Records embedded and stored.
    pub records_indexed: usize,
    /// Placeholder or empty records that were not stored.
    pub records_skipped: usize,
    /// Records dropped for a malformed reference.
    pub records_rejected: usize,
    /// Records whose store write failed.
    pub records_failed: usize,
}

/// Raw document accepted by the insert operation.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertRequest {
    /// `chapter:verse` citation.
    pub reference: String,
    /// Fragment body.
    pub text: String,
    /// Precomputed embedding; computed from `text` when absent.
    pub document_embedding: Option<Vec<f32>>,
}

/// Parameters of a grounded answer request.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    /// Conversation so far; the last user message is the query.
    pub messages: Vec<ChatMessage>,
    /// Number of passages to retrieve.
    pub top_k: Option<usize>,
    /// Chat model override.
    pub model: Option<String>,
    /// Completion budget override.
    pub max_tokens: Option<u32>,
}

/// Grounded answer together with the context it was built from.
#[derive(Debug, Clone, PartialEq)]
pub enum GenerateOutcome {
    /// The model answered.
    Answered {
        /// Completion text.
        response: String,
        /// Formatted context injected into the prompt.
        context: String,
    },
    /// The model call failed after retrieval succeeded.
    Failed {
        /// Description reported by the response generator.
        error: String,
        /// Formatted context injected into the prompt.
        context: String,
    },
}

/// Reachability snapshot for the vector store.
#[derive(Debug, Clone, Serialize)]
pub struct HealthSnapshot {
    /// Whether the store answered the probe.
    pub store_reachable: bool,
    /// Diagnostic captured when the probe failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Tunables the service reads once at construction.
#[derive(Debug, Clone)]
pub struct ServiceSettings {
    /// Result count used when the caller omits one.
    pub default_top_k: usize,
    /// Upper bound for caller supplied result counts.
    pub max_top_k: usize,
    /// Default chat model.
    pub chat_model: String,
    /// Default completion budget.
    pub max_tokens: u32,
    /// Pause after each embedded record during ingestion.
    pub record_delay: Duration,
    /// Pause after each segmented page during ingestion.
    pub page_delay: Duration,
}

impl ServiceSettings {
    /// Read the settings from the loaded configuration.
    pub fn from_config(config: &crate::config::Config) -> Self {
        Self {
            default_top_k: config.search_default_limit,
            max_top_k: config.search_max_limit,
            chat_model: config.chat_model.clone(),
            max_tokens: config.chat_max_tokens,
            record_delay: Duration::from_millis(config.ingest_record_delay_ms),
            page_delay: Duration::from_millis(config.ingest_page_delay_ms),
        }
    }
}
