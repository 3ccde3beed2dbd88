//! Retrieval service coordinating segmentation, embedding, storage, and generation.

use crate::{
    config::get_config,
    context::{build_system_prompt, format_context},
    embedding::{EmbeddingClient, get_embedding_client},
    generation::{GenerationOutcome, ResponseGenerator, get_generator},
    metrics::{MetricsSnapshot, PipelineMetrics},
    pipeline::types::{
        GenerateOutcome, GenerateRequest, HealthSnapshot, IngestSummary, InsertRequest, PageRange,
        PipelineError, ServiceSettings,
    },
    records::{CitationRecord, ChatMessage, Role, SearchResult},
    segmenter::{DocumentSegmenter, get_segmenter, pdf::split_pages},
    store::{VectorStore, get_vector_store},
};
use anyhow::Context;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;

/// Runs both pipelines over shared long-lived clients.
///
/// Ingestion: segmenter, then embedding and store insert for each record.
/// Query: embedding, store search, context formatting, response generation.
/// Construct it once at startup and share it through an `Arc`; the clients are stateless
/// request wrappers and safe to use from concurrent requests.
pub struct RetrievalService {
    embedder: Arc<dyn EmbeddingClient>,
    store: Arc<dyn VectorStore>,
    segmenter: Arc<dyn DocumentSegmenter>,
    generator: Arc<dyn ResponseGenerator>,
    settings: ServiceSettings,
    metrics: PipelineMetrics,
}

/// Abstraction over the pipeline used by the HTTP surface.
#[async_trait]
pub trait RetrievalApi: Send + Sync {
    /// Replace the corpus with the records segmented from `pdf`'s pages in `range`.
    async fn ingest_pdf(
        &self,
        pdf: Vec<u8>,
        range: PageRange,
    ) -> Result<IngestSummary, PipelineError>;

    /// Store one raw document; `Ok(false)` when the store rejected the write.
    async fn insert(&self, request: InsertRequest) -> Result<bool, PipelineError>;

    /// Embed `query` and return the `top_k` most similar records.
    async fn find(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchResult>, PipelineError>;

    /// Answer the last user message grounded in retrieved records.
    async fn generate_response(
        &self,
        request: GenerateRequest,
    ) -> Result<GenerateOutcome, PipelineError>;

    /// Probe the vector store.
    async fn health(&self) -> HealthSnapshot;

    /// Retrieve the current metrics snapshot.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

impl RetrievalService {
    /// Build the service from the globally loaded configuration.
    pub async fn new() -> anyhow::Result<Self> {
        let config = get_config();
        let embedder = get_embedding_client().context("Failed to initialize embedding client")?;
        let store = get_vector_store()
            .await
            .context("Failed to initialize vector store")?;
        let segmenter = get_segmenter().context("Failed to initialize page segmenter")?;
        let generator = get_generator().context("Failed to initialize chat client")?;
        tracing::info!(
            vector_store = ?config.vector_store,
            chat_model = %config.chat_model,
            segmenter_model = %config.segmenter_model,
            "Retrieval service ready"
        );

        Ok(Self::from_parts(
            Arc::from(embedder),
            Arc::from(store),
            Arc::from(segmenter),
            Arc::from(generator),
            ServiceSettings::from_config(config),
        ))
    }

    /// Assemble a service from explicit components.
    pub fn from_parts(
        embedder: Arc<dyn EmbeddingClient>,
        store: Arc<dyn VectorStore>,
        segmenter: Arc<dyn DocumentSegmenter>,
        generator: Arc<dyn ResponseGenerator>,
        settings: ServiceSettings,
    ) -> Self {
        Self {
            embedder,
            store,
            segmenter,
            generator,
            settings,
            metrics: PipelineMetrics::new(),
        }
    }

    /// Split, segment, embed, and store the selected pages of a PDF.
    ///
    /// The store is cleared once the PDF and the range are known to be valid and before the
    /// first page is segmented. Searches running concurrently see a partial corpus until the
    /// ingestion completes.
    pub async fn ingest_pdf(
        &self,
        pdf: Vec<u8>,
        range: PageRange,
    ) -> Result<IngestSummary, PipelineError> {
        let split = tokio::task::spawn_blocking(move || split_pages(&pdf, range))
            .await
            .map_err(|error| PipelineError::Worker(error.to_string()))??;
        let page_count = split.page_count;
        if range.start as usize > page_count {
            return Err(PipelineError::InvalidInput(format!(
                "starting_page {} exceeds the page count ({page_count})",
                range.start
            )));
        }

        self.store.clear().await?;
        tracing::info!(
            page_count,
            start = range.start,
            end = range.end,
            "Ingesting PDF"
        );

        let mut summary = IngestSummary {
            page_count,
            ..IngestSummary::default()
        };
        let selected = split.pages.len();

        for (position, page) in split.pages.into_iter().enumerate() {
            let records = self.segmenter.segment_page(&page.bytes).await?;
            summary.pages_processed += 1;
            tracing::debug!(page = page.number, records = records.len(), "Page segmented");

            for record in records {
                self.ingest_record(page.number, record, &mut summary).await?;
            }

            if position + 1 < selected {
                pause(self.settings.page_delay).await;
            }
        }

        self.metrics.record_ingestion(
            summary.pages_processed as u64,
            summary.records_indexed as u64,
            (summary.records_skipped + summary.records_rejected + summary.records_failed) as u64,
        );
        tracing::info!(
            pages = summary.pages_processed,
            indexed = summary.records_indexed,
            skipped = summary.records_skipped,
            rejected = summary.records_rejected,
            failed = summary.records_failed,
            "PDF ingested"
        );
        Ok(summary)
    }

    async fn ingest_record(
        &self,
        page: usize,
        record: CitationRecord,
        summary: &mut IngestSummary,
    ) -> Result<(), PipelineError> {
        if record.is_placeholder() || record.text.trim().is_empty() {
            tracing::warn!(page, reference = %record.reference, "Skipping empty record");
            summary.records_skipped += 1;
            return Ok(());
        }
        if let Err(error) = record.parsed_reference() {
            tracing::warn!(page, error = %error, "Rejecting record with malformed reference");
            summary.records_rejected += 1;
            return Ok(());
        }

        let embedding = self.embedder.embed(&record.text).await?;
        match self.store.insert(&record, embedding).await {
            Ok(()) => summary.records_indexed += 1,
            Err(error) => {
                tracing::error!(page, reference = %record.reference, error = %error, "Failed to store record");
                summary.records_failed += 1;
            }
        }
        pause(self.settings.record_delay).await;
        Ok(())
    }

    /// Validate and store one raw document.
    pub async fn insert(&self, request: InsertRequest) -> Result<bool, PipelineError> {
        let InsertRequest {
            reference,
            text,
            document_embedding,
        } = request;
        let record = CitationRecord::new(reference, text)?;
        if record.text.trim().is_empty() {
            return Err(PipelineError::InvalidInput("text must not be empty".into()));
        }

        let embedding = match document_embedding {
            Some(vector) => {
                let expected = self.embedder.dimension();
                if vector.len() != expected {
                    return Err(PipelineError::InvalidInput(format!(
                        "document_embedding has {} dimensions, expected {expected}",
                        vector.len()
                    )));
                }
                vector
            }
            None => self.embedder.embed(&record.text).await?,
        };

        match self.store.insert(&record, embedding).await {
            Ok(()) => {
                self.metrics.record_insert();
                tracing::info!(reference = %record.reference, "Document inserted");
                Ok(true)
            }
            Err(error) => {
                tracing::error!(reference = %record.reference, error = %error, "Document insert failed");
                Ok(false)
            }
        }
    }

    /// Embed `query` and search the store.
    pub async fn find(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchResult>, PipelineError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(PipelineError::InvalidInput(
                "Query parameter is required".into(),
            ));
        }

        let top_k = self.resolve_top_k(top_k);
        let vector = self.embedder.embed(query).await?;
        let results = self.store.search(vector, top_k).await?;
        self.metrics.record_query();
        tracing::debug!(top_k, hits = results.len(), "Search completed");
        Ok(results)
    }

    /// Retrieve context for the last user message and ask the chat model.
    pub async fn generate_response(
        &self,
        request: GenerateRequest,
    ) -> Result<GenerateOutcome, PipelineError> {
        let GenerateRequest {
            mut messages,
            top_k,
            model,
            max_tokens,
        } = request;

        let query = messages
            .iter()
            .rev()
            .find(|message| message.role == Role::User)
            .map(|message| message.content.clone())
            .filter(|content| !content.trim().is_empty())
            .ok_or_else(|| {
                PipelineError::InvalidInput("No user message found in the input".into())
            })?;
        let max_tokens = max_tokens.unwrap_or(self.settings.max_tokens);
        if max_tokens == 0 {
            return Err(PipelineError::InvalidInput(
                "max_tokens must be greater than zero".into(),
            ));
        }
        let model = model
            .filter(|value| !value.trim().is_empty())
            .unwrap_or_else(|| self.settings.chat_model.clone());

        let results = self.find(&query, top_k).await?;
        let context = format_context(&results);
        messages.push(ChatMessage::system(build_system_prompt(&context)));

        match self.generator.generate(&messages, &model, max_tokens).await {
            GenerationOutcome::Message(message) => Ok(GenerateOutcome::Answered {
                response: message.content,
                context,
            }),
            GenerationOutcome::Failed { error } => Ok(GenerateOutcome::Failed { error, context }),
        }
    }

    /// Probe the vector store.
    pub async fn health(&self) -> HealthSnapshot {
        match self.store.ping().await {
            Ok(()) => HealthSnapshot {
                store_reachable: true,
                error: None,
            },
            Err(error) => {
                tracing::warn!(error = %error, "Vector store health probe failed");
                HealthSnapshot {
                    store_reachable: false,
                    error: Some(error.to_string()),
                }
            }
        }
    }

    /// Return the current metrics snapshot.
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    fn resolve_top_k(&self, requested: Option<usize>) -> usize {
        requested
            .unwrap_or(self.settings.default_top_k)
            .clamp(1, self.settings.max_top_k)
    }
}

async fn pause(delay: Duration) {
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl RetrievalApi for RetrievalService {
    async fn ingest_pdf(
        &self,
        pdf: Vec<u8>,
        range: PageRange,
    ) -> Result<IngestSummary, PipelineError> {
        RetrievalService::ingest_pdf(self, pdf, range).await
    }

    async fn insert(&self, request: InsertRequest) -> Result<bool, PipelineError> {
        RetrievalService::insert(self, request).await
    }

    async fn find(
        &self,
        query: &str,
        top_k: Option<usize>,
    ) -> Result<Vec<SearchResult>, PipelineError> {
        RetrievalService::find(self, query, top_k).await
    }

    async fn generate_response(
        &self,
        request: GenerateRequest,
    ) -> Result<GenerateOutcome, PipelineError> {
        RetrievalService::generate_response(self, request).await
    }

    async fn health(&self) -> HealthSnapshot {
        RetrievalService::health(self).await
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        RetrievalService::metrics_snapshot(self)
    }
}
