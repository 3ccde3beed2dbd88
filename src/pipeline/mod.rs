//! Retrieval pipeline: PDF ingestion and grounded question answering.

mod service;
pub mod types;

pub use service::{RetrievalApi, RetrievalService};
pub use types::{
    GenerateOutcome, GenerateRequest, HealthSnapshot, IngestSummary, InsertRequest, PageRange,
    PipelineError, ServiceSettings,
};
