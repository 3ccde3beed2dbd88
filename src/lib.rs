#![deny(missing_docs)]

//! Core library for the citation retrieval-augmented generation server.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Prompt context assembly from search results.
pub mod context;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Chat completion client used to answer questions.
pub mod generation;
/// Structured logging and tracing setup.
pub mod logging;
/// Ingestion and query metrics helpers.
pub mod metrics;
/// Ingestion and question answering pipelines.
pub mod pipeline;
/// Citation records and chat message types.
pub mod records;
/// PDF page splitting and model-driven citation segmentation.
pub mod segmenter;
/// Vector store abstraction with Qdrant and in-memory backends.
pub mod store;
