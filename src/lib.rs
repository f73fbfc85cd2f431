#![deny(missing_docs)]

//! Core library for the Support Graph question-answering service.

/// HTTP routing and REST handlers.
pub mod api;
/// Collaborator interfaces used by the pipeline and their adapters.
pub mod capabilities;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// Content-safety scanners for questions and answers.
pub mod guard;
/// Offline index build from a question/answer export.
pub mod ingest;
/// Language model client abstraction and adapters.
pub mod llm;
/// Structured logging and tracing setup.
pub mod logging;
/// Pipeline outcome counters.
pub mod metrics;
/// Stage engine and the support pipeline.
pub mod pipeline;
/// Qdrant vector store integration.
pub mod qdrant;
/// Long-lived answering service shared by request handlers.
pub mod service;
