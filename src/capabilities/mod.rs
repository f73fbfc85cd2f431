//! Interfaces to the external collaborators the pipeline calls, plus their adapters.
//!
//! Stages only see the traits in this module. Concrete adapters (LLM-backed classifier and
//! grader, Qdrant retriever, guard scanners) are built once at startup and injected through
//! [`Capabilities`].

mod classifier;
mod generator;
mod grader;
mod retriever;
pub mod topic_cache;

pub use classifier::LlmTopicClassifier;
pub use generator::LlmGenerator;
pub use grader::LlmRelevanceGrader;
pub use retriever::QdrantRetriever;
pub use topic_cache::{CachedTopicClassifier, Clock, SystemClock};

use crate::embedding::EmbeddingClientError;
use crate::llm::LlmClientError;
use crate::pipeline::{DocumentRecord, TopicVerdict};
use crate::qdrant::QdrantError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by collaborator adapters.
#[derive(Debug, Error)]
pub enum CapabilityError {
    /// The language model backend failed.
    #[error("Language model request failed: {0}")]
    Llm(#[from] LlmClientError),
    /// The embedding backend failed.
    #[error("Embedding request failed: {0}")]
    Embedding(#[from] EmbeddingClientError),
    /// The vector index failed.
    #[error("Vector index request failed: {0}")]
    Index(#[from] QdrantError),
    /// The collaborator could not be reached or is not ready.
    #[error("Collaborator unavailable: {0}")]
    Unavailable(String),
    /// The collaborator answered with something that could not be interpreted.
    #[error("Malformed collaborator response: {0}")]
    InvalidResponse(String),
}

/// Result of running a set of content-safety checks.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScanOutcome {
    /// Text after every check had a chance to sanitize it.
    pub sanitized: String,
    /// Pass/fail verdict per check name.
    pub verdicts: BTreeMap<String, bool>,
    /// Risk score per check name.
    pub scores: BTreeMap<String, f32>,
}

impl ScanOutcome {
    /// True only when every check passed.
    pub fn is_valid(&self) -> bool {
        self.verdicts.values().all(|passed| *passed)
    }

    /// Names of the checks that failed.
    pub fn failed_checks(&self) -> Vec<&str> {
        self.verdicts
            .iter()
            .filter(|(_, passed)| !**passed)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Raw verdict of the topic classifier.
#[derive(Debug, Clone, PartialEq)]
pub struct TopicClassification {
    /// Whether the question is about customer support.
    pub verdict: TopicVerdict,
    /// Classifier confidence in `[0, 1]`.
    pub confidence: f32,
    /// Informational explanation; never shown to users.
    pub reason: String,
}

/// Document returned by the retriever.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedDocument {
    /// Text the document was indexed under.
    pub content: String,
    /// Structured attributes stored with the document.
    pub metadata: DocumentRecord,
}

/// Content-safety scan of incoming questions.
#[async_trait]
pub trait InputScanner: Send + Sync {
    /// Scan `text`, returning sanitized text and per-check verdicts.
    async fn scan_input(&self, text: &str) -> Result<ScanOutcome, CapabilityError>;
}

/// Content-safety scan of generated answers.
#[async_trait]
pub trait OutputScanner: Send + Sync {
    /// Scan `output` produced for `prompt`.
    async fn scan_output(&self, output: &str, prompt: &str)
    -> Result<ScanOutcome, CapabilityError>;
}

/// Customer-support topic classifier.
#[async_trait]
pub trait TopicClassifier: Send + Sync {
    /// Classify `question`.
    async fn classify(&self, question: &str) -> Result<TopicClassification, CapabilityError>;
}

/// Nearest-neighbour document retriever.
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    /// Return at most `top_k` documents for `question`, best match first, without duplicates.
    async fn retrieve(
        &self,
        question: &str,
        top_k: usize,
    ) -> Result<Vec<RetrievedDocument>, CapabilityError>;
}

/// Binary relevance grader.
#[async_trait]
pub trait RelevanceGrader: Send + Sync {
    /// Whether `document` is relevant to `question`.
    async fn grade(
        &self,
        document: &DocumentRecord,
        question: &str,
    ) -> Result<bool, CapabilityError>;
}

/// Text generation service.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Generate text for a fully rendered prompt.
    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError>;
}

/// Collaborators injected into the pipeline at construction time.
#[derive(Clone)]
pub struct Capabilities {
    /// Question safety scanner.
    pub input_scanner: Arc<dyn InputScanner>,
    /// Topic classifier, usually wrapped in a [`CachedTopicClassifier`].
    pub topic_classifier: Arc<dyn TopicClassifier>,
    /// Document retriever.
    pub retriever: Arc<dyn DocumentRetriever>,
    /// Relevance grader.
    pub grader: Arc<dyn RelevanceGrader>,
    /// Answer generator.
    pub generator: Arc<dyn Generator>,
    /// Answer safety scanner.
    pub output_scanner: Arc<dyn OutputScanner>,
}

/// Extract the first JSON object embedded in model output.
///
/// Models frequently wrap structured answers in prose or code fences.
pub(crate) fn extract_json_object(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    (end > start).then(|| &raw[start..=end])
}
