//! Answering service shared by the HTTP surface.

use crate::capabilities::{
    CachedTopicClassifier, Capabilities, CapabilityError, LlmGenerator, LlmRelevanceGrader,
    LlmTopicClassifier, QdrantRetriever,
};
use crate::config::Config;
use crate::embedding::{EmbeddingClientError, build_embedding_client};
use crate::guard::{InputGuard, OutputGuard};
use crate::llm::{LlmClientError, build_llm_client};
use crate::metrics::{MetricsSnapshot, PipelineMetrics};
use crate::pipeline::{
    AgentState, ConfigurationError, Pipeline, PipelineError, PipelineSettings, RunContext,
    build_support_pipeline,
};
use crate::qdrant::{QdrantError, QdrantService};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::Instrument;

/// Failures while assembling the service at startup.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The language model client could not be built.
    #[error(transparent)]
    Llm(#[from] LlmClientError),
    /// The embedding client could not be built.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Qdrant could not be reached or the collection is missing.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
    /// A collaborator adapter could not be initialized.
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    /// The stage registry is inconsistent.
    #[error(transparent)]
    Pipeline(#[from] ConfigurationError),
}

/// Abstraction over the answering pipeline used by the HTTP surface.
#[async_trait]
pub trait AnswerApi: Send + Sync {
    /// Run the pipeline for one question.
    async fn answer(&self, question: String) -> Result<AgentState, PipelineError>;

    /// Retrieve the current metrics snapshot for diagnostics.
    fn metrics_snapshot(&self) -> MetricsSnapshot;
}

/// Owns the pipeline and its outcome counters.
///
/// Construct it once near process start and share it through an `Arc`; every request runs on its
/// own [`AgentState`] and only the collaborator handles are shared.
pub struct SupportService {
    pipeline: Pipeline,
    metrics: PipelineMetrics,
    request_timeout: Option<Duration>,
}

impl SupportService {
    /// Wrap an already built pipeline.
    pub fn new(pipeline: Pipeline, request_timeout: Option<Duration>) -> Self {
        Self {
            pipeline,
            metrics: PipelineMetrics::new(),
            request_timeout,
        }
    }

    /// Build every collaborator from `config`, verify the index, and wire the pipeline.
    pub async fn from_config(config: &Config) -> Result<Self, StartupError> {
        tracing::info!("Initializing language model client");
        let llm = build_llm_client(config)?;
        tracing::info!("Initializing embedding client");
        let embedding = build_embedding_client(config)?;

        let qdrant = QdrantService::new(config)?;
        let retriever =
            QdrantRetriever::new(embedding.clone(), qdrant, &config.qdrant_collection_name);
        retriever.ensure_ready().await?;
        tracing::info!(collection = %config.qdrant_collection_name, "Support index ready");

        let capabilities = Capabilities {
            input_scanner: Arc::new(InputGuard::standard(llm.clone(), config.input_token_limit)?),
            topic_classifier: Arc::new(CachedTopicClassifier::new(
                LlmTopicClassifier::new(llm.clone()),
                config.topic_cache_capacity,
            )),
            retriever: Arc::new(retriever),
            grader: Arc::new(LlmRelevanceGrader::new(llm.clone())),
            generator: Arc::new(LlmGenerator::new(llm.clone())),
            output_scanner: Arc::new(OutputGuard::standard(
                llm,
                embedding,
                config.output_relevance_threshold,
            )),
        };
        let pipeline = build_support_pipeline(capabilities, PipelineSettings::from(config))?;
        tracing::info!(entry = %pipeline.entry(), "Pipeline assembled");

        Ok(Self::new(pipeline, Some(config.request_timeout())))
    }
}

#[async_trait]
impl AnswerApi for SupportService {
    async fn answer(&self, question: String) -> Result<AgentState, PipelineError> {
        let ctx = match self.request_timeout {
            Some(timeout) => RunContext::with_timeout(timeout),
            None => RunContext::unbounded(),
        };
        let span = tracing::info_span!("answer", question_len = question.len());
        let result = self
            .pipeline
            .run(AgentState::new(question), &ctx)
            .instrument(span)
            .await;

        match &result {
            Ok(state) => {
                self.metrics.record_completed(state);
                tracing::info!(outcome = ?state.outcome(), "Question answered");
            }
            Err(_) => self.metrics.record_failed(),
        }
        result
    }

    fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Next, PipelineBuilder, Stage, StageError, StageName, Transition};
    use crate::pipeline::{QuestionStatus, TopicVerdict};

    struct OffTopic;

    #[async_trait]
    impl Stage for OffTopic {
        fn name(&self) -> StageName {
            StageName::ScanQuestion
        }

        async fn run(&self, state: &mut AgentState, _ctx: &RunContext) -> Result<(), StageError> {
            state.question_status = Some(QuestionStatus::Valid);
            state.on_topic = Some(TopicVerdict::No);
            state.llm_output = Some("refused".into());
            Ok(())
        }
    }

    struct Stuck;

    #[async_trait]
    impl Stage for Stuck {
        fn name(&self) -> StageName {
            StageName::ScanQuestion
        }

        async fn run(&self, _state: &mut AgentState, ctx: &RunContext) -> Result<(), StageError> {
            ctx.guard(std::future::pending::<()>()).await
        }
    }

    #[tokio::test]
    async fn completed_runs_are_counted_by_outcome() {
        let pipeline = PipelineBuilder::new()
            .stage(OffTopic, Transition::Always(Next::End))
            .entry(StageName::ScanQuestion)
            .build()
            .expect("pipeline");
        let service = SupportService::new(pipeline, None);

        let state = service
            .answer("What is the capital of France?".into())
            .await
            .expect("answer");

        assert_eq!(state.llm_output.as_deref(), Some("refused"));
        let snapshot = service.metrics_snapshot();
        assert_eq!(snapshot.runs, 1);
        assert_eq!(snapshot.rejected_off_topic, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn request_timeout_aborts_and_counts_failure() {
        let pipeline = PipelineBuilder::new()
            .stage(Stuck, Transition::end())
            .entry(StageName::ScanQuestion)
            .build()
            .expect("pipeline");
        let service = SupportService::new(pipeline, Some(Duration::from_secs(5)));

        let error = service
            .answer("Where is my order?".into())
            .await
            .expect_err("timeout");

        assert!(matches!(error, PipelineError::TimedOut { .. }));
        assert_eq!(service.metrics_snapshot().failed, 1);
    }
}
