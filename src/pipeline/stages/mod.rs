//! The support pipeline: six stages, their transition rules, and the canonical wiring.

mod check_answer;
mod generate;
mod grade;
mod retrieve;
mod scan_question;
mod topic;

pub use check_answer::CheckAnswerStage;
pub use generate::{GenerateAnswerStage, render_prompt};
pub use grade::DocsGraderStage;
pub use retrieve::RetrieveDocsStage;
pub use scan_question::ScanQuestionStage;
pub use topic::TopicClassifierStage;

use crate::capabilities::Capabilities;
use crate::config::Config;
use crate::pipeline::engine::{Next, Pipeline, PipelineBuilder, StageName, Transition};
use crate::pipeline::error::ConfigurationError;
use crate::pipeline::state::{AgentState, QuestionStatus, TopicVerdict};

/// Reply for questions that fail the safety scan.
pub const UNSAFE_QUESTION_MESSAGE: &str =
    "Your question could not be processed because it did not pass our safety checks. Please rephrase it and try again.";

/// Reply for questions classified as unrelated to customer support.
pub const OFF_TOPIC_MESSAGE: &str =
    "Please ask a question about customer support so I can help you better.";

/// Reply when no retrieved document survives grading.
pub const NO_CONTEXT_MESSAGE: &str =
    "I could not find information about this in our support knowledge base. Please contact a support agent for help.";

/// Tunables of the support pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineSettings {
    /// Number of documents requested from the retriever.
    pub top_k: usize,
    /// Classifier confidence below which an off-topic verdict is overridden to on-topic.
    pub confidence_threshold: f32,
    /// Maximum number of grading calls in flight.
    pub grading_concurrency: usize,
    /// Refuse instead of generating when grading leaves no documents.
    pub refuse_without_context: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            top_k: 5,
            confidence_threshold: 0.7,
            grading_concurrency: 4,
            refuse_without_context: true,
        }
    }
}

impl From<&Config> for PipelineSettings {
    fn from(config: &Config) -> Self {
        Self {
            top_k: config.retrieval_top_k,
            confidence_threshold: config.topic_confidence_threshold,
            grading_concurrency: config.grading_concurrency,
            refuse_without_context: config.refuse_without_context,
        }
    }
}

fn after_scan(state: &AgentState) -> Next {
    match state.question_status {
        Some(QuestionStatus::Valid) => Next::Stage(StageName::TopicClassifier),
        Some(QuestionStatus::Invalid) | None => Next::End,
    }
}

fn after_topic(state: &AgentState) -> Next {
    match state.on_topic {
        Some(TopicVerdict::Yes) => Next::Stage(StageName::RetrieveDocs),
        Some(TopicVerdict::No) | None => Next::End,
    }
}

fn after_generation(state: &AgentState) -> Next {
    match state.prompt_used {
        Some(_) => Next::Stage(StageName::CheckAnswer),
        None => Next::End,
    }
}

/// Wire the canonical six-stage support pipeline around `capabilities`.
///
/// ```text
/// scan_question --valid--> topic_classifier --yes--> retrieve_docs -> docs_grader
///     -> generate_answer --generated--> check_answer -> end
/// ```
pub fn build_support_pipeline(
    capabilities: Capabilities,
    settings: PipelineSettings,
) -> Result<Pipeline, ConfigurationError> {
    let Capabilities {
        input_scanner,
        topic_classifier,
        retriever,
        grader,
        generator,
        output_scanner,
    } = capabilities;

    PipelineBuilder::new()
        .stage(
            ScanQuestionStage::new(input_scanner),
            Transition::branch(&[StageName::TopicClassifier], after_scan),
        )
        .stage(
            TopicClassifierStage::new(topic_classifier, settings.confidence_threshold),
            Transition::branch(&[StageName::RetrieveDocs], after_topic),
        )
        .stage(
            RetrieveDocsStage::new(retriever, settings.top_k),
            Transition::to(StageName::DocsGrader),
        )
        .stage(
            DocsGraderStage::new(grader, settings.grading_concurrency),
            Transition::to(StageName::GenerateAnswer),
        )
        .stage(
            GenerateAnswerStage::new(generator, settings.refuse_without_context),
            Transition::branch(&[StageName::CheckAnswer], after_generation),
        )
        .stage(CheckAnswerStage::new(output_scanner), Transition::end())
        .entry(StageName::ScanQuestion)
        .build()
}
