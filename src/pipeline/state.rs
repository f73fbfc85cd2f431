//! The record threaded through every stage of a run.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata of one retrieved document, keyed by attribute name.
pub type DocumentRecord = Map<String, Value>;

/// Verdict of the safety scan on the incoming question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuestionStatus {
    /// Every configured input check passed.
    Valid,
    /// At least one input check failed.
    Invalid,
}

/// Whether the question falls within the customer-support domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TopicVerdict {
    /// The question is about customer support.
    Yes,
    /// The question is outside the customer-support domain.
    No,
}

impl std::str::FromStr for TopicVerdict {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_matches(|c: char| c == '"' || c == '.').to_lowercase().as_str() {
            "yes" | "y" | "true" => Ok(Self::Yes),
            "no" | "n" | "false" => Ok(Self::No),
            other => Err(format!("unrecognized topic verdict '{other}'")),
        }
    }
}

/// Verdict of output validation on the generated answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerStatus {
    /// Every configured output check passed.
    Valid,
    /// At least one output check failed.
    Invalid,
}

/// Terminal classification of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// An answer was generated and accepted by output validation.
    Answered,
    /// An answer was generated but flagged by output validation.
    AnswerFlagged,
    /// The question failed the safety scan.
    RejectedUnsafe,
    /// The question was classified as off-topic.
    RejectedOffTopic,
    /// No relevant documents survived grading, so nothing was generated.
    NoGroundedContext,
    /// The state does not describe a finished run.
    Incomplete,
}

/// Mutable state shared by the stages of a single run.
///
/// Unset fields are `None` and are omitted when the state is serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// The user question, replaced by its sanitized form after the safety scan.
    pub question: String,
    /// Set once by the safety scan.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub question_status: Option<QuestionStatus>,
    /// Set once by topic classification.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_topic: Option<TopicVerdict>,
    /// Retrieved document metadata in ranked order, narrowed by grading.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documents: Option<Vec<DocumentRecord>>,
    /// Generated answer or canned refusal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_output: Option<String>,
    /// Prompt rendered for generation; only present once generation ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_used: Option<String>,
    /// Set once by output validation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub answer_status: Option<AnswerStatus>,
}

impl AgentState {
    /// Build the initial state for a raw question.
    pub fn new(question: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            ..Self::default()
        }
    }

    /// Documents currently held by the state, empty when retrieval has not run.
    pub fn documents(&self) -> &[DocumentRecord] {
        self.documents.as_deref().unwrap_or_default()
    }

    /// Classify how the run ended.
    pub fn outcome(&self) -> RunOutcome {
        if self.llm_output.is_none() {
            return RunOutcome::Incomplete;
        }
        match (self.question_status, self.on_topic, self.answer_status) {
            (Some(QuestionStatus::Invalid), _, _) => RunOutcome::RejectedUnsafe,
            (_, Some(TopicVerdict::No), _) => RunOutcome::RejectedOffTopic,
            (_, _, Some(AnswerStatus::Valid)) => RunOutcome::Answered,
            (_, _, Some(AnswerStatus::Invalid)) => RunOutcome::AnswerFlagged,
            (Some(QuestionStatus::Valid), Some(TopicVerdict::Yes), None)
                if self.prompt_used.is_none() && self.documents.is_some() =>
            {
                RunOutcome::NoGroundedContext
            }
            _ => RunOutcome::Incomplete,
        }
    }
}
