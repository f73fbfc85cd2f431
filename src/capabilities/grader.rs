//! Document relevance grading backed by a language model.

use super::{CapabilityError, RelevanceGrader, extract_json_object};
use crate::llm::{CompletionRequest, LlmClient};
use crate::pipeline::DocumentRecord;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = "You are a grader assessing relevance of a retrieved document to a user question.\n\
If the document contains keyword(s) or semantic meaning related to the question, grade it as relevant.\n\
Respond with a JSON object {\"binary_score\": \"yes\"} or {\"binary_score\": \"no\"}.";

#[derive(Deserialize)]
struct GradeDocument {
    binary_score: String,
}

/// Grader that asks the language model for a yes/no verdict.
pub struct LlmRelevanceGrader {
    llm: Arc<dyn LlmClient>,
}

impl LlmRelevanceGrader {
    /// Wrap a language model client.
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

/// Interpret a grader answer; anything other than an affirmative is "not relevant".
pub(crate) fn parse_grade(raw: &str) -> bool {
    if let Some(json) = extract_json_object(raw)
        && let Ok(grade) = serde_json::from_str::<GradeDocument>(json)
    {
        return grade.binary_score.trim().eq_ignore_ascii_case("yes");
    }
    raw.trim()
        .trim_matches(|c: char| !c.is_alphanumeric())
        .eq_ignore_ascii_case("yes")
}

#[async_trait]
impl RelevanceGrader for LlmRelevanceGrader {
    async fn grade(
        &self,
        document: &DocumentRecord,
        question: &str,
    ) -> Result<bool, CapabilityError> {
        let rendered = serde_json::to_string(document)
            .map_err(|error| CapabilityError::InvalidResponse(error.to_string()))?;
        let raw = self
            .llm
            .complete(
                CompletionRequest::with_system(
                    SYSTEM_PROMPT,
                    format!("Retrieved document: \n\n {rendered} \n\n User question: {question}"),
                )
                .json(),
            )
            .await?;
        Ok(parse_grade(&raw))
    }
}
