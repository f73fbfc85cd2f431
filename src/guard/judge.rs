//! Language-model scoring used by the toxicity and sentiment checks.

use crate::capabilities::{CapabilityError, extract_json_object};
use crate::llm::{CompletionRequest, LlmClient};
use serde::Deserialize;
use std::sync::Arc;

/// Default risk score at or above which a judged check fails.
pub const DEFAULT_JUDGE_THRESHOLD: f32 = 0.5;

#[derive(Deserialize)]
struct JudgeScore {
    score: f32,
}

/// Asks the language model to rate text on a `[0, 1]` risk scale.
#[derive(Clone)]
pub struct LlmJudge {
    llm: Arc<dyn LlmClient>,
    rubric: &'static str,
}

impl LlmJudge {
    /// Judge with `rubric` as the system prompt. The rubric must ask for `{"score": <0..1>}`.
    pub fn new(llm: Arc<dyn LlmClient>, rubric: &'static str) -> Self {
        Self { llm, rubric }
    }

    /// Risk score of `text`.
    pub async fn score(&self, text: &str) -> Result<f32, CapabilityError> {
        let raw = self
            .llm
            .complete(CompletionRequest::with_system(self.rubric, format!("Text: {text}")).json())
            .await?;
        parse_score(&raw)
    }
}

pub(crate) fn parse_score(raw: &str) -> Result<f32, CapabilityError> {
    let score = match extract_json_object(raw) {
        Some(json) => {
            serde_json::from_str::<JudgeScore>(json)
                .map_err(|error| CapabilityError::InvalidResponse(error.to_string()))?
                .score
        }
        None => raw.trim().parse::<f32>().map_err(|_| {
            CapabilityError::InvalidResponse(format!("judge returned no score: {raw}"))
        })?,
    };
    if !score.is_finite() {
        return Err(CapabilityError::InvalidResponse(format!(
            "judge returned a non-finite score: {raw}"
        )));
    }
    Ok(score.clamp(0.0, 1.0))
}
