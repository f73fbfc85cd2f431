//! Topic classification backed by a language model with JSON output.

use super::{CapabilityError, TopicClassification, TopicClassifier, extract_json_object};
use crate::llm::{CompletionRequest, LlmClient};
use crate::pipeline::TopicVerdict;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

const SYSTEM_PROMPT: &str = r#"You are a grader assessing whether a user's question is related to customer support.
Customer support topics include:
- Questions about purchasing products (e.g., "How do I place an order?")
- Questions about order cancellations (e.g., "Can I cancel my order?")
- Questions about refunds or returns (e.g., "How do I request a refund?")
- Questions about product issues (e.g., "My product is not working.")
- Questions about account issues (e.g., "I can't log in to my account.")

Respond with a JSON object with exactly these keys:
"score": "Yes" if the question is about customer support, otherwise "No";
"confidence": a number between 0 and 1;
"reason": a brief explanation."#;

#[derive(Debug, Deserialize)]
struct RawClassification {
    score: String,
    #[serde(default = "default_confidence")]
    confidence: f32,
    #[serde(default)]
    reason: String,
}

fn default_confidence() -> f32 {
    1.0
}

/// Classifier that asks the language model for a structured verdict.
pub struct LlmTopicClassifier {
    llm: Arc<dyn LlmClient>,
}

impl LlmTopicClassifier {
    /// Wrap a language model client.
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

pub(crate) fn parse_classification(raw: &str) -> Result<TopicClassification, CapabilityError> {
    let json = extract_json_object(raw).ok_or_else(|| {
        CapabilityError::InvalidResponse(format!("topic classifier returned no JSON: {raw}"))
    })?;
    let parsed: RawClassification = serde_json::from_str(json)
        .map_err(|error| CapabilityError::InvalidResponse(error.to_string()))?;
    let verdict: TopicVerdict = parsed
        .score
        .parse()
        .map_err(CapabilityError::InvalidResponse)?;
    let confidence = if parsed.confidence.is_finite() {
        parsed.confidence.clamp(0.0, 1.0)
    } else {
        0.0
    };
    Ok(TopicClassification {
        verdict,
        confidence,
        reason: parsed.reason,
    })
}

#[async_trait]
impl TopicClassifier for LlmTopicClassifier {
    async fn classify(&self, question: &str) -> Result<TopicClassification, CapabilityError> {
        let raw = self
            .llm
            .complete(
                CompletionRequest::with_system(SYSTEM_PROMPT, format!("User question: {question}"))
                    .json(),
            )
            .await?;
        let classification = parse_classification(&raw)?;
        tracing::debug!(
            verdict = ?classification.verdict,
            confidence = classification.confidence,
            reason = %classification.reason,
            "Topic classified"
        );
        Ok(classification)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_structured_verdict() {
        let parsed = parse_classification(
            r#"{"score": "No", "confidence": 0.93, "reason": "Geography trivia"}"#,
        )
        .expect("classification");
        assert_eq!(parsed.verdict, TopicVerdict::No);
        assert!((parsed.confidence - 0.93).abs() < 1e-6);
        assert_eq!(parsed.reason, "Geography trivia");
    }

    #[test]
    fn lowercase_verdicts_and_out_of_range_confidence_are_normalized() {
        let parsed =
            parse_classification(r#"{"score": "yes", "confidence": 4}"#).expect("classification");
        assert_eq!(parsed.verdict, TopicVerdict::Yes);
        assert_eq!(parsed.confidence, 1.0);
    }

    #[test]
    fn unknown_verdict_is_an_invalid_response() {
        let error = parse_classification(r#"{"score": "perhaps", "confidence": 0.5}"#)
            .expect_err("invalid");
        assert!(matches!(error, CapabilityError::InvalidResponse(_)));
    }
}
