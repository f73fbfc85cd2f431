//! Customer-support topic gate.

use super::OFF_TOPIC_MESSAGE;
use crate::capabilities::TopicClassifier;
use crate::pipeline::context::RunContext;
use crate::pipeline::engine::{Stage, StageName};
use crate::pipeline::error::StageError;
use crate::pipeline::state::{AgentState, TopicVerdict};
use async_trait::async_trait;
use std::sync::Arc;

/// Decides whether the question concerns customer support.
///
/// Low-confidence verdicts are overridden to [`TopicVerdict::Yes`] so that uncertain
/// classifications lead to an answer rather than a refusal.
pub struct TopicClassifierStage {
    classifier: Arc<dyn TopicClassifier>,
    confidence_threshold: f32,
}

impl TopicClassifierStage {
    /// Classify with `classifier`, trusting verdicts at or above `confidence_threshold`.
    pub fn new(classifier: Arc<dyn TopicClassifier>, confidence_threshold: f32) -> Self {
        Self {
            classifier,
            confidence_threshold,
        }
    }
}

#[async_trait]
impl Stage for TopicClassifierStage {
    fn name(&self) -> StageName {
        StageName::TopicClassifier
    }

    async fn run(&self, state: &mut AgentState, ctx: &RunContext) -> Result<(), StageError> {
        let classification = ctx
            .guard(self.classifier.classify(&state.question))
            .await??;

        let verdict = if classification.confidence < self.confidence_threshold {
            if classification.verdict == TopicVerdict::No {
                tracing::debug!(
                    confidence = classification.confidence,
                    threshold = self.confidence_threshold,
                    "Low-confidence off-topic verdict overridden"
                );
            }
            TopicVerdict::Yes
        } else {
            classification.verdict
        };

        state.on_topic = Some(verdict);
        if verdict == TopicVerdict::No {
            tracing::info!(
                confidence = classification.confidence,
                "Question classified as off-topic"
            );
            state.llm_output = Some(OFF_TOPIC_MESSAGE.to_string());
        }
        Ok(())
    }
}
