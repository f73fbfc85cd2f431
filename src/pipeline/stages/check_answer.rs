//! Validation of the generated answer.

use crate::capabilities::OutputScanner;
use crate::pipeline::context::RunContext;
use crate::pipeline::engine::{Stage, StageName};
use crate::pipeline::error::StageError;
use crate::pipeline::state::{AgentState, AnswerStatus};
use async_trait::async_trait;
use std::sync::Arc;

/// Validates the generated answer against its prompt.
///
/// A flagged answer keeps its raw text; an accepted one is replaced by the sanitized text.
pub struct CheckAnswerStage {
    scanner: Arc<dyn OutputScanner>,
}

impl CheckAnswerStage {
    /// Validate answers with `scanner`.
    pub fn new(scanner: Arc<dyn OutputScanner>) -> Self {
        Self { scanner }
    }
}

#[async_trait]
impl Stage for CheckAnswerStage {
    fn name(&self) -> StageName {
        StageName::CheckAnswer
    }

    async fn run(&self, state: &mut AgentState, ctx: &RunContext) -> Result<(), StageError> {
        let output = state.llm_output.as_deref().unwrap_or_default();
        let prompt = state.prompt_used.as_deref().unwrap_or_default();
        let outcome = ctx.guard(self.scanner.scan_output(output, prompt)).await??;

        if outcome.is_valid() {
            state.answer_status = Some(AnswerStatus::Valid);
            state.llm_output = Some(outcome.sanitized);
        } else {
            tracing::info!(
                failed_checks = ?outcome.failed_checks(),
                scores = ?outcome.scores,
                "Answer flagged by output validation"
            );
            state.answer_status = Some(AnswerStatus::Invalid);
        }
        Ok(())
    }
}
