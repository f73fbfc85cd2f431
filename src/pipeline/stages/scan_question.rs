//! Safety scan of the incoming question.

use super::UNSAFE_QUESTION_MESSAGE;
use crate::capabilities::InputScanner;
use crate::pipeline::context::RunContext;
use crate::pipeline::engine::{Stage, StageName};
use crate::pipeline::error::StageError;
use crate::pipeline::state::{AgentState, QuestionStatus};
use async_trait::async_trait;
use std::sync::Arc;

/// Rejects unsafe questions and replaces the question with its sanitized form.
pub struct ScanQuestionStage {
    scanner: Arc<dyn InputScanner>,
}

impl ScanQuestionStage {
    /// Scan questions with `scanner`.
    pub fn new(scanner: Arc<dyn InputScanner>) -> Self {
        Self { scanner }
    }
}

#[async_trait]
impl Stage for ScanQuestionStage {
    fn name(&self) -> StageName {
        StageName::ScanQuestion
    }

    async fn run(&self, state: &mut AgentState, ctx: &RunContext) -> Result<(), StageError> {
        let outcome = ctx.guard(self.scanner.scan_input(&state.question)).await??;

        if outcome.is_valid() {
            state.question_status = Some(QuestionStatus::Valid);
            state.question = outcome.sanitized;
        } else {
            tracing::info!(
                failed_checks = ?outcome.failed_checks(),
                scores = ?outcome.scores,
                "Question rejected by safety scan"
            );
            state.question_status = Some(QuestionStatus::Invalid);
            state.llm_output = Some(UNSAFE_QUESTION_MESSAGE.to_string());
        }
        Ok(())
    }
}
