//! Grounded answer generation.

use super::NO_CONTEXT_MESSAGE;
use crate::capabilities::Generator;
use crate::pipeline::context::RunContext;
use crate::pipeline::engine::{Stage, StageName};
use crate::pipeline::error::StageError;
use crate::pipeline::state::{AgentState, DocumentRecord};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Render the grounded generation prompt.
///
/// Each document is rendered as one JSON object per line of the context block.
pub fn render_prompt(question: &str, documents: &[DocumentRecord]) -> String {
    let context = documents
        .iter()
        .map(|document| Value::Object(document.clone()).to_string())
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "Answer the question based only on the following context:\n{context}\n\nQuestion: {question}\n"
    )
}

/// Generates an answer grounded in the graded documents.
pub struct GenerateAnswerStage {
    generator: Arc<dyn Generator>,
    refuse_without_context: bool,
}

impl GenerateAnswerStage {
    /// Generate with `generator`; when `refuse_without_context` is set, an empty context yields
    /// a canned reply instead of a generated one.
    pub fn new(generator: Arc<dyn Generator>, refuse_without_context: bool) -> Self {
        Self {
            generator,
            refuse_without_context,
        }
    }
}

#[async_trait]
impl Stage for GenerateAnswerStage {
    fn name(&self) -> StageName {
        StageName::GenerateAnswer
    }

    async fn run(&self, state: &mut AgentState, ctx: &RunContext) -> Result<(), StageError> {
        if self.refuse_without_context && state.documents().is_empty() {
            tracing::info!("No relevant documents; skipping generation");
            state.llm_output = Some(NO_CONTEXT_MESSAGE.to_string());
            return Ok(());
        }

        let prompt = render_prompt(&state.question, state.documents());
        let answer = ctx.guard(self.generator.generate(&prompt)).await??;
        state.llm_output = Some(answer);
        state.prompt_used = Some(prompt);
        Ok(())
    }
}
