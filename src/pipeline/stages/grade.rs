//! Relevance grading of retrieved documents.

use crate::capabilities::RelevanceGrader;
use crate::pipeline::context::RunContext;
use crate::pipeline::engine::{Stage, StageName};
use crate::pipeline::error::StageError;
use crate::pipeline::state::AgentState;
use async_trait::async_trait;
use futures_util::{StreamExt, stream};
use std::sync::Arc;

/// Keeps only the documents the grader judges relevant, preserving rank order.
///
/// Grading is advisory: a failed grading call drops that document instead of failing the run.
pub struct DocsGraderStage {
    grader: Arc<dyn RelevanceGrader>,
    concurrency: usize,
}

impl DocsGraderStage {
    /// Grade with at most `concurrency` calls in flight.
    pub fn new(grader: Arc<dyn RelevanceGrader>, concurrency: usize) -> Self {
        Self {
            grader,
            concurrency: concurrency.max(1),
        }
    }
}

#[async_trait]
impl Stage for DocsGraderStage {
    fn name(&self) -> StageName {
        StageName::DocsGrader
    }

    async fn run(&self, state: &mut AgentState, ctx: &RunContext) -> Result<(), StageError> {
        let documents = state.documents.take().unwrap_or_default();
        if documents.is_empty() {
            state.documents = Some(documents);
            return Ok(());
        }

        let question = state.question.clone();
        let grader = Arc::clone(&self.grader);
        let jobs = documents.clone().into_iter().enumerate();
        let verdicts = ctx
            .guard(
                stream::iter(jobs)
                    .map(move |(index, document)| {
                        let grader = Arc::clone(&grader);
                        let question = question.clone();
                        async move {
                            match grader.grade(&document, &question).await {
                                Ok(relevant) => relevant,
                                Err(error) => {
                                    tracing::warn!(
                                        index,
                                        error = %error,
                                        "Grading failed; treating document as not relevant"
                                    );
                                    false
                                }
                            }
                        }
                    })
                    .buffered(self.concurrency)
                    .collect::<Vec<bool>>(),
            )
            .await?;

        let total = documents.len();
        let kept: Vec<_> = documents
            .into_iter()
            .zip(verdicts)
            .filter_map(|(document, relevant)| relevant.then_some(document))
            .collect();
        tracing::debug!(total, kept = kept.len(), "Documents graded");
        state.documents = Some(kept);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::stages::stubs::{EvenGrader, record};

    #[tokio::test]
    async fn keeps_relevant_documents_in_original_order() {
        let stage = DocsGraderStage::new(Arc::new(EvenGrader { failing: vec![] }), 4);
        let mut state = AgentState::new("return a package");
        state.documents = Some((0..7).map(record).collect());

        stage
            .run(&mut state, &RunContext::unbounded())
            .await
            .expect("grade");

        let expected: Vec<_> = [0, 2, 4, 6].into_iter().map(record).collect();
        assert_eq!(state.documents(), expected.as_slice());
    }

    #[tokio::test]
    async fn grader_errors_drop_only_the_affected_document() {
        let stage = DocsGraderStage::new(Arc::new(EvenGrader { failing: vec![2] }), 2);
        let mut state = AgentState::new("return a package");
        state.documents = Some((0..5).map(record).collect());

        stage
            .run(&mut state, &RunContext::unbounded())
            .await
            .expect("grading never aborts");

        let expected: Vec<_> = [0, 4].into_iter().map(record).collect();
        assert_eq!(state.documents(), expected.as_slice());
    }

    #[tokio::test]
    async fn empty_input_stays_empty() {
        let stage = DocsGraderStage::new(Arc::new(EvenGrader { failing: vec![] }), 4);
        let mut state = AgentState::new("return a package");
        state.documents = Some(Vec::new());

        stage
            .run(&mut state, &RunContext::unbounded())
            .await
            .expect("grade");

        assert_eq!(state.documents, Some(Vec::new()));
    }
}
