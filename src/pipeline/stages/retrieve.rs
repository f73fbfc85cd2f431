//! Top-K retrieval of support documents.

use crate::capabilities::DocumentRetriever;
use crate::pipeline::context::RunContext;
use crate::pipeline::engine::{Stage, StageName};
use crate::pipeline::error::StageError;
use crate::pipeline::state::AgentState;
use async_trait::async_trait;
use std::sync::Arc;

/// Fetches the top-K documents for the question and keeps their metadata.
pub struct RetrieveDocsStage {
    retriever: Arc<dyn DocumentRetriever>,
    top_k: usize,
}

impl RetrieveDocsStage {
    /// Request `top_k` documents from `retriever`.
    pub fn new(retriever: Arc<dyn DocumentRetriever>, top_k: usize) -> Self {
        Self { retriever, top_k }
    }
}

#[async_trait]
impl Stage for RetrieveDocsStage {
    fn name(&self) -> StageName {
        StageName::RetrieveDocs
    }

    async fn run(&self, state: &mut AgentState, ctx: &RunContext) -> Result<(), StageError> {
        let retrieved = ctx
            .guard(self.retriever.retrieve(&state.question, self.top_k))
            .await??;

        tracing::debug!(count = retrieved.len(), "Retrieved candidate documents");
        state.documents = Some(
            retrieved
                .into_iter()
                .take(self.top_k)
                .map(|document| document.metadata)
                .collect(),
        );
        Ok(())
    }
}
