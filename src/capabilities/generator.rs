//! Answer generation through the configured language model.

use super::{CapabilityError, Generator};
use crate::llm::{CompletionRequest, LlmClient};
use async_trait::async_trait;
use std::sync::Arc;

/// Generator that forwards rendered prompts to the language model.
pub struct LlmGenerator {
    llm: Arc<dyn LlmClient>,
}

impl LlmGenerator {
    /// Wrap a language model client.
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self { llm }
    }
}

#[async_trait]
impl Generator for LlmGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, CapabilityError> {
        Ok(self.llm.complete(CompletionRequest::prompt(prompt)).await?)
    }
}
