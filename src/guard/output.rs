//! Checks applied to generated answers.

use super::judge::{DEFAULT_JUDGE_THRESHOLD, LlmJudge};
use super::{CheckResult, OutputCheck};
use crate::capabilities::CapabilityError;
use crate::embedding::{EmbeddingClient, cosine_similarity};
use crate::llm::LlmClient;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Writing system a character belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Script {
    /// Latin alphabet, including accented letters.
    Latin,
    /// Cyrillic alphabet.
    Cyrillic,
    /// Greek alphabet.
    Greek,
    /// Arabic script.
    Arabic,
    /// Hebrew script.
    Hebrew,
    /// Devanagari script.
    Devanagari,
    /// Thai script.
    Thai,
    /// Han ideographs and Japanese kana.
    Cjk,
    /// Korean Hangul.
    Hangul,
}

fn script_of(c: char) -> Option<Script> {
    let script = match c as u32 {
        0x41..=0x5A | 0x61..=0x7A | 0xC0..=0x24F | 0x1E00..=0x1EFF => Script::Latin,
        0x370..=0x3FF | 0x1F00..=0x1FFF => Script::Greek,
        0x400..=0x52F => Script::Cyrillic,
        0x590..=0x5FF => Script::Hebrew,
        0x600..=0x6FF | 0x750..=0x77F => Script::Arabic,
        0x900..=0x97F => Script::Devanagari,
        0xE00..=0xE7F => Script::Thai,
        0x3040..=0x30FF | 0x3400..=0x4DBF | 0x4E00..=0x9FFF => Script::Cjk,
        0xAC00..=0xD7AF | 0x1100..=0x11FF => Script::Hangul,
        _ => return None,
    };
    Some(script)
}

/// Script used by most letters of `text`, if any letter is recognised.
pub fn dominant_script(text: &str) -> Option<Script> {
    let mut counts: HashMap<Script, usize> = HashMap::new();
    for script in text.chars().filter_map(script_of) {
        *counts.entry(script).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(script, _)| script)
}

/// Fails when the answer is written in a different script than the prompt.
#[derive(Debug, Default, Clone, Copy)]
pub struct LanguageSame;

#[async_trait]
impl OutputCheck for LanguageSame {
    fn name(&self) -> &'static str {
        "LanguageSame"
    }

    async fn check(&self, prompt: &str, output: &str) -> Result<CheckResult, CapabilityError> {
        let passed = match (dominant_script(prompt), dominant_script(output)) {
            (Some(expected), Some(actual)) => expected == actual,
            _ => true,
        };
        Ok(CheckResult {
            text: output.to_string(),
            passed,
            score: if passed { 0.0 } else { 1.0 },
        })
    }
}

/// Fails when the answer drifts semantically away from its prompt.
pub struct Relevance {
    embedding: Arc<dyn EmbeddingClient>,
    threshold: f32,
}

impl Relevance {
    /// Require a cosine similarity of at least `threshold` between prompt and answer.
    pub fn new(embedding: Arc<dyn EmbeddingClient>, threshold: f32) -> Self {
        Self {
            embedding,
            threshold,
        }
    }
}

#[async_trait]
impl OutputCheck for Relevance {
    fn name(&self) -> &'static str {
        "Relevance"
    }

    async fn check(&self, prompt: &str, output: &str) -> Result<CheckResult, CapabilityError> {
        let vectors = self
            .embedding
            .generate_embeddings(vec![prompt.to_string(), output.to_string()])
            .await?;
        let [prompt_vector, output_vector] = vectors.as_slice() else {
            return Err(CapabilityError::InvalidResponse(format!(
                "expected 2 embeddings, received {}",
                vectors.len()
            )));
        };
        let similarity = cosine_similarity(prompt_vector, output_vector);
        tracing::debug!(similarity, threshold = self.threshold, "Answer relevance");
        Ok(CheckResult {
            text: output.to_string(),
            passed: similarity >= self.threshold,
            score: (1.0 - similarity).clamp(0.0, 1.0),
        })
    }
}

const SENTIMENT_RUBRIC: &str = "You rate how negative the tone of a customer-support reply is. \
Respond with a JSON object {\"score\": <number between 0 and 1>} where 0 means neutral or \
positive and 1 means hostile, dismissive, or strongly negative.";

/// Language-model judged negativity of the answer.
pub struct Sentiment {
    judge: LlmJudge,
    threshold: f32,
}

impl Sentiment {
    /// Judge with `llm`, failing at the default threshold.
    pub fn new(llm: Arc<dyn LlmClient>) -> Self {
        Self {
            judge: LlmJudge::new(llm, SENTIMENT_RUBRIC),
            threshold: DEFAULT_JUDGE_THRESHOLD,
        }
    }
}

#[async_trait]
impl OutputCheck for Sentiment {
    fn name(&self) -> &'static str {
        "Sentiment"
    }

    async fn check(&self, _prompt: &str, output: &str) -> Result<CheckResult, CapabilityError> {
        let score = self.judge.score(output).await?;
        Ok(CheckResult {
            text: output.to_string(),
            passed: score < self.threshold,
            score,
        })
    }
}
