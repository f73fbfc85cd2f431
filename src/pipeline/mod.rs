//! Question-answering pipeline: shared state, the stage engine, and the support stages.
//!
//! A run threads one [`AgentState`] through the registered stages, starting at the entry stage
//! and following each stage's [`Transition`] until a rule returns [`Next::End`]. Rejections
//! (unsafe question, off-topic question, no grounded context, flagged answer) are ordinary
//! terminal states; only collaborator failures, cancellation, and deadline expiry surface as a
//! [`PipelineError`].

mod context;
mod engine;
mod error;
mod state;
pub mod stages;

pub use context::{CancelHandle, RunContext};
pub use engine::{
    DEFAULT_MAX_STEPS, Next, Pipeline, PipelineBuilder, Stage, StageName, Transition,
    TransitionRule,
};
pub use error::{ConfigurationError, PipelineError, StageError};
pub use stages::{
    NO_CONTEXT_MESSAGE, OFF_TOPIC_MESSAGE, PipelineSettings, UNSAFE_QUESTION_MESSAGE,
    build_support_pipeline,
};
pub use state::{AgentState, AnswerStatus, DocumentRecord, QuestionStatus, RunOutcome, TopicVerdict};
