//! Error taxonomy for stages and whole runs.

use crate::capabilities::CapabilityError;
use crate::pipeline::engine::StageName;
use thiserror::Error;

/// Failure raised by a stage handler.
///
/// Rejections are not errors: a stage that refuses a question records the refusal in the state
/// and returns `Ok`.
#[derive(Debug, Error)]
pub enum StageError {
    /// An external collaborator failed or was unreachable.
    #[error(transparent)]
    Dependency(#[from] CapabilityError),
    /// The caller cancelled the run while the stage was waiting.
    #[error("run cancelled")]
    Cancelled,
    /// The run deadline elapsed while the stage was waiting.
    #[error("run deadline exceeded")]
    TimedOut,
}

/// Invalid stage registry or misbehaving topology.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigurationError {
    /// No entry stage was declared.
    #[error("pipeline has no entry stage")]
    MissingEntry,
    /// The declared entry stage is not registered.
    #[error("entry stage '{0}' is not registered")]
    UnregisteredEntry(StageName),
    /// A stage was registered more than once.
    #[error("stage '{0}' is registered more than once")]
    DuplicateStage(StageName),
    /// A transition points at a stage that is not registered.
    #[error("stage '{from}' transitions to unregistered stage '{to}'")]
    UnknownTarget {
        /// Stage owning the transition.
        from: StageName,
        /// Missing destination.
        to: StageName,
    },
    /// Unconditional transitions form a loop.
    #[error("unconditional transitions form a cycle: {0:?}")]
    Cycle(Vec<StageName>),
    /// A conditional rule produced a destination it never declared.
    #[error("stage '{from}' produced undeclared transition to '{to}'")]
    UndeclaredTransition {
        /// Stage owning the rule.
        from: StageName,
        /// Destination returned by the rule.
        to: StageName,
    },
    /// A run tried to enter a stage it already executed.
    #[error("stage '{0}' was revisited within one run")]
    Revisit(StageName),
    /// A run exceeded the configured step bound.
    #[error("run exceeded the step bound of {0}")]
    StepLimitExceeded(usize),
}

/// Failure of a whole pipeline run.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A stage could not reach one of its collaborators.
    #[error("stage '{stage}' failed: {source}")]
    Dependency {
        /// Stage that raised the failure.
        stage: StageName,
        /// Underlying collaborator error.
        #[source]
        source: CapabilityError,
    },
    /// The caller cancelled the run.
    #[error("run cancelled during stage '{stage}'")]
    Cancelled {
        /// Stage active at cancellation.
        stage: StageName,
    },
    /// The run deadline elapsed.
    #[error("run timed out during stage '{stage}'")]
    TimedOut {
        /// Stage active when the deadline passed.
        stage: StageName,
    },
    /// The registry or topology is invalid.
    #[error("pipeline misconfigured: {0}")]
    Configuration(#[from] ConfigurationError),
}

impl PipelineError {
    pub(crate) fn from_stage(stage: StageName, error: StageError) -> Self {
        match error {
            StageError::Dependency(source) => Self::Dependency { stage, source },
            StageError::Cancelled => Self::Cancelled { stage },
            StageError::TimedOut => Self::TimedOut { stage },
        }
    }

    /// Stage the failure originated from, if any.
    pub fn stage(&self) -> Option<StageName> {
        match self {
            Self::Dependency { stage, .. } | Self::Cancelled { stage } | Self::TimedOut { stage } => {
                Some(*stage)
            }
            Self::Configuration(_) => None,
        }
    }

    /// Short machine-readable category used in logs.
    pub fn category(&self) -> &'static str {
        match self {
            Self::Dependency { .. } => "dependency_failure",
            Self::Cancelled { .. } => "cancelled",
            Self::TimedOut { .. } => "timed_out",
            Self::Configuration(_) => "configuration_error",
        }
    }
}
