//! Stage registry, transition table, and the run loop.

use crate::pipeline::context::RunContext;
use crate::pipeline::error::{ConfigurationError, PipelineError, StageError};
use crate::pipeline::state::AgentState;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tracing::Instrument;

/// Default upper bound on the number of stages a run may execute.
pub const DEFAULT_MAX_STEPS: usize = 32;

/// Names of the stages known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StageName {
    /// Safety scan of the incoming question.
    ScanQuestion,
    /// Customer-support topic classification.
    TopicClassifier,
    /// Nearest-neighbour document retrieval.
    RetrieveDocs,
    /// Per-document relevance grading.
    DocsGrader,
    /// Grounded answer generation.
    GenerateAnswer,
    /// Output validation of the generated answer.
    CheckAnswer,
}

impl StageName {
    /// Stable identifier used in logs.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ScanQuestion => "scan_question",
            Self::TopicClassifier => "topic_classifier",
            Self::RetrieveDocs => "retrieve_docs",
            Self::DocsGrader => "docs_grader",
            Self::GenerateAnswer => "generate_answer",
            Self::CheckAnswer => "check_answer",
        }
    }
}

impl fmt::Display for StageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Destination chosen after a stage completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Next {
    /// Continue with the named stage.
    Stage(StageName),
    /// Finish the run.
    End,
}

/// Rule that maps the state after a stage to the next destination.
pub type TransitionRule = fn(&AgentState) -> Next;

/// How a stage hands control to its successor.
#[derive(Clone)]
pub enum Transition {
    /// Always continue to the same destination.
    Always(Next),
    /// Pick a destination from the state; `targets` lists every stage the rule may return.
    Branch {
        /// Stages the rule is allowed to return.
        targets: Vec<StageName>,
        /// Decision function.
        rule: TransitionRule,
    },
}

impl Transition {
    /// Unconditional edge to `stage`.
    pub fn to(stage: StageName) -> Self {
        Self::Always(Next::Stage(stage))
    }

    /// Unconditional end of run.
    pub fn end() -> Self {
        Self::Always(Next::End)
    }

    /// Data-dependent edge.
    pub fn branch(targets: &[StageName], rule: TransitionRule) -> Self {
        Self::Branch {
            targets: targets.to_vec(),
            rule,
        }
    }

    fn targets(&self) -> Vec<StageName> {
        match self {
            Self::Always(Next::Stage(stage)) => vec![*stage],
            Self::Always(Next::End) => Vec::new(),
            Self::Branch { targets, .. } => targets.clone(),
        }
    }
}

/// One unit of work in the pipeline.
#[async_trait]
pub trait Stage: Send + Sync {
    /// Name under which the stage is registered.
    fn name(&self) -> StageName;

    /// Consume and update fields of `state`.
    ///
    /// Rejections are recorded in the state; only collaborator failures, cancellation, and
    /// deadline expiry are returned as errors.
    async fn run(&self, state: &mut AgentState, ctx: &RunContext) -> Result<(), StageError>;
}

struct Registration {
    stage: Box<dyn Stage>,
    transition: Transition,
}

/// Collects stages and transitions, validating the topology on [`PipelineBuilder::build`].
pub struct PipelineBuilder {
    registrations: Vec<Registration>,
    entry: Option<StageName>,
    max_steps: usize,
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineBuilder {
    /// Empty builder with the default step bound.
    pub fn new() -> Self {
        Self {
            registrations: Vec::new(),
            entry: None,
            max_steps: DEFAULT_MAX_STEPS,
        }
    }

    /// Register a stage together with its outgoing transition.
    pub fn stage<S>(mut self, stage: S, transition: Transition) -> Self
    where
        S: Stage + 'static,
    {
        self.registrations.push(Registration {
            stage: Box::new(stage),
            transition,
        });
        self
    }

    /// Declare the stage every run starts from.
    pub fn entry(mut self, stage: StageName) -> Self {
        self.entry = Some(stage);
        self
    }

    /// Override the maximum number of stages a run may execute.
    pub fn max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Validate the registry and produce a runnable pipeline.
    pub fn build(self) -> Result<Pipeline, ConfigurationError> {
        let entry = self.entry.ok_or(ConfigurationError::MissingEntry)?;

        let mut registry = HashMap::new();
        for registration in self.registrations {
            let name = registration.stage.name();
            if registry.insert(name, registration).is_some() {
                return Err(ConfigurationError::DuplicateStage(name));
            }
        }

        if !registry.contains_key(&entry) {
            return Err(ConfigurationError::UnregisteredEntry(entry));
        }

        let mut names: Vec<_> = registry.keys().copied().collect();
        names.sort();
        for from in &names {
            for to in registry[from].transition.targets() {
                if !registry.contains_key(&to) {
                    return Err(ConfigurationError::UnknownTarget { from: *from, to });
                }
            }
        }

        for start in &names {
            detect_unconditional_cycle(*start, &registry)?;
        }

        tracing::debug!(
            entry = %entry,
            stages = registry.len(),
            max_steps = self.max_steps,
            "Pipeline topology validated"
        );

        Ok(Pipeline {
            registry,
            entry,
            max_steps: self.max_steps,
        })
    }
}

fn detect_unconditional_cycle(
    start: StageName,
    registry: &HashMap<StageName, Registration>,
) -> Result<(), ConfigurationError> {
    let mut path = vec![start];
    let mut seen = HashSet::from([start]);
    let mut current = start;
    while let Some(Registration {
        transition: Transition::Always(Next::Stage(next)),
        ..
    }) = registry.get(&current)
    {
        path.push(*next);
        if !seen.insert(*next) {
            return Err(ConfigurationError::Cycle(path));
        }
        current = *next;
    }
    Ok(())
}

/// Validated stage graph that executes runs.
pub struct Pipeline {
    registry: HashMap<StageName, Registration>,
    entry: StageName,
    max_steps: usize,
}

impl Pipeline {
    /// Stage every run starts from.
    pub fn entry(&self) -> StageName {
        self.entry
    }

    /// Drive `state` from the entry stage until a transition ends the run.
    ///
    /// The state is returned only when the run finishes. A failing stage drops the partially
    /// updated state and the error names the stage it came from.
    pub async fn run(
        &self,
        mut state: AgentState,
        ctx: &RunContext,
    ) -> Result<AgentState, PipelineError> {
        let mut current = self.entry;
        let mut visited = HashSet::new();
        let mut steps = 0usize;

        loop {
            if steps >= self.max_steps {
                return Err(ConfigurationError::StepLimitExceeded(self.max_steps).into());
            }
            if !visited.insert(current) {
                return Err(ConfigurationError::Revisit(current).into());
            }
            steps += 1;

            // build() guarantees every reachable name is registered.
            let registration = self
                .registry
                .get(&current)
                .ok_or(ConfigurationError::UnregisteredEntry(current))?;

            ctx.check()
                .map_err(|error| PipelineError::from_stage(current, error))?;

            let span = tracing::info_span!("stage", stage = %current, step = steps);
            registration
                .stage
                .run(&mut state, ctx)
                .instrument(span)
                .await
                .map_err(|error| {
                    let error = PipelineError::from_stage(current, error);
                    tracing::error!(
                        stage = %current,
                        category = error.category(),
                        error = %error,
                        "Stage failed; aborting run"
                    );
                    error
                })?;

            let next = match &registration.transition {
                Transition::Always(next) => *next,
                Transition::Branch { targets, rule } => {
                    let next = rule(&state);
                    if let Next::Stage(target) = next
                        && !targets.contains(&target)
                    {
                        return Err(ConfigurationError::UndeclaredTransition {
                            from: current,
                            to: target,
                        }
                        .into());
                    }
                    next
                }
            };

            match next {
                Next::Stage(stage) => {
                    tracing::debug!(from = %current, to = %stage, "Stage transition");
                    current = stage;
                }
                Next::End => {
                    tracing::debug!(last = %current, steps, "Run finished");
                    return Ok(state);
                }
            }
        }
    }
}
