//! Orchestrator
//!
//! Forward-only state machine for one question:
//!
//! ```text
//! FetchingSchema -> Generating -> Validating -> Executing -> Done
//!                                          \-> Rejected  -> Done
//! ```
//!
//! Collaborator failures jump straight to `Done` with a `Failed` outcome. The
//! executor is only reachable through `Verdict::Approved`.

use crate::collaborators::{QueryExecutor, QueryGenerator, SchemaProvider};
use crate::error::{GateError, Result};
use crate::orchestrator::outcome::{PipelineRun, PipelineState, RequestOutcome};
use crate::policy::PolicyConfig;
use crate::validation::{self, Rejection, Verdict};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

/// Upper bounds on each collaborator call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub schema: Duration,
    pub generation: Duration,
    pub execution: Duration,
}

impl Default for StageTimeouts {
    fn default() -> Self {
        Self {
            schema: Duration::from_secs(30),
            generation: Duration::from_secs(60),
            execution: Duration::from_secs(30),
        }
    }
}

enum Step {
    FetchingSchema,
    Generating { schema: String },
    Validating { candidate: String },
    Executing { approved: String },
    Rejected { candidate: String, rejection: Rejection },
    Done(RequestOutcome),
}

impl Step {
    fn state(&self) -> PipelineState {
        match self {
            Step::FetchingSchema => PipelineState::FetchingSchema,
            Step::Generating { .. } => PipelineState::Generating,
            Step::Validating { .. } => PipelineState::Validating,
            Step::Executing { .. } => PipelineState::Executing,
            Step::Rejected { .. } => PipelineState::Rejected,
            Step::Done(_) => PipelineState::Done,
        }
    }
}

/// Holds only read-only configuration and shared collaborators; each call to
/// [`Orchestrator::run`] owns its own request data.
pub struct Orchestrator {
    policy: Arc<PolicyConfig>,
    schema: Arc<dyn SchemaProvider>,
    generator: Arc<dyn QueryGenerator>,
    executor: Arc<dyn QueryExecutor>,
    timeouts: StageTimeouts,
}

impl Orchestrator {
    pub fn new(
        policy: Arc<PolicyConfig>,
        schema: Arc<dyn SchemaProvider>,
        generator: Arc<dyn QueryGenerator>,
        executor: Arc<dyn QueryExecutor>,
    ) -> Self {
        Self {
            policy,
            schema,
            generator,
            executor,
            timeouts: StageTimeouts::default(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: StageTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Answer one question.
    pub async fn answer(&self, question: &str) -> RequestOutcome {
        self.run(question).await.outcome
    }

    /// Answer one question, also reporting the states visited.
    pub async fn run(&self, question: &str) -> PipelineRun {
        let request_id = Uuid::new_v4();
        let span = info_span!("pipeline", %request_id);
        self.drive(request_id, question).instrument(span).await
    }

    async fn drive(&self, request_id: Uuid, question: &str) -> PipelineRun {
        info!("Question: {}", question);
        let mut trace = Vec::new();
        let mut step = Step::FetchingSchema;

        loop {
            let state = step.state();
            trace.push(state);
            info!(%state, "Entering state");

            step = match step {
                Step::FetchingSchema => {
                    let fetch = self.schema.fetch_schema(self.policy.allowed_tables());
                    match bounded(state, self.timeouts.schema, fetch).await {
                        Ok(schema) => Step::Generating { schema },
                        Err(e) => abort(state, e),
                    }
                }
                Step::Generating { schema } => {
                    let generate = self.generator.generate(question, &schema);
                    match bounded(state, self.timeouts.generation, generate).await {
                        Ok(candidate) => {
                            info!("Candidate query: {}", candidate);
                            Step::Validating { candidate }
                        }
                        Err(e) => abort(state, e),
                    }
                }
                Step::Validating { candidate } => match validation::validate(&candidate, &self.policy) {
                    Verdict::Approved { normalized_query } => Step::Executing {
                        approved: normalized_query,
                    },
                    Verdict::Rejected(rejection) => Step::Rejected {
                        candidate,
                        rejection,
                    },
                },
                Step::Executing { approved } => {
                    let execute = self.executor.execute(&approved);
                    match bounded(state, self.timeouts.execution, execute).await {
                        Ok(result) => {
                            info!("Query returned {} row(s)", result.row_count());
                            Step::Done(RequestOutcome::Executed {
                                query: approved,
                                result,
                            })
                        }
                        Err(e) => abort(state, e),
                    }
                }
                Step::Rejected {
                    candidate,
                    rejection,
                } => Step::Done(RequestOutcome::Rejected {
                    query: candidate,
                    rejection,
                }),
                Step::Done(outcome) => {
                    return PipelineRun {
                        request_id,
                        outcome,
                        trace,
                    }
                }
            };
        }
    }
}

fn abort(state: PipelineState, error: GateError) -> Step {
    warn!(%state, "Pipeline aborted: {}", error);
    Step::Done(RequestOutcome::failed(state, &error))
}

async fn bounded<T>(
    state: PipelineState,
    limit: Duration,
    call: impl Future<Output = Result<T>>,
) -> Result<T> {
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(GateError::Timeout {
            stage: state.to_string(),
            millis: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }),
    }
}
