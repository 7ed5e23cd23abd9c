//! Pipeline states and the terminal artifact of one request.

use crate::collaborators::QueryResult;
use crate::error::GateError;
use crate::validation::Rejection;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    FetchingSchema,
    Generating,
    Validating,
    Executing,
    Rejected,
    Done,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::FetchingSchema => "fetching_schema",
            PipelineState::Generating => "generating",
            PipelineState::Validating => "validating",
            PipelineState::Executing => "executing",
            PipelineState::Rejected => "rejected",
            PipelineState::Done => "done",
        };
        f.write_str(name)
    }
}

/// What the caller gets back for one question.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RequestOutcome {
    /// The query passed every check and ran.
    Executed { query: String, result: QueryResult },
    /// The gate refused to run the query.
    Rejected { query: String, rejection: Rejection },
    /// A collaborator failed or timed out; `stage` is where.
    Failed { stage: PipelineState, error: String },
}

impl RequestOutcome {
    pub fn failed(stage: PipelineState, error: &GateError) -> Self {
        RequestOutcome::Failed {
            stage,
            error: error.to_string(),
        }
    }

    pub fn is_executed(&self) -> bool {
        matches!(self, RequestOutcome::Executed { .. })
    }
}

/// An outcome plus the path the state machine took to reach it.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRun {
    pub request_id: Uuid,
    pub outcome: RequestOutcome,
    pub trace: Vec<PipelineState>,
}
