//! Request orchestration: schema lookup, generation, validation, execution.

pub mod outcome;
pub mod pipeline;

pub use outcome::{PipelineRun, PipelineState, RequestOutcome};
pub use pipeline::{Orchestrator, StageTimeouts};
