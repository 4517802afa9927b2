//! Service layer
//!
//! Services hold the agent's business logic. The pipeline engine applies a
//! job's stages through the editing host and reports what happened to every
//! operation it attempted.

mod outcome;
mod pipeline;

pub use outcome::{OperationOutcome, StageOutcome, StageStatus};
pub use pipeline::{
    BEFORE_SNAPSHOT, PipelineEngine, PipelineError, PipelineObserver, PipelineReport,
};
