//! Scheduler layer
//!
//! Decides when the agent looks for work and carries a job from fetch to
//! reported result, streaming progress on the way.

pub mod controller;
pub mod progress;

pub use controller::{JobController, ProcessingStatus, job_notifications};
pub use progress::Outbox;
