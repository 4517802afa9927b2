//! Jobs repository
//!
//! Handles the job half of the coordination API:
//! - Fetching the next pending job
//! - Submitting a job's terminal result

use async_trait::async_trait;
use lumen_client::{CoordinatorClient, NextJob, Result};
use lumen_core::domain::job::{JobId, JobResultPayload};

/// Repository trait for job-related operations with the coordination service
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Fetches the next pending job
    ///
    /// Returns `NextJob::Empty` when nothing is queued; any unexpected
    /// status is an error carrying the raw status and body.
    async fn fetch_next_job(&self) -> Result<NextJob>;

    /// Reports the terminal result of a job
    ///
    /// # Arguments
    /// * `job_id` - The job that finished
    /// * `result` - `{status, reason?}`
    async fn submit_result(&self, job_id: &JobId, result: &JobResultPayload) -> Result<()>;
}

#[async_trait]
impl JobRepository for CoordinatorClient {
    async fn fetch_next_job(&self) -> Result<NextJob> {
        self.next_job().await
    }

    async fn submit_result(&self, job_id: &JobId, result: &JobResultPayload) -> Result<()> {
        CoordinatorClient::submit_result(self, job_id, result).await
    }
}
