//! Job-related API endpoints

use crate::CoordinatorClient;
use crate::error::{ClientError, Result};
use lumen_core::domain::job::{JobId, JobResultPayload};
use reqwest::{StatusCode, Url};
use tracing::debug;

/// Outcome of `GET /job/next`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextJob {
    /// A job envelope, still undecoded
    Available(String),
    /// The service has nothing queued (404)
    Empty,
}

impl CoordinatorClient {
    // =============================================================================
    // Job Lifecycle
    // =============================================================================

    /// Fetch the next pending job
    ///
    /// A 200 carries the job envelope, which is returned as raw text so the
    /// caller can tell a malformed envelope apart from a transport failure.
    /// A 404 means no job is available. Any other status is an error.
    pub async fn next_job(&self) -> Result<NextJob> {
        let url = self.url("/job/next");
        let response = self.client.get(&url).send().await?;

        match response.status() {
            StatusCode::OK => {
                let body = response.text().await?;
                Ok(NextJob::Available(body))
            }
            StatusCode::NOT_FOUND => {
                debug!("No job available");
                Ok(NextJob::Empty)
            }
            _ => Err(Self::error_from(response).await),
        }
    }

    /// Submit the terminal result of a job
    ///
    /// # Arguments
    /// * `job_id` - The job the result belongs to
    /// * `result` - `{status, reason?}` payload
    pub async fn submit_result(&self, job_id: &JobId, result: &JobResultPayload) -> Result<()> {
        let url = self.result_url(job_id)?;
        let response = self.client.post(url).json(result).send().await?;

        self.handle_empty_response(response).await
    }

    /// Builds `/job/{jobId}/result` with the id percent-encoded as one segment
    fn result_url(&self, job_id: &JobId) -> Result<Url> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ClientError::InvalidRequest(format!("invalid base URL: {}", e)))?;

        url.path_segments_mut()
            .map_err(|_| ClientError::InvalidRequest("base URL cannot have a path".to_string()))?
            .pop_if_empty()
            .extend(["job", job_id.as_str(), "result"]);

        Ok(url)
    }
}
