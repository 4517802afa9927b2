//! Lumen HTTP Client
//!
//! A small, type-safe HTTP client for the local job-coordination service.
//!
//! The agent uses it for two things: fetching jobs and reporting their
//! results, and emulating a push channel through the handshake / poll /
//! send messaging endpoints.
//!
//! # Example
//!
//! ```no_run
//! use lumen_client::{CoordinatorClient, NextJob};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = CoordinatorClient::new("http://localhost:8765");
//!
//!     match client.next_job().await? {
//!         NextJob::Available(body) => println!("Got job envelope: {}", body),
//!         NextJob::Empty => println!("Nothing to do"),
//!     }
//!     Ok(())
//! }
//! ```

pub mod error;
mod jobs;
mod messaging;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use jobs::NextJob;

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the coordination service API
///
/// Endpoints are grouped by concern:
/// - Jobs: fetch the next job, submit a job result
/// - Messaging: handshake, poll pending messages, send a message
#[derive(Debug, Clone)]
pub struct CoordinatorClient {
    /// Base URL of the coordination service (e.g., "http://localhost:8765")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl CoordinatorClient {
    /// Create a new coordination client
    ///
    /// # Example
    /// ```
    /// use lumen_client::CoordinatorClient;
    ///
    /// let client = CoordinatorClient::new("http://localhost:8765");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new coordination client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the coordination service
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code and deserialize the JSON body
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        let status = response.status();

        if !status.is_success() {
            return Err(Self::error_from(response).await);
        }

        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Check the status code of a response whose body is not needed
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }

        Ok(())
    }

    async fn error_from(response: reqwest::Response) -> ClientError {
        let status = response.status();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());
        ClientError::api_error(status.as_u16(), error_text)
    }
}
