//! Volley HTTP Client
//!
//! A type-safe HTTP client for the Volley orchestrator API, used by the CLI.
//!
//! # Example
//!
//! ```no_run
//! use volley_client::VolleyClient;
//!
//! # async fn example() -> volley_client::Result<()> {
//! let client = VolleyClient::new("http://127.0.0.1:16808");
//!
//! // Launch a background ping and wait for its jid
//! let launched = client.ping_async(vec!["web-1".to_string()]).await?;
//!
//! println!("Launched job: {}", launched.jid);
//! # Ok(())
//! # }
//! ```

pub mod error;
mod jobs;
mod operations;

// Re-export commonly used types
pub use error::{ClientError, Result};
pub use jobs::FollowStream;
pub use operations::HostResult;
pub use volley_core::dto::job::{FollowEvent, JobListing, LaunchResponse};

use reqwest::Client;
use serde::de::DeserializeOwned;

/// HTTP client for the Volley orchestrator API
///
/// Methods are organized into two groups:
/// - Operations (target, ping, facter, service, execute, deploy, task)
/// - Jobs (list, get, follow, delete)
#[derive(Debug, Clone)]
pub struct VolleyClient {
    /// Base URL of the orchestrator (e.g., "http://127.0.0.1:16808")
    base_url: String,
    /// HTTP client instance
    client: Client,
}

impl VolleyClient {
    /// Create a new client
    ///
    /// # Arguments
    /// * `base_url` - The base URL of the orchestrator API
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    /// Keep in mind that a request timeout also cuts follow streams short.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        }
    }

    /// Get the base URL of the orchestrator
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Returns the response if its status is a success, the API error otherwise
    async fn check(&self, response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();

        if !status.is_success() {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            tracing::debug!("Request failed with status {}: {}", status, error_text);
            return Err(ClientError::api_error(status.as_u16(), error_text));
        }

        Ok(response)
    }

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: reqwest::Response) -> Result<T> {
        self.check(response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response that returns no content (e.g., DELETE operations)
    async fn handle_empty_response(&self, response: reqwest::Response) -> Result<()> {
        self.check(response).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = VolleyClient::new("http://127.0.0.1:16808");
        assert_eq!(client.base_url(), "http://127.0.0.1:16808");
    }

    #[test]
    fn test_client_trims_trailing_slash() {
        let client = VolleyClient::new("http://127.0.0.1:16808/");
        assert_eq!(client.url("/jobs"), "http://127.0.0.1:16808/jobs");
    }
}
