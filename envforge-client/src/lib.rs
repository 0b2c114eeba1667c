//! Envforge CI Client
//!
//! A small, type-safe HTTP client for the Jenkins remote API, covering just
//! what the provisioning pipeline needs: triggering a parameterized build,
//! following it through the queue, polling its status, and reading its
//! history, parameters and console text.
//!
//! The pipeline depends on the [`CiClient`] trait rather than on
//! [`JenkinsClient`] directly, so tests can substitute an in-memory CI.
//!
//! # Example
//!
//! ```no_run
//! use envforge_client::{CiClient, JenkinsClient, JobPath};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let client = JenkinsClient::new("https://ci.example.com")
//!         .with_credentials("deployer", "api-token");
//!     let job = JobPath::parse("Environments/CreateClusterNew").unwrap();
//!
//!     let info = client.job_info(&job).await?;
//!     println!("Last build: {:?}", info.last_build);
//!     Ok(())
//! }
//! ```

mod ci;
pub mod error;
mod jobs;
mod queue;
pub mod types;
mod wire;

// Re-export commonly used types
pub use ci::CiClient;
pub use error::{ClientError, Result};
pub use types::{BuildInfo, BuildSummary, JobInfo, JobPath, QueueItem, QueueRef, TriggerAck};

use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::debug;

/// Static credential pair for the CI server (user + API token)
#[derive(Clone)]
pub struct Credentials {
    pub user: String,
    pub token: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .finish()
    }
}

/// HTTP client for the Jenkins remote API
#[derive(Debug, Clone)]
pub struct JenkinsClient {
    /// Base URL of the server (e.g., "https://ci.example.com")
    base_url: String,
    /// HTTP client instance
    client: Client,
    /// Basic-auth credentials sent with every request
    credentials: Option<Credentials>,
}

impl JenkinsClient {
    /// Create a new client with a default HTTP client
    ///
    /// # Example
    /// ```
    /// use envforge_client::JenkinsClient;
    ///
    /// let client = JenkinsClient::new("https://ci.example.com/");
    /// assert_eq!(client.base_url(), "https://ci.example.com");
    /// ```
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(base_url, Client::new())
    }

    /// Create a new client with a custom HTTP client
    ///
    /// This allows you to configure timeouts, proxies, TLS settings, etc.
    pub fn with_client(base_url: impl Into<String>, client: Client) -> Self {
        let base_url = base_url.into();
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            credentials: None,
        }
    }

    /// Attach the user/API-token pair used for basic authentication
    pub fn with_credentials(mut self, user: impl Into<String>, token: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            user: user.into(),
            token: token.into(),
        });
        self
    }

    /// Get the base URL of the server
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    // =============================================================================
    // Request Helpers
    // =============================================================================

    fn job_url(&self, job: &JobPath) -> String {
        format!("{}{}", self.base_url, job.url_path())
    }

    fn build_url(&self, job: &JobPath, number: u64) -> String {
        format!("{}/{}", self.job_url(job), number)
    }

    /// Start a request with authentication applied
    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        let builder = self.client.request(method, url);
        match &self.credentials {
            Some(creds) => builder.basic_auth(&creds.user, Some(&creds.token)),
            None => builder,
        }
    }

    /// Send a request, classifying transport failures
    async fn send(&self, request: RequestBuilder) -> Result<Response> {
        request.send().await.map_err(ClientError::from_transport)
    }

    // =============================================================================
    // Response Handlers
    // =============================================================================

    /// Check the status code of a response, turning failures into errors
    async fn check_status(&self, response: Response) -> Result<Response> {
        let status = response.status();

        if status.is_success() {
            return Ok(response);
        }

        let url = response.url().to_string();
        let error_text = response
            .text()
            .await
            .unwrap_or_else(|_| "Unknown error".to_string());

        debug!("Request to {} failed with {}", url, status);

        if status.as_u16() == 404 {
            return Err(ClientError::NotFound(url));
        }

        Err(ClientError::api_error(status.as_u16(), error_text))
    }

    /// Handle an API response and deserialize JSON
    async fn handle_response<T: DeserializeOwned>(&self, response: Response) -> Result<T> {
        self.check_status(response)
            .await?
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to parse JSON response: {}", e)))
    }

    /// Handle an API response whose body is plain text
    async fn handle_text(&self, response: Response) -> Result<String> {
        self.check_status(response)
            .await?
            .text()
            .await
            .map_err(|e| ClientError::ParseError(format!("Failed to read response body: {}", e)))
    }
}
