//! Build trigger and queue endpoints

use envforge_core::domain::build::BuildParameters;
use reqwest::Method;
use reqwest::header::LOCATION;
use tracing::{debug, info};

use crate::JenkinsClient;
use crate::error::{ClientError, Result};
use crate::types::{JobPath, QueueItem, QueueRef, TriggerAck};
use crate::wire::QueueItemJson;

impl JenkinsClient {
    /// Trigger a parameterized build of a job
    ///
    /// The server usually answers with the location of a queue item rather
    /// than a build number; use [`JenkinsClient::queue_item`] to follow it.
    pub async fn trigger_build(&self, job: &JobPath, params: &BuildParameters) -> Result<TriggerAck> {
        let url = format!("{}/buildWithParameters", self.job_url(job));
        info!("Triggering parameterized build: {}", url);

        let request = self.request(Method::POST, &url).form(params.as_map());
        let response = self.send(request).await?;
        let status = response.status();

        if status.as_u16() == 404 {
            return Err(ClientError::NotFound(job.to_string()));
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::TriggerRejected(format!(
                "status {}: {}",
                status.as_u16(),
                body.trim()
            )));
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);

        debug!("Trigger accepted with location {:?}", location);

        Ok(TriggerAck::from_location(location.as_deref()))
    }

    /// Get the state of a queue item
    pub async fn queue_item(&self, queue: QueueRef) -> Result<QueueItem> {
        let url = format!("{}/queue/item/{}/api/json", self.base_url, queue.0);
        let response = self.send(self.request(Method::GET, &url)).await?;

        let item: QueueItemJson = self.handle_response(response).await?;
        Ok(item.into())
    }
}
