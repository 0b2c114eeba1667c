//! Abstract CI client
//!
//! The operations the build orchestrator needs from a CI server, as a
//! trait so the orchestration logic can run against an in-memory fake.

use async_trait::async_trait;
use envforge_core::domain::build::BuildParameters;
use std::collections::BTreeMap;

use crate::JenkinsClient;
use crate::error::Result;
use crate::types::{BuildInfo, BuildSummary, JobInfo, JobPath, QueueItem, QueueRef, TriggerAck};

/// Operations consumed from the CI server
#[async_trait]
pub trait CiClient: Send + Sync {
    /// Checks that the server is reachable and accepts our credentials
    async fn ping(&self) -> Result<()>;

    /// Fetches job metadata; fails with a not-found error for unknown jobs
    async fn job_info(&self, job: &JobPath) -> Result<JobInfo>;

    /// Submits a parameterized build
    async fn trigger_build(&self, job: &JobPath, params: &BuildParameters) -> Result<TriggerAck>;

    /// Follows a queue reference towards a build number
    async fn queue_item(&self, queue: QueueRef) -> Result<QueueItem>;

    /// Current status of a build
    async fn build_status(&self, job: &JobPath, number: u64) -> Result<BuildInfo>;

    /// Full console text of a build
    async fn console_text(&self, job: &JobPath, number: u64) -> Result<String>;

    /// Most recent builds, newest first, at most `limit` of them
    async fn recent_builds(&self, job: &JobPath, limit: usize) -> Result<Vec<BuildSummary>>;

    /// Parameters a build was started with
    async fn build_parameters(&self, job: &JobPath, number: u64)
    -> Result<BTreeMap<String, String>>;
}

#[async_trait]
impl CiClient for JenkinsClient {
    async fn ping(&self) -> Result<()> {
        JenkinsClient::ping(self).await
    }

    async fn job_info(&self, job: &JobPath) -> Result<JobInfo> {
        JenkinsClient::job_info(self, job).await
    }

    async fn trigger_build(&self, job: &JobPath, params: &BuildParameters) -> Result<TriggerAck> {
        JenkinsClient::trigger_build(self, job, params).await
    }

    async fn queue_item(&self, queue: QueueRef) -> Result<QueueItem> {
        JenkinsClient::queue_item(self, queue).await
    }

    async fn build_status(&self, job: &JobPath, number: u64) -> Result<BuildInfo> {
        JenkinsClient::build_status(self, job, number).await
    }

    async fn console_text(&self, job: &JobPath, number: u64) -> Result<String> {
        JenkinsClient::console_text(self, job, number).await
    }

    async fn recent_builds(&self, job: &JobPath, limit: usize) -> Result<Vec<BuildSummary>> {
        JenkinsClient::recent_builds(self, job, limit).await
    }

    async fn build_parameters(
        &self,
        job: &JobPath,
        number: u64,
    ) -> Result<BTreeMap<String, String>> {
        JenkinsClient::build_parameters(self, job, number).await
    }
}
