//! Job and build API endpoints

use reqwest::Method;
use std::collections::BTreeMap;

use crate::JenkinsClient;
use crate::error::Result;
use crate::types::{BuildInfo, BuildSummary, JobInfo, JobPath};
use crate::wire::{BuildActionsJson, BuildHistoryJson, BuildJson, JobJson};

impl JenkinsClient {
    // =============================================================================
    // Server & Job
    // =============================================================================

    /// Check that the server answers and accepts our credentials
    pub async fn ping(&self) -> Result<()> {
        let url = format!("{}/api/json", self.base_url);
        let request = self
            .request(Method::GET, &url)
            .query(&[("tree", "mode")]);
        let response = self.send(request).await?;

        self.check_status(response).await.map(|_| ())
    }

    /// Get job metadata, including the number of its last build
    pub async fn job_info(&self, job: &JobPath) -> Result<JobInfo> {
        let url = format!("{}/api/json", self.job_url(job));
        let request = self
            .request(Method::GET, &url)
            .query(&[("tree", "name,buildable,lastBuild[number,url]")]);
        let response = self.send(request).await?;

        let job: JobJson = self.handle_response(response).await?;
        Ok(job.into())
    }

    /// List the most recent builds of a job, newest first
    ///
    /// # Arguments
    /// * `job` - The job to inspect
    /// * `limit` - How many builds to return at most
    pub async fn recent_builds(&self, job: &JobPath, limit: usize) -> Result<Vec<BuildSummary>> {
        let url = format!("{}/api/json", self.job_url(job));
        let tree = format!("builds[number,url]{{0,{}}}", limit);
        let request = self.request(Method::GET, &url).query(&[("tree", tree)]);
        let response = self.send(request).await?;

        let history: BuildHistoryJson = self.handle_response(response).await?;
        let mut builds: Vec<BuildSummary> =
            history.builds.into_iter().map(Into::into).collect();

        builds.sort_by(|a, b| b.number.cmp(&a.number));
        builds.truncate(limit);
        Ok(builds)
    }

    // =============================================================================
    // Builds
    // =============================================================================

    /// Get the current status of a build
    pub async fn build_status(&self, job: &JobPath, number: u64) -> Result<BuildInfo> {
        let url = format!("{}/api/json", self.build_url(job, number));
        let request = self
            .request(Method::GET, &url)
            .query(&[("tree", "number,building,result,inProgress")]);
        let response = self.send(request).await?;

        let build: BuildJson = self.handle_response(response).await?;
        Ok(build.into())
    }

    /// Get the parameters a build was started with
    pub async fn build_parameters(
        &self,
        job: &JobPath,
        number: u64,
    ) -> Result<BTreeMap<String, String>> {
        let url = format!("{}/api/json", self.build_url(job, number));
        let request = self
            .request(Method::GET, &url)
            .query(&[("tree", "actions[parameters[name,value]]")]);
        let response = self.send(request).await?;

        let actions: BuildActionsJson = self.handle_response(response).await?;
        Ok(actions.into_parameters())
    }

    /// Get the full console text of a build
    pub async fn console_text(&self, job: &JobPath, number: u64) -> Result<String> {
        let url = format!("{}/consoleText", self.build_url(job, number));
        let response = self.send(self.request(Method::GET, &url)).await?;

        self.handle_text(response).await
    }
}
