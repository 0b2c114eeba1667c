//! Build orchestrator
//!
//! Produces the final console text of a build that ran with the requested
//! `ENV_NAME`. A matching build from recent history is reused when possible;
//! otherwise a new one is triggered, followed through the queue, and polled
//! until it reaches a terminal state or the configured wait runs out.

use serde::Serialize;
use std::sync::Arc;
use tokio::time::{self, Instant};
use tracing::{debug, info, warn};

use envforge_client::{CiClient, ClientError, JobPath, QueueItem, QueueRef, TriggerAck};
use envforge_core::domain::build::{BuildHandle, BuildParameters, BuildStatus, ENV_NAME};

use crate::config::CiSettings;
use crate::error::{PipelineError, Result};

/// How the build we ended up with was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildOrigin {
    /// The operator-pinned build number had succeeded
    Pinned,
    /// A matching build had already succeeded
    Reused,
    /// A matching build was still running and we waited for it
    Attached,
    /// No match; we started a new build
    Triggered,
}

impl std::fmt::Display for BuildOrigin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildOrigin::Pinned => write!(f, "pinned"),
            BuildOrigin::Reused => write!(f, "reused"),
            BuildOrigin::Attached => write!(f, "attached"),
            BuildOrigin::Triggered => write!(f, "triggered"),
        }
    }
}

/// A terminal build and its console text
#[derive(Debug, Clone)]
pub struct FinishedBuild {
    pub handle: BuildHandle,
    pub origin: BuildOrigin,
    pub console: String,
}

/// Outcome of searching build history
#[derive(Debug, Clone)]
pub enum Reuse {
    Complete(BuildHandle),
    InProgress(BuildHandle),
    None,
}

/// Decides between reusing and triggering, and waits for completion
pub struct BuildOrchestrator {
    client: Arc<dyn CiClient>,
    job: JobPath,
    settings: CiSettings,
}

impl BuildOrchestrator {
    pub fn new(client: Arc<dyn CiClient>, job: JobPath, settings: CiSettings) -> Self {
        Self {
            client,
            job,
            settings,
        }
    }

    pub fn job(&self) -> &JobPath {
        &self.job
    }

    /// Returns the console text of a terminal build run with `params`
    pub async fn ensure_build(&self, params: &BuildParameters) -> Result<FinishedBuild> {
        let env_name = params.env_name();

        self.preflight().await?;

        if let Some(number) = self.settings.pinned_build {
            if let Some(handle) = self.check_pinned(number, env_name).await? {
                return self.finish(handle, BuildOrigin::Pinned).await;
            }
        }

        match self.find_reusable(env_name).await? {
            Reuse::Complete(handle) => {
                info!(
                    "Reusing build #{} which already succeeded for ENV_NAME={}",
                    handle.number, env_name
                );
                self.finish(handle, BuildOrigin::Reused).await
            }
            Reuse::InProgress(mut handle) => {
                info!(
                    "Attaching to build #{} still running for ENV_NAME={}",
                    handle.number, env_name
                );
                self.wait_for_completion(&mut handle).await?;
                self.finish(handle, BuildOrigin::Attached).await
            }
            Reuse::None => {
                info!("No reusable build for ENV_NAME={}, triggering a new one", env_name);
                let mut handle = self.trigger(params).await?;
                self.wait_for_completion(&mut handle).await?;
                self.finish(handle, BuildOrigin::Triggered).await
            }
        }
    }

    /// Checks the server is reachable and the job exists
    pub async fn preflight(&self) -> Result<()> {
        self.client.ping().await.map_err(PipelineError::from_ci)?;

        match self.client.job_info(&self.job).await {
            Ok(info) => {
                debug!(
                    "Job '{}' found (last build: {:?})",
                    self.job, info.last_build
                );
                Ok(())
            }
            Err(e) if e.is_not_found() => Err(PipelineError::JobNotFound(self.job.to_string())),
            Err(e) => Err(PipelineError::from_ci(e)),
        }
    }

    /// Looks through recent history for a build with the same `ENV_NAME`
    ///
    /// Newest builds are checked first and the first usable match wins.
    /// Failed matches are skipped.
    pub async fn find_reusable(&self, env_name: &str) -> Result<Reuse> {
        let mut builds = self
            .client
            .recent_builds(&self.job, self.settings.history_depth)
            .await
            .map_err(PipelineError::from_ci)?;

        builds.sort_by(|a, b| b.number.cmp(&a.number));
        builds.truncate(self.settings.history_depth);

        debug!("Inspecting {} recent build(s) of {}", builds.len(), self.job);

        for build in builds {
            let params = match self.client.build_parameters(&self.job, build.number).await {
                Ok(params) => params,
                Err(e) if e.is_not_found() => {
                    debug!("Build #{} disappeared, skipping", build.number);
                    continue;
                }
                Err(e) => return Err(PipelineError::from_ci(e)),
            };

            if params.get(ENV_NAME).map(String::as_str) != Some(env_name) {
                continue;
            }

            let info = self
                .client
                .build_status(&self.job, build.number)
                .await
                .map_err(PipelineError::from_ci)?;
            let handle = BuildHandle::new(build.number, info.status, env_name);

            match info.status {
                BuildStatus::Succeeded => return Ok(Reuse::Complete(handle)),
                BuildStatus::Running | BuildStatus::Queued => return Ok(Reuse::InProgress(handle)),
                BuildStatus::Failed => {
                    debug!(
                        "Build #{} matched ENV_NAME={} but failed, ignoring",
                        build.number, env_name
                    );
                }
            }
        }

        Ok(Reuse::None)
    }

    /// Triggers a new build and resolves its number
    pub async fn trigger(&self, params: &BuildParameters) -> Result<BuildHandle> {
        let rendered: Vec<String> = params
            .iter()
            .map(|(name, value)| format!("{}={}", name, value))
            .collect();
        debug!("Trigger parameters: {}", rendered.join(", "));

        let ack = self
            .client
            .trigger_build(&self.job, params)
            .await
            .map_err(|e| self.trigger_error(e))?;

        let number = match ack {
            TriggerAck::Started(number) => number,
            TriggerAck::Queued(queue) => self.resolve_queue(queue).await?,
            TriggerAck::Unreferenced => {
                warn!("Trigger returned no queue reference, using the job's last build");
                self.last_build_number().await?
            }
        };

        info!("Build #{} started for ENV_NAME={}", number, params.env_name());

        Ok(BuildHandle::new(number, BuildStatus::Queued, params.env_name()))
    }

    /// Polls the build until it is terminal or `max_wait` has elapsed
    pub async fn wait_for_completion(&self, handle: &mut BuildHandle) -> Result<()> {
        let started = Instant::now();

        loop {
            match self.client.build_status(&self.job, handle.number).await {
                Ok(info) => handle.observe(info.status),
                // A build can briefly 404 right after leaving the queue
                Err(e) if e.is_not_found() => handle.observe(BuildStatus::Queued),
                Err(e) if e.is_server_error() => warn!(
                    "Status poll of build #{} failed, retrying: {}",
                    handle.number, e
                ),
                Err(e) => return Err(PipelineError::from_ci(e)),
            }

            if handle.status.is_terminal() {
                info!("Build #{} completed: {}", handle.number, handle.status);
                return Ok(());
            }

            let waited = started.elapsed();
            if waited >= self.settings.max_wait {
                return Err(PipelineError::BuildTimedOut {
                    number: handle.number,
                    waited,
                });
            }

            debug!(
                "Waiting for build #{} to complete ({}, {:?} elapsed)",
                handle.number, handle.status, waited
            );

            let remaining = self.settings.max_wait - waited;
            time::sleep(self.settings.poll_interval.min(remaining)).await;
        }
    }

    /// Fetches the console text of a build
    pub async fn console_text(&self, number: u64) -> Result<String> {
        self.client
            .console_text(&self.job, number)
            .await
            .map_err(PipelineError::from_ci)
    }

    async fn finish(&self, handle: BuildHandle, origin: BuildOrigin) -> Result<FinishedBuild> {
        let console = self.console_text(handle.number).await?;
        debug!(
            "Fetched {} bytes of console text for build #{}",
            console.len(),
            handle.number
        );

        Ok(FinishedBuild {
            handle,
            origin,
            console,
        })
    }

    /// Uses the pinned build when it exists and succeeded
    async fn check_pinned(&self, number: u64, env_name: &str) -> Result<Option<BuildHandle>> {
        let info = match self.client.build_status(&self.job, number).await {
            Ok(info) => info,
            Err(e) if e.is_not_found() => {
                info!("Pinned build #{} not found, searching history", number);
                return Ok(None);
            }
            Err(e) => return Err(PipelineError::from_ci(e)),
        };

        if info.status != BuildStatus::Succeeded {
            info!(
                "Pinned build #{} is {}, searching history instead",
                number, info.status
            );
            return Ok(None);
        }

        let pinned_env = self
            .client
            .build_parameters(&self.job, number)
            .await
            .map_err(PipelineError::from_ci)?
            .remove(ENV_NAME)
            .unwrap_or_default();

        if pinned_env != env_name {
            warn!(
                "Pinned build #{} ran with ENV_NAME={}, not {}; using it anyway",
                number, pinned_env, env_name
            );
        }

        info!("Using pinned build #{}", number);
        Ok(Some(BuildHandle::new(number, info.status, pinned_env)))
    }

    /// Follows a queue item to its build number, within bounded attempts
    async fn resolve_queue(&self, queue: QueueRef) -> Result<u64> {
        let attempts = self.settings.queue_attempts;

        for attempt in 1..=attempts {
            match self.client.queue_item(queue).await {
                Ok(QueueItem {
                    cancelled: true, ..
                }) => return Err(PipelineError::QueueCancelled(self.job.to_string())),
                Ok(QueueItem {
                    build_number: Some(number),
                    ..
                }) => {
                    debug!("{} resolved to build #{}", queue, number);
                    return Ok(number);
                }
                Ok(item) => debug!(
                    "{} still waiting (attempt {}/{}): {}",
                    queue,
                    attempt,
                    attempts,
                    item.reason.as_deref().unwrap_or("no reason given")
                ),
                Err(e) if e.is_unreachable() => return Err(PipelineError::CiUnreachable(e)),
                Err(e) => warn!(
                    "Failed to poll {} (attempt {}/{}): {}",
                    queue, attempt, attempts, e
                ),
            }

            if attempt < attempts {
                time::sleep(self.settings.queue_poll_interval).await;
            }
        }

        // Can pick up an unrelated build when others trigger the job concurrently
        warn!(
            "{} did not resolve after {} attempts, falling back to the job's last build",
            queue, attempts
        );
        self.last_build_number().await
    }

    async fn last_build_number(&self) -> Result<u64> {
        let info = self
            .client
            .job_info(&self.job)
            .await
            .map_err(PipelineError::from_ci)?;

        info.last_build.ok_or_else(|| {
            PipelineError::Ci(ClientError::NotFound(format!(
                "{} has no last build",
                self.job
            )))
        })
    }

    fn trigger_error(&self, err: ClientError) -> PipelineError {
        if err.is_unreachable() || err.is_unauthorized() {
            PipelineError::from_ci(err)
        } else if err.is_not_found() {
            PipelineError::JobNotFound(self.job.to_string())
        } else {
            PipelineError::TriggerRejected {
                job: self.job.to_string(),
                source: err,
            }
        }
    }
}
