//! End-to-end provisioning flow
//!
//! ParameterSource → BuildOrchestrator → ConsoleExtractor → HostResolver →
//! Reconciler. The first unrecoverable failure stops the run.

use serde::Serialize;
use std::sync::Arc;
use tracing::{Instrument, info, info_span, warn};
use uuid::Uuid;

use envforge_client::{CiClient, JobPath};
use envforge_core::console::{ConsoleExtractor, LabelExtractor};
use envforge_core::domain::build::{BuildHandle, BuildParameters, BuildStatus};
use envforge_core::domain::environment::{ProvisionedEnvironment, ResolvedTarget};

use crate::config::{Config, DatabaseSettings};
use crate::database::{DatabaseConnector, MySqlConnector};
use crate::error::{PipelineError, Result};
use crate::orchestrator::{BuildOrchestrator, BuildOrigin};
use crate::reconciler::{ReconcileOutcome, Reconciler};
use crate::resolver::HostResolver;
use crate::tunnel::{EphemeralPorts, PortAllocator, SshTunnelBroker, TunnelBroker, through_tunnel};

/// The pluggable parts of a provisioner
pub struct Collaborators {
    pub ci: Arc<dyn CiClient>,
    pub extractor: Arc<dyn ConsoleExtractor>,
    pub broker: Arc<dyn TunnelBroker>,
    pub ports: Arc<dyn PortAllocator>,
    pub connector: Arc<dyn DatabaseConnector>,
}

impl Collaborators {
    /// Label extraction, SSH tunnels, OS-assigned ports and MySQL
    pub fn standard(config: &Config, ci: Arc<dyn CiClient>) -> Self {
        Self {
            ci,
            extractor: Arc::new(LabelExtractor::new()),
            broker: Arc::new(SshTunnelBroker::new(config.tunnel.clone())),
            ports: Arc::new(EphemeralPorts),
            connector: Arc::new(MySqlConnector::new(config.database.connect_timeout)),
        }
    }
}

/// Summary of a successful run
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProvisionReport {
    pub run_id: Uuid,
    pub build: BuildHandle,
    pub origin: BuildOrigin,
    pub environment: ProvisionedEnvironment,
    pub target: ResolvedTarget,
    pub outcome: ReconcileOutcome,
}

/// Runs the whole pipeline for one set of build parameters
pub struct Provisioner {
    orchestrator: BuildOrchestrator,
    extractor: Arc<dyn ConsoleExtractor>,
    resolver: HostResolver,
    broker: Arc<dyn TunnelBroker>,
    ports: Arc<dyn PortAllocator>,
    connector: Arc<dyn DatabaseConnector>,
    database: DatabaseSettings,
}

impl Provisioner {
    pub fn new(config: &Config, job: JobPath, parts: Collaborators) -> Self {
        let resolver = HostResolver::new(
            parts.broker.clone(),
            parts.ports.clone(),
            parts.connector.clone(),
            config.database.remote_port,
        );

        Self {
            orchestrator: BuildOrchestrator::new(parts.ci, job, config.ci.clone()),
            extractor: parts.extractor,
            resolver,
            broker: parts.broker,
            ports: parts.ports,
            connector: parts.connector,
            database: config.database.clone(),
        }
    }

    pub async fn run(
        &self,
        params: &BuildParameters,
        reconciler: &Reconciler,
    ) -> Result<ProvisionReport> {
        let run_id = Uuid::new_v4();
        let span = info_span!("provision", %run_id, env_name = params.env_name());

        self.run_inner(run_id, params, reconciler)
            .instrument(span)
            .await
    }

    async fn run_inner(
        &self,
        run_id: Uuid,
        params: &BuildParameters,
        reconciler: &Reconciler,
    ) -> Result<ProvisionReport> {
        info!(
            "Provisioning ENV_NAME={} via {} ({} parameters)",
            params.env_name(),
            self.orchestrator.job(),
            params.len()
        );

        let finished = self.orchestrator.ensure_build(params).await?;
        let number = finished.handle.number;

        if finished.handle.status == BuildStatus::Failed {
            warn!("Build #{} failed, extracting what it printed anyway", number);
        }

        let environment = self.extractor.extract(&finished.console);
        info!(
            "Build #{} reported {} endpoint(s) and {} candidate host(s)",
            number,
            environment.endpoints.len(),
            environment.candidate_hosts.len()
        );

        let credentials = environment
            .database
            .clone()
            .ok_or(PipelineError::MissingCredentials(number))?;

        if environment.candidate_hosts.is_empty() {
            return Err(PipelineError::NoCandidateHosts(number));
        }

        let schema = &self.database.schema;
        let resolution = self
            .resolver
            .resolve(&environment.candidate_hosts, &credentials, schema)
            .await;

        let target = resolution
            .target
            .ok_or_else(|| PipelineError::SchemaNotFound {
                schema: schema.clone(),
                tried: resolution.tried,
            })?;

        let credentials = &credentials;
        let outcome = through_tunnel(
            self.broker.as_ref(),
            self.ports.as_ref(),
            target.host,
            self.database.remote_port,
            |addr| async move {
                let mut store = self
                    .connector
                    .open_store(addr, credentials, schema)
                    .await?;

                let outcome = reconciler.apply(store.as_mut()).await;

                if let Err(e) = store.close().await {
                    warn!("Failed to close database connection: {}", e);
                }

                Ok::<_, PipelineError>(outcome?)
            },
        )
        .await?;

        info!("Provisioning of ENV_NAME={} complete", params.env_name());

        Ok(ProvisionReport {
            run_id,
            build: finished.handle,
            origin: finished.origin,
            environment,
            target,
            outcome,
        })
    }
}
