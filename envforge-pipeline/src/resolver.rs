//! Host resolver
//!
//! Finds the candidate host that exposes the target schema. Candidates are
//! tried one at a time, each through its own tunnel, which is closed
//! before the next candidate is tried.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use tracing::{debug, info, warn};

use envforge_core::domain::environment::{DatabaseCredentials, ResolvedTarget};

use crate::database::DatabaseConnector;
use crate::error::PipelineError;
use crate::tunnel::{PortAllocator, TunnelBroker, through_tunnel};

/// Outcome of probing the candidates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub target: Option<ResolvedTarget>,
    /// How many candidates were tried
    pub tried: usize,
}

/// Checks candidate hosts for a schema
pub struct HostResolver {
    broker: Arc<dyn TunnelBroker>,
    ports: Arc<dyn PortAllocator>,
    connector: Arc<dyn DatabaseConnector>,
    remote_port: u16,
}

impl HostResolver {
    pub fn new(
        broker: Arc<dyn TunnelBroker>,
        ports: Arc<dyn PortAllocator>,
        connector: Arc<dyn DatabaseConnector>,
        remote_port: u16,
    ) -> Self {
        Self {
            broker,
            ports,
            connector,
            remote_port,
        }
    }

    /// Returns the first candidate, in ascending address order, listing `schema`
    ///
    /// A candidate that cannot be reached counts as a non-match. Not finding
    /// the schema anywhere is a normal outcome, not an error.
    pub async fn resolve(
        &self,
        candidates: &BTreeSet<Ipv4Addr>,
        credentials: &DatabaseCredentials,
        schema: &str,
    ) -> Resolution {
        let mut tried = 0;

        for &host in candidates {
            tried += 1;

            match self.check_host(host, credentials, schema).await {
                Ok(true) => {
                    info!("Schema '{}' found on {}", schema, host);
                    return Resolution {
                        target: Some(ResolvedTarget {
                            host,
                            schema: schema.to_string(),
                        }),
                        tried,
                    };
                }
                Ok(false) => debug!("{} does not expose schema '{}'", host, schema),
                Err(e) => warn!("Skipping candidate {}: {}", host, e),
            }
        }

        Resolution {
            target: None,
            tried,
        }
    }

    async fn check_host(
        &self,
        host: Ipv4Addr,
        credentials: &DatabaseCredentials,
        schema: &str,
    ) -> Result<bool, PipelineError> {
        through_tunnel(
            self.broker.as_ref(),
            self.ports.as_ref(),
            host,
            self.remote_port,
            |addr| async move {
                let schemas = self.connector.list_schemas(addr, credentials).await?;
                debug!("{} schemas: {}", host, schemas.join(", "));
                Ok::<_, PipelineError>(schemas.iter().any(|s| s == schema))
            },
        )
        .await
    }
}
