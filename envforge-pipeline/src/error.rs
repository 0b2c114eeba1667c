//! Pipeline error types
//!
//! Every stage returns a typed failure reason. The top-level flow stops at
//! the first one and reports it; cleanup failures never show up here.

use std::time::Duration;
use thiserror::Error;

use envforge_client::ClientError;
use envforge_core::params::ParameterError;

use crate::database::DbError;
use crate::reconciler::ReconcileError;
use crate::tunnel::TunnelError;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

/// Why a provisioning run stopped
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("CI server unreachable (are you connected to the VPN?): {0}")]
    CiUnreachable(#[source] ClientError),

    #[error("CI server rejected the credentials: {0}")]
    CiUnauthorized(#[source] ClientError),

    #[error("CI job '{0}' not found")]
    JobNotFound(String),

    #[error("CI refused to trigger job '{job}': {source}")]
    TriggerRejected {
        job: String,
        #[source]
        source: ClientError,
    },

    #[error("Queue item for job '{0}' was cancelled before it started")]
    QueueCancelled(String),

    #[error("Build #{number} still running after {waited:?}")]
    BuildTimedOut { number: u64, waited: Duration },

    #[error("CI request failed: {0}")]
    Ci(#[source] ClientError),

    #[error("Invalid build parameters: {0}")]
    Parameters(#[from] ParameterError),

    #[error("Build #{0} console has no database credentials")]
    MissingCredentials(u64),

    #[error("Build #{0} console lists no candidate database hosts")]
    NoCandidateHosts(u64),

    #[error("No candidate host exposes schema '{schema}' ({tried} tried)")]
    SchemaNotFound { schema: String, tried: usize },

    #[error("Tunnel failure: {0}")]
    Tunnel(#[from] TunnelError),

    #[error("Database failure: {0}")]
    Database(#[from] DbError),

    #[error("Reconcile failed: {0}")]
    Reconcile(#[from] ReconcileError),
}

impl PipelineError {
    /// Classifies a CI client failure that has no more specific meaning
    pub fn from_ci(err: ClientError) -> Self {
        if err.is_unreachable() {
            PipelineError::CiUnreachable(err)
        } else if err.is_unauthorized() {
            PipelineError::CiUnauthorized(err)
        } else {
            PipelineError::Ci(err)
        }
    }
}
