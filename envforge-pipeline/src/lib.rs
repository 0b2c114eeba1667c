//! Envforge Pipeline
//!
//! The provisioning control flow: reuse or trigger a CI build, wait for it,
//! mine its console text, find the database host behind the jump host and
//! reconcile one record into it.
//!
//! Architecture:
//! - Configuration: every interval, timeout and bound of a run
//! - Orchestrator: build reuse policy and completion polling
//! - Tunnels: SSH port forwards with guaranteed cleanup
//! - Database: connections and record statements through a tunnel
//! - Resolver: candidate host probing
//! - Reconciler: transactional upsert
//! - Pipeline: the end-to-end run

pub mod config;
pub mod database;
pub mod error;
pub mod orchestrator;
pub mod pipeline;
pub mod reconciler;
pub mod resolver;
pub mod tunnel;

#[cfg(test)]
mod testing;

pub use config::Config;
pub use error::{PipelineError, Result};
pub use orchestrator::{BuildOrchestrator, BuildOrigin, FinishedBuild};
pub use pipeline::{Collaborators, ProvisionReport, Provisioner};
pub use reconciler::{ReconcileAction, ReconcileOutcome, Reconciler};
