//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod builds;
mod extract;
mod provision;

pub use extract::ExtractArgs;
pub use provision::ProvisionArgs;

use anyhow::Result;
use clap::Subcommand;

use envforge_core::domain::environment::ProvisionedEnvironment;

use crate::config::CiArgs;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Reuse or trigger a build, then reconcile the record into its database
    Provision(Box<ProvisionArgs>),
    /// Parse a build console into endpoints and credentials
    Extract(ExtractArgs),
    /// List recent builds with their ENV_NAME and status
    Builds {
        /// How many builds to show
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
pub async fn handle_command(command: Commands, ci: &CiArgs) -> Result<()> {
    match command {
        Commands::Provision(args) => provision::handle_provision_command(*args, ci).await,
        Commands::Extract(args) => extract::handle_extract_command(args, ci).await,
        Commands::Builds { limit } => builds::handle_builds_command(limit, ci).await,
    }
}

const MASK: &str = "********";

/// Replaces every password in the environment with a mask
pub(crate) fn mask_secrets(environment: &mut ProvisionedEnvironment) {
    if let Some(credentials) = environment.database.as_mut() {
        credentials.password = MASK.to_string();
    }
    if let Some(credentials) = environment.postgres.credentials.as_mut() {
        credentials.password = MASK.to_string();
    }
}
