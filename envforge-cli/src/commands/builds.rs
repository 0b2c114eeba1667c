//! Builds command handler
//!
//! Lists the job's recent builds together with the environment each one
//! was started for.

use anyhow::{Context, Result};
use colored::*;
use tracing::debug;

use envforge_core::domain::build::{BuildStatus, ENV_NAME};

use crate::config::CiArgs;

/// Handle the builds command
pub async fn handle_builds_command(limit: usize, ci: &CiArgs) -> Result<()> {
    let client = ci.client()?;
    let job = ci.job_path()?;

    let builds = client
        .recent_builds(&job, limit)
        .await
        .with_context(|| format!("Failed to list builds of {}", job))?;

    if builds.is_empty() {
        println!("{}", format!("No builds found for {}.", job).yellow());
        return Ok(());
    }

    println!(
        "{}",
        format!("Last {} build(s) of {}:", builds.len(), job).bold()
    );
    println!();

    for build in builds {
        let env_name = match client.build_parameters(&job, build.number).await {
            Ok(params) => params
                .get(ENV_NAME)
                .cloned()
                .unwrap_or_else(|| "-".to_string()),
            Err(e) => {
                debug!("Parameters of #{} unavailable: {}", build.number, e);
                "?".to_string()
            }
        };

        let status = match client.build_status(&job, build.number).await {
            Ok(info) => colorize_status(info.status),
            Err(_) => "unknown".dimmed(),
        };

        println!(
            "  {} #{:<6} {}={:<4} {}",
            "▸".cyan(),
            build.number,
            ENV_NAME.dimmed(),
            env_name,
            status
        );
    }

    Ok(())
}

/// Colorize a build status for display
pub(super) fn colorize_status(status: BuildStatus) -> ColoredString {
    let text = status.to_string();
    match status {
        BuildStatus::Queued => text.yellow(),
        BuildStatus::Running => text.cyan(),
        BuildStatus::Succeeded => text.green(),
        BuildStatus::Failed => text.red(),
    }
}
