//! Extract command handler
//!
//! Parses a build console, from a file or straight from the CI server, and
//! shows what a provisioning run would see.

use anyhow::{Context, Result, bail};
use clap::Args;
use colored::*;
use std::path::PathBuf;

use envforge_core::console::{ConsoleExtractor, LabelExtractor};
use envforge_core::domain::environment::ProvisionedEnvironment;

use super::mask_secrets;
use crate::config::CiArgs;

#[derive(Args)]
pub struct ExtractArgs {
    /// Console text file to parse
    #[arg(conflicts_with = "build", required_unless_present = "build")]
    file: Option<PathBuf>,

    /// Fetch the console of this build instead of reading a file
    #[arg(long)]
    build: Option<u64>,

    /// Print the environment as JSON
    #[arg(long)]
    json: bool,

    /// Show passwords instead of masking them
    #[arg(long)]
    show_secrets: bool,
}

/// Handle the extract command
pub async fn handle_extract_command(args: ExtractArgs, ci: &CiArgs) -> Result<()> {
    let console = match (&args.file, args.build) {
        (Some(path), _) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read console file {}", path.display()))?,
        (None, Some(number)) => {
            let client = ci.client()?;
            let job = ci.job_path()?;
            client
                .console_text(&job, number)
                .await
                .with_context(|| format!("Failed to fetch console of {} #{}", job, number))?
        }
        (None, None) => bail!("either a console file or --build is required"),
    };

    let mut environment = LabelExtractor::new().extract(&console);
    if !args.show_secrets {
        mask_secrets(&mut environment);
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&environment)?);
    } else {
        print_environment(&environment);
    }

    Ok(())
}

/// Print the facts extracted from a console
pub(super) fn print_environment(environment: &ProvisionedEnvironment) {
    if environment.endpoints.is_empty() {
        println!("  Endpoints:  {}", "none".dimmed());
    } else {
        println!("  Endpoints:");
        for (kind, value) in &environment.endpoints {
            println!("    {} {}", format!("{:<11}", kind.to_string()).cyan(), value);
        }
    }

    match &environment.database {
        Some(credentials) => println!(
            "  Database:   {} / {}",
            credentials.user,
            credentials.password.dimmed()
        ),
        None => println!("  Database:   {}", "no credentials".yellow()),
    }

    if environment.candidate_hosts.is_empty() {
        println!("  Hosts:      {}", "none".yellow());
    } else {
        let hosts: Vec<String> = environment
            .candidate_hosts
            .iter()
            .map(|host| host.to_string())
            .collect();
        println!("  Hosts:      {}", hosts.join(", "));
    }

    if !environment.instance_private_ips.is_empty() {
        let ips: Vec<String> = environment
            .instance_private_ips
            .iter()
            .map(|ip| ip.to_string())
            .collect();
        println!("  Instances:  {}", ips.join(", ").dimmed());
    }

    if let Some(host) = &environment.postgres.host {
        println!("  Postgres:   {}", host);
    }

    if !environment.is_database_ready() {
        println!(
            "{}",
            "⚠ Not enough information to reach the database".yellow()
        );
    }
}
