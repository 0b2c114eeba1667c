//! Provision command handler
//!
//! Runs the full pipeline: find or trigger a build for the requested
//! parameters, read its console, locate the database and reconcile the
//! record.

use anyhow::{Context, Result};
use clap::Args;
use colored::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use envforge_client::CiClient;
use envforge_core::domain::build::BuildParameters;
use envforge_core::domain::record::UpsertRecord;
use envforge_core::params::{ParameterSource, ParamsFile, StaticParameters};
use envforge_pipeline::{Collaborators, ProvisionReport, Provisioner, Reconciler};

use super::builds::colorize_status;
use super::extract::print_environment;
use super::mask_secrets;
use crate::config::{BuildArgs, CiArgs, DatabaseArgs, TunnelArgs, pipeline_config};

#[derive(Args)]
pub struct ProvisionArgs {
    /// Parameter file in the operator format
    #[arg(long, env = "ENVFORGE_PARAMS")]
    params: Option<PathBuf>,

    /// Add or override a build parameter (KEY=value)
    #[arg(short, long, value_parser = parse_key_val)]
    param: Vec<(String, String)>,

    /// JSON description of the row to reconcile
    #[arg(long, env = "ENVFORGE_RECORD")]
    record: PathBuf,

    /// Print the report as JSON
    #[arg(long)]
    json: bool,

    #[command(flatten)]
    build: BuildArgs,

    #[command(flatten)]
    tunnel: TunnelArgs,

    #[command(flatten)]
    database: DatabaseArgs,
}

/// Parse a single key=value pair
fn parse_key_val(s: &str) -> Result<(String, String)> {
    let pos = s
        .find('=')
        .ok_or_else(|| anyhow::anyhow!("invalid KEY=value: no `=` found in `{}`", s))?;
    Ok((s[..pos].to_string(), s[pos + 1..].to_string()))
}

/// Handle the provision command
pub async fn handle_provision_command(args: ProvisionArgs, ci: &CiArgs) -> Result<()> {
    let config = pipeline_config(ci, &args.build, &args.tunnel, &args.database)?;
    let job = ci.job_path()?;

    let params = load_parameters(args.params.as_deref(), args.param)?;

    let record = UpsertRecord::from_file(&args.record)
        .with_context(|| format!("Failed to load record {}", args.record.display()))?;
    let reconciler = Reconciler::new(record).context("Invalid record")?;

    let client: Arc<dyn CiClient> = Arc::new(ci.client()?);
    let provisioner = Provisioner::new(&config, job, Collaborators::standard(&config, client));

    let mut report = provisioner.run(&params, &reconciler).await?;
    mask_secrets(&mut report.environment);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

/// Reads parameters from the file when given, otherwise from the flags alone
fn load_parameters(
    file: Option<&Path>,
    overrides: Vec<(String, String)>,
) -> Result<BuildParameters> {
    let source: Box<dyn ParameterSource> = match file {
        Some(path) => Box::new(ParamsFile::new(path).with_overrides(overrides)),
        None => Box::new(StaticParameters::new(overrides.into_iter().collect())),
    };

    source
        .parameters()
        .context("Failed to load build parameters")
}

fn print_report(report: &ProvisionReport) {
    println!(
        "{}",
        format!(
            "✓ Environment '{}' provisioned",
            report.build.env_name
        )
        .green()
        .bold()
    );
    println!("  Run:        {}", report.run_id.to_string().dimmed());
    println!(
        "  Build:      #{} ({}, {})",
        report.build.number,
        report.origin,
        colorize_status(report.build.status)
    );

    print_environment(&report.environment);

    println!(
        "  Target:     {} schema {}",
        report.target.host.to_string().cyan(),
        report.target.schema
    );
    println!("  Record:     {}", report.outcome.action.to_string().green());

    match &report.outcome.verified {
        Some(row) => {
            for (column, value) in row {
                println!(
                    "    {} {}",
                    format!("{:<14}", column).dimmed(),
                    value.as_deref().unwrap_or("NULL")
                );
            }
        }
        None => println!("    {}", "read-back unavailable".yellow()),
    }
}
