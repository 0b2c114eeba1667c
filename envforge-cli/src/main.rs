//! Envforge CLI
//!
//! Command-line interface for provisioning ephemeral environments through
//! a CI job.

mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use commands::{Commands, handle_command};
use config::CiArgs;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "envforge")]
#[command(about = "Ephemeral environment provisioning", long_about = None)]
struct Cli {
    #[command(flatten)]
    ci: CiArgs,

    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr so --json output stays parseable
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "envforge_cli=info,envforge_pipeline=info,envforge_client=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    handle_command(cli.command, &cli.ci).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_extract_requires_source() {
        assert!(Cli::try_parse_from(["envforge", "extract"]).is_err());
        assert!(Cli::try_parse_from(["envforge", "extract", "console.txt"]).is_ok());
        assert!(Cli::try_parse_from(["envforge", "extract", "--build", "12"]).is_ok());
        assert!(
            Cli::try_parse_from(["envforge", "extract", "console.txt", "--build", "12"]).is_err()
        );
    }

    #[test]
    fn test_global_ci_flags_after_subcommand() {
        let cli =
            Cli::try_parse_from(["envforge", "builds", "--limit", "3", "--job", "A/B"]).unwrap();
        assert_eq!(cli.ci.job, "A/B");
        assert!(matches!(cli.command, Commands::Builds { limit: 3 }));
    }
}
