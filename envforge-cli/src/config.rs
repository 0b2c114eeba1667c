//! Configuration module
//!
//! Command-line flags, each with an environment variable fallback, and
//! their translation into the pipeline configuration.

use anyhow::{Context, Result};
use clap::Args;
use std::path::PathBuf;
use std::time::Duration;

use envforge_client::{JenkinsClient, JobPath};
use envforge_pipeline::config::{CiSettings, Config, DatabaseSettings, TunnelSettings};

/// How to reach the CI server
#[derive(Args, Clone)]
pub struct CiArgs {
    /// CI server URL
    #[arg(
        long,
        env = "ENVFORGE_CI_URL",
        default_value = "http://localhost:8080",
        global = true
    )]
    pub ci_url: String,

    /// CI user for basic authentication
    #[arg(long, env = "ENVFORGE_CI_USER", default_value = "", global = true)]
    pub ci_user: String,

    /// CI API token
    #[arg(
        long,
        env = "ENVFORGE_CI_TOKEN",
        default_value = "",
        hide_env_values = true,
        global = true
    )]
    pub ci_token: String,

    /// Job path, folders separated by '/'
    #[arg(
        long,
        env = "ENVFORGE_JOB",
        default_value = "Environments/CreateClusterNew",
        global = true
    )]
    pub job: String,

    /// HTTP request timeout in seconds
    #[arg(long, env = "ENVFORGE_REQUEST_TIMEOUT", default_value_t = 30, global = true)]
    pub request_timeout: u64,
}

impl CiArgs {
    pub fn settings(&self) -> CiSettings {
        let mut settings = CiSettings::new(self.ci_url.clone(), self.job.clone());
        settings.user = self.ci_user.clone();
        settings.token = self.ci_token.clone();
        settings.request_timeout = Duration::from_secs(self.request_timeout);
        settings
    }

    pub fn job_path(&self) -> Result<JobPath> {
        JobPath::parse(&self.job).with_context(|| format!("Invalid job path '{}'", self.job))
    }

    /// Builds an authenticated client with the request timeout applied
    pub fn client(&self) -> Result<JenkinsClient> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(self.request_timeout))
            .build()
            .context("Failed to build HTTP client")?;

        let client = JenkinsClient::with_client(&self.ci_url, http);
        if self.ci_user.is_empty() {
            Ok(client)
        } else {
            Ok(client.with_credentials(&self.ci_user, &self.ci_token))
        }
    }
}

/// Build reuse and polling bounds
#[derive(Args, Debug, Clone)]
pub struct BuildArgs {
    /// Recent builds inspected when looking for a reusable one
    #[arg(long, env = "ENVFORGE_HISTORY_DEPTH", default_value_t = 10)]
    pub history_depth: usize,

    /// Seconds between build status polls
    #[arg(long, env = "ENVFORGE_POLL_INTERVAL", default_value_t = 10)]
    pub poll_interval: u64,

    /// Minutes to wait for a build before giving up
    #[arg(long, env = "ENVFORGE_MAX_WAIT", default_value_t = 90)]
    pub max_wait: u64,

    /// Seconds between queue polls after triggering
    #[arg(long, env = "ENVFORGE_QUEUE_POLL_INTERVAL", default_value_t = 2)]
    pub queue_poll_interval: u64,

    /// Queue polls before falling back to the job's last build
    #[arg(long, env = "ENVFORGE_QUEUE_ATTEMPTS", default_value_t = 15)]
    pub queue_attempts: u32,

    /// Build number to use if it succeeded, before searching history
    #[arg(long, env = "ENVFORGE_BUILD")]
    pub build: Option<u64>,
}

/// SSH jump host used for tunnels
#[derive(Args, Debug, Clone)]
pub struct TunnelArgs {
    /// Jump host address
    #[arg(long, env = "ENVFORGE_JUMP_HOST")]
    pub jump_host: String,

    /// Jump host SSH port
    #[arg(long, env = "ENVFORGE_JUMP_PORT", default_value_t = 22)]
    pub jump_port: u16,

    /// Jump host user
    #[arg(long, env = "ENVFORGE_JUMP_USER")]
    pub jump_user: String,

    /// Private key for the jump host
    #[arg(long, env = "ENVFORGE_SSH_KEY", default_value = "~/.ssh/id_rsa")]
    pub ssh_key: PathBuf,

    /// SSH client binary
    #[arg(long, env = "ENVFORGE_SSH_BINARY", default_value = "ssh")]
    pub ssh_binary: String,

    /// Seconds to let a tunnel settle before checking it
    #[arg(long, env = "ENVFORGE_TUNNEL_SETTLE", default_value_t = 5)]
    pub tunnel_settle: u64,

    /// SSH connect timeout in seconds
    #[arg(long, env = "ENVFORGE_SSH_TIMEOUT", default_value_t = 10)]
    pub ssh_timeout: u64,

    /// Do not kill leftover tunnels for the same forward
    #[arg(long)]
    pub no_reap: bool,
}

/// Target database
#[derive(Args, Debug, Clone)]
pub struct DatabaseArgs {
    /// Schema that identifies the right database server
    #[arg(long, env = "ENVFORGE_SCHEMA")]
    pub schema: String,

    /// Database port on the candidate hosts
    #[arg(long, env = "ENVFORGE_DB_PORT", default_value_t = 3306)]
    pub db_port: u16,

    /// Database connect timeout in seconds
    #[arg(long, env = "ENVFORGE_DB_TIMEOUT", default_value_t = 10)]
    pub db_timeout: u64,
}

/// Assembles and validates the pipeline configuration
pub fn pipeline_config(
    ci: &CiArgs,
    build: &BuildArgs,
    tunnel: &TunnelArgs,
    database: &DatabaseArgs,
) -> Result<Config> {
    let mut ci_settings = ci.settings();
    ci_settings.history_depth = build.history_depth;
    ci_settings.poll_interval = Duration::from_secs(build.poll_interval);
    ci_settings.max_wait = Duration::from_secs(build.max_wait * 60);
    ci_settings.queue_poll_interval = Duration::from_secs(build.queue_poll_interval);
    ci_settings.queue_attempts = build.queue_attempts;
    ci_settings.pinned_build = build.build;

    let config = Config {
        ci: ci_settings,
        tunnel: TunnelSettings {
            ssh_binary: tunnel.ssh_binary.clone(),
            jump_host: tunnel.jump_host.clone(),
            jump_port: tunnel.jump_port,
            jump_user: tunnel.jump_user.clone(),
            key_path: tunnel.ssh_key.clone(),
            settle: Duration::from_secs(tunnel.tunnel_settle),
            connect_timeout: Duration::from_secs(tunnel.ssh_timeout),
            reap_stale: !tunnel.no_reap,
        },
        database: DatabaseSettings {
            schema: database.schema.clone(),
            remote_port: database.db_port,
            connect_timeout: Duration::from_secs(database.db_timeout),
        },
    };

    config.validate().context("Invalid configuration")?;
    Ok(config)
}
