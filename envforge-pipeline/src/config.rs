//! Pipeline configuration
//!
//! Defines every tunable of a provisioning run: how to reach the CI server
//! and how long to wait on it, how to build tunnels through the jump host,
//! and which database schema to look for.

use std::path::PathBuf;
use std::time::Duration;

use envforge_client::JobPath;
use envforge_core::domain::record::is_valid_identifier;

/// Pipeline configuration
///
/// All timeouts and intervals are configurable so slow provisioning jobs
/// and slow networks can be accommodated without code changes.
#[derive(Debug, Clone)]
pub struct Config {
    pub ci: CiSettings,
    pub tunnel: TunnelSettings,
    pub database: DatabaseSettings,
}

/// How to reach the CI server and how patiently to wait on it
#[derive(Clone)]
pub struct CiSettings {
    /// CI base URL (e.g., "https://ci.example.com")
    pub url: String,

    /// User for basic authentication
    pub user: String,

    /// API token for basic authentication
    pub token: String,

    /// Slash-separated job path (e.g., "Environments/CreateClusterNew")
    pub job: String,

    /// How many recent builds to inspect when looking for a reusable one
    pub history_depth: usize,

    /// How often to poll a running build
    pub poll_interval: Duration,

    /// Upper bound on waiting for a build to finish
    pub max_wait: Duration,

    /// How often to poll the queue after triggering
    pub queue_poll_interval: Duration,

    /// How many queue polls before falling back to the job's last build
    pub queue_attempts: u32,

    /// A build number to try before searching history
    pub pinned_build: Option<u64>,

    /// Timeout applied to every HTTP request
    pub request_timeout: Duration,
}

/// How tunnels through the jump host are built
#[derive(Debug, Clone)]
pub struct TunnelSettings {
    /// SSH client binary
    pub ssh_binary: String,

    pub jump_host: String,

    pub jump_port: u16,

    pub jump_user: String,

    /// Private key used to authenticate against the jump host
    pub key_path: PathBuf,

    /// Time given to a fresh tunnel before checking it is still alive
    pub settle: Duration,

    /// SSH connect timeout
    pub connect_timeout: Duration,

    /// Kill leftover tunnels bound to the same forward before opening
    pub reap_stale: bool,
}

/// Which database to look for and how to connect to it
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    /// Schema that identifies the right database server
    pub schema: String,

    /// Database port on the candidate hosts
    pub remote_port: u16,

    /// Connect timeout for each database connection
    pub connect_timeout: Duration,
}

impl Config {
    /// Creates a new configuration with defaults
    pub fn new(ci_url: String, job: String, schema: String) -> Self {
        Self {
            ci: CiSettings::new(ci_url, job),
            tunnel: TunnelSettings::default(),
            database: DatabaseSettings::new(schema),
        }
    }

    /// The job path; only valid after `validate` succeeded
    pub fn job_path(&self) -> anyhow::Result<JobPath> {
        JobPath::parse(&self.ci.job)
            .ok_or_else(|| anyhow::anyhow!("job path '{}' is empty", self.ci.job))
    }

    /// Validates the configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.ci.url.starts_with("http://") && !self.ci.url.starts_with("https://") {
            anyhow::bail!("CI url must start with http:// or https://");
        }

        self.job_path()?;

        if self.ci.history_depth == 0 {
            anyhow::bail!("history_depth must be greater than 0");
        }

        if self.ci.poll_interval.is_zero() {
            anyhow::bail!("poll_interval must be greater than 0");
        }

        if self.ci.max_wait < self.ci.poll_interval {
            anyhow::bail!("max_wait must be at least one poll_interval");
        }

        if self.ci.queue_poll_interval.is_zero() || self.ci.queue_attempts == 0 {
            anyhow::bail!("queue polling needs a non-zero interval and attempt count");
        }

        if self.tunnel.jump_host.is_empty() {
            anyhow::bail!("jump_host cannot be empty");
        }

        if self.tunnel.jump_user.is_empty() {
            anyhow::bail!("jump_user cannot be empty");
        }

        if !is_valid_identifier(&self.database.schema) {
            anyhow::bail!(
                "schema '{}' must be a plain identifier",
                self.database.schema
            );
        }

        if self.database.connect_timeout.is_zero() {
            anyhow::bail!("database connect_timeout must be greater than 0");
        }

        Ok(())
    }
}

impl CiSettings {
    pub fn new(url: String, job: String) -> Self {
        Self {
            url,
            user: String::new(),
            token: String::new(),
            job,
            history_depth: 10,
            poll_interval: Duration::from_secs(10),
            max_wait: Duration::from_secs(90 * 60),
            queue_poll_interval: Duration::from_secs(2),
            queue_attempts: 15,
            pinned_build: None,
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for CiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CiSettings")
            .field("url", &self.url)
            .field("user", &self.user)
            .field("token", &"<redacted>")
            .field("job", &self.job)
            .field("history_depth", &self.history_depth)
            .field("poll_interval", &self.poll_interval)
            .field("max_wait", &self.max_wait)
            .field("queue_poll_interval", &self.queue_poll_interval)
            .field("queue_attempts", &self.queue_attempts)
            .field("pinned_build", &self.pinned_build)
            .field("request_timeout", &self.request_timeout)
            .finish()
    }
}

impl Default for TunnelSettings {
    fn default() -> Self {
        Self {
            ssh_binary: "ssh".to_string(),
            jump_host: "localhost".to_string(),
            jump_port: 22,
            jump_user: "deploy".to_string(),
            key_path: PathBuf::from("~/.ssh/id_rsa"),
            settle: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
            reap_stale: true,
        }
    }
}

impl DatabaseSettings {
    pub fn new(schema: String) -> Self {
        Self {
            schema,
            remote_port: 3306,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new(
            "http://localhost:8080".to_string(),
            "Environments/CreateClusterNew".to_string(),
            "app".to_string(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.ci.history_depth, 10);
        assert_eq!(config.ci.poll_interval, Duration::from_secs(10));
        assert_eq!(config.ci.queue_attempts, 15);
        assert_eq!(config.database.remote_port, 3306);
        assert_eq!(config.tunnel.settle, Duration::from_secs(5));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Invalid URL should fail
        config.ci.url = "not-a-url".to_string();
        assert!(config.validate().is_err());
        config.ci.url = "https://ci.example.com".to_string();
        assert!(config.validate().is_ok());

        // Empty job path should fail
        config.ci.job = " / ".to_string();
        assert!(config.validate().is_err());
        config.ci.job = "Environments/CreateClusterNew".to_string();

        // Waiting less than one poll interval makes no sense
        config.ci.max_wait = Duration::from_secs(1);
        assert!(config.validate().is_err());
        config.ci.max_wait = Duration::from_secs(600);

        // Schema must be a plain identifier
        config.database.schema = "app; drop".to_string();
        assert!(config.validate().is_err());
        config.database.schema = "app_new".to_string();

        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_token_not_in_debug() {
        let mut config = Config::default();
        config.ci.token = "very-secret-token".to_string();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("very-secret-token"));
    }
}
