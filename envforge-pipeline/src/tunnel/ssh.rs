//! Tunnels through an SSH jump host
//!
//! Each tunnel is one `ssh -N -L` process. The process gets a short settle
//! period after spawning; if it already exited by then (bad key, forward
//! refused, host unreachable) its stderr becomes the error.

use async_trait::async_trait;
use std::ffi::OsString;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio::time;
use tracing::{debug, info, warn};

use super::{Tunnel, TunnelBroker, TunnelError};
use crate::config::TunnelSettings;

/// Opens tunnels by spawning the SSH client
#[derive(Debug, Clone)]
pub struct SshTunnelBroker {
    settings: TunnelSettings,
}

impl SshTunnelBroker {
    pub fn new(settings: TunnelSettings) -> Self {
        Self { settings }
    }

    fn forward_spec(local_port: u16, remote_host: Ipv4Addr, remote_port: u16) -> String {
        format!("{}:{}:{}", local_port, remote_host, remote_port)
    }

    fn args(&self, forward: &str) -> Vec<OsString> {
        let settings = &self.settings;
        vec![
            "-i".into(),
            expand_home(&settings.key_path).into_os_string(),
            "-L".into(),
            forward.into(),
            "-N".into(),
            format!("{}@{}", settings.jump_user, settings.jump_host).into(),
            "-p".into(),
            settings.jump_port.to_string().into(),
            "-o".into(),
            "StrictHostKeyChecking=no".into(),
            "-o".into(),
            format!("ConnectTimeout={}", settings.connect_timeout.as_secs().max(1)).into(),
            "-o".into(),
            "ExitOnForwardFailure=yes".into(),
        ]
    }

    fn command(&self, forward: &str) -> Command {
        let mut cmd = Command::new(&self.settings.ssh_binary);
        cmd.args(self.args(forward))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Kills tunnels left behind by earlier runs for the same forward
    async fn reap_stale(&self, forward: &str) {
        let result = Command::new("pkill")
            .arg("-f")
            .arg(forward)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match result {
            Ok(status) if status.success() => debug!("Killed stale tunnel for {}", forward),
            Ok(_) => {}
            Err(e) => debug!("pkill unavailable, not reaping stale tunnels: {}", e),
        }
    }
}

#[async_trait]
impl TunnelBroker for SshTunnelBroker {
    async fn open(
        &self,
        remote_host: Ipv4Addr,
        remote_port: u16,
        local_port: u16,
    ) -> Result<Tunnel, TunnelError> {
        let forward = Self::forward_spec(local_port, remote_host, remote_port);

        if self.settings.reap_stale {
            self.reap_stale(&forward).await;
        }

        info!(
            "Opening tunnel 127.0.0.1:{} -> {}:{} via {}",
            local_port, remote_host, remote_port, self.settings.jump_host
        );

        let mut child = self
            .command(&forward)
            .spawn()
            .map_err(|source| TunnelError::Spawn {
                binary: self.settings.ssh_binary.clone(),
                source,
            })?;

        time::sleep(self.settings.settle).await;

        if let Some(status) = child.try_wait().map_err(TunnelError::Wait)? {
            let mut stderr = String::new();
            if let Some(mut pipe) = child.stderr.take() {
                let _ = pipe.read_to_string(&mut stderr).await;
            }

            return Err(TunnelError::Exited {
                remote: format!("{}:{}", remote_host, remote_port),
                status: status.to_string(),
                stderr: stderr.trim().to_string(),
            });
        }

        debug!("Tunnel {} is up", forward);
        Ok(Tunnel::new(local_port, remote_host, remote_port, child))
    }

    async fn close(&self, tunnel: &mut Tunnel) {
        if !tunnel.mark_closed() {
            return;
        }

        if let Some(mut child) = tunnel.take_child() {
            match stop(&mut child).await {
                Ok(true) => {}
                Ok(false) => debug!(
                    "Tunnel to {}:{} had already exited",
                    tunnel.remote_host, tunnel.remote_port
                ),
                Err(e) => {
                    warn!(
                        "Failed to stop tunnel to {}:{}: {}",
                        tunnel.remote_host, tunnel.remote_port, e
                    );
                    return;
                }
            }
        }

        debug!(
            "Closed tunnel 127.0.0.1:{} -> {}:{}",
            tunnel.local_port, tunnel.remote_host, tunnel.remote_port
        );
    }
}

/// Kills the process unless it already exited; `Ok(false)` means it had
async fn stop(child: &mut Child) -> std::io::Result<bool> {
    if child.try_wait()?.is_some() {
        return Ok(false);
    }
    child.kill().await?;
    Ok(true)
}

/// Expands a leading `~/` using `$HOME`
fn expand_home(path: &Path) -> PathBuf {
    match (path.strip_prefix("~"), std::env::var_os("HOME")) {
        (Ok(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => path.to_path_buf(),
    }
}
