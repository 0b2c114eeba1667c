//! SSH tunnels to candidate database hosts
//!
//! Every database connection goes through a local port forwarded via the
//! jump host. A tunnel is released on every path: explicitly through
//! [`TunnelBroker::close`], or by killing its process when dropped.

mod port;
mod ssh;

pub use port::{EphemeralPorts, PortAllocator};
pub use ssh::SshTunnelBroker;

use async_trait::async_trait;
use std::future::Future;
use std::net::{Ipv4Addr, SocketAddr};
use thiserror::Error;
use tokio::process::Child;
use tracing::warn;

/// Tunnel failures
#[derive(Debug, Error)]
pub enum TunnelError {
    #[error("No free local port: {0}")]
    NoFreePort(#[source] std::io::Error),

    #[error("Failed to spawn '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Tunnel to {remote} exited early ({status}): {stderr}")]
    Exited {
        remote: String,
        status: String,
        stderr: String,
    },

    #[error("Failed to check tunnel process: {0}")]
    Wait(#[source] std::io::Error),
}

/// A live local port forward to `remote_host:remote_port`
pub struct Tunnel {
    pub local_port: u16,
    pub remote_host: Ipv4Addr,
    pub remote_port: u16,
    child: Option<Child>,
    closed: bool,
}

impl Tunnel {
    pub fn new(local_port: u16, remote_host: Ipv4Addr, remote_port: u16, child: Child) -> Self {
        Self {
            local_port,
            remote_host,
            remote_port,
            child: Some(child),
            closed: false,
        }
    }

    /// A tunnel that owns no process
    pub fn detached(local_port: u16, remote_host: Ipv4Addr, remote_port: u16) -> Self {
        Self {
            local_port,
            remote_host,
            remote_port,
            child: None,
            closed: false,
        }
    }

    /// Where clients connect to reach the remote side
    pub fn local_addr(&self) -> SocketAddr {
        SocketAddr::from((Ipv4Addr::LOCALHOST, self.local_port))
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Marks the tunnel closed; false when it already was
    pub fn mark_closed(&mut self) -> bool {
        !std::mem::replace(&mut self.closed, true)
    }

    pub(crate) fn take_child(&mut self) -> Option<Child> {
        self.child.take()
    }
}

impl std::fmt::Debug for Tunnel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Tunnel")
            .field("local_port", &self.local_port)
            .field("remote_host", &self.remote_host)
            .field("remote_port", &self.remote_port)
            .field("closed", &self.closed)
            .finish()
    }
}

impl Drop for Tunnel {
    fn drop(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if let Err(e) = child.start_kill() {
                warn!(
                    "Failed to kill tunnel process for {}:{}: {}",
                    self.remote_host, self.remote_port, e
                );
            }
        }
    }
}

/// Opens and closes local port forwards
#[async_trait]
pub trait TunnelBroker: Send + Sync {
    /// Forwards `127.0.0.1:local_port` to `remote_host:remote_port`
    async fn open(
        &self,
        remote_host: Ipv4Addr,
        remote_port: u16,
        local_port: u16,
    ) -> Result<Tunnel, TunnelError>;

    /// Releases the tunnel. Closing twice is a no-op and failures are only logged.
    async fn close(&self, tunnel: &mut Tunnel);
}

/// Runs `f` against a fresh tunnel to `host:port` and closes it afterwards
pub async fn through_tunnel<T, E, F, Fut>(
    broker: &dyn TunnelBroker,
    ports: &dyn PortAllocator,
    host: Ipv4Addr,
    port: u16,
    f: F,
) -> Result<T, E>
where
    F: FnOnce(SocketAddr) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: From<TunnelError>,
{
    let local_port = ports.allocate()?;
    let mut tunnel = broker.open(host, port, local_port).await?;

    let result = f(tunnel.local_addr()).await;

    broker.close(&mut tunnel).await;
    result
}
