//! Local port allocation

use std::net::{Ipv4Addr, TcpListener};

use super::TunnelError;

/// Hands out local ports for new tunnels
pub trait PortAllocator: Send + Sync {
    fn allocate(&self) -> Result<u16, TunnelError>;
}

/// Asks the OS for a free port by binding port 0
///
/// The listener is dropped before the port is used, so another process can
/// in principle grab it first. The tunnel then fails to bind and that host
/// counts as a non-match.
#[derive(Debug, Clone, Copy, Default)]
pub struct EphemeralPorts;

impl PortAllocator for EphemeralPorts {
    fn allocate(&self) -> Result<u16, TunnelError> {
        let listener =
            TcpListener::bind((Ipv4Addr::LOCALHOST, 0)).map_err(TunnelError::NoFreePort)?;
        let addr = listener.local_addr().map_err(TunnelError::NoFreePort)?;
        Ok(addr.port())
    }
}
