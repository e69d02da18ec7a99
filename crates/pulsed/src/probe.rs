//! TCP-connect reachability probe.

use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use anyhow::{Context, Result};

use pulse_core::Locator;
use pulse_services::ConnectionProbe;

/// A locator is up if a TCP connection to its host and port opens in time.
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

impl ConnectionProbe for TcpProbe {
    fn probe(&self, locator: &Locator, timeout: Duration) -> Result<bool> {
        let addrs = (locator.host(), locator.port())
            .to_socket_addrs()
            .with_context(|| format!("cannot resolve {}", locator))?;

        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(_) => return Ok(true),
                Err(e) => tracing::trace!(%locator, %addr, error = %e, "probe connect failed"),
            }
        }
        Ok(false)
    }
}
