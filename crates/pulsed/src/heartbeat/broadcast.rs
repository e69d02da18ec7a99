//! Heartbeat broadcast.
//!
//! Sends each heartbeat as one datagram to the configured multicast group so
//! every detector on the link hears it.

use std::net::{Ipv6Addr, SocketAddrV6, UdpSocket};

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};

use pulse_core::{wire, Detection, EndpointMetadata};
use pulse_services::Transport;

pub struct MulticastTransport {
    socket: UdpSocket,
    dest: SocketAddrV6,
    endpoints: Vec<EndpointMetadata>,
}

impl MulticastTransport {
    /// # Arguments
    /// * `interface_index` - OS interface index to send on (from `if_index`).
    /// * `group` - Multicast group heartbeats go to.
    /// * `port` - Port the listeners are bound to.
    /// * `endpoints` - Endpoints this process advertises.
    pub fn new(
        interface_index: u32,
        group: Ipv6Addr,
        port: u16,
        endpoints: Vec<EndpointMetadata>,
    ) -> Result<Self> {
        let socket = make_multicast_socket(interface_index)
            .context("failed to create multicast broadcast socket")?;
        Ok(Self {
            socket,
            dest: SocketAddrV6::new(group, port, 0, interface_index),
            endpoints,
        })
    }
}

impl Transport for MulticastTransport {
    fn local_endpoints(&self) -> Vec<EndpointMetadata> {
        self.endpoints.clone()
    }

    fn broadcast(&self, detection: &Detection) -> Result<()> {
        let bytes = wire::encode(detection).context("failed to encode heartbeat")?;
        let n = self
            .socket
            .send_to(&bytes, self.dest)
            .with_context(|| format!("send_to {}", self.dest))?;
        tracing::trace!(bytes = n, "heartbeat datagram sent");
        Ok(())
    }
}

/// Create a UDP socket suitable for sending IPv6 multicast.
fn make_multicast_socket(interface_index: u32) -> Result<UdpSocket> {
    let socket =
        Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket
        .set_multicast_if_v6(interface_index)
        .context("IPV6_MULTICAST_IF")?;
    // Link-local only.
    socket.set_multicast_hops_v6(1).context("IPV6_MULTICAST_HOPS")?;
    // Detectors on this host listen on the same group.
    socket
        .set_multicast_loop_v6(true)
        .context("IPV6_MULTICAST_LOOP")?;

    Ok(socket.into())
}

/// Get the OS interface index for a named network interface.
/// Returns an error if the interface does not exist.
pub fn if_index(name: &str) -> Result<u32> {
    let name_cstr = std::ffi::CString::new(name).context("interface name contains null byte")?;
    let index = unsafe { libc::if_nametoindex(name_cstr.as_ptr()) };
    if index == 0 {
        anyhow::bail!("interface '{}' not found", name);
    }
    Ok(index)
}
