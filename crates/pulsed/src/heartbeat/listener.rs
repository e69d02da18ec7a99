//! Heartbeat listener.
//!
//! Joins the multicast group and hands every well-formed heartbeat to the
//! detector. Malformed datagrams are dropped here and never reach it.

use std::net::{Ipv6Addr, SocketAddrV6};
use std::sync::Arc;

use anyhow::{Context, Result};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::broadcast;

use pulse_core::wire::{self, HEADER_LEN, MAX_PAYLOAD};
use pulse_services::Detector;

/// Receive heartbeats until shutdown is signalled.
pub async fn listener_loop(
    detector: Arc<Detector>,
    interface_index: u32,
    group: Ipv6Addr,
    port: u16,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let socket = make_listener_socket(interface_index, group, port)
        .context("failed to create multicast listener socket")?;
    let socket = UdpSocket::from_std(socket).context("failed to convert to tokio UdpSocket")?;

    let mut buf = vec![0u8; HEADER_LEN + MAX_PAYLOAD];

    tracing::info!(port, group = %group, "heartbeat listener starting");

    loop {
        let (len, from) = tokio::select! {
            received = socket.recv_from(&mut buf) => match received {
                Ok(r) => r,
                Err(e) => {
                    tracing::warn!(error = %e, "recv_from failed");
                    continue;
                }
            },
            _ = shutdown.recv() => break,
        };

        match wire::decode(&buf[..len]) {
            Ok(detection) => detector.detect(detection),
            Err(e) => tracing::trace!(addr = %from, error = %e, "dropping malformed heartbeat"),
        }
    }

    tracing::info!("heartbeat listener stopped");
    Ok(())
}

/// Create a UDP socket joined to the heartbeat multicast group.
fn make_listener_socket(
    interface_index: u32,
    group: Ipv6Addr,
    port: u16,
) -> Result<std::net::UdpSocket> {
    let socket = Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP)).context("socket()")?;

    socket.set_reuse_address(true).context("SO_REUSEADDR")?;
    socket.set_only_v6(true).context("IPV6_V6ONLY")?;
    socket.set_nonblocking(true).context("set_nonblocking")?;

    let bind_addr = SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0);
    socket.bind(&bind_addr.into()).context("bind()")?;

    socket
        .join_multicast_v6(&group, interface_index)
        .context("IPV6_JOIN_GROUP")?;

    Ok(socket.into())
}
