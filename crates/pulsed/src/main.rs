//! pulsed: Pulse peer discovery and failure detection daemon.

use std::net::Ipv6Addr;
use std::sync::Arc;

use anyhow::{Context, Result};

use pulse_core::{ChangeEvent, PulseConfig};
use pulse_services::{Detector, MembershipRegistry};

mod heartbeat;
mod probe;

use heartbeat::{broadcast, listener};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = PulseConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = PulseConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        PulseConfig::default()
    });

    let interface = std::env::args()
        .nth(1)
        .or_else(|| Some(config.network.interface.clone()).filter(|i| !i.is_empty()))
        .unwrap_or_else(|| "lo".to_string());
    let interface_index = broadcast::if_index(&interface)?;
    let group: Ipv6Addr = config
        .network
        .multicast_addr
        .parse()
        .with_context(|| format!("invalid multicast address '{}'", config.network.multicast_addr))?;
    let port = config.network.port;

    let identity = config.local_identity();
    let endpoints = config
        .local_endpoints()
        .context("invalid endpoint in config")?;
    let detector_config = config
        .detector
        .to_detector_config()
        .context("invalid detector settings")?;

    tracing::info!(
        %identity,
        interface,
        port,
        endpoints = endpoints.len(),
        "pulsed starting"
    );
    if endpoints.is_empty() {
        tracing::warn!("no endpoints configured; heartbeats will not be sent");
    }

    // Shared state
    let registry = MembershipRegistry::shared(identity.clone());
    registry.subscribe(|event: &ChangeEvent| {
        tracing::info!(
            kind = ?event.kind,
            peer = %event.identity,
            endpoints = event.endpoints.len(),
            "membership changed"
        );
    });

    let transport = Arc::new(broadcast::MulticastTransport::new(
        interface_index,
        group,
        port,
        endpoints,
    )?);
    let detector = Arc::new(
        Detector::builder(identity, transport, Arc::new(probe::TcpProbe))
            .config(detector_config)
            .membership(registry.clone())
            .build(),
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let listener_task = {
        let detector = detector.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) =
                listener::listener_loop(detector, interface_index, group, port, shutdown).await
            {
                tracing::error!(error = %e, "heartbeat listener failed");
            }
        })
    };

    detector.start().context("failed to start detector")?;

    let api_port = config.api.port;
    let api_task = {
        let state = pulse_api::ApiState::new(registry.clone(), detector.clone());
        tokio::spawn(async move {
            if let Err(e) = pulse_api::serve(state, api_port).await {
                tracing::error!(error = %e, "API server failed");
            }
        })
    };

    let _ = shutdown_rx.recv().await;

    detector.stop();
    api_task.abort();
    let _ = listener_task.await;

    tracing::info!(members = registry.len(), "pulsed stopped");
    Ok(())
}
