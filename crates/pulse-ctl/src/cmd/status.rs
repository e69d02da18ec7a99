//! Daemon status and forced heartbeat commands.

use anyhow::Result;
use serde::Deserialize;

use super::http::{base_url, get_json, post_json};

#[derive(Deserialize)]
struct StatusResponse {
    identity: String,
    running: bool,
    heartbeat_interval_ms: u64,
    stale_after_ms: u64,
    domains: Vec<String>,
    change_detection: String,
    tracked_peers: usize,
    members: usize,
    subscribers: usize,
    uptime_secs: u64,
}

#[derive(Deserialize)]
struct HeartbeatResponse {
    sent: bool,
}

pub async fn cmd_status(port: u16) -> Result<()> {
    let resp: StatusResponse = get_json(&format!("{}/status", base_url(port))).await?;

    println!("═══════════════════════════════════════");
    println!("  Pulse Daemon Status");
    println!("═══════════════════════════════════════");
    println!("  Identity         : {}", resp.identity);
    println!("  Detector         : {}", if resp.running { "running" } else { "stopped" });
    println!("  Heartbeat        : every {} ms", resp.heartbeat_interval_ms);
    println!("  Stale after      : {} ms", resp.stale_after_ms);
    println!("  Accepted domains : {}", resp.domains.join(", "));
    println!("  Change detection : {}", resp.change_detection);
    println!("  Tracked peers    : {}", resp.tracked_peers);
    println!("  Members          : {}", resp.members);
    println!("  Subscribers      : {}", resp.subscribers);
    println!("  Uptime           : {}s", resp.uptime_secs);

    Ok(())
}

pub async fn cmd_heartbeat(port: u16) -> Result<()> {
    let resp: HeartbeatResponse = post_json(&format!("{}/heartbeat", base_url(port))).await?;
    if resp.sent {
        println!("Heartbeat sent.");
    } else {
        println!("Heartbeat skipped: no started endpoints, or the send failed (see daemon log).");
    }
    Ok(())
}
