//! pulse-ctl: command-line interface for the Pulse daemon.

mod cmd;

use anyhow::{Context, Result};

const DEFAULT_PORT: u16 = 9401;

fn print_usage() {
    println!("Usage: pulse-ctl [--port <port>] <command>");
    println!();
    println!("Commands:");
    println!("  status                Show detector state and membership counts");
    println!("  members [subsystem]   List known members, optionally by subsystem");
    println!("  domain <name>         Move this process into another domain");
    println!("  heartbeat             Send one heartbeat now");
    println!();
    println!("Options:");
    println!("  --port <port>   API port (default: {})", DEFAULT_PORT);
}

// ── Entry point ───────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();

    let mut port = DEFAULT_PORT;
    let mut remaining: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < args.len() {
        if args[i] == "--port" {
            i += 1;
            port = args
                .get(i)
                .context("--port requires a value")?
                .parse()
                .context("--port must be a number")?;
        } else {
            remaining.push(&args[i]);
        }
        i += 1;
    }

    match remaining.as_slice() {
        ["status"] | [] => cmd::status::cmd_status(port).await,
        ["members"] => cmd::members::cmd_members(port, None).await,
        ["members", subsystem] => cmd::members::cmd_members(port, Some(subsystem)).await,
        ["domain", name] => cmd::members::cmd_domain(port, name).await,
        ["heartbeat"] => cmd::status::cmd_heartbeat(port).await,
        ["help"] | ["--help"] | ["-h"] => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {}", other.join(" "));
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    }
}
