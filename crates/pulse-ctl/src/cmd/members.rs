//! Membership listing and domain commands.

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::http::{base_url, get_json, post_json_body};

#[derive(Deserialize)]
struct MembersResponse {
    members: Vec<MemberInfo>,
}

#[derive(Deserialize)]
#[allow(dead_code)]
struct MemberInfo {
    identity: String,
    domain: Option<String>,
    instance_id: String,
    endpoints: Vec<EndpointInfo>,
}

#[derive(Deserialize)]
struct EndpointInfo {
    locator: String,
    subsystems: Vec<String>,
}

#[derive(Serialize)]
struct DomainRequest<'a> {
    domain: &'a str,
}

#[derive(Deserialize)]
struct DomainResponse {
    domain: String,
    members: usize,
}

pub async fn cmd_members(port: u16, subsystem: Option<&str>) -> Result<()> {
    let url = match subsystem {
        Some(s) => format!("{}/members?subsystem={}", base_url(port), s),
        None => format!("{}/members", base_url(port)),
    };
    let resp: MembersResponse = get_json(&url).await?;

    if resp.members.is_empty() {
        println!("No members known.");
        return Ok(());
    }

    println!("═══════════════════════════════════════");
    println!("  Members ({})", resp.members.len());
    println!("═══════════════════════════════════════");

    for m in &resp.members {
        println!("  ┌─ {}", m.identity);
        println!("  │  domain    : {}", m.domain.as_deref().unwrap_or("-"));
        match m.endpoints.split_last() {
            None => println!("  └─ endpoints : none"),
            Some((last, rest)) => {
                for e in rest {
                    println!("  │  endpoint  : {} [{}]", e.locator, e.subsystems.join(", "));
                }
                println!("  └─ endpoint  : {} [{}]", last.locator, last.subsystems.join(", "));
            }
        }
    }

    Ok(())
}

pub async fn cmd_domain(port: u16, domain: &str) -> Result<()> {
    let resp: DomainResponse =
        post_json_body(&format!("{}/domain", base_url(port)), &DomainRequest { domain }).await?;
    println!("Moved to domain '{}'. {} member(s) remain.", resp.domain, resp.members);
    Ok(())
}
