//! The mutation surface a detector pushes membership changes through.
//!
//! `MembershipRegistry` implements it directly when the registry lives in the
//! same process. A remote registry is reached through an adapter that
//! implements the same trait over RPC.

use pulse_core::{EndpointMetadata, Identity};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MembershipError {
    #[error("membership registry unreachable: {0}")]
    Unreachable(String),
}

pub trait Membership: Send + Sync {
    /// Record a newly discovered member. No-op if already present.
    fn add(&self, identity: &Identity, endpoints: &[EndpointMetadata])
        -> Result<(), MembershipError>;

    /// Replace a member's endpoints. No-op if absent.
    fn update(
        &self,
        identity: &Identity,
        endpoints: &[EndpointMetadata],
    ) -> Result<(), MembershipError>;

    /// Forget a member. No-op if absent.
    fn remove(&self, identity: &Identity) -> Result<(), MembershipError>;

    /// Move the local process into `domain`, evicting members outside it.
    fn change_domain(&self, domain: &str) -> Result<(), MembershipError>;
}
