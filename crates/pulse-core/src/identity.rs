//! Process identity: the key every peer is tracked under.
//!
//! Two identities are equal when their (domain, instance_id) pair matches.
//! The process token is carried alongside but takes no part in equality;
//! it only answers "were these two identities minted by the same process?"

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::OnceLock;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Random token generated once per process.
pub fn process_token() -> &'static str {
    static TOKEN: OnceLock<String> = OnceLock::new();
    TOKEN.get_or_init(|| random_hex(16))
}

/// Random lowercase hex string of `n` bytes.
pub fn random_hex(n: usize) -> String {
    let mut bytes = vec![0u8; n];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Identity of one participating process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    /// Logical partition. `None` means the sender never configured one.
    domain: Option<String>,
    /// Stable name of the instance within its domain.
    instance_id: String,
    /// Token of the process that minted this identity.
    process: String,
}

impl Identity {
    /// Identity owned by the current process.
    pub fn local(domain: Option<&str>, instance_id: impl Into<String>) -> Self {
        Self::new(domain, instance_id, process_token())
    }

    /// Identity with an explicit process token.
    ///
    /// Used when several logical processes share one OS process (tests,
    /// embedded deployments) and must not recognise each other as local.
    pub fn new(
        domain: Option<&str>,
        instance_id: impl Into<String>,
        process: impl Into<String>,
    ) -> Self {
        Self {
            domain: domain.map(str::to_string),
            instance_id: instance_id.into(),
            process: process.into(),
        }
    }

    pub fn domain(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn process(&self) -> &str {
        &self.process
    }

    /// True if both identities were minted by the same process.
    pub fn is_same_process(&self, other: &Identity) -> bool {
        self.process == other.process
    }

    /// Copy of this identity moved into another domain.
    pub fn with_domain(&self, domain: &str) -> Self {
        Self {
            domain: Some(domain.to_string()),
            instance_id: self.instance_id.clone(),
            process: self.process.clone(),
        }
    }
}

impl PartialEq for Identity {
    fn eq(&self, other: &Self) -> bool {
        self.domain == other.domain && self.instance_id == other.instance_id
    }
}

impl Eq for Identity {}

impl Hash for Identity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.domain.hash(state);
        self.instance_id.hash(state);
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.domain {
            Some(domain) => write!(f, "{}@{}", self.instance_id, domain),
            None => write!(f, "{}", self.instance_id),
        }
    }
}
