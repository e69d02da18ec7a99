//! Endpoint locators and the metadata advertised for each endpoint.
//!
//! A locator is written as `transport://host:port/path?key=value&...`.
//! IPv6 hosts are bracketed on the wire and stored without brackets. Path
//! segments and query keys/values are percent-encoded, so any string survives
//! the round trip.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocatorParseError {
    #[error("locator '{0}' has no transport scheme")]
    MissingTransport(String),
    #[error("locator '{0}' has no host")]
    MissingHost(String),
    #[error("locator '{0}' has no port")]
    MissingPort(String),
    #[error("locator '{0}' has an invalid port")]
    InvalidPort(String),
    #[error("locator '{0}' has an unterminated IPv6 host")]
    UnterminatedIpv6(String),
    #[error("locator '{0}' has an invalid percent escape")]
    InvalidEscape(String),
}

/// Address of one invocable endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Locator {
    transport: String,
    host: String,
    port: u16,
    path: String,
    params: BTreeMap<String, String>,
}

impl Locator {
    pub fn new(transport: impl Into<String>, host: impl Into<String>, port: u16) -> Self {
        Self {
            transport: transport.into(),
            host: host.into(),
            port,
            path: String::new(),
            params: BTreeMap::new(),
        }
    }

    /// Builder-style parameter setter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into().trim_start_matches('/').to_string();
        self
    }

    pub fn transport(&self) -> &str {
        &self.transport
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }

    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    /// 64-bit hash of the canonical URI form.
    ///
    /// Derived from BLAKE3 so that every process computes the same value for
    /// the same locator, unlike `std::hash` which is seeded per process.
    pub fn stable_hash(&self) -> u64 {
        let digest = blake3::hash(self.to_string().as_bytes());
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        u64::from_le_bytes(head)
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "{}://[{}]:{}", self.transport, self.host, self.port)?;
        } else {
            write!(f, "{}://{}:{}", self.transport, self.host, self.port)?;
        }
        if !self.path.is_empty() || !self.params.is_empty() {
            f.write_str("/")?;
            for (i, segment) in self.path.split('/').enumerate() {
                if i > 0 {
                    f.write_str("/")?;
                }
                f.write_str(&urlencoding::encode(segment))?;
            }
        }
        let mut sep = '?';
        for (k, v) in &self.params {
            let k = urlencoding::encode(k);
            if v.is_empty() {
                write!(f, "{sep}{k}")?;
            } else {
                write!(f, "{sep}{k}={}", urlencoding::encode(v))?;
            }
            sep = '&';
        }
        Ok(())
    }
}

impl FromStr for Locator {
    type Err = LocatorParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (transport, rest) = s
            .split_once("://")
            .filter(|(t, _)| !t.is_empty())
            .ok_or_else(|| LocatorParseError::MissingTransport(s.to_string()))?;

        let (authority, tail) = match rest.find(['/', '?']) {
            Some(i) => rest.split_at(i),
            None => (rest, ""),
        };

        let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| LocatorParseError::UnterminatedIpv6(s.to_string()))?;
            let port = after
                .strip_prefix(':')
                .ok_or_else(|| LocatorParseError::MissingPort(s.to_string()))?;
            (host, port)
        } else {
            authority
                .rsplit_once(':')
                .ok_or_else(|| LocatorParseError::MissingPort(s.to_string()))?
        };

        if host.is_empty() {
            return Err(LocatorParseError::MissingHost(s.to_string()));
        }
        let port: u16 = port
            .parse()
            .map_err(|_| LocatorParseError::InvalidPort(s.to_string()))?;

        let unescape = |raw: &str| {
            urlencoding::decode(raw)
                .map(|decoded| decoded.into_owned())
                .map_err(|_| LocatorParseError::InvalidEscape(s.to_string()))
        };

        let (path, query) = tail.split_once('?').unwrap_or((tail, ""));
        let params: BTreeMap<String, String> = query
            .split('&')
            .filter(|pair| !pair.is_empty())
            .map(|pair| {
                let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                Ok((unescape(k)?, unescape(v)?))
            })
            .collect::<Result<_, LocatorParseError>>()?;

        Ok(Self {
            transport: transport.to_string(),
            host: host.to_string(),
            port,
            path: unescape(path.trim_start_matches('/'))?,
            params,
        })
    }
}

impl TryFrom<String> for Locator {
    type Error = LocatorParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Locator> for String {
    fn from(locator: Locator) -> Self {
        locator.to_string()
    }
}

/// One endpoint a process offers, and the subsystems it serves.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointMetadata {
    pub locator: Locator,
    #[serde(default)]
    pub subsystems: BTreeSet<String>,
}

impl EndpointMetadata {
    pub fn new<I, S>(locator: Locator, subsystems: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            locator,
            subsystems: subsystems.into_iter().map(Into::into).collect(),
        }
    }

    /// Does this endpoint serve the named subsystem? Case-insensitive.
    pub fn supports(&self, subsystem: &str) -> bool {
        self.subsystems
            .iter()
            .any(|s| s.eq_ignore_ascii_case(subsystem))
    }
}
