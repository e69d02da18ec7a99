//! pulse-core: shared types, heartbeat wire format, and configuration.
//! All other Pulse crates depend on this one.

pub mod config;
pub mod detection;
pub mod identity;
pub mod locator;
pub mod wire;

pub use config::{ConfigError, DetectorConfig, PulseConfig};
pub use detection::{ChangeDetection, ChangeEvent, ChangeKind, Detection, MembershipEntry};
pub use identity::Identity;
pub use locator::{EndpointMetadata, Locator, LocatorParseError};
